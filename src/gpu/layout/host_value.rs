//! Host-side Rust types that map onto WGSL field types

use crate::gpu::layout::wgsl_type::{ScalarKind, WgslType};
use half::f16;

/// A Rust value with a fixed WGSL counterpart.
///
/// `write_bytes` receives a slice starting at the field's offset and spanning
/// its WGSL size; implementations honour the WGSL column and element strides.
pub trait HostValue: Copy {
    fn wgsl_type() -> WgslType;
    fn write_bytes(&self, out: &mut [u8]);
    fn read_bytes(bytes: &[u8]) -> Self;
    fn zeroed() -> Self;
}

/// Scalars usable as vector and matrix components
pub trait HostScalar: Copy {
    const KIND: ScalarKind;
    const ZERO: Self;
    fn put(self, out: &mut [u8]);
    fn take(bytes: &[u8]) -> Self;
}

macro_rules! impl_host_scalar {
    ($ty:ty, $kind:expr, $zero:expr, $size:literal) => {
        impl HostScalar for $ty {
            const KIND: ScalarKind = $kind;
            const ZERO: Self = $zero;

            fn put(self, out: &mut [u8]) {
                out[..$size].copy_from_slice(bytemuck::bytes_of(&self));
            }

            fn take(bytes: &[u8]) -> Self {
                bytemuck::pod_read_unaligned(&bytes[..$size])
            }
        }

        impl HostValue for $ty {
            fn wgsl_type() -> WgslType {
                WgslType::Scalar(<$ty as HostScalar>::KIND)
            }

            fn write_bytes(&self, out: &mut [u8]) {
                self.put(out);
            }

            fn read_bytes(bytes: &[u8]) -> Self {
                <$ty as HostScalar>::take(bytes)
            }

            fn zeroed() -> Self {
                <$ty as HostScalar>::ZERO
            }
        }

        impl_host_vector!($ty, 2);
        impl_host_vector!($ty, 3);
        impl_host_vector!($ty, 4);
    };
}

macro_rules! impl_host_vector {
    ($ty:ty, $n:literal) => {
        impl HostValue for [$ty; $n] {
            fn wgsl_type() -> WgslType {
                WgslType::vec(<$ty as HostScalar>::KIND, $n)
            }

            fn write_bytes(&self, out: &mut [u8]) {
                let step = <$ty as HostScalar>::KIND.size() as usize;
                for (i, value) in self.iter().enumerate() {
                    value.put(&mut out[i * step..]);
                }
            }

            fn read_bytes(bytes: &[u8]) -> Self {
                let step = <$ty as HostScalar>::KIND.size() as usize;
                std::array::from_fn(|i| <$ty as HostScalar>::take(&bytes[i * step..]))
            }

            fn zeroed() -> Self {
                [<$ty as HostScalar>::ZERO; $n]
            }
        }
    };
}

// Column-major: `[[S; ROWS]; COLUMNS]`
macro_rules! impl_host_matrix {
    ($ty:ty, $cols:literal, $rows:literal) => {
        impl HostValue for [[$ty; $rows]; $cols] {
            fn wgsl_type() -> WgslType {
                WgslType::mat(<$ty as HostScalar>::KIND, $cols, $rows)
            }

            fn write_bytes(&self, out: &mut [u8]) {
                let stride = (Self::wgsl_type().size() / $cols) as usize;
                for (c, column) in self.iter().enumerate() {
                    column.write_bytes(&mut out[c * stride..]);
                }
            }

            fn read_bytes(bytes: &[u8]) -> Self {
                let stride = (Self::wgsl_type().size() / $cols) as usize;
                std::array::from_fn(|c| <[$ty; $rows]>::read_bytes(&bytes[c * stride..]))
            }

            fn zeroed() -> Self {
                [[<$ty as HostScalar>::ZERO; $rows]; $cols]
            }
        }
    };
}

macro_rules! impl_host_matrices {
    ($ty:ty) => {
        impl_host_matrix!($ty, 2, 2);
        impl_host_matrix!($ty, 2, 3);
        impl_host_matrix!($ty, 2, 4);
        impl_host_matrix!($ty, 3, 2);
        impl_host_matrix!($ty, 3, 3);
        impl_host_matrix!($ty, 3, 4);
        impl_host_matrix!($ty, 4, 2);
        impl_host_matrix!($ty, 4, 3);
        impl_host_matrix!($ty, 4, 4);
    };
}

impl_host_scalar!(f32, ScalarKind::F32, 0.0, 4);
impl_host_scalar!(u32, ScalarKind::U32, 0, 4);
impl_host_scalar!(i32, ScalarKind::I32, 0, 4);
impl_host_scalar!(f16, ScalarKind::F16, f16::ZERO, 2);

impl_host_matrices!(f32);
impl_host_matrices!(f16);

/// Fixed-length WGSL array field, `array<T, N>`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GpuArray<T, const N: usize>(pub [T; N]);

impl<T: HostValue, const N: usize> HostValue for GpuArray<T, N> {
    fn wgsl_type() -> WgslType {
        WgslType::array(T::wgsl_type(), N as u32)
    }

    fn write_bytes(&self, out: &mut [u8]) {
        let stride = T::wgsl_type().stride() as usize;
        for (i, value) in self.0.iter().enumerate() {
            value.write_bytes(&mut out[i * stride..]);
        }
    }

    fn read_bytes(bytes: &[u8]) -> Self {
        let stride = T::wgsl_type().stride() as usize;
        GpuArray(std::array::from_fn(|i| T::read_bytes(&bytes[i * stride..])))
    }

    fn zeroed() -> Self {
        GpuArray([T::zeroed(); N])
    }
}

/// Reference to a neighbouring record in the same buffer.
///
/// Absence is explicit on the host; on the GPU it is stored as `u32::MAX`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct NeighborIndex(pub Option<u32>);

impl NeighborIndex {
    /// GPU encoding of "no neighbour"
    pub const ABSENT: u32 = u32::MAX;

    pub const fn none() -> Self {
        NeighborIndex(None)
    }

    pub const fn some(index: u32) -> Self {
        NeighborIndex(Some(index))
    }

    pub fn get(self) -> Option<u32> {
        self.0
    }

    pub fn is_absent(self) -> bool {
        self.0.is_none()
    }

    pub fn encode(self) -> u32 {
        self.0.unwrap_or(Self::ABSENT)
    }

    pub fn decode(raw: u32) -> Self {
        if raw == Self::ABSENT {
            NeighborIndex(None)
        } else {
            NeighborIndex(Some(raw))
        }
    }
}

impl From<Option<u32>> for NeighborIndex {
    fn from(value: Option<u32>) -> Self {
        NeighborIndex(value)
    }
}

impl HostValue for NeighborIndex {
    fn wgsl_type() -> WgslType {
        WgslType::Scalar(ScalarKind::U32)
    }

    fn write_bytes(&self, out: &mut [u8]) {
        self.encode().put(out);
    }

    fn read_bytes(bytes: &[u8]) -> Self {
        NeighborIndex::decode(u32::take(bytes))
    }

    fn zeroed() -> Self {
        NeighborIndex(None)
    }
}
