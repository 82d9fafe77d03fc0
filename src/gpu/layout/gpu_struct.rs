//! Compile-time generated struct accessors
//!
//! [`gpu_struct!`](crate::gpu_struct) declares a plain Rust struct together with
//! its WGSL field list. Every field also gets a typed [`FieldAccessor`] constant,
//! so code that pokes individual uniform fields is checked by the compiler
//! instead of matching names and types at run time.

use crate::error::{SimError, SimResult};
use crate::gpu::layout::host_value::HostValue;
use crate::gpu::layout::struct_layout::StructLayout;
use crate::gpu::layout::wgsl_type::WgslType;
use std::marker::PhantomData;

/// A struct with a WGSL counterpart
pub trait GpuStruct: Copy {
    /// WGSL struct name
    const NAME: &'static str;

    fn field_types() -> Vec<(&'static str, WgslType)>;

    /// Layout whose default record is the encoding of every field's zero value
    fn layout() -> SimResult<StructLayout> {
        let layout = StructLayout::compute(&Self::field_types())?;
        let mut image = vec![0u8; layout.size() as usize];
        Self::decode_from(&layout, &[]).encode_into(&layout, &mut image);
        Ok(layout.with_default_record(image))
    }

    fn encode_into(&self, layout: &StructLayout, out: &mut [u8]);

    fn decode_from(layout: &StructLayout, bytes: &[u8]) -> Self;

    fn to_bytes(&self) -> SimResult<Vec<u8>> {
        let layout = Self::layout()?;
        let mut out = vec![0u8; layout.size() as usize];
        self.encode_into(&layout, &mut out);
        Ok(out)
    }

    fn from_bytes(bytes: &[u8]) -> SimResult<Self> {
        let layout = Self::layout()?;
        if (bytes.len() as u64) < layout.size() {
            return Err(SimError::InvalidField {
                field: Self::NAME.to_string(),
                reason: format!("{} bytes given, {} required", bytes.len(), layout.size()),
            });
        }
        Ok(Self::decode_from(&layout, bytes))
    }

    fn to_wgsl() -> SimResult<String> {
        Ok(Self::layout()?.to_wgsl(Self::NAME))
    }
}

/// Pack `records` back to back using the struct stride
pub fn encode_records<T: GpuStruct>(records: &[T]) -> SimResult<Vec<u8>> {
    let layout = T::layout()?;
    let stride = layout.stride() as usize;
    let mut out = vec![0u8; stride * records.len()];
    for (i, record) in records.iter().enumerate() {
        record.encode_into(&layout, &mut out[i * stride..(i + 1) * stride]);
    }
    Ok(out)
}

/// Unpack every whole record contained in `bytes`
pub fn decode_records<T: GpuStruct>(bytes: &[u8]) -> SimResult<Vec<T>> {
    let layout = T::layout()?;
    let stride = layout.stride() as usize;
    Ok(bytes
        .chunks_exact(stride)
        .map(|chunk| T::decode_from(&layout, chunk))
        .collect())
}

#[doc(hidden)]
pub fn write_field<V: HostValue>(layout: &StructLayout, name: &str, value: &V, out: &mut [u8]) {
    if let Some(field) = layout.field(name) {
        let start = field.offset as usize;
        let end = start + field.size as usize;
        if end <= out.len() {
            value.write_bytes(&mut out[start..end]);
        }
    }
}

#[doc(hidden)]
pub fn read_field<V: HostValue>(layout: &StructLayout, name: &str, bytes: &[u8]) -> V {
    match layout.field(name) {
        Some(field) if (field.offset + field.size) as usize <= bytes.len() => {
            V::read_bytes(&bytes[field.offset as usize..])
        }
        _ => V::zeroed(),
    }
}

/// Typed handle on one field of `S` holding a `V`
pub struct FieldAccessor<S, V> {
    name: &'static str,
    _marker: PhantomData<fn() -> (S, V)>,
}

impl<S, V> FieldAccessor<S, V> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<S, V> Clone for FieldAccessor<S, V> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S, V> Copy for FieldAccessor<S, V> {}

impl<S, V> std::fmt::Debug for FieldAccessor<S, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("FieldAccessor").field(&self.name).finish()
    }
}

impl<S: GpuStruct, V: HostValue> FieldAccessor<S, V> {
    pub fn offset(&self, layout: &StructLayout) -> SimResult<u64> {
        layout.offset_of(self.name)
    }

    /// Encode `value` into a byte image of `S`
    pub fn write(&self, layout: &StructLayout, out: &mut [u8], value: V) -> SimResult<()> {
        let field = self.checked_field(layout, out.len())?;
        let start = field.offset as usize;
        value.write_bytes(&mut out[start..start + field.size as usize]);
        Ok(())
    }

    pub fn read(&self, layout: &StructLayout, bytes: &[u8]) -> SimResult<V> {
        let field = self.checked_field(layout, bytes.len())?;
        Ok(V::read_bytes(&bytes[field.offset as usize..]))
    }

    /// Encoded bytes of `value` alone
    pub fn encode(&self, value: V) -> Vec<u8> {
        let mut out = vec![0u8; V::wgsl_type().size() as usize];
        value.write_bytes(&mut out);
        out
    }

    fn checked_field<'l>(
        &self,
        layout: &'l StructLayout,
        len: usize,
    ) -> SimResult<&'l crate::gpu::layout::struct_layout::FieldOffset> {
        let field = layout.field(self.name).ok_or_else(|| SimError::InvalidField {
            field: self.name.to_string(),
            reason: format!("not a field of {}", S::NAME),
        })?;
        if field.ty != V::wgsl_type() {
            return Err(SimError::InvalidField {
                field: self.name.to_string(),
                reason: format!("declared {} but accessed as {}", field.ty, V::wgsl_type()),
            });
        }
        if (field.offset + field.size) as usize > len {
            return Err(SimError::InvalidField {
                field: self.name.to_string(),
                reason: format!("buffer of {} bytes is too small", len),
            });
        }
        Ok(field)
    }
}

/// Declare a struct shared between host and GPU.
///
/// ```ignore
/// gpu_struct! {
///     pub struct Params {
///         pub phase: u32,
///         pub size: [u32; 2],
///     }
/// }
/// let offset = Params::phase.offset(&Params::layout()?)?;
/// ```
#[macro_export]
macro_rules! gpu_struct {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $(
                $(#[$field_meta:meta])*
                $field_vis:vis $field:ident : $ty:ty
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq)]
        $vis struct $name {
            $(
                $(#[$field_meta])*
                $field_vis $field: $ty,
            )*
        }

        #[allow(non_upper_case_globals)]
        impl $name {
            $(
                pub const $field: $crate::gpu::layout::FieldAccessor<$name, $ty> =
                    $crate::gpu::layout::FieldAccessor::new(stringify!($field));
            )*
        }

        impl $crate::gpu::layout::GpuStruct for $name {
            const NAME: &'static str = stringify!($name);

            fn field_types() -> Vec<(&'static str, $crate::gpu::layout::WgslType)> {
                vec![
                    $(
                        (
                            stringify!($field),
                            <$ty as $crate::gpu::layout::HostValue>::wgsl_type(),
                        ),
                    )*
                ]
            }

            fn encode_into(&self, layout: &$crate::gpu::layout::StructLayout, out: &mut [u8]) {
                $(
                    $crate::gpu::layout::gpu_struct::write_field(
                        layout,
                        stringify!($field),
                        &self.$field,
                        out,
                    );
                )*
            }

            fn decode_from(layout: &$crate::gpu::layout::StructLayout, bytes: &[u8]) -> Self {
                Self {
                    $(
                        $field: $crate::gpu::layout::gpu_struct::read_field(
                            layout,
                            stringify!($field),
                            bytes,
                        ),
                    )*
                }
            }
        }
    };
}
