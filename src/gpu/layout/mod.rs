//! Struct layout engine
//!
//! Turns ordered, typed field lists into byte offsets, sizes and strides that
//! match what WGSL expects, and provides the host types used to fill them.

pub mod gpu_struct;
pub mod host_value;
pub mod struct_layout;
pub mod wgsl_type;

pub use gpu_struct::{decode_records, encode_records, FieldAccessor, GpuStruct};
pub use host_value::{GpuArray, HostScalar, HostValue, NeighborIndex};
pub use struct_layout::{align_size, padding_for_alignment, FieldOffset, LayoutBuilder, StructLayout};
pub use wgsl_type::{ScalarKind, WgslType};
