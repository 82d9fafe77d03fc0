//! GPU resource and pipeline layer
//!
//! Host-side struct layouts, typed resource tables, allocation, binding
//! synthesis and program handling, all expressed against the
//! [`device::GpuDevice`] capability interface.

pub mod binder;
pub mod device;
pub mod layout;
pub mod resources;
pub mod shader;

pub use binder::{BindingHandle, BindingId, ComputeProgram, PipelineBinder, Visibility};
pub use device::software::SoftwareDevice;
pub use device::wgpu_backend::{WgpuDevice, WgpuOptions};
pub use device::GpuDevice;
