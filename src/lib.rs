//! Declarative GPU resource tables, binding synthesis and multi-pass compute
//! scheduling for grid and agent simulations.
//!
//! A simulation is described host-side: a [`ResourceTable`] names every
//! texture and buffer by binding slot, the [`ResourceAllocator`] creates them
//! on a [`GpuDevice`], the [`PipelineBinder`] derives binding layouts and
//! compute pipelines from the table, and the [`Scheduler`] replays a
//! [`PassPlan`] once per tick.

pub mod config;
pub mod error;
pub mod gpu;
pub mod sim;
pub mod sims;

pub use config::{Backend, PowerPreference, SimConfig};
pub use error::{ErrorCategory, SimError, SimResult, SourceLocation};
pub use gpu::layout::{GpuArray, GpuStruct, NeighborIndex, StructLayout, WgslType};
pub use gpu::resources::{
    InitialContent, PixelFormat, ResourceAllocator, ResourceDescriptor, ResourceTable,
    ResourceTableInstance,
};
pub use gpu::shader::{compile_program, Diagnostics, ProgramLibrary, ProgramSource};
pub use gpu::{
    BindingHandle, ComputeProgram, GpuDevice, PipelineBinder, SoftwareDevice, Visibility,
    WgpuDevice, WgpuOptions,
};
pub use sim::{PassPlan, PhaseSelector, Scheduler, Simulation, TickDriver};
