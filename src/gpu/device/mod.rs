//! Device capability interface
//!
//! Everything the engine needs from a GPU goes through [`GpuDevice`]. Handles
//! are small copyable ids; the device owns the underlying objects until they
//! are destroyed. Two backends ship with the crate: [`wgpu_backend::WgpuDevice`]
//! for real hardware and [`software::SoftwareDevice`], a deterministic CPU
//! executor used by tests and headless runs.

pub mod kernel;
pub mod software;
pub mod wgpu_backend;

use crate::error::SimResult;
use crate::gpu::resources::pixel_format::PixelFormat;
use crate::gpu::shader::{Diagnostics, ProgramSource};
use std::fmt;

macro_rules! handle_type {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u32);

        impl $name {
            pub const KIND: &'static str = $kind;

            pub fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}#{}", $kind, self.0)
            }
        }
    };
}

handle_type!(TextureHandle, "texture");
handle_type!(BufferHandle, "buffer");
handle_type!(ProgramHandle, "program");
handle_type!(LayoutHandle, "layout");
handle_type!(
    /// A bound resource group (bind group)
    BindGroupHandle,
    "binding"
);
handle_type!(PipelineHandle, "pipeline");

#[derive(Debug, Clone, PartialEq)]
pub struct TextureSpec {
    pub label: String,
    pub width: u32,
    pub height: u32,
    pub layers: u32,
    pub format: PixelFormat,
    /// Create a 2D-array view even for a single layer
    pub array: bool,
    pub usage: wgpu::TextureUsages,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BufferSpec {
    pub label: String,
    pub size: u64,
    pub usage: wgpu::BufferUsages,
}

/// Destination region of a texture upload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureRegion {
    pub layer: u32,
    pub layers: u32,
    pub width: u32,
    pub height: u32,
    /// Tightly packed source row pitch
    pub bytes_per_row: u32,
}

/// Kind of resource a layout slot expects
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BindingKind {
    StorageTexture {
        format: PixelFormat,
        access: crate::gpu::resources::descriptor::StorageAccess,
        array: bool,
    },
    SampledTexture {
        format: PixelFormat,
        array: bool,
    },
    UniformBuffer,
    StorageBuffer {
        read_only: bool,
    },
}

impl BindingKind {
    pub fn is_texture(&self) -> bool {
        matches!(
            self,
            BindingKind::StorageTexture { .. } | BindingKind::SampledTexture { .. }
        )
    }

    pub fn can_write(&self) -> bool {
        match self {
            BindingKind::StorageTexture { access, .. } => access.can_write(),
            BindingKind::StorageBuffer { read_only } => !read_only,
            _ => false,
        }
    }

    pub fn can_read(&self) -> bool {
        !matches!(
            self,
            BindingKind::StorageTexture {
                access: crate::gpu::resources::descriptor::StorageAccess::WriteOnly,
                ..
            }
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LayoutEntry {
    pub binding: u32,
    pub visibility: wgpu::ShaderStages,
    pub kind: BindingKind,
    /// Full device binding type
    pub binding_type: wgpu::BindingType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundResource {
    Texture(TextureHandle),
    Buffer(BufferHandle),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindingEntry {
    pub binding: u32,
    pub resource: BoundResource,
}

/// One recorded GPU operation
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Dispatch {
        label: String,
        pipeline: PipelineHandle,
        /// (group index, bound group)
        bind_groups: Vec<(u32, BindGroupHandle)>,
        workgroups: [u32; 3],
    },
    CopyTexture {
        label: String,
        source: TextureHandle,
        destination: TextureHandle,
        width: u32,
        height: u32,
        layers: u32,
    },
    CopyBuffer {
        label: String,
        source: BufferHandle,
        destination: BufferHandle,
        size: u64,
    },
}

/// Commands submitted together, executed in order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandBatch {
    pub label: String,
    pub commands: Vec<Command>,
}

impl CommandBatch {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            commands: Vec::new(),
        }
    }

    pub fn push(&mut self, command: Command) {
        self.commands.push(command);
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn dispatch_count(&self) -> usize {
        self.commands
            .iter()
            .filter(|c| matches!(c, Command::Dispatch { .. }))
            .count()
    }
}

/// Operations the engine requires from a GPU
pub trait GpuDevice: Send + Sync {
    /// Short backend name for logs
    fn backend_name(&self) -> &'static str;

    /// Whether storage textures of `format` may be bound read-write
    fn supports_read_write_storage(&self, format: PixelFormat) -> bool;

    fn create_texture(&self, spec: &TextureSpec) -> SimResult<TextureHandle>;

    fn create_buffer(&self, spec: &BufferSpec) -> SimResult<BufferHandle>;

    fn write_buffer(&self, buffer: BufferHandle, offset: u64, bytes: &[u8]) -> SimResult<()>;

    fn write_texture(&self, texture: TextureHandle, bytes: &[u8], region: TextureRegion) -> SimResult<()>;

    /// Compile program text; problems that do not stop compilation go to `diagnostics`
    fn compile_program(
        &self,
        source: &ProgramSource,
        diagnostics: &mut Diagnostics,
    ) -> SimResult<ProgramHandle>;

    fn create_binding_layout(&self, label: &str, entries: &[LayoutEntry]) -> SimResult<LayoutHandle>;

    fn create_binding(
        &self,
        label: &str,
        layout: LayoutHandle,
        entries: &[BindingEntry],
    ) -> SimResult<BindGroupHandle>;

    fn create_pipeline(
        &self,
        label: &str,
        layouts: &[LayoutHandle],
        program: ProgramHandle,
        entry_point: &str,
    ) -> SimResult<PipelineHandle>;

    fn submit(&self, batch: &CommandBatch) -> SimResult<()>;

    /// Blocking read of a whole buffer
    fn read_buffer(&self, buffer: BufferHandle) -> SimResult<Vec<u8>>;

    /// Blocking read of one texture layer, tightly packed
    fn read_texture(&self, texture: TextureHandle, layer: u32) -> SimResult<Vec<u8>>;

    fn destroy_texture(&self, texture: TextureHandle);

    fn destroy_buffer(&self, buffer: BufferHandle);
}
