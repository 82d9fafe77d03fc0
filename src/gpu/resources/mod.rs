//! Typed resource tables and their allocation

pub mod allocator;
pub mod descriptor;
pub mod initial_data;
pub mod instance;
pub mod pixel_format;
pub mod table;

pub use allocator::ResourceAllocator;
pub use descriptor::{BufferSize, ResourceDescriptor, StorageAccess, TextureDesc};
pub use initial_data::{BufferContent, InitialContent, RecordData, TexelRows, TextureContent};
pub use instance::{AllocatedBuffer, AllocatedTexture, ResourceTableInstance};
pub use pixel_format::{ElementType, PixelFormat};
pub use table::{ResourceEntry, ResourceTable};
