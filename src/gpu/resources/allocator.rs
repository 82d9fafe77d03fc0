//! Resource allocation
//!
//! Turns a [`ResourceTable`] into device objects. All descriptors and initial
//! content are validated and packed before the first device call, so a bad
//! table never leaves half an allocation behind.

use crate::error::{SimError, SimResult};
use crate::gpu::device::{BufferSpec, GpuDevice, TextureSpec};
use crate::gpu::resources::descriptor::{ResourceDescriptor, StorageAccess};
use crate::gpu::resources::initial_data::InitialContent;
use crate::gpu::resources::instance::{
    next_instance_id, pack_content, pad4, upload_texture, AllocatedBuffer, AllocatedTexture,
    ResourceTableInstance,
};
use crate::gpu::resources::table::ResourceTable;
use std::collections::BTreeMap;

pub struct ResourceAllocator;

impl ResourceAllocator {
    /// Allocate every slot of `table` and upload its initial content.
    ///
    /// Textures with more than one layer become 2D arrays. Slots without
    /// content are explicitly filled with zeros or default records.
    pub fn allocate(
        table: &ResourceTable,
        device: &dyn GpuDevice,
        content: &InitialContent,
    ) -> SimResult<ResourceTableInstance> {
        let packed = pack_content(table, content)?;

        for entry in table.entries() {
            if let ResourceDescriptor::StorageTexture {
                texture,
                access: StorageAccess::ReadWrite,
            } = &entry.descriptor
            {
                if !device.supports_read_write_storage(texture.format) {
                    return Err(SimError::MissingFeature {
                        name: entry.name.clone(),
                        feature: format!("read-write storage access for {}", texture.format),
                    });
                }
            }
        }

        let mut instance = ResourceTableInstance {
            id: next_instance_id(),
            table: table.clone(),
            textures: BTreeMap::new(),
            buffers: BTreeMap::new(),
        };

        if let Err(e) = Self::create_all(&mut instance, device, &packed) {
            log::error!(
                "[ResourceAllocator] Allocation of '{}' failed: {}",
                table.label(),
                e
            );
            instance.teardown(device);
            return Err(e);
        }

        let bytes: u64 = packed.values().map(|b| b.len() as u64).sum();
        log::info!(
            "[ResourceAllocator] Allocated '{}': {} textures, {} buffers, {} bytes",
            table.label(),
            instance.textures.len(),
            instance.buffers.len(),
            bytes
        );
        Ok(instance)
    }

    fn create_all(
        instance: &mut ResourceTableInstance,
        device: &dyn GpuDevice,
        packed: &BTreeMap<u32, Vec<u8>>,
    ) -> SimResult<()> {
        let table = instance.table.clone();
        for entry in table.entries() {
            let label = format!("{}::{}", table.label(), entry.name);
            let bytes = packed.get(&entry.slot).cloned().unwrap_or_default();

            match &entry.descriptor {
                ResourceDescriptor::StorageTexture { texture: desc, .. }
                | ResourceDescriptor::SampledTexture(desc) => {
                    let mut usage = wgpu::TextureUsages::TEXTURE_BINDING
                        | wgpu::TextureUsages::COPY_SRC
                        | wgpu::TextureUsages::COPY_DST;
                    if matches!(entry.descriptor, ResourceDescriptor::StorageTexture { .. }) {
                        usage |= wgpu::TextureUsages::STORAGE_BINDING;
                    }
                    let handle = device.create_texture(&TextureSpec {
                        label,
                        width: desc.width,
                        height: desc.height,
                        layers: desc.layers,
                        format: desc.format,
                        array: desc.is_array(),
                        usage,
                    })?;
                    let allocated = AllocatedTexture {
                        handle,
                        desc: desc.clone(),
                    };
                    instance.textures.insert(entry.slot, allocated.clone());
                    upload_texture(device, &allocated, &bytes)?;
                }
                ResourceDescriptor::UniformBuffer(size) => {
                    let handle = device.create_buffer(&BufferSpec {
                        label,
                        size: size.byte_size(),
                        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                    })?;
                    instance.buffers.insert(
                        entry.slot,
                        AllocatedBuffer {
                            handle,
                            size: size.byte_size(),
                            mirror: Some(bytes.clone()),
                        },
                    );
                    device.write_buffer(handle, 0, &pad4(bytes))?;
                }
                ResourceDescriptor::StorageBuffer { size, .. } => {
                    let handle = device.create_buffer(&BufferSpec {
                        label,
                        size: size.byte_size(),
                        usage: wgpu::BufferUsages::STORAGE
                            | wgpu::BufferUsages::COPY_SRC
                            | wgpu::BufferUsages::COPY_DST,
                    })?;
                    instance.buffers.insert(
                        entry.slot,
                        AllocatedBuffer {
                            handle,
                            size: size.byte_size(),
                            mirror: None,
                        },
                    );
                    device.write_buffer(handle, 0, &pad4(bytes))?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::device::software::SoftwareDevice;
    use crate::gpu::layout::{ScalarKind, WgslType};
    use crate::gpu::layout::StructLayout;
    use crate::gpu::resources::descriptor::TextureDesc;
    use crate::gpu::resources::initial_data::TextureContent;
    use crate::gpu::resources::pixel_format::PixelFormat;

    crate::gpu_struct! {
        struct Params {
            phase: u32,
            scale: f32,
        }
    }

    fn table() -> ResourceTable {
        let params = StructLayout::compute(&[
            ("phase", WgslType::scalar(ScalarKind::U32)),
            ("scale", WgslType::scalar(ScalarKind::F32)),
        ])
        .expect("layout");
        ResourceTable::new("test")
            .with(
                0,
                "grid",
                ResourceDescriptor::storage_texture(
                    TextureDesc::new(3, 2, PixelFormat::R32_FLOAT),
                    StorageAccess::ReadWrite,
                ),
            )
            .and_then(|t| {
                t.with(
                    1,
                    "layers",
                    ResourceDescriptor::sampled_texture(
                        TextureDesc::new(2, 2, PixelFormat::RG32_FLOAT).with_layers(3),
                    ),
                )
            })
            .and_then(|t| t.with(2, "params", ResourceDescriptor::uniform("Params", params)))
            .expect("table")
    }

    #[test]
    fn test_zero_fill_and_array_layers() {
        let device = SoftwareDevice::new();
        let instance =
            ResourceAllocator::allocate(&table(), &device, &InitialContent::new()).expect("allocate");

        let grid = instance.read_texels(&device, 0, 0).expect("read");
        assert_eq!(grid, vec![vec![vec![0.0]; 3]; 2]);

        let layers = instance.texture(1).expect("texture");
        assert!(layers.desc.is_array());
        assert_eq!(
            instance.read_texture(&device, 1, 2).expect("layer 2").len(),
            2 * 2 * 8
        );
        assert_eq!(instance.uniform_mirror(2).expect("mirror"), &[0u8; 8]);
    }

    #[test]
    fn test_initial_content_uploaded() {
        let device = SoftwareDevice::new();
        let content = InitialContent::new().texture(
            0,
            TextureContent::scalar_grid(vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]]),
        );
        let instance = ResourceAllocator::allocate(&table(), &device, &content).expect("allocate");
        let grid = instance.read_texels(&device, 0, 0).expect("read");
        assert_eq!(grid[1][2], vec![6.0]);
    }

    #[test]
    fn test_bad_content_allocates_nothing() {
        let device = SoftwareDevice::new();
        let content = InitialContent::new().texture(0, TextureContent::scalar_grid(vec![vec![1.0]]));
        let err = ResourceAllocator::allocate(&table(), &device, &content).unwrap_err();
        assert!(matches!(err, SimError::InitialDataShape { .. }));
        assert_eq!(device.live_resources(), (0, 0));

        let content = InitialContent::new().texture(9, TextureContent::Zeroed);
        assert!(matches!(
            ResourceAllocator::allocate(&table(), &device, &content),
            Err(SimError::UnknownSlot { slot: 9, .. })
        ));
    }

    #[test]
    fn test_uniform_fields() {
        let device = SoftwareDevice::new();
        let mut instance =
            ResourceAllocator::allocate(&table(), &device, &InitialContent::new()).expect("allocate");

        instance.set_field(2, Params::phase, 1).expect("phase");
        instance.set_uniform_field(2, "scale", 0.5f32).expect("scale");
        assert!(instance.set_uniform_field(2, "scale", 1u32).is_err());
        instance.flush_uniform(&device, 2).expect("flush");

        let handle = instance.buffer(2).expect("buffer").handle;
        let bytes = device.read_buffer(handle).expect("read");
        assert_eq!(&bytes[0..4], &1u32.to_le_bytes());
        assert_eq!(&bytes[4..8], &0.5f32.to_le_bytes());

        instance
            .write_uniform(&device, 2, &Params { phase: 3, scale: 2.0 })
            .expect("write");
        let back: Params = instance.read_uniform(2).expect("read");
        assert_eq!(back.phase, 3);
    }

    #[test]
    fn test_reset_and_teardown() {
        let device = SoftwareDevice::new();
        let content = InitialContent::new().texture(
            0,
            TextureContent::scalar_grid(vec![vec![1.0, 1.0, 1.0], vec![1.0, 1.0, 1.0]]),
        );
        let mut instance = ResourceAllocator::allocate(&table(), &device, &content).expect("allocate");
        instance
            .write_texture(&device, 0, &TextureContent::Zeroed)
            .expect("clear");
        instance.reset(&device, &content).expect("reset");
        assert_eq!(instance.read_texels(&device, 0, 0).expect("read")[0][0], vec![1.0]);

        assert_eq!(device.live_resources(), (2, 1));
        instance.teardown(&device);
        assert_eq!(device.live_resources(), (0, 0));
    }
}
