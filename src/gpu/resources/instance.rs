//! Allocated resource tables
//!
//! A [`ResourceTableInstance`] owns one device object per declared slot.
//! Uniform buffers keep a host mirror: field writes are staged there and
//! pushed to the device with [`ResourceTableInstance::flush_uniform`].

use crate::error::{shape_error, SimError, SimResult};
use crate::gpu::device::{BoundResource, BufferHandle, GpuDevice, TextureHandle, TextureRegion};
use crate::gpu::layout::{
    align_size, decode_records, encode_records, FieldAccessor, GpuStruct, HostValue, StructLayout,
    WgslType,
};
use crate::gpu::resources::descriptor::{ResourceDescriptor, TextureDesc};
use crate::gpu::resources::initial_data::{
    unpack_layer, BufferContent, InitialContent, RecordData, TexelRows, TextureContent,
};
use crate::gpu::resources::table::ResourceTable;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_INSTANCE_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_instance_id() -> u64 {
    NEXT_INSTANCE_ID.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug, Clone)]
pub struct AllocatedTexture {
    pub handle: TextureHandle,
    pub desc: TextureDesc,
}

#[derive(Debug, Clone)]
pub struct AllocatedBuffer {
    pub handle: BufferHandle,
    /// Declared size in bytes
    pub size: u64,
    /// Host copy of uniform contents
    pub mirror: Option<Vec<u8>>,
}

/// Device resources for every slot of a table
#[derive(Debug)]
pub struct ResourceTableInstance {
    pub(crate) id: u64,
    pub(crate) table: ResourceTable,
    pub(crate) textures: BTreeMap<u32, AllocatedTexture>,
    pub(crate) buffers: BTreeMap<u32, AllocatedBuffer>,
}

impl ResourceTableInstance {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn table(&self) -> &ResourceTable {
        &self.table
    }

    pub fn texture(&self, slot: u32) -> SimResult<&AllocatedTexture> {
        self.textures.get(&slot).ok_or_else(|| self.unknown(slot))
    }

    pub fn buffer(&self, slot: u32) -> SimResult<&AllocatedBuffer> {
        self.buffers.get(&slot).ok_or_else(|| self.unknown(slot))
    }

    /// Device resource behind `slot`
    pub fn bound_resource(&self, slot: u32) -> SimResult<BoundResource> {
        if let Some(texture) = self.textures.get(&slot) {
            return Ok(BoundResource::Texture(texture.handle));
        }
        self.buffer(slot).map(|b| BoundResource::Buffer(b.handle))
    }

    fn unknown(&self, slot: u32) -> SimError {
        SimError::UnknownSlot {
            table: self.table.label().to_string(),
            slot,
        }
    }

    fn uniform_layout(&self, slot: u32) -> SimResult<&StructLayout> {
        let entry = self.table.entry(slot)?;
        match &entry.descriptor {
            ResourceDescriptor::UniformBuffer(size) => size.layout().ok_or_else(|| {
                SimError::InvalidField {
                    field: entry.name.clone(),
                    reason: "uniform has no struct layout".to_string(),
                }
            }),
            other => Err(SimError::InvalidField {
                field: entry.name.clone(),
                reason: format!("slot {} is a {}, not a uniform buffer", slot, other.kind_name()),
            }),
        }
    }

    fn mirror_mut(&mut self, slot: u32) -> SimResult<&mut Vec<u8>> {
        let table = self.table.label().to_string();
        self.buffers
            .get_mut(&slot)
            .and_then(|b| b.mirror.as_mut())
            .ok_or(SimError::UnknownSlot { table, slot })
    }

    /// Current host copy of a uniform buffer
    pub fn uniform_mirror(&self, slot: u32) -> SimResult<&[u8]> {
        self.buffer(slot)?
            .mirror
            .as_deref()
            .ok_or_else(|| self.unknown(slot))
    }

    /// Replace a whole uniform struct and upload it
    pub fn write_uniform<T: GpuStruct>(&mut self, device: &dyn GpuDevice, slot: u32, value: &T) -> SimResult<()> {
        let layout = self.uniform_layout(slot)?.clone();
        if T::layout()? != layout {
            return Err(SimError::InvalidField {
                field: T::NAME.to_string(),
                reason: format!("layout differs from the uniform declared at slot {}", slot),
            });
        }
        let mirror = self.mirror_mut(slot)?;
        mirror.fill(0);
        value.encode_into(&layout, mirror);
        self.flush_uniform(device, slot)
    }

    /// Stage one typed field in the host mirror
    pub fn set_field<S: GpuStruct, V: HostValue>(
        &mut self,
        slot: u32,
        field: FieldAccessor<S, V>,
        value: V,
    ) -> SimResult<()> {
        let layout = self.uniform_layout(slot)?.clone();
        let mirror = self.mirror_mut(slot)?;
        field.write(&layout, mirror, value)
    }

    /// Stage one field by name; the value type must match the declared field type
    pub fn set_uniform_field<V: HostValue>(&mut self, slot: u32, name: &str, value: V) -> SimResult<()> {
        let layout = self.uniform_layout(slot)?.clone();
        let field = layout.field(name).ok_or_else(|| SimError::InvalidField {
            field: name.to_string(),
            reason: format!("not a field of the uniform at slot {}", slot),
        })?;
        if field.ty != V::wgsl_type() {
            return Err(SimError::InvalidField {
                field: name.to_string(),
                reason: format!("declared {} but written as {}", field.ty, V::wgsl_type()),
            });
        }
        let start = field.offset as usize;
        let end = start + field.size as usize;
        let mirror = self.mirror_mut(slot)?;
        value.write_bytes(&mut mirror[start..end]);
        Ok(())
    }

    /// Read a uniform back from the host mirror
    pub fn read_uniform<T: GpuStruct>(&self, slot: u32) -> SimResult<T> {
        let layout = self.uniform_layout(slot)?;
        Ok(T::decode_from(layout, self.uniform_mirror(slot)?))
    }

    /// Upload the host mirror of a uniform buffer
    pub fn flush_uniform(&self, device: &dyn GpuDevice, slot: u32) -> SimResult<()> {
        let buffer = self.buffer(slot)?;
        let mirror = buffer.mirror.as_deref().ok_or_else(|| self.unknown(slot))?;
        let mut padded = mirror.to_vec();
        padded.resize(align_size(mirror.len() as u64, 4) as usize, 0);
        device.write_buffer(buffer.handle, 0, &padded)
    }

    /// Buffer, byte offset and type of a uniform field
    pub fn field_location(&self, slot: u32, name: &str) -> SimResult<(BufferHandle, u64, WgslType)> {
        let layout = self.uniform_layout(slot)?;
        let field = layout.field(name).ok_or_else(|| SimError::InvalidField {
            field: name.to_string(),
            reason: format!("not a field of the uniform at slot {}", slot),
        })?;
        Ok((self.buffer(slot)?.handle, field.offset, field.ty.clone()))
    }

    /// Overwrite a storage buffer with typed records
    pub fn write_records<T: GpuStruct>(&self, device: &dyn GpuDevice, slot: u32, records: &[T]) -> SimResult<()> {
        let buffer = self.buffer(slot)?;
        let bytes = encode_records(records)?;
        if bytes.len() as u64 > buffer.size {
            return Err(shape_error(
                &self.table.entry(slot)?.name,
                format!("{} bytes of records exceed buffer size {}", bytes.len(), buffer.size),
            ));
        }
        device.write_buffer(buffer.handle, 0, &pad4(bytes))
    }

    pub fn read_buffer(&self, device: &dyn GpuDevice, slot: u32) -> SimResult<Vec<u8>> {
        let buffer = self.buffer(slot)?;
        let mut bytes = device.read_buffer(buffer.handle)?;
        bytes.truncate(buffer.size as usize);
        Ok(bytes)
    }

    pub fn read_records<T: GpuStruct>(&self, device: &dyn GpuDevice, slot: u32) -> SimResult<Vec<T>> {
        decode_records(&self.read_buffer(device, slot)?)
    }

    /// Read a record buffer back as per-field flat arrays
    pub fn read_record_data(&self, device: &dyn GpuDevice, slot: u32) -> SimResult<RecordData> {
        let entry = self.table.entry(slot)?;
        let layout = entry
            .descriptor
            .buffer_size()
            .and_then(|s| s.layout())
            .ok_or_else(|| shape_error(&entry.name, "buffer has no record layout"))?;
        Ok(RecordData::unpack(layout, &self.read_buffer(device, slot)?))
    }

    /// Raw bytes of one texture layer
    pub fn read_texture(&self, device: &dyn GpuDevice, slot: u32, layer: u32) -> SimResult<Vec<u8>> {
        device.read_texture(self.texture(slot)?.handle, layer)
    }

    /// One texture layer as `[row][column][channel]`
    pub fn read_texels(&self, device: &dyn GpuDevice, slot: u32, layer: u32) -> SimResult<TexelRows> {
        let texture = self.texture(slot)?;
        let bytes = device.read_texture(texture.handle, layer)?;
        Ok(unpack_layer(&texture.desc, &bytes))
    }

    /// Replace the contents of one texture
    pub fn write_texture(&self, device: &dyn GpuDevice, slot: u32, content: &TextureContent) -> SimResult<()> {
        let texture = self.texture(slot)?;
        let name = &self.table.entry(slot)?.name;
        let bytes = content.pack(name, &texture.desc)?;
        upload_texture(device, texture, &bytes)
    }

    /// Return every resource to its initial content without reallocating
    pub fn reset(&mut self, device: &dyn GpuDevice, content: &InitialContent) -> SimResult<()> {
        let packed = pack_content(&self.table, content)?;
        for (slot, bytes) in packed {
            if let Some(texture) = self.textures.get(&slot) {
                upload_texture(device, texture, &bytes)?;
            } else if let Some(buffer) = self.buffers.get_mut(&slot) {
                if let Some(mirror) = buffer.mirror.as_mut() {
                    mirror.copy_from_slice(&bytes);
                }
                device.write_buffer(buffer.handle, 0, &pad4(bytes))?;
            }
        }
        log::debug!("[ResourceTable] Reset '{}'", self.table.label());
        Ok(())
    }

    /// Destroy every device object; handles become stale
    pub fn teardown(self, device: &dyn GpuDevice) {
        for texture in self.textures.values() {
            device.destroy_texture(texture.handle);
        }
        for buffer in self.buffers.values() {
            device.destroy_buffer(buffer.handle);
        }
        log::debug!(
            "[ResourceTable] Released '{}' ({} textures, {} buffers)",
            self.table.label(),
            self.textures.len(),
            self.buffers.len()
        );
    }
}

pub(crate) fn pad4(mut bytes: Vec<u8>) -> Vec<u8> {
    bytes.resize(align_size(bytes.len() as u64, 4) as usize, 0);
    bytes
}

pub(crate) fn upload_texture(device: &dyn GpuDevice, texture: &AllocatedTexture, bytes: &[u8]) -> SimResult<()> {
    let desc = &texture.desc;
    device.write_texture(
        texture.handle,
        bytes,
        TextureRegion {
            layer: 0,
            layers: desc.layers,
            width: desc.width,
            height: desc.height,
            bytes_per_row: desc.row_bytes(),
        },
    )
}

/// Validate and pack initial content for every slot of `table`.
///
/// Slots without content are zero-filled. Content for undeclared slots, or of
/// the wrong kind, is rejected.
pub(crate) fn pack_content(table: &ResourceTable, content: &InitialContent) -> SimResult<BTreeMap<u32, Vec<u8>>> {
    for slot in content.slots() {
        table.entry(slot)?;
    }

    let mut packed = BTreeMap::new();
    for entry in table.entries() {
        let bytes = match (&entry.descriptor, entry.descriptor.texture(), entry.descriptor.buffer_size()) {
            (_, Some(desc), _) => {
                if content.buffer_for(entry.slot).is_some() {
                    return Err(shape_error(&entry.name, "buffer content given for a texture"));
                }
                match content.texture_for(entry.slot) {
                    Some(texture) => texture.pack(&entry.name, desc)?,
                    None => TextureContent::Zeroed.pack(&entry.name, desc)?,
                }
            }
            (_, None, Some(size)) => {
                if content.texture_for(entry.slot).is_some() {
                    return Err(shape_error(&entry.name, "texture content given for a buffer"));
                }
                match content.buffer_for(entry.slot) {
                    Some(buffer) => buffer.pack(&entry.name, size)?,
                    None => BufferContent::Zeroed.pack(&entry.name, size)?,
                }
            }
            (descriptor, None, None) => {
                return Err(shape_error(
                    &entry.name,
                    format!("cannot initialise a {}", descriptor.kind_name()),
                ))
            }
        };
        packed.insert(entry.slot, bytes);
    }
    Ok(packed)
}
