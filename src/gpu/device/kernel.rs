//! CPU kernels for the software device
//!
//! A kernel is the host-side twin of one compute entry point. The software
//! device runs its body once per invocation, in workgroup order, with an
//! [`Invocation`] giving access to the resources bound for the dispatch.
//! Reads outside a resource return zero and writes outside it are dropped,
//! matching the robust-access behaviour of GPU backends.

use crate::error::{SimError, SimResult};
use crate::gpu::device::software::{SoftwareState, SoftResource};
use crate::gpu::device::{BindGroupHandle, BindingKind};
use crate::gpu::layout::{FieldAccessor, GpuStruct, HostValue, StructLayout};
use std::fmt;
use std::sync::Arc;

type KernelBody = dyn Fn(&mut Invocation<'_>) -> SimResult<()> + Send + Sync;

/// Host implementation of a compute entry point
#[derive(Clone)]
pub struct CpuKernel {
    workgroup_size: [u32; 3],
    body: Arc<KernelBody>,
}

impl CpuKernel {
    pub fn new<F>(workgroup_size: [u32; 3], body: F) -> Self
    where
        F: Fn(&mut Invocation<'_>) -> SimResult<()> + Send + Sync + 'static,
    {
        Self {
            workgroup_size,
            body: Arc::new(body),
        }
    }

    pub fn workgroup_size(&self) -> [u32; 3] {
        self.workgroup_size
    }

    pub(crate) fn run(&self, invocation: &mut Invocation<'_>) -> SimResult<()> {
        (self.body)(invocation)
    }
}

impl fmt::Debug for CpuKernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CpuKernel")
            .field("workgroup_size", &self.workgroup_size)
            .finish_non_exhaustive()
    }
}

/// One kernel invocation
pub struct Invocation<'a> {
    pub global_id: [u32; 3],
    pub local_id: [u32; 3],
    pub workgroup_id: [u32; 3],
    pub num_workgroups: [u32; 3],
    pub(crate) state: &'a mut SoftwareState,
    pub(crate) groups: &'a [(u32, BindGroupHandle)],
}

impl<'a> Invocation<'a> {
    fn resolve(&self, group: u32, binding: u32) -> SimResult<(BindingKind, SoftResource)> {
        let handle = self
            .groups
            .iter()
            .find(|(index, _)| *index == group)
            .map(|(_, handle)| *handle)
            .ok_or_else(|| unbound(group, binding))?;
        self.state.bound(handle, binding).ok_or_else(|| unbound(group, binding))
    }

    /// (width, height) of a bound texture
    pub fn texture_size(&self, group: u32, binding: u32) -> SimResult<[u32; 2]> {
        match self.resolve(group, binding)? {
            (_, SoftResource::Texture(handle)) => {
                let texture = self.state.texture(handle)?;
                Ok([texture.spec.width, texture.spec.height])
            }
            _ => Err(wrong_kind(group, binding, "texture")),
        }
    }

    /// Load a texel from layer 0; missing channels read as (0, 0, 0, 1)
    pub fn load(&self, group: u32, binding: u32, x: i32, y: i32) -> SimResult<[f32; 4]> {
        self.load_layer(group, binding, x, y, 0)
    }

    pub fn load_layer(
        &self,
        group: u32,
        binding: u32,
        x: i32,
        y: i32,
        layer: u32,
    ) -> SimResult<[f32; 4]> {
        let (kind, resource) = self.resolve(group, binding)?;
        let SoftResource::Texture(handle) = resource else {
            return Err(wrong_kind(group, binding, "texture"));
        };
        if !kind.can_read() {
            return Err(access_error(group, binding, "read from a write-only texture"));
        }
        let texture = self.state.texture(handle)?;
        let mut out = [0.0, 0.0, 0.0, 1.0];
        if let Some(offset) = texture.texel_offset(x, y, layer) {
            let format = texture.spec.format;
            let texel = &texture.data[offset..offset + format.bytes_per_texel() as usize];
            for (i, value) in format.decode_texel(texel).into_iter().enumerate() {
                out[i] = value as f32;
            }
        }
        Ok(out)
    }

    /// Store a texel to layer 0
    pub fn store(&mut self, group: u32, binding: u32, x: i32, y: i32, value: [f32; 4]) -> SimResult<()> {
        self.store_layer(group, binding, x, y, 0, value)
    }

    pub fn store_layer(
        &mut self,
        group: u32,
        binding: u32,
        x: i32,
        y: i32,
        layer: u32,
        value: [f32; 4],
    ) -> SimResult<()> {
        let (kind, resource) = self.resolve(group, binding)?;
        let SoftResource::Texture(handle) = resource else {
            return Err(wrong_kind(group, binding, "texture"));
        };
        if !kind.can_write() {
            return Err(access_error(group, binding, "write to a read-only texture"));
        }
        let texture = self.state.texture_mut(handle)?;
        if let Some(offset) = texture.texel_offset(x, y, layer) {
            let format = texture.spec.format;
            let channels: Vec<f64> = value.iter().map(|v| *v as f64).collect();
            let end = offset + format.bytes_per_texel() as usize;
            format.encode_texel(&channels, &mut texture.data[offset..end]);
        }
        Ok(())
    }

    fn buffer_bytes(&self, group: u32, binding: u32) -> SimResult<&[u8]> {
        let (_, resource) = self.resolve(group, binding)?;
        let SoftResource::Buffer(handle) = resource else {
            return Err(wrong_kind(group, binding, "buffer"));
        };
        Ok(&self.state.buffer(handle)?.data)
    }

    fn buffer_bytes_mut(&mut self, group: u32, binding: u32) -> SimResult<&mut Vec<u8>> {
        let (kind, resource) = self.resolve(group, binding)?;
        let SoftResource::Buffer(handle) = resource else {
            return Err(wrong_kind(group, binding, "buffer"));
        };
        if !kind.can_write() {
            return Err(access_error(group, binding, "write to a read-only buffer"));
        }
        Ok(&mut self.state.buffer_mut(handle)?.data)
    }

    /// Size of a bound buffer in bytes
    pub fn buffer_len(&self, group: u32, binding: u32) -> SimResult<u64> {
        Ok(self.buffer_bytes(group, binding)?.len() as u64)
    }

    /// Number of whole records of `layout` in a bound buffer
    pub fn record_count(&self, group: u32, binding: u32, layout: &StructLayout) -> SimResult<u32> {
        let stride = layout.stride().max(1);
        Ok((self.buffer_len(group, binding)? / stride) as u32)
    }

    pub fn read_u32(&self, group: u32, binding: u32, index: u32) -> SimResult<u32> {
        let bytes = self.buffer_bytes(group, binding)?;
        let start = index as usize * 4;
        Ok(bytes
            .get(start..start + 4)
            .map(u32::read_bytes)
            .unwrap_or(0))
    }

    pub fn write_u32(&mut self, group: u32, binding: u32, index: u32, value: u32) -> SimResult<()> {
        let bytes = self.buffer_bytes_mut(group, binding)?;
        let start = index as usize * 4;
        if let Some(slot) = bytes.get_mut(start..start + 4) {
            value.write_bytes(slot);
        }
        Ok(())
    }

    /// Read record `index` of a record buffer, or the single struct of a uniform
    pub fn read_record<T: GpuStruct>(
        &self,
        group: u32,
        binding: u32,
        layout: &StructLayout,
        index: u32,
    ) -> SimResult<T> {
        let bytes = self.buffer_bytes(group, binding)?;
        let start = index as usize * layout.stride() as usize;
        let end = start + layout.size() as usize;
        Ok(match bytes.get(start..end) {
            Some(record) => T::decode_from(layout, record),
            None => T::decode_from(layout, &[]),
        })
    }

    pub fn write_record<T: GpuStruct>(
        &mut self,
        group: u32,
        binding: u32,
        layout: &StructLayout,
        index: u32,
        record: &T,
    ) -> SimResult<()> {
        let bytes = self.buffer_bytes_mut(group, binding)?;
        let start = index as usize * layout.stride() as usize;
        let end = start + layout.size() as usize;
        if let Some(slot) = bytes.get_mut(start..end) {
            record.encode_into(layout, slot);
        }
        Ok(())
    }

    /// Read a single field of record `index`
    pub fn read_field<S: GpuStruct, V: HostValue>(
        &self,
        group: u32,
        binding: u32,
        layout: &StructLayout,
        index: u32,
        field: FieldAccessor<S, V>,
    ) -> SimResult<V> {
        let bytes = self.buffer_bytes(group, binding)?;
        let start = index as usize * layout.stride() as usize;
        let end = start + layout.size() as usize;
        match bytes.get(start..end) {
            Some(record) => field.read(layout, record),
            None => Ok(V::zeroed()),
        }
    }

    /// Write a single field of record `index`, leaving the rest untouched
    pub fn write_field<S: GpuStruct, V: HostValue>(
        &mut self,
        group: u32,
        binding: u32,
        layout: &StructLayout,
        index: u32,
        field: FieldAccessor<S, V>,
        value: V,
    ) -> SimResult<()> {
        let bytes = self.buffer_bytes_mut(group, binding)?;
        let start = index as usize * layout.stride() as usize;
        let end = start + layout.size() as usize;
        match bytes.get_mut(start..end) {
            Some(record) => field.write(layout, record, value),
            None => Ok(()),
        }
    }
}

fn unbound(group: u32, binding: u32) -> SimError {
    SimError::UndeclaredBinding {
        program: "<cpu kernel>".to_string(),
        group,
        binding,
    }
}

fn wrong_kind(group: u32, binding: u32, expected: &str) -> SimError {
    SimError::DeviceOperation {
        operation: format!("kernel access @group({}) @binding({})", group, binding),
        error: format!("binding is not a {}", expected),
    }
}

fn access_error(group: u32, binding: u32, what: &str) -> SimError {
    SimError::DeviceOperation {
        operation: format!("kernel access @group({}) @binding({})", group, binding),
        error: what.to_string(),
    }
}
