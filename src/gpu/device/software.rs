//! Deterministic CPU device
//!
//! Implements [`GpuDevice`] with plain byte vectors. Programs are accepted as
//! text and reflected; dispatches run the [`CpuKernel`] registered for the
//! pipeline's entry point. Invocations execute sequentially in workgroup
//! order, so single-buffer algorithms that race on hardware behave
//! reproducibly here.

use crate::error::{device_operation_error, SimError, SimResult};
use crate::gpu::device::kernel::{CpuKernel, Invocation};
use crate::gpu::device::{
    BindGroupHandle, BindingEntry, BindingKind, BoundResource, BufferHandle, BufferSpec,
    Command, CommandBatch, GpuDevice, LayoutEntry, LayoutHandle, PipelineHandle, ProgramHandle,
    TextureHandle, TextureRegion, TextureSpec,
};
use crate::gpu::resources::pixel_format::PixelFormat;
use crate::gpu::shader::reflect::ProgramReflection;
use crate::gpu::shader::{Diagnostics, ProgramSource, ShaderValidator};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;

pub(crate) struct SoftTexture {
    pub(crate) spec: TextureSpec,
    pub(crate) data: Vec<u8>,
}

impl SoftTexture {
    fn layer_bytes(&self) -> usize {
        (self.spec.width * self.spec.format.bytes_per_texel()) as usize * self.spec.height as usize
    }

    /// Byte offset of a texel, or `None` outside the texture
    pub(crate) fn texel_offset(&self, x: i32, y: i32, layer: u32) -> Option<usize> {
        if x < 0 || y < 0 || x as u32 >= self.spec.width || y as u32 >= self.spec.height {
            return None;
        }
        if layer >= self.spec.layers {
            return None;
        }
        let texel = self.spec.format.bytes_per_texel() as usize;
        let row = self.spec.width as usize * texel;
        Some(layer as usize * self.layer_bytes() + y as usize * row + x as usize * texel)
    }
}

pub(crate) struct SoftBuffer {
    pub(crate) data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SoftResource {
    Texture(TextureHandle),
    Buffer(BufferHandle),
}

struct SoftBindGroup {
    layout: LayoutHandle,
    entries: Vec<(LayoutEntry, SoftResource)>,
}

struct SoftProgram {
    label: String,
    reflection: ProgramReflection,
}

struct SoftPipeline {
    label: String,
    kernel: CpuKernel,
    layouts: Vec<LayoutHandle>,
}

/// Every object the software device owns
#[derive(Default)]
pub(crate) struct SoftwareState {
    textures: Vec<Option<SoftTexture>>,
    buffers: Vec<Option<SoftBuffer>>,
    programs: Vec<SoftProgram>,
    layouts: Vec<Vec<LayoutEntry>>,
    groups: Vec<SoftBindGroup>,
    pipelines: Vec<SoftPipeline>,
}

impl SoftwareState {
    pub(crate) fn texture(&self, handle: TextureHandle) -> SimResult<&SoftTexture> {
        self.textures
            .get(handle.index())
            .and_then(Option::as_ref)
            .ok_or(SimError::StaleHandle {
                kind: TextureHandle::KIND,
                id: handle.0,
            })
    }

    pub(crate) fn texture_mut(&mut self, handle: TextureHandle) -> SimResult<&mut SoftTexture> {
        self.textures
            .get_mut(handle.index())
            .and_then(Option::as_mut)
            .ok_or(SimError::StaleHandle {
                kind: TextureHandle::KIND,
                id: handle.0,
            })
    }

    pub(crate) fn buffer(&self, handle: BufferHandle) -> SimResult<&SoftBuffer> {
        self.buffers
            .get(handle.index())
            .and_then(Option::as_ref)
            .ok_or(SimError::StaleHandle {
                kind: BufferHandle::KIND,
                id: handle.0,
            })
    }

    pub(crate) fn buffer_mut(&mut self, handle: BufferHandle) -> SimResult<&mut SoftBuffer> {
        self.buffers
            .get_mut(handle.index())
            .and_then(Option::as_mut)
            .ok_or(SimError::StaleHandle {
                kind: BufferHandle::KIND,
                id: handle.0,
            })
    }

    /// Kind and resource bound at `binding` of a bind group
    pub(crate) fn bound(&self, group: BindGroupHandle, binding: u32) -> Option<(BindingKind, SoftResource)> {
        self.groups
            .get(group.index())?
            .entries
            .iter()
            .find(|(entry, _)| entry.binding == binding)
            .map(|(entry, resource)| (entry.kind, *resource))
    }

    fn copy_texture(
        &mut self,
        source: TextureHandle,
        destination: TextureHandle,
        width: u32,
        height: u32,
        layers: u32,
    ) -> SimResult<()> {
        let src = self.texture(source)?;
        let dst_spec = self.texture(destination)?.spec.clone();
        if src.spec.format != dst_spec.format {
            return Err(device_operation_error(
                "copy_texture",
                format!("format {} vs {}", src.spec.format, dst_spec.format),
            ));
        }
        if width > src.spec.width.min(dst_spec.width)
            || height > src.spec.height.min(dst_spec.height)
            || layers > src.spec.layers.min(dst_spec.layers)
        {
            return Err(device_operation_error("copy_texture", "copy extent exceeds texture"));
        }

        let texel = src.spec.format.bytes_per_texel() as usize;
        let mut rows = Vec::with_capacity((height * layers) as usize);
        for layer in 0..layers {
            for y in 0..height {
                let start = src.texel_offset(0, y as i32, layer).unwrap_or(0);
                rows.push((layer, y, src.data[start..start + width as usize * texel].to_vec()));
            }
        }

        let dst = self.texture_mut(destination)?;
        for (layer, y, row) in rows {
            if let Some(start) = dst.texel_offset(0, y as i32, layer) {
                dst.data[start..start + row.len()].copy_from_slice(&row);
            }
        }
        Ok(())
    }

    fn copy_buffer(&mut self, source: BufferHandle, destination: BufferHandle, size: u64) -> SimResult<()> {
        let bytes = self
            .buffer(source)?
            .data
            .get(..size as usize)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| device_operation_error("copy_buffer", "size exceeds source"))?;
        let dst = self.buffer_mut(destination)?;
        let slot = dst
            .data
            .get_mut(..size as usize)
            .ok_or_else(|| device_operation_error("copy_buffer", "size exceeds destination"))?;
        slot.copy_from_slice(&bytes);
        Ok(())
    }

    fn dispatch(
        &mut self,
        label: &str,
        pipeline: PipelineHandle,
        bind_groups: &[(u32, BindGroupHandle)],
        workgroups: [u32; 3],
    ) -> SimResult<()> {
        let (kernel, layouts) = {
            let pipe = self.pipelines.get(pipeline.index()).ok_or(SimError::StaleHandle {
                kind: PipelineHandle::KIND,
                id: pipeline.0,
            })?;
            (pipe.kernel.clone(), pipe.layouts.clone())
        };

        for (index, handle) in bind_groups {
            let group = self.groups.get(handle.index()).ok_or(SimError::StaleHandle {
                kind: BindGroupHandle::KIND,
                id: handle.0,
            })?;
            if layouts.get(*index as usize) != Some(&group.layout) {
                return Err(device_operation_error(
                    label,
                    format!("bind group {} does not match pipeline layout", index),
                ));
            }
        }

        let size = kernel.workgroup_size();
        for wz in 0..workgroups[2] {
            for wy in 0..workgroups[1] {
                for wx in 0..workgroups[0] {
                    for lz in 0..size[2] {
                        for ly in 0..size[1] {
                            for lx in 0..size[0] {
                                let mut invocation = Invocation {
                                    global_id: [
                                        wx * size[0] + lx,
                                        wy * size[1] + ly,
                                        wz * size[2] + lz,
                                    ],
                                    local_id: [lx, ly, lz],
                                    workgroup_id: [wx, wy, wz],
                                    num_workgroups: workgroups,
                                    state: &mut *self,
                                    groups: bind_groups,
                                };
                                kernel.run(&mut invocation)?;
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// CPU implementation of [`GpuDevice`]
pub struct SoftwareDevice {
    state: Mutex<SoftwareState>,
    kernels: RwLock<HashMap<String, CpuKernel>>,
    validator: Option<Mutex<ShaderValidator>>,
}

impl Default for SoftwareDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftwareDevice {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SoftwareState::default()),
            kernels: RwLock::new(HashMap::new()),
            validator: None,
        }
    }

    /// Also run programs through the WGSL validator at compile time
    pub fn with_validation(mut self) -> Self {
        self.validator = Some(Mutex::new(ShaderValidator::new()));
        self
    }

    /// Register the kernel executed for `entry_point`
    pub fn register_kernel(&self, entry_point: impl Into<String>, kernel: CpuKernel) {
        let entry_point = entry_point.into();
        log::debug!("[SoftwareDevice] Registered kernel '{}'", entry_point);
        self.kernels.write().insert(entry_point, kernel);
    }

    pub fn register_kernels(&self, kernels: impl IntoIterator<Item = (&'static str, CpuKernel)>) {
        for (entry_point, kernel) in kernels {
            self.register_kernel(entry_point, kernel);
        }
    }

    pub fn has_kernel(&self, entry_point: &str) -> bool {
        self.kernels.read().contains_key(entry_point)
    }

    /// Number of live textures and buffers
    pub fn live_resources(&self) -> (usize, usize) {
        let state = self.state.lock();
        (
            state.textures.iter().filter(|t| t.is_some()).count(),
            state.buffers.iter().filter(|b| b.is_some()).count(),
        )
    }
}

impl GpuDevice for SoftwareDevice {
    fn backend_name(&self) -> &'static str {
        "software"
    }

    fn supports_read_write_storage(&self, _format: PixelFormat) -> bool {
        true
    }

    fn create_texture(&self, spec: &TextureSpec) -> SimResult<TextureHandle> {
        let bytes = spec.width as usize
            * spec.height as usize
            * spec.layers as usize
            * spec.format.bytes_per_texel() as usize;
        if bytes == 0 {
            return Err(SimError::ZeroSized {
                name: spec.label.clone(),
            });
        }
        let mut state = self.state.lock();
        state.textures.push(Some(SoftTexture {
            spec: spec.clone(),
            data: vec![0u8; bytes],
        }));
        Ok(TextureHandle((state.textures.len() - 1) as u32))
    }

    fn create_buffer(&self, spec: &BufferSpec) -> SimResult<BufferHandle> {
        if spec.size == 0 {
            return Err(SimError::ZeroSized {
                name: spec.label.clone(),
            });
        }
        // Rounded up like the wgpu backend; uploads arrive in 4-byte units
        let size = spec.size.max(4).next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT);
        let mut state = self.state.lock();
        state.buffers.push(Some(SoftBuffer {
            data: vec![0u8; size as usize],
        }));
        Ok(BufferHandle((state.buffers.len() - 1) as u32))
    }

    fn write_buffer(&self, buffer: BufferHandle, offset: u64, bytes: &[u8]) -> SimResult<()> {
        let mut state = self.state.lock();
        let target = state.buffer_mut(buffer)?;
        let start = offset as usize;
        let slot = target
            .data
            .get_mut(start..start + bytes.len())
            .ok_or_else(|| device_operation_error("write_buffer", "write past end of buffer"))?;
        slot.copy_from_slice(bytes);
        Ok(())
    }

    fn write_texture(&self, texture: TextureHandle, bytes: &[u8], region: TextureRegion) -> SimResult<()> {
        let mut state = self.state.lock();
        let target = state.texture_mut(texture)?;
        let row_bytes = (region.width * target.spec.format.bytes_per_texel()) as usize;
        if region.bytes_per_row as usize != row_bytes {
            return Err(device_operation_error("write_texture", "row pitch mismatch"));
        }
        if bytes.len() != row_bytes * region.height as usize * region.layers as usize {
            return Err(device_operation_error("write_texture", "data size mismatch"));
        }

        let mut rows = bytes.chunks_exact(row_bytes);
        for layer in region.layer..region.layer + region.layers {
            for y in 0..region.height {
                let row = rows.next().unwrap_or(&[]);
                let start = target
                    .texel_offset(0, y as i32, layer)
                    .ok_or_else(|| device_operation_error("write_texture", "region outside texture"))?;
                target.data[start..start + row.len()].copy_from_slice(row);
            }
        }
        Ok(())
    }

    fn compile_program(&self, source: &ProgramSource, diagnostics: &mut Diagnostics) -> SimResult<ProgramHandle> {
        if let Some(validator) = &self.validator {
            validator
                .lock()
                .validate_wgsl(&source.label, &source.code, diagnostics)?;
        }
        let mut state = self.state.lock();
        state.programs.push(SoftProgram {
            label: source.label.clone(),
            reflection: ProgramReflection::from_wgsl(&source.code),
        });
        Ok(ProgramHandle((state.programs.len() - 1) as u32))
    }

    fn create_binding_layout(&self, _label: &str, entries: &[LayoutEntry]) -> SimResult<LayoutHandle> {
        let mut state = self.state.lock();
        state.layouts.push(entries.to_vec());
        Ok(LayoutHandle((state.layouts.len() - 1) as u32))
    }

    fn create_binding(
        &self,
        label: &str,
        layout: LayoutHandle,
        entries: &[BindingEntry],
    ) -> SimResult<BindGroupHandle> {
        let mut state = self.state.lock();
        let layout_entries = state
            .layouts
            .get(layout.index())
            .cloned()
            .ok_or(SimError::StaleHandle {
                kind: LayoutHandle::KIND,
                id: layout.0,
            })?;

        let mut resolved = Vec::with_capacity(entries.len());
        for layout_entry in layout_entries {
            let entry = entries
                .iter()
                .find(|e| e.binding == layout_entry.binding)
                .ok_or_else(|| {
                    device_operation_error(label, format!("binding {} not provided", layout_entry.binding))
                })?;
            let resource = match (entry.resource, layout_entry.kind.is_texture()) {
                (BoundResource::Texture(handle), true) => {
                    state.texture(handle)?;
                    SoftResource::Texture(handle)
                }
                (BoundResource::Buffer(handle), false) => {
                    state.buffer(handle)?;
                    SoftResource::Buffer(handle)
                }
                _ => {
                    return Err(device_operation_error(
                        label,
                        format!("binding {} has the wrong resource kind", entry.binding),
                    ))
                }
            };
            resolved.push((layout_entry, resource));
        }

        state.groups.push(SoftBindGroup {
            layout,
            entries: resolved,
        });
        Ok(BindGroupHandle((state.groups.len() - 1) as u32))
    }

    fn create_pipeline(
        &self,
        label: &str,
        layouts: &[LayoutHandle],
        program: ProgramHandle,
        entry_point: &str,
    ) -> SimResult<PipelineHandle> {
        let mut state = self.state.lock();
        let program = state.programs.get(program.index()).ok_or(SimError::StaleHandle {
            kind: ProgramHandle::KIND,
            id: program.0,
        })?;
        let declared = program.reflection.entry_point(entry_point).is_some();
        let kernel = self.kernels.read().get(entry_point).cloned();
        let kernel = match kernel {
            Some(kernel) if declared || program.reflection.entry_points.is_empty() => kernel,
            _ => {
                return Err(SimError::MissingEntryPoint {
                    program: program.label.clone(),
                    entry_point: entry_point.to_string(),
                })
            }
        };

        state.pipelines.push(SoftPipeline {
            label: label.to_string(),
            kernel,
            layouts: layouts.to_vec(),
        });
        Ok(PipelineHandle((state.pipelines.len() - 1) as u32))
    }

    fn submit(&self, batch: &CommandBatch) -> SimResult<()> {
        let mut state = self.state.lock();
        for command in &batch.commands {
            match command {
                Command::Dispatch {
                    label,
                    pipeline,
                    bind_groups,
                    workgroups,
                } => {
                    log::trace!(
                        "[SoftwareDevice] {} ({}) {:?}",
                        label,
                        state
                            .pipelines
                            .get(pipeline.index())
                            .map(|p| p.label.as_str())
                            .unwrap_or("?"),
                        workgroups
                    );
                    state.dispatch(label, *pipeline, bind_groups, *workgroups)?;
                }
                Command::CopyTexture {
                    source,
                    destination,
                    width,
                    height,
                    layers,
                    ..
                } => state.copy_texture(*source, *destination, *width, *height, *layers)?,
                Command::CopyBuffer {
                    source,
                    destination,
                    size,
                    ..
                } => state.copy_buffer(*source, *destination, *size)?,
            }
        }
        Ok(())
    }

    fn read_buffer(&self, buffer: BufferHandle) -> SimResult<Vec<u8>> {
        Ok(self.state.lock().buffer(buffer)?.data.clone())
    }

    fn read_texture(&self, texture: TextureHandle, layer: u32) -> SimResult<Vec<u8>> {
        let state = self.state.lock();
        let texture = state.texture(texture)?;
        if layer >= texture.spec.layers {
            return Err(device_operation_error("read_texture", format!("no layer {}", layer)));
        }
        let size = texture.layer_bytes();
        let start = layer as usize * size;
        Ok(texture.data[start..start + size].to_vec())
    }

    fn destroy_texture(&self, texture: TextureHandle) {
        if let Some(slot) = self.state.lock().textures.get_mut(texture.index()) {
            *slot = None;
        }
    }

    fn destroy_buffer(&self, buffer: BufferHandle) {
        if let Some(slot) = self.state.lock().buffers.get_mut(buffer.index()) {
            *slot = None;
        }
    }
}
