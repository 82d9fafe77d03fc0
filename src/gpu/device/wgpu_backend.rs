//! wgpu-backed device
//!
//! Objects live in a registry indexed by handle. Every submission records one
//! command encoder; each dispatch gets its own compute pass so passes observe
//! each other's writes in order.

use crate::error::{device_operation_error, SimError, SimResult};
use crate::gpu::device::{
    BindGroupHandle, BindingEntry, BoundResource, BufferHandle, BufferSpec, Command, CommandBatch,
    GpuDevice, LayoutEntry, LayoutHandle, PipelineHandle, ProgramHandle, TextureHandle,
    TextureRegion, TextureSpec,
};
use crate::gpu::resources::pixel_format::PixelFormat;
use crate::gpu::shader::{Diagnostics, ProgramSource, ShaderValidator};
use parking_lot::Mutex;
use std::borrow::Cow;
use std::sync::Arc;

/// How to pick and configure the adapter
#[derive(Debug, Clone)]
pub struct WgpuOptions {
    pub power_preference: wgpu::PowerPreference,
    pub force_fallback_adapter: bool,
    /// Run naga validation before handing programs to the driver
    pub validate_shaders: bool,
}

impl Default for WgpuOptions {
    fn default() -> Self {
        Self {
            power_preference: wgpu::PowerPreference::HighPerformance,
            force_fallback_adapter: false,
            validate_shaders: true,
        }
    }
}

struct GpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    spec: TextureSpec,
}

struct GpuBuffer {
    buffer: wgpu::Buffer,
    size: u64,
}

#[derive(Default)]
struct Registry {
    textures: Vec<Option<GpuTexture>>,
    buffers: Vec<Option<GpuBuffer>>,
    programs: Vec<(String, wgpu::ShaderModule)>,
    layouts: Vec<wgpu::BindGroupLayout>,
    groups: Vec<wgpu::BindGroup>,
    pipelines: Vec<wgpu::ComputePipeline>,
}

impl Registry {
    fn texture(&self, handle: TextureHandle) -> SimResult<&GpuTexture> {
        self.textures
            .get(handle.index())
            .and_then(Option::as_ref)
            .ok_or(SimError::StaleHandle {
                kind: TextureHandle::KIND,
                id: handle.0,
            })
    }

    fn buffer(&self, handle: BufferHandle) -> SimResult<&GpuBuffer> {
        self.buffers
            .get(handle.index())
            .and_then(Option::as_ref)
            .ok_or(SimError::StaleHandle {
                kind: BufferHandle::KIND,
                id: handle.0,
            })
    }
}

pub struct WgpuDevice {
    adapter: wgpu::Adapter,
    device: wgpu::Device,
    queue: wgpu::Queue,
    registry: Mutex<Registry>,
    validator: Option<Mutex<ShaderValidator>>,
    uncaptured: Arc<Mutex<Vec<wgpu::Error>>>,
}

impl WgpuDevice {
    /// Request an adapter and device, blocking the calling thread
    pub fn new(options: &WgpuOptions) -> SimResult<Self> {
        pollster::block_on(Self::request(options))
    }

    pub async fn request(options: &WgpuOptions) -> SimResult<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: options.power_preference,
                compatible_surface: None,
                force_fallback_adapter: options.force_fallback_adapter,
            })
            .await
            .ok_or_else(|| SimError::MissingFeature {
                name: "device".to_string(),
                feature: "compatible GPU adapter".to_string(),
            })?;

        let info = adapter.get_info();
        log::info!(
            "[WgpuDevice] Using adapter '{}' ({:?}, {:?})",
            info.name,
            info.device_type,
            info.backend
        );

        // Read-write storage textures need adapter-specific format features
        let mut required_features = wgpu::Features::empty();
        if adapter
            .features()
            .contains(wgpu::Features::TEXTURE_ADAPTER_SPECIFIC_FORMAT_FEATURES)
        {
            required_features |= wgpu::Features::TEXTURE_ADAPTER_SPECIFIC_FORMAT_FEATURES;
        }

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Simulation Device"),
                    required_features,
                    required_limits: adapter.limits(),
                },
                None,
            )
            .await
            .map_err(|e| device_operation_error("request_device", e))?;

        let uncaptured = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&uncaptured);
        device.on_uncaptured_error(Box::new(move |error| {
            log::error!("[GPU] Uncaptured device error: {}", error);
            sink.lock().push(error);
        }));

        Ok(Self {
            adapter,
            device,
            queue,
            registry: Mutex::new(Registry::default()),
            validator: options
                .validate_shaders
                .then(|| Mutex::new(ShaderValidator::new())),
            uncaptured,
        })
    }

    pub fn adapter_info(&self) -> wgpu::AdapterInfo {
        self.adapter.get_info()
    }

    fn scoped<T>(&self, operation: &str, create: impl FnOnce() -> T) -> SimResult<T> {
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = create();
        let validation = pollster::block_on(self.device.pop_error_scope());
        let memory = pollster::block_on(self.device.pop_error_scope());

        if memory.is_some() {
            return Err(SimError::OutOfMemory {
                operation: operation.to_string(),
            });
        }
        if let Some(error) = validation {
            return Err(device_operation_error(operation, error));
        }
        Ok(value)
    }

    /// Surface errors the driver reported outside any error scope
    fn take_uncaptured(&self, operation: &str) -> SimResult<()> {
        let mut errors = self.uncaptured.lock();
        let Some(error) = errors.drain(..).next() else {
            return Ok(());
        };
        Err(match error {
            wgpu::Error::OutOfMemory { .. } => SimError::OutOfMemory {
                operation: operation.to_string(),
            },
            other => device_operation_error(operation, other),
        })
    }

    fn map_read(&self, buffer: &wgpu::Buffer) -> SimResult<Vec<u8>> {
        let slice = buffer.slice(..);
        let (tx, rx) = futures::channel::oneshot::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        let _ = self.device.poll(wgpu::Maintain::Wait);

        match pollster::block_on(rx) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(device_operation_error("map_read", e)),
            Err(_) => return Err(SimError::DeviceLost("buffer mapping was cancelled".to_string())),
        }

        let data = slice.get_mapped_range().to_vec();
        buffer.unmap();
        Ok(data)
    }
}

impl GpuDevice for WgpuDevice {
    fn backend_name(&self) -> &'static str {
        "wgpu"
    }

    fn supports_read_write_storage(&self, format: PixelFormat) -> bool {
        match format.to_wgpu() {
            Some(format) => self
                .adapter
                .get_texture_format_features(format)
                .flags
                .contains(wgpu::TextureFormatFeatureFlags::STORAGE_READ_WRITE),
            None => false,
        }
    }

    fn create_texture(&self, spec: &TextureSpec) -> SimResult<TextureHandle> {
        let format = spec.format.resolve(&spec.label)?;
        let texture = self.scoped("create_texture", || {
            self.device.create_texture(&wgpu::TextureDescriptor {
                label: Some(&spec.label),
                size: wgpu::Extent3d {
                    width: spec.width,
                    height: spec.height,
                    depth_or_array_layers: spec.layers,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format,
                usage: spec.usage,
                view_formats: &[],
            })
        })?;
        let view = texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some(&spec.label),
            dimension: Some(if spec.array {
                wgpu::TextureViewDimension::D2Array
            } else {
                wgpu::TextureViewDimension::D2
            }),
            ..Default::default()
        });

        let mut registry = self.registry.lock();
        registry.textures.push(Some(GpuTexture {
            texture,
            view,
            spec: spec.clone(),
        }));
        Ok(TextureHandle((registry.textures.len() - 1) as u32))
    }

    fn create_buffer(&self, spec: &BufferSpec) -> SimResult<BufferHandle> {
        // Copies and writes work in 4-byte units
        let size = spec.size.max(4).next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT);
        let buffer = self.scoped("create_buffer", || {
            self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(&spec.label),
                size,
                usage: spec.usage,
                mapped_at_creation: false,
            })
        })?;
        let mut registry = self.registry.lock();
        registry.buffers.push(Some(GpuBuffer { buffer, size }));
        Ok(BufferHandle((registry.buffers.len() - 1) as u32))
    }

    fn write_buffer(&self, buffer: BufferHandle, offset: u64, bytes: &[u8]) -> SimResult<()> {
        if offset % wgpu::COPY_BUFFER_ALIGNMENT != 0
            || bytes.len() as u64 % wgpu::COPY_BUFFER_ALIGNMENT != 0
        {
            return Err(device_operation_error(
                "write_buffer",
                format!("offset {} / length {} not 4-byte aligned", offset, bytes.len()),
            ));
        }
        let registry = self.registry.lock();
        let target = registry.buffer(buffer)?;
        if offset + bytes.len() as u64 > target.size {
            return Err(device_operation_error("write_buffer", "write past end of buffer"));
        }
        self.queue.write_buffer(&target.buffer, offset, bytes);
        Ok(())
    }

    fn write_texture(&self, texture: TextureHandle, bytes: &[u8], region: TextureRegion) -> SimResult<()> {
        let registry = self.registry.lock();
        let target = registry.texture(texture)?;
        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &target.texture,
                mip_level: 0,
                origin: wgpu::Origin3d {
                    x: 0,
                    y: 0,
                    z: region.layer,
                },
                aspect: wgpu::TextureAspect::All,
            },
            bytes,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(region.bytes_per_row),
                rows_per_image: Some(region.height),
            },
            wgpu::Extent3d {
                width: region.width,
                height: region.height,
                depth_or_array_layers: region.layers,
            },
        );
        Ok(())
    }

    fn compile_program(&self, source: &ProgramSource, diagnostics: &mut Diagnostics) -> SimResult<ProgramHandle> {
        if let Some(validator) = &self.validator {
            validator
                .lock()
                .validate_wgsl(&source.label, &source.code, diagnostics)?;
        }

        let module = self
            .scoped("compile_program", || {
                self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
                    label: Some(&source.label),
                    source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(source.code.as_str())),
                })
            })
            .map_err(|e| match e {
                SimError::DeviceOperation { error, .. } => SimError::Compilation {
                    program: source.label.clone(),
                    message: error,
                    location: None,
                },
                other => other,
            })?;

        let mut registry = self.registry.lock();
        registry.programs.push((source.label.clone(), module));
        Ok(ProgramHandle((registry.programs.len() - 1) as u32))
    }

    fn create_binding_layout(&self, label: &str, entries: &[LayoutEntry]) -> SimResult<LayoutHandle> {
        let wgpu_entries: Vec<wgpu::BindGroupLayoutEntry> = entries
            .iter()
            .map(|entry| wgpu::BindGroupLayoutEntry {
                binding: entry.binding,
                visibility: entry.visibility,
                ty: entry.binding_type,
                count: None,
            })
            .collect();
        let layout = self.scoped("create_binding_layout", || {
            self.device
                .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some(label),
                    entries: &wgpu_entries,
                })
        })?;
        let mut registry = self.registry.lock();
        registry.layouts.push(layout);
        Ok(LayoutHandle((registry.layouts.len() - 1) as u32))
    }

    fn create_binding(
        &self,
        label: &str,
        layout: LayoutHandle,
        entries: &[BindingEntry],
    ) -> SimResult<BindGroupHandle> {
        let mut registry = self.registry.lock();
        let group = {
            let layout = registry.layouts.get(layout.index()).ok_or(SimError::StaleHandle {
                kind: LayoutHandle::KIND,
                id: layout.0,
            })?;

            let mut wgpu_entries = Vec::with_capacity(entries.len());
            for entry in entries {
                let resource = match entry.resource {
                    BoundResource::Texture(handle) => {
                        wgpu::BindingResource::TextureView(&registry.texture(handle)?.view)
                    }
                    BoundResource::Buffer(handle) => {
                        registry.buffer(handle)?.buffer.as_entire_binding()
                    }
                };
                wgpu_entries.push(wgpu::BindGroupEntry {
                    binding: entry.binding,
                    resource,
                });
            }

            self.scoped("create_binding", || {
                self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some(label),
                    layout,
                    entries: &wgpu_entries,
                })
            })?
        };
        registry.groups.push(group);
        Ok(BindGroupHandle((registry.groups.len() - 1) as u32))
    }

    fn create_pipeline(
        &self,
        label: &str,
        layouts: &[LayoutHandle],
        program: ProgramHandle,
        entry_point: &str,
    ) -> SimResult<PipelineHandle> {
        let mut registry = self.registry.lock();
        let pipeline = {
            let mut bind_group_layouts = Vec::with_capacity(layouts.len());
            for handle in layouts {
                bind_group_layouts.push(registry.layouts.get(handle.index()).ok_or(
                    SimError::StaleHandle {
                        kind: LayoutHandle::KIND,
                        id: handle.0,
                    },
                )?);
            }
            let (program_label, module) =
                registry.programs.get(program.index()).ok_or(SimError::StaleHandle {
                    kind: ProgramHandle::KIND,
                    id: program.0,
                })?;

            let pipeline_layout = self.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(label),
                bind_group_layouts: &bind_group_layouts,
                push_constant_ranges: &[],
            });

            self.scoped("create_pipeline", || {
                self.device
                    .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                        label: Some(label),
                        layout: Some(&pipeline_layout),
                        module,
                        entry_point,
                    })
            })
            .map_err(|e| match e {
                SimError::DeviceOperation { error, .. } if error.contains(entry_point) => {
                    SimError::MissingEntryPoint {
                        program: program_label.clone(),
                        entry_point: entry_point.to_string(),
                    }
                }
                other => other,
            })?
        };
        registry.pipelines.push(pipeline);
        Ok(PipelineHandle((registry.pipelines.len() - 1) as u32))
    }

    fn submit(&self, batch: &CommandBatch) -> SimResult<()> {
        let registry = self.registry.lock();
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some(&batch.label),
            });

        for command in &batch.commands {
            match command {
                Command::Dispatch {
                    label,
                    pipeline,
                    bind_groups,
                    workgroups,
                } => {
                    let pipeline = registry.pipelines.get(pipeline.index()).ok_or(
                        SimError::StaleHandle {
                            kind: PipelineHandle::KIND,
                            id: pipeline.0,
                        },
                    )?;
                    let mut groups = Vec::with_capacity(bind_groups.len());
                    for (index, handle) in bind_groups {
                        let group = registry.groups.get(handle.index()).ok_or(
                            SimError::StaleHandle {
                                kind: BindGroupHandle::KIND,
                                id: handle.0,
                            },
                        )?;
                        groups.push((*index, group));
                    }

                    let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                        label: Some(label),
                        timestamp_writes: None,
                    });
                    pass.set_pipeline(pipeline);
                    for (index, group) in groups {
                        pass.set_bind_group(index, group, &[]);
                    }
                    pass.dispatch_workgroups(workgroups[0], workgroups[1], workgroups[2]);
                }
                Command::CopyTexture {
                    source,
                    destination,
                    width,
                    height,
                    layers,
                    ..
                } => {
                    let src = registry.texture(*source)?;
                    let dst = registry.texture(*destination)?;
                    encoder.copy_texture_to_texture(
                        src.texture.as_image_copy(),
                        dst.texture.as_image_copy(),
                        wgpu::Extent3d {
                            width: *width,
                            height: *height,
                            depth_or_array_layers: *layers,
                        },
                    );
                }
                Command::CopyBuffer {
                    source,
                    destination,
                    size,
                    ..
                } => {
                    let src = registry.buffer(*source)?;
                    let dst = registry.buffer(*destination)?;
                    encoder.copy_buffer_to_buffer(&src.buffer, 0, &dst.buffer, 0, *size);
                }
            }
        }

        self.queue.submit(Some(encoder.finish()));
        drop(registry);
        self.take_uncaptured(&batch.label)
    }

    fn read_buffer(&self, buffer: BufferHandle) -> SimResult<Vec<u8>> {
        let registry = self.registry.lock();
        let source = registry.buffer(buffer)?;
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Readback Buffer"),
            size: source.size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Readback Encoder"),
            });
        encoder.copy_buffer_to_buffer(&source.buffer, 0, &staging, 0, source.size);
        self.queue.submit(Some(encoder.finish()));
        drop(registry);

        self.map_read(&staging)
    }

    fn read_texture(&self, texture: TextureHandle, layer: u32) -> SimResult<Vec<u8>> {
        let registry = self.registry.lock();
        let source = registry.texture(texture)?;
        let spec = source.spec.clone();
        if layer >= spec.layers {
            return Err(device_operation_error("read_texture", format!("no layer {}", layer)));
        }

        // Rows in a texture-to-buffer copy are padded to 256 bytes
        let row_bytes = spec.width * spec.format.bytes_per_texel();
        let padded_row = row_bytes.next_multiple_of(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Texture Readback Buffer"),
            size: padded_row as u64 * spec.height as u64,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Texture Readback Encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &source.texture,
                mip_level: 0,
                origin: wgpu::Origin3d { x: 0, y: 0, z: layer },
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &staging,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row),
                    rows_per_image: Some(spec.height),
                },
            },
            wgpu::Extent3d {
                width: spec.width,
                height: spec.height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(Some(encoder.finish()));
        drop(registry);

        let padded = self.map_read(&staging)?;
        let mut out = Vec::with_capacity((row_bytes * spec.height) as usize);
        for row in padded.chunks_exact(padded_row as usize) {
            out.extend_from_slice(&row[..row_bytes as usize]);
        }
        Ok(out)
    }

    fn destroy_texture(&self, texture: TextureHandle) {
        if let Some(slot) = self.registry.lock().textures.get_mut(texture.index()) {
            if let Some(gpu) = slot.take() {
                gpu.texture.destroy();
            }
        }
    }

    fn destroy_buffer(&self, buffer: BufferHandle) {
        if let Some(slot) = self.registry.lock().buffers.get_mut(buffer.index()) {
            if let Some(gpu) = slot.take() {
                gpu.buffer.destroy();
            }
        }
    }
}
