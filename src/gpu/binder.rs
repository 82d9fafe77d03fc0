//! Pipeline binding
//!
//! Derives one bind group layout and bind group from an allocated resource
//! table, then builds compute pipelines against it. Every program is checked
//! against the table before a pipeline is created: each `@group/@binding`
//! it declares must exist, be visible to the compute stage and have the same
//! WGSL type the table generates.

use crate::error::{malformed, SimError, SimResult};
use crate::gpu::device::{
    BindGroupHandle, BindingEntry, BindingKind, GpuDevice, LayoutEntry, LayoutHandle,
    PipelineHandle,
};
use crate::gpu::resources::descriptor::ResourceDescriptor;
use crate::gpu::resources::instance::ResourceTableInstance;
use crate::gpu::resources::table::ResourceTable;
use crate::gpu::shader::reflect::{normalize, ProgramReflection};
use crate::gpu::shader::CompiledProgram;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_BINDING_ID: AtomicU64 = AtomicU64::new(1);

/// Which shader stages see each slot
#[derive(Debug, Clone, PartialEq)]
pub struct Visibility {
    default: wgpu::ShaderStages,
    overrides: BTreeMap<u32, wgpu::ShaderStages>,
}

impl Visibility {
    pub fn new(default: wgpu::ShaderStages) -> Self {
        Self {
            default,
            overrides: BTreeMap::new(),
        }
    }

    /// Every slot visible to compute programs only
    pub fn compute() -> Self {
        Self::new(wgpu::ShaderStages::COMPUTE)
    }

    /// Every slot visible to compute and fragment programs
    pub fn compute_and_fragment() -> Self {
        Self::new(wgpu::ShaderStages::COMPUTE | wgpu::ShaderStages::FRAGMENT)
    }

    pub fn with_slot(mut self, slot: u32, stages: wgpu::ShaderStages) -> Self {
        self.overrides.insert(slot, stages);
        self
    }

    pub fn stages_for(&self, slot: u32) -> wgpu::ShaderStages {
        self.overrides.get(&slot).copied().unwrap_or(self.default)
    }
}

impl Default for Visibility {
    fn default() -> Self {
        Self::compute()
    }
}

/// Identity of a [`BindingHandle`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BindingId(u64);

impl fmt::Display for BindingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "binding-{}", self.0)
    }
}

/// Layout plus bound group derived from one table instance
#[derive(Debug, Clone)]
pub struct BindingHandle {
    id: BindingId,
    instance_id: u64,
    layout: LayoutHandle,
    group: BindGroupHandle,
    entries: Vec<LayoutEntry>,
    table: ResourceTable,
}

impl BindingHandle {
    pub fn id(&self) -> BindingId {
        self.id
    }

    /// Id of the table instance this handle binds
    pub fn instance_id(&self) -> u64 {
        self.instance_id
    }

    pub fn layout(&self) -> LayoutHandle {
        self.layout
    }

    pub fn group(&self) -> BindGroupHandle {
        self.group
    }

    pub fn entries(&self) -> &[LayoutEntry] {
        &self.entries
    }

    pub fn table(&self) -> &ResourceTable {
        &self.table
    }

    /// Check every binding `program` declares in `group_index` against this handle
    pub fn check_program(
        &self,
        program: &str,
        reflection: &ProgramReflection,
        group_index: u32,
        stage: wgpu::ShaderStages,
    ) -> SimResult<()> {
        for declared in reflection.bindings_in_group(group_index) {
            let entry = self.table.get(declared.binding).ok_or_else(|| SimError::UndeclaredBinding {
                program: program.to_string(),
                group: group_index,
                binding: declared.binding,
            })?;
            let layout_entry = self
                .entries
                .iter()
                .find(|e| e.binding == declared.binding)
                .ok_or_else(|| SimError::UndeclaredBinding {
                    program: program.to_string(),
                    group: group_index,
                    binding: declared.binding,
                })?;

            if !layout_entry.visibility.contains(stage) {
                return Err(SimError::VisibilityMismatch {
                    program: program.to_string(),
                    name: entry.name.clone(),
                    binding: declared.binding,
                    stage: stage_name(stage).to_string(),
                });
            }

            let expected = normalize(&format!(
                "{}{}",
                entry.descriptor.wgsl_address_space(),
                entry.descriptor.wgsl_type()
            ));
            if declared.signature() != expected {
                return Err(malformed(
                    &entry.name,
                    format!(
                        "program '{}' declares `var{} {}` but the table declares `var{} {}`",
                        program,
                        declared.address_space,
                        declared.ty,
                        entry.descriptor.wgsl_address_space(),
                        entry.descriptor.wgsl_type()
                    ),
                ));
            }
            if declared.name != entry.name {
                log::warn!(
                    "[Binder] '{}' names binding {} '{}', table calls it '{}'",
                    program,
                    declared.binding,
                    declared.name,
                    entry.name
                );
            }
        }
        Ok(())
    }
}

/// A compute pipeline created against specific binding handles
#[derive(Debug, Clone)]
pub struct ComputeProgram {
    pub label: String,
    pub entry_point: String,
    pub pipeline: PipelineHandle,
    /// Binding handle id and bound group for each group index, in order
    pub groups: Vec<(BindingId, BindGroupHandle)>,
    pub workgroup_size: Option<[u32; 3]>,
}

impl ComputeProgram {
    /// Whether this program was built against exactly `handles`
    pub fn built_for(&self, handles: &[&BindingHandle]) -> bool {
        self.groups.len() == handles.len()
            && self
                .groups
                .iter()
                .zip(handles)
                .all(|((id, _), handle)| *id == handle.id())
    }

    pub fn bind_groups(&self) -> Vec<(u32, BindGroupHandle)> {
        self.groups
            .iter()
            .enumerate()
            .map(|(i, (_, group))| (i as u32, *group))
            .collect()
    }
}

pub struct PipelineBinder;

impl PipelineBinder {
    /// Derive a bind group layout and bind group for every slot of `instance`
    pub fn bind(
        instance: &ResourceTableInstance,
        visibility: &Visibility,
        device: &dyn GpuDevice,
    ) -> SimResult<BindingHandle> {
        let table = instance.table();
        let mut layout_entries = Vec::with_capacity(table.len());
        let mut binding_entries = Vec::with_capacity(table.len());

        for entry in table.entries() {
            let stages = visibility.stages_for(entry.slot);
            if stages.is_empty() {
                return Err(malformed(&entry.name, "binding is visible to no shader stage"));
            }
            if entry.descriptor.is_writable() && stages.contains(wgpu::ShaderStages::VERTEX) {
                return Err(malformed(
                    &entry.name,
                    "writable storage bindings cannot be visible to the vertex stage",
                ));
            }

            layout_entries.push(LayoutEntry {
                binding: entry.slot,
                visibility: stages,
                kind: binding_kind(&entry.descriptor),
                binding_type: entry.descriptor.binding_type(),
            });
            binding_entries.push(BindingEntry {
                binding: entry.slot,
                resource: instance.bound_resource(entry.slot)?,
            });
        }

        let label = table.label();
        let layout = device.create_binding_layout(label, &layout_entries)?;
        let group = device.create_binding(label, layout, &binding_entries)?;
        let id = BindingId(NEXT_BINDING_ID.fetch_add(1, Ordering::Relaxed));
        log::debug!(
            "[Binder] Bound '{}' as {} ({} entries)",
            label,
            id,
            layout_entries.len()
        );

        Ok(BindingHandle {
            id,
            instance_id: instance.id(),
            layout,
            group,
            entries: layout_entries,
            table: table.clone(),
        })
    }

    /// Build a compute pipeline whose group `i` is `handles[i]`
    pub fn compute_program(
        device: &dyn GpuDevice,
        handles: &[&BindingHandle],
        program: &CompiledProgram,
        entry_point: &str,
    ) -> SimResult<ComputeProgram> {
        program.require_entry_point(entry_point)?;

        if let Some(extra) = program
            .reflection
            .bindings
            .iter()
            .find(|b| b.group as usize >= handles.len())
        {
            return Err(SimError::UndeclaredBinding {
                program: program.label.clone(),
                group: extra.group,
                binding: extra.binding,
            });
        }
        for (index, handle) in handles.iter().enumerate() {
            handle.check_program(
                &program.label,
                &program.reflection,
                index as u32,
                wgpu::ShaderStages::COMPUTE,
            )?;
        }

        let layouts: Vec<LayoutHandle> = handles.iter().map(|h| h.layout()).collect();
        let label = format!("{}::{}", program.label, entry_point);
        let pipeline = device.create_pipeline(&label, &layouts, program.handle, entry_point)?;

        Ok(ComputeProgram {
            label,
            entry_point: entry_point.to_string(),
            pipeline,
            groups: handles.iter().map(|h| (h.id(), h.group())).collect(),
            workgroup_size: program.workgroup_size(entry_point),
        })
    }
}

fn binding_kind(descriptor: &ResourceDescriptor) -> BindingKind {
    match descriptor {
        ResourceDescriptor::StorageTexture { texture, access } => BindingKind::StorageTexture {
            format: texture.format,
            access: *access,
            array: texture.is_array(),
        },
        ResourceDescriptor::SampledTexture(texture) => BindingKind::SampledTexture {
            format: texture.format,
            array: texture.is_array(),
        },
        ResourceDescriptor::UniformBuffer(_) => BindingKind::UniformBuffer,
        ResourceDescriptor::StorageBuffer { read_only, .. } => BindingKind::StorageBuffer {
            read_only: *read_only,
        },
    }
}

fn stage_name(stage: wgpu::ShaderStages) -> &'static str {
    if stage == wgpu::ShaderStages::COMPUTE {
        "compute"
    } else if stage == wgpu::ShaderStages::FRAGMENT {
        "fragment"
    } else if stage == wgpu::ShaderStages::VERTEX {
        "vertex"
    } else {
        "requested"
    }
}
