//! Program sources and the compile step shared by all backends

use crate::error::{SimError, SimResult};
use crate::gpu::device::{GpuDevice, ProgramHandle};
use crate::gpu::shader::preprocessor::Preprocessor;
use crate::gpu::shader::reflect::ProgramReflection;
use crate::gpu::shader::Diagnostics;
use std::collections::BTreeMap;

/// Labelled program text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramSource {
    pub label: String,
    pub code: String,
}

impl ProgramSource {
    pub fn new(label: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            code: code.into(),
        }
    }
}

/// Named modules available to `#include`
#[derive(Debug, Clone, Default)]
pub struct ProgramLibrary {
    modules: BTreeMap<String, String>,
}

impl ProgramLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, code: impl Into<String>) {
        self.modules.insert(name.into(), code.into());
    }

    pub fn with(mut self, name: impl Into<String>, code: impl Into<String>) -> Self {
        self.insert(name, code);
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.modules.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }
}

/// A program accepted by a device
#[derive(Debug, Clone)]
pub struct CompiledProgram {
    pub handle: ProgramHandle,
    pub label: String,
    /// Source after include expansion
    pub expanded: String,
    pub reflection: ProgramReflection,
}

impl CompiledProgram {
    /// Check `entry_point` exists as a compute entry point
    pub fn require_entry_point(&self, entry_point: &str) -> SimResult<()> {
        if self.reflection.entry_point(entry_point).is_some() {
            Ok(())
        } else {
            Err(SimError::MissingEntryPoint {
                program: self.label.clone(),
                entry_point: entry_point.to_string(),
            })
        }
    }

    pub fn workgroup_size(&self, entry_point: &str) -> Option<[u32; 3]> {
        self.reflection
            .entry_point(entry_point)
            .and_then(|e| e.workgroup_size)
    }
}

/// Expand includes, reflect and hand the program to `device`
pub fn compile_program(
    device: &dyn GpuDevice,
    library: &ProgramLibrary,
    source: &ProgramSource,
    diagnostics: &mut Diagnostics,
) -> SimResult<CompiledProgram> {
    let expanded = Preprocessor::new(library).expand(source, diagnostics)?;
    let reflection = ProgramReflection::from_wgsl(&expanded);
    if reflection.entry_points.is_empty() {
        diagnostics.warn(&source.label, "no compute entry points found");
    }

    let handle = device.compile_program(
        &ProgramSource::new(source.label.clone(), expanded.clone()),
        diagnostics,
    )?;
    log::debug!(
        "[Shader] Compiled '{}' on {} ({} bindings, {} entry points)",
        source.label,
        device.backend_name(),
        reflection.bindings.len(),
        reflection.entry_points.len()
    );

    Ok(CompiledProgram {
        handle,
        label: source.label.clone(),
        expanded,
        reflection,
    })
}
