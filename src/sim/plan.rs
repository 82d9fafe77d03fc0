//! Declarative pass plans
//!
//! A [`PassPlan`] is the ordered list of steps making up one tick. Plans are
//! plain data; the [`Scheduler`](crate::sim::Scheduler) validates them
//! against the active binding handles and turns them into submissions.

use crate::error::{SimError, SimResult};
use crate::gpu::binder::ComputeProgram;
use crate::gpu::device::BufferHandle;
use crate::gpu::layout::{HostValue, ScalarKind, WgslType};
use crate::gpu::resources::instance::{AllocatedTexture, ResourceTableInstance};

/// One compute dispatch
#[derive(Debug, Clone)]
pub struct DispatchStep {
    pub label: String,
    pub program: ComputeProgram,
    pub workgroups: [u32; 3],
}

impl DispatchStep {
    pub fn new(label: impl Into<String>, program: &ComputeProgram, workgroups: [u32; 3]) -> Self {
        Self {
            label: label.into(),
            program: program.clone(),
            workgroups,
        }
    }
}

/// A uniform field the host writes between dispatches
#[derive(Debug, Clone, PartialEq)]
pub struct ParamField {
    pub slot: u32,
    pub name: String,
    pub buffer: BufferHandle,
    pub offset: u64,
    pub ty: WgslType,
}

impl ParamField {
    /// Locate uniform field `name` at `slot` of `instance`
    pub fn resolve(instance: &ResourceTableInstance, slot: u32, name: &str) -> SimResult<Self> {
        let (buffer, offset, ty) = instance.field_location(slot, name)?;
        Ok(Self {
            slot,
            name: name.to_string(),
            buffer,
            offset,
            ty,
        })
    }

    /// Encode `value` for this field, checking its type
    pub fn encode<V: HostValue>(&self, value: V) -> SimResult<Vec<u8>> {
        if V::wgsl_type() != self.ty {
            return Err(SimError::InvalidField {
                field: self.name.clone(),
                reason: format!("declared {} but written as {}", self.ty, V::wgsl_type()),
            });
        }
        let mut bytes = vec![0u8; self.ty.size() as usize];
        value.write_bytes(&mut bytes);
        Ok(bytes)
    }
}

/// The uniform field receiving the phase of a two-phase step.
///
/// Must be a `u32`; the scheduler writes 0 before the first half and 1
/// before the second.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseSelector {
    field: ParamField,
}

impl PhaseSelector {
    pub fn new(field: ParamField) -> SimResult<Self> {
        if field.ty != WgslType::scalar(ScalarKind::U32) {
            return Err(SimError::InvalidField {
                field: field.name.clone(),
                reason: format!("phase selector must be u32, found {}", field.ty),
            });
        }
        Ok(Self { field })
    }

    pub fn resolve(instance: &ResourceTableInstance, slot: u32, name: &str) -> SimResult<Self> {
        Self::new(ParamField::resolve(instance, slot, name)?)
    }

    pub fn field(&self) -> &ParamField {
        &self.field
    }

    pub(crate) fn phase_bytes(&self, phase: u32) -> Vec<u8> {
        bytemuck::bytes_of(&phase).to_vec()
    }
}

#[derive(Debug, Clone)]
pub enum PassStep {
    Dispatch(DispatchStep),
    /// Run `body` `count` times with no reset in between
    Repeat { body: Vec<PassStep>, count: u32 },
    /// Run `step` once with phase 0, then once with phase 1
    TwoPhase {
        step: DispatchStep,
        selector: PhaseSelector,
    },
    WriteParam {
        label: String,
        buffer: BufferHandle,
        offset: u64,
        bytes: Vec<u8>,
    },
    CopyTexture {
        label: String,
        source: AllocatedTexture,
        destination: AllocatedTexture,
    },
}

impl PassStep {
    pub fn label(&self) -> &str {
        match self {
            PassStep::Dispatch(step) | PassStep::TwoPhase { step, .. } => &step.label,
            PassStep::Repeat { .. } => "repeat",
            PassStep::WriteParam { label, .. } | PassStep::CopyTexture { label, .. } => label,
        }
    }

    /// Dispatches this step issues per tick
    pub fn dispatch_count(&self) -> usize {
        match self {
            PassStep::Dispatch(_) => 1,
            PassStep::TwoPhase { .. } => 2,
            PassStep::Repeat { body, count } => {
                body.iter().map(PassStep::dispatch_count).sum::<usize>() * *count as usize
            }
            PassStep::WriteParam { .. } | PassStep::CopyTexture { .. } => 0,
        }
    }
}

/// Ordered steps of one tick
#[derive(Debug, Clone, Default)]
pub struct PassPlan {
    label: String,
    steps: Vec<PassStep>,
}

impl PassPlan {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            steps: Vec::new(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn steps(&self) -> &[PassStep] {
        &self.steps
    }

    pub fn push(&mut self, step: PassStep) {
        self.steps.push(step);
    }

    pub fn step(mut self, step: PassStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn dispatch(self, label: impl Into<String>, program: &ComputeProgram, workgroups: [u32; 3]) -> Self {
        self.step(PassStep::Dispatch(DispatchStep::new(label, program, workgroups)))
    }

    /// Repeat the steps built by `body` `count` times
    pub fn repeat(self, count: u32, body: impl FnOnce(PassPlan) -> PassPlan) -> Self {
        let inner = body(PassPlan::new(format!("{}/repeat", self.label)));
        self.step(PassStep::Repeat {
            body: inner.steps,
            count,
        })
    }

    pub fn two_phase(
        self,
        label: impl Into<String>,
        program: &ComputeProgram,
        workgroups: [u32; 3],
        selector: PhaseSelector,
    ) -> Self {
        self.step(PassStep::TwoPhase {
            step: DispatchStep::new(label, program, workgroups),
            selector,
        })
    }

    /// Write raw bytes into a buffer before the following steps
    pub fn write_param(self, label: impl Into<String>, buffer: BufferHandle, offset: u64, bytes: Vec<u8>) -> Self {
        self.step(PassStep::WriteParam {
            label: label.into(),
            buffer,
            offset,
            bytes,
        })
    }

    /// Write a typed uniform field before the following steps
    pub fn write_field<V: HostValue>(self, label: impl Into<String>, field: &ParamField, value: V) -> SimResult<Self> {
        let bytes = field.encode(value)?;
        Ok(self.write_param(label, field.buffer, field.offset, bytes))
    }

    pub fn copy_texture(
        self,
        label: impl Into<String>,
        source: &AllocatedTexture,
        destination: &AllocatedTexture,
    ) -> Self {
        self.step(PassStep::CopyTexture {
            label: label.into(),
            source: source.clone(),
            destination: destination.clone(),
        })
    }

    /// Dispatches issued per tick
    pub fn dispatch_count(&self) -> usize {
        self.steps.iter().map(PassStep::dispatch_count).sum()
    }
}
