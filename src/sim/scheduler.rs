//! Tick scheduling
//!
//! The scheduler lowers a [`PassPlan`] into an ordered list of submissions.
//! Host parameter writes split the tick: every dispatch recorded before a
//! write is submitted first, then the write is queued, so it is visible to
//! exactly the dispatches that follow it. Dispatches inside one submission
//! run in order and see each other's writes.

use crate::error::{malformed, SimError, SimResult};
use crate::gpu::binder::{BindingHandle, BindingId};
use crate::gpu::device::{BufferHandle, Command, CommandBatch, GpuDevice};
use crate::sim::plan::{DispatchStep, PassPlan, PassStep};
use crate::sim::workgroups::MAX_WORKGROUPS_PER_DIMENSION;
use std::collections::HashSet;

/// One unit of work handed to the device, in order
#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    Write {
        label: String,
        buffer: BufferHandle,
        offset: u64,
        bytes: Vec<u8>,
    },
    Batch(CommandBatch),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    /// Ticks completed including this one
    pub tick: u64,
    pub dispatches: usize,
    pub submissions: usize,
}

#[derive(Debug)]
pub struct Scheduler {
    plan: PassPlan,
    active: HashSet<BindingId>,
    submissions: Vec<Submission>,
    ticks: u64,
}

impl Scheduler {
    /// Validate `plan` against the active binding handles and lower it
    pub fn new(plan: PassPlan, active: &[&BindingHandle]) -> SimResult<Self> {
        let active: HashSet<BindingId> = active.iter().map(|h| h.id()).collect();
        validate_steps(plan.steps(), &active)?;
        let submissions = lower(&plan);

        log::info!(
            "[Scheduler] Plan '{}': {} steps, {} dispatches, {} submissions per tick",
            plan.label(),
            plan.steps().len(),
            plan.dispatch_count(),
            submissions.len()
        );

        Ok(Self {
            plan,
            active,
            submissions,
            ticks: 0,
        })
    }

    /// Replace the active binding handles, re-validating every step
    pub fn activate(&mut self, handles: &[&BindingHandle]) -> SimResult<()> {
        let active: HashSet<BindingId> = handles.iter().map(|h| h.id()).collect();
        validate_steps(self.plan.steps(), &active)?;
        self.active = active;
        Ok(())
    }

    pub fn plan(&self) -> &PassPlan {
        &self.plan
    }

    /// Submissions issued by every tick
    pub fn submissions(&self) -> &[Submission] {
        &self.submissions
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn is_active(&self, handle: &BindingHandle) -> bool {
        self.active.contains(&handle.id())
    }

    /// Issue one tick. Submission is fire-and-forget; errors from the device
    /// are returned as-is and the tick counter is not advanced.
    pub fn tick(&mut self, device: &dyn GpuDevice) -> SimResult<TickReport> {
        let mut dispatches = 0;
        for submission in &self.submissions {
            match submission {
                Submission::Write {
                    buffer,
                    offset,
                    bytes,
                    ..
                } => device.write_buffer(*buffer, *offset, bytes)?,
                Submission::Batch(batch) => {
                    dispatches += batch.dispatch_count();
                    device.submit(batch)?;
                }
            }
        }
        self.ticks += 1;

        log::trace!(
            "[Scheduler] Tick {} of '{}': {} dispatches",
            self.ticks,
            self.plan.label(),
            dispatches
        );
        Ok(TickReport {
            tick: self.ticks,
            dispatches,
            submissions: self.submissions.len(),
        })
    }
}

fn validate_steps(steps: &[PassStep], active: &HashSet<BindingId>) -> SimResult<()> {
    for step in steps {
        match step {
            PassStep::Dispatch(dispatch) | PassStep::TwoPhase { step: dispatch, .. } => {
                validate_dispatch(dispatch, active)?
            }
            PassStep::Repeat { body, count } => {
                if *count == 0 {
                    log::warn!("[Scheduler] Repeat block with a count of zero never runs");
                }
                validate_steps(body, active)?;
            }
            PassStep::WriteParam {
                label,
                offset,
                bytes,
                ..
            } => {
                if offset % 4 != 0 || bytes.len() % 4 != 0 {
                    return Err(malformed(
                        label,
                        format!(
                            "parameter writes must be 4-byte aligned (offset {}, {} bytes)",
                            offset,
                            bytes.len()
                        ),
                    ));
                }
            }
            PassStep::CopyTexture {
                label,
                source,
                destination,
            } => {
                let (s, d) = (&source.desc, &destination.desc);
                if (s.width, s.height, s.layers, s.format) != (d.width, d.height, d.layers, d.format) {
                    return Err(malformed(
                        label,
                        format!(
                            "copy between mismatched textures {}x{}x{} {} and {}x{}x{} {}",
                            s.width, s.height, s.layers, s.format, d.width, d.height, d.layers, d.format
                        ),
                    ));
                }
            }
        }
    }
    Ok(())
}

fn validate_dispatch(step: &DispatchStep, active: &HashSet<BindingId>) -> SimResult<()> {
    if step.program.groups.iter().any(|(id, _)| !active.contains(id)) {
        return Err(SimError::ForeignProgram {
            pass: step.label.clone(),
        });
    }
    if step.workgroups.iter().any(|w| *w == 0) {
        return Err(malformed(&step.label, "dispatch of zero workgroups"));
    }
    if step.workgroups.iter().any(|w| *w > MAX_WORKGROUPS_PER_DIMENSION) {
        return Err(malformed(
            &step.label,
            format!("{:?} workgroups exceed the per-dimension limit", step.workgroups),
        ));
    }
    Ok(())
}

struct Lowering {
    label: String,
    out: Vec<Submission>,
    batch: CommandBatch,
}

impl Lowering {
    fn flush(&mut self) {
        if !self.batch.is_empty() {
            let next = CommandBatch::new(self.label.clone());
            self.out
                .push(Submission::Batch(std::mem::replace(&mut self.batch, next)));
        }
    }

    fn write(&mut self, label: &str, buffer: BufferHandle, offset: u64, bytes: Vec<u8>) {
        self.flush();
        self.out.push(Submission::Write {
            label: label.to_string(),
            buffer,
            offset,
            bytes,
        });
    }

    fn dispatch(&mut self, step: &DispatchStep, suffix: Option<&str>) {
        let label = match suffix {
            Some(suffix) => format!("{}[{}]", step.label, suffix),
            None => step.label.clone(),
        };
        self.batch.push(Command::Dispatch {
            label,
            pipeline: step.program.pipeline,
            bind_groups: step.program.bind_groups(),
            workgroups: step.workgroups,
        });
    }

    fn steps(&mut self, steps: &[PassStep]) {
        for step in steps {
            match step {
                PassStep::Dispatch(dispatch) => self.dispatch(dispatch, None),
                PassStep::Repeat { body, count } => {
                    for _ in 0..*count {
                        self.steps(body);
                    }
                }
                PassStep::TwoPhase { step, selector } => {
                    let field = selector.field();
                    for phase in 0..2u32 {
                        self.write(
                            &format!("{}.{}", step.label, field.name),
                            field.buffer,
                            field.offset,
                            selector.phase_bytes(phase),
                        );
                        self.dispatch(step, Some(&format!("phase {}", phase)));
                    }
                }
                PassStep::WriteParam {
                    label,
                    buffer,
                    offset,
                    bytes,
                } => self.write(label, *buffer, *offset, bytes.clone()),
                PassStep::CopyTexture {
                    label,
                    source,
                    destination,
                } => self.batch.push(Command::CopyTexture {
                    label: label.clone(),
                    source: source.handle,
                    destination: destination.handle,
                    width: source.desc.width,
                    height: source.desc.height,
                    layers: source.desc.layers,
                }),
            }
        }
    }
}

fn lower(plan: &PassPlan) -> Vec<Submission> {
    let mut lowering = Lowering {
        label: plan.label().to_string(),
        out: Vec::new(),
        batch: CommandBatch::new(plan.label()),
    };
    lowering.steps(plan.steps());
    lowering.flush();
    lowering.out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::binder::{PipelineBinder, Visibility};
    use crate::gpu::device::kernel::CpuKernel;
    use crate::gpu::device::software::SoftwareDevice;
    use crate::gpu::layout::{ScalarKind, StructLayout, WgslType};
    use crate::gpu::resources::{
        InitialContent, ResourceAllocator, ResourceDescriptor, ResourceTable, ResourceTableInstance,
    };
    use crate::gpu::shader::{compile_program, Diagnostics, ProgramLibrary, ProgramSource};
    use crate::sim::plan::{ParamField, PhaseSelector};

    const SOURCE: &str = "#include <bindings>\n@compute @workgroup_size(1) fn bump() {}";

    fn params() -> StructLayout {
        StructLayout::compute(&[
            ("phase", WgslType::scalar(ScalarKind::U32)),
            ("count", WgslType::scalar(ScalarKind::U32)),
        ])
        .expect("layout")
    }

    /// Appends `phase` to a log buffer on every invocation
    fn setup() -> (SoftwareDevice, ResourceTableInstance, BindingHandle, ProgramLibrary) {
        let device = SoftwareDevice::new();
        device.register_kernel(
            "bump",
            CpuKernel::new([1, 1, 1], |inv| {
                let phase = inv.read_u32(0, 1, 0)?;
                let len = inv.read_u32(0, 0, 0)?;
                inv.write_u32(0, 0, 1 + len, phase)?;
                inv.write_u32(0, 0, 0, len + 1)
            }),
        );
        let table = ResourceTable::new("log")
            .with(0, "entries", ResourceDescriptor::storage_bytes(64))
            .and_then(|t| t.with(1, "params", ResourceDescriptor::uniform("Params", params())))
            .expect("table");
        let instance = ResourceAllocator::allocate(&table, &device, &InitialContent::new())
            .expect("allocate");
        let handle = PipelineBinder::bind(&instance, &Visibility::compute(), &device).expect("bind");
        let library = ProgramLibrary::new().with("bindings", table.wgsl_bindings(0));
        (device, instance, handle, library)
    }

    fn program(
        device: &SoftwareDevice,
        library: &ProgramLibrary,
        handle: &BindingHandle,
    ) -> crate::gpu::binder::ComputeProgram {
        let compiled = compile_program(
            device,
            library,
            &ProgramSource::new("bump", SOURCE),
            &mut Diagnostics::new(),
        )
        .expect("compile");
        PipelineBinder::compute_program(device, &[handle], &compiled, "bump").expect("pipeline")
    }

    fn log_entries(device: &SoftwareDevice, instance: &ResourceTableInstance) -> Vec<u32> {
        let bytes = instance.read_buffer(device, 0).expect("read");
        let words: Vec<u32> = bytes
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        words[1..1 + words[0] as usize].to_vec()
    }

    #[test]
    fn test_two_phase_writes_phase_before_each_half() {
        let (device, instance, handle, library) = setup();
        let bump = program(&device, &library, &handle);
        let selector = PhaseSelector::resolve(&instance, 1, "phase").expect("selector");
        let plan = PassPlan::new("phases").two_phase("bump", &bump, [1, 1, 1], selector);

        let mut scheduler = Scheduler::new(plan, &[&handle]).expect("scheduler");
        assert_eq!(scheduler.submissions().len(), 4);
        let report = scheduler.tick(&device).expect("tick");
        assert_eq!(report.dispatches, 2);
        scheduler.tick(&device).expect("tick");

        assert_eq!(log_entries(&device, &instance), vec![0, 1, 0, 1]);
        assert_eq!(scheduler.ticks(), 2);
    }

    #[test]
    fn test_repeat_and_param_writes_in_order() {
        let (device, instance, handle, library) = setup();
        let bump = program(&device, &library, &handle);
        let phase = ParamField::resolve(&instance, 1, "phase").expect("field");
        let plan = PassPlan::new("ordered")
            .write_field("set 7", &phase, 7u32)
            .expect("write")
            .repeat(3, |p| p.dispatch("bump", &bump, [1, 1, 1]))
            .write_field("set 9", &phase, 9u32)
            .expect("write")
            .dispatch("bump", &bump, [1, 1, 1]);
        assert_eq!(plan.dispatch_count(), 4);

        let mut scheduler = Scheduler::new(plan, &[&handle]).expect("scheduler");
        assert_eq!(scheduler.submissions().len(), 4);
        scheduler.tick(&device).expect("tick");
        assert_eq!(log_entries(&device, &instance), vec![7, 7, 7, 9]);
    }

    #[test]
    fn test_mistyped_param_rejected() {
        let (_, instance, _, _) = setup();
        let phase = ParamField::resolve(&instance, 1, "phase").expect("field");
        assert!(PassPlan::new("bad").write_field("f", &phase, 1.0f32).is_err());
        assert!(ParamField::resolve(&instance, 1, "missing").is_err());
    }

    #[test]
    fn test_foreign_program_rejected() {
        let (device, instance, handle, library) = setup();
        let bump = program(&device, &library, &handle);
        let other = PipelineBinder::bind(&instance, &Visibility::compute(), &device).expect("bind");

        let plan = PassPlan::new("foreign").dispatch("bump", &bump, [1, 1, 1]);
        let err = Scheduler::new(plan.clone(), &[&other]).unwrap_err();
        assert!(matches!(err, SimError::ForeignProgram { ref pass } if pass == "bump"));
        assert!(err.is_configuration());

        let mut scheduler = Scheduler::new(plan, &[&handle]).expect("scheduler");
        assert!(scheduler.is_active(&handle));
        assert!(scheduler.activate(&[&other]).is_err());
        assert!(scheduler.is_active(&handle));
    }

    #[test]
    fn test_zero_workgroups_rejected() {
        let (device, _, handle, library) = setup();
        let bump = program(&device, &library, &handle);
        let plan = PassPlan::new("empty").dispatch("bump", &bump, [0, 1, 1]);
        assert!(Scheduler::new(plan, &[&handle]).is_err());
    }
}
