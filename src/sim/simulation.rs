//! A runnable simulation: resources, bindings and a validated plan

use crate::error::SimResult;
use crate::gpu::binder::BindingHandle;
use crate::gpu::device::GpuDevice;
use crate::gpu::resources::{InitialContent, ResourceTableInstance};
use crate::sim::plan::PassPlan;
use crate::sim::scheduler::{Scheduler, TickReport};
use std::sync::Arc;

pub struct Simulation {
    name: String,
    device: Arc<dyn GpuDevice>,
    instance: ResourceTableInstance,
    handles: Vec<BindingHandle>,
    scheduler: Scheduler,
    initial: InitialContent,
}

impl Simulation {
    /// Validate `plan` against `handles` and take ownership of `instance`.
    ///
    /// `initial` is kept so [`Simulation::reset`] can re-seed the resources.
    pub fn new(
        name: impl Into<String>,
        device: Arc<dyn GpuDevice>,
        instance: ResourceTableInstance,
        handles: Vec<BindingHandle>,
        plan: PassPlan,
        initial: InitialContent,
    ) -> SimResult<Self> {
        let active: Vec<&BindingHandle> = handles.iter().collect();
        let scheduler = match Scheduler::new(plan, &active) {
            Ok(scheduler) => scheduler,
            Err(e) => {
                instance.teardown(device.as_ref());
                return Err(e);
            }
        };
        let name = name.into();
        log::info!(
            "[Simulation] '{}' ready on {} backend",
            name,
            device.backend_name()
        );
        Ok(Self {
            name,
            device,
            instance,
            handles,
            scheduler,
            initial,
        })
    }

    /// Advance one tick
    pub fn tick(&mut self) -> SimResult<TickReport> {
        self.scheduler.tick(self.device.as_ref())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ticks(&self) -> u64 {
        self.scheduler.ticks()
    }

    pub fn device(&self) -> &dyn GpuDevice {
        self.device.as_ref()
    }

    pub fn instance(&self) -> &ResourceTableInstance {
        &self.instance
    }

    /// Mutable access for staging uniform fields between ticks
    pub fn instance_mut(&mut self) -> &mut ResourceTableInstance {
        &mut self.instance
    }

    /// Stage-and-upload helper for a uniform field
    pub fn set_param<V: crate::gpu::layout::HostValue>(
        &mut self,
        slot: u32,
        name: &str,
        value: V,
    ) -> SimResult<()> {
        self.instance.set_uniform_field(slot, name, value)?;
        self.instance.flush_uniform(self.device.as_ref(), slot)
    }

    pub fn handles(&self) -> &[BindingHandle] {
        &self.handles
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Return every resource to its initial content
    pub fn reset(&mut self) -> SimResult<()> {
        self.instance.reset(self.device.as_ref(), &self.initial)
    }

    /// Release every device resource
    pub fn teardown(self) {
        log::info!(
            "[Simulation] '{}' torn down after {} ticks",
            self.name,
            self.scheduler.ticks()
        );
        self.instance.teardown(self.device.as_ref());
    }
}
