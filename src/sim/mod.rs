//! Pass scheduling
//!
//! [`PassPlan`]s describe one tick as ordered dispatch steps; the
//! [`Scheduler`] validates a plan against its binding handles and issues it;
//! [`Simulation`] bundles the pieces behind a single `tick()` entry point.

pub mod driver;
pub mod plan;
pub mod scheduler;
pub mod simulation;
pub mod workgroups;

pub use driver::{StopHandle, TickDriver};
pub use plan::{DispatchStep, ParamField, PassPlan, PassStep, PhaseSelector};
pub use scheduler::{Scheduler, Submission, TickReport};
pub use simulation::Simulation;
