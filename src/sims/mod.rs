//! Simulations wired on top of the resource, binding and scheduling layers
//!
//! Each module owns its resource table, WGSL program text and the matching
//! CPU kernels for the software backend.

pub mod chain;
pub mod fluid;
pub mod life;

use crate::error::SimResult;
use crate::gpu::device::software::SoftwareDevice;

/// Register the CPU kernels of every bundled simulation
pub fn register_all_kernels(device: &SoftwareDevice) -> SimResult<()> {
    device.register_kernels(life::kernels()?);
    device.register_kernels(chain::kernels()?);
    device.register_kernels(fluid::kernels()?);
    log::debug!("[Sims] Registered software kernels for life, chain and fluid");
    Ok(())
}
