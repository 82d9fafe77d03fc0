//! Runs the Game of Life simulation headless and logs the population
//!
//! Usage: `sim_runner [config.toml] [ticks]`

use anyhow::{Context, Result};
use gpu_sim_engine::config::{Backend, SimConfig};
use gpu_sim_engine::gpu::shader::Diagnostics;
use gpu_sim_engine::gpu::{GpuDevice, SoftwareDevice, WgpuDevice};
use gpu_sim_engine::sim::TickDriver;
use gpu_sim_engine::sims::{self, life};
use std::sync::Arc;

const DEFAULT_TICKS: u64 = 100;

/// R-pentomino in the middle of an otherwise empty grid
fn seed(width: u32, height: u32) -> Vec<Vec<f64>> {
    let (w, h) = (width as usize, height as usize);
    let mut cells = vec![vec![0.0; w]; h];
    for (dx, dy) in [(1, 0), (2, 0), (0, 1), (1, 1), (1, 2)] {
        cells[(h / 2 + dy) % h][(w / 2 + dx) % w] = 1.0;
    }
    cells
}

fn create_device(config: &SimConfig) -> Result<Arc<dyn GpuDevice>> {
    match config.backend {
        Backend::Software => {
            let device = SoftwareDevice::new();
            sims::register_all_kernels(&device)?;
            Ok(Arc::new(device))
        }
        Backend::Wgpu => {
            let device = WgpuDevice::new(&config.wgpu_options())
                .context("failed to acquire a GPU device; try backend = \"software\"")?;
            Ok(Arc::new(device))
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) => SimConfig::load(&path).with_context(|| format!("loading {}", path))?,
        None => SimConfig::default(),
    };
    let ticks = match args.next() {
        Some(raw) => raw.parse::<u64>().with_context(|| format!("invalid tick count '{}'", raw))?,
        None => DEFAULT_TICKS,
    };

    let device = create_device(&config)?;
    log::info!(
        "[Runner] {}x{} life grid, {:?} mode, {} backend",
        config.grid_width,
        config.grid_height,
        config.life_mode,
        device.backend_name()
    );

    let settings = config.life_settings();
    let mut diagnostics = Diagnostics::new();
    let mut sim = life::build(
        device,
        &settings,
        seed(settings.width, settings.height),
        &mut diagnostics,
    )?;
    for warning in diagnostics.warnings() {
        log::warn!("[Runner] {}", warning.message);
    }

    let mut driver = TickDriver::new(config.target_tick_rate);
    let ran = driver.run(ticks, |index| {
        let report = sim.tick()?;
        let population = life::population(&sim)?;
        log::info!(
            "[Runner] tick {} ({} dispatches): population {}",
            index,
            report.dispatches,
            population
        );
        Ok(())
    })?;

    log::info!("[Runner] Finished {} ticks", ran);
    sim.teardown();
    Ok(())
}
