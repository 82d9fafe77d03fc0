//! Runs the neighbour count on a real adapter when one is available

use gpu_sim_engine::gpu::device::GpuDevice;
use gpu_sim_engine::gpu::shader::Diagnostics;
use gpu_sim_engine::gpu::{WgpuDevice, WgpuOptions};
use gpu_sim_engine::sims::life::{self, LifeSettings};
use gpu_sim_engine::SimError;
use std::sync::Arc;

fn init_gpu() -> Option<Arc<dyn GpuDevice>> {
    match WgpuDevice::new(&WgpuOptions::default()) {
        Ok(device) => Some(Arc::new(device)),
        Err(e) => {
            println!("Skipping GPU test: {}", e);
            None
        }
    }
}

#[test]
fn test_checkerboard_counts_on_gpu() {
    let Some(device) = init_gpu() else {
        return;
    };

    let mut sim = match life::build(
        device,
        &LifeSettings::new(4, 4),
        life::checkerboard(4, 4),
        &mut Diagnostics::new(),
    ) {
        Ok(sim) => sim,
        Err(SimError::MissingFeature { feature, .. }) => {
            println!("Skipping GPU test: adapter lacks {}", feature);
            return;
        }
        Err(e) => panic!("failed to build life on GPU: {}", e),
    };

    sim.tick().unwrap();
    let counts = life::read_neighbor_counts(&sim).unwrap();
    assert!(counts.iter().flatten().all(|n| *n == 4), "{:?}", counts);
    assert_eq!(life::population(&sim).unwrap(), 0);
    sim.teardown();
}

#[test]
fn test_read_back_zero_filled_texture_on_gpu() {
    let Some(device) = init_gpu() else {
        return;
    };
    let sim = match life::build(
        device,
        &LifeSettings::new(9, 7),
        vec![vec![0.0; 9]; 7],
        &mut Diagnostics::new(),
    ) {
        Ok(sim) => sim,
        Err(SimError::MissingFeature { .. }) => return,
        Err(e) => panic!("failed to build life on GPU: {}", e),
    };
    let bytes = sim
        .instance()
        .read_texture(sim.device(), life::NEXT_CELLS, 0)
        .unwrap();
    assert_eq!(bytes.len(), 9 * 7 * 4);
    assert!(bytes.iter().all(|b| *b == 0));
    sim.teardown();
}
