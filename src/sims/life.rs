//! Conway's Game of Life on a toroidal R32Float grid
//!
//! Two modes share the same table layout conventions:
//!
//! - [`LifeMode::DoubleBuffered`]: `count_neighbors` reads `cells` and writes
//!   `neighbors`, `apply_rules` writes `next_cells`, then `next_cells` is
//!   copied back into `cells`. Deterministic on every backend.
//! - [`LifeMode::SingleBuffer`]: one `step_in_place` dispatch reads and writes
//!   `cells` directly. Invocations see an arbitrary mix of old and new
//!   states, so results on a real GPU are nondeterministic. This mode is
//!   kept deliberately; the software backend runs it in a fixed order.

use crate::error::SimResult;
use crate::gpu::binder::{PipelineBinder, Visibility};
use crate::gpu::device::kernel::{CpuKernel, Invocation};
use crate::gpu::device::GpuDevice;
use crate::gpu::layout::{GpuStruct, StructLayout};
use crate::gpu::resources::{
    BufferContent, InitialContent, ResourceAllocator, ResourceDescriptor, ResourceTable,
    StorageAccess, TextureContent, TextureDesc, PixelFormat,
};
use crate::gpu::shader::{compile_program, Diagnostics, ProgramLibrary, ProgramSource};
use crate::sim::{workgroups, PassPlan, Simulation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const CELLS: u32 = 0;
pub const NEIGHBORS: u32 = 1;
pub const NEXT_CELLS: u32 = 2;
pub const PARAMS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifeMode {
    #[default]
    DoubleBuffered,
    SingleBuffer,
}

crate::gpu_struct! {
    pub struct LifeParams {
        pub size: [u32; 2],
        pub survive_min: u32,
        pub survive_max: u32,
        pub birth: u32,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LifeSettings {
    pub width: u32,
    pub height: u32,
    pub tile: [u32; 2],
    pub mode: LifeMode,
    /// Live cells with this many neighbours (inclusive) survive
    pub survive: [u32; 2],
    pub birth: u32,
}

impl LifeSettings {
    /// Standard B3/S23 rules
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            tile: [8, 8],
            mode: LifeMode::DoubleBuffered,
            survive: [2, 3],
            birth: 3,
        }
    }

    pub fn with_mode(mut self, mode: LifeMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_tile(mut self, tile: [u32; 2]) -> Self {
        self.tile = tile;
        self
    }

    fn params(&self) -> LifeParams {
        LifeParams {
            size: [self.width, self.height],
            survive_min: self.survive[0],
            survive_max: self.survive[1],
            birth: self.birth,
        }
    }
}

/// Resource table for `settings`
pub fn table(settings: &LifeSettings) -> SimResult<ResourceTable> {
    let grid = TextureDesc::new(settings.width, settings.height, PixelFormat::R32_FLOAT);
    let params = ResourceDescriptor::uniform(LifeParams::NAME, LifeParams::layout()?);

    match settings.mode {
        LifeMode::DoubleBuffered => ResourceTable::new("life")
            .with(CELLS, "cells", ResourceDescriptor::sampled_texture(grid.clone()))?
            .with(
                NEIGHBORS,
                "neighbors",
                ResourceDescriptor::storage_texture(grid.clone(), StorageAccess::ReadWrite),
            )?
            .with(
                NEXT_CELLS,
                "next_cells",
                ResourceDescriptor::storage_texture(grid, StorageAccess::WriteOnly),
            )?
            .with(PARAMS, "params", params),
        LifeMode::SingleBuffer => ResourceTable::new("life")
            .with(
                CELLS,
                "cells",
                ResourceDescriptor::storage_texture(grid, StorageAccess::ReadWrite),
            )?
            .with(PARAMS, "params", params),
    }
}

const COMMON_WGSL: &str = r#"
fn wrap(c: vec2<i32>) -> vec2<i32> {
    let size = vec2<i32>(params.size);
    return (c % size + size) % size;
}

fn in_bounds(id: vec3<u32>) -> bool {
    return id.x < params.size.x && id.y < params.size.y;
}

fn next_state(alive: bool, count: u32) -> f32 {
    if (alive && count >= params.survive_min && count <= params.survive_max) {
        return 1.0;
    }
    if (!alive && count == params.birth) {
        return 1.0;
    }
    return 0.0;
}
"#;

const DOUBLE_BUFFERED_WGSL: &str = r#"
#include <life_bindings>
#include <life_common>

fn alive_at(c: vec2<i32>) -> u32 {
    return select(0u, 1u, textureLoad(cells, wrap(c), 0).x > 0.5);
}

@compute @workgroup_size(8, 8)
fn count_neighbors(@builtin(global_invocation_id) id: vec3<u32>) {
    if (!in_bounds(id)) {
        return;
    }
    let p = vec2<i32>(id.xy);
    var count = 0u;
    for (var dy = -1; dy <= 1; dy = dy + 1) {
        for (var dx = -1; dx <= 1; dx = dx + 1) {
            if (dx != 0 || dy != 0) {
                count = count + alive_at(p + vec2<i32>(dx, dy));
            }
        }
    }
    textureStore(neighbors, p, vec4<f32>(f32(count), 0.0, 0.0, 1.0));
}

@compute @workgroup_size(8, 8)
fn apply_rules(@builtin(global_invocation_id) id: vec3<u32>) {
    if (!in_bounds(id)) {
        return;
    }
    let p = vec2<i32>(id.xy);
    let count = u32(textureLoad(neighbors, p).x);
    let alive = textureLoad(cells, p, 0).x > 0.5;
    textureStore(next_cells, p, vec4<f32>(next_state(alive, count), 0.0, 0.0, 1.0));
}
"#;

const SINGLE_BUFFER_WGSL: &str = r#"
#include <life_bindings>
#include <life_common>

fn alive_at(c: vec2<i32>) -> u32 {
    return select(0u, 1u, textureLoad(cells, wrap(c)).x > 0.5);
}

// Neighbours may already hold this tick's state.
@compute @workgroup_size(8, 8)
fn step_in_place(@builtin(global_invocation_id) id: vec3<u32>) {
    if (!in_bounds(id)) {
        return;
    }
    let p = vec2<i32>(id.xy);
    var count = 0u;
    for (var dy = -1; dy <= 1; dy = dy + 1) {
        for (var dx = -1; dx <= 1; dx = dx + 1) {
            if (dx != 0 || dy != 0) {
                count = count + alive_at(p + vec2<i32>(dx, dy));
            }
        }
    }
    let alive = textureLoad(cells, p).x > 0.5;
    textureStore(cells, p, vec4<f32>(next_state(alive, count), 0.0, 0.0, 1.0));
}
"#;

/// Include library for the life programs
pub fn library(table: &ResourceTable) -> ProgramLibrary {
    ProgramLibrary::new()
        .with("life_bindings", table.wgsl_bindings(0))
        .with("life_common", COMMON_WGSL)
}

pub fn program_source(mode: LifeMode) -> ProgramSource {
    match mode {
        LifeMode::DoubleBuffered => ProgramSource::new("life", DOUBLE_BUFFERED_WGSL),
        LifeMode::SingleBuffer => ProgramSource::new("life_in_place", SINGLE_BUFFER_WGSL),
    }
}

fn wrap(v: i64, size: u32) -> i32 {
    v.rem_euclid(size as i64) as i32
}

fn live_neighbors(inv: &Invocation<'_>, params: &LifeParams, x: u32, y: u32) -> SimResult<u32> {
    let mut count = 0;
    for dy in -1i64..=1 {
        for dx in -1i64..=1 {
            if dx == 0 && dy == 0 {
                continue;
            }
            let nx = wrap(x as i64 + dx, params.size[0]);
            let ny = wrap(y as i64 + dy, params.size[1]);
            if inv.load(0, CELLS, nx, ny)?[0] > 0.5 {
                count += 1;
            }
        }
    }
    Ok(count)
}

fn next_state(params: &LifeParams, alive: bool, count: u32) -> f32 {
    let survives = alive && (params.survive_min..=params.survive_max).contains(&count);
    let born = !alive && count == params.birth;
    if survives || born {
        1.0
    } else {
        0.0
    }
}

fn in_bounds(params: &LifeParams, id: [u32; 3]) -> bool {
    id[0] < params.size[0] && id[1] < params.size[1]
}

/// CPU twins of the life entry points
pub fn kernels() -> SimResult<Vec<(&'static str, CpuKernel)>> {
    let layout = Arc::new(LifeParams::layout()?);

    let count_layout = Arc::clone(&layout);
    let count = CpuKernel::new([8, 8, 1], move |inv| {
        let params: LifeParams = inv.read_record(0, PARAMS, &count_layout, 0)?;
        if !in_bounds(&params, inv.global_id) {
            return Ok(());
        }
        let [x, y, _] = inv.global_id;
        let n = live_neighbors(inv, &params, x, y)?;
        inv.store(0, NEIGHBORS, x as i32, y as i32, [n as f32, 0.0, 0.0, 1.0])
    });

    let rules_layout = Arc::clone(&layout);
    let rules = CpuKernel::new([8, 8, 1], move |inv| {
        let params: LifeParams = inv.read_record(0, PARAMS, &rules_layout, 0)?;
        if !in_bounds(&params, inv.global_id) {
            return Ok(());
        }
        let (x, y) = (inv.global_id[0] as i32, inv.global_id[1] as i32);
        let n = inv.load(0, NEIGHBORS, x, y)?[0] as u32;
        let alive = inv.load(0, CELLS, x, y)?[0] > 0.5;
        inv.store(0, NEXT_CELLS, x, y, [next_state(&params, alive, n), 0.0, 0.0, 1.0])
    });

    let step_layout = layout;
    let step = CpuKernel::new([8, 8, 1], move |inv| {
        let params: LifeParams = inv.read_record(0, PARAMS, &step_layout, 0)?;
        if !in_bounds(&params, inv.global_id) {
            return Ok(());
        }
        let [x, y, _] = inv.global_id;
        let n = live_neighbors(inv, &params, x, y)?;
        let alive = inv.load(0, CELLS, x as i32, y as i32)?[0] > 0.5;
        inv.store(0, CELLS, x as i32, y as i32, [next_state(&params, alive, n), 0.0, 0.0, 1.0])
    });

    Ok(vec![
        ("count_neighbors", count),
        ("apply_rules", rules),
        ("step_in_place", step),
    ])
}

/// Build a life simulation seeded with `cells` (`[row][column]`, 1.0 = alive)
pub fn build(
    device: Arc<dyn GpuDevice>,
    settings: &LifeSettings,
    cells: Vec<Vec<f64>>,
    diagnostics: &mut Diagnostics,
) -> SimResult<Simulation> {
    let table = table(settings)?;
    let initial = InitialContent::new()
        .texture(CELLS, TextureContent::scalar_grid(cells))
        .buffer(PARAMS, BufferContent::typed(&[settings.params()])?);
    let instance = ResourceAllocator::allocate(&table, device.as_ref(), &initial)?;

    let wired = (|| -> SimResult<_> {
        let handle = PipelineBinder::bind(&instance, &Visibility::compute(), device.as_ref())?;
        let program = compile_program(
            device.as_ref(),
            &library(&table),
            &program_source(settings.mode),
            diagnostics,
        )?;
        let groups = workgroups::for_extent(settings.width, settings.height, settings.tile)?;

        let plan = match settings.mode {
            LifeMode::DoubleBuffered => {
                let count = PipelineBinder::compute_program(
                    device.as_ref(),
                    &[&handle],
                    &program,
                    "count_neighbors",
                )?;
                let rules =
                    PipelineBinder::compute_program(device.as_ref(), &[&handle], &program, "apply_rules")?;
                PassPlan::new("life")
                    .dispatch("count_neighbors", &count, groups)
                    .dispatch("apply_rules", &rules, groups)
                    .copy_texture(
                        "next_cells -> cells",
                        instance.texture(NEXT_CELLS)?,
                        instance.texture(CELLS)?,
                    )
            }
            LifeMode::SingleBuffer => {
                let step = PipelineBinder::compute_program(
                    device.as_ref(),
                    &[&handle],
                    &program,
                    "step_in_place",
                )?;
                PassPlan::new("life_in_place").dispatch("step_in_place", &step, groups)
            }
        };
        Ok((handle, plan))
    })();

    let (handle, plan) = match wired {
        Ok(wired) => wired,
        Err(e) => {
            instance.teardown(device.as_ref());
            return Err(e);
        }
    };
    Simulation::new("life", device, instance, vec![handle], plan, initial)
}

/// Cell states as `[row][column]`
pub fn read_cells(sim: &Simulation) -> SimResult<Vec<Vec<bool>>> {
    let texels = sim.instance().read_texels(sim.device(), CELLS, 0)?;
    Ok(texels
        .into_iter()
        .map(|row| row.into_iter().map(|t| t[0] > 0.5).collect())
        .collect())
}

/// Neighbour counts from the last `count_neighbors` pass (double-buffered mode)
pub fn read_neighbor_counts(sim: &Simulation) -> SimResult<Vec<Vec<u32>>> {
    let texels = sim.instance().read_texels(sim.device(), NEIGHBORS, 0)?;
    Ok(texels
        .into_iter()
        .map(|row| row.into_iter().map(|t| t[0].round() as u32).collect())
        .collect())
}

pub fn population(sim: &Simulation) -> SimResult<usize> {
    Ok(read_cells(sim)?.iter().flatten().filter(|alive| **alive).count())
}

/// `[row][column]` checkerboard with (0, 0) alive
pub fn checkerboard(width: u32, height: u32) -> Vec<Vec<f64>> {
    (0..height)
        .map(|y| {
            (0..width)
                .map(|x| if (x + y) % 2 == 0 { 1.0 } else { 0.0 })
                .collect()
        })
        .collect()
}

/// Layout of the uniform block, for callers writing params by hand
pub fn params_layout() -> SimResult<StructLayout> {
    LifeParams::layout()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::device::software::SoftwareDevice;

    fn software() -> Arc<dyn GpuDevice> {
        let device = SoftwareDevice::new();
        device.register_kernels(kernels().expect("kernels"));
        Arc::new(device)
    }

    #[test]
    fn test_params_layout() {
        let layout = params_layout().unwrap();
        assert_eq!(layout.offset_of("size").unwrap(), 0);
        assert_eq!(layout.offset_of("birth").unwrap(), 16);
        assert_eq!(layout.size(), 24);
    }

    #[test]
    fn test_blinker_oscillates() {
        let mut cells = vec![vec![0.0; 5]; 5];
        for x in 1..4 {
            cells[2][x] = 1.0;
        }
        let mut sim = build(
            software(),
            &LifeSettings::new(5, 5).with_tile([4, 4]),
            cells,
            &mut Diagnostics::new(),
        )
        .unwrap();

        sim.tick().unwrap();
        let state = read_cells(&sim).unwrap();
        assert!(state[1][2] && state[2][2] && state[3][2]);
        assert!(!state[2][1] && !state[2][3]);
        assert_eq!(population(&sim).unwrap(), 3);

        sim.tick().unwrap();
        let state = read_cells(&sim).unwrap();
        assert!(state[2][1] && state[2][2] && state[2][3]);
    }

    #[test]
    fn test_single_buffer_mode_runs_one_dispatch() {
        let mut sim = build(
            software(),
            &LifeSettings::new(6, 6).with_mode(LifeMode::SingleBuffer),
            checkerboard(6, 6),
            &mut Diagnostics::new(),
        )
        .unwrap();
        assert_eq!(sim.scheduler().plan().dispatch_count(), 1);
        let report = sim.tick().unwrap();
        assert_eq!(report.dispatches, 1);
        assert!(sim.instance().table().get(NEXT_CELLS).is_none());
    }

    #[test]
    fn test_single_buffer_step_updates_cells_in_place() {
        // A block is stable in any update order; the lone cell at (4, 4) dies
        let mut cells = vec![vec![0.0; 6]; 6];
        for (x, y) in [(1, 1), (2, 1), (1, 2), (2, 2), (4, 4)] {
            cells[y][x] = 1.0;
        }
        let mut sim = build(
            software(),
            &LifeSettings::new(6, 6).with_mode(LifeMode::SingleBuffer),
            cells,
            &mut Diagnostics::new(),
        )
        .unwrap();
        assert_eq!(population(&sim).unwrap(), 5);

        sim.tick().unwrap();
        let state = read_cells(&sim).unwrap();
        assert!(state[1][1] && state[1][2] && state[2][1] && state[2][2]);
        assert!(!state[4][4]);
        assert_eq!(population(&sim).unwrap(), 4);

        sim.tick().unwrap();
        assert_eq!(population(&sim).unwrap(), 4);
    }

    #[test]
    fn test_reset_restores_seed() {
        let mut sim = build(
            software(),
            &LifeSettings::new(4, 4),
            checkerboard(4, 4),
            &mut Diagnostics::new(),
        )
        .unwrap();
        sim.tick().unwrap();
        assert_eq!(population(&sim).unwrap(), 0);
        sim.reset().unwrap();
        assert_eq!(population(&sim).unwrap(), 8);
    }
}
