//! Stable-fluids style solver on a periodic grid
//!
//! One tick: advect velocity, compute its divergence, relax pressure with a
//! fixed number of Jacobi iterations, then subtract the pressure gradient.
//! Every pass writes a `*_next` texture that is copied back, so no pass reads
//! and writes the same resource.

use crate::error::SimResult;
use crate::gpu::binder::{PipelineBinder, Visibility};
use crate::gpu::device::kernel::{CpuKernel, Invocation};
use crate::gpu::device::GpuDevice;
use crate::gpu::layout::GpuStruct;
use crate::gpu::resources::{
    BufferContent, InitialContent, PixelFormat, ResourceAllocator, ResourceDescriptor,
    ResourceTable, StorageAccess, TexelRows, TextureContent, TextureDesc,
};
use crate::gpu::shader::{compile_program, Diagnostics, ProgramLibrary, ProgramSource};
use crate::sim::{workgroups, PassPlan, Simulation};
use std::sync::Arc;

pub const VELOCITY: u32 = 0;
pub const VELOCITY_NEXT: u32 = 1;
pub const PRESSURE: u32 = 2;
pub const PRESSURE_NEXT: u32 = 3;
pub const DIVERGENCE: u32 = 4;
pub const PARAMS: u32 = 5;

crate::gpu_struct! {
    pub struct FluidParams {
        pub size: [u32; 2],
        pub dt: f32,
        /// Velocity multiplier applied while advecting
        pub dissipation: f32,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FluidSettings {
    pub width: u32,
    pub height: u32,
    pub tile: [u32; 2],
    pub pressure_iterations: u32,
    pub dt: f32,
    pub dissipation: f32,
}

impl FluidSettings {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            tile: [8, 8],
            pressure_iterations: 20,
            dt: 1.0,
            dissipation: 1.0,
        }
    }
}

pub fn table(settings: &FluidSettings) -> SimResult<ResourceTable> {
    let velocity = TextureDesc::new(settings.width, settings.height, PixelFormat::RG32_FLOAT);
    let scalar = TextureDesc::new(settings.width, settings.height, PixelFormat::R32_FLOAT);

    ResourceTable::new("fluid")
        .with(VELOCITY, "velocity", ResourceDescriptor::sampled_texture(velocity.clone()))?
        .with(
            VELOCITY_NEXT,
            "velocity_next",
            ResourceDescriptor::storage_texture(velocity, StorageAccess::WriteOnly),
        )?
        .with(PRESSURE, "pressure", ResourceDescriptor::sampled_texture(scalar.clone()))?
        .with(
            PRESSURE_NEXT,
            "pressure_next",
            ResourceDescriptor::storage_texture(scalar.clone(), StorageAccess::WriteOnly),
        )?
        .with(
            DIVERGENCE,
            "divergence",
            ResourceDescriptor::storage_texture(scalar, StorageAccess::ReadWrite),
        )?
        .with(
            PARAMS,
            "params",
            ResourceDescriptor::uniform(FluidParams::NAME, FluidParams::layout()?),
        )
}

const FLUID_WGSL: &str = r#"
#include <fluid_bindings>

fn wrap(c: vec2<i32>) -> vec2<i32> {
    let s = vec2<i32>(params.size);
    return (c % s + s) % s;
}

fn in_bounds(id: vec3<u32>) -> bool {
    return id.x < params.size.x && id.y < params.size.y;
}

fn velocity_at(c: vec2<i32>) -> vec2<f32> {
    return textureLoad(velocity, wrap(c), 0).xy;
}

fn pressure_at(c: vec2<i32>) -> f32 {
    return textureLoad(pressure, wrap(c), 0).x;
}

fn sample_velocity(pos: vec2<f32>) -> vec2<f32> {
    let base = floor(pos);
    let f = pos - base;
    let c = vec2<i32>(base);
    let low = mix(velocity_at(c), velocity_at(c + vec2<i32>(1, 0)), vec2<f32>(f.x));
    let high = mix(velocity_at(c + vec2<i32>(0, 1)), velocity_at(c + vec2<i32>(1, 1)), vec2<f32>(f.x));
    return mix(low, high, vec2<f32>(f.y));
}

@compute @workgroup_size(8, 8)
fn advect(@builtin(global_invocation_id) id: vec3<u32>) {
    if (!in_bounds(id)) {
        return;
    }
    let p = vec2<i32>(id.xy);
    let back = vec2<f32>(p) - params.dt * velocity_at(p);
    let v = sample_velocity(back) * params.dissipation;
    textureStore(velocity_next, p, vec4<f32>(v, 0.0, 1.0));
}

@compute @workgroup_size(8, 8)
fn compute_divergence(@builtin(global_invocation_id) id: vec3<u32>) {
    if (!in_bounds(id)) {
        return;
    }
    let p = vec2<i32>(id.xy);
    let dx = velocity_at(p + vec2<i32>(1, 0)).x - velocity_at(p - vec2<i32>(1, 0)).x;
    let dy = velocity_at(p + vec2<i32>(0, 1)).y - velocity_at(p - vec2<i32>(0, 1)).y;
    textureStore(divergence, p, vec4<f32>(0.5 * (dx + dy), 0.0, 0.0, 1.0));
}

@compute @workgroup_size(8, 8)
fn jacobi(@builtin(global_invocation_id) id: vec3<u32>) {
    if (!in_bounds(id)) {
        return;
    }
    let p = vec2<i32>(id.xy);
    let sum = pressure_at(p + vec2<i32>(1, 0)) + pressure_at(p - vec2<i32>(1, 0))
        + pressure_at(p + vec2<i32>(0, 1)) + pressure_at(p - vec2<i32>(0, 1));
    let div = textureLoad(divergence, p).x;
    textureStore(pressure_next, p, vec4<f32>(0.25 * (sum - div), 0.0, 0.0, 1.0));
}

@compute @workgroup_size(8, 8)
fn project(@builtin(global_invocation_id) id: vec3<u32>) {
    if (!in_bounds(id)) {
        return;
    }
    let p = vec2<i32>(id.xy);
    let grad = 0.5 * vec2<f32>(
        pressure_at(p + vec2<i32>(1, 0)) - pressure_at(p - vec2<i32>(1, 0)),
        pressure_at(p + vec2<i32>(0, 1)) - pressure_at(p - vec2<i32>(0, 1))
    );
    textureStore(velocity_next, p, vec4<f32>(velocity_at(p) - grad, 0.0, 1.0));
}
"#;

pub fn library(table: &ResourceTable) -> ProgramLibrary {
    ProgramLibrary::new().with("fluid_bindings", table.wgsl_bindings(0))
}

pub fn program_source() -> ProgramSource {
    ProgramSource::new("fluid", FLUID_WGSL)
}

struct Cell {
    x: i32,
    y: i32,
    size: [i32; 2],
}

impl Cell {
    fn at(params: &FluidParams, id: [u32; 3]) -> Option<Self> {
        if id[0] >= params.size[0] || id[1] >= params.size[1] {
            return None;
        }
        Some(Self {
            x: id[0] as i32,
            y: id[1] as i32,
            size: [params.size[0] as i32, params.size[1] as i32],
        })
    }

    fn offset(&self, dx: i32, dy: i32) -> (i32, i32) {
        (
            (self.x + dx).rem_euclid(self.size[0]),
            (self.y + dy).rem_euclid(self.size[1]),
        )
    }

    fn load(&self, inv: &Invocation<'_>, binding: u32, dx: i32, dy: i32) -> SimResult<[f32; 4]> {
        let (x, y) = self.offset(dx, dy);
        inv.load(0, binding, x, y)
    }
}

fn sample_velocity(inv: &Invocation<'_>, size: [i32; 2], pos: [f32; 2]) -> SimResult<[f32; 2]> {
    let (bx, by) = (pos[0].floor(), pos[1].floor());
    let (fx, fy) = (pos[0] - bx, pos[1] - by);
    let at = |dx: i32, dy: i32| -> SimResult<[f32; 4]> {
        let x = (bx as i32 + dx).rem_euclid(size[0]);
        let y = (by as i32 + dy).rem_euclid(size[1]);
        inv.load(0, VELOCITY, x, y)
    };
    let (c00, c10, c01, c11) = (at(0, 0)?, at(1, 0)?, at(0, 1)?, at(1, 1)?);
    let mix = |a: f32, b: f32, t: f32| a + (b - a) * t;
    let mut out = [0.0; 2];
    for i in 0..2 {
        out[i] = mix(mix(c00[i], c10[i], fx), mix(c01[i], c11[i], fx), fy);
    }
    Ok(out)
}

pub fn kernels() -> SimResult<Vec<(&'static str, CpuKernel)>> {
    let layout = Arc::new(FluidParams::layout()?);

    let params_layout = Arc::clone(&layout);
    let advect = CpuKernel::new([8, 8, 1], move |inv| {
        let params: FluidParams = inv.read_record(0, PARAMS, &params_layout, 0)?;
        let Some(cell) = Cell::at(&params, inv.global_id) else {
            return Ok(());
        };
        let v = cell.load(inv, VELOCITY, 0, 0)?;
        let back = [
            cell.x as f32 - params.dt * v[0],
            cell.y as f32 - params.dt * v[1],
        ];
        let s = sample_velocity(inv, cell.size, back)?;
        let d = params.dissipation;
        inv.store(0, VELOCITY_NEXT, cell.x, cell.y, [s[0] * d, s[1] * d, 0.0, 1.0])
    });

    let params_layout = Arc::clone(&layout);
    let divergence = CpuKernel::new([8, 8, 1], move |inv| {
        let params: FluidParams = inv.read_record(0, PARAMS, &params_layout, 0)?;
        let Some(cell) = Cell::at(&params, inv.global_id) else {
            return Ok(());
        };
        let dx = cell.load(inv, VELOCITY, 1, 0)?[0] - cell.load(inv, VELOCITY, -1, 0)?[0];
        let dy = cell.load(inv, VELOCITY, 0, 1)?[1] - cell.load(inv, VELOCITY, 0, -1)?[1];
        inv.store(0, DIVERGENCE, cell.x, cell.y, [0.5 * (dx + dy), 0.0, 0.0, 1.0])
    });

    let params_layout = Arc::clone(&layout);
    let jacobi = CpuKernel::new([8, 8, 1], move |inv| {
        let params: FluidParams = inv.read_record(0, PARAMS, &params_layout, 0)?;
        let Some(cell) = Cell::at(&params, inv.global_id) else {
            return Ok(());
        };
        let mut sum = 0.0;
        for (dx, dy) in [(1, 0), (-1, 0), (0, 1), (0, -1)] {
            sum += cell.load(inv, PRESSURE, dx, dy)?[0];
        }
        let div = inv.load(0, DIVERGENCE, cell.x, cell.y)?[0];
        inv.store(0, PRESSURE_NEXT, cell.x, cell.y, [0.25 * (sum - div), 0.0, 0.0, 1.0])
    });

    let params_layout = layout;
    let project = CpuKernel::new([8, 8, 1], move |inv| {
        let params: FluidParams = inv.read_record(0, PARAMS, &params_layout, 0)?;
        let Some(cell) = Cell::at(&params, inv.global_id) else {
            return Ok(());
        };
        let gx = 0.5 * (cell.load(inv, PRESSURE, 1, 0)?[0] - cell.load(inv, PRESSURE, -1, 0)?[0]);
        let gy = 0.5 * (cell.load(inv, PRESSURE, 0, 1)?[0] - cell.load(inv, PRESSURE, 0, -1)?[0]);
        let v = cell.load(inv, VELOCITY, 0, 0)?;
        inv.store(0, VELOCITY_NEXT, cell.x, cell.y, [v[0] - gx, v[1] - gy, 0.0, 1.0])
    });

    Ok(vec![
        ("advect", advect),
        ("compute_divergence", divergence),
        ("jacobi", jacobi),
        ("project", project),
    ])
}

/// Build a solver seeded with `velocity` (`[row][column][u, v]`)
pub fn build(
    device: Arc<dyn GpuDevice>,
    settings: &FluidSettings,
    velocity: TexelRows,
    diagnostics: &mut Diagnostics,
) -> SimResult<Simulation> {
    let table = table(settings)?;
    let params = FluidParams {
        size: [settings.width, settings.height],
        dt: settings.dt,
        dissipation: settings.dissipation,
    };
    let initial = InitialContent::new()
        .texture(VELOCITY, TextureContent::Grid(velocity))
        .buffer(PARAMS, BufferContent::typed(&[params])?);
    let instance = ResourceAllocator::allocate(&table, device.as_ref(), &initial)?;

    let wired = (|| -> SimResult<_> {
        let handle = PipelineBinder::bind(&instance, &Visibility::compute(), device.as_ref())?;
        let program = compile_program(device.as_ref(), &library(&table), &program_source(), diagnostics)?;
        let pipeline = |entry: &str| {
            PipelineBinder::compute_program(device.as_ref(), &[&handle], &program, entry)
        };
        let advect = pipeline("advect")?;
        let divergence = pipeline("compute_divergence")?;
        let jacobi = pipeline("jacobi")?;
        let project = pipeline("project")?;

        let groups = workgroups::for_extent(settings.width, settings.height, settings.tile)?;
        let velocity = instance.texture(VELOCITY)?;
        let velocity_next = instance.texture(VELOCITY_NEXT)?;
        let pressure = instance.texture(PRESSURE)?;
        let pressure_next = instance.texture(PRESSURE_NEXT)?;

        let plan = PassPlan::new("fluid")
            .dispatch("advect", &advect, groups)
            .copy_texture("velocity_next -> velocity", velocity_next, velocity)
            .dispatch("compute_divergence", &divergence, groups)
            .repeat(settings.pressure_iterations, |body| {
                body.dispatch("jacobi", &jacobi, groups)
                    .copy_texture("pressure_next -> pressure", pressure_next, pressure)
            })
            .dispatch("project", &project, groups)
            .copy_texture("velocity_next -> velocity", velocity_next, velocity);
        Ok((handle, plan))
    })();

    match wired {
        Ok((handle, plan)) => Simulation::new("fluid", device, instance, vec![handle], plan, initial),
        Err(e) => {
            instance.teardown(device.as_ref());
            Err(e)
        }
    }
}

pub fn read_velocity(sim: &Simulation) -> SimResult<TexelRows> {
    sim.instance().read_texels(sim.device(), VELOCITY, 0)
}

/// Sum of absolute central-difference divergence over a periodic velocity grid
pub fn total_divergence(velocity: &TexelRows) -> f64 {
    let h = velocity.len();
    if h == 0 {
        return 0.0;
    }
    let w = velocity[0].len();
    let at = |x: usize, y: usize, c: usize| velocity[y % h][x % w][c];
    let mut total = 0.0;
    for y in 0..h {
        for x in 0..w {
            let dx = at(x + 1, y, 0) - at(x + w - 1, y, 0);
            let dy = at(x, y + 1, 1) - at(x, y + h - 1, 1);
            total += (0.5 * (dx + dy)).abs();
        }
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::device::software::SoftwareDevice;
    use std::f64::consts::TAU;

    fn software() -> Arc<dyn GpuDevice> {
        let device = SoftwareDevice::new();
        device.register_kernels(kernels().expect("kernels"));
        Arc::new(device)
    }

    fn compressive(size: u32) -> TexelRows {
        (0..size)
            .map(|_| {
                (0..size)
                    .map(|x| vec![(TAU * x as f64 / size as f64).sin(), 0.0])
                    .collect()
            })
            .collect()
    }

    #[test]
    fn test_dispatches_per_tick() {
        let mut settings = FluidSettings::new(8, 8);
        settings.pressure_iterations = 5;
        let mut sim = build(software(), &settings, compressive(8), &mut Diagnostics::new()).unwrap();
        assert_eq!(sim.scheduler().plan().dispatch_count(), 8);
        assert_eq!(sim.tick().unwrap().dispatches, 8);
    }

    #[test]
    fn test_projection_removes_divergence() {
        let mut settings = FluidSettings::new(8, 8);
        settings.dt = 0.0;
        let mut sim = build(software(), &settings, compressive(8), &mut Diagnostics::new()).unwrap();

        let before = total_divergence(&read_velocity(&sim).unwrap());
        assert!(before > 1.0);
        sim.tick().unwrap();
        let after = total_divergence(&read_velocity(&sim).unwrap());
        assert!(after < before * 0.5, "before {} after {}", before, after);
    }

    #[test]
    fn test_zero_dt_advection_is_identity() {
        let mut settings = FluidSettings::new(8, 8);
        settings.dt = 0.0;
        settings.pressure_iterations = 0;
        let field: TexelRows = (0..8)
            .map(|y| (0..8).map(|x| vec![x as f64 * 0.25, y as f64 * 0.5]).collect())
            .collect();
        let mut sim = build(software(), &settings, field.clone(), &mut Diagnostics::new()).unwrap();
        sim.tick().unwrap();
        // No pressure iterations: pressure stays zero and projection is a copy
        assert_eq!(read_velocity(&sim).unwrap(), field);
    }
}
