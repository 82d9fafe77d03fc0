//! Chain relaxation with two-colour phases
//!
//! Each link pulls itself towards the rest distance of its neighbours. Links
//! carry a colour (0 or 1) such that neighbours never share one; the relax
//! program runs once per colour, so a link is only ever written while its
//! neighbours are read-only.

use crate::error::{malformed, SimError, SimResult};
use crate::gpu::binder::{PipelineBinder, Visibility};
use crate::gpu::device::kernel::CpuKernel;
use crate::gpu::device::GpuDevice;
use crate::gpu::layout::{GpuStruct, NeighborIndex};
use crate::gpu::resources::{
    BufferContent, InitialContent, ResourceAllocator, ResourceDescriptor, ResourceTable,
};
use crate::gpu::shader::{compile_program, Diagnostics, ProgramLibrary, ProgramSource};
use crate::sim::{workgroups, PassPlan, PhaseSelector, Simulation};
use std::f32::consts::TAU;
use std::sync::Arc;

pub const LINKS: u32 = 0;
pub const PARAMS: u32 = 1;

crate::gpu_struct! {
    /// One element of a chain or ring
    pub struct Link {
        pub position: [f32; 2],
        /// Rest distance to `next`
        pub rest_length: f32,
        pub color: u32,
        pub prev: NeighborIndex,
        pub next: NeighborIndex,
        /// Times the relax program updated this link
        pub visits: u32,
        pub last_phase: u32,
    }
}

crate::gpu_struct! {
    pub struct ChainParams {
        pub phase: u32,
        pub count: u32,
        pub stiffness: f32,
    }
}

impl Link {
    pub fn new(position: [f32; 2], rest_length: f32, color: u32) -> Self {
        Self {
            position,
            rest_length,
            color,
            prev: NeighborIndex::none(),
            next: NeighborIndex::none(),
            visits: 0,
            last_phase: 0,
        }
    }

    /// A link with neither neighbour
    pub fn is_disconnected(&self) -> bool {
        self.prev.is_absent() && self.next.is_absent()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChainSettings {
    /// Links per workgroup
    pub batch: u32,
    pub stiffness: f32,
}

impl Default for ChainSettings {
    fn default() -> Self {
        Self {
            batch: 64,
            stiffness: 1.0,
        }
    }
}

/// `count` links evenly spaced on a circle, alternately coloured.
///
/// Only even rings can be two-coloured.
pub fn ring(count: u32, radius: f32) -> SimResult<Vec<Link>> {
    if count < 2 || count % 2 != 0 {
        return Err(SimError::Config(format!(
            "a ring of {} links cannot be two-coloured",
            count
        )));
    }
    let chord = 2.0 * radius * (TAU / (2.0 * count as f32)).sin();
    Ok((0..count)
        .map(|i| {
            let angle = TAU * i as f32 / count as f32;
            let mut link = Link::new([radius * angle.cos(), radius * angle.sin()], chord, i % 2);
            link.prev = NeighborIndex::some((i + count - 1) % count);
            link.next = NeighborIndex::some((i + 1) % count);
            link
        })
        .collect())
}

/// An open chain along the x axis with the given spacing and rest length
pub fn open_chain(count: u32, spacing: f32, rest_length: f32) -> Vec<Link> {
    (0..count)
        .map(|i| {
            let mut link = Link::new([i as f32 * spacing, 0.0], rest_length, i % 2);
            if i > 0 {
                link.prev = NeighborIndex::some(i - 1);
            }
            if i + 1 < count {
                link.next = NeighborIndex::some(i + 1);
            }
            link
        })
        .collect()
}

/// Check neighbour indices are in range and neighbours never share a colour
pub fn validate_coloring(links: &[Link]) -> SimResult<()> {
    for (i, link) in links.iter().enumerate() {
        if link.color > 1 {
            return Err(malformed(
                "links",
                format!("link {} has colour {}, expected 0 or 1", i, link.color),
            ));
        }
        for neighbor in [link.prev, link.next].into_iter().filter_map(NeighborIndex::get) {
            let other = links.get(neighbor as usize).ok_or_else(|| {
                malformed("links", format!("link {} points at missing link {}", i, neighbor))
            })?;
            if other.color == link.color {
                return Err(malformed(
                    "links",
                    format!("links {} and {} are neighbours with colour {}", i, neighbor, link.color),
                ));
            }
        }
    }
    Ok(())
}

pub fn table(count: u32) -> SimResult<ResourceTable> {
    ResourceTable::new("chain")
        .with(
            LINKS,
            "links",
            ResourceDescriptor::records(Link::NAME, Link::layout()?, count as u64),
        )?
        .with(
            PARAMS,
            "params",
            ResourceDescriptor::uniform(ChainParams::NAME, ChainParams::layout()?),
        )
}

const RELAX_WGSL: &str = r#"
#include <chain_bindings>

const ABSENT: u32 = 0xffffffffu;

fn pull(p: vec2<f32>, other: vec2<f32>, rest: f32) -> vec2<f32> {
    let d = p - other;
    let len = length(d);
    if (len <= 0.0) {
        return vec2<f32>(0.0, 0.0);
    }
    return d * ((len - rest) / len) * 0.5 * params.stiffness;
}

@compute @workgroup_size(64)
fn relax_links(@builtin(global_invocation_id) id: vec3<u32>) {
    let i = id.x;
    if (i >= params.count) {
        return;
    }
    let link = links[i];
    if (link.color != params.phase) {
        return;
    }
    var p = link.position;
    if (link.prev != ABSENT) {
        let before = links[link.prev];
        p = p - pull(link.position, before.position, before.rest_length);
    }
    if (link.next != ABSENT) {
        let after = links[link.next];
        p = p - pull(link.position, after.position, link.rest_length);
    }
    links[i].position = p;
    links[i].visits = link.visits + 1u;
    links[i].last_phase = params.phase;
}
"#;

pub fn library(table: &ResourceTable) -> ProgramLibrary {
    ProgramLibrary::new().with("chain_bindings", table.wgsl_bindings(0))
}

pub fn program_source() -> ProgramSource {
    ProgramSource::new("chain", RELAX_WGSL)
}

fn pull(p: [f32; 2], other: [f32; 2], rest: f32, stiffness: f32) -> [f32; 2] {
    let d = [p[0] - other[0], p[1] - other[1]];
    let len = (d[0] * d[0] + d[1] * d[1]).sqrt();
    if len <= 0.0 {
        return [0.0, 0.0];
    }
    let k = (len - rest) / len * 0.5 * stiffness;
    [d[0] * k, d[1] * k]
}

pub fn kernels() -> SimResult<Vec<(&'static str, CpuKernel)>> {
    let link_layout = Link::layout()?;
    let params_layout = ChainParams::layout()?;

    let relax = CpuKernel::new([64, 1, 1], move |inv| {
        let params: ChainParams = inv.read_record(0, PARAMS, &params_layout, 0)?;
        let i = inv.global_id[0];
        if i >= params.count {
            return Ok(());
        }
        let link: Link = inv.read_record(0, LINKS, &link_layout, i)?;
        if link.color != params.phase {
            return Ok(());
        }

        let mut p = link.position;
        if let Some(prev) = link.prev.get() {
            let before: Link = inv.read_record(0, LINKS, &link_layout, prev)?;
            let c = pull(link.position, before.position, before.rest_length, params.stiffness);
            p = [p[0] - c[0], p[1] - c[1]];
        }
        if let Some(next) = link.next.get() {
            let after: Link = inv.read_record(0, LINKS, &link_layout, next)?;
            let c = pull(link.position, after.position, link.rest_length, params.stiffness);
            p = [p[0] - c[0], p[1] - c[1]];
        }

        inv.write_field(0, LINKS, &link_layout, i, Link::position, p)?;
        inv.write_field(0, LINKS, &link_layout, i, Link::visits, link.visits + 1)?;
        inv.write_field(0, LINKS, &link_layout, i, Link::last_phase, params.phase)
    });

    Ok(vec![("relax_links", relax)])
}

/// Build a two-phase relaxation over `links`
pub fn build(
    device: Arc<dyn GpuDevice>,
    links: &[Link],
    settings: &ChainSettings,
    diagnostics: &mut Diagnostics,
) -> SimResult<Simulation> {
    validate_coloring(links)?;
    let count = links.len() as u32;
    let table = table(count)?;
    let params = ChainParams {
        phase: 0,
        count,
        stiffness: settings.stiffness,
    };
    let initial = InitialContent::new()
        .buffer(LINKS, BufferContent::typed(links)?)
        .buffer(PARAMS, BufferContent::typed(&[params])?);
    let instance = ResourceAllocator::allocate(&table, device.as_ref(), &initial)?;

    let wired = (|| -> SimResult<_> {
        let handle = PipelineBinder::bind(&instance, &Visibility::compute(), device.as_ref())?;
        let program = compile_program(device.as_ref(), &library(&table), &program_source(), diagnostics)?;
        let relax = PipelineBinder::compute_program(device.as_ref(), &[&handle], &program, "relax_links")?;
        let plan = PassPlan::new("chain").two_phase(
            "relax_links",
            &relax,
            workgroups::for_records(count, settings.batch)?,
            PhaseSelector::resolve(&instance, PARAMS, "phase")?,
        );
        Ok((handle, plan))
    })();

    match wired {
        Ok((handle, plan)) => Simulation::new("chain", device, instance, vec![handle], plan, initial),
        Err(e) => {
            instance.teardown(device.as_ref());
            Err(e)
        }
    }
}

pub fn read_links(sim: &Simulation) -> SimResult<Vec<Link>> {
    sim.instance().read_records(sim.device(), LINKS)
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
    fn test_link_layout() {
        let layout = Link::layout().unwrap();
        assert_eq!(layout.offset_of("rest_length").unwrap(), 8);
        assert_eq!(layout.offset_of("prev").unwrap(), 16);
        assert_eq!(layout.offset_of("last_phase").unwrap(), 28);
        assert_eq!(layout.size(), 32);
    }

    #[test]
    fn test_ring_coloring() {
        assert!(validate_coloring(&ring(8, 1.0).unwrap()).is_ok());
        assert!(matches!(ring(7, 1.0), Err(SimError::Config(_))));

        let mut links = ring(4, 1.0).unwrap();
        links[1].color = 0;
        assert!(validate_coloring(&links).is_err());

        let mut links = open_chain(3, 1.0, 1.0);
        links[2].next = NeighborIndex::some(9);
        assert!(validate_coloring(&links).is_err());
    }

    #[test]
    fn test_open_chain_ends() {
        let links = open_chain(3, 1.0, 1.0);
        assert!(links[0].prev.is_absent());
        assert_eq!(links[0].next.get(), Some(1));
        assert!(links[2].next.is_absent());
        assert!(!links[1].is_disconnected());
        assert!(Link::new([0.0, 0.0], 1.0, 0).is_disconnected());
    }

    #[test]
    fn test_stretched_chain_relaxes_to_rest_length() {
        let mut sim = build(
            software(),
            &open_chain(3, 2.0, 1.0),
            &ChainSettings::default(),
            &mut Diagnostics::new(),
        )
        .unwrap();
        for _ in 0..50 {
            sim.tick().unwrap();
        }
        let links = read_links(&sim).unwrap();
        for pair in links.windows(2) {
            let d = pair[1].position[0] - pair[0].position[0];
            assert!((d - 1.0).abs() < 1e-3, "distance {}", d);
        }
        assert!((links[1].position[0] - 2.0).abs() < 1e-4);
    }
}
