//! The bundled programs expand and validate against their generated bindings

use gpu_sim_engine::gpu::layout::GpuStruct;
use gpu_sim_engine::gpu::shader::{Diagnostics, Preprocessor, ProgramLibrary, ProgramSource, ShaderValidator};
use gpu_sim_engine::sims::chain::{self, Link};
use gpu_sim_engine::sims::fluid::{self, FluidSettings};
use gpu_sim_engine::sims::life::{self, LifeMode, LifeSettings};

fn validate(library: &ProgramLibrary, source: &ProgramSource, entry_points: &[&str]) {
    let mut diagnostics = Diagnostics::new();
    let expanded = Preprocessor::new(library)
        .expand(source, &mut diagnostics)
        .unwrap();
    assert!(!expanded.contains("#include"));

    let mut validator = ShaderValidator::new();
    let module = match validator.validate_wgsl(&source.label, &expanded, &mut diagnostics) {
        Ok(module) => module,
        Err(e) => panic!("{}\n{}", e, expanded),
    };
    for name in entry_points {
        assert!(
            module.entry_points.iter().any(|ep| ep.name == *name),
            "{} missing from {}",
            name,
            source.label
        );
    }
    assert!(!diagnostics.has_warnings());
    assert_eq!(validator.validated_count(), 1);
}

#[test]
fn test_life_programs_validate() {
    let settings = LifeSettings::new(16, 16);
    let table = life::table(&settings).unwrap();
    validate(
        &life::library(&table),
        &life::program_source(LifeMode::DoubleBuffered),
        &["count_neighbors", "apply_rules"],
    );

    let settings = settings.with_mode(LifeMode::SingleBuffer);
    let table = life::table(&settings).unwrap();
    validate(
        &life::library(&table),
        &life::program_source(LifeMode::SingleBuffer),
        &["step_in_place"],
    );
}

#[test]
fn test_chain_program_validates() {
    let table = chain::table(8).unwrap();
    validate(&chain::library(&table), &chain::program_source(), &["relax_links"]);
}

#[test]
fn test_fluid_program_validates() {
    let table = fluid::table(&FluidSettings::new(32, 32)).unwrap();
    validate(
        &fluid::library(&table),
        &fluid::program_source(),
        &["advect", "compute_divergence", "jacobi", "project"],
    );
}

#[test]
fn test_generated_struct_matches_host_layout() {
    let table = chain::table(4).unwrap();
    let bindings = table.wgsl_bindings(0);
    assert!(bindings.contains("struct Link {"));
    assert!(bindings.contains("prev: u32,"));
    assert!(bindings.contains("@group(0) @binding(0) var<storage, read_write> links: array<Link>;"));
    assert!(bindings.contains("@group(0) @binding(1) var<uniform> params: ChainParams;"));
    assert_eq!(Link::NAME, "Link");
}
