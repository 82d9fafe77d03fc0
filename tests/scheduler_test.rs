//! Workgroup derivation and plan validation against binding handles

use gpu_sim_engine::gpu::binder::{BindingHandle, ComputeProgram, PipelineBinder, Visibility};
use gpu_sim_engine::gpu::device::kernel::CpuKernel;
use gpu_sim_engine::gpu::device::software::SoftwareDevice;
use gpu_sim_engine::gpu::resources::{
    InitialContent, PixelFormat, ResourceAllocator, ResourceDescriptor, ResourceTable,
    ResourceTableInstance, TextureDesc,
};
use gpu_sim_engine::gpu::shader::{compile_program, Diagnostics, ProgramLibrary, ProgramSource};
use gpu_sim_engine::sim::{workgroups, PassPlan, Scheduler};
use gpu_sim_engine::SimError;

#[test]
fn test_workgroup_counts_cover_extent() {
    for tile in [1u32, 3, 7, 8, 16, 32, 64] {
        for extent in 1u32..=600 {
            let [count, y, z] = workgroups::for_extent(extent, 1, [tile, 1]).unwrap();
            assert!(count * tile >= extent, "{} / {}", extent, tile);
            assert!((count - 1) * tile < extent, "{} / {}", extent, tile);
            assert_eq!((y, z), (1, 1));
        }
    }
    assert_eq!(workgroups::for_extent(513, 513, [16, 16]).unwrap(), [33, 33, 1]);
    assert_eq!(workgroups::for_extent(512, 100, [16, 16]).unwrap(), [32, 7, 1]);

    let texture = TextureDesc::new(513, 64, PixelFormat::R32_FLOAT);
    assert_eq!(workgroups::for_texture(&texture, [16, 8]).unwrap(), [33, 8, 1]);
    assert_eq!(workgroups::for_records(129, 64).unwrap(), [3, 1, 1]);
    assert!(workgroups::for_extent(16, 16, [0, 8]).is_err());
}

const TALLY: &str = "#include <bindings>\n@compute @workgroup_size(1) fn tally() {}";

fn device() -> SoftwareDevice {
    let device = SoftwareDevice::new();
    device.register_kernel(
        "tally",
        CpuKernel::new([1, 1, 1], |inv| {
            let n = inv.read_u32(0, 0, 0)?;
            inv.write_u32(0, 0, 0, n + 1)
        }),
    );
    device
}

fn table() -> ResourceTable {
    ResourceTable::new("tally")
        .with(0, "counter", ResourceDescriptor::storage_bytes(16))
        .unwrap()
}

fn bound(device: &SoftwareDevice) -> (ResourceTableInstance, BindingHandle) {
    let instance = ResourceAllocator::allocate(&table(), device, &InitialContent::new()).unwrap();
    let handle = PipelineBinder::bind(&instance, &Visibility::compute(), device).unwrap();
    (instance, handle)
}

fn tally_program(device: &SoftwareDevice, handle: &BindingHandle) -> ComputeProgram {
    let library = ProgramLibrary::new().with("bindings", table().wgsl_bindings(0));
    let compiled = compile_program(
        device,
        &library,
        &ProgramSource::new("tally", TALLY),
        &mut Diagnostics::new(),
    )
    .unwrap();
    PipelineBinder::compute_program(device, &[handle], &compiled, "tally").unwrap()
}

fn counter(device: &SoftwareDevice, instance: &ResourceTableInstance) -> u32 {
    let bytes = instance.read_buffer(device, 0).unwrap();
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

#[test]
fn test_program_from_another_handle_is_foreign() {
    let device = device();
    let (first, first_handle) = bound(&device);
    let (second, second_handle) = bound(&device);
    let program = tally_program(&device, &first_handle);
    let plan = PassPlan::new("tally").dispatch("tally", &program, [1, 1, 1]);

    let err = Scheduler::new(plan.clone(), &[&second_handle]).unwrap_err();
    assert!(matches!(err, SimError::ForeignProgram { ref pass } if pass == "tally"));
    assert!(err.is_configuration());

    let mut scheduler = Scheduler::new(plan, &[&first_handle]).unwrap();
    assert!(scheduler.activate(&[&second_handle]).is_err());
    assert!(scheduler.is_active(&first_handle));
    assert!(!scheduler.is_active(&second_handle));

    scheduler.tick(&device).unwrap();
    assert_eq!(counter(&device, &first), 1);
    assert_eq!(counter(&device, &second), 0);
}

#[test]
fn test_repeat_dispatches_in_order() {
    let device = device();
    let (instance, handle) = bound(&device);
    let program = tally_program(&device, &handle);
    let plan = PassPlan::new("tally")
        .dispatch("first", &program, [1, 1, 1])
        .repeat(3, |body| body.dispatch("again", &program, [2, 1, 1]));
    assert_eq!(plan.dispatch_count(), 4);

    let mut scheduler = Scheduler::new(plan, &[&handle]).unwrap();
    let report = scheduler.tick(&device).unwrap();
    assert_eq!(report.dispatches, 4);
    assert_eq!(counter(&device, &instance), 7);
    scheduler.tick(&device).unwrap();
    assert_eq!(counter(&device, &instance), 14);
    assert_eq!(scheduler.ticks(), 2);
}
