//! Resource table declaration, allocation and readback on the software device

use gpu_sim_engine::gpu::device::software::SoftwareDevice;
use gpu_sim_engine::gpu::layout::{ScalarKind, StructLayout, WgslType};
use gpu_sim_engine::gpu::resources::{
    InitialContent, PixelFormat, RecordData, ResourceAllocator, ResourceDescriptor, ResourceTable,
    StorageAccess, TextureContent, TextureDesc,
};
use gpu_sim_engine::{ErrorCategory, SimError};

const SEED: u32 = 0;
const SCRATCH: u32 = 1;
const HISTORY: u32 = 2;
const AGENTS: u32 = 3;

fn agent_layout() -> StructLayout {
    StructLayout::compute(&[
        ("position", WgslType::vec(ScalarKind::F32, 2)),
        ("energy", WgslType::scalar(ScalarKind::F32)),
    ])
    .unwrap()
}

fn table() -> ResourceTable {
    ResourceTable::new("world")
        .with(
            SEED,
            "seed",
            ResourceDescriptor::sampled_texture(TextureDesc::new(3, 2, PixelFormat::R32_FLOAT)),
        )
        .unwrap()
        .with(
            SCRATCH,
            "scratch",
            ResourceDescriptor::storage_texture(
                TextureDesc::new(5, 4, PixelFormat::RGBA32_FLOAT),
                StorageAccess::ReadWrite,
            ),
        )
        .unwrap()
        .with(
            HISTORY,
            "history",
            ResourceDescriptor::storage_texture(
                TextureDesc::new(4, 4, PixelFormat::R32_UINT).with_layers(3),
                StorageAccess::WriteOnly,
            ),
        )
        .unwrap()
        .with(AGENTS, "agents", ResourceDescriptor::records("Agent", agent_layout(), 3))
        .unwrap()
}

#[test]
fn test_allocated_slots_report_requested_shapes() {
    let device = SoftwareDevice::new();
    let table = table();
    let instance = ResourceAllocator::allocate(&table, &device, &InitialContent::new()).unwrap();

    for entry in table.textures() {
        let requested = entry.descriptor.texture().unwrap();
        let allocated = instance.texture(entry.slot).unwrap();
        assert_eq!(&allocated.desc, requested, "slot {}", entry.slot);
    }
    assert_eq!(instance.texture(HISTORY).unwrap().desc.layers, 3);
    assert_eq!(instance.buffer(AGENTS).unwrap().size, 3 * 16);
    assert!(matches!(
        instance.texture(AGENTS),
        Err(SimError::UnknownSlot { slot: AGENTS, .. })
    ));

    // Allocating the same declaration twice gives the same shapes but distinct resources.
    let again = ResourceAllocator::allocate(&table, &device, &InitialContent::new()).unwrap();
    assert_ne!(instance.id(), again.id());
    for entry in table.textures() {
        assert_eq!(
            instance.texture(entry.slot).unwrap().desc,
            again.texture(entry.slot).unwrap().desc
        );
        assert_ne!(
            instance.texture(entry.slot).unwrap().handle,
            again.texture(entry.slot).unwrap().handle
        );
    }

    instance.teardown(&device);
    again.teardown(&device);
    assert_eq!(device.live_resources(), (0, 0));
}

#[test]
fn test_slots_without_content_read_back_as_zero() {
    let device = SoftwareDevice::new();
    let content = InitialContent::new().texture(
        SEED,
        TextureContent::scalar_grid(vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]]),
    );
    let instance = ResourceAllocator::allocate(&table(), &device, &content).unwrap();

    let scratch = instance.read_texture(&device, SCRATCH, 0).unwrap();
    assert_eq!(scratch.len(), 5 * 4 * 16);
    assert!(scratch.iter().all(|b| *b == 0));
    for layer in 0..3 {
        assert!(instance.read_texture(&device, HISTORY, layer).unwrap().iter().all(|b| *b == 0));
    }
    assert!(instance.read_buffer(&device, AGENTS).unwrap().iter().all(|b| *b == 0));

    let seed = instance.read_texels(&device, SEED, 0).unwrap();
    assert_eq!(seed[1][2], vec![6.0]);
    assert_eq!(seed[0][0], vec![1.0]);
    instance.teardown(&device);
}

#[test]
fn test_record_data_is_packed_through_the_layout() {
    let device = SoftwareDevice::new();
    let data = RecordData::new()
        .field("position", vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0])
        .field("energy", vec![10.0, 20.0, 30.0]);
    let content = InitialContent::new().records(AGENTS, data.clone());
    let instance = ResourceAllocator::allocate(&table(), &device, &content).unwrap();

    let read = instance.read_record_data(&device, AGENTS).unwrap();
    assert_eq!(read, data);

    let bytes = instance.read_buffer(&device, AGENTS).unwrap();
    let energy = f32::from_le_bytes([bytes[24], bytes[25], bytes[26], bytes[27]]);
    assert_eq!(energy, 20.0);
    instance.teardown(&device);
}

#[test]
fn test_mismatched_initial_data_is_rejected() {
    let device = SoftwareDevice::new();

    let short_grid = InitialContent::new().texture(SEED, TextureContent::scalar_grid(vec![vec![1.0; 3]]));
    let err = ResourceAllocator::allocate(&table(), &device, &short_grid).unwrap_err();
    assert!(matches!(err, SimError::InitialDataShape { ref name, .. } if name == "seed"));
    assert_eq!(err.category(), ErrorCategory::Allocation);

    let short_records = InitialContent::new()
        .records(AGENTS, RecordData::new().field("energy", vec![1.0, 2.0]));
    assert!(matches!(
        ResourceAllocator::allocate(&table(), &device, &short_records),
        Err(SimError::InitialDataShape { .. })
    ));
    assert_eq!(device.live_resources(), (0, 0));
}

#[test]
fn test_table_declaration_errors() {
    let err = table()
        .with(
            SEED,
            "other",
            ResourceDescriptor::sampled_texture(TextureDesc::new(1, 1, PixelFormat::R32_FLOAT)),
        )
        .unwrap_err();
    assert!(matches!(err, SimError::SlotCollision { slot: SEED, .. }));
    assert!(err.is_configuration());

    let err = ResourceTable::new("empty")
        .with(
            0,
            "flat",
            ResourceDescriptor::sampled_texture(TextureDesc::new(0, 4, PixelFormat::R32_FLOAT)),
        )
        .unwrap_err();
    assert!(matches!(err, SimError::ZeroSized { .. }));

    let err = ResourceTable::new("pitched")
        .with(
            0,
            "pitched",
            ResourceDescriptor::sampled_texture(
                TextureDesc::new(4, 4, PixelFormat::R32_FLOAT).with_bytes_per_row(32),
            ),
        )
        .unwrap_err();
    assert!(matches!(err, SimError::MalformedDescriptor { .. }));
}

#[test]
fn test_half_precision_buffers_with_odd_sizes() {
    const PARAMS: u32 = 0;
    const SAMPLES: u32 = 1;
    const RAW: u32 = 2;

    let params = StructLayout::compute(&[("gain", WgslType::scalar(ScalarKind::F16))]).unwrap();
    let samples = StructLayout::compute(&[("h", WgslType::scalar(ScalarKind::F16))]).unwrap();
    assert_eq!(params.size(), 2);

    let table = ResourceTable::new("half")
        .with(PARAMS, "params", ResourceDescriptor::uniform("Gain", params))
        .unwrap()
        .with(SAMPLES, "samples", ResourceDescriptor::records("Sample", samples, 3))
        .unwrap()
        .with(RAW, "raw", ResourceDescriptor::storage_bytes(6))
        .unwrap();

    let device = SoftwareDevice::new();
    let content = InitialContent::new()
        .records(PARAMS, RecordData::new().field("gain", vec![0.25]))
        .records(SAMPLES, RecordData::new().field("h", vec![0.5, 1.5, -2.0]));
    let instance = ResourceAllocator::allocate(&table, &device, &content).unwrap();

    assert_eq!(instance.buffer(SAMPLES).unwrap().size, 6);
    let read = instance.read_record_data(&device, SAMPLES).unwrap();
    assert_eq!(read.values("h"), Some(&[0.5, 1.5, -2.0][..]));
    let gain = instance.read_record_data(&device, PARAMS).unwrap();
    assert_eq!(gain.values("gain"), Some(&[0.25][..]));

    let raw = instance.read_buffer(&device, RAW).unwrap();
    assert_eq!(raw, vec![0u8; 6]);

    instance.teardown(&device);
    assert_eq!(device.live_resources(), (0, 0));
}
