//! Layout properties over every field-type combination

use gpu_sim_engine::gpu::layout::{ScalarKind, StructLayout, WgslType};

fn field_types() -> Vec<WgslType> {
    let mut types = Vec::new();
    for scalar in [ScalarKind::F32, ScalarKind::U32, ScalarKind::F16] {
        types.push(WgslType::scalar(scalar));
        for width in 2..=4 {
            types.push(WgslType::vec(scalar, width));
            types.push(WgslType::array(WgslType::vec(scalar, width), 3));
        }
        types.push(WgslType::array(WgslType::scalar(scalar), 5));
    }
    for scalar in [ScalarKind::F32, ScalarKind::F16] {
        for columns in 2..=4 {
            for rows in 2..=4 {
                types.push(WgslType::mat(scalar, columns, rows));
            }
        }
    }
    types
}

fn assert_well_formed(layout: &StructLayout) {
    let fields = layout.fields();
    for field in fields {
        assert_eq!(
            field.offset % field.alignment,
            0,
            "{} at {} is not {}-aligned",
            field.ty,
            field.offset,
            field.alignment
        );
        assert!(field.offset + field.size <= layout.size());
        assert!(layout.alignment() >= field.alignment);
    }
    for (i, a) in fields.iter().enumerate() {
        for b in &fields[i + 1..] {
            let disjoint = a.offset + a.size <= b.offset || b.offset + b.size <= a.offset;
            assert!(disjoint, "{} and {} overlap", a.ty, b.ty);
        }
    }
    assert_eq!(layout.size() % layout.alignment(), 0);
}

#[test]
fn test_every_pair_and_triple_is_well_formed() {
    let types = field_types();
    let mut checked = 0;
    for a in &types {
        for b in &types {
            let layout = StructLayout::compute(&[("a", a.clone()), ("b", b.clone())]).unwrap();
            assert_well_formed(&layout);
            checked += 1;
        }
    }
    // A scalar squeezed between two wider members exercises padding both ways.
    for a in &types {
        for c in &types {
            let layout = StructLayout::compute(&[
                ("a", a.clone()),
                ("b", WgslType::scalar(ScalarKind::F16)),
                ("c", c.clone()),
            ])
            .unwrap();
            assert_well_formed(&layout);
            checked += 1;
        }
    }
    assert!(checked > 1000);
}

#[test]
fn test_vec2_and_scalar_rounds_to_sixteen() {
    let layout = StructLayout::compute(&[
        ("position", WgslType::vec(ScalarKind::F32, 2)),
        ("size", WgslType::scalar(ScalarKind::F32)),
    ])
    .unwrap();
    assert_eq!(layout.offset_of("position").unwrap(), 0);
    assert_eq!(layout.offset_of("size").unwrap(), 8);
    assert_eq!(layout.alignment(), 8);
    assert_eq!(layout.size(), 16);
}

#[test]
fn test_camera_block_layout() {
    let layout = StructLayout::compute(&[
        ("worldMatrix", WgslType::mat(ScalarKind::F32, 4, 4)),
        ("cameraPos", WgslType::vec(ScalarKind::F32, 3)),
        ("time", WgslType::scalar(ScalarKind::F32)),
        ("lights", WgslType::array(WgslType::vec(ScalarKind::F32, 4), 4)),
    ])
    .unwrap();
    assert_eq!(layout.offset_of("worldMatrix").unwrap(), 0);
    assert_eq!(layout.offset_of("cameraPos").unwrap(), 64);
    assert_eq!(layout.offset_of("time").unwrap(), 76);
    assert_eq!(layout.offset_of("lights").unwrap(), 80);
    assert_eq!(layout.size(), 144);
    assert_eq!(layout.stride(), 144);
}

#[test]
fn test_parsed_types_match_constructed_ones() {
    let parsed = StructLayout::compute(&[
        ("m", WgslType::parse("mat3x3<f32>").unwrap()),
        ("v", WgslType::parse("vec3f").unwrap()),
        ("h", WgslType::parse("array<f16, 3>").unwrap()),
    ])
    .unwrap();
    let built = StructLayout::compute(&[
        ("m", WgslType::mat(ScalarKind::F32, 3, 3)),
        ("v", WgslType::vec(ScalarKind::F32, 3)),
        ("h", WgslType::array(WgslType::scalar(ScalarKind::F16), 3)),
    ])
    .unwrap();
    assert_eq!(parsed, built);
    assert_eq!(parsed.offset_of("v").unwrap(), 48);
    assert_well_formed(&parsed);
}

#[test]
fn test_invalid_shapes_are_rejected() {
    assert!(StructLayout::compute(&[("v", WgslType::vec(ScalarKind::F32, 5))]).is_err());
    assert!(StructLayout::compute(&[("m", WgslType::mat(ScalarKind::U32, 2, 2))]).is_err());
    assert!(StructLayout::compute(&[("a", WgslType::array(WgslType::scalar(ScalarKind::F32), 0))]).is_err());
    assert!(StructLayout::compute::<&str>(&[]).is_err());
}
