//! Initial content for allocated resources
//!
//! Textures are described as nested `[row][column][channel]` arrays, record
//! buffers as one flat array per field. Everything is validated and packed to
//! bytes before any device call is made.

use crate::error::{shape_error, SimError, SimResult};
use crate::gpu::layout::{encode_records, GpuStruct, StructLayout};
use crate::gpu::resources::descriptor::{BufferSize, TextureDesc};
use std::collections::BTreeMap;

/// `[row][column][channel]`
pub type TexelRows = Vec<Vec<Vec<f64>>>;

#[derive(Debug, Clone, PartialEq)]
pub enum TextureContent {
    /// Explicitly zero-filled
    Zeroed,
    /// Single layer
    Grid(TexelRows),
    /// One grid per array layer
    Layers(Vec<TexelRows>),
    /// Tightly packed bytes, all layers
    Bytes(Vec<u8>),
}

impl TextureContent {
    /// Single-channel grid from `[row][column]` values
    pub fn scalar_grid(rows: Vec<Vec<f64>>) -> Self {
        TextureContent::Grid(
            rows.into_iter()
                .map(|row| row.into_iter().map(|v| vec![v]).collect())
                .collect(),
        )
    }

    /// Pack to bytes matching `desc` exactly
    pub fn pack(&self, name: &str, desc: &TextureDesc) -> SimResult<Vec<u8>> {
        match self {
            TextureContent::Zeroed => Ok(vec![0u8; desc.total_bytes() as usize]),
            TextureContent::Grid(rows) => {
                if desc.layers != 1 {
                    return Err(shape_error(
                        name,
                        format!("single grid given for {} layers", desc.layers),
                    ));
                }
                let mut out = Vec::with_capacity(desc.total_bytes() as usize);
                pack_layer(name, desc, rows, &mut out)?;
                Ok(out)
            }
            TextureContent::Layers(layers) => {
                if layers.len() != desc.layers as usize {
                    return Err(shape_error(
                        name,
                        format!("{} layers given, {} declared", layers.len(), desc.layers),
                    ));
                }
                let mut out = Vec::with_capacity(desc.total_bytes() as usize);
                for rows in layers {
                    pack_layer(name, desc, rows, &mut out)?;
                }
                Ok(out)
            }
            TextureContent::Bytes(bytes) => {
                if bytes.len() as u64 != desc.total_bytes() {
                    return Err(shape_error(
                        name,
                        format!("{} bytes given, {} expected", bytes.len(), desc.total_bytes()),
                    ));
                }
                Ok(bytes.clone())
            }
        }
    }
}

fn pack_layer(name: &str, desc: &TextureDesc, rows: &TexelRows, out: &mut Vec<u8>) -> SimResult<()> {
    if rows.len() != desc.height as usize {
        return Err(shape_error(
            name,
            format!("{} rows given, height is {}", rows.len(), desc.height),
        ));
    }
    let texel_bytes = desc.format.bytes_per_texel() as usize;
    let mut texel = vec![0u8; texel_bytes];
    for (y, row) in rows.iter().enumerate() {
        if row.len() != desc.width as usize {
            return Err(shape_error(
                name,
                format!("row {} has {} columns, width is {}", y, row.len(), desc.width),
            ));
        }
        for (x, channels) in row.iter().enumerate() {
            if channels.len() != desc.format.channels as usize {
                return Err(shape_error(
                    name,
                    format!(
                        "texel ({}, {}) has {} channels, format has {}",
                        x,
                        y,
                        channels.len(),
                        desc.format.channels
                    ),
                ));
            }
            desc.format.encode_texel(channels, &mut texel);
            out.extend_from_slice(&texel);
        }
    }
    Ok(())
}

/// Decode one tightly packed layer back into `[row][column][channel]`
pub fn unpack_layer(desc: &TextureDesc, bytes: &[u8]) -> TexelRows {
    let texel_bytes = desc.format.bytes_per_texel() as usize;
    bytes
        .chunks_exact(desc.row_bytes() as usize)
        .take(desc.height as usize)
        .map(|row| {
            row.chunks_exact(texel_bytes)
                .map(|texel| desc.format.decode_texel(texel))
                .collect()
        })
        .collect()
}

/// Per-field flat arrays for a record buffer.
///
/// Each field's array holds `count x components` values; a `vec2<f32>` field of
/// three records is six numbers. Fields left out are zero.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordData {
    fields: BTreeMap<String, Vec<f64>>,
}

impl RecordData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: impl Into<String>, values: Vec<f64>) -> Self {
        self.fields.insert(name.into(), values);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, values: Vec<f64>) {
        self.fields.insert(name.into(), values);
    }

    pub fn values(&self, name: &str) -> Option<&[f64]> {
        self.fields.get(name).map(Vec::as_slice)
    }

    pub fn pack(&self, name: &str, layout: &StructLayout, count: u64) -> SimResult<Vec<u8>> {
        let stride = layout.stride() as usize;
        let mut out = layout.default_records(count);

        for (field_name, values) in &self.fields {
            let field = layout.field(field_name).ok_or_else(|| SimError::InvalidField {
                field: field_name.clone(),
                reason: format!("not a field of the records in '{}'", name),
            })?;
            let components = field.ty.components();
            let expected = components.len() * count as usize;
            if values.len() != expected {
                return Err(shape_error(
                    name,
                    format!(
                        "field '{}' has {} values, expected {} ({} records x {} components)",
                        field_name,
                        values.len(),
                        expected,
                        count,
                        components.len()
                    ),
                ));
            }

            for record in 0..count as usize {
                let base = record * stride + field.offset as usize;
                for (c, (offset, kind)) in components.iter().enumerate() {
                    let value = values[record * components.len() + c];
                    kind.encode(value, &mut out[base + *offset as usize..]);
                }
            }
        }
        Ok(out)
    }

    /// Inverse of [`pack`](Self::pack) for every field in `layout`
    pub fn unpack(layout: &StructLayout, bytes: &[u8]) -> Self {
        let stride = layout.stride() as usize;
        let count = if stride == 0 { 0 } else { bytes.len() / stride };
        let mut data = RecordData::new();
        for field in layout.fields() {
            let components = field.ty.components();
            let mut values = Vec::with_capacity(components.len() * count);
            for record in 0..count {
                let base = record * stride + field.offset as usize;
                for (offset, kind) in &components {
                    values.push(kind.decode(&bytes[base + *offset as usize..]));
                }
            }
            data.set(field.name.clone(), values);
        }
        data
    }
}

/// Initial content for a buffer slot
#[derive(Debug, Clone, PartialEq)]
pub enum BufferContent {
    /// Default records for struct-typed buffers, zeros for raw bytes
    Zeroed,
    Bytes(Vec<u8>),
    Records(RecordData),
}

impl BufferContent {
    /// Encode typed records with their generated layout
    pub fn typed<T: GpuStruct>(records: &[T]) -> SimResult<Self> {
        Ok(BufferContent::Bytes(encode_records(records)?))
    }

    pub fn pack(&self, name: &str, size: &BufferSize) -> SimResult<Vec<u8>> {
        let expected = size.byte_size();
        match self {
            BufferContent::Zeroed => Ok(match size {
                BufferSize::Records { layout, count, .. } => layout.default_records(*count),
                BufferSize::Struct { layout, .. } => layout.default_records(1),
                BufferSize::Bytes(_) => vec![0u8; expected as usize],
            }),
            BufferContent::Bytes(bytes) => {
                if bytes.len() as u64 != expected {
                    return Err(shape_error(
                        name,
                        format!("{} bytes given, {} expected", bytes.len(), expected),
                    ));
                }
                Ok(bytes.clone())
            }
            BufferContent::Records(data) => match size {
                BufferSize::Records { layout, count, .. } => data.pack(name, layout, *count),
                BufferSize::Struct { layout, .. } => data.pack(name, layout, 1),
                BufferSize::Bytes(_) => Err(shape_error(
                    name,
                    "record data given for an untyped buffer",
                )),
            },
        }
    }
}

/// Initial content keyed by slot; slots not mentioned get [`BufferContent::Zeroed`] or zeroed texels
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InitialContent {
    textures: BTreeMap<u32, TextureContent>,
    buffers: BTreeMap<u32, BufferContent>,
}

impl InitialContent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn texture(mut self, slot: u32, content: TextureContent) -> Self {
        self.textures.insert(slot, content);
        self
    }

    pub fn buffer(mut self, slot: u32, content: BufferContent) -> Self {
        self.buffers.insert(slot, content);
        self
    }

    pub fn records(self, slot: u32, data: RecordData) -> Self {
        self.buffer(slot, BufferContent::Records(data))
    }

    pub fn texture_for(&self, slot: u32) -> Option<&TextureContent> {
        self.textures.get(&slot)
    }

    pub fn buffer_for(&self, slot: u32) -> Option<&BufferContent> {
        self.buffers.get(&slot)
    }

    /// Slots that have content
    pub fn slots(&self) -> impl Iterator<Item = u32> + '_ {
        self.textures.keys().chain(self.buffers.keys()).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::layout::{ScalarKind, WgslType};
    use crate::gpu::resources::pixel_format::PixelFormat;

    #[test]
    fn test_grid_shape_checks() {
        let desc = TextureDesc::new(2, 2, PixelFormat::R32_FLOAT);
        let ok = TextureContent::scalar_grid(vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
        let bytes = ok.pack("grid", &desc).expect("pack");
        assert_eq!(bytes.len(), 16);
        assert_eq!(&bytes[12..16], &1.0f32.to_le_bytes());

        let short = TextureContent::scalar_grid(vec![vec![1.0, 0.0]]);
        assert!(matches!(
            short.pack("grid", &desc),
            Err(SimError::InitialDataShape { .. })
        ));

        let wide = TextureContent::Grid(vec![vec![vec![1.0, 2.0]; 2]; 2]);
        assert!(wide.pack("grid", &desc).is_err());
    }

    #[test]
    fn test_unpack_layer() {
        let desc = TextureDesc::new(2, 1, PixelFormat::RG32_FLOAT);
        let content = TextureContent::Grid(vec![vec![vec![1.0, 2.0], vec![3.0, 4.0]]]);
        let bytes = content.pack("v", &desc).expect("pack");
        let rows = unpack_layer(&desc, &bytes);
        assert_eq!(rows, vec![vec![vec![1.0, 2.0], vec![3.0, 4.0]]]);
    }

    #[test]
    fn test_record_data() {
        let layout = StructLayout::compute(&[
            ("position", WgslType::vec(ScalarKind::F32, 2)),
            ("size", WgslType::scalar(ScalarKind::F32)),
        ])
        .expect("layout");

        let data = RecordData::new()
            .field("position", vec![1.0, 2.0, 3.0, 4.0])
            .field("size", vec![5.0, 6.0]);
        let bytes = data.pack("particles", &layout, 2).expect("pack");
        assert_eq!(bytes.len(), 32);
        assert_eq!(&bytes[16..20], &3.0f32.to_le_bytes());
        assert_eq!(&bytes[24..28], &6.0f32.to_le_bytes());
        assert_eq!(RecordData::unpack(&layout, &bytes), data);

        let bad = RecordData::new().field("position", vec![1.0]);
        assert!(bad.pack("particles", &layout, 2).is_err());

        let unknown = RecordData::new().field("mass", vec![1.0, 1.0]);
        assert!(matches!(
            unknown.pack("particles", &layout, 2),
            Err(SimError::InvalidField { .. })
        ));
    }
}
