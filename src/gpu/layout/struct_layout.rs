//! Struct layout computation
//!
//! Computes byte offsets, sizes and strides for an ordered list of typed fields
//! following the WGSL host-shareable memory rules, so that host and GPU always
//! agree on where every field lives.

use crate::error::{SimError, SimResult};
use crate::gpu::layout::wgsl_type::WgslType;
use std::collections::HashSet;

/// Field offset information
#[derive(Debug, Clone, PartialEq)]
pub struct FieldOffset {
    pub name: String,
    pub ty: WgslType,
    pub offset: u64,
    pub size: u64,
    pub alignment: u64,
}

/// Align a size to the given alignment
pub fn align_size(size: u64, alignment: u64) -> u64 {
    if alignment == 0 {
        return size;
    }
    (size + alignment - 1) / alignment * alignment
}

/// Calculate padding needed for alignment
pub fn padding_for_alignment(current_offset: u64, alignment: u64) -> u64 {
    if alignment == 0 {
        return 0;
    }
    (alignment - (current_offset % alignment)) % alignment
}

/// Complete layout of one struct
#[derive(Debug, Clone, PartialEq)]
pub struct StructLayout {
    fields: Vec<FieldOffset>,
    size: u64,
    alignment: u64,
    /// Byte image of a default record when it is not all zeros
    default_record: Option<Vec<u8>>,
}

impl StructLayout {
    /// Lay out `fields` in declaration order.
    ///
    /// Each field starts at the running offset rounded up to its alignment; the
    /// total size is rounded up to the largest member alignment.
    pub fn compute<S: AsRef<str>>(fields: &[(S, WgslType)]) -> SimResult<Self> {
        let mut builder = LayoutBuilder::new();
        for (name, ty) in fields {
            builder.add_field(name.as_ref(), ty.clone());
        }
        builder.build()
    }

    pub fn fields(&self) -> &[FieldOffset] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldOffset> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Offset of a field, or an error naming the missing field
    pub fn offset_of(&self, name: &str) -> SimResult<u64> {
        self.field(name)
            .map(|f| f.offset)
            .ok_or_else(|| SimError::InvalidField {
                field: name.to_string(),
                reason: "no such field in struct".to_string(),
            })
    }

    /// Size in bytes, including trailing padding
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn alignment(&self) -> u64 {
        self.alignment
    }

    /// Distance between consecutive records in an array of this struct
    pub fn stride(&self) -> u64 {
        align_size(self.size, self.alignment)
    }

    /// Use `image` as the content of records nobody initialised.
    ///
    /// An all-zero image is dropped so layouts that differ only by it compare equal.
    pub fn with_default_record(mut self, image: Vec<u8>) -> Self {
        self.default_record = if image.iter().all(|b| *b == 0) {
            None
        } else {
            Some(image)
        };
        self
    }

    /// `count` default records laid out at the struct stride
    pub fn default_records(&self, count: u64) -> Vec<u8> {
        let stride = self.stride() as usize;
        let mut out = vec![0u8; stride * count as usize];
        if let Some(image) = &self.default_record {
            let len = image.len().min(stride);
            for record in out.chunks_exact_mut(stride) {
                record[..len].copy_from_slice(&image[..len]);
            }
        }
        out
    }

    /// WGSL struct declaration matching this layout
    pub fn to_wgsl(&self, name: &str) -> String {
        let mut code = format!("struct {} {{\n", name);
        for field in &self.fields {
            code.push_str(&format!("    {}: {},\n", field.name, field.ty.wgsl_name()));
        }
        code.push_str("}\n");
        code
    }

    /// Generate a debug string showing the layout
    pub fn describe(&self) -> String {
        let mut s = format!(
            "Total size: {} bytes (aligned to {})\n",
            self.size, self.alignment
        );
        s.push_str("Fields:\n");
        for field in &self.fields {
            s.push_str(&format!(
                "  {:20} @ {:4} ({:4} bytes) : {}\n",
                field.name,
                field.offset,
                field.size,
                field.ty.wgsl_name()
            ));
        }
        s
    }
}

/// Memory layout builder for structures assembled field by field
#[derive(Debug, Default)]
pub struct LayoutBuilder {
    fields: Vec<(String, WgslType)>,
}

impl LayoutBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_field(&mut self, name: &str, ty: WgslType) -> &mut Self {
        self.fields.push((name.to_string(), ty));
        self
    }

    /// Add a fixed-size array field
    pub fn add_array(&mut self, name: &str, element: WgslType, count: u32) -> &mut Self {
        self.add_field(name, WgslType::array(element, count))
    }

    pub fn build(&self) -> SimResult<StructLayout> {
        if self.fields.is_empty() {
            return Err(SimError::InvalidField {
                field: "<struct>".to_string(),
                reason: "struct has no fields".to_string(),
            });
        }

        let mut seen = HashSet::new();
        let mut current_offset = 0u64;
        let mut max_alignment = 0u64;
        let mut fields = Vec::with_capacity(self.fields.len());

        for (name, ty) in &self.fields {
            if !seen.insert(name.as_str()) {
                return Err(SimError::InvalidField {
                    field: name.clone(),
                    reason: "declared more than once".to_string(),
                });
            }
            ty.validate(name)?;

            let alignment = ty.alignment();
            let size = ty.size();
            if alignment == 0 || size == 0 {
                return Err(SimError::InvalidField {
                    field: name.clone(),
                    reason: format!("size {} / alignment {} must be non-zero", size, alignment),
                });
            }

            current_offset += padding_for_alignment(current_offset, alignment);
            fields.push(FieldOffset {
                name: name.clone(),
                ty: ty.clone(),
                offset: current_offset,
                size,
                alignment,
            });
            current_offset += size;
            max_alignment = max_alignment.max(alignment);
        }

        Ok(StructLayout {
            fields,
            size: align_size(current_offset, max_alignment),
            alignment: max_alignment,
            default_record: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::layout::wgsl_type::ScalarKind;

    #[test]
    fn test_alignment_calculations() {
        assert_eq!(align_size(5, 4), 8);
        assert_eq!(align_size(16, 16), 16);
        assert_eq!(align_size(17, 16), 32);
        assert_eq!(align_size(12, 8), 16);

        assert_eq!(padding_for_alignment(0, 16), 0);
        assert_eq!(padding_for_alignment(1, 16), 15);
        assert_eq!(padding_for_alignment(16, 16), 0);
    }

    #[test]
    fn test_vec2_then_scalar() {
        let layout = StructLayout::compute(&[
            ("position", WgslType::vec(ScalarKind::F32, 2)),
            ("size", WgslType::scalar(ScalarKind::F32)),
        ])
        .expect("layout");

        assert_eq!(layout.offset_of("position").ok(), Some(0));
        assert_eq!(layout.offset_of("size").ok(), Some(8));
        assert_eq!(layout.size(), 16);
        assert_eq!(layout.alignment(), 8);
    }

    #[test]
    fn test_vec3_packs_trailing_scalar() {
        let mut builder = LayoutBuilder::new();
        builder
            .add_field("world_matrix", WgslType::mat(ScalarKind::F32, 4, 4))
            .add_field("camera_pos", WgslType::vec(ScalarKind::F32, 3))
            .add_field("time", WgslType::scalar(ScalarKind::F32))
            .add_array("lights", WgslType::vec(ScalarKind::F32, 4), 4);
        let layout = builder.build().expect("layout");

        let offsets: Vec<u64> = layout.fields().iter().map(|f| f.offset).collect();
        assert_eq!(offsets, vec![0, 64, 76, 80]);
        assert_eq!(layout.size(), 144);
    }

    #[test]
    fn test_rejects_bad_fields() {
        let dup = StructLayout::compute(&[
            ("a", WgslType::scalar(ScalarKind::U32)),
            ("a", WgslType::scalar(ScalarKind::U32)),
        ]);
        assert!(matches!(dup, Err(SimError::InvalidField { .. })));

        let empty: Vec<(&str, WgslType)> = Vec::new();
        assert!(StructLayout::compute(&empty).is_err());

        let zero = StructLayout::compute(&[("v", WgslType::vec(ScalarKind::F32, 1))]);
        assert!(zero.is_err());
    }

    #[test]
    fn test_nested_struct_field() {
        let inner = StructLayout::compute(&[
            ("a", WgslType::vec(ScalarKind::F32, 3)),
            ("b", WgslType::scalar(ScalarKind::U32)),
        ])
        .expect("inner");
        assert_eq!(inner.size(), 16);

        let outer = StructLayout::compute(&[
            ("flag", WgslType::scalar(ScalarKind::U32)),
            ("inner", WgslType::structure("Inner", inner)),
        ])
        .expect("outer");
        assert_eq!(outer.offset_of("inner").ok(), Some(16));
        assert_eq!(outer.size(), 32);
    }

    #[test]
    fn test_to_wgsl() {
        let layout = StructLayout::compute(&[
            ("position", WgslType::vec(ScalarKind::F32, 2)),
            ("size", WgslType::scalar(ScalarKind::F32)),
        ])
        .expect("layout");
        let code = layout.to_wgsl("Particle");
        assert!(code.starts_with("struct Particle {"));
        assert!(code.contains("position: vec2<f32>,"));
        assert!(code.contains("size: f32,"));
        assert!(layout.describe().contains("Total size: 16 bytes"));
    }
}
