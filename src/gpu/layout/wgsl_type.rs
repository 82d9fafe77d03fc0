//! WGSL host-shareable types and their size/alignment rules

use crate::error::{SimError, SimResult};
use crate::gpu::layout::struct_layout::{align_size, StructLayout};
use std::fmt;

/// Scalar element kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    F32,
    I32,
    U32,
    Bool,
    F16,
}

impl ScalarKind {
    /// Size in bytes
    pub const fn size(self) -> u64 {
        match self {
            ScalarKind::F16 => 2,
            _ => 4,
        }
    }

    pub const fn alignment(self) -> u64 {
        self.size()
    }

    pub fn wgsl_name(self) -> &'static str {
        match self {
            ScalarKind::F32 => "f32",
            ScalarKind::I32 => "i32",
            ScalarKind::U32 => "u32",
            ScalarKind::Bool => "bool",
            ScalarKind::F16 => "f16",
        }
    }

    fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "f32" => ScalarKind::F32,
            "i32" => ScalarKind::I32,
            "u32" => ScalarKind::U32,
            "bool" => ScalarKind::Bool,
            "f16" => ScalarKind::F16,
            _ => return None,
        })
    }

    fn from_suffix(suffix: char) -> Option<Self> {
        Some(match suffix {
            'f' => ScalarKind::F32,
            'i' => ScalarKind::I32,
            'u' => ScalarKind::U32,
            'h' => ScalarKind::F16,
            _ => return None,
        })
    }

    /// Write `value` into `out` using this scalar's byte representation
    pub fn encode(self, value: f64, out: &mut [u8]) {
        match self {
            ScalarKind::F32 => out[..4].copy_from_slice(&(value as f32).to_le_bytes()),
            ScalarKind::I32 => out[..4].copy_from_slice(&(value.round() as i32).to_le_bytes()),
            ScalarKind::U32 => out[..4].copy_from_slice(&(value.round().max(0.0) as u32).to_le_bytes()),
            ScalarKind::Bool => {
                let v: u32 = if value != 0.0 { 1 } else { 0 };
                out[..4].copy_from_slice(&v.to_le_bytes());
            }
            ScalarKind::F16 => {
                out[..2].copy_from_slice(&half::f16::from_f64(value).to_le_bytes());
            }
        }
    }

    pub fn decode(self, bytes: &[u8]) -> f64 {
        match self {
            ScalarKind::F32 => f32::from_le_bytes(le4(bytes)) as f64,
            ScalarKind::I32 => i32::from_le_bytes(le4(bytes)) as f64,
            ScalarKind::U32 => u32::from_le_bytes(le4(bytes)) as f64,
            ScalarKind::Bool => (u32::from_le_bytes(le4(bytes)) != 0) as u32 as f64,
            ScalarKind::F16 => half::f16::from_le_bytes([bytes[0], bytes[1]]).to_f64(),
        }
    }
}

pub(crate) fn le4(bytes: &[u8]) -> [u8; 4] {
    let mut out = [0u8; 4];
    out.copy_from_slice(&bytes[..4]);
    out
}

/// Semantic type of a struct field
#[derive(Debug, Clone, PartialEq)]
pub enum WgslType {
    Scalar(ScalarKind),
    Vector {
        scalar: ScalarKind,
        width: u32,
    },
    Matrix {
        scalar: ScalarKind,
        columns: u32,
        rows: u32,
    },
    Array {
        element: Box<WgslType>,
        count: u32,
    },
    Struct {
        name: String,
        layout: Box<StructLayout>,
    },
}

impl WgslType {
    pub const fn scalar(kind: ScalarKind) -> Self {
        WgslType::Scalar(kind)
    }

    pub const fn vec(scalar: ScalarKind, width: u32) -> Self {
        WgslType::Vector { scalar, width }
    }

    pub const fn mat(scalar: ScalarKind, columns: u32, rows: u32) -> Self {
        WgslType::Matrix {
            scalar,
            columns,
            rows,
        }
    }

    pub fn array(element: WgslType, count: u32) -> Self {
        WgslType::Array {
            element: Box::new(element),
            count,
        }
    }

    pub fn structure(name: impl Into<String>, layout: StructLayout) -> Self {
        WgslType::Struct {
            name: name.into(),
            layout: Box::new(layout),
        }
    }

    /// Checks the shape rules; zero-sized or zero-aligned types are rejected
    pub fn validate(&self, field: &str) -> SimResult<()> {
        let invalid = |reason: String| SimError::InvalidField {
            field: field.to_string(),
            reason,
        };
        match self {
            WgslType::Scalar(_) => Ok(()),
            WgslType::Vector { width, .. } => {
                if (2..=4).contains(width) {
                    Ok(())
                } else {
                    Err(invalid(format!("vector width {} outside 2..=4", width)))
                }
            }
            WgslType::Matrix { columns, rows, scalar } => {
                if !(2..=4).contains(columns) || !(2..=4).contains(rows) {
                    return Err(invalid(format!("matrix {}x{} outside 2..=4", columns, rows)));
                }
                if !matches!(scalar, ScalarKind::F32 | ScalarKind::F16) {
                    return Err(invalid(format!(
                        "matrix of {} is not allowed",
                        scalar.wgsl_name()
                    )));
                }
                Ok(())
            }
            WgslType::Array { element, count } => {
                if *count == 0 {
                    return Err(invalid("array element count is zero".to_string()));
                }
                element.validate(field)
            }
            WgslType::Struct { layout, .. } => {
                if layout.size() == 0 || layout.alignment() == 0 {
                    Err(invalid("nested struct has zero size".to_string()))
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Alignment in bytes
    pub fn alignment(&self) -> u64 {
        match self {
            WgslType::Scalar(kind) => kind.alignment(),
            WgslType::Vector { scalar, width } => vector_alignment(*scalar, *width),
            WgslType::Matrix { scalar, rows, .. } => vector_alignment(*scalar, *rows),
            WgslType::Array { element, .. } => element.alignment(),
            WgslType::Struct { layout, .. } => layout.alignment(),
        }
    }

    /// Size in bytes
    pub fn size(&self) -> u64 {
        match self {
            WgslType::Scalar(kind) => kind.size(),
            WgslType::Vector { scalar, width } => scalar.size() * *width as u64,
            WgslType::Matrix {
                scalar,
                columns,
                rows,
            } => *columns as u64 * self.column_stride(*scalar, *rows),
            WgslType::Array { element, count } => *count as u64 * element.stride(),
            WgslType::Struct { layout, .. } => layout.size(),
        }
    }

    /// Distance between consecutive elements of an array of this type
    pub fn stride(&self) -> u64 {
        align_size(self.size(), self.alignment())
    }

    fn column_stride(&self, scalar: ScalarKind, rows: u32) -> u64 {
        align_size(scalar.size() * rows as u64, vector_alignment(scalar, rows))
    }

    /// Number of scalar components, e.g. 16 for `mat4x4<f32>`
    pub fn component_count(&self) -> usize {
        self.components().len()
    }

    /// Byte offset (relative to the start of this type) and kind of every scalar component,
    /// in declaration order (matrices column-major)
    pub fn components(&self) -> Vec<(u64, ScalarKind)> {
        let mut out = Vec::new();
        self.push_components(0, &mut out);
        out
    }

    fn push_components(&self, base: u64, out: &mut Vec<(u64, ScalarKind)>) {
        match self {
            WgslType::Scalar(kind) => out.push((base, *kind)),
            WgslType::Vector { scalar, width } => {
                for i in 0..*width as u64 {
                    out.push((base + i * scalar.size(), *scalar));
                }
            }
            WgslType::Matrix {
                scalar,
                columns,
                rows,
            } => {
                let stride = self.column_stride(*scalar, *rows);
                for c in 0..*columns as u64 {
                    for r in 0..*rows as u64 {
                        out.push((base + c * stride + r * scalar.size(), *scalar));
                    }
                }
            }
            WgslType::Array { element, count } => {
                let stride = element.stride();
                for i in 0..*count as u64 {
                    element.push_components(base + i * stride, out);
                }
            }
            WgslType::Struct { layout, .. } => {
                for field in layout.fields() {
                    field.ty.push_components(base + field.offset, out);
                }
            }
        }
    }

    /// WGSL spelling of the type
    pub fn wgsl_name(&self) -> String {
        match self {
            WgslType::Scalar(kind) => kind.wgsl_name().to_string(),
            WgslType::Vector { scalar, width } => format!("vec{}<{}>", width, scalar.wgsl_name()),
            WgslType::Matrix {
                scalar,
                columns,
                rows,
            } => format!("mat{}x{}<{}>", columns, rows, scalar.wgsl_name()),
            WgslType::Array { element, count } => {
                format!("array<{}, {}>", element.wgsl_name(), count)
            }
            WgslType::Struct { name, .. } => name.clone(),
        }
    }

    /// Parses WGSL type syntax such as `vec3<f32>`, `vec2f`, `mat4x4<f32>` or
    /// `array<vec4<f32>, 4>`. Struct types cannot be parsed.
    pub fn parse(text: &str) -> SimResult<Self> {
        let text = text.trim();
        let bad = || SimError::InvalidField {
            field: text.to_string(),
            reason: "unrecognised WGSL type".to_string(),
        };

        if let Some(kind) = ScalarKind::parse(text) {
            return Ok(WgslType::Scalar(kind));
        }

        if let Some(inner) = strip_generic(text, "array") {
            let (element, count) = inner.rsplit_once(',').ok_or_else(bad)?;
            let count: u32 = count.trim().parse().map_err(|_| bad())?;
            let ty = WgslType::array(WgslType::parse(element)?, count);
            ty.validate(text)?;
            return Ok(ty);
        }

        if let Some(rest) = text.strip_prefix("vec") {
            let width = rest.chars().next().and_then(|c| c.to_digit(10)).ok_or_else(bad)?;
            let scalar = parse_element(&rest[1..]).ok_or_else(bad)?;
            let ty = WgslType::vec(scalar, width);
            ty.validate(text)?;
            return Ok(ty);
        }

        if let Some(rest) = text.strip_prefix("mat") {
            let mut chars = rest.chars();
            let columns = chars.next().and_then(|c| c.to_digit(10)).ok_or_else(bad)?;
            if chars.next() != Some('x') {
                return Err(bad());
            }
            let rows = chars.next().and_then(|c| c.to_digit(10)).ok_or_else(bad)?;
            let scalar = parse_element(&rest[3..]).ok_or_else(bad)?;
            let ty = WgslType::mat(scalar, columns, rows);
            ty.validate(text)?;
            return Ok(ty);
        }

        Err(bad())
    }
}

impl fmt::Display for WgslType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.wgsl_name())
    }
}

/// 2-wide vectors align to twice the scalar, 3- and 4-wide to four times
fn vector_alignment(scalar: ScalarKind, width: u32) -> u64 {
    match width {
        2 => 2 * scalar.alignment(),
        _ => 4 * scalar.alignment(),
    }
}

fn strip_generic<'a>(text: &'a str, name: &str) -> Option<&'a str> {
    text.strip_prefix(name)?
        .trim_start()
        .strip_prefix('<')?
        .strip_suffix('>')
}

/// Element part of `vec3<f32>` / `vec3f` style spellings
fn parse_element(rest: &str) -> Option<ScalarKind> {
    let rest = rest.trim();
    if let Some(inner) = rest.strip_prefix('<').and_then(|r| r.strip_suffix('>')) {
        return ScalarKind::parse(inner.trim());
    }
    let mut chars = rest.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => ScalarKind::from_suffix(c),
        _ => None,
    }
}
