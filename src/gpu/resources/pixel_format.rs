//! Texel formats: channel count plus element type

use crate::error::{SimError, SimResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Element type of a texel channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementType {
    F32,
    U32,
    I32,
    F16,
    /// 8-bit normalised, read back as 0.0..=1.0
    Unorm8,
}

impl ElementType {
    pub fn size(self) -> u32 {
        match self {
            ElementType::F32 | ElementType::U32 | ElementType::I32 => 4,
            ElementType::F16 => 2,
            ElementType::Unorm8 => 1,
        }
    }

    /// WGSL sample type used for `texture_2d<..>` declarations
    pub fn sample_type(self) -> &'static str {
        match self {
            ElementType::U32 => "u32",
            ElementType::I32 => "i32",
            _ => "f32",
        }
    }

    fn encode(self, value: f64, out: &mut [u8]) {
        match self {
            ElementType::F32 => out[..4].copy_from_slice(&(value as f32).to_le_bytes()),
            ElementType::U32 => out[..4].copy_from_slice(&(value.round().max(0.0) as u32).to_le_bytes()),
            ElementType::I32 => out[..4].copy_from_slice(&(value.round() as i32).to_le_bytes()),
            ElementType::F16 => out[..2].copy_from_slice(&half::f16::from_f64(value).to_le_bytes()),
            ElementType::Unorm8 => out[0] = (value.clamp(0.0, 1.0) * 255.0).round() as u8,
        }
    }

    fn decode(self, bytes: &[u8]) -> f64 {
        let word = || {
            let mut raw = [0u8; 4];
            raw.copy_from_slice(&bytes[..4]);
            raw
        };
        match self {
            ElementType::F32 => f32::from_le_bytes(word()) as f64,
            ElementType::U32 => u32::from_le_bytes(word()) as f64,
            ElementType::I32 => i32::from_le_bytes(word()) as f64,
            ElementType::F16 => half::f16::from_le_bytes([bytes[0], bytes[1]]).to_f64(),
            ElementType::Unorm8 => bytes[0] as f64 / 255.0,
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ElementType::F32 => "f32",
            ElementType::U32 => "u32",
            ElementType::I32 => "i32",
            ElementType::F16 => "f16",
            ElementType::Unorm8 => "unorm8",
        };
        f.write_str(name)
    }
}

/// Channel count and element type of a texture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PixelFormat {
    pub channels: u32,
    pub element: ElementType,
}

impl PixelFormat {
    pub const R32_FLOAT: PixelFormat = PixelFormat::new(1, ElementType::F32);
    pub const RG32_FLOAT: PixelFormat = PixelFormat::new(2, ElementType::F32);
    pub const RGBA32_FLOAT: PixelFormat = PixelFormat::new(4, ElementType::F32);
    pub const R32_UINT: PixelFormat = PixelFormat::new(1, ElementType::U32);
    pub const RGBA8_UNORM: PixelFormat = PixelFormat::new(4, ElementType::Unorm8);

    pub const fn new(channels: u32, element: ElementType) -> Self {
        Self { channels, element }
    }

    /// Device texture format, if this combination has one
    pub fn to_wgpu(self) -> Option<wgpu::TextureFormat> {
        use wgpu::TextureFormat as F;
        Some(match (self.element, self.channels) {
            (ElementType::F32, 1) => F::R32Float,
            (ElementType::F32, 2) => F::Rg32Float,
            (ElementType::F32, 4) => F::Rgba32Float,
            (ElementType::U32, 1) => F::R32Uint,
            (ElementType::U32, 2) => F::Rg32Uint,
            (ElementType::U32, 4) => F::Rgba32Uint,
            (ElementType::I32, 1) => F::R32Sint,
            (ElementType::I32, 2) => F::Rg32Sint,
            (ElementType::I32, 4) => F::Rgba32Sint,
            (ElementType::F16, 1) => F::R16Float,
            (ElementType::F16, 2) => F::Rg16Float,
            (ElementType::F16, 4) => F::Rgba16Float,
            (ElementType::Unorm8, 4) => F::Rgba8Unorm,
            _ => return None,
        })
    }

    /// Like [`to_wgpu`](Self::to_wgpu) but reports unsupported combinations
    pub fn resolve(self, name: &str) -> SimResult<wgpu::TextureFormat> {
        self.to_wgpu().ok_or_else(|| SimError::UnsupportedFormat {
            name: name.to_string(),
            channels: self.channels,
            element: self.element.to_string(),
        })
    }

    /// WGSL texel format name used in `texture_storage_2d<..>`
    pub fn wgsl_name(self) -> Option<&'static str> {
        Some(match (self.element, self.channels) {
            (ElementType::F32, 1) => "r32float",
            (ElementType::F32, 2) => "rg32float",
            (ElementType::F32, 4) => "rgba32float",
            (ElementType::U32, 1) => "r32uint",
            (ElementType::U32, 2) => "rg32uint",
            (ElementType::U32, 4) => "rgba32uint",
            (ElementType::I32, 1) => "r32sint",
            (ElementType::I32, 2) => "rg32sint",
            (ElementType::I32, 4) => "rgba32sint",
            (ElementType::F16, 4) => "rgba16float",
            (ElementType::Unorm8, 4) => "rgba8unorm",
            _ => return None,
        })
    }

    pub fn bytes_per_texel(self) -> u32 {
        self.channels * self.element.size()
    }

    /// Encode one texel from per-channel values
    pub fn encode_texel(self, values: &[f64], out: &mut [u8]) {
        let step = self.element.size() as usize;
        for (i, value) in values.iter().take(self.channels as usize).enumerate() {
            self.element.encode(*value, &mut out[i * step..]);
        }
    }

    /// Decode one texel into per-channel values
    pub fn decode_texel(self, bytes: &[u8]) -> Vec<f64> {
        let step = self.element.size() as usize;
        (0..self.channels as usize)
            .map(|i| self.element.decode(&bytes[i * step..]))
            .collect()
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.channels, self.element)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supported_formats() {
        assert_eq!(PixelFormat::R32_FLOAT.to_wgpu(), Some(wgpu::TextureFormat::R32Float));
        assert_eq!(PixelFormat::RG32_FLOAT.wgsl_name(), Some("rg32float"));
        assert_eq!(PixelFormat::RGBA8_UNORM.bytes_per_texel(), 4);
    }

    #[test]
    fn test_three_channels_unsupported() {
        let format = PixelFormat::new(3, ElementType::F32);
        let err = format.resolve("rgb").unwrap_err();
        assert!(matches!(err, SimError::UnsupportedFormat { channels: 3, .. }));
    }

    #[test]
    fn test_texel_codec() {
        let format = PixelFormat::new(2, ElementType::U32);
        let mut bytes = [0u8; 8];
        format.encode_texel(&[3.0, 7.0], &mut bytes);
        assert_eq!(format.decode_texel(&bytes), vec![3.0, 7.0]);

        let format = PixelFormat::RGBA8_UNORM;
        let mut bytes = [0u8; 4];
        format.encode_texel(&[1.0, 0.0, 2.0, -1.0], &mut bytes);
        assert_eq!(bytes, [255, 0, 255, 0]);
    }
}
