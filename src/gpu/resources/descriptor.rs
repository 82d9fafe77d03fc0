//! Resource descriptors: the shape of every GPU resource a table declares

use crate::error::{malformed, SimError, SimResult};
use crate::gpu::layout::{StructLayout, WgslType};
use crate::gpu::resources::pixel_format::PixelFormat;

/// How a shader may touch a storage texture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageAccess {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl StorageAccess {
    pub fn to_wgpu(self) -> wgpu::StorageTextureAccess {
        match self {
            StorageAccess::ReadOnly => wgpu::StorageTextureAccess::ReadOnly,
            StorageAccess::WriteOnly => wgpu::StorageTextureAccess::WriteOnly,
            StorageAccess::ReadWrite => wgpu::StorageTextureAccess::ReadWrite,
        }
    }

    pub fn wgsl_name(self) -> &'static str {
        match self {
            StorageAccess::ReadOnly => "read",
            StorageAccess::WriteOnly => "write",
            StorageAccess::ReadWrite => "read_write",
        }
    }

    pub fn can_write(self) -> bool {
        !matches!(self, StorageAccess::ReadOnly)
    }
}

/// Shape of a 2D (or 2D-array) texture
#[derive(Debug, Clone, PartialEq)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    pub layers: u32,
    pub format: PixelFormat,
    /// Row pitch the caller intends to upload with; must be tightly packed.
    pub bytes_per_row: Option<u32>,
}

impl TextureDesc {
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            width,
            height,
            layers: 1,
            format,
            bytes_per_row: None,
        }
    }

    pub fn with_layers(mut self, layers: u32) -> Self {
        self.layers = layers;
        self
    }

    pub fn with_bytes_per_row(mut self, bytes_per_row: u32) -> Self {
        self.bytes_per_row = Some(bytes_per_row);
        self
    }

    /// 2D-array textures are used once there is more than one layer
    pub fn is_array(&self) -> bool {
        self.layers > 1
    }

    pub fn row_bytes(&self) -> u32 {
        self.width * self.format.bytes_per_texel()
    }

    pub fn layer_bytes(&self) -> u64 {
        self.row_bytes() as u64 * self.height as u64
    }

    pub fn total_bytes(&self) -> u64 {
        self.layer_bytes() * self.layers as u64
    }

    fn validate(&self, name: &str) -> SimResult<()> {
        if self.width == 0 || self.height == 0 || self.layers == 0 {
            return Err(SimError::ZeroSized {
                name: name.to_string(),
            });
        }
        self.format.resolve(name)?;
        if let Some(pitch) = self.bytes_per_row {
            if pitch != self.row_bytes() {
                return Err(malformed(
                    name,
                    format!(
                        "byte stride {} does not equal width {} x {} bytes per texel",
                        pitch,
                        self.width,
                        self.format.bytes_per_texel()
                    ),
                ));
            }
        }
        Ok(())
    }
}

/// Size of a buffer, either raw or derived from a record layout
#[derive(Debug, Clone, PartialEq)]
pub enum BufferSize {
    Bytes(u64),
    /// A single struct (typical for uniforms)
    Struct { name: String, layout: StructLayout },
    /// `count` back-to-back records
    Records {
        name: String,
        layout: StructLayout,
        count: u64,
    },
}

impl BufferSize {
    pub fn byte_size(&self) -> u64 {
        match self {
            BufferSize::Bytes(bytes) => *bytes,
            BufferSize::Struct { layout, .. } => layout.size(),
            BufferSize::Records { layout, count, .. } => layout.stride() * count,
        }
    }

    pub fn layout(&self) -> Option<&StructLayout> {
        match self {
            BufferSize::Bytes(_) => None,
            BufferSize::Struct { layout, .. } | BufferSize::Records { layout, .. } => Some(layout),
        }
    }

    pub fn record_count(&self) -> Option<u64> {
        match self {
            BufferSize::Records { count, .. } => Some(*count),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResourceDescriptor {
    StorageTexture {
        texture: TextureDesc,
        access: StorageAccess,
    },
    SampledTexture(TextureDesc),
    UniformBuffer(BufferSize),
    StorageBuffer { size: BufferSize, read_only: bool },
}

impl ResourceDescriptor {
    pub fn storage_texture(texture: TextureDesc, access: StorageAccess) -> Self {
        ResourceDescriptor::StorageTexture { texture, access }
    }

    pub fn sampled_texture(texture: TextureDesc) -> Self {
        ResourceDescriptor::SampledTexture(texture)
    }

    pub fn uniform(name: impl Into<String>, layout: StructLayout) -> Self {
        ResourceDescriptor::UniformBuffer(BufferSize::Struct {
            name: name.into(),
            layout,
        })
    }

    pub fn records(name: impl Into<String>, layout: StructLayout, count: u64) -> Self {
        ResourceDescriptor::StorageBuffer {
            size: BufferSize::Records {
                name: name.into(),
                layout,
                count,
            },
            read_only: false,
        }
    }

    pub fn storage_bytes(bytes: u64) -> Self {
        ResourceDescriptor::StorageBuffer {
            size: BufferSize::Bytes(bytes),
            read_only: false,
        }
    }

    pub fn texture(&self) -> Option<&TextureDesc> {
        match self {
            ResourceDescriptor::StorageTexture { texture, .. } => Some(texture),
            ResourceDescriptor::SampledTexture(texture) => Some(texture),
            _ => None,
        }
    }

    pub fn buffer_size(&self) -> Option<&BufferSize> {
        match self {
            ResourceDescriptor::UniformBuffer(size) => Some(size),
            ResourceDescriptor::StorageBuffer { size, .. } => Some(size),
            _ => None,
        }
    }

    pub fn is_texture(&self) -> bool {
        self.texture().is_some()
    }

    /// Whether shaders can write through this binding
    pub fn is_writable(&self) -> bool {
        match self {
            ResourceDescriptor::StorageTexture { access, .. } => access.can_write(),
            ResourceDescriptor::StorageBuffer { read_only, .. } => !read_only,
            _ => false,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            ResourceDescriptor::StorageTexture { .. } => "storage texture",
            ResourceDescriptor::SampledTexture(_) => "sampled texture",
            ResourceDescriptor::UniformBuffer(_) => "uniform buffer",
            ResourceDescriptor::StorageBuffer { .. } => "storage buffer",
        }
    }

    /// Reject shapes no device can honour
    pub fn validate(&self, name: &str) -> SimResult<()> {
        match self {
            ResourceDescriptor::StorageTexture { texture, .. } => {
                texture.validate(name)?;
                if texture.format.wgsl_name().is_none() {
                    return Err(SimError::UnsupportedFormat {
                        name: name.to_string(),
                        channels: texture.format.channels,
                        element: texture.format.element.to_string(),
                    });
                }
                Ok(())
            }
            ResourceDescriptor::SampledTexture(texture) => texture.validate(name),
            ResourceDescriptor::UniformBuffer(size) => {
                if matches!(size, BufferSize::Records { .. }) {
                    return Err(malformed(name, "uniform buffers hold a single struct"));
                }
                if let Some(layout) = size.layout() {
                    for field in layout.fields() {
                        if let Some(problem) = uniform_violation(&field.ty) {
                            return Err(malformed(
                                name,
                                format!("uniform field '{}': {}", field.name, problem),
                            ));
                        }
                    }
                }
                validate_size(name, size)
            }
            ResourceDescriptor::StorageBuffer { size, .. } => validate_size(name, size),
        }
    }

    /// WGSL type of the binding as it must appear in program source
    pub fn wgsl_type(&self) -> String {
        match self {
            ResourceDescriptor::StorageTexture { texture, access } => format!(
                "{}<{}, {}>",
                if texture.is_array() {
                    "texture_storage_2d_array"
                } else {
                    "texture_storage_2d"
                },
                texture.format.wgsl_name().unwrap_or("r32float"),
                access.wgsl_name()
            ),
            ResourceDescriptor::SampledTexture(texture) => format!(
                "{}<{}>",
                if texture.is_array() {
                    "texture_2d_array"
                } else {
                    "texture_2d"
                },
                texture.format.element.sample_type()
            ),
            ResourceDescriptor::UniformBuffer(size) => match size {
                BufferSize::Bytes(bytes) => format!("array<vec4<u32>, {}>", (bytes + 15) / 16),
                BufferSize::Struct { name, .. } | BufferSize::Records { name, .. } => name.clone(),
            },
            ResourceDescriptor::StorageBuffer { size, .. } => match size {
                BufferSize::Bytes(_) => "array<u32>".to_string(),
                BufferSize::Struct { name, .. } => name.clone(),
                BufferSize::Records { name, .. } => format!("array<{}>", name),
            },
        }
    }

    /// Address space qualifier for buffers, e.g. `<storage, read_write>`
    pub fn wgsl_address_space(&self) -> &'static str {
        match self {
            ResourceDescriptor::UniformBuffer(_) => "<uniform>",
            ResourceDescriptor::StorageBuffer { read_only: true, .. } => "<storage, read>",
            ResourceDescriptor::StorageBuffer { read_only: false, .. } => "<storage, read_write>",
            _ => "",
        }
    }

    /// Struct declaration needed by this binding, if any
    pub fn wgsl_struct(&self) -> Option<String> {
        match self.buffer_size()? {
            BufferSize::Bytes(_) => None,
            BufferSize::Struct { name, layout } | BufferSize::Records { name, layout, .. } => {
                Some(layout.to_wgsl(name))
            }
        }
    }

    /// Binding type for a bind group layout entry
    pub fn binding_type(&self) -> wgpu::BindingType {
        match self {
            ResourceDescriptor::StorageTexture { texture, access } => {
                wgpu::BindingType::StorageTexture {
                    access: access.to_wgpu(),
                    format: texture
                        .format
                        .to_wgpu()
                        .unwrap_or(wgpu::TextureFormat::R32Float),
                    view_dimension: view_dimension(texture),
                }
            }
            ResourceDescriptor::SampledTexture(texture) => wgpu::BindingType::Texture {
                sample_type: match texture.format.element {
                    crate::gpu::resources::pixel_format::ElementType::U32 => {
                        wgpu::TextureSampleType::Uint
                    }
                    crate::gpu::resources::pixel_format::ElementType::I32 => {
                        wgpu::TextureSampleType::Sint
                    }
                    crate::gpu::resources::pixel_format::ElementType::F32 => {
                        wgpu::TextureSampleType::Float { filterable: false }
                    }
                    _ => wgpu::TextureSampleType::Float { filterable: true },
                },
                view_dimension: view_dimension(texture),
                multisampled: false,
            },
            ResourceDescriptor::UniformBuffer(_) => wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            ResourceDescriptor::StorageBuffer { read_only, .. } => wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage {
                    read_only: *read_only,
                },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
        }
    }
}

fn view_dimension(texture: &TextureDesc) -> wgpu::TextureViewDimension {
    if texture.is_array() {
        wgpu::TextureViewDimension::D2Array
    } else {
        wgpu::TextureViewDimension::D2
    }
}

/// Where the uniform address space needs a layout the storage rules do not give
fn uniform_violation(ty: &WgslType) -> Option<String> {
    match ty {
        WgslType::Array { element, .. } => {
            if element.stride() % 16 != 0 {
                return Some(format!(
                    "array stride {} is not a multiple of 16",
                    element.stride()
                ));
            }
            uniform_violation(element)
        }
        WgslType::Struct { name, layout } => {
            if layout.alignment() % 16 != 0 || layout.size() % 16 != 0 {
                return Some(format!(
                    "nested struct {} has alignment {} and size {}, both must be multiples of 16",
                    name,
                    layout.alignment(),
                    layout.size()
                ));
            }
            layout.fields().iter().find_map(|f| uniform_violation(&f.ty))
        }
        _ => None,
    }
}

fn validate_size(name: &str, size: &BufferSize) -> SimResult<()> {
    if size.byte_size() == 0 {
        return Err(SimError::ZeroSized {
            name: name.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::layout::{ScalarKind, WgslType};
    use crate::gpu::resources::pixel_format::ElementType;

    #[test]
    fn test_texture_validation() {
        let desc = ResourceDescriptor::storage_texture(
            TextureDesc::new(0, 4, PixelFormat::R32_FLOAT),
            StorageAccess::ReadWrite,
        );
        assert!(matches!(desc.validate("grid"), Err(SimError::ZeroSized { .. })));

        let desc = ResourceDescriptor::storage_texture(
            TextureDesc::new(4, 4, PixelFormat::R32_FLOAT).with_bytes_per_row(12),
            StorageAccess::ReadWrite,
        );
        assert!(matches!(
            desc.validate("grid"),
            Err(SimError::MalformedDescriptor { .. })
        ));

        let desc = ResourceDescriptor::sampled_texture(TextureDesc::new(
            4,
            4,
            PixelFormat::new(3, ElementType::F32),
        ));
        assert!(matches!(
            desc.validate("rgb"),
            Err(SimError::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn test_wgsl_types() {
        let tex = TextureDesc::new(8, 8, PixelFormat::R32_FLOAT);
        let desc = ResourceDescriptor::storage_texture(tex.clone(), StorageAccess::ReadWrite);
        assert_eq!(desc.wgsl_type(), "texture_storage_2d<r32float, read_write>");

        let desc = ResourceDescriptor::sampled_texture(tex.with_layers(3));
        assert_eq!(desc.wgsl_type(), "texture_2d_array<f32>");

        let layout = StructLayout::compute(&[("phase", WgslType::scalar(ScalarKind::U32))])
            .expect("layout");
        let desc = ResourceDescriptor::records("Link", layout, 10);
        assert_eq!(desc.wgsl_type(), "array<Link>");
        assert_eq!(desc.wgsl_address_space(), "<storage, read_write>");
        assert_eq!(desc.buffer_size().map(|s| s.byte_size()), Some(40));
    }

    #[test]
    fn test_records_in_uniform_rejected() {
        let layout = StructLayout::compute(&[("x", WgslType::scalar(ScalarKind::F32))])
            .expect("layout");
        let desc = ResourceDescriptor::UniformBuffer(BufferSize::Records {
            name: "X".into(),
            layout,
            count: 4,
        });
        assert!(desc.validate("params").is_err());
    }

    #[test]
    fn test_uniform_arrays_need_16_byte_stride() {
        let weights = StructLayout::compute(&[
            ("count", WgslType::scalar(ScalarKind::U32)),
            ("weights", WgslType::array(WgslType::scalar(ScalarKind::F32), 4)),
        ])
        .expect("layout");
        let err = ResourceDescriptor::uniform("Weights", weights.clone())
            .validate("params")
            .unwrap_err();
        assert!(matches!(err, SimError::MalformedDescriptor { .. }));

        // Storage rules allow the same struct
        assert!(ResourceDescriptor::records("Weights", weights, 2)
            .validate("weights")
            .is_ok());

        let padded = StructLayout::compute(&[(
            "weights",
            WgslType::array(WgslType::vec(ScalarKind::F32, 4), 4),
        )])
        .expect("layout");
        assert!(ResourceDescriptor::uniform("Padded", padded).validate("params").is_ok());

        let inner = StructLayout::compute(&[("v", WgslType::vec(ScalarKind::F32, 2))])
            .expect("inner");
        let nested = StructLayout::compute(&[("inner", WgslType::structure("Inner", inner))])
            .expect("nested");
        assert!(matches!(
            ResourceDescriptor::uniform("Outer", nested).validate("params"),
            Err(SimError::MalformedDescriptor { .. })
        ));
    }
}
