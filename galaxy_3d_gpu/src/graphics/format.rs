//! Pixel and vertex attribute formats

/// Texture / render target pixel format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(non_camel_case_types)]
pub enum TextureFormat {
    R8_UNORM,
    R8G8_UNORM,
    R8G8B8A8_UNORM,
    R8G8B8A8_SRGB,
    B8G8R8A8_UNORM,
    B8G8R8A8_SRGB,
    R16G16B16A16_SFLOAT,
    R32_SFLOAT,
    R32G32B32A32_SFLOAT,
    D16_UNORM,
    D32_FLOAT,
    D24_UNORM_S8_UINT,
}

impl TextureFormat {
    /// Size of one texel in bytes
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            TextureFormat::R8_UNORM => 1,
            TextureFormat::R8G8_UNORM | TextureFormat::D16_UNORM => 2,
            TextureFormat::R8G8B8A8_UNORM
            | TextureFormat::R8G8B8A8_SRGB
            | TextureFormat::B8G8R8A8_UNORM
            | TextureFormat::B8G8R8A8_SRGB
            | TextureFormat::R32_SFLOAT
            | TextureFormat::D32_FLOAT
            | TextureFormat::D24_UNORM_S8_UINT => 4,
            TextureFormat::R16G16B16A16_SFLOAT => 8,
            TextureFormat::R32G32B32A32_SFLOAT => 16,
        }
    }

    /// Number of color channels (0 for depth formats)
    pub fn channel_count(self) -> u32 {
        match self {
            TextureFormat::R8_UNORM | TextureFormat::R32_SFLOAT => 1,
            TextureFormat::R8G8_UNORM => 2,
            TextureFormat::D16_UNORM | TextureFormat::D32_FLOAT | TextureFormat::D24_UNORM_S8_UINT => 0,
            _ => 4,
        }
    }

    pub fn is_depth(self) -> bool {
        matches!(
            self,
            TextureFormat::D16_UNORM | TextureFormat::D32_FLOAT | TextureFormat::D24_UNORM_S8_UINT
        )
    }

    pub fn has_stencil(self) -> bool {
        matches!(self, TextureFormat::D24_UNORM_S8_UINT)
    }

    pub fn is_srgb(self) -> bool {
        matches!(self, TextureFormat::R8G8B8A8_SRGB | TextureFormat::B8G8R8A8_SRGB)
    }

    /// Blue and red channels are swapped in memory
    pub fn is_bgra(self) -> bool {
        matches!(self, TextureFormat::B8G8R8A8_UNORM | TextureFormat::B8G8R8A8_SRGB)
    }
}

/// Vertex attribute format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexFormat {
    Float,
    Float2,
    Float3,
    Float4,
    Byte4,
    Byte4N,
    UByte4,
    UByte4N,
    Short2,
    Short2N,
    Short4,
    Short4N,
}

impl VertexFormat {
    /// Size of one attribute in bytes
    pub fn size_bytes(self) -> u32 {
        match self {
            VertexFormat::Float => 4,
            VertexFormat::Float2 => 8,
            VertexFormat::Float3 => 12,
            VertexFormat::Float4 => 16,
            VertexFormat::Byte4
            | VertexFormat::Byte4N
            | VertexFormat::UByte4
            | VertexFormat::UByte4N
            | VertexFormat::Short2
            | VertexFormat::Short2N => 4,
            VertexFormat::Short4 | VertexFormat::Short4N => 8,
        }
    }
}

/// One attribute inside a vertex buffer
///
/// An `offset` of 0 on every element asks `Buffer::define_vertex` to pack the
/// elements tightly in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexElement {
    pub format: VertexFormat,
    pub offset: u32,
}

impl VertexElement {
    /// Element whose offset is computed by the buffer
    pub fn new(format: VertexFormat) -> Self {
        Self { format, offset: 0 }
    }

    pub fn with_offset(format: VertexFormat, offset: u32) -> Self {
        Self { format, offset }
    }
}

#[cfg(test)]
#[path = "format_tests.rs"]
mod tests;
