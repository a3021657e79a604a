//! Shared graphics enums, flags, limits and small value types

use bitflags::bitflags;
use serde::Deserialize;
use std::fmt;

// ===== LIMITS =====

/// Number of vertex buffer slots a context can bind
pub const MAX_VERTEX_BUFFER_BINDINGS: u32 = 4;
/// Number of descriptor sets a pipeline can use
pub const MAX_DESCRIPTOR_SETS: u32 = 4;
/// Number of bindings inside one descriptor set
pub const MAX_BINDINGS_PER_SET: u32 = 14;
/// Number of vertex attributes per pipeline
pub const MAX_VERTEX_ATTRIBUTES: u32 = 16;
/// Number of color attachments per framebuffer
pub const MAX_COLOR_ATTACHMENTS: usize = 8;

/// View request covering every mip level from the base one
pub const REMAINING_MIP_LEVELS: u32 = u32::MAX;
/// View request covering every array layer from the first one
pub const REMAINING_ARRAY_LAYERS: u32 = u32::MAX;

// ===== BACKEND =====

/// Native graphics API used by a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
pub enum Backend {
    /// Probe the platform's preferred API, then fall back
    #[default]
    Default,
    /// Headless CPU reference implementation
    Software,
    Vulkan,
    D3D11,
    D3D12,
}

impl Backend {
    /// Concrete backends tried by `Backend::Default`, in order
    pub fn probe_order() -> &'static [Backend] {
        if cfg!(windows) {
            &[Backend::D3D12, Backend::D3D11, Backend::Vulkan, Backend::Software]
        } else {
            &[Backend::Vulkan, Backend::Software]
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Backend::Default => "Default",
            Backend::Software => "Software",
            Backend::Vulkan => "Vulkan",
            Backend::D3D11 => "Direct3D 11",
            Backend::D3D12 => "Direct3D 12",
        };
        f.write_str(name)
    }
}

// ===== CAPABILITIES =====

/// GPU vendor, decoded from the PCI vendor id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuVendor {
    Nvidia,
    Amd,
    Intel,
    Arm,
    Qualcomm,
    ImgTec,
    Software,
    Unknown,
}

impl GpuVendor {
    pub fn from_vendor_id(vendor_id: u32) -> Self {
        match vendor_id {
            0x10DE => GpuVendor::Nvidia,
            0x1002 | 0x1022 => GpuVendor::Amd,
            0x8086 => GpuVendor::Intel,
            0x13B5 => GpuVendor::Arm,
            0x5143 => GpuVendor::Qualcomm,
            0x1010 => GpuVendor::ImgTec,
            0x10005 => GpuVendor::Software,
            _ => GpuVendor::Unknown,
        }
    }
}

/// Coarse feature level of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FeatureTier {
    /// Vertex/fragment only
    Level10,
    /// Compute shaders and storage resources
    Level11,
    /// Bindless-class hardware
    Level12,
}

/// Numeric device limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuLimits {
    pub max_texture_dimension_2d: u32,
    pub max_texture_dimension_3d: u32,
    pub max_texture_array_layers: u32,
    pub max_color_attachments: u32,
    pub max_vertex_buffer_bindings: u32,
    pub max_descriptor_sets: u32,
    pub max_compute_work_group_count: [u32; 3],
    pub max_compute_work_group_size: [u32; 3],
}

impl Default for GpuLimits {
    fn default() -> Self {
        Self {
            max_texture_dimension_2d: 16384,
            max_texture_dimension_3d: 2048,
            max_texture_array_layers: 2048,
            max_color_attachments: MAX_COLOR_ATTACHMENTS as u32,
            max_vertex_buffer_bindings: MAX_VERTEX_BUFFER_BINDINGS,
            max_descriptor_sets: MAX_DESCRIPTOR_SETS,
            max_compute_work_group_count: [65535; 3],
            max_compute_work_group_size: [1024, 1024, 64],
        }
    }
}

/// Capabilities reported by a device after initialization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpuCapabilities {
    pub backend: Backend,
    pub vendor_id: u32,
    pub vendor: GpuVendor,
    pub device_name: String,
    pub feature_tier: FeatureTier,
    pub limits: GpuLimits,
}

// ===== RESOURCE FLAGS =====

bitflags! {
    /// How a buffer may be bound
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        const VERTEX = 1 << 0;
        const INDEX = 1 << 1;
        const UNIFORM = 1 << 2;
        const STORAGE = 1 << 3;
    }
}

bitflags! {
    /// How a texture may be accessed
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TextureUsage: u32 {
        const SHADER_READ = 1 << 0;
        const SHADER_WRITE = 1 << 1;
        const RENDER_TARGET = 1 << 2;
    }
}

bitflags! {
    /// Shader stages a binding is visible to
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ShaderStages: u32 {
        const VERTEX = 1 << 0;
        const FRAGMENT = 1 << 1;
        const COMPUTE = 1 << 2;
        const ALL_GRAPHICS = Self::VERTEX.bits() | Self::FRAGMENT.bits();
    }
}

// ===== ENUMS =====

/// Texture dimensionality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureType {
    Type1D,
    Type2D,
    Type3D,
    Cube,
}

/// What to do with an attachment's previous content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LoadAction {
    #[default]
    DontCare,
    Load,
    Clear,
}

/// What to do with an attachment's rendered content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StoreAction {
    DontCare,
    #[default]
    Store,
}

/// Primitive topology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PrimitiveTopology {
    PointList,
    LineList,
    LineStrip,
    #[default]
    TriangleList,
    TriangleStrip,
}

/// Index element type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexType {
    U16,
    U32,
}

impl IndexType {
    pub fn size_bytes(self) -> u32 {
        match self {
            IndexType::U16 => 2,
            IndexType::U32 => 4,
        }
    }
}

/// Vertex input rate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum VertexInputRate {
    #[default]
    Vertex,
    Instance,
}

// ===== VIEWPORT / SCISSOR =====

/// Viewport
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Viewport {
    /// Full-extent viewport with the [0, 1] depth range
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: width as f32,
            height: height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

/// 2D rectangle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect2D {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect2D {
    pub fn full(width: u32, height: u32) -> Self {
        Self { x: 0, y: 0, width, height }
    }
}

#[cfg(test)]
#[path = "types_tests.rs"]
mod tests;
