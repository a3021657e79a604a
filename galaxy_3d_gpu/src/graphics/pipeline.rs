//! Shaders, fixed-function state and pipelines

use crate::backend::PipelineHandle;
use crate::error::{Error, Result};
use crate::graphics::buffer::compute_vertex_layout;
use crate::graphics::device::{with_backend, DeviceShared};
use crate::graphics::{
    PrimitiveTopology, ShaderStages, TextureFormat, VertexElement, VertexFormat, VertexInputRate,
    MAX_BINDINGS_PER_SET, MAX_COLOR_ATTACHMENTS, MAX_DESCRIPTOR_SETS, MAX_VERTEX_ATTRIBUTES,
    MAX_VERTEX_BUFFER_BINDINGS,
};
use crate::ptr::{Ref, WeakRef};

const SPIRV_MAGIC: u32 = 0x0723_0203;

// ===== SHADERS =====

/// Pipeline stage a shader runs in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Compute,
}

/// SPIR-V shader module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shader {
    stage: ShaderStage,
    code: Vec<u32>,
    entry_point: String,
}

impl Shader {
    /// Build from SPIR-V words (entry point "main")
    pub fn from_spirv_words(stage: ShaderStage, code: Vec<u32>) -> Result<Self> {
        if code.len() < 5 || code[0] != SPIRV_MAGIC {
            return Err(Error::InvalidResource(format!(
                "{:?} shader is not a SPIR-V module",
                stage
            )));
        }
        Ok(Self { stage, code, entry_point: "main".to_string() })
    }

    /// Build from little-endian SPIR-V bytes
    pub fn from_spirv_bytes(stage: ShaderStage, bytes: &[u8]) -> Result<Self> {
        if bytes.len() % 4 != 0 {
            return Err(Error::InvalidResource(format!(
                "SPIR-V size {} is not a multiple of 4",
                bytes.len()
            )));
        }
        let words = bytes
            .chunks_exact(4)
            .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();
        Self::from_spirv_words(stage, words)
    }

    pub fn with_entry_point(mut self, entry_point: impl Into<String>) -> Self {
        self.entry_point = entry_point.into();
        self
    }

    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    pub fn code(&self) -> &[u32] {
        &self.code
    }

    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }
}

// ===== RASTERIZATION =====

/// Face culling mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CullMode {
    None,
    Front,
    Back,
}

/// Front face winding order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrontFace {
    CounterClockwise,
    Clockwise,
}

/// Polygon rendering mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolygonMode {
    Fill,
    Line,
    Point,
}

/// Rasterization fixed-function state
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RasterizationState {
    pub cull_mode: CullMode,
    pub front_face: FrontFace,
    pub polygon_mode: PolygonMode,
    /// (constant factor, slope factor); None disables depth bias
    pub depth_bias: Option<(f32, f32)>,
}

impl Default for RasterizationState {
    fn default() -> Self {
        Self {
            cull_mode: CullMode::Back,
            front_face: FrontFace::CounterClockwise,
            polygon_mode: PolygonMode::Fill,
            depth_bias: None,
        }
    }
}

// ===== DEPTH / STENCIL =====

/// Comparison operator for depth and stencil tests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Never,
    Less,
    Equal,
    LessOrEqual,
    Greater,
    NotEqual,
    GreaterOrEqual,
    Always,
}

/// Stencil operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StencilOp {
    Keep,
    Zero,
    Replace,
    IncrementAndClamp,
    DecrementAndClamp,
    Invert,
    IncrementAndWrap,
    DecrementAndWrap,
}

/// Stencil operation state (per face)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StencilFaceState {
    pub fail_op: StencilOp,
    pub pass_op: StencilOp,
    pub depth_fail_op: StencilOp,
    pub compare_op: CompareOp,
    pub compare_mask: u32,
    pub write_mask: u32,
    pub reference: u32,
}

impl Default for StencilFaceState {
    fn default() -> Self {
        Self {
            fail_op: StencilOp::Keep,
            pass_op: StencilOp::Keep,
            depth_fail_op: StencilOp::Keep,
            compare_op: CompareOp::Always,
            compare_mask: 0xFF,
            write_mask: 0xFF,
            reference: 0,
        }
    }
}

/// Depth and stencil testing state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepthStencilState {
    pub depth_test_enable: bool,
    pub depth_write_enable: bool,
    pub depth_compare_op: CompareOp,
    pub stencil_test_enable: bool,
    pub front: StencilFaceState,
    pub back: StencilFaceState,
}

impl Default for DepthStencilState {
    fn default() -> Self {
        Self {
            depth_test_enable: true,
            depth_write_enable: true,
            depth_compare_op: CompareOp::Less,
            stencil_test_enable: false,
            front: StencilFaceState::default(),
            back: StencilFaceState::default(),
        }
    }
}

// ===== BLENDING =====

/// Blend factor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendFactor {
    Zero,
    One,
    SrcColor,
    OneMinusSrcColor,
    DstColor,
    OneMinusDstColor,
    SrcAlpha,
    OneMinusSrcAlpha,
    DstAlpha,
    OneMinusDstAlpha,
}

/// Blend operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendOp {
    Add,
    Subtract,
    ReverseSubtract,
    Min,
    Max,
}

/// Color blending state, shared by every color attachment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorBlendState {
    pub blend_enable: bool,
    pub src_color_factor: BlendFactor,
    pub dst_color_factor: BlendFactor,
    pub color_blend_op: BlendOp,
    pub src_alpha_factor: BlendFactor,
    pub dst_alpha_factor: BlendFactor,
    pub alpha_blend_op: BlendOp,
    /// RGBA write mask, bit 0 = red
    pub write_mask: u8,
}

impl ColorBlendState {
    /// Classic `src * a + dst * (1 - a)` blending
    pub fn alpha_blending() -> Self {
        Self {
            blend_enable: true,
            src_color_factor: BlendFactor::SrcAlpha,
            dst_color_factor: BlendFactor::OneMinusSrcAlpha,
            ..Self::default()
        }
    }
}

impl Default for ColorBlendState {
    fn default() -> Self {
        Self {
            blend_enable: false,
            src_color_factor: BlendFactor::One,
            dst_color_factor: BlendFactor::Zero,
            color_blend_op: BlendOp::Add,
            src_alpha_factor: BlendFactor::One,
            dst_alpha_factor: BlendFactor::Zero,
            alpha_blend_op: BlendOp::Add,
            write_mask: 0b1111,
        }
    }
}

// ===== VERTEX INPUT =====

/// Attribute fetched by the vertex shader
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexAttribute {
    pub location: u32,
    pub format: VertexFormat,
    pub offset: u32,
}

/// Layout of one vertex buffer binding
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VertexBufferLayout {
    pub stride: u32,
    pub input_rate: VertexInputRate,
    pub attributes: Vec<VertexAttribute>,
}

impl VertexBufferLayout {
    /// Layout matching `Buffer::define_vertex` with the same elements;
    /// locations are assigned from `first_location` upwards
    pub fn from_elements(first_location: u32, elements: &[VertexElement], input_rate: VertexInputRate) -> Self {
        let (packed, stride) = compute_vertex_layout(elements);
        let attributes = packed
            .iter()
            .enumerate()
            .map(|(i, element)| VertexAttribute {
                location: first_location + i as u32,
                format: element.format,
                offset: element.offset,
            })
            .collect();
        Self { stride, input_rate, attributes }
    }
}

// ===== RESOURCE LAYOUT =====

/// Kind of resource a descriptor slot expects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    UniformBuffer,
    StorageBuffer,
    SampledTexture,
    StorageTexture,
}

/// One descriptor slot used by a pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceLayoutEntry {
    pub set: u32,
    pub binding: u32,
    pub kind: ResourceKind,
    pub stages: ShaderStages,
}

impl ResourceLayoutEntry {
    pub fn new(set: u32, binding: u32, kind: ResourceKind, stages: ShaderStages) -> Self {
        Self { set, binding, kind, stages }
    }
}

fn validate_layout(entries: &[ResourceLayoutEntry]) -> Result<()> {
    for (i, entry) in entries.iter().enumerate() {
        if entry.set >= MAX_DESCRIPTOR_SETS || entry.binding >= MAX_BINDINGS_PER_SET {
            return Err(Error::OutOfRange(format!(
                "resource slot (set {}, binding {}) exceeds ({}, {})",
                entry.set, entry.binding, MAX_DESCRIPTOR_SETS, MAX_BINDINGS_PER_SET
            )));
        }
        if entries[..i].iter().any(|e| e.set == entry.set && e.binding == entry.binding) {
            return Err(Error::InvalidResource(format!(
                "resource slot (set {}, binding {}) declared twice",
                entry.set, entry.binding
            )));
        }
    }
    Ok(())
}

// ===== PIPELINE DESCRIPTORS =====

/// Descriptor for creating a graphics pipeline
#[derive(Debug, Clone)]
pub struct GraphicsPipelineDescriptor {
    pub vertex_shader: Shader,
    pub fragment_shader: Option<Shader>,
    pub vertex_buffers: Vec<VertexBufferLayout>,
    pub topology: PrimitiveTopology,
    pub rasterization: RasterizationState,
    pub depth_stencil: DepthStencilState,
    pub color_blend: ColorBlendState,
    pub color_formats: Vec<TextureFormat>,
    pub depth_stencil_format: Option<TextureFormat>,
    pub sample_count: u32,
    pub resource_layout: Vec<ResourceLayoutEntry>,
}

impl GraphicsPipelineDescriptor {
    /// Pipeline with default state rendering into one color attachment
    pub fn new(vertex_shader: Shader, fragment_shader: Shader, color_format: TextureFormat) -> Self {
        Self {
            vertex_shader,
            fragment_shader: Some(fragment_shader),
            vertex_buffers: Vec::new(),
            topology: PrimitiveTopology::TriangleList,
            rasterization: RasterizationState::default(),
            depth_stencil: DepthStencilState::default(),
            color_blend: ColorBlendState::default(),
            color_formats: vec![color_format],
            depth_stencil_format: None,
            sample_count: 1,
            resource_layout: Vec::new(),
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.vertex_shader.stage() != ShaderStage::Vertex {
            return Err(Error::InvalidResource("vertex_shader is not a vertex shader".to_string()));
        }
        if let Some(fragment) = &self.fragment_shader {
            if fragment.stage() != ShaderStage::Fragment {
                return Err(Error::InvalidResource("fragment_shader is not a fragment shader".to_string()));
            }
        }
        if self.color_formats.len() > MAX_COLOR_ATTACHMENTS {
            return Err(Error::OutOfRange(format!("{} color formats", self.color_formats.len())));
        }
        if self.color_formats.iter().any(|f| f.is_depth()) {
            return Err(Error::InvalidResource("depth format listed as a color format".to_string()));
        }
        if matches!(self.depth_stencil_format, Some(f) if !f.is_depth()) {
            return Err(Error::InvalidResource("depth_stencil_format is not a depth format".to_string()));
        }
        if self.vertex_buffers.len() > MAX_VERTEX_BUFFER_BINDINGS as usize {
            return Err(Error::OutOfRange(format!("{} vertex buffer layouts", self.vertex_buffers.len())));
        }
        let attributes: usize = self.vertex_buffers.iter().map(|b| b.attributes.len()).sum();
        if attributes > MAX_VERTEX_ATTRIBUTES as usize {
            return Err(Error::OutOfRange(format!("{} vertex attributes", attributes)));
        }
        if self.sample_count == 0 {
            return Err(Error::InvalidResource("sample_count must be at least 1".to_string()));
        }
        validate_layout(&self.resource_layout)
    }
}

/// Descriptor for creating a compute pipeline
#[derive(Debug, Clone)]
pub struct ComputePipelineDescriptor {
    pub shader: Shader,
    pub resource_layout: Vec<ResourceLayoutEntry>,
}

impl ComputePipelineDescriptor {
    pub fn new(shader: Shader) -> Self {
        Self { shader, resource_layout: Vec::new() }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.shader.stage() != ShaderStage::Compute {
            return Err(Error::InvalidResource("compute pipeline needs a compute shader".to_string()));
        }
        validate_layout(&self.resource_layout)
    }
}

// ===== PIPELINE =====

/// Graphics or compute; a context binds exactly one kind at a time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineKind {
    Graphics,
    Compute,
}

/// Immutable compiled pipeline
pub struct Pipeline {
    device: WeakRef<DeviceShared>,
    handle: PipelineHandle,
    kind: PipelineKind,
    topology: PrimitiveTopology,
    vertex_buffers: Vec<VertexBufferLayout>,
    resource_layout: Vec<ResourceLayoutEntry>,
    name: String,
}

impl Pipeline {
    pub(crate) fn create_graphics(
        shared: &Ref<DeviceShared>,
        desc: &GraphicsPipelineDescriptor,
        name: &str,
    ) -> Result<Self> {
        desc.validate()?;
        let handle = shared.with_backend(|backend| backend.create_graphics_pipeline(desc))?;
        Ok(Self {
            device: Ref::downgrade(shared),
            handle,
            kind: PipelineKind::Graphics,
            topology: desc.topology,
            vertex_buffers: desc.vertex_buffers.clone(),
            resource_layout: desc.resource_layout.clone(),
            name: name.to_string(),
        })
    }

    pub(crate) fn create_compute(
        shared: &Ref<DeviceShared>,
        desc: &ComputePipelineDescriptor,
        name: &str,
    ) -> Result<Self> {
        desc.validate()?;
        let handle = shared.with_backend(|backend| backend.create_compute_pipeline(desc))?;
        Ok(Self {
            device: Ref::downgrade(shared),
            handle,
            kind: PipelineKind::Compute,
            topology: PrimitiveTopology::default(),
            vertex_buffers: Vec::new(),
            resource_layout: desc.resource_layout.clone(),
            name: name.to_string(),
        })
    }

    pub fn kind(&self) -> PipelineKind {
        self.kind
    }

    pub fn is_compute(&self) -> bool {
        self.kind == PipelineKind::Compute
    }

    pub fn topology(&self) -> PrimitiveTopology {
        self.topology
    }

    pub fn vertex_buffers(&self) -> &[VertexBufferLayout] {
        &self.vertex_buffers
    }

    pub fn resource_layout(&self) -> &[ResourceLayoutEntry] {
        &self.resource_layout
    }

    /// Bitmask of descriptor sets the pipeline reads
    pub fn used_sets(&self) -> u32 {
        self.resource_layout.iter().fold(0, |mask, entry| mask | (1 << entry.set))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn handle(&self) -> PipelineHandle {
        self.handle
    }

    pub(crate) fn belongs_to(&self, shared: &Ref<DeviceShared>) -> bool {
        self.device.lock().map_or(false, |owner| Ref::ptr_eq(&owner, shared))
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        let handle = self.handle;
        let _ = with_backend(&self.device, |backend| {
            backend.destroy_pipeline(handle);
            Ok(())
        });
    }
}

#[cfg(test)]
#[path = "pipeline_tests.rs"]
mod tests;
