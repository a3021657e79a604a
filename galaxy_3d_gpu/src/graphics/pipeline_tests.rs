//! Unit tests for pipeline.rs

use serial_test::serial;

use super::*;
use crate::graphics::test_utils::{compute_pipeline, fake_spirv, graphics_pipeline, shader, software_device};

fn graphics_desc() -> GraphicsPipelineDescriptor {
    GraphicsPipelineDescriptor::new(
        shader(ShaderStage::Vertex),
        shader(ShaderStage::Fragment),
        TextureFormat::R8G8B8A8_UNORM,
    )
}

// ============================================================================
// SHADERS
// ============================================================================

#[test]
fn test_shader_from_bytes() {
    let bytes: Vec<u8> = fake_spirv().iter().flat_map(|w| w.to_le_bytes()).collect();
    let shader = Shader::from_spirv_bytes(ShaderStage::Fragment, &bytes).unwrap();
    assert_eq!(shader.stage(), ShaderStage::Fragment);
    assert_eq!(shader.code(), &fake_spirv()[..]);
    assert_eq!(shader.entry_point(), "main");
}

#[test]
fn test_shader_rejects_non_spirv() {
    assert!(Shader::from_spirv_bytes(ShaderStage::Vertex, &[0; 6]).is_err());
    assert!(Shader::from_spirv_words(ShaderStage::Vertex, vec![0; 8]).is_err());
    assert!(Shader::from_spirv_words(ShaderStage::Vertex, vec![SPIRV_MAGIC]).is_err());
}

#[test]
fn test_shader_entry_point() {
    let shader = shader(ShaderStage::Compute).with_entry_point("cs_main");
    assert_eq!(shader.entry_point(), "cs_main");
}

// ============================================================================
// DESCRIPTORS
// ============================================================================

#[test]
fn test_vertex_layout_from_elements() {
    let elements = [VertexElement::new(VertexFormat::Float3), VertexElement::new(VertexFormat::UByte4N)];
    let layout = VertexBufferLayout::from_elements(2, &elements, VertexInputRate::Instance);
    assert_eq!(layout.stride, 16);
    assert_eq!(layout.input_rate, VertexInputRate::Instance);
    assert_eq!(layout.attributes[0].location, 2);
    assert_eq!(layout.attributes[1].location, 3);
    assert_eq!(layout.attributes[1].offset, 12);
}

#[test]
fn test_graphics_descriptor_defaults_are_valid() {
    let desc = graphics_desc();
    assert!(desc.validate().is_ok());
    assert_eq!(desc.topology, PrimitiveTopology::TriangleList);
    assert_eq!(desc.rasterization.cull_mode, CullMode::Back);
    assert!(!desc.color_blend.blend_enable);
}

#[test]
fn test_graphics_descriptor_validation() {
    let mut desc = graphics_desc();
    desc.vertex_shader = shader(ShaderStage::Fragment);
    assert!(desc.validate().is_err());

    let mut desc = graphics_desc();
    desc.color_formats = vec![TextureFormat::D32_FLOAT];
    assert!(desc.validate().is_err());

    let mut desc = graphics_desc();
    desc.depth_stencil_format = Some(TextureFormat::R8_UNORM);
    assert!(desc.validate().is_err());

    let mut desc = graphics_desc();
    desc.sample_count = 0;
    assert!(desc.validate().is_err());

    let mut desc = graphics_desc();
    let layout = VertexBufferLayout::from_elements(0, &[VertexElement::new(VertexFormat::Float)], VertexInputRate::Vertex);
    desc.vertex_buffers = vec![layout; MAX_VERTEX_BUFFER_BINDINGS as usize + 1];
    assert!(matches!(desc.validate(), Err(Error::OutOfRange(_))));
}

#[test]
fn test_resource_layout_validation() {
    let mut desc = ComputePipelineDescriptor::new(shader(ShaderStage::Compute));
    desc.resource_layout = vec![
        ResourceLayoutEntry::new(0, 0, ResourceKind::UniformBuffer, ShaderStages::COMPUTE),
        ResourceLayoutEntry::new(0, 0, ResourceKind::StorageBuffer, ShaderStages::COMPUTE),
    ];
    assert!(matches!(desc.validate(), Err(Error::InvalidResource(_))));

    desc.resource_layout = vec![ResourceLayoutEntry::new(
        MAX_DESCRIPTOR_SETS,
        0,
        ResourceKind::UniformBuffer,
        ShaderStages::COMPUTE,
    )];
    assert!(matches!(desc.validate(), Err(Error::OutOfRange(_))));

    let wrong_stage = ComputePipelineDescriptor::new(shader(ShaderStage::Vertex));
    assert!(wrong_stage.validate().is_err());
}

// ============================================================================
// PIPELINES
// ============================================================================

#[test]
#[serial]
fn test_create_pipelines() {
    let device = software_device(false);
    let layout = vec![
        ResourceLayoutEntry::new(0, 0, ResourceKind::UniformBuffer, ShaderStages::ALL_GRAPHICS),
        ResourceLayoutEntry::new(2, 1, ResourceKind::SampledTexture, ShaderStages::FRAGMENT),
    ];
    let graphics = graphics_pipeline(&device, Vec::new(), layout);
    assert_eq!(graphics.kind(), PipelineKind::Graphics);
    assert!(!graphics.is_compute());
    assert_eq!(graphics.used_sets(), 0b101);
    assert_eq!(graphics.name(), "test graphics");

    let compute = compute_pipeline(&device, Vec::new());
    assert!(compute.is_compute());
    assert_eq!(compute.used_sets(), 0);
}

#[test]
#[serial]
fn test_invalid_descriptor_never_reaches_backend() {
    let device = software_device(false);
    let mut desc = graphics_desc();
    desc.fragment_shader = Some(shader(ShaderStage::Vertex));
    assert!(device.create_graphics_pipeline("broken", &desc).is_err());
}
