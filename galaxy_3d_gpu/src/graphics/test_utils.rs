//! Helpers shared by the graphics unit tests

use crate::graphics::{
    Backend, ComputePipelineDescriptor, Device, DeviceDescriptor, GraphicsPipelineDescriptor, Pipeline,
    ResourceLayoutEntry, Shader, ShaderStage, Texture, TextureDescriptor, TextureFormat, TextureUsage,
    VertexBufferLayout,
};
use crate::ptr::Ref;

/// Smallest word sequence accepted as a SPIR-V module
pub fn fake_spirv() -> Vec<u32> {
    vec![0x0723_0203, 0x0001_0000, 0, 1, 0]
}

pub fn shader(stage: ShaderStage) -> Shader {
    Shader::from_spirv_words(stage, fake_spirv()).unwrap()
}

/// Headless 64x64 software device
pub fn software_device(validation: bool) -> Device {
    let mut desc = DeviceDescriptor::new(Backend::Software);
    desc.surface.width = 64;
    desc.surface.height = 64;
    desc.config.enable_validation = validation;
    Device::create(&desc).unwrap()
}

pub fn graphics_pipeline(
    device: &Device,
    vertex_buffers: Vec<VertexBufferLayout>,
    resource_layout: Vec<ResourceLayoutEntry>,
) -> Ref<Pipeline> {
    let mut desc = GraphicsPipelineDescriptor::new(
        shader(ShaderStage::Vertex),
        shader(ShaderStage::Fragment),
        TextureFormat::R8G8B8A8_UNORM,
    );
    desc.vertex_buffers = vertex_buffers;
    desc.resource_layout = resource_layout;
    device.create_graphics_pipeline("test graphics", &desc).unwrap()
}

pub fn compute_pipeline(device: &Device, resource_layout: Vec<ResourceLayoutEntry>) -> Ref<Pipeline> {
    let mut desc = ComputePipelineDescriptor::new(shader(ShaderStage::Compute));
    desc.resource_layout = resource_layout;
    device.create_compute_pipeline("test compute", &desc).unwrap()
}

pub fn render_target(device: &Device, width: u32, height: u32) -> Ref<Texture> {
    let desc = TextureDescriptor::new_2d(
        width,
        height,
        TextureFormat::R8G8B8A8_UNORM,
        TextureUsage::RENDER_TARGET | TextureUsage::SHADER_READ,
    );
    device.create_texture(&desc, None).unwrap()
}
