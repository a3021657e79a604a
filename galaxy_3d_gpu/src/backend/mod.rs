//! Backend contract and dispatch
//!
//! Every native API implements two traits: [`GraphicsImpl`] for the device and
//! [`CommandBufferImpl`] for command recording. The core never sees native
//! types: resources are referenced through opaque slot-map handles, and the
//! concrete backend is selected once, at device creation, as one variant of
//! [`BackendDevice`] / [`BackendCommandBuffer`].

pub mod software;
#[cfg(feature = "vulkan")]
pub mod vulkan;

use slotmap::new_key_type;

use crate::config::DeviceConfig;
use crate::error::{Error, Result};
use crate::graphics::{
    Backend, BufferDescriptor, ComputePipelineDescriptor, GpuCapabilities,
    GraphicsPipelineDescriptor, IndexType, Rect2D, RenderPassDescriptor, SurfaceDescriptor,
    TextureDescriptor, TextureFormat, Viewport,
};

use software::{SoftwareCommandBuffer, SoftwareDevice};
#[cfg(feature = "vulkan")]
use vulkan::{VulkanCommandBuffer, VulkanDevice};

// ===== HANDLES =====

new_key_type! {
    /// Backend buffer object
    pub struct BufferHandle;
    /// Backend texture object (image + memory)
    pub struct TextureHandle;
    /// Backend view over a texture subresource range
    pub struct ViewHandle;
    /// Backend framebuffer (attachment set)
    pub struct FramebufferHandle;
    /// Backend graphics or compute pipeline
    pub struct PipelineHandle;
}

// ===== BACKEND-FACING DESCRIPTIONS =====

/// Kind of view requested on a texture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureViewKind {
    ShaderRead,
    ShaderWrite,
    RenderTarget,
    DepthStencil,
}

/// Normalized subresource range of a view (counts are never "remaining")
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureViewDesc {
    pub kind: TextureViewKind,
    pub base_mip: u32,
    pub mip_count: u32,
    pub base_layer: u32,
    pub layer_count: u32,
}

/// One attachment of a framebuffer, as seen by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachmentTarget {
    pub texture: TextureHandle,
    pub view: ViewHandle,
    pub format: TextureFormat,
    pub sample_count: u32,
    pub mip_level: u32,
    pub base_layer: u32,
    pub layer_count: u32,
}

/// Attachment set of a framebuffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramebufferLayout {
    pub colors: Vec<AttachmentTarget>,
    pub depth_stencil: Option<AttachmentTarget>,
    pub width: u32,
    pub height: u32,
    pub layers: u32,
}

/// Resource written into a descriptor set slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceBinding {
    UniformBuffer { buffer: BufferHandle, offset: u64, range: u64 },
    StorageBuffer { buffer: BufferHandle, offset: u64, range: u64 },
    SampledTexture { view: ViewHandle },
    StorageTexture { view: ViewHandle },
}

/// Counters of work received by a backend since creation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackendStats {
    pub draw_calls: u64,
    pub dispatches: u64,
    /// Sum of x * y * z over every dispatch
    pub dispatched_groups: u64,
    pub render_passes: u64,
    pub pipeline_binds: u64,
    pub vertex_buffer_binds: u64,
    pub index_buffer_binds: u64,
    pub resource_set_binds: u64,
    pub submissions: u64,
}

// ===== CONTRACT =====

/// Device-level backend contract
pub trait GraphicsImpl: Send {
    type CommandBuffer: CommandBufferImpl<Device = Self>;

    fn backend(&self) -> Backend;
    fn capabilities(&self) -> GpuCapabilities;
    fn stats(&self) -> BackendStats;

    /// Block until every submission has retired
    fn wait_idle(&mut self) -> Result<()>;
    /// Highest fence value known to have retired
    fn completed_fence_value(&mut self) -> Result<u64>;

    // Frame / swapchain
    fn begin_frame(&mut self) -> Result<()>;
    fn end_frame(&mut self) -> Result<()>;
    fn resize_swapchain(&mut self, width: u32, height: u32) -> Result<()>;
    fn swapchain_descriptor(&self) -> TextureDescriptor;
    fn swapchain_textures(&self) -> Vec<TextureHandle>;
    fn current_swapchain_index(&self) -> usize;

    // Buffers
    fn create_buffer(&mut self, desc: &BufferDescriptor, data: Option<&[u8]>) -> Result<BufferHandle>;
    fn update_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) -> Result<()>;
    fn read_buffer(&mut self, buffer: BufferHandle) -> Result<Vec<u8>>;
    fn destroy_buffer(&mut self, buffer: BufferHandle);

    // Textures
    fn create_texture(
        &mut self,
        desc: &TextureDescriptor,
        typeless: bool,
        data: Option<&[u8]>,
    ) -> Result<TextureHandle>;
    fn read_texture(&mut self, texture: TextureHandle, mip_level: u32, layer: u32) -> Result<Vec<u8>>;
    fn destroy_texture(&mut self, texture: TextureHandle);
    fn create_texture_view(&mut self, texture: TextureHandle, desc: &TextureViewDesc) -> Result<ViewHandle>;
    fn destroy_texture_view(&mut self, view: ViewHandle);

    // Framebuffers / pipelines
    fn create_framebuffer(&mut self, layout: &FramebufferLayout) -> Result<FramebufferHandle>;
    fn destroy_framebuffer(&mut self, framebuffer: FramebufferHandle);
    fn create_graphics_pipeline(&mut self, desc: &GraphicsPipelineDescriptor) -> Result<PipelineHandle>;
    fn create_compute_pipeline(&mut self, desc: &ComputePipelineDescriptor) -> Result<PipelineHandle>;
    fn destroy_pipeline(&mut self, pipeline: PipelineHandle);

    fn create_command_buffer(&mut self) -> Result<Self::CommandBuffer>;
    fn destroy_command_buffer(&mut self, command_buffer: Self::CommandBuffer);
}

/// Command recording contract
///
/// The core only calls these after its own state validation, so backends may
/// assume a well-formed command stream (render pass bracket respected, counts
/// non-zero, pipeline of the right kind bound).
pub trait CommandBufferImpl: Send {
    type Device;

    fn begin_render_pass(
        &mut self,
        device: &mut Self::Device,
        framebuffer: FramebufferHandle,
        desc: &RenderPassDescriptor,
    ) -> Result<()>;
    fn end_render_pass(&mut self, device: &mut Self::Device) -> Result<()>;
    fn set_viewport(&mut self, device: &mut Self::Device, viewport: &Viewport) -> Result<()>;
    fn set_scissor(&mut self, device: &mut Self::Device, scissor: &Rect2D) -> Result<()>;
    fn bind_pipeline(&mut self, device: &mut Self::Device, pipeline: PipelineHandle) -> Result<()>;
    fn bind_vertex_buffers(
        &mut self,
        device: &mut Self::Device,
        first_binding: u32,
        buffers: &[(BufferHandle, u64)],
    ) -> Result<()>;
    fn bind_index_buffer(
        &mut self,
        device: &mut Self::Device,
        buffer: BufferHandle,
        offset: u64,
        index_type: IndexType,
    ) -> Result<()>;
    fn bind_resource_set(
        &mut self,
        device: &mut Self::Device,
        set: u32,
        bindings: &[(u32, ResourceBinding)],
    ) -> Result<()>;
    fn draw(
        &mut self,
        device: &mut Self::Device,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) -> Result<()>;
    fn draw_indexed(
        &mut self,
        device: &mut Self::Device,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) -> Result<()>;
    fn dispatch(&mut self, device: &mut Self::Device, x: u32, y: u32, z: u32) -> Result<()>;
    /// Submit everything recorded so far; returns the submission's fence value
    fn flush(&mut self, device: &mut Self::Device, wait_for_completion: bool) -> Result<u64>;
}

// ===== DISPATCH =====

/// The device-level backend selected at creation
pub enum BackendDevice {
    Software(SoftwareDevice),
    #[cfg(feature = "vulkan")]
    Vulkan(VulkanDevice),
}

/// Command buffer of the matching backend
pub enum BackendCommandBuffer {
    Software(SoftwareCommandBuffer),
    #[cfg(feature = "vulkan")]
    Vulkan(VulkanCommandBuffer),
}

macro_rules! with_device {
    ($self:expr, $device:ident => $body:expr) => {
        match $self {
            BackendDevice::Software($device) => $body,
            #[cfg(feature = "vulkan")]
            BackendDevice::Vulkan($device) => $body,
        }
    };
}

macro_rules! with_command_buffer {
    ($self:expr, $device:expr, ($cmd:ident, $dev:ident) => $body:expr) => {
        match ($self, $device) {
            (BackendCommandBuffer::Software($cmd), BackendDevice::Software($dev)) => $body,
            #[cfg(feature = "vulkan")]
            (BackendCommandBuffer::Vulkan($cmd), BackendDevice::Vulkan($dev)) => $body,
            #[allow(unreachable_patterns)]
            _ => Err(Error::BackendError(
                "command buffer used with a device of another backend".to_string(),
            )),
        }
    };
}

impl BackendDevice {
    /// Initialize exactly one concrete backend
    ///
    /// `Backend::Default` must be resolved by the caller.
    pub fn create(backend: Backend, config: &DeviceConfig, surface: &SurfaceDescriptor) -> Result<Self> {
        match backend {
            Backend::Software => Ok(BackendDevice::Software(SoftwareDevice::new(config, surface)?)),
            #[cfg(feature = "vulkan")]
            Backend::Vulkan => Ok(BackendDevice::Vulkan(VulkanDevice::new(config, surface)?)),
            #[cfg(not(feature = "vulkan"))]
            Backend::Vulkan => Err(Error::InitializationFailed(
                "Vulkan support is not compiled in (enable the `vulkan` feature)".to_string(),
            )),
            Backend::D3D11 | Backend::D3D12 => Err(Error::InitializationFailed(format!(
                "{} is not available on this host",
                backend
            ))),
            Backend::Default => Err(Error::InitializationFailed(
                "Backend::Default must be resolved before creating a backend".to_string(),
            )),
        }
    }

    pub fn backend(&self) -> Backend {
        with_device!(self, d => d.backend())
    }

    pub fn capabilities(&self) -> GpuCapabilities {
        with_device!(self, d => d.capabilities())
    }

    pub fn stats(&self) -> BackendStats {
        with_device!(self, d => d.stats())
    }

    pub fn wait_idle(&mut self) -> Result<()> {
        with_device!(self, d => d.wait_idle())
    }

    pub fn completed_fence_value(&mut self) -> Result<u64> {
        with_device!(self, d => d.completed_fence_value())
    }

    pub fn begin_frame(&mut self) -> Result<()> {
        with_device!(self, d => d.begin_frame())
    }

    pub fn end_frame(&mut self) -> Result<()> {
        with_device!(self, d => d.end_frame())
    }

    pub fn resize_swapchain(&mut self, width: u32, height: u32) -> Result<()> {
        with_device!(self, d => d.resize_swapchain(width, height))
    }

    pub fn swapchain_descriptor(&self) -> TextureDescriptor {
        with_device!(self, d => d.swapchain_descriptor())
    }

    pub fn swapchain_textures(&self) -> Vec<TextureHandle> {
        with_device!(self, d => d.swapchain_textures())
    }

    pub fn current_swapchain_index(&self) -> usize {
        with_device!(self, d => d.current_swapchain_index())
    }

    pub fn create_buffer(&mut self, desc: &BufferDescriptor, data: Option<&[u8]>) -> Result<BufferHandle> {
        with_device!(self, d => d.create_buffer(desc, data))
    }

    pub fn update_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) -> Result<()> {
        with_device!(self, d => d.update_buffer(buffer, offset, data))
    }

    pub fn read_buffer(&mut self, buffer: BufferHandle) -> Result<Vec<u8>> {
        with_device!(self, d => d.read_buffer(buffer))
    }

    pub fn destroy_buffer(&mut self, buffer: BufferHandle) {
        with_device!(self, d => d.destroy_buffer(buffer))
    }

    pub fn create_texture(
        &mut self,
        desc: &TextureDescriptor,
        typeless: bool,
        data: Option<&[u8]>,
    ) -> Result<TextureHandle> {
        with_device!(self, d => d.create_texture(desc, typeless, data))
    }

    pub fn read_texture(&mut self, texture: TextureHandle, mip_level: u32, layer: u32) -> Result<Vec<u8>> {
        with_device!(self, d => d.read_texture(texture, mip_level, layer))
    }

    pub fn destroy_texture(&mut self, texture: TextureHandle) {
        with_device!(self, d => d.destroy_texture(texture))
    }

    pub fn create_texture_view(&mut self, texture: TextureHandle, desc: &TextureViewDesc) -> Result<ViewHandle> {
        with_device!(self, d => d.create_texture_view(texture, desc))
    }

    pub fn destroy_texture_view(&mut self, view: ViewHandle) {
        with_device!(self, d => d.destroy_texture_view(view))
    }

    pub fn create_framebuffer(&mut self, layout: &FramebufferLayout) -> Result<FramebufferHandle> {
        with_device!(self, d => d.create_framebuffer(layout))
    }

    pub fn destroy_framebuffer(&mut self, framebuffer: FramebufferHandle) {
        with_device!(self, d => d.destroy_framebuffer(framebuffer))
    }

    pub fn create_graphics_pipeline(&mut self, desc: &GraphicsPipelineDescriptor) -> Result<PipelineHandle> {
        with_device!(self, d => d.create_graphics_pipeline(desc))
    }

    pub fn create_compute_pipeline(&mut self, desc: &ComputePipelineDescriptor) -> Result<PipelineHandle> {
        with_device!(self, d => d.create_compute_pipeline(desc))
    }

    pub fn destroy_pipeline(&mut self, pipeline: PipelineHandle) {
        with_device!(self, d => d.destroy_pipeline(pipeline))
    }

    pub fn create_command_buffer(&mut self) -> Result<BackendCommandBuffer> {
        match self {
            BackendDevice::Software(d) => Ok(BackendCommandBuffer::Software(d.create_command_buffer()?)),
            #[cfg(feature = "vulkan")]
            BackendDevice::Vulkan(d) => Ok(BackendCommandBuffer::Vulkan(d.create_command_buffer()?)),
        }
    }

    pub fn destroy_command_buffer(&mut self, command_buffer: BackendCommandBuffer) {
        match (self, command_buffer) {
            (BackendDevice::Software(d), BackendCommandBuffer::Software(c)) => d.destroy_command_buffer(c),
            #[cfg(feature = "vulkan")]
            (BackendDevice::Vulkan(d), BackendCommandBuffer::Vulkan(c)) => d.destroy_command_buffer(c),
            #[allow(unreachable_patterns)]
            _ => crate::engine_warn!(
                "galaxy3d::backend",
                "Command buffer released to a device of another backend"
            ),
        }
    }
}

impl BackendCommandBuffer {
    pub fn begin_render_pass(
        &mut self,
        device: &mut BackendDevice,
        framebuffer: FramebufferHandle,
        desc: &RenderPassDescriptor,
    ) -> Result<()> {
        with_command_buffer!(self, device, (c, d) => c.begin_render_pass(d, framebuffer, desc))
    }

    pub fn end_render_pass(&mut self, device: &mut BackendDevice) -> Result<()> {
        with_command_buffer!(self, device, (c, d) => c.end_render_pass(d))
    }

    pub fn set_viewport(&mut self, device: &mut BackendDevice, viewport: &Viewport) -> Result<()> {
        with_command_buffer!(self, device, (c, d) => c.set_viewport(d, viewport))
    }

    pub fn set_scissor(&mut self, device: &mut BackendDevice, scissor: &Rect2D) -> Result<()> {
        with_command_buffer!(self, device, (c, d) => c.set_scissor(d, scissor))
    }

    pub fn bind_pipeline(&mut self, device: &mut BackendDevice, pipeline: PipelineHandle) -> Result<()> {
        with_command_buffer!(self, device, (c, d) => c.bind_pipeline(d, pipeline))
    }

    pub fn bind_vertex_buffers(
        &mut self,
        device: &mut BackendDevice,
        first_binding: u32,
        buffers: &[(BufferHandle, u64)],
    ) -> Result<()> {
        with_command_buffer!(self, device, (c, d) => c.bind_vertex_buffers(d, first_binding, buffers))
    }

    pub fn bind_index_buffer(
        &mut self,
        device: &mut BackendDevice,
        buffer: BufferHandle,
        offset: u64,
        index_type: IndexType,
    ) -> Result<()> {
        with_command_buffer!(self, device, (c, d) => c.bind_index_buffer(d, buffer, offset, index_type))
    }

    pub fn bind_resource_set(
        &mut self,
        device: &mut BackendDevice,
        set: u32,
        bindings: &[(u32, ResourceBinding)],
    ) -> Result<()> {
        with_command_buffer!(self, device, (c, d) => c.bind_resource_set(d, set, bindings))
    }

    pub fn draw(
        &mut self,
        device: &mut BackendDevice,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) -> Result<()> {
        with_command_buffer!(self, device, (c, d) =>
            c.draw(d, vertex_count, instance_count, first_vertex, first_instance))
    }

    pub fn draw_indexed(
        &mut self,
        device: &mut BackendDevice,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) -> Result<()> {
        with_command_buffer!(self, device, (c, d) =>
            c.draw_indexed(d, index_count, instance_count, first_index, vertex_offset, first_instance))
    }

    pub fn dispatch(&mut self, device: &mut BackendDevice, x: u32, y: u32, z: u32) -> Result<()> {
        with_command_buffer!(self, device, (c, d) => c.dispatch(d, x, y, z))
    }

    pub fn flush(&mut self, device: &mut BackendDevice, wait_for_completion: bool) -> Result<u64> {
        with_command_buffer!(self, device, (c, d) => c.flush(d, wait_for_completion))
    }
}

#[cfg(test)]
#[path = "backend_tests.rs"]
mod tests;
