//! Backend-agnostic graphics API

pub mod binding_state;
pub mod buffer;
pub mod command_context;
pub mod device;
pub mod format;
pub mod framebuffer;
pub mod pipeline;
pub(crate) mod swapchain;
pub mod texture;
pub mod types;

#[cfg(test)]
pub(crate) mod test_utils;

pub use crate::backend::{BackendStats, ResourceBinding, TextureViewKind};
pub use binding_state::{BindingState, DirtyFlags};
pub use buffer::{compute_vertex_layout, Buffer, BufferDescriptor};
pub use command_context::{group_count, CommandContext};
pub use device::{Device, DeviceDescriptor, DeviceShared, SurfaceDescriptor, WindowHandle};
pub use format::{TextureFormat, VertexElement, VertexFormat};
pub use framebuffer::{
    Framebuffer, FramebufferAttachment, FramebufferDescriptor, RenderPassColorAttachment,
    RenderPassDepthStencilAttachment, RenderPassDescriptor,
};
pub use pipeline::{
    BlendFactor, BlendOp, ColorBlendState, CompareOp, ComputePipelineDescriptor, CullMode,
    DepthStencilState, FrontFace, GraphicsPipelineDescriptor, Pipeline, PipelineKind, PolygonMode,
    RasterizationState, ResourceKind, ResourceLayoutEntry, Shader, ShaderStage, StencilFaceState,
    StencilOp, VertexAttribute, VertexBufferLayout,
};
pub use texture::{max_mip_levels, normalize_view, Texture, TextureDescriptor};
pub use types::*;
