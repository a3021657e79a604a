//! Software device: CPU storage for every resource

use slotmap::SlotMap;

use crate::backend::software::encode::{encode_color, encode_depth_stencil, fill};
use crate::backend::software::SoftwareCommandBuffer;
use crate::backend::{
    BackendStats, BufferHandle, FramebufferHandle, FramebufferLayout, GraphicsImpl, PipelineHandle,
    TextureHandle, TextureViewDesc, ViewHandle,
};
use crate::config::DeviceConfig;
use crate::error::{Error, Result};
use crate::graphics::{
    Backend, BufferDescriptor, ComputePipelineDescriptor, FeatureTier, GpuCapabilities, GpuLimits, GpuVendor,
    GraphicsPipelineDescriptor, LoadAction, RenderPassDescriptor, SurfaceDescriptor, TextureDescriptor,
    TextureUsage,
};
use crate::{engine_bail, engine_debug, engine_info, engine_warn};

const VENDOR_ID: u32 = 0x10005;

pub(crate) struct SoftwareBuffer {
    pub(crate) data: Vec<u8>,
}

pub(crate) struct SoftwareTexture {
    pub(crate) descriptor: TextureDescriptor,
    /// Layer-major: index = layer * mip_levels + mip
    pub(crate) subresources: Vec<Vec<u8>>,
}

impl SoftwareTexture {
    fn subresource_mut(&mut self, mip: u32, layer: u32) -> Option<&mut Vec<u8>> {
        let index = (layer * self.descriptor.mip_levels + mip) as usize;
        self.subresources.get_mut(index)
    }
}

pub(crate) struct SoftwareView {
    pub(crate) texture: TextureHandle,
    pub(crate) desc: TextureViewDesc,
}

pub(crate) struct SoftwarePipeline {
    pub(crate) compute: bool,
}

/// Headless reference device
///
/// Buffers and textures live in CPU memory. Submissions execute
/// synchronously at flush: render pass load actions are applied, draws and
/// dispatches are counted. The fence counter is device-wide.
pub struct SoftwareDevice {
    pub(crate) buffers: SlotMap<BufferHandle, SoftwareBuffer>,
    pub(crate) textures: SlotMap<TextureHandle, SoftwareTexture>,
    pub(crate) views: SlotMap<ViewHandle, SoftwareView>,
    pub(crate) framebuffers: SlotMap<FramebufferHandle, FramebufferLayout>,
    pub(crate) pipelines: SlotMap<PipelineHandle, SoftwarePipeline>,
    swapchain: Vec<TextureHandle>,
    swapchain_descriptor: TextureDescriptor,
    image_count: u32,
    current_image: usize,
    frame_open: bool,
    last_fence: u64,
    pub(crate) stats: BackendStats,
    command_buffers: usize,
}

impl SoftwareDevice {
    pub fn new(config: &DeviceConfig, surface: &SurfaceDescriptor) -> Result<Self> {
        if surface.window.is_some() {
            engine_warn!(
                "galaxy3d::software",
                "The software device does not present to windows; rendering offscreen"
            );
        }
        if surface.width == 0 || surface.height == 0 {
            engine_bail!(
                "galaxy3d::software",
                "Invalid swapchain size {}x{}",
                surface.width,
                surface.height
            );
        }

        let mut device = Self {
            buffers: SlotMap::with_key(),
            textures: SlotMap::with_key(),
            views: SlotMap::with_key(),
            framebuffers: SlotMap::with_key(),
            pipelines: SlotMap::with_key(),
            swapchain: Vec::new(),
            swapchain_descriptor: Self::swapchain_texture_descriptor(surface, surface.width, surface.height),
            image_count: surface.image_count.max(1),
            current_image: 0,
            frame_open: false,
            last_fence: 0,
            stats: BackendStats::default(),
            command_buffers: 0,
        };
        device.create_swapchain_images()?;
        engine_info!(
            "galaxy3d::software",
            "Software device ready for '{}' ({} offscreen images {}x{})",
            config.app_name,
            device.image_count,
            surface.width,
            surface.height
        );
        Ok(device)
    }

    fn swapchain_texture_descriptor(surface: &SurfaceDescriptor, width: u32, height: u32) -> TextureDescriptor {
        TextureDescriptor::new_2d(
            width,
            height,
            surface.format,
            TextureUsage::RENDER_TARGET | TextureUsage::SHADER_READ,
        )
    }

    fn create_swapchain_images(&mut self) -> Result<()> {
        let descriptor = self.swapchain_descriptor;
        for _ in 0..self.image_count {
            let handle = self.create_texture(&descriptor, false, None)?;
            self.swapchain.push(handle);
        }
        Ok(())
    }

    fn destroy_swapchain_images(&mut self) {
        for handle in std::mem::take(&mut self.swapchain) {
            self.textures.remove(handle);
        }
    }

    pub(crate) fn next_fence(&mut self) -> u64 {
        self.last_fence += 1;
        self.last_fence
    }

    pub(crate) fn pipeline_is_compute(&self, pipeline: PipelineHandle) -> Option<bool> {
        self.pipelines.get(pipeline).map(|p| p.compute)
    }

    /// Apply the load actions of a render pass to its attachments
    pub(crate) fn execute_load_actions(
        &mut self,
        framebuffer: FramebufferHandle,
        desc: &RenderPassDescriptor,
    ) -> Result<()> {
        let Some(layout) = self.framebuffers.get(framebuffer).cloned() else {
            engine_bail!("galaxy3d::software", "Render pass on a destroyed framebuffer");
        };

        for (index, target) in layout.colors.iter().enumerate() {
            let attachment = &desc.color_attachments[index];
            if attachment.load_action != LoadAction::Clear {
                continue;
            }
            let texel = encode_color(target.format, attachment.clear_color);
            self.fill_target(target.texture, target.mip_level, target.base_layer, target.layer_count, &texel)?;
        }
        if let Some(target) = &layout.depth_stencil {
            let attachment = &desc.depth_stencil_attachment;
            if attachment.load_action == LoadAction::Clear {
                let texel = encode_depth_stencil(target.format, attachment.clear_depth, attachment.clear_stencil);
                self.fill_target(target.texture, target.mip_level, target.base_layer, target.layer_count, &texel)?;
            }
        }
        Ok(())
    }

    fn fill_target(&mut self, texture: TextureHandle, mip: u32, base_layer: u32, layer_count: u32, texel: &[u8]) -> Result<()> {
        let Some(storage) = self.textures.get_mut(texture) else {
            engine_bail!("galaxy3d::software", "Render pass attachment was destroyed");
        };
        for layer in base_layer..base_layer + layer_count {
            if let Some(bytes) = storage.subresource_mut(mip, layer) {
                fill(bytes, texel);
            }
        }
        Ok(())
    }
}

impl GraphicsImpl for SoftwareDevice {
    type CommandBuffer = SoftwareCommandBuffer;

    fn backend(&self) -> Backend {
        Backend::Software
    }

    fn capabilities(&self) -> GpuCapabilities {
        GpuCapabilities {
            backend: Backend::Software,
            vendor_id: VENDOR_ID,
            vendor: GpuVendor::from_vendor_id(VENDOR_ID),
            device_name: "Galaxy3D Software Device".to_string(),
            feature_tier: FeatureTier::Level11,
            limits: GpuLimits::default(),
        }
    }

    fn stats(&self) -> BackendStats {
        self.stats
    }

    fn wait_idle(&mut self) -> Result<()> {
        // Submissions complete inside flush.
        Ok(())
    }

    fn completed_fence_value(&mut self) -> Result<u64> {
        Ok(self.last_fence)
    }

    // ===== FRAME =====

    fn begin_frame(&mut self) -> Result<()> {
        if self.frame_open {
            engine_bail!("galaxy3d::software", "begin_frame called twice");
        }
        self.frame_open = true;
        Ok(())
    }

    fn end_frame(&mut self) -> Result<()> {
        if !self.frame_open {
            engine_bail!("galaxy3d::software", "end_frame called without begin_frame");
        }
        self.frame_open = false;
        self.current_image = (self.current_image + 1) % self.swapchain.len().max(1);
        Ok(())
    }

    fn resize_swapchain(&mut self, width: u32, height: u32) -> Result<()> {
        if width == 0 || height == 0 {
            engine_bail!("galaxy3d::software", "Invalid swapchain size {}x{}", width, height);
        }
        self.destroy_swapchain_images();
        self.swapchain_descriptor.width = width;
        self.swapchain_descriptor.height = height;
        self.current_image = 0;
        self.create_swapchain_images()?;
        engine_debug!("galaxy3d::software", "Offscreen swapchain resized to {}x{}", width, height);
        Ok(())
    }

    fn swapchain_descriptor(&self) -> TextureDescriptor {
        self.swapchain_descriptor
    }

    fn swapchain_textures(&self) -> Vec<TextureHandle> {
        self.swapchain.clone()
    }

    fn current_swapchain_index(&self) -> usize {
        self.current_image
    }

    // ===== BUFFERS =====

    fn create_buffer(&mut self, desc: &BufferDescriptor, data: Option<&[u8]>) -> Result<BufferHandle> {
        let size = desc.size as usize;
        let mut storage = vec![0u8; size];
        if let Some(bytes) = data {
            let count = bytes.len().min(size);
            storage[..count].copy_from_slice(&bytes[..count]);
        }
        Ok(self.buffers.insert(SoftwareBuffer { data: storage }))
    }

    fn update_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) -> Result<()> {
        let Some(storage) = self.buffers.get_mut(buffer) else {
            return Err(Error::InvalidResource("unknown buffer".to_string()));
        };
        let start = offset as usize;
        let end = start
            .checked_add(data.len())
            .filter(|end| *end <= storage.data.len())
            .ok_or_else(|| Error::OutOfRange(format!("update {}+{} past buffer end", start, data.len())))?;
        storage.data[start..end].copy_from_slice(data);
        Ok(())
    }

    fn read_buffer(&mut self, buffer: BufferHandle) -> Result<Vec<u8>> {
        self.buffers
            .get(buffer)
            .map(|storage| storage.data.clone())
            .ok_or_else(|| Error::InvalidResource("unknown buffer".to_string()))
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        self.buffers.remove(buffer);
    }

    // ===== TEXTURES =====

    fn create_texture(
        &mut self,
        desc: &TextureDescriptor,
        _typeless: bool,
        data: Option<&[u8]>,
    ) -> Result<TextureHandle> {
        let layers = desc.total_layers();
        let all_mips = data.map_or(false, |bytes| bytes.len() == desc.data_size(true) && desc.mip_levels > 1);

        let mut subresources = Vec::with_capacity((layers * desc.mip_levels) as usize);
        let mut cursor = 0usize;
        for _layer in 0..layers {
            for mip in 0..desc.mip_levels {
                let size = desc.subresource_size(mip);
                let mut bytes = vec![0u8; size];
                if let Some(initial) = data {
                    if mip == 0 || all_mips {
                        let source = initial
                            .get(cursor..cursor + size)
                            .ok_or_else(|| Error::InvalidResource("initial texture data too short".to_string()))?;
                        bytes.copy_from_slice(source);
                        cursor += size;
                    }
                }
                subresources.push(bytes);
            }
        }
        Ok(self.textures.insert(SoftwareTexture { descriptor: *desc, subresources }))
    }

    fn read_texture(&mut self, texture: TextureHandle, mip_level: u32, layer: u32) -> Result<Vec<u8>> {
        let storage = self
            .textures
            .get_mut(texture)
            .ok_or_else(|| Error::InvalidResource("unknown texture".to_string()))?;
        storage
            .subresource_mut(mip_level, layer)
            .map(|bytes| bytes.clone())
            .ok_or_else(|| Error::OutOfRange(format!("subresource (mip {}, layer {})", mip_level, layer)))
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        if self.swapchain.contains(&texture) {
            return;
        }
        self.textures.remove(texture);
    }

    fn create_texture_view(&mut self, texture: TextureHandle, desc: &TextureViewDesc) -> Result<ViewHandle> {
        if !self.textures.contains_key(texture) {
            return Err(Error::InvalidResource("view of an unknown texture".to_string()));
        }
        Ok(self.views.insert(SoftwareView { texture, desc: *desc }))
    }

    fn destroy_texture_view(&mut self, view: ViewHandle) {
        self.views.remove(view);
    }

    // ===== FRAMEBUFFERS / PIPELINES =====

    fn create_framebuffer(&mut self, layout: &FramebufferLayout) -> Result<FramebufferHandle> {
        let targets = layout.colors.iter().chain(layout.depth_stencil.iter());
        for target in targets {
            let matches = self.views.get(target.view).map_or(false, |view| {
                view.texture == target.texture
                    && view.desc.base_mip == target.mip_level
                    && view.desc.base_layer == target.base_layer
            });
            if !matches || !self.textures.contains_key(target.texture) {
                return Err(Error::InvalidResource("framebuffer attachment view does not match its texture".to_string()));
            }
        }
        Ok(self.framebuffers.insert(layout.clone()))
    }

    fn destroy_framebuffer(&mut self, framebuffer: FramebufferHandle) {
        self.framebuffers.remove(framebuffer);
    }

    fn create_graphics_pipeline(&mut self, _desc: &GraphicsPipelineDescriptor) -> Result<PipelineHandle> {
        Ok(self.pipelines.insert(SoftwarePipeline { compute: false }))
    }

    fn create_compute_pipeline(&mut self, _desc: &ComputePipelineDescriptor) -> Result<PipelineHandle> {
        Ok(self.pipelines.insert(SoftwarePipeline { compute: true }))
    }

    fn destroy_pipeline(&mut self, pipeline: PipelineHandle) {
        self.pipelines.remove(pipeline);
    }

    fn create_command_buffer(&mut self) -> Result<SoftwareCommandBuffer> {
        self.command_buffers += 1;
        Ok(SoftwareCommandBuffer::new())
    }

    fn destroy_command_buffer(&mut self, _command_buffer: SoftwareCommandBuffer) {
        self.command_buffers = self.command_buffers.saturating_sub(1);
    }
}

impl Drop for SoftwareDevice {
    fn drop(&mut self) {
        if self.command_buffers > 0 {
            engine_warn!(
                "galaxy3d::software",
                "{} command buffers still alive at device destruction",
                self.command_buffers
            );
        }
    }
}
