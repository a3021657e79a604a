//! Vulkan device: resources, frames and object lifetime
//!
//! Every image rests in `GENERAL` between commands, so command contexts
//! never track layouts across submissions. Render passes transition their
//! attachments internally and hand them back in `GENERAL`.
//!
//! Destroyed objects are queued with the fence value of the last submission
//! and released once that submission has retired.

use std::collections::VecDeque;

use ash::vk;
use gpu_allocator::vulkan::Allocation;
use gpu_allocator::MemoryLocation;
use rustc_hash::FxHashMap;
use slotmap::SlotMap;

use crate::backend::vulkan::context::VulkanContext;
use crate::backend::vulkan::format::{
    aspect_mask, buffer_usage_to_vk, image_type_to_vk, image_usage_to_vk, load_action_to_vk, sample_count_to_vk,
    store_action_to_vk, texture_format_to_vk, view_aspect_mask, view_type_to_vk,
};
use crate::backend::vulkan::swapchain::{Presenter, SwapchainImages};
use crate::backend::vulkan::VulkanCommandBuffer;
use crate::backend::{
    BackendStats, BufferHandle, FramebufferHandle, FramebufferLayout, GraphicsImpl, PipelineHandle, TextureHandle,
    TextureViewDesc, ViewHandle,
};
use crate::config::DeviceConfig;
use crate::error::{Error, Result};
use crate::graphics::{
    Backend, BufferDescriptor, ComputePipelineDescriptor, FeatureTier, GpuCapabilities, GpuLimits, GpuVendor,
    GraphicsPipelineDescriptor, LoadAction, RenderPassDescriptor, StoreAction, SurfaceDescriptor,
    TextureDescriptor, TextureFormat, TextureType, TextureUsage, MAX_COLOR_ATTACHMENTS, MAX_DESCRIPTOR_SETS,
    MAX_VERTEX_BUFFER_BINDINGS,
};
use crate::{engine_bail, engine_debug, engine_err, engine_info, engine_warn};

/// Sets per descriptor pool; pools grow by whole pools
const DESCRIPTOR_POOL_SETS: u32 = 256;
/// Staging regions start on a multiple of the largest texel size
const STAGING_ALIGNMENT: usize = 16;

pub(crate) struct VulkanBuffer {
    pub(crate) raw: vk::Buffer,
    allocation: Allocation,
    size: u64,
}

pub(crate) struct VulkanTexture {
    pub(crate) raw: vk::Image,
    /// `None` for images owned by the presentation engine
    allocation: Option<Allocation>,
    pub(crate) descriptor: TextureDescriptor,
    /// Layout outside of command buffers; `GENERAL` except for presentable images
    layout: vk::ImageLayout,
}

pub(crate) struct VulkanView {
    pub(crate) raw: vk::ImageView,
    texture: TextureHandle,
    desc: TextureViewDesc,
}

pub(crate) struct VulkanFramebuffer {
    pub(crate) layout: FramebufferLayout,
    /// Created at the first render pass that uses it
    raw: vk::Framebuffer,
}

pub(crate) struct VulkanPipeline {
    pub(crate) raw: vk::Pipeline,
    pub(crate) layout: vk::PipelineLayout,
    /// One per set index, empty layouts filling the gaps
    pub(crate) set_layouts: Vec<vk::DescriptorSetLayout>,
    pub(crate) bind_point: vk::PipelineBindPoint,
}

/// Attachment part of a render pass cache key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct AttachmentKey {
    pub(crate) format: TextureFormat,
    pub(crate) samples: u32,
    pub(crate) load: LoadAction,
    pub(crate) store: StoreAction,
}

/// Render passes are cached per attachment formats and operations
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct RenderPassKey {
    pub(crate) colors: Vec<AttachmentKey>,
    pub(crate) depth_stencil: Option<AttachmentKey>,
}

impl RenderPassKey {
    /// Key of a pass compatible with a pipeline (operations do not matter)
    pub(crate) fn compatible(colors: &[TextureFormat], depth_stencil: Option<TextureFormat>, samples: u32) -> Self {
        let attachment =
            |format| AttachmentKey { format, samples, load: LoadAction::DontCare, store: StoreAction::DontCare };
        Self { colors: colors.iter().copied().map(attachment).collect(), depth_stencil: depth_stencil.map(attachment) }
    }

    fn for_framebuffer(layout: &FramebufferLayout, desc: &RenderPassDescriptor) -> Self {
        let colors = layout
            .colors
            .iter()
            .zip(desc.color_attachments.iter())
            .map(|(target, attachment)| AttachmentKey {
                format: target.format,
                samples: target.sample_count,
                load: attachment.load_action,
                store: attachment.store_action,
            })
            .collect();
        let depth_stencil = layout.depth_stencil.map(|target| AttachmentKey {
            format: target.format,
            samples: target.sample_count,
            load: desc.depth_stencil_attachment.load_action,
            store: desc.depth_stencil_attachment.store_action,
        });
        Self { colors, depth_stencil }
    }
}

/// Everything `cmd_begin_render_pass` needs
pub(crate) struct RenderPassBegin {
    pub(crate) render_pass: vk::RenderPass,
    pub(crate) framebuffer: vk::Framebuffer,
    pub(crate) extent: vk::Extent2D,
    pub(crate) clear_values: Vec<vk::ClearValue>,
}

/// Object waiting for the GPU to stop using it
enum Garbage {
    Buffer(vk::Buffer, Allocation),
    Image(vk::Image, Allocation),
    View(vk::ImageView),
    Framebuffer(vk::Framebuffer),
    Pipeline(VulkanPipeline),
}

enum Presentation {
    Window(Presenter),
    Offscreen,
}

/// Vulkan implementation of the device contract
pub struct VulkanDevice {
    pub(crate) context: VulkanContext,
    pub(crate) buffers: SlotMap<BufferHandle, VulkanBuffer>,
    pub(crate) textures: SlotMap<TextureHandle, VulkanTexture>,
    pub(crate) views: SlotMap<ViewHandle, VulkanView>,
    pub(crate) framebuffers: SlotMap<FramebufferHandle, VulkanFramebuffer>,
    pub(crate) pipelines: SlotMap<PipelineHandle, VulkanPipeline>,
    render_passes: FxHashMap<RenderPassKey, vk::RenderPass>,
    /// Linear sampler paired with every sampled texture
    pub(crate) sampler: vk::Sampler,
    command_pools: Vec<vk::CommandPool>,
    descriptor_pools: Vec<vk::DescriptorPool>,
    garbage: VecDeque<(u64, Garbage)>,
    presentation: Presentation,
    swapchain: Vec<TextureHandle>,
    swapchain_descriptor: TextureDescriptor,
    image_count: u32,
    current_image: usize,
    frame_open: bool,
    capabilities: GpuCapabilities,
    pub(crate) stats: BackendStats,
}

impl VulkanDevice {
    pub fn new(config: &DeviceConfig, surface: &SurfaceDescriptor) -> Result<Self> {
        if surface.width == 0 || surface.height == 0 {
            engine_bail!("galaxy3d::vulkan", "Invalid swapchain size {}x{}", surface.width, surface.height);
        }
        let mut context = VulkanContext::new(config, surface.window.as_ref())?;
        let capabilities = Self::query_capabilities(&context);

        let sampler_info = vk::SamplerCreateInfo::default()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .max_lod(vk::LOD_CLAMP_NONE);
        let sampler = unsafe { context.device.create_sampler(&sampler_info, None) }
            .map_err(|e| Error::InitializationFailed(format!("Failed to create default sampler: {:?}", e)))?;

        let (presentation, window_images) = match surface.window {
            Some(_) => {
                let (presenter, images) = Presenter::new(&mut context, surface, config.frames_in_flight)?;
                (Presentation::Window(presenter), Some(images))
            }
            None => (Presentation::Offscreen, None),
        };

        let mut device = Self {
            context,
            buffers: SlotMap::with_key(),
            textures: SlotMap::with_key(),
            views: SlotMap::with_key(),
            framebuffers: SlotMap::with_key(),
            pipelines: SlotMap::with_key(),
            render_passes: FxHashMap::default(),
            sampler,
            command_pools: Vec::new(),
            descriptor_pools: Vec::new(),
            garbage: VecDeque::new(),
            presentation,
            swapchain: Vec::new(),
            swapchain_descriptor: TextureDescriptor::new_2d(
                surface.width,
                surface.height,
                surface.format,
                TextureUsage::RENDER_TARGET | TextureUsage::SHADER_READ,
            ),
            image_count: surface.image_count.max(1),
            current_image: 0,
            frame_open: false,
            capabilities,
            stats: BackendStats::default(),
        };
        match window_images {
            Some(images) => device.adopt_window_images(images),
            None => device.create_offscreen_images()?,
        }

        engine_info!(
            "galaxy3d::vulkan",
            "Vulkan device ready for '{}' ({} {} images {}x{})",
            config.app_name,
            device.swapchain.len(),
            if matches!(device.presentation, Presentation::Window(_)) { "window" } else { "offscreen" },
            device.swapchain_descriptor.width,
            device.swapchain_descriptor.height
        );
        Ok(device)
    }

    fn query_capabilities(context: &VulkanContext) -> GpuCapabilities {
        let properties = &context.properties;
        let limits = &properties.limits;
        let feature_tier =
            if properties.api_version >= vk::API_VERSION_1_2 { FeatureTier::Level12 } else { FeatureTier::Level11 };
        GpuCapabilities {
            backend: Backend::Vulkan,
            vendor_id: properties.vendor_id,
            vendor: GpuVendor::from_vendor_id(properties.vendor_id),
            device_name: properties
                .device_name_as_c_str()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
            feature_tier,
            limits: GpuLimits {
                max_texture_dimension_2d: limits.max_image_dimension2_d,
                max_texture_dimension_3d: limits.max_image_dimension3_d,
                max_texture_array_layers: limits.max_image_array_layers,
                max_color_attachments: limits.max_color_attachments.min(MAX_COLOR_ATTACHMENTS as u32),
                max_vertex_buffer_bindings: limits.max_vertex_input_bindings.min(MAX_VERTEX_BUFFER_BINDINGS),
                max_descriptor_sets: limits.max_bound_descriptor_sets.min(MAX_DESCRIPTOR_SETS),
                max_compute_work_group_count: limits.max_compute_work_group_count,
                max_compute_work_group_size: limits.max_compute_work_group_size,
            },
        }
    }

    // ===== SWAPCHAIN IMAGES =====

    fn adopt_window_images(&mut self, images: SwapchainImages) {
        let mut usage = TextureUsage::RENDER_TARGET;
        if images.sampled {
            usage |= TextureUsage::SHADER_READ;
        }
        self.swapchain_descriptor = TextureDescriptor::new_2d(images.width, images.height, images.format, usage);
        let descriptor = self.swapchain_descriptor;
        for raw in images.images {
            let handle = self.textures.insert(VulkanTexture {
                raw,
                allocation: None,
                descriptor,
                layout: vk::ImageLayout::UNDEFINED,
            });
            self.swapchain.push(handle);
        }
        self.current_image = 0;
    }

    fn create_offscreen_images(&mut self) -> Result<()> {
        let descriptor = self.swapchain_descriptor;
        for _ in 0..self.image_count {
            let handle = self.create_texture(&descriptor, false, None)?;
            self.swapchain.push(handle);
        }
        self.current_image = 0;
        Ok(())
    }

    fn release_swapchain_images(&mut self) {
        for handle in std::mem::take(&mut self.swapchain) {
            if let Some(texture) = self.textures.remove(handle) {
                if let Some(allocation) = texture.allocation {
                    self.retire(Garbage::Image(texture.raw, allocation));
                }
            }
        }
    }

    // ===== DEFERRED DESTRUCTION =====

    fn retire(&mut self, garbage: Garbage) {
        let fence = self.context.last_submitted();
        self.garbage.push_back((fence, garbage));
    }

    /// Release every queued object whose last user has retired
    fn collect_garbage(&mut self) -> Result<u64> {
        let completed = self.context.poll()?;
        while self.garbage.front().map_or(false, |(fence, _)| *fence <= completed) {
            if let Some((_, garbage)) = self.garbage.pop_front() {
                self.destroy_now(garbage);
            }
        }
        Ok(completed)
    }

    fn destroy_now(&mut self, garbage: Garbage) {
        let device = &self.context.device;
        unsafe {
            match garbage {
                Garbage::Buffer(raw, allocation) => {
                    device.destroy_buffer(raw, None);
                    self.context.free(allocation);
                }
                Garbage::Image(raw, allocation) => {
                    device.destroy_image(raw, None);
                    self.context.free(allocation);
                }
                Garbage::View(raw) => device.destroy_image_view(raw, None),
                Garbage::Framebuffer(raw) => device.destroy_framebuffer(raw, None),
                Garbage::Pipeline(pipeline) => {
                    device.destroy_pipeline(pipeline.raw, None);
                    device.destroy_pipeline_layout(pipeline.layout, None);
                    for set_layout in pipeline.set_layouts {
                        device.destroy_descriptor_set_layout(set_layout, None);
                    }
                }
            }
        }
    }

    // ===== COMMAND BUFFER SUPPORT =====

    pub(crate) fn create_command_pool(&mut self) -> Result<vk::CommandPool> {
        let info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(self.context.queue_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let pool = unsafe { self.context.device.create_command_pool(&info, None) }
            .map_err(|e| engine_err!("galaxy3d::vulkan", "Failed to create command pool: {:?}", e))?;
        self.command_pools.push(pool);
        Ok(pool)
    }

    pub(crate) fn create_descriptor_pool(&mut self) -> Result<vk::DescriptorPool> {
        let sizes = [
            vk::DescriptorType::UNIFORM_BUFFER,
            vk::DescriptorType::STORAGE_BUFFER,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            vk::DescriptorType::STORAGE_IMAGE,
        ]
        .map(|ty| vk::DescriptorPoolSize { ty, descriptor_count: DESCRIPTOR_POOL_SETS * 4 });
        let info = vk::DescriptorPoolCreateInfo::default().max_sets(DESCRIPTOR_POOL_SETS).pool_sizes(&sizes);
        let pool = unsafe { self.context.device.create_descriptor_pool(&info, None) }
            .map_err(|e| engine_err!("galaxy3d::vulkan", "Failed to create descriptor pool: {:?}", e))?;
        self.descriptor_pools.push(pool);
        Ok(pool)
    }

    /// Destroy the pools of a released command buffer
    pub(crate) fn release_pools(&mut self, command_pool: vk::CommandPool, descriptor_pools: &[vk::DescriptorPool]) {
        unsafe {
            for pool in descriptor_pools {
                self.context.device.destroy_descriptor_pool(*pool, None);
            }
            self.context.device.destroy_command_pool(command_pool, None);
        }
        self.descriptor_pools.retain(|pool| !descriptor_pools.contains(pool));
        self.command_pools.retain(|pool| *pool != command_pool);
    }

    // ===== RENDER PASSES =====

    pub(crate) fn render_pass(&mut self, key: &RenderPassKey) -> Result<vk::RenderPass> {
        if let Some(render_pass) = self.render_passes.get(key) {
            return Ok(*render_pass);
        }

        let describe = |attachment: &AttachmentKey| -> Result<vk::AttachmentDescription> {
            let samples = sample_count_to_vk(attachment.samples)
                .ok_or_else(|| Error::InvalidResource(format!("unsupported sample count {}", attachment.samples)))?;
            let initial_layout =
                if attachment.load == LoadAction::Load { vk::ImageLayout::GENERAL } else { vk::ImageLayout::UNDEFINED };
            let (stencil_load, stencil_store) = if attachment.format.has_stencil() {
                (load_action_to_vk(attachment.load), store_action_to_vk(attachment.store))
            } else {
                (vk::AttachmentLoadOp::DONT_CARE, vk::AttachmentStoreOp::DONT_CARE)
            };
            Ok(vk::AttachmentDescription::default()
                .format(texture_format_to_vk(attachment.format))
                .samples(samples)
                .load_op(load_action_to_vk(attachment.load))
                .store_op(store_action_to_vk(attachment.store))
                .stencil_load_op(stencil_load)
                .stencil_store_op(stencil_store)
                .initial_layout(initial_layout)
                .final_layout(vk::ImageLayout::GENERAL))
        };

        let mut attachments = Vec::with_capacity(key.colors.len() + 1);
        for color in &key.colors {
            attachments.push(describe(color)?);
        }
        let color_refs: Vec<vk::AttachmentReference> = (0..key.colors.len() as u32)
            .map(|attachment| vk::AttachmentReference { attachment, layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL })
            .collect();
        let depth_ref = match &key.depth_stencil {
            Some(depth) => {
                attachments.push(describe(depth)?);
                Some(vk::AttachmentReference {
                    attachment: key.colors.len() as u32,
                    layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
                })
            }
            None => None,
        };

        let mut subpass = vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs);
        if let Some(depth_ref) = depth_ref.as_ref() {
            subpass = subpass.depth_stencil_attachment(depth_ref);
        }
        let access = vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE;
        let dependencies = [
            vk::SubpassDependency::default()
                .src_subpass(vk::SUBPASS_EXTERNAL)
                .dst_subpass(0)
                .src_stage_mask(vk::PipelineStageFlags::ALL_COMMANDS)
                .dst_stage_mask(vk::PipelineStageFlags::ALL_COMMANDS)
                .src_access_mask(access)
                .dst_access_mask(access),
            vk::SubpassDependency::default()
                .src_subpass(0)
                .dst_subpass(vk::SUBPASS_EXTERNAL)
                .src_stage_mask(vk::PipelineStageFlags::ALL_COMMANDS)
                .dst_stage_mask(vk::PipelineStageFlags::ALL_COMMANDS)
                .src_access_mask(access)
                .dst_access_mask(access),
        ];
        let subpasses = [subpass];
        let info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);
        let render_pass = unsafe { self.context.device.create_render_pass(&info, None) }
            .map_err(|e| engine_err!("galaxy3d::vulkan", "Failed to create render pass: {:?}", e))?;
        engine_debug!(
            "galaxy3d::vulkan",
            "Render pass created ({} color, depth: {})",
            key.colors.len(),
            key.depth_stencil.is_some()
        );
        self.render_passes.insert(key.clone(), render_pass);
        Ok(render_pass)
    }

    /// Resolve render pass, framebuffer and clear values for a pass begin
    pub(crate) fn prepare_render_pass(
        &mut self,
        framebuffer: FramebufferHandle,
        desc: &RenderPassDescriptor,
    ) -> Result<RenderPassBegin> {
        let Some(layout) = self.framebuffers.get(framebuffer).map(|fb| fb.layout.clone()) else {
            return Err(Error::InvalidResource("unknown framebuffer".to_string()));
        };
        let render_pass = self.render_pass(&RenderPassKey::for_framebuffer(&layout, desc))?;

        let existing = self.framebuffers.get(framebuffer).map(|fb| fb.raw).unwrap_or_default();
        let raw = if existing != vk::Framebuffer::null() {
            existing
        } else {
            let mut attachments = Vec::with_capacity(layout.colors.len() + 1);
            for target in layout.colors.iter().chain(layout.depth_stencil.iter()) {
                let view = self
                    .views
                    .get(target.view)
                    .ok_or_else(|| Error::InvalidResource("framebuffer attachment view was destroyed".to_string()))?;
                attachments.push(view.raw);
            }
            let info = vk::FramebufferCreateInfo::default()
                .render_pass(render_pass)
                .attachments(&attachments)
                .width(layout.width)
                .height(layout.height)
                .layers(layout.layers.max(1));
            let raw = unsafe { self.context.device.create_framebuffer(&info, None) }
                .map_err(|e| engine_err!("galaxy3d::vulkan", "Failed to create framebuffer: {:?}", e))?;
            if let Some(entry) = self.framebuffers.get_mut(framebuffer) {
                entry.raw = raw;
            }
            raw
        };

        let mut clear_values: Vec<vk::ClearValue> = desc
            .color_attachments
            .iter()
            .take(layout.colors.len())
            .map(|attachment| vk::ClearValue {
                color: vk::ClearColorValue { float32: attachment.clear_color.to_array() },
            })
            .collect();
        if layout.depth_stencil.is_some() {
            let attachment = &desc.depth_stencil_attachment;
            clear_values.push(vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: attachment.clear_depth,
                    stencil: attachment.clear_stencil as u32,
                },
            });
        }

        Ok(RenderPassBegin {
            render_pass,
            framebuffer: raw,
            extent: vk::Extent2D { width: layout.width, height: layout.height },
            clear_values,
        })
    }

    // ===== TEXTURE TRANSFERS =====

    /// Zero the whole image, then copy the initial data in
    fn initialize_texture(&mut self, raw: vk::Image, desc: &TextureDescriptor, data: Option<&[u8]>) -> Result<()> {
        let staging = match data {
            Some(bytes) => Some(self.stage_texture_data(desc, bytes)?),
            None => None,
        };

        let aspect = aspect_mask(desc.format);
        let range = vk::ImageSubresourceRange {
            aspect_mask: aspect,
            base_mip_level: 0,
            level_count: vk::REMAINING_MIP_LEVELS,
            base_array_layer: 0,
            layer_count: vk::REMAINING_ARRAY_LAYERS,
        };
        let depth = desc.format.is_depth();
        let result = self.context.one_shot(|device, command_buffer| unsafe {
            VulkanContext::transition(
                device,
                command_buffer,
                raw,
                aspect,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::GENERAL,
            );
            if depth {
                let value = vk::ClearDepthStencilValue { depth: 0.0, stencil: 0 };
                device.cmd_clear_depth_stencil_image(command_buffer, raw, vk::ImageLayout::GENERAL, &value, &[range]);
            } else {
                let value = vk::ClearColorValue { float32: [0.0; 4] };
                device.cmd_clear_color_image(command_buffer, raw, vk::ImageLayout::GENERAL, &value, &[range]);
            }
            if let Some((buffer, _, regions)) = staging.as_ref() {
                VulkanContext::full_barrier(device, command_buffer);
                device.cmd_copy_buffer_to_image(command_buffer, *buffer, raw, vk::ImageLayout::GENERAL, regions);
            }
        });

        if let Some((buffer, allocation, _)) = staging {
            self.context.destroy_host_buffer(buffer, allocation);
        }
        result
    }

    /// Copy layer-major initial data into a staging buffer
    fn stage_texture_data(
        &mut self,
        desc: &TextureDescriptor,
        bytes: &[u8],
    ) -> Result<(vk::Buffer, Allocation, Vec<vk::BufferImageCopy>)> {
        if desc.sample_count > 1 {
            return Err(Error::InvalidResource("multisampled textures can not take initial data".to_string()));
        }
        let all_mips = bytes.len() == desc.data_size(true) && desc.mip_levels > 1;
        let mips = if all_mips { desc.mip_levels } else { 1 };

        let mut staged = Vec::with_capacity(bytes.len() + bytes.len() / 4);
        let mut regions = Vec::new();
        let mut cursor = 0usize;
        for layer in 0..desc.total_layers() {
            for mip in 0..mips {
                let size = desc.subresource_size(mip);
                let source = bytes
                    .get(cursor..cursor + size)
                    .ok_or_else(|| Error::InvalidResource("initial texture data too short".to_string()))?;
                cursor += size;
                let extent = desc.mip_extent(mip);
                if desc.format == TextureFormat::D24_UNORM_S8_UINT {
                    let (depth, stencil) = split_depth_stencil(source);
                    for (aspect, plane) in [(vk::ImageAspectFlags::DEPTH, depth), (vk::ImageAspectFlags::STENCIL, stencil)] {
                        staged.resize(align_up(staged.len(), STAGING_ALIGNMENT), 0);
                        regions.push(copy_region(staged.len(), aspect, mip, layer, extent));
                        staged.extend_from_slice(&plane);
                    }
                } else {
                    staged.resize(align_up(staged.len(), STAGING_ALIGNMENT), 0);
                    regions.push(copy_region(staged.len(), aspect_mask(desc.format), mip, layer, extent));
                    staged.extend_from_slice(source);
                }
            }
        }

        let (buffer, mut allocation) = self.context.create_host_buffer(
            "texture staging",
            staged.len() as u64,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuToGpu,
        )?;
        match allocation.mapped_slice_mut() {
            Some(mapped) => mapped[..staged.len()].copy_from_slice(&staged),
            None => {
                self.context.destroy_host_buffer(buffer, allocation);
                return Err(engine_err!("galaxy3d::vulkan", "Texture staging memory is not host visible"));
            }
        }
        Ok((buffer, allocation, regions))
    }
}

fn align_up(value: usize, alignment: usize) -> usize {
    value.div_ceil(alignment) * alignment
}

fn copy_region(
    offset: usize,
    aspect_mask: vk::ImageAspectFlags,
    mip: u32,
    layer: u32,
    (width, height, depth): (u32, u32, u32),
) -> vk::BufferImageCopy {
    vk::BufferImageCopy {
        buffer_offset: offset as u64,
        buffer_row_length: 0,
        buffer_image_height: 0,
        image_subresource: vk::ImageSubresourceLayers {
            aspect_mask,
            mip_level: mip,
            base_array_layer: layer,
            layer_count: 1,
        },
        image_offset: vk::Offset3D::default(),
        image_extent: vk::Extent3D { width, height, depth },
    }
}

/// Split packed D24S8 texels into the depth and stencil copy planes
///
/// The depth plane keeps 32-bit words with the top byte cleared; the stencil
/// plane has one byte per texel.
pub(crate) fn split_depth_stencil(packed: &[u8]) -> (Vec<u8>, Vec<u8>) {
    let mut depth = Vec::with_capacity(packed.len());
    let mut stencil = Vec::with_capacity(packed.len() / 4);
    for texel in packed.chunks_exact(4) {
        let word = u32::from_le_bytes([texel[0], texel[1], texel[2], texel[3]]);
        depth.extend_from_slice(&(word & 0x00FF_FFFF).to_le_bytes());
        stencil.push((word >> 24) as u8);
    }
    (depth, stencil)
}

/// Inverse of [`split_depth_stencil`]
pub(crate) fn merge_depth_stencil(depth: &[u8], stencil: &[u8]) -> Vec<u8> {
    depth
        .chunks_exact(4)
        .zip(stencil.iter())
        .flat_map(|(texel, stencil)| {
            let word = u32::from_le_bytes([texel[0], texel[1], texel[2], texel[3]]) & 0x00FF_FFFF;
            (word | (*stencil as u32) << 24).to_le_bytes()
        })
        .collect()
}

impl GraphicsImpl for VulkanDevice {
    type CommandBuffer = VulkanCommandBuffer;

    fn backend(&self) -> Backend {
        Backend::Vulkan
    }

    fn capabilities(&self) -> GpuCapabilities {
        self.capabilities.clone()
    }

    fn stats(&self) -> BackendStats {
        self.stats
    }

    fn wait_idle(&mut self) -> Result<()> {
        self.context.wait_all()?;
        self.collect_garbage()?;
        Ok(())
    }

    fn completed_fence_value(&mut self) -> Result<u64> {
        self.collect_garbage()
    }

    // ===== FRAME =====

    fn begin_frame(&mut self) -> Result<()> {
        if self.frame_open {
            engine_bail!("galaxy3d::vulkan", "begin_frame called twice");
        }
        self.collect_garbage()?;
        if let Presentation::Window(presenter) = &mut self.presentation {
            let index = presenter.begin_frame(&mut self.context)?;
            self.current_image = index;
            if let Some(texture) = self.swapchain.get(index).and_then(|handle| self.textures.get_mut(*handle)) {
                texture.layout = vk::ImageLayout::GENERAL;
            }
        }
        self.frame_open = true;
        Ok(())
    }

    fn end_frame(&mut self) -> Result<()> {
        if !self.frame_open {
            engine_bail!("galaxy3d::vulkan", "end_frame called without begin_frame");
        }
        self.frame_open = false;
        match &mut self.presentation {
            Presentation::Window(presenter) => {
                presenter.end_frame(&mut self.context)?;
                let index = presenter.image_index();
                if let Some(texture) = self.swapchain.get(index).and_then(|handle| self.textures.get_mut(*handle)) {
                    texture.layout = vk::ImageLayout::PRESENT_SRC_KHR;
                }
            }
            Presentation::Offscreen => {
                self.current_image = (self.current_image + 1) % self.swapchain.len().max(1);
            }
        }
        Ok(())
    }

    fn resize_swapchain(&mut self, width: u32, height: u32) -> Result<()> {
        if width == 0 || height == 0 {
            engine_bail!("galaxy3d::vulkan", "Invalid swapchain size {}x{}", width, height);
        }
        // Views on the old images must go before the images do.
        self.context.wait_all()?;
        self.release_swapchain_images();
        self.collect_garbage()?;

        if let Presentation::Window(presenter) = &mut self.presentation {
            let images = presenter.resize(&mut self.context, width, height)?;
            self.adopt_window_images(images);
        } else {
            self.swapchain_descriptor.width = width;
            self.swapchain_descriptor.height = height;
            self.create_offscreen_images()?;
        }
        engine_debug!(
            "galaxy3d::vulkan",
            "Swapchain resized to {}x{}",
            self.swapchain_descriptor.width,
            self.swapchain_descriptor.height
        );
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
        let (raw, mut allocation) = self.context.create_host_buffer(
            "buffer",
            desc.size,
            buffer_usage_to_vk(desc.usage),
            MemoryLocation::CpuToGpu,
        )?;
        let size = desc.size as usize;
        match allocation.mapped_slice_mut() {
            Some(mapped) => {
                mapped[..size].fill(0);
                if let Some(bytes) = data {
                    let count = bytes.len().min(size);
                    mapped[..count].copy_from_slice(&bytes[..count]);
                }
            }
            None => {
                self.context.destroy_host_buffer(raw, allocation);
                return Err(engine_err!("galaxy3d::vulkan", "Buffer memory is not host visible"));
            }
        }
        Ok(self.buffers.insert(VulkanBuffer { raw, allocation, size: desc.size }))
    }

    fn update_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) -> Result<()> {
        let size = self
            .buffers
            .get(buffer)
            .map(|storage| storage.size)
            .ok_or_else(|| Error::InvalidResource("unknown buffer".to_string()))?;
        let start = offset as usize;
        let end = start
            .checked_add(data.len())
            .filter(|end| *end as u64 <= size)
            .ok_or_else(|| Error::OutOfRange(format!("update {}+{} past buffer end", start, data.len())))?;

        // Submitted work may still read the old content.
        self.context.wait_all()?;
        let storage = self
            .buffers
            .get_mut(buffer)
            .ok_or_else(|| Error::InvalidResource("unknown buffer".to_string()))?;
        let mapped = storage
            .allocation
            .mapped_slice_mut()
            .ok_or_else(|| engine_err!("galaxy3d::vulkan", "Buffer memory is not host visible"))?;
        mapped[start..end].copy_from_slice(data);
        Ok(())
    }

    fn read_buffer(&mut self, buffer: BufferHandle) -> Result<Vec<u8>> {
        if !self.buffers.contains_key(buffer) {
            return Err(Error::InvalidResource("unknown buffer".to_string()));
        }
        self.context.wait_all()?;
        let storage = self
            .buffers
            .get(buffer)
            .ok_or_else(|| Error::InvalidResource("unknown buffer".to_string()))?;
        storage
            .allocation
            .mapped_slice()
            .map(|mapped| mapped[..storage.size as usize].to_vec())
            .ok_or_else(|| engine_err!("galaxy3d::vulkan", "Buffer memory is not host visible"))
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        if let Some(storage) = self.buffers.remove(buffer) {
            self.retire(Garbage::Buffer(storage.raw, storage.allocation));
        }
    }

    // ===== TEXTURES =====

    fn create_texture(
        &mut self,
        desc: &TextureDescriptor,
        _typeless: bool,
        data: Option<&[u8]>,
    ) -> Result<TextureHandle> {
        let samples = sample_count_to_vk(desc.sample_count)
            .ok_or_else(|| Error::InvalidResource(format!("unsupported sample count {}", desc.sample_count)))?;
        let depth = if desc.texture_type == TextureType::Type3D { desc.depth } else { 1 };
        let flags = if desc.texture_type == TextureType::Cube {
            vk::ImageCreateFlags::CUBE_COMPATIBLE
        } else {
            vk::ImageCreateFlags::empty()
        };
        let info = vk::ImageCreateInfo::default()
            .flags(flags)
            .image_type(image_type_to_vk(desc.texture_type))
            .format(texture_format_to_vk(desc.format))
            .extent(vk::Extent3D { width: desc.width, height: desc.height, depth })
            .mip_levels(desc.mip_levels)
            .array_layers(desc.total_layers())
            .samples(samples)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(image_usage_to_vk(desc.usage, desc.format))
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let raw = unsafe { self.context.device.create_image(&info, None) }
            .map_err(|e| engine_err!("galaxy3d::vulkan", "Failed to create image: {:?}", e))?;
        let requirements = unsafe { self.context.device.get_image_memory_requirements(raw) };
        let allocation = match self.context.allocate("texture", requirements, MemoryLocation::GpuOnly, false) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.context.device.destroy_image(raw, None) };
                return Err(e);
            }
        };
        let bound = unsafe { self.context.device.bind_image_memory(raw, allocation.memory(), allocation.offset()) }
            .map_err(|e| engine_err!("galaxy3d::vulkan", "Failed to bind image memory: {:?}", e))
            .and_then(|_| self.initialize_texture(raw, desc, data));
        if let Err(e) = bound {
            self.context.free(allocation);
            unsafe { self.context.device.destroy_image(raw, None) };
            return Err(e);
        }

        Ok(self.textures.insert(VulkanTexture {
            raw,
            allocation: Some(allocation),
            descriptor: *desc,
            layout: vk::ImageLayout::GENERAL,
        }))
    }

    fn read_texture(&mut self, texture: TextureHandle, mip_level: u32, layer: u32) -> Result<Vec<u8>> {
        let (raw, desc, layout) = self
            .textures
            .get(texture)
            .map(|t| (t.raw, t.descriptor, t.layout))
            .ok_or_else(|| Error::InvalidResource("unknown texture".to_string()))?;
        if mip_level >= desc.mip_levels || layer >= desc.total_layers() {
            return Err(Error::OutOfRange(format!("subresource (mip {}, layer {})", mip_level, layer)));
        }
        if desc.sample_count > 1 {
            return Err(Error::InvalidResource("multisampled textures can not be read back".to_string()));
        }

        let extent = desc.mip_extent(mip_level);
        let size = desc.subresource_size(mip_level);
        let packed = desc.format == TextureFormat::D24_UNORM_S8_UINT;
        let (regions, stencil_offset, total) = if packed {
            let texels = size / 4;
            let stencil_offset = align_up(size, STAGING_ALIGNMENT);
            let regions = vec![
                copy_region(0, vk::ImageAspectFlags::DEPTH, mip_level, layer, extent),
                copy_region(stencil_offset, vk::ImageAspectFlags::STENCIL, mip_level, layer, extent),
            ];
            (regions, stencil_offset, stencil_offset + texels)
        } else {
            (vec![copy_region(0, aspect_mask(desc.format), mip_level, layer, extent)], 0, size)
        };

        let (buffer, allocation) = self.context.create_host_buffer(
            "texture readback",
            total as u64,
            vk::BufferUsageFlags::TRANSFER_DST,
            MemoryLocation::GpuToCpu,
        )?;
        let aspect = aspect_mask(desc.format);
        let recorded = self.context.one_shot(|device, command_buffer| unsafe {
            if layout != vk::ImageLayout::GENERAL {
                VulkanContext::transition(device, command_buffer, raw, aspect, layout, vk::ImageLayout::GENERAL);
            }
            VulkanContext::full_barrier(device, command_buffer);
            device.cmd_copy_image_to_buffer(command_buffer, raw, vk::ImageLayout::GENERAL, buffer, &regions);
            VulkanContext::host_barrier(device, command_buffer);
        });
        let result = recorded.and_then(|_| {
            let mapped = allocation
                .mapped_slice()
                .ok_or_else(|| engine_err!("galaxy3d::vulkan", "Readback memory is not host visible"))?;
            Ok(if packed {
                merge_depth_stencil(&mapped[..size], &mapped[stencil_offset..total])
            } else {
                mapped[..size].to_vec()
            })
        });
        self.context.destroy_host_buffer(buffer, allocation);

        if let Some(texture) = self.textures.get_mut(texture) {
            texture.layout = vk::ImageLayout::GENERAL;
        }
        result
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        if self.swapchain.contains(&texture) {
            return;
        }
        if let Some(storage) = self.textures.remove(texture) {
            if let Some(allocation) = storage.allocation {
                self.retire(Garbage::Image(storage.raw, allocation));
            }
        }
    }

    fn create_texture_view(&mut self, texture: TextureHandle, desc: &TextureViewDesc) -> Result<ViewHandle> {
        let storage = self
            .textures
            .get(texture)
            .ok_or_else(|| Error::InvalidResource("view of an unknown texture".to_string()))?;
        let format = storage.descriptor.format;
        let info = vk::ImageViewCreateInfo::default()
            .image(storage.raw)
            .view_type(view_type_to_vk(storage.descriptor.texture_type, desc.kind, desc.layer_count))
            .format(texture_format_to_vk(format))
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: view_aspect_mask(format, desc.kind),
                base_mip_level: desc.base_mip,
                level_count: desc.mip_count,
                base_array_layer: desc.base_layer,
                layer_count: desc.layer_count,
            });
        let raw = unsafe { self.context.device.create_image_view(&info, None) }
            .map_err(|e| engine_err!("galaxy3d::vulkan", "Failed to create image view: {:?}", e))?;
        Ok(self.views.insert(VulkanView { raw, texture, desc: *desc }))
    }

    fn destroy_texture_view(&mut self, view: ViewHandle) {
        if let Some(storage) = self.views.remove(view) {
            self.retire(Garbage::View(storage.raw));
        }
    }

    // ===== FRAMEBUFFERS / PIPELINES =====

    fn create_framebuffer(&mut self, layout: &FramebufferLayout) -> Result<FramebufferHandle> {
        for target in layout.colors.iter().chain(layout.depth_stencil.iter()) {
            let matches = self.views.get(target.view).map_or(false, |view| {
                view.texture == target.texture
                    && view.desc.base_mip == target.mip_level
                    && view.desc.base_layer == target.base_layer
            });
            if !matches || !self.textures.contains_key(target.texture) {
                return Err(Error::InvalidResource("framebuffer attachment view does not match its texture".to_string()));
            }
        }
        Ok(self.framebuffers.insert(VulkanFramebuffer { layout: layout.clone(), raw: vk::Framebuffer::null() }))
    }

    fn destroy_framebuffer(&mut self, framebuffer: FramebufferHandle) {
        if let Some(storage) = self.framebuffers.remove(framebuffer) {
            if storage.raw != vk::Framebuffer::null() {
                self.retire(Garbage::Framebuffer(storage.raw));
            }
        }
    }

    fn create_graphics_pipeline(&mut self, desc: &GraphicsPipelineDescriptor) -> Result<PipelineHandle> {
        let pipeline = self.build_graphics_pipeline(desc)?;
        Ok(self.pipelines.insert(pipeline))
    }

    fn create_compute_pipeline(&mut self, desc: &ComputePipelineDescriptor) -> Result<PipelineHandle> {
        let pipeline = self.build_compute_pipeline(desc)?;
        Ok(self.pipelines.insert(pipeline))
    }

    fn destroy_pipeline(&mut self, pipeline: PipelineHandle) {
        if let Some(storage) = self.pipelines.remove(pipeline) {
            self.retire(Garbage::Pipeline(storage));
        }
    }

    fn create_command_buffer(&mut self) -> Result<VulkanCommandBuffer> {
        VulkanCommandBuffer::new(self)
    }

    fn destroy_command_buffer(&mut self, command_buffer: VulkanCommandBuffer) {
        command_buffer.release(self);
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        if let Err(e) = self.context.wait_all() {
            engine_warn!("galaxy3d::vulkan", "Device drop without a clean GPU idle: {:?}", e);
        }
        unsafe {
            self.context.device.device_wait_idle().ok();
        }

        while let Some((_, garbage)) = self.garbage.pop_front() {
            self.destroy_now(garbage);
        }
        let leftovers: Vec<Garbage> = self
            .pipelines
            .drain()
            .map(|(_, pipeline)| Garbage::Pipeline(pipeline))
            .chain(self.framebuffers.drain().filter_map(|(_, fb)| {
                (fb.raw != vk::Framebuffer::null()).then_some(Garbage::Framebuffer(fb.raw))
            }))
            .chain(self.views.drain().map(|(_, view)| Garbage::View(view.raw)))
            .chain(
                self.textures
                    .drain()
                    .filter_map(|(_, texture)| texture.allocation.map(|allocation| Garbage::Image(texture.raw, allocation))),
            )
            .chain(self.buffers.drain().map(|(_, buffer)| Garbage::Buffer(buffer.raw, buffer.allocation)))
            .collect();
        for garbage in leftovers {
            self.destroy_now(garbage);
        }

        let device = &self.context.device;
        unsafe {
            for (_, render_pass) in self.render_passes.drain() {
                device.destroy_render_pass(render_pass, None);
            }
            for pool in self.descriptor_pools.drain(..) {
                device.destroy_descriptor_pool(pool, None);
            }
            if !self.command_pools.is_empty() {
                engine_warn!(
                    "galaxy3d::vulkan",
                    "{} command buffers still alive at device destruction",
                    self.command_pools.len()
                );
            }
            for pool in self.command_pools.drain(..) {
                device.destroy_command_pool(pool, None);
            }
            device.destroy_sampler(self.sampler, None);
        }
        if let Presentation::Window(presenter) = &mut self.presentation {
            presenter.destroy(&self.context.device);
        }
        engine_debug!("galaxy3d::vulkan", "Vulkan device destroyed");
    }
}
