//! Vulkan command buffer: lazily begun batches recycled by fence value

use std::collections::VecDeque;

use ash::vk;

use crate::backend::vulkan::context::VulkanContext;
use crate::backend::vulkan::format::{descriptor_type_to_vk, index_type_to_vk};
use crate::backend::vulkan::VulkanDevice;
use crate::backend::{
    BufferHandle, CommandBufferImpl, FramebufferHandle, PipelineHandle, ResourceBinding, ViewHandle,
};
use crate::error::{Error, Result};
use crate::graphics::{IndexType, Rect2D, RenderPassDescriptor, ResourceKind, Viewport};
use crate::{engine_bail, engine_err, engine_trace, engine_warn};

/// One recorded submission and the descriptor pools its sets came from
struct Batch {
    raw: vk::CommandBuffer,
    descriptor_pools: Vec<vk::DescriptorPool>,
    /// Fence value of the submission, 0 while recording
    fence: u64,
}

enum DescriptorWrite {
    Buffer(vk::DescriptorBufferInfo),
    Image(vk::DescriptorImageInfo),
}

/// Command buffer of the Vulkan device
///
/// Owns one command pool. Each flush submits the current batch; a submitted
/// batch is reused once the GPU has retired it.
pub struct VulkanCommandBuffer {
    pool: vk::CommandPool,
    recording: Option<Batch>,
    retired: VecDeque<Batch>,
    bound_pipeline: Option<PipelineHandle>,
    inside_render_pass: bool,
}

impl VulkanCommandBuffer {
    pub(crate) fn new(device: &mut VulkanDevice) -> Result<Self> {
        Ok(Self {
            pool: device.create_command_pool()?,
            recording: None,
            retired: VecDeque::new(),
            bound_pipeline: None,
            inside_render_pass: false,
        })
    }

    /// Wait for every submitted batch, then destroy the pools
    pub(crate) fn release(mut self, device: &mut VulkanDevice) {
        if let Some(fence) = self.retired.iter().map(|batch| batch.fence).max() {
            if let Err(e) = device.context.wait_for(fence) {
                engine_warn!("galaxy3d::vulkan", "Command buffer released while busy: {:?}", e);
            }
        }
        let descriptor_pools: Vec<vk::DescriptorPool> = self
            .retired
            .drain(..)
            .chain(self.recording.take())
            .flat_map(|batch| batch.descriptor_pools)
            .collect();
        device.release_pools(self.pool, &descriptor_pools);
    }

    /// Current batch, begun on first use
    fn batch(&mut self, device: &mut VulkanDevice) -> Result<vk::CommandBuffer> {
        if let Some(batch) = &self.recording {
            return Ok(batch.raw);
        }

        let completed = device.context.poll()?;
        let reusable = self.retired.front().map_or(false, |batch| batch.fence <= completed);
        let batch = if reusable {
            let Some(batch) = self.retired.pop_front() else {
                return Err(Error::InvalidState("no retired batch to reuse".to_string()));
            };
            unsafe {
                device
                    .context
                    .device
                    .reset_command_buffer(batch.raw, vk::CommandBufferResetFlags::empty())
                    .map_err(|e| engine_err!("galaxy3d::vulkan", "Failed to reset command buffer: {:?}", e))?;
                for pool in &batch.descriptor_pools {
                    device
                        .context
                        .device
                        .reset_descriptor_pool(*pool, vk::DescriptorPoolResetFlags::empty())
                        .map_err(|e| engine_err!("galaxy3d::vulkan", "Failed to reset descriptor pool: {:?}", e))?;
                }
            }
            Batch { fence: 0, ..batch }
        } else {
            let info = vk::CommandBufferAllocateInfo::default()
                .command_pool(self.pool)
                .level(vk::CommandBufferLevel::PRIMARY)
                .command_buffer_count(1);
            let raw = unsafe { device.context.device.allocate_command_buffers(&info) }
                .map_err(|e| engine_err!("galaxy3d::vulkan", "Failed to allocate command buffer: {:?}", e))?[0];
            Batch { raw, descriptor_pools: Vec::new(), fence: 0 }
        };

        let begin_info = vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { device.context.device.begin_command_buffer(batch.raw, &begin_info) }
            .map_err(|e| engine_err!("galaxy3d::vulkan", "Failed to begin command buffer: {:?}", e))?;
        let raw = batch.raw;
        self.recording = Some(batch);
        Ok(raw)
    }

    /// Allocate a descriptor set, growing the batch's pools when exhausted
    fn allocate_set(&mut self, device: &mut VulkanDevice, layout: vk::DescriptorSetLayout) -> Result<vk::DescriptorSet> {
        let Some(batch) = self.recording.as_mut() else {
            return Err(Error::InvalidState("descriptor set allocated outside a batch".to_string()));
        };
        let layouts = [layout];
        if let Some(pool) = batch.descriptor_pools.last() {
            let info = vk::DescriptorSetAllocateInfo::default().descriptor_pool(*pool).set_layouts(&layouts);
            match unsafe { device.context.device.allocate_descriptor_sets(&info) } {
                Ok(sets) => return Ok(sets[0]),
                Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY) | Err(vk::Result::ERROR_FRAGMENTED_POOL) => {}
                Err(e) => return Err(engine_err!("galaxy3d::vulkan", "Failed to allocate descriptor set: {:?}", e)),
            }
        }

        let pool = device.create_descriptor_pool()?;
        batch.descriptor_pools.push(pool);
        let info = vk::DescriptorSetAllocateInfo::default().descriptor_pool(pool).set_layouts(&layouts);
        unsafe { device.context.device.allocate_descriptor_sets(&info) }
            .map(|sets| sets[0])
            .map_err(|e| engine_err!("galaxy3d::vulkan", "Failed to allocate descriptor set: {:?}", e))
    }

    fn buffer(device: &VulkanDevice, buffer: BufferHandle) -> Result<vk::Buffer> {
        device
            .buffers
            .get(buffer)
            .map(|storage| storage.raw)
            .ok_or_else(|| Error::InvalidResource("bound buffer was destroyed".to_string()))
    }

    fn view(device: &VulkanDevice, view: ViewHandle) -> Result<vk::ImageView> {
        device
            .views
            .get(view)
            .map(|storage| storage.raw)
            .ok_or_else(|| Error::InvalidResource("bound texture view was destroyed".to_string()))
    }

    fn pipeline_kind(&self, device: &VulkanDevice) -> Option<vk::PipelineBindPoint> {
        self.bound_pipeline.and_then(|handle| device.pipelines.get(handle)).map(|pipeline| pipeline.bind_point)
    }
}

impl CommandBufferImpl for VulkanCommandBuffer {
    type Device = VulkanDevice;

    fn begin_render_pass(
        &mut self,
        device: &mut VulkanDevice,
        framebuffer: FramebufferHandle,
        desc: &RenderPassDescriptor,
    ) -> Result<()> {
        if self.inside_render_pass {
            engine_bail!("galaxy3d::vulkan", "Nested render pass");
        }
        let begin = device.prepare_render_pass(framebuffer, desc)?;
        let raw = self.batch(device)?;
        let info = vk::RenderPassBeginInfo::default()
            .render_pass(begin.render_pass)
            .framebuffer(begin.framebuffer)
            .render_area(vk::Rect2D { offset: vk::Offset2D::default(), extent: begin.extent })
            .clear_values(&begin.clear_values);
        unsafe {
            VulkanContext::full_barrier(&device.context.device, raw);
            device.context.device.cmd_begin_render_pass(raw, &info, vk::SubpassContents::INLINE);
        }
        self.inside_render_pass = true;
        device.stats.render_passes += 1;
        Ok(())
    }

    fn end_render_pass(&mut self, device: &mut VulkanDevice) -> Result<()> {
        if !self.inside_render_pass {
            engine_bail!("galaxy3d::vulkan", "end_render_pass without a render pass");
        }
        let raw = self.batch(device)?;
        unsafe { device.context.device.cmd_end_render_pass(raw) };
        self.inside_render_pass = false;
        Ok(())
    }

    fn set_viewport(&mut self, device: &mut VulkanDevice, viewport: &Viewport) -> Result<()> {
        let raw = self.batch(device)?;
        let viewports = [vk::Viewport {
            x: viewport.x,
            y: viewport.y,
            width: viewport.width,
            height: viewport.height,
            min_depth: viewport.min_depth,
            max_depth: viewport.max_depth,
        }];
        unsafe { device.context.device.cmd_set_viewport(raw, 0, &viewports) };
        Ok(())
    }

    fn set_scissor(&mut self, device: &mut VulkanDevice, scissor: &Rect2D) -> Result<()> {
        let raw = self.batch(device)?;
        let scissors = [vk::Rect2D {
            offset: vk::Offset2D { x: scissor.x, y: scissor.y },
            extent: vk::Extent2D { width: scissor.width, height: scissor.height },
        }];
        unsafe { device.context.device.cmd_set_scissor(raw, 0, &scissors) };
        Ok(())
    }

    fn bind_pipeline(&mut self, device: &mut VulkanDevice, pipeline: PipelineHandle) -> Result<()> {
        let Some((handle, bind_point)) = device.pipelines.get(pipeline).map(|p| (p.raw, p.bind_point)) else {
            return Err(Error::InvalidResource("unknown pipeline".to_string()));
        };
        let raw = self.batch(device)?;
        unsafe { device.context.device.cmd_bind_pipeline(raw, bind_point, handle) };
        self.bound_pipeline = Some(pipeline);
        device.stats.pipeline_binds += 1;
        Ok(())
    }

    fn bind_vertex_buffers(
        &mut self,
        device: &mut VulkanDevice,
        first_binding: u32,
        buffers: &[(BufferHandle, u64)],
    ) -> Result<()> {
        let mut raws = Vec::with_capacity(buffers.len());
        let mut offsets = Vec::with_capacity(buffers.len());
        for (buffer, offset) in buffers {
            raws.push(Self::buffer(device, *buffer)?);
            offsets.push(*offset);
        }
        let raw = self.batch(device)?;
        unsafe { device.context.device.cmd_bind_vertex_buffers(raw, first_binding, &raws, &offsets) };
        device.stats.vertex_buffer_binds += 1;
        Ok(())
    }

    fn bind_index_buffer(
        &mut self,
        device: &mut VulkanDevice,
        buffer: BufferHandle,
        offset: u64,
        index_type: IndexType,
    ) -> Result<()> {
        let buffer = Self::buffer(device, buffer)?;
        let raw = self.batch(device)?;
        unsafe { device.context.device.cmd_bind_index_buffer(raw, buffer, offset, index_type_to_vk(index_type)) };
        device.stats.index_buffer_binds += 1;
        Ok(())
    }

    fn bind_resource_set(
        &mut self,
        device: &mut VulkanDevice,
        set: u32,
        bindings: &[(u32, ResourceBinding)],
    ) -> Result<()> {
        let Some((layout, set_layout, bind_point)) = self.bound_pipeline.and_then(|handle| device.pipelines.get(handle)).map(
            |pipeline| (pipeline.layout, pipeline.set_layouts.get(set as usize).copied(), pipeline.bind_point),
        ) else {
            engine_bail!("galaxy3d::vulkan", "Resource set bound without a pipeline");
        };
        let Some(set_layout) = set_layout else {
            engine_bail!("galaxy3d::vulkan", "Bound pipeline declares no resource set {}", set);
        };

        let mut writes = Vec::with_capacity(bindings.len());
        for (binding, resource) in bindings {
            let (kind, write) = match *resource {
                ResourceBinding::UniformBuffer { buffer, offset, range } => (
                    ResourceKind::UniformBuffer,
                    DescriptorWrite::Buffer(vk::DescriptorBufferInfo {
                        buffer: Self::buffer(device, buffer)?,
                        offset,
                        range: if range == 0 { vk::WHOLE_SIZE } else { range },
                    }),
                ),
                ResourceBinding::StorageBuffer { buffer, offset, range } => (
                    ResourceKind::StorageBuffer,
                    DescriptorWrite::Buffer(vk::DescriptorBufferInfo {
                        buffer: Self::buffer(device, buffer)?,
                        offset,
                        range: if range == 0 { vk::WHOLE_SIZE } else { range },
                    }),
                ),
                ResourceBinding::SampledTexture { view } => (
                    ResourceKind::SampledTexture,
                    DescriptorWrite::Image(vk::DescriptorImageInfo {
                        sampler: device.sampler,
                        image_view: Self::view(device, view)?,
                        image_layout: vk::ImageLayout::GENERAL,
                    }),
                ),
                ResourceBinding::StorageTexture { view } => (
                    ResourceKind::StorageTexture,
                    DescriptorWrite::Image(vk::DescriptorImageInfo {
                        sampler: vk::Sampler::null(),
                        image_view: Self::view(device, view)?,
                        image_layout: vk::ImageLayout::GENERAL,
                    }),
                ),
            };
            writes.push((*binding, descriptor_type_to_vk(kind), write));
        }

        let raw = self.batch(device)?;
        let descriptor_set = self.allocate_set(device, set_layout)?;
        let vk_writes: Vec<vk::WriteDescriptorSet> = writes
            .iter()
            .map(|(binding, descriptor_type, write)| {
                let base = vk::WriteDescriptorSet::default()
                    .dst_set(descriptor_set)
                    .dst_binding(*binding)
                    .descriptor_type(*descriptor_type);
                match write {
                    DescriptorWrite::Buffer(info) => base.buffer_info(std::slice::from_ref(info)),
                    DescriptorWrite::Image(info) => base.image_info(std::slice::from_ref(info)),
                }
            })
            .collect();
        unsafe {
            device.context.device.update_descriptor_sets(&vk_writes, &[]);
            device.context.device.cmd_bind_descriptor_sets(raw, bind_point, layout, set, &[descriptor_set], &[]);
        }
        device.stats.resource_set_binds += 1;
        Ok(())
    }

    fn draw(
        &mut self,
        device: &mut VulkanDevice,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) -> Result<()> {
        if !self.inside_render_pass || self.pipeline_kind(device) != Some(vk::PipelineBindPoint::GRAPHICS) {
            engine_bail!("galaxy3d::vulkan", "Draw recorded outside a graphics render pass");
        }
        let raw = self.batch(device)?;
        unsafe { device.context.device.cmd_draw(raw, vertex_count, instance_count, first_vertex, first_instance) };
        device.stats.draw_calls += 1;
        Ok(())
    }

    fn draw_indexed(
        &mut self,
        device: &mut VulkanDevice,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) -> Result<()> {
        if !self.inside_render_pass || self.pipeline_kind(device) != Some(vk::PipelineBindPoint::GRAPHICS) {
            engine_bail!("galaxy3d::vulkan", "Indexed draw recorded outside a graphics render pass");
        }
        let raw = self.batch(device)?;
        unsafe {
            device.context.device.cmd_draw_indexed(
                raw,
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            )
        };
        device.stats.draw_calls += 1;
        Ok(())
    }

    fn dispatch(&mut self, device: &mut VulkanDevice, x: u32, y: u32, z: u32) -> Result<()> {
        if self.inside_render_pass || self.pipeline_kind(device) != Some(vk::PipelineBindPoint::COMPUTE) {
            engine_bail!("galaxy3d::vulkan", "Dispatch recorded without a compute pipeline");
        }
        let raw = self.batch(device)?;
        unsafe {
            VulkanContext::full_barrier(&device.context.device, raw);
            device.context.device.cmd_dispatch(raw, x, y, z);
        }
        device.stats.dispatches += 1;
        device.stats.dispatched_groups += x as u64 * y as u64 * z as u64;
        Ok(())
    }

    fn flush(&mut self, device: &mut VulkanDevice, wait_for_completion: bool) -> Result<u64> {
        if self.inside_render_pass {
            engine_bail!("galaxy3d::vulkan", "Flush inside a render pass");
        }
        let raw = self.batch(device)?;
        unsafe {
            VulkanContext::host_barrier(&device.context.device, raw);
            device
                .context
                .device
                .end_command_buffer(raw)
                .map_err(|e| engine_err!("galaxy3d::vulkan", "Failed to end command buffer: {:?}", e))?;
        }
        let Some(mut batch) = self.recording.take() else {
            return Err(Error::InvalidState("flush without a recording batch".to_string()));
        };

        let submitted = device.context.submit(raw, None, None);
        let fence = match submitted {
            Ok(fence) => fence,
            Err(e) => {
                // The batch can be recorded again after a reset.
                self.retired.push_front(batch);
                return Err(e);
            }
        };
        batch.fence = fence;
        self.retired.push_back(batch);
        self.bound_pipeline = None;
        device.stats.submissions += 1;
        engine_trace!("galaxy3d::vulkan", "Submitted batch with fence {}", fence);

        if wait_for_completion {
            device.context.wait_for(fence)?;
        }
        Ok(fence)
    }
}
