//! Software command buffer: records render passes, counts the rest

use crate::backend::software::SoftwareDevice;
use crate::backend::{BufferHandle, CommandBufferImpl, FramebufferHandle, PipelineHandle, ResourceBinding};
use crate::error::{Error, Result};
use crate::graphics::{IndexType, Rect2D, RenderPassDescriptor, Viewport};
use crate::{engine_bail, engine_trace};

/// Work executed at submission time
enum Command {
    LoadAttachments {
        framebuffer: FramebufferHandle,
        desc: RenderPassDescriptor,
    },
}

/// Command buffer of the software device
pub struct SoftwareCommandBuffer {
    commands: Vec<Command>,
    inside_render_pass: bool,
    compute_bound: Option<bool>,
}

impl SoftwareCommandBuffer {
    pub(crate) fn new() -> Self {
        Self { commands: Vec::new(), inside_render_pass: false, compute_bound: None }
    }

    /// Number of commands waiting for the next flush
    pub fn pending_commands(&self) -> usize {
        self.commands.len()
    }

    fn check_buffer(device: &SoftwareDevice, buffer: BufferHandle) -> Result<()> {
        if device.buffers.contains_key(buffer) {
            Ok(())
        } else {
            Err(Error::InvalidResource("bound buffer was destroyed".to_string()))
        }
    }
}

impl CommandBufferImpl for SoftwareCommandBuffer {
    type Device = SoftwareDevice;

    fn begin_render_pass(
        &mut self,
        device: &mut SoftwareDevice,
        framebuffer: FramebufferHandle,
        desc: &RenderPassDescriptor,
    ) -> Result<()> {
        if self.inside_render_pass {
            engine_bail!("galaxy3d::software", "Nested render pass");
        }
        if !device.framebuffers.contains_key(framebuffer) {
            return Err(Error::InvalidResource("unknown framebuffer".to_string()));
        }
        self.inside_render_pass = true;
        self.commands.push(Command::LoadAttachments { framebuffer, desc: *desc });
        device.stats.render_passes += 1;
        Ok(())
    }

    fn end_render_pass(&mut self, _device: &mut SoftwareDevice) -> Result<()> {
        if !self.inside_render_pass {
            engine_bail!("galaxy3d::software", "end_render_pass without a render pass");
        }
        self.inside_render_pass = false;
        Ok(())
    }

    fn set_viewport(&mut self, _device: &mut SoftwareDevice, viewport: &Viewport) -> Result<()> {
        engine_trace!("galaxy3d::software", "viewport {:?}", viewport);
        Ok(())
    }

    fn set_scissor(&mut self, _device: &mut SoftwareDevice, scissor: &Rect2D) -> Result<()> {
        engine_trace!("galaxy3d::software", "scissor {:?}", scissor);
        Ok(())
    }

    fn bind_pipeline(&mut self, device: &mut SoftwareDevice, pipeline: PipelineHandle) -> Result<()> {
        let Some(compute) = device.pipeline_is_compute(pipeline) else {
            return Err(Error::InvalidResource("unknown pipeline".to_string()));
        };
        self.compute_bound = Some(compute);
        device.stats.pipeline_binds += 1;
        Ok(())
    }

    fn bind_vertex_buffers(
        &mut self,
        device: &mut SoftwareDevice,
        _first_binding: u32,
        buffers: &[(BufferHandle, u64)],
    ) -> Result<()> {
        for (buffer, _) in buffers {
            Self::check_buffer(device, *buffer)?;
        }
        device.stats.vertex_buffer_binds += 1;
        Ok(())
    }

    fn bind_index_buffer(
        &mut self,
        device: &mut SoftwareDevice,
        buffer: BufferHandle,
        _offset: u64,
        _index_type: IndexType,
    ) -> Result<()> {
        Self::check_buffer(device, buffer)?;
        device.stats.index_buffer_binds += 1;
        Ok(())
    }

    fn bind_resource_set(
        &mut self,
        device: &mut SoftwareDevice,
        _set: u32,
        bindings: &[(u32, ResourceBinding)],
    ) -> Result<()> {
        for (_, binding) in bindings {
            match binding {
                ResourceBinding::UniformBuffer { buffer, .. } | ResourceBinding::StorageBuffer { buffer, .. } => {
                    Self::check_buffer(device, *buffer)?
                }
                ResourceBinding::SampledTexture { view } | ResourceBinding::StorageTexture { view } => {
                    if !device.views.contains_key(*view) {
                        return Err(Error::InvalidResource("bound texture view was destroyed".to_string()));
                    }
                }
            }
        }
        device.stats.resource_set_binds += 1;
        Ok(())
    }

    fn draw(
        &mut self,
        device: &mut SoftwareDevice,
        _vertex_count: u32,
        _instance_count: u32,
        _first_vertex: u32,
        _first_instance: u32,
    ) -> Result<()> {
        if !self.inside_render_pass || self.compute_bound != Some(false) {
            engine_bail!("galaxy3d::software", "Draw recorded outside a graphics render pass");
        }
        device.stats.draw_calls += 1;
        Ok(())
    }

    fn draw_indexed(
        &mut self,
        device: &mut SoftwareDevice,
        _index_count: u32,
        _instance_count: u32,
        _first_index: u32,
        _vertex_offset: i32,
        _first_instance: u32,
    ) -> Result<()> {
        if !self.inside_render_pass || self.compute_bound != Some(false) {
            engine_bail!("galaxy3d::software", "Indexed draw recorded outside a graphics render pass");
        }
        device.stats.draw_calls += 1;
        Ok(())
    }

    fn dispatch(&mut self, device: &mut SoftwareDevice, x: u32, y: u32, z: u32) -> Result<()> {
        if self.inside_render_pass || self.compute_bound != Some(true) {
            engine_bail!("galaxy3d::software", "Dispatch recorded without a compute pipeline");
        }
        device.stats.dispatches += 1;
        device.stats.dispatched_groups += x as u64 * y as u64 * z as u64;
        Ok(())
    }

    fn flush(&mut self, device: &mut SoftwareDevice, _wait_for_completion: bool) -> Result<u64> {
        if self.inside_render_pass {
            engine_bail!("galaxy3d::software", "Flush inside a render pass");
        }
        for command in self.commands.drain(..) {
            match command {
                Command::LoadAttachments { framebuffer, desc } => device.execute_load_actions(framebuffer, &desc)?,
            }
        }
        self.compute_bound = None;
        device.stats.submissions += 1;
        Ok(device.next_fence())
    }
}
