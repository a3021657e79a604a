//! Command recording: render-pass state machine, lazy binding and submission
//!
//! A [`CommandContext`] records into one native command buffer. State setters
//! only update a [`BindingState`]; the dirty part of it is sent to the backend
//! right before the next draw or dispatch. State-machine misuse (draw outside
//! a render pass, unbalanced begin/end, flush inside a pass) never reaches the
//! backend and returns `Error::InvalidState`. Usage-contract violations (wrong
//! buffer usage for a slot, missing bindings) are reported to the validation
//! hook and turn the call into a no-op.

use std::collections::VecDeque;
use std::mem;

use glam::Vec4;

use crate::backend::{BackendCommandBuffer, BackendDevice, ResourceBinding, TextureViewKind};
use crate::error::{Error, Result};
use crate::graphics::binding_state::{
    mask_ranges, BindingState, DirtyFlags, IndexBufferBinding, VertexBufferBinding,
};
use crate::graphics::device::DeviceShared;
use crate::graphics::{
    Buffer, BufferUsage, Framebuffer, IndexType, Pipeline, Rect2D, RenderPassDescriptor, ResourceKind,
    Texture, TextureUsage, VertexInputRate, Viewport, MAX_BINDINGS_PER_SET, MAX_DESCRIPTOR_SETS,
    MAX_VERTEX_BUFFER_BINDINGS, REMAINING_ARRAY_LAYERS,
};
use crate::ptr::Ref;
use crate::{engine_error, engine_trace, engine_warn};

const SOURCE: &str = "galaxy3d::CommandContext";

/// Number of thread groups covering `threads` invocations
pub fn group_count(threads: u32, group_size: u32) -> u32 {
    if group_size == 0 {
        0
    } else {
        threads.div_ceil(group_size)
    }
}

/// Resource held in a descriptor slot
enum BoundResource {
    Buffer(Ref<Buffer>),
    Texture(Ref<Texture>),
}

/// Objects referenced by commands that have not retired yet
#[derive(Default)]
struct RetainedBatch {
    buffers: Vec<Ref<Buffer>>,
    textures: Vec<Ref<Texture>>,
    pipelines: Vec<Ref<Pipeline>>,
    framebuffers: Vec<Ref<Framebuffer>>,
}

impl RetainedBatch {
    fn len(&self) -> usize {
        self.buffers.len() + self.textures.len() + self.pipelines.len() + self.framebuffers.len()
    }

    fn retain(&mut self, resource: &BoundResource) {
        match resource {
            BoundResource::Buffer(buffer) => self.buffers.push(buffer.clone()),
            BoundResource::Texture(texture) => self.textures.push(texture.clone()),
        }
    }
}

fn resource_kind(binding: &ResourceBinding) -> ResourceKind {
    match binding {
        ResourceBinding::UniformBuffer { .. } => ResourceKind::UniformBuffer,
        ResourceBinding::StorageBuffer { .. } => ResourceKind::StorageBuffer,
        ResourceBinding::SampledTexture { .. } => ResourceKind::SampledTexture,
        ResourceBinding::StorageTexture { .. } => ResourceKind::StorageTexture,
    }
}

/// Render and compute command recorder
pub struct CommandContext {
    name: String,
    commands: Option<BackendCommandBuffer>,
    state: BindingState,
    inside_render_pass: bool,
    framebuffer: Option<Ref<Framebuffer>>,
    pipeline: Option<Ref<Pipeline>>,
    vertex_buffers: [Option<Ref<Buffer>>; MAX_VERTEX_BUFFER_BINDINGS as usize],
    index_buffer: Option<Ref<Buffer>>,
    resources: [[Option<BoundResource>; MAX_BINDINGS_PER_SET as usize]; MAX_DESCRIPTOR_SETS as usize],
    pending: RetainedBatch,
    in_flight: VecDeque<(u64, RetainedBatch)>,
    last_fence: u64,
    // Last: everything above may call into the backend when dropped.
    shared: Ref<DeviceShared>,
}

impl CommandContext {
    pub(crate) fn new(shared: &Ref<DeviceShared>, name: &str) -> Result<Self> {
        let commands = shared.with_backend(|backend| backend.create_command_buffer())?;
        Ok(Self {
            name: name.to_string(),
            commands: Some(commands),
            state: BindingState::new(),
            inside_render_pass: false,
            framebuffer: None,
            pipeline: None,
            vertex_buffers: std::array::from_fn(|_| None),
            index_buffer: None,
            resources: std::array::from_fn(|_| std::array::from_fn(|_| None)),
            pending: RetainedBatch::default(),
            in_flight: VecDeque::new(),
            last_fence: 0,
            shared: shared.clone(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn is_inside_render_pass(&self) -> bool {
        self.inside_render_pass
    }

    /// Framebuffer of the open render pass
    pub fn framebuffer(&self) -> Option<&Ref<Framebuffer>> {
        self.framebuffer.as_ref()
    }

    pub fn pipeline(&self) -> Option<&Ref<Pipeline>> {
        self.pipeline.as_ref()
    }

    /// Fence value returned by the latest flush
    pub fn last_fence(&self) -> u64 {
        self.last_fence
    }

    /// Submissions whose resources are still kept alive
    pub fn in_flight_submissions(&self) -> usize {
        self.in_flight.len()
    }

    /// Lazy binding state (what will be sent at the next draw or dispatch)
    pub fn binding_state(&self) -> &BindingState {
        &self.state
    }

    // ===== INTERNAL HELPERS =====

    fn record<R>(
        &mut self,
        f: impl FnOnce(&mut BackendCommandBuffer, &mut BackendDevice) -> Result<R>,
    ) -> Result<R> {
        let commands = self
            .commands
            .as_mut()
            .ok_or_else(|| Error::InvalidState("command context has no command buffer".to_string()))?;
        let mut backend = self.shared.backend()?;
        f(commands, &mut backend)
    }

    fn misuse(&self, message: String) -> Error {
        self.shared.misuse(SOURCE, format!("[{}] {}", self.name, message))
    }

    /// Out-of-range binding index: always rejected, reported when validating
    fn reject_index(&self, message: String) {
        if !self.shared.report_violation(message.clone()) {
            engine_error!(SOURCE, "[{}] {}", self.name, message);
        }
    }

    /// Usage contract check; true means the call must be skipped
    fn violates(&self, ok: bool, message: impl FnOnce() -> String) -> bool {
        !ok && self.shared.report_violation(format!("[{}] {}", self.name, message()))
    }

    fn check_buffer(&self, buffer: &Buffer, usage: BufferUsage, slot: &str) -> bool {
        if self.violates(buffer.usage().contains(usage), || {
            format!("buffer '{}' ({:?}) bound as {} needs {:?} usage", buffer.name(), buffer.usage(), slot, usage)
        }) {
            return false;
        }
        if self.violates(buffer.belongs_to(&self.shared), || {
            format!("buffer '{}' belongs to another device", buffer.name())
        }) {
            return false;
        }
        true
    }

    fn check_slot(&self, set: u32, binding: u32) -> bool {
        if set >= MAX_DESCRIPTOR_SETS || binding >= MAX_BINDINGS_PER_SET {
            self.reject_index(format!(
                "resource slot (set {}, binding {}) out of range ({} sets, {} bindings)",
                set, binding, MAX_DESCRIPTOR_SETS, MAX_BINDINGS_PER_SET
            ));
            return false;
        }
        true
    }

    // ===== RENDER PASS =====

    /// Open a render pass on `framebuffer`
    ///
    /// Viewport and scissor are reset to the full framebuffer.
    pub fn begin_render_pass(&mut self, framebuffer: &Ref<Framebuffer>, descriptor: &RenderPassDescriptor) -> Result<()> {
        if self.inside_render_pass {
            return Err(self.misuse("begin_render_pass called inside a render pass".to_string()));
        }
        if !framebuffer.belongs_to(&self.shared) {
            let message = format!("[{}] framebuffer belongs to another device", self.name);
            self.shared.report_violation(message.clone());
            return Err(Error::InvalidResource(message));
        }

        let handle = framebuffer.handle();
        self.record(|commands, device| commands.begin_render_pass(device, handle, descriptor))?;
        self.inside_render_pass = true;
        self.framebuffer = Some(framebuffer.clone());
        self.pending.framebuffers.push(framebuffer.clone());

        let (width, height) = (framebuffer.width(), framebuffer.height());
        self.state.set_viewport(Viewport::full(width, height));
        self.state.set_scissor(Rect2D::full(width, height));
        engine_trace!(SOURCE, "[{}] begin render pass {}x{}", self.name, width, height);
        Ok(())
    }

    /// Open a render pass on the current swapchain image, clearing it
    pub fn begin_default_render_pass(&mut self, clear_color: Vec4, clear_depth: f32, clear_stencil: u8) -> Result<()> {
        if !self.shared.is_inside_frame() {
            return Err(self.misuse("begin_default_render_pass called outside begin_frame/end_frame".to_string()));
        }
        let framebuffer = self.shared.swapchain_framebuffer()?;
        self.begin_render_pass(&framebuffer, &RenderPassDescriptor::clear(clear_color, clear_depth, clear_stencil))
    }

    pub fn end_render_pass(&mut self) -> Result<()> {
        if !self.inside_render_pass {
            return Err(self.misuse("end_render_pass called without begin_render_pass".to_string()));
        }
        self.record(|commands, device| commands.end_render_pass(device))?;
        self.inside_render_pass = false;
        self.framebuffer = None;
        Ok(())
    }

    // ===== STATE =====

    pub fn set_pipeline(&mut self, pipeline: &Ref<Pipeline>) {
        if self.violates(pipeline.belongs_to(&self.shared), || {
            format!("pipeline '{}' belongs to another device", pipeline.name())
        }) {
            return;
        }
        if self.state.set_pipeline(pipeline.handle()) {
            self.pipeline = Some(pipeline.clone());
        }
    }

    /// Bind one vertex buffer slot; the stride comes from the buffer
    pub fn set_vertex_buffer(&mut self, binding: u32, buffer: &Ref<Buffer>, offset: u64, input_rate: VertexInputRate) {
        if binding >= MAX_VERTEX_BUFFER_BINDINGS {
            self.reject_index(format!(
                "vertex buffer binding {} out of range (max {})",
                binding, MAX_VERTEX_BUFFER_BINDINGS
            ));
            return;
        }
        if !self.check_buffer(buffer, BufferUsage::VERTEX, "vertex buffer") {
            return;
        }
        let handle = match buffer.handle() {
            Ok(handle) => handle,
            Err(e) => {
                engine_error!(SOURCE, "[{}] set_vertex_buffer: {}", self.name, e);
                return;
            }
        };
        let changed = self.state.set_vertex_buffer(
            binding,
            VertexBufferBinding { buffer: handle, offset, stride: buffer.stride(), input_rate },
        );
        if changed {
            self.vertex_buffers[binding as usize] = Some(buffer.clone());
        }
    }

    /// Bind consecutive per-vertex slots starting at `first`
    ///
    /// Missing offsets default to 0. Nothing is bound unless the range fits and
    /// every buffer passes the usage checks.
    pub fn set_vertex_buffers(&mut self, first: u32, buffers: &[&Ref<Buffer>], offsets: &[u64]) {
        let end = first as usize + buffers.len();
        if end > MAX_VERTEX_BUFFER_BINDINGS as usize {
            self.reject_index(format!(
                "vertex buffer bindings {}..{} out of range (max {})",
                first, end, MAX_VERTEX_BUFFER_BINDINGS
            ));
            return;
        }
        let mut bindings = Vec::with_capacity(buffers.len());
        for (i, buffer) in buffers.iter().enumerate() {
            if !self.check_buffer(buffer, BufferUsage::VERTEX, "vertex buffer") {
                return;
            }
            let handle = match buffer.handle() {
                Ok(handle) => handle,
                Err(e) => {
                    engine_error!(SOURCE, "[{}] set_vertex_buffers: {}", self.name, e);
                    return;
                }
            };
            let offset = offsets.get(i).copied().unwrap_or(0);
            bindings.push(VertexBufferBinding {
                buffer: handle,
                offset,
                stride: buffer.stride(),
                input_rate: VertexInputRate::Vertex,
            });
        }
        for (i, (buffer, binding)) in buffers.iter().zip(bindings).enumerate() {
            let slot = first + i as u32;
            if self.state.set_vertex_buffer(slot, binding) {
                self.vertex_buffers[slot as usize] = Some((*buffer).clone());
            }
        }
    }

    pub fn set_index_buffer(&mut self, buffer: &Ref<Buffer>, offset: u64, index_type: IndexType) {
        if !self.check_buffer(buffer, BufferUsage::INDEX, "index buffer") {
            return;
        }
        let handle = match buffer.handle() {
            Ok(handle) => handle,
            Err(e) => {
                engine_error!(SOURCE, "[{}] set_index_buffer: {}", self.name, e);
                return;
            }
        };
        if self.state.set_index_buffer(IndexBufferBinding { buffer: handle, offset, index_type }) {
            self.index_buffer = Some(buffer.clone());
        }
    }

    fn bind_buffer(
        &mut self,
        set: u32,
        binding: u32,
        buffer: &Ref<Buffer>,
        offset: u64,
        range: u64,
        usage: BufferUsage,
    ) {
        if !self.check_slot(set, binding) {
            return;
        }
        let slot = if usage == BufferUsage::UNIFORM { "uniform buffer" } else { "storage buffer" };
        if !self.check_buffer(buffer, usage, slot) {
            return;
        }
        // A zero range covers the rest of the buffer.
        let range = if range == 0 { buffer.size().saturating_sub(offset) } else { range };
        let fits = offset.checked_add(range).map_or(false, |end| end <= buffer.size());
        if self.violates(fits && range > 0, || {
            format!(
                "{} range {}+{} exceeds buffer '{}' ({} bytes)",
                slot,
                offset,
                range,
                buffer.name(),
                buffer.size()
            )
        }) {
            return;
        }
        let handle = match buffer.handle() {
            Ok(handle) => handle,
            Err(e) => {
                engine_error!(SOURCE, "[{}] {}: {}", self.name, slot, e);
                return;
            }
        };
        let resource = if usage == BufferUsage::UNIFORM {
            ResourceBinding::UniformBuffer { buffer: handle, offset, range }
        } else {
            ResourceBinding::StorageBuffer { buffer: handle, offset, range }
        };
        if self.state.set_resource(set, binding, Some(resource)) {
            self.resources[set as usize][binding as usize] = Some(BoundResource::Buffer(buffer.clone()));
        }
    }

    /// Bind a uniform buffer range (`range` 0 means "to the end")
    pub fn set_uniform_buffer(&mut self, set: u32, binding: u32, buffer: &Ref<Buffer>, offset: u64, range: u64) {
        self.bind_buffer(set, binding, buffer, offset, range, BufferUsage::UNIFORM);
    }

    /// Bind a storage buffer range (`range` 0 means "to the end")
    pub fn set_storage_buffer(&mut self, set: u32, binding: u32, buffer: &Ref<Buffer>, offset: u64, range: u64) {
        self.bind_buffer(set, binding, buffer, offset, range, BufferUsage::STORAGE);
    }

    fn bind_texture(&mut self, set: u32, binding: u32, texture: &Ref<Texture>, storage_mip: Option<u32>) {
        if !self.check_slot(set, binding) {
            return;
        }
        let usage = if storage_mip.is_some() { TextureUsage::SHADER_WRITE } else { TextureUsage::SHADER_READ };
        if self.violates(texture.usage().contains(usage), || {
            format!("texture '{}' ({:?}) needs {:?} usage", texture.name(), texture.usage(), usage)
        }) {
            return;
        }
        if self.violates(texture.belongs_to(&self.shared), || {
            format!("texture '{}' belongs to another device", texture.name())
        }) {
            return;
        }
        let view = match storage_mip {
            Some(mip) => texture.view(TextureViewKind::ShaderWrite, mip, 1, 0, REMAINING_ARRAY_LAYERS),
            None => texture.shader_view(),
        };
        let resource = match view {
            Ok(view) if storage_mip.is_some() => ResourceBinding::StorageTexture { view },
            Ok(view) => ResourceBinding::SampledTexture { view },
            Err(e) => {
                engine_error!(SOURCE, "[{}] cannot bind texture '{}': {}", self.name, texture.name(), e);
                return;
            }
        };
        if self.state.set_resource(set, binding, Some(resource)) {
            self.resources[set as usize][binding as usize] = Some(BoundResource::Texture(texture.clone()));
        }
    }

    /// Bind a texture for sampling (every mip and layer)
    pub fn set_texture(&mut self, set: u32, binding: u32, texture: &Ref<Texture>) {
        self.bind_texture(set, binding, texture, None);
    }

    /// Bind one mip level of a texture for shader writes
    pub fn set_storage_texture(&mut self, set: u32, binding: u32, texture: &Ref<Texture>, mip_level: u32) {
        self.bind_texture(set, binding, texture, Some(mip_level));
    }

    /// Empty a descriptor slot
    pub fn unbind_resource(&mut self, set: u32, binding: u32) {
        if !self.check_slot(set, binding) {
            return;
        }
        if self.state.set_resource(set, binding, None) {
            self.resources[set as usize][binding as usize] = None;
        }
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.state.set_viewport(viewport);
    }

    pub fn set_scissor(&mut self, scissor: Rect2D) {
        self.state.set_scissor(scissor);
    }

    // ===== DRAW =====

    /// Missing or mismatched bindings required by the bound pipeline
    fn missing_bindings(&self, pipeline: &Pipeline) -> Option<String> {
        for (slot, _) in pipeline.vertex_buffers().iter().enumerate() {
            if self.state.vertex_buffer(slot as u32).is_none() {
                return Some(format!("pipeline '{}' reads vertex buffer slot {} which is unbound", pipeline.name(), slot));
            }
        }
        for entry in pipeline.resource_layout() {
            match self.state.resource(entry.set, entry.binding) {
                Some(bound) if resource_kind(bound) == entry.kind => {}
                Some(bound) => {
                    return Some(format!(
                        "pipeline '{}' expects {:?} at (set {}, binding {}), {:?} is bound",
                        pipeline.name(),
                        entry.kind,
                        entry.set,
                        entry.binding,
                        resource_kind(bound)
                    ))
                }
                None => {
                    return Some(format!(
                        "pipeline '{}' expects {:?} at (set {}, binding {}), nothing is bound",
                        pipeline.name(),
                        entry.kind,
                        entry.set,
                        entry.binding
                    ))
                }
            }
        }
        None
    }

    /// Ok(false) means a usage violation was reported and the call is skipped
    fn validate_draw(&self, what: &str, count: u32, instance_count: u32, indexed: bool) -> Result<bool> {
        if !self.inside_render_pass {
            return Err(self.misuse(format!("{} called outside a render pass", what)));
        }
        let pipeline = match &self.pipeline {
            Some(pipeline) if !pipeline.is_compute() => pipeline,
            Some(_) => return Err(self.misuse(format!("{} called with a compute pipeline bound", what))),
            None => return Err(self.misuse(format!("{} called without a pipeline", what))),
        };
        if count == 0 || instance_count == 0 {
            return Err(self.misuse(format!(
                "{} called with count {} and {} instances",
                what, count, instance_count
            )));
        }
        if indexed && self.state.index_buffer().is_none() {
            return Err(self.misuse(format!("{} called without an index buffer", what)));
        }
        if self.shared.validation_active() && !self.shared.is_inside_frame() {
            return Err(self.misuse(format!("{} called outside begin_frame/end_frame", what)));
        }
        if self.shared.validation_active() {
            if let Some(message) = self.missing_bindings(pipeline) {
                return Ok(!self.shared.report_violation(format!("[{}] {}", self.name, message)));
            }
        }
        Ok(true)
    }

    /// Send the dirty part of the binding state to the backend
    fn apply_state(&mut self, graphics: bool) -> Result<()> {
        let filter = if graphics {
            DirtyFlags::all()
        } else {
            DirtyFlags::PIPELINE | DirtyFlags::RESOURCE_SETS
        };
        let dirty = self.state.take_dirty_matching(filter);
        if dirty.is_empty() {
            return Ok(());
        }

        let commands = self
            .commands
            .as_mut()
            .ok_or_else(|| Error::InvalidState("command context has no command buffer".to_string()))?;
        let mut backend = self.shared.backend()?;
        let device = &mut *backend;

        if dirty.flags.contains(DirtyFlags::PIPELINE) {
            if let Some(pipeline) = &self.pipeline {
                commands.bind_pipeline(device, pipeline.handle())?;
                self.pending.pipelines.push(pipeline.clone());
            }
        }
        if dirty.flags.contains(DirtyFlags::VERTEX_BUFFERS) {
            for (first, count) in mask_ranges(dirty.vertex_buffers) {
                let mut list = Vec::with_capacity(count as usize);
                for slot in first..first + count {
                    if let Some(binding) = self.state.vertex_buffer(slot) {
                        list.push((binding.buffer, binding.offset));
                    }
                    if let Some(buffer) = &self.vertex_buffers[slot as usize] {
                        self.pending.buffers.push(buffer.clone());
                    }
                }
                commands.bind_vertex_buffers(device, first, &list)?;
            }
        }
        if dirty.flags.contains(DirtyFlags::INDEX_BUFFER) {
            if let Some(binding) = self.state.index_buffer() {
                commands.bind_index_buffer(device, binding.buffer, binding.offset, binding.index_type)?;
            }
            if let Some(buffer) = &self.index_buffer {
                self.pending.buffers.push(buffer.clone());
            }
        }
        if dirty.flags.contains(DirtyFlags::RESOURCE_SETS) {
            for (first, count) in mask_ranges(dirty.resource_sets) {
                for set in first..first + count {
                    let bindings = self.state.resources_in_set(set);
                    if bindings.is_empty() {
                        continue;
                    }
                    commands.bind_resource_set(device, set, &bindings)?;
                    for resource in self.resources[set as usize].iter().flatten() {
                        self.pending.retain(resource);
                    }
                }
            }
        }
        if dirty.flags.contains(DirtyFlags::VIEWPORT) {
            if let Some(viewport) = self.state.viewport() {
                commands.set_viewport(device, &viewport)?;
            }
        }
        if dirty.flags.contains(DirtyFlags::SCISSOR) {
            if let Some(scissor) = self.state.scissor() {
                commands.set_scissor(device, &scissor)?;
            }
        }
        Ok(())
    }

    pub fn draw(&mut self, vertex_count: u32, first_vertex: u32) -> Result<()> {
        self.draw_instanced(vertex_count, 1, first_vertex, 0)
    }

    pub fn draw_instanced(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) -> Result<()> {
        if !self.validate_draw("draw", vertex_count, instance_count, false)? {
            return Ok(());
        }
        self.apply_state(true)?;
        self.record(|commands, device| commands.draw(device, vertex_count, instance_count, first_vertex, first_instance))
    }

    pub fn draw_indexed(&mut self, index_count: u32, first_index: u32, vertex_offset: i32) -> Result<()> {
        self.draw_indexed_instanced(index_count, 1, first_index, vertex_offset, 0)
    }

    pub fn draw_indexed_instanced(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) -> Result<()> {
        if !self.validate_draw("draw_indexed", index_count, instance_count, true)? {
            return Ok(());
        }
        self.apply_state(true)?;
        self.record(|commands, device| {
            commands.draw_indexed(device, index_count, instance_count, first_index, vertex_offset, first_instance)
        })
    }

    // ===== COMPUTE =====

    /// Dispatch `x * y * z` thread groups
    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) -> Result<()> {
        let pipeline = match &self.pipeline {
            Some(pipeline) if pipeline.is_compute() => pipeline,
            Some(_) => return Err(self.misuse("dispatch called with a graphics pipeline bound".to_string())),
            None => return Err(self.misuse("dispatch called without a pipeline".to_string())),
        };
        if self.inside_render_pass {
            return Err(self.misuse("dispatch called inside a render pass".to_string()));
        }
        if x == 0 || y == 0 || z == 0 {
            return Err(self.misuse(format!("dispatch called with {}x{}x{} groups", x, y, z)));
        }
        if self.shared.validation_active() {
            if !self.shared.is_inside_frame() {
                return Err(self.misuse("dispatch called outside begin_frame/end_frame".to_string()));
            }
            if let Some(message) = self.missing_bindings(pipeline) {
                if self.shared.report_violation(format!("[{}] {}", self.name, message)) {
                    return Ok(());
                }
            }
        }
        self.apply_state(false)?;
        self.record(|commands, device| commands.dispatch(device, x, y, z))
    }

    /// Dispatch enough groups of `group_size` threads to cover `threads`
    pub fn dispatch_1d(&mut self, threads: u32, group_size: u32) -> Result<()> {
        if group_size == 0 {
            return Err(self.misuse("dispatch_1d called with a zero group size".to_string()));
        }
        self.dispatch(group_count(threads, group_size), 1, 1)
    }

    pub fn dispatch_2d(&mut self, threads_x: u32, threads_y: u32, group_x: u32, group_y: u32) -> Result<()> {
        if group_x == 0 || group_y == 0 {
            return Err(self.misuse("dispatch_2d called with a zero group size".to_string()));
        }
        self.dispatch(group_count(threads_x, group_x), group_count(threads_y, group_y), 1)
    }

    pub fn dispatch_3d(
        &mut self,
        threads: (u32, u32, u32),
        group_size: (u32, u32, u32),
    ) -> Result<()> {
        if group_size.0 == 0 || group_size.1 == 0 || group_size.2 == 0 {
            return Err(self.misuse("dispatch_3d called with a zero group size".to_string()));
        }
        self.dispatch(
            group_count(threads.0, group_size.0),
            group_count(threads.1, group_size.1),
            group_count(threads.2, group_size.2),
        )
    }

    // ===== SUBMISSION =====

    /// Submit everything recorded so far
    ///
    /// Returns the submission's fence value (device-wide, increasing). With
    /// `wait_for_completion` the call blocks until the GPU is done with it.
    /// Every binding is sent again after a flush.
    pub fn flush(&mut self, wait_for_completion: bool) -> Result<u64> {
        if self.inside_render_pass {
            return Err(self.misuse("flush called inside a render pass".to_string()));
        }
        let fence = self.record(|commands, device| commands.flush(device, wait_for_completion))?;
        self.last_fence = fence;

        let batch = mem::take(&mut self.pending);
        if batch.len() > 0 {
            self.in_flight.push_back((fence, batch));
        }
        self.state.invalidate();
        self.release_completed()?;
        Ok(fence)
    }

    /// Drop the resources of submissions the GPU has retired
    pub(crate) fn release_completed(&mut self) -> Result<()> {
        if self.in_flight.is_empty() {
            return Ok(());
        }
        let completed = self.shared.with_backend(|backend| backend.completed_fence_value())?;
        while self.in_flight.front().map_or(false, |(fence, _)| *fence <= completed) {
            self.in_flight.pop_front();
        }
        Ok(())
    }
}

impl Drop for CommandContext {
    fn drop(&mut self) {
        if self.inside_render_pass {
            engine_warn!(SOURCE, "[{}] dropped inside a render pass", self.name);
        }
        let Some(commands) = self.commands.take() else {
            return;
        };
        match self.shared.backend() {
            Ok(mut backend) => {
                if !self.in_flight.is_empty() {
                    if let Err(e) = backend.wait_idle() {
                        engine_warn!(SOURCE, "[{}] wait_idle failed: {}", self.name, e);
                    }
                }
                backend.destroy_command_buffer(commands);
            }
            Err(e) => engine_warn!(SOURCE, "[{}] command buffer leaked: {}", self.name, e),
        }
    }
}

#[cfg(test)]
#[path = "command_context_tests.rs"]
mod tests;
