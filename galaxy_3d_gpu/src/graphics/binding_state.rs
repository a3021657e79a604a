//! Lazy binding state of a command context
//!
//! Setters only record what should be bound and raise dirty bits; nothing
//! reaches the backend until the next draw or dispatch calls
//! [`BindingState::take_dirty`]. Setting a value equal to the current one
//! leaves the state clean.

use bitflags::bitflags;

use crate::backend::{BufferHandle, PipelineHandle, ResourceBinding};
use crate::graphics::{
    IndexType, Rect2D, VertexInputRate, Viewport, MAX_BINDINGS_PER_SET, MAX_DESCRIPTOR_SETS,
    MAX_VERTEX_BUFFER_BINDINGS,
};

const VERTEX_SLOTS: usize = MAX_VERTEX_BUFFER_BINDINGS as usize;
const SETS: usize = MAX_DESCRIPTOR_SETS as usize;
const BINDINGS: usize = MAX_BINDINGS_PER_SET as usize;

bitflags! {
    /// Binding categories waiting to be sent to the backend
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DirtyFlags: u32 {
        const PIPELINE = 1 << 0;
        const VERTEX_BUFFERS = 1 << 1;
        const INDEX_BUFFER = 1 << 2;
        const RESOURCE_SETS = 1 << 3;
        const VIEWPORT = 1 << 4;
        const SCISSOR = 1 << 5;
    }
}

/// A bound vertex buffer slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexBufferBinding {
    pub buffer: BufferHandle,
    pub offset: u64,
    pub stride: u32,
    pub input_rate: VertexInputRate,
}

/// The bound index buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexBufferBinding {
    pub buffer: BufferHandle,
    pub offset: u64,
    pub index_type: IndexType,
}

/// What has to be re-sent, as returned by [`BindingState::take_dirty`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DirtyState {
    pub flags: DirtyFlags,
    /// One bit per vertex buffer slot
    pub vertex_buffers: u32,
    /// One bit per descriptor set
    pub resource_sets: u32,
}

impl DirtyState {
    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }
}

/// Current bindings plus dirty masks
#[derive(Debug, Clone)]
pub struct BindingState {
    flags: DirtyFlags,
    dirty_vertex_buffers: u32,
    dirty_sets: u32,
    pipeline: Option<PipelineHandle>,
    vertex_buffers: [Option<VertexBufferBinding>; VERTEX_SLOTS],
    index_buffer: Option<IndexBufferBinding>,
    sets: [[Option<ResourceBinding>; BINDINGS]; SETS],
    viewport: Option<Viewport>,
    scissor: Option<Rect2D>,
}

impl Default for BindingState {
    fn default() -> Self {
        Self::new()
    }
}

impl BindingState {
    pub fn new() -> Self {
        Self {
            flags: DirtyFlags::empty(),
            dirty_vertex_buffers: 0,
            dirty_sets: 0,
            pipeline: None,
            vertex_buffers: [None; VERTEX_SLOTS],
            index_buffer: None,
            sets: [[None; BINDINGS]; SETS],
            viewport: None,
            scissor: None,
        }
    }

    /// Bind a pipeline; a change also re-dirties every non-empty set
    pub fn set_pipeline(&mut self, pipeline: PipelineHandle) -> bool {
        if self.pipeline == Some(pipeline) {
            return false;
        }
        self.pipeline = Some(pipeline);
        self.flags |= DirtyFlags::PIPELINE;
        let used = self.non_empty_sets();
        if used != 0 {
            self.dirty_sets |= used;
            self.flags |= DirtyFlags::RESOURCE_SETS;
        }
        true
    }

    /// Bind a vertex buffer slot; `slot` must be below `MAX_VERTEX_BUFFER_BINDINGS`
    pub fn set_vertex_buffer(&mut self, slot: u32, binding: VertexBufferBinding) -> bool {
        let index = slot as usize;
        if index >= VERTEX_SLOTS || self.vertex_buffers[index] == Some(binding) {
            return false;
        }
        self.vertex_buffers[index] = Some(binding);
        self.dirty_vertex_buffers |= 1 << slot;
        self.flags |= DirtyFlags::VERTEX_BUFFERS;
        true
    }

    pub fn set_index_buffer(&mut self, binding: IndexBufferBinding) -> bool {
        if self.index_buffer == Some(binding) {
            return false;
        }
        self.index_buffer = Some(binding);
        self.flags |= DirtyFlags::INDEX_BUFFER;
        true
    }

    /// Write (or clear, with `None`) one descriptor slot
    pub fn set_resource(&mut self, set: u32, binding: u32, resource: Option<ResourceBinding>) -> bool {
        let (s, b) = (set as usize, binding as usize);
        if s >= SETS || b >= BINDINGS || self.sets[s][b] == resource {
            return false;
        }
        self.sets[s][b] = resource;
        self.dirty_sets |= 1 << set;
        self.flags |= DirtyFlags::RESOURCE_SETS;
        true
    }

    pub fn set_viewport(&mut self, viewport: Viewport) -> bool {
        if self.viewport == Some(viewport) {
            return false;
        }
        self.viewport = Some(viewport);
        self.flags |= DirtyFlags::VIEWPORT;
        true
    }

    pub fn set_scissor(&mut self, scissor: Rect2D) -> bool {
        if self.scissor == Some(scissor) {
            return false;
        }
        self.scissor = Some(scissor);
        self.flags |= DirtyFlags::SCISSOR;
        true
    }

    pub fn is_dirty(&self) -> bool {
        !self.flags.is_empty()
    }

    pub fn dirty_flags(&self) -> DirtyFlags {
        self.flags
    }

    /// Return and clear everything that needs re-sending
    pub fn take_dirty(&mut self) -> DirtyState {
        self.take_dirty_matching(DirtyFlags::all())
    }

    /// Return and clear only the categories in `filter`; others stay dirty
    pub fn take_dirty_matching(&mut self, filter: DirtyFlags) -> DirtyState {
        let flags = self.flags & filter;
        let mut state = DirtyState { flags, vertex_buffers: 0, resource_sets: 0 };
        if flags.contains(DirtyFlags::VERTEX_BUFFERS) {
            state.vertex_buffers = std::mem::take(&mut self.dirty_vertex_buffers);
        }
        if flags.contains(DirtyFlags::RESOURCE_SETS) {
            state.resource_sets = std::mem::take(&mut self.dirty_sets);
        }
        self.flags.remove(flags);
        state
    }

    /// Mark every bound value dirty (new native command buffer)
    pub fn invalidate(&mut self) {
        self.flags = DirtyFlags::empty();
        self.dirty_vertex_buffers = 0;
        self.dirty_sets = 0;
        if self.pipeline.is_some() {
            self.flags |= DirtyFlags::PIPELINE;
        }
        for (slot, binding) in self.vertex_buffers.iter().enumerate() {
            if binding.is_some() {
                self.dirty_vertex_buffers |= 1 << slot;
                self.flags |= DirtyFlags::VERTEX_BUFFERS;
            }
        }
        if self.index_buffer.is_some() {
            self.flags |= DirtyFlags::INDEX_BUFFER;
        }
        self.dirty_sets = self.non_empty_sets();
        if self.dirty_sets != 0 {
            self.flags |= DirtyFlags::RESOURCE_SETS;
        }
        if self.viewport.is_some() {
            self.flags |= DirtyFlags::VIEWPORT;
        }
        if self.scissor.is_some() {
            self.flags |= DirtyFlags::SCISSOR;
        }
    }

    /// Forget every binding
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn pipeline(&self) -> Option<PipelineHandle> {
        self.pipeline
    }

    pub fn vertex_buffer(&self, slot: u32) -> Option<&VertexBufferBinding> {
        self.vertex_buffers.get(slot as usize).and_then(|b| b.as_ref())
    }

    pub fn index_buffer(&self) -> Option<&IndexBufferBinding> {
        self.index_buffer.as_ref()
    }

    pub fn resource(&self, set: u32, binding: u32) -> Option<&ResourceBinding> {
        self.sets
            .get(set as usize)
            .and_then(|s| s.get(binding as usize))
            .and_then(|b| b.as_ref())
    }

    /// Non-empty slots of a set, as `(binding, resource)`
    pub fn resources_in_set(&self, set: u32) -> Vec<(u32, ResourceBinding)> {
        match self.sets.get(set as usize) {
            Some(bindings) => bindings
                .iter()
                .enumerate()
                .filter_map(|(i, b)| b.map(|resource| (i as u32, resource)))
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn viewport(&self) -> Option<Viewport> {
        self.viewport
    }

    pub fn scissor(&self) -> Option<Rect2D> {
        self.scissor
    }

    fn non_empty_sets(&self) -> u32 {
        self.sets
            .iter()
            .enumerate()
            .filter(|(_, bindings)| bindings.iter().any(|b| b.is_some()))
            .fold(0, |mask, (i, _)| mask | (1 << i))
    }
}

/// Split a slot mask into runs of consecutive slots: `(first, count)`
pub fn mask_ranges(mask: u32) -> Vec<(u32, u32)> {
    let mut ranges = Vec::new();
    let mut bits = mask;
    while bits != 0 {
        let first = bits.trailing_zeros();
        let count = (bits >> first).trailing_ones();
        ranges.push((first, count));
        if first + count >= 32 {
            break;
        }
        bits &= !((((1u64 << count) - 1) as u32) << first);
    }
    ranges
}

#[cfg(test)]
#[path = "binding_state_tests.rs"]
mod tests;
