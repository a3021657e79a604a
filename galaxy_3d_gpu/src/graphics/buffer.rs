//! GPU buffers (vertex, index, uniform, storage)

use crate::backend::BufferHandle;
use crate::error::{Error, Result};
use crate::graphics::device::{with_backend, Device, DeviceShared};
use crate::graphics::{BufferUsage, IndexType, VertexElement};
use crate::ptr::{Ref, WeakRef};
use crate::{engine_debug, engine_error};

/// Descriptor for defining a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferDescriptor {
    /// Size in bytes
    pub size: u64,
    /// Element stride in bytes (0 for raw buffers)
    pub stride: u32,
    /// Binding usage
    pub usage: BufferUsage,
    /// Keep a CPU-side copy of the content
    pub shadow: bool,
}

impl BufferDescriptor {
    pub fn new(size: u64, usage: BufferUsage) -> Self {
        Self { size, stride: 0, usage, shadow: false }
    }
}

/// Packed or explicit vertex layout
///
/// Offsets are computed tightly in declaration order when every element has
/// offset 0. Any explicit offset disables packing for the whole list and the
/// given offsets are kept as-is. Returns the adjusted elements and the stride.
pub fn compute_vertex_layout(elements: &[VertexElement]) -> (Vec<VertexElement>, u32) {
    let auto_offset = elements.iter().all(|e| e.offset == 0);
    let mut packed = 0u32;
    let mut furthest_end = 0u32;
    let mut out = Vec::with_capacity(elements.len());
    for element in elements {
        let offset = if auto_offset { packed } else { element.offset };
        let size = element.format.size_bytes();
        out.push(VertexElement { format: element.format, offset });
        packed += size;
        furthest_end = furthest_end.max(offset + size);
    }
    (out, packed.max(furthest_end))
}

/// GPU buffer
///
/// Created empty with [`Buffer::new`] and given storage by one of the
/// `define*` calls. Defining again replaces the backend object. Failures are
/// reported as `false` so the caller can retry with other parameters.
pub struct Buffer {
    device: WeakRef<DeviceShared>,
    handle: Option<BufferHandle>,
    descriptor: BufferDescriptor,
    shadow_data: Option<Vec<u8>>,
    elements: Vec<VertexElement>,
    index_type: Option<IndexType>,
    name: String,
}

impl Buffer {
    /// Create an undefined buffer owned by `device`
    pub fn new(device: &Device) -> Self {
        Self::with_shared(device.shared())
    }

    pub(crate) fn with_shared(shared: &Ref<DeviceShared>) -> Self {
        Self {
            device: Ref::downgrade(shared),
            handle: None,
            descriptor: BufferDescriptor::new(0, BufferUsage::empty()),
            shadow_data: None,
            elements: Vec::new(),
            index_type: None,
            name: String::new(),
        }
    }

    /// Define the buffer storage, optionally uploading `data`
    ///
    /// When `descriptor.shadow` is set and `data` is `None`, an existing shadow
    /// copy of the same size is kept and uploaded again instead of being
    /// reallocated.
    pub fn define(&mut self, descriptor: &BufferDescriptor, data: Option<&[u8]>) -> bool {
        if descriptor.usage.is_empty() {
            engine_error!("galaxy3d::Buffer", "Can not define buffer with no usage");
            return false;
        }
        if descriptor.size == 0 {
            engine_error!("galaxy3d::Buffer", "Can not define buffer with zero size");
            return false;
        }
        if let Some(bytes) = data {
            if (bytes.len() as u64) < descriptor.size {
                engine_error!(
                    "galaxy3d::Buffer",
                    "Initial data is {} bytes, buffer needs {}",
                    bytes.len(),
                    descriptor.size
                );
                return false;
            }
        }

        self.release();
        self.descriptor = *descriptor;
        self.elements.clear();
        self.index_type = None;

        let size = descriptor.size as usize;
        if descriptor.shadow {
            match (data, self.shadow_data.as_mut()) {
                (Some(bytes), Some(shadow)) if shadow.len() == size => {
                    shadow.copy_from_slice(&bytes[..size]);
                }
                (Some(bytes), _) => self.shadow_data = Some(bytes[..size].to_vec()),
                (None, Some(shadow)) if shadow.len() == size => {}
                (None, _) => self.shadow_data = Some(vec![0; size]),
            }
        } else {
            self.shadow_data = None;
        }

        let upload = match data {
            Some(bytes) => Some(&bytes[..size]),
            None => self.shadow_data.as_deref(),
        };
        let result = with_backend(&self.device, |backend| backend.create_buffer(descriptor, upload));
        match result {
            Ok(handle) => {
                self.handle = Some(handle);
                engine_debug!(
                    "galaxy3d::Buffer",
                    "Defined buffer '{}' ({} bytes, {:?})",
                    self.name,
                    descriptor.size,
                    descriptor.usage
                );
                true
            }
            Err(e) => {
                engine_error!("galaxy3d::Buffer", "Failed to create buffer '{}': {}", self.name, e);
                false
            }
        }
    }

    /// Define a vertex buffer from a vertex count and element list
    pub fn define_vertex(
        &mut self,
        vertex_count: u32,
        elements: &[VertexElement],
        shadow: bool,
        data: Option<&[u8]>,
    ) -> bool {
        if vertex_count == 0 || elements.is_empty() {
            engine_error!("galaxy3d::Buffer", "Can not define vertex buffer with no vertices or no elements");
            return false;
        }
        let (packed, stride) = compute_vertex_layout(elements);
        let descriptor = BufferDescriptor {
            size: vertex_count as u64 * stride as u64,
            stride,
            usage: BufferUsage::VERTEX,
            shadow,
        };
        if !self.define(&descriptor, data) {
            return false;
        }
        self.elements = packed;
        true
    }

    /// Define an index buffer
    pub fn define_index(
        &mut self,
        index_count: u32,
        index_type: IndexType,
        shadow: bool,
        data: Option<&[u8]>,
    ) -> bool {
        if index_count == 0 {
            engine_error!("galaxy3d::Buffer", "Can not define index buffer with no indices");
            return false;
        }
        let stride = index_type.size_bytes();
        let descriptor = BufferDescriptor {
            size: index_count as u64 * stride as u64,
            stride,
            usage: BufferUsage::INDEX,
            shadow,
        };
        if !self.define(&descriptor, data) {
            return false;
        }
        self.index_type = Some(index_type);
        true
    }

    /// Overwrite part of the buffer content
    ///
    /// Returns false (and logs) when the range does not fit in the buffer.
    pub fn set_sub_data(&mut self, offset: u64, data: &[u8]) -> bool {
        let end = offset.checked_add(data.len() as u64);
        if end.map_or(true, |end| end > self.descriptor.size) {
            engine_error!("galaxy3d::Buffer", "Buffer subdata out of range");
            return false;
        }
        let Some(handle) = self.handle else {
            engine_error!("galaxy3d::Buffer", "Buffer '{}' is not defined", self.name);
            return false;
        };
        if let Some(shadow) = self.shadow_data.as_mut() {
            let start = offset as usize;
            shadow[start..start + data.len()].copy_from_slice(data);
        }
        match with_backend(&self.device, |backend| backend.update_buffer(handle, offset, data)) {
            Ok(()) => true,
            Err(e) => {
                engine_error!("galaxy3d::Buffer", "Failed to update buffer '{}': {}", self.name, e);
                false
            }
        }
    }

    /// Release the backend object (the shadow copy is kept for redefinition)
    pub fn release(&mut self) {
        if let Some(handle) = self.handle.take() {
            // The device may already be gone, in which case it freed everything.
            let _ = with_backend(&self.device, |backend| {
                backend.destroy_buffer(handle);
                Ok(())
            });
        }
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn descriptor(&self) -> &BufferDescriptor {
        &self.descriptor
    }

    pub fn size(&self) -> u64 {
        self.descriptor.size
    }

    pub fn stride(&self) -> u32 {
        self.descriptor.stride
    }

    pub fn usage(&self) -> BufferUsage {
        self.descriptor.usage
    }

    /// Vertex count for vertex buffers (size / stride)
    pub fn vertex_count(&self) -> u32 {
        if self.descriptor.stride == 0 {
            0
        } else {
            (self.descriptor.size / self.descriptor.stride as u64) as u32
        }
    }

    /// Vertex elements with their resolved offsets
    pub fn elements(&self) -> &[VertexElement] {
        &self.elements
    }

    pub fn index_type(&self) -> Option<IndexType> {
        self.index_type
    }

    pub fn shadow_data(&self) -> Option<&[u8]> {
        self.shadow_data.as_deref()
    }

    pub fn is_defined(&self) -> bool {
        self.handle.is_some()
    }

    pub(crate) fn handle(&self) -> Result<BufferHandle> {
        self.handle
            .ok_or_else(|| Error::InvalidResource(format!("buffer '{}' is not defined", self.name)))
    }

    pub(crate) fn belongs_to(&self, shared: &Ref<DeviceShared>) -> bool {
        self.device.lock().map_or(false, |owner| Ref::ptr_eq(&owner, shared))
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
#[path = "buffer_tests.rs"]
mod tests;
