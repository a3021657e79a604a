//! Unit tests for buffer.rs (software device)

use crate::graphics::buffer::*;
use crate::graphics::{
    Backend, BufferUsage, Device, DeviceDescriptor, IndexType, VertexElement, VertexFormat,
};
use serial_test::serial;

fn device() -> Device {
    Device::create(&DeviceDescriptor::new(Backend::Software)).unwrap()
}

// ============================================================================
// VERTEX LAYOUT
// ============================================================================

#[test]
fn test_auto_offsets_are_packed() {
    let elements = [
        VertexElement::new(VertexFormat::Float3),
        VertexElement::new(VertexFormat::Float2),
        VertexElement::new(VertexFormat::UByte4N),
    ];
    let (packed, stride) = compute_vertex_layout(&elements);
    assert_eq!(stride, 12 + 8 + 4);
    assert_eq!(packed[0].offset, 0);
    assert_eq!(packed[1].offset, 12);
    assert_eq!(packed[2].offset, 20);
}

#[test]
fn test_explicit_offsets_are_kept() {
    let elements = [
        VertexElement::with_offset(VertexFormat::Float3, 0),
        VertexElement::with_offset(VertexFormat::Float2, 16),
    ];
    let (packed, stride) = compute_vertex_layout(&elements);
    assert_eq!(packed[1].offset, 16);
    // Furthest element end wins over the packed size
    assert_eq!(stride, 24);
}

#[test]
fn test_overlapping_explicit_offsets_use_packed_size() {
    let elements = [
        VertexElement::with_offset(VertexFormat::Float4, 4),
        VertexElement::with_offset(VertexFormat::Float, 0),
    ];
    let (_, stride) = compute_vertex_layout(&elements);
    assert_eq!(stride, 20);
}

// ============================================================================
// DEFINE
// ============================================================================

#[test]
#[serial]
fn test_define_vertex_buffer() {
    let device = device();
    let mut buffer = Buffer::new(&device);
    let elements = [VertexElement::new(VertexFormat::Float3), VertexElement::new(VertexFormat::Float4)];
    assert!(buffer.define_vertex(10, &elements, false, None));
    assert!(buffer.is_defined());
    assert_eq!(buffer.stride(), 28);
    assert_eq!(buffer.size(), 280);
    assert_eq!(buffer.vertex_count(), 10);
    assert_eq!(buffer.usage(), BufferUsage::VERTEX);
    assert_eq!(buffer.elements()[1].offset, 12);
}

#[test]
#[serial]
fn test_define_rejects_invalid_descriptors() {
    let device = device();
    let mut buffer = Buffer::new(&device);
    assert!(!buffer.define(&BufferDescriptor::new(16, BufferUsage::empty()), None));
    assert!(!buffer.define(&BufferDescriptor::new(0, BufferUsage::UNIFORM), None));
    assert!(!buffer.define_vertex(0, &[VertexElement::new(VertexFormat::Float)], false, None));
    assert!(!buffer.define_vertex(4, &[], false, None));
    assert!(!buffer.define(&BufferDescriptor::new(16, BufferUsage::UNIFORM), Some(&[0u8; 8])));
    assert!(!buffer.is_defined());
}

#[test]
#[serial]
fn test_define_index_buffer_uploads_data() {
    let device = device();
    let mut buffer = Buffer::new(&device);
    let indices: [u16; 3] = [0, 1, 2];
    assert!(buffer.define_index(3, IndexType::U16, false, Some(bytemuck::cast_slice(&indices))));
    assert_eq!(buffer.index_type(), Some(IndexType::U16));
    assert_eq!(buffer.size(), 6);
    assert_eq!(device.read_buffer(&buffer).unwrap(), vec![0, 0, 1, 0, 2, 0]);
}

#[test]
#[serial]
fn test_shadow_copy_survives_redefine() {
    let device = device();
    let mut buffer = Buffer::new(&device);
    let mut desc = BufferDescriptor::new(4, BufferUsage::STORAGE);
    desc.shadow = true;
    assert!(buffer.define(&desc, Some(&[1, 2, 3, 4])));
    assert_eq!(buffer.shadow_data(), Some(&[1u8, 2, 3, 4][..]));

    // Redefined from its own shadow: content is uploaded again
    assert!(buffer.define(&desc, None));
    assert_eq!(buffer.shadow_data(), Some(&[1u8, 2, 3, 4][..]));
    assert_eq!(device.read_buffer(&buffer).unwrap(), vec![1, 2, 3, 4]);

    // Another size gets a fresh zeroed shadow
    desc.size = 2;
    assert!(buffer.define(&desc, None));
    assert_eq!(buffer.shadow_data(), Some(&[0u8, 0][..]));
}

#[test]
#[serial]
fn test_no_shadow_without_request() {
    let device = device();
    let mut buffer = Buffer::new(&device);
    assert!(buffer.define(&BufferDescriptor::new(4, BufferUsage::UNIFORM), Some(&[9; 4])));
    assert!(buffer.shadow_data().is_none());
}

#[test]
#[serial]
fn test_set_sub_data() {
    let device = device();
    let mut buffer = Buffer::new(&device);
    let mut desc = BufferDescriptor::new(8, BufferUsage::UNIFORM);
    desc.shadow = true;
    assert!(buffer.define(&desc, None));

    assert!(buffer.set_sub_data(4, &[7, 7, 7, 7]));
    assert_eq!(buffer.shadow_data().unwrap()[4..], [7, 7, 7, 7]);
    assert_eq!(device.read_buffer(&buffer).unwrap(), vec![0, 0, 0, 0, 7, 7, 7, 7]);

    assert!(!buffer.set_sub_data(6, &[1, 1, 1]));
    assert!(!buffer.set_sub_data(u64::MAX, &[1]));
}

#[test]
#[serial]
fn test_set_sub_data_on_undefined_buffer() {
    let device = device();
    let mut buffer = Buffer::new(&device);
    assert!(!buffer.set_sub_data(0, &[]));
}

#[test]
#[serial]
fn test_release_and_outlive_device() {
    let device = device();
    let mut buffer = Buffer::new(&device);
    assert!(buffer.define(&BufferDescriptor::new(4, BufferUsage::UNIFORM), None));
    buffer.release();
    assert!(!buffer.is_defined());

    assert!(buffer.define(&BufferDescriptor::new(4, BufferUsage::UNIFORM), None));
    drop(device);
    // The backend is gone: redefining fails, dropping is harmless
    assert!(!buffer.define(&BufferDescriptor::new(4, BufferUsage::UNIFORM), None));
    drop(buffer);
}
