//! Unit tests for types.rs

use crate::graphics::types::*;

#[test]
fn test_vendor_from_id() {
    assert_eq!(GpuVendor::from_vendor_id(0x10DE), GpuVendor::Nvidia);
    assert_eq!(GpuVendor::from_vendor_id(0x1002), GpuVendor::Amd);
    assert_eq!(GpuVendor::from_vendor_id(0x8086), GpuVendor::Intel);
    assert_eq!(GpuVendor::from_vendor_id(0x13B5), GpuVendor::Arm);
    assert_eq!(GpuVendor::from_vendor_id(0x5143), GpuVendor::Qualcomm);
    assert_eq!(GpuVendor::from_vendor_id(0x1010), GpuVendor::ImgTec);
    assert_eq!(GpuVendor::from_vendor_id(0xDEAD), GpuVendor::Unknown);
}

#[test]
fn test_probe_order_ends_with_software() {
    let order = Backend::probe_order();
    assert_eq!(order.last(), Some(&Backend::Software));
    assert!(!order.contains(&Backend::Default));
    if cfg!(windows) {
        assert_eq!(order[0], Backend::D3D12);
    } else {
        assert_eq!(order[0], Backend::Vulkan);
    }
}

#[test]
fn test_backend_display() {
    assert_eq!(Backend::Vulkan.to_string(), "Vulkan");
    assert_eq!(Backend::D3D12.to_string(), "Direct3D 12");
    assert_eq!(Backend::default(), Backend::Default);
}

#[test]
fn test_index_type_size() {
    assert_eq!(IndexType::U16.size_bytes(), 2);
    assert_eq!(IndexType::U32.size_bytes(), 4);
}

#[test]
fn test_usage_flags_combine() {
    let usage = BufferUsage::VERTEX | BufferUsage::INDEX;
    assert!(usage.contains(BufferUsage::VERTEX));
    assert!(!usage.contains(BufferUsage::UNIFORM));
    assert!(ShaderStages::ALL_GRAPHICS.contains(ShaderStages::FRAGMENT));
    assert!(!ShaderStages::ALL_GRAPHICS.contains(ShaderStages::COMPUTE));
}

#[test]
fn test_defaults() {
    assert_eq!(LoadAction::default(), LoadAction::DontCare);
    assert_eq!(StoreAction::default(), StoreAction::Store);
    assert_eq!(PrimitiveTopology::default(), PrimitiveTopology::TriangleList);
    let limits = GpuLimits::default();
    assert_eq!(limits.max_color_attachments, MAX_COLOR_ATTACHMENTS as u32);
    assert_eq!(limits.max_vertex_buffer_bindings, MAX_VERTEX_BUFFER_BINDINGS);
}

#[test]
fn test_full_viewport_and_scissor() {
    let viewport = Viewport::full(640, 480);
    assert_eq!(viewport.width, 640.0);
    assert_eq!(viewport.max_depth, 1.0);
    assert_eq!(Rect2D::full(640, 480), Rect2D { x: 0, y: 0, width: 640, height: 480 });
}
