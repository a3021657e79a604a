//! Unit tests for device.rs (software device)

use serial_test::serial;

use super::*;
use crate::graphics::test_utils::{render_target, software_device};
use crate::backend::TextureViewKind;
use crate::graphics::{BufferUsage, GpuVendor, TextureUsage};

// ============================================================================
// CREATION
// ============================================================================

#[test]
#[serial]
fn test_create_software_device() {
    let device = software_device(false);
    assert_eq!(device.backend(), Backend::Software);
    assert_eq!(device.capabilities().vendor, GpuVendor::Software);
    assert_eq!(device.swapchain_image_count().unwrap(), 2);
    assert_eq!(device.frame_count(), 0);
    assert!(!device.is_inside_frame());
}

#[test]
#[serial]
fn test_unavailable_backend_fails() {
    for backend in [Backend::D3D11, Backend::D3D12] {
        let result = Device::create(&DeviceDescriptor::new(backend));
        assert!(matches!(result, Err(Error::InitializationFailed(_))));
    }
}

#[test]
#[serial]
fn test_zero_sized_surface_fails() {
    let mut desc = DeviceDescriptor::new(Backend::Software);
    desc.surface = SurfaceDescriptor::headless(0, 16);
    assert!(Device::create(&desc).is_err());
}

#[test]
#[serial]
fn test_descriptor_from_settings() {
    let settings = GpuSettings::from_toml_str(
        r#"
        backend = "Software"

        [device]
        app_name = "settings test"
        enable_validation = false
        "#,
    )
    .unwrap();
    let desc = DeviceDescriptor::from_settings(settings, SurfaceDescriptor::headless(32, 32));
    assert_eq!(desc.backend, Backend::Software);

    let device = Device::create(&desc).unwrap();
    assert_eq!(device.config().app_name, "settings test");
    assert!(!device.config().enable_validation);
}

#[test]
#[serial]
fn test_swapchain_depth_attachment() {
    let mut desc = DeviceDescriptor::new(Backend::Software);
    desc.surface = SurfaceDescriptor::headless(32, 16);
    desc.surface.depth_format = Some(TextureFormat::D32_FLOAT);
    let device = Device::create(&desc).unwrap();

    let framebuffer = device.swapchain_framebuffer().unwrap();
    let depth = framebuffer.depth_stencil_attachment().unwrap();
    assert_eq!(depth.texture.format(), TextureFormat::D32_FLOAT);
    assert_eq!((framebuffer.width(), framebuffer.height()), (32, 16));
}

// ============================================================================
// FRAME BRACKET
// ============================================================================

#[test]
#[serial]
fn test_frame_bracket() {
    let device = software_device(false);
    assert!(matches!(device.end_frame(), Err(Error::InvalidState(_))));

    device.begin_frame().unwrap();
    assert!(device.is_inside_frame());
    assert!(matches!(device.begin_frame(), Err(Error::InvalidState(_))));
    device.end_frame().unwrap();

    assert!(!device.is_inside_frame());
    assert_eq!(device.frame_count(), 1);
}

#[test]
#[serial]
fn test_failed_present_closes_the_frame() {
    let device = software_device(false);
    device.begin_frame().unwrap();
    // Close the backend frame behind the device's back so its end_frame fails
    device.shared().with_backend(|backend| backend.end_frame()).unwrap();

    assert!(matches!(device.end_frame(), Err(Error::BackendError(_))));
    assert!(!device.is_inside_frame());
    assert_eq!(device.frame_count(), 0);

    device.begin_frame().unwrap();
    device.resize(32, 32).unwrap_err();
    device.end_frame().unwrap();
    device.resize(32, 32).unwrap();
    assert_eq!(device.frame_count(), 1);
}

#[test]
#[serial]
fn test_frames_rotate_swapchain_framebuffers() {
    let device = software_device(false);
    device.begin_frame().unwrap();
    let first = device.swapchain_framebuffer().unwrap();
    device.end_frame().unwrap();

    device.begin_frame().unwrap();
    let second = device.swapchain_framebuffer().unwrap();
    device.end_frame().unwrap();

    assert!(!Ref::ptr_eq(&first, &second));
}

#[test]
#[serial]
fn test_end_frame_flushes_immediate_context() {
    let device = software_device(false);
    device.begin_frame().unwrap();
    {
        let mut ctx = device.immediate_context().unwrap();
        ctx.begin_default_render_pass(glam::Vec4::ONE, 1.0, 0).unwrap();
        ctx.end_render_pass().unwrap();
    }
    let before = device.stats().unwrap().submissions;
    device.end_frame().unwrap();
    assert_eq!(device.stats().unwrap().submissions, before + 1);
}

#[test]
#[serial]
#[should_panic(expected = "begin_frame called twice")]
fn test_panic_on_misuse_when_configured() {
    let mut desc = DeviceDescriptor::new(Backend::Software);
    desc.surface = SurfaceDescriptor::headless(16, 16);
    desc.config.panic_on_validation_error = true;
    let device = Device::create(&desc).unwrap();
    device.begin_frame().unwrap();
    let _ = device.begin_frame();
}

// ============================================================================
// RESIZE
// ============================================================================

#[test]
#[serial]
fn test_resize_rebuilds_swapchain() {
    let device = software_device(false);
    device.resize(32, 16).unwrap();
    let framebuffer = device.swapchain_framebuffer().unwrap();
    assert_eq!((framebuffer.width(), framebuffer.height()), (32, 16));
    assert_eq!(device.swapchain_image_count().unwrap(), 2);
}

#[test]
#[serial]
fn test_resize_to_zero_is_ignored() {
    let device = software_device(false);
    device.resize(0, 100).unwrap();
    assert_eq!(device.swapchain_framebuffer().unwrap().width(), 64);
}

#[test]
#[serial]
fn test_resize_inside_frame_is_rejected() {
    let device = software_device(false);
    device.begin_frame().unwrap();
    assert!(matches!(device.resize(32, 32), Err(Error::InvalidState(_))));
    device.end_frame().unwrap();
}

// ============================================================================
// RESOURCES
// ============================================================================

#[test]
#[serial]
fn test_create_resources_reject_bad_descriptors() {
    let device = software_device(false);
    assert!(matches!(
        device.create_buffer(&BufferDescriptor::new(0, BufferUsage::UNIFORM), None),
        Err(Error::InvalidResource(_))
    ));
    assert!(matches!(device.create_vertex_buffer(0, &[], None), Err(Error::InvalidResource(_))));
    assert!(matches!(device.create_index_buffer(0, IndexType::U16, None), Err(Error::InvalidResource(_))));

    let texture = TextureDescriptor::new_2d(0, 4, TextureFormat::R8_UNORM, TextureUsage::SHADER_READ);
    assert!(matches!(device.create_texture(&texture, None), Err(Error::InvalidResource(_))));
    assert!(device.create_shader(ShaderStage::Vertex, &[1, 2, 3]).is_err());
}

#[test]
#[serial]
fn test_read_texture_bounds() {
    let device = software_device(false);
    let texture = render_target(&device, 4, 4);
    assert_eq!(device.read_texture(&texture, 0, 0).unwrap().len(), 64);
    assert!(matches!(device.read_texture(&texture, 1, 0), Err(Error::OutOfRange(_))));
    assert!(matches!(device.read_texture(&texture, 0, 1), Err(Error::OutOfRange(_))));
}

#[test]
#[serial]
fn test_foreign_resources_are_refused() {
    let first = software_device(false);
    let second = software_device(false);
    let texture = render_target(&first, 4, 4);
    let buffer = first.create_buffer(&BufferDescriptor::new(16, BufferUsage::STORAGE), None).unwrap();

    assert!(matches!(second.read_texture(&texture, 0, 0), Err(Error::InvalidResource(_))));
    assert!(matches!(second.read_buffer(&buffer), Err(Error::InvalidResource(_))));
    assert_eq!(first.read_buffer(&buffer).unwrap(), vec![0; 16]);
}

#[test]
#[serial]
fn test_resources_outlive_device() {
    let device = software_device(false);
    let texture = render_target(&device, 4, 4);
    let buffer = device.create_buffer(&BufferDescriptor::new(16, BufferUsage::UNIFORM), None).unwrap();
    drop(device);

    assert!(texture.view(TextureViewKind::RenderTarget, 0, 1, 0, 1).is_err());
    drop(texture);
    drop(buffer);
}
