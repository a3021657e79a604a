//! Unit tests for framebuffer.rs

use glam::Vec4;
use serial_test::serial;

use super::*;
use crate::graphics::test_utils::{render_target, software_device};
use crate::graphics::{Device, TextureDescriptor, TextureFormat};

fn texture(device: &Device, desc: TextureDescriptor) -> Ref<Texture> {
    device.create_texture(&desc, None).unwrap()
}

fn colors(attachments: Vec<FramebufferAttachment>) -> FramebufferDescriptor {
    FramebufferDescriptor { color_attachments: attachments, depth_stencil_attachment: None }
}

// ============================================================================
// RENDER PASS DESCRIPTOR
// ============================================================================

#[test]
fn test_clear_descriptor() {
    let desc = RenderPassDescriptor::clear(Vec4::new(0.1, 0.2, 0.3, 1.0), 0.5, 3);
    assert!(desc.color_attachments.iter().all(|a| a.load_action == LoadAction::Clear));
    assert_eq!(desc.color_attachments[7].clear_color, Vec4::new(0.1, 0.2, 0.3, 1.0));
    assert_eq!(desc.depth_stencil_attachment.clear_depth, 0.5);
    assert_eq!(desc.depth_stencil_attachment.clear_stencil, 3);
}

#[test]
fn test_load_descriptor_keeps_everything() {
    let desc = RenderPassDescriptor::load();
    assert!(desc.color_attachments.iter().all(|a| a.load_action == LoadAction::Load));
    assert_eq!(desc.depth_stencil_attachment.load_action, LoadAction::Load);
    assert_eq!(desc.depth_stencil_attachment.store_action, StoreAction::Store);
}

// ============================================================================
// CREATION
// ============================================================================

#[test]
#[serial]
fn test_size_is_smallest_attachment_at_its_level() {
    let device = software_device(false);
    let big = texture(
        &device,
        TextureDescriptor::new_2d(64, 64, TextureFormat::R8G8B8A8_UNORM, TextureUsage::RENDER_TARGET)
            .with_mip_levels(3),
    );
    let small = render_target(&device, 32, 20);
    let framebuffer = device
        .create_framebuffer(&colors(vec![
            FramebufferAttachment::with_level(&big, 1, 0),
            FramebufferAttachment::new(&small),
        ]))
        .unwrap();
    assert_eq!((framebuffer.width(), framebuffer.height()), (32, 20));
    assert_eq!(framebuffer.color_attachments().len(), 2);
    assert!(Ref::ptr_eq(framebuffer.color_attachment(0).unwrap(), &big));
}

#[test]
#[serial]
fn test_array_slice_covers_remaining_layers() {
    let device = software_device(false);
    let array = texture(
        &device,
        TextureDescriptor::new_2d(8, 8, TextureFormat::R8_UNORM, TextureUsage::RENDER_TARGET).with_array_layers(4),
    );
    let framebuffer = device
        .create_framebuffer(&colors(vec![FramebufferAttachment::with_level(&array, 0, 1)]))
        .unwrap();
    assert_eq!(framebuffer.layers(), 3);

    let cube = texture(
        &device,
        TextureDescriptor::new_cube(8, TextureFormat::R8_UNORM, TextureUsage::RENDER_TARGET),
    );
    let framebuffer = device.create_framebuffer(&colors(vec![FramebufferAttachment::new(&cube)])).unwrap();
    assert_eq!(framebuffer.layers(), 6);
}

#[test]
#[serial]
fn test_depth_only_framebuffer() {
    let device = software_device(false);
    let depth = texture(
        &device,
        TextureDescriptor::new_2d(16, 16, TextureFormat::D32_FLOAT, TextureUsage::RENDER_TARGET),
    );
    let framebuffer = device
        .create_framebuffer(&FramebufferDescriptor {
            color_attachments: Vec::new(),
            depth_stencil_attachment: Some(FramebufferAttachment::new(&depth)),
        })
        .unwrap();
    assert!(framebuffer.color_attachment(0).is_none());
    assert!(framebuffer.depth_stencil_attachment().is_some());
}

#[test]
#[serial]
fn test_invalid_attachments_are_rejected() {
    let device = software_device(false);
    assert!(device.create_framebuffer(&FramebufferDescriptor::default()).is_err());

    let sampled = texture(
        &device,
        TextureDescriptor::new_2d(8, 8, TextureFormat::R8G8B8A8_UNORM, TextureUsage::SHADER_READ),
    );
    assert!(device.create_framebuffer(&colors(vec![FramebufferAttachment::new(&sampled)])).is_err());

    let depth = texture(
        &device,
        TextureDescriptor::new_2d(8, 8, TextureFormat::D16_UNORM, TextureUsage::RENDER_TARGET),
    );
    assert!(device.create_framebuffer(&colors(vec![FramebufferAttachment::new(&depth)])).is_err());

    let color = render_target(&device, 8, 8);
    assert!(device
        .create_framebuffer(&colors(vec![FramebufferAttachment::with_level(&color, 1, 0)]))
        .is_err());
    assert!(device
        .create_framebuffer(&FramebufferDescriptor {
            color_attachments: Vec::new(),
            depth_stencil_attachment: Some(FramebufferAttachment::new(&color)),
        })
        .is_err());

    let too_many = (0..MAX_COLOR_ATTACHMENTS + 1).map(|_| FramebufferAttachment::new(&color)).collect();
    assert!(device.create_framebuffer(&colors(too_many)).is_err());
}

#[test]
#[serial]
fn test_mixed_sample_counts_are_rejected() {
    let device = software_device(false);
    let mut desc = TextureDescriptor::new_2d(8, 8, TextureFormat::R8G8B8A8_UNORM, TextureUsage::RENDER_TARGET);
    desc.sample_count = 4;
    let msaa = texture(&device, desc);
    let single = render_target(&device, 8, 8);
    assert!(device
        .create_framebuffer(&colors(vec![FramebufferAttachment::new(&msaa), FramebufferAttachment::new(&single)]))
        .is_err());
}

#[test]
#[serial]
fn test_foreign_attachment_is_rejected() {
    let first = software_device(false);
    let second = software_device(false);
    let color = render_target(&first, 8, 8);
    assert!(second.create_framebuffer(&colors(vec![FramebufferAttachment::new(&color)])).is_err());
}
