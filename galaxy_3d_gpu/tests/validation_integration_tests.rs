//! Integration tests for the validation hook
//!
//! No GPU required. Every test runs serially: the hook and the message
//! counters are process-wide.
//!
//! Run with: cargo test --test validation_integration_tests
#![cfg(feature = "validation")]


use galaxy_3d_gpu::galaxy3d::{
    clear_validation_callback, notify_validation_error, reset_validation_stats, set_validation_callback,
    validation_stats, Backend, BufferDescriptor, BufferUsage, Error, FramebufferAttachment,
    FramebufferDescriptor, IndexType, TextureDescriptor, TextureFormat, TextureUsage, VertexInputRate,
};
use galaxy_3d_gpu::glam::Vec4;
use gpu_test_utils::{capture_validation, create_device, messages_for, stub_compute_pipeline, stub_graphics_pipeline};
use serial_test::serial;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

// ============================================================================
// HOOK
// ============================================================================

#[test]
#[serial]
fn test_hook_receives_notifications() {
    reset_validation_stats();
    let messages = capture_validation();
    notify_validation_error("first");
    notify_validation_error("second");
    clear_validation_callback();
    notify_validation_error("after clear");

    assert_eq!(*messages.lock().unwrap(), vec!["first".to_string(), "second".to_string()]);
    assert_eq!(validation_stats().errors, 3);
    reset_validation_stats();
    assert_eq!(validation_stats().total(), 0);
}

#[test]
#[serial]
fn test_hook_replacement() {
    let first = Arc::new(AtomicU32::new(0));
    let second = Arc::new(AtomicU32::new(0));
    let counter = first.clone();
    set_validation_callback(move |_| {
        counter.fetch_add(1, Ordering::Relaxed);
    });
    let counter = second.clone();
    set_validation_callback(move |_| {
        counter.fetch_add(1, Ordering::Relaxed);
    });
    notify_validation_error("replaced");
    clear_validation_callback();

    assert_eq!(first.load(Ordering::Relaxed), 0);
    assert_eq!(second.load(Ordering::Relaxed), 1);
}

// ============================================================================
// STATE MACHINE MISUSE
// ============================================================================

#[test]
#[serial]
fn test_misuse_reaches_hook_and_fails() {
    let messages = capture_validation();
    let device = create_device(Backend::Software, 32, 32, true);
    let mut ctx = device.create_command_context("misuse ctx").unwrap();

    assert!(matches!(ctx.draw(3, 0), Err(Error::InvalidState(_))));
    assert!(matches!(ctx.end_render_pass(), Err(Error::InvalidState(_))));
    clear_validation_callback();

    let reported = messages_for(&messages, "misuse ctx");
    assert_eq!(reported.len(), 2);
    assert!(reported[0].contains("outside a render pass"));
    assert!(reported[1].contains("without begin_render_pass"));
}

#[test]
#[serial]
fn test_misuse_without_validation_is_not_reported() {
    let messages = capture_validation();
    let device = create_device(Backend::Software, 32, 32, false);
    let mut ctx = device.create_command_context("quiet ctx").unwrap();

    // Still rejected, only logged
    assert!(matches!(ctx.draw(3, 0), Err(Error::InvalidState(_))));
    clear_validation_callback();
    assert!(messages_for(&messages, "quiet ctx").is_empty());
}

#[test]
#[serial]
fn test_draw_outside_frame_is_reported() {
    let messages = capture_validation();
    let device = create_device(Backend::Software, 32, 32, true);
    let pipeline = stub_graphics_pipeline(&device, "frame check");
    let framebuffer = device.swapchain_framebuffer().unwrap();
    let mut ctx = device.create_command_context("frameless").unwrap();

    ctx.begin_render_pass(&framebuffer, &Default::default()).unwrap();
    ctx.set_pipeline(&pipeline);
    assert!(ctx.draw(3, 0).is_err());
    ctx.end_render_pass().unwrap();
    clear_validation_callback();

    let reported = messages_for(&messages, "frameless");
    assert_eq!(reported.len(), 1);
    assert!(reported[0].contains("begin_frame"));
    assert_eq!(device.stats().unwrap().draw_calls, 0);
}

// ============================================================================
// USAGE CONTRACT
// ============================================================================

#[test]
#[serial]
fn test_wrong_buffer_usage_is_skipped() {
    let messages = capture_validation();
    let device = create_device(Backend::Software, 32, 32, true);
    let uniforms = device.create_buffer(&BufferDescriptor::new(64, BufferUsage::UNIFORM), None).unwrap();
    let mut ctx = device.create_command_context("usage ctx").unwrap();

    ctx.set_vertex_buffer(0, &uniforms, 0, VertexInputRate::Vertex);
    ctx.set_index_buffer(&uniforms, 0, IndexType::U16);
    ctx.set_storage_buffer(0, 0, &uniforms, 0, 0);
    clear_validation_callback();

    assert_eq!(messages_for(&messages, "usage ctx").len(), 3);
    let state = ctx.binding_state();
    assert!(state.vertex_buffer(0).is_none());
    assert!(state.index_buffer().is_none());
    assert!(state.resource(0, 0).is_none());
}

#[test]
#[serial]
fn test_texture_usage_is_checked() {
    let messages = capture_validation();
    let device = create_device(Backend::Software, 32, 32, true);
    let desc = TextureDescriptor::new_2d(8, 8, TextureFormat::R8G8B8A8_UNORM, TextureUsage::RENDER_TARGET);
    let target = device.create_texture(&desc, None).unwrap();
    let mut ctx = device.create_command_context("texture ctx").unwrap();

    ctx.set_texture(0, 0, &target);
    ctx.set_storage_texture(0, 1, &target, 0);
    clear_validation_callback();

    assert_eq!(messages_for(&messages, "texture ctx").len(), 2);
    assert!(ctx.binding_state().resource(0, 0).is_none());
    assert!(ctx.binding_state().resource(0, 1).is_none());
}

#[test]
#[serial]
fn test_invalid_framebuffer_is_reported() {
    let messages = capture_validation();
    let device = create_device(Backend::Software, 32, 32, true);
    let desc = TextureDescriptor::new_2d(8, 8, TextureFormat::R8G8B8A8_UNORM, TextureUsage::SHADER_READ);
    let sampled = device.create_texture(&desc, None).unwrap();

    let result = device.create_framebuffer(&FramebufferDescriptor {
        color_attachments: vec![FramebufferAttachment::new(&sampled)],
        depth_stencil_attachment: None,
    });
    clear_validation_callback();

    assert!(matches!(result, Err(Error::InvalidResource(_))));
    let messages = messages.lock().unwrap();
    assert!(messages.iter().any(|m| m.contains("RenderTarget")));
}

#[test]
#[serial]
fn test_foreign_pipeline_is_skipped() {
    let messages = capture_validation();
    let device = create_device(Backend::Software, 32, 32, true);
    let other = create_device(Backend::Software, 32, 32, true);
    let foreign = stub_compute_pipeline(&other, "foreign");
    let mut ctx = device.create_command_context("foreign ctx").unwrap();

    ctx.set_pipeline(&foreign);
    clear_validation_callback();

    assert!(ctx.pipeline().is_none());
    assert_eq!(messages_for(&messages, "foreign ctx").len(), 1);
}

#[test]
#[serial]
fn test_valid_frame_reports_nothing() {
    let messages = capture_validation();
    let device = create_device(Backend::Software, 32, 32, true);
    let pipeline = stub_graphics_pipeline(&device, "clean");

    device.begin_frame().unwrap();
    {
        let mut ctx = device.immediate_context().unwrap();
        ctx.begin_default_render_pass(Vec4::ZERO, 1.0, 0).unwrap();
        ctx.set_pipeline(&pipeline);
        ctx.draw(3, 0).unwrap();
        ctx.end_render_pass().unwrap();
    }
    device.end_frame().unwrap();
    clear_validation_callback();

    assert!(messages.lock().unwrap().is_empty());
    assert_eq!(device.stats().unwrap().draw_calls, 1);
}
