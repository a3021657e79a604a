//! Integration tests for command recording across frames
//!
//! Software backend, no GPU required.
//!
//! Run with: cargo test --test command_context_integration_tests


use galaxy_3d_gpu::galaxy3d::{
    Backend, BufferDescriptor, BufferUsage, Error, IndexType, Ref, RenderPassDescriptor, ResourceKind,
    ResourceLayoutEntry, ShaderStage, ShaderStages, ComputePipelineDescriptor, VertexElement, VertexFormat,
    VertexInputRate, Viewport,
};
use galaxy_3d_gpu::glam::Vec4;
use gpu_test_utils::{create_device, stub_graphics_pipeline, stub_shader};
use serial_test::serial;

// ============================================================================
// FRAME LOOP
// ============================================================================

#[test]
#[serial]
fn test_frame_loop_with_draws() {
    let device = create_device(Backend::Software, 64, 64, true);
    let pipeline = stub_graphics_pipeline(&device, "loop");

    for frame in 0..5u32 {
        device.begin_frame().unwrap();
        {
            let mut ctx = device.immediate_context().unwrap();
            let shade = frame as f32 / 4.0;
            ctx.begin_default_render_pass(Vec4::new(shade, 0.0, 0.0, 1.0), 1.0, 0).unwrap();
            ctx.set_pipeline(&pipeline);
            ctx.set_viewport(Viewport::full(32, 32));
            ctx.draw(3, 0).unwrap();
            ctx.draw_instanced(3, 4, 0, 0).unwrap();
            ctx.end_render_pass().unwrap();
        }
        device.end_frame().unwrap();
    }

    let stats = device.stats().unwrap();
    assert_eq!(device.frame_count(), 5);
    assert_eq!(stats.draw_calls, 10);
    assert_eq!(stats.render_passes, 5);
    // Re-sent once per frame after each flush
    assert_eq!(stats.pipeline_binds, 5);
    assert_eq!(stats.submissions, 5);
}

#[test]
#[serial]
fn test_resize_between_frames() {
    let device = create_device(Backend::Software, 64, 64, true);
    for size in [32u32, 96, 48] {
        device.resize(size, size).unwrap();
        device.begin_frame().unwrap();
        {
            let mut ctx = device.immediate_context().unwrap();
            ctx.begin_default_render_pass(Vec4::ONE, 1.0, 0).unwrap();
            let framebuffer = ctx.framebuffer().unwrap();
            assert_eq!((framebuffer.width(), framebuffer.height()), (size, size));
            ctx.end_render_pass().unwrap();
        }
        device.end_frame().unwrap();
    }
}

// ============================================================================
// CONTEXTS
// ============================================================================

#[test]
#[serial]
fn test_compute_and_graphics_contexts_share_a_frame() {
    let device = create_device(Backend::Software, 64, 64, true);
    let mut compute_desc = ComputePipelineDescriptor::new(stub_shader(ShaderStage::Compute));
    compute_desc.resource_layout =
        vec![ResourceLayoutEntry::new(0, 0, ResourceKind::StorageBuffer, ShaderStages::COMPUTE)];
    let compute = device.create_compute_pipeline("particles", &compute_desc).unwrap();
    let particles = device.create_buffer(&BufferDescriptor::new(4096, BufferUsage::STORAGE), None).unwrap();
    let graphics = stub_graphics_pipeline(&device, "present");

    let mut simulation = device.create_command_context("simulation").unwrap();
    device.begin_frame().unwrap();

    simulation.set_pipeline(&compute);
    simulation.set_storage_buffer(0, 0, &particles, 0, 0);
    simulation.dispatch_1d(1000, 64).unwrap();
    let fence = simulation.flush(false).unwrap();
    assert!(fence > 0);

    {
        let mut ctx = device.immediate_context().unwrap();
        ctx.begin_default_render_pass(Vec4::ZERO, 1.0, 0).unwrap();
        ctx.set_pipeline(&graphics);
        ctx.draw(6, 0).unwrap();
        ctx.end_render_pass().unwrap();
    }
    device.end_frame().unwrap();

    let stats = device.stats().unwrap();
    assert_eq!(stats.dispatches, 1);
    assert_eq!(stats.dispatched_groups, 16);
    assert_eq!(stats.draw_calls, 1);
    assert!(device.immediate_context().unwrap().last_fence() > fence);
}

#[test]
#[serial]
fn test_rejected_calls_leave_context_usable() {
    let device = create_device(Backend::Software, 64, 64, false);
    let pipeline = stub_graphics_pipeline(&device, "recover");
    let mut ctx = device.create_command_context("recover").unwrap();

    assert!(matches!(ctx.draw(3, 0), Err(Error::InvalidState(_))));
    assert!(matches!(ctx.end_render_pass(), Err(Error::InvalidState(_))));

    let framebuffer = device.swapchain_framebuffer().unwrap();
    ctx.begin_render_pass(&framebuffer, &RenderPassDescriptor::load()).unwrap();
    assert!(matches!(ctx.flush(false), Err(Error::InvalidState(_))));
    ctx.set_pipeline(&pipeline);
    ctx.draw(3, 0).unwrap();
    ctx.end_render_pass().unwrap();
    ctx.flush(true).unwrap();

    assert_eq!(device.stats().unwrap().draw_calls, 1);
}

// ============================================================================
// RESOURCE LIFETIME
// ============================================================================

#[test]
#[serial]
fn test_resources_dropped_by_caller_survive_until_flush() {
    let device = create_device(Backend::Software, 64, 64, false);
    let pipeline = stub_graphics_pipeline(&device, "lifetime");
    let elements = [VertexElement::new(VertexFormat::Float3)];
    let vertices = device.create_vertex_buffer(3, &elements, Some(&[0u8; 36])).unwrap();
    let indices = device
        .create_index_buffer(3, IndexType::U16, Some(bytemuck::cast_slice(&[0u16, 1, 2])))
        .unwrap();
    let weak_vertices = Ref::downgrade(&vertices);

    let framebuffer = device.swapchain_framebuffer().unwrap();
    let mut ctx = device.create_command_context("lifetime").unwrap();
    ctx.begin_render_pass(&framebuffer, &RenderPassDescriptor::load()).unwrap();
    ctx.set_pipeline(&pipeline);
    ctx.set_vertex_buffer(0, &vertices, 0, VertexInputRate::Vertex);
    ctx.set_index_buffer(&indices, 0, IndexType::U16);
    ctx.draw_indexed(3, 0, 0).unwrap();
    ctx.end_render_pass().unwrap();

    drop(vertices);
    drop(indices);
    // Still referenced by the binding slot and the pending submission
    assert!(!weak_vertices.is_expired());

    ctx.flush(true).unwrap();
    drop(ctx);
    assert!(weak_vertices.is_expired());
    assert_eq!(device.stats().unwrap().draw_calls, 1);
}

#[test]
#[serial]
fn test_context_outliving_device_is_harmless() {
    let device = create_device(Backend::Software, 16, 16, false);
    let ctx = device.create_command_context("orphan").unwrap();
    let uniforms = device.create_buffer(&BufferDescriptor::new(16, BufferUsage::UNIFORM), None).unwrap();
    drop(device);
    drop(uniforms);
    drop(ctx);
}
