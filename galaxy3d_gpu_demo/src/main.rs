//! Windowed smoke test: clears the swapchain to an animated color
//!
//! Reads `galaxy3d.toml` from the working directory when present, otherwise
//! probes the default backend order.

use std::time::Instant;

use galaxy_3d_gpu::galaxy3d::{
    Backend, Device, DeviceConfig, DeviceDescriptor, GpuSettings, Result, SurfaceDescriptor, WindowHandle,
};
use galaxy_3d_gpu::glam::Vec4;
use galaxy_3d_gpu::{engine_error, engine_info, engine_warn};
use winit::application::ApplicationHandler;
use winit::dpi::LogicalSize;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::{Window, WindowId};

const SETTINGS_FILE: &str = "galaxy3d.toml";

struct App {
    // Declared before `window`: the device must go first.
    device: Option<Device>,
    window: Option<Window>,
    start: Instant,
}

impl App {
    fn create_device(window: &Window) -> Result<Device> {
        let size = window.inner_size();
        // SAFETY: the device is dropped before the window (field order in `App`).
        let handle = unsafe { WindowHandle::from_window(window)? };
        let surface = SurfaceDescriptor::with_window(handle, size.width.max(1), size.height.max(1));

        let descriptor = match GpuSettings::load(SETTINGS_FILE) {
            Ok(settings) => DeviceDescriptor::from_settings(settings, surface),
            Err(_) => DeviceDescriptor {
                backend: Backend::Default,
                config: DeviceConfig { app_name: "Galaxy3D GPU demo".to_string(), ..DeviceConfig::default() },
                surface,
            },
        };
        Device::create(&descriptor)
    }

    fn render(&mut self) -> Result<()> {
        let Some(device) = self.device.as_ref() else {
            return Ok(());
        };
        let t = self.start.elapsed().as_secs_f32();
        let color = Vec4::new(0.5 + 0.5 * t.sin(), 0.5 + 0.5 * (t * 0.7).sin(), 0.5 + 0.5 * (t * 1.3).sin(), 1.0);

        device.begin_frame()?;
        {
            let mut ctx = device.immediate_context()?;
            ctx.begin_default_render_pass(color, 1.0, 0)?;
            ctx.end_render_pass()?;
        }
        device.end_frame()
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        let attributes = Window::default_attributes()
            .with_title("Galaxy3D GPU demo")
            .with_inner_size(LogicalSize::new(1280.0, 720.0));
        let window = match event_loop.create_window(attributes) {
            Ok(window) => window,
            Err(e) => {
                engine_error!("galaxy3d::demo", "Failed to create window: {}", e);
                event_loop.exit();
                return;
            }
        };
        match Self::create_device(&window) {
            Ok(device) => {
                let caps = device.capabilities();
                engine_info!("galaxy3d::demo", "Running on {} ({})", caps.device_name, device.backend());
                self.device = Some(device);
            }
            Err(e) => {
                engine_error!("galaxy3d::demo", "Failed to create device: {}", e);
                event_loop.exit();
                return;
            }
        }
        window.request_redraw();
        self.window = Some(window);
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _window_id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => event_loop.exit(),
            WindowEvent::Resized(size) => {
                if let Some(device) = self.device.as_ref() {
                    if let Err(e) = device.resize(size.width, size.height) {
                        engine_warn!("galaxy3d::demo", "Resize to {}x{} failed: {}", size.width, size.height, e);
                    }
                }
            }
            WindowEvent::RedrawRequested => {
                if let Err(e) = self.render() {
                    // Usually a stale swapchain; the next Resized event rebuilds it.
                    engine_warn!("galaxy3d::demo", "Frame skipped: {}", e);
                }
                if let Some(window) = self.window.as_ref() {
                    window.request_redraw();
                }
            }
            _ => {}
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(device) = self.device.take() {
            if let Err(e) = device.wait_idle() {
                engine_warn!("galaxy3d::demo", "wait_idle failed at exit: {}", e);
            }
            engine_info!("galaxy3d::demo", "{} frames rendered", device.frame_count());
        }
    }
}

fn main() {
    let event_loop = match EventLoop::new() {
        Ok(event_loop) => event_loop,
        Err(e) => {
            engine_error!("galaxy3d::demo", "Failed to create event loop: {}", e);
            std::process::exit(1);
        }
    };
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App { device: None, window: None, start: Instant::now() };
    if let Err(e) = event_loop.run_app(&mut app) {
        engine_error!("galaxy3d::demo", "Event loop error: {}", e);
        std::process::exit(1);
    }
}
