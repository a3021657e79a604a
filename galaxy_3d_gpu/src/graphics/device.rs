//! Device: backend selection, frame bracket and resource factory
//!
//! A [`Device`] owns the selected backend (behind a mutex inside
//! [`DeviceShared`]), the swapchain and the immediate [`CommandContext`].
//! Resources keep a weak reference to the shared state, so they may outlive
//! the device: their backend objects are then freed with the backend itself.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle, RawWindowHandle};

use crate::backend::{BackendDevice, BackendStats};
use crate::config::{DeviceConfig, GpuSettings};
use crate::error::{Error, Result};
use crate::graphics::swapchain::Swapchain;
use crate::graphics::{
    Backend, Buffer, BufferDescriptor, CommandContext, ComputePipelineDescriptor, Framebuffer,
    FramebufferDescriptor, GpuCapabilities, GraphicsPipelineDescriptor, IndexType, Pipeline, Shader,
    ShaderStage, Texture, TextureDescriptor, TextureFormat, VertexElement,
};
use crate::ptr::{Ref, WeakRef};
use crate::validation::notify_validation_error;
use crate::{engine_debug, engine_error, engine_info, engine_warn};

// ===== SURFACE =====

/// Native window the swapchain presents to
#[derive(Debug, Clone, Copy)]
pub struct WindowHandle {
    pub(crate) display: RawDisplayHandle,
    pub(crate) window: RawWindowHandle,
}

impl WindowHandle {
    /// Wrap raw platform handles
    ///
    /// # Safety
    ///
    /// The window and display must stay valid for the whole life of the
    /// device created with this handle.
    pub unsafe fn new(display: RawDisplayHandle, window: RawWindowHandle) -> Self {
        Self { display, window }
    }

    /// Extract the raw handles of a windowing-library window
    ///
    /// # Safety
    ///
    /// Same contract as [`WindowHandle::new`]: `window` must outlive the device.
    pub unsafe fn from_window<W: HasWindowHandle + HasDisplayHandle>(window: &W) -> Result<Self> {
        let display = window
            .display_handle()
            .map_err(|e| Error::InitializationFailed(format!("no display handle: {}", e)))?
            .as_raw();
        let raw = window
            .window_handle()
            .map_err(|e| Error::InitializationFailed(format!("no window handle: {}", e)))?
            .as_raw();
        Ok(Self { display, window: raw })
    }
}

/// Swapchain parameters
#[derive(Debug, Clone, Copy)]
pub struct SurfaceDescriptor {
    /// Target window; `None` creates an offscreen swapchain
    pub window: Option<WindowHandle>,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    /// Depth attachment added to every swapchain framebuffer
    pub depth_format: Option<TextureFormat>,
    pub image_count: u32,
    pub vsync: bool,
}

impl SurfaceDescriptor {
    /// Offscreen swapchain of the given size
    pub fn headless(width: u32, height: u32) -> Self {
        Self { width, height, ..Self::default() }
    }

    pub fn with_window(window: WindowHandle, width: u32, height: u32) -> Self {
        Self { window: Some(window), width, height, ..Self::default() }
    }
}

impl Default for SurfaceDescriptor {
    fn default() -> Self {
        Self {
            window: None,
            width: 800,
            height: 600,
            format: TextureFormat::B8G8R8A8_UNORM,
            depth_format: None,
            image_count: 2,
            vsync: true,
        }
    }
}

/// Everything needed to create a [`Device`]
#[derive(Debug, Clone, Default)]
pub struct DeviceDescriptor {
    pub backend: Backend,
    pub config: DeviceConfig,
    pub surface: SurfaceDescriptor,
}

impl DeviceDescriptor {
    pub fn new(backend: Backend) -> Self {
        Self { backend, ..Self::default() }
    }

    /// Backend and options from a settings file, plus a surface
    pub fn from_settings(settings: GpuSettings, surface: SurfaceDescriptor) -> Self {
        Self { backend: settings.backend, config: settings.device, surface }
    }
}

// ===== SHARED STATE =====

/// State shared by a device, its command contexts and its resources
pub struct DeviceShared {
    // Declared before `backend`: swapchain objects are released first.
    swapchain: Mutex<Swapchain>,
    backend: Mutex<BackendDevice>,
    config: DeviceConfig,
    capabilities: GpuCapabilities,
    inside_frame: AtomicBool,
    frame_count: AtomicU64,
}

impl DeviceShared {
    /// Lock the backend
    ///
    /// Never drop a resource or request a texture view while holding the guard.
    pub(crate) fn backend(&self) -> Result<MutexGuard<'_, BackendDevice>> {
        self.backend
            .lock()
            .map_err(|_| Error::BackendError("backend device lock poisoned".to_string()))
    }

    pub(crate) fn with_backend<R>(&self, f: impl FnOnce(&mut BackendDevice) -> Result<R>) -> Result<R> {
        let mut backend = self.backend()?;
        f(&mut backend)
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn capabilities(&self) -> &GpuCapabilities {
        &self.capabilities
    }

    /// True when usage-contract checks run for this device
    pub fn validation_active(&self) -> bool {
        self.config.validation_active()
    }

    pub fn is_inside_frame(&self) -> bool {
        self.inside_frame.load(Ordering::Acquire)
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count.load(Ordering::Acquire)
    }

    /// Report a state-machine misuse and build the error to return
    pub(crate) fn misuse(&self, source: &str, message: String) -> Error {
        if self.validation_active() {
            notify_validation_error(&message);
        } else {
            engine_error!(source, "{}", message);
        }
        if self.config.panic_on_validation_error {
            panic!("{}", message);
        }
        Error::InvalidState(message)
    }

    /// Report a usage-contract violation
    ///
    /// Returns true when the violation was reported, in which case the caller
    /// turns the offending call into a no-op. With validation disabled nothing
    /// is reported and the call proceeds.
    pub(crate) fn report_violation(&self, message: String) -> bool {
        if !self.validation_active() {
            return false;
        }
        notify_validation_error(&message);
        if self.config.panic_on_validation_error {
            panic!("{}", message);
        }
        true
    }

    /// Framebuffer of the swapchain image acquired for the current frame
    pub(crate) fn swapchain_framebuffer(&self) -> Result<Ref<Framebuffer>> {
        let index = self.with_backend(|backend| Ok(backend.current_swapchain_index()))?;
        let swapchain = self.lock_swapchain()?;
        swapchain.framebuffer(index).ok_or_else(|| {
            Error::InvalidResource(format!("swapchain has no framebuffer for image {}", index))
        })
    }

    fn lock_swapchain(&self) -> Result<MutexGuard<'_, Swapchain>> {
        self.swapchain
            .lock()
            .map_err(|_| Error::BackendError("swapchain lock poisoned".to_string()))
    }
}

/// Run `f` on the backend of a device that may already be gone
pub(crate) fn with_backend<R>(
    device: &WeakRef<DeviceShared>,
    f: impl FnOnce(&mut BackendDevice) -> Result<R>,
) -> Result<R> {
    let shared = device
        .lock()
        .ok_or_else(|| Error::InvalidState("the owning device has been destroyed".to_string()))?;
    shared.with_backend(f)
}

// ===== DEVICE =====

/// Entry point: one backend, one swapchain, one immediate context
pub struct Device {
    immediate: Mutex<CommandContext>,
    shared: Ref<DeviceShared>,
}

impl Device {
    /// Create a device for `descriptor.backend`
    ///
    /// `Backend::Default` probes [`Backend::probe_order`] and keeps the first
    /// backend that initializes. A concrete backend that is unavailable fails
    /// with `Error::InitializationFailed`.
    pub fn create(descriptor: &DeviceDescriptor) -> Result<Self> {
        let backend = Self::create_backend(descriptor)?;
        let capabilities = backend.capabilities();
        engine_info!(
            "galaxy3d::Device",
            "Created {} device on '{}' ({:?}, tier {:?})",
            capabilities.backend,
            capabilities.device_name,
            capabilities.vendor,
            capabilities.feature_tier
        );

        let shared = Ref::new(DeviceShared {
            swapchain: Mutex::new(Swapchain::new(descriptor.surface.depth_format)),
            backend: Mutex::new(backend),
            config: descriptor.config.clone(),
            capabilities,
            inside_frame: AtomicBool::new(false),
            frame_count: AtomicU64::new(0),
        });
        shared.lock_swapchain()?.rebuild(&shared)?;
        let immediate = CommandContext::new(&shared, "immediate")?;

        Ok(Self { immediate: Mutex::new(immediate), shared })
    }

    fn create_backend(descriptor: &DeviceDescriptor) -> Result<BackendDevice> {
        if descriptor.backend != Backend::Default {
            return BackendDevice::create(descriptor.backend, &descriptor.config, &descriptor.surface);
        }

        let mut last_error = Error::InitializationFailed("no backend to probe".to_string());
        for &candidate in Backend::probe_order() {
            match BackendDevice::create(candidate, &descriptor.config, &descriptor.surface) {
                Ok(backend) => return Ok(backend),
                Err(e) => {
                    engine_warn!("galaxy3d::Device", "{} backend unavailable: {}", candidate, e);
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }

    pub(crate) fn shared(&self) -> &Ref<DeviceShared> {
        &self.shared
    }

    pub fn backend(&self) -> Backend {
        self.shared.capabilities.backend
    }

    pub fn capabilities(&self) -> &GpuCapabilities {
        &self.shared.capabilities
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.shared.config
    }

    // ===== FRAME =====

    /// Acquire the next swapchain image and open the frame bracket
    pub fn begin_frame(&self) -> Result<()> {
        if self.shared.is_inside_frame() {
            return Err(self.shared.misuse("galaxy3d::Device", "begin_frame called twice without end_frame".to_string()));
        }
        self.shared.with_backend(|backend| backend.begin_frame())?;
        self.shared.inside_frame.store(true, Ordering::Release);
        Ok(())
    }

    /// Flush the immediate context, present and advance the frame counter
    ///
    /// The guard returned by [`Device::immediate_context`] must be dropped first.
    pub fn end_frame(&self) -> Result<()> {
        if !self.shared.is_inside_frame() {
            return Err(self.shared.misuse("galaxy3d::Device", "end_frame called without begin_frame".to_string()));
        }
        self.immediate_context()?.flush(false)?;
        // The backend closes its frame even when presenting fails.
        let presented = self.shared.with_backend(|backend| backend.end_frame());
        self.shared.inside_frame.store(false, Ordering::Release);
        presented?;
        self.shared.frame_count.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    pub fn is_inside_frame(&self) -> bool {
        self.shared.is_inside_frame()
    }

    /// Number of completed begin/end frame brackets
    pub fn frame_count(&self) -> u64 {
        self.shared.frame_count()
    }

    /// Block until the GPU has retired every submission
    pub fn wait_idle(&self) -> Result<()> {
        self.shared.with_backend(|backend| backend.wait_idle())
    }

    /// Recreate the swapchain at a new size
    pub fn resize(&self, width: u32, height: u32) -> Result<()> {
        if width == 0 || height == 0 {
            engine_debug!("galaxy3d::Device", "Ignoring resize to {}x{}", width, height);
            return Ok(());
        }
        if self.shared.is_inside_frame() {
            return Err(self.shared.misuse("galaxy3d::Device", "resize called inside a frame".to_string()));
        }
        self.wait_idle()?;
        self.immediate_context()?.release_completed()?;

        let mut swapchain = self.shared.lock_swapchain()?;
        swapchain.clear();
        self.shared.with_backend(|backend| backend.resize_swapchain(width, height))?;
        swapchain.rebuild(&self.shared)?;
        engine_info!("galaxy3d::Device", "Swapchain resized to {}x{}", width, height);
        Ok(())
    }

    // ===== CONTEXTS =====

    /// The context flushed by `end_frame`
    pub fn immediate_context(&self) -> Result<MutexGuard<'_, CommandContext>> {
        self.immediate
            .lock()
            .map_err(|_| Error::BackendError("immediate context lock poisoned".to_string()))
    }

    /// A new recording context with its own native command buffer
    pub fn create_command_context(&self, name: &str) -> Result<CommandContext> {
        CommandContext::new(&self.shared, name)
    }

    // ===== RESOURCES =====

    pub fn create_buffer(&self, descriptor: &BufferDescriptor, data: Option<&[u8]>) -> Result<Ref<Buffer>> {
        if descriptor.usage.is_empty() || descriptor.size == 0 {
            return Err(Error::InvalidResource(format!(
                "buffer needs a usage and a size (got {:?}, {} bytes)",
                descriptor.usage, descriptor.size
            )));
        }
        let mut buffer = Buffer::with_shared(&self.shared);
        if !buffer.define(descriptor, data) {
            return Err(Error::OutOfMemory);
        }
        Ok(Ref::new(buffer))
    }

    pub fn create_vertex_buffer(
        &self,
        vertex_count: u32,
        elements: &[VertexElement],
        data: Option<&[u8]>,
    ) -> Result<Ref<Buffer>> {
        if vertex_count == 0 || elements.is_empty() {
            return Err(Error::InvalidResource("vertex buffer needs vertices and elements".to_string()));
        }
        let mut buffer = Buffer::with_shared(&self.shared);
        if !buffer.define_vertex(vertex_count, elements, false, data) {
            return Err(Error::OutOfMemory);
        }
        Ok(Ref::new(buffer))
    }

    pub fn create_index_buffer(
        &self,
        index_count: u32,
        index_type: IndexType,
        data: Option<&[u8]>,
    ) -> Result<Ref<Buffer>> {
        if index_count == 0 {
            return Err(Error::InvalidResource("index buffer needs indices".to_string()));
        }
        let mut buffer = Buffer::with_shared(&self.shared);
        if !buffer.define_index(index_count, index_type, false, data) {
            return Err(Error::OutOfMemory);
        }
        Ok(Ref::new(buffer))
    }

    pub fn create_texture(&self, descriptor: &TextureDescriptor, data: Option<&[u8]>) -> Result<Ref<Texture>> {
        descriptor.validate()?;
        let mut texture = Texture::with_shared(&self.shared);
        if !texture.define(descriptor, data) {
            return Err(Error::OutOfMemory);
        }
        Ok(Ref::new(texture))
    }

    pub fn create_framebuffer(&self, descriptor: &FramebufferDescriptor) -> Result<Ref<Framebuffer>> {
        Framebuffer::create(&self.shared, descriptor).map(Ref::new)
    }

    /// Load a SPIR-V shader stage
    pub fn create_shader(&self, stage: ShaderStage, spirv: &[u8]) -> Result<Shader> {
        Shader::from_spirv_bytes(stage, spirv)
    }

    pub fn create_graphics_pipeline(
        &self,
        name: &str,
        descriptor: &GraphicsPipelineDescriptor,
    ) -> Result<Ref<Pipeline>> {
        Pipeline::create_graphics(&self.shared, descriptor, name).map(Ref::new)
    }

    pub fn create_compute_pipeline(
        &self,
        name: &str,
        descriptor: &ComputePipelineDescriptor,
    ) -> Result<Ref<Pipeline>> {
        Pipeline::create_compute(&self.shared, descriptor, name).map(Ref::new)
    }

    // ===== SWAPCHAIN / READBACK =====

    /// Framebuffer targeting the swapchain image of the current frame
    pub fn swapchain_framebuffer(&self) -> Result<Ref<Framebuffer>> {
        self.shared.swapchain_framebuffer()
    }

    pub fn swapchain_image_count(&self) -> Result<usize> {
        Ok(self.shared.lock_swapchain()?.image_count())
    }

    /// Copy one subresource back to the CPU (waits for pending work)
    pub fn read_texture(&self, texture: &Texture, mip_level: u32, layer: u32) -> Result<Vec<u8>> {
        if !texture.belongs_to(&self.shared) {
            return Err(Error::InvalidResource(format!("texture '{}' belongs to another device", texture.name())));
        }
        let desc = texture.descriptor();
        if mip_level >= desc.mip_levels || layer >= desc.total_layers() {
            return Err(Error::OutOfRange(format!(
                "subresource (mip {}, layer {}) of '{}' ({} mips, {} layers)",
                mip_level,
                layer,
                texture.name(),
                desc.mip_levels,
                desc.total_layers()
            )));
        }
        let handle = texture.handle()?;
        self.shared.with_backend(|backend| {
            backend.wait_idle()?;
            backend.read_texture(handle, mip_level, layer)
        })
    }

    /// Copy a buffer's content back to the CPU (waits for pending work)
    pub fn read_buffer(&self, buffer: &Buffer) -> Result<Vec<u8>> {
        if !buffer.belongs_to(&self.shared) {
            return Err(Error::InvalidResource(format!("buffer '{}' belongs to another device", buffer.name())));
        }
        let handle = buffer.handle()?;
        self.shared.with_backend(|backend| {
            backend.wait_idle()?;
            backend.read_buffer(handle)
        })
    }

    /// Work counters reported by the backend
    pub fn stats(&self) -> Result<BackendStats> {
        self.shared.with_backend(|backend| Ok(backend.stats()))
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        if let Err(e) = self.wait_idle() {
            engine_warn!("galaxy3d::Device", "wait_idle failed during shutdown: {}", e);
        }
        engine_debug!(
            "galaxy3d::Device",
            "Destroying {} device after {} frames",
            self.shared.capabilities.backend,
            self.shared.frame_count()
        );
    }
}

#[cfg(test)]
#[path = "device_tests.rs"]
mod tests;
