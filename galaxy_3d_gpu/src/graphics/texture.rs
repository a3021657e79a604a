//! Textures and their lazily created views

use std::sync::Mutex;

use rustc_hash::FxHashMap;

use crate::backend::{TextureHandle, TextureViewDesc, TextureViewKind, ViewHandle};
use crate::error::{Error, Result};
use crate::graphics::device::{with_backend, Device, DeviceShared};
use crate::graphics::{TextureFormat, TextureType, TextureUsage, REMAINING_ARRAY_LAYERS, REMAINING_MIP_LEVELS};
use crate::ptr::{Ref, WeakRef};
use crate::{engine_debug, engine_error};

/// Descriptor for defining a texture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureDescriptor {
    pub texture_type: TextureType,
    pub format: TextureFormat,
    pub width: u32,
    pub height: u32,
    /// Depth in texels (3D textures only, 1 otherwise)
    pub depth: u32,
    pub mip_levels: u32,
    /// Array layers; for cube textures, the number of cubes
    pub array_layers: u32,
    pub sample_count: u32,
    pub usage: TextureUsage,
}

impl TextureDescriptor {
    /// Single-mip 2D texture
    pub fn new_2d(width: u32, height: u32, format: TextureFormat, usage: TextureUsage) -> Self {
        Self {
            texture_type: TextureType::Type2D,
            format,
            width,
            height,
            depth: 1,
            mip_levels: 1,
            array_layers: 1,
            sample_count: 1,
            usage,
        }
    }

    /// Single-mip cube texture
    pub fn new_cube(size: u32, format: TextureFormat, usage: TextureUsage) -> Self {
        Self {
            texture_type: TextureType::Cube,
            ..Self::new_2d(size, size, format, usage)
        }
    }

    pub fn with_mip_levels(mut self, mip_levels: u32) -> Self {
        self.mip_levels = mip_levels;
        self
    }

    pub fn with_array_layers(mut self, array_layers: u32) -> Self {
        self.array_layers = array_layers;
        self
    }

    /// Faces per array layer: 6 for cubes, 1 otherwise
    pub fn layer_multiplier(&self) -> u32 {
        if self.texture_type == TextureType::Cube {
            6
        } else {
            1
        }
    }

    /// Array slices as seen by views (cube faces counted individually)
    pub fn total_layers(&self) -> u32 {
        self.array_layers * self.layer_multiplier()
    }

    /// Extent of a mip level, never below 1
    pub fn mip_extent(&self, mip_level: u32) -> (u32, u32, u32) {
        let depth = if self.texture_type == TextureType::Type3D {
            (self.depth >> mip_level).max(1)
        } else {
            1
        };
        (
            (self.width >> mip_level).max(1),
            (self.height >> mip_level).max(1),
            depth,
        )
    }

    /// Bytes of one slice at `mip_level`
    pub fn subresource_size(&self, mip_level: u32) -> usize {
        let (w, h, d) = self.mip_extent(mip_level);
        w as usize * h as usize * d as usize * self.format.bytes_per_pixel() as usize
    }

    /// Bytes of initial data: mip 0 of every slice, or every mip of every slice
    pub fn data_size(&self, all_mips: bool) -> usize {
        let mips = if all_mips { self.mip_levels } else { 1 };
        (0..mips).map(|mip| self.subresource_size(mip)).sum::<usize>() * self.total_layers() as usize
    }

    /// Depth formats read or written by shaders get a typeless backing store
    pub fn needs_typeless_storage(&self) -> bool {
        self.format.is_depth()
            && self.usage.intersects(TextureUsage::SHADER_READ | TextureUsage::SHADER_WRITE)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 || self.depth == 0 {
            return Err(Error::InvalidResource(format!(
                "texture extent {}x{}x{} has a zero dimension",
                self.width, self.height, self.depth
            )));
        }
        if self.mip_levels == 0 || self.array_layers == 0 || self.sample_count == 0 {
            return Err(Error::InvalidResource(
                "texture needs at least one mip level, layer and sample".to_string(),
            ));
        }
        if self.usage.is_empty() {
            return Err(Error::InvalidResource("texture has no usage".to_string()));
        }
        let largest = self.width.max(self.height).max(self.depth);
        if self.mip_levels > max_mip_levels(largest) {
            return Err(Error::InvalidResource(format!(
                "{} mip levels requested, {} at most for size {}",
                self.mip_levels,
                max_mip_levels(largest),
                largest
            )));
        }
        if self.texture_type == TextureType::Cube && self.width != self.height {
            return Err(Error::InvalidResource("cube faces must be square".to_string()));
        }
        if self.sample_count > 1 && self.mip_levels > 1 {
            return Err(Error::InvalidResource(
                "multisampled textures can not have mip levels".to_string(),
            ));
        }
        Ok(())
    }
}

/// Length of the full mip chain for a texture of size `largest`
pub fn max_mip_levels(largest: u32) -> u32 {
    32 - largest.max(1).leading_zeros()
}

/// Clamp a view request to the texture's real mip/slice ranges
///
/// Out-of-range base mip / first slice are clamped to the last valid value;
/// `REMAINING_*` or overflowing counts cover everything up to the end.
pub fn normalize_view(
    descriptor: &TextureDescriptor,
    kind: TextureViewKind,
    mip_level: u32,
    mip_count: u32,
    first_slice: u32,
    slice_count: u32,
) -> TextureViewDesc {
    let total_mips = descriptor.mip_levels;
    let total_layers = descriptor.total_layers();

    let base_mip = mip_level.min(total_mips - 1);
    let base_layer = first_slice.min(total_layers - 1);

    let mip_count = if mip_count == REMAINING_MIP_LEVELS || mip_count.saturating_add(base_mip) > total_mips {
        total_mips - base_mip
    } else {
        mip_count.max(1)
    };
    let layer_count =
        if slice_count == REMAINING_ARRAY_LAYERS || slice_count.saturating_add(base_layer) > total_layers {
            total_layers - base_layer
        } else {
            slice_count.max(1)
        };

    TextureViewDesc { kind, base_mip, mip_count, base_layer, layer_count }
}

/// GPU texture
pub struct Texture {
    device: WeakRef<DeviceShared>,
    handle: Option<TextureHandle>,
    descriptor: TextureDescriptor,
    /// Image owned by the swapchain: views are ours, the image is not
    external: bool,
    views: Mutex<FxHashMap<TextureViewDesc, ViewHandle>>,
    name: String,
}

impl Texture {
    /// Create an undefined texture owned by `device`
    pub fn new(device: &Device) -> Self {
        Self::with_shared(device.shared())
    }

    pub(crate) fn with_shared(shared: &Ref<DeviceShared>) -> Self {
        Self {
            device: Ref::downgrade(shared),
            handle: None,
            descriptor: TextureDescriptor::new_2d(1, 1, TextureFormat::R8G8B8A8_UNORM, TextureUsage::SHADER_READ),
            external: false,
            views: Mutex::new(FxHashMap::default()),
            name: String::new(),
        }
    }

    /// Wrap a backend image owned by the swapchain
    pub(crate) fn external(shared: &Ref<DeviceShared>, handle: TextureHandle, descriptor: TextureDescriptor) -> Self {
        let mut texture = Self::with_shared(shared);
        texture.handle = Some(handle);
        texture.descriptor = descriptor;
        texture.external = true;
        texture.name = "swapchain".to_string();
        texture
    }

    /// Define the texture storage
    ///
    /// `data`, when given, holds tightly packed texels either for mip 0 of
    /// every slice or for every mip of every slice (slice-major, mips inner).
    pub fn define(&mut self, descriptor: &TextureDescriptor, data: Option<&[u8]>) -> bool {
        if let Err(e) = descriptor.validate() {
            engine_error!("galaxy3d::Texture", "Can not define texture '{}': {}", self.name, e);
            return false;
        }
        if let Some(bytes) = data {
            let expected = [descriptor.data_size(false), descriptor.data_size(true)];
            if !expected.contains(&bytes.len()) {
                engine_error!(
                    "galaxy3d::Texture",
                    "Initial data for '{}' is {} bytes, expected {} (mip 0) or {} (all mips)",
                    self.name,
                    bytes.len(),
                    expected[0],
                    expected[1]
                );
                return false;
            }
        }

        self.release();
        self.descriptor = *descriptor;

        let typeless = descriptor.needs_typeless_storage();
        match with_backend(&self.device, |backend| backend.create_texture(descriptor, typeless, data)) {
            Ok(handle) => {
                self.handle = Some(handle);
                engine_debug!(
                    "galaxy3d::Texture",
                    "Defined texture '{}' {}x{}x{} {:?} ({} mips, {} layers{})",
                    self.name,
                    descriptor.width,
                    descriptor.height,
                    descriptor.depth,
                    descriptor.format,
                    descriptor.mip_levels,
                    descriptor.total_layers(),
                    if typeless { ", typeless" } else { "" }
                );
                true
            }
            Err(e) => {
                engine_error!("galaxy3d::Texture", "Failed to create texture '{}': {}", self.name, e);
                false
            }
        }
    }

    /// Cached view over a subresource range, created on first request
    pub fn view(
        &self,
        kind: TextureViewKind,
        mip_level: u32,
        mip_count: u32,
        first_slice: u32,
        slice_count: u32,
    ) -> Result<ViewHandle> {
        let handle = self.handle()?;
        self.check_view_kind(kind)?;
        let key = normalize_view(&self.descriptor, kind, mip_level, mip_count, first_slice, slice_count);

        let mut views = self
            .views
            .lock()
            .map_err(|_| Error::BackendError("texture view cache poisoned".to_string()))?;
        if let Some(view) = views.get(&key) {
            return Ok(*view);
        }
        let view = with_backend(&self.device, |backend| backend.create_texture_view(handle, &key))?;
        views.insert(key, view);
        Ok(view)
    }

    /// Shader-resource view over the whole texture
    pub fn shader_view(&self) -> Result<ViewHandle> {
        self.view(TextureViewKind::ShaderRead, 0, REMAINING_MIP_LEVELS, 0, REMAINING_ARRAY_LAYERS)
    }

    /// Number of views created so far
    pub fn view_count(&self) -> usize {
        self.views.lock().map(|views| views.len()).unwrap_or(0)
    }

    fn check_view_kind(&self, kind: TextureViewKind) -> Result<()> {
        let usage = self.descriptor.usage;
        let is_depth = self.descriptor.format.is_depth();
        let allowed = match kind {
            TextureViewKind::ShaderRead => usage.contains(TextureUsage::SHADER_READ),
            TextureViewKind::ShaderWrite => usage.contains(TextureUsage::SHADER_WRITE) && !is_depth,
            TextureViewKind::RenderTarget => usage.contains(TextureUsage::RENDER_TARGET) && !is_depth,
            TextureViewKind::DepthStencil => usage.contains(TextureUsage::RENDER_TARGET) && is_depth,
        };
        if allowed {
            Ok(())
        } else {
            Err(Error::InvalidResource(format!(
                "texture '{}' ({:?}, {:?}) does not support {:?} views",
                self.name, self.descriptor.format, usage, kind
            )))
        }
    }

    /// Destroy every view and the backend image
    pub fn release(&mut self) {
        let views: Vec<ViewHandle> = match self.views.get_mut() {
            Ok(views) => views.drain().map(|(_, view)| view).collect(),
            Err(_) => Vec::new(),
        };
        let handle = self.handle.take();
        let external = self.external;
        if views.is_empty() && (handle.is_none() || external) {
            return;
        }
        let _ = with_backend(&self.device, |backend| {
            for view in views {
                backend.destroy_texture_view(view);
            }
            if let Some(handle) = handle {
                if !external {
                    backend.destroy_texture(handle);
                }
            }
            Ok(())
        });
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn descriptor(&self) -> &TextureDescriptor {
        &self.descriptor
    }

    pub fn texture_type(&self) -> TextureType {
        self.descriptor.texture_type
    }

    pub fn format(&self) -> TextureFormat {
        self.descriptor.format
    }

    pub fn usage(&self) -> TextureUsage {
        self.descriptor.usage
    }

    pub fn width(&self) -> u32 {
        self.descriptor.width
    }

    pub fn height(&self) -> u32 {
        self.descriptor.height
    }

    pub fn mip_levels(&self) -> u32 {
        self.descriptor.mip_levels
    }

    pub fn array_layers(&self) -> u32 {
        self.descriptor.array_layers
    }

    pub fn is_defined(&self) -> bool {
        self.handle.is_some()
    }

    pub fn is_external(&self) -> bool {
        self.external
    }

    pub(crate) fn handle(&self) -> Result<TextureHandle> {
        self.handle
            .ok_or_else(|| Error::InvalidResource(format!("texture '{}' is not defined", self.name)))
    }

    pub(crate) fn belongs_to(&self, shared: &Ref<DeviceShared>) -> bool {
        self.device.lock().map_or(false, |owner| Ref::ptr_eq(&owner, shared))
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
#[path = "texture_tests.rs"]
mod tests;
