//! Framebuffers (attachment sets) and render pass descriptors

use glam::Vec4;

use crate::backend::{AttachmentTarget, FramebufferHandle, FramebufferLayout, TextureViewKind};
use crate::engine_debug;
use crate::error::{Error, Result};
use crate::graphics::device::{with_backend, DeviceShared};
use crate::graphics::{LoadAction, StoreAction, Texture, TextureType, TextureUsage, MAX_COLOR_ATTACHMENTS};
use crate::ptr::{Ref, WeakRef};
use crate::validation::notify_validation_error;

// ===== RENDER PASS DESCRIPTOR =====

/// Load/store behavior of one color attachment
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderPassColorAttachment {
    pub load_action: LoadAction,
    pub store_action: StoreAction,
    pub clear_color: Vec4,
}

impl Default for RenderPassColorAttachment {
    fn default() -> Self {
        Self {
            load_action: LoadAction::Clear,
            store_action: StoreAction::Store,
            clear_color: Vec4::new(0.0, 0.0, 0.0, 1.0),
        }
    }
}

/// Load/store behavior of the depth-stencil attachment
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderPassDepthStencilAttachment {
    pub load_action: LoadAction,
    pub store_action: StoreAction,
    pub clear_depth: f32,
    pub clear_stencil: u8,
}

impl Default for RenderPassDepthStencilAttachment {
    fn default() -> Self {
        Self {
            load_action: LoadAction::Clear,
            store_action: StoreAction::DontCare,
            clear_depth: 1.0,
            clear_stencil: 0,
        }
    }
}

/// How attachments are loaded and stored by a render pass
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RenderPassDescriptor {
    pub color_attachments: [RenderPassColorAttachment; MAX_COLOR_ATTACHMENTS],
    pub depth_stencil_attachment: RenderPassDepthStencilAttachment,
}

impl RenderPassDescriptor {
    /// Clear every color attachment to `color` and depth to `depth`
    pub fn clear(color: Vec4, depth: f32, stencil: u8) -> Self {
        let mut desc = Self::default();
        for attachment in desc.color_attachments.iter_mut() {
            attachment.clear_color = color;
        }
        desc.depth_stencil_attachment.clear_depth = depth;
        desc.depth_stencil_attachment.clear_stencil = stencil;
        desc
    }

    /// Keep previous content of every attachment
    pub fn load() -> Self {
        let mut desc = Self::default();
        for attachment in desc.color_attachments.iter_mut() {
            attachment.load_action = LoadAction::Load;
        }
        desc.depth_stencil_attachment.load_action = LoadAction::Load;
        desc.depth_stencil_attachment.store_action = StoreAction::Store;
        desc
    }
}

// ===== FRAMEBUFFER =====

/// A (texture, mip level, slice) triple
#[derive(Clone)]
pub struct FramebufferAttachment {
    pub texture: Ref<Texture>,
    pub mip_level: u32,
    /// First array layer (first cube for cube textures); rendering covers
    /// every layer from there to the end
    pub slice: u32,
}

impl FramebufferAttachment {
    pub fn new(texture: &Ref<Texture>) -> Self {
        Self { texture: texture.clone(), mip_level: 0, slice: 0 }
    }

    pub fn with_level(texture: &Ref<Texture>, mip_level: u32, slice: u32) -> Self {
        Self { texture: texture.clone(), mip_level, slice }
    }
}

/// Descriptor for creating a framebuffer
#[derive(Clone, Default)]
pub struct FramebufferDescriptor {
    pub color_attachments: Vec<FramebufferAttachment>,
    pub depth_stencil_attachment: Option<FramebufferAttachment>,
}

/// Render pass target: up to `MAX_COLOR_ATTACHMENTS` colors plus depth
pub struct Framebuffer {
    device: WeakRef<DeviceShared>,
    handle: FramebufferHandle,
    colors: Vec<FramebufferAttachment>,
    depth_stencil: Option<FramebufferAttachment>,
    width: u32,
    height: u32,
    layers: u32,
}

fn reject(shared: &DeviceShared, message: String) -> Error {
    if shared.validation_active() {
        notify_validation_error(&message);
    }
    Error::InvalidResource(message)
}

fn attachment_target(
    shared: &Ref<DeviceShared>,
    attachment: &FramebufferAttachment,
    depth: bool,
) -> Result<AttachmentTarget> {
    let texture = &attachment.texture;
    let desc = texture.descriptor();
    let role = if depth { "depth-stencil" } else { "color" };

    if !texture.is_defined() || !texture.belongs_to(shared) {
        return Err(reject(shared, format!("{} attachment '{}' is not a texture of this device", role, texture.name())));
    }
    if !desc.usage.contains(TextureUsage::RENDER_TARGET) {
        return Err(reject(shared, format!("{} attachment '{}' lacks RenderTarget usage", role, texture.name())));
    }
    if desc.format.is_depth() != depth {
        return Err(reject(
            shared,
            format!("{:?} can not be used as a {} attachment", desc.format, role),
        ));
    }
    if desc.texture_type == TextureType::Type3D {
        return Err(reject(shared, "3D textures can not be framebuffer attachments".to_string()));
    }
    if attachment.mip_level >= desc.mip_levels || attachment.slice >= desc.array_layers {
        return Err(reject(
            shared,
            format!(
                "{} attachment '{}' level {} / slice {} out of range ({} mips, {} layers)",
                role,
                texture.name(),
                attachment.mip_level,
                attachment.slice,
                desc.mip_levels,
                desc.array_layers
            ),
        ));
    }

    let multiplier = desc.layer_multiplier();
    let base_layer = attachment.slice * multiplier;
    let layer_count = (desc.array_layers - attachment.slice) * multiplier;
    let kind = if depth { TextureViewKind::DepthStencil } else { TextureViewKind::RenderTarget };
    let view = texture.view(kind, attachment.mip_level, 1, base_layer, layer_count)?;

    Ok(AttachmentTarget {
        texture: texture.handle()?,
        view,
        format: desc.format,
        sample_count: desc.sample_count,
        mip_level: attachment.mip_level,
        base_layer,
        layer_count,
    })
}

impl Framebuffer {
    pub(crate) fn create(shared: &Ref<DeviceShared>, desc: &FramebufferDescriptor) -> Result<Self> {
        if desc.color_attachments.is_empty() && desc.depth_stencil_attachment.is_none() {
            return Err(reject(shared, "framebuffer needs at least one attachment".to_string()));
        }
        if desc.color_attachments.len() > MAX_COLOR_ATTACHMENTS {
            return Err(reject(
                shared,
                format!(
                    "{} color attachments, at most {} supported",
                    desc.color_attachments.len(),
                    MAX_COLOR_ATTACHMENTS
                ),
            ));
        }

        let mut colors = Vec::with_capacity(desc.color_attachments.len());
        for attachment in &desc.color_attachments {
            colors.push(attachment_target(shared, attachment, false)?);
        }
        let depth_stencil = match &desc.depth_stencil_attachment {
            Some(attachment) => Some(attachment_target(shared, attachment, true)?),
            None => None,
        };

        let all: Vec<&AttachmentTarget> = colors.iter().chain(depth_stencil.iter()).collect();
        let samples = all[0].sample_count;
        if all.iter().any(|target| target.sample_count != samples) {
            return Err(reject(shared, "framebuffer attachments have different sample counts".to_string()));
        }

        let attachments = desc.color_attachments.iter().chain(desc.depth_stencil_attachment.iter());
        let (mut width, mut height) = (u32::MAX, u32::MAX);
        for attachment in attachments {
            let level = attachment.mip_level;
            width = width.min((attachment.texture.width() >> level).max(1));
            height = height.min((attachment.texture.height() >> level).max(1));
        }
        let layers = all.iter().map(|target| target.layer_count).min().unwrap_or(1);

        let layout = FramebufferLayout { colors, depth_stencil, width, height, layers };
        let handle = shared.with_backend(|backend| backend.create_framebuffer(&layout))?;
        engine_debug!(
            "galaxy3d::Framebuffer",
            "Created framebuffer {}x{} ({} color, depth: {})",
            width,
            height,
            layout.colors.len(),
            layout.depth_stencil.is_some()
        );

        Ok(Self {
            device: Ref::downgrade(shared),
            handle,
            colors: desc.color_attachments.clone(),
            depth_stencil: desc.depth_stencil_attachment.clone(),
            width,
            height,
            layers,
        })
    }

    /// Minimum width over all attachments at their mip level
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Minimum height over all attachments at their mip level
    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn layers(&self) -> u32 {
        self.layers
    }

    pub fn color_attachments(&self) -> &[FramebufferAttachment] {
        &self.colors
    }

    pub fn color_attachment(&self, index: usize) -> Option<&Ref<Texture>> {
        self.colors.get(index).map(|attachment| &attachment.texture)
    }

    pub fn depth_stencil_attachment(&self) -> Option<&FramebufferAttachment> {
        self.depth_stencil.as_ref()
    }

    pub(crate) fn handle(&self) -> FramebufferHandle {
        self.handle
    }

    pub(crate) fn belongs_to(&self, shared: &Ref<DeviceShared>) -> bool {
        self.device.lock().map_or(false, |owner| Ref::ptr_eq(&owner, shared))
    }
}

impl Drop for Framebuffer {
    fn drop(&mut self) {
        let handle = self.handle;
        let _ = with_backend(&self.device, |backend| {
            backend.destroy_framebuffer(handle);
            Ok(())
        });
    }
}

#[cfg(test)]
#[path = "framebuffer_tests.rs"]
mod tests;
