//! Core-side swapchain: one framebuffer per backend swapchain image
//!
//! The backend owns the presentable images. They are wrapped here as external
//! textures so render passes can target them like any other framebuffer.

use crate::error::{Error, Result};
use crate::graphics::device::DeviceShared;
use crate::graphics::{
    Framebuffer, FramebufferAttachment, FramebufferDescriptor, Texture, TextureDescriptor, TextureFormat,
    TextureUsage,
};
use crate::ptr::Ref;
use crate::engine_debug;

pub(crate) struct Swapchain {
    depth_format: Option<TextureFormat>,
    framebuffers: Vec<Ref<Framebuffer>>,
    images: Vec<Ref<Texture>>,
    depth: Option<Ref<Texture>>,
}

impl Swapchain {
    pub(crate) fn new(depth_format: Option<TextureFormat>) -> Self {
        Self { depth_format, framebuffers: Vec::new(), images: Vec::new(), depth: None }
    }

    /// Wrap the backend's current images (call after creation or resize)
    ///
    /// Must not be called with the backend lock held.
    pub(crate) fn rebuild(&mut self, shared: &Ref<DeviceShared>) -> Result<()> {
        self.clear();
        let (descriptor, handles) =
            shared.with_backend(|backend| Ok((backend.swapchain_descriptor(), backend.swapchain_textures())))?;

        let depth = match self.depth_format {
            Some(format) => {
                let mut texture = Texture::with_shared(shared);
                texture.set_name("swapchain depth");
                let desc = TextureDescriptor::new_2d(descriptor.width, descriptor.height, format, TextureUsage::RENDER_TARGET);
                if !texture.define(&desc, None) {
                    return Err(Error::InitializationFailed(format!(
                        "cannot create {:?} swapchain depth buffer",
                        format
                    )));
                }
                Some(Ref::new(texture))
            }
            None => None,
        };

        for handle in handles {
            let image = Ref::new(Texture::external(shared, handle, descriptor));
            let framebuffer = Framebuffer::create(
                shared,
                &FramebufferDescriptor {
                    color_attachments: vec![FramebufferAttachment::new(&image)],
                    depth_stencil_attachment: depth.as_ref().map(FramebufferAttachment::new),
                },
            )?;
            self.images.push(image);
            self.framebuffers.push(Ref::new(framebuffer));
        }
        self.depth = depth;

        engine_debug!(
            "galaxy3d::Swapchain",
            "Wrapped {} swapchain images {}x{} {:?}",
            self.images.len(),
            descriptor.width,
            descriptor.height,
            descriptor.format
        );
        Ok(())
    }

    /// Release every core object referencing the backend images
    pub(crate) fn clear(&mut self) {
        self.framebuffers.clear();
        self.images.clear();
        self.depth = None;
    }

    pub(crate) fn framebuffer(&self, index: usize) -> Option<Ref<Framebuffer>> {
        self.framebuffers.get(index).cloned()
    }

    pub(crate) fn image_count(&self) -> usize {
        self.images.len()
    }
}
