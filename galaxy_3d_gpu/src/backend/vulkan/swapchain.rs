//! Window presentation: surface swapchain, acquire and present
//!
//! Presentable images rest in `GENERAL` like every other image while a
//! frame is open. `begin_frame` moves the acquired image out of `UNDEFINED`
//! and `end_frame` hands it to the presentation engine.

use std::collections::VecDeque;

use ash::vk;

use crate::backend::vulkan::context::VulkanContext;
use crate::backend::vulkan::format::{texture_format_from_vk, texture_format_to_vk};
use crate::error::{Error, Result};
use crate::graphics::{SurfaceDescriptor, TextureFormat};
use crate::{engine_debug, engine_err, engine_info, engine_warn};

/// Swapchain images created by the presentation engine
pub(crate) struct SwapchainImages {
    pub(crate) images: Vec<vk::Image>,
    pub(crate) format: TextureFormat,
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) sampled: bool,
}

pub(crate) struct Presenter {
    loader: ash::khr::swapchain::Device,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    requested_format: TextureFormat,
    requested_images: u32,
    vsync: bool,
    /// One per frame slot
    acquire_semaphores: Vec<vk::Semaphore>,
    /// One per swapchain image
    present_semaphores: Vec<vk::Semaphore>,
    command_pool: vk::CommandPool,
    begin_commands: Vec<vk::CommandBuffer>,
    end_commands: Vec<vk::CommandBuffer>,
    /// Fence values of the last frames' final submissions
    frame_fences: VecDeque<u64>,
    slot: usize,
    image_index: u32,
}

impl Presenter {
    pub(crate) fn new(
        context: &mut VulkanContext,
        surface: &SurfaceDescriptor,
        frames_in_flight: u32,
    ) -> Result<(Self, SwapchainImages)> {
        let frames_in_flight = frames_in_flight.max(1) as usize;
        unsafe {
            let device = &context.device;
            let loader = ash::khr::swapchain::Device::new(&context.instance, device);

            let pool_info = vk::CommandPoolCreateInfo::default()
                .queue_family_index(context.queue_family)
                .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
            let command_pool = device
                .create_command_pool(&pool_info, None)
                .map_err(|e| Self::init_error("Failed to create frame command pool", e))?;
            let alloc_info = vk::CommandBufferAllocateInfo::default()
                .command_pool(command_pool)
                .level(vk::CommandBufferLevel::PRIMARY)
                .command_buffer_count(2 * frames_in_flight as u32);
            let mut commands = device
                .allocate_command_buffers(&alloc_info)
                .map_err(|e| Self::init_error("Failed to allocate frame command buffers", e))?;
            let end_commands = commands.split_off(frames_in_flight);

            let mut acquire_semaphores = Vec::with_capacity(frames_in_flight);
            for _ in 0..frames_in_flight {
                acquire_semaphores.push(
                    device
                        .create_semaphore(&vk::SemaphoreCreateInfo::default(), None)
                        .map_err(|e| Self::init_error("Failed to create image-available semaphore", e))?,
                );
            }

            let mut presenter = Self {
                loader,
                swapchain: vk::SwapchainKHR::null(),
                images: Vec::new(),
                requested_format: surface.format,
                requested_images: surface.image_count.max(1),
                vsync: surface.vsync,
                acquire_semaphores,
                present_semaphores: Vec::new(),
                command_pool,
                begin_commands: commands,
                end_commands,
                frame_fences: VecDeque::new(),
                slot: 0,
                image_index: 0,
            };
            let images = presenter.create_swapchain(context, surface.width, surface.height)?;
            Ok((presenter, images))
        }
    }

    fn init_error(what: &str, e: vk::Result) -> Error {
        crate::engine_error!("galaxy3d::vulkan", "{}: {:?}", what, e);
        Error::InitializationFailed(format!("{}: {:?}", what, e))
    }

    /// (Re)create the swapchain, retiring the previous one
    fn create_swapchain(&mut self, context: &mut VulkanContext, width: u32, height: u32) -> Result<SwapchainImages> {
        let Some((surface_loader, surface)) = context.surface.as_ref() else {
            return Err(Error::InitializationFailed("presenting device has no window surface".to_string()));
        };
        unsafe {
            let capabilities = surface_loader
                .get_physical_device_surface_capabilities(context.physical_device, *surface)
                .map_err(|e| Self::init_error("Failed to get surface capabilities", e))?;
            let formats = surface_loader
                .get_physical_device_surface_formats(context.physical_device, *surface)
                .map_err(|e| Self::init_error("Failed to get surface formats", e))?;
            let present_modes = surface_loader
                .get_physical_device_surface_present_modes(context.physical_device, *surface)
                .map_err(|e| Self::init_error("Failed to get present modes", e))?;

            let wanted = texture_format_to_vk(self.requested_format);
            let surface_format = formats
                .iter()
                .find(|f| f.format == wanted)
                .or_else(|| formats.iter().find(|f| texture_format_from_vk(f.format).is_some()))
                .copied()
                .ok_or_else(|| Error::InitializationFailed("no supported surface format".to_string()))?;
            let format = texture_format_from_vk(surface_format.format)
                .ok_or_else(|| Error::InitializationFailed("no supported surface format".to_string()))?;
            if format != self.requested_format {
                engine_warn!(
                    "galaxy3d::vulkan",
                    "Surface does not support {:?}; presenting {:?}",
                    self.requested_format,
                    format
                );
            }

            let extent = if capabilities.current_extent.width != u32::MAX {
                capabilities.current_extent
            } else {
                vk::Extent2D {
                    width: width.clamp(capabilities.min_image_extent.width, capabilities.max_image_extent.width),
                    height: height.clamp(capabilities.min_image_extent.height, capabilities.max_image_extent.height),
                }
            };

            let mut image_count = self.requested_images.max(capabilities.min_image_count);
            if capabilities.max_image_count > 0 {
                image_count = image_count.min(capabilities.max_image_count);
            }

            let present_mode = if self.vsync {
                vk::PresentModeKHR::FIFO
            } else {
                [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE]
                    .into_iter()
                    .find(|mode| present_modes.contains(mode))
                    .unwrap_or(vk::PresentModeKHR::FIFO)
            };

            let sampled = capabilities.supported_usage_flags.contains(vk::ImageUsageFlags::SAMPLED);
            let mut usage = vk::ImageUsageFlags::COLOR_ATTACHMENT
                | vk::ImageUsageFlags::TRANSFER_SRC
                | vk::ImageUsageFlags::TRANSFER_DST;
            if sampled {
                usage |= vk::ImageUsageFlags::SAMPLED;
            }

            let old_swapchain = self.swapchain;
            let create_info = vk::SwapchainCreateInfoKHR::default()
                .surface(*surface)
                .min_image_count(image_count)
                .image_format(surface_format.format)
                .image_color_space(surface_format.color_space)
                .image_extent(extent)
                .image_array_layers(1)
                .image_usage(usage)
                .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
                .pre_transform(capabilities.current_transform)
                .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
                .present_mode(present_mode)
                .clipped(true)
                .old_swapchain(old_swapchain);
            self.swapchain = self
                .loader
                .create_swapchain(&create_info, None)
                .map_err(|e| Self::init_error("Failed to create swapchain", e))?;
            if old_swapchain != vk::SwapchainKHR::null() {
                self.loader.destroy_swapchain(old_swapchain, None);
            }

            self.images = self
                .loader
                .get_swapchain_images(self.swapchain)
                .map_err(|e| Self::init_error("Failed to get swapchain images", e))?;

            for semaphore in self.present_semaphores.drain(..) {
                context.device.destroy_semaphore(semaphore, None);
            }
            for _ in 0..self.images.len() {
                self.present_semaphores.push(
                    context
                        .device
                        .create_semaphore(&vk::SemaphoreCreateInfo::default(), None)
                        .map_err(|e| Self::init_error("Failed to create render-finished semaphore", e))?,
                );
            }

            engine_info!(
                "galaxy3d::vulkan",
                "Swapchain {}x{} {:?}, {} images, {:?}",
                extent.width,
                extent.height,
                format,
                self.images.len(),
                present_mode
            );

            Ok(SwapchainImages { images: self.images.clone(), format, width: extent.width, height: extent.height, sampled })
        }
    }

    pub(crate) fn resize(&mut self, context: &mut VulkanContext, width: u32, height: u32) -> Result<SwapchainImages> {
        context.wait_all()?;
        self.frame_fences.clear();
        self.create_swapchain(context, width, height)
    }

    pub(crate) fn image_index(&self) -> usize {
        self.image_index as usize
    }

    /// Acquire the next image and make it renderable
    pub(crate) fn begin_frame(&mut self, context: &mut VulkanContext) -> Result<usize> {
        if self.frame_fences.len() >= self.acquire_semaphores.len() {
            if let Some(value) = self.frame_fences.pop_front() {
                context.wait_for(value)?;
            }
        }

        let acquire = self.acquire_semaphores[self.slot];
        let (index, suboptimal) =
            match unsafe { self.loader.acquire_next_image(self.swapchain, u64::MAX, acquire, vk::Fence::null()) } {
                Ok(result) => result,
                Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                    engine_warn!("galaxy3d::vulkan", "Swapchain out of date; waiting for a resize");
                    return Err(Error::BackendError("swapchain out of date, resize required".to_string()));
                }
                Err(e) => return Err(engine_err!("galaxy3d::vulkan", "Failed to acquire swapchain image: {:?}", e)),
            };
        if suboptimal {
            engine_debug!("galaxy3d::vulkan", "Swapchain is suboptimal for the surface");
        }

        let image = self.images[index as usize];
        let commands = self.begin_commands[self.slot];
        self.record(context, commands, image, vk::ImageLayout::UNDEFINED, vk::ImageLayout::GENERAL)?;
        context.submit(commands, Some(acquire), None)?;
        self.image_index = index;
        Ok(index as usize)
    }

    /// Hand the current image to the presentation engine
    pub(crate) fn end_frame(&mut self, context: &mut VulkanContext) -> Result<()> {
        let index = self.image_index as usize;
        let commands = self.end_commands[self.slot];
        let present_semaphore = self.present_semaphores[index];
        self.record(context, commands, self.images[index], vk::ImageLayout::GENERAL, vk::ImageLayout::PRESENT_SRC_KHR)?;
        let value = context.submit(commands, None, Some(present_semaphore))?;
        self.frame_fences.push_back(value);
        self.slot = (self.slot + 1) % self.acquire_semaphores.len();

        let swapchains = [self.swapchain];
        let indices = [self.image_index];
        let wait_semaphores = [present_semaphore];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&indices);
        match unsafe { self.loader.queue_present(context.queue, &present_info) } {
            Ok(false) => Ok(()),
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                engine_debug!("galaxy3d::vulkan", "Swapchain needs a resize after present");
                Ok(())
            }
            Err(e) => Err(engine_err!("galaxy3d::vulkan", "Failed to present: {:?}", e)),
        }
    }

    fn record(
        &self,
        context: &VulkanContext,
        commands: vk::CommandBuffer,
        image: vk::Image,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
    ) -> Result<()> {
        let device = &context.device;
        unsafe {
            device
                .reset_command_buffer(commands, vk::CommandBufferResetFlags::empty())
                .and_then(|_| {
                    let begin_info =
                        vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
                    device.begin_command_buffer(commands, &begin_info)
                })
                .map_err(|e| engine_err!("galaxy3d::vulkan", "Failed to begin frame commands: {:?}", e))?;
            VulkanContext::transition(device, commands, image, vk::ImageAspectFlags::COLOR, old_layout, new_layout);
            device
                .end_command_buffer(commands)
                .map_err(|e| engine_err!("galaxy3d::vulkan", "Failed to end frame commands: {:?}", e))
        }
    }

    /// Release every object; the device must be idle
    pub(crate) fn destroy(&mut self, device: &ash::Device) {
        unsafe {
            for semaphore in self.acquire_semaphores.drain(..).chain(self.present_semaphores.drain(..)) {
                device.destroy_semaphore(semaphore, None);
            }
            device.destroy_command_pool(self.command_pool, None);
            if self.swapchain != vk::SwapchainKHR::null() {
                self.loader.destroy_swapchain(self.swapchain, None);
                self.swapchain = vk::SwapchainKHR::null();
            }
        }
    }
}
