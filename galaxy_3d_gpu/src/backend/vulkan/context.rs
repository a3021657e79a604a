//! Instance, device, queue and allocator bring-up; submission tracking
//!
//! Everything shared by the Vulkan device and its command buffers lives in
//! [`VulkanContext`]. Destruction order is explicit (see `Drop`): the
//! allocator must release its memory blocks before the device goes away.

use std::collections::VecDeque;
use std::ffi::CString;
use std::mem::ManuallyDrop;

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc};
use gpu_allocator::MemoryLocation;

use crate::backend::vulkan::debug;
use crate::config::DeviceConfig;
use crate::error::{Error, Result};
use crate::graphics::WindowHandle;
use crate::{engine_debug, engine_err, engine_error, engine_info, engine_warn};

/// Queue submissions in flight, keyed by fence value
struct Submissions {
    pending: VecDeque<(u64, vk::Fence)>,
    free: Vec<vk::Fence>,
    last_submitted: u64,
    completed: u64,
}

/// Shared Vulkan objects of one device
pub(crate) struct VulkanContext {
    _entry: ash::Entry,
    pub(crate) instance: ash::Instance,
    pub(crate) physical_device: vk::PhysicalDevice,
    pub(crate) properties: vk::PhysicalDeviceProperties,
    pub(crate) device: ash::Device,
    pub(crate) queue: vk::Queue,
    pub(crate) queue_family: u32,
    allocator: ManuallyDrop<Allocator>,
    /// Pool for one-shot upload and readback command buffers
    upload_pool: vk::CommandPool,
    submissions: Submissions,
    debug_messenger: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    /// Window surface, when the device presents
    pub(crate) surface: Option<(ash::khr::surface::Instance, vk::SurfaceKHR)>,
}

fn init_error(what: &str, e: impl std::fmt::Debug) -> Error {
    engine_error!("galaxy3d::vulkan", "{}: {:?}", what, e);
    Error::InitializationFailed(format!("{}: {:?}", what, e))
}

impl VulkanContext {
    pub(crate) fn new(config: &DeviceConfig, window: Option<&WindowHandle>) -> Result<Self> {
        unsafe {
            let entry = ash::Entry::load().map_err(|e| init_error("Failed to load the Vulkan library", e))?;

            let app_name = CString::new(config.app_name.clone()).unwrap_or_default();
            let (major, minor, patch) = config.app_version;
            let app_info = vk::ApplicationInfo::default()
                .application_name(&app_name)
                .application_version(vk::make_api_version(0, major, minor, patch))
                .engine_name(c"Galaxy3D")
                .engine_version(vk::make_api_version(0, 0, 1, 0))
                .api_version(vk::API_VERSION_1_2);

            let mut extension_names = match window {
                Some(window) => ash_window::enumerate_required_extensions(window.display)
                    .map_err(|e| init_error("Failed to get required surface extensions", e))?
                    .to_vec(),
                None => Vec::new(),
            };

            let validation = cfg!(feature = "vulkan-validation")
                && config.enable_validation
                && Self::validation_layer_available(&entry);
            if validation {
                extension_names.push(ash::ext::debug_utils::NAME.as_ptr());
            }
            let layer_names = if validation { vec![debug::VALIDATION_LAYER.as_ptr()] } else { Vec::new() };

            let create_info = vk::InstanceCreateInfo::default()
                .application_info(&app_info)
                .enabled_layer_names(&layer_names)
                .enabled_extension_names(&extension_names);
            let instance = entry
                .create_instance(&create_info, None)
                .map_err(|e| init_error("Failed to create Vulkan instance", e))?;

            let debug_messenger = if validation {
                let debug_utils = ash::ext::debug_utils::Instance::new(&entry, &instance);
                debug::reset_message_tracking();
                let messenger = debug_utils
                    .create_debug_utils_messenger(&debug::messenger_create_info(config.debug_severity), None)
                    .map_err(|e| init_error("Failed to create debug messenger", e))?;
                Some((debug_utils, messenger))
            } else {
                None
            };

            let surface = match window {
                Some(window) => {
                    let raw = ash_window::create_surface(&entry, &instance, window.display, window.window, None)
                        .map_err(|e| init_error("Failed to create window surface", e))?;
                    Some((ash::khr::surface::Instance::new(&entry, &instance), raw))
                }
                None => None,
            };

            let (physical_device, queue_family) = Self::pick_physical_device(&instance, surface.as_ref())?;
            let properties = instance.get_physical_device_properties(physical_device);

            let queue_priorities = [1.0];
            let queue_create_infos = [vk::DeviceQueueCreateInfo::default()
                .queue_family_index(queue_family)
                .queue_priorities(&queue_priorities)];
            let device_extension_names =
                if surface.is_some() { vec![ash::khr::swapchain::NAME.as_ptr()] } else { Vec::new() };
            let supported = instance.get_physical_device_features(physical_device);
            let device_features = vk::PhysicalDeviceFeatures::default()
                .sampler_anisotropy(supported.sampler_anisotropy == vk::TRUE)
                .fill_mode_non_solid(supported.fill_mode_non_solid == vk::TRUE)
                .image_cube_array(supported.image_cube_array == vk::TRUE);
            let device_create_info = vk::DeviceCreateInfo::default()
                .queue_create_infos(&queue_create_infos)
                .enabled_extension_names(&device_extension_names)
                .enabled_features(&device_features);
            let device = instance
                .create_device(physical_device, &device_create_info, None)
                .map_err(|e| init_error("Failed to create logical device", e))?;
            let queue = device.get_device_queue(queue_family, 0);

            let allocator = Allocator::new(&AllocatorCreateDesc {
                instance: instance.clone(),
                device: device.clone(),
                physical_device,
                debug_settings: Default::default(),
                buffer_device_address: false,
                allocation_sizes: Default::default(),
            })
            .map_err(|e| init_error("Failed to create GPU allocator", e))?;

            let upload_pool_info = vk::CommandPoolCreateInfo::default()
                .queue_family_index(queue_family)
                .flags(vk::CommandPoolCreateFlags::TRANSIENT | vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
            let upload_pool = device
                .create_command_pool(&upload_pool_info, None)
                .map_err(|e| init_error("Failed to create upload command pool", e))?;

            engine_info!(
                "galaxy3d::vulkan",
                "Using '{}' (Vulkan {}.{}.{}, validation {})",
                properties.device_name_as_c_str().map(|name| name.to_string_lossy()).unwrap_or_default(),
                vk::api_version_major(properties.api_version),
                vk::api_version_minor(properties.api_version),
                vk::api_version_patch(properties.api_version),
                if validation { "on" } else { "off" }
            );

            Ok(Self {
                _entry: entry,
                instance,
                physical_device,
                properties,
                device,
                queue,
                queue_family,
                allocator: ManuallyDrop::new(allocator),
                upload_pool,
                submissions: Submissions {
                    pending: VecDeque::new(),
                    free: Vec::new(),
                    last_submitted: 0,
                    completed: 0,
                },
                debug_messenger,
                surface,
            })
        }
    }

    unsafe fn validation_layer_available(entry: &ash::Entry) -> bool {
        let available = entry
            .enumerate_instance_layer_properties()
            .map(|layers| {
                layers
                    .iter()
                    .any(|layer| layer.layer_name_as_c_str().map_or(false, |name| name == debug::VALIDATION_LAYER))
            })
            .unwrap_or(false);
        if !available {
            engine_warn!(
                "galaxy3d::vulkan",
                "{:?} is not installed; continuing without native validation",
                debug::VALIDATION_LAYER
            );
        }
        available
    }

    /// Prefer a discrete GPU with a graphics+compute queue that can present
    unsafe fn pick_physical_device(
        instance: &ash::Instance,
        surface: Option<&(ash::khr::surface::Instance, vk::SurfaceKHR)>,
    ) -> Result<(vk::PhysicalDevice, u32)> {
        let physical_devices = instance
            .enumerate_physical_devices()
            .map_err(|e| init_error("Failed to enumerate physical devices", e))?;

        let mut best: Option<(vk::PhysicalDevice, u32, bool)> = None;
        for physical_device in physical_devices {
            let families = instance.get_physical_device_queue_family_properties(physical_device);
            let family = families.iter().enumerate().position(|(index, family)| {
                let flags = vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE;
                let presents = surface.map_or(true, |(loader, surface)| {
                    loader
                        .get_physical_device_surface_support(physical_device, index as u32, *surface)
                        .unwrap_or(false)
                });
                family.queue_flags.contains(flags) && presents
            });
            let Some(family) = family else { continue };

            let discrete = instance.get_physical_device_properties(physical_device).device_type
                == vk::PhysicalDeviceType::DISCRETE_GPU;
            if best.map_or(true, |(_, _, best_discrete)| discrete && !best_discrete) {
                best = Some((physical_device, family as u32, discrete));
            }
        }

        best.map(|(physical_device, family, _)| (physical_device, family)).ok_or_else(|| {
            engine_error!("galaxy3d::vulkan", "No Vulkan GPU with a graphics queue found");
            Error::InitializationFailed("No Vulkan GPU with a graphics queue found".to_string())
        })
    }

    // ===== MEMORY =====

    pub(crate) fn allocate(
        &mut self,
        name: &str,
        requirements: vk::MemoryRequirements,
        location: MemoryLocation,
        linear: bool,
    ) -> Result<Allocation> {
        self.allocator
            .allocate(&AllocationCreateDesc {
                name,
                requirements,
                location,
                linear,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(|e| {
                engine_error!(
                    "galaxy3d::vulkan",
                    "Out of GPU memory for {} ({} bytes): {:?}",
                    name,
                    requirements.size,
                    e
                );
                Error::OutOfMemory
            })
    }

    pub(crate) fn free(&mut self, allocation: Allocation) {
        if let Err(e) = self.allocator.free(allocation) {
            engine_warn!("galaxy3d::vulkan", "Failed to free GPU allocation: {:?}", e);
        }
    }

    /// Host-visible buffer bound to fresh memory
    pub(crate) fn create_host_buffer(
        &mut self,
        name: &str,
        size: u64,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
    ) -> Result<(vk::Buffer, Allocation)> {
        unsafe {
            let info = vk::BufferCreateInfo::default()
                .size(size.max(1))
                .usage(usage)
                .sharing_mode(vk::SharingMode::EXCLUSIVE);
            let buffer = self
                .device
                .create_buffer(&info, None)
                .map_err(|e| engine_err!("galaxy3d::vulkan", "Failed to create {}: {:?}", name, e))?;
            let requirements = self.device.get_buffer_memory_requirements(buffer);
            let allocation = match self.allocate(name, requirements, location, true) {
                Ok(allocation) => allocation,
                Err(e) => {
                    self.device.destroy_buffer(buffer, None);
                    return Err(e);
                }
            };
            if let Err(e) = self.device.bind_buffer_memory(buffer, allocation.memory(), allocation.offset()) {
                self.free(allocation);
                self.device.destroy_buffer(buffer, None);
                return Err(engine_err!("galaxy3d::vulkan", "Failed to bind {} memory: {:?}", name, e));
            }
            Ok((buffer, allocation))
        }
    }

    pub(crate) fn destroy_host_buffer(&mut self, buffer: vk::Buffer, allocation: Allocation) {
        self.free(allocation);
        unsafe { self.device.destroy_buffer(buffer, None) };
    }

    // ===== SUBMISSION =====

    /// Submit one command buffer; returns its fence value
    pub(crate) fn submit(
        &mut self,
        command_buffer: vk::CommandBuffer,
        wait: Option<vk::Semaphore>,
        signal: Option<vk::Semaphore>,
    ) -> Result<u64> {
        unsafe {
            let fence = match self.submissions.free.pop() {
                Some(fence) => fence,
                None => self
                    .device
                    .create_fence(&vk::FenceCreateInfo::default(), None)
                    .map_err(|e| engine_err!("galaxy3d::vulkan", "Failed to create submit fence: {:?}", e))?,
            };

            let command_buffers = [command_buffer];
            let wait_semaphores: Vec<vk::Semaphore> = wait.into_iter().collect();
            let wait_stages = vec![vk::PipelineStageFlags::ALL_COMMANDS; wait_semaphores.len()];
            let signal_semaphores: Vec<vk::Semaphore> = signal.into_iter().collect();
            let submit_info = vk::SubmitInfo::default()
                .wait_semaphores(&wait_semaphores)
                .wait_dst_stage_mask(&wait_stages)
                .command_buffers(&command_buffers)
                .signal_semaphores(&signal_semaphores);

            if let Err(e) = self.device.queue_submit(self.queue, &[submit_info], fence) {
                self.submissions.free.push(fence);
                return Err(engine_err!("galaxy3d::vulkan", "Failed to submit commands to GPU queue: {:?}", e));
            }

            self.submissions.last_submitted += 1;
            let value = self.submissions.last_submitted;
            self.submissions.pending.push_back((value, fence));
            Ok(value)
        }
    }

    pub(crate) fn last_submitted(&self) -> u64 {
        self.submissions.last_submitted
    }

    /// Retire signaled submissions; returns the highest completed value
    pub(crate) fn poll(&mut self) -> Result<u64> {
        while let Some(&(value, fence)) = self.submissions.pending.front() {
            let signaled = unsafe { self.device.get_fence_status(fence) }
                .map_err(|e| engine_err!("galaxy3d::vulkan", "Failed to query fence: {:?}", e))?;
            if !signaled {
                break;
            }
            self.retire_front(value, fence)?;
        }
        Ok(self.submissions.completed)
    }

    /// Block until the submission with fence `value` has retired
    pub(crate) fn wait_for(&mut self, value: u64) -> Result<()> {
        while let Some(&(front, fence)) = self.submissions.pending.front() {
            if front > value {
                break;
            }
            unsafe { self.device.wait_for_fences(&[fence], true, u64::MAX) }
                .map_err(|e| engine_err!("galaxy3d::vulkan", "Failed to wait for submit fence: {:?}", e))?;
            self.retire_front(front, fence)?;
        }
        Ok(())
    }

    pub(crate) fn wait_all(&mut self) -> Result<()> {
        self.wait_for(self.submissions.last_submitted)
    }

    fn retire_front(&mut self, value: u64, fence: vk::Fence) -> Result<()> {
        unsafe { self.device.reset_fences(&[fence]) }
            .map_err(|e| engine_err!("galaxy3d::vulkan", "Failed to reset submit fence: {:?}", e))?;
        self.submissions.pending.pop_front();
        self.submissions.free.push(fence);
        self.submissions.completed = value;
        Ok(())
    }

    /// Record, submit and wait for a one-shot command buffer
    pub(crate) fn one_shot<F>(&mut self, record: F) -> Result<()>
    where
        F: FnOnce(&ash::Device, vk::CommandBuffer),
    {
        unsafe {
            let alloc_info = vk::CommandBufferAllocateInfo::default()
                .command_pool(self.upload_pool)
                .level(vk::CommandBufferLevel::PRIMARY)
                .command_buffer_count(1);
            let command_buffer = self
                .device
                .allocate_command_buffers(&alloc_info)
                .map_err(|e| engine_err!("galaxy3d::vulkan", "Failed to allocate upload command buffer: {:?}", e))?[0];

            let begin_info =
                vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            let recorded = self.device.begin_command_buffer(command_buffer, &begin_info).and_then(|_| {
                record(&self.device, command_buffer);
                self.device.end_command_buffer(command_buffer)
            });
            let result = match recorded {
                Ok(()) => self.submit(command_buffer, None, None).and_then(|value| self.wait_for(value)),
                Err(e) => Err(engine_err!("galaxy3d::vulkan", "Failed to record upload commands: {:?}", e)),
            };

            self.device.free_command_buffers(self.upload_pool, &[command_buffer]);
            result
        }
    }

    /// Conservative barrier: every earlier write is visible to every later access
    pub(crate) fn full_barrier(device: &ash::Device, command_buffer: vk::CommandBuffer) {
        let barrier = vk::MemoryBarrier::default()
            .src_access_mask(vk::AccessFlags::MEMORY_WRITE)
            .dst_access_mask(vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE);
        unsafe {
            device.cmd_pipeline_barrier(
                command_buffer,
                vk::PipelineStageFlags::ALL_COMMANDS,
                vk::PipelineStageFlags::ALL_COMMANDS,
                vk::DependencyFlags::empty(),
                &[barrier],
                &[],
                &[],
            );
        }
    }

    /// Make every earlier write visible to host reads after the fence
    pub(crate) fn host_barrier(device: &ash::Device, command_buffer: vk::CommandBuffer) {
        let barrier = vk::MemoryBarrier::default()
            .src_access_mask(vk::AccessFlags::MEMORY_WRITE)
            .dst_access_mask(vk::AccessFlags::HOST_READ);
        unsafe {
            device.cmd_pipeline_barrier(
                command_buffer,
                vk::PipelineStageFlags::ALL_COMMANDS,
                vk::PipelineStageFlags::HOST,
                vk::DependencyFlags::empty(),
                &[barrier],
                &[],
                &[],
            );
        }
    }

    /// Whole-image layout transition
    pub(crate) fn transition(
        device: &ash::Device,
        command_buffer: vk::CommandBuffer,
        image: vk::Image,
        aspect_mask: vk::ImageAspectFlags,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
    ) {
        let barrier = vk::ImageMemoryBarrier::default()
            .src_access_mask(vk::AccessFlags::MEMORY_WRITE)
            .dst_access_mask(vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE)
            .old_layout(old_layout)
            .new_layout(new_layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask,
                base_mip_level: 0,
                level_count: vk::REMAINING_MIP_LEVELS,
                base_array_layer: 0,
                layer_count: vk::REMAINING_ARRAY_LAYERS,
            });
        unsafe {
            device.cmd_pipeline_barrier(
                command_buffer,
                vk::PipelineStageFlags::ALL_COMMANDS,
                vk::PipelineStageFlags::ALL_COMMANDS,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        }
    }
}

impl Drop for VulkanContext {
    fn drop(&mut self) {
        unsafe {
            self.device.device_wait_idle().ok();

            for (_, fence) in self.submissions.pending.drain(..) {
                self.device.destroy_fence(fence, None);
            }
            for fence in self.submissions.free.drain(..) {
                self.device.destroy_fence(fence, None);
            }
            self.device.destroy_command_pool(self.upload_pool, None);

            // Memory blocks go back to the driver before the device dies.
            ManuallyDrop::drop(&mut self.allocator);
            self.device.destroy_device(None);

            if let Some((loader, surface)) = self.surface.take() {
                loader.destroy_surface(surface, None);
            }
            if let Some((debug_utils, messenger)) = self.debug_messenger.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
        engine_debug!("galaxy3d::vulkan", "Vulkan context destroyed");
    }
}
