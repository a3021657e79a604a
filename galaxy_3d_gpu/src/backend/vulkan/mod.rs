//! Vulkan backend (feature `vulkan`)
//!
//! Built on `ash` with `gpu-allocator` for memory. Uploads and readbacks run
//! as one-shot submissions that block until the GPU is done, so the backend
//! behaves like the software device from the caller's point of view.
//! With the `vulkan-validation` feature and `DeviceConfig::enable_validation`,
//! the Khronos validation layer reports through the engine's validation hook.

mod command_buffer;
mod context;
mod debug;
mod device;
mod format;
mod pipeline;
mod swapchain;

pub use command_buffer::VulkanCommandBuffer;
pub use device::VulkanDevice;


#[cfg(test)]
#[path = "vulkan_tests.rs"]
mod tests;
