//! Headless software backend
//!
//! Always available. Resources live in CPU memory and submissions execute
//! synchronously, which makes the backend the reference for tests: render
//! pass load actions, buffer/texture uploads and readbacks behave exactly as
//! on a GPU, while draws and dispatches are validated and counted.

mod command_buffer;
mod device;
mod encode;

pub use command_buffer::SoftwareCommandBuffer;
pub use device::SoftwareDevice;

#[cfg(test)]
#[path = "software_tests.rs"]
mod tests;
