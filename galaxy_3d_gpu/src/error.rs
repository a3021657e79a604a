//! Error types for the Galaxy3D GPU core
//!
//! This module defines the error types used throughout the GPU layer,
//! including backend initialization, resource creation and command recording.

use std::fmt;

/// Result type for Galaxy3D GPU operations
pub type Galaxy3dResult<T> = std::result::Result<T, Galaxy3dError>;

/// Short names used across the crate and by the `galaxy3d` facade
pub use self::Galaxy3dError as Error;
pub type Result<T> = Galaxy3dResult<T>;

/// Galaxy3D GPU errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Galaxy3dError {
    /// Backend-specific error (Vulkan, DirectX, etc.)
    BackendError(String),

    /// Out of GPU memory
    OutOfMemory,

    /// Invalid resource (texture, buffer, shader, etc.)
    InvalidResource(String),

    /// Initialization failed (device, backend, swapchain)
    InitializationFailed(String),

    /// Command recording state machine misuse (draw outside a render pass, ...)
    InvalidState(String),

    /// Index, offset or size outside the valid range
    OutOfRange(String),
}

impl fmt::Display for Galaxy3dError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Galaxy3dError::BackendError(msg) => write!(f, "Backend error: {}", msg),
            Galaxy3dError::OutOfMemory => write!(f, "Out of GPU memory"),
            Galaxy3dError::InvalidResource(msg) => write!(f, "Invalid resource: {}", msg),
            Galaxy3dError::InitializationFailed(msg) => write!(f, "Initialization failed: {}", msg),
            Galaxy3dError::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            Galaxy3dError::OutOfRange(msg) => write!(f, "Out of range: {}", msg),
        }
    }
}

impl std::error::Error for Galaxy3dError {}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
