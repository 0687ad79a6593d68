//! Error types for the Ember engine
//!
//! This module defines the error types used throughout the engine,
//! including device failures, pool exhaustion, and synchronization timeouts.

use std::fmt;

/// Result type for Ember engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ember engine errors
#[derive(Debug, Clone)]
pub enum Error {
    /// Backend-specific error (Vulkan, headless device, etc.)
    BackendError(String),

    /// Out of host or GPU memory
    OutOfMemory,

    /// Invalid resource or argument (unknown handle, empty upload, bad config)
    InvalidResource(String),

    /// Initialization failed (device, swapchain, frame slots)
    InitializationFailed(String),

    /// Descriptor set allocation failed on two pools in a row
    AllocationExhausted(String),

    /// A fence or acquire wait exceeded its bound; the device is presumed hung
    DeviceTimeout(String),

    /// The descriptor pool has no capacity left for the requested set
    OutOfPoolMemory,

    /// The descriptor pool has capacity but it is too fragmented to use
    FragmentedPool,
}

impl Error {
    /// True for the two device conditions that justify moving to another pool
    pub fn is_pool_exhaustion(&self) -> bool {
        matches!(self, Error::OutOfPoolMemory | Error::FragmentedPool)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::BackendError(msg) => write!(f, "Backend error: {}", msg),
            Error::OutOfMemory => write!(f, "Out of GPU memory"),
            Error::InvalidResource(msg) => write!(f, "Invalid resource: {}", msg),
            Error::InitializationFailed(msg) => write!(f, "Initialization failed: {}", msg),
            Error::AllocationExhausted(msg) => write!(f, "Descriptor allocation exhausted: {}", msg),
            Error::DeviceTimeout(msg) => write!(f, "Device timeout: {}", msg),
            Error::OutOfPoolMemory => write!(f, "Descriptor pool out of memory"),
            Error::FragmentedPool => write!(f, "Descriptor pool fragmented"),
        }
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
