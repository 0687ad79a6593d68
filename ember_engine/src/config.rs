//! Startup configuration for the render core
//!
//! Plain data handed to `RenderCore::new` and the Vulkan backend. Nothing is
//! parsed here; applications build it in code, usually from `Config::default()`.

use std::time::Duration;
use crate::error::{Error, Result};
use crate::gpu::types::{DescriptorKind, Extent2D, PoolSizeRatio};

/// Default growth applied to the per-pool set count after each new pool
pub const DEFAULT_GROWTH_FACTOR: f32 = 1.5;

/// Default ceiling on sets per descriptor pool
pub const DEFAULT_MAX_SETS_PER_POOL: u32 = 4092;

/// Validation layer messages forwarded to the engine logger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugSeverity {
    ErrorsOnly,
    ErrorsAndWarnings,
    All,
}

/// Render core configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Application name reported to the driver
    pub app_name: String,

    /// Initial window size requested by the application
    pub window_extent: Extent2D,

    /// Enable API validation (Vulkan validation layers)
    pub enable_validation: bool,

    /// Which validation messages reach the logger
    pub debug_severity: DebugSeverity,

    /// Bound on the wait for a frame slot's fence
    pub frame_timeout: Duration,

    /// Bound on swapchain image acquisition
    pub acquire_timeout: Duration,

    /// Bound on the wait for an immediate submission
    pub immediate_timeout: Duration,

    pub descriptor_growth_factor: f32,
    pub descriptor_max_sets_per_pool: u32,

    /// Sets in the first pool of each frame slot's allocator
    pub frame_descriptor_sets: u32,
    pub frame_descriptor_ratios: Vec<PoolSizeRatio>,

    /// Sets in the first pool of the long-lived global allocator
    pub global_descriptor_sets: u32,
    pub global_descriptor_ratios: Vec<PoolSizeRatio>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app_name: "Ember Application".to_string(),
            window_extent: Extent2D::new(1700, 900),
            enable_validation: cfg!(debug_assertions),
            debug_severity: DebugSeverity::ErrorsAndWarnings,
            frame_timeout: Duration::from_secs(1),
            acquire_timeout: Duration::from_secs(1),
            immediate_timeout: Duration::from_nanos(9_999_999_999),
            descriptor_growth_factor: DEFAULT_GROWTH_FACTOR,
            descriptor_max_sets_per_pool: DEFAULT_MAX_SETS_PER_POOL,
            frame_descriptor_sets: 1000,
            frame_descriptor_ratios: vec![
                PoolSizeRatio::new(DescriptorKind::StorageImage, 3.0),
                PoolSizeRatio::new(DescriptorKind::StorageBuffer, 3.0),
                PoolSizeRatio::new(DescriptorKind::UniformBuffer, 3.0),
                PoolSizeRatio::new(DescriptorKind::CombinedImageSampler, 4.0),
            ],
            global_descriptor_sets: 10,
            global_descriptor_ratios: vec![
                PoolSizeRatio::new(DescriptorKind::StorageImage, 1.0),
            ],
        }
    }
}

impl Config {
    /// Reject values the core cannot honor
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidResource` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        let invalid = |field: &str, why: &str| Err(Error::InvalidResource(format!("config.{}: {}", field, why)));

        if !(self.descriptor_growth_factor >= 1.0) {
            return invalid("descriptor_growth_factor", "must be >= 1.0");
        }
        if self.descriptor_max_sets_per_pool == 0 {
            return invalid("descriptor_max_sets_per_pool", "must be > 0");
        }
        if self.frame_descriptor_sets == 0 {
            return invalid("frame_descriptor_sets", "must be > 0");
        }
        if self.global_descriptor_sets == 0 {
            return invalid("global_descriptor_sets", "must be > 0");
        }
        if self.frame_descriptor_ratios.is_empty() || self.global_descriptor_ratios.is_empty() {
            return invalid("descriptor ratios", "at least one kind is required");
        }
        for (field, timeout) in [
            ("frame_timeout", self.frame_timeout),
            ("acquire_timeout", self.acquire_timeout),
            ("immediate_timeout", self.immediate_timeout),
        ] {
            if timeout.is_zero() {
                return invalid(field, "must be non-zero");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
