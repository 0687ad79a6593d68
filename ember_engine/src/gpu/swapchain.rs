/// Swapchain trait - presentable surface owned by the frame pacer

use std::time::Duration;
use crate::error::Result;
use crate::gpu::types::{Extent2D, Image, ImageView, Semaphore};

/// Result of asking the surface for the next image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// Index of the acquired image, always `< image_count()`
    Image(u32),
    /// The surface no longer matches the window and must be recreated
    Obsolete,
}

/// Result of presenting an image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    /// The image was handed to the presentation engine, but the surface must be recreated
    Obsolete,
}

/// Presentable surface (swapchain + per-image views)
///
/// Obsolescence is reported through the outcome enums, never as an error.
pub trait Swapchain {
    /// Acquire the next image; `signal` is signaled once the image is ready to be written
    fn acquire_next_image(&mut self, signal: Semaphore, timeout: Duration) -> Result<AcquireOutcome>;

    /// Present `image_index` once `wait` is signaled
    fn present(&mut self, image_index: u32, wait: Semaphore) -> Result<PresentOutcome>;

    /// Destroy the surface images and views and rebuild them at `extent`
    ///
    /// Callers must make sure the device is idle first.
    fn recreate(&mut self, extent: Extent2D) -> Result<()>;

    /// Number of acquirable images, fixed between recreations
    fn image_count(&self) -> usize;

    fn extent(&self) -> Extent2D;

    fn image(&self, index: u32) -> Option<Image>;

    fn image_view(&self, index: u32) -> Option<ImageView>;
}

/// Window/surface provider: current drawable size
pub trait DrawableSize {
    fn drawable_size(&self) -> Extent2D;
}

impl DrawableSize for winit::window::Window {
    fn drawable_size(&self) -> Extent2D {
        let size = self.inner_size();
        Extent2D::new(size.width, size.height)
    }
}

impl DrawableSize for Extent2D {
    fn drawable_size(&self) -> Extent2D {
        *self
    }
}
