/// Deferred cleanup registry
///
/// Teardown is recorded as a list of `Disposal` commands and executed in
/// reverse registration order, so a resource created after (and possibly
/// depending on) another is destroyed first.

use crate::gpu::device::GpuDevice;
use crate::gpu::types::{
    Buffer, CommandPool, DescriptorPool, DescriptorSetLayout, Fence, Image, ImageView, Sampler, Semaphore,
};
use crate::{engine_trace, engine_warn};

/// One deferred teardown action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposal {
    Buffer(Buffer),
    Image(Image),
    ImageView(ImageView),
    Sampler(Sampler),
    DescriptorSetLayout(DescriptorSetLayout),
    DescriptorPool(DescriptorPool),
    CommandPool(CommandPool),
    Fence(Fence),
    Semaphore(Semaphore),
}

impl Disposal {
    /// Destroy the resource on `device`
    pub fn dispose(self, device: &dyn GpuDevice) {
        match self {
            Disposal::Buffer(buffer) => device.destroy_buffer(buffer),
            Disposal::Image(image) => device.destroy_image(image),
            Disposal::ImageView(view) => device.destroy_image_view(view),
            Disposal::Sampler(sampler) => device.destroy_sampler(sampler),
            Disposal::DescriptorSetLayout(layout) => device.destroy_descriptor_set_layout(layout),
            Disposal::DescriptorPool(pool) => device.destroy_descriptor_pool(pool),
            Disposal::CommandPool(pool) => device.destroy_command_pool(pool),
            Disposal::Fence(fence) => device.destroy_fence(fence),
            Disposal::Semaphore(semaphore) => device.destroy_semaphore(semaphore),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Disposal::Buffer(_) => "buffer",
            Disposal::Image(_) => "image",
            Disposal::ImageView(_) => "image view",
            Disposal::Sampler(_) => "sampler",
            Disposal::DescriptorSetLayout(_) => "descriptor set layout",
            Disposal::DescriptorPool(_) => "descriptor pool",
            Disposal::CommandPool(_) => "command pool",
            Disposal::Fence(_) => "fence",
            Disposal::Semaphore(_) => "semaphore",
        }
    }
}

/// LIFO list of pending disposals
///
/// # Example
///
/// ```no_run
/// use ember_engine::ember::frame::{CleanupRegistry, Disposal};
/// use ember_engine::ember::gpu::{Buffer, GpuDevice};
///
/// fn teardown(device: &dyn GpuDevice, staging: Buffer, vertices: Buffer) {
///     let mut registry = CleanupRegistry::new();
///     registry.add_cleaner(Disposal::Buffer(vertices));
///     registry.add_cleaner(Disposal::Buffer(staging));
///     // staging is destroyed first
///     registry.flush(device);
/// }
/// ```
#[derive(Debug, Default)]
pub struct CleanupRegistry {
    disposals: Vec<Disposal>,
}

impl CleanupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a disposal to the tail
    pub fn add_cleaner(&mut self, disposal: Disposal) {
        self.disposals.push(disposal);
    }

    /// Run every disposal from tail to head and empty the registry
    ///
    /// Returns the number of disposals executed. A second flush is a no-op.
    pub fn flush(&mut self, device: &dyn GpuDevice) -> usize {
        let count = self.disposals.len();
        while let Some(disposal) = self.disposals.pop() {
            engine_trace!("ember::CleanupRegistry", "Disposing {} {:?}", disposal.kind(), disposal);
            disposal.dispose(device);
        }
        count
    }

    pub fn len(&self) -> usize {
        self.disposals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.disposals.is_empty()
    }

    /// Pending disposals in registration order
    pub fn pending(&self) -> &[Disposal] {
        &self.disposals
    }
}

impl Drop for CleanupRegistry {
    fn drop(&mut self) {
        if !self.disposals.is_empty() {
            engine_warn!(
                "ember::CleanupRegistry",
                "Dropped with {} pending disposals; resources leaked",
                self.disposals.len()
            );
        }
    }
}

#[cfg(test)]
#[path = "cleanup_tests.rs"]
mod tests;
