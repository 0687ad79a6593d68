/// FrameSlot - per-frame-in-flight resources
///
/// A slot owns everything a single frame touches while the GPU may still be
/// executing it: its command pool and buffer, its fence and semaphores, a
/// descriptor allocator and a cleanup registry. Nothing is shared between
/// slots.

use crate::config::Config;
use crate::descriptor::DescriptorAllocator;
use crate::engine::Engine;
use crate::error::Result;
use crate::gpu::device::GpuDevice;
use crate::gpu::types::{CommandBuffer, CommandPool, Fence, Semaphore};
use crate::frame::cleanup::CleanupRegistry;
use crate::engine_debug;

/// Number of frames the CPU may record ahead of the GPU
pub const FRAMES_IN_FLIGHT: usize = 2;

pub struct FrameSlot {
    index: usize,
    command_pool: CommandPool,
    command_buffer: CommandBuffer,
    render_fence: Fence,
    image_available: Semaphore,
    render_finished: Semaphore,
    descriptors: DescriptorAllocator,
    cleanup: CleanupRegistry,
}

impl FrameSlot {
    /// Create the slot resources
    ///
    /// The fence starts signaled so the first wait on a fresh slot returns
    /// immediately. On failure everything created so far is destroyed.
    pub fn new(device: &dyn GpuDevice, index: usize, config: &Config) -> Result<Self> {
        let mut slot = Self {
            index,
            command_pool: CommandPool::NULL,
            command_buffer: CommandBuffer::NULL,
            render_fence: Fence::NULL,
            image_available: Semaphore::NULL,
            render_finished: Semaphore::NULL,
            descriptors: DescriptorAllocator::with_growth(
                config.descriptor_growth_factor,
                config.descriptor_max_sets_per_pool,
            ),
            cleanup: CleanupRegistry::new(),
        };

        match slot.create_objects(device, config) {
            Ok(()) => {
                engine_debug!("ember::FrameSlot", "Frame slot {} created", index);
                Ok(slot)
            }
            Err(err) => {
                slot.destroy(device);
                Err(Engine::log_error("ember::FrameSlot", err))
            }
        }
    }

    fn create_objects(&mut self, device: &dyn GpuDevice, config: &Config) -> Result<()> {
        self.command_pool = device.create_command_pool()?;
        self.command_buffer = device.allocate_command_buffer(self.command_pool)?;
        self.render_fence = device.create_fence(true)?;
        self.image_available = device.create_semaphore()?;
        self.render_finished = device.create_semaphore()?;
        self.descriptors
            .initialize(device, config.frame_descriptor_sets, &config.frame_descriptor_ratios)
    }

    /// Release everything the previous use of this slot deferred
    ///
    /// Must only be called once the slot fence has signaled.
    pub fn reclaim(&mut self, device: &dyn GpuDevice) -> Result<()> {
        self.cleanup.flush(device);
        self.descriptors.clear(device)
    }

    /// Flush the registry and destroy every slot object (device must be idle)
    pub fn destroy(&mut self, device: &dyn GpuDevice) {
        self.cleanup.flush(device);
        self.descriptors.destroy_all(device);

        if !self.render_finished.is_null() {
            device.destroy_semaphore(std::mem::replace(&mut self.render_finished, Semaphore::NULL));
        }
        if !self.image_available.is_null() {
            device.destroy_semaphore(std::mem::replace(&mut self.image_available, Semaphore::NULL));
        }
        if !self.render_fence.is_null() {
            device.destroy_fence(std::mem::replace(&mut self.render_fence, Fence::NULL));
        }
        // Frees the command buffer with it
        if !self.command_pool.is_null() {
            device.destroy_command_pool(std::mem::replace(&mut self.command_pool, CommandPool::NULL));
        }
        self.command_buffer = CommandBuffer::NULL;
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn command_buffer(&self) -> CommandBuffer {
        self.command_buffer
    }

    pub fn render_fence(&self) -> Fence {
        self.render_fence
    }

    pub fn image_available(&self) -> Semaphore {
        self.image_available
    }

    pub fn render_finished(&self) -> Semaphore {
        self.render_finished
    }

    pub fn descriptors(&self) -> &DescriptorAllocator {
        &self.descriptors
    }

    pub fn cleanup(&self) -> &CleanupRegistry {
        &self.cleanup
    }

    /// Mutable access to the allocator and the registry at once
    pub fn resources_mut(&mut self) -> (&mut DescriptorAllocator, &mut CleanupRegistry) {
        (&mut self.descriptors, &mut self.cleanup)
    }

    pub fn is_destroyed(&self) -> bool {
        self.command_pool.is_null() && self.render_fence.is_null()
    }
}

#[cfg(test)]
#[path = "slot_tests.rs"]
mod tests;
