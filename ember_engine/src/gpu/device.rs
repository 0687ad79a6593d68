/// GpuDevice - backend-agnostic GPU API surface used by the frame core

use std::time::Duration;
use crate::error::Result;
use crate::gpu::types::{
    Buffer, BufferCopy, BufferDesc, CommandBuffer, CommandPool, DescriptorBinding,
    DescriptorPool, DescriptorSet, DescriptorSetLayout, DescriptorWrite, Extent2D, Fence, Filter,
    Image, ImageDesc, ImageFormat, ImageLayout, ImageView, PoolSizeRatio, Sampler, Semaphore,
    SubmitInfo,
};

/// GPU API provider
///
/// Every call is issued from the thread driving the frame pacer. Destroy
/// calls cannot fail; passing a handle the device does not know is a bug in
/// the caller and backends log it.
///
/// Error contract relied upon by the core:
/// - `allocate_descriptor_set` reports `Error::OutOfPoolMemory` or
///   `Error::FragmentedPool` when the pool cannot hold the set
/// - `wait_fence` reports `Error::DeviceTimeout` when the timeout expires
pub trait GpuDevice: Send + Sync {
    // ===== DESCRIPTORS =====

    /// Create a pool for `max_sets` sets, sizing each descriptor kind from `ratios`
    fn create_descriptor_pool(&self, max_sets: u32, ratios: &[PoolSizeRatio]) -> Result<DescriptorPool>;

    /// Reclaim every set allocated from `pool`
    fn reset_descriptor_pool(&self, pool: DescriptorPool) -> Result<()>;

    fn destroy_descriptor_pool(&self, pool: DescriptorPool);

    fn allocate_descriptor_set(&self, pool: DescriptorPool, layout: DescriptorSetLayout) -> Result<DescriptorSet>;

    fn create_descriptor_set_layout(&self, bindings: &[DescriptorBinding]) -> Result<DescriptorSetLayout>;

    fn destroy_descriptor_set_layout(&self, layout: DescriptorSetLayout);

    fn update_descriptor_set(&self, set: DescriptorSet, writes: &[DescriptorWrite]) -> Result<()>;

    // ===== COMMANDS =====

    /// Create a command pool on the graphics queue family whose buffers can be reset individually
    fn create_command_pool(&self) -> Result<CommandPool>;

    /// Destroy a command pool together with every buffer allocated from it
    fn destroy_command_pool(&self, pool: CommandPool);

    fn allocate_command_buffer(&self, pool: CommandPool) -> Result<CommandBuffer>;

    fn reset_command_buffer(&self, command_buffer: CommandBuffer) -> Result<()>;

    fn begin_command_buffer(&self, command_buffer: CommandBuffer, one_time_submit: bool) -> Result<()>;

    fn end_command_buffer(&self, command_buffer: CommandBuffer) -> Result<()>;

    fn cmd_copy_buffer(&self, command_buffer: CommandBuffer, src: Buffer, dst: Buffer, region: BufferCopy);

    fn cmd_transition_image(
        &self,
        command_buffer: CommandBuffer,
        image: Image,
        old_layout: ImageLayout,
        new_layout: ImageLayout,
    );

    /// Copy tightly packed texels from `src` into the whole of `dst`, which is in `ImageLayout::TransferDst`
    fn cmd_copy_buffer_to_image(&self, command_buffer: CommandBuffer, src: Buffer, dst: Image, extent: Extent2D);

    /// Clear a whole color image that is in `ImageLayout::General` or `TransferDst`
    fn cmd_clear_color_image(&self, command_buffer: CommandBuffer, image: Image, layout: ImageLayout, color: [f32; 4]);

    // ===== SYNCHRONIZATION =====

    fn create_fence(&self, signaled: bool) -> Result<Fence>;

    fn destroy_fence(&self, fence: Fence);

    /// Block until `fence` is signaled or `timeout` expires (`Error::DeviceTimeout`)
    fn wait_fence(&self, fence: Fence, timeout: Duration) -> Result<()>;

    fn reset_fence(&self, fence: Fence) -> Result<()>;

    fn create_semaphore(&self) -> Result<Semaphore>;

    fn destroy_semaphore(&self, semaphore: Semaphore);

    // ===== QUEUE =====

    fn submit(&self, info: &SubmitInfo<'_>) -> Result<()>;

    /// Block until every submitted batch has completed
    fn wait_idle(&self) -> Result<()>;

    // ===== BUFFERS =====

    fn create_buffer(&self, desc: &BufferDesc) -> Result<Buffer>;

    /// Copy `data` into a host-visible buffer at `offset`
    fn write_buffer(&self, buffer: Buffer, offset: u64, data: &[u8]) -> Result<()>;

    fn destroy_buffer(&self, buffer: Buffer);

    // ===== IMAGES =====

    fn create_image(&self, desc: &ImageDesc) -> Result<Image>;

    fn destroy_image(&self, image: Image);

    /// Create a 2D view over the whole of `image`; depth formats get a depth aspect
    fn create_image_view(&self, image: Image, format: ImageFormat) -> Result<ImageView>;

    fn destroy_image_view(&self, view: ImageView);

    /// Create a clamp-to-edge sampler
    fn create_sampler(&self, filter: Filter) -> Result<Sampler>;

    fn destroy_sampler(&self, sampler: Sampler);
}
