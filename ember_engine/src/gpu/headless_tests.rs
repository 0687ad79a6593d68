use super::*;
use crate::gpu::types::{BufferUsage, ImageUsage, PipelineStage, ShaderStageFlags};

fn layout(device: &HeadlessDevice, kind: DescriptorKind) -> DescriptorSetLayout {
    device
        .create_descriptor_set_layout(&[DescriptorBinding {
            binding: 0,
            kind,
            count: 1,
            stages: ShaderStageFlags::COMPUTE,
        }])
        .unwrap()
}

// ============================================================================
// Descriptor pool simulation
// ============================================================================

#[test]
fn test_pool_enforces_max_sets() {
    let device = HeadlessDevice::new();
    let layout = layout(&device, DescriptorKind::StorageImage);
    let pool = device
        .create_descriptor_pool(2, &[PoolSizeRatio::new(DescriptorKind::StorageImage, 4.0)])
        .unwrap();

    device.allocate_descriptor_set(pool, layout).unwrap();
    device.allocate_descriptor_set(pool, layout).unwrap();
    let err = device.allocate_descriptor_set(pool, layout).unwrap_err();

    assert!(matches!(err, Error::OutOfPoolMemory));
    assert_eq!(device.pool_allocated_sets(pool), Some(2));
}

#[test]
fn test_pool_enforces_kind_capacity() {
    let device = HeadlessDevice::new();
    let storage = layout(&device, DescriptorKind::StorageBuffer);
    let pool = device
        .create_descriptor_pool(10, &[PoolSizeRatio::new(DescriptorKind::StorageImage, 1.0)])
        .unwrap();

    // The pool reserved no storage buffers at all
    assert!(matches!(
        device.allocate_descriptor_set(pool, storage),
        Err(Error::OutOfPoolMemory)
    ));
}

#[test]
fn test_pool_reset_reclaims_sets() {
    let device = HeadlessDevice::new();
    let layout = layout(&device, DescriptorKind::StorageImage);
    let pool = device
        .create_descriptor_pool(1, &[PoolSizeRatio::new(DescriptorKind::StorageImage, 1.0)])
        .unwrap();

    let set = device.allocate_descriptor_set(pool, layout).unwrap();
    device.reset_descriptor_pool(pool).unwrap();

    assert_eq!(device.pool_allocated_sets(pool), Some(0));
    assert!(device.update_descriptor_set(set, &[]).is_err());
    assert!(device.allocate_descriptor_set(pool, layout).is_ok());
}

#[test]
fn test_injected_descriptor_failure_consumed_once() {
    let device = HeadlessDevice::new();
    let layout = layout(&device, DescriptorKind::StorageImage);
    let pool = device
        .create_descriptor_pool(4, &[PoolSizeRatio::new(DescriptorKind::StorageImage, 1.0)])
        .unwrap();

    device.inject_descriptor_failure(Error::FragmentedPool);

    assert!(matches!(device.allocate_descriptor_set(pool, layout), Err(Error::FragmentedPool)));
    assert!(device.allocate_descriptor_set(pool, layout).is_ok());
}

// ============================================================================
// Submission and fences
// ============================================================================

#[test]
fn test_submission_completes_on_fence_wait() {
    let device = HeadlessDevice::new();
    let pool = device.create_command_pool().unwrap();
    let cmd = device.allocate_command_buffer(pool).unwrap();
    let fence = device.create_fence(false).unwrap();

    device.begin_command_buffer(cmd, true).unwrap();
    device.end_command_buffer(cmd).unwrap();
    device
        .submit(&SubmitInfo { command_buffers: &[cmd], fence: Some(fence), ..Default::default() })
        .unwrap();

    assert_eq!(device.is_fence_signaled(fence), Some(false));
    assert_eq!(device.pending_submissions(), 1);

    device.wait_fence(fence, Duration::from_secs(1)).unwrap();

    assert_eq!(device.is_fence_signaled(fence), Some(true));
    assert_eq!(device.pending_submissions(), 0);
}

#[test]
fn test_wait_on_unsubmitted_fence_times_out() {
    let device = HeadlessDevice::new();
    let fence = device.create_fence(false).unwrap();

    let err = device.wait_fence(fence, Duration::from_millis(5)).unwrap_err();
    assert!(matches!(err, Error::DeviceTimeout(_)));
}

#[test]
fn test_hung_device_times_out() {
    let device = HeadlessDevice::new();
    let fence = device.create_fence(false).unwrap();
    device.submit(&SubmitInfo { fence: Some(fence), ..Default::default() }).unwrap();

    device.set_hung(true);
    assert!(matches!(device.wait_fence(fence, Duration::from_secs(1)), Err(Error::DeviceTimeout(_))));

    device.set_hung(false);
    assert!(device.wait_fence(fence, Duration::from_secs(1)).is_ok());
}

#[test]
fn test_submit_with_signaled_fence_rejected() {
    let device = HeadlessDevice::new();
    let fence = device.create_fence(true).unwrap();

    let result = device.submit(&SubmitInfo { fence: Some(fence), ..Default::default() });
    assert!(matches!(result, Err(Error::InvalidResource(_))));
}

#[test]
fn test_submit_while_recording_rejected() {
    let device = HeadlessDevice::new();
    let pool = device.create_command_pool().unwrap();
    let cmd = device.allocate_command_buffer(pool).unwrap();
    device.begin_command_buffer(cmd, false).unwrap();

    assert!(device.submit(&SubmitInfo { command_buffers: &[cmd], ..Default::default() }).is_err());
}

#[test]
fn test_semaphore_wait_without_signal_is_violation() {
    let device = HeadlessDevice::new();
    let semaphore = device.create_semaphore().unwrap();

    device
        .submit(&SubmitInfo {
            wait_semaphores: &[(semaphore, PipelineStage::ColorAttachmentOutput)],
            ..Default::default()
        })
        .unwrap();

    assert_eq!(device.sync_violations().len(), 1);
}

// ============================================================================
// Buffers
// ============================================================================

#[test]
fn test_copy_executes_at_completion() {
    let device = HeadlessDevice::new();
    let staging = device
        .create_buffer(&BufferDesc { size: 4, usage: BufferUsage::TRANSFER_SRC, location: MemoryLocation::CpuToGpu })
        .unwrap();
    let target = device
        .create_buffer(&BufferDesc { size: 4, usage: BufferUsage::TRANSFER_DST, location: MemoryLocation::GpuOnly })
        .unwrap();
    device.write_buffer(staging, 0, &[1, 2, 3, 4]).unwrap();

    let pool = device.create_command_pool().unwrap();
    let cmd = device.allocate_command_buffer(pool).unwrap();
    let fence = device.create_fence(false).unwrap();
    device.begin_command_buffer(cmd, true).unwrap();
    device.cmd_copy_buffer(cmd, staging, target, BufferCopy { src_offset: 0, dst_offset: 0, size: 4 });
    device.end_command_buffer(cmd).unwrap();
    device.submit(&SubmitInfo { command_buffers: &[cmd], fence: Some(fence), ..Default::default() }).unwrap();

    assert_eq!(device.buffer_contents(target), Some(vec![0, 0, 0, 0]));
    device.wait_fence(fence, Duration::from_secs(1)).unwrap();
    assert_eq!(device.buffer_contents(target), Some(vec![1, 2, 3, 4]));
}

#[test]
fn test_destroy_referenced_buffer_is_use_after_free() {
    let device = HeadlessDevice::new();
    let staging = device
        .create_buffer(&BufferDesc { size: 8, usage: BufferUsage::TRANSFER_SRC, location: MemoryLocation::CpuToGpu })
        .unwrap();
    let target = device
        .create_buffer(&BufferDesc { size: 8, usage: BufferUsage::TRANSFER_DST, location: MemoryLocation::GpuOnly })
        .unwrap();
    let pool = device.create_command_pool().unwrap();
    let cmd = device.allocate_command_buffer(pool).unwrap();
    device.begin_command_buffer(cmd, true).unwrap();
    device.cmd_copy_buffer(cmd, staging, target, BufferCopy { src_offset: 0, dst_offset: 0, size: 8 });
    device.end_command_buffer(cmd).unwrap();
    device.submit(&SubmitInfo { command_buffers: &[cmd], ..Default::default() }).unwrap();

    device.destroy_buffer(staging);

    assert_eq!(device.use_after_free_violations().len(), 1);
}

#[test]
fn test_write_to_gpu_only_buffer_rejected() {
    let device = HeadlessDevice::new();
    let buffer = device
        .create_buffer(&BufferDesc { size: 4, usage: BufferUsage::VERTEX, location: MemoryLocation::GpuOnly })
        .unwrap();

    assert!(device.write_buffer(buffer, 0, &[0; 4]).is_err());
}

#[test]
fn test_command_pool_destroy_frees_buffers() {
    let device = HeadlessDevice::new();
    let pool = device.create_command_pool().unwrap();
    device.allocate_command_buffer(pool).unwrap();
    device.allocate_command_buffer(pool).unwrap();
    assert_eq!(device.live_object_count(), 3);

    device.destroy_command_pool(pool);

    assert_eq!(device.live_object_count(), 0);
}

// ============================================================================
// Images
// ============================================================================

fn texture_desc(width: u32, height: u32) -> ImageDesc {
    ImageDesc {
        extent: Extent2D::new(width, height),
        format: ImageFormat::Rgba8Unorm,
        usage: ImageUsage::SAMPLED | ImageUsage::TRANSFER_DST,
    }
}

#[test]
fn test_image_copy_executes_at_completion() {
    let device = HeadlessDevice::new();
    let staging = device
        .create_buffer(&BufferDesc { size: 8, usage: BufferUsage::TRANSFER_SRC, location: MemoryLocation::CpuToGpu })
        .unwrap();
    device.write_buffer(staging, 0, &[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
    let image = device.create_image(&texture_desc(2, 1)).unwrap();

    let pool = device.create_command_pool().unwrap();
    let cmd = device.allocate_command_buffer(pool).unwrap();
    let fence = device.create_fence(false).unwrap();
    device.begin_command_buffer(cmd, true).unwrap();
    device.cmd_copy_buffer_to_image(cmd, staging, image, Extent2D::new(2, 1));
    device.end_command_buffer(cmd).unwrap();
    device.submit(&SubmitInfo { command_buffers: &[cmd], fence: Some(fence), ..Default::default() }).unwrap();

    assert_eq!(device.image_contents(image), Some(vec![0; 8]));
    device.wait_fence(fence, Duration::from_secs(1)).unwrap();
    assert_eq!(device.image_contents(image), Some(vec![1, 2, 3, 4, 5, 6, 7, 8]));
}

#[test]
fn test_image_destroyed_before_view_is_violation() {
    let device = HeadlessDevice::new();
    let image = device.create_image(&texture_desc(4, 4)).unwrap();
    let view = device.create_image_view(image, ImageFormat::Rgba8Unorm).unwrap();

    device.destroy_image(image);
    device.destroy_image_view(view);

    assert_eq!(device.use_after_free_violations().len(), 1);
    assert_eq!(device.live_object_count(), 0);
}

#[test]
fn test_view_then_image_teardown_is_clean() {
    let device = HeadlessDevice::new();
    let image = device.create_image(&texture_desc(4, 4)).unwrap();
    let view = device.create_image_view(image, ImageFormat::Rgba8Unorm).unwrap();
    let sampler = device.create_sampler(Filter::Linear).unwrap();
    assert_eq!(device.live_images(), 1);

    device.destroy_sampler(sampler);
    device.destroy_image_view(view);
    device.destroy_image(image);

    assert!(device.use_after_free_violations().is_empty());
    assert_eq!(device.live_object_count(), 0);
}

#[test]
fn test_image_view_format_must_match() {
    let device = HeadlessDevice::new();
    let image = device.create_image(&texture_desc(4, 4)).unwrap();

    let err = device.create_image_view(image, ImageFormat::D32Float).unwrap_err();

    assert!(matches!(err, Error::InvalidResource(_)));
    device.destroy_image(image);
    assert_eq!(device.live_object_count(), 0);
}

#[test]
fn test_zero_sized_image_rejected() {
    let device = HeadlessDevice::new();

    assert!(matches!(device.create_image(&texture_desc(0, 16)), Err(Error::InvalidResource(_))));
}

// ============================================================================
// Swapchain
// ============================================================================

#[test]
fn test_swapchain_round_robin_and_scripted_obsolete() {
    let device = Arc::new(HeadlessDevice::new());
    let semaphore = device.create_semaphore().unwrap();
    let mut swapchain = HeadlessSwapchain::new(device.clone(), Extent2D::new(64, 64), 2);

    assert_eq!(swapchain.acquire_next_image(semaphore, Duration::from_secs(1)).unwrap(), AcquireOutcome::Image(0));
    assert_eq!(swapchain.present(0, semaphore).unwrap(), PresentOutcome::Presented);

    swapchain.queue_obsolete_acquire();
    assert_eq!(swapchain.acquire_next_image(semaphore, Duration::from_secs(1)).unwrap(), AcquireOutcome::Obsolete);
    assert_eq!(swapchain.acquire_next_image(semaphore, Duration::from_secs(1)).unwrap(), AcquireOutcome::Image(1));

    swapchain.queue_obsolete_present();
    assert_eq!(swapchain.present(1, semaphore).unwrap(), PresentOutcome::Obsolete);

    swapchain.recreate(Extent2D::new(32, 16)).unwrap();
    assert_eq!(swapchain.extent(), Extent2D::new(32, 16));
    assert_eq!(swapchain.recreations(), 1);
    assert!(device.sync_violations().is_empty());
}

#[test]
fn test_swapchain_images_change_on_recreate() {
    let device = Arc::new(HeadlessDevice::new());
    let mut swapchain = HeadlessSwapchain::new(device, Extent2D::new(8, 8), 3);

    let before = swapchain.image(0).unwrap();
    swapchain.recreate(Extent2D::new(8, 8)).unwrap();

    assert_ne!(swapchain.image(0).unwrap(), before);
    assert!(swapchain.image(3).is_none());
}

#[test]
fn test_acquire_times_out_when_every_image_is_out() {
    let device = Arc::new(HeadlessDevice::new());
    let first = device.create_semaphore().unwrap();
    let second = device.create_semaphore().unwrap();
    let mut swapchain = HeadlessSwapchain::new(device.clone(), Extent2D::new(64, 64), 2);

    assert_eq!(swapchain.acquire_next_image(first, Duration::from_secs(1)).unwrap(), AcquireOutcome::Image(0));
    assert_eq!(swapchain.acquire_next_image(second, Duration::from_secs(1)).unwrap(), AcquireOutcome::Image(1));
    assert_eq!(swapchain.outstanding_images(), 2);
    assert!(matches!(
        swapchain.acquire_next_image(first, Duration::from_secs(1)),
        Err(Error::DeviceTimeout(_))
    ));

    swapchain.recreate(Extent2D::new(64, 64)).unwrap();
    assert_eq!(swapchain.outstanding_images(), 0);
}

#[test]
fn test_creation_failure_counts_down() {
    let device = HeadlessDevice::new();
    device.fail_creation_after(1, Error::OutOfMemory);

    assert!(device.create_fence(false).is_ok());
    assert!(matches!(device.create_semaphore(), Err(Error::OutOfMemory)));
    assert!(device.create_semaphore().is_ok());
    assert_eq!(device.live_object_count(), 2);
}
