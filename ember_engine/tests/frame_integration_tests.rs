//! End-to-end tests of the frame core on the headless device
//!
//! Run with: cargo test --test frame_integration_tests

use std::sync::Arc;
use ember_engine::ember::{Config, Error, RenderCore, Result};
use ember_engine::ember::descriptor::{DescriptorAllocator, DescriptorLayoutBuilder, DescriptorWriter};
use ember_engine::ember::frame::{Disposal, FrameOutcome, FrameRecorder, FrameRecording};
use ember_engine::ember::gpu::{
    BufferDesc, BufferUsage, DescriptorBinding, DescriptorKind, DescriptorSetLayout, DeviceEvent,
    Extent2D, GpuDevice, HeadlessDevice, HeadlessSwapchain, ImageLayout, MemoryLocation,
    PoolSizeRatio, ShaderStageFlags, Swapchain,
};

// ============================================================================
// HELPERS
// ============================================================================

/// Per-frame work of a typical scene pass: a transient uniform buffer bound
/// through a descriptor set from the frame allocator
struct ScenePass {
    layout: DescriptorSetLayout,
    frames: Vec<(u64, usize)>,
}

impl FrameRecorder for ScenePass {
    fn record(&mut self, frame: &mut FrameRecording<'_>) -> Result<()> {
        let device = frame.device();
        let uniforms = device.create_buffer(&BufferDesc {
            size: 64,
            usage: BufferUsage::UNIFORM,
            location: MemoryLocation::CpuToGpu,
        })?;
        frame.defer(Disposal::Buffer(uniforms));
        device.write_buffer(uniforms, 0, &frame.frame_number().to_le_bytes())?;

        let set = frame.allocate_descriptor_set(self.layout)?;
        let mut writer = DescriptorWriter::new();
        writer.write_buffer(0, uniforms, 64, 0, DescriptorKind::UniformBuffer);
        writer.update_set(device, set)?;

        device.cmd_transition_image(frame.command_buffer(), frame.image(), ImageLayout::Undefined, ImageLayout::TransferDst);
        device.cmd_clear_color_image(frame.command_buffer(), frame.image(), ImageLayout::TransferDst, [0.1, 0.1, 0.1, 1.0]);
        device.cmd_transition_image(frame.command_buffer(), frame.image(), ImageLayout::TransferDst, ImageLayout::PresentSrc);

        self.frames.push((frame.frame_number(), frame.slot_index()));
        Ok(())
    }
}

fn storage_image_layout(device: &dyn GpuDevice) -> DescriptorSetLayout {
    device
        .create_descriptor_set_layout(&[DescriptorBinding {
            binding: 0,
            kind: DescriptorKind::StorageImage,
            count: 1,
            stages: ShaderStageFlags::COMPUTE,
        }])
        .unwrap()
}

// ============================================================================
// DESCRIPTOR ALLOCATOR SCENARIO
// ============================================================================

#[test]
fn test_integration_eleven_allocations_then_clear() {
    let device = HeadlessDevice::new();
    let layout = storage_image_layout(&device);
    let mut allocator = DescriptorAllocator::new();
    allocator
        .initialize(&device, 10, &[PoolSizeRatio::new(DescriptorKind::StorageImage, 1.0)])
        .unwrap();

    for _ in 0..11 {
        allocator.allocate(&device, layout).unwrap();
    }

    assert_eq!(allocator.full_count(), 1);
    assert_eq!(allocator.ready_count(), 1);
    assert_eq!(device.pool_max_sets(allocator.ready_pools()[0]), Some(15));

    allocator.clear(&device).unwrap();

    assert_eq!(allocator.ready_count(), 2);
    assert_eq!(allocator.full_count(), 0);
    for &pool in allocator.ready_pools() {
        assert_eq!(device.pool_allocated_sets(pool), Some(0));
    }

    allocator.destroy_all(&device);
    device.destroy_descriptor_set_layout(layout);
    assert_eq!(device.live_object_count(), 0);
}

// ============================================================================
// RENDER CORE SESSION
// ============================================================================

#[test]
fn test_integration_render_session() {
    let device = Arc::new(HeadlessDevice::new());
    let swapchain = HeadlessSwapchain::new(device.clone(), Extent2D::new(1700, 900), 3);
    let config = Config { frame_descriptor_sets: 16, ..Config::default() };
    let mut core = RenderCore::new(device.clone(), swapchain, config).unwrap();

    let mesh = core
        .upload_mesh(&[[0.0f32, 0.5, 0.0], [-0.5, -0.5, 0.0], [0.5, -0.5, 0.0]], &[0, 1, 2])
        .unwrap();
    assert_eq!(device.buffer_contents(mesh.index_buffer).map(|bytes| bytes.len()), Some(12));

    let layout = core
        .create_descriptor_layout(
            &DescriptorLayoutBuilder::new().add_binding(0, DescriptorKind::UniformBuffer),
            ShaderStageFlags::ALL_GRAPHICS,
        )
        .unwrap();
    let mut pass = ScenePass { layout, frames: Vec::new() };

    for _ in 0..6 {
        assert!(matches!(core.draw_frame(&mut pass).unwrap(), FrameOutcome::Presented { .. }));
    }

    // Window resized between frames
    core.request_resize();
    assert!(core.resize_if_requested(&Extent2D::new(1280, 720), |_, _| Ok(())).unwrap());
    core.draw_frame(&mut pass).unwrap();

    assert_eq!(pass.frames.len(), 7);
    assert!(pass.frames.iter().all(|&(number, slot)| slot as u64 == number % 2));
    assert_eq!(core.swapchain().extent(), Extent2D::new(1280, 720));

    let stats = core.stats();
    assert_eq!(stats.frames_presented, 7);
    assert_eq!(stats.surface_recreations, 1);

    core.shutdown().unwrap();

    assert_eq!(device.live_object_count(), 0);
    assert!(device.use_after_free_violations().is_empty());
    assert!(device.sync_violations().is_empty());
}

#[test]
fn test_integration_transient_buffers_live_one_rotation() {
    let device = Arc::new(HeadlessDevice::new());
    let swapchain = HeadlessSwapchain::new(device.clone(), Extent2D::new(64, 64), 2);
    let mut core = RenderCore::new(device.clone(), swapchain, Config::default()).unwrap();
    let layout = core
        .create_descriptor_layout(
            &DescriptorLayoutBuilder::new().add_binding(0, DescriptorKind::UniformBuffer),
            ShaderStageFlags::VERTEX,
        )
        .unwrap();
    let mut pass = ScenePass { layout, frames: Vec::new() };

    let live_buffers = |device: &HeadlessDevice| {
        let events = device.events();
        let created = events.iter().filter(|e| matches!(e, DeviceEvent::BufferCreated { .. })).count();
        let destroyed = events.iter().filter(|e| matches!(e, DeviceEvent::BufferDestroyed { .. })).count();
        created - destroyed
    };

    for _ in 0..10 {
        core.draw_frame(&mut pass).unwrap();
        // Never more transient buffers alive than frames in flight
        assert!(live_buffers(device.as_ref()) <= 2);
    }

    drop(core);
    assert_eq!(device.live_object_count(), 0);
}

#[test]
fn test_integration_hung_device_is_fatal_but_shutdown_completes() {
    let device = Arc::new(HeadlessDevice::new());
    let swapchain = HeadlessSwapchain::new(device.clone(), Extent2D::new(64, 64), 2);
    let mut core = RenderCore::new(device.clone(), swapchain, Config::default()).unwrap();
    let mut noop = |_: &mut FrameRecording<'_>| -> Result<()> { Ok(()) };

    core.draw_frame(&mut noop).unwrap();
    core.draw_frame(&mut noop).unwrap();
    device.set_hung(true);

    assert!(matches!(core.draw_frame(&mut noop), Err(Error::DeviceTimeout(_))));
    assert!(matches!(core.shutdown(), Err(Error::DeviceTimeout(_))));
    assert!(core.is_shut_down());
}
