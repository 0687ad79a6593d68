use super::*;
use crate::error::Error;
use crate::frame::cleanup::Disposal;
use crate::gpu::headless::HeadlessDevice;
use crate::gpu::types::{BufferDesc, BufferUsage, MemoryLocation};

fn small_config() -> Config {
    Config {
        frame_descriptor_sets: 4,
        ..Config::default()
    }
}

#[test]
fn test_new_slot_starts_with_signaled_fence() {
    let device = HeadlessDevice::new();
    let mut slot = FrameSlot::new(&device, 1, &small_config()).unwrap();

    assert_eq!(slot.index(), 1);
    assert_eq!(device.is_fence_signaled(slot.render_fence()), Some(true));
    assert_ne!(slot.image_available(), slot.render_finished());
    assert_eq!(slot.descriptors().pool_count(), 1);

    slot.destroy(&device);
}

#[test]
fn test_reclaim_flushes_registry_and_clears_pools() {
    let device = HeadlessDevice::new();
    let mut slot = FrameSlot::new(&device, 0, &small_config()).unwrap();
    let buffer = device
        .create_buffer(&BufferDesc { size: 32, usage: BufferUsage::UNIFORM, location: MemoryLocation::CpuToGpu })
        .unwrap();

    let (_, cleanup) = slot.resources_mut();
    cleanup.add_cleaner(Disposal::Buffer(buffer));

    slot.reclaim(&device).unwrap();

    assert!(slot.cleanup().is_empty());
    assert_eq!(device.buffer_contents(buffer), None);
    slot.destroy(&device);
}

#[test]
fn test_destroy_releases_everything() {
    let device = HeadlessDevice::new();
    let mut slot = FrameSlot::new(&device, 0, &small_config()).unwrap();

    slot.destroy(&device);

    assert!(slot.is_destroyed());
    assert_eq!(device.live_object_count(), 0);

    // Second destroy touches nothing
    device.clear_events();
    slot.destroy(&device);
    assert!(device.events().is_empty());
}

#[test]
fn test_failed_creation_leaves_no_objects() {
    let device = HeadlessDevice::new();
    let config = Config {
        frame_descriptor_sets: 0,
        ..Config::default()
    };

    let result = FrameSlot::new(&device, 0, &config);

    assert!(matches!(result, Err(Error::InvalidResource(_))));
    assert_eq!(device.live_object_count(), 0);
}
