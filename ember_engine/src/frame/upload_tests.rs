use std::time::Duration;
use super::*;
use crate::gpu::headless::{DeviceEvent, HeadlessDevice, RecordedCommand};

fn submitter(device: &HeadlessDevice, cleanup: &mut CleanupRegistry) -> ImmediateSubmitter {
    ImmediateSubmitter::new(device, Duration::from_secs(10), cleanup).unwrap()
}

#[test]
fn test_upload_buffer_copies_contents() {
    let device = HeadlessDevice::new();
    let mut cleanup = CleanupRegistry::new();
    let mut immediate = submitter(&device, &mut cleanup);

    let buffer = upload_buffer(&device, &mut immediate, &[9, 8, 7, 6], BufferUsage::STORAGE).unwrap();

    assert_eq!(device.buffer_contents(buffer), Some(vec![9, 8, 7, 6]));
    // Only the destination buffer survives the upload
    let created = device.events().iter().filter(|e| matches!(e, DeviceEvent::BufferCreated { .. })).count();
    let destroyed = device.events().iter().filter(|e| matches!(e, DeviceEvent::BufferDestroyed { .. })).count();
    assert_eq!((created, destroyed), (2, 1));

    device.destroy_buffer(buffer);
    cleanup.flush(&device);
}

#[test]
fn test_upload_empty_buffer_rejected() {
    let device = HeadlessDevice::new();
    let mut cleanup = CleanupRegistry::new();
    let mut immediate = submitter(&device, &mut cleanup);

    assert!(matches!(
        upload_buffer(&device, &mut immediate, &[], BufferUsage::UNIFORM),
        Err(Error::InvalidResource(_))
    ));
    cleanup.flush(&device);
}

#[test]
fn test_upload_mesh_splits_staging_buffer() {
    let device = HeadlessDevice::new();
    let mut cleanup = CleanupRegistry::new();
    let mut immediate = submitter(&device, &mut cleanup);
    let vertices: [[f32; 2]; 3] = [[0.0, 1.0], [-1.0, -1.0], [1.0, -1.0]];
    let indices = [0u32, 1, 2];

    let mesh = upload_mesh(&device, &mut immediate, &vertices, &indices).unwrap();

    assert_eq!(mesh.vertex_count, 3);
    assert_eq!(mesh.index_count, 3);
    assert_eq!(device.buffer_contents(mesh.vertex_buffer), Some(bytemuck::cast_slice::<_, u8>(&vertices).to_vec()));
    assert_eq!(device.buffer_contents(mesh.index_buffer), Some(bytemuck::cast_slice::<_, u8>(&indices).to_vec()));
    assert_eq!(immediate.submissions(), 1);
    assert!(device.use_after_free_violations().is_empty());

    mesh.register_cleanup(&mut cleanup);
    cleanup.flush(&device);
    assert_eq!(device.live_object_count(), 0);
}

#[test]
fn test_register_cleanup_order() {
    let device = HeadlessDevice::new();
    let mut cleanup = CleanupRegistry::new();
    let mut immediate = submitter(&device, &mut cleanup);
    let mesh = upload_mesh(&device, &mut immediate, &[0.5f32; 6], &[0u32, 1, 2]).unwrap();
    let mut registry = CleanupRegistry::new();

    mesh.register_cleanup(&mut registry);
    assert_eq!(
        registry.pending(),
        &[Disposal::Buffer(mesh.vertex_buffer), Disposal::Buffer(mesh.index_buffer)]
    );
    device.clear_events();
    registry.flush(&device);

    assert_eq!(
        device.events(),
        vec![
            DeviceEvent::BufferDestroyed { buffer: mesh.index_buffer },
            DeviceEvent::BufferDestroyed { buffer: mesh.vertex_buffer },
        ]
    );
    cleanup.flush(&device);
}

#[test]
fn test_failed_upload_releases_buffers() {
    let device = HeadlessDevice::new();
    let mut cleanup = CleanupRegistry::new();
    let mut immediate = submitter(&device, &mut cleanup);
    device.inject_submit_failure(Error::BackendError("queue lost".to_string()));

    let result = upload_mesh(&device, &mut immediate, &[1u32, 2, 3], &[0u32]);

    assert!(matches!(result, Err(Error::BackendError(_))));
    cleanup.flush(&device);
    assert_eq!(device.live_object_count(), 0);
}

// ============================================================================
// Images
// ============================================================================

fn texture_desc(width: u32, height: u32) -> ImageDesc {
    ImageDesc {
        extent: Extent2D::new(width, height),
        format: ImageFormat::Rgba8Unorm,
        usage: ImageUsage::SAMPLED,
    }
}

#[test]
fn test_upload_image_copies_texels_and_leaves_image_readable() {
    let device = HeadlessDevice::new();
    let mut cleanup = CleanupRegistry::new();
    let mut immediate = submitter(&device, &mut cleanup);
    let texels: Vec<u8> = (0..16).collect();

    let texture = upload_image(&device, &mut immediate, &texels, &texture_desc(2, 2)).unwrap();

    assert_eq!(device.image_contents(texture.image), Some(texels));
    assert_eq!(texture.extent, Extent2D::new(2, 2));
    let transitions: Vec<_> = device
        .events()
        .into_iter()
        .filter_map(|e| match e {
            DeviceEvent::CommandRecorded {
                command: RecordedCommand::TransitionImage { image, old_layout, new_layout },
                ..
            } if image == texture.image => Some((old_layout, new_layout)),
            _ => None,
        })
        .collect();
    assert_eq!(
        transitions,
        vec![
            (ImageLayout::Undefined, ImageLayout::TransferDst),
            (ImageLayout::TransferDst, ImageLayout::ShaderReadOnly),
        ]
    );
    // Staging buffer is gone, image and view remain
    assert_eq!(device.live_images(), 1);
    assert!(device.events().iter().any(|e| matches!(e, DeviceEvent::BufferDestroyed { .. })));

    texture.register_cleanup(&mut cleanup);
    cleanup.flush(&device);
    assert_eq!(device.live_object_count(), 0);
    assert!(device.use_after_free_violations().is_empty());
}

#[test]
fn test_upload_image_size_mismatch_rejected() {
    let device = HeadlessDevice::new();
    let mut cleanup = CleanupRegistry::new();
    let mut immediate = submitter(&device, &mut cleanup);
    let live = device.live_object_count();

    let result = upload_image(&device, &mut immediate, &[0u8; 15], &texture_desc(2, 2));

    assert!(matches!(result, Err(Error::InvalidResource(_))));
    assert_eq!(device.live_object_count(), live);
    cleanup.flush(&device);
}

#[test]
fn test_failed_image_upload_releases_view_then_image() {
    let device = HeadlessDevice::new();
    let mut cleanup = CleanupRegistry::new();
    let mut immediate = submitter(&device, &mut cleanup);
    device.inject_submit_failure(Error::BackendError("queue lost".to_string()));

    let result = upload_image(&device, &mut immediate, &[7u8; 16], &texture_desc(2, 2));

    assert!(matches!(result, Err(Error::BackendError(_))));
    assert_eq!(device.live_images(), 0);
    assert!(device.use_after_free_violations().is_empty());
    cleanup.flush(&device);
    assert_eq!(device.live_object_count(), 0);
}

#[test]
fn test_timed_out_image_upload_leaks() {
    let device = HeadlessDevice::new();
    let mut cleanup = CleanupRegistry::new();
    let mut immediate = submitter(&device, &mut cleanup);
    device.set_hung(true);

    let result = upload_image(&device, &mut immediate, &[7u8; 16], &texture_desc(2, 2));

    assert!(matches!(result, Err(Error::DeviceTimeout(_))));
    assert_eq!(device.live_images(), 1);
    assert!(device.use_after_free_violations().is_empty());
    device.set_hung(false);
}

#[test]
fn test_create_image_builds_render_target() {
    let device = HeadlessDevice::new();
    let desc = ImageDesc {
        extent: Extent2D::new(320, 200),
        format: ImageFormat::D32Float,
        usage: ImageUsage::DEPTH_ATTACHMENT,
    };

    let target = create_image(&device, &desc).unwrap();
    assert_eq!(target.format, ImageFormat::D32Float);
    assert_eq!(device.live_object_count(), 2);

    target.destroy(&device);
    assert_eq!(device.live_object_count(), 0);
    assert!(device.use_after_free_violations().is_empty());
}

#[test]
fn test_create_image_releases_image_when_view_fails() {
    let device = HeadlessDevice::new();
    device.fail_creation_after(1, Error::OutOfMemory);

    let result = create_image(&device, &texture_desc(4, 4));

    assert!(matches!(result, Err(Error::OutOfMemory)));
    assert_eq!(device.live_object_count(), 0);
}
