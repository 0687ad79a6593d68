use std::sync::Arc;
use super::*;
use crate::gpu::headless::{DeviceEvent, HeadlessDevice, HeadlessSwapchain, RecordedCommand};
use crate::gpu::types::{
    BufferCopy, BufferDesc, BufferUsage, DescriptorBinding, DescriptorKind, Fence, ImageLayout,
    MemoryLocation, ShaderStageFlags,
};

fn test_config() -> Config {
    Config {
        frame_descriptor_sets: 4,
        ..Config::default()
    }
}

fn setup() -> (Arc<HeadlessDevice>, FramePacer<HeadlessSwapchain>) {
    let device = Arc::new(HeadlessDevice::new());
    let swapchain = HeadlessSwapchain::new(device.clone(), Extent2D::new(640, 480), 3);
    let pacer = FramePacer::new(device.as_ref(), swapchain, &test_config()).unwrap();
    (device, pacer)
}

fn teardown(device: &HeadlessDevice, mut pacer: FramePacer<HeadlessSwapchain>) {
    device.wait_idle().unwrap();
    pacer.shutdown(device);
    assert_eq!(device.live_object_count(), 0);
}

fn clear_image(frame: &mut FrameRecording<'_>) -> Result<()> {
    frame
        .device()
        .cmd_clear_color_image(frame.command_buffer(), frame.image(), ImageLayout::TransferDst, [0.0, 0.0, 0.0, 1.0]);
    Ok(())
}

fn fail_recording(_: &mut FrameRecording<'_>) -> Result<()> {
    Err(Error::InvalidResource("bad scene".to_string()))
}

fn position(events: &[DeviceEvent], pred: impl Fn(&DeviceEvent) -> bool) -> usize {
    events.iter().position(pred).unwrap()
}

// ============================================================================
// Frame loop
// ============================================================================

#[test]
fn test_frames_rotate_through_slots() {
    let (device, mut pacer) = setup();
    let mut recorder = clear_image;

    for expected in 0..5u64 {
        let outcome = pacer.draw_frame(device.as_ref(), &mut recorder).unwrap();
        assert_eq!(
            outcome,
            FrameOutcome::Presented { frame_number: expected, image_index: (expected % 3) as u32 }
        );
    }

    assert_eq!(pacer.frame_number(), 5);
    assert_eq!(pacer.current_slot_index(), 1);
    assert_eq!(pacer.stats().frames_presented, 5);
    assert_eq!(pacer.state(), FrameState::WaitSlot);
    assert!(device.sync_violations().is_empty());

    teardown(&device, pacer);
}

#[test]
fn test_fence_discipline_over_slot_reuse() {
    let (device, mut pacer) = setup();
    let fence0 = pacer.slot(0).unwrap().render_fence();
    let mut recorder = clear_image;

    pacer.draw_frame(device.as_ref(), &mut recorder).unwrap();
    pacer.draw_frame(device.as_ref(), &mut recorder).unwrap();
    device.clear_events();

    // Third frame reuses slot 0 while its first submission is still pending
    pacer.draw_frame(device.as_ref(), &mut recorder).unwrap();

    let events = device.events();
    let waited = position(&events, |e| *e == DeviceEvent::FenceWaited { fence: fence0 });
    let completed = position(&events, |e| *e == DeviceEvent::SubmissionCompleted { fence: Some(fence0) });
    let reset = position(&events, |e| *e == DeviceEvent::FenceReset { fence: fence0 });
    let submitted = position(&events, |e| matches!(e, DeviceEvent::Submitted { fence: Some(f), .. } if *f == fence0));

    assert!(waited < completed);
    assert!(completed < reset);
    assert!(reset < submitted);
    assert!(device.sync_violations().is_empty());

    teardown(&device, pacer);
}

#[test]
fn test_every_fence_wait_is_preceded_by_a_submit() {
    let (device, mut pacer) = setup();
    let fences: Vec<Fence> = pacer.slots().iter().map(|slot| slot.render_fence()).collect();
    device.clear_events();
    let frames = FRAMES_IN_FLIGHT + 1;

    for _ in 0..frames {
        pacer.draw_frame(device.as_ref(), &mut clear_image).unwrap();
    }

    let events = device.events();
    let waits = events.iter().filter(|e| matches!(e, DeviceEvent::FenceWaited { .. })).count();
    let resets = events.iter().filter(|e| matches!(e, DeviceEvent::FenceReset { .. })).count();
    assert_eq!(waits, frames);
    assert_eq!(resets, frames);

    // Between two waits on the same fence there is a submission signaling it
    for fence in fences {
        let mut submitted_since_wait = true;
        for event in &events {
            match event {
                DeviceEvent::FenceWaited { fence: waited } if *waited == fence => {
                    assert!(submitted_since_wait, "fence {:?} waited twice without a submit", fence);
                    submitted_since_wait = false;
                }
                DeviceEvent::Submitted { fence: Some(signaled), .. } if *signaled == fence => {
                    submitted_since_wait = true;
                }
                _ => {}
            }
        }
    }
    assert!(device.sync_violations().is_empty());

    teardown(&device, pacer);
}

#[test]
fn test_submit_waits_and_signals_slot_semaphores() {
    let (device, mut pacer) = setup();
    let slot = pacer.slot(0).unwrap();
    let (command_buffer, image_available, render_finished, fence) = (
        slot.command_buffer(),
        slot.image_available(),
        slot.render_finished(),
        slot.render_fence(),
    );

    pacer.draw_frame(device.as_ref(), &mut clear_image).unwrap();

    assert!(device.events().contains(&DeviceEvent::Submitted {
        command_buffers: vec![command_buffer],
        wait_semaphores: vec![image_available],
        signal_semaphores: vec![render_finished],
        fence: Some(fence),
    }));
    assert!(device.events().contains(&DeviceEvent::CommandBufferBegun { command_buffer, one_time_submit: true }));

    teardown(&device, pacer);
}

#[test]
fn test_recorder_sees_frame_context() {
    let (device, mut pacer) = setup();
    let layout = device
        .create_descriptor_set_layout(&[DescriptorBinding {
            binding: 0,
            kind: DescriptorKind::UniformBuffer,
            count: 1,
            stages: ShaderStageFlags::VERTEX,
        }])
        .unwrap();
    let mut seen = Vec::new();

    for _ in 0..2 {
        pacer
            .draw_frame(device.as_ref(), &mut |frame: &mut FrameRecording<'_>| -> Result<()> {
                frame.allocate_descriptor_set(layout)?;
                seen.push((frame.frame_number(), frame.slot_index(), frame.extent(), frame.image()));
                Ok(())
            })
            .unwrap();
    }

    assert_eq!(seen[0].0, 0);
    assert_eq!(seen[1].1, 1);
    assert_eq!(seen[0].2, Extent2D::new(640, 480));
    assert_eq!(Some(seen[1].3), pacer.swapchain().image(1));

    device.destroy_descriptor_set_layout(layout);
    teardown(&device, pacer);
}

#[test]
fn test_deferred_buffer_outlives_its_frame() {
    let (device, mut pacer) = setup();
    let desc = BufferDesc { size: 8, usage: BufferUsage::TRANSFER_SRC, location: MemoryLocation::CpuToGpu };
    let src = device.create_buffer(&desc).unwrap();
    let dst = device.create_buffer(&desc).unwrap();

    pacer
        .draw_frame(device.as_ref(), &mut |frame: &mut FrameRecording<'_>| -> Result<()> {
            frame
                .device()
                .cmd_copy_buffer(frame.command_buffer(), src, dst, BufferCopy { src_offset: 0, dst_offset: 0, size: 8 });
            frame.defer(Disposal::Buffer(src));
            frame.defer(Disposal::Buffer(dst));
            Ok(())
        })
        .unwrap();
    pacer.draw_frame(device.as_ref(), &mut clear_image).unwrap();
    assert!(device.buffer_contents(src).is_some());

    // Slot 0 is reused: its copy completes before the registry flushes
    pacer.draw_frame(device.as_ref(), &mut clear_image).unwrap();

    assert_eq!(device.buffer_contents(src), None);
    assert!(device.use_after_free_violations().is_empty());

    teardown(&device, pacer);
}

// ============================================================================
// Resize
// ============================================================================

#[test]
fn test_acquire_obsolete_aborts_without_touching_fence() {
    let (device, mut pacer) = setup();
    let fence = pacer.slot(0).unwrap().render_fence();
    pacer.swapchain_mut().queue_obsolete_acquire();
    let mut recorded = false;

    let outcome = pacer
        .draw_frame(device.as_ref(), &mut |_: &mut FrameRecording<'_>| -> Result<()> {
            recorded = true;
            Ok(())
        })
        .unwrap();

    assert_eq!(outcome, FrameOutcome::ResizePending);
    assert!(!recorded);
    assert!(pacer.resize_requested());
    assert_eq!(pacer.frame_number(), 0);
    assert_eq!(pacer.stats().frames_aborted, 1);
    assert_eq!(device.is_fence_signaled(fence), Some(true));
    assert!(!device.events().iter().any(|e| matches!(e, DeviceEvent::FenceReset { .. } | DeviceEvent::Submitted { .. })));

    teardown(&device, pacer);
}

#[test]
fn test_resize_flagged_twice_recreates_once() {
    let (device, mut pacer) = setup();
    let mut rebuilds = Vec::new();

    pacer.swapchain_mut().queue_obsolete_acquire();
    assert_eq!(pacer.draw_frame(device.as_ref(), &mut clear_image).unwrap(), FrameOutcome::ResizePending);

    pacer.swapchain_mut().queue_obsolete_present();
    let outcome = pacer.draw_frame(device.as_ref(), &mut clear_image).unwrap();
    assert!(matches!(outcome, FrameOutcome::Presented { frame_number: 0, .. }));
    assert!(pacer.resize_requested());

    let window = Extent2D::new(800, 600);
    let recreated = pacer
        .resize(device.as_ref(), &window, |_, extent| {
            rebuilds.push(extent);
            Ok(())
        })
        .unwrap();
    assert!(recreated);
    assert!(!pacer.resize(device.as_ref(), &window, |_, _| Ok(())).unwrap());

    assert_eq!(pacer.swapchain().recreations(), 1);
    assert_eq!(pacer.swapchain().extent(), window);
    assert_eq!(rebuilds, vec![window]);
    assert!(!pacer.resize_requested());
    assert_eq!(pacer.stats().recreations, 1);

    // Recreation happens after the device drained
    let events = device.events();
    let idle = position(&events, |e| *e == DeviceEvent::WaitIdle);
    let recreated_at = position(&events, |e| matches!(e, DeviceEvent::SwapchainRecreated { .. }));
    assert!(idle < recreated_at);

    teardown(&device, pacer);
}

#[test]
fn test_resize_without_request_is_noop() {
    let (device, mut pacer) = setup();
    device.clear_events();

    assert!(!pacer.resize(device.as_ref(), &Extent2D::new(800, 600), |_, _| Ok(())).unwrap());
    assert!(device.events().is_empty());

    teardown(&device, pacer);
}

#[test]
fn test_minimized_window_keeps_resize_pending() {
    let (device, mut pacer) = setup();
    pacer.request_resize();

    assert!(!pacer.resize(device.as_ref(), &Extent2D::new(0, 600), |_, _| Ok(())).unwrap());
    assert!(pacer.resize_requested());
    assert_eq!(pacer.state(), FrameState::ResizePending);

    assert!(pacer.resize(device.as_ref(), &Extent2D::new(320, 200), |_, _| Ok(())).unwrap());
    assert!(!pacer.resize_requested());

    teardown(&device, pacer);
}

// ============================================================================
// Failures
// ============================================================================

#[test]
fn test_hung_device_times_out() {
    let (device, mut pacer) = setup();
    pacer.draw_frame(device.as_ref(), &mut clear_image).unwrap();
    pacer.draw_frame(device.as_ref(), &mut clear_image).unwrap();

    device.set_hung(true);
    let err = pacer.draw_frame(device.as_ref(), &mut clear_image).unwrap_err();

    assert!(matches!(err, Error::DeviceTimeout(_)));
    assert_eq!(pacer.state(), FrameState::WaitSlot);
    assert_eq!(pacer.frame_number(), 2);

    device.set_hung(false);
    teardown(&device, pacer);
}

#[test]
fn test_recorder_error_rearms_slot() {
    let (device, mut pacer) = setup();
    let fence0 = pacer.slot(0).unwrap().render_fence();

    let err = pacer
        .draw_frame(device.as_ref(), &mut |_: &mut FrameRecording<'_>| -> Result<()> {
            Err(Error::InvalidResource("missing pipeline".to_string()))
        })
        .unwrap_err();
    assert!(matches!(err, Error::InvalidResource(_)));
    assert_eq!(pacer.frame_number(), 0);

    // The slot fence still signals, so the retry does not time out
    pacer.draw_frame(device.as_ref(), &mut clear_image).unwrap();
    pacer.draw_frame(device.as_ref(), &mut clear_image).unwrap();
    pacer.draw_frame(device.as_ref(), &mut clear_image).unwrap();

    assert!(device.events().contains(&DeviceEvent::Submitted {
        command_buffers: Vec::new(),
        wait_semaphores: vec![pacer.slot(0).unwrap().image_available()],
        signal_semaphores: Vec::new(),
        fence: Some(fence0),
    }));
    assert!(device.sync_violations().is_empty());

    teardown(&device, pacer);
}

#[test]
fn test_recorder_error_releases_image_through_resize() {
    let (device, mut pacer) = setup();
    let mut failing = fail_recording;

    pacer.draw_frame(device.as_ref(), &mut failing).unwrap_err();

    assert_eq!(pacer.swapchain().outstanding_images(), 1);
    assert!(pacer.resize_requested());
    assert_eq!(pacer.state(), FrameState::ResizePending);

    assert!(pacer.resize(device.as_ref(), &Extent2D::new(640, 480), |_, _| Ok(())).unwrap());
    assert_eq!(pacer.swapchain().outstanding_images(), 0);

    // Repeated failures never run the swapchain out of images
    for _ in 0..4 {
        pacer.draw_frame(device.as_ref(), &mut failing).unwrap_err();
        pacer.resize(device.as_ref(), &Extent2D::new(640, 480), |_, _| Ok(())).unwrap();
    }
    pacer.draw_frame(device.as_ref(), &mut clear_image).unwrap();
    assert!(device.sync_violations().is_empty());

    teardown(&device, pacer);
}

#[test]
fn test_submit_failure_is_propagated() {
    let (device, mut pacer) = setup();
    device.inject_submit_failure(Error::BackendError("device lost".to_string()));

    let err = pacer.draw_frame(device.as_ref(), &mut clear_image).unwrap_err();

    assert!(matches!(err, Error::BackendError(_)));
    assert_eq!(pacer.state(), FrameState::Submit);
    // Recording completed before the submission failed
    let cmds: Vec<_> = device
        .events()
        .into_iter()
        .filter(|e| matches!(e, DeviceEvent::CommandRecorded { command: RecordedCommand::ClearColor { .. }, .. }))
        .collect();
    assert_eq!(cmds.len(), 1);

    pacer.shutdown(device.as_ref());
}

#[test]
fn test_draw_after_shutdown_is_rejected() {
    let (device, mut pacer) = setup();
    device.wait_idle().unwrap();
    pacer.shutdown(device.as_ref());
    pacer.shutdown(device.as_ref());

    assert_eq!(pacer.state(), FrameState::Shutdown);
    assert!(matches!(
        pacer.draw_frame(device.as_ref(), &mut clear_image),
        Err(Error::InvalidResource(_))
    ));
    assert_eq!(device.live_object_count(), 0);
}
