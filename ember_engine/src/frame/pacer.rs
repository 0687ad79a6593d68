/// FramePacer - double-buffered frame loop with resize recovery
///
/// Each call to `draw_frame` walks one frame slot through:
///
/// ```text
/// WaitSlot -> ReclaimSlot -> AcquireImage -> Record -> Submit -> Present -> Advance
///                                 |                                  |
///                                 +---------> ResizePending <--------+
/// ```
///
/// The slot fence is only reset once an image has been acquired, so a frame
/// aborted at acquisition leaves the slot exactly as it found it. Surface
/// obsolescence never travels through the error channel: it sets the resize
/// flag and is reported through `FrameOutcome`.

use std::time::Duration;
use crate::config::Config;
use crate::descriptor::DescriptorAllocator;
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::frame::cleanup::{CleanupRegistry, Disposal};
use crate::frame::slot::{FrameSlot, FRAMES_IN_FLIGHT};
use crate::gpu::device::GpuDevice;
use crate::gpu::swapchain::{AcquireOutcome, DrawableSize, PresentOutcome, Swapchain};
use crate::gpu::types::{
    CommandBuffer, DescriptorSet, DescriptorSetLayout, Extent2D, Image, ImageView, PipelineStage,
    SubmitInfo,
};
use crate::{engine_debug, engine_error, engine_info, engine_warn};

/// Phase of the frame loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    WaitSlot,
    ReclaimSlot,
    AcquireImage,
    Record,
    Submit,
    Present,
    Advance,
    ResizePending,
    Shutdown,
}

/// What happened to a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// The frame was submitted and handed to the presentation engine
    ///
    /// The surface may still have been reported obsolete at present time;
    /// check `resize_requested`.
    Presented { frame_number: u64, image_index: u32 },
    /// The surface was obsolete at acquisition; nothing was recorded
    ResizePending,
}

/// Frame loop counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PacerStats {
    pub frames_presented: u64,
    pub frames_aborted: u64,
    pub recreations: u64,
}

/// Everything a recorder may touch while building one frame
pub struct FrameRecording<'a> {
    device: &'a dyn GpuDevice,
    command_buffer: CommandBuffer,
    image_index: u32,
    image: Image,
    image_view: ImageView,
    extent: Extent2D,
    frame_number: u64,
    slot_index: usize,
    descriptors: &'a mut DescriptorAllocator,
    cleanup: &'a mut CleanupRegistry,
}

impl<'a> FrameRecording<'a> {
    pub fn device(&self) -> &'a dyn GpuDevice {
        self.device
    }

    /// Command buffer in the recording state
    pub fn command_buffer(&self) -> CommandBuffer {
        self.command_buffer
    }

    pub fn image_index(&self) -> u32 {
        self.image_index
    }

    pub fn image(&self) -> Image {
        self.image
    }

    pub fn image_view(&self) -> ImageView {
        self.image_view
    }

    pub fn extent(&self) -> Extent2D {
        self.extent
    }

    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    pub fn slot_index(&self) -> usize {
        self.slot_index
    }

    /// Allocate a descriptor set valid until this slot is reused
    pub fn allocate_descriptor_set(&mut self, layout: DescriptorSetLayout) -> Result<DescriptorSet> {
        self.descriptors.allocate(self.device, layout)
    }

    /// Destroy `disposal` once the GPU is done with this frame
    pub fn defer(&mut self, disposal: Disposal) {
        self.cleanup.add_cleaner(disposal);
    }

    pub fn descriptors(&mut self) -> &mut DescriptorAllocator {
        &mut *self.descriptors
    }

    pub fn cleanup(&mut self) -> &mut CleanupRegistry {
        &mut *self.cleanup
    }
}

/// Rendering collaborator invoked once per frame
///
/// Implemented for any `FnMut(&mut FrameRecording<'_>) -> Result<()>`.
pub trait FrameRecorder {
    fn record(&mut self, frame: &mut FrameRecording<'_>) -> Result<()>;
}

impl<F> FrameRecorder for F
where
    F: FnMut(&mut FrameRecording<'_>) -> Result<()>,
{
    fn record(&mut self, frame: &mut FrameRecording<'_>) -> Result<()> {
        self(frame)
    }
}

pub struct FramePacer<S: Swapchain> {
    swapchain: S,
    slots: Vec<FrameSlot>,
    frame_number: u64,
    state: FrameState,
    resize_requested: bool,
    frame_timeout: Duration,
    acquire_timeout: Duration,
    stats: PacerStats,
}

impl<S: Swapchain> FramePacer<S> {
    /// Create `FRAMES_IN_FLIGHT` frame slots around `swapchain`
    pub fn new(device: &dyn GpuDevice, swapchain: S, config: &Config) -> Result<Self> {
        let mut slots = Vec::with_capacity(FRAMES_IN_FLIGHT);
        for index in 0..FRAMES_IN_FLIGHT {
            match FrameSlot::new(device, index, config) {
                Ok(slot) => slots.push(slot),
                Err(err) => {
                    for slot in slots.iter_mut() {
                        slot.destroy(device);
                    }
                    return Err(err);
                }
            }
        }

        engine_info!(
            "ember::FramePacer",
            "Frame pacer ready: {} frames in flight, {} swapchain images",
            FRAMES_IN_FLIGHT,
            swapchain.image_count()
        );

        Ok(Self {
            swapchain,
            slots,
            frame_number: 0,
            state: FrameState::WaitSlot,
            resize_requested: false,
            frame_timeout: config.frame_timeout,
            acquire_timeout: config.acquire_timeout,
            stats: PacerStats::default(),
        })
    }

    /// Run one frame through the loop
    ///
    /// # Errors
    ///
    /// - `Error::DeviceTimeout` if the slot fence does not signal in time (fatal)
    /// - any error returned by the recorder, after the slot has been re-armed.
    ///   The acquired image is never presented, so a resize is requested:
    ///   recreating the surface is what returns the image to the swapchain.
    /// - `Error::InvalidResource` if the swapchain hands out an image index it
    ///   does not have (fatal; the slot's image-available semaphore is left
    ///   signaled)
    /// - device errors from reset, submission or presentation (fatal)
    pub fn draw_frame<R>(&mut self, device: &dyn GpuDevice, recorder: &mut R) -> Result<FrameOutcome>
    where
        R: FrameRecorder + ?Sized,
    {
        if self.state == FrameState::Shutdown {
            return Err(Engine::log_error(
                "ember::FramePacer",
                Error::InvalidResource("draw_frame called after shutdown".to_string()),
            ));
        }

        let frame_number = self.frame_number;
        let slot_index = (frame_number % FRAMES_IN_FLIGHT as u64) as usize;
        let slot = &mut self.slots[slot_index];

        self.state = FrameState::WaitSlot;
        if let Err(err) = device.wait_fence(slot.render_fence(), self.frame_timeout) {
            engine_error!(
                "ember::FramePacer",
                "Frame {} (slot {}): fence wait failed: {}",
                frame_number,
                slot_index,
                err
            );
            return Err(err);
        }

        self.state = FrameState::ReclaimSlot;
        slot.reclaim(device)?;

        self.state = FrameState::AcquireImage;
        let image_index = match self.swapchain.acquire_next_image(slot.image_available(), self.acquire_timeout)? {
            AcquireOutcome::Image(index) => index,
            AcquireOutcome::Obsolete => {
                engine_info!(
                    "ember::FramePacer",
                    "Surface obsolete at acquire, frame {} aborted",
                    frame_number
                );
                self.resize_requested = true;
                self.stats.frames_aborted += 1;
                self.state = FrameState::ResizePending;
                return Ok(FrameOutcome::ResizePending);
            }
        };
        // An index outside the swapchain is a backend bug; image_available stays signaled
        let (image, image_view) = match (self.swapchain.image(image_index), self.swapchain.image_view(image_index)) {
            (Some(image), Some(view)) if (image_index as usize) < self.swapchain.image_count() => (image, view),
            _ => {
                return Err(Engine::log_error(
                    "ember::FramePacer",
                    Error::InvalidResource(format!(
                        "swapchain returned image {} of {}",
                        image_index,
                        self.swapchain.image_count()
                    )),
                ));
            }
        };

        let fence = slot.render_fence();
        let command_buffer = slot.command_buffer();
        let image_available = slot.image_available();
        let render_finished = slot.render_finished();
        device.reset_fence(fence)?;

        self.state = FrameState::Record;
        let extent = self.swapchain.extent();
        let (descriptors, cleanup) = slot.resources_mut();
        let mut recording = FrameRecording {
            device,
            command_buffer,
            image_index,
            image,
            image_view,
            extent,
            frame_number,
            slot_index,
            descriptors,
            cleanup,
        };
        if let Err(err) = record_commands(device, command_buffer, &mut recording, recorder) {
            // The fence is unsignaled: hand the queue an empty batch so the slot stays usable
            let rearm = device.submit(&SubmitInfo {
                command_buffers: &[],
                wait_semaphores: &[(image_available, PipelineStage::ColorAttachmentOutput)],
                signal_semaphores: &[],
                fence: Some(fence),
            });
            if let Err(rearm_err) = rearm {
                engine_error!("ember::FramePacer", "Failed to re-arm slot {}: {}", slot_index, rearm_err);
            }
            engine_warn!(
                "ember::FramePacer",
                "Frame {} recording failed, image {} released through a resize: {}",
                frame_number,
                image_index,
                err
            );
            self.resize_requested = true;
            self.state = FrameState::ResizePending;
            return Err(err);
        }

        self.state = FrameState::Submit;
        let submitted = device.submit(&SubmitInfo {
            command_buffers: &[command_buffer],
            wait_semaphores: &[(image_available, PipelineStage::ColorAttachmentOutput)],
            signal_semaphores: &[render_finished],
            fence: Some(fence),
        });
        if let Err(err) = submitted {
            engine_error!("ember::FramePacer", "Frame {} submission failed: {}", frame_number, err);
            return Err(err);
        }

        self.state = FrameState::Present;
        if self.swapchain.present(image_index, render_finished)? == PresentOutcome::Obsolete {
            engine_info!("ember::FramePacer", "Surface obsolete at present (frame {})", frame_number);
            self.resize_requested = true;
        }

        self.state = FrameState::Advance;
        self.frame_number += 1;
        self.stats.frames_presented += 1;
        self.state = if self.resize_requested { FrameState::ResizePending } else { FrameState::WaitSlot };

        Ok(FrameOutcome::Presented { frame_number, image_index })
    }

    /// Flag the surface for recreation (e.g. on a window resize event)
    pub fn request_resize(&mut self) {
        if !self.resize_requested {
            engine_debug!("ember::FramePacer", "Resize requested");
        }
        self.resize_requested = true;
        if self.state != FrameState::Shutdown {
            self.state = FrameState::ResizePending;
        }
    }

    pub fn resize_requested(&self) -> bool {
        self.resize_requested
    }

    /// Recreate the surface if a resize is pending
    ///
    /// Waits for the device to go idle, recreates the swapchain at the
    /// window's drawable size and calls `rebuild` with the idle device and the
    /// new extent so size-dependent targets can follow. While the window has
    /// no area the resize stays pending.
    ///
    /// Returns `true` when the surface was recreated.
    pub fn resize<F>(&mut self, device: &dyn GpuDevice, window: &dyn DrawableSize, mut rebuild: F) -> Result<bool>
    where
        F: FnMut(&dyn GpuDevice, Extent2D) -> Result<()>,
    {
        if !self.resize_requested || self.state == FrameState::Shutdown {
            return Ok(false);
        }

        let extent = window.drawable_size();
        if extent.is_empty() {
            engine_debug!("ember::FramePacer", "Drawable size is {}x{}, resize deferred", extent.width, extent.height);
            return Ok(false);
        }

        device.wait_idle()?;
        self.swapchain.recreate(extent)?;
        rebuild(device, extent)?;

        self.resize_requested = false;
        self.stats.recreations += 1;
        self.state = FrameState::WaitSlot;
        engine_info!("ember::FramePacer", "Surface recreated at {}x{}", extent.width, extent.height);
        Ok(true)
    }

    /// Destroy every frame slot (device must be idle); idempotent
    pub fn shutdown(&mut self, device: &dyn GpuDevice) {
        if self.state == FrameState::Shutdown {
            return;
        }
        for slot in self.slots.iter_mut() {
            slot.destroy(device);
        }
        self.state = FrameState::Shutdown;
        engine_debug!("ember::FramePacer", "Frame slots destroyed after {} frames", self.frame_number);
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    /// Frames completed so far; the next frame uses slot `frame_number % FRAMES_IN_FLIGHT`
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    pub fn current_slot_index(&self) -> usize {
        (self.frame_number % FRAMES_IN_FLIGHT as u64) as usize
    }

    pub fn slot(&self, index: usize) -> Option<&FrameSlot> {
        self.slots.get(index)
    }

    pub fn slots(&self) -> &[FrameSlot] {
        &self.slots
    }

    pub fn stats(&self) -> PacerStats {
        self.stats
    }

    pub fn swapchain(&self) -> &S {
        &self.swapchain
    }

    pub fn swapchain_mut(&mut self) -> &mut S {
        &mut self.swapchain
    }
}

impl<S: Swapchain> Drop for FramePacer<S> {
    fn drop(&mut self) {
        if self.state != FrameState::Shutdown {
            engine_warn!(
                "ember::FramePacer",
                "Dropped without shutdown; {} frame slots leaked",
                self.slots.len()
            );
        }
    }
}

/// Reset, begin, record and end the slot command buffer
fn record_commands<R>(
    device: &dyn GpuDevice,
    command_buffer: CommandBuffer,
    recording: &mut FrameRecording<'_>,
    recorder: &mut R,
) -> Result<()>
where
    R: FrameRecorder + ?Sized,
{
    device.reset_command_buffer(command_buffer)?;
    device.begin_command_buffer(command_buffer, true)?;
    let recorded = recorder.record(recording);
    let ended = device.end_command_buffer(command_buffer);
    recorded.and(ended)
}

#[cfg(test)]
#[path = "pacer_tests.rs"]
mod tests;
