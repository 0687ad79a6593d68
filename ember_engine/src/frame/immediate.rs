/// ImmediateSubmitter - blocking one-shot GPU submissions outside the frame loop
///
/// Used for uploads and other setup work. `submit` returns only once the GPU
/// has finished the recorded commands, so anything they read may be destroyed
/// right after it returns.

use std::time::Duration;
use crate::engine::Engine;
use crate::error::Result;
use crate::frame::cleanup::{CleanupRegistry, Disposal};
use crate::gpu::device::GpuDevice;
use crate::gpu::types::{CommandBuffer, CommandPool, Fence, SubmitInfo};
use crate::engine_debug;

pub struct ImmediateSubmitter {
    command_pool: CommandPool,
    command_buffer: CommandBuffer,
    fence: Fence,
    timeout: Duration,
    submissions: u64,
}

impl ImmediateSubmitter {
    /// Create the dedicated command pool, command buffer and fence
    ///
    /// The pool and the fence are handed to `cleanup`, which owns their
    /// destruction from then on.
    pub fn new(device: &dyn GpuDevice, timeout: Duration, cleanup: &mut CleanupRegistry) -> Result<Self> {
        let command_pool = device.create_command_pool()?;
        cleanup.add_cleaner(Disposal::CommandPool(command_pool));

        let command_buffer = device.allocate_command_buffer(command_pool)?;
        let fence = device.create_fence(true)?;
        cleanup.add_cleaner(Disposal::Fence(fence));

        engine_debug!("ember::ImmediateSubmitter", "Immediate submitter ready (timeout {:?})", timeout);

        Ok(Self {
            command_pool,
            command_buffer,
            fence,
            timeout,
            submissions: 0,
        })
    }

    /// Record with `record` and block until the GPU has executed it
    ///
    /// # Errors
    ///
    /// Recording, submission and wait errors are returned as is and never
    /// retried; a wait past the timeout is `Error::DeviceTimeout`.
    pub fn submit<F>(&mut self, device: &dyn GpuDevice, record: F) -> Result<()>
    where
        F: FnOnce(&dyn GpuDevice, CommandBuffer) -> Result<()>,
    {
        let command_buffer = self.command_buffer;

        device.reset_fence(self.fence)?;
        device.reset_command_buffer(command_buffer)?;
        device.begin_command_buffer(command_buffer, true)?;
        let recorded = record(device, command_buffer);
        device.end_command_buffer(command_buffer)?;
        recorded?;

        device.submit(&SubmitInfo {
            command_buffers: &[command_buffer],
            fence: Some(self.fence),
            ..Default::default()
        })?;
        device
            .wait_fence(self.fence, self.timeout)
            .map_err(|err| Engine::log_error("ember::ImmediateSubmitter", err))?;

        self.submissions += 1;
        Ok(())
    }

    /// Completed submissions
    pub fn submissions(&self) -> u64 {
        self.submissions
    }

    pub fn command_pool(&self) -> CommandPool {
        self.command_pool
    }

    pub fn fence(&self) -> Fence {
        self.fence
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[cfg(test)]
#[path = "immediate_tests.rs"]
mod tests;
