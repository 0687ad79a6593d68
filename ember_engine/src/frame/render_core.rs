/// RenderCore - single owner of the renderer's lifecycle state
///
/// Owns the device, the frame pacer (and through it the frame slots), the
/// immediate submitter, the long-lived descriptor allocator and the global
/// cleanup registry. Subsystems never reach for globals: every operation gets
/// the device from here.
///
/// Teardown is ordered: device idle, frame slots, global descriptor pools,
/// then everything registered in the global registry (newest first).

use std::sync::Arc;
use bytemuck::Pod;
use crate::config::Config;
use crate::descriptor::{DescriptorAllocator, DescriptorLayoutBuilder};
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::frame::cleanup::{CleanupRegistry, Disposal};
use crate::frame::immediate::ImmediateSubmitter;
use crate::frame::pacer::{FrameOutcome, FramePacer, FrameRecorder};
use crate::frame::upload::{self, AllocatedImage, MeshBuffers};
use crate::gpu::device::GpuDevice;
use crate::gpu::swapchain::{DrawableSize, Swapchain};
use crate::gpu::types::{
    Buffer, BufferUsage, CommandBuffer, DescriptorSet, DescriptorSetLayout, Extent2D, Filter, ImageDesc,
    Sampler, ShaderStageFlags,
};
use crate::{engine_error, engine_info};

/// Lifetime counters of a `RenderCore`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderStats {
    pub frames_presented: u64,
    /// Frames abandoned because the surface was obsolete at acquisition
    pub frames_aborted: u64,
    pub surface_recreations: u64,
    /// Descriptor pools created by the frame and global allocators
    pub descriptor_pools_created: usize,
    pub immediate_submissions: u64,
}

pub struct RenderCore<S: Swapchain> {
    pacer: FramePacer<S>,
    immediate: ImmediateSubmitter,
    global_descriptors: DescriptorAllocator,
    global_cleanup: CleanupRegistry,
    device: Arc<dyn GpuDevice>,
    config: Config,
    shut_down: bool,
}

impl<S: Swapchain> RenderCore<S> {
    /// Build the immediate submitter, the global allocator and the frame slots
    ///
    /// # Errors
    ///
    /// `Error::InvalidResource` for a rejected configuration,
    /// `Error::InitializationFailed` when a setup object cannot be created.
    /// Anything created before the failure is destroyed.
    pub fn new(device: Arc<dyn GpuDevice>, swapchain: S, config: Config) -> Result<Self> {
        config
            .validate()
            .map_err(|err| Engine::log_error("ember::RenderCore", err))?;

        let setup_failed = |what: &str, err: Error| {
            Engine::log_error(
                "ember::RenderCore",
                Error::InitializationFailed(format!("{}: {}", what, err)),
            )
        };

        let mut global_cleanup = CleanupRegistry::new();
        let immediate = match ImmediateSubmitter::new(device.as_ref(), config.immediate_timeout, &mut global_cleanup) {
            Ok(immediate) => immediate,
            Err(err) => {
                global_cleanup.flush(device.as_ref());
                return Err(setup_failed("immediate submitter", err));
            }
        };

        let mut global_descriptors = DescriptorAllocator::with_growth(
            config.descriptor_growth_factor,
            config.descriptor_max_sets_per_pool,
        );
        if let Err(err) = global_descriptors.initialize(
            device.as_ref(),
            config.global_descriptor_sets,
            &config.global_descriptor_ratios,
        ) {
            global_cleanup.flush(device.as_ref());
            return Err(setup_failed("global descriptor allocator", err));
        }

        let pacer = match FramePacer::new(device.as_ref(), swapchain, &config) {
            Ok(pacer) => pacer,
            Err(err) => {
                global_descriptors.destroy_all(device.as_ref());
                global_cleanup.flush(device.as_ref());
                return Err(setup_failed("frame slots", err));
            }
        };

        engine_info!("ember::RenderCore", "Render core initialized for '{}'", config.app_name);

        Ok(Self {
            pacer,
            immediate,
            global_descriptors,
            global_cleanup,
            device,
            config,
            shut_down: false,
        })
    }

    /// Draw one frame with `recorder`
    pub fn draw_frame<R>(&mut self, recorder: &mut R) -> Result<FrameOutcome>
    where
        R: FrameRecorder + ?Sized,
    {
        self.ensure_running()?;
        self.pacer.draw_frame(self.device.as_ref(), recorder)
    }

    pub fn request_resize(&mut self) {
        self.pacer.request_resize();
    }

    pub fn resize_requested(&self) -> bool {
        self.pacer.resize_requested()
    }

    /// Recreate the surface at the window size if a resize is pending
    ///
    /// `rebuild` is called with the idle device and the new extent so
    /// size-dependent targets (see `frame::create_image`) can be recreated.
    pub fn resize_if_requested<F>(&mut self, window: &dyn DrawableSize, rebuild: F) -> Result<bool>
    where
        F: FnMut(&dyn GpuDevice, Extent2D) -> Result<()>,
    {
        self.ensure_running()?;
        self.pacer.resize(self.device.as_ref(), window, rebuild)
    }

    /// Record and run commands synchronously
    pub fn immediate_submit<F>(&mut self, record: F) -> Result<()>
    where
        F: FnOnce(&dyn GpuDevice, CommandBuffer) -> Result<()>,
    {
        self.ensure_running()?;
        self.immediate.submit(self.device.as_ref(), record)
    }

    /// Upload a mesh; its buffers live until shutdown
    pub fn upload_mesh<V: Pod>(&mut self, vertices: &[V], indices: &[u32]) -> Result<MeshBuffers> {
        self.ensure_running()?;
        let mesh = upload::upload_mesh(self.device.as_ref(), &mut self.immediate, vertices, indices)?;
        mesh.register_cleanup(&mut self.global_cleanup);
        Ok(mesh)
    }

    /// Upload `data` into a GPU-only buffer that lives until shutdown
    pub fn upload_buffer(&mut self, data: &[u8], usage: BufferUsage) -> Result<Buffer> {
        self.ensure_running()?;
        let buffer = upload::upload_buffer(self.device.as_ref(), &mut self.immediate, data, usage)?;
        self.global_cleanup.add_cleaner(Disposal::Buffer(buffer));
        Ok(buffer)
    }

    /// Upload texels into a sampled image that lives until shutdown
    pub fn upload_image(&mut self, data: &[u8], desc: &ImageDesc) -> Result<AllocatedImage> {
        self.ensure_running()?;
        let image = upload::upload_image(self.device.as_ref(), &mut self.immediate, data, desc)?;
        image.register_cleanup(&mut self.global_cleanup);
        Ok(image)
    }

    /// Create an image and its view that live until shutdown
    ///
    /// Targets that follow the surface size are better created with
    /// `frame::create_image` and replaced from the resize callback.
    pub fn create_image(&mut self, desc: &ImageDesc) -> Result<AllocatedImage> {
        self.ensure_running()?;
        let image = upload::create_image(self.device.as_ref(), desc)?;
        image.register_cleanup(&mut self.global_cleanup);
        Ok(image)
    }

    /// Create a sampler that lives until shutdown
    pub fn create_sampler(&mut self, filter: Filter) -> Result<Sampler> {
        self.ensure_running()?;
        let sampler = self.device.create_sampler(filter)?;
        self.global_cleanup.add_cleaner(Disposal::Sampler(sampler));
        Ok(sampler)
    }

    /// Create a descriptor set layout that lives until shutdown
    pub fn create_descriptor_layout(
        &mut self,
        builder: &DescriptorLayoutBuilder,
        stages: ShaderStageFlags,
    ) -> Result<DescriptorSetLayout> {
        self.ensure_running()?;
        let layout = builder.build(self.device.as_ref(), stages)?;
        self.global_cleanup.add_cleaner(Disposal::DescriptorSetLayout(layout));
        Ok(layout)
    }

    /// Allocate a descriptor set from the long-lived allocator
    pub fn allocate_global_set(&mut self, layout: DescriptorSetLayout) -> Result<DescriptorSet> {
        self.ensure_running()?;
        self.global_descriptors.allocate(self.device.as_ref(), layout)
    }

    /// Destroy `disposal` at shutdown
    pub fn defer_global(&mut self, disposal: Disposal) {
        self.global_cleanup.add_cleaner(disposal);
    }

    /// Tear everything down in order; later calls do nothing
    ///
    /// Teardown continues when the idle wait fails; that error is returned
    /// once everything has been released.
    pub fn shutdown(&mut self) -> Result<()> {
        if self.shut_down {
            return Ok(());
        }
        self.shut_down = true;

        let device = self.device.as_ref();
        let idle = device.wait_idle();
        if let Err(err) = &idle {
            engine_error!("ember::RenderCore", "Device did not go idle before teardown: {}", err);
        }

        self.pacer.shutdown(device);
        self.global_descriptors.destroy_all(device);
        let released = self.global_cleanup.flush(device);

        engine_info!(
            "ember::RenderCore",
            "Render core shut down ({} frames, {} global resources released)",
            self.pacer.frame_number(),
            released
        );
        idle
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    pub fn stats(&self) -> RenderStats {
        let pacer = self.pacer.stats();
        let frame_pools: usize = self.pacer.slots().iter().map(|slot| slot.descriptors().pools_created()).sum();
        RenderStats {
            frames_presented: pacer.frames_presented,
            frames_aborted: pacer.frames_aborted,
            surface_recreations: pacer.recreations,
            descriptor_pools_created: frame_pools + self.global_descriptors.pools_created(),
            immediate_submissions: self.immediate.submissions(),
        }
    }

    pub fn device(&self) -> &dyn GpuDevice {
        self.device.as_ref()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn pacer(&self) -> &FramePacer<S> {
        &self.pacer
    }

    pub fn swapchain(&self) -> &S {
        self.pacer.swapchain()
    }

    pub fn swapchain_mut(&mut self) -> &mut S {
        self.pacer.swapchain_mut()
    }

    pub fn global_descriptors(&self) -> &DescriptorAllocator {
        &self.global_descriptors
    }

    pub fn global_cleanup(&self) -> &CleanupRegistry {
        &self.global_cleanup
    }

    fn ensure_running(&self) -> Result<()> {
        if self.shut_down {
            return Err(Engine::log_error(
                "ember::RenderCore",
                Error::InvalidResource("render core is shut down".to_string()),
            ));
        }
        Ok(())
    }
}

impl<S: Swapchain> Drop for RenderCore<S> {
    fn drop(&mut self) {
        // Errors are already logged by shutdown
        let _ = self.shutdown();
    }
}

#[cfg(test)]
#[path = "render_core_tests.rs"]
mod tests;
