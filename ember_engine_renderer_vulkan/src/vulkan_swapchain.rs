/// VulkanSwapchain - Vulkan implementation of the Swapchain trait

use ash::vk;
use ember_engine::ember::gpu::{AcquireOutcome, Extent2D, Image, ImageView, PresentOutcome, Semaphore, Swapchain};
use ember_engine::ember::{Error, Result};
use ember_engine::{engine_debug, engine_error};
use std::sync::Arc;
use std::time::Duration;

use crate::vulkan_convert::{image_from_vk, image_view_from_vk, semaphore_to_vk, timeout_to_vk, vk_error};
use crate::vulkan_device::VulkanDevice;

const LOG_SOURCE: &str = "ember::vulkan";

/// Vulkan swapchain
///
/// Presents to the surface owned by the `VulkanDevice`. Images and views are
/// rebuilt by `recreate`; the frame pacer guarantees the device is idle first.
pub struct VulkanSwapchain {
    /// Keeps the device (and its surface) alive until the swapchain is gone
    device: Arc<VulkanDevice>,

    swapchain: vk::SwapchainKHR,
    swapchain_loader: ash::khr::swapchain::Device,
    swapchain_images: Vec<vk::Image>,
    swapchain_image_views: Vec<vk::ImageView>,
    swapchain_format: vk::SurfaceFormatKHR,
    swapchain_extent: vk::Extent2D,
}

impl VulkanSwapchain {
    /// Create a swapchain at `extent` on the device's surface
    ///
    /// The surface's own extent wins when it reports one.
    pub fn new(device: Arc<VulkanDevice>, extent: Extent2D) -> Result<Self> {
        let swapchain_loader = ash::khr::swapchain::Device::new(device.instance(), device.raw());

        let surface_formats = unsafe {
            device
                .surface_loader()
                .get_physical_device_surface_formats(device.physical_device(), device.surface())
                .map_err(|e| setup_failed("Failed to get surface formats", e))?
        };
        let swapchain_format = surface_formats
            .iter()
            .copied()
            .find(|f| f.format == vk::Format::B8G8R8A8_UNORM || f.format == vk::Format::R8G8B8A8_UNORM)
            .or_else(|| surface_formats.first().copied())
            .ok_or_else(|| {
                engine_error!(LOG_SOURCE, "Surface reports no formats");
                Error::InitializationFailed("Surface reports no formats".to_string())
            })?;

        let mut swapchain = Self {
            device,
            swapchain: vk::SwapchainKHR::null(),
            swapchain_loader,
            swapchain_images: Vec::new(),
            swapchain_image_views: Vec::new(),
            swapchain_format,
            swapchain_extent: vk::Extent2D::default(),
        };
        swapchain.build(extent)?;
        Ok(swapchain)
    }

    /// Create the swapchain (replacing the current one) and its image views
    fn build(&mut self, extent: Extent2D) -> Result<()> {
        let device = Arc::clone(&self.device);
        unsafe {
            let surface_capabilities = device
                .surface_loader()
                .get_physical_device_surface_capabilities(device.physical_device(), device.surface())
                .map_err(|e| setup_failed("Failed to get surface capabilities", e))?;

            // Choose extent
            let extent = if surface_capabilities.current_extent.width != u32::MAX {
                surface_capabilities.current_extent
            } else {
                vk::Extent2D {
                    width: extent.width.clamp(
                        surface_capabilities.min_image_extent.width,
                        surface_capabilities.max_image_extent.width,
                    ),
                    height: extent.height.clamp(
                        surface_capabilities.min_image_extent.height,
                        surface_capabilities.max_image_extent.height,
                    ),
                }
            };

            let image_count = surface_capabilities.min_image_count + 1;
            let image_count = if surface_capabilities.max_image_count > 0 {
                image_count.min(surface_capabilities.max_image_count)
            } else {
                image_count
            };

            let old_swapchain = self.swapchain;
            let swapchain_create_info = vk::SwapchainCreateInfoKHR::default()
                .surface(device.surface())
                .min_image_count(image_count)
                .image_format(self.swapchain_format.format)
                .image_color_space(self.swapchain_format.color_space)
                .image_extent(extent)
                .image_array_layers(1)
                .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
                .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
                .pre_transform(surface_capabilities.current_transform)
                .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
                .present_mode(vk::PresentModeKHR::FIFO)
                .clipped(true)
                .old_swapchain(old_swapchain);

            let swapchain = self.swapchain_loader
                .create_swapchain(&swapchain_create_info, None)
                .map_err(|e| setup_failed("Failed to create swapchain", e))?;

            if old_swapchain != vk::SwapchainKHR::null() {
                self.swapchain_loader.destroy_swapchain(old_swapchain, None);
            }
            self.swapchain = swapchain;
            self.swapchain_extent = extent;

            self.swapchain_images = self.swapchain_loader
                .get_swapchain_images(swapchain)
                .map_err(|e| setup_failed("Failed to get swapchain images", e))?;

            for &image in &self.swapchain_images {
                let create_info = vk::ImageViewCreateInfo::default()
                    .image(image)
                    .view_type(vk::ImageViewType::TYPE_2D)
                    .format(self.swapchain_format.format)
                    .components(vk::ComponentMapping {
                        r: vk::ComponentSwizzle::IDENTITY,
                        g: vk::ComponentSwizzle::IDENTITY,
                        b: vk::ComponentSwizzle::IDENTITY,
                        a: vk::ComponentSwizzle::IDENTITY,
                    })
                    .subresource_range(vk::ImageSubresourceRange {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        base_mip_level: 0,
                        level_count: 1,
                        base_array_layer: 0,
                        layer_count: 1,
                    });

                let image_view = device.raw()
                    .create_image_view(&create_info, None)
                    .map_err(|e| setup_failed("Failed to create swapchain image view", e))?;
                self.swapchain_image_views.push(image_view);
            }
        }

        engine_debug!(
            LOG_SOURCE,
            "Swapchain built: {}x{}, {} images",
            self.swapchain_extent.width,
            self.swapchain_extent.height,
            self.swapchain_images.len()
        );
        Ok(())
    }

    fn destroy_image_views(&mut self) {
        for image_view in self.swapchain_image_views.drain(..) {
            unsafe { self.device.raw().destroy_image_view(image_view, None) };
        }
    }

    pub fn format(&self) -> vk::Format {
        self.swapchain_format.format
    }
}

fn setup_failed(what: &str, e: vk::Result) -> Error {
    engine_error!(LOG_SOURCE, "{}: {:?}", what, e);
    Error::InitializationFailed(format!("{}: {:?}", what, e))
}

impl Swapchain for VulkanSwapchain {
    fn acquire_next_image(&mut self, signal: Semaphore, timeout: Duration) -> Result<AcquireOutcome> {
        let acquired = unsafe {
            self.swapchain_loader.acquire_next_image(
                self.swapchain,
                timeout_to_vk(timeout),
                semaphore_to_vk(signal),
                vk::Fence::null(),
            )
        };

        // A suboptimal image is still acquired (and its semaphore signaled),
        // so it is used; present reports the surface as obsolete afterwards
        match acquired {
            Ok((image_index, _suboptimal)) => Ok(AcquireOutcome::Image(image_index)),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::Obsolete),
            Err(vk::Result::NOT_READY) => Err(Error::DeviceTimeout("Swapchain image acquisition".to_string())),
            Err(e) => Err(vk_error("Acquire swapchain image", e)),
        }
    }

    fn present(&mut self, image_index: u32, wait: Semaphore) -> Result<PresentOutcome> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];
        let wait_semaphores = [semaphore_to_vk(wait)];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let presented = unsafe {
            self.swapchain_loader.queue_present(self.device.present_queue(), &present_info)
        };
        match presented {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::Obsolete),
            Err(e) => Err(vk_error("Present swapchain image", e)),
        }
    }

    fn recreate(&mut self, extent: Extent2D) -> Result<()> {
        self.destroy_image_views();
        self.build(extent)
    }

    fn image_count(&self) -> usize {
        self.swapchain_images.len()
    }

    fn extent(&self) -> Extent2D {
        Extent2D::new(self.swapchain_extent.width, self.swapchain_extent.height)
    }

    fn image(&self, index: u32) -> Option<Image> {
        self.swapchain_images.get(index as usize).copied().map(image_from_vk)
    }

    fn image_view(&self, index: u32) -> Option<ImageView> {
        self.swapchain_image_views.get(index as usize).copied().map(image_view_from_vk)
    }
}

impl Drop for VulkanSwapchain {
    fn drop(&mut self) {
        unsafe {
            self.device.raw().device_wait_idle().ok();
        }
        self.destroy_image_views();
        if self.swapchain != vk::SwapchainKHR::null() {
            unsafe { self.swapchain_loader.destroy_swapchain(self.swapchain, None) };
        }
    }
}
