/*!
# Ember Engine - Vulkan Backend

Vulkan implementation of the `GpuDevice` and `Swapchain` traits of
`ember_engine`, built on `ash` for the Vulkan bindings and `gpu-allocator`
for buffer memory.

```no_run
# use std::sync::Arc;
# use ember_engine::ember::{Config, RenderCore, Result};
# use ember_engine::ember::gpu::Extent2D;
# use ember_engine_renderer_vulkan::{VulkanDevice, VulkanSwapchain};
# fn run(window: &winit::window::Window) -> Result<()> {
let config = Config::default();
let device = Arc::new(VulkanDevice::new(window, &config)?);
let swapchain = VulkanSwapchain::new(Arc::clone(&device), Extent2D::new(1700, 900))?;
let core = RenderCore::new(device, swapchain, config)?;
# Ok(())
# }
```
*/

mod vulkan_convert;
mod vulkan_device;
mod vulkan_swapchain;
#[cfg(feature = "vulkan-validation")]
mod debug;

pub use vulkan_device::VulkanDevice;
pub use vulkan_swapchain::VulkanSwapchain;

// Re-export debug utilities
#[cfg(feature = "vulkan-validation")]
pub use debug::{get_validation_stats, print_validation_stats_report, ValidationStats};
