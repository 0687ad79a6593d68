pub mod device;
pub mod headless;
pub mod swapchain;
pub mod types;

pub use device::GpuDevice;
pub use headless::{DeviceEvent, HeadlessDevice, HeadlessSwapchain};
pub use swapchain::{AcquireOutcome, DrawableSize, PresentOutcome, Swapchain};
pub use types::*;
