/// VulkanDevice - Vulkan implementation of the GpuDevice trait

use ash::vk;
use ember_engine::ember::gpu::{
    Buffer, BufferCopy, BufferDesc, CommandBuffer, CommandPool, DescriptorBinding, DescriptorPool,
    DescriptorResource, DescriptorSet, DescriptorSetLayout, DescriptorWrite, Extent2D, Fence, Filter,
    GpuDevice, Image, ImageDesc, ImageFormat, ImageLayout, ImageView, PoolSizeRatio, Sampler, Semaphore,
    SubmitInfo,
};
use ember_engine::ember::{Config, Error, Result};
use ember_engine::{engine_debug, engine_err, engine_error, engine_info, engine_warn};
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use rustc_hash::FxHashMap;
use std::ffi::CString;
use std::mem::ManuallyDrop;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::vulkan_convert::*;

const LOG_SOURCE: &str = "ember::vulkan";

/// Buffer handle together with the memory bound to it
struct BufferAllocation {
    buffer: vk::Buffer,
    allocation: Allocation,
    size: u64,
}

/// Image handle together with its memory and format
struct ImageAllocation {
    image: vk::Image,
    allocation: Allocation,
    format: ImageFormat,
}

/// Vulkan device
///
/// Owns the instance, the window surface, the logical device and the memory
/// allocator. Every Vulkan object the engine creates goes through this type;
/// the swapchain borrows the surface and queues from it.
pub struct VulkanDevice {
    /// Vulkan entry (kept alive for the loaders)
    _entry: ash::Entry,
    instance: ash::Instance,
    physical_device: vk::PhysicalDevice,
    device: ash::Device,

    graphics_queue: vk::Queue,
    graphics_queue_family: u32,
    /// Present queue (may be the graphics queue)
    present_queue: vk::Queue,

    /// Window surface, destroyed after every swapchain built on it
    surface: vk::SurfaceKHR,
    surface_loader: ash::khr::surface::Instance,

    /// GPU memory allocator
    /// Wrapped in ManuallyDrop so its memory is released BEFORE the device is destroyed
    allocator: ManuallyDrop<Mutex<Allocator>>,
    /// Live buffers keyed by raw handle
    buffers: Mutex<FxHashMap<u64, BufferAllocation>>,
    /// Live images keyed by raw handle (swapchain images are not in here)
    images: Mutex<FxHashMap<u64, ImageAllocation>>,

    /// Debug utils loader and messenger (validation only)
    debug_utils: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
}

impl VulkanDevice {
    /// Create the instance, surface, logical device and allocator for `window`
    ///
    /// # Errors
    ///
    /// `Error::InitializationFailed` when any Vulkan setup step fails.
    pub fn new<W: HasDisplayHandle + HasWindowHandle>(window: &W, config: &Config) -> Result<Self> {
        let validation = config.enable_validation && cfg!(feature = "vulkan-validation");
        if config.enable_validation && !validation {
            engine_warn!(LOG_SOURCE, "Validation requested but the vulkan-validation feature is disabled");
        }

        unsafe {
            let entry = ash::Entry::load()
                .map_err(|e| init_failed("Failed to load Vulkan library", e))?;

            let app_name = CString::new(config.app_name.as_str())
                .map_err(|e| init_failed("Invalid application name", e))?;
            let app_info = vk::ApplicationInfo::default()
                .application_name(&app_name)
                .application_version(vk::make_api_version(0, 1, 0, 0))
                .engine_name(c"Ember")
                .engine_version(vk::make_api_version(0, 0, 1, 0))
                .api_version(vk::API_VERSION_1_3);

            let display_handle = window.display_handle()
                .map_err(|e| init_failed("Failed to get display handle", e))?;
            let mut extension_names = ash_window::enumerate_required_extensions(display_handle.as_raw())
                .map_err(|e| init_failed("Failed to get required extensions", e))?
                .to_vec();

            if validation {
                extension_names.push(ash::ext::debug_utils::NAME.as_ptr());
            }

            let layer_names = if validation {
                vec![c"VK_LAYER_KHRONOS_validation".as_ptr()]
            } else {
                vec![]
            };

            let create_info = vk::InstanceCreateInfo::default()
                .application_info(&app_info)
                .enabled_layer_names(&layer_names)
                .enabled_extension_names(&extension_names);

            let instance = entry
                .create_instance(&create_info, None)
                .map_err(|e| init_failed("Failed to create Vulkan instance", e))?;

            let debug_utils = if validation {
                Some(Self::create_debug_messenger(&entry, &instance, config)?)
            } else {
                None
            };

            let window_handle = window.window_handle()
                .map_err(|e| init_failed("Failed to get window handle", e))?;
            let surface = ash_window::create_surface(
                &entry,
                &instance,
                display_handle.as_raw(),
                window_handle.as_raw(),
                None,
            )
            .map_err(|e| init_failed("Failed to create surface", e))?;

            let surface_loader = ash::khr::surface::Instance::new(&entry, &instance);

            // Pick Physical Device
            let physical_device = instance
                .enumerate_physical_devices()
                .map_err(|e| init_failed("Failed to enumerate physical devices", e))?
                .into_iter()
                .next()
                .ok_or_else(|| missing("No Vulkan-capable GPU found"))?;

            // Find Queue Families
            let queue_families = instance.get_physical_device_queue_family_properties(physical_device);

            let graphics_family_index = queue_families
                .iter()
                .position(|qf| qf.queue_flags.contains(vk::QueueFlags::GRAPHICS))
                .map(|i| i as u32)
                .ok_or_else(|| missing("No graphics queue family found"))?;

            let supports_present = |i: u32| {
                surface_loader
                    .get_physical_device_surface_support(physical_device, i, surface)
                    .unwrap_or(false)
            };
            let present_family_index = if supports_present(graphics_family_index) {
                graphics_family_index
            } else {
                (0..queue_families.len() as u32)
                    .find(|&i| supports_present(i))
                    .ok_or_else(|| missing("No present queue family found"))?
            };

            // Create Logical Device
            let queue_priorities = [1.0];
            let mut queue_create_infos = vec![
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(graphics_family_index)
                    .queue_priorities(&queue_priorities),
            ];
            if present_family_index != graphics_family_index {
                queue_create_infos.push(
                    vk::DeviceQueueCreateInfo::default()
                        .queue_family_index(present_family_index)
                        .queue_priorities(&queue_priorities),
                );
            }

            let device_extension_names = [ash::khr::swapchain::NAME.as_ptr()];

            let device_create_info = vk::DeviceCreateInfo::default()
                .queue_create_infos(&queue_create_infos)
                .enabled_extension_names(&device_extension_names);

            let device = instance
                .create_device(physical_device, &device_create_info, None)
                .map_err(|e| init_failed("Failed to create logical device", e))?;

            let graphics_queue = device.get_device_queue(graphics_family_index, 0);
            let present_queue = device.get_device_queue(present_family_index, 0);

            let allocator = Allocator::new(&AllocatorCreateDesc {
                instance: instance.clone(),
                device: device.clone(),
                physical_device,
                debug_settings: Default::default(),
                buffer_device_address: false,
                allocation_sizes: Default::default(),
            })
            .map_err(|e| init_failed("Failed to create GPU allocator", e))?;

            engine_info!(
                LOG_SOURCE,
                "Vulkan device ready (graphics family {}, present family {}, validation {})",
                graphics_family_index,
                present_family_index,
                validation
            );

            Ok(Self {
                _entry: entry,
                instance,
                physical_device,
                device,
                graphics_queue,
                graphics_queue_family: graphics_family_index,
                present_queue,
                surface,
                surface_loader,
                allocator: ManuallyDrop::new(Mutex::new(allocator)),
                buffers: Mutex::new(FxHashMap::default()),
                images: Mutex::new(FxHashMap::default()),
                debug_utils,
            })
        }
    }

    #[cfg(feature = "vulkan-validation")]
    unsafe fn create_debug_messenger(
        entry: &ash::Entry,
        instance: &ash::Instance,
        config: &Config,
    ) -> Result<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)> {
        let debug_utils = ash::ext::debug_utils::Instance::new(entry, instance);
        crate::debug::init_debug_stats();

        let debug_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(crate::debug::severity_flags(config.debug_severity))
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(crate::debug::vulkan_debug_callback));

        let messenger = debug_utils
            .create_debug_utils_messenger(&debug_info, None)
            .map_err(|e| init_failed("Failed to create debug messenger", e))?;

        Ok((debug_utils, messenger))
    }

    #[cfg(not(feature = "vulkan-validation"))]
    unsafe fn create_debug_messenger(
        _entry: &ash::Entry,
        _instance: &ash::Instance,
        _config: &Config,
    ) -> Result<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)> {
        Err(missing("Debug messenger requires the vulkan-validation feature"))
    }

    // ===== ACCESSORS FOR THE SWAPCHAIN =====

    pub(crate) fn raw(&self) -> &ash::Device {
        &self.device
    }

    pub(crate) fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    pub(crate) fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub(crate) fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    pub(crate) fn surface(&self) -> vk::SurfaceKHR {
        self.surface
    }

    pub(crate) fn surface_loader(&self) -> &ash::khr::surface::Instance {
        &self.surface_loader
    }

    fn lock_buffers(&self) -> Result<MutexGuard<'_, FxHashMap<u64, BufferAllocation>>> {
        self.buffers
            .lock()
            .map_err(|_| engine_err!(LOG_SOURCE, "Buffer table lock poisoned"))
    }

    fn lock_images(&self) -> Result<MutexGuard<'_, FxHashMap<u64, ImageAllocation>>> {
        self.images
            .lock()
            .map_err(|_| engine_err!(LOG_SOURCE, "Image table lock poisoned"))
    }

    /// Aspect of an image created here; anything else (swapchain images) is color
    fn aspect_of(&self, image: Image) -> vk::ImageAspectFlags {
        match self.images.lock() {
            Ok(images) => images
                .get(&image.as_raw())
                .map_or(vk::ImageAspectFlags::COLOR, |entry| image_aspect_to_vk(entry.format)),
            Err(_) => vk::ImageAspectFlags::COLOR,
        }
    }

    fn lock_allocator(&self) -> Result<MutexGuard<'_, Allocator>> {
        self.allocator
            .lock()
            .map_err(|_| engine_err!(LOG_SOURCE, "GPU allocator lock poisoned"))
    }
}

fn init_failed(what: &str, cause: impl std::fmt::Display) -> Error {
    engine_error!(LOG_SOURCE, "{}: {}", what, cause);
    Error::InitializationFailed(format!("{}: {}", what, cause))
}

fn missing(what: &str) -> Error {
    engine_error!(LOG_SOURCE, "{}", what);
    Error::InitializationFailed(what.to_string())
}

impl GpuDevice for VulkanDevice {
    // ===== DESCRIPTORS =====

    fn create_descriptor_pool(&self, max_sets: u32, ratios: &[PoolSizeRatio]) -> Result<DescriptorPool> {
        let pool_sizes: Vec<vk::DescriptorPoolSize> = ratios
            .iter()
            .map(|ratio| vk::DescriptorPoolSize {
                ty: descriptor_kind_to_vk(ratio.kind),
                descriptor_count: ratio.descriptor_count(max_sets),
            })
            .collect();
        let info = vk::DescriptorPoolCreateInfo::default()
            .pool_sizes(&pool_sizes)
            .max_sets(max_sets);

        unsafe {
            self.device
                .create_descriptor_pool(&info, None)
                .map(descriptor_pool_from_vk)
                .map_err(|e| vk_error("Create descriptor pool", e))
        }
    }

    fn reset_descriptor_pool(&self, pool: DescriptorPool) -> Result<()> {
        unsafe {
            self.device
                .reset_descriptor_pool(descriptor_pool_to_vk(pool), vk::DescriptorPoolResetFlags::empty())
                .map_err(|e| vk_error("Reset descriptor pool", e))
        }
    }

    fn destroy_descriptor_pool(&self, pool: DescriptorPool) {
        unsafe { self.device.destroy_descriptor_pool(descriptor_pool_to_vk(pool), None) }
    }

    fn allocate_descriptor_set(&self, pool: DescriptorPool, layout: DescriptorSetLayout) -> Result<DescriptorSet> {
        let layouts = [descriptor_set_layout_to_vk(layout)];
        let info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(descriptor_pool_to_vk(pool))
            .set_layouts(&layouts);

        let sets = unsafe {
            self.device
                .allocate_descriptor_sets(&info)
                .map_err(|e| vk_error("Allocate descriptor set", e))?
        };
        sets.into_iter()
            .next()
            .map(descriptor_set_from_vk)
            .ok_or_else(|| engine_err!(LOG_SOURCE, "Descriptor set allocation returned no set"))
    }

    fn create_descriptor_set_layout(&self, bindings: &[DescriptorBinding]) -> Result<DescriptorSetLayout> {
        let vk_bindings: Vec<vk::DescriptorSetLayoutBinding> = bindings
            .iter()
            .map(|binding| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(binding.binding)
                    .descriptor_type(descriptor_kind_to_vk(binding.kind))
                    .descriptor_count(binding.count)
                    .stage_flags(stage_flags_to_vk(binding.stages))
            })
            .collect();
        let info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&vk_bindings);

        unsafe {
            self.device
                .create_descriptor_set_layout(&info, None)
                .map(descriptor_set_layout_from_vk)
                .map_err(|e| vk_error("Create descriptor set layout", e))
        }
    }

    fn destroy_descriptor_set_layout(&self, layout: DescriptorSetLayout) {
        unsafe { self.device.destroy_descriptor_set_layout(descriptor_set_layout_to_vk(layout), None) }
    }

    fn update_descriptor_set(&self, set: DescriptorSet, writes: &[DescriptorWrite]) -> Result<()> {
        // Infos are collected first so every write can point into a stable slice
        let buffer_infos: Vec<vk::DescriptorBufferInfo> = writes
            .iter()
            .map(|write| match write.resource {
                DescriptorResource::Buffer { buffer, offset, range } => vk::DescriptorBufferInfo::default()
                    .buffer(buffer_to_vk(buffer))
                    .offset(offset)
                    .range(range),
                DescriptorResource::Image { .. } => vk::DescriptorBufferInfo::default(),
            })
            .collect();
        let image_infos: Vec<vk::DescriptorImageInfo> = writes
            .iter()
            .map(|write| match write.resource {
                DescriptorResource::Image { view, sampler, layout } => vk::DescriptorImageInfo::default()
                    .image_view(image_view_to_vk(view))
                    .sampler(sampler_to_vk(sampler))
                    .image_layout(image_layout_to_vk(layout)),
                DescriptorResource::Buffer { .. } => vk::DescriptorImageInfo::default(),
            })
            .collect();

        let vk_writes: Vec<vk::WriteDescriptorSet> = writes
            .iter()
            .enumerate()
            .map(|(i, write)| {
                let vk_write = vk::WriteDescriptorSet::default()
                    .dst_set(descriptor_set_to_vk(set))
                    .dst_binding(write.binding)
                    .descriptor_type(descriptor_kind_to_vk(write.kind));
                match write.resource {
                    DescriptorResource::Buffer { .. } => vk_write.buffer_info(std::slice::from_ref(&buffer_infos[i])),
                    DescriptorResource::Image { .. } => vk_write.image_info(std::slice::from_ref(&image_infos[i])),
                }
            })
            .collect();

        unsafe { self.device.update_descriptor_sets(&vk_writes, &[]) };
        Ok(())
    }

    // ===== COMMANDS =====

    fn create_command_pool(&self) -> Result<CommandPool> {
        let info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(self.graphics_queue_family)
            .flags(vk::CommandPoolCreateFlags::TRANSIENT | vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

        unsafe {
            self.device
                .create_command_pool(&info, None)
                .map(command_pool_from_vk)
                .map_err(|e| vk_error("Create command pool", e))
        }
    }

    fn destroy_command_pool(&self, pool: CommandPool) {
        unsafe { self.device.destroy_command_pool(command_pool_to_vk(pool), None) }
    }

    fn allocate_command_buffer(&self, pool: CommandPool) -> Result<CommandBuffer> {
        let info = vk::CommandBufferAllocateInfo::default()
            .command_pool(command_pool_to_vk(pool))
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let buffers = unsafe {
            self.device
                .allocate_command_buffers(&info)
                .map_err(|e| vk_error("Allocate command buffer", e))?
        };
        buffers
            .into_iter()
            .next()
            .map(command_buffer_from_vk)
            .ok_or_else(|| engine_err!(LOG_SOURCE, "Command buffer allocation returned no buffer"))
    }

    fn reset_command_buffer(&self, command_buffer: CommandBuffer) -> Result<()> {
        unsafe {
            self.device
                .reset_command_buffer(command_buffer_to_vk(command_buffer), vk::CommandBufferResetFlags::empty())
                .map_err(|e| vk_error("Reset command buffer", e))
        }
    }

    fn begin_command_buffer(&self, command_buffer: CommandBuffer, one_time_submit: bool) -> Result<()> {
        let flags = if one_time_submit {
            vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT
        } else {
            vk::CommandBufferUsageFlags::empty()
        };
        let info = vk::CommandBufferBeginInfo::default().flags(flags);

        unsafe {
            self.device
                .begin_command_buffer(command_buffer_to_vk(command_buffer), &info)
                .map_err(|e| vk_error("Begin command buffer", e))
        }
    }

    fn end_command_buffer(&self, command_buffer: CommandBuffer) -> Result<()> {
        unsafe {
            self.device
                .end_command_buffer(command_buffer_to_vk(command_buffer))
                .map_err(|e| vk_error("End command buffer", e))
        }
    }

    fn cmd_copy_buffer(&self, command_buffer: CommandBuffer, src: Buffer, dst: Buffer, region: BufferCopy) {
        let region = vk::BufferCopy {
            src_offset: region.src_offset,
            dst_offset: region.dst_offset,
            size: region.size,
        };
        unsafe {
            self.device.cmd_copy_buffer(
                command_buffer_to_vk(command_buffer),
                buffer_to_vk(src),
                buffer_to_vk(dst),
                &[region],
            );
        }
    }

    fn cmd_transition_image(
        &self,
        command_buffer: CommandBuffer,
        image: Image,
        old_layout: ImageLayout,
        new_layout: ImageLayout,
    ) {
        // Full pipeline barrier on every transition
        let barrier = vk::ImageMemoryBarrier::default()
            .old_layout(image_layout_to_vk(old_layout))
            .new_layout(image_layout_to_vk(new_layout))
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image_to_vk(image))
            .subresource_range(subresource_range(self.aspect_of(image)))
            .src_access_mask(vk::AccessFlags::MEMORY_WRITE)
            .dst_access_mask(vk::AccessFlags::MEMORY_WRITE | vk::AccessFlags::MEMORY_READ);

        unsafe {
            self.device.cmd_pipeline_barrier(
                command_buffer_to_vk(command_buffer),
                vk::PipelineStageFlags::ALL_COMMANDS,
                vk::PipelineStageFlags::ALL_COMMANDS,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        }
    }

    fn cmd_copy_buffer_to_image(&self, command_buffer: CommandBuffer, src: Buffer, dst: Image, extent: Extent2D) {
        let region = vk::BufferImageCopy::default()
            .buffer_offset(0)
            .buffer_row_length(0)
            .buffer_image_height(0)
            .image_subresource(vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            })
            .image_extent(vk::Extent3D { width: extent.width, height: extent.height, depth: 1 });

        unsafe {
            self.device.cmd_copy_buffer_to_image(
                command_buffer_to_vk(command_buffer),
                buffer_to_vk(src),
                image_to_vk(dst),
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
        }
    }

    fn cmd_clear_color_image(&self, command_buffer: CommandBuffer, image: Image, layout: ImageLayout, color: [f32; 4]) {
        let clear_value = vk::ClearColorValue { float32: color };
        unsafe {
            self.device.cmd_clear_color_image(
                command_buffer_to_vk(command_buffer),
                image_to_vk(image),
                image_layout_to_vk(layout),
                &clear_value,
                &[subresource_range(vk::ImageAspectFlags::COLOR)],
            );
        }
    }

    // ===== SYNCHRONIZATION =====

    fn create_fence(&self, signaled: bool) -> Result<Fence> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let info = vk::FenceCreateInfo::default().flags(flags);

        unsafe {
            self.device
                .create_fence(&info, None)
                .map(fence_from_vk)
                .map_err(|e| vk_error("Create fence", e))
        }
    }

    fn destroy_fence(&self, fence: Fence) {
        unsafe { self.device.destroy_fence(fence_to_vk(fence), None) }
    }

    fn wait_fence(&self, fence: Fence, timeout: Duration) -> Result<()> {
        unsafe {
            self.device
                .wait_for_fences(&[fence_to_vk(fence)], true, timeout_to_vk(timeout))
                .map_err(|e| vk_error("Wait for fence", e))
        }
    }

    fn reset_fence(&self, fence: Fence) -> Result<()> {
        unsafe {
            self.device
                .reset_fences(&[fence_to_vk(fence)])
                .map_err(|e| vk_error("Reset fence", e))
        }
    }

    fn create_semaphore(&self) -> Result<Semaphore> {
        let info = vk::SemaphoreCreateInfo::default();
        unsafe {
            self.device
                .create_semaphore(&info, None)
                .map(semaphore_from_vk)
                .map_err(|e| vk_error("Create semaphore", e))
        }
    }

    fn destroy_semaphore(&self, semaphore: Semaphore) {
        unsafe { self.device.destroy_semaphore(semaphore_to_vk(semaphore), None) }
    }

    // ===== QUEUE =====

    fn submit(&self, info: &SubmitInfo<'_>) -> Result<()> {
        let command_buffers: Vec<vk::CommandBuffer> =
            info.command_buffers.iter().copied().map(command_buffer_to_vk).collect();
        let wait_semaphores: Vec<vk::Semaphore> =
            info.wait_semaphores.iter().map(|&(semaphore, _)| semaphore_to_vk(semaphore)).collect();
        let wait_stages: Vec<vk::PipelineStageFlags> =
            info.wait_semaphores.iter().map(|&(_, stage)| pipeline_stage_to_vk(stage)).collect();
        let signal_semaphores: Vec<vk::Semaphore> =
            info.signal_semaphores.iter().copied().map(semaphore_to_vk).collect();

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);
        let fence = info.fence.map_or(vk::Fence::null(), fence_to_vk);

        unsafe {
            self.device
                .queue_submit(self.graphics_queue, &[submit_info], fence)
                .map_err(|e| vk_error("Queue submit", e))
        }
    }

    fn wait_idle(&self) -> Result<()> {
        unsafe {
            self.device
                .device_wait_idle()
                .map_err(|e| vk_error("Wait idle", e))
        }
    }

    // ===== BUFFERS =====

    fn create_buffer(&self, desc: &BufferDesc) -> Result<Buffer> {
        let buffer_create_info = vk::BufferCreateInfo::default()
            .size(desc.size)
            .usage(buffer_usage_to_vk(desc.usage))
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        unsafe {
            let buffer = self.device
                .create_buffer(&buffer_create_info, None)
                .map_err(|e| vk_error("Create buffer", e))?;

            let requirements = self.device.get_buffer_memory_requirements(buffer);
            let allocated = self.lock_allocator().and_then(|mut allocator| {
                allocator
                    .allocate(&AllocationCreateDesc {
                        name: "buffer",
                        requirements,
                        location: memory_location_to_gpu_allocator(desc.location),
                        linear: true,
                        allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                    })
                    .map_err(|_e| {
                        let size_mb = requirements.size as f64 / (1024.0 * 1024.0);
                        engine_error!(LOG_SOURCE, "Out of GPU memory for buffer (required: {:.2} MB)", size_mb);
                        Error::OutOfMemory
                    })
            });
            let allocation = match allocated {
                Ok(allocation) => allocation,
                Err(err) => {
                    self.device.destroy_buffer(buffer, None);
                    return Err(err);
                }
            };

            if let Err(e) = self.device.bind_buffer_memory(buffer, allocation.memory(), allocation.offset()) {
                if let Ok(mut allocator) = self.allocator.lock() {
                    allocator.free(allocation).ok();
                }
                self.device.destroy_buffer(buffer, None);
                return Err(vk_error("Bind buffer memory", e));
            }

            let handle = buffer_from_vk(buffer);
            self.lock_buffers()?.insert(
                handle.as_raw(),
                BufferAllocation { buffer, allocation, size: desc.size },
            );
            Ok(handle)
        }
    }

    fn write_buffer(&self, buffer: Buffer, offset: u64, data: &[u8]) -> Result<()> {
        let mut buffers = self.lock_buffers()?;
        let entry = buffers
            .get_mut(&buffer.as_raw())
            .ok_or_else(|| Error::InvalidResource(format!("unknown buffer {:?}", buffer)))?;

        let end = offset
            .checked_add(data.len() as u64)
            .filter(|&end| end <= entry.size)
            .ok_or_else(|| {
                Error::InvalidResource(format!(
                    "write of {} bytes at offset {} exceeds buffer size {}",
                    data.len(),
                    offset,
                    entry.size
                ))
            })?;

        let mapped = entry
            .allocation
            .mapped_slice_mut()
            .ok_or_else(|| Error::InvalidResource("Buffer is not CPU-accessible".to_string()))?;
        mapped[offset as usize..end as usize].copy_from_slice(data);
        Ok(())
    }

    fn destroy_buffer(&self, buffer: Buffer) {
        let removed = match self.buffers.lock() {
            Ok(mut buffers) => buffers.remove(&buffer.as_raw()),
            Err(_) => None,
        };
        let Some(entry) = removed else {
            engine_warn!(LOG_SOURCE, "destroy_buffer: unknown buffer {:?}", buffer);
            return;
        };

        unsafe {
            // Don't bail if the lock fails - the buffer handle still has to go
            if let Ok(mut allocator) = self.allocator.lock() {
                allocator.free(entry.allocation).ok();
            }
            self.device.destroy_buffer(entry.buffer, None);
        }
    }

    // ===== IMAGES =====

    fn create_image(&self, desc: &ImageDesc) -> Result<Image> {
        let image_create_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(image_format_to_vk(desc.format))
            .extent(vk::Extent3D {
                width: desc.extent.width,
                height: desc.extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(image_usage_to_vk(desc.usage))
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        unsafe {
            let image = self.device
                .create_image(&image_create_info, None)
                .map_err(|e| vk_error("Create image", e))?;

            let requirements = self.device.get_image_memory_requirements(image);
            let allocated = self.lock_allocator().and_then(|mut allocator| {
                allocator
                    .allocate(&AllocationCreateDesc {
                        name: "image",
                        requirements,
                        location: gpu_allocator::MemoryLocation::GpuOnly,
                        linear: false,
                        allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                    })
                    .map_err(|_e| {
                        let size_mb = requirements.size as f64 / (1024.0 * 1024.0);
                        engine_error!(
                            LOG_SOURCE,
                            "Out of GPU memory for image (size: {}x{}, {:.2} MB)",
                            desc.extent.width,
                            desc.extent.height,
                            size_mb
                        );
                        Error::OutOfMemory
                    })
            });
            let allocation = match allocated {
                Ok(allocation) => allocation,
                Err(err) => {
                    self.device.destroy_image(image, None);
                    return Err(err);
                }
            };

            if let Err(e) = self.device.bind_image_memory(image, allocation.memory(), allocation.offset()) {
                if let Ok(mut allocator) = self.allocator.lock() {
                    allocator.free(allocation).ok();
                }
                self.device.destroy_image(image, None);
                return Err(vk_error("Bind image memory", e));
            }

            let handle = image_from_vk(image);
            self.lock_images()?.insert(
                handle.as_raw(),
                ImageAllocation { image, allocation, format: desc.format },
            );
            Ok(handle)
        }
    }

    fn destroy_image(&self, image: Image) {
        let removed = match self.images.lock() {
            Ok(mut images) => images.remove(&image.as_raw()),
            Err(_) => None,
        };
        let Some(entry) = removed else {
            engine_warn!(LOG_SOURCE, "destroy_image: unknown image {:?}", image);
            return;
        };

        unsafe {
            if let Ok(mut allocator) = self.allocator.lock() {
                allocator.free(entry.allocation).ok();
            }
            self.device.destroy_image(entry.image, None);
        }
    }

    fn create_image_view(&self, image: Image, format: ImageFormat) -> Result<ImageView> {
        let view_create_info = vk::ImageViewCreateInfo::default()
            .image(image_to_vk(image))
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(image_format_to_vk(format))
            .components(vk::ComponentMapping {
                r: vk::ComponentSwizzle::IDENTITY,
                g: vk::ComponentSwizzle::IDENTITY,
                b: vk::ComponentSwizzle::IDENTITY,
                a: vk::ComponentSwizzle::IDENTITY,
            })
            .subresource_range(subresource_range(image_aspect_to_vk(format)));

        unsafe {
            self.device
                .create_image_view(&view_create_info, None)
                .map(image_view_from_vk)
                .map_err(|e| vk_error("Create image view", e))
        }
    }

    fn destroy_image_view(&self, view: ImageView) {
        unsafe { self.device.destroy_image_view(image_view_to_vk(view), None) }
    }

    fn create_sampler(&self, filter: Filter) -> Result<Sampler> {
        let (texel_filter, mipmap_mode) = filter_to_vk(filter);
        let create_info = vk::SamplerCreateInfo::default()
            .mag_filter(texel_filter)
            .min_filter(texel_filter)
            .mipmap_mode(mipmap_mode)
            .address_mode_u(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_v(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .min_lod(0.0)
            .max_lod(vk::LOD_CLAMP_NONE)
            .border_color(vk::BorderColor::FLOAT_OPAQUE_BLACK)
            .compare_enable(false)
            .compare_op(vk::CompareOp::ALWAYS)
            .anisotropy_enable(false)
            .max_anisotropy(1.0)
            .unnormalized_coordinates(false);

        unsafe {
            self.device
                .create_sampler(&create_info, None)
                .map(sampler_from_vk)
                .map_err(|e| vk_error("Create sampler", e))
        }
    }

    fn destroy_sampler(&self, sampler: Sampler) {
        unsafe { self.device.destroy_sampler(sampler_to_vk(sampler), None) }
    }
}

fn subresource_range(aspect_mask: vk::ImageAspectFlags) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask,
        base_mip_level: 0,
        level_count: vk::REMAINING_MIP_LEVELS,
        base_array_layer: 0,
        layer_count: vk::REMAINING_ARRAY_LAYERS,
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        unsafe {
            self.device.device_wait_idle().ok();

            // 1. Free buffers and images nobody released
            let leaked: Vec<BufferAllocation> = match self.buffers.get_mut() {
                Ok(buffers) => buffers.drain().map(|(_, entry)| entry).collect(),
                Err(_) => Vec::new(),
            };
            if !leaked.is_empty() {
                engine_warn!(LOG_SOURCE, "Releasing {} buffers still alive at device teardown", leaked.len());
            }
            for entry in leaked {
                if let Ok(allocator) = self.allocator.get_mut() {
                    allocator.free(entry.allocation).ok();
                }
                self.device.destroy_buffer(entry.buffer, None);
            }

            let leaked_images: Vec<ImageAllocation> = match self.images.get_mut() {
                Ok(images) => images.drain().map(|(_, entry)| entry).collect(),
                Err(_) => Vec::new(),
            };
            if !leaked_images.is_empty() {
                engine_warn!(LOG_SOURCE, "Releasing {} images still alive at device teardown", leaked_images.len());
            }
            for entry in leaked_images {
                if let Ok(allocator) = self.allocator.get_mut() {
                    allocator.free(entry.allocation).ok();
                }
                self.device.destroy_image(entry.image, None);
            }

            // 2. Drop allocator: free VkDeviceMemory pages BEFORE destroying device
            ManuallyDrop::drop(&mut self.allocator);

            // 3. Destroy device, surface, debug messenger and instance
            self.device.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);
            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
        engine_debug!(LOG_SOURCE, "Vulkan device destroyed");
    }
}
