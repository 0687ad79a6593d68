/// Conversions between engine GPU types and their Vulkan counterparts

use ash::vk;
use ash::vk::Handle;
use ember_engine::ember::gpu::{
    Buffer, BufferUsage, CommandBuffer, CommandPool, DescriptorKind, DescriptorPool, DescriptorSet,
    DescriptorSetLayout, Fence, Filter, Image, ImageFormat, ImageLayout, ImageUsage, ImageView,
    MemoryLocation, PipelineStage, Sampler, Semaphore, ShaderStageFlags,
};
use ember_engine::ember::Error;
use ember_engine::{engine_err, engine_error};

// ===== HANDLES =====

// Not every handle kind travels in both directions

macro_rules! handle_conversions {
    ($($engine:ident <=> $vk:ident : $to_vk:ident, $from_vk:ident;)*) => {
        $(
            #[allow(dead_code)]
            pub(crate) fn $to_vk(handle: $engine) -> vk::$vk {
                vk::$vk::from_raw(handle.as_raw())
            }

            #[allow(dead_code)]
            pub(crate) fn $from_vk(handle: vk::$vk) -> $engine {
                $engine::from_raw(handle.as_raw())
            }
        )*
    };
}

handle_conversions! {
    DescriptorPool <=> DescriptorPool : descriptor_pool_to_vk, descriptor_pool_from_vk;
    DescriptorSet <=> DescriptorSet : descriptor_set_to_vk, descriptor_set_from_vk;
    DescriptorSetLayout <=> DescriptorSetLayout : descriptor_set_layout_to_vk, descriptor_set_layout_from_vk;
    CommandPool <=> CommandPool : command_pool_to_vk, command_pool_from_vk;
    CommandBuffer <=> CommandBuffer : command_buffer_to_vk, command_buffer_from_vk;
    Fence <=> Fence : fence_to_vk, fence_from_vk;
    Semaphore <=> Semaphore : semaphore_to_vk, semaphore_from_vk;
    Buffer <=> Buffer : buffer_to_vk, buffer_from_vk;
    Image <=> Image : image_to_vk, image_from_vk;
    ImageView <=> ImageView : image_view_to_vk, image_view_from_vk;
    Sampler <=> Sampler : sampler_to_vk, sampler_from_vk;
}

// ===== ENUMS AND FLAGS =====

pub(crate) fn descriptor_kind_to_vk(kind: DescriptorKind) -> vk::DescriptorType {
    match kind {
        DescriptorKind::Sampler => vk::DescriptorType::SAMPLER,
        DescriptorKind::CombinedImageSampler => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        DescriptorKind::SampledImage => vk::DescriptorType::SAMPLED_IMAGE,
        DescriptorKind::StorageImage => vk::DescriptorType::STORAGE_IMAGE,
        DescriptorKind::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
        DescriptorKind::StorageBuffer => vk::DescriptorType::STORAGE_BUFFER,
        DescriptorKind::UniformBufferDynamic => vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
        DescriptorKind::StorageBufferDynamic => vk::DescriptorType::STORAGE_BUFFER_DYNAMIC,
    }
}

pub(crate) fn stage_flags_to_vk(flags: ShaderStageFlags) -> vk::ShaderStageFlags {
    let mut vk_flags = vk::ShaderStageFlags::empty();
    if flags.contains(ShaderStageFlags::VERTEX) { vk_flags |= vk::ShaderStageFlags::VERTEX; }
    if flags.contains(ShaderStageFlags::FRAGMENT) { vk_flags |= vk::ShaderStageFlags::FRAGMENT; }
    if flags.contains(ShaderStageFlags::COMPUTE) { vk_flags |= vk::ShaderStageFlags::COMPUTE; }
    vk_flags
}

pub(crate) fn buffer_usage_to_vk(usage: BufferUsage) -> vk::BufferUsageFlags {
    let mut vk_flags = vk::BufferUsageFlags::empty();
    if usage.contains(BufferUsage::VERTEX) { vk_flags |= vk::BufferUsageFlags::VERTEX_BUFFER; }
    if usage.contains(BufferUsage::INDEX) { vk_flags |= vk::BufferUsageFlags::INDEX_BUFFER; }
    if usage.contains(BufferUsage::UNIFORM) { vk_flags |= vk::BufferUsageFlags::UNIFORM_BUFFER; }
    if usage.contains(BufferUsage::STORAGE) { vk_flags |= vk::BufferUsageFlags::STORAGE_BUFFER; }
    if usage.contains(BufferUsage::TRANSFER_SRC) { vk_flags |= vk::BufferUsageFlags::TRANSFER_SRC; }
    if usage.contains(BufferUsage::TRANSFER_DST) { vk_flags |= vk::BufferUsageFlags::TRANSFER_DST; }
    vk_flags
}

pub(crate) fn memory_location_to_gpu_allocator(location: MemoryLocation) -> gpu_allocator::MemoryLocation {
    match location {
        MemoryLocation::GpuOnly => gpu_allocator::MemoryLocation::GpuOnly,
        MemoryLocation::CpuToGpu => gpu_allocator::MemoryLocation::CpuToGpu,
        MemoryLocation::GpuToCpu => gpu_allocator::MemoryLocation::GpuToCpu,
    }
}

pub(crate) fn image_layout_to_vk(layout: ImageLayout) -> vk::ImageLayout {
    match layout {
        ImageLayout::Undefined => vk::ImageLayout::UNDEFINED,
        ImageLayout::General => vk::ImageLayout::GENERAL,
        ImageLayout::ShaderReadOnly => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        ImageLayout::ColorAttachment => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        ImageLayout::DepthAttachment => vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        ImageLayout::TransferDst => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        ImageLayout::PresentSrc => vk::ImageLayout::PRESENT_SRC_KHR,
    }
}

pub(crate) fn image_format_to_vk(format: ImageFormat) -> vk::Format {
    match format {
        ImageFormat::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
        ImageFormat::Bgra8Unorm => vk::Format::B8G8R8A8_UNORM,
        ImageFormat::Rgba16Float => vk::Format::R16G16B16A16_SFLOAT,
        ImageFormat::D32Float => vk::Format::D32_SFLOAT,
    }
}

pub(crate) fn image_aspect_to_vk(format: ImageFormat) -> vk::ImageAspectFlags {
    if format.is_depth() {
        vk::ImageAspectFlags::DEPTH
    } else {
        vk::ImageAspectFlags::COLOR
    }
}

pub(crate) fn image_usage_to_vk(usage: ImageUsage) -> vk::ImageUsageFlags {
    let mut vk_flags = vk::ImageUsageFlags::empty();
    if usage.contains(ImageUsage::SAMPLED) { vk_flags |= vk::ImageUsageFlags::SAMPLED; }
    if usage.contains(ImageUsage::STORAGE) { vk_flags |= vk::ImageUsageFlags::STORAGE; }
    if usage.contains(ImageUsage::COLOR_ATTACHMENT) { vk_flags |= vk::ImageUsageFlags::COLOR_ATTACHMENT; }
    if usage.contains(ImageUsage::DEPTH_ATTACHMENT) { vk_flags |= vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT; }
    if usage.contains(ImageUsage::TRANSFER_SRC) { vk_flags |= vk::ImageUsageFlags::TRANSFER_SRC; }
    if usage.contains(ImageUsage::TRANSFER_DST) { vk_flags |= vk::ImageUsageFlags::TRANSFER_DST; }
    vk_flags
}

/// Texel filter and the matching mipmap mode
pub(crate) fn filter_to_vk(filter: Filter) -> (vk::Filter, vk::SamplerMipmapMode) {
    match filter {
        Filter::Nearest => (vk::Filter::NEAREST, vk::SamplerMipmapMode::NEAREST),
        Filter::Linear => (vk::Filter::LINEAR, vk::SamplerMipmapMode::LINEAR),
    }
}

pub(crate) fn pipeline_stage_to_vk(stage: PipelineStage) -> vk::PipelineStageFlags {
    match stage {
        PipelineStage::TopOfPipe => vk::PipelineStageFlags::TOP_OF_PIPE,
        PipelineStage::Transfer => vk::PipelineStageFlags::TRANSFER,
        PipelineStage::ColorAttachmentOutput => vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        PipelineStage::AllCommands => vk::PipelineStageFlags::ALL_COMMANDS,
    }
}

/// Nanosecond timeout for fence and acquire waits, saturating at `u64::MAX`
pub(crate) fn timeout_to_vk(timeout: std::time::Duration) -> u64 {
    u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX)
}

// ===== ERRORS =====

/// Map a failed Vulkan call onto the engine error the core reacts to
///
/// Pool exhaustion and fragmentation are expected during descriptor
/// allocation and are not logged here; the allocator decides what to do.
pub(crate) fn vk_error(operation: &str, result: vk::Result) -> Error {
    match result {
        vk::Result::ERROR_OUT_OF_POOL_MEMORY => Error::OutOfPoolMemory,
        vk::Result::ERROR_FRAGMENTED_POOL => Error::FragmentedPool,
        vk::Result::TIMEOUT => Error::DeviceTimeout(format!("{} timed out", operation)),
        vk::Result::ERROR_OUT_OF_HOST_MEMORY | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => {
            engine_error!("ember::vulkan", "{} failed: {:?}", operation, result);
            Error::OutOfMemory
        }
        _ => engine_err!("ember::vulkan", "{} failed: {:?}", operation, result),
    }
}

#[cfg(test)]
#[path = "vulkan_convert_tests.rs"]
mod tests;
