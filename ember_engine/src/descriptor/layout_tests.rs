use super::*;
use crate::descriptor::DescriptorAllocator;
use crate::gpu::headless::{DeviceEvent, HeadlessDevice};
use crate::gpu::types::{BufferDesc, BufferUsage, MemoryLocation, PoolSizeRatio};

#[test]
fn test_builder_collects_bindings() {
    let mut builder = DescriptorLayoutBuilder::new()
        .add_binding(0, DescriptorKind::UniformBuffer)
        .add_binding(1, DescriptorKind::CombinedImageSampler);
    assert_eq!(builder.len(), 2);

    builder.clear();
    assert!(builder.is_empty());
}

#[test]
fn test_built_layout_is_usable_for_allocation() {
    let device = HeadlessDevice::new();
    let layout = DescriptorLayoutBuilder::new()
        .add_binding(0, DescriptorKind::UniformBuffer)
        .build(&device, ShaderStageFlags::ALL_GRAPHICS)
        .unwrap();

    let mut allocator = DescriptorAllocator::new();
    allocator
        .initialize(&device, 2, &[PoolSizeRatio::new(DescriptorKind::UniformBuffer, 1.0)])
        .unwrap();

    assert!(allocator.allocate(&device, layout).is_ok());
    allocator.destroy_all(&device);
    device.destroy_descriptor_set_layout(layout);
}

#[test]
fn test_writer_updates_set() {
    let device = HeadlessDevice::new();
    let layout = DescriptorLayoutBuilder::new()
        .add_binding(0, DescriptorKind::UniformBuffer)
        .build(&device, ShaderStageFlags::VERTEX)
        .unwrap();
    let mut allocator = DescriptorAllocator::new();
    allocator
        .initialize(&device, 1, &[PoolSizeRatio::new(DescriptorKind::UniformBuffer, 1.0)])
        .unwrap();
    let set = allocator.allocate(&device, layout).unwrap();
    let buffer = device
        .create_buffer(&BufferDesc { size: 64, usage: BufferUsage::UNIFORM, location: MemoryLocation::CpuToGpu })
        .unwrap();

    let mut writer = DescriptorWriter::new();
    writer.write_buffer(0, buffer, 64, 0, DescriptorKind::UniformBuffer);
    writer.update_set(&device, set).unwrap();

    assert_eq!(
        writer.writes()[0].resource,
        DescriptorResource::Buffer { buffer, offset: 0, range: 64 }
    );
    assert!(device
        .events()
        .contains(&DeviceEvent::DescriptorSetUpdated { set, writes: 1 }));

    writer.clear();
    assert!(writer.writes().is_empty());
    allocator.destroy_all(&device);
}

#[test]
fn test_writer_image_entry() {
    let mut writer = DescriptorWriter::new();
    writer.write_image(
        2,
        ImageView::from_raw(7),
        Sampler::NULL,
        ImageLayout::General,
        DescriptorKind::StorageImage,
    );

    let write = writer.writes()[0];
    assert_eq!(write.binding, 2);
    assert_eq!(write.kind, DescriptorKind::StorageImage);
    assert!(matches!(write.resource, DescriptorResource::Image { layout: ImageLayout::General, .. }));
}
