/// Descriptor set layout builder and descriptor writer

use crate::error::Result;
use crate::gpu::device::GpuDevice;
use crate::gpu::types::{
    Buffer, DescriptorBinding, DescriptorKind, DescriptorResource, DescriptorSet,
    DescriptorSetLayout, DescriptorWrite, ImageLayout, ImageView, Sampler, ShaderStageFlags,
};

/// Collects bindings and creates a descriptor set layout from them
///
/// # Example
///
/// ```no_run
/// use ember_engine::ember::descriptor::DescriptorLayoutBuilder;
/// use ember_engine::ember::gpu::{DescriptorKind, GpuDevice, ShaderStageFlags};
///
/// fn scene_layout(device: &dyn GpuDevice) -> ember_engine::ember::Result<()> {
///     let layout = DescriptorLayoutBuilder::new()
///         .add_binding(0, DescriptorKind::UniformBuffer)
///         .build(device, ShaderStageFlags::ALL_GRAPHICS)?;
///     # let _ = layout;
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct DescriptorLayoutBuilder {
    bindings: Vec<(u32, DescriptorKind)>,
}

impl DescriptorLayoutBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a single-descriptor binding
    pub fn add_binding(mut self, binding: u32, kind: DescriptorKind) -> Self {
        self.bindings.push((binding, kind));
        self
    }

    pub fn clear(&mut self) {
        self.bindings.clear();
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Create the layout; every binding is visible to `stages`
    pub fn build(&self, device: &dyn GpuDevice, stages: ShaderStageFlags) -> Result<DescriptorSetLayout> {
        let bindings: Vec<DescriptorBinding> = self
            .bindings
            .iter()
            .map(|&(binding, kind)| DescriptorBinding { binding, kind, count: 1, stages })
            .collect();
        device.create_descriptor_set_layout(&bindings)
    }
}

/// Accumulates buffer and image writes, then applies them to one set
#[derive(Debug, Clone, Default)]
pub struct DescriptorWriter {
    writes: Vec<DescriptorWrite>,
}

impl DescriptorWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_buffer(
        &mut self,
        binding: u32,
        buffer: Buffer,
        size: u64,
        offset: u64,
        kind: DescriptorKind,
    ) -> &mut Self {
        self.writes.push(DescriptorWrite {
            binding,
            kind,
            resource: DescriptorResource::Buffer { buffer, offset, range: size },
        });
        self
    }

    pub fn write_image(
        &mut self,
        binding: u32,
        view: ImageView,
        sampler: Sampler,
        layout: ImageLayout,
        kind: DescriptorKind,
    ) -> &mut Self {
        self.writes.push(DescriptorWrite {
            binding,
            kind,
            resource: DescriptorResource::Image { view, sampler, layout },
        });
        self
    }

    pub fn writes(&self) -> &[DescriptorWrite] {
        &self.writes
    }

    pub fn clear(&mut self) {
        self.writes.clear();
    }

    /// Apply every pending write to `set` (pending writes are kept)
    pub fn update_set(&self, device: &dyn GpuDevice, set: DescriptorSet) -> Result<()> {
        device.update_descriptor_set(set, &self.writes)
    }
}

#[cfg(test)]
#[path = "layout_tests.rs"]
mod tests;
