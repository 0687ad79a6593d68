/// Demo scene: an uploaded triangle, a checkerboard texture and a per-frame uniform buffer

use bytemuck::{Pod, Zeroable};
use ember_engine::ember::descriptor::{DescriptorLayoutBuilder, DescriptorWriter};
use ember_engine::ember::frame::{AllocatedImage, Disposal, FrameRecorder, FrameRecording, MeshBuffers};
use ember_engine::ember::gpu::{
    BufferDesc, BufferUsage, DescriptorKind, DescriptorSetLayout, Extent2D, Filter, ImageDesc, ImageFormat,
    ImageLayout, ImageUsage, MemoryLocation, Sampler, ShaderStageFlags, Swapchain,
};
use ember_engine::ember::{RenderCore, Result};
use glam::{Mat4, Vec3, Vec4};
use std::time::Instant;

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub color: [f32; 3],
}

/// Uniform block written fresh every frame
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct SceneUniforms {
    view_proj: Mat4,
    model: Mat4,
    tint: Vec4,
}

const TRIANGLE: [Vertex; 3] = [
    Vertex { position: [0.0, -0.5, 0.0], color: [1.0, 0.0, 0.0] },
    Vertex { position: [0.5, 0.5, 0.0], color: [0.0, 1.0, 0.0] },
    Vertex { position: [-0.5, 0.5, 0.0], color: [0.0, 0.0, 1.0] },
];

const CHECKER_SIZE: u32 = 8;

/// RGBA8 checkerboard, magenta and black
fn checkerboard() -> Vec<u8> {
    let mut texels = Vec::with_capacity((CHECKER_SIZE * CHECKER_SIZE * 4) as usize);
    for y in 0..CHECKER_SIZE {
        for x in 0..CHECKER_SIZE {
            let texel = if (x + y) % 2 == 0 { [255, 0, 255, 255] } else { [0, 0, 0, 255] };
            texels.extend_from_slice(&texel);
        }
    }
    texels
}

pub struct Scene {
    mesh: MeshBuffers,
    texture: AllocatedImage,
    sampler: Sampler,
    scene_layout: DescriptorSetLayout,
    start: Instant,
}

impl Scene {
    /// Upload the triangle and the texture and create the scene layout; all live until shutdown
    pub fn new<S: Swapchain>(core: &mut RenderCore<S>) -> Result<Self> {
        let mesh = core.upload_mesh(&TRIANGLE, &[0, 1, 2])?;
        let texture = core.upload_image(
            &checkerboard(),
            &ImageDesc {
                extent: Extent2D::new(CHECKER_SIZE, CHECKER_SIZE),
                format: ImageFormat::Rgba8Unorm,
                usage: ImageUsage::SAMPLED,
            },
        )?;
        let sampler = core.create_sampler(Filter::Nearest)?;
        let scene_layout = core.create_descriptor_layout(
            &DescriptorLayoutBuilder::new()
                .add_binding(0, DescriptorKind::UniformBuffer)
                .add_binding(1, DescriptorKind::CombinedImageSampler),
            ShaderStageFlags::ALL_GRAPHICS,
        )?;

        Ok(Self {
            mesh,
            texture,
            sampler,
            scene_layout,
            start: Instant::now(),
        })
    }

    pub fn mesh(&self) -> &MeshBuffers {
        &self.mesh
    }

    fn uniforms(&self, aspect: f32) -> SceneUniforms {
        let t = self.start.elapsed().as_secs_f32();
        let view = Mat4::look_at_rh(Vec3::new(0.0, 0.0, 2.0), Vec3::ZERO, Vec3::Y);
        let proj = Mat4::perspective_rh(60f32.to_radians(), aspect, 0.1, 100.0);
        SceneUniforms {
            view_proj: proj * view,
            model: Mat4::from_rotation_z(t),
            tint: Vec4::new(1.0, 1.0, 1.0, 1.0),
        }
    }

    fn clear_color(&self) -> [f32; 4] {
        let flash = (self.start.elapsed().as_secs_f32() * 0.5).sin().abs();
        [0.0, 0.0, flash, 1.0]
    }
}

impl FrameRecorder for Scene {
    fn record(&mut self, frame: &mut FrameRecording<'_>) -> Result<()> {
        let device = frame.device();
        let extent = frame.extent();
        let aspect = extent.width as f32 / extent.height.max(1) as f32;
        let uniforms = self.uniforms(aspect);
        let bytes = bytemuck::bytes_of(&uniforms);

        // Transient uniform buffer, destroyed when this slot comes around again
        let uniform_buffer = device.create_buffer(&BufferDesc {
            size: bytes.len() as u64,
            usage: BufferUsage::UNIFORM,
            location: MemoryLocation::CpuToGpu,
        })?;
        frame.defer(Disposal::Buffer(uniform_buffer));
        device.write_buffer(uniform_buffer, 0, bytes)?;

        let set = frame.allocate_descriptor_set(self.scene_layout)?;
        DescriptorWriter::new()
            .write_buffer(0, uniform_buffer, bytes.len() as u64, 0, DescriptorKind::UniformBuffer)
            .write_image(
                1,
                self.texture.view,
                self.sampler,
                ImageLayout::ShaderReadOnly,
                DescriptorKind::CombinedImageSampler,
            )
            .update_set(device, set)?;

        let cmd = frame.command_buffer();
        let image = frame.image();
        device.cmd_transition_image(cmd, image, ImageLayout::Undefined, ImageLayout::TransferDst);
        device.cmd_clear_color_image(cmd, image, ImageLayout::TransferDst, self.clear_color());
        device.cmd_transition_image(cmd, image, ImageLayout::TransferDst, ImageLayout::PresentSrc);
        Ok(())
    }
}
