/// GPU buffer and image uploads through a staging buffer and an immediate submission

use bytemuck::Pod;
use crate::error::{Error, Result};
use crate::frame::cleanup::{CleanupRegistry, Disposal};
use crate::frame::immediate::ImmediateSubmitter;
use crate::gpu::device::GpuDevice;
use crate::gpu::types::{
    Buffer, BufferCopy, BufferDesc, BufferUsage, CommandBuffer, Extent2D, Image, ImageDesc, ImageFormat,
    ImageLayout, ImageUsage, ImageView, MemoryLocation,
};
use crate::{engine_trace, engine_warn};

/// Vertex and index buffers of an uploaded mesh
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeshBuffers {
    pub vertex_buffer: Buffer,
    pub index_buffer: Buffer,
    pub vertex_count: u32,
    pub index_count: u32,
}

impl MeshBuffers {
    /// Hand both buffers to `registry` (index buffer destroyed first)
    pub fn register_cleanup(&self, registry: &mut CleanupRegistry) {
        registry.add_cleaner(Disposal::Buffer(self.vertex_buffer));
        registry.add_cleaner(Disposal::Buffer(self.index_buffer));
    }
}

/// Image together with its full view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocatedImage {
    pub image: Image,
    pub view: ImageView,
    pub extent: Extent2D,
    pub format: ImageFormat,
}

impl AllocatedImage {
    /// Hand image and view to `registry` (view destroyed first)
    pub fn register_cleanup(&self, registry: &mut CleanupRegistry) {
        registry.add_cleaner(Disposal::Image(self.image));
        registry.add_cleaner(Disposal::ImageView(self.view));
    }

    /// Destroy view and image now; the device must no longer use them
    pub fn destroy(&self, device: &dyn GpuDevice) {
        device.destroy_image_view(self.view);
        device.destroy_image(self.image);
    }
}

fn count_of(len: usize, what: &str) -> Result<u32> {
    u32::try_from(len).map_err(|_| Error::InvalidResource(format!("{} count {} exceeds u32", what, len)))
}

/// Create a GPU-only buffer holding `data`
///
/// `usage` gets `TRANSFER_DST` added. The staging buffer is destroyed as soon
/// as the copy has completed.
pub fn upload_buffer(
    device: &dyn GpuDevice,
    immediate: &mut ImmediateSubmitter,
    data: &[u8],
    usage: BufferUsage,
) -> Result<Buffer> {
    if data.is_empty() {
        return Err(Error::InvalidResource("upload of an empty buffer".to_string()));
    }
    let size = data.len() as u64;

    let buffer = device.create_buffer(&BufferDesc {
        size,
        usage: usage | BufferUsage::TRANSFER_DST,
        location: MemoryLocation::GpuOnly,
    })?;

    staged_copy(device, immediate, data, |device, cmd, staging| {
        device.cmd_copy_buffer(cmd, staging, buffer, BufferCopy { src_offset: 0, dst_offset: 0, size });
    })
    .map_err(|err| discard(device, &[Disposal::Buffer(buffer)], err))?;
    Ok(buffer)
}

/// Upload a mesh with a single staging buffer
///
/// The staging buffer holds the vertices followed by the indices and is
/// copied into both destination buffers in one immediate submission.
pub fn upload_mesh<V: Pod>(
    device: &dyn GpuDevice,
    immediate: &mut ImmediateSubmitter,
    vertices: &[V],
    indices: &[u32],
) -> Result<MeshBuffers> {
    let vertex_count = count_of(vertices.len(), "vertex")?;
    let index_count = count_of(indices.len(), "index")?;
    let vertex_bytes: &[u8] = bytemuck::cast_slice(vertices);
    let index_bytes: &[u8] = bytemuck::cast_slice(indices);
    if vertex_bytes.is_empty() || index_bytes.is_empty() {
        return Err(Error::InvalidResource("mesh upload needs vertices and indices".to_string()));
    }

    let vertex_buffer = device.create_buffer(&BufferDesc {
        size: vertex_bytes.len() as u64,
        usage: BufferUsage::VERTEX | BufferUsage::STORAGE | BufferUsage::TRANSFER_DST,
        location: MemoryLocation::GpuOnly,
    })?;
    let index_buffer = match device.create_buffer(&BufferDesc {
        size: index_bytes.len() as u64,
        usage: BufferUsage::INDEX | BufferUsage::TRANSFER_DST,
        location: MemoryLocation::GpuOnly,
    }) {
        Ok(buffer) => buffer,
        Err(err) => {
            device.destroy_buffer(vertex_buffer);
            return Err(err);
        }
    };

    let mut staging_data = Vec::with_capacity(vertex_bytes.len() + index_bytes.len());
    staging_data.extend_from_slice(vertex_bytes);
    staging_data.extend_from_slice(index_bytes);

    let vertex_size = vertex_bytes.len() as u64;
    let index_size = index_bytes.len() as u64;
    staged_copy(device, immediate, &staging_data, |device, cmd, staging| {
        let vertices = BufferCopy { src_offset: 0, dst_offset: 0, size: vertex_size };
        let indices = BufferCopy { src_offset: vertex_size, dst_offset: 0, size: index_size };
        device.cmd_copy_buffer(cmd, staging, vertex_buffer, vertices);
        device.cmd_copy_buffer(cmd, staging, index_buffer, indices);
    })
    .map_err(|err| {
        discard(device, &[Disposal::Buffer(vertex_buffer), Disposal::Buffer(index_buffer)], err)
    })?;

    engine_trace!(
        "ember::upload",
        "Uploaded mesh: {} vertices, {} indices",
        vertex_count,
        index_count
    );

    Ok(MeshBuffers { vertex_buffer, index_buffer, vertex_count, index_count })
}

/// Create an image and a view over it, e.g. a size-dependent render target
///
/// Nothing is uploaded; the contents are undefined until written on the GPU.
pub fn create_image(device: &dyn GpuDevice, desc: &ImageDesc) -> Result<AllocatedImage> {
    let image = device.create_image(desc)?;
    let view = match device.create_image_view(image, desc.format) {
        Ok(view) => view,
        Err(err) => {
            device.destroy_image(image);
            return Err(err);
        }
    };
    engine_trace!(
        "ember::upload",
        "Created {:?} image {}x{}",
        desc.format,
        desc.extent.width,
        desc.extent.height
    );
    Ok(AllocatedImage { image, view, extent: desc.extent, format: desc.format })
}

/// Create a GPU-only image holding `data` and leave it ready for sampling
///
/// `data` must hold exactly `desc.byte_size()` tightly packed texels. The
/// usage gets `TRANSFER_DST` added and the image ends up in
/// `ImageLayout::ShaderReadOnly`.
pub fn upload_image(
    device: &dyn GpuDevice,
    immediate: &mut ImmediateSubmitter,
    data: &[u8],
    desc: &ImageDesc,
) -> Result<AllocatedImage> {
    if data.len() as u64 != desc.byte_size() {
        return Err(Error::InvalidResource(format!(
            "image upload of {} bytes for a {}x{} {:?} image ({} bytes)",
            data.len(),
            desc.extent.width,
            desc.extent.height,
            desc.format,
            desc.byte_size()
        )));
    }
    if desc.format.is_depth() {
        return Err(Error::InvalidResource("depth images cannot be uploaded".to_string()));
    }

    let allocated = create_image(device, &ImageDesc { usage: desc.usage | ImageUsage::TRANSFER_DST, ..*desc })?;
    let image = allocated.image;
    let extent = desc.extent;

    staged_copy(device, immediate, data, |device, cmd, staging| {
        device.cmd_transition_image(cmd, image, ImageLayout::Undefined, ImageLayout::TransferDst);
        device.cmd_copy_buffer_to_image(cmd, staging, image, extent);
        device.cmd_transition_image(cmd, image, ImageLayout::TransferDst, ImageLayout::ShaderReadOnly);
    })
    .map_err(|err| discard(device, &[Disposal::Image(image), Disposal::ImageView(allocated.view)], err))?;

    Ok(allocated)
}

/// Write `data` to a staging buffer and record copies out of it
fn staged_copy<F>(device: &dyn GpuDevice, immediate: &mut ImmediateSubmitter, data: &[u8], record: F) -> Result<()>
where
    F: FnOnce(&dyn GpuDevice, CommandBuffer, Buffer),
{
    let staging = device.create_buffer(&BufferDesc {
        size: data.len() as u64,
        usage: BufferUsage::TRANSFER_SRC,
        location: MemoryLocation::CpuToGpu,
    })?;

    let result = device.write_buffer(staging, 0, data).and_then(|()| {
        immediate.submit(device, |device, cmd| {
            record(device, cmd, staging);
            Ok(())
        })
    });

    match &result {
        Err(err @ Error::DeviceTimeout(_)) => {
            discard(device, &[Disposal::Buffer(staging)], err.clone());
        }
        _ => device.destroy_buffer(staging),
    }
    result
}

/// Destroy the objects of a failed upload newest first and pass the error through
///
/// After a timeout the copy may still be running, so the objects are leaked.
fn discard(device: &dyn GpuDevice, disposals: &[Disposal], err: Error) -> Error {
    if let Error::DeviceTimeout(_) = err {
        engine_warn!("ember::upload", "Leaking {} objects of a timed out upload", disposals.len());
    } else {
        for disposal in disposals.iter().rev() {
            disposal.dispose(device);
        }
    }
    err
}

#[cfg(test)]
#[path = "upload_tests.rs"]
mod tests;
