/// Plain GPU-facing types shared by the core and every device backend.
///
/// Handles are opaque `u64` newtypes. A backend maps them onto its native
/// objects (Vulkan handles via `vk::Handle::as_raw`, arena keys for the
/// headless device). The raw value `0` is reserved for "no object".

use bitflags::bitflags;

macro_rules! gpu_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        pub struct $name(u64);

        impl $name {
            /// Handle that refers to no object
            pub const NULL: Self = Self(0);

            pub const fn from_raw(raw: u64) -> Self {
                Self(raw)
            }

            pub const fn as_raw(self) -> u64 {
                self.0
            }

            pub const fn is_null(self) -> bool {
                self.0 == 0
            }
        }
    };
}

gpu_handle!(
    /// Capacity unit from which descriptor sets are carved
    DescriptorPool
);
gpu_handle!(
    /// Set of resource bindings consumed by shaders
    DescriptorSet
);
gpu_handle!(DescriptorSetLayout);
gpu_handle!(CommandPool);
gpu_handle!(CommandBuffer);
gpu_handle!(
    /// GPU to CPU completion signal
    Fence
);
gpu_handle!(
    /// GPU to GPU ordering signal
    Semaphore
);
gpu_handle!(Buffer);
gpu_handle!(Image);
gpu_handle!(ImageView);
gpu_handle!(Sampler);

/// Size of a drawable surface in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Extent2D {
    pub width: u32,
    pub height: u32,
}

impl Extent2D {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// A minimized window reports a zero-sized surface
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Kind of resource a descriptor refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorKind {
    Sampler,
    CombinedImageSampler,
    SampledImage,
    StorageImage,
    UniformBuffer,
    StorageBuffer,
    UniformBufferDynamic,
    StorageBufferDynamic,
}

/// Descriptors of one kind to reserve per set when creating a pool
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoolSizeRatio {
    pub kind: DescriptorKind,
    pub ratio: f32,
}

impl PoolSizeRatio {
    pub const fn new(kind: DescriptorKind, ratio: f32) -> Self {
        Self { kind, ratio }
    }

    /// Descriptor count for a pool holding `sets` sets (truncated, at least 1)
    pub fn descriptor_count(&self, sets: u32) -> u32 {
        ((self.ratio as f64 * sets as f64) as u32).max(1)
    }
}

bitflags! {
    /// Shader stages a binding is visible to
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ShaderStageFlags: u32 {
        const VERTEX = 1 << 0;
        const FRAGMENT = 1 << 1;
        const COMPUTE = 1 << 2;
        const ALL_GRAPHICS = Self::VERTEX.bits() | Self::FRAGMENT.bits();
    }
}

bitflags! {
    /// How a buffer will be used
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        const VERTEX = 1 << 0;
        const INDEX = 1 << 1;
        const UNIFORM = 1 << 2;
        const STORAGE = 1 << 3;
        const TRANSFER_SRC = 1 << 4;
        const TRANSFER_DST = 1 << 5;
    }
}

/// Where buffer memory lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryLocation {
    /// Device local, not host visible (upload through staging)
    GpuOnly,
    /// Host visible, written by the CPU every frame
    CpuToGpu,
    /// Host visible, read back by the CPU
    GpuToCpu,
}

/// Buffer creation parameters
#[derive(Debug, Clone, Copy)]
pub struct BufferDesc {
    pub size: u64,
    pub usage: BufferUsage,
    pub location: MemoryLocation,
}

/// One binding in a descriptor set layout
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DescriptorBinding {
    pub binding: u32,
    pub kind: DescriptorKind,
    pub count: u32,
    pub stages: ShaderStageFlags,
}

/// Image layouts the core and the demo transition between
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageLayout {
    Undefined,
    General,
    ShaderReadOnly,
    ColorAttachment,
    DepthAttachment,
    TransferDst,
    PresentSrc,
}

/// Texel formats of images created through the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageFormat {
    Rgba8Unorm,
    Bgra8Unorm,
    Rgba16Float,
    D32Float,
}

impl ImageFormat {
    pub const fn bytes_per_pixel(self) -> u32 {
        match self {
            ImageFormat::Rgba8Unorm | ImageFormat::Bgra8Unorm | ImageFormat::D32Float => 4,
            ImageFormat::Rgba16Float => 8,
        }
    }

    pub const fn is_depth(self) -> bool {
        matches!(self, ImageFormat::D32Float)
    }
}

bitflags! {
    /// How an image will be used
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ImageUsage: u32 {
        const SAMPLED = 1 << 0;
        const STORAGE = 1 << 1;
        const COLOR_ATTACHMENT = 1 << 2;
        const DEPTH_ATTACHMENT = 1 << 3;
        const TRANSFER_SRC = 1 << 4;
        const TRANSFER_DST = 1 << 5;
    }
}

/// 2D image creation parameters (single mip level, single layer, GPU-only memory)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageDesc {
    pub extent: Extent2D,
    pub format: ImageFormat,
    pub usage: ImageUsage,
}

impl ImageDesc {
    /// Tightly packed size of the image contents in bytes
    pub fn byte_size(&self) -> u64 {
        self.extent.width as u64 * self.extent.height as u64 * self.format.bytes_per_pixel() as u64
    }
}

/// Sampler filtering, applied to magnification and minification alike
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Filter {
    Nearest,
    Linear,
}

/// Resource referenced by a descriptor write
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DescriptorResource {
    Buffer {
        buffer: Buffer,
        offset: u64,
        range: u64,
    },
    Image {
        view: ImageView,
        sampler: Sampler,
        layout: ImageLayout,
    },
}

/// Pending update of one binding of a descriptor set
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DescriptorWrite {
    pub binding: u32,
    pub kind: DescriptorKind,
    pub resource: DescriptorResource,
}

/// Pipeline stage a semaphore wait applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    TopOfPipe,
    Transfer,
    ColorAttachmentOutput,
    AllCommands,
}

/// Region of a buffer-to-buffer copy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferCopy {
    pub src_offset: u64,
    pub dst_offset: u64,
    pub size: u64,
}

/// One batch handed to the graphics queue
#[derive(Debug, Clone, Copy, Default)]
pub struct SubmitInfo<'a> {
    pub command_buffers: &'a [CommandBuffer],
    pub wait_semaphores: &'a [(Semaphore, PipelineStage)],
    pub signal_semaphores: &'a [Semaphore],
    /// Signaled once every command buffer of the batch has completed
    pub fence: Option<Fence>,
}
