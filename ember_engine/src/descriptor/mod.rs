pub mod allocator;
pub mod layout;

pub use allocator::DescriptorAllocator;
pub use layout::{DescriptorLayoutBuilder, DescriptorWriter};
