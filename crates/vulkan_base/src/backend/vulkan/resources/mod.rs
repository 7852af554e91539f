//! Vulkan resource management
//!
//! Buffers and images paired with their device memory, memory type
//! selection and descriptor pools.

/// Memory type lookup and host-visible memory access
pub mod memory;

/// Buffer resources
pub mod buffer;

/// Image resources
pub mod image;

/// Descriptor pool and set layouts
pub mod descriptor_set;

pub use buffer::{create_uniform_buffers, BufferObject};
pub use descriptor_set::{DescriptorPool, DescriptorSetLayoutBuilder};
pub use image::{aspect_mask_for_usage, full_subresource_range, ImageObject};
pub use memory::{check_host_access, find_memory_type_index, read_from_host_visible_memory, write_to_host_visible_memory};
