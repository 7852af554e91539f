//! Buffer resources with paired device memory
//!
//! A [`BufferObject`] owns both the buffer handle and the memory bound to it.
//! They are allocated together in [`BufferObject::new`] and released together
//! on drop, so one can never outlive the other.

use ash::{vk, Device};

use super::memory;
use crate::backend::vulkan::{PhysicalDeviceInfo, VulkanError, VulkanResult};

/// Buffer handle and its backing memory
pub struct BufferObject {
    device: Device,
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    properties: vk::MemoryPropertyFlags,
}

impl BufferObject {
    /// Create a buffer, allocate memory with `properties` and bind it at offset 0
    pub fn new(
        device: Device,
        physical_device: &PhysicalDeviceInfo,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> VulkanResult<Self> {
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer =
            unsafe { device.create_buffer(&buffer_info, None) }.map_err(VulkanError::api("vkCreateBuffer"))?;

        let memory = match allocate_and_bind(&device, physical_device, buffer, properties) {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        log::debug!("Created buffer of {} bytes ({:?})", size, usage);

        Ok(Self {
            device,
            buffer,
            memory,
            size,
            usage,
            properties,
        })
    }

    /// Get buffer handle
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Get the backing memory handle
    pub fn memory(&self) -> vk::DeviceMemory {
        self.memory
    }

    /// Requested size in bytes
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Usage flags the buffer was created with
    pub fn usage(&self) -> vk::BufferUsageFlags {
        self.usage
    }

    /// Memory properties the allocation was made with
    pub fn properties(&self) -> vk::MemoryPropertyFlags {
        self.properties
    }

    fn ensure_host_visible(&self) -> VulkanResult<()> {
        if !self.properties.contains(vk::MemoryPropertyFlags::HOST_VISIBLE) {
            return Err(VulkanError::invalid("buffer memory is not host visible"));
        }
        Ok(())
    }

    /// Write raw bytes to the start of a host-visible buffer
    pub fn write_bytes(&self, data: &[u8]) -> VulkanResult<()> {
        self.ensure_host_visible()?;
        // SAFETY: this buffer owns a host-visible allocation of at least `size` bytes
        unsafe { memory::write_to_host_visible_memory(&self.device, self.memory, self.size, data) }
    }

    /// Write a slice of plain-old-data values to a host-visible buffer
    pub fn write_pod<T: bytemuck::Pod>(&self, data: &[T]) -> VulkanResult<()> {
        self.write_bytes(bytemuck::cast_slice(data))
    }

    /// Read the first `len` bytes of a host-visible buffer
    pub fn read_bytes(&self, len: usize) -> VulkanResult<Vec<u8>> {
        self.ensure_host_visible()?;
        let mut out = vec![0u8; len];
        // SAFETY: as in `write_bytes`
        unsafe { memory::read_from_host_visible_memory(&self.device, self.memory, self.size, &mut out)? };
        Ok(out)
    }
}

impl Drop for BufferObject {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_buffer(self.buffer, None);
            self.device.free_memory(self.memory, None);
        }
    }
}

fn allocate_and_bind(
    device: &Device,
    physical_device: &PhysicalDeviceInfo,
    buffer: vk::Buffer,
    properties: vk::MemoryPropertyFlags,
) -> VulkanResult<vk::DeviceMemory> {
    let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };
    let memory_type_index = physical_device.memory_type_index(requirements.memory_type_bits, properties)?;

    let alloc_info = vk::MemoryAllocateInfo::builder()
        .allocation_size(requirements.size)
        .memory_type_index(memory_type_index);

    let memory =
        unsafe { device.allocate_memory(&alloc_info, None) }.map_err(VulkanError::api("vkAllocateMemory"))?;

    if let Err(result) = unsafe { device.bind_buffer_memory(buffer, memory, 0) } {
        unsafe { device.free_memory(memory, None) };
        return Err(VulkanError::api("vkBindBufferMemory")(result));
    }
    Ok(memory)
}

/// Create `count` independent host-visible, host-coherent uniform buffers of
/// `element_size` bytes each, one per swap image.
pub fn create_uniform_buffers(
    device: &Device,
    physical_device: &PhysicalDeviceInfo,
    element_size: vk::DeviceSize,
    count: usize,
) -> VulkanResult<Vec<BufferObject>> {
    (0..count)
        .map(|_| {
            BufferObject::new(
                device.clone(),
                physical_device,
                element_size,
                vk::BufferUsageFlags::UNIFORM_BUFFER,
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            )
        })
        .collect()
}
