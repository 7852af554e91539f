//! Device memory type selection and host-visible memory access

use ash::{vk, Device};

use crate::backend::vulkan::{VulkanError, VulkanResult};

/// Find the first memory type allowed by `type_bits` whose property flags
/// contain all of `required`.
///
/// Types are scanned in adapter order, so the first match is also the
/// adapter's preferred heap. `None` means the request cannot be satisfied
/// and the resource must not be created.
pub fn find_memory_type_index(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
) -> Option<u32> {
    let count = (memory_properties.memory_type_count as usize).min(vk::MAX_MEMORY_TYPES);
    memory_properties.memory_types[..count]
        .iter()
        .enumerate()
        .find(|&(index, memory_type)| {
            type_bits & (1 << index) != 0 && memory_type.property_flags.contains(required)
        })
        .map(|(index, _)| index as u32)
}

/// Reject a host access of `len` bytes into an allocation of `allocation_size` bytes
pub fn check_host_access(len: usize, allocation_size: vk::DeviceSize) -> VulkanResult<()> {
    if len as vk::DeviceSize > allocation_size {
        return Err(VulkanError::invalid(format!(
            "host access of {} bytes exceeds allocation of {} bytes",
            len, allocation_size
        )));
    }
    Ok(())
}

/// Copy `data` into the start of a host-visible allocation.
///
/// The whole allocation is mapped for the duration of the copy. Fails
/// without mapping when `data` is longer than `allocation_size`.
///
/// # Safety
///
/// `memory` must be a live host-visible, host-coherent allocation of at
/// least `allocation_size` bytes made from `device`, not currently mapped,
/// and no in-flight GPU work may access it.
pub unsafe fn write_to_host_visible_memory(
    device: &Device,
    memory: vk::DeviceMemory,
    allocation_size: vk::DeviceSize,
    data: &[u8],
) -> VulkanResult<()> {
    check_host_access(data.len(), allocation_size)?;

    let mapped = device
        .map_memory(memory, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty())
        .map_err(VulkanError::api("vkMapMemory"))?;
    std::ptr::copy_nonoverlapping(data.as_ptr(), mapped.cast::<u8>(), data.len());
    device.unmap_memory(memory);
    Ok(())
}

/// Copy the first `out.len()` bytes of a host-visible allocation into `out`.
///
/// Fails without mapping when `out` is longer than `allocation_size`.
///
/// # Safety
///
/// Same contract as [`write_to_host_visible_memory`]: a live, unmapped,
/// host-visible allocation of at least `allocation_size` bytes that no
/// in-flight GPU work writes.
pub unsafe fn read_from_host_visible_memory(
    device: &Device,
    memory: vk::DeviceMemory,
    allocation_size: vk::DeviceSize,
    out: &mut [u8],
) -> VulkanResult<()> {
    check_host_access(out.len(), allocation_size)?;

    let mapped = device
        .map_memory(memory, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty())
        .map_err(VulkanError::api("vkMapMemory"))?;
    std::ptr::copy_nonoverlapping(mapped.cast::<u8>().cast_const(), out.as_mut_ptr(), out.len());
    device.unmap_memory(memory);
    Ok(())
}
