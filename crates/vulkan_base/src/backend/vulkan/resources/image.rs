//! 2D image resources with paired device memory and view

use ash::{vk, Device};

use crate::backend::vulkan::{PhysicalDeviceInfo, VulkanError, VulkanResult};

/// Aspect the image view covers: depth for depth/stencil attachments, color otherwise
pub fn aspect_mask_for_usage(usage: vk::ImageUsageFlags) -> vk::ImageAspectFlags {
    if usage.contains(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT) {
        vk::ImageAspectFlags::DEPTH
    } else {
        vk::ImageAspectFlags::COLOR
    }
}

/// Single-mip, single-layer subresource range for `aspect`
pub fn full_subresource_range(aspect: vk::ImageAspectFlags) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: aspect,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

/// Device-local 2D image, its memory and its view
pub struct ImageObject {
    device: Device,
    image: vk::Image,
    memory: vk::DeviceMemory,
    view: Option<vk::ImageView>,
    format: vk::Format,
    extent: vk::Extent2D,
    aspect: vk::ImageAspectFlags,
}

impl ImageObject {
    /// Create an optimal-tiling 2D image in device-local memory with a view
    pub fn new(
        device: Device,
        physical_device: &PhysicalDeviceInfo,
        width: u32,
        height: u32,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
    ) -> VulkanResult<Self> {
        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D { width, height, depth: 1 })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe { device.create_image(&image_info, None) }.map_err(VulkanError::api("vkCreateImage"))?;

        // From here on the partially built value cleans up after itself
        let mut object = Self {
            device,
            image,
            memory: vk::DeviceMemory::null(),
            view: None,
            format,
            extent: vk::Extent2D { width, height },
            aspect: aspect_mask_for_usage(usage),
        };

        let requirements = unsafe { object.device.get_image_memory_requirements(image) };
        let memory_type_index =
            physical_device.memory_type_index(requirements.memory_type_bits, vk::MemoryPropertyFlags::DEVICE_LOCAL)?;
        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);

        object.memory = unsafe { object.device.allocate_memory(&alloc_info, None) }
            .map_err(VulkanError::api("vkAllocateMemory"))?;

        unsafe { object.device.bind_image_memory(image, object.memory, 0) }
            .map_err(VulkanError::api("vkBindImageMemory"))?;

        let view_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(full_subresource_range(object.aspect));

        object.view = Some(
            unsafe { object.device.create_image_view(&view_info, None) }
                .map_err(VulkanError::api("vkCreateImageView"))?,
        );

        log::debug!("Created {}x{} image ({:?}, {:?})", width, height, format, usage);
        Ok(object)
    }

    /// Get image handle
    pub fn handle(&self) -> vk::Image {
        self.image
    }

    /// Get the backing memory handle
    pub fn memory(&self) -> vk::DeviceMemory {
        self.memory
    }

    /// Image view, present for every successfully created image
    pub fn view(&self) -> Option<vk::ImageView> {
        self.view
    }

    /// Pixel format
    pub fn format(&self) -> vk::Format {
        self.format
    }

    /// Size in pixels
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Aspect covered by the view
    pub fn aspect(&self) -> vk::ImageAspectFlags {
        self.aspect
    }
}

impl Drop for ImageObject {
    fn drop(&mut self) {
        unsafe {
            if let Some(view) = self.view.take() {
                self.device.destroy_image_view(view, None);
            }
            self.device.destroy_image(self.image, None);
            if self.memory != vk::DeviceMemory::null() {
                self.device.free_memory(self.memory, None);
            }
        }
    }
}
