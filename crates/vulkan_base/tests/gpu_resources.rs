//! Resource and submission tests against a real device
//!
//! Every test creates a headless device context and returns early when the
//! machine has no Vulkan loader or adapter.

use std::ffi::CStr;

use ash::vk;
use vulkan_base::backend::vulkan::resources::{create_uniform_buffers, full_subresource_range};
use vulkan_base::backend::vulkan::{
    BufferObject, CommandBufferState, CommandPool, DescriptorSetLayoutBuilder, DeviceContext, Fence, ImageObject,
    LogSink, Registries,
};
use vulkan_base::core::config::BaseAppConfig;

fn headless_context() -> Option<DeviceContext> {
    let mut config = BaseAppConfig::default();
    config.renderer.enable_validation = Some(false);

    match DeviceContext::new_headless(&config, Box::new(LogSink)) {
        Ok(context) => Some(context),
        Err(e) => {
            eprintln!("Skipping GPU test, no usable Vulkan device: {}", e);
            None
        }
    }
}

fn host_buffer(context: &DeviceContext, size: vk::DeviceSize, usage: vk::BufferUsageFlags) -> BufferObject {
    BufferObject::new(
        context.raw_device(),
        context.physical_device(),
        size,
        usage,
        vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
    )
    .unwrap()
}

/// Bytes in use across all heaps, or `None` without `VK_EXT_memory_budget`
fn heap_usage(context: &DeviceContext) -> Option<vk::DeviceSize> {
    let instance = context.instance();
    let physical_device = context.physical_device().device;

    let extensions = unsafe { instance.enumerate_device_extension_properties(physical_device) }.ok()?;
    let has_budget = extensions
        .iter()
        .any(|ext| unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) } == vk::ExtMemoryBudgetFn::name());
    if !has_budget {
        return None;
    }

    let mut budget = vk::PhysicalDeviceMemoryBudgetPropertiesEXT::default();
    let heap_count = {
        let mut properties = vk::PhysicalDeviceMemoryProperties2::builder().push_next(&mut budget);
        unsafe { instance.get_physical_device_memory_properties2(physical_device, &mut properties) };
        properties.memory_properties.memory_heap_count as usize
    };
    Some(budget.heap_usage[..heap_count].iter().sum())
}

#[test]
fn test_buffer_and_image_create_destroy_cycles() {
    let Some(context) = headless_context() else { return };
    let Some(before) = heap_usage(&context) else {
        eprintln!("Skipping leak check, VK_EXT_memory_budget not supported");
        return;
    };

    const CYCLES: u64 = 32;
    const BUFFER_SIZE: vk::DeviceSize = 1 << 20;
    for _ in 0..CYCLES {
        let buffer = host_buffer(&context, BUFFER_SIZE, vk::BufferUsageFlags::TRANSFER_SRC);
        assert_ne!(buffer.handle(), vk::Buffer::null());
        assert_ne!(buffer.memory(), vk::DeviceMemory::null());
        assert_eq!(buffer.size(), BUFFER_SIZE);

        let image = ImageObject::new(
            context.raw_device(),
            context.physical_device(),
            256,
            256,
            vk::Format::R8G8B8A8_UNORM,
            vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
        )
        .unwrap();
        assert_ne!(image.handle(), vk::Image::null());
        assert!(image.view().is_some());
        assert_eq!(image.aspect(), vk::ImageAspectFlags::COLOR);
    }

    context.wait_idle().unwrap();
    let after = heap_usage(&context).unwrap();

    // A leak of every cycle would be at least CYCLES MiB
    let slack = 4 * BUFFER_SIZE;
    assert!(
        after <= before + slack,
        "heap usage grew from {} to {} bytes over {} cycles",
        before,
        after,
        CYCLES
    );
}

#[test]
fn test_host_access_rejects_overrun() {
    let Some(context) = headless_context() else { return };

    let buffer = host_buffer(&context, 64, vk::BufferUsageFlags::UNIFORM_BUFFER);
    assert!(buffer.write_bytes(&[1u8; 64]).is_ok());
    assert!(buffer.write_bytes(&[1u8; 65]).is_err());
    assert!(buffer.read_bytes(65).is_err());
    assert_eq!(buffer.read_bytes(64).unwrap(), vec![1u8; 64]);

    let device_local = BufferObject::new(
        context.raw_device(),
        context.physical_device(),
        64,
        vk::BufferUsageFlags::TRANSFER_DST,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
    )
    .unwrap();
    assert!(device_local.write_bytes(&[0u8; 4]).is_err());
}

#[test]
fn test_uniform_buffers_are_independent() {
    let Some(context) = headless_context() else { return };

    let buffers = create_uniform_buffers(context.device(), context.physical_device(), 64, 3).unwrap();
    assert_eq!(buffers.len(), 3);

    for (i, buffer) in buffers.iter().enumerate() {
        buffer.write_bytes(&[i as u8 + 1; 64]).unwrap();
    }
    for (i, buffer) in buffers.iter().enumerate() {
        assert_eq!(buffer.read_bytes(64).unwrap(), vec![i as u8 + 1; 64]);
    }

    assert_ne!(buffers[0].memory(), buffers[1].memory());
    assert_ne!(buffers[1].memory(), buffers[2].memory());
}

#[test]
fn test_one_shot_copy_visible_on_return() {
    let Some(context) = headless_context() else { return };

    let payload: Vec<u8> = (0..=255).collect();
    let source = host_buffer(&context, 256, vk::BufferUsageFlags::TRANSFER_SRC);
    let destination = host_buffer(&context, 256, vk::BufferUsageFlags::TRANSFER_DST);
    source.write_bytes(&payload).unwrap();
    destination.write_bytes(&[0u8; 256]).unwrap();

    let pool = CommandPool::new(context.raw_device(), context.graphics_queue_family()).unwrap();
    let mut command_buffer = pool.allocate_primary(true).unwrap();
    assert_eq!(command_buffer.state(), CommandBufferState::Recording);

    let region = vk::BufferCopy {
        src_offset: 0,
        dst_offset: 0,
        size: 256,
    };
    unsafe {
        context
            .device()
            .cmd_copy_buffer(command_buffer.handle(), source.handle(), destination.handle(), &[region]);
    }

    pool.submit_and_wait(context.graphics_queue(), &mut command_buffer).unwrap();
    assert_eq!(command_buffer.state(), CommandBufferState::Initial);
    assert_eq!(destination.read_bytes(256).unwrap(), payload);

    pool.free(command_buffer).unwrap();
}

#[test]
fn test_staging_buffer_to_image_transfer() {
    let Some(context) = headless_context() else { return };

    let (width, height) = (4u32, 4u32);
    let texels: Vec<u8> = (0..width * height * 4).map(|i| (i * 7 % 251) as u8).collect();
    let size = texels.len() as vk::DeviceSize;
    let staging = host_buffer(&context, size, vk::BufferUsageFlags::TRANSFER_SRC);
    staging.write_bytes(&texels).unwrap();
    let readback = host_buffer(&context, size, vk::BufferUsageFlags::TRANSFER_DST);
    readback.write_bytes(&vec![0u8; texels.len()]).unwrap();

    let image = ImageObject::new(
        context.raw_device(),
        context.physical_device(),
        width,
        height,
        vk::Format::R8G8B8A8_UNORM,
        vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::TRANSFER_SRC,
    )
    .unwrap();

    let region = vk::BufferImageCopy::builder()
        .image_subresource(vk::ImageSubresourceLayers {
            aspect_mask: image.aspect(),
            mip_level: 0,
            base_array_layer: 0,
            layer_count: 1,
        })
        .image_extent(vk::Extent3D {
            width,
            height,
            depth: 1,
        })
        .build();

    let pool = CommandPool::new(context.raw_device(), context.graphics_queue_family()).unwrap();
    pool.transfer_buffer_to_image(
        context.graphics_queue(),
        staging.handle(),
        image.handle(),
        image.aspect(),
        &[region],
    )
    .unwrap();

    // The transfer leaves the image shader-readable; copy it back out
    let mut command_buffer = pool.allocate_primary(true).unwrap();
    let to_transfer_src = vk::ImageMemoryBarrier::builder()
        .src_access_mask(vk::AccessFlags::SHADER_READ)
        .dst_access_mask(vk::AccessFlags::TRANSFER_READ)
        .old_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
        .new_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image.handle())
        .subresource_range(full_subresource_range(image.aspect()))
        .build();
    unsafe {
        let device = context.device();
        device.cmd_pipeline_barrier(
            command_buffer.handle(),
            vk::PipelineStageFlags::FRAGMENT_SHADER,
            vk::PipelineStageFlags::TRANSFER,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[to_transfer_src],
        );
        device.cmd_copy_image_to_buffer(
            command_buffer.handle(),
            image.handle(),
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            readback.handle(),
            &[region],
        );
    }
    pool.submit_and_wait(context.graphics_queue(), &mut command_buffer).unwrap();
    pool.free(command_buffer).unwrap();

    assert_eq!(readback.read_bytes(texels.len()).unwrap(), texels);
}

#[test]
fn test_frame_fence_starts_signaled() {
    let Some(context) = headless_context() else { return };

    let fence = Fence::signaled(context.raw_device()).unwrap();
    assert!(fence.is_signaled().unwrap());
    fence.wait(0).unwrap();

    fence.reset().unwrap();
    assert!(!fence.is_signaled().unwrap());
}

#[test]
fn test_registry_owns_real_layout() {
    let Some(context) = headless_context() else { return };

    let builder = DescriptorSetLayoutBuilder::new()
        .add_uniform_buffer(0, vk::ShaderStageFlags::VERTEX)
        .add_combined_image_sampler(1, vk::ShaderStageFlags::FRAGMENT);

    let mut registries = Registries::default();
    let first = registries
        .descriptor_set_layouts
        .get_or_create("scene", || builder.build(context.device()))
        .unwrap();
    let second = registries
        .descriptor_set_layouts
        .get_or_create("scene", || builder.build(context.device()))
        .unwrap();
    assert_eq!(first, second);
    assert_eq!(registries.descriptor_set_layouts.len(), 1);

    registries.cleanup(context.device());
    assert!(registries.descriptor_set_layouts.is_empty());
}
