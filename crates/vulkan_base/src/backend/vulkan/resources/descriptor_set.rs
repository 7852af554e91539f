//! Descriptor pool and descriptor set layouts

use ash::{vk, Device};

use crate::backend::vulkan::{VulkanError, VulkanResult};
use crate::core::config::DescriptorPoolConfig;

/// Per-type descriptor counts for a pool built from `config`
pub fn pool_sizes(config: &DescriptorPoolConfig) -> Vec<vk::DescriptorPoolSize> {
    [
        (vk::DescriptorType::COMBINED_IMAGE_SAMPLER, config.combined_image_samplers),
        (vk::DescriptorType::UNIFORM_BUFFER, config.uniform_buffers),
    ]
    .into_iter()
    .filter(|&(_, count)| count > 0)
    .map(|(ty, descriptor_count)| vk::DescriptorPoolSize { ty, descriptor_count })
    .collect()
}

/// Descriptor pool whose sets may be freed individually
pub struct DescriptorPool {
    device: Device,
    pool: vk::DescriptorPool,
    max_sets: u32,
}

impl DescriptorPool {
    /// Create the pool; the set limit is the sum of the per-type counts
    pub fn new(device: Device, config: &DescriptorPoolConfig) -> VulkanResult<Self> {
        let sizes = pool_sizes(config);
        let max_sets = config.max_sets();

        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
            .max_sets(max_sets)
            .pool_sizes(&sizes);

        let pool = unsafe { device.create_descriptor_pool(&pool_info, None) }
            .map_err(VulkanError::api("vkCreateDescriptorPool"))?;

        log::debug!("Descriptor pool created (max {} sets)", max_sets);

        Ok(Self { device, pool, max_sets })
    }

    /// Get the pool handle
    pub fn handle(&self) -> vk::DescriptorPool {
        self.pool
    }

    /// Maximum number of sets the pool was created for
    pub fn max_sets(&self) -> u32 {
        self.max_sets
    }

    /// Allocate one descriptor set with `layout`
    pub fn allocate(&self, layout: vk::DescriptorSetLayout) -> VulkanResult<vk::DescriptorSet> {
        let layouts = [layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(self.pool)
            .set_layouts(&layouts);

        let sets = unsafe { self.device.allocate_descriptor_sets(&alloc_info) }
            .map_err(VulkanError::api("vkAllocateDescriptorSets"))?;
        sets.into_iter()
            .next()
            .ok_or_else(|| VulkanError::invalid("descriptor set allocation returned no sets"))
    }

    /// Return a descriptor set to the pool
    pub fn free(&self, set: vk::DescriptorSet) -> VulkanResult<()> {
        unsafe { self.device.free_descriptor_sets(self.pool, &[set]) }
            .map_err(VulkanError::api("vkFreeDescriptorSets"))
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_descriptor_pool(self.pool, None);
        }
    }
}

/// Descriptor set layout builder.
///
/// Produces a raw handle; ownership is normally handed to the
/// descriptor-set-layout registry, which destroys it at shutdown.
#[derive(Default)]
pub struct DescriptorSetLayoutBuilder {
    bindings: Vec<vk::DescriptorSetLayoutBinding>,
}

impl DescriptorSetLayoutBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a uniform buffer binding
    pub fn add_uniform_buffer(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.add_binding(binding, vk::DescriptorType::UNIFORM_BUFFER, stage_flags)
    }

    /// Add a combined image sampler binding
    pub fn add_combined_image_sampler(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.add_binding(binding, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, stage_flags)
    }

    fn add_binding(mut self, binding: u32, ty: vk::DescriptorType, stage_flags: vk::ShaderStageFlags) -> Self {
        self.bindings.push(
            vk::DescriptorSetLayoutBinding::builder()
                .binding(binding)
                .descriptor_type(ty)
                .descriptor_count(1)
                .stage_flags(stage_flags)
                .build(),
        );
        self
    }

    /// Bindings added so far
    pub fn bindings(&self) -> &[vk::DescriptorSetLayoutBinding] {
        &self.bindings
    }

    /// Create the layout
    pub fn build(&self, device: &Device) -> VulkanResult<vk::DescriptorSetLayout> {
        let layout_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&self.bindings);

        unsafe { device.create_descriptor_set_layout(&layout_info, None) }
            .map_err(VulkanError::api("vkCreateDescriptorSetLayout"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_pool_sizes() {
        let config = DescriptorPoolConfig::default();
        let sizes = pool_sizes(&config);

        assert_eq!(sizes.len(), 2);
        assert_eq!(sizes[0].ty, vk::DescriptorType::COMBINED_IMAGE_SAMPLER);
        assert_eq!(sizes[0].descriptor_count, 1000);
        assert_eq!(sizes[1].ty, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(sizes[1].descriptor_count, 1000);
        assert_eq!(config.max_sets(), 2000);
    }

    #[test]
    fn test_empty_types_skipped() {
        let config = DescriptorPoolConfig {
            combined_image_samplers: 0,
            uniform_buffers: 16,
        };
        let sizes = pool_sizes(&config);
        assert_eq!(sizes.len(), 1);
        assert_eq!(sizes[0].ty, vk::DescriptorType::UNIFORM_BUFFER);
    }

    #[test]
    fn test_layout_builder_bindings() {
        let builder = DescriptorSetLayoutBuilder::new()
            .add_uniform_buffer(0, vk::ShaderStageFlags::VERTEX)
            .add_combined_image_sampler(1, vk::ShaderStageFlags::FRAGMENT);

        let bindings = builder.bindings();
        assert_eq!(bindings.len(), 2);
        assert_eq!(bindings[0].binding, 0);
        assert_eq!(bindings[0].descriptor_type, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(bindings[1].stage_flags, vk::ShaderStageFlags::FRAGMENT);
        assert_eq!(bindings[1].descriptor_count, 1);
    }
}
