//! Named registries of long-lived driver objects
//!
//! A [`Registry`] maps a semantic key such as `"default"` to one live handle.
//! Entries are created on first request and destroyed together by
//! [`Registry::cleanup`], in reverse order of registration, through a single
//! [`HandleDestroyer`] that dispatches on the handle's [`HandleKind`].
//! A registry that has been cleaned up stays empty and refuses new entries.

use ash::vk::{self, Handle};
use std::collections::HashMap;
use std::fmt;

use crate::backend::vulkan::{VulkanError, VulkanResult};

/// Kind of object a registry holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleKind {
    /// `vk::RenderPass`
    RenderPass,
    /// `vk::DescriptorSetLayout`
    DescriptorSetLayout,
    /// `vk::PipelineLayout`
    PipelineLayout,
}

/// Handle type storable in a [`Registry`]
pub trait RegisteredHandle: Handle + Copy + PartialEq + fmt::Debug {
    /// Destroy dispatch tag for this handle type
    const KIND: HandleKind;
}

impl RegisteredHandle for vk::RenderPass {
    const KIND: HandleKind = HandleKind::RenderPass;
}

impl RegisteredHandle for vk::DescriptorSetLayout {
    const KIND: HandleKind = HandleKind::DescriptorSetLayout;
}

impl RegisteredHandle for vk::PipelineLayout {
    const KIND: HandleKind = HandleKind::PipelineLayout;
}

/// Releases registered objects
pub trait HandleDestroyer {
    /// Destroy the object of `kind` whose raw handle is `raw`
    fn destroy(&self, kind: HandleKind, raw: u64);
}

impl HandleDestroyer for ash::Device {
    fn destroy(&self, kind: HandleKind, raw: u64) {
        unsafe {
            match kind {
                HandleKind::RenderPass => self.destroy_render_pass(vk::RenderPass::from_raw(raw), None),
                HandleKind::DescriptorSetLayout => {
                    self.destroy_descriptor_set_layout(vk::DescriptorSetLayout::from_raw(raw), None)
                }
                HandleKind::PipelineLayout => self.destroy_pipeline_layout(vk::PipelineLayout::from_raw(raw), None),
            }
        }
    }
}

/// Key to handle map with at most one live handle per key
pub struct Registry<H: RegisteredHandle> {
    entries: Vec<(String, H)>,
    index: HashMap<String, usize>,
    retired: bool,
}

impl<H: RegisteredHandle> Default for Registry<H> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
            retired: false,
        }
    }
}

impl<H: RegisteredHandle> Registry<H> {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle registered under `key`
    pub fn get(&self, key: &str) -> Option<H> {
        self.index.get(key).map(|&slot| self.entries[slot].1)
    }

    /// Whether `key` has an entry
    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Return the handle for `key`, calling `create` only when there is none
    pub fn get_or_create<F>(&mut self, key: &str, create: F) -> VulkanResult<H>
    where
        F: FnOnce() -> VulkanResult<H>,
    {
        self.ensure_live(key)?;
        if let Some(handle) = self.get(key) {
            return Ok(handle);
        }
        let handle = create()?;
        self.insert(key, handle);
        Ok(handle)
    }

    /// Hand a newly created handle to the registry.
    ///
    /// Fails when `key` is taken; the caller then still owns `handle`.
    pub fn register(&mut self, key: &str, handle: H) -> VulkanResult<H> {
        self.ensure_live(key)?;
        if self.contains(key) {
            return Err(VulkanError::invalid(format!(
                "{:?} registry already has an entry for '{}'",
                H::KIND,
                key
            )));
        }
        self.insert(key, handle);
        Ok(handle)
    }

    fn insert(&mut self, key: &str, handle: H) {
        self.index.insert(key.to_string(), self.entries.len());
        self.entries.push((key.to_string(), handle));
        log::debug!("Registered {:?} '{}'", H::KIND, key);
    }

    fn ensure_live(&self, key: &str) -> VulkanResult<()> {
        if self.retired {
            return Err(VulkanError::invalid(format!(
                "{:?} registry used for '{}' after cleanup",
                H::KIND,
                key
            )));
        }
        Ok(())
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry holds nothing
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys in registration order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(key, _)| key.as_str())
    }

    /// Whether [`Self::cleanup`] has run
    pub fn is_retired(&self) -> bool {
        self.retired
    }

    /// Destroy every entry, newest first, and retire the registry.
    ///
    /// The device must be idle. Further calls do nothing.
    pub fn cleanup(&mut self, destroyer: &impl HandleDestroyer) {
        for (key, handle) in self.entries.drain(..).rev() {
            log::debug!("Destroying {:?} '{}'", H::KIND, key);
            destroyer.destroy(H::KIND, handle.as_raw());
        }
        self.index.clear();
        self.retired = true;
    }
}

/// The registries owned by the application base
#[derive(Default)]
pub struct Registries {
    /// Render passes by purpose, `"default"` being the swap image pass
    pub render_passes: Registry<vk::RenderPass>,
    /// Descriptor set layouts by purpose
    pub descriptor_set_layouts: Registry<vk::DescriptorSetLayout>,
    /// Pipeline layouts by purpose
    pub pipeline_layouts: Registry<vk::PipelineLayout>,
}

impl Registries {
    /// Clean up all registries, pipeline layouts first since they reference set layouts
    pub fn cleanup(&mut self, destroyer: &impl HandleDestroyer) {
        self.pipeline_layouts.cleanup(destroyer);
        self.descriptor_set_layouts.cleanup(destroyer);
        self.render_passes.cleanup(destroyer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};

    #[derive(Default)]
    struct RecordingDestroyer {
        destroyed: RefCell<Vec<(HandleKind, u64)>>,
    }

    impl HandleDestroyer for RecordingDestroyer {
        fn destroy(&self, kind: HandleKind, raw: u64) {
            self.destroyed.borrow_mut().push((kind, raw));
        }
    }

    #[test]
    fn test_get_or_create_returns_same_handle() {
        let mut registry = Registry::<vk::RenderPass>::new();
        let created = Cell::new(0);
        let create = || {
            created.set(created.get() + 1);
            Ok(vk::RenderPass::from_raw(0xA0 + created.get()))
        };

        let first = registry.get_or_create("default", create).unwrap();
        let second = registry
            .get_or_create("default", || Ok(vk::RenderPass::from_raw(0xFF)))
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(created.get(), 1);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("default"), Some(first));
    }

    #[test]
    fn test_failed_create_leaves_no_entry() {
        let mut registry = Registry::<vk::PipelineLayout>::new();
        let result = registry.get_or_create("broken", || {
            Err(VulkanError::api("vkCreatePipelineLayout")(vk::Result::ERROR_OUT_OF_HOST_MEMORY))
        });

        assert!(result.is_err());
        assert!(registry.is_empty());
        assert!(!registry.contains("broken"));
    }

    #[test]
    fn test_duplicate_register_rejected() {
        let mut registry = Registry::<vk::DescriptorSetLayout>::new();
        registry.register("scene", vk::DescriptorSetLayout::from_raw(1)).unwrap();

        let err = registry.register("scene", vk::DescriptorSetLayout::from_raw(2)).unwrap_err();
        assert!(matches!(err, VulkanError::InvalidOperation { .. }));
        assert_eq!(registry.get("scene"), Some(vk::DescriptorSetLayout::from_raw(1)));
    }

    #[test]
    fn test_cleanup_destroys_all_newest_first() {
        let mut registry = Registry::<vk::RenderPass>::new();
        registry.register("default", vk::RenderPass::from_raw(1)).unwrap();
        registry.register("offscreen", vk::RenderPass::from_raw(2)).unwrap();
        registry.register("shadow", vk::RenderPass::from_raw(3)).unwrap();
        assert_eq!(registry.keys().collect::<Vec<_>>(), ["default", "offscreen", "shadow"]);

        let destroyer = RecordingDestroyer::default();
        registry.cleanup(&destroyer);

        assert_eq!(
            *destroyer.destroyed.borrow(),
            vec![
                (HandleKind::RenderPass, 3),
                (HandleKind::RenderPass, 2),
                (HandleKind::RenderPass, 1)
            ]
        );
        assert!(registry.is_empty());
        assert_eq!(registry.get("default"), None);
    }

    #[test]
    fn test_registry_not_reusable_after_cleanup() {
        let mut registry = Registry::<vk::RenderPass>::new();
        registry.register("default", vk::RenderPass::from_raw(1)).unwrap();

        let destroyer = RecordingDestroyer::default();
        registry.cleanup(&destroyer);
        registry.cleanup(&destroyer);
        assert_eq!(destroyer.destroyed.borrow().len(), 1);
        assert!(registry.is_retired());

        assert!(registry.register("default", vk::RenderPass::from_raw(9)).is_err());
        let called = Cell::new(false);
        let result = registry.get_or_create("default", || {
            called.set(true);
            Ok(vk::RenderPass::from_raw(9))
        });
        assert!(result.is_err());
        assert!(!called.get());
    }

    #[test]
    fn test_registries_cleanup_order() {
        let mut registries = Registries::default();
        registries.render_passes.register("default", vk::RenderPass::from_raw(10)).unwrap();
        registries
            .descriptor_set_layouts
            .register("scene", vk::DescriptorSetLayout::from_raw(20))
            .unwrap();
        registries
            .pipeline_layouts
            .register("scene", vk::PipelineLayout::from_raw(30))
            .unwrap();

        let destroyer = RecordingDestroyer::default();
        registries.cleanup(&destroyer);

        let kinds: Vec<HandleKind> = destroyer.destroyed.borrow().iter().map(|(kind, _)| *kind).collect();
        assert_eq!(
            kinds,
            [
                HandleKind::PipelineLayout,
                HandleKind::DescriptorSetLayout,
                HandleKind::RenderPass
            ]
        );
        assert!(registries.render_passes.is_empty());
        assert!(registries.pipeline_layouts.is_retired());
    }
}
