//! Presentation surface and swap image management
//!
//! [`PresentationSurface`] owns the window surface, the swapchain built on it
//! and one view per swap image. It never polls the window: the owner calls
//! [`PresentationSurface::prepare`] whenever the drawable size changes, after
//! waiting for the device to go idle. Each call builds a complete new image
//! set and retires the previous one.
//!
//! Every image set carries a generation number. [`SwapImageHandle`]s issued
//! for one generation are rejected with [`VulkanError::StaleSwapImage`] once
//! the surface has been reprovisioned.

use ash::extensions::khr::{Surface, Swapchain as SwapchainLoader};
use ash::{vk, Device, Entry, Instance};

use crate::backend::vulkan::resources::image::full_subresource_range;
use crate::backend::vulkan::{VulkanError, VulkanResult};

/// Reference to one swap image of a specific provisioning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SwapImageHandle {
    generation: u64,
    index: u32,
}

impl SwapImageHandle {
    /// Position of the image in the swapchain
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Provisioning the handle belongs to
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Swap images and views of the current provisioning
#[derive(Debug, Default)]
pub struct SwapImageSet {
    generation: u64,
    images: Vec<vk::Image>,
    views: Vec<vk::ImageView>,
}

impl SwapImageSet {
    /// Install a new image set, returning the views of the old one for destruction.
    ///
    /// Handles issued before this call become stale.
    pub fn replace(&mut self, images: Vec<vk::Image>, views: Vec<vk::ImageView>) -> Vec<vk::ImageView> {
        self.generation += 1;
        self.images = images;
        std::mem::replace(&mut self.views, views)
    }

    /// Drop the image set, returning its views for destruction
    pub fn clear(&mut self) -> Vec<vk::ImageView> {
        self.replace(Vec::new(), Vec::new())
    }

    /// Current provisioning number
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Number of swap images
    pub fn len(&self) -> usize {
        self.images.len()
    }

    /// Whether no images are provisioned
    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// Views in swap image order
    pub fn views(&self) -> &[vk::ImageView] {
        &self.views
    }

    /// Images in swap image order
    pub fn images(&self) -> &[vk::Image] {
        &self.images
    }

    /// Handle for the image at `index` in the current set
    pub fn handle(&self, index: u32) -> VulkanResult<SwapImageHandle> {
        if index as usize >= self.images.len() {
            return Err(VulkanError::invalid(format!(
                "swap image index {} out of range ({} images)",
                index,
                self.images.len()
            )));
        }
        Ok(SwapImageHandle {
            generation: self.generation,
            index,
        })
    }

    /// Handles for every image in the current set
    pub fn handles(&self) -> Vec<SwapImageHandle> {
        (0..self.images.len() as u32)
            .map(|index| SwapImageHandle {
                generation: self.generation,
                index,
            })
            .collect()
    }

    /// Check that `handle` belongs to the current set and return its index
    pub fn resolve(&self, handle: SwapImageHandle) -> VulkanResult<usize> {
        if handle.generation != self.generation {
            return Err(VulkanError::StaleSwapImage {
                handle_generation: handle.generation,
                current_generation: self.generation,
            });
        }
        let index = handle.index as usize;
        if index >= self.images.len() {
            return Err(VulkanError::invalid(format!("swap image index {} out of range", index)));
        }
        Ok(index)
    }
}

/// Result of acquiring the next swap image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// An image is available for rendering
    Ready {
        /// Image to render into
        image: SwapImageHandle,
        /// The surface no longer matches exactly; reprovision soon
        suboptimal: bool,
    },
    /// The surface changed and must be reprovisioned before rendering
    OutOfDate,
}

/// Result of presenting a swap image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    /// Presented normally
    Presented,
    /// Presented, but the surface should be reprovisioned
    Suboptimal,
    /// Not presented; the surface must be reprovisioned
    OutOfDate,
}

impl PresentOutcome {
    /// Whether the owner should reprovision the surface
    pub fn needs_reprovision(self) -> bool {
        !matches!(self, Self::Presented)
    }
}

/// Pick the surface format matching `desired`.
///
/// A driver reporting a single `UNDEFINED` entry accepts any format. Without
/// a match the first reported format is used.
pub fn choose_surface_format(available: &[vk::SurfaceFormatKHR], desired: vk::Format) -> Option<vk::SurfaceFormatKHR> {
    match available {
        [] => None,
        [only] if only.format == vk::Format::UNDEFINED => Some(vk::SurfaceFormatKHR {
            format: desired,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }),
        [first, ..] => Some(
            available
                .iter()
                .copied()
                .find(|candidate| candidate.format == desired)
                .unwrap_or(*first),
        ),
    }
}

/// Format render targets should use: the provisioned surface format, or
/// `requested` while the surface has not chosen one yet
pub fn target_format(current: vk::SurfaceFormatKHR, requested: vk::Format) -> vk::Format {
    if current.format == vk::Format::UNDEFINED {
        requested
    } else {
        current.format
    }
}

/// Swap extent for a window of `width` x `height` pixels
pub fn choose_extent(capabilities: &vk::SurfaceCapabilitiesKHR, width: u32, height: u32) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        vk::Extent2D {
            width: width.clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width,
            ),
            height: height.clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
            ),
        }
    }
}

/// One image more than the minimum, bounded by the maximum when there is one
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let desired = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        desired.min(capabilities.max_image_count)
    } else {
        desired
    }
}

/// FIFO when synchronized to vblank, otherwise the lowest-latency mode available
pub fn choose_present_mode(available: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
    if vsync {
        return vk::PresentModeKHR::FIFO;
    }
    [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE]
        .into_iter()
        .find(|mode| available.contains(mode))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// Window surface, swapchain and swap image views
pub struct PresentationSurface {
    device: Device,
    surface_loader: Surface,
    swapchain_loader: SwapchainLoader,
    surface: vk::SurfaceKHR,
    swapchain: vk::SwapchainKHR,
    images: SwapImageSet,
    format: vk::SurfaceFormatKHR,
    extent: vk::Extent2D,
    vsync: bool,
}

impl PresentationSurface {
    /// Take ownership of `surface`. No images exist until [`Self::prepare`].
    pub fn new(entry: &Entry, instance: &Instance, device: Device, surface: vk::SurfaceKHR, vsync: bool) -> Self {
        let surface_loader = Surface::new(entry, instance);
        let swapchain_loader = SwapchainLoader::new(instance, &device);

        Self {
            device,
            surface_loader,
            swapchain_loader,
            surface,
            swapchain: vk::SwapchainKHR::null(),
            images: SwapImageSet::default(),
            format: vk::SurfaceFormatKHR::default(),
            extent: vk::Extent2D::default(),
            vsync,
        }
    }

    /// (Re)provision the swapchain for `width` x `height` in `format`.
    ///
    /// The device must be idle if a previous image set is live. All views and
    /// handles of the previous set are invalidated.
    pub fn prepare(
        &mut self,
        physical_device: vk::PhysicalDevice,
        queue_family: u32,
        width: u32,
        height: u32,
        format: vk::Format,
    ) -> VulkanResult<()> {
        if width == 0 || height == 0 {
            return Err(VulkanError::invalid("cannot provision a zero-sized presentation surface"));
        }

        let supported = unsafe {
            self.surface_loader
                .get_physical_device_surface_support(physical_device, queue_family, self.surface)
        }
        .map_err(VulkanError::api("vkGetPhysicalDeviceSurfaceSupportKHR"))?;
        if !supported {
            return Err(VulkanError::PresentationUnsupported { queue_family });
        }

        let capabilities = unsafe {
            self.surface_loader
                .get_physical_device_surface_capabilities(physical_device, self.surface)
        }
        .map_err(VulkanError::api("vkGetPhysicalDeviceSurfaceCapabilitiesKHR"))?;

        let present_modes = unsafe {
            self.surface_loader
                .get_physical_device_surface_present_modes(physical_device, self.surface)
        }
        .map_err(VulkanError::api("vkGetPhysicalDeviceSurfacePresentModesKHR"))?;

        let surface_format = self.query_format(physical_device, format)?;
        let extent = choose_extent(&capabilities, width, height);
        let image_count = choose_image_count(&capabilities);
        let present_mode = choose_present_mode(&present_modes, self.vsync);

        let pre_transform = if capabilities
            .supported_transforms
            .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
        {
            vk::SurfaceTransformFlagsKHR::IDENTITY
        } else {
            capabilities.current_transform
        };

        let old_swapchain = self.swapchain;
        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(self.surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(pre_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let swapchain = unsafe { self.swapchain_loader.create_swapchain(&create_info, None) }
            .map_err(VulkanError::api("vkCreateSwapchainKHR"))?;

        // Retire the previous set before building views for the new one
        let stale_views = self.images.clear();
        self.destroy_views(stale_views);
        if old_swapchain != vk::SwapchainKHR::null() {
            unsafe { self.swapchain_loader.destroy_swapchain(old_swapchain, None) };
        }
        self.swapchain = swapchain;

        let images = unsafe { self.swapchain_loader.get_swapchain_images(swapchain) }
            .map_err(VulkanError::api("vkGetSwapchainImagesKHR"))?;
        let views = create_views(&self.device, &images, surface_format.format)?;
        self.images.replace(images, views);

        self.format = surface_format;
        self.extent = extent;

        log::info!(
            "Presentation surface prepared: {}x{} {:?}, {} images, {:?} (generation {})",
            extent.width,
            extent.height,
            surface_format.format,
            self.images.len(),
            present_mode,
            self.images.generation()
        );
        Ok(())
    }

    /// Choose the surface format for `desired` without creating any images.
    ///
    /// Lets render passes be built while the window is still minimized;
    /// [`Self::prepare`] later picks the same format.
    pub fn resolve_format(
        &mut self,
        physical_device: vk::PhysicalDevice,
        desired: vk::Format,
    ) -> VulkanResult<vk::SurfaceFormatKHR> {
        let surface_format = self.query_format(physical_device, desired)?;
        self.format = surface_format;
        Ok(surface_format)
    }

    fn query_format(&self, physical_device: vk::PhysicalDevice, desired: vk::Format) -> VulkanResult<vk::SurfaceFormatKHR> {
        let formats = unsafe {
            self.surface_loader
                .get_physical_device_surface_formats(physical_device, self.surface)
        }
        .map_err(VulkanError::api("vkGetPhysicalDeviceSurfaceFormatsKHR"))?;

        let surface_format = choose_surface_format(&formats, desired)
            .ok_or_else(|| VulkanError::Surface("surface reports no formats".to_string()))?;
        if surface_format.format != desired {
            log::warn!(
                "Surface format {:?} unavailable, using {:?}",
                desired,
                surface_format.format
            );
        }
        Ok(surface_format)
    }

    /// Destroy all views, the swapchain and the surface.
    ///
    /// Safe to call more than once; later calls do nothing.
    pub fn cleanup(&mut self) {
        let views = self.images.clear();
        self.destroy_views(views);
        unsafe {
            if self.swapchain != vk::SwapchainKHR::null() {
                self.swapchain_loader.destroy_swapchain(self.swapchain, None);
                self.swapchain = vk::SwapchainKHR::null();
            }
            if self.surface != vk::SurfaceKHR::null() {
                self.surface_loader.destroy_surface(self.surface, None);
                self.surface = vk::SurfaceKHR::null();
            }
        }
    }

    fn destroy_views(&self, views: Vec<vk::ImageView>) {
        for view in views {
            unsafe { self.device.destroy_image_view(view, None) };
        }
    }

    /// Acquire the next swap image, signaling `signal` when it is ready
    pub fn acquire_next_image(&self, signal: vk::Semaphore) -> VulkanResult<AcquireOutcome> {
        let result = unsafe {
            self.swapchain_loader
                .acquire_next_image(self.swapchain, u64::MAX, signal, vk::Fence::null())
        };
        match result {
            Ok((index, suboptimal)) => Ok(AcquireOutcome::Ready {
                image: self.images.handle(index)?,
                suboptimal,
            }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                log::debug!("Swapchain out of date during acquire");
                Ok(AcquireOutcome::OutOfDate)
            }
            Err(e) => Err(VulkanError::api("vkAcquireNextImageKHR")(e)),
        }
    }

    /// Queue `image` for display once every semaphore in `wait` has signaled
    pub fn present(
        &self,
        queue: vk::Queue,
        image: SwapImageHandle,
        wait: &[vk::Semaphore],
    ) -> VulkanResult<PresentOutcome> {
        self.images.resolve(image)?;

        let swapchains = [self.swapchain];
        let image_indices = [image.index()];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(wait)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        match unsafe { self.swapchain_loader.queue_present(queue, &present_info) } {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) => Ok(PresentOutcome::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                log::debug!("Swapchain out of date during present");
                Ok(PresentOutcome::OutOfDate)
            }
            Err(e) => Err(VulkanError::api("vkQueuePresentKHR")(e)),
        }
    }

    /// Chosen surface format
    pub fn surface_format(&self) -> vk::SurfaceFormatKHR {
        self.format
    }

    /// Current swap extent
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Full-surface render area
    pub fn render_area(&self) -> vk::Rect2D {
        vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: self.extent,
        }
    }

    /// Number of swap images
    pub fn image_count(&self) -> u32 {
        self.images.len() as u32
    }

    /// Views of the current swap images, in index order
    pub fn image_views(&self) -> &[vk::ImageView] {
        self.images.views()
    }

    /// Handles for the current swap images
    pub fn image_handles(&self) -> Vec<SwapImageHandle> {
        self.images.handles()
    }

    /// Current provisioning number
    pub fn generation(&self) -> u64 {
        self.images.generation()
    }

    /// View of the image behind `handle`
    pub fn image_view(&self, handle: SwapImageHandle) -> VulkanResult<vk::ImageView> {
        let index = self.images.resolve(handle)?;
        Ok(self.images.views()[index])
    }

    /// Image behind `handle`
    pub fn image(&self, handle: SwapImageHandle) -> VulkanResult<vk::Image> {
        let index = self.images.resolve(handle)?;
        Ok(self.images.images()[index])
    }

    /// Swapchain handle
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }
}

impl Drop for PresentationSurface {
    fn drop(&mut self) {
        self.cleanup();
    }
}

fn create_views(device: &Device, images: &[vk::Image], format: vk::Format) -> VulkanResult<Vec<vk::ImageView>> {
    let mut views = Vec::with_capacity(images.len());
    for &image in images {
        let create_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .components(vk::ComponentMapping {
                r: vk::ComponentSwizzle::IDENTITY,
                g: vk::ComponentSwizzle::IDENTITY,
                b: vk::ComponentSwizzle::IDENTITY,
                a: vk::ComponentSwizzle::IDENTITY,
            })
            .subresource_range(full_subresource_range(vk::ImageAspectFlags::COLOR));

        match unsafe { device.create_image_view(&create_info, None) } {
            Ok(view) => views.push(view),
            Err(e) => {
                for view in views {
                    unsafe { device.destroy_image_view(view, None) };
                }
                return Err(VulkanError::api("vkCreateImageView")(e));
            }
        }
    }
    Ok(views)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::vulkan::RenderPassDesc;
    use ash::vk::Handle;

    fn surface_format(format: vk::Format) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }

    fn capabilities(current: (u32, u32), min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: current.0,
                height: current.1,
            },
            min_image_extent: vk::Extent2D { width: 1, height: 1 },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            min_image_count: min,
            max_image_count: max,
            ..Default::default()
        }
    }

    fn fake_images(base: u64, count: u64) -> (Vec<vk::Image>, Vec<vk::ImageView>) {
        let images = (0..count).map(|i| vk::Image::from_raw(base + i)).collect();
        let views = (0..count).map(|i| vk::ImageView::from_raw(base + 100 + i)).collect();
        (images, views)
    }

    #[test]
    fn test_desired_format_preferred() {
        let available = [
            surface_format(vk::Format::R8G8B8A8_UNORM),
            surface_format(vk::Format::B8G8R8A8_UNORM),
        ];
        let chosen = choose_surface_format(&available, vk::Format::B8G8R8A8_UNORM).unwrap();
        assert_eq!(chosen.format, vk::Format::B8G8R8A8_UNORM);

        let fallback = choose_surface_format(&available, vk::Format::B8G8R8A8_SRGB).unwrap();
        assert_eq!(fallback.format, vk::Format::R8G8B8A8_UNORM);
    }

    #[test]
    fn test_undefined_format_accepts_anything() {
        let available = [surface_format(vk::Format::UNDEFINED)];
        let chosen = choose_surface_format(&available, vk::Format::R8G8B8A8_SRGB).unwrap();
        assert_eq!(chosen.format, vk::Format::R8G8B8A8_SRGB);
        assert_eq!(chosen.color_space, vk::ColorSpaceKHR::SRGB_NONLINEAR);

        assert!(choose_surface_format(&[], vk::Format::B8G8R8A8_UNORM).is_none());
    }

    #[test]
    fn test_target_format_before_provisioning() {
        let unprovisioned = vk::SurfaceFormatKHR::default();
        assert_eq!(
            target_format(unprovisioned, vk::Format::B8G8R8A8_UNORM),
            vk::Format::B8G8R8A8_UNORM
        );

        let provisioned = surface_format(vk::Format::R8G8B8A8_SRGB);
        assert_eq!(
            target_format(provisioned, vk::Format::B8G8R8A8_UNORM),
            vk::Format::R8G8B8A8_SRGB
        );

        let desc = RenderPassDesc::present().resolve_color(target_format(unprovisioned, vk::Format::B8G8R8A8_UNORM));
        assert_ne!(desc.color_format, vk::Format::UNDEFINED);
    }

    #[test]
    fn test_extent_follows_surface_or_window() {
        let fixed = capabilities((800, 600), 2, 3);
        assert_eq!(choose_extent(&fixed, 1024, 768), vk::Extent2D { width: 800, height: 600 });

        let flexible = capabilities((u32::MAX, u32::MAX), 2, 3);
        assert_eq!(choose_extent(&flexible, 1024, 768), vk::Extent2D { width: 1024, height: 768 });
        assert_eq!(choose_extent(&flexible, 10_000, 5), vk::Extent2D { width: 4096, height: 5 });
    }

    #[test]
    fn test_image_count_bounds() {
        assert_eq!(choose_image_count(&capabilities((1, 1), 2, 8)), 3);
        assert_eq!(choose_image_count(&capabilities((1, 1), 2, 2)), 2);
        assert_eq!(choose_image_count(&capabilities((1, 1), 3, 0)), 4);
    }

    #[test]
    fn test_present_mode_selection() {
        let all = [
            vk::PresentModeKHR::FIFO,
            vk::PresentModeKHR::IMMEDIATE,
            vk::PresentModeKHR::MAILBOX,
        ];
        assert_eq!(choose_present_mode(&all, true), vk::PresentModeKHR::FIFO);
        assert_eq!(choose_present_mode(&all, false), vk::PresentModeKHR::MAILBOX);
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE], false),
            vk::PresentModeKHR::IMMEDIATE
        );
        assert_eq!(choose_present_mode(&[vk::PresentModeKHR::FIFO], false), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn test_reprovision_invalidates_handles() {
        let mut set = SwapImageSet::default();
        assert!(set.is_empty());

        let (images, views) = fake_images(1, 3);
        assert!(set.replace(images, views).is_empty());
        let old_handles = set.handles();
        assert_eq!(old_handles.len(), 3);
        assert_eq!(set.resolve(old_handles[2]).unwrap(), 2);

        let (images, views) = fake_images(10, 2);
        let retired = set.replace(images, views);
        assert_eq!(retired.len(), 3);
        assert_eq!(set.len(), 2);

        match set.resolve(old_handles[0]) {
            Err(VulkanError::StaleSwapImage {
                handle_generation,
                current_generation,
            }) => {
                assert_eq!(handle_generation, 1);
                assert_eq!(current_generation, 2);
            }
            other => panic!("expected stale handle error, got {:?}", other),
        }

        let fresh = set.handle(1).unwrap();
        assert_eq!(set.resolve(fresh).unwrap(), 1);
    }

    #[test]
    fn test_handle_index_out_of_range() {
        let mut set = SwapImageSet::default();
        let (images, views) = fake_images(1, 2);
        set.replace(images, views);

        assert!(matches!(set.handle(2), Err(VulkanError::InvalidOperation { .. })));
    }

    #[test]
    fn test_clear_retires_everything() {
        let mut set = SwapImageSet::default();
        let (images, views) = fake_images(1, 2);
        set.replace(images, views);
        let handle = set.handle(0).unwrap();

        assert_eq!(set.clear().len(), 2);
        assert!(set.is_empty());
        assert!(set.views().is_empty());
        assert!(matches!(set.resolve(handle), Err(VulkanError::StaleSwapImage { .. })));
    }

    #[test]
    fn test_present_outcome_reprovision() {
        assert!(!PresentOutcome::Presented.needs_reprovision());
        assert!(PresentOutcome::Suboptimal.needs_reprovision());
        assert!(PresentOutcome::OutOfDate.needs_reprovision());
    }
}
