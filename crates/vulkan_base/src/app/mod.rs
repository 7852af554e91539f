//! Application layer
//!
//! [`VulkanAppBase`] owns the core objects; applications implement
//! [`Application`] and are called back at fixed points of its lifecycle.

pub mod base;
pub mod overlay;
pub mod resize;

pub use base::{VulkanAppBase, DEFAULT_RENDER_PASS};
pub use overlay::{overlay_capture, InputCapture, OverlayInitInfo, UiOverlay};
pub use resize::{ResizeAction, ResizeTracker};

use crate::backend::vulkan::VulkanResult;

/// Application lifecycle hooks
///
/// Implement this trait to build on [`VulkanAppBase`].
pub trait Application {
    /// Create application resources
    ///
    /// Called once at the end of [`VulkanAppBase::initialize`], after the
    /// device, surface and pools exist.
    fn prepare(&mut self, base: &mut VulkanAppBase) -> VulkanResult<()>;

    /// Record and submit one frame
    fn render(&mut self, base: &mut VulkanAppBase) -> VulkanResult<()>;

    /// Release application resources
    ///
    /// Called with the device idle, before the base tears itself down. Also
    /// called after a failed [`Self::prepare`] or frame loop, so it must cope
    /// with partially built state. Every object holding the device must be
    /// released here.
    fn cleanup(&mut self, base: &mut VulkanAppBase);

    /// The swap images were replaced; rebuild whatever refers to them.
    fn on_surface_reprovisioned(&mut self, _base: &mut VulkanAppBase) -> VulkanResult<()> {
        Ok(())
    }
}
