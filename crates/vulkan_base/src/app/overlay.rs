//! Hooks for an immediate-mode UI overlay
//!
//! The overlay library itself lives outside this crate. The base hands it
//! an [`OverlayInitInfo`] and asks it, for every mouse and keyboard event,
//! whether the overlay wants that input instead of the application.

use ash::vk;
use bitflags::bitflags;

bitflags! {
    /// Input the overlay currently wants for itself
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct InputCapture: u8 {
        /// Mouse buttons and movement
        const MOUSE    = 1 << 0;
        /// Keys and text input
        const KEYBOARD = 1 << 1;
    }
}

/// An overlay drawn on top of the application
pub trait UiOverlay {
    /// Whether mouse input should go to the overlay
    fn wants_capture_mouse(&self) -> bool;

    /// Whether keyboard input should go to the overlay
    fn wants_capture_keyboard(&self) -> bool;

    /// Both capture hints as one set
    fn capture(&self) -> InputCapture {
        let mut capture = InputCapture::empty();
        capture.set(InputCapture::MOUSE, self.wants_capture_mouse());
        capture.set(InputCapture::KEYBOARD, self.wants_capture_keyboard());
        capture
    }
}

/// Capture hints of an optional overlay; nothing is captured without one
pub fn overlay_capture(overlay: Option<&dyn UiOverlay>) -> InputCapture {
    overlay.map_or(InputCapture::empty(), |overlay| overlay.capture())
}

/// Everything an overlay backend needs to render with the base's device
#[derive(Debug, Clone, Copy)]
pub struct OverlayInitInfo {
    /// Instance handle
    pub instance: vk::Instance,
    /// Selected adapter
    pub physical_device: vk::PhysicalDevice,
    /// Logical device handle
    pub device: vk::Device,
    /// Graphics queue family
    pub queue_family: u32,
    /// Graphics queue
    pub queue: vk::Queue,
    /// Shared descriptor pool
    pub descriptor_pool: vk::DescriptorPool,
    /// Minimum swap image count
    pub min_image_count: u32,
    /// Current swap image count
    pub image_count: u32,
    /// The `"default"` render pass the overlay draws in
    pub render_pass: vk::RenderPass,
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedOverlay {
        mouse: bool,
        keyboard: bool,
    }

    impl UiOverlay for FixedOverlay {
        fn wants_capture_mouse(&self) -> bool {
            self.mouse
        }

        fn wants_capture_keyboard(&self) -> bool {
            self.keyboard
        }
    }

    #[test]
    fn test_capture_flags() {
        let overlay = FixedOverlay {
            mouse: true,
            keyboard: false,
        };
        assert_eq!(overlay.capture(), InputCapture::MOUSE);

        let both = FixedOverlay {
            mouse: true,
            keyboard: true,
        };
        assert_eq!(both.capture(), InputCapture::MOUSE | InputCapture::KEYBOARD);
    }

    #[test]
    fn test_no_overlay_captures_nothing() {
        assert!(overlay_capture(None).is_empty());

        let overlay = FixedOverlay {
            mouse: false,
            keyboard: true,
        };
        let capture = overlay_capture(Some(&overlay));
        assert!(capture.contains(InputCapture::KEYBOARD));
        assert!(!capture.contains(InputCapture::MOUSE));
    }
}
