//! Window size change tracking
//!
//! Decides whether a size change reprovisions the presentation surface.
//! A zero width or height means the window is minimized: nothing is
//! reprovisioned or rendered until both dimensions are non-zero again.

/// What to do about a size change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeAction {
    /// The window is minimized; keep the current surface and skip rendering
    Suspend,
    /// Reprovision the surface at this size
    Reprovision {
        /// New width in pixels
        width: u32,
        /// New height in pixels
        height: u32,
    },
}

/// Minimized state and the last renderable size
#[derive(Debug, Clone, Copy, Default)]
pub struct ResizeTracker {
    minimized: bool,
    last_size: Option<(u32, u32)>,
}

impl ResizeTracker {
    /// Tracker for a window that starts at `width` x `height`
    pub fn new(width: u32, height: u32) -> Self {
        let mut tracker = Self::default();
        tracker.on_size_changed(width, height);
        tracker
    }

    /// Record a size change and decide what it requires
    pub fn on_size_changed(&mut self, width: u32, height: u32) -> ResizeAction {
        self.minimized = width == 0 || height == 0;
        if self.minimized {
            return ResizeAction::Suspend;
        }
        self.last_size = Some((width, height));
        ResizeAction::Reprovision { width, height }
    }

    /// Whether rendering is currently suspended
    pub fn is_minimized(&self) -> bool {
        self.minimized
    }

    /// Last non-zero size seen
    pub fn last_size(&self) -> Option<(u32, u32)> {
        self.last_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normal_resize_reprovisions() {
        let mut tracker = ResizeTracker::new(1280, 720);
        assert!(!tracker.is_minimized());
        assert_eq!(
            tracker.on_size_changed(1920, 1080),
            ResizeAction::Reprovision {
                width: 1920,
                height: 1080
            }
        );
        assert_eq!(tracker.last_size(), Some((1920, 1080)));
    }

    #[test]
    fn test_zero_dimension_suspends() {
        let mut tracker = ResizeTracker::new(800, 600);

        assert_eq!(tracker.on_size_changed(0, 600), ResizeAction::Suspend);
        assert!(tracker.is_minimized());
        assert_eq!(tracker.on_size_changed(800, 0), ResizeAction::Suspend);
        assert_eq!(tracker.on_size_changed(0, 0), ResizeAction::Suspend);

        // The last renderable size survives minimization
        assert_eq!(tracker.last_size(), Some((800, 600)));
    }

    #[test]
    fn test_recovery_after_minimize() {
        let mut tracker = ResizeTracker::new(800, 600);
        tracker.on_size_changed(0, 0);

        assert_eq!(
            tracker.on_size_changed(800, 600),
            ResizeAction::Reprovision { width: 800, height: 600 }
        );
        assert!(!tracker.is_minimized());
    }

    #[test]
    fn test_starts_minimized() {
        let tracker = ResizeTracker::new(0, 0);
        assert!(tracker.is_minimized());
        assert_eq!(tracker.last_size(), None);
    }
}
