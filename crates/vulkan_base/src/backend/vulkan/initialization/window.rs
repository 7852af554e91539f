//! GLFW-based window for Vulkan presentation
//!
//! The window is an external collaborator of the application base: it
//! supplies the surface, reports its pixel size, toggles fullscreen on request
//! and provides the passive wait used while minimized.

use ash::{vk, Entry, Instance};
use thiserror::Error;

use super::context::{SurfaceTarget, VulkanError, VulkanResult};
use crate::core::config::WindowConfig;

/// Window management errors
#[derive(Error, Debug)]
pub enum WindowError {
    /// GLFW could not be initialised
    #[error("GLFW initialization failed")]
    InitializationFailed,

    /// The window could not be created
    #[error("Window creation failed")]
    CreationFailed,

    /// Any other GLFW failure
    #[error("GLFW error: {0}")]
    GlfwError(String),
}

/// Result type for window operations
pub type WindowResult<T> = Result<T, WindowError>;

/// Windowed placement remembered while fullscreen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct WindowedPlacement {
    x: i32,
    y: i32,
    width: u32,
    height: u32,
}

/// GLFW window wrapper
pub struct Window {
    glfw: glfw::Glfw,
    window: glfw::PWindow,
    events: glfw::GlfwReceiver<(f64, glfw::WindowEvent)>,
    windowed: Option<WindowedPlacement>,
}

impl Window {
    /// Create a window without a client API, ready for Vulkan
    pub fn new(config: &WindowConfig) -> WindowResult<Self> {
        let mut glfw = glfw::init(glfw::fail_on_errors).map_err(|_| WindowError::InitializationFailed)?;

        glfw.window_hint(glfw::WindowHint::ClientApi(glfw::ClientApiHint::NoApi));
        glfw.window_hint(glfw::WindowHint::Resizable(true));

        let (mut window, events) = glfw
            .create_window(config.width, config.height, &config.title, glfw::WindowMode::Windowed)
            .ok_or(WindowError::CreationFailed)?;

        window.set_key_polling(true);
        window.set_close_polling(true);
        window.set_framebuffer_size_polling(true);
        window.set_mouse_button_polling(true);
        window.set_cursor_pos_polling(true);

        let mut window = Self {
            glfw,
            window,
            events,
            windowed: None,
        };
        if config.fullscreen {
            window.toggle_fullscreen();
        }
        Ok(window)
    }

    /// Whether the user asked to close the window
    pub fn should_close(&self) -> bool {
        self.window.should_close()
    }

    /// Request or cancel closing
    pub fn set_should_close(&mut self, should_close: bool) {
        self.window.set_should_close(should_close);
    }

    /// Pump the event queue without blocking
    pub fn poll_events(&mut self) {
        self.glfw.poll_events();
    }

    /// Drain events received since the last call
    pub fn flush_events(&self) -> Vec<glfw::WindowEvent> {
        glfw::flush_messages(&self.events).map(|(_, event)| event).collect()
    }

    /// Current framebuffer size in pixels
    pub fn get_framebuffer_size(&self) -> (u32, u32) {
        let (width, height) = self.window.get_framebuffer_size();
        (width.max(0) as u32, height.max(0) as u32)
    }

    /// Whether the window currently covers a monitor
    pub fn is_fullscreen(&self) -> bool {
        self.windowed.is_some()
    }

    /// Switch between windowed mode and fullscreen on the primary monitor.
    ///
    /// Going fullscreen remembers the windowed position and size so the
    /// reverse switch restores them.
    pub fn toggle_fullscreen(&mut self) {
        let window = &mut self.window;
        let windowed = &mut self.windowed;

        self.glfw.with_primary_monitor(|_, monitor| {
            let Some(monitor) = monitor else {
                log::warn!("No primary monitor, fullscreen toggle ignored");
                return;
            };
            let Some(mode) = monitor.get_video_mode() else {
                log::warn!("Primary monitor reports no video mode, fullscreen toggle ignored");
                return;
            };

            match windowed.take() {
                None => {
                    let (x, y) = window.get_pos();
                    let (width, height) = window.get_size();
                    *windowed = Some(WindowedPlacement {
                        x,
                        y,
                        width: width.max(1) as u32,
                        height: height.max(1) as u32,
                    });
                    window.set_monitor(
                        glfw::WindowMode::FullScreen(monitor),
                        0,
                        0,
                        mode.width,
                        mode.height,
                        Some(mode.refresh_rate),
                    );
                    log::info!("Switched to fullscreen {}x{}", mode.width, mode.height);
                }
                Some(placement) => {
                    window.set_monitor(
                        glfw::WindowMode::Windowed,
                        placement.x,
                        placement.y,
                        placement.width,
                        placement.height,
                        Some(mode.refresh_rate),
                    );
                    log::info!("Switched to windowed {}x{}", placement.width, placement.height);
                }
            }
        });
    }

    /// Block on window events until the framebuffer has a non-zero size again
    pub fn wait_while_minimized(&mut self) -> (u32, u32) {
        loop {
            let (width, height) = self.get_framebuffer_size();
            if width != 0 && height != 0 {
                return (width, height);
            }
            self.glfw.wait_events();
        }
    }
}

impl SurfaceTarget for Window {
    fn required_instance_extensions(&self) -> VulkanResult<Vec<String>> {
        self.glfw
            .get_required_instance_extensions()
            .ok_or_else(|| VulkanError::Surface("GLFW reports Vulkan unsupported".to_string()))
    }

    fn create_surface(&mut self, _entry: &Entry, instance: &Instance) -> VulkanResult<vk::SurfaceKHR> {
        let mut surface = vk::SurfaceKHR::null();
        let result = self
            .window
            .create_window_surface(instance.handle(), std::ptr::null(), &mut surface);

        if result == vk::Result::SUCCESS {
            Ok(surface)
        } else {
            Err(VulkanError::Api {
                operation: "glfwCreateWindowSurface",
                result,
            })
        }
    }

    fn framebuffer_size(&self) -> (u32, u32) {
        self.get_framebuffer_size()
    }
}
