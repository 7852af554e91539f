//! # Vulkan Base
//!
//! The reusable core of a Vulkan application: device bring-up, resource
//! allocation, presentation surface management, command submission and
//! teardown.
//!
//! ## Features
//!
//! - **Device Context**: instance, first adapter, graphics queue and logical device
//! - **Resources**: buffers and images with bound memory, descriptor pools
//! - **Presentation**: swap image provisioning and reprovisioning on resize
//! - **Submission**: one-shot and per-frame command buffers, fences, semaphores
//! - **Registries**: render passes and layouts looked up by purpose
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use vulkan_base::prelude::*;
//!
//! struct MyApp;
//!
//! impl Application for MyApp {
//!     fn prepare(&mut self, base: &mut VulkanAppBase) -> VulkanResult<()> {
//!         base.get_or_create_render_pass(DEFAULT_RENDER_PASS, RenderPassDesc::present())?;
//!         Ok(())
//!     }
//!
//!     fn render(&mut self, base: &mut VulkanAppBase) -> VulkanResult<()> {
//!         Ok(())
//!     }
//!
//!     fn cleanup(&mut self, base: &mut VulkanAppBase) {}
//! }
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = BaseAppConfig::default();
//!     let mut window = Window::new(&config.window)?;
//!     let mut app = MyApp;
//!     let base = VulkanAppBase::initialize(&mut window, &config, Box::new(LogSink), &mut app)?;
//!     base.terminate(&mut app)?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod foundation;

pub mod backend;

pub mod app;

pub use app::{Application, VulkanAppBase};
pub use backend::vulkan::{VulkanError, VulkanResult};

/// Common imports for applications built on the base
pub mod prelude {
    pub use crate::{
        app::{
            Application, InputCapture, OverlayInitInfo, UiOverlay, VulkanAppBase, DEFAULT_RENDER_PASS,
        },
        backend::vulkan::{
            AcquireOutcome, BufferObject, CommandBuffer, CommandBufferState, DiagnosticSink, Fence, Framebuffer, ImageObject,
            LogSink, PresentOutcome, RenderPassDesc, SwapImageHandle, VulkanError, VulkanResult, Window,
        },
        config::Config,
        core::config::BaseAppConfig,
    };
    pub use ash::vk;
}
