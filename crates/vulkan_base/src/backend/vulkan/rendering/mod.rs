//! Vulkan rendering operations
//!
//! Command pools and buffers, render passes and framebuffers.

pub mod commands;
pub mod framebuffer;
pub mod render_pass;

pub use commands::{CommandBuffer, CommandBufferState, CommandPool};
pub use framebuffer::Framebuffer;
pub use render_pass::RenderPassDesc;
