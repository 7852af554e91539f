//! Vulkan backend implementation
//!
//! Organized into initialization, resources, rendering and state modules,
//! plus the named object registries.

/// Device context, diagnostics and the window collaborator
pub mod initialization;

/// Buffers, images, memory and descriptors
pub mod resources;

/// Command buffers, render passes and framebuffers
pub mod rendering;

/// Presentation surface and synchronization
pub mod state;

/// Named registries of long-lived driver objects
pub mod registry;

// Re-export core initialization types
pub use initialization::context::{
    DeviceContext, LogicalDevice, PhysicalDeviceInfo, SurfaceTarget, VulkanError, VulkanInstance, VulkanResult,
};
pub use initialization::debug::{DiagnosticMessage, DiagnosticSeverity, DiagnosticSink, LogSink};
pub use initialization::window::{Window, WindowError, WindowResult};

// Re-export resource types
pub use resources::{BufferObject, DescriptorPool, DescriptorSetLayoutBuilder, ImageObject};

// Re-export rendering types
pub use rendering::{CommandBuffer, CommandBufferState, CommandPool, Framebuffer, RenderPassDesc};

// Re-export state types
pub use state::swapchain::{AcquireOutcome, PresentOutcome, PresentationSurface, SwapImageHandle};
pub use state::sync::{Fence, FrameOrdering, FrameSemaphores, Semaphore};

pub use registry::{HandleDestroyer, HandleKind, RegisteredHandle, Registries, Registry};
