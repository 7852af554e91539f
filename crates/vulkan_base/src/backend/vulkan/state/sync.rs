//! Vulkan synchronization primitives for GPU/CPU coordination
//!
//! RAII wrappers for semaphores and fences, plus the persistent semaphore
//! pair that orders acquire, render and present for every frame:
//!
//! ```text
//! acquire  --signal--> present_complete
//! submit   --wait----> present_complete (color output stage)
//! submit   --signal--> render_complete
//! present  --wait----> render_complete
//! ```
//!
//! The pair is created once and reused every frame.

use ash::{vk, Device};

use crate::backend::vulkan::{VulkanError, VulkanResult};

/// GPU-GPU synchronization primitive with automatic resource management
pub struct Semaphore {
    device: Device,
    semaphore: vk::Semaphore,
}

impl Semaphore {
    /// Create a new binary semaphore
    pub fn new(device: Device) -> VulkanResult<Self> {
        let create_info = vk::SemaphoreCreateInfo::builder();

        let semaphore = unsafe { device.create_semaphore(&create_info, None) }
            .map_err(VulkanError::api("vkCreateSemaphore"))?;

        Ok(Self { device, semaphore })
    }

    /// Get the semaphore handle
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_semaphore(self.semaphore, None);
        }
    }
}

/// Fence wrapper with RAII cleanup
pub struct Fence {
    device: Device,
    fence: vk::Fence,
}

impl Fence {
    /// Create a fence, optionally already signaled
    pub fn new(device: Device, signaled: bool) -> VulkanResult<Self> {
        let create_info = vk::FenceCreateInfo::builder().flags(fence_create_flags(signaled));

        let fence =
            unsafe { device.create_fence(&create_info, None) }.map_err(VulkanError::api("vkCreateFence"))?;

        Ok(Self { device, fence })
    }

    /// Fence for steady-state frame pacing, signaled so the first wait returns at once
    pub fn signaled(device: Device) -> VulkanResult<Self> {
        Self::new(device, true)
    }

    /// Block until the fence signals or `timeout` nanoseconds pass
    pub fn wait(&self, timeout: u64) -> VulkanResult<()> {
        unsafe { self.device.wait_for_fences(&[self.fence], true, timeout) }
            .map_err(VulkanError::api("vkWaitForFences"))
    }

    /// Return the fence to the unsignaled state
    pub fn reset(&self) -> VulkanResult<()> {
        unsafe { self.device.reset_fences(&[self.fence]) }.map_err(VulkanError::api("vkResetFences"))
    }

    /// Whether the fence is currently signaled
    pub fn is_signaled(&self) -> VulkanResult<bool> {
        unsafe { self.device.get_fence_status(self.fence) }.map_err(VulkanError::api("vkGetFenceStatus"))
    }

    /// Get the fence handle
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_fence(self.fence, None);
        }
    }
}

/// Creation flags for a fence in the requested initial state
pub fn fence_create_flags(signaled: bool) -> vk::FenceCreateFlags {
    if signaled {
        vk::FenceCreateFlags::SIGNALED
    } else {
        vk::FenceCreateFlags::empty()
    }
}

/// The two semaphores shared by every frame
pub struct FrameSemaphores {
    /// Signaled when an acquired swap image is ready to be rendered into
    pub present_complete: Semaphore,
    /// Signaled when the frame's rendering has finished
    pub render_complete: Semaphore,
}

impl FrameSemaphores {
    /// Create both semaphores
    pub fn new(device: Device) -> VulkanResult<Self> {
        let present_complete = Semaphore::new(device.clone())?;
        let render_complete = Semaphore::new(device)?;

        Ok(Self {
            present_complete,
            render_complete,
        })
    }

    /// Wait/signal assignment for this pair
    pub fn ordering(&self) -> FrameOrdering {
        FrameOrdering::new(self.present_complete.handle(), self.render_complete.handle())
    }
}

/// Semaphore wiring of a frame's acquire, submit and present calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameOrdering {
    present_complete: vk::Semaphore,
    render_complete: vk::Semaphore,
}

impl FrameOrdering {
    /// Wiring for the given present-complete / render-complete pair
    pub fn new(present_complete: vk::Semaphore, render_complete: vk::Semaphore) -> Self {
        Self {
            present_complete,
            render_complete,
        }
    }

    /// Semaphore signaled by image acquisition
    pub fn acquire_signal(&self) -> vk::Semaphore {
        self.present_complete
    }

    /// Semaphores the frame submission waits on, with their stages
    pub fn submit_waits(&self) -> ([vk::Semaphore; 1], [vk::PipelineStageFlags; 1]) {
        (
            [self.present_complete],
            [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT],
        )
    }

    /// Semaphores the frame submission signals
    pub fn submit_signals(&self) -> [vk::Semaphore; 1] {
        [self.render_complete]
    }

    /// Semaphores presentation waits on
    pub fn present_waits(&self) -> [vk::Semaphore; 1] {
        [self.render_complete]
    }
}
