//! Command buffer management
//!
//! Command buffers are owned by the [`CommandPool`] that allocated them and
//! are freed explicitly by their owner; nothing is reclaimed implicitly
//! except when the pool itself is destroyed. Each [`CommandBuffer`] tracks
//! its lifecycle so misuse (recording twice, submitting while recording,
//! freeing while pending) is reported instead of reaching the driver.
//!
//! [`CommandPool::submit_and_wait`] is the blocking "do it now" path for
//! setup work and one-off transfers. Every call stalls the CPU until the GPU
//! is done, so per-frame rendering goes through [`CommandPool::submit`] with
//! the persistent semaphore pair and a frame fence instead.

use ash::{vk, Device};

use crate::backend::vulkan::state::sync::Fence;
use crate::backend::vulkan::{VulkanError, VulkanResult};

/// Lifecycle state of a command buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandBufferState {
    /// Allocated or reset, nothing recorded
    Initial,
    /// Between begin and end
    Recording,
    /// Recorded and ready for submission
    Executable,
    /// Submitted and possibly still executing
    Pending,
    /// Returned to the pool
    Freed,
}

impl CommandBufferState {
    /// Start recording. Executable buffers are implicitly reset by the pool.
    pub fn begin(self) -> VulkanResult<Self> {
        match self {
            Self::Initial | Self::Executable => Ok(Self::Recording),
            other => Err(Self::misuse("begin", other)),
        }
    }

    /// Finish recording
    pub fn end(self) -> VulkanResult<Self> {
        match self {
            Self::Recording => Ok(Self::Executable),
            other => Err(Self::misuse("end", other)),
        }
    }

    /// Hand the buffer to a queue
    pub fn submit(self) -> VulkanResult<Self> {
        match self {
            Self::Executable => Ok(Self::Pending),
            other => Err(Self::misuse("submit", other)),
        }
    }

    /// Execution observed complete; the recording may be submitted again
    pub fn complete(self) -> VulkanResult<Self> {
        match self {
            Self::Pending => Ok(Self::Executable),
            other => Err(Self::misuse("complete", other)),
        }
    }

    /// Discard the recording
    pub fn reset(self) -> VulkanResult<Self> {
        match self {
            Self::Initial | Self::Recording | Self::Executable => Ok(Self::Initial),
            other => Err(Self::misuse("reset", other)),
        }
    }

    /// Return the buffer to its pool
    pub fn free(self) -> VulkanResult<Self> {
        match self {
            Self::Pending | Self::Freed => Err(Self::misuse("free", self)),
            _ => Ok(Self::Freed),
        }
    }

    fn misuse(operation: &str, state: Self) -> VulkanError {
        VulkanError::invalid(format!("cannot {} a command buffer in the {:?} state", operation, state))
    }
}

/// Command buffer handle with its level and tracked state
#[derive(Debug)]
pub struct CommandBuffer {
    handle: vk::CommandBuffer,
    level: vk::CommandBufferLevel,
    state: CommandBufferState,
}

impl CommandBuffer {
    fn allocated(handle: vk::CommandBuffer, level: vk::CommandBufferLevel) -> Self {
        Self {
            handle,
            level,
            state: CommandBufferState::Initial,
        }
    }

    /// Get the command buffer handle
    pub fn handle(&self) -> vk::CommandBuffer {
        self.handle
    }

    /// Primary or secondary
    pub fn level(&self) -> vk::CommandBufferLevel {
        self.level
    }

    /// Current lifecycle state
    pub fn state(&self) -> CommandBufferState {
        self.state
    }

    /// Record that the fence guarding this buffer's submission has signaled
    pub fn mark_complete(&mut self) -> VulkanResult<()> {
        self.state = self.state.complete()?;
        Ok(())
    }
}

/// Command pool wrapper with RAII cleanup
pub struct CommandPool {
    device: Device,
    command_pool: vk::CommandPool,
}

impl CommandPool {
    /// Create a pool whose buffers can be reset individually
    pub fn new(device: Device, queue_family_index: u32) -> VulkanResult<Self> {
        let pool_create_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(queue_family_index);

        let command_pool = unsafe { device.create_command_pool(&pool_create_info, None) }
            .map_err(VulkanError::api("vkCreateCommandPool"))?;

        Ok(Self { device, command_pool })
    }

    /// Get the command pool handle
    pub fn handle(&self) -> vk::CommandPool {
        self.command_pool
    }

    fn allocate(&self, level: vk::CommandBufferLevel, count: u32) -> VulkanResult<Vec<CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.command_pool)
            .level(level)
            .command_buffer_count(count);

        let handles = unsafe { self.device.allocate_command_buffers(&alloc_info) }
            .map_err(VulkanError::api("vkAllocateCommandBuffers"))?;

        Ok(handles
            .into_iter()
            .map(|handle| CommandBuffer::allocated(handle, level))
            .collect())
    }

    /// Allocate one primary command buffer, optionally already recording
    pub fn allocate_primary(&self, begin: bool) -> VulkanResult<CommandBuffer> {
        let mut command_buffer = self
            .allocate(vk::CommandBufferLevel::PRIMARY, 1)?
            .pop()
            .ok_or_else(|| VulkanError::invalid("command buffer allocation returned nothing"))?;

        if begin {
            if let Err(e) = self.begin(&mut command_buffer) {
                let _ = self.free(command_buffer);
                return Err(e);
            }
        }
        Ok(command_buffer)
    }

    /// Allocate a batch of secondary command buffers
    pub fn allocate_secondary(&self, count: u32) -> VulkanResult<Vec<CommandBuffer>> {
        self.allocate(vk::CommandBufferLevel::SECONDARY, count)
    }

    /// Begin recording.
    ///
    /// Secondary buffers begin outside any render pass; use
    /// [`Self::begin_secondary`] to continue a render pass.
    pub fn begin(&self, command_buffer: &mut CommandBuffer) -> VulkanResult<()> {
        let inheritance = vk::CommandBufferInheritanceInfo::default();
        self.begin_with(command_buffer, vk::CommandBufferUsageFlags::empty(), &inheritance)
    }

    /// Begin recording a secondary buffer with explicit inheritance
    pub fn begin_secondary(
        &self,
        command_buffer: &mut CommandBuffer,
        flags: vk::CommandBufferUsageFlags,
        inheritance: &vk::CommandBufferInheritanceInfo,
    ) -> VulkanResult<()> {
        if command_buffer.level != vk::CommandBufferLevel::SECONDARY {
            return Err(VulkanError::invalid("inheritance info given for a primary command buffer"));
        }
        self.begin_with(command_buffer, flags, inheritance)
    }

    fn begin_with(
        &self,
        command_buffer: &mut CommandBuffer,
        flags: vk::CommandBufferUsageFlags,
        inheritance: &vk::CommandBufferInheritanceInfo,
    ) -> VulkanResult<()> {
        let next = command_buffer.state.begin()?;

        let mut begin_info = vk::CommandBufferBeginInfo::builder().flags(flags);
        if command_buffer.level == vk::CommandBufferLevel::SECONDARY {
            begin_info = begin_info.inheritance_info(inheritance);
        }

        unsafe { self.device.begin_command_buffer(command_buffer.handle, &begin_info) }
            .map_err(VulkanError::api("vkBeginCommandBuffer"))?;

        command_buffer.state = next;
        Ok(())
    }

    /// End recording
    pub fn end(&self, command_buffer: &mut CommandBuffer) -> VulkanResult<()> {
        let next = command_buffer.state.end()?;

        unsafe { self.device.end_command_buffer(command_buffer.handle) }
            .map_err(VulkanError::api("vkEndCommandBuffer"))?;

        command_buffer.state = next;
        Ok(())
    }

    /// Discard a buffer's recording so it can be recorded again
    pub fn reset(&self, command_buffer: &mut CommandBuffer) -> VulkanResult<()> {
        let next = command_buffer.state.reset()?;

        unsafe {
            self.device
                .reset_command_buffer(command_buffer.handle, vk::CommandBufferResetFlags::empty())
        }
        .map_err(VulkanError::api("vkResetCommandBuffer"))?;

        command_buffer.state = next;
        Ok(())
    }

    /// Submit one primary buffer without blocking.
    ///
    /// The buffer stays pending until the owner has observed `fence` and
    /// called [`CommandBuffer::mark_complete`].
    pub fn submit(
        &self,
        queue: vk::Queue,
        command_buffer: &mut CommandBuffer,
        wait_semaphores: &[vk::Semaphore],
        wait_stages: &[vk::PipelineStageFlags],
        signal_semaphores: &[vk::Semaphore],
        fence: vk::Fence,
    ) -> VulkanResult<()> {
        if wait_semaphores.len() != wait_stages.len() {
            return Err(VulkanError::invalid("every wait semaphore needs a wait stage"));
        }
        let next = command_buffer.state.submit()?;

        let command_buffers = [command_buffer.handle];
        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(wait_semaphores)
            .wait_dst_stage_mask(wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(signal_semaphores);

        unsafe { self.device.queue_submit(queue, &[submit_info.build()], fence) }
            .map_err(VulkanError::api("vkQueueSubmit"))?;

        command_buffer.state = next;
        Ok(())
    }

    /// End recording if needed, submit alone on `queue` and block until the GPU
    /// has executed it.
    ///
    /// Every side effect of the buffer is visible when this returns. A
    /// transient unsignaled fence is created for the wait and destroyed
    /// afterwards; the buffer comes back reset and ready to record again.
    pub fn submit_and_wait(&self, queue: vk::Queue, command_buffer: &mut CommandBuffer) -> VulkanResult<()> {
        if command_buffer.state == CommandBufferState::Recording {
            self.end(command_buffer)?;
        }

        let fence = Fence::new(self.device.clone(), false)?;
        self.submit(queue, command_buffer, &[], &[], &[], fence.handle())?;
        fence.wait(u64::MAX)?;

        command_buffer.mark_complete()?;
        self.reset(command_buffer)
    }

    /// Copy a staging buffer into `destination` on a fresh one-shot command
    /// buffer and wait for it.
    ///
    /// On return the image is in shader-read-only layout holding the copied
    /// texels.
    pub fn transfer_buffer_to_image(
        &self,
        queue: vk::Queue,
        source: vk::Buffer,
        destination: vk::Image,
        aspect: vk::ImageAspectFlags,
        regions: &[vk::BufferImageCopy],
    ) -> VulkanResult<()> {
        let mut command_buffer = self.allocate_primary(true)?;

        let result =
            record_stage_buffer_to_image(&self.device, &command_buffer, source, destination, aspect, regions)
                .and_then(|()| self.submit_and_wait(queue, &mut command_buffer));

        let freed = self.free(command_buffer);
        result.and(freed)
    }

    /// Return a buffer to the pool
    pub fn free(&self, mut command_buffer: CommandBuffer) -> VulkanResult<()> {
        command_buffer.state = command_buffer.state.free()?;
        unsafe {
            self.device
                .free_command_buffers(self.command_pool, &[command_buffer.handle]);
        }
        Ok(())
    }

    /// Return a batch of secondary buffers to the pool
    pub fn free_secondary(&self, command_buffers: Vec<CommandBuffer>) -> VulkanResult<()> {
        for command_buffer in &command_buffers {
            command_buffer.state.free()?;
        }
        let handles: Vec<vk::CommandBuffer> = command_buffers.iter().map(CommandBuffer::handle).collect();
        if !handles.is_empty() {
            unsafe { self.device.free_command_buffers(self.command_pool, &handles) };
        }
        Ok(())
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe {
            // Destroying the pool frees every buffer still allocated from it
            self.device.destroy_command_pool(self.command_pool, None);
        }
    }
}

/// Layout transitions bracketing a staging copy into `image`.
///
/// The first barrier moves the image from undefined to transfer-destination
/// layout before the copy, the second to shader-read-only layout for
/// sampling in fragment shaders.
pub fn transfer_barriers(image: vk::Image, aspect: vk::ImageAspectFlags) -> [TransferBarrier; 2] {
    let range = vk::ImageSubresourceRange {
        aspect_mask: aspect,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    };

    let to_transfer = vk::ImageMemoryBarrier::builder()
        .src_access_mask(vk::AccessFlags::empty())
        .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE)
        .old_layout(vk::ImageLayout::UNDEFINED)
        .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(range)
        .build();

    let to_shader_read = vk::ImageMemoryBarrier::builder()
        .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
        .dst_access_mask(vk::AccessFlags::SHADER_READ)
        .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
        .new_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(range)
        .build();

    [
        TransferBarrier {
            src_stage: vk::PipelineStageFlags::ALL_COMMANDS,
            dst_stage: vk::PipelineStageFlags::TRANSFER,
            barrier: to_transfer,
        },
        TransferBarrier {
            src_stage: vk::PipelineStageFlags::TRANSFER,
            dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
            barrier: to_shader_read,
        },
    ]
}

/// One image barrier and the stages it separates
#[derive(Clone, Copy)]
pub struct TransferBarrier {
    /// Stages that must finish before the transition
    pub src_stage: vk::PipelineStageFlags,
    /// Stages that wait for the transition
    pub dst_stage: vk::PipelineStageFlags,
    /// The layout transition itself
    pub barrier: vk::ImageMemoryBarrier,
}

/// Record barrier, buffer-to-image copy, barrier into a recording buffer
pub fn record_stage_buffer_to_image(
    device: &Device,
    command_buffer: &CommandBuffer,
    source: vk::Buffer,
    destination: vk::Image,
    aspect: vk::ImageAspectFlags,
    regions: &[vk::BufferImageCopy],
) -> VulkanResult<()> {
    if command_buffer.state() != CommandBufferState::Recording {
        return Err(VulkanError::invalid("staging copy recorded into a buffer that is not recording"));
    }

    let [before, after] = transfer_barriers(destination, aspect);
    unsafe {
        device.cmd_pipeline_barrier(
            command_buffer.handle(),
            before.src_stage,
            before.dst_stage,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[before.barrier],
        );
        device.cmd_copy_buffer_to_image(
            command_buffer.handle(),
            source,
            destination,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            regions,
        );
        device.cmd_pipeline_barrier(
            command_buffer.handle(),
            after.src_stage,
            after.dst_stage,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[after.barrier],
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    #[test]
    fn test_full_lifecycle() {
        let state = CommandBufferState::Initial;
        let state = state.begin().unwrap();
        assert_eq!(state, CommandBufferState::Recording);
        let state = state.end().unwrap();
        assert_eq!(state, CommandBufferState::Executable);
        let state = state.submit().unwrap();
        assert_eq!(state, CommandBufferState::Pending);
        let state = state.complete().unwrap();
        assert_eq!(state, CommandBufferState::Executable);
        let state = state.reset().unwrap();
        assert_eq!(state, CommandBufferState::Initial);
        assert_eq!(state.free().unwrap(), CommandBufferState::Freed);
    }

    #[test]
    fn test_rerecord_after_completion() {
        let state = CommandBufferState::Pending.complete().unwrap();
        assert_eq!(state.begin().unwrap(), CommandBufferState::Recording);
    }

    #[test]
    fn test_misuse_rejected() {
        assert!(CommandBufferState::Recording.begin().is_err());
        assert!(CommandBufferState::Initial.end().is_err());
        assert!(CommandBufferState::Recording.submit().is_err());
        assert!(CommandBufferState::Initial.submit().is_err());
        assert!(CommandBufferState::Pending.begin().is_err());
        assert!(CommandBufferState::Pending.reset().is_err());
        assert!(CommandBufferState::Executable.complete().is_err());
    }

    #[test]
    fn test_pending_and_freed_cannot_be_freed() {
        assert!(CommandBufferState::Pending.free().is_err());
        assert!(CommandBufferState::Freed.free().is_err());
        assert!(CommandBufferState::Freed.begin().is_err());
        assert_eq!(CommandBufferState::Recording.free().unwrap(), CommandBufferState::Freed);
    }

    #[test]
    fn test_misuse_message_names_state() {
        let err = CommandBufferState::Pending.begin().unwrap_err();
        assert!(err.to_string().contains("Pending"));
        assert!(err.to_string().contains("begin"));
    }

    #[test]
    fn test_transfer_barrier_layouts() {
        let image = vk::Image::from_raw(42);
        let [before, after] = transfer_barriers(image, vk::ImageAspectFlags::COLOR);

        assert_eq!(before.barrier.old_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(before.barrier.new_layout, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
        assert_eq!(before.barrier.dst_access_mask, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(before.src_stage, vk::PipelineStageFlags::ALL_COMMANDS);
        assert_eq!(before.dst_stage, vk::PipelineStageFlags::TRANSFER);

        assert_eq!(after.barrier.old_layout, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
        assert_eq!(after.barrier.new_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert_eq!(after.barrier.src_access_mask, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(after.barrier.dst_access_mask, vk::AccessFlags::SHADER_READ);
        assert_eq!(after.src_stage, vk::PipelineStageFlags::TRANSFER);
        assert_eq!(after.dst_stage, vk::PipelineStageFlags::FRAGMENT_SHADER);
    }

    #[test]
    fn test_transfer_barriers_target_image() {
        let image = vk::Image::from_raw(7);
        for transfer in transfer_barriers(image, vk::ImageAspectFlags::DEPTH) {
            assert_eq!(transfer.barrier.image, image);
            assert_eq!(transfer.barrier.subresource_range.aspect_mask, vk::ImageAspectFlags::DEPTH);
            assert_eq!(transfer.barrier.src_queue_family_index, vk::QUEUE_FAMILY_IGNORED);
        }
    }
}
