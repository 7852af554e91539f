//! Vulkan application base
//!
//! [`VulkanAppBase`] composes the device context, presentation surface,
//! command and descriptor pools, the frame semaphore pair and the named
//! registries, and exposes the helper operations applications build on.
//!
//! Teardown order is fixed: wait for the device to go idle, run the
//! application's cleanup, drop the overlay, clean up the registries, then
//! release the surface, semaphores, pools and finally the device and
//! instance.

use ash::vk;

use super::overlay::{overlay_capture, InputCapture, OverlayInitInfo, UiOverlay};
use super::resize::{ResizeAction, ResizeTracker};
use super::Application;
use crate::backend::vulkan::resources::{self, memory};
use crate::backend::vulkan::state::swapchain;
use crate::backend::vulkan::{
    AcquireOutcome, BufferObject, CommandBuffer, CommandPool, DescriptorPool, DescriptorSetLayoutBuilder,
    DeviceContext, DiagnosticSink, Fence, Framebuffer, FrameSemaphores, ImageObject, PresentOutcome,
    PresentationSurface, RenderPassDesc, Registries, SurfaceTarget, SwapImageHandle, VulkanError, VulkanResult,
};
use crate::core::config::BaseAppConfig;

/// Registry key of the render pass drawing into swap images
pub const DEFAULT_RENDER_PASS: &str = "default";

/// Core objects shared by every Vulkan application
pub struct VulkanAppBase {
    surface: PresentationSurface,
    frame_semaphores: FrameSemaphores,
    descriptor_pool: DescriptorPool,
    command_pool: CommandPool,
    registries: Registries,
    overlay: Option<Box<dyn UiOverlay>>,
    resize: ResizeTracker,
    surface_format: vk::Format,
    // Dropped last: everything above borrows its device
    context: DeviceContext,
}

impl VulkanAppBase {
    /// Bring up the device, surface and pools for `target`, then call
    /// [`Application::prepare`].
    ///
    /// Any failure here is fatal for the application.
    pub fn initialize<T, A>(
        target: &mut T,
        config: &BaseAppConfig,
        sink: Box<dyn DiagnosticSink>,
        app: &mut A,
    ) -> VulkanResult<Self>
    where
        T: SurfaceTarget,
        A: Application + ?Sized,
    {
        config.validate()?;

        let context = DeviceContext::new(&*target, config, sink)?;
        let surface_handle = target.create_surface(context.entry(), context.instance())?;
        let mut surface = PresentationSurface::new(
            context.entry(),
            context.instance(),
            context.raw_device(),
            surface_handle,
            config.renderer.vsync,
        );

        let surface_format = config.renderer.surface_format.to_vk();
        let (width, height) = target.framebuffer_size();
        let resize = ResizeTracker::new(width, height);
        if resize.is_minimized() {
            log::warn!("Window starts minimized, surface provisioning deferred");
            surface.resolve_format(context.physical_device().device, surface_format)?;
        } else {
            surface.prepare(
                context.physical_device().device,
                context.graphics_queue_family(),
                width,
                height,
                surface_format,
            )?;
        }

        let command_pool = CommandPool::new(context.raw_device(), context.graphics_queue_family())?;
        let frame_semaphores = FrameSemaphores::new(context.raw_device())?;
        let descriptor_pool = DescriptorPool::new(context.raw_device(), &config.descriptor_pool)?;

        let mut base = Self {
            surface,
            frame_semaphores,
            descriptor_pool,
            command_pool,
            registries: Registries::default(),
            overlay: None,
            resize,
            surface_format,
            context,
        };

        if let Err(e) = app.prepare(&mut base) {
            log::error!("Application prepare failed: {}", e);
            // Release whatever the application built while the device is alive
            if let Err(idle) = base.terminate(app) {
                log::error!("Teardown after failed prepare: {}", idle);
            }
            return Err(e);
        }

        log::info!("Vulkan application base initialized");
        Ok(base)
    }

    /// Run `frame_loop`, then [`Self::terminate`], whether or not the loop failed.
    ///
    /// Application objects are always released through
    /// [`Application::cleanup`] before the device goes away. A loop error
    /// takes precedence over a teardown error.
    pub fn run<A, F>(mut self, app: &mut A, frame_loop: F) -> VulkanResult<()>
    where
        A: Application + ?Sized,
        F: FnOnce(&mut Self, &mut A) -> VulkanResult<()>,
    {
        let result = frame_loop(&mut self, app);
        if let Err(e) = &result {
            log::error!("Frame loop failed, tearing down: {}", e);
        }
        let terminated = self.terminate(app);
        result.and(terminated)
    }

    /// Wait for the GPU, run [`Application::cleanup`] and release everything.
    ///
    /// Cleanup runs even when the idle wait fails.
    pub fn terminate<A: Application + ?Sized>(mut self, app: &mut A) -> VulkanResult<()> {
        let idle = self.context.wait_idle();
        app.cleanup(&mut self);
        idle
    }

    /// Device context
    pub fn context(&self) -> &DeviceContext {
        &self.context
    }

    /// Logical device
    pub fn device(&self) -> &ash::Device {
        self.context.device()
    }

    /// Presentation surface
    pub fn surface(&self) -> &PresentationSurface {
        &self.surface
    }

    /// Shared command pool
    pub fn command_pool(&self) -> &CommandPool {
        &self.command_pool
    }

    /// Shared descriptor pool
    pub fn descriptor_pool(&self) -> &DescriptorPool {
        &self.descriptor_pool
    }

    /// The persistent semaphore pair
    pub fn frame_semaphores(&self) -> &FrameSemaphores {
        &self.frame_semaphores
    }

    /// Named registries
    pub fn registries(&self) -> &Registries {
        &self.registries
    }

    /// Named registries, for registering new entries
    pub fn registries_mut(&mut self) -> &mut Registries {
        &mut self.registries
    }

    /// Whether the window is minimized and rendering suspended
    pub fn is_minimized(&self) -> bool {
        self.resize.is_minimized()
    }

    // ---- memory and resources ----

    /// Memory type index for a request, or `None` when no type qualifies.
    ///
    /// `None` must be treated as fatal for the resource being created.
    pub fn get_memory_type_index(&self, type_bits: u32, required: vk::MemoryPropertyFlags) -> Option<u32> {
        memory::find_memory_type_index(self.context.memory_properties(), type_bits, required)
    }

    /// Create a buffer with bound memory
    pub fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> VulkanResult<BufferObject> {
        BufferObject::new(
            self.context.raw_device(),
            self.context.physical_device(),
            size,
            usage,
            properties,
        )
    }

    /// Create a device-local 2D image with a view
    pub fn create_texture(
        &self,
        width: u32,
        height: u32,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
    ) -> VulkanResult<ImageObject> {
        ImageObject::new(
            self.context.raw_device(),
            self.context.physical_device(),
            width,
            height,
            format,
            usage,
        )
    }

    /// Release a buffer and its memory
    pub fn destroy_buffer(&self, buffer: BufferObject) {
        drop(buffer);
    }

    /// Release an image, its view and its memory
    pub fn destroy_image(&self, image: ImageObject) {
        drop(image);
    }

    /// One host-visible uniform buffer per swap image
    pub fn create_uniform_buffers(&self, element_size: vk::DeviceSize, count: usize) -> VulkanResult<Vec<BufferObject>> {
        resources::create_uniform_buffers(
            self.context.device(),
            self.context.physical_device(),
            element_size,
            count,
        )
    }

    /// Copy `data` into a host-visible allocation of `allocation_size` bytes.
    ///
    /// Prefer [`BufferObject::write_bytes`], which checks everything itself.
    ///
    /// # Safety
    ///
    /// See [`memory::write_to_host_visible_memory`]; `allocation` must come
    /// from this base's device.
    pub unsafe fn write_to_host_visible_memory(
        &self,
        allocation: vk::DeviceMemory,
        allocation_size: vk::DeviceSize,
        data: &[u8],
    ) -> VulkanResult<()> {
        memory::write_to_host_visible_memory(self.context.device(), allocation, allocation_size, data)
    }

    // ---- command buffers ----

    /// Allocate a primary command buffer, optionally already recording
    pub fn create_command_buffer(&self, begin: bool) -> VulkanResult<CommandBuffer> {
        self.command_pool.allocate_primary(begin)
    }

    /// End, submit and wait for a one-shot command buffer.
    ///
    /// Blocks the calling thread until the GPU is done; not for per-frame work.
    pub fn finish_command_buffer(&self, command_buffer: &mut CommandBuffer) -> VulkanResult<()> {
        self.command_pool
            .submit_and_wait(self.context.graphics_queue(), command_buffer)
    }

    /// Return a command buffer to the pool
    pub fn destroy_command_buffer(&self, command_buffer: CommandBuffer) -> VulkanResult<()> {
        self.command_pool.free(command_buffer)
    }

    /// Allocate `count` secondary command buffers
    pub fn allocate_command_buffer_secondary(&self, count: u32) -> VulkanResult<Vec<CommandBuffer>> {
        self.command_pool.allocate_secondary(count)
    }

    /// Return secondary command buffers to the pool
    pub fn free_command_buffer_secondary(&self, command_buffers: Vec<CommandBuffer>) -> VulkanResult<()> {
        self.command_pool.free_secondary(command_buffers)
    }

    /// Upload a staging buffer into an image and wait for completion.
    ///
    /// The image ends up in shader-read-only layout.
    pub fn transfer_stage_buffer_to_image(
        &self,
        source: &BufferObject,
        destination: &ImageObject,
        regions: &[vk::BufferImageCopy],
    ) -> VulkanResult<()> {
        self.command_pool.transfer_buffer_to_image(
            self.context.graphics_queue(),
            source.handle(),
            destination.handle(),
            destination.aspect(),
            regions,
        )
    }

    // ---- synchronization ----

    /// Fence created signaled, so the first wait returns immediately
    pub fn create_fence(&self) -> VulkanResult<Fence> {
        Fence::signaled(self.context.raw_device())
    }

    /// Release a fence
    pub fn destroy_fence(&self, fence: Fence) {
        drop(fence);
    }

    // ---- descriptors and registries ----

    /// Allocate a descriptor set from the shared pool
    pub fn allocate_descriptor_set(&self, layout: vk::DescriptorSetLayout) -> VulkanResult<vk::DescriptorSet> {
        self.descriptor_pool.allocate(layout)
    }

    /// Return a descriptor set to the shared pool
    pub fn deallocate_descriptor_set(&self, set: vk::DescriptorSet) -> VulkanResult<()> {
        self.descriptor_pool.free(set)
    }

    /// Create a render pass; an `UNDEFINED` color format means the surface format.
    ///
    /// The caller owns the handle, usually by registering it.
    pub fn create_render_pass(
        &self,
        color_format: vk::Format,
        depth_format: vk::Format,
        color_final_layout: vk::ImageLayout,
    ) -> VulkanResult<vk::RenderPass> {
        RenderPassDesc {
            color_format,
            depth_format,
            color_final_layout,
        }
        .resolve_color(self.target_format())
        .create(self.context.device())
    }

    /// Color format for passes targeting the swap images
    pub fn target_format(&self) -> vk::Format {
        swapchain::target_format(self.surface.surface_format(), self.surface_format)
    }

    /// Registered render pass for `key`
    pub fn get_render_pass(&self, key: &str) -> Option<vk::RenderPass> {
        self.registries.render_passes.get(key)
    }

    /// Registered render pass for `key`, created from `desc` on first use
    pub fn get_or_create_render_pass(&mut self, key: &str, desc: RenderPassDesc) -> VulkanResult<vk::RenderPass> {
        let device = self.context.device();
        let desc = desc.resolve_color(self.target_format());
        self.registries
            .render_passes
            .get_or_create(key, || desc.create(device))
    }

    /// Registered descriptor set layout for `key`, built on first use
    pub fn get_or_create_descriptor_set_layout(
        &mut self,
        key: &str,
        builder: &DescriptorSetLayoutBuilder,
    ) -> VulkanResult<vk::DescriptorSetLayout> {
        let device = self.context.device();
        self.registries
            .descriptor_set_layouts
            .get_or_create(key, || builder.build(device))
    }

    /// Registered pipeline layout for `key`, created on first use
    pub fn get_or_create_pipeline_layout(
        &mut self,
        key: &str,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> VulkanResult<vk::PipelineLayout> {
        let device = self.context.device();
        self.registries.pipeline_layouts.get_or_create(key, || {
            let create_info = vk::PipelineLayoutCreateInfo::builder()
                .set_layouts(set_layouts)
                .push_constant_ranges(push_constant_ranges);
            unsafe { device.create_pipeline_layout(&create_info, None) }
                .map_err(VulkanError::api("vkCreatePipelineLayout"))
        })
    }

    // ---- framebuffers and frames ----

    /// Create a framebuffer over `views`
    pub fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        width: u32,
        height: u32,
        views: &[vk::ImageView],
    ) -> VulkanResult<Framebuffer> {
        Framebuffer::new(self.context.raw_device(), render_pass, width, height, views)
    }

    /// Release framebuffers
    pub fn destroy_framebuffers(&self, framebuffers: Vec<Framebuffer>) {
        drop(framebuffers);
    }

    /// One framebuffer per swap image for `render_pass`, with optional extra
    /// attachments (such as a depth view) after the color view
    pub fn create_swapchain_framebuffers(
        &self,
        render_pass: vk::RenderPass,
        extra_attachments: &[vk::ImageView],
    ) -> VulkanResult<Vec<Framebuffer>> {
        let extent = self.surface.extent();
        self.surface
            .image_views()
            .iter()
            .map(|&view| {
                let mut attachments = Vec::with_capacity(1 + extra_attachments.len());
                attachments.push(view);
                attachments.extend_from_slice(extra_attachments);
                self.create_framebuffer(render_pass, extent.width, extent.height, &attachments)
            })
            .collect()
    }

    /// Render area covering the whole swap extent
    pub fn swapchain_render_area(&self) -> vk::Rect2D {
        self.surface.render_area()
    }

    /// Acquire the next swap image; signals the present-complete semaphore
    pub fn acquire_next_image(&self) -> VulkanResult<AcquireOutcome> {
        self.surface
            .acquire_next_image(self.frame_semaphores.ordering().acquire_signal())
    }

    /// Submit a frame's command buffer.
    ///
    /// Waits on present-complete at the color output stage, signals
    /// render-complete, and signals `fence` when the GPU is done.
    pub fn submit_frame(&self, command_buffer: &mut CommandBuffer, fence: &Fence) -> VulkanResult<()> {
        let ordering = self.frame_semaphores.ordering();
        let (waits, stages) = ordering.submit_waits();
        self.command_pool.submit(
            self.context.graphics_queue(),
            command_buffer,
            &waits,
            &stages,
            &ordering.submit_signals(),
            fence.handle(),
        )
    }

    /// Present `image` once render-complete has signaled
    pub fn present(&self, image: SwapImageHandle) -> VulkanResult<PresentOutcome> {
        self.surface.present(
            self.context.graphics_queue(),
            image,
            &self.frame_semaphores.ordering().present_waits(),
        )
    }

    /// Call [`Application::render`] unless the window is minimized.
    ///
    /// Returns whether a frame was rendered.
    pub fn render<A: Application + ?Sized>(&mut self, app: &mut A) -> VulkanResult<bool> {
        if self.resize.is_minimized() {
            return Ok(false);
        }
        app.render(self)?;
        Ok(true)
    }

    // ---- window events ----

    /// React to a new drawable size.
    ///
    /// A zero dimension marks the window minimized and returns `false`
    /// without touching the surface. Otherwise the device is drained and the
    /// surface reprovisioned with the current format; returns `true`.
    pub fn on_size_changed(&mut self, width: u32, height: u32) -> VulkanResult<bool> {
        match self.resize.on_size_changed(width, height) {
            ResizeAction::Suspend => {
                log::debug!("Window minimized, rendering suspended");
                Ok(false)
            }
            ResizeAction::Reprovision { width, height } => {
                self.context.wait_idle()?;
                self.surface.prepare(
                    self.context.physical_device().device,
                    self.context.graphics_queue_family(),
                    width,
                    height,
                    self.surface_format,
                )?;
                Ok(true)
            }
        }
    }

    /// [`Self::on_size_changed`], then let the application rebuild what
    /// depends on the swap images
    pub fn handle_resize<A: Application + ?Sized>(&mut self, width: u32, height: u32, app: &mut A) -> VulkanResult<bool> {
        let reprovisioned = self.on_size_changed(width, height)?;
        if reprovisioned {
            app.on_surface_reprovisioned(self)?;
        }
        Ok(reprovisioned)
    }

    // ---- overlay ----

    /// Attach a UI overlay whose capture hints route input
    pub fn set_overlay(&mut self, overlay: Box<dyn UiOverlay>) {
        self.overlay = Some(overlay);
    }

    /// Handles an overlay backend needs; the default render pass must exist
    pub fn overlay_init_info(&self) -> VulkanResult<OverlayInitInfo> {
        let render_pass = self
            .registries
            .render_passes
            .get(DEFAULT_RENDER_PASS)
            .ok_or_else(|| VulkanError::invalid("overlay needs the \"default\" render pass to be registered"))?;

        Ok(OverlayInitInfo {
            instance: self.context.instance().handle(),
            physical_device: self.context.physical_device().device,
            device: self.context.device().handle(),
            queue_family: self.context.graphics_queue_family(),
            queue: self.context.graphics_queue(),
            descriptor_pool: self.descriptor_pool.handle(),
            min_image_count: self.surface.image_count(),
            image_count: self.surface.image_count(),
            render_pass,
        })
    }

    /// Input currently claimed by the overlay
    pub fn input_capture(&self) -> InputCapture {
        overlay_capture(self.overlay.as_deref())
    }

    /// Whether the overlay takes this mouse press
    pub fn on_mouse_button_down(&self, _button: glfw::MouseButton) -> bool {
        self.input_capture().contains(InputCapture::MOUSE)
    }

    /// Whether the overlay takes this mouse release
    pub fn on_mouse_button_up(&self, _button: glfw::MouseButton) -> bool {
        self.input_capture().contains(InputCapture::MOUSE)
    }

    /// Whether the overlay takes this mouse movement
    pub fn on_mouse_move(&self, _dx: f64, _dy: f64) -> bool {
        self.input_capture().contains(InputCapture::MOUSE)
    }

    /// Whether the overlay takes keyboard input
    pub fn on_key(&self) -> bool {
        self.input_capture().contains(InputCapture::KEYBOARD)
    }
}

impl Drop for VulkanAppBase {
    fn drop(&mut self) {
        if let Err(e) = self.context.wait_idle() {
            log::error!("Device did not go idle before teardown: {}", e);
        }
        self.overlay = None;
        self.registries.cleanup(self.context.device());
        self.surface.cleanup();
        log::info!("Vulkan application base terminated");
    }
}
