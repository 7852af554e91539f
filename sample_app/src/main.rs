//! Clear-screen sample
//!
//! Drives [`VulkanAppBase`] with the steady-state frame loop: acquire, wait
//! the image's fence, record a clear, submit with the persistent semaphore
//! pair, present. Resizing and minimizing reprovision or suspend the surface;
//! F11 toggles fullscreen and Escape quits.
//!
//! An optional first argument names a TOML or RON configuration file.

use glfw::{Action, Key, WindowEvent};
use vulkan_base::foundation::logging;
use vulkan_base::prelude::*;

/// Per swap image objects
struct FrameResources {
    framebuffer: Framebuffer,
    command_buffer: CommandBuffer,
    fence: Fence,
}

impl FrameResources {
    fn release(mut self, base: &VulkanAppBase) -> VulkanResult<()> {
        self.fence.wait(u64::MAX)?;
        if self.command_buffer.state() == CommandBufferState::Pending {
            self.command_buffer.mark_complete()?;
        }
        base.destroy_command_buffer(self.command_buffer)?;
        base.destroy_fence(self.fence);
        base.destroy_framebuffers(vec![self.framebuffer]);
        Ok(())
    }
}

#[derive(Default)]
struct ClearScreen {
    render_pass: vk::RenderPass,
    frames: Vec<FrameResources>,
    frame_count: u64,
    resize_requested: bool,
}

impl ClearScreen {
    fn build_frames(&mut self, base: &VulkanAppBase) -> VulkanResult<()> {
        let framebuffers = base.create_swapchain_framebuffers(self.render_pass, &[])?;
        for framebuffer in framebuffers {
            self.frames.push(FrameResources {
                framebuffer,
                command_buffer: base.create_command_buffer(false)?,
                fence: base.create_fence()?,
            });
        }
        log::info!("Built {} frames", self.frames.len());
        Ok(())
    }

    fn release_frames(&mut self, base: &VulkanAppBase) -> VulkanResult<()> {
        for frame in self.frames.drain(..) {
            frame.release(base)?;
        }
        Ok(())
    }

    fn clear_color(&self) -> [f32; 4] {
        let phase = (self.frame_count % 360) as f32 * std::f32::consts::PI / 180.0;
        [0.5 + 0.5 * phase.sin(), 0.2, 0.5 + 0.5 * phase.cos(), 1.0]
    }

    fn take_resize_request(&mut self) -> bool {
        std::mem::take(&mut self.resize_requested)
    }
}

impl Application for ClearScreen {
    fn prepare(&mut self, base: &mut VulkanAppBase) -> VulkanResult<()> {
        self.render_pass = base.get_or_create_render_pass(DEFAULT_RENDER_PASS, RenderPassDesc::present())?;
        if !base.is_minimized() {
            self.build_frames(base)?;
        }
        Ok(())
    }

    fn render(&mut self, base: &mut VulkanAppBase) -> VulkanResult<()> {
        let image = match base.acquire_next_image()? {
            AcquireOutcome::Ready { image, suboptimal } => {
                self.resize_requested |= suboptimal;
                image
            }
            AcquireOutcome::OutOfDate => {
                self.resize_requested = true;
                return Ok(());
            }
        };

        let clear_color = self.clear_color();
        let render_area = base.swapchain_render_area();
        let Some(frame) = self.frames.get_mut(image.index() as usize) else {
            return Err(VulkanError::InvalidOperation {
                reason: format!("no frame resources for swap image {}", image.index()),
            });
        };

        frame.fence.wait(u64::MAX)?;
        frame.fence.reset()?;
        if frame.command_buffer.state() == CommandBufferState::Pending {
            frame.command_buffer.mark_complete()?;
        }

        let pool = base.command_pool();
        pool.begin(&mut frame.command_buffer)?;

        let clear_values = [vk::ClearValue {
            color: vk::ClearColorValue { float32: clear_color },
        }];
        let begin_info = vk::RenderPassBeginInfo::builder()
            .render_pass(self.render_pass)
            .framebuffer(frame.framebuffer.handle())
            .render_area(render_area)
            .clear_values(&clear_values);

        unsafe {
            let device = base.device();
            device.cmd_begin_render_pass(frame.command_buffer.handle(), &begin_info, vk::SubpassContents::INLINE);
            device.cmd_end_render_pass(frame.command_buffer.handle());
        }
        pool.end(&mut frame.command_buffer)?;

        base.submit_frame(&mut frame.command_buffer, &frame.fence)?;
        if base.present(image)?.needs_reprovision() {
            self.resize_requested = true;
        }

        self.frame_count += 1;
        Ok(())
    }

    fn cleanup(&mut self, base: &mut VulkanAppBase) {
        if let Err(e) = self.release_frames(base) {
            log::error!("Failed to release frame resources: {}", e);
        }
        log::info!("Rendered {} frames", self.frame_count);
    }

    fn on_surface_reprovisioned(&mut self, base: &mut VulkanAppBase) -> VulkanResult<()> {
        self.release_frames(base)?;
        self.build_frames(base)
    }
}

fn load_config() -> Result<BaseAppConfig, Box<dyn std::error::Error>> {
    match std::env::args().nth(1) {
        Some(path) => Ok(BaseAppConfig::load_from_file(path)?),
        None => Ok(BaseAppConfig::new("Clear Screen").with_window_size(1280, 720)),
    }
}

fn frame_loop(window: &mut Window, base: &mut VulkanAppBase, app: &mut ClearScreen) -> VulkanResult<()> {
    while !window.should_close() {
        window.poll_events();
        for event in window.flush_events() {
            match event {
                WindowEvent::FramebufferSize(width, height) => {
                    base.handle_resize(width.max(0) as u32, height.max(0) as u32, app)?;
                }
                WindowEvent::Key(Key::Escape, _, Action::Press, _) => {
                    if !base.on_key() {
                        window.set_should_close(true);
                    }
                }
                WindowEvent::Key(Key::F11, _, Action::Press, _) => window.toggle_fullscreen(),
                WindowEvent::MouseButton(button, Action::Press, _) => {
                    if !base.on_mouse_button_down(button) {
                        log::debug!("Mouse {:?} pressed", button);
                    }
                }
                _ => {}
            }
        }

        if base.is_minimized() {
            let (width, height) = window.wait_while_minimized();
            base.handle_resize(width, height, app)?;
            continue;
        }

        base.render(app)?;
        if app.take_resize_request() {
            let (width, height) = window.get_framebuffer_size();
            base.handle_resize(width, height, app)?;
        }
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    logging::init(&config.log_level);

    let mut window = Window::new(&config.window)?;
    let mut app = ClearScreen::default();
    let base = VulkanAppBase::initialize(&mut window, &config, Box::new(LogSink), &mut app)?;

    base.run(&mut app, |base, app| frame_loop(&mut window, base, app))?;
    Ok(())
}
