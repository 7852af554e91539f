//! Render pass creation
//!
//! Render passes are returned as raw handles. Ownership normally goes to the
//! render pass registry, which destroys them at shutdown.

use ash::{vk, Device};

use crate::backend::vulkan::{VulkanError, VulkanResult};

/// Single-subpass render pass with one color and an optional depth attachment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderPassDesc {
    /// Color attachment format; `UNDEFINED` means the presentation surface format
    pub color_format: vk::Format,
    /// Depth attachment format; `UNDEFINED` means no depth attachment
    pub depth_format: vk::Format,
    /// Layout the color attachment ends the pass in
    pub color_final_layout: vk::ImageLayout,
}

impl RenderPassDesc {
    /// Pass presenting straight to the swap image, without depth
    pub fn present() -> Self {
        Self {
            color_format: vk::Format::UNDEFINED,
            depth_format: vk::Format::UNDEFINED,
            color_final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
        }
    }

    /// Set the depth attachment format
    pub fn with_depth(mut self, depth_format: vk::Format) -> Self {
        self.depth_format = depth_format;
        self
    }

    /// Replace an undefined color format with the surface's
    pub fn resolve_color(mut self, surface_format: vk::Format) -> Self {
        if self.color_format == vk::Format::UNDEFINED {
            self.color_format = surface_format;
        }
        self
    }

    /// Whether a depth attachment is part of the pass
    pub fn has_depth(&self) -> bool {
        self.depth_format != vk::Format::UNDEFINED
    }

    /// Attachment descriptions: color at index 0, depth at index 1 when present
    pub fn attachments(&self) -> Vec<vk::AttachmentDescription> {
        let mut attachments = vec![vk::AttachmentDescription::builder()
            .format(self.color_format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(self.color_final_layout)
            .build()];

        if self.has_depth() {
            attachments.push(
                vk::AttachmentDescription::builder()
                    .format(self.depth_format)
                    .samples(vk::SampleCountFlags::TYPE_1)
                    .load_op(vk::AttachmentLoadOp::CLEAR)
                    .store_op(vk::AttachmentStoreOp::STORE)
                    .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                    .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                    .initial_layout(vk::ImageLayout::UNDEFINED)
                    .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
                    .build(),
            );
        }
        attachments
    }

    /// Create the render pass.
    ///
    /// The color format must already be resolved.
    pub fn create(&self, device: &Device) -> VulkanResult<vk::RenderPass> {
        if self.color_format == vk::Format::UNDEFINED {
            return Err(VulkanError::invalid("render pass color format not resolved"));
        }

        let attachments = self.attachments();

        let color_refs = [vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }];
        let depth_ref = vk::AttachmentReference {
            attachment: 1,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        };

        let mut subpass = vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs);
        if self.has_depth() {
            subpass = subpass.depth_stencil_attachment(&depth_ref);
        }
        let subpasses = [subpass.build()];

        let create_info = vk::RenderPassCreateInfo::builder()
            .attachments(&attachments)
            .subpasses(&subpasses);

        let render_pass = unsafe { device.create_render_pass(&create_info, None) }
            .map_err(VulkanError::api("vkCreateRenderPass"))?;

        log::debug!(
            "Created render pass ({:?}, depth {:?}, final {:?})",
            self.color_format,
            self.depth_format,
            self.color_final_layout
        );
        Ok(render_pass)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_undefined_color_takes_surface_format() {
        let desc = RenderPassDesc::present().resolve_color(vk::Format::B8G8R8A8_UNORM);
        assert_eq!(desc.color_format, vk::Format::B8G8R8A8_UNORM);

        let explicit = RenderPassDesc {
            color_format: vk::Format::R16G16B16A16_SFLOAT,
            ..RenderPassDesc::present()
        }
        .resolve_color(vk::Format::B8G8R8A8_UNORM);
        assert_eq!(explicit.color_format, vk::Format::R16G16B16A16_SFLOAT);
    }

    #[test]
    fn test_color_only_attachments() {
        let desc = RenderPassDesc::present().resolve_color(vk::Format::B8G8R8A8_UNORM);
        let attachments = desc.attachments();

        assert_eq!(attachments.len(), 1);
        let color = attachments[0];
        assert_eq!(color.format, vk::Format::B8G8R8A8_UNORM);
        assert_eq!(color.load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(color.store_op, vk::AttachmentStoreOp::STORE);
        assert_eq!(color.initial_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(color.final_layout, vk::ImageLayout::PRESENT_SRC_KHR);
    }

    #[test]
    fn test_depth_attachment_added() {
        let desc = RenderPassDesc {
            color_format: vk::Format::R8G8B8A8_UNORM,
            depth_format: vk::Format::D32_SFLOAT,
            color_final_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        };
        let attachments = desc.attachments();

        assert!(desc.has_depth());
        assert_eq!(attachments.len(), 2);
        assert_eq!(attachments[0].final_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert_eq!(attachments[1].format, vk::Format::D32_SFLOAT);
        assert_eq!(attachments[1].final_layout, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);
    }

    #[test]
    fn test_with_depth() {
        let desc = RenderPassDesc::present().with_depth(vk::Format::D24_UNORM_S8_UINT);
        assert!(desc.has_depth());
        assert!(!RenderPassDesc::present().has_depth());
    }
}
