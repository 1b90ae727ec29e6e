//! Framebuffers: a render pass paired with concrete attachment image
//! views.

use ash::vk;
use std::sync::Arc;

use crate::device::Device;
use crate::error::VulkanResult;
use crate::resource::ImageView;

use super::RenderPass;

/// A framebuffer: one image view per attachment of its render pass, in
/// attachment order, plus the derived extent (max across attachments).
pub struct Framebuffer {
    device: Arc<Device>,
    handle: vk::Framebuffer,
    render_pass: Arc<RenderPass>,
    attachments: Vec<ImageView>,
    extent: vk::Extent2D,
}

impl Framebuffer {
    /// Builds a framebuffer over `attachments`, which must be in the same
    /// order as `render_pass.attachment_order()`.
    pub fn new(device: Arc<Device>, render_pass: Arc<RenderPass>, attachments: Vec<ImageView>) -> VulkanResult<Self> {
        let extent = attachments.iter().fold(vk::Extent2D { width: 0, height: 0 }, |acc, v| {
            let e = v.extent();
            vk::Extent2D {
                width: acc.width.max(e.width),
                height: acc.height.max(e.height),
            }
        });
        let views: Vec<vk::ImageView> = attachments.iter().map(ImageView::handle).collect();
        let create_info = vk::FramebufferCreateInfo::default()
            .render_pass(render_pass.handle())
            .attachments(&views)
            .width(extent.width)
            .height(extent.height)
            .layers(1);
        let handle = unsafe { device.raw().create_framebuffer(&create_info, None) }?;
        Ok(Self {
            device,
            handle,
            render_pass,
            attachments,
            extent,
        })
    }

    pub fn handle(&self) -> vk::Framebuffer {
        self.handle
    }
    pub fn render_pass(&self) -> &Arc<RenderPass> {
        &self.render_pass
    }
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
    pub fn attachment(&self, index: usize) -> Option<&ImageView> {
        self.attachments.get(index)
    }
    pub fn attachment_by_name(&self, name: &str) -> Option<&ImageView> {
        let index = self.render_pass.attachment_index(name)? as usize;
        self.attachments.get(index)
    }
}

impl Drop for Framebuffer {
    fn drop(&mut self) {
        unsafe { self.device.raw().destroy_framebuffer(self.handle, None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extent_is_max_across_attachments() {
        let extents = [
            vk::Extent2D { width: 640, height: 480 },
            vk::Extent2D { width: 800, height: 400 },
        ];
        let combined = extents.iter().fold(vk::Extent2D { width: 0, height: 0 }, |acc, e| vk::Extent2D {
            width: acc.width.max(e.width),
            height: acc.height.max(e.height),
        });
        assert_eq!(combined, vk::Extent2D { width: 800, height: 480 });
    }
}
