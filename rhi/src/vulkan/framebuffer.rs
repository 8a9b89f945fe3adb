use super::device::VulkanDevice;
use anyhow::Result;
use vulkanalia::vk::{self, DeviceV1_0, HasBuilder};

pub struct VulkanFramebuffer;

impl VulkanFramebuffer {
    pub unsafe fn create(
        device: &VulkanDevice,
        render_pass: vk::RenderPass,
        image_views: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> Result<Vec<vk::Framebuffer>> {
        let framebuffers = image_views
            .iter()
            .map(|i| {
                let attachments = &[*i];
                let create_info = vk::FramebufferCreateInfo::builder()
                    .render_pass(render_pass)
                    .attachments(attachments)
                    .width(extent.width)
                    .height(extent.height)
                    .layers(1);

                device.vk_device.create_framebuffer(&create_info, None)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(framebuffers)
    }

    pub unsafe fn destroy(device: &VulkanDevice, framebuffers: &mut Vec<vk::Framebuffer>) {
        framebuffers
            .drain(..)
            .for_each(|f| device.vk_device.destroy_framebuffer(f, None));
    }
}
