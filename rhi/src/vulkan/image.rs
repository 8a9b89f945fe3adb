use anyhow::Result;
use vulkanalia::vk::{self, DeviceV1_0, HasBuilder};

use super::device::VulkanDevice;

#[derive(Debug)]
pub struct VulkanImage;

impl VulkanImage {
    pub unsafe fn create_views(
        device: &VulkanDevice,
        images: &[vk::Image],
        format: vk::Format,
    ) -> Result<Vec<vk::ImageView>> {
        images
            .iter()
            .map(|image| {
                let components = vk::ComponentMapping::builder()
                    .r(vk::ComponentSwizzle::IDENTITY)
                    .g(vk::ComponentSwizzle::IDENTITY)
                    .b(vk::ComponentSwizzle::IDENTITY)
                    .a(vk::ComponentSwizzle::IDENTITY);

                let subresource_range = vk::ImageSubresourceRange::builder()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .base_mip_level(0)
                    .level_count(1)
                    .base_array_layer(0)
                    .layer_count(1);

                let info = vk::ImageViewCreateInfo::builder()
                    .image(*image)
                    .view_type(vk::ImageViewType::_2D)
                    .format(format)
                    .components(components)
                    .subresource_range(subresource_range);

                device.vk_device.create_image_view(&info, None)
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    pub unsafe fn destroy_views(device: &VulkanDevice, views: &mut Vec<vk::ImageView>) {
        views
            .drain(..)
            .for_each(|v| device.vk_device.destroy_image_view(v, None));
    }
}
