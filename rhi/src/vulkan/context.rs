use super::{device::VulkanDevice, instance::VulkanInstance};

#[derive(Copy, Clone, Debug)]
pub struct VulkanContext<'a> {
    pub instance: &'a VulkanInstance,
    pub device: &'a VulkanDevice,
}

impl<'a> VulkanContext<'a> {
    pub fn new(instance: &'a VulkanInstance, device: &'a VulkanDevice) -> Self {
        Self { instance, device }
    }
}
