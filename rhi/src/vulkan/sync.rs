use anyhow::Result;
use vulkanalia::vk::{self, DeviceV1_0, Handle, HasBuilder};

use super::{constants, device::VulkanDevice};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FenceStatus {
    Complete,
    Incomplete,
}

#[derive(Debug)]
pub struct VulkanFence {
    fence: vk::Fence,
}

impl VulkanFence {
    pub unsafe fn new(device: &VulkanDevice, signaled: bool) -> Result<Self> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let info = vk::FenceCreateInfo::builder().flags(flags);
        let fence = device.vk_device.create_fence(&info, None)?;
        Ok(Self { fence })
    }

    pub fn handle(&self) -> vk::Fence {
        self.fence
    }

    pub unsafe fn status(&self, device: &VulkanDevice) -> Result<FenceStatus> {
        Ok(match device.vk_device.get_fence_status(self.fence)? {
            vk::SuccessCode::SUCCESS => FenceStatus::Complete,
            _ => FenceStatus::Incomplete,
        })
    }

    pub unsafe fn wait(&self, device: &VulkanDevice) -> Result<()> {
        device
            .vk_device
            .wait_for_fences(&[self.fence], true, constants::INFINITE_TIMEOUT)?;
        Ok(())
    }

    pub unsafe fn reset(&self, device: &VulkanDevice) -> Result<()> {
        device.vk_device.reset_fences(&[self.fence])?;
        Ok(())
    }

    pub unsafe fn destroy(&mut self, device: &VulkanDevice) {
        device.vk_device.destroy_fence(self.fence, None);
        self.fence = vk::Fence::null();
    }
}

#[derive(Debug)]
pub struct VulkanSemaphore {
    semaphore: vk::Semaphore,
}

impl VulkanSemaphore {
    pub unsafe fn new(device: &VulkanDevice) -> Result<Self> {
        let info = vk::SemaphoreCreateInfo::builder();
        let semaphore = device.vk_device.create_semaphore(&info, None)?;
        Ok(Self { semaphore })
    }

    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }

    pub unsafe fn destroy(&mut self, device: &VulkanDevice) {
        device.vk_device.destroy_semaphore(self.semaphore, None);
        self.semaphore = vk::Semaphore::null();
    }
}
