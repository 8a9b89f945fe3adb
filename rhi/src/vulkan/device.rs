use anyhow::{anyhow, Result};
use log::*;
use std::collections::BTreeSet;
use vulkanalia::{
    vk::{self, DeviceV1_0, HasBuilder},
    Device,
};

use super::{constants, instance::VulkanInstance, physical_device::PhysicalDevice};
use crate::config::RendererSettings;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: Option<u32>,
    pub present: Option<u32>,
    pub compute: Option<u32>,
    pub transfer: Option<u32>,
}

impl QueueFamilyIndices {
    pub fn first_graphics(families: &[vk::QueueFamilyProperties]) -> Option<u32> {
        families
            .iter()
            .position(|p| p.queue_count > 0 && p.queue_flags.contains(vk::QueueFlags::GRAPHICS))
            .map(|i| i as u32)
    }

    /// Walks the families with at least one queue. Graphics and compute take the latest
    /// match, transfer only considers families without graphics. The walk stops as soon as
    /// every role has an index.
    pub fn resolve<F>(families: &[vk::QueueFamilyProperties], mut supports_present: F) -> Result<Self>
    where
        F: FnMut(u32) -> Result<bool>,
    {
        let mut indices = QueueFamilyIndices::default();

        for (index, family) in families.iter().enumerate() {
            if family.queue_count == 0 {
                continue;
            }

            let index = index as u32;
            let flags = family.queue_flags;

            if flags.contains(vk::QueueFlags::GRAPHICS) {
                indices.graphics = Some(index);
            }
            if flags.contains(vk::QueueFlags::COMPUTE) {
                indices.compute = Some(index);
            }
            if flags.contains(vk::QueueFlags::TRANSFER) && !flags.contains(vk::QueueFlags::GRAPHICS)
            {
                indices.transfer = Some(index);
            }
            if supports_present(index)? {
                indices.present = Some(index);
            }

            if indices.is_complete() {
                break;
            }
        }

        Ok(indices)
    }

    pub fn is_complete(&self) -> bool {
        self.graphics.is_some()
            && self.present.is_some()
            && self.compute.is_some()
            && self.transfer.is_some()
    }

    pub fn assign_roles(&self, headless: bool) -> Result<QueueRoles> {
        let graphics = self
            .graphics
            .ok_or_else(|| anyhow!("Missing graphics queue family."))?;

        let present = match (self.present, headless) {
            (Some(present), _) => present,
            (None, true) => graphics,
            (None, false) => return Err(anyhow!("Missing present queue family.")),
        };

        let compute = self.compute.unwrap_or_else(|| {
            debug!("No compute queue family, sharing the graphics family.");
            graphics
        });
        let transfer = self.transfer.unwrap_or_else(|| {
            debug!("No dedicated transfer queue family, sharing the graphics family.");
            graphics
        });

        Ok(QueueRoles {
            graphics,
            present,
            compute,
            transfer,
        })
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct QueueRoles {
    pub graphics: u32,
    pub present: u32,
    pub compute: u32,
    pub transfer: u32,
}

impl QueueRoles {
    pub fn unique_families(&self) -> BTreeSet<u32> {
        [self.graphics, self.present, self.compute, self.transfer]
            .into_iter()
            .collect()
    }
}

#[derive(Copy, Clone, Debug, Default)]
pub struct Queues {
    pub graphics: vk::Queue,
    pub present: vk::Queue,
    pub compute: vk::Queue,
    pub transfer: vk::Queue,
}

pub fn enabled_features(supported: &vk::PhysicalDeviceFeatures) -> vk::PhysicalDeviceFeatures {
    vk::PhysicalDeviceFeatures {
        fill_mode_non_solid: supported.fill_mode_non_solid,
        geometry_shader: supported.geometry_shader,
        tessellation_shader: supported.tessellation_shader,
        sampler_anisotropy: supported.sampler_anisotropy,
        ..Default::default()
    }
}

#[derive(Debug)]
pub struct VulkanDevice {
    pub vk_device: Device,
    queues: Queues,
    roles: QueueRoles,
    features: vk::PhysicalDeviceFeatures,
    ray_tracing: bool,
}

impl VulkanDevice {
    pub unsafe fn new(
        instance: &VulkanInstance,
        physical_device: &PhysicalDevice,
        settings: &RendererSettings,
    ) -> Result<VulkanDevice> {
        let roles = physical_device
            .queue_family_indices()
            .assign_roles(settings.headless)?;

        let queue_priorities = &[1.0];
        let queue_infos = roles
            .unique_families()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(queue_priorities)
            })
            .collect::<Vec<_>>();

        let layers = if instance.validation_enabled() {
            vec![constants::VALIDATION_LAYER.as_ptr()]
        } else {
            vec![]
        };

        let mut extensions = vec![];

        if !settings.headless {
            extensions.push(vk::KHR_SWAPCHAIN_EXTENSION.name.as_ptr());
        }

        // Required by Vulkan SDK on macOS since 1.3.216.
        if instance.portability_enabled() {
            extensions.push(vk::KHR_PORTABILITY_SUBSET_EXTENSION.name.as_ptr());
        }

        let ray_tracing = physical_device.is_ray_tracing_supported();
        if ray_tracing {
            extensions.extend(constants::RAY_TRACING_EXTENSIONS.iter().map(|e| e.as_ptr()));
        }

        let features = enabled_features(physical_device.features());

        let info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_layer_names(&layers)
            .enabled_extension_names(&extensions)
            .enabled_features(&features);

        let device = instance
            .vk_instance
            .create_device(physical_device.handle(), &info, None)?;

        let queues = Queues {
            graphics: device.get_device_queue(roles.graphics, 0),
            present: device.get_device_queue(roles.present, 0),
            compute: device.get_device_queue(roles.compute, 0),
            transfer: device.get_device_queue(roles.transfer, 0),
        };

        info!(
            "Created logical device on `{}` (queue families {:?}, ray tracing {}).",
            physical_device.name(),
            roles,
            if ray_tracing { "on" } else { "off" }
        );

        Ok(VulkanDevice {
            vk_device: device,
            queues,
            roles,
            features,
            ray_tracing,
        })
    }

    pub fn queues(&self) -> &Queues {
        &self.queues
    }

    pub fn queue_roles(&self) -> &QueueRoles {
        &self.roles
    }

    pub fn enabled_features(&self) -> &vk::PhysicalDeviceFeatures {
        &self.features
    }

    pub fn ray_tracing_enabled(&self) -> bool {
        self.ray_tracing
    }

    pub unsafe fn wait_idle(&self) -> Result<()> {
        self.vk_device.device_wait_idle()?;
        Ok(())
    }

    pub unsafe fn destroy(&mut self) {
        self.vk_device.destroy_device(None);
    }
}
