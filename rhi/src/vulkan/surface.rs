use anyhow::{anyhow, Result};
use log::*;
use vulkanalia::prelude::v1_0::*;
use vulkanalia::vk::KhrSurfaceExtension;

use super::{
    constants, device::QueueFamilyIndices, instance::VulkanInstance,
    physical_device::PhysicalDevice,
};
use crate::window::PresentationWindow;

pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|f| {
            f.format == constants::OPTIMAL_SURFACE_FORMAT
                && f.color_space == constants::OPTIMAL_COLOR_SPACE
        })
        .or_else(|| formats.first())
        .copied()
}

pub fn choose_present_mode(present_modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    if present_modes.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}

pub fn choose_depth_format<F>(mut format_properties: F) -> Option<vk::Format>
where
    F: FnMut(vk::Format) -> vk::FormatProperties,
{
    constants::DEPTH_FORMAT_CANDIDATES.into_iter().find(|&format| {
        format_properties(format)
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
    })
}

pub fn choose_composite_alpha(supported: vk::CompositeAlphaFlagsKHR) -> vk::CompositeAlphaFlagsKHR {
    [
        vk::CompositeAlphaFlagsKHR::OPAQUE,
        vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::INHERIT,
    ]
    .into_iter()
    .find(|&flag| supported.contains(flag))
    .unwrap_or(vk::CompositeAlphaFlagsKHR::OPAQUE)
}

#[derive(Debug)]
pub struct VulkanSurface {
    surface: vk::SurfaceKHR,
    physical_device: vk::PhysicalDevice,
    capabilities: vk::SurfaceCapabilitiesKHR,
    formats: Vec<vk::SurfaceFormatKHR>,
    present_modes: Vec<vk::PresentModeKHR>,
    optimal_format: vk::SurfaceFormatKHR,
    optimal_present_mode: vk::PresentModeKHR,
    depth_format: Option<vk::Format>,
}

impl VulkanSurface {
    pub unsafe fn new(
        instance: &VulkanInstance,
        physical_device: &mut PhysicalDevice,
        window: &dyn PresentationWindow,
    ) -> Result<VulkanSurface> {
        let vk_instance = &instance.vk_instance;
        let surface = window.create_surface(vk_instance)?;
        let handle = physical_device.handle();

        let capabilities =
            vk_instance.get_physical_device_surface_capabilities_khr(handle, surface)?;
        let formats = vk_instance.get_physical_device_surface_formats_khr(handle, surface)?;
        let present_modes =
            vk_instance.get_physical_device_surface_present_modes_khr(handle, surface)?;

        let indices = QueueFamilyIndices::resolve(physical_device.queue_families(), |index| {
            Ok(vk_instance.get_physical_device_surface_support_khr(handle, index, surface)?)
        })?;
        debug!("Queue families against the window surface: {:?}", indices);
        physical_device.set_queue_family_indices(indices);

        let optimal_format = choose_surface_format(&formats)
            .ok_or_else(|| anyhow!("Surface reports no formats."))?;
        let optimal_present_mode = choose_present_mode(&present_modes);
        let depth_format =
            choose_depth_format(|format| physical_device.format_properties(instance, format));
        if depth_format.is_none() {
            warn!("No depth format usable as an optimal tiling attachment.");
        }

        info!(
            "Created surface ({:?} {:?}, {:?}, depth {:?}).",
            optimal_format.format, optimal_format.color_space, optimal_present_mode, depth_format
        );

        Ok(VulkanSurface {
            surface,
            physical_device: handle,
            capabilities,
            formats,
            present_modes,
            optimal_format,
            optimal_present_mode,
            depth_format,
        })
    }

    pub unsafe fn refresh_capabilities(
        &mut self,
        instance: &VulkanInstance,
    ) -> Result<vk::SurfaceCapabilitiesKHR> {
        self.capabilities = instance
            .vk_instance
            .get_physical_device_surface_capabilities_khr(self.physical_device, self.surface)?;
        Ok(self.capabilities)
    }

    pub fn capabilities(&self) -> &vk::SurfaceCapabilitiesKHR {
        &self.capabilities
    }

    pub fn handle(&self) -> vk::SurfaceKHR {
        self.surface
    }

    pub fn formats(&self) -> &[vk::SurfaceFormatKHR] {
        &self.formats
    }

    pub fn present_modes(&self) -> &[vk::PresentModeKHR] {
        &self.present_modes
    }

    pub fn optimal_format(&self) -> vk::SurfaceFormatKHR {
        self.optimal_format
    }

    pub fn optimal_present_mode(&self) -> vk::PresentModeKHR {
        self.optimal_present_mode
    }

    pub fn depth_format(&self) -> Option<vk::Format> {
        self.depth_format
    }

    pub unsafe fn destroy(&mut self, instance: &VulkanInstance) {
        instance.vk_instance.destroy_surface_khr(self.surface, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    #[test]
    fn prefers_bgra_srgb_nonlinear() {
        let formats = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        assert_eq!(
            choose_surface_format(&formats).map(|f| f.format),
            Some(vk::Format::B8G8R8A8_UNORM)
        );
    }

    #[test]
    fn falls_back_to_first_format() {
        let formats = [
            format(vk::Format::R16G16B16A16_SFLOAT, vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT),
            format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        assert_eq!(
            choose_surface_format(&formats).map(|f| f.format),
            Some(vk::Format::R16G16B16A16_SFLOAT)
        );
        assert!(choose_surface_format(&[]).is_none());
    }

    #[test]
    fn mailbox_or_fifo() {
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX]),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::IMMEDIATE]),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn depth_format_follows_candidate_order() {
        let mut tried = Vec::new();
        let depth = choose_depth_format(|format| {
            tried.push(format);
            let optimal_tiling_features = if format == vk::Format::D24_UNORM_S8_UINT
                || format == vk::Format::D16_UNORM
            {
                vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT
            } else {
                vk::FormatFeatureFlags::empty()
            };
            vk::FormatProperties {
                optimal_tiling_features,
                ..Default::default()
            }
        });

        assert_eq!(depth, Some(vk::Format::D24_UNORM_S8_UINT));
        assert_eq!(
            tried,
            [
                vk::Format::D32_SFLOAT_S8_UINT,
                vk::Format::D32_SFLOAT,
                vk::Format::D24_UNORM_S8_UINT
            ]
        );
        assert_eq!(choose_depth_format(|_| vk::FormatProperties::default()), None);
    }

    #[test]
    fn composite_alpha_prefers_opaque() {
        assert_eq!(
            choose_composite_alpha(
                vk::CompositeAlphaFlagsKHR::INHERIT | vk::CompositeAlphaFlagsKHR::OPAQUE
            ),
            vk::CompositeAlphaFlagsKHR::OPAQUE
        );
        assert_eq!(
            choose_composite_alpha(vk::CompositeAlphaFlagsKHR::INHERIT),
            vk::CompositeAlphaFlagsKHR::INHERIT
        );
    }
}
