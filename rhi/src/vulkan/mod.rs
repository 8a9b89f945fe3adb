use anyhow::Result;
use log::*;
use std::sync::Arc;

use crate::config::RendererSettings;
use crate::window::PresentationWindow;
use context::VulkanContext;
use descriptor_pool::{DescriptorSetDesc, VulkanDescriptorPool};
use descriptor_set::{DescriptorData, VulkanDescriptorSet};
use device::VulkanDevice;
use instance::VulkanInstance;
use physical_device::{available_graphic_physical_devices, PhysicalDevice, VulkanCandidateSource};
use root_signature::{RootSignatureDesc, VulkanRootSignature};
use surface::VulkanSurface;
use swapchain::VulkanSwapchain;

pub mod command_buffer;
pub mod constants;
pub mod context;
pub mod descriptor_pool;
pub mod descriptor_set;
pub mod device;
pub mod framebuffer;
pub mod image;
pub mod instance;
pub mod physical_device;
pub mod pipeline;
pub mod recording;
pub mod render_pass;
pub mod root_signature;
pub mod surface;
pub mod swapchain;
pub mod sync;

#[cfg(test)]
mod testing;

#[derive(Debug)]
pub struct VulkanRenderer {
    instance: VulkanInstance,
    physical_device: PhysicalDevice,
    device: VulkanDevice,
    descriptor_pool: VulkanDescriptorPool,
    swapchain: Option<VulkanSwapchain>,
    root_signatures: Vec<Arc<VulkanRootSignature>>,
    settings: RendererSettings,
    frame: u64,
}

impl VulkanRenderer {
    pub unsafe fn new(
        settings: &RendererSettings,
        window: Option<Arc<dyn PresentationWindow>>,
    ) -> Result<VulkanRenderer> {
        let window = window.filter(|_| !settings.headless);
        let settings = RendererSettings {
            headless: window.is_none(),
            ..settings.clone()
        };

        let instance = VulkanInstance::new(&settings, window.as_deref())?;

        let source = VulkanCandidateSource::new(&instance, window.as_deref());
        let ratings = available_graphic_physical_devices(&source)?;
        let mut physical_device =
            PhysicalDevice::select(&ratings, settings.preferred_gpu.as_deref())?;

        let surface = match &window {
            Some(window) => Some(VulkanSurface::new(
                &instance,
                &mut physical_device,
                window.as_ref(),
            )?),
            None => None,
        };

        let device = VulkanDevice::new(&instance, &physical_device, &settings)?;
        let descriptor_pool = VulkanDescriptorPool::new(
            &device,
            settings.descriptor_sets_per_pool,
            device.ray_tracing_enabled(),
        )?;

        let swapchain = match (window, surface) {
            (Some(window), Some(surface)) => {
                let context = VulkanContext::new(&instance, &device);
                let mut swapchain = VulkanSwapchain::new(context, window, surface, settings.vsync)?;
                swapchain.set_clear_color(settings.clear_color);
                if swapchain.prepare_next_frame(context)? {
                    swapchain.start_graphic_command_buffer_and_render_pass(context)?;
                }
                Some(swapchain)
            }
            _ => {
                info!("Running headless, no swapchain created.");
                None
            }
        };

        Ok(VulkanRenderer {
            instance,
            physical_device,
            device,
            descriptor_pool,
            swapchain,
            root_signatures: Vec::new(),
            settings,
            frame: 0,
        })
    }

    pub unsafe fn render(&mut self) -> Result<()> {
        let context = VulkanContext::new(&self.instance, &self.device);
        if let Some(swapchain) = self.swapchain.as_mut() {
            swapchain.flip(context)?;
        }
        self.frame += 1;
        Ok(())
    }

    pub unsafe fn set_vsync(&mut self, vsync: bool) -> Result<()> {
        let context = VulkanContext::new(&self.instance, &self.device);
        self.settings.vsync = match self.swapchain.as_mut() {
            Some(swapchain) => {
                swapchain.set_vsync(context, vsync)?;
                swapchain.vsync()
            }
            None => vsync,
        };
        Ok(())
    }

    pub fn vsync(&self) -> bool {
        self.settings.vsync
    }

    pub unsafe fn resize(&mut self) -> Result<()> {
        let context = VulkanContext::new(&self.instance, &self.device);
        if let Some(swapchain) = self.swapchain.as_mut() {
            swapchain.rebuild(context)?;
        }
        Ok(())
    }

    pub fn set_clear_color(&mut self, clear_color: [f32; 4]) {
        self.settings.clear_color = clear_color;
        if let Some(swapchain) = self.swapchain.as_mut() {
            swapchain.set_clear_color(clear_color);
        }
    }

    pub unsafe fn create_root_signature(
        &mut self,
        desc: &RootSignatureDesc,
    ) -> Result<Arc<VulkanRootSignature>> {
        let root_signature = Arc::new(VulkanRootSignature::new(&self.device, desc)?);
        self.root_signatures.push(Arc::clone(&root_signature));
        Ok(root_signature)
    }

    pub unsafe fn retrieve_descriptor_set(
        &self,
        desc: &DescriptorSetDesc,
    ) -> Result<VulkanDescriptorSet> {
        self.descriptor_pool
            .retrieve_descriptor_set(&self.device, desc)
    }

    pub unsafe fn update_descriptor_set(
        &self,
        descriptor_set: &mut VulkanDescriptorSet,
        index: usize,
        params: &[DescriptorData],
    ) -> Result<()> {
        descriptor_set.update(&self.device, index, params)
    }

    pub unsafe fn reset_descriptor_pool(&self) -> Result<()> {
        self.descriptor_pool.reset(&self.device)
    }

    pub fn instance(&self) -> &VulkanInstance {
        &self.instance
    }

    pub fn physical_device(&self) -> &PhysicalDevice {
        &self.physical_device
    }

    pub fn device(&self) -> &VulkanDevice {
        &self.device
    }

    pub fn descriptor_pool(&self) -> &VulkanDescriptorPool {
        &self.descriptor_pool
    }

    pub fn swapchain(&self) -> Option<&VulkanSwapchain> {
        self.swapchain.as_ref()
    }

    pub fn settings(&self) -> &RendererSettings {
        &self.settings
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub unsafe fn device_wait_idle(&self) -> Result<()> {
        self.device.wait_idle()
    }

    pub unsafe fn destroy(&mut self) {
        if let Err(error) = self.device.wait_idle() {
            warn!("Waiting for the device before shutdown failed: {}", error);
        }

        if let Some(mut swapchain) = self.swapchain.take() {
            swapchain.destroy(VulkanContext::new(&self.instance, &self.device));
        }

        for root_signature in self.root_signatures.drain(..) {
            root_signature.destroy(&self.device);
        }
        self.descriptor_pool.destroy(&self.device);
        self.device.destroy();
        self.instance.destroy();

        debug!("Vulkan renderer destroyed after {} frames.", self.frame);
    }

    pub fn supports_vulkan() -> bool {
        match unsafe { VulkanInstance::load_entry() } {
            Ok(_) => true,
            Err(error) => {
                warn!("Vulkan is not available: {}", error);
                false
            }
        }
    }
}
