use std::fmt;

use vulkanalia::prelude::v1_0::*;
use vulkanalia::window as vk_window;
use winit::window::Window;

pub trait PresentationWindow: fmt::Debug {
    /// Current drawable size in pixels. Zero in either dimension while minimized.
    fn framebuffer_size(&self) -> (u32, u32);

    fn required_instance_extensions(&self) -> &'static [&'static vk::ExtensionName];

    unsafe fn create_surface(&self, instance: &Instance) -> Result<vk::SurfaceKHR, vk::ErrorCode>;
}

impl PresentationWindow for Window {
    fn framebuffer_size(&self) -> (u32, u32) {
        let size = self.inner_size();
        (size.width, size.height)
    }

    fn required_instance_extensions(&self) -> &'static [&'static vk::ExtensionName] {
        vk_window::get_required_instance_extensions(self)
    }

    unsafe fn create_surface(&self, instance: &Instance) -> Result<vk::SurfaceKHR, vk::ErrorCode> {
        vk_window::create_surface(instance, self, self)
    }
}
