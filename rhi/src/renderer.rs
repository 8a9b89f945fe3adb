use anyhow::Result;
use log::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::RendererSettings;
use crate::error::RhiError;
use crate::vulkan::VulkanRenderer;
use crate::window::PresentationWindow;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderApi {
    #[default]
    Vulkan,
    #[serde(rename = "opengl")]
    OpenGl,
    #[serde(rename = "none")]
    NoApi,
}

#[derive(Debug)]
pub enum Renderer {
    Vulkan(Box<VulkanRenderer>),
    NoApi,
}

impl Renderer {
    pub unsafe fn new(
        settings: &RendererSettings,
        window: Option<Arc<dyn PresentationWindow>>,
    ) -> Result<Self> {
        match settings.render_api {
            RenderApi::Vulkan => {
                if !VulkanRenderer::supports_vulkan() {
                    return Err(RhiError::UnsupportedApi(RenderApi::Vulkan).into());
                }
                let renderer = VulkanRenderer::new(settings, window)?;
                Ok(Renderer::Vulkan(Box::new(renderer)))
            }
            RenderApi::OpenGl => Err(RhiError::UnsupportedApi(RenderApi::OpenGl).into()),
            RenderApi::NoApi => {
                info!("Render API disabled, frames are not rendered.");
                Ok(Renderer::NoApi)
            }
        }
    }

    pub fn api(&self) -> RenderApi {
        match self {
            Renderer::Vulkan(_) => RenderApi::Vulkan,
            Renderer::NoApi => RenderApi::NoApi,
        }
    }

    pub fn vulkan(&mut self) -> Option<&mut VulkanRenderer> {
        match self {
            Renderer::Vulkan(renderer) => Some(renderer.as_mut()),
            Renderer::NoApi => None,
        }
    }

    pub unsafe fn render(&mut self) -> Result<()> {
        match self {
            Renderer::Vulkan(renderer) => renderer.render(),
            Renderer::NoApi => Ok(()),
        }
    }

    pub unsafe fn set_vsync(&mut self, vsync: bool) -> Result<()> {
        match self {
            Renderer::Vulkan(renderer) => renderer.set_vsync(vsync),
            Renderer::NoApi => Ok(()),
        }
    }

    pub fn vsync(&self) -> bool {
        match self {
            Renderer::Vulkan(renderer) => renderer.vsync(),
            Renderer::NoApi => false,
        }
    }

    pub unsafe fn resize(&mut self) -> Result<()> {
        match self {
            Renderer::Vulkan(renderer) => renderer.resize(),
            Renderer::NoApi => Ok(()),
        }
    }

    pub fn set_clear_color(&mut self, clear_color: [f32; 4]) {
        if let Renderer::Vulkan(renderer) = self {
            renderer.set_clear_color(clear_color);
        }
    }

    pub unsafe fn device_wait_idle(&self) -> Result<()> {
        match self {
            Renderer::Vulkan(renderer) => renderer.device_wait_idle(),
            Renderer::NoApi => Ok(()),
        }
    }

    pub unsafe fn destroy(&mut self) {
        if let Renderer::Vulkan(renderer) = self {
            renderer.destroy();
        }
        *self = Renderer::NoApi;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_api_names() {
        #[derive(Deserialize)]
        struct Wrapper {
            api: RenderApi,
        }

        let parse = |name: &str| {
            toml::from_str::<Wrapper>(&format!("api = \"{}\"", name)).map(|w| w.api)
        };

        assert_eq!(parse("vulkan").unwrap(), RenderApi::Vulkan);
        assert_eq!(parse("opengl").unwrap(), RenderApi::OpenGl);
        assert_eq!(parse("none").unwrap(), RenderApi::NoApi);
        assert!(parse("directx").is_err());
    }

    #[test]
    fn opengl_is_reported_as_unsupported() {
        let settings = RendererSettings {
            render_api: RenderApi::OpenGl,
            ..Default::default()
        };

        let error = unsafe { Renderer::new(&settings, None) }.unwrap_err();

        assert!(matches!(
            error.downcast_ref::<RhiError>(),
            Some(RhiError::UnsupportedApi(RenderApi::OpenGl))
        ));
    }

    #[test]
    fn no_api_renders_nothing() {
        let settings = RendererSettings {
            render_api: RenderApi::NoApi,
            ..Default::default()
        };

        let mut renderer = unsafe { Renderer::new(&settings, None) }.unwrap();
        assert_eq!(renderer.api(), RenderApi::NoApi);
        assert!(renderer.vulkan().is_none());
        unsafe {
            renderer.render().unwrap();
            renderer.set_vsync(true).unwrap();
            renderer.destroy();
        }
        assert!(!renderer.vsync());
    }
}
