use anyhow::{anyhow, Result};
use log::*;
use std::collections::HashSet;
use std::ffi::{CStr, CString};
use std::fmt;
use std::os::raw::c_void;
use std::sync::Mutex;
use vulkanalia::loader::{LibloadingLoader, LIBRARY};
use vulkanalia::prelude::v1_0::*;
use vulkanalia::vk::{ExtDebugUtilsExtension, Handle};

use super::constants;
use crate::config::RendererSettings;
use crate::window::PresentationWindow;

#[derive(Clone, Debug, Default)]
pub struct AvailableInstanceProperties {
    layers: HashSet<vk::ExtensionName>,
    extensions: HashSet<vk::ExtensionName>,
}

static AVAILABLE_PROPERTIES: Mutex<Option<AvailableInstanceProperties>> = Mutex::new(None);

impl AvailableInstanceProperties {
    pub fn new(
        layers: impl IntoIterator<Item = vk::ExtensionName>,
        extensions: impl IntoIterator<Item = vk::ExtensionName>,
    ) -> Self {
        Self {
            layers: layers.into_iter().collect(),
            extensions: extensions.into_iter().collect(),
        }
    }

    unsafe fn query(entry: &Entry) -> Result<Self> {
        let layers = entry
            .enumerate_instance_layer_properties()?
            .iter()
            .map(|l| l.layer_name)
            .collect::<Vec<_>>();
        let extensions = entry
            .enumerate_instance_extension_properties(None)?
            .iter()
            .map(|e| e.extension_name)
            .collect::<Vec<_>>();
        Ok(Self::new(layers, extensions))
    }

    pub unsafe fn get(entry: &Entry) -> Result<Self> {
        let mut cached = AVAILABLE_PROPERTIES
            .lock()
            .map_err(|_| anyhow!("Instance property cache poisoned."))?;
        if let Some(properties) = cached.as_ref() {
            return Ok(properties.clone());
        }
        let properties = Self::query(entry)?;
        debug!(
            "Loader reports {} instance layers and {} instance extensions.",
            properties.layers.len(),
            properties.extensions.len()
        );
        *cached = Some(properties.clone());
        Ok(properties)
    }

    pub fn invalidate() {
        if let Ok(mut cached) = AVAILABLE_PROPERTIES.lock() {
            *cached = None;
        }
    }

    pub fn supports_layer(&self, layer: &vk::ExtensionName) -> bool {
        let supported = self.layers.contains(layer);
        if !supported {
            warn!("Instance layer `{}` is not supported.", layer);
        }
        supported
    }

    pub fn supports_extension(&self, extension: &vk::ExtensionName) -> bool {
        let supported = self.extensions.contains(extension);
        if !supported {
            warn!("Instance extension `{}` is not supported.", extension);
        }
        supported
    }

    pub fn require_extensions(
        &self,
        required: &[&vk::ExtensionName],
    ) -> Result<Vec<vk::ExtensionName>> {
        required
            .iter()
            .map(|&&extension| {
                if self.supports_extension(&extension) {
                    Ok(extension)
                } else {
                    Err(anyhow!(
                        "Required instance extension `{}` is not supported.",
                        extension
                    ))
                }
            })
            .collect()
    }
}

pub struct VulkanInstance {
    pub entry: Entry,
    pub vk_instance: Instance,
    messenger: vk::DebugUtilsMessengerEXT,
    layers: Vec<vk::ExtensionName>,
    extensions: Vec<vk::ExtensionName>,
    validation: bool,
    portability: bool,
}

impl fmt::Debug for VulkanInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VulkanInstance")
            .field("handle", &self.vk_instance.handle())
            .field("validation", &self.validation)
            .field("portability", &self.portability)
            .finish_non_exhaustive()
    }
}

impl VulkanInstance {
    pub unsafe fn load_entry() -> Result<Entry> {
        let loader = LibloadingLoader::new(LIBRARY)?;
        Entry::new(loader).map_err(|b| anyhow!("{}", b))
    }

    pub unsafe fn new(
        settings: &RendererSettings,
        window: Option<&dyn PresentationWindow>,
    ) -> Result<VulkanInstance> {
        let entry = VulkanInstance::load_entry()?;
        let available = AvailableInstanceProperties::get(&entry)?;

        // Application Info
        let application_name = CString::new(settings.application_name.as_str())?;
        let application_info = vk::ApplicationInfo::builder()
            .application_name(application_name.as_bytes_with_nul())
            .application_version(vk::make_version(1, 0, 0))
            .engine_name(b"RHI\0")
            .engine_version(vk::make_version(1, 0, 0))
            .api_version(vk::make_version(1, 2, 0));

        // Layers
        let validation = if settings.validation
            && !available.supports_layer(&constants::VALIDATION_LAYER)
        {
            warn!("Validation layer requested but not supported (Vulkan SDK installed?).");
            false
        } else {
            settings.validation
        };

        let layers = if validation {
            vec![constants::VALIDATION_LAYER]
        } else {
            Vec::new()
        };

        // Extensions
        let mut extensions = window
            .map(|w| available.require_extensions(w.required_instance_extensions()))
            .transpose()?
            .unwrap_or_default();

        // Required by Vulkan SDK on macOS since 1.3.216.
        let portability = cfg!(target_os = "macos")
            && entry.version()? >= constants::PORTABILITY_MACOS_VERSION;
        let flags = if portability {
            info!("Enabling extensions for macOS portability.");
            extensions.push(vk::KHR_GET_PHYSICAL_DEVICE_PROPERTIES2_EXTENSION.name);
            extensions.push(vk::KHR_PORTABILITY_ENUMERATION_EXTENSION.name);
            vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR
        } else {
            vk::InstanceCreateFlags::empty()
        };

        if validation {
            extensions.push(vk::EXT_DEBUG_UTILS_EXTENSION.name);
        }

        // Create
        let layer_names = layers.iter().map(|l| l.as_ptr()).collect::<Vec<_>>();
        let extension_names = extensions.iter().map(|e| e.as_ptr()).collect::<Vec<_>>();
        let mut info = vk::InstanceCreateInfo::builder()
            .application_info(&application_info)
            .enabled_layer_names(&layer_names)
            .enabled_extension_names(&extension_names)
            .flags(flags);

        let mut debug_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(vk::DebugUtilsMessageSeverityFlagsEXT::all())
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .user_callback(Some(debug_callback));

        if validation {
            info = info.push_next(&mut debug_info);
        }

        let instance = entry.create_instance(&info, None)?;
        info!(
            "Created Vulkan instance (loader {}, validation {}).",
            entry.version()?,
            if validation { "on" } else { "off" }
        );

        // Messenger
        let messenger = if validation {
            instance.create_debug_utils_messenger_ext(&debug_info, None)?
        } else {
            vk::DebugUtilsMessengerEXT::null()
        };

        Ok(VulkanInstance {
            entry,
            vk_instance: instance,
            messenger,
            layers,
            extensions,
            validation,
            portability,
        })
    }

    pub fn used_layers(&self) -> &[vk::ExtensionName] {
        &self.layers
    }

    pub fn used_extensions(&self) -> &[vk::ExtensionName] {
        &self.extensions
    }

    pub fn validation_enabled(&self) -> bool {
        self.validation
    }

    pub fn portability_enabled(&self) -> bool {
        self.portability
    }

    pub unsafe fn destroy(&mut self) {
        if self.validation {
            self.vk_instance
                .destroy_debug_utils_messenger_ext(self.messenger, None);
        }
        self.vk_instance.destroy_instance(None);
    }
}

extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    type_: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _: *mut c_void,
) -> vk::Bool32 {
    let data = unsafe { *data };
    let message = unsafe { CStr::from_ptr(data.message) }.to_string_lossy();

    if severity >= vk::DebugUtilsMessageSeverityFlagsEXT::ERROR {
        error!("({:?}) {}", type_, message);
    } else if severity >= vk::DebugUtilsMessageSeverityFlagsEXT::WARNING {
        warn!("({:?}) {}", type_, message);
    } else if severity >= vk::DebugUtilsMessageSeverityFlagsEXT::INFO {
        debug!("({:?}) {}", type_, message);
    } else {
        trace!("({:?}) {}", type_, message);
    }

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_supported_layers_and_extensions() {
        let properties = AvailableInstanceProperties::new(
            [constants::VALIDATION_LAYER],
            [vk::KHR_SURFACE_EXTENSION.name],
        );

        assert!(properties.supports_layer(&constants::VALIDATION_LAYER));
        assert!(!properties.supports_layer(&vk::ExtensionName::from_bytes(b"VK_LAYER_missing")));
        assert!(properties.supports_extension(&vk::KHR_SURFACE_EXTENSION.name));
        assert!(!properties.supports_extension(&vk::EXT_DEBUG_UTILS_EXTENSION.name));
    }

    #[test]
    fn missing_window_extension_is_an_error() {
        let properties = AvailableInstanceProperties::new(
            [constants::VALIDATION_LAYER],
            [vk::KHR_SURFACE_EXTENSION.name],
        );

        let surface_only = properties
            .require_extensions(&[&vk::KHR_SURFACE_EXTENSION.name])
            .unwrap();
        assert_eq!(surface_only, [vk::KHR_SURFACE_EXTENSION.name]);

        let error = properties
            .require_extensions(&[
                &vk::KHR_SURFACE_EXTENSION.name,
                &vk::KHR_XLIB_SURFACE_EXTENSION.name,
            ])
            .unwrap_err();
        assert!(error.to_string().contains("VK_KHR_xlib_surface"));
    }
}
