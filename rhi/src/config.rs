use std::fs;
use std::path::{Path, PathBuf};

use log::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::renderer::RenderApi;
use crate::vulkan::constants;

pub const CONFIG_ENV: &str = "RHI_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "rhi.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading `{path}`: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Invalid setting: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererSettings {
    pub application_name: String,
    pub render_api: RenderApi,
    pub vsync: bool,
    pub validation: bool,
    pub headless: bool,
    pub preferred_gpu: Option<String>,
    pub descriptor_sets_per_pool: u32,
    pub clear_color: [f32; 4],
}

impl Default for RendererSettings {
    fn default() -> Self {
        Self {
            application_name: "RHI Sandbox".to_string(),
            render_api: RenderApi::Vulkan,
            vsync: false,
            validation: constants::VALIDATION_ENABLED,
            headless: false,
            preferred_gpu: None,
            descriptor_sets_per_pool: constants::DEFAULT_DESCRIPTOR_SETS_PER_POOL,
            clear_color: constants::DEFAULT_CLEAR_COLOR,
        }
    }
}

impl RendererSettings {
    pub fn load() -> Result<Self, ConfigError> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::load_from_file(path),
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
                Self::load_from_file(DEFAULT_CONFIG_PATH)
            }
            None => {
                info!("No `{}` found, using default settings.", DEFAULT_CONFIG_PATH);
                Ok(Self::default())
            }
        }
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let settings = Self::from_toml(&contents)?;
        info!("Loaded renderer settings from `{}`.", path.display());
        Ok(settings)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let settings: Self = toml::from_str(contents)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.descriptor_sets_per_pool == 0 {
            return Err(ConfigError::Invalid(
                "descriptor_sets_per_pool must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let settings = RendererSettings::from_toml("").unwrap();
        assert_eq!(settings, RendererSettings::default());
        assert_eq!(settings.descriptor_sets_per_pool, 64);
        assert_eq!(settings.clear_color, [0.1, 0.1, 0.1, 1.0]);
    }

    #[test]
    fn partial_document_overrides_fields() {
        let settings = RendererSettings::from_toml(
            r#"
            render_api = "opengl"
            vsync = true
            headless = true
            preferred_gpu = "NVIDIA GeForce RTX 3080"
            "#,
        )
        .unwrap();

        assert_eq!(settings.render_api, RenderApi::OpenGl);
        assert!(settings.vsync);
        assert!(settings.headless);
        assert_eq!(
            settings.preferred_gpu.as_deref(),
            Some("NVIDIA GeForce RTX 3080")
        );
        assert_eq!(settings.application_name, "RHI Sandbox");
    }

    #[test]
    fn rejects_zero_sized_pools() {
        let error = RendererSettings::from_toml("descriptor_sets_per_pool = 0").unwrap_err();
        assert!(matches!(error, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_unknown_api() {
        let error = RendererSettings::from_toml(r#"render_api = "metal""#).unwrap_err();
        assert!(matches!(error, ConfigError::Parse(_)));
    }

    #[test]
    fn missing_file_reports_path() {
        let error = RendererSettings::load_from_file("does/not/exist.toml").unwrap_err();
        match error {
            ConfigError::Io { path, .. } => assert_eq!(path, Path::new("does/not/exist.toml")),
            other => panic!("unexpected error: {other}"),
        }
    }
}
