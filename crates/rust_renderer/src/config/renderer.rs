//! # Renderer Configuration
//!
//! Settings consumed by the Vulkan backend at startup: application metadata,
//! window size, presentation and multisampling choices, error behaviour and
//! shader locations. Values can be stored as TOML or RON through [`Config`].

use super::{Config, ConfigError};
use crate::error::ErrorMode;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Directories searched for compiled shaders, in order
const SHADER_SEARCH_DIRS: &[&str] = &[
    "target/shaders",
    "shaders",
    "resources/shaders",
    "../resources/shaders",
    ".",
];

/// SPIR-V shader locations for the mesh material
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShaderConfig {
    /// Path to the vertex shader SPIR-V file
    pub vertex_shader_path: PathBuf,
    /// Path to the fragment shader SPIR-V file
    pub fragment_shader_path: PathBuf,
}

impl ShaderConfig {
    /// Create a shader configuration from explicit paths
    pub fn new(vertex_path: impl Into<PathBuf>, fragment_path: impl Into<PathBuf>) -> Self {
        Self {
            vertex_shader_path: vertex_path.into(),
            fragment_shader_path: fragment_path.into(),
        }
    }

    /// Resolve shader file names against the usual output directories
    ///
    /// The first directory containing a file wins. Files found nowhere fall
    /// back to `shaders/<name>` so the error later names a sensible path.
    #[must_use]
    pub fn with_path_resolution(vertex_name: &str, fragment_name: &str) -> Self {
        Self {
            vertex_shader_path: resolve_shader(vertex_name),
            fragment_shader_path: resolve_shader(fragment_name),
        }
    }

    /// Check that both shader files exist
    pub fn validate(&self) -> Result<(), ConfigError> {
        for path in [&self.vertex_shader_path, &self.fragment_shader_path] {
            if !path.exists() {
                return Err(ConfigError::Invalid(format!(
                    "shader not found: {}",
                    path.display()
                )));
            }
        }
        Ok(())
    }
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self::with_path_resolution("mesh.vert.spv", "mesh.frag.spv")
    }
}

fn resolve_shader(name: &str) -> PathBuf {
    SHADER_SEARCH_DIRS
        .iter()
        .map(|dir| Path::new(dir).join(name))
        .find(|candidate| candidate.exists())
        .unwrap_or_else(|| Path::new("shaders").join(name))
}

/// # Vulkan Renderer Configuration
///
/// Startup settings for [`RendererBackend`](crate::render::backends::vulkan::RendererBackend).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Application name passed to instance creation and used as window title
    pub application_name: String,
    /// Application version (major, minor, patch)
    pub application_version: (u32, u32, u32),
    /// Initial window width in screen coordinates
    pub window_width: u32,
    /// Initial window height in screen coordinates
    pub window_height: u32,
    /// Wait for vertical blank when presenting
    pub vsync: bool,
    /// Enable validation layers; `None` follows the build type
    pub enable_validation: Option<bool>,
    /// Render through a multisampled target at the device's max usable count
    pub msaa: bool,
    /// What happens when a fatal error escalates
    pub error_mode: ErrorMode,
    /// Default log filter (`error`, `warn`, `info`, `debug`, `trace`)
    pub log_level: String,
    /// Clear color of the draw image
    pub clear_color: [f32; 4],
    /// Mesh material shaders
    pub shaders: ShaderConfig,
}

impl RendererConfig {
    /// Configuration with defaults and the given application name
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            application_name: app_name.into(),
            ..Self::default()
        }
    }

    /// Set application version
    #[must_use]
    pub const fn with_version(mut self, major: u32, minor: u32, patch: u32) -> Self {
        self.application_version = (major, minor, patch);
        self
    }

    /// Set custom shader configuration
    #[must_use]
    pub fn with_shaders(mut self, shaders: ShaderConfig) -> Self {
        self.shaders = shaders;
        self
    }

    /// Enable or disable validation layers
    #[must_use]
    pub const fn with_validation(mut self, enabled: bool) -> Self {
        self.enable_validation = Some(enabled);
        self
    }

    /// Set the error escalation mode
    #[must_use]
    pub const fn with_error_mode(mut self, mode: ErrorMode) -> Self {
        self.error_mode = mode;
        self
    }

    /// Whether validation layers should be requested
    #[must_use]
    pub fn validation_enabled(&self) -> bool {
        self.enable_validation.unwrap_or(cfg!(debug_assertions))
    }

    /// Check values that would otherwise fail deep inside the backend
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.application_name.is_empty() {
            return Err(ConfigError::Invalid("application name cannot be empty".into()));
        }
        if self.application_name.contains('\0') {
            return Err(ConfigError::Invalid("application name contains a NUL byte".into()));
        }
        if self.window_width == 0 || self.window_height == 0 {
            return Err(ConfigError::Invalid(format!(
                "window size must be non-zero, got {}x{}",
                self.window_width, self.window_height
            )));
        }
        if self.log_level.parse::<log::LevelFilter>().is_err() {
            return Err(ConfigError::Invalid(format!("unknown log level '{}'", self.log_level)));
        }
        Ok(())
    }
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            application_name: "Rust Renderer Application".to_string(),
            application_version: (1, 0, 0),
            window_width: 1280,
            window_height: 720,
            vsync: true,
            enable_validation: None,
            msaa: true,
            error_mode: ErrorMode::default(),
            log_level: "info".to_string(),
            clear_color: [0.1, 0.1, 0.12, 1.0],
            shaders: ShaderConfig::default(),
        }
    }
}

impl Config for RendererConfig {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        RendererConfig::default().validate().unwrap();
    }

    #[test]
    fn test_validation_follows_build_type() {
        let config = RendererConfig::default();
        assert_eq!(config.validation_enabled(), cfg!(debug_assertions));
        assert!(config.with_validation(true).validation_enabled());
    }

    #[test]
    fn test_rejects_zero_window() {
        let mut config = RendererConfig::new("zero");
        config.window_height = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_rejects_unknown_log_level() {
        let mut config = RendererConfig::new("levels");
        config.log_level = "loud".into();
        assert!(config.validate().is_err());
        config.log_level = "debug".into();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: RendererConfig = toml::from_str("vsync = false\nerror_mode = \"Terminate\"\n").unwrap();
        assert!(!config.vsync);
        assert_eq!(config.error_mode, ErrorMode::Terminate);
        assert_eq!(config.window_width, 1280);
    }

    #[test]
    fn test_missing_shader_fails_validation() {
        let shaders = ShaderConfig::new("does/not/exist.vert.spv", "does/not/exist.frag.spv");
        assert!(shaders.validate().is_err());
    }
}
