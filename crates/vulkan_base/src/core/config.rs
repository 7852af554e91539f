//! # Application Base Configuration
//!
//! Configuration for the Vulkan application base: instance metadata, the
//! desired presentation format, validation/diagnostics behaviour, descriptor
//! pool sizing and the initial window.
//!
//! All types are serializable so an application can ship a `base.toml` or
//! `base.ron` next to its binary and load it through [`Config`].

use ash::vk;
use serde::{Deserialize, Serialize};

pub use crate::config::{Config, ConfigError};

/// Serializable subset of swap image formats an application may ask for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SurfaceFormatPreference {
    /// `B8G8R8A8_UNORM`
    Bgra8Unorm,
    /// `B8G8R8A8_SRGB`
    Bgra8Srgb,
    /// `R8G8B8A8_UNORM`
    Rgba8Unorm,
    /// `R8G8B8A8_SRGB`
    Rgba8Srgb,
}

impl SurfaceFormatPreference {
    /// The Vulkan format this preference names
    pub fn to_vk(self) -> vk::Format {
        match self {
            Self::Bgra8Unorm => vk::Format::B8G8R8A8_UNORM,
            Self::Bgra8Srgb => vk::Format::B8G8R8A8_SRGB,
            Self::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
            Self::Rgba8Srgb => vk::Format::R8G8B8A8_SRGB,
        }
    }
}

impl Default for SurfaceFormatPreference {
    fn default() -> Self {
        Self::Bgra8Unorm
    }
}

/// # Renderer Configuration
///
/// Instance metadata and presentation preferences.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RendererConfig {
    /// Application name for Vulkan instance creation
    pub application_name: String,
    /// Application version (major, minor, patch)
    pub application_version: (u32, u32, u32),
    /// Desired swap image format
    pub surface_format: SurfaceFormatPreference,
    /// FIFO presentation when true, mailbox (if available) otherwise
    pub vsync: bool,
    /// Whether to enable Vulkan validation layers; `None` follows the build type
    pub enable_validation: Option<bool>,
}

impl RendererConfig {
    /// Create a new renderer configuration
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            application_name: app_name.into(),
            application_version: (1, 0, 0),
            surface_format: SurfaceFormatPreference::default(),
            vsync: true,
            enable_validation: None,
        }
    }

    /// Set application version
    pub fn with_version(mut self, major: u32, minor: u32, patch: u32) -> Self {
        self.application_version = (major, minor, patch);
        self
    }

    /// Set the desired swap image format
    pub fn with_surface_format(mut self, format: SurfaceFormatPreference) -> Self {
        self.surface_format = format;
        self
    }

    /// Enable or disable vertical sync
    pub fn with_vsync(mut self, vsync: bool) -> Self {
        self.vsync = vsync;
        self
    }

    /// Enable or disable validation layers
    pub fn with_validation(mut self, enabled: bool) -> Self {
        self.enable_validation = Some(enabled);
        self
    }

    /// Whether validation layers should be requested.
    ///
    /// Validation is only ever wired up in debug builds.
    pub fn validation_enabled(&self) -> bool {
        cfg!(debug_assertions) && self.enable_validation.unwrap_or(true)
    }
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self::new("Vulkan Application")
    }
}

/// Driver diagnostic forwarding
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiagnosticsConfig {
    /// Also forward informational and verbose driver messages
    pub include_verbose: bool,
}

/// Sizing of the shared descriptor pool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DescriptorPoolConfig {
    /// Combined image sampler descriptors available in the pool
    pub combined_image_samplers: u32,
    /// Uniform buffer descriptors available in the pool
    pub uniform_buffers: u32,
}

impl DescriptorPoolConfig {
    /// Maximum number of sets the pool can hand out
    pub fn max_sets(&self) -> u32 {
        self.combined_image_samplers.saturating_add(self.uniform_buffers)
    }
}

impl Default for DescriptorPoolConfig {
    fn default() -> Self {
        Self {
            combined_image_samplers: 1000,
            uniform_buffers: 1000,
        }
    }
}

/// Initial window parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowConfig {
    /// Window title
    pub title: String,
    /// Initial width in screen coordinates
    pub width: u32,
    /// Initial height in screen coordinates
    pub height: u32,
    /// Start on the primary monitor in fullscreen mode
    pub fullscreen: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Vulkan Application".to_string(),
            width: 1280,
            height: 720,
            fullscreen: false,
        }
    }
}

/// # Complete Base Configuration
///
/// Top-level configuration consumed by [`crate::app::VulkanAppBase`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaseAppConfig {
    /// Log filter used when the environment does not set `RUST_LOG`
    pub log_level: String,
    /// Renderer configuration
    pub renderer: RendererConfig,
    /// Diagnostic sink configuration
    pub diagnostics: DiagnosticsConfig,
    /// Descriptor pool sizing
    pub descriptor_pool: DescriptorPoolConfig,
    /// Window configuration
    pub window: WindowConfig,
}

impl BaseAppConfig {
    /// Create a new configuration with defaults and the given application name
    pub fn new(app_name: impl Into<String>) -> Self {
        let app_name = app_name.into();
        Self {
            log_level: "info".to_string(),
            renderer: RendererConfig::new(app_name.clone()),
            diagnostics: DiagnosticsConfig::default(),
            descriptor_pool: DescriptorPoolConfig::default(),
            window: WindowConfig {
                title: app_name,
                ..WindowConfig::default()
            },
        }
    }

    /// Set log level
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Set renderer configuration
    pub fn with_renderer(mut self, renderer: RendererConfig) -> Self {
        self.renderer = renderer;
        self
    }

    /// Forward verbose driver messages as well
    pub fn with_verbose_diagnostics(mut self, enabled: bool) -> Self {
        self.diagnostics.include_verbose = enabled;
        self
    }

    /// Set initial window size
    pub fn with_window_size(mut self, width: u32, height: u32) -> Self {
        self.window.width = width;
        self.window.height = height;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.renderer.application_name.is_empty() {
            return Err(ConfigError::Invalid("application name cannot be empty".to_string()));
        }
        if self.window.width == 0 || self.window.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "window size must be non-zero, got {}x{}",
                self.window.width, self.window.height
            )));
        }
        if self.descriptor_pool.combined_image_samplers == 0 || self.descriptor_pool.uniform_buffers == 0 {
            return Err(ConfigError::Invalid(
                "descriptor pool counts must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for BaseAppConfig {
    fn default() -> Self {
        Self::new("Vulkan Application")
    }
}

impl Config for BaseAppConfig {}
