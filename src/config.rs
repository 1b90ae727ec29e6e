//! Engine-level configuration: CLI surface plus the config struct it populates.

use clap::Parser;
use serde::{Deserialize, Serialize};

/// Command-line flags accepted by a binary built on top of this crate.
///
/// Every field is optional; omitted flags leave the corresponding
/// [`CoreConfig`] field at its default.
#[derive(Debug, Parser)]
#[command(name = "vk_core", about = "Vulkan renderer core")]
pub struct CliArgs {
    /// Physical device index to use.
    #[arg(long = "device-index")]
    pub device_index: Option<usize>,

    /// Initial window width, forwarded to the windowing collaborator.
    #[arg(long)]
    pub width: Option<u32>,

    /// Initial window height, forwarded to the windowing collaborator.
    #[arg(long)]
    pub height: Option<u32>,

    /// Start fullscreen.
    #[arg(long)]
    pub fullscreen: bool,

    /// Additional validation layer to enable, may be repeated.
    #[arg(long = "validation-layer")]
    pub validation_layers: Vec<String>,

    /// Additional instance extension to request, may be repeated.
    #[arg(long = "instance-extension")]
    pub instance_extensions: Vec<String>,

    /// Additional device extension to request, may be repeated.
    #[arg(long = "device-extension")]
    pub device_extensions: Vec<String>,

    /// Install a debug messenger (implies validation).
    #[arg(long = "debug-messenger")]
    pub debug_messenger: bool,

    /// Skip reading/writing the on-disk pipeline cache.
    #[arg(long = "no-pipeline-cache")]
    pub no_pipeline_cache: bool,
}

/// Resolved engine configuration, loadable from a `toml` file and
/// overridable by [`CliArgs`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Physical device index to use; `None` picks the first discrete GPU.
    pub device_index: Option<usize>,
    /// Initial window width.
    pub width: u32,
    /// Initial window height.
    pub height: u32,
    /// Start fullscreen.
    pub fullscreen: bool,
    /// Extra validation layers requested at instance creation.
    pub validation_layers: Vec<String>,
    /// Extra instance extensions requested at instance creation.
    pub instance_extensions: Vec<String>,
    /// Extra device extensions requested at device creation.
    pub device_extensions: Vec<String>,
    /// Whether a debug messenger should be installed.
    pub debug_messenger: bool,
    /// Whether the pipeline cache should be persisted to disk.
    pub pipeline_cache: bool,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            device_index: None,
            width: 1280,
            height: 720,
            fullscreen: false,
            validation_layers: Vec::new(),
            instance_extensions: Vec::new(),
            device_extensions: Vec::new(),
            debug_messenger: cfg!(debug_assertions),
            pipeline_cache: true,
        }
    }
}

impl CoreConfig {
    /// Loads a config from a `toml` string, falling back to defaults for
    /// missing fields.
    pub fn from_toml_str(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    /// Parses [`CliArgs`] from the process's own `argv` and applies them on
    /// top of `self`.
    pub fn from_args() -> Self {
        let mut config = Self::default();
        config.apply_args(&CliArgs::parse());
        config
    }

    /// Applies parsed CLI flags on top of an existing config, overriding
    /// only the fields the user actually passed.
    pub fn apply_args(&mut self, args: &CliArgs) {
        if let Some(idx) = args.device_index {
            self.device_index = Some(idx);
        }
        if let Some(w) = args.width {
            self.width = w;
        }
        if let Some(h) = args.height {
            self.height = h;
        }
        if args.fullscreen {
            self.fullscreen = true;
        }
        self.validation_layers
            .extend(args.validation_layers.iter().cloned());
        self.instance_extensions
            .extend(args.instance_extensions.iter().cloned());
        self.device_extensions
            .extend(args.device_extensions.iter().cloned());
        if args.debug_messenger {
            self.debug_messenger = true;
        }
        if args.no_pipeline_cache {
            self.pipeline_cache = false;
        }
    }

    /// Path the pipeline cache is read from / written to, unless disabled.
    pub fn pipeline_cache_path() -> std::path::PathBuf {
        std::env::temp_dir().join("pipeline_cache")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = CoreConfig::default();
        assert_eq!(config.width, 1280);
        assert_eq!(config.height, 720);
        assert!(config.pipeline_cache);
    }

    #[test]
    fn cli_overrides_apply_on_top_of_defaults() {
        let mut config = CoreConfig::default();
        let args = CliArgs {
            device_index: Some(2),
            width: Some(1920),
            height: None,
            fullscreen: true,
            validation_layers: vec!["VK_LAYER_KHRONOS_validation".to_string()],
            instance_extensions: vec![],
            device_extensions: vec![],
            debug_messenger: true,
            no_pipeline_cache: true,
        };
        config.apply_args(&args);
        assert_eq!(config.device_index, Some(2));
        assert_eq!(config.width, 1920);
        assert_eq!(config.height, 720);
        assert!(config.fullscreen);
        assert!(!config.pipeline_cache);
        assert_eq!(config.validation_layers.len(), 1);
    }

    #[test]
    fn toml_round_trip_fills_missing_fields() {
        let config: CoreConfig = CoreConfig::from_toml_str("width = 640\nheight = 480\n").unwrap();
        assert_eq!(config.width, 640);
        assert_eq!(config.height, 480);
        assert!(config.pipeline_cache);
    }
}
