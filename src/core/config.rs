//! Persisted user configuration and the settings view offered to front ends.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::core::ConversionRequest;
use crate::processing::IccCatalog;
use crate::utils::{ConvertError, ConvertResult};

/// File name of the configuration inside the user config directory.
pub const CONFIG_FILE_NAME: &str = "open-make-tiff.json";

/// User configuration, stored as JSON.
///
/// Every field is optional in the file; missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Never run the Adobe DNG Converter, even if installed
    pub disable_adobe_dng_converter: bool,
    /// Keep the desktop window above other windows
    pub enable_window_top: bool,
    /// Write outputs into a `make_tiff` subdirectory
    pub enable_subfolder: bool,
    /// ICC profile name, empty for none
    pub icc_profile: String,
    /// Concurrent conversions
    pub workers: usize,
    /// Directory holding the bundled tools, overriding discovery
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools_dir: Option<PathBuf>,
    /// Directory holding `*.icc` profiles, overriding the bundled one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profiles_dir: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            disable_adobe_dng_converter: false,
            enable_window_top: false,
            enable_subfolder: false,
            icc_profile: String::new(),
            workers: num_cpus::get(),
            tools_dir: None,
            profiles_dir: None,
        }
    }
}

impl AppConfig {
    /// `<user config dir>/open-make-tiff.json`, if the platform has one.
    pub fn default_path() -> Option<PathBuf> {
        user_config_dir().map(|dir| dir.join(CONFIG_FILE_NAME))
    }

    /// Loads the configuration from `path`.
    ///
    /// A missing file is created with the defaults. An unreadable or
    /// malformed file yields the defaults and is left untouched.
    pub fn load(path: &Path) -> Self {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::default();
                info!("No config at {}, writing defaults", path.display());
                if let Err(e) = config.save(path) {
                    warn!("Failed to write default config: {}", e);
                }
                return config;
            }
            Err(e) => {
                warn!("Failed to read config {}: {}", path.display(), e);
                return Self::default();
            }
        };

        match serde_json::from_str(&text) {
            Ok(config) => {
                debug!("Loaded config from {}", path.display());
                config
            }
            Err(e) => {
                warn!("Ignoring malformed config {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> ConvertResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .map_err(|e| ConvertError::config(format!("Cannot write {}: {}", path.display(), e)))?;
        debug!("Saved config to {}", path.display());
        Ok(())
    }

    /// Resets values the current machine cannot honour. Returns whether
    /// anything changed.
    pub fn sanitize(&mut self, catalog: &IccCatalog) -> bool {
        let mut changed = false;
        if !self.icc_profile.is_empty() && !catalog.contains(&self.icc_profile) {
            warn!("Unknown ICC profile {:?}, resetting to none", self.icc_profile);
            self.icc_profile.clear();
            changed = true;
        }
        let cores = num_cpus::get();
        if self.workers < 1 || self.workers > cores {
            debug!("Worker count {} out of range, using {}", self.workers, cores);
            self.workers = cores;
            changed = true;
        }
        changed
    }

    /// Per-batch request for the current configuration.
    pub fn to_request(&self, preconverter_available: bool) -> ConversionRequest {
        ConversionRequest {
            use_raw_preconverter: preconverter_available && !self.disable_adobe_dng_converter,
            use_subfolder: self.enable_subfolder,
            icc_profile: (!self.icc_profile.is_empty()).then(|| self.icc_profile.clone()),
            worker_count: self.workers,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerNumOption {
    pub value: usize,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProfileOption {
    pub value: String,
    pub label: String,
}

/// Choices a settings screen can offer on this machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Setting {
    pub worker_nums: Vec<WorkerNumOption>,
    pub profiles: Vec<ProfileOption>,
    pub enable_adobe_dng_converter: bool,
}

impl Setting {
    pub fn new(catalog: &IccCatalog, preconverter_available: bool) -> Self {
        let worker_nums = (1..=num_cpus::get())
            .map(|n| WorkerNumOption {
                value: n,
                label: n.to_string(),
            })
            .collect();

        let profiles = std::iter::once(ProfileOption {
            value: String::new(),
            label: "none".to_string(),
        })
        .chain(catalog.names().map(|name| ProfileOption {
            value: name.to_string(),
            label: name.to_string(),
        }))
        .collect();

        Self {
            worker_nums,
            profiles,
            enable_adobe_dng_converter: preconverter_available,
        }
    }
}

fn user_config_dir() -> Option<PathBuf> {
    let from_env = |key: &str| std::env::var_os(key).filter(|v| !v.is_empty()).map(PathBuf::from);
    if cfg!(windows) {
        from_env("APPDATA")
    } else if cfg!(target_os = "macos") {
        from_env("HOME").map(|home| home.join("Library").join("Application Support"))
    } else {
        from_env("XDG_CONFIG_HOME").or_else(|| from_env("HOME").map(|home| home.join(".config")))
    }
}
