//! Application state shared by the CLI and the desktop commands.

use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::core::{AppConfig, EventSink, Setting};
use crate::processing::{Dispatcher, IccCatalog, RawConverter, Toolchain};
use crate::utils::ConvertResult;

/// Configuration, tool locations, profile catalog and the dispatcher.
///
/// The tool and profile directories are resolved once at construction; the
/// remaining configuration is read again for every batch.
pub struct AppState {
    config: RwLock<AppConfig>,
    config_path: Option<PathBuf>,
    catalog: Arc<IccCatalog>,
    toolchain: Arc<Toolchain>,
    dispatcher: Dispatcher,
    cancel: CancellationToken,
}

impl AppState {
    /// Resolves the toolchain and catalog from `config` (or the bundled
    /// locations) and wires up the dispatcher.
    pub fn new(
        config: AppConfig,
        config_path: Option<PathBuf>,
        events: Arc<dyn EventSink>,
    ) -> ConvertResult<Self> {
        let toolchain = match &config.tools_dir {
            Some(dir) => Toolchain::from_dir(dir),
            None => Toolchain::discover()?,
        };
        let catalog = match &config.profiles_dir {
            Some(dir) => IccCatalog::load_dir(dir)?,
            None => IccCatalog::discover()?,
        };
        Ok(Self::with_parts(config, config_path, toolchain, catalog, events))
    }

    pub fn with_parts(
        mut config: AppConfig,
        config_path: Option<PathBuf>,
        toolchain: Toolchain,
        catalog: IccCatalog,
        events: Arc<dyn EventSink>,
    ) -> Self {
        if config.sanitize(&catalog) {
            if let Some(path) = &config_path {
                if let Err(e) = config.save(path) {
                    warn!("Failed to save sanitized config: {}", e);
                }
            }
        }

        let toolchain = Arc::new(toolchain);
        let catalog = Arc::new(catalog);
        let cancel = CancellationToken::new();
        let converter = Arc::new(RawConverter::new(toolchain.clone(), catalog.clone()));
        let dispatcher = Dispatcher::new(converter, events, cancel.clone());
        debug!(
            "AppState ready: {} ICC profiles, pre-converter {}",
            catalog.len(),
            if toolchain.preconverter_available() { "available" } else { "absent" }
        );

        Self {
            config: RwLock::new(config),
            config_path,
            catalog,
            toolchain,
            dispatcher,
            cancel,
        }
    }

    pub fn setting(&self) -> Setting {
        Setting::new(&self.catalog, self.toolchain.preconverter_available())
    }

    pub fn config(&self) -> AppConfig {
        self.config.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Sanitizes, persists and applies `config`; returns what was applied.
    ///
    /// A running batch keeps the configuration it started with.
    pub fn set_config(&self, mut config: AppConfig) -> ConvertResult<AppConfig> {
        config.sanitize(&self.catalog);
        if let Some(path) = &self.config_path {
            config.save(path)?;
        }
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = config.clone();
        Ok(config)
    }

    /// Starts a batch with the current configuration; `None` if one is
    /// already running or the state was shut down.
    pub fn convert(&self, paths: Vec<PathBuf>) -> Option<JoinHandle<()>> {
        let request = self.config().to_request(self.toolchain.preconverter_available());
        self.dispatcher.convert(paths, request)
    }

    /// Whether the stored configuration pins the window on top; applied by
    /// the desktop shell at startup.
    pub fn window_top(&self) -> bool {
        self.config.read().unwrap_or_else(PoisonError::into_inner).enable_window_top
    }

    pub fn is_running(&self) -> bool {
        self.dispatcher.is_running()
    }

    /// Cancels the running batch; later `convert` calls are refused.
    pub fn shutdown(&self) {
        debug!("Shutting down dispatcher");
        self.cancel.cancel();
    }

    pub fn catalog(&self) -> &IccCatalog {
        &self.catalog
    }

    pub fn toolchain(&self) -> &Toolchain {
        &self.toolchain
    }
}
