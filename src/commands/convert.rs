//! Tauri command handlers for conversion and settings.

use std::path::PathBuf;

use tauri::{AppHandle, Emitter, Manager, State};
use tracing::{debug, warn};

use crate::core::{AppConfig, AppState, ConvertEvent, EventSink, Setting};
use crate::utils::ConvertResult;

/// Main window label used for the always-on-top option.
pub const MAIN_WINDOW: &str = "main";

/// Forwards dispatcher events to the webview.
///
/// Batch events carry no payload and `file:started` carries the bare path,
/// so listeners of those three events see the same payloads as before the
/// per-file outcome events were added.
#[derive(Clone)]
pub struct TauriEventSink {
    app: AppHandle,
}

impl TauriEventSink {
    pub fn new(app: AppHandle) -> Self {
        Self { app }
    }
}

impl EventSink for TauriEventSink {
    fn emit(&self, event: ConvertEvent) {
        let name = event.name();
        let sent = match &event {
            ConvertEvent::BatchStarted | ConvertEvent::BatchFinished => self.app.emit(name, ()),
            ConvertEvent::FileStarted { path } => self.app.emit(name, path.to_string_lossy()),
            ConvertEvent::FileCompleted { .. } | ConvertEvent::FileFailed { .. } => {
                self.app.emit(name, &event)
            }
        };
        if let Err(e) = sent {
            warn!("Failed to emit {}: {}", name, e);
        }
    }
}

/// Options for the settings screen.
#[tauri::command]
pub async fn get_setting(state: State<'_, AppState>) -> ConvertResult<Setting> {
    Ok(state.setting())
}

#[tauri::command]
pub async fn get_config(state: State<'_, AppState>) -> ConvertResult<AppConfig> {
    Ok(state.config())
}

/// Saves the configuration and applies the window option.
///
/// # Returns
/// The configuration after sanitizing, which may differ from the input.
#[tauri::command]
pub async fn set_config(
    app: AppHandle,
    state: State<'_, AppState>,
    config: AppConfig,
) -> ConvertResult<AppConfig> {
    let applied = state.set_config(config)?;
    apply_window_top(&app, applied.enable_window_top);
    Ok(applied)
}

/// Starts converting `paths` in the background.
///
/// # Returns
/// `false` when a batch is already running and the request was dropped.
///
/// # Events Emitted
/// * `omt:convert:started` / `omt:convert:finished` around the batch
/// * `omt:convert:file:started` with the path of each eligible file
/// * `omt:convert:file:completed` / `omt:convert:file:failed` per file
#[tauri::command]
pub async fn convert(state: State<'_, AppState>, paths: Vec<String>) -> ConvertResult<bool> {
    debug!("Received convert command for {} paths", paths.len());
    let paths = paths.into_iter().map(PathBuf::from).collect();
    Ok(state.convert(paths).is_some())
}

impl AppState {
    /// Applies stored window options once the shell's main window exists.
    /// Call from the Tauri `setup` hook after managing the state.
    pub fn on_startup(&self, app: &AppHandle) {
        apply_window_top(app, self.window_top());
    }
}

/// Applies the always-on-top option to the main window, if there is one.
pub fn apply_window_top(app: &AppHandle, on_top: bool) {
    match app.get_webview_window(MAIN_WINDOW) {
        Some(window) => {
            if let Err(e) = window.set_always_on_top(on_top) {
                warn!("Failed to set always-on-top: {}", e);
            }
        }
        None => debug!("No {} window to pin", MAIN_WINDOW),
    }
}
