//! Tauri command handlers for the desktop frontend.
//!
//! A desktop shell registers [`TauriEventSink`] as the dispatcher's event
//! sink, manages an [`AppState`](crate::core::AppState) and exposes:
//! - [`get_setting`]: Machine-specific options
//! - [`get_config`] / [`set_config`]: Read and persist the configuration
//! - [`convert`]: Start a batch

mod convert;

pub use convert::*;
