//! Core application types and state management.
//!
//! This module contains the fundamental types used throughout the application:
//! - [`AppState`]: Configuration, toolchain, profile catalog and dispatcher
//! - [`AppConfig`]: Persisted user configuration
//! - [`Setting`]: Options a settings screen can offer
//! - [`ConversionRequest`]: Per-batch conversion settings
//! - [`ConvertEvent`]: Batch lifecycle events and their sinks

mod config;
mod events;
mod state;
mod types;

pub use config::{AppConfig, ProfileOption, Setting, WorkerNumOption, CONFIG_FILE_NAME};
pub use events::{ChannelEventSink, ConvertEvent, EventSink, TracingEventSink};
pub use state::AppState;
pub use types::ConversionRequest;
