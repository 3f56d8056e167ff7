// Module declarations in dependency order
#[cfg(feature = "desktop")]
pub mod commands;
pub mod core;
pub mod processing;
pub mod utils;

// Public exports for external consumers
pub use crate::core::{AppConfig, AppState, ConversionRequest, ConvertEvent, EventSink, Setting};
pub use crate::processing::{Converter, Dispatcher, IccCatalog, IccProfile, Pipeline, RawConverter, Toolchain, Workspace};
pub use crate::utils::{ConvertError, ConvertResult, PathError, ToolError};
#[cfg(feature = "desktop")]
pub use crate::commands::*;

// This library file is used as a public API for consuming this crate as a library.
// The command-line entry point is in main.rs.
