//! Core types shared by the pipeline, the dispatcher and the front ends.

use serde::{Deserialize, Serialize};

/// Per-batch conversion settings.
///
/// Resolved once when a batch starts and shared immutably by every pipeline
/// run of that batch; configuration changes only affect later batches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionRequest {
    /// Run the RAW pre-converter before decoding when it is installed
    pub use_raw_preconverter: bool,
    /// Write outputs into a `make_tiff` subdirectory of the source directory
    pub use_subfolder: bool,
    /// ICC profile to embed; `None` clears any embedded profile
    pub icc_profile: Option<String>,
    /// Requested pool size, clamped by [`ConversionRequest::effective_workers`]
    pub worker_count: usize,
}

impl ConversionRequest {
    /// Pool size clamped to `[1, logical cores]`.
    pub fn effective_workers(&self) -> usize {
        self.worker_count.clamp(1, num_cpus::get().max(1))
    }
}

impl Default for ConversionRequest {
    fn default() -> Self {
        Self {
            use_raw_preconverter: true,
            use_subfolder: false,
            icc_profile: None,
            worker_count: num_cpus::get(),
        }
    }
}
