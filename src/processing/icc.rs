//! ICC profile catalog.
//!
//! Profiles are opaque byte blobs keyed by display name. The pipeline never
//! inspects them; it only pipes the bytes into the metadata tool.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::utils::{get_extension, ConvertError, ConvertResult};

/// Default profile directory next to the application binary.
pub const PROFILES_DIR: &str = "profiles";

/// One named ICC profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IccProfile {
    name: String,
    data: Arc<[u8]>,
}

impl IccProfile {
    pub fn new(name: impl Into<String>, data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// Name-indexed set of ICC profiles.
#[derive(Debug, Clone, Default)]
pub struct IccCatalog {
    profiles: BTreeMap<String, IccProfile>,
}

impl IccCatalog {
    pub fn from_profiles(profiles: impl IntoIterator<Item = IccProfile>) -> Self {
        Self {
            profiles: profiles
                .into_iter()
                .map(|p| (p.name.clone(), p))
                .collect(),
        }
    }

    /// Profiles bundled in `<exe dir>/profiles`.
    pub fn discover() -> ConvertResult<Self> {
        let exe = std::env::current_exe()
            .map_err(|e| ConvertError::config(format!("Cannot locate executable: {e}")))?;
        let dir = exe
            .parent()
            .ok_or_else(|| ConvertError::config("Executable has no parent directory"))?
            .join(PROFILES_DIR);
        Self::load_dir(dir)
    }

    /// Loads every `*.icc` / `*.icm` file of `dir`, named by file stem.
    ///
    /// A missing directory yields an empty catalog; unreadable files are
    /// skipped with a warning.
    pub fn load_dir(dir: impl AsRef<Path>) -> ConvertResult<Self> {
        let dir = dir.as_ref();
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No ICC profile directory at {}", dir.display());
                return Ok(Self::default());
            }
            Err(e) => return Err(e.into()),
        };

        let mut profiles = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if !matches!(get_extension(&path).as_deref(), Some("icc" | "icm")) {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match std::fs::read(&path) {
                Ok(data) => profiles.push(IccProfile::new(name, data)),
                Err(e) => warn!("Skipping ICC profile {}: {}", path.display(), e),
            }
        }

        debug!("Loaded {} ICC profiles from {}", profiles.len(), dir.display());
        Ok(Self::from_profiles(profiles))
    }

    pub fn lookup(&self, name: &str) -> Option<&IccProfile> {
        self.profiles.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.profiles.contains_key(name)
    }

    /// Profile names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.profiles.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}
