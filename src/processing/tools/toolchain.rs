//! Locations of the external programs the pipeline drives.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::utils::{ConvertError, ConvertResult};

/// Bundled tools live in this directory next to the application binary.
pub const THIRD_PARTY_DIR: &str = "third-party";

/// Absolute paths of the four external tools.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolchain {
    /// RAW decoder (`dcraw_emu`)
    pub decoder: PathBuf,
    /// TIFF copier/normaliser (`tiffcp`)
    pub normalizer: PathBuf,
    /// Metadata tool (`exiftool`)
    pub metadata: PathBuf,
    /// Optional RAW pre-converter (Adobe DNG Converter)
    pub preconverter: Option<PathBuf>,
}

impl Toolchain {
    /// Tools bundled in `<exe dir>/third-party`, pre-converter at its vendor
    /// install location.
    pub fn discover() -> ConvertResult<Self> {
        let exe = std::env::current_exe()
            .map_err(|e| ConvertError::config(format!("Cannot locate executable: {e}")))?;
        let base = exe
            .parent()
            .ok_or_else(|| ConvertError::config("Executable has no parent directory"))?
            .join(THIRD_PARTY_DIR);

        let mut toolchain = Self::bundled(&base);
        toolchain.preconverter = default_preconverter();
        debug!("Discovered toolchain: {:?}", toolchain);
        Ok(toolchain)
    }

    /// All four tools inside one directory, the pre-converter as
    /// `dng_converter`.
    pub fn from_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        let mut toolchain = Self::bundled(dir);
        toolchain.preconverter = Some(dir.join(executable_name("dng_converter")));
        toolchain
    }

    fn bundled(dir: &Path) -> Self {
        Self {
            decoder: dir.join(executable_name("dcraw_emu")),
            normalizer: dir.join(executable_name("tiffcp")),
            metadata: dir.join(executable_name("exiftool")),
            preconverter: None,
        }
    }

    /// Pre-converter path, only if the executable exists on this machine.
    pub fn available_preconverter(&self) -> Option<&Path> {
        self.preconverter.as_deref().filter(|p| p.exists())
    }

    pub fn preconverter_available(&self) -> bool {
        self.available_preconverter().is_some()
    }
}

fn executable_name(stem: &str) -> String {
    if cfg!(windows) {
        format!("{stem}.exe")
    } else {
        stem.to_string()
    }
}

fn default_preconverter() -> Option<PathBuf> {
    if cfg!(target_os = "windows") {
        Some(PathBuf::from(
            "C:\\Program Files\\Adobe\\Adobe DNG Converter\\Adobe DNG Converter.exe",
        ))
    } else if cfg!(target_os = "macos") {
        Some(PathBuf::from(
            "/Applications/Adobe DNG Converter.app/Contents/MacOS/Adobe DNG Converter",
        ))
    } else {
        None
    }
}
