// src/processing/workspace.rs

//! Per-file temp workspace.
//!
//! A [`Workspace`] owns every path a single conversion touches: the absolute
//! source, the destination directory, a token-suffixed family of temp files
//! and the final output path. Dropping it removes the intermediates; the log
//! file survives unless the run was committed, and an output this run
//! published is removed unless the run was committed.

use std::ffi::{OsStr, OsString};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::debug;
use uuid::Uuid;

use crate::utils::{path_taken, remove_if_exists, ConvertError, ConvertResult, PathError};

/// Destination subdirectory used when subfoldering is enabled.
pub const SUBFOLDER: &str = "make_tiff";

/// Output extension of published files.
pub const OUTPUT_EXTENSION: &str = "tiff";

/// Token draws before giving up; 128-bit tokens make a second draw already
/// improbable.
const MAX_TOKEN_ATTEMPTS: usize = 32;

#[derive(Debug)]
pub struct Workspace {
    source: PathBuf,
    dest_dir: PathBuf,
    stem: OsString,
    token: String,
    log_path: PathBuf,
    init_raw: PathBuf,
    init_tiff: PathBuf,
    work_tiff: PathBuf,
    final_path: PathBuf,
    published: Option<PathBuf>,
    committed: bool,
}

impl Workspace {
    /// Resolves all paths for `source` and creates the temp log file.
    ///
    /// Returns the workspace together with the open log file handle.
    pub async fn resolve(source: &Path, subfolder: bool) -> ConvertResult<(Self, File)> {
        let source = std::path::absolute(source)
            .map_err(|e| PathError::Resolve(source.to_path_buf(), e.to_string()))?;
        let meta = fs::metadata(&source)
            .await
            .map_err(|e| PathError::Resolve(source.clone(), e.to_string()))?;
        if !meta.is_file() {
            return Err(PathError::NotFile(source).into());
        }

        let stem = source
            .file_stem()
            .map(OsStr::to_os_string)
            .ok_or_else(|| PathError::NoFileName(source.clone()))?;
        let source_dir = source
            .parent()
            .ok_or_else(|| PathError::NoFileName(source.clone()))?;
        let dest_dir = if subfolder {
            source_dir.join(SUBFOLDER)
        } else {
            source_dir.to_path_buf()
        };

        fs::create_dir_all(&dest_dir)
            .await
            .map_err(|e| PathError::CreateDir(dest_dir.clone(), e.to_string()))?;

        for _ in 0..MAX_TOKEN_ATTEMPTS {
            let token = Uuid::new_v4().simple().to_string();
            let name = |suffix: &str| dest_dir.join(join_name(&stem, &format!("_{token}{suffix}")));
            let log_path = name(".log");
            let init_raw = name(".init");
            let init_tiff = name(".init.tiff");
            let work_tiff = name(".tiff");

            let mut taken = false;
            for candidate in [&log_path, &init_raw, &init_tiff, &work_tiff] {
                if path_taken(candidate).await {
                    taken = true;
                    break;
                }
            }
            if taken {
                debug!("Temp token {} collides in {}, retrying", token, dest_dir.display());
                continue;
            }

            // create_new claims the token atomically against concurrent runs.
            let log = match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&log_path)
                .await
            {
                Ok(file) => file.into_std().await,
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(PathError::CreateLog(log_path, e.to_string()).into()),
            };

            let final_path = next_free_output(&dest_dir, &stem).await;
            let workspace = Self {
                source,
                dest_dir,
                stem,
                token,
                log_path,
                init_raw,
                init_tiff,
                work_tiff,
                final_path,
                published: None,
                committed: false,
            };
            return Ok((workspace, log));
        }

        Err(ConvertError::CollisionExhausted(dest_dir))
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn dest_dir(&self) -> &Path {
        &self.dest_dir
    }

    pub fn stem(&self) -> &OsStr {
        &self.stem
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Intermediate raw file (pre-converter output or staged copy).
    pub fn init_raw(&self) -> &Path {
        &self.init_raw
    }

    /// Decoder output.
    pub fn init_tiff(&self) -> &Path {
        &self.init_tiff
    }

    /// Normalised TIFF that receives metadata and is finally renamed.
    pub fn work_tiff(&self) -> &Path {
        &self.work_tiff
    }

    pub fn final_path(&self) -> &Path {
        &self.final_path
    }

    /// Re-resolves the final path, keeping it if still free.
    pub async fn refresh_final_path(&mut self) -> &Path {
        if path_taken(&self.final_path).await {
            self.final_path = next_free_output(&self.dest_dir, &self.stem).await;
        }
        &self.final_path
    }

    /// Records that the working file now lives at `path`.
    pub fn mark_published(&mut self, path: PathBuf) {
        self.published = Some(path);
    }

    /// Marks the run successful: the log is removed and the published output kept.
    pub fn commit(&mut self) {
        self.committed = true;
    }

    /// Removes one intermediate as soon as a stage no longer needs it.
    pub fn discard(&self, path: &Path) {
        remove_if_exists(path);
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        for path in [&self.init_raw, &self.init_tiff, &self.work_tiff] {
            remove_if_exists(path);
        }
        if self.committed {
            remove_if_exists(&self.log_path);
        } else if let Some(published) = self.published.take() {
            remove_if_exists(published);
        }
    }
}

/// First of `{stem}.tiff`, `{stem}_1.tiff`, `{stem}_2.tiff`, … absent from `dir`.
pub async fn next_free_output(dir: &Path, stem: &OsStr) -> PathBuf {
    let mut n = 0usize;
    loop {
        let suffix = if n == 0 {
            format!(".{OUTPUT_EXTENSION}")
        } else {
            format!("_{n}.{OUTPUT_EXTENSION}")
        };
        let candidate = dir.join(join_name(stem, &suffix));
        if !path_taken(&candidate).await {
            return candidate;
        }
        n += 1;
    }
}

fn join_name(stem: &OsStr, suffix: &str) -> OsString {
    let mut name = stem.to_os_string();
    name.push(suffix);
    name
}
