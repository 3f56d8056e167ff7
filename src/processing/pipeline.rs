// src/processing/pipeline.rs

//! Per-file conversion pipeline.
//!
//! One [`Pipeline::run`] turns one RAW file into one TIFF:
//!
//! 1. resolve the [`Workspace`] (temp family, final path, run log)
//! 2. `.fff` sources go straight to normalisation
//! 3. optional pre-conversion, otherwise a staged copy, metadata stripped
//! 4. decode to a 16-bit linear TIFF
//! 5. normalise into the working TIFF
//! 6. copy metadata from the source and set or clear the ICC profile
//! 7. rename onto the final path
//!
//! Every tool line, warning and the terminal error go to the run log next to
//! the output; the log is deleted when the run succeeds.

use std::collections::HashMap;
use std::ffi::OsString;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::OwnedMutexGuard;
use tokio_util::sync::CancellationToken;
use tracing::instrument::WithSubscriber;
use tracing::{debug, error, info, warn};

use crate::core::ConversionRequest;
use crate::processing::batch::Converter;
use crate::processing::icc::{IccCatalog, IccProfile};
use crate::processing::tools::{ToolCommand, Toolchain};
use crate::processing::workspace::Workspace;
use crate::utils::{copy_new, get_extension, is_regular_file, ConvertError, ConvertResult};

/// Source extensions the normaliser ingests directly (Hasselblad 3FR/FFF
/// containers are already TIFF-structured).
pub const DIRECT_NORMALIZE_EXTENSIONS: &[&str] = &["fff"];

/// Fixed decoder policy: TIFF output, unit channel multipliers, raw colour
/// space, 16-bit linear, written to stdout.
const DECODER_ARGS: &[&str] = &["-T", "-r", "1", "1", "1", "1", "-o", "0", "-4", "-Z", "-"];

const PRECONVERTER_ARGS: &[&str] = &["-c", "-u", "-l", "-p0"];

/// Serialises publishes per destination directory so the final-path
/// re-check and the rename happen as one step within this process.
#[derive(Debug, Default)]
pub struct PublishLocks {
    dirs: Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
}

impl PublishLocks {
    pub async fn lock_dir(&self, dir: &Path) -> OwnedMutexGuard<()> {
        let lock = {
            let mut dirs = self.dirs.lock().unwrap_or_else(PoisonError::into_inner);
            dirs.retain(|_, lock| Arc::strong_count(lock) > 1);
            dirs.entry(dir.to_path_buf()).or_default().clone()
        };
        lock.lock_owned().await
    }
}

/// One conversion, bound to the batch's frozen request.
pub struct Pipeline {
    toolchain: Arc<Toolchain>,
    catalog: Arc<IccCatalog>,
    request: Arc<ConversionRequest>,
    publish_locks: Arc<PublishLocks>,
}

impl Pipeline {
    pub fn new(
        toolchain: Arc<Toolchain>,
        catalog: Arc<IccCatalog>,
        request: Arc<ConversionRequest>,
        publish_locks: Arc<PublishLocks>,
    ) -> Self {
        Self {
            toolchain,
            catalog,
            request,
            publish_locks,
        }
    }

    /// Converts `source`, returning the published output path.
    ///
    /// On any error every temp file is removed and only the run log remains.
    pub async fn run(&self, cancel: &CancellationToken, source: &Path) -> ConvertResult<PathBuf> {
        let (mut workspace, log) = Workspace::resolve(source, self.request.use_subfolder).await?;

        let result = async {
            let result = self.execute(cancel, &mut workspace).await;
            if let Err(e) = &result {
                error!("{}", e);
            }
            result
        }
        .with_subscriber(run_log_subscriber(log))
        .await;

        if result.is_ok() {
            workspace.commit();
        }
        result
    }

    async fn execute(&self, cancel: &CancellationToken, ws: &mut Workspace) -> ConvertResult<PathBuf> {
        info!("src filepath: {}", ws.source().display());
        info!("dst tiff filepath: {}", ws.final_path().display());
        info!("tmp raw filepath: {}", ws.init_raw().display());
        info!("tmp tiff filepath: {}", ws.init_tiff().display());

        if is_direct_normalize(ws.source()) {
            debug!("source is normaliser-ready, skipping decode");
            self.normalize(cancel, ws, ws.source(), ws.work_tiff()).await?;
        } else {
            self.stage_raw(cancel, ws).await?;

            self.decode(cancel, ws).await?;
            ws.discard(ws.init_raw());

            self.normalize(cancel, ws, ws.init_tiff(), ws.work_tiff()).await?;
            ws.discard(ws.init_tiff());
        }

        self.transfer_metadata(cancel, ws).await?;
        self.publish(cancel, ws).await
    }

    /// Fills the `.init` intermediate: pre-converter output when requested and
    /// installed, a copy of the source otherwise. Metadata is then stripped.
    async fn stage_raw(&self, cancel: &CancellationToken, ws: &Workspace) -> ConvertResult<()> {
        let mut staged = false;
        if self.request.use_raw_preconverter {
            match self.toolchain.available_preconverter() {
                Some(exe) => match self.preconvert(cancel, ws, exe).await {
                    Ok(()) => staged = true,
                    Err(e) if e.is_cancelled() => return Err(e),
                    Err(e) => {
                        warn!("RAW pre-conversion failed, continuing with the source file: {}", e);
                        ws.discard(ws.init_raw());
                    }
                },
                None => debug!("RAW pre-converter not installed"),
            }
        }

        if !staged {
            checkpoint(cancel)?;
            copy_new(ws.source(), ws.init_raw()).await?;
        }

        let exiftool = ToolCommand::new("clean exif", &self.toolchain.metadata)
            .current_dir(ws.dest_dir())
            .arg("-overwrite_original")
            .arg("-tagsfromfile")
            .arg(ws.init_raw())
            .arg("-ALL=")
            .arg(ws.init_raw());
        exiftool.run(cancel).await?;
        Ok(())
    }

    async fn preconvert(&self, cancel: &CancellationToken, ws: &Workspace, exe: &Path) -> ConvertResult<()> {
        let out_name = ws
            .init_raw()
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        ToolCommand::new("adobe dng converter", exe)
            .current_dir(ws.dest_dir())
            .args(PRECONVERTER_ARGS)
            .arg("-d")
            .arg(ws.dest_dir())
            .arg("-o")
            .arg(out_name)
            .arg(ws.source())
            .run(cancel)
            .await?;

        if !is_regular_file(ws.init_raw()).await {
            return Err(ConvertError::IO(format!(
                "pre-converter produced no file at {}",
                ws.init_raw().display()
            )));
        }
        Ok(())
    }

    async fn decode(&self, cancel: &CancellationToken, ws: &Workspace) -> ConvertResult<()> {
        checkpoint(cancel)?;
        ToolCommand::new("dcraw_emu", &self.toolchain.decoder)
            .current_dir(ws.dest_dir())
            .args(DECODER_ARGS)
            .arg(ws.init_raw())
            .stdout_to(ws.init_tiff())
            .strict_stderr()
            .run(cancel)
            .await?;
        Ok(())
    }

    async fn normalize(
        &self,
        cancel: &CancellationToken,
        ws: &Workspace,
        src: &Path,
        dst: &Path,
    ) -> ConvertResult<()> {
        checkpoint(cancel)?;
        // `-,=%` makes `%` the sub-image separator; `%0` selects the first IFD.
        let mut first_ifd = OsString::from(src.as_os_str());
        first_ifd.push("%0");
        ToolCommand::new("tiffcp", &self.toolchain.normalizer)
            .current_dir(ws.dest_dir())
            .arg("-,=%")
            .arg(first_ifd)
            .arg(dst)
            .run(cancel)
            .await?;
        Ok(())
    }

    /// Copies all tags from the original source and sets or clears the ICC
    /// profile in one invocation.
    async fn transfer_metadata(&self, cancel: &CancellationToken, ws: &Workspace) -> ConvertResult<()> {
        checkpoint(cancel)?;
        let mut cmd = ToolCommand::new("exiftool", &self.toolchain.metadata)
            .current_dir(ws.dest_dir())
            .arg("-overwrite_original")
            .arg("-tagsfromfile")
            .arg(ws.source())
            .arg("-ALL:ALL");

        cmd = match self.profile() {
            Some(profile) => {
                info!("embedding ICC profile {}", profile.name());
                cmd.arg("-ICC_Profile<=-").stdin_bytes(profile.data())
            }
            None => cmd.arg("-ICC_Profile="),
        };

        cmd.arg(ws.work_tiff()).run(cancel).await?;
        Ok(())
    }

    async fn publish(&self, cancel: &CancellationToken, ws: &mut Workspace) -> ConvertResult<PathBuf> {
        checkpoint(cancel)?;
        let _guard = self.publish_locks.lock_dir(ws.dest_dir()).await;

        let planned = ws.final_path().to_path_buf();
        let target = ws.refresh_final_path().await.to_path_buf();
        if target != planned {
            warn!("{} was taken meanwhile, publishing to {}", planned.display(), target.display());
        }

        tokio::fs::rename(ws.work_tiff(), &target).await.map_err(|e| {
            ConvertError::publish(format!(
                "{} -> {}: {}",
                ws.work_tiff().display(),
                target.display(),
                e
            ))
        })?;
        ws.mark_published(target.clone());

        info!("published {}", target.display());
        Ok(target)
    }

    fn profile(&self) -> Option<&IccProfile> {
        let name = self.request.icc_profile.as_deref()?;
        let profile = self.catalog.lookup(name);
        if profile.is_none() {
            warn!("unknown ICC profile {:?}, clearing instead", name);
        }
        profile
    }
}

/// Pipeline factory used by the dispatcher.
pub struct RawConverter {
    toolchain: Arc<Toolchain>,
    catalog: Arc<IccCatalog>,
    publish_locks: Arc<PublishLocks>,
}

impl RawConverter {
    pub fn new(toolchain: Arc<Toolchain>, catalog: Arc<IccCatalog>) -> Self {
        Self {
            toolchain,
            catalog,
            publish_locks: Arc::new(PublishLocks::default()),
        }
    }
}

#[async_trait]
impl Converter for RawConverter {
    async fn convert(
        &self,
        cancel: CancellationToken,
        source: PathBuf,
        request: Arc<ConversionRequest>,
    ) -> ConvertResult<PathBuf> {
        Pipeline::new(
            self.toolchain.clone(),
            self.catalog.clone(),
            request,
            self.publish_locks.clone(),
        )
        .run(&cancel, &source)
        .await
    }
}

fn is_direct_normalize(source: &Path) -> bool {
    get_extension(source).is_some_and(|ext| DIRECT_NORMALIZE_EXTENSIONS.contains(&ext.as_str()))
}

fn checkpoint(cancel: &CancellationToken) -> ConvertResult<()> {
    if cancel.is_cancelled() {
        Err(ConvertError::Cancelled)
    } else {
        Ok(())
    }
}

/// Plain-text subscriber bound to one run's log file.
fn run_log_subscriber(log: File) -> impl tracing::Subscriber + Send + Sync + 'static {
    tracing_subscriber::fmt()
        .with_writer(Mutex::new(log))
        .with_ansi(false)
        .with_target(false)
        .with_max_level(tracing::Level::DEBUG)
        .finish()
}
