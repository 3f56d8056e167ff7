// Command-line entry point. The library (lib.rs) holds the pipeline, the
// dispatcher and the desktop commands.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use open_make_tiff_lib::core::TracingEventSink;
use open_make_tiff_lib::{AppConfig, AppState, ConvertEvent, EventSink};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Convert RAW files into ICC-tagged TIFFs next to the originals.
#[derive(Parser, Debug)]
#[command(name = "open-make-tiff", version, about)]
struct Cli {
    /// RAW files to convert; directories and missing paths are skipped
    #[arg(required_unless_present = "list_profiles")]
    paths: Vec<PathBuf>,

    /// Configuration file (defaults to the user config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Concurrent conversions, clamped to the number of logical cores
    #[arg(short, long)]
    workers: Option<usize>,

    /// Write outputs into a `make_tiff` subdirectory
    #[arg(long)]
    subfolder: bool,

    /// ICC profile to embed; an empty name clears the profile
    #[arg(long)]
    profile: Option<String>,

    /// Never run the Adobe DNG Converter
    #[arg(long)]
    no_dng_converter: bool,

    /// Directory holding dcraw_emu, tiffcp, exiftool and dng_converter
    #[arg(long)]
    tools_dir: Option<PathBuf>,

    /// Directory holding *.icc / *.icm profiles
    #[arg(long)]
    profiles_dir: Option<PathBuf>,

    /// Print the available ICC profiles and exit
    #[arg(long)]
    list_profiles: bool,
}

impl Cli {
    /// Command-line flags override the stored configuration for this run only.
    fn apply(&self, config: &mut AppConfig) {
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if self.subfolder {
            config.enable_subfolder = true;
        }
        if let Some(profile) = &self.profile {
            config.icc_profile = profile.clone();
        }
        if self.no_dng_converter {
            config.disable_adobe_dng_converter = true;
        }
        if let Some(dir) = &self.tools_dir {
            config.tools_dir = Some(dir.clone());
        }
        if let Some(dir) = &self.profiles_dir {
            config.profiles_dir = Some(dir.clone());
        }
    }
}

/// Logs events and keeps a tally for the exit status.
#[derive(Default)]
struct CliEventSink {
    completed: AtomicUsize,
    failed: AtomicUsize,
}

impl EventSink for CliEventSink {
    fn emit(&self, event: ConvertEvent) {
        match &event {
            ConvertEvent::FileCompleted { .. } => {
                self.completed.fetch_add(1, Ordering::Relaxed);
            }
            ConvertEvent::FileFailed { .. } => {
                self.failed.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
        TracingEventSink.emit(event);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_file(false)
        .with_line_number(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_target(false)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    info!("=== open-make-tiff {} ===", env!("CARGO_PKG_VERSION"));

    let config_path = cli.config.clone().or_else(AppConfig::default_path);
    let mut config = match &config_path {
        Some(path) => AppConfig::load(path),
        None => AppConfig::default(),
    };
    cli.apply(&mut config);

    let events = Arc::new(CliEventSink::default());
    let state = AppState::new(config, None, events.clone()).context("failed to initialise")?;

    if cli.list_profiles {
        for name in state.catalog().names() {
            println!("{name}");
        }
        return Ok(());
    }

    let Some(mut batch) = state.convert(cli.paths) else {
        bail!("a batch is already running");
    };

    let interrupted = tokio::select! {
        joined = &mut batch => {
            joined.context("batch task failed")?;
            false
        }
        _ = tokio::signal::ctrl_c() => true,
    };
    if interrupted {
        warn!("Interrupted, cancelling running conversions");
        state.shutdown();
        batch.await.context("batch task failed")?;
    }

    let completed = events.completed.load(Ordering::Relaxed);
    let failed = events.failed.load(Ordering::Relaxed);
    info!("{} converted, {} failed", completed, failed);
    if failed > 0 {
        bail!("{failed} file(s) failed; see the .log files next to them");
    }
    Ok(())
}
