use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::core::{ConversionRequest, ConvertEvent, EventSink};
use crate::utils::{is_regular_file, ConvertError, ConvertResult};

/// Converts one file; implemented by the RAW pipeline.
#[async_trait]
pub trait Converter: Send + Sync {
    async fn convert(
        &self,
        cancel: CancellationToken,
        source: PathBuf,
        request: Arc<ConversionRequest>,
    ) -> ConvertResult<PathBuf>;
}

/// Runs one batch at a time on a bounded worker pool.
pub struct Dispatcher {
    converter: Arc<dyn Converter>,
    events: Arc<dyn EventSink>,
    busy: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl Dispatcher {
    pub fn new(
        converter: Arc<dyn Converter>,
        events: Arc<dyn EventSink>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            converter,
            events,
            busy: Arc::new(AtomicBool::new(false)),
            cancel,
        }
    }

    pub fn is_running(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Stops dispatching and aborts in-flight conversions. Later batches are
    /// refused.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Starts a batch in the background.
    ///
    /// Returns `None` without side effects if a batch is already running or
    /// the dispatcher was cancelled. Must be called from within a tokio
    /// runtime.
    pub fn convert(&self, paths: Vec<PathBuf>, request: ConversionRequest) -> Option<JoinHandle<()>> {
        if self.cancel.is_cancelled() {
            debug!("Dispatcher cancelled, refusing {} paths", paths.len());
            return None;
        }
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Batch already running, ignoring {} paths", paths.len());
            return None;
        }

        let batch = Batch {
            converter: self.converter.clone(),
            events: self.events.clone(),
            cancel: self.cancel.clone(),
            request: Arc::new(request),
        };
        let guard = BatchGuard {
            events: self.events.clone(),
            busy: self.busy.clone(),
        };
        self.events.emit(ConvertEvent::BatchStarted);

        Some(tokio::spawn(async move {
            let _guard = guard;
            batch.run(paths).await;
        }))
    }
}

/// Emits `BatchFinished` and only then releases the busy flag, even if the
/// batch task panics.
struct BatchGuard {
    events: Arc<dyn EventSink>,
    busy: Arc<AtomicBool>,
}

impl Drop for BatchGuard {
    fn drop(&mut self) {
        self.events.emit(ConvertEvent::BatchFinished);
        self.busy.store(false, Ordering::Release);
    }
}

struct Batch {
    converter: Arc<dyn Converter>,
    events: Arc<dyn EventSink>,
    cancel: CancellationToken,
    request: Arc<ConversionRequest>,
}

impl Batch {
    async fn run(self, paths: Vec<PathBuf>) {
        let workers = self.request.effective_workers();
        info!("Processing batch of {} paths with {} workers", paths.len(), workers);

        let slots = Arc::new(Semaphore::new(workers));
        let mut running = JoinSet::new();
        let mut dispatched = 0usize;

        for path in paths {
            if self.cancel.is_cancelled() {
                break;
            }
            if !is_regular_file(&path).await {
                debug!("Skipping {}: not a regular file", path.display());
                continue;
            }

            self.events.emit(ConvertEvent::FileStarted { path: path.clone() });

            let permit = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    self.events.emit(ConvertEvent::FileFailed {
                        path,
                        error: ConvertError::Cancelled.to_string(),
                    });
                    break;
                }
                permit = slots.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let converter = self.converter.clone();
            let events = self.events.clone();
            let cancel = self.cancel.clone();
            let request = self.request.clone();
            running.spawn(async move {
                let _permit = permit;
                match converter.convert(cancel, path.clone(), request).await {
                    Ok(output) => events.emit(ConvertEvent::FileCompleted { path, output }),
                    Err(e) => {
                        if e.is_cancelled() {
                            warn!("Cancelled {}", path.display());
                        } else {
                            error!("Failed to convert {}: {}", path.display(), e);
                        }
                        events.emit(ConvertEvent::FileFailed {
                            path,
                            error: e.to_string(),
                        });
                    }
                }
            });
            dispatched += 1;
        }

        while let Some(joined) = running.join_next().await {
            if let Err(e) = joined {
                error!("Conversion worker panicked: {}", e);
            }
        }
        info!("Batch completed: {} files dispatched", dispatched);
    }
}
