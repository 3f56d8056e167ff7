//! Batch lifecycle events and the sinks that deliver them.

use std::path::PathBuf;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Progress notifications emitted by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConvertEvent {
    BatchStarted,
    BatchFinished,
    FileStarted { path: PathBuf },
    FileCompleted { path: PathBuf, output: PathBuf },
    FileFailed { path: PathBuf, error: String },
}

impl ConvertEvent {
    /// Event name on the desktop event bus.
    pub fn name(&self) -> &'static str {
        match self {
            Self::BatchStarted => "omt:convert:started",
            Self::BatchFinished => "omt:convert:finished",
            Self::FileStarted { .. } => "omt:convert:file:started",
            Self::FileCompleted { .. } => "omt:convert:file:completed",
            Self::FileFailed { .. } => "omt:convert:file:failed",
        }
    }
}

/// Receiver of dispatcher events. Implementations must not block.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: ConvertEvent);
}

/// Writes events to the process log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: ConvertEvent) {
        match event {
            ConvertEvent::BatchStarted => info!("Batch started"),
            ConvertEvent::BatchFinished => info!("Batch finished"),
            ConvertEvent::FileStarted { path } => info!("Converting {}", path.display()),
            ConvertEvent::FileCompleted { path, output } => {
                info!("✓ {} -> {}", path.display(), output.display())
            }
            ConvertEvent::FileFailed { path, error } => warn!("✗ {}: {}", path.display(), error),
        }
    }
}

/// Forwards events into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelEventSink {
    tx: mpsc::UnboundedSender<ConvertEvent>,
}

impl ChannelEventSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ConvertEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelEventSink {
    fn emit(&self, event: ConvertEvent) {
        // A dropped receiver just means nobody is listening anymore.
        let _ = self.tx.send(event);
    }
}
