//! Progress Reporting
//!
//! Events are observational only. Sinks must be `Send + Sync` because slots
//! may run on worker threads; an interactive observer should take events
//! through the channel pair rather than sharing state with the pipeline.

use std::fmt;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

use log::info;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    CardData,
    Artwork,
    Render,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::CardData => "card_data",
            Stage::Artwork => "artwork",
            Stage::Render => "render",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// 0-based slot index
    pub slot: usize,
    pub total: usize,
    pub stage: Stage,
    pub message: String,
}

pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

impl<F> ProgressSink for F
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    fn emit(&self, event: ProgressEvent) {
        self(event)
    }
}

/// Discards every event.
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn emit(&self, _event: ProgressEvent) {}
}

/// Logs every event at info level.
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn emit(&self, event: ProgressEvent) {
        info!("[{}/{}] {}: {}", event.slot + 1, event.total, event.stage, event.message);
    }
}

/// Sending half of a progress channel.
#[derive(Clone)]
pub struct ChannelProgress(Sender<ProgressEvent>);

/// Receiving half, owned by the observer's thread.
pub struct ProgressReceiver(Receiver<ProgressEvent>);

/// Every sender is gone; no further events can arrive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("progress channel disconnected")]
pub struct Disconnected;

/// Create a sender/receiver pair. The underlying channel is unbounded.
#[must_use]
pub fn channel() -> (ChannelProgress, ProgressReceiver) {
    let (s, r) = mpsc::channel();
    (ChannelProgress(s), ProgressReceiver(r))
}

impl ProgressSink for ChannelProgress {
    fn emit(&self, event: ProgressEvent) {
        // A dropped receiver means nobody is watching.
        let _ = self.0.send(event);
    }
}

impl ProgressReceiver {
    /// Non-blocking receive of a single event.
    pub fn try_recv(&self) -> Option<ProgressEvent> {
        self.0.try_recv().ok()
    }

    /// Waits up to `timeout`; `Ok(None)` on timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<ProgressEvent>, Disconnected> {
        match self.0.recv_timeout(timeout) {
            Ok(event) => Ok(Some(event)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(Disconnected),
        }
    }

    /// Drain all currently queued events.
    pub fn drain(&self) -> Vec<ProgressEvent> {
        let mut out = Vec::new();
        while let Some(event) = self.try_recv() {
            out.push(event);
        }
        out
    }

    /// Blocks until the run finishes, yielding events as they arrive.
    pub fn iter(&self) -> impl Iterator<Item = ProgressEvent> + '_ {
        self.0.iter()
    }
}
