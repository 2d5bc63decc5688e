//! Pipeline events for progress display and diagnostics.
//!
//! Events are sent over an unbounded channel so emitting never waits on the
//! consumer. A dropped or missing receiver is ignored.

use crate::models::ProducerKind;
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    CacheHit { key: String },
    CacheMiss { key: String },
    PermissionGranted { user_id: u64, repo_id: u64 },
    ProducerStarted { kind: ProducerKind },
    ProducerSucceeded { kind: ProducerKind, elapsed: Duration },
    ProducerFellBack { kind: ProducerKind, reason: String },
    CacheWritten { key: String },
    CacheWriteFailed { key: String, reason: String },
    CacheWriteSkipped { key: String },
    Degraded { reason: String },
}

impl fmt::Display for PipelineEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineEvent::CacheHit { .. } => write!(f, "served from cache"),
            PipelineEvent::CacheMiss { .. } => write!(f, "cache miss, checking permissions"),
            PipelineEvent::PermissionGranted { .. } => write!(f, "permission granted"),
            PipelineEvent::ProducerStarted { kind } => write!(f, "{} analysis running", kind),
            PipelineEvent::ProducerSucceeded { kind, elapsed } => {
                write!(f, "{} analysis done in {}ms", kind, elapsed.as_millis())
            }
            PipelineEvent::ProducerFellBack { kind, .. } => {
                write!(f, "{} analysis unavailable, using default", kind)
            }
            PipelineEvent::CacheWritten { .. } => write!(f, "result cached"),
            PipelineEvent::CacheWriteFailed { .. } => write!(f, "result could not be cached"),
            PipelineEvent::CacheWriteSkipped { .. } => write!(f, "result contains defaults, not cached"),
            PipelineEvent::Degraded { .. } => write!(f, "analysis degraded"),
        }
    }
}

/// Non-blocking sender half for [`PipelineEvent`]s.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    sender: Option<UnboundedSender<PipelineEvent>>,
}

impl EventSink {
    /// A sink that discards every event.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Create a sink and the receiver that observes it.
    pub fn channel() -> (Self, UnboundedReceiver<PipelineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { sender: Some(tx) }, rx)
    }

    pub fn emit(&self, event: PipelineEvent) {
        if let Some(sender) = &self.sender {
            let _ = sender.send(event);
        }
    }
}
