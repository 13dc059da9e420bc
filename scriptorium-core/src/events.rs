//! Engine event notifications
//!
//! Every externally visible mutation emits one event, intended for a
//! real-time push layer (SSE, websockets) outside this crate. Delivery is
//! fire-and-forget over a `tokio::sync::broadcast` channel: a slow, lagging,
//! or absent subscriber never fails the operation that produced the event.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::types::{AnalysisStatus, LogEntry};

/// What just happened to an analysis.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    Created {
        analysis: String,
    },
    Deleted {
        analysis: String,
    },
    Renamed {
        from: String,
        to: String,
    },
    Updated {
        analysis: String,
        restarted: bool,
        saved_version: Option<u32>,
    },
    RolledBack {
        analysis: String,
        version: u32,
        restarted: bool,
    },
    StatusChanged {
        analysis: String,
        status: AnalysisStatus,
    },
    LogAppended {
        analysis: String,
        entry: LogEntry,
    },
    LogsCleared {
        analysis: String,
    },
}

impl EngineEvent {
    /// Name of the analysis the event concerns (the target name, for renames).
    pub fn analysis(&self) -> &str {
        match self {
            EngineEvent::Created { analysis }
            | EngineEvent::Deleted { analysis }
            | EngineEvent::Updated { analysis, .. }
            | EngineEvent::RolledBack { analysis, .. }
            | EngineEvent::StatusChanged { analysis, .. }
            | EngineEvent::LogAppended { analysis, .. }
            | EngineEvent::LogsCleared { analysis } => analysis,
            EngineEvent::Renamed { to, .. } => to,
        }
    }
}

/// Broadcast fan-out for [`EngineEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    /// Send to whoever is listening. Having no subscribers is fine.
    pub fn emit(&self, event: EngineEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
