//! Bounded, newest-first event log shared by the pipeline and the preview.
//!
//! The log is a cloneable handle. Every `clear()` starts a new epoch; writers
//! that captured an older epoch (a preview subscription from a previous run)
//! are rejected by `append_in`, so a clear and a racing stale append are
//! totally ordered by the mutex: the append either lands before the clear
//! and is wiped, or arrives after it and is dropped.

use crate::util::now_epoch_ms;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

/// Maximum number of retained events.
pub const EVENT_LOG_CAPACITY: usize = 50;

/// Severity shown to the observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Info,
    Error,
    Success,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Error => write!(f, "error"),
            Self::Success => write!(f, "success"),
        }
    }
}

/// A single log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    pub message: String,
    /// Unix timestamp in milliseconds.
    pub timestamp_ms: u64,
}

#[derive(Debug, Default)]
struct LogState {
    entries: VecDeque<Event>,
    epoch: u64,
}

/// Shared handle to the event log.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    state: Arc<Mutex<LogState>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, LogState> {
        // Entries are plain data; a panicked writer cannot leave them torn.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append to the current epoch.
    pub fn append(&self, kind: EventKind, message: impl Into<String>) -> Event {
        let mut state = self.lock();
        push(&mut state, kind, message.into())
    }

    /// Append only if the log is still in `epoch`; returns `None` when stale.
    pub fn append_in(
        &self,
        epoch: u64,
        kind: EventKind,
        message: impl Into<String>,
    ) -> Option<Event> {
        let mut state = self.lock();
        if state.epoch != epoch {
            tracing::debug!(epoch, current = state.epoch, "dropping stale event");
            return None;
        }
        Some(push(&mut state, kind, message.into()))
    }

    pub fn info(&self, message: impl Into<String>) -> Event {
        self.append(EventKind::Info, message)
    }

    pub fn error(&self, message: impl Into<String>) -> Event {
        self.append(EventKind::Error, message)
    }

    pub fn success(&self, message: impl Into<String>) -> Event {
        self.append(EventKind::Success, message)
    }

    /// Drop every entry and start a new epoch, which is returned.
    pub fn clear(&self) -> u64 {
        let mut state = self.lock();
        state.entries.clear();
        state.epoch += 1;
        state.epoch
    }

    pub fn epoch(&self) -> u64 {
        self.lock().epoch
    }

    /// Copy of the retained entries, newest first.
    pub fn snapshot(&self) -> Vec<Event> {
        self.lock().entries.iter().cloned().collect()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn push(state: &mut LogState, kind: EventKind, message: String) -> Event {
    match kind {
        EventKind::Error => tracing::error!(%message, "event"),
        EventKind::Info | EventKind::Success => tracing::info!(%kind, %message, "event"),
    }
    let event = Event {
        kind,
        message,
        timestamp_ms: now_epoch_ms(),
    };
    state.entries.push_front(event.clone());
    if state.entries.len() > EVENT_LOG_CAPACITY {
        state.entries.pop_back();
    }
    event
}
