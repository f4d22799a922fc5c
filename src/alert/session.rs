//! One ongoing occurrence of an object class on a source.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::frame::Frame;

/// Live alert session for a `(source_id, label)` pair.
///
/// Shared between the dispatcher thread, which records new detections, and the
/// sender worker, which reads the best frame when the send delay elapses. The
/// mutable fields live behind the session's own mutex.
pub struct Session {
    source_id: String,
    label: String,
    first_seen: Instant,
    state: Mutex<SessionState>,
}

struct SessionState {
    best_confidence: f32,
    best_frame: Arc<Frame>,
    last_seen: Instant,
}

/// Point-in-time copy of a session, taken under its lock.
#[derive(Clone, Debug)]
pub struct SessionSnapshot {
    pub source_id: String,
    pub label: String,
    pub best_confidence: f32,
    pub best_frame: Arc<Frame>,
    pub first_seen: Instant,
    pub last_seen: Instant,
}

impl Session {
    pub fn new(
        source_id: impl Into<String>,
        label: impl Into<String>,
        confidence: f32,
        frame: Arc<Frame>,
        now: Instant,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            label: label.into(),
            first_seen: now,
            state: Mutex::new(SessionState {
                best_confidence: confidence,
                best_frame: frame,
                last_seen: now,
            }),
        }
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn first_seen(&self) -> Instant {
        self.first_seen
    }

    pub fn last_seen(&self) -> Instant {
        self.state().last_seen
    }

    pub fn best_confidence(&self) -> f32 {
        self.state().best_confidence
    }

    /// Record a later detection. `last_seen` always advances; the best frame
    /// is replaced only on a strictly higher confidence. Returns whether the
    /// best frame changed.
    pub fn record(&self, confidence: f32, frame: &Arc<Frame>, now: Instant) -> bool {
        let mut state = self.state();
        if now > state.last_seen {
            state.last_seen = now;
        }
        if confidence > state.best_confidence {
            state.best_confidence = confidence;
            state.best_frame = Arc::clone(frame);
            return true;
        }
        false
    }

    /// True once more than `timeout` has passed since the last detection.
    pub fn is_expired(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.state().last_seen) > timeout
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.state();
        SessionSnapshot {
            source_id: self.source_id.clone(),
            label: self.label.clone(),
            best_confidence: state.best_confidence,
            best_frame: Arc::clone(&state.best_frame),
            first_seen: self.first_seen,
            last_seen: state.last_seen,
        }
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("Session")
            .field("source_id", &self.source_id)
            .field("label", &self.label)
            .field("best_confidence", &state.best_confidence)
            .field("last_seen", &state.last_seen)
            .finish()
    }
}
