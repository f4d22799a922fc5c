//! Per-(source, label) alert debouncing.
//!
//! The scoreboard maps each key to its live `Session`. The first qualifying
//! detection for a key opens a session and schedules exactly one delayed send.
//! Later detections inside `detection_timeout` only update that session. A
//! session whose last detection is older than the timeout is replaced by a new
//! one on the next detection; nothing expires sessions on a timer.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::alert::session::Session;
use crate::detect::{Detection, DetectionSink};
use crate::frame::Frame;

/// Receives newly opened sessions and fires them at `fire_at`.
pub trait AlertScheduler: Send + Sync {
    fn schedule(&self, session: Arc<Session>, fire_at: Instant);
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct SessionKey {
    source_id: String,
    label: String,
}

pub struct AlertDebouncer {
    scoreboard: Mutex<HashMap<SessionKey, Arc<Session>>>,
    detection_timeout: Duration,
    send_delay: Duration,
    scheduler: Arc<dyn AlertScheduler>,
}

impl AlertDebouncer {
    pub fn new(
        detection_timeout: Duration,
        send_delay: Duration,
        scheduler: Arc<dyn AlertScheduler>,
    ) -> Self {
        Self {
            scoreboard: Mutex::new(HashMap::new()),
            detection_timeout,
            send_delay,
            scheduler,
        }
    }

    /// Fold `detections` seen on `frame` at `now` into the scoreboard.
    ///
    /// Returns the number of new sessions opened (and therefore scheduled).
    pub fn submit_at(&self, detections: &[Detection], frame: &Arc<Frame>, now: Instant) -> usize {
        let mut opened = 0;
        for detection in detections {
            let key = SessionKey {
                source_id: frame.source_id.clone(),
                label: detection.label.clone(),
            };

            let (session, created) = {
                let mut board = self.board();
                board.retain(|_, s| !s.is_expired(now, self.detection_timeout));
                match board.get(&key) {
                    Some(session) => (Arc::clone(session), false),
                    None => {
                        let session = Arc::new(Session::new(
                            key.source_id.clone(),
                            key.label.clone(),
                            detection.confidence,
                            Arc::clone(frame),
                            now,
                        ));
                        board.insert(key, Arc::clone(&session));
                        (session, true)
                    }
                }
            };

            if created {
                opened += 1;
                log::info!(
                    "new alert session {}: {} ({:.2})",
                    session.source_id(),
                    session.label(),
                    detection.confidence
                );
                self.scheduler.schedule(session, now + self.send_delay);
            } else if session.record(detection.confidence, frame, now) {
                log::debug!(
                    "session {}: {} improved to {:.2}",
                    session.source_id(),
                    session.label(),
                    detection.confidence
                );
            }
        }
        opened
    }

    /// The live session for a key, if one has not expired as of `now`.
    pub fn live_session(&self, source_id: &str, label: &str, now: Instant) -> Option<Arc<Session>> {
        let key = SessionKey {
            source_id: source_id.to_string(),
            label: label.to_string(),
        };
        self.board()
            .get(&key)
            .filter(|s| !s.is_expired(now, self.detection_timeout))
            .cloned()
    }

    /// Number of sessions currently held, expired or not.
    pub fn session_count(&self) -> usize {
        self.board().len()
    }

    fn board(&self) -> MutexGuard<'_, HashMap<SessionKey, Arc<Session>>> {
        self.scoreboard
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl DetectionSink for AlertDebouncer {
    fn submit(&self, detections: &[Detection], frame: Arc<Frame>) {
        self.submit_at(detections, &frame, Instant::now());
    }
}
