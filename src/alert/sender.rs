//! Worker pool that fires scheduled sessions.
//!
//! Jobs are `(session, fire_at)` pairs on a shared channel. A worker sleeps
//! until `fire_at`, then reads the session's latest best frame and delivers it.
//! Failures are logged and dropped; nothing is retried.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Instant, SystemTime};

use crate::alert::debouncer::AlertScheduler;
use crate::alert::delivery::AlertDelivery;
use crate::alert::session::Session;

struct Job {
    session: Arc<Session>,
    fire_at: Instant,
}

#[derive(Default)]
struct Counters {
    sent: AtomicU64,
    failed: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SenderStats {
    pub sent: u64,
    pub failed: u64,
}

pub struct AlertSender {
    jobs: Mutex<Option<Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    counters: Arc<Counters>,
}

impl AlertSender {
    pub fn new(delivery: AlertDelivery, workers: usize) -> io::Result<Self> {
        let (tx, rx) = mpsc::channel::<Job>();
        let rx = Arc::new(Mutex::new(rx));
        let delivery = Arc::new(delivery);
        let counters = Arc::new(Counters::default());

        let mut handles = Vec::with_capacity(workers.max(1));
        for n in 0..workers.max(1) {
            let rx = Arc::clone(&rx);
            let delivery = Arc::clone(&delivery);
            let counters = Arc::clone(&counters);
            let handle = thread::Builder::new()
                .name(format!("alert-sender-{}", n))
                .spawn(move || worker_loop(rx, delivery, counters))?;
            handles.push(handle);
        }

        Ok(Self {
            jobs: Mutex::new(Some(tx)),
            workers: Mutex::new(handles),
            counters,
        })
    }

    pub fn stats(&self) -> SenderStats {
        SenderStats {
            sent: self.counters.sent.load(Ordering::SeqCst),
            failed: self.counters.failed.load(Ordering::SeqCst),
        }
    }

    /// Stop accepting jobs, let workers finish what is queued, and join them.
    pub fn shutdown(&self) -> SenderStats {
        self.jobs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        let handles: Vec<_> = self
            .workers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .drain(..)
            .collect();
        for handle in handles {
            if handle.join().is_err() {
                log::error!("alert sender worker panicked");
            }
        }
        self.stats()
    }
}

impl AlertScheduler for AlertSender {
    fn schedule(&self, session: Arc<Session>, fire_at: Instant) {
        let jobs = self
            .jobs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let Some(tx) = jobs.as_ref() else {
            log::warn!(
                "alert sender stopped; dropping alert for {}: {}",
                session.source_id(),
                session.label()
            );
            return;
        };
        if tx.send(Job { session, fire_at }).is_err() {
            log::warn!("alert sender workers are gone; alert dropped");
        }
    }
}

fn worker_loop(rx: Arc<Mutex<Receiver<Job>>>, delivery: Arc<AlertDelivery>, counters: Arc<Counters>) {
    loop {
        let job = {
            let rx = rx.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            rx.recv()
        };
        let Ok(job) = job else {
            break;
        };

        let wait = job.fire_at.saturating_duration_since(Instant::now());
        if !wait.is_zero() {
            thread::sleep(wait);
        }

        match delivery.send(&job.session, SystemTime::now()) {
            Ok(_) => {
                counters.sent.fetch_add(1, Ordering::SeqCst);
            }
            Err(e) => {
                counters.failed.fetch_add(1, Ordering::SeqCst);
                log::warn!(
                    "failed to send alert for {}: {}: {}",
                    job.session.source_id(),
                    job.session.label(),
                    e
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::delivery::testing::{RecordingNotifier, RecordingStore};
    use crate::frame::Frame;
    use image::RgbImage;
    use std::time::Duration;

    fn session(confidence: f32) -> Arc<Session> {
        Arc::new(Session::new(
            "front",
            "person",
            confidence,
            Arc::new(Frame::new("front", RgbImage::new(8, 8))),
            Instant::now(),
        ))
    }

    #[test]
    fn fires_after_delay_with_latest_best_frame() {
        let store = Arc::new(RecordingStore::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let delivery = AlertDelivery::new(store.clone(), notifier.clone(), "image/jpeg", "http://img");
        let sender = AlertSender::new(delivery, 2).unwrap();

        let s = session(0.5);
        let scheduled_at = Instant::now();
        sender.schedule(s.clone(), scheduled_at + Duration::from_millis(100));
        let better = Arc::new(Frame::new("front", RgbImage::new(16, 16)));
        s.record(0.95, &better, Instant::now());

        let stats = sender.shutdown();

        assert!(scheduled_at.elapsed() >= Duration::from_millis(100));
        assert_eq!(stats, SenderStats { sent: 1, failed: 0 });
        let uploads = store.uploads.lock().unwrap();
        let decoded = image::load_from_memory(&uploads[0].0).unwrap();
        assert_eq!(decoded.width(), 16);
        assert_eq!(notifier.messages.lock().unwrap().len(), 1);
    }

    #[test]
    fn failures_are_counted_and_swallowed() {
        let store = Arc::new(RecordingStore {
            fail: true,
            ..Default::default()
        });
        let notifier = Arc::new(RecordingNotifier::default());
        let delivery = AlertDelivery::new(store, notifier, "image/jpeg", "http://img");
        let sender = AlertSender::new(delivery, 1).unwrap();

        sender.schedule(session(0.7), Instant::now());
        sender.schedule(session(0.8), Instant::now());

        assert_eq!(sender.shutdown(), SenderStats { sent: 0, failed: 2 });
    }

    #[test]
    fn schedule_after_shutdown_is_dropped() {
        let delivery = AlertDelivery::new(
            Arc::new(RecordingStore::default()),
            Arc::new(RecordingNotifier::default()),
            "image/jpeg",
            "http://img",
        );
        let sender = AlertSender::new(delivery, 1).unwrap();
        sender.shutdown();
        sender.schedule(session(0.9), Instant::now());
        assert_eq!(sender.stats(), SenderStats::default());
    }
}
