//! Per-camera capture loop.
//!
//! A `SourceReader` keeps frames flowing from one stream into the pipeline:
//! - Opens the transport, retrying with backoff on failure
//! - Throttles to the configured frame rate
//! - Hands each retained frame to a callback (usually the queue's `put`)
//! - Observes a cooperative stop flag per decoded frame and per reconnect
//!
//! Failures never escape the reader; they are logged and retried, or end the
//! reader when retries are disabled.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::error::PipelineError;
use crate::frame::Frame;
use crate::ingest::throttle::{at_or_above_native, should_skip, RetryPolicy};
use crate::ingest::transport::{Timeouts, Transport, VideoStream};
use crate::ingest::rtsp::redact;

/// Granularity at which backoff sleeps re-check the stop flag.
const STOP_POLL: Duration = Duration::from_millis(50);

/// Receives every frame the reader retains.
pub type FrameCallback = Box<dyn FnMut(Frame) + Send>;

#[derive(Clone, Debug)]
pub struct ReaderSettings {
    pub source_id: String,
    pub address: String,
    /// Validated target frame rate; `None` keeps the native rate.
    pub fps: Option<u32>,
    pub timeouts: Timeouts,
    pub retry: RetryPolicy,
    /// When false the reader exits after the first stream ends or fails.
    pub retry_enabled: bool,
}

impl ReaderSettings {
    pub fn new(source_id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            address: address.into(),
            fps: None,
            timeouts: Timeouts::default(),
            retry: RetryPolicy::default(),
            retry_enabled: true,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReaderStats {
    pub connections: u64,
    pub failures: u64,
    pub frames_decoded: u64,
    pub frames_forwarded: u64,
}

pub struct SourceReader {
    settings: ReaderSettings,
    transport: Box<dyn Transport>,
    on_frame: FrameCallback,
    stop: Arc<AtomicBool>,
    stats: ReaderStats,
    warned_fps: bool,
}

impl SourceReader {
    pub fn new(
        settings: ReaderSettings,
        transport: Box<dyn Transport>,
        on_frame: FrameCallback,
    ) -> Self {
        Self {
            settings,
            transport,
            on_frame,
            stop: Arc::new(AtomicBool::new(false)),
            stats: ReaderStats::default(),
            warned_fps: false,
        }
    }

    /// Share a stop flag with other readers.
    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    pub fn spawn(self) -> io::Result<JoinHandle<ReaderStats>> {
        thread::Builder::new()
            .name(format!("reader-{}", self.settings.source_id))
            .spawn(move || self.run())
    }

    /// Run the capture loop on the current thread until stopped.
    pub fn run(mut self) -> ReaderStats {
        let source_id = self.settings.source_id.clone();
        let mut consecutive_failures = 0u32;

        while !self.stopped() {
            log::info!(
                "opening stream {} at {}",
                source_id,
                redact(&self.settings.address)
            );
            let outcome = match self
                .transport
                .open(&self.settings.address, &self.settings.timeouts)
            {
                Ok(mut stream) => {
                    self.stats.connections += 1;
                    let outcome = self.read_stream(stream.as_mut());
                    stream.close();
                    outcome
                }
                Err(e) => Err((false, e)),
            };

            match outcome {
                Ok(received_frames) => {
                    if received_frames {
                        consecutive_failures = 0;
                    }
                    log::info!("stream {} ended", source_id);
                }
                Err((received_frames, e)) => {
                    self.stats.failures += 1;
                    if received_frames {
                        consecutive_failures = 0;
                    }
                    consecutive_failures = consecutive_failures.saturating_add(1);
                    log::error!("error reading frames from stream {}: {}", source_id, e);
                }
            }

            if !self.settings.retry_enabled || self.stopped() {
                break;
            }
            let delay = self.settings.retry.delay_for(consecutive_failures.max(1));
            log::info!("retrying stream {} in {:?}", source_id, delay);
            self.sleep_unless_stopped(delay);
        }

        log::info!("stream {} complete, exiting", source_id);
        self.stats
    }

    /// Read frames until the stream ends, errors or the reader is stopped.
    ///
    /// Returns whether any frame was decoded, alongside the error on failure.
    fn read_stream(
        &mut self,
        stream: &mut dyn VideoStream,
    ) -> Result<bool, (bool, PipelineError)> {
        let mut index: u64 = 0;
        loop {
            let image = match stream.next_frame() {
                Ok(Some(image)) => image,
                Ok(None) => return Ok(index > 0),
                Err(e) => return Err((index > 0, e)),
            };
            let current = index;
            index += 1;
            self.stats.frames_decoded += 1;

            if self.stopped() {
                return Ok(true);
            }

            let native = stream.native_fps();
            if current == 0 && !self.warned_fps && at_or_above_native(native, self.settings.fps) {
                self.warned_fps = true;
                log::warn!(
                    "configured fps {} is not below the native rate of stream {} ({:.2})",
                    self.settings.fps.unwrap_or_default(),
                    self.settings.source_id,
                    native
                );
            }
            if should_skip(current, native, self.settings.fps) {
                continue;
            }

            self.stats.frames_forwarded += 1;
            (self.on_frame)(Frame::new(self.settings.source_id.clone(), image));
        }
    }

    fn stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    fn sleep_unless_stopped(&self, delay: Duration) {
        let deadline = Instant::now() + delay;
        while !self.stopped() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            thread::sleep(remaining.min(STOP_POLL));
        }
    }
}
