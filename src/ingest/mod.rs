//! Frame ingestion.
//!
//! Each configured camera gets one `SourceReader` thread that opens a stream
//! through a `Transport`, throttles it to the configured rate and pushes
//! `Frame`s into the shared queue.
//!
//! Transports:
//! - `rtsp://` and other URIs via GStreamer (feature: rtsp-gstreamer)
//! - `stub://` synthetic frames for local runs and tests

pub mod reader;
pub mod rtsp;
pub mod throttle;
pub mod transport;

pub use reader::{FrameCallback, ReaderSettings, ReaderStats, SourceReader};
pub use rtsp::{redact, RtspTransport};
pub use throttle::{should_skip, validate_fps, RetryPolicy};
pub use transport::{Timeouts, Transport, VideoStream};
