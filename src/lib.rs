//! Vision Alert
//!
//! Watches live video streams, runs each frame through an object detector and
//! raises one deduplicated notification, with an annotated snapshot, per
//! occurrence of an object of interest.
//!
//! # Architecture
//!
//! ```text
//! transport -> SourceReader -> BoundedDropQueue -> DetectionDispatcher
//!           -> AlertDebouncer -> AlertSender -> snapshot store + notifier
//! ```
//!
//! Memory stays bounded: the queue evicts its oldest frame instead of blocking
//! a reader, and the debouncer holds at most one session per (source, label).
//!
//! # Module Structure
//!
//! - `ingest`: Transports, per-camera reader threads, throttling and retry
//! - `queue`: Drop-oldest frame queue
//! - `detect`: Detector backends, interest rules, masks, annotation, dispatcher
//! - `alert`: Sessions, debouncer, delivery collaborators and sender pool
//! - `config`: JSON configuration with environment substitution
//! - `pipeline`: Startup and ordered shutdown of all stages

pub mod alert;
pub mod config;
pub mod detect;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod pipeline;
pub mod queue;

pub use alert::{AlertDebouncer, AlertSender, GotifyNotifier, HttpObjectStore, Session};
pub use config::AlertConfig;
pub use detect::{Detection, DetectionDispatcher, Detector, Mask, Rectangle};
pub use error::{PipelineError, PipelineResult};
pub use frame::Frame;
pub use ingest::{RtspTransport, SourceReader};
pub use pipeline::{Pipeline, PipelineReport};
pub use queue::BoundedDropQueue;
