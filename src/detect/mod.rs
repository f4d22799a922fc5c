//! Object detection: detector backends, interest filtering, masking,
//! annotation and the dispatcher loop that ties them together.

pub mod annotate;
mod backend;
pub mod backends;
pub mod dispatcher;
pub mod interest;
pub mod mask;
mod result;

pub use annotate::AnnotationStyle;
pub use backend::Detector;
pub use backends::StubDetector;
#[cfg(feature = "backend-tract")]
pub use backends::TractDetector;
pub use dispatcher::{DetectionDispatcher, DetectionSink, DispatcherStats, SourceProfile};
pub use interest::{interest_map, matches_interest, InterestMap, InterestRule};
pub use mask::{is_masked, Mask};
pub use result::{Detection, Rectangle};
