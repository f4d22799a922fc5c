pub mod ssd;
pub mod stub;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use ssd::{load_labels, relative_box};
pub use stub::StubDetector;

#[cfg(feature = "backend-tract")]
pub use tract::TractDetector;
