//! Alerting: debounce detections into sessions, then deliver one snapshot
//! notification per session after a grace period.

pub mod debouncer;
pub mod delivery;
pub mod sender;
pub mod session;

pub use debouncer::{AlertDebouncer, AlertScheduler};
pub use delivery::{
    encode_snapshot, image_url, notification_title, upload_key, AlertDelivery, AlertReceipt,
    GotifyNotifier, HttpObjectStore, PushNotifier, SnapshotStore,
};
pub use sender::{AlertSender, SenderStats};
pub use session::{Session, SessionSnapshot};
