//! Snapshot upload and push notification for a fired session.
//!
//! `AlertDelivery::send` is the whole side effect of an alert: encode the
//! session's best frame, upload it, then notify with a link to the upload.
//! The HTTP collaborators are thin `ureq` wrappers behind traits so tests can
//! record calls instead.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use serde_json::json;

use crate::alert::session::Session;
use crate::error::{PipelineError, PipelineResult};

/// Longest side of the uploaded snapshot.
pub const SNAPSHOT_MAX_SIDE: u32 = 1024;
pub const SNAPSHOT_QUALITY: u8 = 85;
const GOTIFY_PRIORITY: u8 = 5;

/// Object storage for snapshots.
pub trait SnapshotStore: Send + Sync {
    fn upload(&self, bytes: &[u8], content_type: &str, key: &str) -> PipelineResult<()>;
}

/// Push notification channel.
pub trait PushNotifier: Send + Sync {
    fn notify(&self, title: &str, image_url: &str) -> PipelineResult<()>;
}

/// Uploads with a plain HTTP PUT to `{endpoint}/{bucket}/{key}`.
pub struct HttpObjectStore {
    endpoint: String,
    bucket: String,
    token: Option<String>,
    agent: ureq::Agent,
}

impl HttpObjectStore {
    pub fn new(
        endpoint: impl Into<String>,
        bucket: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            bucket: bucket.into(),
            token,
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }

    pub fn object_url(&self, key: &str) -> String {
        format!("{}/{}/{}", self.endpoint, self.bucket, key)
    }
}

impl SnapshotStore for HttpObjectStore {
    fn upload(&self, bytes: &[u8], content_type: &str, key: &str) -> PipelineResult<()> {
        let mut request = self
            .agent
            .put(&self.object_url(key))
            .set("Content-Type", content_type);
        if let Some(token) = &self.token {
            request = request.set("Authorization", &format!("Bearer {}", token));
        }
        request
            .send_bytes(bytes)
            .map_err(|e| PipelineError::delivery(format!("upload of {} failed: {}", key, e)))?;
        Ok(())
    }
}

/// Sends markdown messages to a Gotify server.
pub struct GotifyNotifier {
    url: String,
    key: String,
    agent: ureq::Agent,
}

impl GotifyNotifier {
    pub fn new(url: impl Into<String>, key: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into().trim_end_matches('/').to_string(),
            key: key.into(),
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }
}

/// Gotify message body linking the snapshot inline.
pub fn gotify_message(title: &str, image_url: &str) -> serde_json::Value {
    json!({
        "extras": {
            "client::display": { "contentType": "text/markdown" }
        },
        "message": format!("[![Image]({url})]({url})", url = image_url),
        "priority": GOTIFY_PRIORITY,
        "title": title,
    })
}

impl PushNotifier for GotifyNotifier {
    fn notify(&self, title: &str, image_url: &str) -> PipelineResult<()> {
        let body = gotify_message(title, image_url).to_string();
        self.agent
            .post(&format!("{}/message", self.url))
            .set("X-Gotify-Key", &self.key)
            .set("Content-Type", "application/json")
            .send_string(&body)
            .map_err(|e| PipelineError::delivery(format!("notification failed: {}", e)))?;
        Ok(())
    }
}

/// JPEG-encode a frame, shrinking it to fit `SNAPSHOT_MAX_SIDE`.
pub fn encode_snapshot(image: &RgbImage) -> PipelineResult<Vec<u8>> {
    let (width, height) = (image.width(), image.height());
    let scaled;
    let image = if width > SNAPSHOT_MAX_SIDE || height > SNAPSHOT_MAX_SIDE {
        let scale = SNAPSHOT_MAX_SIDE as f64 / width.max(height) as f64;
        let new_width = ((width as f64 * scale).round() as u32).max(1);
        let new_height = ((height as f64 * scale).round() as u32).max(1);
        scaled = image::imageops::thumbnail(image, new_width, new_height);
        &scaled
    } else {
        image
    };

    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut bytes, SNAPSHOT_QUALITY)
        .encode_image(image)
        .map_err(|e| PipelineError::delivery(format!("snapshot encoding failed: {}", e)))?;
    Ok(bytes)
}

fn sanitize(part: &str) -> String {
    let cleaned: String = part
        .chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "unknown".to_string()
    } else {
        cleaned
    }
}

/// Object key for a snapshot: `{unix_secs}-{source}-{label}.jpg`.
pub fn upload_key(source_id: &str, label: &str, at: SystemTime) -> String {
    let secs = at
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    format!("{}-{}-{}.jpg", secs, sanitize(source_id), sanitize(label))
}

pub fn image_url(base_url: &str, key: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), key)
}

fn capitalize(label: &str) -> String {
    let mut chars = label.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

pub fn notification_title(source_id: &str, label: &str) -> String {
    format!("{}: {} detected", source_id, capitalize(label))
}

/// What a successful send produced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AlertReceipt {
    pub key: String,
    pub image_url: String,
}

pub struct AlertDelivery {
    store: Arc<dyn SnapshotStore>,
    notifier: Arc<dyn PushNotifier>,
    content_type: String,
    image_base_url: String,
}

impl AlertDelivery {
    pub fn new(
        store: Arc<dyn SnapshotStore>,
        notifier: Arc<dyn PushNotifier>,
        content_type: impl Into<String>,
        image_base_url: impl Into<String>,
    ) -> Self {
        Self {
            store,
            notifier,
            content_type: content_type.into(),
            image_base_url: image_base_url.into(),
        }
    }

    /// Upload the session's current best frame and notify about it.
    pub fn send(&self, session: &Session, at: SystemTime) -> PipelineResult<AlertReceipt> {
        let snapshot = session.snapshot();
        let bytes = encode_snapshot(&snapshot.best_frame.image)?;
        let key = upload_key(&snapshot.source_id, &snapshot.label, at);
        self.store.upload(&bytes, &self.content_type, &key)?;

        let url = image_url(&self.image_base_url, &key);
        let title = notification_title(&snapshot.source_id, &snapshot.label);
        self.notifier.notify(&title, &url)?;

        log::info!(
            "alert sent for {}: {} ({:.2}) -> {}",
            snapshot.source_id,
            snapshot.label,
            snapshot.best_confidence,
            url
        );
        Ok(AlertReceipt {
            key,
            image_url: url,
        })
    }
}
