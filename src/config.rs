use regex::{Captures, Regex};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::detect::mask::check_trigger_depth;
use crate::detect::InterestRule;
use crate::error::{PipelineError, PipelineResult};
use crate::ingest::throttle::{validate_fps, RetryPolicy};
use crate::ingest::transport::Timeouts;

const DEFAULT_QUEUE_CAPACITY: usize = 32;
const DEFAULT_DETECTION_TIMEOUT_SECS: u64 = 30;
const DEFAULT_SEND_DELAY_SECS: u64 = 5;
const DEFAULT_CONNECTION_TIMEOUT_SECS: u64 = 3;
const DEFAULT_READ_TIMEOUT_SECS: u64 = 3;
const DEFAULT_RETRY_DELAY_SECS: u64 = 1;
const DEFAULT_RETRY_BACKOFF_FACTOR: f64 = 1.0;
const DEFAULT_RETRY_MAX_DELAY_SECS: u64 = 60;
const DEFAULT_SENDER_WORKERS: usize = 4;
const DEFAULT_CONTENT_TYPE: &str = "image/jpeg";
const DEFAULT_MODEL_INPUT: u32 = 300;
const DEFAULT_MIN_SCORE: f32 = 0.1;

#[derive(Debug, Deserialize, Default)]
struct AlertConfigFile {
    sources: Option<Vec<SourceConfigFile>>,
    pipeline: Option<PipelineConfigFile>,
    storage: Option<StorageConfigFile>,
    notify: Option<NotifyConfigFile>,
    detector: Option<DetectorConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    id: Option<String>,
    address: Option<String>,
    fps: Option<f64>,
    mask: Option<PathBuf>,
    trigger_depth: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
    interests: Option<Vec<InterestConfigFile>>,
}

#[derive(Debug, Deserialize)]
struct InterestConfigFile {
    label: String,
    min_confidence: f32,
    min_area: Option<f64>,
    max_area: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct PipelineConfigFile {
    queue_capacity: Option<usize>,
    detection_timeout_secs: Option<u64>,
    send_delay_secs: Option<u64>,
    connection_timeout_secs: Option<u64>,
    read_timeout_secs: Option<u64>,
    retry_delay_secs: Option<u64>,
    retry_backoff_factor: Option<f64>,
    retry_max_delay_secs: Option<u64>,
    retry_enabled: Option<bool>,
    sender_workers: Option<usize>,
    show_area: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct StorageConfigFile {
    endpoint: Option<String>,
    bucket: Option<String>,
    token: Option<String>,
    image_base_url: Option<String>,
    content_type: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct NotifyConfigFile {
    gotify_url: Option<String>,
    gotify_key: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<DetectorBackend>,
    model_path: Option<PathBuf>,
    labels_path: Option<PathBuf>,
    input_width: Option<u32>,
    input_height: Option<u32>,
    min_score: Option<f32>,
}

#[derive(Debug, Clone)]
pub struct AlertConfig {
    pub sources: Vec<SourceSettings>,
    pub pipeline: PipelineSettings,
    pub storage: StorageSettings,
    pub notify: NotifySettings,
    pub detector: DetectorSettings,
}

#[derive(Debug, Clone)]
pub struct SourceSettings {
    pub id: String,
    pub address: String,
    /// Target rate after validation; invalid values are dropped with a warning.
    pub fps: Option<u32>,
    pub mask: Option<PathBuf>,
    pub trigger_depth: Option<u32>,
    /// Expected frame size, checked against the mask when both are present.
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub interests: Vec<InterestRule>,
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub queue_capacity: usize,
    pub detection_timeout: Duration,
    pub send_delay: Duration,
    pub timeouts: Timeouts,
    pub retry: RetryPolicy,
    /// When false each reader stops after its stream ends or fails once.
    pub retry_enabled: bool,
    pub sender_workers: usize,
    pub show_area: bool,
}

#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub endpoint: String,
    pub bucket: String,
    pub token: Option<String>,
    pub image_base_url: String,
    pub content_type: String,
}

#[derive(Debug, Clone)]
pub struct NotifySettings {
    pub gotify_url: String,
    pub gotify_key: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectorBackend {
    #[default]
    Stub,
    Tract,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub backend: DetectorBackend,
    pub model_path: Option<PathBuf>,
    pub labels_path: Option<PathBuf>,
    pub input_width: u32,
    pub input_height: u32,
    /// Raw model outputs scoring below this never reach interest filtering.
    pub min_score: f32,
}

impl AlertConfig {
    /// Read, substitute, override and validate the config at `path`.
    pub fn load(path: &Path) -> PipelineResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::config(format!(
                "failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::parse(&raw)
            .map_err(|e| PipelineError::config(format!("{}: {}", path.display(), config_detail(e))))
    }

    /// Same as `load` for an in-memory JSON document.
    pub fn parse(raw: &str) -> PipelineResult<Self> {
        let file = read_config_str(raw)?;
        let mut cfg = Self::from_file(file)?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: AlertConfigFile) -> PipelineResult<Self> {
        let sources = file
            .sources
            .unwrap_or_default()
            .into_iter()
            .map(SourceSettings::from_file)
            .collect::<PipelineResult<Vec<_>>>()?;

        let p = file.pipeline.unwrap_or_default();
        let pipeline = PipelineSettings {
            queue_capacity: p.queue_capacity.unwrap_or(DEFAULT_QUEUE_CAPACITY),
            detection_timeout: Duration::from_secs(
                p.detection_timeout_secs
                    .unwrap_or(DEFAULT_DETECTION_TIMEOUT_SECS),
            ),
            send_delay: Duration::from_secs(p.send_delay_secs.unwrap_or(DEFAULT_SEND_DELAY_SECS)),
            timeouts: Timeouts {
                connect: Duration::from_secs(
                    p.connection_timeout_secs
                        .unwrap_or(DEFAULT_CONNECTION_TIMEOUT_SECS),
                ),
                read: Duration::from_secs(p.read_timeout_secs.unwrap_or(DEFAULT_READ_TIMEOUT_SECS)),
            },
            retry: RetryPolicy {
                base: Duration::from_secs(p.retry_delay_secs.unwrap_or(DEFAULT_RETRY_DELAY_SECS)),
                factor: p
                    .retry_backoff_factor
                    .unwrap_or(DEFAULT_RETRY_BACKOFF_FACTOR),
                max: Duration::from_secs(
                    p.retry_max_delay_secs
                        .unwrap_or(DEFAULT_RETRY_MAX_DELAY_SECS),
                ),
            },
            retry_enabled: p.retry_enabled.unwrap_or(true),
            sender_workers: p.sender_workers.unwrap_or(DEFAULT_SENDER_WORKERS),
            show_area: p.show_area.unwrap_or(true),
        };

        let s = file
            .storage
            .ok_or_else(|| PipelineError::config("missing storage section"))?;
        let storage = StorageSettings {
            endpoint: s.endpoint.unwrap_or_default(),
            bucket: s.bucket.unwrap_or_default(),
            token: s.token.filter(|t| !t.trim().is_empty()),
            image_base_url: s.image_base_url.unwrap_or_default(),
            content_type: s
                .content_type
                .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
        };

        let n = file
            .notify
            .ok_or_else(|| PipelineError::config("missing notify section"))?;
        let notify = NotifySettings {
            gotify_url: n.gotify_url.unwrap_or_default(),
            gotify_key: n.gotify_key.unwrap_or_default(),
        };

        let d = file.detector.unwrap_or_default();
        let detector = DetectorSettings {
            backend: d.backend.unwrap_or_default(),
            model_path: d.model_path,
            labels_path: d.labels_path,
            input_width: d.input_width.unwrap_or(DEFAULT_MODEL_INPUT),
            input_height: d.input_height.unwrap_or(DEFAULT_MODEL_INPUT),
            min_score: d.min_score.unwrap_or(DEFAULT_MIN_SCORE),
        };

        Ok(Self {
            sources,
            pipeline,
            storage,
            notify,
            detector,
        })
    }

    fn apply_env(&mut self) -> PipelineResult<()> {
        if let Some(capacity) = env_number("VISIONALERT_QUEUE_CAPACITY")? {
            self.pipeline.queue_capacity = capacity as usize;
        }
        if let Some(secs) = env_number("VISIONALERT_DETECTION_TIMEOUT_SECS")? {
            self.pipeline.detection_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_number("VISIONALERT_SEND_DELAY_SECS")? {
            self.pipeline.send_delay = Duration::from_secs(secs);
        }
        if let Some(workers) = env_number("VISIONALERT_SENDER_WORKERS")? {
            self.pipeline.sender_workers = workers as usize;
        }
        if let Ok(key) = std::env::var("VISIONALERT_GOTIFY_KEY") {
            if !key.trim().is_empty() {
                self.notify.gotify_key = key;
            }
        }
        if let Ok(token) = std::env::var("VISIONALERT_STORAGE_TOKEN") {
            if !token.trim().is_empty() {
                self.storage.token = Some(token);
            }
        }
        Ok(())
    }

    fn validate(&self) -> PipelineResult<()> {
        if self.sources.is_empty() {
            return Err(PipelineError::config("at least one source is required"));
        }
        let mut ids = HashSet::new();
        for source in &self.sources {
            source.validate()?;
            if !ids.insert(source.id.as_str()) {
                return Err(PipelineError::config(format!(
                    "duplicate source id '{}'",
                    source.id
                )));
            }
        }

        if self.pipeline.queue_capacity == 0 {
            return Err(PipelineError::config("queue_capacity must be greater than zero"));
        }
        if self.pipeline.sender_workers == 0 {
            return Err(PipelineError::config("sender_workers must be greater than zero"));
        }
        if self.pipeline.detection_timeout.is_zero() {
            return Err(PipelineError::config(
                "detection_timeout_secs must be greater than zero",
            ));
        }
        if !self.pipeline.retry.factor.is_finite() || self.pipeline.retry.factor < 1.0 {
            return Err(PipelineError::config("retry_backoff_factor must be at least 1.0"));
        }

        require_url("storage.endpoint", &self.storage.endpoint)?;
        require_url("storage.image_base_url", &self.storage.image_base_url)?;
        require_url("notify.gotify_url", &self.notify.gotify_url)?;
        if self.storage.bucket.trim().is_empty() {
            return Err(PipelineError::config("storage.bucket is required"));
        }
        if self.notify.gotify_key.trim().is_empty() {
            return Err(PipelineError::config(
                "notify.gotify_key is required (or set VISIONALERT_GOTIFY_KEY)",
            ));
        }

        if self.detector.backend == DetectorBackend::Tract
            && (self.detector.model_path.is_none() || self.detector.labels_path.is_none())
        {
            return Err(PipelineError::config(
                "tract detector requires model_path and labels_path",
            ));
        }
        if self.detector.input_width == 0 || self.detector.input_height == 0 {
            return Err(PipelineError::config("detector input size must be non-zero"));
        }
        if !(0.0..=1.0).contains(&self.detector.min_score) {
            return Err(PipelineError::config("detector.min_score must be within [0, 1]"));
        }
        Ok(())
    }
}

impl SourceSettings {
    fn from_file(file: SourceConfigFile) -> PipelineResult<Self> {
        let id = file.id.unwrap_or_default().trim().to_string();
        let interests = file
            .interests
            .unwrap_or_default()
            .into_iter()
            .map(|i| interest_rule(&id, i))
            .collect::<PipelineResult<Vec<_>>>()?;
        Ok(Self {
            fps: validate_fps(&id, file.fps),
            address: file.address.unwrap_or_default(),
            mask: file.mask,
            trigger_depth: file.trigger_depth,
            width: file.width,
            height: file.height,
            interests,
            id,
        })
    }

    fn validate(&self) -> PipelineResult<()> {
        if self.id.is_empty() {
            return Err(PipelineError::config("source id must not be empty"));
        }
        if self.address.trim().is_empty() {
            return Err(PipelineError::config(format!(
                "source '{}' has no address",
                self.id
            )));
        }
        check_trigger_depth(self.trigger_depth).map_err(|e| {
            PipelineError::config(format!("source '{}': {}", self.id, config_detail(e)))
        })?;
        let mut labels = HashSet::new();
        for rule in &self.interests {
            if !(0.0..=1.0).contains(&rule.min_confidence) {
                return Err(PipelineError::config(format!(
                    "source '{}': min_confidence for '{}' must be within [0, 1]",
                    self.id, rule.label
                )));
            }
            if rule.min_area >= rule.max_area {
                return Err(PipelineError::config(format!(
                    "source '{}': min_area for '{}' must be below max_area",
                    self.id, rule.label
                )));
            }
            if !labels.insert(rule.label.as_str()) {
                return Err(PipelineError::config(format!(
                    "source '{}': duplicate interest '{}'",
                    self.id, rule.label
                )));
            }
        }
        Ok(())
    }
}

fn interest_rule(source_id: &str, file: InterestConfigFile) -> PipelineResult<InterestRule> {
    let area = |name: &str, value: Option<f64>, default: u64| -> PipelineResult<u64> {
        match value {
            None => Ok(default),
            Some(v) if v.is_nan() || v < 0.0 => Err(PipelineError::config(format!(
                "source '{}': {} for '{}' must not be negative",
                source_id, name, file.label
            ))),
            Some(v) if v >= u64::MAX as f64 => Ok(u64::MAX),
            Some(v) => Ok(v as u64),
        }
    };
    let min_area = area("min_area", file.min_area, 0)?;
    let max_area = area("max_area", file.max_area, u64::MAX)?;
    Ok(InterestRule::new(file.label.clone(), file.min_confidence).with_area(min_area, max_area))
}

fn require_url(name: &str, value: &str) -> PipelineResult<()> {
    if value.trim().is_empty() {
        return Err(PipelineError::config(format!("{} is required", name)));
    }
    Url::parse(value)
        .map_err(|e| PipelineError::config(format!("{} is not a valid URL: {}", name, e)))?;
    Ok(())
}

fn env_number(key: &str) -> PipelineResult<Option<u64>> {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| PipelineError::config(format!("{} must be a non-negative integer", key))),
        _ => Ok(None),
    }
}

fn config_detail(err: PipelineError) -> String {
    match err {
        PipelineError::Configuration(message) => message,
        other => other.to_string(),
    }
}

fn read_config_str(raw: &str) -> PipelineResult<AlertConfigFile> {
    let mut value: Value = serde_json::from_str(raw)
        .map_err(|e| PipelineError::config(format!("invalid config: {}", e)))?;
    let pattern = env_pattern()?;
    substitute_env(&mut value, &pattern);
    serde_json::from_value(value).map_err(|e| PipelineError::config(format!("invalid config: {}", e)))
}

fn env_pattern() -> PipelineResult<Regex> {
    Regex::new(r"\$\{([^}]+)\}").map_err(|e| PipelineError::config(e.to_string()))
}

/// Replace `${VAR}` occurrences; unset variables stay verbatim.
fn expand_with(pattern: &Regex, input: &str) -> String {
    pattern
        .replace_all(input, |caps: &Captures| {
            std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
        })
        .into_owned()
}

fn substitute_env(value: &mut Value, pattern: &Regex) {
    match value {
        Value::String(s) => {
            if pattern.is_match(s) {
                *s = expand_with(pattern, s);
            }
        }
        Value::Array(items) => items.iter_mut().for_each(|v| substitute_env(v, pattern)),
        Value::Object(map) => map.values_mut().for_each(|v| substitute_env(v, pattern)),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base(sources: &str) -> String {
        format!(
            r#"{{
                "sources": {},
                "storage": {{
                    "endpoint": "http://minio:9000",
                    "bucket": "alerts",
                    "image_base_url": "https://img.example.net"
                }},
                "notify": {{ "gotify_url": "http://gotify", "gotify_key": "k" }}
            }}"#,
            sources
        )
    }

    fn err_of(raw: &str) -> String {
        AlertConfig::parse(raw).unwrap_err().to_string()
    }

    #[test]
    fn defaults_apply() {
        let cfg = AlertConfig::parse(&base(
            r#"[{"id": "front", "address": "stub://front",
                 "interests": [{"label": "person", "min_confidence": 0.5}]}]"#,
        ))
        .unwrap();
        assert_eq!(cfg.pipeline.queue_capacity, 32);
        assert_eq!(cfg.pipeline.detection_timeout, Duration::from_secs(30));
        assert_eq!(cfg.pipeline.send_delay, Duration::from_secs(5));
        assert_eq!(cfg.pipeline.timeouts, Timeouts::default());
        assert_eq!(cfg.pipeline.retry, RetryPolicy::default());
        assert_eq!(cfg.storage.content_type, "image/jpeg");
        assert_eq!(cfg.detector.backend, DetectorBackend::Stub);
        assert_eq!(cfg.detector.min_score, 0.1);
        let rule = &cfg.sources[0].interests[0];
        assert_eq!((rule.min_area, rule.max_area), (0, u64::MAX));
    }

    #[test]
    fn invalid_fps_disables_throttling() {
        let cfg = AlertConfig::parse(&base(
            r#"[{"id": "a", "address": "stub://a", "fps": 2.5},
                {"id": "b", "address": "stub://b", "fps": 0},
                {"id": "c", "address": "stub://c", "fps": 4}]"#,
        ))
        .unwrap();
        let fps: Vec<_> = cfg.sources.iter().map(|s| s.fps).collect();
        assert_eq!(fps, vec![None, None, Some(4)]);
    }

    #[test]
    fn rejects_bad_sources() {
        assert!(err_of(&base("[]")).contains("at least one source"));
        assert!(err_of(&base(
            r#"[{"id": "a", "address": "x"}, {"id": "a", "address": "y"}]"#
        ))
        .contains("duplicate source id"));
        assert!(err_of(&base(r#"[{"id": "a"}]"#)).contains("no address"));
        assert!(err_of(&base(
            r#"[{"id": "a", "address": "x",
                 "interests": [{"label": "cat", "min_confidence": 1.5}]}]"#
        ))
        .contains("min_confidence"));
        assert!(err_of(&base(
            r#"[{"id": "a", "address": "x",
                 "interests": [{"label": "cat", "min_confidence": 0.5, "min_area": 10, "max_area": 10}]}]"#
        ))
        .contains("below max_area"));
        assert!(err_of(&base(
            r#"[{"id": "a", "address": "x",
                 "interests": [{"label": "cat", "min_confidence": 0.5, "min_area": -1}]}]"#
        ))
        .contains("negative"));
        assert!(err_of(&base(
            r#"[{"id": "a", "address": "x", "mask": "m.png", "trigger_depth": 0}]"#
        ))
        .contains("trigger_depth must be at least 1"));
    }

    #[test]
    fn rejects_missing_sections() {
        let raw = r#"{"sources": [{"id": "a", "address": "x"}]}"#;
        assert!(err_of(raw).contains("storage"));
    }

    #[test]
    fn tract_needs_model_paths() {
        let raw = base(r#"[{"id": "a", "address": "x"}]"#).replacen(
            "\"sources\"",
            "\"detector\": {\"backend\": \"tract\"}, \"sources\"",
            1,
        );
        assert!(err_of(&raw).contains("model_path"));
    }

    #[test]
    fn detector_min_score_is_bounded() {
        let with_score = |score: &str| {
            base(r#"[{"id": "a", "address": "x"}]"#).replacen(
                "\"sources\"",
                &format!("\"detector\": {{\"min_score\": {}}}, \"sources\"", score),
                1,
            )
        };
        let cfg = AlertConfig::parse(&with_score("0.4")).unwrap();
        assert_eq!(cfg.detector.min_score, 0.4);
        assert!(err_of(&with_score("1.5")).contains("min_score"));
    }
}
