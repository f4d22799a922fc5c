//! visionalertd - camera object detection alert daemon
//!
//! This daemon:
//! 1. Loads the JSON config (with `${VAR}` substitution and env overrides)
//! 2. Starts one reader thread per camera and a single dispatcher
//! 3. Debounces detections into alert sessions
//! 4. Uploads the best snapshot of each session and sends a Gotify notification
//! 5. Shuts down cleanly on Ctrl-C, firing alerts that are already scheduled

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use vision_alert::config::{AlertConfig, DetectorBackend, DetectorSettings, SourceSettings};
use vision_alert::detect::StubDetector;
use vision_alert::ingest::Transport;
use vision_alert::{Detector, GotifyNotifier, HttpObjectStore, Pipeline, RtspTransport};

const SUPERVISE_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Parser, Debug)]
#[command(author, version, about = "Object detection alerts for live camera streams")]
struct Args {
    /// Path to the JSON configuration file.
    #[arg(short, long, env = "VISIONALERT_CONFIG")]
    config: PathBuf,

    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(long)]
    debug: bool,
}

fn build_detector(settings: &DetectorSettings) -> Result<Box<dyn Detector>> {
    match settings.backend {
        DetectorBackend::Stub => Ok(Box::new(StubDetector::new())),
        DetectorBackend::Tract => tract_detector(settings),
    }
}

#[cfg(feature = "backend-tract")]
fn tract_detector(settings: &DetectorSettings) -> Result<Box<dyn Detector>> {
    let model = settings
        .model_path
        .as_ref()
        .ok_or_else(|| anyhow!("tract detector requires model_path"))?;
    let labels = settings
        .labels_path
        .as_ref()
        .ok_or_else(|| anyhow!("tract detector requires labels_path"))?;
    let detector = vision_alert::detect::TractDetector::new(
        model,
        labels,
        settings.input_width,
        settings.input_height,
    )?
    .with_min_score(settings.min_score);
    Ok(Box::new(detector))
}

#[cfg(not(feature = "backend-tract"))]
fn tract_detector(_settings: &DetectorSettings) -> Result<Box<dyn Detector>> {
    Err(anyhow!(
        "detector backend 'tract' requires building with --features backend-tract"
    ))
}

fn main() -> Result<()> {
    let args = Args::parse();
    let default_level = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    let config = AlertConfig::load(&args.config)?;
    log::info!(
        "loaded {} source(s) from {}",
        config.sources.len(),
        args.config.display()
    );

    let detector = build_detector(&config.detector).context("failed to build detector")?;
    let store = Arc::new(HttpObjectStore::new(
        config.storage.endpoint.clone(),
        config.storage.bucket.clone(),
        config.storage.token.clone(),
        config.pipeline.timeouts.read,
    ));
    let notifier = Arc::new(GotifyNotifier::new(
        config.notify.gotify_url.clone(),
        config.notify.gotify_key.clone(),
        config.pipeline.timeouts.read,
    ));

    let pipeline = Pipeline::start(
        &config,
        detector,
        |source: &SourceSettings| -> Box<dyn Transport> {
            Box::new(RtspTransport::new(source.id.clone()))
        },
        store,
        notifier,
    )?;

    let stop = pipeline.stop_flag();
    ctrlc::set_handler(move || {
        stop.store(true, Ordering::SeqCst);
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    log::info!("visionalertd running, waiting for shutdown signal (Ctrl-C)...");
    let stop = pipeline.stop_flag();
    while !stop.load(Ordering::SeqCst) && !pipeline.readers_finished() {
        std::thread::sleep(SUPERVISE_INTERVAL);
    }
    log::info!("shutting down, firing pending alerts...");

    let report = pipeline.shutdown();
    for (source, stats) in &report.readers {
        log::info!(
            "source {}: {} connection(s), {} frame(s) decoded, {} forwarded",
            source,
            stats.connections,
            stats.frames_decoded,
            stats.frames_forwarded
        );
    }
    Ok(())
}
