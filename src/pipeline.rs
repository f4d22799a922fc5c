//! Wires readers, queue, dispatcher, debouncer and sender into one running
//! pipeline.
//!
//! Shutdown order matters: readers stop first, the dispatcher then drains
//! whatever is left in the queue, and finally the sender fires every session
//! it already accepted.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::alert::{
    AlertDebouncer, AlertDelivery, AlertSender, PushNotifier, SenderStats, SnapshotStore,
};
use crate::config::{AlertConfig, SourceSettings};
use crate::detect::{
    interest_map, AnnotationStyle, DetectionDispatcher, Detector, DispatcherStats, Mask,
    SourceProfile,
};
use crate::error::{PipelineError, PipelineResult};
use crate::frame::Frame;
use crate::ingest::{ReaderSettings, ReaderStats, SourceReader, Transport};
use crate::queue::BoundedDropQueue;

/// Final counters collected at shutdown.
#[derive(Clone, Debug, Default)]
pub struct PipelineReport {
    pub readers: Vec<(String, ReaderStats)>,
    pub dispatcher: DispatcherStats,
    pub sender: SenderStats,
    pub frames_dropped: u64,
}

pub struct Pipeline {
    stop: Arc<AtomicBool>,
    drain: Arc<AtomicBool>,
    queue: Arc<BoundedDropQueue<Frame>>,
    sender: Arc<AlertSender>,
    readers: Vec<(String, JoinHandle<ReaderStats>)>,
    dispatcher: Option<JoinHandle<DispatcherStats>>,
    frames_dropped: Arc<AtomicU64>,
}

/// Load the mask for a source, checking it against the declared frame size.
pub fn load_mask(source: &SourceSettings) -> PipelineResult<Option<Mask>> {
    let Some(path) = &source.mask else {
        return Ok(None);
    };
    let mask = Mask::load(path, source.trigger_depth)?;
    if let (Some(width), Some(height)) = (source.width, source.height) {
        mask.check_dimensions(width, height)?;
    }
    log::info!(
        "loaded {}x{} mask for source {}",
        mask.width(),
        mask.height(),
        source.id
    );
    Ok(Some(mask))
}

fn spawn_error(what: &str, err: std::io::Error) -> PipelineError {
    PipelineError::config(format!("failed to spawn {} thread: {}", what, err))
}

impl Pipeline {
    /// Build every stage and start its threads.
    ///
    /// Masks are loaded before any thread starts, so a bad mask aborts
    /// startup without side effects.
    pub fn start<F>(
        config: &AlertConfig,
        detector: Box<dyn Detector>,
        transport_factory: F,
        store: Arc<dyn SnapshotStore>,
        notifier: Arc<dyn PushNotifier>,
    ) -> PipelineResult<Self>
    where
        F: Fn(&SourceSettings) -> Box<dyn Transport>,
    {
        let mut profiles = HashMap::new();
        for source in &config.sources {
            let mask = load_mask(source)?;
            profiles.insert(
                source.id.clone(),
                SourceProfile::new(interest_map(source.interests.iter().cloned()), mask),
            );
        }

        let frames_dropped = Arc::new(AtomicU64::new(0));
        let dropped = Arc::clone(&frames_dropped);
        let queue = Arc::new(
            BoundedDropQueue::new(config.pipeline.queue_capacity).with_overflow_hook(move || {
                let total = dropped.fetch_add(1, Ordering::Relaxed) + 1;
                log::warn!("frame queue full, dropped oldest frame ({} total)", total);
            }),
        );

        let delivery = AlertDelivery::new(
            store,
            notifier,
            config.storage.content_type.clone(),
            config.storage.image_base_url.clone(),
        );
        let sender = Arc::new(
            AlertSender::new(delivery, config.pipeline.sender_workers)
                .map_err(|e| spawn_error("alert sender", e))?,
        );
        let debouncer = Arc::new(AlertDebouncer::new(
            config.pipeline.detection_timeout,
            config.pipeline.send_delay,
            sender.clone(),
        ));

        let mut pipeline = Self {
            stop: Arc::new(AtomicBool::new(false)),
            drain: Arc::new(AtomicBool::new(false)),
            queue,
            sender,
            readers: Vec::new(),
            dispatcher: None,
            frames_dropped,
        };

        let dispatcher = DetectionDispatcher::new(detector, profiles, debouncer)
            .with_style(AnnotationStyle {
                show_area: config.pipeline.show_area,
            });
        match dispatcher.spawn(pipeline.queue.clone(), pipeline.drain.clone()) {
            Ok(handle) => pipeline.dispatcher = Some(handle),
            Err(e) => {
                pipeline.shutdown();
                return Err(spawn_error("dispatcher", e));
            }
        }

        for source in &config.sources {
            let settings = ReaderSettings {
                source_id: source.id.clone(),
                address: source.address.clone(),
                fps: source.fps,
                timeouts: config.pipeline.timeouts,
                retry: config.pipeline.retry,
                retry_enabled: config.pipeline.retry_enabled,
            };
            let queue = pipeline.queue.clone();
            let reader = SourceReader::new(
                settings,
                transport_factory(source),
                Box::new(move |frame: Frame| queue.put(frame)),
            )
            .with_stop_flag(pipeline.stop.clone());
            match reader.spawn() {
                Ok(handle) => pipeline.readers.push((source.id.clone(), handle)),
                Err(e) => {
                    pipeline.shutdown();
                    return Err(spawn_error("reader", e));
                }
            }
        }

        log::info!(
            "pipeline started with {} source(s), queue capacity {}",
            config.sources.len(),
            pipeline.queue.capacity()
        );
        Ok(pipeline)
    }

    /// Flag observed by every reader; setting it begins shutdown.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    pub fn queue(&self) -> Arc<BoundedDropQueue<Frame>> {
        self.queue.clone()
    }

    /// True once every reader thread has exited on its own.
    pub fn readers_finished(&self) -> bool {
        self.readers.iter().all(|(_, handle)| handle.is_finished())
    }

    /// Stop readers, drain the queue, fire pending alerts and join everything.
    pub fn shutdown(mut self) -> PipelineReport {
        self.stop.store(true, Ordering::SeqCst);
        let mut report = PipelineReport::default();

        for (id, handle) in self.readers.drain(..) {
            match handle.join() {
                Ok(stats) => report.readers.push((id, stats)),
                Err(_) => log::error!("reader {} panicked", id),
            }
        }

        self.drain.store(true, Ordering::SeqCst);
        if let Some(handle) = self.dispatcher.take() {
            match handle.join() {
                Ok(stats) => report.dispatcher = stats,
                Err(_) => log::error!("dispatcher panicked"),
            }
        }

        report.sender = self.sender.shutdown();
        report.frames_dropped = self.frames_dropped.load(Ordering::Relaxed);
        log::info!(
            "pipeline stopped: {} alert(s) sent, {} failed, {} frame(s) dropped",
            report.sender.sent,
            report.sender.failed,
            report.frames_dropped
        );
        report
    }
}
