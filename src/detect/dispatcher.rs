//! Detection dispatcher: the single consumer loop between the frame queue and
//! the alert debouncer.
//!
//! For each frame the dispatcher:
//! 1. Resolves the source profile (interest rules + optional mask)
//! 2. Runs the detector on the raw pixels
//! 3. Keeps detections that match an interest rule and are not masked
//! 4. Annotates the frame in place for every kept detection
//! 5. Forwards `(kept, frame)` downstream when anything was kept
//!
//! Frames are processed strictly one at a time; a frame buffer is never shared
//! between dispatcher threads.

use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::detect::annotate::{annotate, AnnotationStyle};
use crate::detect::backend::Detector;
use crate::detect::interest::{matches_interest, InterestMap};
use crate::detect::mask::{is_masked, Mask};
use crate::detect::result::Detection;
use crate::error::{PipelineError, PipelineResult};
use crate::frame::Frame;
use crate::queue::BoundedDropQueue;

const QUEUE_POLL: Duration = Duration::from_millis(100);

/// Per-source filtering configuration, immutable once the dispatcher starts.
#[derive(Clone, Debug, Default)]
pub struct SourceProfile {
    pub interests: InterestMap,
    pub mask: Option<Mask>,
}

impl SourceProfile {
    pub fn new(interests: InterestMap, mask: Option<Mask>) -> Self {
        Self { interests, mask }
    }

    /// Keep detections matching an interest rule whose trigger band is visible.
    pub fn select(&self, detections: Vec<Detection>) -> Vec<Detection> {
        detections
            .into_iter()
            .filter(|d| {
                matches_interest(&self.interests, d) && !is_masked(self.mask.as_ref(), &d.bbox)
            })
            .collect()
    }
}

/// Downstream consumer of kept detections.
pub trait DetectionSink: Send + Sync {
    fn submit(&self, detections: &[Detection], frame: Arc<Frame>);
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatcherStats {
    pub frames_processed: u64,
    pub frames_unknown_source: u64,
    pub detector_errors: u64,
    /// Frames dropped because their size does not match the source mask.
    pub frames_mask_mismatch: u64,
    pub batches_forwarded: u64,
}

pub struct DetectionDispatcher {
    detector: Box<dyn Detector>,
    sources: HashMap<String, SourceProfile>,
    sink: Arc<dyn DetectionSink>,
    style: AnnotationStyle,
    stats: DispatcherStats,
    mismatch_warned: HashSet<String>,
}

impl DetectionDispatcher {
    pub fn new(
        detector: Box<dyn Detector>,
        sources: HashMap<String, SourceProfile>,
        sink: Arc<dyn DetectionSink>,
    ) -> Self {
        Self {
            detector,
            sources,
            sink,
            style: AnnotationStyle::default(),
            stats: DispatcherStats::default(),
            mismatch_warned: HashSet::new(),
        }
    }

    pub fn with_style(mut self, style: AnnotationStyle) -> Self {
        self.style = style;
        self
    }

    pub fn stats(&self) -> DispatcherStats {
        self.stats
    }

    /// Process one frame and return the detections that were forwarded.
    ///
    /// Frames from unregistered sources are rejected with `UnknownSource`.
    /// A frame whose size differs from its source mask is dropped unexamined,
    /// with one warning per source. A detector failure drops the frame and
    /// yields no detections.
    pub fn process_frame(&mut self, mut frame: Frame) -> PipelineResult<Vec<Detection>> {
        let Some(profile) = self.sources.get(&frame.source_id) else {
            self.stats.frames_unknown_source += 1;
            return Err(PipelineError::UnknownSource(frame.source_id));
        };
        self.stats.frames_processed += 1;

        if let Some(mask) = &profile.mask {
            if let Err(e) = mask.check_dimensions(frame.width(), frame.height()) {
                self.stats.frames_mask_mismatch += 1;
                if self.mismatch_warned.insert(frame.source_id.clone()) {
                    log::warn!(
                        "dropping frames from {} until its mask matches: {}",
                        frame.source_id,
                        e
                    );
                }
                return Ok(Vec::new());
            }
        }

        let detections =
            match self
                .detector
                .detect(frame.pixels(), frame.width(), frame.height())
            {
                Ok(detections) => detections,
                Err(e) => {
                    self.stats.detector_errors += 1;
                    log::warn!(
                        "detector {} failed on frame from {}: {:#}",
                        self.detector.name(),
                        frame.source_id,
                        e
                    );
                    return Ok(Vec::new());
                }
            };

        let kept = profile.select(detections);
        if kept.is_empty() {
            return Ok(kept);
        }

        for detection in &kept {
            annotate(&mut frame.image, detection, self.style);
        }
        log::debug!(
            "{} qualifying detection(s) on {}",
            kept.len(),
            frame.source_id
        );

        self.stats.batches_forwarded += 1;
        self.sink.submit(&kept, Arc::new(frame));
        Ok(kept)
    }

    /// Run the dispatch loop on a dedicated thread until `shutdown` is set and
    /// the queue has drained.
    pub fn spawn(
        mut self,
        queue: Arc<BoundedDropQueue<Frame>>,
        shutdown: Arc<AtomicBool>,
    ) -> io::Result<JoinHandle<DispatcherStats>> {
        thread::Builder::new()
            .name("dispatcher".to_string())
            .spawn(move || {
                if let Err(e) = self.detector.warm_up() {
                    log::warn!("detector warm-up failed: {:#}", e);
                }
                loop {
                    match queue.get_timeout(QUEUE_POLL) {
                        Some(frame) => {
                            if let Err(e) = self.process_frame(frame) {
                                log::warn!("dropping frame: {}", e);
                            }
                        }
                        None if shutdown.load(Ordering::SeqCst) => break,
                        None => {}
                    }
                }
                log::info!("dispatcher exiting: {:?}", self.stats);
                self.stats
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::interest::{interest_map, InterestRule};
    use crate::detect::result::Rectangle;
    use image::RgbImage;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        batches: Mutex<Vec<(Vec<Detection>, Arc<Frame>)>>,
    }

    impl DetectionSink for RecordingSink {
        fn submit(&self, detections: &[Detection], frame: Arc<Frame>) {
            self.batches
                .lock()
                .unwrap()
                .push((detections.to_vec(), frame));
        }
    }

    fn detections() -> Vec<Detection> {
        vec![
            Detection::new("person", 0.8, Rectangle::new(10, 10, 50, 50)),
            Detection::new("person", 0.2, Rectangle::new(10, 10, 50, 50)),
            Detection::new("cat", 0.8, Rectangle::new(20, 20, 50, 50)),
        ]
    }

    fn profiles(mask: Option<Mask>) -> HashMap<String, SourceProfile> {
        let interests = interest_map([InterestRule::new("person", 0.6).with_area(0, 10_000)]);
        HashMap::from([("test_cam".to_string(), SourceProfile::new(interests, mask))])
    }

    fn dispatcher(
        mask: Option<Mask>,
        sink: Arc<RecordingSink>,
        calls: Arc<Mutex<Vec<(u32, u32)>>>,
    ) -> DetectionDispatcher {
        let detector = move |_: &[u8], width: u32, height: u32| -> anyhow::Result<Vec<Detection>> {
            calls.lock().unwrap().push((width, height));
            Ok(detections())
        };
        DetectionDispatcher::new(Box::new(detector), profiles(mask), sink)
    }

    #[test]
    fn process_frame_forwards_only_matching_detections() {
        let sink = Arc::new(RecordingSink::default());
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut dispatcher = dispatcher(None, sink.clone(), calls.clone());

        let kept = dispatcher
            .process_frame(Frame::new("test_cam", RgbImage::new(200, 200)))
            .unwrap();

        assert_eq!(kept, vec![detections()[0].clone()]);
        assert_eq!(*calls.lock().unwrap(), vec![(200, 200)]);
        let batches = sink.batches.lock().unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].0, kept);
        // Annotated in place before forwarding.
        assert_eq!(batches[0].1.image.get_pixel(10, 30).0, [0, 255, 0]);
    }

    #[test]
    fn unknown_source_is_rejected_without_detection() {
        let sink = Arc::new(RecordingSink::default());
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut dispatcher = dispatcher(None, sink.clone(), calls.clone());

        let err = dispatcher
            .process_frame(Frame::new("nope", RgbImage::new(10, 10)))
            .unwrap_err();

        assert!(matches!(err, PipelineError::UnknownSource(ref s) if s == "nope"));
        assert!(calls.lock().unwrap().is_empty());
        assert!(sink.batches.lock().unwrap().is_empty());
        assert_eq!(dispatcher.stats().frames_unknown_source, 1);
    }

    #[test]
    fn masked_detections_are_not_forwarded() {
        let mask = Mask::from_grid(200, 200, vec![true; 200 * 200], Some(5)).unwrap();
        let sink = Arc::new(RecordingSink::default());
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut dispatcher = dispatcher(Some(mask), sink.clone(), calls);

        let kept = dispatcher
            .process_frame(Frame::new("test_cam", RgbImage::new(200, 200)))
            .unwrap();

        assert!(kept.is_empty());
        assert!(sink.batches.lock().unwrap().is_empty());
    }

    #[test]
    fn frames_not_matching_the_mask_size_are_dropped() {
        let mask = Mask::from_grid(10, 10, vec![true; 100], None).unwrap();
        let sink = Arc::new(RecordingSink::default());
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut dispatcher = dispatcher(Some(mask), sink.clone(), calls.clone());

        for _ in 0..3 {
            let kept = dispatcher
                .process_frame(Frame::new("test_cam", RgbImage::new(64, 48)))
                .unwrap();
            assert!(kept.is_empty());
        }

        assert!(calls.lock().unwrap().is_empty());
        assert!(sink.batches.lock().unwrap().is_empty());
        assert_eq!(dispatcher.stats().frames_mask_mismatch, 3);
        assert_eq!(dispatcher.mismatch_warned.len(), 1);
    }

    #[test]
    fn detector_failure_drops_frame() {
        let sink = Arc::new(RecordingSink::default());
        let failing = |_: &[u8], _: u32, _: u32| -> anyhow::Result<Vec<Detection>> {
            Err(anyhow::anyhow!("model crashed"))
        };
        let mut dispatcher = DetectionDispatcher::new(Box::new(failing), profiles(None), sink.clone());

        let kept = dispatcher
            .process_frame(Frame::new("test_cam", RgbImage::new(20, 20)))
            .unwrap();

        assert!(kept.is_empty());
        assert_eq!(dispatcher.stats().detector_errors, 1);
        assert!(sink.batches.lock().unwrap().is_empty());
    }

    #[test]
    fn spawned_loop_drains_queue_then_exits() {
        let sink = Arc::new(RecordingSink::default());
        let calls = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = dispatcher(None, sink.clone(), calls);

        let queue = Arc::new(BoundedDropQueue::new(4));
        queue.put(Frame::new("test_cam", RgbImage::new(60, 60)));
        queue.put(Frame::new("ghost", RgbImage::new(60, 60)));
        queue.put(Frame::new("test_cam", RgbImage::new(60, 60)));
        let shutdown = Arc::new(AtomicBool::new(true));

        let stats = dispatcher
            .spawn(queue.clone(), shutdown)
            .unwrap()
            .join()
            .unwrap();

        assert_eq!(stats.frames_processed, 2);
        assert_eq!(stats.frames_unknown_source, 1);
        assert_eq!(stats.batches_forwarded, 2);
        assert!(queue.is_empty());
        assert_eq!(sink.batches.lock().unwrap().len(), 2);
    }
}
