//! Pipeline driver: capture, match, record, annotate. One frame at a time.

use crate::ledger::{Ledger, LedgerError, PresenceOutcome};
use crate::overlay;
use image::RgbImage;
use rollcall_core::{AttendanceRecord, BackendError, Detection, FaceBackend, FaceMatcher};
use rollcall_hw::{CameraError, CaptureSource};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("capture error: {0}")]
    Capture(#[from] CameraError),
    #[error("face backend error: {0}")]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// One processed frame.
pub struct AnnotatedFrame {
    pub image: RgbImage,
    pub detections: Vec<Detection>,
    /// Records written because of this frame.
    pub marked: Vec<AttendanceRecord>,
    /// Detections whose attendance write failed; retried on the next sighting.
    pub failures: Vec<LedgerError>,
}

pub enum FrameOutcome {
    /// The pipeline is not running; no frame was pulled.
    Idle,
    /// The capture source had no frame to give.
    Exhausted,
    Frame(AnnotatedFrame),
}

pub struct Pipeline<S, B> {
    source: S,
    backend: B,
    matcher: FaceMatcher,
    ledger: Arc<Ledger>,
    running: bool,
    frames_processed: u64,
}

impl<S: CaptureSource, B: FaceBackend> Pipeline<S, B> {
    pub fn new(source: S, backend: B, matcher: FaceMatcher, ledger: Arc<Ledger>) -> Self {
        Self {
            source,
            backend,
            matcher,
            ledger,
            running: false,
            frames_processed: 0,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames_processed
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    /// Acquire the capture source and begin pulling frames. Session state
    /// survives a stop/start within the same day.
    pub fn start(&mut self) -> Result<(), PipelineError> {
        if self.running {
            return Ok(());
        }
        self.source.acquire()?;
        self.ledger.begin_session();
        self.running = true;
        tracing::info!(date = %self.ledger.session_date(), "pipeline started");
        Ok(())
    }

    /// Release the capture source. Always succeeds.
    pub fn stop(&mut self) {
        self.source.release();
        if self.running {
            self.running = false;
            tracing::info!(frames = self.frames_processed, "pipeline stopped");
        }
    }

    /// Pull one frame, feed recognized faces to the ledger, and return the
    /// annotated image.
    pub fn annotated_frame(&mut self) -> Result<FrameOutcome, PipelineError> {
        if !self.running {
            return Ok(FrameOutcome::Idle);
        }
        let Some(frame) = self.source.next_frame()? else {
            tracing::warn!("capture source returned no frame");
            return Ok(FrameOutcome::Exhausted);
        };

        let detections = self.matcher.identify(&mut self.backend, &frame.image)?;
        let now = self.ledger.clock().now();

        let mut marked = Vec::new();
        let mut failures = Vec::new();
        for identity in detections.iter().filter_map(|d| d.identity.as_ref()) {
            match self.ledger.record_presence(&identity.full_name, now) {
                Ok(PresenceOutcome::Marked(record)) => marked.push(record),
                Ok(_) => {}
                Err(e) => failures.push(e),
            }
        }

        let mut image = frame.image;
        overlay::annotate(&mut image, &detections, now);
        self.frames_processed += 1;
        tracing::trace!(
            sequence = frame.sequence,
            faces = detections.len(),
            marked = marked.len(),
            "frame processed"
        );

        Ok(FrameOutcome::Frame(AnnotatedFrame {
            image,
            detections,
            marked,
            failures,
        }))
    }

    /// Sweep unseen identities to absent and return every stored record.
    /// Allowed whether running or stopped.
    pub fn finalize(&self) -> Result<Vec<AttendanceRecord>, PipelineError> {
        self.ledger.finalize_session()?;
        let date = self.ledger.session_date();
        let report = self.ledger.records_for(date)?;
        for record in &report {
            tracing::info!(
                date = %record.date,
                name = format!("{} {}", record.first_name, record.last_name),
                status = %record.status,
                lateness_minutes = record.lateness_minutes,
                "final attendance"
            );
        }
        Ok(self.ledger.snapshot()?)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::ledger::tests::{roster, ManualClock};
    use crate::store::AttendanceStore;
    use rollcall_core::{
        AttendanceStats, AttendanceStatus, BoundingBox, Embedding, FaceEmbedder, Gallery,
        RegionDetector, SchedulePolicy, DEFAULT_MATCH_THRESHOLD,
    };
    use rollcall_hw::Frame;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Capture source over a fixed number of blank frames.
    pub(crate) struct FakeSource {
        remaining: usize,
        acquired: bool,
        releases: Arc<AtomicUsize>,
        fail_acquire: bool,
    }

    impl FakeSource {
        fn new(frames: usize) -> (Self, Arc<AtomicUsize>) {
            let releases = Arc::new(AtomicUsize::new(0));
            let source = Self {
                remaining: frames,
                acquired: false,
                releases: Arc::clone(&releases),
                fail_acquire: false,
            };
            (source, releases)
        }
    }

    impl CaptureSource for FakeSource {
        fn acquire(&mut self) -> Result<(), CameraError> {
            if self.fail_acquire {
                return Err(CameraError::DeviceNotFound("/dev/video9".into()));
            }
            self.acquired = true;
            Ok(())
        }

        fn next_frame(&mut self) -> Result<Option<Frame>, CameraError> {
            if !self.acquired || self.remaining == 0 {
                return Ok(None);
            }
            self.remaining -= 1;
            Ok(Some(Frame::new(RgbImage::new(320, 240), self.remaining as u32)))
        }

        fn release(&mut self) {
            self.acquired = false;
            self.releases.fetch_add(1, Ordering::SeqCst);
        }

        fn is_acquired(&self) -> bool {
            self.acquired
        }
    }

    /// Backend that replays one scripted face list per frame.
    #[derive(Default)]
    pub(crate) struct ReplayBackend {
        frames: VecDeque<Vec<Embedding>>,
    }

    impl ReplayBackend {
        fn new(frames: Vec<Vec<Embedding>>) -> Self {
            Self {
                frames: frames.into(),
            }
        }
    }

    impl FaceEmbedder for ReplayBackend {
        fn detect_faces(&mut self, _: &RgbImage) -> Result<Vec<(BoundingBox, Embedding)>, BackendError> {
            let faces = self.frames.pop_front().unwrap_or_default();
            Ok(faces
                .into_iter()
                .enumerate()
                .map(|(i, e)| {
                    let bbox = BoundingBox {
                        x: 10.0 + 100.0 * i as f32,
                        y: 40.0,
                        width: 80.0,
                        height: 100.0,
                        confidence: 0.9,
                    };
                    (bbox, e)
                })
                .collect())
        }
    }

    impl RegionDetector for ReplayBackend {
        fn detect_regions(&mut self, _: &RgbImage) -> Result<Vec<BoundingBox>, BackendError> {
            Ok(Vec::new())
        }

        fn embed_region(&mut self, _: &RgbImage, _: &BoundingBox) -> Result<Option<Embedding>, BackendError> {
            Ok(None)
        }
    }

    pub(crate) fn alice() -> Embedding {
        Embedding::new(vec![0.0, 0.0])
    }

    pub(crate) fn bob() -> Embedding {
        Embedding::new(vec![10.0, 0.0])
    }

    fn stranger() -> Embedding {
        Embedding::new(vec![5.0, 5.0])
    }

    pub(crate) struct Harness {
        pub(crate) pipeline: Pipeline<FakeSource, ReplayBackend>,
        pub(crate) store: Arc<AttendanceStore>,
        pub(crate) clock: Arc<ManualClock>,
        pub(crate) releases: Arc<AtomicUsize>,
    }

    pub(crate) fn harness(frames: Vec<Vec<Embedding>>, start: &str) -> Harness {
        let mut gallery = Gallery::new();
        let ids = roster();
        gallery.insert(ids[0].clone(), alice()).unwrap();
        gallery.insert(ids[1].clone(), bob()).unwrap();
        let gallery = Arc::new(gallery);

        let clock = ManualClock::at(start);
        let store = Arc::new(AttendanceStore::open_in_memory().unwrap());
        let ledger = Arc::new(Ledger::new(
            gallery.identities().cloned().collect(),
            Arc::clone(&store),
            clock.clone(),
            SchedulePolicy::Observed,
        ));
        let (source, releases) = FakeSource::new(frames.len());
        let matcher = FaceMatcher::new(gallery, DEFAULT_MATCH_THRESHOLD);
        Harness {
            pipeline: Pipeline::new(source, ReplayBackend::new(frames), matcher, ledger),
            store,
            clock,
            releases,
        }
    }

    fn expect_frame(outcome: FrameOutcome) -> AnnotatedFrame {
        match outcome {
            FrameOutcome::Frame(frame) => frame,
            FrameOutcome::Idle => panic!("pipeline idle"),
            FrameOutcome::Exhausted => panic!("source exhausted"),
        }
    }

    #[test]
    fn test_end_to_end_session() {
        let mut h = harness(vec![vec![alice()], vec![alice()]], "2024-01-01 08:10:00");
        h.pipeline.start().unwrap();

        let first = expect_frame(h.pipeline.annotated_frame().unwrap());
        assert_eq!(first.marked.len(), 1);
        assert_eq!(first.marked[0].status, AttendanceStatus::Late);
        assert_eq!(first.marked[0].lateness_minutes, 5);

        h.clock.set("2024-01-01 08:30:00");
        let second = expect_frame(h.pipeline.annotated_frame().unwrap());
        assert!(second.detections[0].is_known());
        assert!(second.marked.is_empty());

        h.clock.set("2024-01-01 17:00:00");
        let records = h.pipeline.finalize().unwrap();
        assert_eq!(records.len(), 2);
        let bob = records.iter().find(|r| r.first_name == "Bob").unwrap();
        assert_eq!(bob.last_name, "Smith");
        assert_eq!(bob.status, AttendanceStatus::Absent);
        assert_eq!(bob.lateness_minutes, 0);

        let stats = h.pipeline.ledger().summary_counts().unwrap();
        assert_eq!(
            stats,
            AttendanceStats {
                total: 2,
                present: 0,
                late: 1,
                absent: 1
            }
        );
    }

    #[test]
    fn test_idle_pipeline_pulls_nothing() {
        let mut h = harness(vec![vec![alice()]], "2024-01-01 08:00:00");
        assert!(matches!(h.pipeline.annotated_frame().unwrap(), FrameOutcome::Idle));
        assert!(h.store.query_all().unwrap().is_empty());
    }

    #[test]
    fn test_exhaustion_keeps_session() {
        let mut h = harness(vec![vec![alice()]], "2024-01-01 08:00:00");
        h.pipeline.start().unwrap();
        expect_frame(h.pipeline.annotated_frame().unwrap());
        assert!(matches!(h.pipeline.annotated_frame().unwrap(), FrameOutcome::Exhausted));
        assert!(h.pipeline.is_running());
        assert_eq!(h.pipeline.ledger().present_count(), 1);
    }

    #[test]
    fn test_restart_does_not_remark() {
        let mut h = harness(vec![vec![alice()], vec![alice()]], "2024-01-01 07:55:00");
        h.pipeline.start().unwrap();
        expect_frame(h.pipeline.annotated_frame().unwrap());
        h.pipeline.stop();
        assert_eq!(h.releases.load(Ordering::SeqCst), 1);

        h.clock.set("2024-01-01 09:00:00");
        h.pipeline.start().unwrap();
        let frame = expect_frame(h.pipeline.annotated_frame().unwrap());
        assert!(frame.marked.is_empty());

        let records = h.store.query_all().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, AttendanceStatus::Present);
    }

    #[test]
    fn test_unknown_faces_never_reach_ledger() {
        let mut h = harness(vec![vec![stranger(), bob(), bob()]], "2024-01-01 08:00:00");
        h.pipeline.start().unwrap();
        let frame = expect_frame(h.pipeline.annotated_frame().unwrap());

        assert_eq!(frame.detections.len(), 3);
        assert!(!frame.detections[0].is_known());
        assert_eq!(frame.marked.len(), 1, "duplicate faces mark once");
        assert_eq!(h.store.query_all().unwrap().len(), 1);
        assert_eq!(*frame.image.get_pixel(10, 40), overlay::UNKNOWN_COLOR);
        assert_eq!(*frame.image.get_pixel(110, 40), overlay::KNOWN_COLOR);
    }

    #[test]
    fn test_persistence_failure_is_reported_and_retried() {
        let mut h = harness(vec![vec![alice()], vec![alice()]], "2024-01-01 08:00:00");
        h.pipeline.start().unwrap();

        h.store.take_offline_for_testing();
        let failed = expect_frame(h.pipeline.annotated_frame().unwrap());
        assert_eq!(failed.failures.len(), 1);
        assert!(failed.marked.is_empty());

        h.store.restore_for_testing();
        let retried = expect_frame(h.pipeline.annotated_frame().unwrap());
        assert!(retried.failures.is_empty());
        assert_eq!(retried.marked.len(), 1);
    }

    #[test]
    fn test_failed_start_stays_idle() {
        let mut h = harness(vec![vec![alice()]], "2024-01-01 08:00:00");
        h.pipeline.source.fail_acquire = true;
        assert!(matches!(h.pipeline.start(), Err(PipelineError::Capture(_))));
        assert!(!h.pipeline.is_running());
        h.pipeline.stop();
        assert_eq!(h.releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_finalize_while_stopped_is_idempotent() {
        let h = harness(Vec::new(), "2024-01-01 12:00:00");
        let once = h.pipeline.finalize().unwrap();
        let twice = h.pipeline.finalize().unwrap();
        assert_eq!(once, twice);
        assert_eq!(once.len(), 2);
        assert!(once.iter().all(|r| r.status == AttendanceStatus::Absent));
    }
}
