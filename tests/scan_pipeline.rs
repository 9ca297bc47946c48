use anyhow::{anyhow, Result};
use image::{DynamicImage, GenericImageView, ImageFormat, RgbImage};
use std::collections::{BTreeSet, HashMap};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use traffic_census::detect::{Detection, Detector, InferenceBackend};
use traffic_census::evidence::{BlobStore, EvidenceSink};
use traffic_census::storage::{
    CameraRecord, DetectionRecord, InMemoryRecordStore, RecordStore, RunId, ScanAggregates,
};
use traffic_census::{
    Camera, CameraPipeline, EvidenceRenderer, ImageSource, RenderSettings, ScanError,
    ScanSettings, Scanner, StaticDirectory,
};

const HEIGHT: u32 = 48;

fn png_of_width(width: u32) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(RgbImage::new(width, HEIGHT))
        .write_to(&mut out, ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

#[derive(Clone)]
enum Snapshot {
    Png(Vec<u8>),
    Garbage,
    Offline,
}

/// Image source answering from a fixed table.
struct ScriptedSource {
    snapshots: HashMap<String, Snapshot>,
    default: Option<Vec<u8>>,
}

impl ScriptedSource {
    fn new() -> Self {
        Self {
            snapshots: HashMap::new(),
            default: None,
        }
    }

    fn with(mut self, camera_id: &str, snapshot: Snapshot) -> Self {
        self.snapshots.insert(camera_id.to_string(), snapshot);
        self
    }

    fn with_default(mut self, bytes: Vec<u8>) -> Self {
        self.default = Some(bytes);
        self
    }
}

impl ImageSource for ScriptedSource {
    fn fetch_image(&self, camera_id: &str) -> Result<Vec<u8>, ScanError> {
        let offline = || ScanError::Fetch {
            camera_id: camera_id.to_string(),
            reason: "http status 503".into(),
        };
        match self.snapshots.get(camera_id) {
            Some(Snapshot::Png(bytes)) => Ok(bytes.clone()),
            Some(Snapshot::Garbage) => Ok(b"definitely not an image".to_vec()),
            Some(Snapshot::Offline) => Err(offline()),
            None => self.default.clone().ok_or_else(offline),
        }
    }
}

/// Source that sleeps before answering and tracks how many fetches overlap.
struct PacedSource {
    bytes: Vec<u8>,
    delays: HashMap<String, Duration>,
    default_delay: Duration,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl PacedSource {
    fn new(bytes: Vec<u8>, default_delay: Duration) -> Self {
        Self {
            bytes,
            delays: HashMap::new(),
            default_delay,
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn delay(mut self, camera_id: &str, delay: Duration) -> Self {
        self.delays.insert(camera_id.to_string(), delay);
        self
    }
}

impl ImageSource for PacedSource {
    fn fetch_image(&self, camera_id: &str) -> Result<Vec<u8>, ScanError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let delay = self
            .delays
            .get(camera_id)
            .copied()
            .unwrap_or(self.default_delay);
        thread::sleep(delay);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(self.bytes.clone())
    }
}

/// Backend whose answer is keyed by the decoded image width.
struct WidthKeyedBackend {
    by_width: HashMap<u32, Vec<Detection>>,
    panic_width: Option<u32>,
}

impl WidthKeyedBackend {
    fn new() -> Self {
        Self {
            by_width: HashMap::new(),
            panic_width: None,
        }
    }

    fn answer(mut self, width: u32, detections: Vec<Detection>) -> Self {
        self.by_width.insert(width, detections);
        self
    }

    fn panic_on(mut self, width: u32) -> Self {
        self.panic_width = Some(width);
        self
    }
}

impl InferenceBackend for WidthKeyedBackend {
    fn name(&self) -> &'static str {
        "width-keyed"
    }

    fn infer(&self, image: &DynamicImage) -> Result<Vec<Detection>> {
        let width = image.dimensions().0;
        if self.panic_width == Some(width) {
            panic!("backend blew up on width {}", width);
        }
        Ok(self.by_width.get(&width).cloned().unwrap_or_default())
    }
}

/// Blob store that remembers every path it was asked to write.
#[derive(Clone, Default)]
struct RecordingBlobStore {
    paths: Arc<Mutex<Vec<String>>>,
    fail: bool,
}

impl RecordingBlobStore {
    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    fn paths(&self) -> Vec<String> {
        self.paths.lock().unwrap().clone()
    }
}

impl BlobStore for RecordingBlobStore {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn put(&self, path: &str, bytes: &[u8], content_type: &str) -> Result<String> {
        assert_eq!(content_type, "image/jpeg");
        assert!(bytes.starts_with(&[0xFF, 0xD8]), "evidence must be JPEG");
        self.paths.lock().unwrap().push(path.to_string());
        if self.fail {
            return Err(anyhow!("bucket unavailable"));
        }
        Ok(format!("mem://{}", path))
    }
}

/// In-memory store that can be told to fail detail inserts.
struct FlakyStore {
    inner: InMemoryRecordStore,
    fail_inserts: bool,
}

impl RecordStore for FlakyStore {
    fn name(&self) -> &'static str {
        "flaky"
    }

    fn create_run(&mut self, total_cameras: u64) -> Result<RunId> {
        self.inner.create_run(total_cameras)
    }

    fn finalize_run(&mut self, run_id: &RunId, aggregates: &ScanAggregates) -> Result<()> {
        self.inner.finalize_run(run_id, aggregates)
    }

    fn insert_detection_record(&mut self, record: &DetectionRecord) -> Result<()> {
        if self.fail_inserts {
            return Err(anyhow!("connection reset"));
        }
        self.inner.insert_detection_record(record)
    }

    fn upsert_camera_batch(&mut self, batch: &[CameraRecord]) -> Result<()> {
        self.inner.upsert_camera_batch(batch)
    }
}

fn scanner(
    cameras: Vec<Camera>,
    source: impl ImageSource + 'static,
    backend: WidthKeyedBackend,
    blobs: Option<RecordingBlobStore>,
    workers: usize,
) -> Scanner {
    let pipeline = CameraPipeline::new(
        source,
        Detector::with_backend(backend),
        EvidenceRenderer::new(RenderSettings::default()),
        blobs.map(EvidenceSink::new),
    );
    Scanner::new(
        StaticDirectory::new(cameras),
        pipeline,
        ScanSettings {
            max_workers: workers,
        },
    )
}

fn two_cars() -> Vec<Detection> {
    vec![
        Detection::new(0.9, [2.0, 2.0, 20.0, 20.0]),
        Detection::new(0.7, [30.0, 5.0, 60.0, 40.0]),
    ]
}

fn assert_invariants(run: &traffic_census::storage::ScanRun) {
    assert_eq!(run.cameras_scanned + run.cameras_failed, run.total_cameras);
    assert!(run.cameras_with_detections <= run.cameras_scanned);
    assert!(run.total_count >= run.cameras_with_detections);
    assert!(run.duration_seconds.is_some());
}

#[test]
fn three_cameras_two_workers() {
    let cameras = vec![
        Camera::new("A", "Lamar / 5th").with_location(-97.755, 30.269),
        Camera::new("B", "Congress / Riverside"),
        Camera::new("C", "Guadalupe / 24th").with_district(9),
    ];
    let source = ScriptedSource::new()
        .with("A", Snapshot::Png(png_of_width(101)))
        .with("B", Snapshot::Offline)
        .with("C", Snapshot::Png(png_of_width(103)));
    let backend = WidthKeyedBackend::new().answer(101, two_cars());
    let blobs = RecordingBlobStore::default();
    let scanner = scanner(cameras, source, backend, Some(blobs.clone()), 2);

    let mut store = InMemoryRecordStore::new();
    let report = scanner.run(&mut store).unwrap().expect("cameras were listed");

    assert_eq!(report.total_cameras, 3);
    assert_eq!(report.aggregates.cameras_scanned, 2);
    assert_eq!(report.aggregates.cameras_failed, 1);
    assert_eq!(report.aggregates.total_count, 2);
    assert_eq!(report.aggregates.cameras_with_detections, 1);

    let run = store.run(&report.run_id).unwrap();
    assert_invariants(run);
    assert_eq!(run.total_count, 2);
    assert_eq!(store.finalize_calls(), 1);

    let records = store.detections();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].camera_id, "A");
    assert_eq!(records[0].count, 2);
    assert_eq!(records[0].avg_confidence, Some(0.8));
    let reference = records[0].image_reference.as_deref().unwrap();
    assert!(reference.starts_with("mem://detections/A/"));

    let uploads = blobs.paths();
    assert_eq!(uploads.len(), 1);
    assert!(uploads[0].starts_with("detections/A/"));
    assert!(uploads[0].ends_with(".jpg"));

    let upserted: BTreeSet<_> = store.cameras().keys().cloned().collect();
    assert_eq!(upserted, BTreeSet::from(["A".to_string(), "C".to_string()]));
    assert_eq!(store.cameras()["C"].council_district, Some(9));
}

#[test]
fn empty_directory_creates_no_run() {
    let scanner = scanner(
        vec![],
        ScriptedSource::new(),
        WidthKeyedBackend::new(),
        None,
        3,
    );
    let mut store = InMemoryRecordStore::new();
    assert!(scanner.run(&mut store).unwrap().is_none());
    assert!(store.runs().is_empty());
    assert!(store.camera_batches().is_empty());
}

#[test]
fn zero_detections_never_upload_or_record() {
    let cameras: Vec<Camera> = (0..6).map(|i| Camera::new(format!("cam-{i}"), "")).collect();
    let blobs = RecordingBlobStore::default();
    let scanner = scanner(
        cameras,
        ScriptedSource::new().with_default(png_of_width(64)),
        WidthKeyedBackend::new(),
        Some(blobs.clone()),
        3,
    );
    let mut store = InMemoryRecordStore::new();
    let report = scanner.run(&mut store).unwrap().unwrap();

    assert_eq!(report.aggregates.cameras_scanned, 6);
    assert_eq!(report.aggregates.total_count, 0);
    assert!(store.detections().is_empty());
    assert!(blobs.paths().is_empty());
    assert_eq!(store.cameras().len(), 6);
}

#[test]
fn decode_failure_counts_like_fetch_failure() {
    let cameras = vec![Camera::new("ok", ""), Camera::new("corrupt", "")];
    let scanner = scanner(
        cameras,
        ScriptedSource::new()
            .with("ok", Snapshot::Png(png_of_width(101)))
            .with("corrupt", Snapshot::Garbage),
        WidthKeyedBackend::new().answer(101, two_cars()),
        None,
        2,
    );
    let mut store = InMemoryRecordStore::new();
    let report = scanner.run(&mut store).unwrap().unwrap();

    assert_eq!(report.aggregates.cameras_failed, 1);
    assert_eq!(report.aggregates.cameras_scanned, 1);
    assert!(!store.cameras().contains_key("corrupt"));
    // No sink configured: recorded without evidence.
    assert_eq!(store.detections()[0].image_reference, None);
}

#[test]
fn upload_failure_records_detection_without_image() {
    let blobs = RecordingBlobStore::failing();
    let scanner = scanner(
        vec![Camera::new("A", "")],
        ScriptedSource::new().with("A", Snapshot::Png(png_of_width(101))),
        WidthKeyedBackend::new().answer(101, two_cars()),
        Some(blobs.clone()),
        1,
    );
    let mut store = InMemoryRecordStore::new();
    let report = scanner.run(&mut store).unwrap().unwrap();

    assert_eq!(report.aggregates.cameras_scanned, 1);
    assert_eq!(blobs.paths().len(), 1);
    assert_eq!(store.detections().len(), 1);
    assert_eq!(store.detections()[0].image_reference, None);
}

#[test]
fn panicking_backend_fails_only_that_camera() {
    let cameras = vec![Camera::new("A", ""), Camera::new("boom", ""), Camera::new("C", "")];
    let scanner = scanner(
        cameras,
        ScriptedSource::new()
            .with("A", Snapshot::Png(png_of_width(101)))
            .with("boom", Snapshot::Png(png_of_width(66)))
            .with("C", Snapshot::Png(png_of_width(103))),
        WidthKeyedBackend::new().answer(101, two_cars()).panic_on(66),
        None,
        2,
    );
    let mut store = InMemoryRecordStore::new();
    let report = scanner.run(&mut store).unwrap().unwrap();

    assert_eq!(report.aggregates.cameras_failed, 1);
    assert_eq!(report.aggregates.cameras_scanned, 2);
    assert!(!store.cameras().contains_key("boom"));
}

#[test]
fn persistence_failure_aborts_without_finalizing() {
    let cameras: Vec<Camera> = (0..20).map(|i| Camera::new(format!("cam-{i}"), "")).collect();
    let scanner = scanner(
        cameras,
        ScriptedSource::new().with_default(png_of_width(101)),
        WidthKeyedBackend::new().answer(101, two_cars()),
        None,
        2,
    );
    let mut store = FlakyStore {
        inner: InMemoryRecordStore::new(),
        fail_inserts: true,
    };
    let err = scanner.run(&mut store).unwrap_err();

    assert!(matches!(
        err,
        ScanError::Persistence {
            operation: "insert_detection",
            ..
        }
    ));
    assert_eq!(store.inner.runs().len(), 1);
    assert_eq!(store.inner.finalize_calls(), 0);
    assert!(store.inner.camera_batches().is_empty());
}

#[test]
fn many_cameras_keep_counters_consistent() {
    let mut source = ScriptedSource::new();
    let mut cameras = Vec::new();
    for i in 0..60 {
        let id = format!("cam-{i:02}");
        let snapshot = match i % 4 {
            0 => Snapshot::Png(png_of_width(101)),
            1 => Snapshot::Offline,
            2 => Snapshot::Garbage,
            _ => Snapshot::Png(png_of_width(103)),
        };
        source = source.with(&id, snapshot);
        cameras.push(Camera::new(id, ""));
    }
    let scanner = scanner(
        cameras,
        source,
        WidthKeyedBackend::new().answer(101, two_cars()),
        Some(RecordingBlobStore::default()),
        5,
    );
    let mut store = InMemoryRecordStore::new();
    let report = scanner.run(&mut store).unwrap().unwrap();

    let run = store.run(&report.run_id).unwrap();
    assert_invariants(run);
    assert_eq!(run.cameras_scanned, 30);
    assert_eq!(run.cameras_failed, 30);
    assert_eq!(run.cameras_with_detections, 15);
    assert_eq!(run.total_count, 30);
    assert_eq!(store.detections().len(), 15);
    assert_eq!(store.cameras().len(), 30);
}

#[test]
fn large_fleet_upserts_in_chunks_of_500() {
    let cameras: Vec<Camera> = (0..1200).map(|i| Camera::new(format!("{i}"), "")).collect();
    let scanner = scanner(
        cameras,
        ScriptedSource::new().with_default(png_of_width(8)),
        WidthKeyedBackend::new(),
        None,
        8,
    );
    let mut store = InMemoryRecordStore::new();
    let report = scanner.run(&mut store).unwrap().unwrap();

    assert_eq!(report.upsert_batches, 3);
    let sizes: Vec<usize> = store.camera_batches().iter().map(Vec::len).collect();
    assert_eq!(sizes, vec![500, 500, 200]);
    assert_eq!(store.cameras().len(), 1200);
}

#[test]
fn model_loads_once_across_workers() {
    let loads = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&loads);
    let detector = Detector::new(move || -> Result<Box<dyn InferenceBackend>> {
        counter.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(std::time::Duration::from_millis(20));
        Ok(Box::new(WidthKeyedBackend::new()))
    });
    let pipeline = CameraPipeline::new(
        ScriptedSource::new().with_default(png_of_width(16)),
        detector,
        EvidenceRenderer::default(),
        None,
    );
    let cameras: Vec<Camera> = (0..32).map(|i| Camera::new(format!("{i}"), "")).collect();
    let scanner = Scanner::new(
        StaticDirectory::new(cameras),
        pipeline,
        ScanSettings { max_workers: 8 },
    );
    let mut store = InMemoryRecordStore::new();
    let report = scanner.run(&mut store).unwrap().unwrap();

    assert_eq!(report.aggregates.cameras_scanned, 32);
    assert_eq!(loads.load(Ordering::SeqCst), 1);
}

#[test]
fn outcomes_are_recorded_as_they_finish() {
    let cameras = vec![
        Camera::new("slow", ""),
        Camera::new("b", ""),
        Camera::new("c", ""),
        Camera::new("d", ""),
    ];
    let source = PacedSource::new(png_of_width(101), Duration::from_millis(5))
        .delay("slow", Duration::from_millis(400));
    let scanner = scanner(
        cameras,
        source,
        WidthKeyedBackend::new().answer(101, two_cars()),
        None,
        2,
    );
    let mut store = InMemoryRecordStore::new();
    let report = scanner.run(&mut store).unwrap().unwrap();

    assert_eq!(report.aggregates.cameras_scanned, 4);
    let order: Vec<&str> = store
        .detections()
        .iter()
        .map(|record| record.camera_id.as_str())
        .collect();
    assert_eq!(order.len(), 4);
    assert_eq!(order.last(), Some(&"slow"), "inserted in {:?}", order);
}

#[test]
fn concurrent_fetches_never_exceed_worker_count() {
    let cameras: Vec<Camera> = (0..24).map(|i| Camera::new(format!("{i}"), "")).collect();
    let source = PacedSource::new(png_of_width(16), Duration::from_millis(15));
    let peak = Arc::clone(&source.peak);
    let scanner = scanner(cameras, source, WidthKeyedBackend::new(), None, 3);
    let mut store = InMemoryRecordStore::new();
    let report = scanner.run(&mut store).unwrap().unwrap();

    assert_eq!(report.aggregates.cameras_scanned, 24);
    let peak = peak.load(Ordering::SeqCst);
    assert!(peak >= 1 && peak <= 3, "peak concurrency was {}", peak);
}
