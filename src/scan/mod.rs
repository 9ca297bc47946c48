//! Scan orchestration.
//!
//! One run fans a camera list over a fixed pool of scoped worker threads.
//! Workers only fetch, detect and publish evidence; they hand every outcome
//! back over a channel. The calling thread is the only one that touches the
//! counters or the record store, and it consumes outcomes in the order they
//! finish.

mod report;
mod task;

pub use report::{progress_line, ScanReport};
pub use task::{CameraOutcome, CameraPipeline, TaskStage};

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Instant;

use crate::cameras::{Camera, CameraDirectory};
use crate::error::ScanError;
use crate::storage::{RecordStore, RunId, ScanAggregates};

pub const DEFAULT_MAX_WORKERS: usize = 3;

#[derive(Clone, Debug)]
pub struct ScanSettings {
    pub max_workers: usize,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            max_workers: DEFAULT_MAX_WORKERS,
        }
    }
}

struct Completion {
    index: usize,
    outcome: CameraOutcome,
}

/// Running counters for one run. Owned by the consuming loop.
#[derive(Default)]
struct Tally {
    aggregates: ScanAggregates,
    settled: u64,
    processed: Vec<usize>,
}

impl Tally {
    fn record(&mut self, index: usize, outcome: &CameraOutcome) {
        self.settled += 1;
        match outcome {
            CameraOutcome::Failed { .. } => self.aggregates.cameras_failed += 1,
            CameraOutcome::Scanned { result, .. } => {
                self.aggregates.cameras_scanned += 1;
                self.processed.push(index);
                let count = result.count() as u64;
                if count > 0 {
                    self.aggregates.cameras_with_detections += 1;
                    self.aggregates.total_count += count;
                }
            }
        }
    }
}

pub struct Scanner {
    directory: Box<dyn CameraDirectory>,
    pipeline: CameraPipeline,
    settings: ScanSettings,
}

impl Scanner {
    pub fn new<D: CameraDirectory + 'static>(
        directory: D,
        pipeline: CameraPipeline,
        settings: ScanSettings,
    ) -> Self {
        Self {
            directory: Box::new(directory),
            pipeline,
            settings,
        }
    }

    pub fn pipeline(&self) -> &CameraPipeline {
        &self.pipeline
    }

    /// Fetch the camera list and scan it. `Ok(None)` means the directory had
    /// no cameras and no run was created.
    pub fn run(&self, store: &mut dyn RecordStore) -> Result<Option<ScanReport>, ScanError> {
        let started = Instant::now();
        let cameras = self.fetch_cameras()?;
        if cameras.is_empty() {
            log::info!("no cameras to scan");
            return Ok(None);
        }
        self.scan_cameras(&cameras, store, started).map(Some)
    }

    pub fn fetch_cameras(&self) -> Result<Vec<Camera>, ScanError> {
        let cameras = self
            .directory
            .active_cameras()
            .map_err(ScanError::Directory)?;
        log::info!("found {} active cameras", cameras.len());
        Ok(cameras)
    }

    /// Scan an already-fetched, non-empty camera list.
    pub fn scan_cameras(
        &self,
        cameras: &[Camera],
        store: &mut dyn RecordStore,
        started: Instant,
    ) -> Result<ScanReport, ScanError> {
        let total = cameras.len() as u64;
        let run_id = store
            .create_run(total)
            .map_err(|e| ScanError::persistence("create_run", e))?;
        log::info!("created scan record {} in {}", run_id, store.name());

        let workers = self.settings.max_workers.clamp(1, cameras.len().max(1));
        log::info!("processing {} cameras with {} workers", total, workers);

        let mut tally = self.fan_out(cameras, workers, &run_id, store)?;

        tally.aggregates.duration_seconds = started.elapsed().as_secs_f64();
        store
            .finalize_run(&run_id, &tally.aggregates)
            .map_err(|e| ScanError::persistence("finalize_run", e))?;

        let processed: Vec<Camera> = tally
            .processed
            .iter()
            .map(|&index| cameras[index].clone())
            .collect();
        let upsert_batches = store
            .bulk_upsert_cameras(&processed)
            .map_err(|e| ScanError::persistence("bulk_upsert_cameras", e))?;
        log::info!(
            "updated metadata for {} cameras in {} batch(es)",
            processed.len(),
            upsert_batches
        );

        Ok(ScanReport {
            run_id,
            total_cameras: total,
            aggregates: tally.aggregates,
            upsert_batches,
        })
    }

    fn fan_out(
        &self,
        cameras: &[Camera],
        workers: usize,
        run_id: &RunId,
        store: &mut dyn RecordStore,
    ) -> Result<Tally, ScanError> {
        let total = cameras.len() as u64;
        let next = AtomicUsize::new(0);
        let abort = AtomicBool::new(false);
        let (tx, rx) = mpsc::channel::<Completion>();
        let pipeline = &self.pipeline;

        let mut tally = Tally::default();
        let mut fatal: Option<ScanError> = None;

        thread::scope(|scope| {
            for _ in 0..workers {
                let tx = tx.clone();
                let (next, abort) = (&next, &abort);
                scope.spawn(move || loop {
                    if abort.load(Ordering::Acquire) {
                        break;
                    }
                    let index = next.fetch_add(1, Ordering::AcqRel);
                    let Some(camera) = cameras.get(index) else {
                        break;
                    };
                    let outcome = pipeline.process(camera);
                    if tx.send(Completion { index, outcome }).is_err() {
                        break;
                    }
                });
            }
            drop(tx);

            for Completion { index, outcome } in rx {
                tally.record(index, &outcome);
                let camera = &cameras[index];
                log::info!("{}", progress_line(tally.settled, total, &camera.id, &outcome));
                if fatal.is_some() {
                    continue;
                }
                if let CameraOutcome::Scanned {
                    result,
                    image_ref,
                    detected_at,
                } = &outcome
                {
                    if let Err(e) =
                        store.insert_detection(run_id, result, image_ref.as_deref(), *detected_at)
                    {
                        log::error!("aborting scan: detection insert for {} failed", camera.id);
                        abort.store(true, Ordering::Release);
                        fatal = Some(ScanError::persistence("insert_detection", e));
                    }
                }
            }
        });

        match fatal {
            Some(error) => Err(error),
            None => Ok(tally),
        }
    }
}
