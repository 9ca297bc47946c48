use anyhow::Result;
use chrono::{TimeZone, Utc};

use traffic_census::detect::{Detection, DetectionResult};
use traffic_census::storage::{RecordStore, ScanAggregates, SqliteRecordStore, UPSERT_BATCH_SIZE};
use traffic_census::Camera;

fn open_temp() -> Result<(tempfile::TempDir, SqliteRecordStore)> {
    let dir = tempfile::tempdir()?;
    let db_path = dir.path().join("census.db");
    let store = SqliteRecordStore::open(db_path.to_str().unwrap())?;
    Ok((dir, store))
}

#[test]
fn run_lifecycle_round_trips_through_sqlite() -> Result<()> {
    let (_dir, mut store) = open_temp()?;
    let run_id = store.create_run(3)?;

    let provisional = store.load_run(&run_id)?.expect("run exists");
    assert_eq!(provisional.total_cameras, 3);
    assert_eq!(provisional.cameras_scanned, 0);
    assert_eq!(provisional.duration_seconds, None);

    store.finalize_run(
        &run_id,
        &ScanAggregates {
            cameras_scanned: 2,
            cameras_failed: 1,
            total_count: 2,
            cameras_with_detections: 1,
            duration_seconds: 7.12999,
        },
    )?;
    let finished = store.load_run(&run_id)?.unwrap();
    assert_eq!(finished.cameras_scanned, 2);
    assert_eq!(finished.cameras_failed, 1);
    assert_eq!(finished.duration_seconds, Some(7.13));
    Ok(())
}

#[test]
fn detection_rows_keep_boxes_and_rounding() -> Result<()> {
    let (_dir, mut store) = open_temp()?;
    let run_id = store.create_run(2)?;
    let detected_at = Utc.with_ymd_and_hms(2026, 10, 17, 14, 5, 9).unwrap();

    let hit = DetectionResult::new(
        "101",
        vec![
            Detection::new(0.91234, [1.0, 2.0, 30.0, 40.0]),
            Detection::new(0.5, [50.0, 60.0, 70.0, 80.0]),
        ],
    );
    store.insert_detection(&run_id, &hit, Some("file:///evidence/a.jpg"), detected_at)?;
    store.insert_detection(&run_id, &DetectionResult::new("102", vec![]), None, detected_at)?;

    let rows = store.load_detections(&run_id)?;
    assert_eq!(rows.len(), 1, "zero-count results are never persisted");
    assert_eq!(rows[0].camera_id, "101");
    assert_eq!(rows[0].count, 2);
    assert_eq!(rows[0].timestamp, detected_at);
    assert_eq!(rows[0].avg_confidence, Some(0.7062));
    assert_eq!(rows[0].detections[1].bbox, [50.0, 60.0, 70.0, 80.0]);
    assert_eq!(rows[0].image_reference.as_deref(), Some("file:///evidence/a.jpg"));
    Ok(())
}

#[test]
fn camera_upsert_chunks_and_overwrites() -> Result<()> {
    let (_dir, mut store) = open_temp()?;
    let cameras: Vec<Camera> = (0..(UPSERT_BATCH_SIZE + 20))
        .map(|i| Camera::new(format!("{i}"), format!("Intersection {i}")))
        .collect();
    assert_eq!(store.bulk_upsert_cameras(&cameras)?, 2);
    assert_eq!(store.camera_count()?, (UPSERT_BATCH_SIZE + 20) as u64);

    let moved = vec![Camera::new("7", "Renamed")
        .with_location(-97.74, 30.27)
        .with_district(4)];
    assert_eq!(store.bulk_upsert_cameras(&moved)?, 1);
    let row = store.load_camera("7")?.unwrap();
    assert_eq!(row.location_name, "Renamed");
    assert_eq!(row.longitude, Some(-97.74));
    assert_eq!(row.council_district, Some(4));
    assert_eq!(row.last_scanned, row.updated_at);
    assert_eq!(store.camera_count()?, (UPSERT_BATCH_SIZE + 20) as u64);
    Ok(())
}

#[test]
fn finalizing_unknown_run_is_an_error() -> Result<()> {
    let (_dir, mut store) = open_temp()?;
    let missing = traffic_census::RunId("999".into());
    assert!(store.finalize_run(&missing, &ScanAggregates::default()).is_err());
    Ok(())
}
