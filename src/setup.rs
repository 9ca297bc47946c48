//! Turns a validated `ScanConfig` into concrete collaborators.

use anyhow::{anyhow, Result};

use crate::cameras::SocrataDirectory;
use crate::config::{ModelBackend, ScanConfig};
use crate::detect::{Detector, StubBackend};
use crate::evidence::{EvidenceSink, FilesystemBlobStore, SupabaseBlobStore};
use crate::ingest::{HttpImageSource, HttpSourceConfig};
use crate::render::EvidenceRenderer;
use crate::scan::{CameraPipeline, ScanSettings, Scanner};
use crate::storage::{RecordStore, SqliteRecordStore, SupabaseRecordStore};
use crate::transport::SupabaseClient;

/// Supabase when configured, otherwise the local SQLite file.
pub fn open_record_store(cfg: &ScanConfig) -> Result<Box<dyn RecordStore>> {
    match &cfg.supabase {
        Some(settings) => {
            let client = SupabaseClient::new(settings)?;
            Ok(Box::new(SupabaseRecordStore::new(client)))
        }
        None => Ok(Box::new(SqliteRecordStore::open(&cfg.db_path)?)),
    }
}

/// `None` when evidence is disabled.
pub fn evidence_sink(cfg: &ScanConfig) -> Result<Option<EvidenceSink>> {
    if !cfg.evidence.enabled {
        return Ok(None);
    }
    let sink = match &cfg.supabase {
        Some(settings) => {
            let client = SupabaseClient::new(settings)?;
            EvidenceSink::new(SupabaseBlobStore::new(client, settings.bucket.clone()))
        }
        None => EvidenceSink::new(FilesystemBlobStore::new(cfg.evidence.dir.clone())?),
    };
    Ok(Some(sink))
}

pub fn detector(cfg: &ScanConfig) -> Result<Detector> {
    match cfg.model.backend {
        ModelBackend::Stub => Ok(Detector::with_backend(StubBackend::new())),
        #[cfg(feature = "backend-tract")]
        ModelBackend::Tract => Ok(Detector::tract(
            cfg.model.path.clone(),
            cfg.model.url.clone(),
            cfg.model.params.clone(),
        )),
        #[cfg(not(feature = "backend-tract"))]
        ModelBackend::Tract => Err(anyhow!(
            "model backend 'tract' requires the backend-tract feature"
        )),
    }
}

pub fn scanner(cfg: &ScanConfig) -> Result<Scanner> {
    let source = HttpImageSource::new(HttpSourceConfig {
        image_base: cfg.cameras.image_base.clone(),
        timeout: cfg.cameras.timeout,
        max_connections: cfg.cameras.max_connections,
    })?;
    let pipeline = CameraPipeline::new(
        source,
        detector(cfg)?,
        EvidenceRenderer::new(cfg.render.clone()),
        evidence_sink(cfg)?,
    );
    let directory = SocrataDirectory::new(
        cfg.cameras.api_base.clone(),
        cfg.cameras.timeout,
        cfg.cameras.service_area.clone(),
    );
    if cfg.max_workers == 0 {
        return Err(anyhow!("max_workers must be at least 1"));
    }
    Ok(Scanner::new(
        directory,
        pipeline,
        ScanSettings {
            max_workers: cfg.max_workers,
        },
    ))
}
