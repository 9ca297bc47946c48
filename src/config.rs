use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cameras::{ServiceArea, DEFAULT_CAMERA_API_BASE};
use crate::detect::yolo::{DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_INPUT_SIZE, DEFAULT_IOU_THRESHOLD};
use crate::detect::YoloParams;
use crate::evidence::DEFAULT_EVIDENCE_DIR;
use crate::ingest::http::{DEFAULT_IMAGE_BASE, DEFAULT_MAX_CONNECTIONS, DEFAULT_TIMEOUT};
use crate::render::RenderSettings;
use crate::scan::DEFAULT_MAX_WORKERS;
use crate::storage::DEFAULT_DB_PATH;
use crate::transport::{SupabaseSettings, DEFAULT_EVIDENCE_BUCKET};

const DEFAULT_MODEL_PATH: &str = "models/best.onnx";

#[derive(Debug, Deserialize, Default)]
struct ScanConfigFile {
    max_workers: Option<usize>,
    db_path: Option<String>,
    cameras: Option<CamerasConfigFile>,
    model: Option<ModelConfigFile>,
    render: Option<RenderConfigFile>,
    evidence: Option<EvidenceConfigFile>,
    supabase: Option<SupabaseConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CamerasConfigFile {
    api_base: Option<String>,
    image_base: Option<String>,
    timeout_secs: Option<u64>,
    max_connections: Option<usize>,
    service_area: Option<Vec<[f64; 2]>>,
}

#[derive(Debug, Deserialize, Default)]
struct ModelConfigFile {
    backend: Option<String>,
    path: Option<PathBuf>,
    url: Option<String>,
    input_size: Option<u32>,
    target_class: Option<usize>,
    confidence_threshold: Option<f32>,
    iou_threshold: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct RenderConfigFile {
    box_color: Option<[u8; 3]>,
    box_width: Option<u32>,
    text_scale: Option<u32>,
    max_width: Option<u32>,
    quality: Option<u8>,
}

#[derive(Debug, Deserialize, Default)]
struct EvidenceConfigFile {
    enabled: Option<bool>,
    dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct SupabaseConfigFile {
    url: Option<String>,
    key: Option<String>,
    bucket: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModelBackend {
    Tract,
    /// Detects nothing; for dry runs without a model file.
    Stub,
}

impl ModelBackend {
    fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "tract" | "onnx" => Ok(Self::Tract),
            "stub" => Ok(Self::Stub),
            other => Err(anyhow!("unknown model backend '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub max_workers: usize,
    pub db_path: String,
    pub cameras: CameraSettings,
    pub model: ModelSettings,
    pub render: RenderSettings,
    pub evidence: EvidenceSettings,
    /// Present only when both url and key are configured.
    pub supabase: Option<SupabaseSettings>,
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    pub api_base: String,
    pub image_base: String,
    pub timeout: Duration,
    pub max_connections: usize,
    pub service_area: Option<ServiceArea>,
}

#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub backend: ModelBackend,
    pub path: PathBuf,
    pub url: String,
    pub params: YoloParams,
}

#[derive(Debug, Clone)]
pub struct EvidenceSettings {
    pub enabled: bool,
    pub dir: PathBuf,
}

// Raw pieces validated together in `validate`.
#[derive(Debug, Clone, Default)]
struct PendingSupabase {
    url: Option<String>,
    key: Option<String>,
    bucket: Option<String>,
}

impl ScanConfig {
    /// Load from `CENSUS_CONFIG` (if set), then apply environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("CENSUS_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let (mut cfg, mut supabase) = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env(&mut supabase)?;
        cfg.supabase = resolve_supabase(supabase)?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ScanConfigFile) -> Result<(Self, PendingSupabase)> {
        let cameras_file = file.cameras.unwrap_or_default();
        let service_area = match cameras_file.service_area {
            Some(vertices) => Some(ServiceArea::new(vertices)?),
            None => None,
        };
        let cameras = CameraSettings {
            api_base: cameras_file
                .api_base
                .unwrap_or_else(|| DEFAULT_CAMERA_API_BASE.to_string()),
            image_base: cameras_file
                .image_base
                .unwrap_or_else(|| DEFAULT_IMAGE_BASE.to_string()),
            timeout: cameras_file
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_TIMEOUT),
            max_connections: cameras_file
                .max_connections
                .unwrap_or(DEFAULT_MAX_CONNECTIONS),
            service_area,
        };

        let model_file = file.model.unwrap_or_default();
        let model = ModelSettings {
            backend: match model_file.backend.as_deref() {
                Some(raw) => ModelBackend::parse(raw)?,
                None => ModelBackend::Tract,
            },
            path: model_file
                .path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_PATH)),
            url: model_file.url.unwrap_or_default(),
            params: YoloParams {
                input_size: model_file.input_size.unwrap_or(DEFAULT_INPUT_SIZE),
                target_class: model_file.target_class.unwrap_or(0),
                confidence_threshold: model_file
                    .confidence_threshold
                    .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD),
                iou_threshold: model_file.iou_threshold.unwrap_or(DEFAULT_IOU_THRESHOLD),
            },
        };

        let defaults = RenderSettings::default();
        let render_file = file.render.unwrap_or_default();
        let render = RenderSettings {
            box_color: render_file.box_color.unwrap_or(defaults.box_color),
            box_width: render_file.box_width.unwrap_or(defaults.box_width),
            text_scale: render_file.text_scale.unwrap_or(defaults.text_scale),
            max_width: render_file.max_width.unwrap_or(defaults.max_width),
            quality: render_file.quality.unwrap_or(defaults.quality),
        };

        let evidence_file = file.evidence.unwrap_or_default();
        let evidence = EvidenceSettings {
            enabled: evidence_file.enabled.unwrap_or(true),
            dir: evidence_file
                .dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_EVIDENCE_DIR)),
        };

        let supabase = file
            .supabase
            .map(|s| PendingSupabase {
                url: s.url,
                key: s.key,
                bucket: s.bucket,
            })
            .unwrap_or_default();

        let cfg = Self {
            max_workers: file.max_workers.unwrap_or(DEFAULT_MAX_WORKERS),
            db_path: file.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
            cameras,
            model,
            render,
            evidence,
            supabase: None,
        };
        Ok((cfg, supabase))
    }

    fn apply_env(&mut self, supabase: &mut PendingSupabase) -> Result<()> {
        if let Some(url) = env_nonempty("SUPABASE_URL") {
            supabase.url = Some(url);
        }
        if let Some(key) = env_nonempty("SUPABASE_KEY") {
            supabase.key = Some(key);
        }
        if let Some(bucket) = env_nonempty("SUPABASE_BUCKET") {
            supabase.bucket = Some(bucket);
        }
        if let Some(url) = env_nonempty("MODEL_URL") {
            self.model.url = url;
        }
        if let Some(path) = env_nonempty("MODEL_PATH") {
            self.model.path = PathBuf::from(path);
        }
        if let Some(threshold) = env_nonempty("CONFIDENCE_THRESHOLD") {
            self.model.params.confidence_threshold = threshold
                .parse()
                .map_err(|_| anyhow!("CONFIDENCE_THRESHOLD must be a number"))?;
        }
        if let Some(workers) = env_nonempty("MAX_WORKERS") {
            self.max_workers = workers
                .parse()
                .map_err(|_| anyhow!("MAX_WORKERS must be a positive integer"))?;
        }
        if let Some(path) = env_nonempty("CENSUS_DB_PATH") {
            self.db_path = path;
        }
        if let Some(dir) = env_nonempty("CENSUS_EVIDENCE_DIR") {
            self.evidence.dir = PathBuf::from(dir);
        }
        if let Some(base) = env_nonempty("CCTV_API_BASE") {
            self.cameras.api_base = base;
        }
        if let Some(base) = env_nonempty("CCTV_IMAGE_BASE") {
            self.cameras.image_base = base;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        let params = &self.model.params;
        if !(0.0..=1.0).contains(&params.confidence_threshold) {
            return Err(anyhow!("confidence threshold must be within [0, 1]"));
        }
        if !(0.0..=1.0).contains(&params.iou_threshold) {
            return Err(anyhow!("iou threshold must be within [0, 1]"));
        }
        if params.input_size == 0 {
            return Err(anyhow!("model input size must be greater than zero"));
        }
        if self.max_workers == 0 {
            return Err(anyhow!("max_workers must be at least 1"));
        }
        if self.cameras.max_connections == 0 {
            return Err(anyhow!("max_connections must be at least 1"));
        }
        if self.cameras.timeout.is_zero() {
            return Err(anyhow!("camera request timeout must be greater than zero"));
        }
        if !(1..=100).contains(&self.render.quality) {
            return Err(anyhow!("jpeg quality must be within 1..=100"));
        }
        if self.render.max_width == 0 {
            return Err(anyhow!("evidence max_width must be greater than zero"));
        }
        if self.render.box_width == 0 || self.render.text_scale == 0 {
            return Err(anyhow!("box_width and text_scale must be greater than zero"));
        }
        Ok(())
    }

    /// Apply command-line overrides on top of file and environment values.
    pub fn apply_overrides(&mut self, max_workers: Option<usize>, no_evidence: bool) -> Result<()> {
        if let Some(workers) = max_workers {
            if workers == 0 {
                return Err(anyhow!("--max-workers must be at least 1"));
            }
            self.max_workers = workers;
        }
        if no_evidence {
            self.evidence.enabled = false;
        }
        Ok(())
    }
}

fn resolve_supabase(pending: PendingSupabase) -> Result<Option<SupabaseSettings>> {
    match (pending.url, pending.key) {
        (Some(url), Some(key)) => Ok(Some(SupabaseSettings {
            url,
            key,
            bucket: pending
                .bucket
                .unwrap_or_else(|| DEFAULT_EVIDENCE_BUCKET.to_string()),
        })),
        (None, None) => Ok(None),
        _ => Err(anyhow!(
            "SUPABASE_URL and SUPABASE_KEY must be set together"
        )),
    }
}

fn env_nonempty(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn read_config_file(path: &Path) -> Result<ScanConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
