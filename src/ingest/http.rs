//! HTTP camera snapshot source.
//!
//! One `ureq::Agent` (and its connection pool) is shared by every worker.
//! Each fetch is a single attempt: any transport error or non-2xx status
//! fails that camera immediately.

use anyhow::{anyhow, Context, Result};
use std::io::Read;
use std::time::Duration;
use url::Url;

use super::limiter::ConnectionLimiter;
use super::ImageSource;
use crate::error::ScanError;

pub const DEFAULT_IMAGE_BASE: &str = "https://cctv.austinmobility.io/image";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_CONNECTIONS: usize = 20;
const MAX_IMAGE_BYTES: u64 = 10 * 1024 * 1024;

#[derive(Clone, Debug)]
pub struct HttpSourceConfig {
    pub image_base: String,
    pub timeout: Duration,
    pub max_connections: usize,
}

impl Default for HttpSourceConfig {
    fn default() -> Self {
        Self {
            image_base: DEFAULT_IMAGE_BASE.to_string(),
            timeout: DEFAULT_TIMEOUT,
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}

pub struct HttpImageSource {
    agent: ureq::Agent,
    image_base: Url,
    limiter: ConnectionLimiter,
}

impl HttpImageSource {
    pub fn new(config: HttpSourceConfig) -> Result<Self> {
        let image_base = Url::parse(&config.image_base)
            .with_context(|| format!("parse image base url '{}'", config.image_base))?;
        if image_base.cannot_be_a_base() {
            return Err(anyhow!("image base '{}' cannot be a base url", config.image_base));
        }
        let agent = build_agent(config.timeout, config.max_connections);
        Ok(Self {
            agent,
            image_base,
            limiter: ConnectionLimiter::new(config.max_connections),
        })
    }

    pub fn image_url(&self, camera_id: &str) -> Url {
        let mut url = self.image_base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(&format!("{camera_id}.jpg"));
        }
        url
    }

    fn fetch(&self, camera_id: &str) -> Result<Vec<u8>> {
        let url = self.image_url(camera_id);
        let _permit = self.limiter.acquire();
        let response = self
            .agent
            .request_url("GET", &url)
            .call()
            .with_context(|| format!("GET {}", url))?;

        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(MAX_IMAGE_BYTES + 1)
            .read_to_end(&mut bytes)
            .context("read image body")?;
        if bytes.len() as u64 > MAX_IMAGE_BYTES {
            return Err(anyhow!("image exceeds {} bytes", MAX_IMAGE_BYTES));
        }
        if bytes.is_empty() {
            return Err(anyhow!("empty image body"));
        }
        Ok(bytes)
    }
}

impl ImageSource for HttpImageSource {
    fn fetch_image(&self, camera_id: &str) -> Result<Vec<u8>, ScanError> {
        self.fetch(camera_id).map_err(|e| ScanError::Fetch {
            camera_id: camera_id.to_string(),
            reason: format!("{:#}", e),
        })
    }
}

pub(crate) fn build_agent(timeout: Duration, max_connections: usize) -> ureq::Agent {
    ureq::AgentBuilder::new()
        .timeout(timeout)
        .max_idle_connections(max_connections)
        .max_idle_connections_per_host(max_connections)
        .redirects(5)
        .build()
}
