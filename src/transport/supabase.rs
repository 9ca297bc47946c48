use anyhow::{anyhow, Context, Result};
use std::time::Duration;
use url::Url;

pub const DEFAULT_EVIDENCE_BUCKET: &str = "detection-images";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, Debug, PartialEq)]
pub struct SupabaseSettings {
    pub url: String,
    pub key: String,
    pub bucket: String,
}

/// Authenticated HTTP client for one Supabase project.
#[derive(Clone)]
pub struct SupabaseClient {
    base: Url,
    key: String,
    agent: ureq::Agent,
}

impl SupabaseClient {
    pub fn new(settings: &SupabaseSettings) -> Result<Self> {
        let mut base = Url::parse(&settings.url)
            .with_context(|| format!("parse supabase url '{}'", settings.url))?;
        if base.cannot_be_a_base() {
            return Err(anyhow!("supabase url '{}' cannot be a base url", settings.url));
        }
        if settings.key.trim().is_empty() {
            return Err(anyhow!("supabase key is empty"));
        }
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let agent = ureq::AgentBuilder::new().timeout(REQUEST_TIMEOUT).build();
        Ok(Self {
            base,
            key: settings.key.clone(),
            agent,
        })
    }

    /// `{base}/rest/v1/{table}`.
    pub fn rest_url(&self, table: &str) -> Result<Url> {
        self.base
            .join(&format!("rest/v1/{}", table))
            .with_context(|| format!("build rest url for table {}", table))
    }

    /// `{base}/storage/v1/object/{bucket}/{path}`.
    pub fn object_url(&self, bucket: &str, path: &str) -> Result<Url> {
        self.storage_url(&["object", bucket], path)
    }

    /// `{base}/storage/v1/object/public/{bucket}/{path}`.
    pub fn public_object_url(&self, bucket: &str, path: &str) -> Result<Url> {
        self.storage_url(&["object", "public", bucket], path)
    }

    /// Every `/`-separated piece of `path` is pushed as its own escaped segment.
    fn storage_url(&self, prefix: &[&str], path: &str) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("supabase url cannot carry a storage path"))?
            .pop_if_empty()
            .extend(["storage", "v1"])
            .extend(prefix)
            .extend(path.split('/'));
        Ok(url)
    }

    pub fn request(&self, method: &str, url: &Url) -> ureq::Request {
        self.agent
            .request_url(method, url)
            .set("apikey", &self.key)
            .set("Authorization", &format!("Bearer {}", self.key))
    }
}

impl std::fmt::Debug for SupabaseClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupabaseClient")
            .field("base", &self.base.as_str())
            .finish_non_exhaustive()
    }
}
