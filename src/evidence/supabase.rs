use anyhow::{Context, Result};

use super::BlobStore;
use crate::transport::SupabaseClient;

const CACHE_CONTROL: &str = "public, max-age=31536000";

/// Supabase Storage bucket. Uploads overwrite (`x-upsert`), so re-rendering a
/// detection replaces the object at its deterministic path.
#[derive(Clone, Debug)]
pub struct SupabaseBlobStore {
    client: SupabaseClient,
    bucket: String,
}

impl SupabaseBlobStore {
    pub fn new(client: SupabaseClient, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }
}

impl BlobStore for SupabaseBlobStore {
    fn name(&self) -> &'static str {
        "supabase-storage"
    }

    fn put(&self, path: &str, bytes: &[u8], content_type: &str) -> Result<String> {
        let url = self.client.object_url(&self.bucket, path)?;
        self.client
            .request("POST", &url)
            .set("Content-Type", content_type)
            .set("Cache-Control", CACHE_CONTROL)
            .set("x-upsert", "true")
            .send_bytes(bytes)
            .with_context(|| format!("upload {} to bucket {}", path, self.bucket))?;
        let public = self.client.public_object_url(&self.bucket, path)?;
        Ok(public.to_string())
    }
}
