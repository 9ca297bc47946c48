use anyhow::{anyhow, Context, Result};
use std::fs;
use std::io::Read;
use std::path::Path;
use std::time::Duration;

pub const MODEL_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(120);
const MAX_MODEL_BYTES: u64 = 512 * 1024 * 1024;

/// Make sure the model file exists locally, downloading it once if absent.
pub fn ensure_model(model_path: &Path, model_url: &str) -> Result<()> {
    if model_path.exists() {
        return Ok(());
    }
    if model_url.trim().is_empty() {
        return Err(anyhow!(
            "model {} is missing and no model url is configured",
            model_path.display()
        ));
    }

    log::info!("downloading model from {}", model_url);
    if let Some(parent) = model_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create model directory {}", parent.display()))?;
    }

    let agent = ureq::AgentBuilder::new()
        .timeout(MODEL_DOWNLOAD_TIMEOUT)
        .redirects(8)
        .build();
    let response = agent
        .get(model_url)
        .call()
        .with_context(|| format!("download model from {}", model_url))?;

    let mut bytes = Vec::new();
    response
        .into_reader()
        .take(MAX_MODEL_BYTES + 1)
        .read_to_end(&mut bytes)
        .context("read model download body")?;
    if bytes.len() as u64 > MAX_MODEL_BYTES {
        return Err(anyhow!("model download exceeds {} bytes", MAX_MODEL_BYTES));
    }
    if bytes.is_empty() {
        return Err(anyhow!("model download from {} was empty", model_url));
    }

    crate::write_atomic(model_path, &bytes)?;
    log::info!("model downloaded to {}", model_path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn existing_model_is_not_downloaded() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let model_path = temp_dir.path().join("best.onnx");
        fs::write(&model_path, b"model")?;
        // Unroutable URL: any download attempt would fail the test.
        ensure_model(&model_path, "http://127.0.0.1:9/best.onnx")?;
        assert_eq!(fs::read(&model_path)?, b"model");
        Ok(())
    }

    #[test]
    fn missing_model_without_url_fails_fast() {
        let temp_dir = tempfile::tempdir().unwrap();
        let model_path = temp_dir.path().join("models/best.onnx");
        let err = ensure_model(&model_path, "  ").unwrap_err();
        assert!(err.to_string().contains("no model url"));
        assert!(!model_path.exists());
    }
}
