use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::{Component, Path, PathBuf};
use url::Url;

use super::BlobStore;
use crate::write_atomic;

pub const DEFAULT_EVIDENCE_DIR: &str = "evidence";

/// Blob store rooted at a local directory. References are `file://` URLs.
#[derive(Clone, Debug)]
pub struct FilesystemBlobStore {
    root: PathBuf,
}

impl FilesystemBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .with_context(|| format!("create evidence root {}", root.display()))?;
        let root = root
            .canonicalize()
            .with_context(|| format!("resolve evidence root {}", root.display()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path);
        let safe = !path.is_empty()
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)));
        if !safe {
            return Err(anyhow!("object path '{}' escapes the evidence root", path));
        }
        Ok(self.root.join(relative))
    }
}

impl BlobStore for FilesystemBlobStore {
    fn name(&self) -> &'static str {
        "filesystem"
    }

    fn put(&self, path: &str, bytes: &[u8], _content_type: &str) -> Result<String> {
        let target = self.object_path(path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        write_atomic(&target, bytes)?;
        let reference = Url::from_file_path(&target)
            .map_err(|_| anyhow!("cannot express {} as a file url", target.display()))?;
        Ok(reference.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_under_root_and_returns_file_url() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let store = FilesystemBlobStore::new(temp_dir.path().join("evidence"))?;
        let reference = store.put("detections/9/2026-10-17/101500.jpg", b"jpeg", "image/jpeg")?;

        let written = store.root().join("detections/9/2026-10-17/101500.jpg");
        assert_eq!(fs::read(&written)?, b"jpeg");
        assert!(reference.starts_with("file://"));
        assert!(reference.ends_with("detections/9/2026-10-17/101500.jpg"));
        Ok(())
    }

    #[test]
    fn same_path_overwrites() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let store = FilesystemBlobStore::new(temp_dir.path())?;
        let first = store.put("detections/1/2026-01-01/000000.jpg", b"one", "image/jpeg")?;
        let second = store.put("detections/1/2026-01-01/000000.jpg", b"two", "image/jpeg")?;
        assert_eq!(first, second);
        assert_eq!(
            fs::read(store.root().join("detections/1/2026-01-01/000000.jpg"))?,
            b"two"
        );
        Ok(())
    }

    #[test]
    fn rejects_escaping_paths() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let store = FilesystemBlobStore::new(temp_dir.path())?;
        assert!(store.put("../outside.jpg", b"x", "image/jpeg").is_err());
        assert!(store.put("/etc/passwd", b"x", "image/jpeg").is_err());
        assert!(store.put("", b"x", "image/jpeg").is_err());
        Ok(())
    }
}
