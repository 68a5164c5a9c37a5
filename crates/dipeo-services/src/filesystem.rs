//! Filesystem service (spec §4.2, §6 "a single base directory anchors
//! filesystem access"). All paths are resolved relative to `base_dir`;
//! any path whose resolved form escapes `base_dir` is rejected.

use std::path::{Path, PathBuf};

use crate::error::{Result, ServiceError};

pub struct FilesystemService {
    base_dir: PathBuf,
}

impl FilesystemService {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self { base_dir: base_dir.into() }
    }

    /// Resolves `relative` against `base_dir`, rejecting any path that
    /// escapes it via `..` traversal or an absolute override.
    fn resolve(&self, relative: &str) -> Result<PathBuf> {
        let candidate = Path::new(relative);
        if candidate.is_absolute() {
            return Err(ServiceError::PathTraversal(relative.to_string()));
        }

        let mut resolved = self.base_dir.clone();
        for component in candidate.components() {
            match component {
                std::path::Component::ParentDir => {
                    return Err(ServiceError::PathTraversal(relative.to_string()));
                }
                std::path::Component::Normal(part) => resolved.push(part),
                std::path::Component::CurDir => {}
                _ => return Err(ServiceError::PathTraversal(relative.to_string())),
            }
        }
        Ok(resolved)
    }

    pub async fn read(&self, relative: &str) -> Result<String> {
        let path = self.resolve(relative)?;
        Ok(tokio::fs::read_to_string(path).await?)
    }

    /// Writes atomically via write-temp + rename (spec §5).
    pub async fn write(&self, relative: &str, content: &str) -> Result<()> {
        let path = self.resolve(relative)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp_path = path.with_extension("tmp");
        tokio::fs::write(&tmp_path, content).await?;
        tokio::fs::rename(&tmp_path, &path).await?;
        Ok(())
    }

    pub async fn exists(&self, relative: &str) -> Result<bool> {
        let path = self.resolve(relative)?;
        Ok(tokio::fs::try_exists(path).await?)
    }
}
