use std::path::{Path, PathBuf};

use tracing::info;

use super::ArtifactUploader;
use crate::error::{Result, RpaError};

/// Copies artifacts into a local directory, typically a folder synced by a
/// cloud drive client.
#[derive(Debug, Clone)]
pub struct LocalUploader {
    target_dir: PathBuf,
}

impl LocalUploader {
    pub fn new(target_dir: impl Into<PathBuf>) -> Self {
        Self {
            target_dir: target_dir.into(),
        }
    }
}

impl ArtifactUploader for LocalUploader {
    fn upload(&self, path: &Path) -> Result<String> {
        let name = path
            .file_name()
            .ok_or_else(|| RpaError::Config(format!("not a file: {}", path.display())))?;
        std::fs::create_dir_all(&self.target_dir)?;
        let dest = self.target_dir.join(name);
        std::fs::copy(path, &dest)?;
        info!(artifact = %path.display(), dest = %dest.display(), "artifact uploaded");
        Ok(dest.display().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copies_into_target_dir() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("shot.png");
        std::fs::write(&src, b"png").unwrap();
        let uploader = LocalUploader::new(dir.path().join("drive"));

        let reference = uploader.upload(&src).unwrap();

        let dest = dir.path().join("drive").join("shot.png");
        assert_eq!(reference, dest.display().to_string());
        assert_eq!(std::fs::read(dest).unwrap(), b"png");
    }
}
