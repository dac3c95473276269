use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A file in the temp store that must not outlive the pipeline step that
/// created it. Removal happens on drop, regardless of how the step ended.
#[derive(Debug)]
pub struct TempArtifact {
    path: PathBuf,
}

impl TempArtifact {
    /// Write `data` to `<dir>/<file_name>` and take ownership of the file.
    pub fn create(dir: &Path, file_name: &str, data: &[u8]) -> Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create temp dir {:?}", dir))?;

        let path = dir.join(file_name);
        fs::write(&path, data)
            .with_context(|| format!("Failed to write temp artifact {:?}", path))?;

        debug!("Created temp artifact {:?} ({} bytes)", path, data.len());
        Ok(Self { path })
    }

    /// Adopt an already-written file (e.g. a multipart upload spooled to disk).
    pub fn adopt(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempArtifact {
    fn drop(&mut self) {
        if self.path.exists() {
            if let Err(err) = fs::remove_file(&self.path) {
                warn!("Failed to remove temp artifact {:?}: {}", self.path, err);
            } else {
                debug!("Removed temp artifact {:?}", self.path);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_cleanup_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = {
            let artifact = TempArtifact::create(dir.path(), "sample.wav", b"RIFF").unwrap();
            assert!(artifact.path().exists());
            assert_eq!(fs::read(artifact.path()).unwrap(), b"RIFF");
            artifact.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn test_cleanup_survives_external_removal() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = TempArtifact::create(dir.path(), "gone.wav", b"x").unwrap();
        fs::remove_file(artifact.path()).unwrap();
        // Drop must not panic when the file is already gone.
        drop(artifact);
    }

    #[test]
    fn test_adopt_removes_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("upload.pdf");
        fs::write(&path, b"%PDF").unwrap();
        drop(TempArtifact::adopt(path.clone()));
        assert!(!path.exists());
    }
}
