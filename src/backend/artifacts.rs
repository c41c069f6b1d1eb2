//! Output directories written by a training run

use crate::error::Result;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const TRAINING_STATISTICS_FILE: &str = "training_statistics.json";
pub const DESCRIPTION_FILE: &str = "description.json";
pub const PROGRESS_FILE: &str = "training_progress.json";
pub const PROCESSED_DIR: &str = "processed";
pub const TEST_PREDICTIONS_FILE: &str = "test_predictions.parquet";

/// A run directory that is deleted when dropped unless persisted
#[derive(Debug)]
pub struct ArtifactDir {
    path: PathBuf,
    keep: bool,
}

impl ArtifactDir {
    /// Create `<base>/<experiment>_<model>`, or the first free `_<n>` suffix
    pub fn create(base: &Path, experiment: &str, model: &str) -> Result<Self> {
        fs::create_dir_all(base)?;
        let stem = format!("{experiment}_{model}");
        let mut path = base.join(&stem);
        let mut n = 0;
        loop {
            match fs::create_dir(&path) {
                Ok(()) => break,
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    n += 1;
                    path = base.join(format!("{stem}_{n}"));
                }
                Err(e) => return Err(e.into()),
            }
        }
        debug!(path = %path.display(), "created artifact directory");
        Ok(Self { path, keep: false })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Keep the directory on disk and hand its path to the caller
    pub fn persist(mut self) -> PathBuf {
        self.keep = true;
        std::mem::take(&mut self.path)
    }

    /// Delete the directory now, reporting failures
    pub fn release(mut self) -> Result<()> {
        self.keep = true;
        remove(&self.path)
    }
}

impl Drop for ArtifactDir {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        if let Err(e) = remove(&self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to remove artifact directory");
        }
    }
}

fn remove(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_unique_run_names() {
        let base = TempDir::new().unwrap();
        let a = ArtifactDir::create(base.path(), "api_experiment", "run").unwrap();
        let b = ArtifactDir::create(base.path(), "api_experiment", "run").unwrap();
        assert!(a.path().ends_with("api_experiment_run"));
        assert!(b.path().ends_with("api_experiment_run_1"));
    }

    #[test]
    fn test_drop_removes_directory() {
        let base = TempDir::new().unwrap();
        let path = {
            let dir = ArtifactDir::create(base.path(), "e", "run").unwrap();
            fs::write(dir.path().join("x.json"), "{}").unwrap();
            dir.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn test_release_and_persist() {
        let base = TempDir::new().unwrap();
        let released = ArtifactDir::create(base.path(), "e", "run").unwrap();
        let released_path = released.path().to_path_buf();
        released.release().unwrap();
        assert!(!released_path.exists());

        let kept = ArtifactDir::create(base.path(), "e", "run").unwrap().persist();
        assert!(kept.exists());
    }
}
