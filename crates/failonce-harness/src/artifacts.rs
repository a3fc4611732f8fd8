//! Crash-artifact preservation.
//!
//! Every run that dies leaves its core file at one well-known path. Before
//! each run that path is cleared; after a crash whatever is there is moved to
//! `<artifact_dir>/core-run<N>` so later runs cannot overwrite it.

use std::io::{self, Read};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::HarnessError;

/// One preserved crash artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchivedArtifact {
    pub run_index: u64,
    pub path: PathBuf,
    pub sha256: String,
    pub size_bytes: u64,
}

/// The well-known crash path and the directory archives go to.
#[derive(Debug, Clone)]
pub struct CrashArtifacts {
    crash_path: PathBuf,
    artifact_dir: PathBuf,
}

impl CrashArtifacts {
    #[must_use]
    pub fn new(crash_path: impl Into<PathBuf>, artifact_dir: impl Into<PathBuf>) -> Self {
        Self {
            crash_path: crash_path.into(),
            artifact_dir: artifact_dir.into(),
        }
    }

    #[must_use]
    pub fn crash_path(&self) -> &Path {
        &self.crash_path
    }

    /// Archive name for run `run_index`.
    #[must_use]
    pub fn archive_path(&self, run_index: u64) -> PathBuf {
        self.artifact_dir.join(format!("core-run{run_index}"))
    }

    /// Remove any artifact left at the well-known path.
    pub fn clear(&self) -> Result<(), HarnessError> {
        remove_if_present(&self.crash_path).map_err(|source| self.error(source))
    }

    /// Move the artifact of run `run_index` into the archive.
    ///
    /// Returns `None` when the run left nothing behind (core dumps disabled,
    /// or a `core_pattern` that pipes elsewhere).
    pub fn archive(&self, run_index: u64) -> Result<Option<ArchivedArtifact>, HarnessError> {
        if !self.crash_path.exists() {
            return Ok(None);
        }
        std::fs::create_dir_all(&self.artifact_dir).map_err(|source| HarnessError::Artifact {
            path: self.artifact_dir.clone(),
            source,
        })?;
        let dest = self.archive_path(run_index);
        remove_if_present(&dest).map_err(|source| HarnessError::Artifact {
            path: dest.clone(),
            source,
        })?;
        if std::fs::hard_link(&self.crash_path, &dest).is_err() {
            // Different filesystem, or one without link support.
            std::fs::copy(&self.crash_path, &dest).map_err(|source| HarnessError::Artifact {
                path: dest.clone(),
                source,
            })?;
        }
        self.clear()?;

        let (sha256, size_bytes) = hash_file(&dest).map_err(|source| HarnessError::Artifact {
            path: dest.clone(),
            source,
        })?;
        Ok(Some(ArchivedArtifact {
            run_index,
            path: dest,
            sha256,
            size_bytes,
        }))
    }

    fn error(&self, source: io::Error) -> HarnessError {
        HarnessError::Artifact {
            path: self.crash_path.clone(),
            source,
        }
    }
}

fn remove_if_present(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}

/// Hex SHA-256 digest and size of the file at `path`.
pub fn hash_file(path: &Path) -> io::Result<(String, u64)> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    let mut size = 0u64;
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        size += n as u64;
    }
    let digest = hasher.finalize();
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    Ok((hex, size))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "failonce-artifacts-{name}-{}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).expect("create scratch dir");
        dir
    }

    #[test]
    fn archive_moves_and_hashes() {
        let dir = scratch("move");
        let artifacts = CrashArtifacts::new(dir.join("core"), dir.join("archive"));
        std::fs::write(dir.join("core"), b"abc").expect("write core");

        let archived = artifacts.archive(4).expect("archive").expect("artifact present");
        assert_eq!(archived.path, dir.join("archive").join("core-run4"));
        assert_eq!(archived.size_bytes, 3);
        assert_eq!(
            archived.sha256,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert!(!dir.join("core").exists());
        assert_eq!(std::fs::read(&archived.path).expect("read"), b"abc");
    }

    #[test]
    fn nothing_to_archive() {
        let dir = scratch("none");
        let artifacts = CrashArtifacts::new(dir.join("core"), &dir);
        assert_eq!(artifacts.archive(1).expect("archive"), None);
    }

    #[test]
    fn clear_tolerates_missing_file() {
        let dir = scratch("clear");
        let artifacts = CrashArtifacts::new(dir.join("core"), &dir);
        artifacts.clear().expect("clear missing");
        std::fs::write(dir.join("core"), b"stale").expect("write");
        artifacts.clear().expect("clear present");
        assert!(!dir.join("core").exists());
    }
}
