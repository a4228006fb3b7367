//! File operation utilities
//!
//! Artifacts are written to a `.part` sibling first and renamed into place,
//! so a file at its final path is always complete.

use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

use crate::downloader::core::{DownloadError, FileOperation, Result};

/// Size of a file, zero if it does not exist
pub async fn file_size(path: &Path) -> u64 {
    fs::metadata(path).await.map(|m| m.len()).unwrap_or(0)
}

/// Create a temporary file path for partial downloads
pub fn create_temp_path(dest_path: &Path) -> PathBuf {
    let mut name = dest_path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".part");
    dest_path.with_file_name(name)
}

/// Make sure a directory exists
pub async fn ensure_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)
        .await
        .map_err(|e| DownloadError::file_system(dir, FileOperation::CreateDir, e))
}

/// Atomically rename a temporary file to its final destination
pub async fn atomic_rename(temp_path: &Path, dest_path: &Path) -> Result<()> {
    fs::rename(temp_path, dest_path)
        .await
        .map_err(|e| DownloadError::file_system(dest_path, FileOperation::Move, e))?;
    debug!("Atomically renamed {} to {}", temp_path.display(), dest_path.display());
    Ok(())
}

/// Write a complete artifact, returning the number of bytes written
pub async fn write_artifact(dest_path: &Path, data: &[u8]) -> Result<u64> {
    if let Some(parent) = dest_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        ensure_dir(parent).await?;
    }

    let temp_path = create_temp_path(dest_path);
    if let Err(e) = fs::write(&temp_path, data).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(DownloadError::file_system(&temp_path, FileOperation::Write, e));
    }
    atomic_rename(&temp_path, dest_path).await?;
    Ok(data.len() as u64)
}

/// Delete an artifact written earlier in the run; a missing file is not an error
pub async fn remove_artifact(path: &Path) -> Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => {
            debug!("Removed {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(DownloadError::file_system(path, FileOperation::Delete, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_write_artifact_creates_parents_and_leaves_no_part_file() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("waveforms").join("IU.ANMO.00.BHZ.mseed");

        let written = write_artifact(&dest, b"record").await.unwrap();

        assert_eq!(written, 6);
        assert_eq!(file_size(&dest).await, 6);
        assert!(!create_temp_path(&dest).exists());
    }

    #[tokio::test]
    async fn test_remove_missing_artifact_is_ok() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nothing.xml");
        assert!(remove_artifact(&missing).await.is_ok());
        assert_eq!(file_size(&missing).await, 0);
    }

    #[test]
    fn test_temp_path_keeps_full_name() {
        let temp = create_temp_path(Path::new("/data/IU.ANMO.xml"));
        assert_eq!(temp, PathBuf::from("/data/IU.ANMO.xml.part"));
    }
}
