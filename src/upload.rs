//! Delivery of a finalized archive release.
//!
//! The key layout mirrors the production bucket: the archive lands under
//! `confluence-sos/{run_type}/{version}/` and validation figures under
//! `confluence-sos/figs/{run_type}/{version}/`. The sink trait keeps that
//! layout independent of the transport; the in-tree sink copies into a local
//! directory tree.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;

use crate::archive::SosArchive;
use crate::config::RunType;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("archive must be finalized before upload")]
    NotFinalized,

    #[error("archive path has no file name: {0}")]
    BadArchivePath(PathBuf),
}

/// Destination for release artifacts, addressed by bucket-style keys.
pub trait UploadSink {
    fn upload(&self, local: &Path, key: &str) -> Result<(), UploadError>;
}

/// Sink that copies artifacts into a directory tree mirroring the key
/// layout. Stands in for the bucket in local runs and tests.
pub struct LocalDirSink {
    root: PathBuf,
}

impl LocalDirSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl UploadSink for LocalDirSink {
    fn upload(&self, local: &Path, key: &str) -> Result<(), UploadError> {
        let dest = self.root.join(key);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(local, &dest)?;
        Ok(())
    }
}

/// Push a finalized archive, and any validation figures, through `sink`.
pub fn upload_archive(
    sink: &dyn UploadSink,
    archive: &SosArchive,
    run_type: RunType,
    figs_dir: Option<&Path>,
) -> Result<(), UploadError> {
    if !archive.is_finalized() {
        return Err(UploadError::NotFinalized);
    }
    let file_name = archive
        .path()
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| UploadError::BadArchivePath(archive.path().to_path_buf()))?;
    let version = archive.version();
    let key = format!("confluence-sos/{run_type}/{version}/{file_name}");
    sink.upload(archive.path(), &key)?;
    info!(key = key.as_str(), "uploaded archive");

    let Some(figs) = figs_dir else {
        return Ok(());
    };
    if !figs.is_dir() {
        info!(dir = %figs.display(), "no validation figures to upload");
        return Ok(());
    }
    let mut entries: Vec<PathBuf> = fs::read_dir(figs)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .collect();
    entries.sort();
    for entry in &entries {
        let Some(name) = entry.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let key = format!("confluence-sos/figs/{run_type}/{version}/{name}");
        sink.upload(entry, &key)?;
    }
    if !entries.is_empty() {
        info!(count = entries.len(), "uploaded validation figures");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_sink_creates_the_key_tree() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("archive.nc");
        fs::write(&src, b"payload").unwrap();

        let sink = LocalDirSink::new(dir.path().join("bucket"));
        sink.upload(&src, "confluence-sos/constrained/0042/archive.nc")
            .unwrap();

        let dest = dir
            .path()
            .join("bucket/confluence-sos/constrained/0042/archive.nc");
        assert_eq!(fs::read(&dest).unwrap(), b"payload");
    }

    #[test]
    fn test_local_sink_overwrites_existing_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("archive.nc");
        let sink = LocalDirSink::new(dir.path().join("bucket"));

        fs::write(&src, b"first").unwrap();
        sink.upload(&src, "k/archive.nc").unwrap();
        fs::write(&src, b"second").unwrap();
        sink.upload(&src, "k/archive.nc").unwrap();

        assert_eq!(
            fs::read(dir.path().join("bucket/k/archive.nc")).unwrap(),
            b"second"
        );
    }
}
