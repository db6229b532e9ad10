//! Artifact bundle packing, unpacking and file lookup

use std::fs::File;
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use walkdir::WalkDir;

use crate::error::ArtifactError;

/// File holding the serialized scorer configuration
pub const METADATA_FILE: &str = "vw.metadata";

/// File holding the model weights
pub const WEIGHTS_FILE: &str = "vw.model";

/// Locations of the two files a model needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub metadata_path: PathBuf,
    pub weights_path: PathBuf,
}

/// Whether `dir` holds a mounted artifact (at least two entries)
pub fn is_mounted(dir: &Path) -> bool {
    if !dir.is_dir() {
        return false;
    }
    WalkDir::new(dir)
        .min_depth(1)
        .into_iter()
        .filter_map(Result::ok)
        .take(2)
        .count()
        >= 2
}

/// Find the metadata and weights files anywhere under `dir`
pub fn locate(dir: &Path) -> Result<ArtifactPaths, ArtifactError> {
    Ok(ArtifactPaths {
        metadata_path: find_file(dir, METADATA_FILE)?,
        weights_path: find_file(dir, WEIGHTS_FILE)?,
    })
}

fn find_file(dir: &Path, name: &str) -> Result<PathBuf, ArtifactError> {
    WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .find(|entry| entry.file_type().is_file() && entry.file_name() == name)
        .map(|entry| entry.into_path())
        .ok_or_else(|| ArtifactError::MissingFile {
            name: name.to_string(),
            dir: dir.display().to_string(),
        })
}

/// Extract a `.tar.gz` archive into `dest`
///
/// Runs on the blocking pool; extraction of large bundles can take seconds.
pub async fn unpack(archive: &Path, dest: &Path) -> Result<(), ArtifactError> {
    let archive = archive.to_path_buf();
    let dest = dest.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<(), ArtifactError> {
        let file = File::open(&archive)?;
        let mut tarball = tar::Archive::new(GzDecoder::new(file));
        tarball
            .unpack(&dest)
            .map_err(|e| ArtifactError::Unpack(format!("{}: {e}", archive.display())))
    })
    .await
    .map_err(|e| ArtifactError::Unpack(format!("extraction task failed: {e}")))?
}

/// Pack the contents of `dir` into a `.tar.gz` archive at `archive`
pub async fn pack(dir: &Path, archive: &Path) -> Result<(), ArtifactError> {
    let dir = dir.to_path_buf();
    let archive = archive.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<(), ArtifactError> {
        let file = File::create(&archive)?;
        let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
        builder.append_dir_all(".", &dir)?;
        builder.into_inner()?.finish()?;
        Ok(())
    })
    .await
    .map_err(|e| ArtifactError::Unpack(format!("packing task failed: {e}")))?
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn write_model(dir: &Path) {
        std::fs::create_dir_all(dir.join("nested")).unwrap();
        std::fs::write(dir.join("nested").join(METADATA_FILE), "--cb_explore 2\n").unwrap();
        std::fs::write(dir.join(WEIGHTS_FILE), b"weights").unwrap();
    }

    #[test]
    fn locate_finds_nested_files() {
        let dir = TempDir::new().unwrap();
        write_model(dir.path());
        let paths = locate(dir.path()).unwrap();
        assert!(paths.metadata_path.ends_with("nested/vw.metadata"));
        assert!(paths.weights_path.ends_with("vw.model"));
    }

    #[test]
    fn locate_missing_weights_is_customer_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(METADATA_FILE), "--cb 2").unwrap();
        let err = locate(dir.path()).unwrap_err();
        match err {
            ArtifactError::MissingFile { name, .. } => assert_eq!(name, WEIGHTS_FILE),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn is_mounted_needs_two_entries() {
        let dir = TempDir::new().unwrap();
        assert!(!is_mounted(dir.path()));
        std::fs::write(dir.path().join("a"), b"").unwrap();
        assert!(!is_mounted(dir.path()));
        std::fs::write(dir.path().join("b"), b"").unwrap();
        assert!(is_mounted(dir.path()));
        assert!(!is_mounted(&dir.path().join("missing")));
    }

    #[tokio::test]
    async fn pack_then_unpack_preserves_files() {
        let src = TempDir::new().unwrap();
        write_model(src.path());
        let work = TempDir::new().unwrap();
        let archive = work.path().join("model.tar.gz");

        pack(src.path(), &archive).await.unwrap();
        let out = work.path().join("out");
        std::fs::create_dir_all(&out).unwrap();
        unpack(&archive, &out).await.unwrap();

        let paths = locate(&out).unwrap();
        assert_eq!(
            std::fs::read_to_string(paths.metadata_path).unwrap(),
            "--cb_explore 2\n"
        );
    }

    #[tokio::test]
    async fn unpack_rejects_non_archive() {
        let work = TempDir::new().unwrap();
        let archive = work.path().join("model.tar.gz");
        std::fs::write(&archive, b"definitely not gzip").unwrap();
        let result = unpack(&archive, work.path()).await;
        assert!(matches!(result, Err(ArtifactError::Unpack(_))));
    }
}
