// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Atomic writes of generated files.

use crate::error::Result;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Writes and removes generated files so readers never observe partial content
#[derive(Debug, Clone, Default)]
pub struct ConfigFiles;

impl ConfigFiles {
    pub fn new() -> Self {
        Self
    }

    /// Current contents of `path`, `None` when there is no such file
    pub async fn read(&self, path: &Path) -> Result<Option<String>> {
        match fs::read_to_string(path).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Replace `path` with `contents`. Returns `false` when the file already
    /// held exactly these contents and was left untouched.
    pub async fn write(&self, path: &Path, contents: &str) -> Result<bool> {
        if let Ok(existing) = fs::read(path).await {
            if existing == contents.as_bytes() {
                debug!(path = %path.display(), "file unchanged");
                return Ok(false);
            }
        }

        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir).await?;

        let tmp = temp_path(path);
        let mut file = fs::File::create(&tmp).await?;
        if let Err(e) = write_and_sync(&mut file, contents).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e);
        }
        drop(file);

        if let Err(e) = fs::rename(&tmp, path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        debug!(path = %path.display(), bytes = contents.len(), "file written");
        Ok(true)
    }

    /// Remove `path`; a missing file is not an error. Returns whether a file was removed.
    pub async fn remove(&self, path: &Path) -> Result<bool> {
        match fs::remove_file(path).await {
            Ok(()) => {
                debug!(path = %path.display(), "file removed");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

async fn write_and_sync(file: &mut fs::File, contents: &str) -> Result<()> {
    file.write_all(contents.as_bytes()).await?;
    file.sync_all().await?;
    Ok(())
}

/// Temporary sibling of `path`; same directory so the rename stays on one filesystem
fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.tmp-{}", name, std::process::id()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf.d").join("vs_ns_cafe.conf");

        let written = ConfigFiles::new().write(&path, "server {}\n").await.unwrap();

        assert!(written);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "server {}\n");
    }

    #[tokio::test]
    async fn test_identical_write_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.conf");
        let files = ConfigFiles::new();

        assert!(files.write(&path, "one").await.unwrap());
        assert!(!files.write(&path, "one").await.unwrap());
        assert!(files.write(&path, "two").await.unwrap());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "two");
    }

    #[tokio::test]
    async fn test_no_temp_file_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.conf");

        ConfigFiles::new().write(&path, "content").await.unwrap();

        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(entries, vec!["a.conf".to_string()]);
    }

    #[tokio::test]
    async fn test_remove_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gone.conf");
        let files = ConfigFiles::new();

        assert!(!files.remove(&path).await.unwrap());
        files.write(&path, "x").await.unwrap();
        assert!(files.remove(&path).await.unwrap());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.conf");
        let files = ConfigFiles::new();

        assert_eq!(files.read(&path).await.unwrap(), None);
        files.write(&path, "server {}").await.unwrap();
        assert_eq!(files.read(&path).await.unwrap().as_deref(), Some("server {}"));
        assert!(files.read(dir.path()).await.is_err());
    }
}
