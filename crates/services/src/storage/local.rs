//! Local filesystem backend. Works for both bare directories and mounted
//! volumes.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use super::{StorageBackend, StorageError};

pub struct LocalStorage {
    base_path: PathBuf,
}

impl LocalStorage {
    pub fn new(base_path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let base_path = base_path.into();
        std::fs::create_dir_all(&base_path)?;
        Ok(Self { base_path })
    }

    fn full_path(&self, path: &str) -> PathBuf {
        self.base_path.join(path)
    }
}

#[async_trait]
impl StorageBackend for LocalStorage {
    async fn save(&self, data: &[u8], path: &str) -> Result<String, StorageError> {
        let full = self.full_path(path);
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&full, data).await?;
        debug!("Saved file to {}", full.display());
        Ok(path.to_string())
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        Ok(tokio::fs::read(self.full_path(path)).await?)
    }

    async fn delete(&self, path: &str) -> Result<bool, StorageError> {
        match tokio::fs::remove_file(self.full_path(path)).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    async fn exists(&self, path: &str) -> Result<bool, StorageError> {
        Ok(tokio::fs::try_exists(self.full_path(path)).await?)
    }

    fn public_url(&self, path: &str) -> String {
        format!("/storage/{path}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_read_delete_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path()).unwrap();

        let path = "thumbnails/guild_1/clip_small.webp";
        storage.save(b"webp-bytes", path).await.unwrap();

        assert!(storage.exists(path).await.unwrap());
        assert_eq!(storage.read(path).await.unwrap(), b"webp-bytes");

        assert!(storage.delete(path).await.unwrap());
        assert!(!storage.exists(path).await.unwrap());
    }

    #[tokio::test]
    async fn delete_of_missing_file_returns_false() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path()).unwrap();
        assert!(!storage.delete("nope/missing.webp").await.unwrap());
    }

    #[tokio::test]
    async fn save_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path()).unwrap();
        storage.save(b"x", "a/b/c/d.webp").await.unwrap();
        assert!(storage.exists("a/b/c/d.webp").await.unwrap());
    }

    #[test]
    fn public_url_is_prefixed_path() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path()).unwrap();
        assert_eq!(
            storage.public_url("thumbnails/guild_1/x_large.webp"),
            "/storage/thumbnails/guild_1/x_large.webp"
        );
    }
}
