use crate::traits::{StagingStorage, StorageError, StorageResult};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// Local filesystem staging backend
#[derive(Clone)]
pub struct LocalStaging {
    root: PathBuf,
}

impl LocalStaging {
    /// Create the staging root if it does not exist.
    pub async fn new(root: impl Into<PathBuf>) -> StorageResult<Self> {
        let root = root.into();

        fs::create_dir_all(&root).await.map_err(|e| {
            StorageError::ConfigError(format!(
                "Failed to create staging directory {}: {}",
                root.display(),
                e
            ))
        })?;

        Ok(LocalStaging { root })
    }

    fn session_dir(&self, session_id: Uuid) -> PathBuf {
        self.root.join(session_id.to_string())
    }

    fn file_path(&self, session_id: Uuid, file_id: Uuid) -> PathBuf {
        self.session_dir(session_id).join(file_id.to_string())
    }

    fn chunk_path(&self, session_id: Uuid, file_id: Uuid, index: u32) -> PathBuf {
        self.session_dir(session_id)
            .join(format!("{}.chunk.{}", file_id, index))
    }

    async fn write_atomic(&self, path: &PathBuf, data: &[u8]) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Write to a temp name then rename, so readers never see a torn file.
        let tmp = path.with_extension("part");
        let mut file = fs::File::create(&tmp).await?;
        file.write_all(data).await?;
        file.flush().await?;
        drop(file);
        fs::rename(&tmp, path).await?;
        Ok(())
    }
}

#[async_trait]
impl StagingStorage for LocalStaging {
    async fn store_file(
        &self,
        session_id: Uuid,
        file_id: Uuid,
        data: Bytes,
    ) -> StorageResult<String> {
        let path = self.file_path(session_id, file_id);
        self.write_atomic(&path, &data).await?;

        tracing::debug!(
            session_id = %session_id,
            file_id = %file_id,
            bytes = data.len(),
            "Staged file"
        );

        Ok(path.to_string_lossy().into_owned())
    }

    async fn read_file(&self, session_id: Uuid, file_id: Uuid) -> StorageResult<Bytes> {
        let path = self.file_path(session_id, file_id);
        match fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(path.to_string_lossy().into_owned()))
            }
            Err(e) => Err(StorageError::ReadFailed(e.to_string())),
        }
    }

    async fn read_path(&self, path: &str) -> StorageResult<Bytes> {
        match fs::read(path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(path.to_string()))
            }
            Err(e) => Err(StorageError::ReadFailed(e.to_string())),
        }
    }

    async fn store_chunk(
        &self,
        session_id: Uuid,
        file_id: Uuid,
        index: u32,
        data: Bytes,
    ) -> StorageResult<()> {
        let path = self.chunk_path(session_id, file_id, index);
        self.write_atomic(&path, &data).await
    }

    async fn read_chunk(
        &self,
        session_id: Uuid,
        file_id: Uuid,
        index: u32,
    ) -> StorageResult<Bytes> {
        let path = self.chunk_path(session_id, file_id, index);
        match fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(path.to_string_lossy().into_owned()))
            }
            Err(e) => Err(StorageError::ReadFailed(e.to_string())),
        }
    }

    async fn chunk_exists(
        &self,
        session_id: Uuid,
        file_id: Uuid,
        index: u32,
    ) -> StorageResult<bool> {
        let path = self.chunk_path(session_id, file_id, index);
        Ok(fs::try_exists(&path).await?)
    }

    async fn delete_file(&self, session_id: Uuid, file_id: Uuid) -> StorageResult<()> {
        let file_path = self.file_path(session_id, file_id);
        match fs::remove_file(&file_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(StorageError::DeleteFailed(e.to_string())),
        }

        self.delete_chunks(session_id, file_id).await
    }

    async fn delete_chunks(&self, session_id: Uuid, file_id: Uuid) -> StorageResult<()> {
        // Chunks carry the file id prefix; sweep the session dir for them.
        let session_dir = self.session_dir(session_id);
        let prefix = format!("{}.chunk.", file_id);
        let mut entries = match fs::read_dir(&session_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(StorageError::DeleteFailed(e.to_string())),
        };
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_name().to_string_lossy().starts_with(&prefix) {
                if let Err(e) = fs::remove_file(entry.path()).await {
                    tracing::warn!(path = %entry.path().display(), error = %e, "Failed to remove staged chunk");
                }
            }
        }
        Ok(())
    }

    async fn cleanup_session(&self, session_id: Uuid) -> StorageResult<()> {
        let dir = self.session_dir(session_id);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::DeleteFailed(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn staging() -> (tempfile::TempDir, LocalStaging) {
        let dir = tempfile::tempdir().unwrap();
        let staging = LocalStaging::new(dir.path()).await.unwrap();
        (dir, staging)
    }

    #[tokio::test]
    async fn store_and_read_file() {
        let (_dir, staging) = staging().await;
        let session_id = Uuid::new_v4();
        let file_id = Uuid::new_v4();

        let path = staging
            .store_file(session_id, file_id, Bytes::from_static(b"hello"))
            .await
            .unwrap();
        assert!(path.contains(&session_id.to_string()));

        let data = staging.read_file(session_id, file_id).await.unwrap();
        assert_eq!(&data[..], b"hello");

        let data = staging.read_path(&path).await.unwrap();
        assert_eq!(&data[..], b"hello");
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let (_dir, staging) = staging().await;
        let err = staging
            .read_file(Uuid::new_v4(), Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn chunks_round_trip_and_exist() {
        let (_dir, staging) = staging().await;
        let session_id = Uuid::new_v4();
        let file_id = Uuid::new_v4();

        assert!(!staging.chunk_exists(session_id, file_id, 0).await.unwrap());

        staging
            .store_chunk(session_id, file_id, 0, Bytes::from_static(b"part0"))
            .await
            .unwrap();
        staging
            .store_chunk(session_id, file_id, 3, Bytes::from_static(b"part3"))
            .await
            .unwrap();

        assert!(staging.chunk_exists(session_id, file_id, 0).await.unwrap());
        assert!(!staging.chunk_exists(session_id, file_id, 1).await.unwrap());

        let data = staging.read_chunk(session_id, file_id, 3).await.unwrap();
        assert_eq!(&data[..], b"part3");
    }

    #[tokio::test]
    async fn delete_file_removes_file_and_chunks() {
        let (_dir, staging) = staging().await;
        let session_id = Uuid::new_v4();
        let file_id = Uuid::new_v4();
        let other_file = Uuid::new_v4();

        staging
            .store_file(session_id, file_id, Bytes::from_static(b"whole"))
            .await
            .unwrap();
        staging
            .store_chunk(session_id, file_id, 0, Bytes::from_static(b"c0"))
            .await
            .unwrap();
        staging
            .store_chunk(session_id, other_file, 0, Bytes::from_static(b"keep"))
            .await
            .unwrap();

        staging.delete_file(session_id, file_id).await.unwrap();

        assert!(staging.read_file(session_id, file_id).await.is_err());
        assert!(!staging.chunk_exists(session_id, file_id, 0).await.unwrap());
        assert!(staging
            .chunk_exists(session_id, other_file, 0)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn cleanup_session_is_idempotent() {
        let (_dir, staging) = staging().await;
        let session_id = Uuid::new_v4();
        staging
            .store_file(session_id, Uuid::new_v4(), Bytes::from_static(b"x"))
            .await
            .unwrap();

        staging.cleanup_session(session_id).await.unwrap();
        staging.cleanup_session(session_id).await.unwrap();
    }
}
