//! File-operations engine of a storage server.
//!
//! All operations resolve paths beneath one local root directory and run
//! under a single mutex — the naming server already serializes conflicting
//! access at path granularity, so per-file locking would buy nothing here.

use std::io::SeekFrom;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::debug;

use crate::path::Path;
use crate::proto::{Command, Storage, StorageError, StorageStub};

/// Bytes pulled per remote read while replicating a file.
const COPY_CHUNK: u32 = 64 * 1024;

pub struct StorageEngine {
    root: PathBuf,
    guard: Mutex<()>,
}

impl StorageEngine {
    pub fn new(root: PathBuf) -> Self {
        StorageEngine { root, guard: Mutex::new(()) }
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        path.to_local(&self.root)
    }

    /// Size of an existing regular file; `NotFound` otherwise. The root and
    /// every other directory fail the same way.
    async fn file_size(&self, path: &Path) -> Result<u64, StorageError> {
        let local = self.resolve(path);
        let metadata = tokio::fs::metadata(&local)
            .await
            .map_err(|_| StorageError::NotFound(path.to_string()))?;
        if !metadata.is_file() {
            return Err(StorageError::NotFound(format!("{path} is not a file")));
        }
        Ok(metadata.len())
    }

    async fn create_locked(&self, path: &Path) -> Result<bool, StorageError> {
        if path.is_root() {
            return Ok(false);
        }
        let local = self.resolve(path);
        if let Some(parent) = local.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| StorageError::Io(err.to_string()))?;
        }
        match OpenOptions::new().write(true).create_new(true).open(&local).await {
            Ok(_) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
            Err(err) => Err(StorageError::Io(err.to_string())),
        }
    }

    async fn delete_locked(&self, path: &Path) -> Result<bool, StorageError> {
        if path.is_root() {
            return Ok(false);
        }
        let local = self.resolve(path);
        let metadata = match tokio::fs::metadata(&local).await {
            Ok(metadata) => metadata,
            Err(_) => return Ok(false),
        };
        if metadata.is_dir() {
            tokio::fs::remove_dir_all(&local)
                .await
                .map_err(|err| StorageError::Io(err.to_string()))?;
        } else {
            tokio::fs::remove_file(&local)
                .await
                .map_err(|err| StorageError::Io(err.to_string()))?;
        }
        Ok(true)
    }
}

#[async_trait]
impl Storage for StorageEngine {
    async fn size(&self, path: &Path) -> Result<u64, StorageError> {
        let _io = self.guard.lock().await;
        self.file_size(path).await
    }

    async fn read(&self, path: &Path, offset: u64, length: u32) -> Result<Vec<u8>, StorageError> {
        let _io = self.guard.lock().await;
        let size = self.file_size(path).await?;
        let end = offset
            .checked_add(u64::from(length))
            .ok_or_else(|| StorageError::OutOfBounds("offset + length overflows".into()))?;
        if end > size {
            return Err(StorageError::OutOfBounds(format!(
                "read of {length} bytes at offset {offset} escapes {size}-byte file {path}"
            )));
        }
        let mut file = File::open(self.resolve(path))
            .await
            .map_err(|err| StorageError::Io(err.to_string()))?;
        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(|err| StorageError::Io(err.to_string()))?;
        let mut data = vec![0u8; length as usize];
        file.read_exact(&mut data).await.map_err(|err| StorageError::Io(err.to_string()))?;
        Ok(data)
    }

    async fn write(&self, path: &Path, offset: u64, data: Vec<u8>) -> Result<(), StorageError> {
        let _io = self.guard.lock().await;
        self.file_size(path).await?;
        let mut file = OpenOptions::new()
            .write(true)
            .open(self.resolve(path))
            .await
            .map_err(|err| StorageError::Io(err.to_string()))?;
        // Seeking past the end materializes the gap: the host filesystem
        // backfills and the size grows to offset + data.len().
        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(|err| StorageError::Io(err.to_string()))?;
        file.write_all(&data).await.map_err(|err| StorageError::Io(err.to_string()))?;
        file.flush().await.map_err(|err| StorageError::Io(err.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl Command for StorageEngine {
    async fn create(&self, path: &Path) -> Result<bool, StorageError> {
        let _io = self.guard.lock().await;
        self.create_locked(path).await
    }

    async fn delete(&self, path: &Path) -> Result<bool, StorageError> {
        let _io = self.guard.lock().await;
        self.delete_locked(path).await
    }

    async fn copy(&self, path: &Path, source: StorageStub) -> Result<bool, StorageError> {
        let size = source.size(path).await?;
        let _io = self.guard.lock().await;
        debug!(%path, %source, size, "pulling file from peer");
        self.delete_locked(path).await?;
        self.create_locked(path).await?;
        let mut file = OpenOptions::new()
            .write(true)
            .open(self.resolve(path))
            .await
            .map_err(|err| StorageError::Io(err.to_string()))?;
        let mut offset = 0u64;
        while offset < size {
            let length = u64::min(u64::from(COPY_CHUNK), size - offset) as u32;
            let chunk = source.read(path, offset, length).await?;
            offset += chunk.len() as u64;
            file.write_all(&chunk).await.map_err(|err| StorageError::Io(err.to_string()))?;
        }
        file.flush().await.map_err(|err| StorageError::Io(err.to_string()))?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(s: &str) -> Path {
        s.parse().unwrap()
    }

    async fn engine_with(files: &[(&str, &[u8])]) -> (tempfile::TempDir, StorageEngine) {
        let dir = tempfile::tempdir().unwrap();
        for (name, contents) in files {
            let local = path(name).to_local(dir.path());
            if let Some(parent) = local.parent() {
                tokio::fs::create_dir_all(parent).await.unwrap();
            }
            tokio::fs::write(local, contents).await.unwrap();
        }
        let engine = StorageEngine::new(dir.path().to_path_buf());
        (dir, engine)
    }

    #[tokio::test]
    async fn size_and_read_whole_file() {
        let (_dir, engine) = engine_with(&[("/a/b.txt", b"hello")]).await;
        let file = path("/a/b.txt");
        assert_eq!(engine.size(&file).await.unwrap(), 5);
        assert_eq!(engine.read(&file, 0, 5).await.unwrap(), b"hello");
        assert_eq!(engine.read(&file, 1, 3).await.unwrap(), b"ell");
    }

    #[tokio::test]
    async fn missing_files_and_directories_are_not_found() {
        let (_dir, engine) = engine_with(&[("/a/b.txt", b"x")]).await;
        for target in ["/absent", "/a", "/"] {
            assert!(matches!(
                engine.size(&path(target)).await,
                Err(StorageError::NotFound(_))
            ));
        }
    }

    #[tokio::test]
    async fn read_bounds_are_enforced() {
        let (_dir, engine) = engine_with(&[("/f", b"12345")]).await;
        let file = path("/f");
        // a zero-length read at the end succeeds
        assert_eq!(engine.read(&file, 5, 0).await.unwrap(), b"");
        assert!(matches!(
            engine.read(&file, 5, 1).await,
            Err(StorageError::OutOfBounds(_))
        ));
        assert!(matches!(
            engine.read(&file, 0, 6).await,
            Err(StorageError::OutOfBounds(_))
        ));
    }

    #[tokio::test]
    async fn write_overwrites_and_extends() {
        let (_dir, engine) = engine_with(&[("/f", b"12345")]).await;
        let file = path("/f");
        engine.write(&file, 1, b"xy".to_vec()).await.unwrap();
        assert_eq!(engine.read(&file, 0, 5).await.unwrap(), b"1xy45");
        engine.write(&file, 4, b"last".to_vec()).await.unwrap();
        assert_eq!(engine.size(&file).await.unwrap(), 8);
    }

    #[tokio::test]
    async fn write_past_the_end_materializes_the_gap() {
        let (_dir, engine) = engine_with(&[("/f", b"")]).await;
        let file = path("/f");
        engine.write(&file, 5, b"tail".to_vec()).await.unwrap();
        assert_eq!(engine.size(&file).await.unwrap(), 9);
        assert_eq!(engine.read(&file, 0, 5).await.unwrap(), vec![0u8; 5]);
    }

    #[tokio::test]
    async fn write_requires_an_existing_file() {
        let (_dir, engine) = engine_with(&[]).await;
        assert!(matches!(
            engine.write(&path("/absent"), 0, b"x".to_vec()).await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn create_makes_parents_and_rejects_duplicates() {
        let (dir, engine) = engine_with(&[]).await;
        let file = path("/deep/nested/file");
        assert!(engine.create(&file).await.unwrap());
        assert!(file.to_local(dir.path()).is_file());
        assert!(!engine.create(&file).await.unwrap());
        assert!(!engine.create(&Path::root()).await.unwrap());
    }

    #[tokio::test]
    async fn delete_is_recursive_and_spares_the_root() {
        let (dir, engine) = engine_with(&[("/a/b/c.txt", b"x"), ("/a/d.txt", b"y")]).await;
        assert!(engine.delete(&path("/a")).await.unwrap());
        assert!(!path("/a").to_local(dir.path()).exists());
        assert!(!engine.delete(&path("/a")).await.unwrap());
        assert!(!engine.delete(&Path::root()).await.unwrap());
        assert!(dir.path().exists());
    }
}
