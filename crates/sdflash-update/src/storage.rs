//! Removable storage access
//!
//! Firmware images and the manifest are addressed by absolute paths rooted at
//! a single mount point. [`FsStorage`] serves them from a directory through
//! `tokio::fs`; [`MemoryStorage`] keeps them in memory for hardware-free runs.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::AsyncReadExt;
use tracing::{debug, info};

use sdflash_catalog::Catalog;

use crate::error::{FlashError, StorageError};

/// Sequential reader over one image file
#[async_trait]
pub trait ImageReader: Send {
    /// Total length of the file in bytes
    fn size(&self) -> u64;

    /// Read up to `buf.len()` bytes, returning 0 at end of file
    async fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize>;
}

/// Storage medium holding firmware images
#[async_trait]
pub trait FirmwareStorage: Send + Sync {
    /// Open a file for sequential reading
    async fn open(&self, path: &str) -> Result<Box<dyn ImageReader>, StorageError>;

    /// Release the medium so it can be removed. Later opens fail with
    /// [`StorageError::Unavailable`].
    async fn release(&self) -> Result<(), StorageError>;

    /// Whether the medium is mounted
    fn is_available(&self) -> bool;

    /// Read a whole file into memory
    async fn read_to_end(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        let mut reader = self.open(path).await?;
        let capacity = usize::try_from(reader.size()).unwrap_or(0);
        let mut data = Vec::with_capacity(capacity);
        let mut buf = [0u8; 4096];
        loop {
            let n = reader
                .read(&mut buf)
                .await
                .map_err(|source| StorageError::IoError {
                    path: path.to_string(),
                    source,
                })?;
            match buf.get(..n) {
                Some(chunk) if !chunk.is_empty() => data.extend_from_slice(chunk),
                _ => break,
            }
        }
        Ok(data)
    }
}

/// Read and parse the manifest from storage.
///
/// # Errors
///
/// Returns a storage error if the manifest cannot be read and
/// [`FlashError::ManifestParse`] if it is not a valid manifest.
pub async fn load_catalog(
    storage: &dyn FirmwareStorage,
    manifest_path: &str,
) -> Result<Catalog, FlashError> {
    if !storage.is_available() {
        return Err(FlashError::StorageUnavailable);
    }
    let bytes = storage.read_to_end(manifest_path).await?;
    Ok(Catalog::load(&bytes)?)
}

/// Storage backed by a directory on the host filesystem
#[derive(Debug)]
pub struct FsStorage {
    root: PathBuf,
    mounted: AtomicBool,
}

impl FsStorage {
    /// Serve files from `root`. Manifest path `/a.bin` maps to `root/a.bin`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            mounted: AtomicBool::new(true),
        }
    }

    /// Mark the medium as mounted again after a release.
    pub fn remount(&self) {
        self.mounted.store(true, Ordering::Release);
    }

    /// Mount point
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, StorageError> {
        let mut resolved = self.root.clone();
        let mut saw_root = false;
        for component in Path::new(path).components() {
            match component {
                Component::RootDir => saw_root = true,
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                Component::ParentDir | Component::Prefix(_) => {
                    return Err(StorageError::InvalidPath(path.to_string()));
                }
            }
        }
        if !saw_root || resolved == self.root {
            return Err(StorageError::InvalidPath(path.to_string()));
        }
        Ok(resolved)
    }
}

struct FsReader {
    file: tokio::fs::File,
    size: u64,
}

#[async_trait]
impl ImageReader for FsReader {
    fn size(&self) -> u64 {
        self.size
    }

    async fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.file.read(buf).await
    }
}

#[async_trait]
impl FirmwareStorage for FsStorage {
    async fn open(&self, path: &str) -> Result<Box<dyn ImageReader>, StorageError> {
        if !self.is_available() {
            return Err(StorageError::Unavailable);
        }
        let full_path = self.resolve(path)?;
        debug!(path = %path, full_path = ?full_path, "Opening image");

        let file = match tokio::fs::File::open(&full_path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(path.to_string()));
            }
            Err(source) => {
                return Err(StorageError::IoError {
                    path: path.to_string(),
                    source,
                });
            }
        };
        let metadata = file.metadata().await.map_err(|source| StorageError::IoError {
            path: path.to_string(),
            source,
        })?;
        if !metadata.is_file() {
            return Err(StorageError::NotFound(path.to_string()));
        }

        Ok(Box::new(FsReader {
            file,
            size: metadata.len(),
        }))
    }

    async fn release(&self) -> Result<(), StorageError> {
        if self.mounted.swap(false, Ordering::AcqRel) {
            info!(root = ?self.root, "Storage released");
        }
        Ok(())
    }

    fn is_available(&self) -> bool {
        self.mounted.load(Ordering::Acquire)
    }
}

/// In-memory storage for tests and hardware-free environments
#[derive(Debug, Default)]
pub struct MemoryStorage {
    files: RwLock<HashMap<String, Arc<[u8]>>>,
    released: AtomicBool,
}

impl MemoryStorage {
    /// Create an empty, mounted medium
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a file
    pub fn insert(&self, path: impl Into<String>, data: impl Into<Vec<u8>>) {
        let data: Vec<u8> = data.into();
        self.files.write().insert(path.into(), Arc::from(data));
    }

    /// Builder-style variant of [`MemoryStorage::insert`]
    #[must_use]
    pub fn with_file(self, path: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        self.insert(path, data);
        self
    }

    /// Remove a file
    pub fn remove(&self, path: &str) -> bool {
        self.files.write().remove(path).is_some()
    }
}

struct MemoryReader {
    data: Arc<[u8]>,
    position: usize,
}

#[async_trait]
impl ImageReader for MemoryReader {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    async fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let remaining = self.data.get(self.position..).unwrap_or_default();
        let n = remaining.len().min(buf.len());
        if let (Some(dst), Some(src)) = (buf.get_mut(..n), remaining.get(..n)) {
            dst.copy_from_slice(src);
        }
        self.position = self.position.saturating_add(n);
        Ok(n)
    }
}

#[async_trait]
impl FirmwareStorage for MemoryStorage {
    async fn open(&self, path: &str) -> Result<Box<dyn ImageReader>, StorageError> {
        if !self.is_available() {
            return Err(StorageError::Unavailable);
        }
        let data = self
            .files
            .read()
            .get(path)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(path.to_string()))?;
        Ok(Box::new(MemoryReader { data, position: 0 }))
    }

    async fn release(&self) -> Result<(), StorageError> {
        self.released.store(true, Ordering::Release);
        Ok(())
    }

    fn is_available(&self) -> bool {
        !self.released.load(Ordering::Acquire)
    }
}
