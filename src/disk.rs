use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;

use std::path::PathBuf;

use crate::config::CommonConfig;
use crate::error::StorageError;

/// Piece geometry of the shared file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PieceLayout {
    pub piece_size: u64,
    pub file_size: u64,
}

impl PieceLayout {
    pub fn new(piece_size: u64, file_size: u64) -> Self {
        Self { piece_size, file_size }
    }

    pub fn from_config(common: &CommonConfig) -> Self {
        Self::new(common.piece_size, common.file_size)
    }

    pub fn piece_count(&self) -> usize {
        self.file_size.div_ceil(self.piece_size) as usize
    }

    pub fn piece_offset(&self, index: usize) -> u64 {
        index as u64 * self.piece_size
    }

    pub fn piece_length(&self, index: usize) -> usize {
        let end = (self.piece_offset(index) + self.piece_size).min(self.file_size);
        (end - self.piece_offset(index)) as usize
    }

    fn check(&self, index: usize, length: Option<usize>) -> Result<(), StorageError> {
        let count = self.piece_count();
        if index >= count {
            return Err(StorageError::IndexOutOfRange { index, count });
        }

        if let Some(actual) = length {
            let expected = self.piece_length(index);
            if actual != expected {
                return Err(StorageError::WrongLength { index, expected, actual });
            }
        }

        Ok(())
    }
}

/// Where pieces live. Whole pieces only, addressed at `index * piece_size`.
#[derive(Debug)]
pub enum PieceStore {
    File(FileStore),
    Memory(MemoryStore),
}

impl PieceStore {
    pub fn layout(&self) -> PieceLayout {
        match self {
            PieceStore::File(store) => store.layout,
            PieceStore::Memory(store) => store.layout,
        }
    }

    pub async fn read_piece(&self, index: usize) -> Result<Bytes, StorageError> {
        match self {
            PieceStore::File(store) => store.read_piece(index).await,
            PieceStore::Memory(store) => store.read_piece(index).await,
        }
    }

    pub async fn write_piece(&self, index: usize, data: &[u8]) -> Result<(), StorageError> {
        match self {
            PieceStore::File(store) => store.write_piece(index, data).await,
            PieceStore::Memory(store) => store.write_piece(index, data).await,
        }
    }
}

impl From<FileStore> for PieceStore {
    fn from(store: FileStore) -> Self {
        PieceStore::File(store)
    }
}

impl From<MemoryStore> for PieceStore {
    fn from(store: MemoryStore) -> Self {
        PieceStore::Memory(store)
    }
}

/// The shared file on disk, e.g. `peer_1001/TheFile.dat`.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    layout: PieceLayout,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>, layout: PieceLayout) -> Self {
        Self {
            path: path.into(),
            layout,
        }
    }

    /// Fails unless the file exists with exactly the configured size.
    pub async fn verify_complete(&self) -> Result<(), StorageError> {
        let actual = tokio::fs::metadata(&self.path).await?.len();
        if actual != self.layout.file_size {
            return Err(StorageError::IncompleteFile {
                path: self.path.display().to_string(),
                expected: self.layout.file_size,
                actual,
            });
        }
        Ok(())
    }

    async fn read_piece(&self, index: usize) -> Result<Bytes, StorageError> {
        self.layout.check(index, None)?;

        let mut fd = tokio::fs::File::open(&self.path).await?;
        fd.seek(std::io::SeekFrom::Start(self.layout.piece_offset(index))).await?;

        let mut buffer = vec![0u8; self.layout.piece_length(index)];
        fd.read_exact(&mut buffer).await?;

        Ok(Bytes::from(buffer))
    }

    async fn write_piece(&self, index: usize, data: &[u8]) -> Result<(), StorageError> {
        self.layout.check(index, Some(data.len()))?;

        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }

        let mut fd = tokio::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
            .await?;

        fd.seek(std::io::SeekFrom::Start(self.layout.piece_offset(index))).await?;
        fd.write_all(data).await?;
        fd.flush().await?;

        tracing::trace!("wrote piece {} to {}", index, self.path.display());
        Ok(())
    }
}

/// Whole file kept in memory.
#[derive(Debug)]
pub struct MemoryStore {
    data: Mutex<Vec<u8>>,
    layout: PieceLayout,
}

impl MemoryStore {
    pub fn new(layout: PieceLayout) -> Self {
        Self {
            data: Mutex::new(vec![0; layout.file_size as usize]),
            layout,
        }
    }

    /// Pre-filled store; `data` is cut or zero-padded to the file size.
    pub fn with_data(layout: PieceLayout, mut data: Vec<u8>) -> Self {
        data.resize(layout.file_size as usize, 0);
        Self {
            data: Mutex::new(data),
            layout,
        }
    }

    pub async fn contents(&self) -> Vec<u8> {
        self.data.lock().await.clone()
    }

    async fn read_piece(&self, index: usize) -> Result<Bytes, StorageError> {
        self.layout.check(index, None)?;

        let start = self.layout.piece_offset(index) as usize;
        let end = start + self.layout.piece_length(index);

        Ok(Bytes::copy_from_slice(&self.data.lock().await[start..end]))
    }

    async fn write_piece(&self, index: usize, data: &[u8]) -> Result<(), StorageError> {
        self.layout.check(index, Some(data.len()))?;

        let start = self.layout.piece_offset(index) as usize;
        self.data.lock().await[start..start + data.len()].copy_from_slice(data);

        Ok(())
    }
}
