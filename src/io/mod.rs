//! The async page I/O contract: a two-call interface
//! (`submit_pread`/`submit_pwrite`) that `TethysStore` drives to fetch a
//! list's two candidate pages concurrently, backed here by dispatch onto
//! `tokio::task::spawn_blocking`.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::error::{Result, SseError};

/// A page-aligned, concurrent-read/single-writer scheduler over one file.
/// `submit_pread`/`submit_pwrite` return immediately with a handle the
/// caller joins once both of a list's two page fetches are in flight.
pub trait PageScheduler: Send + Sync {
    fn submit_pread(&self, offset: u64, len: usize) -> JoinHandle<Result<Vec<u8>>>;
    fn submit_pwrite(&self, offset: u64, data: Vec<u8>) -> JoinHandle<Result<()>>;
}

/// Dispatches each read/write onto `tokio`'s blocking thread pool, reopening
/// the file per task (cheap relative to the page I/O itself, and avoids a
/// shared file-position race since every call seeks explicitly).
pub struct ThreadPoolScheduler {
    path: Arc<PathBuf>,
}

impl ThreadPoolScheduler {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self { path: Arc::new(path.as_ref().to_path_buf()) }
    }
}

impl PageScheduler for ThreadPoolScheduler {
    fn submit_pread(&self, offset: u64, len: usize) -> JoinHandle<Result<Vec<u8>>> {
        let path = Arc::clone(&self.path);
        tokio::task::spawn_blocking(move || {
            let mut file = File::open(path.as_path()).map_err(SseError::IoFailure)?;
            file.seek(SeekFrom::Start(offset)).map_err(SseError::IoFailure)?;
            let mut buf = vec![0u8; len];
            file.read_exact(&mut buf).map_err(SseError::IoFailure)?;
            Ok(buf)
        })
    }

    fn submit_pwrite(&self, offset: u64, data: Vec<u8>) -> JoinHandle<Result<()>> {
        let path = Arc::clone(&self.path);
        tokio::task::spawn_blocking(move || {
            let mut file = std::fs::OpenOptions::new()
                .write(true)
                .create(true)
                .open(path.as_path())
                .map_err(SseError::IoFailure)?;
            file.seek(SeekFrom::Start(offset)).map_err(SseError::IoFailure)?;
            file.write_all(&data).map_err(SseError::IoFailure)?;
            Ok(())
        })
    }
}
