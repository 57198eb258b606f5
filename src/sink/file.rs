//! File-backed sink

use super::{SinkError, SinkResult, StreamingSink};
use async_trait::async_trait;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};

/// Ordered writer over a file, with an explicit close
pub struct FileSink {
    path: PathBuf,
    file: Option<File>,
    bytes_written: u64,
}

impl FileSink {
    /// Open `path` for writing, truncating it unless `keep_existing_data`
    pub async fn create(path: &Path, keep_existing_data: bool) -> SinkResult<Self> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(!keep_existing_data)
            .open(path)
            .await?;
        tracing::debug!("File sink opened: {:?}", path);
        Ok(Self {
            path: path.to_path_buf(),
            file: Some(file),
            bytes_written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn is_closed(&self) -> bool {
        self.file.is_none()
    }

    fn file(&mut self) -> SinkResult<&mut File> {
        self.file.as_mut().ok_or(SinkError::Closed)
    }

    /// Move the write cursor
    pub async fn seek(&mut self, position: u64) -> SinkResult<()> {
        self.file()?.seek(SeekFrom::Start(position)).await?;
        Ok(())
    }

    /// Resize the file to `size` bytes
    pub async fn truncate(&mut self, size: u64) -> SinkResult<()> {
        let file = self.file()?;
        file.flush().await?;
        file.set_len(size).await?;
        Ok(())
    }
}

#[async_trait]
impl StreamingSink for FileSink {
    async fn write(&mut self, chunk: &[u8]) -> SinkResult<()> {
        self.file()?.write_all(chunk).await?;
        self.bytes_written += chunk.len() as u64;
        Ok(())
    }

    async fn close(&mut self) -> SinkResult<()> {
        let mut file = self.file.take().ok_or(SinkError::Closed)?;
        file.flush().await?;
        file.sync_all().await?;
        tracing::info!("File sink closed: {:?} ({} bytes)", self.path, self.bytes_written);
        Ok(())
    }

    fn destination(&self) -> String {
        self.path.display().to_string()
    }
}
