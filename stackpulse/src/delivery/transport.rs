//! Upload transports
//!
//! The queue only knows how to hand a finished [`UploadRequest`] to something
//! implementing [`Transport`]. Encoding, compression, authentication and the
//! network itself belong to the implementation.

use async_trait::async_trait;
use log::info;
use stackpulse_common::UploadRequest;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::domain::TransportError;

/// Delivers one batched upload to the collector
#[async_trait]
pub trait Transport: Send + Sync {
    /// Ship `request`. Any error leaves the batch queued for a later retry.
    async fn upload(&self, request: &UploadRequest) -> Result<(), TransportError>;
}

/// Logs a one-line summary of every upload and always succeeds
#[derive(Debug, Default)]
pub struct LogTransport;

#[async_trait]
impl Transport for LogTransport {
    async fn upload(&self, request: &UploadRequest) -> Result<(), TransportError> {
        info!(
            "upload: app={} host={} run={} messages={} labels={}",
            request.app_name,
            request.host_name,
            request.run_id,
            request.payload.messages.len(),
            request.payload.labels.len()
        );
        Ok(())
    }
}

/// Appends every upload as one JSON document per line
#[derive(Debug)]
pub struct JsonLinesTransport {
    path: PathBuf,
    /// Serializes appends so lines never interleave
    write_lock: Mutex<()>,
}

impl JsonLinesTransport {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), write_lock: Mutex::new(()) }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Transport for JsonLinesTransport {
    async fn upload(&self, request: &UploadRequest) -> Result<(), TransportError> {
        let mut line = serde_json::to_vec(request)?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}
