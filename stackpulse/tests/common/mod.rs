//! Shared fixtures for the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use stackpulse::domain::TransportError;
use stackpulse::Transport;
use stackpulse_common::{MetricRecord, UploadRequest};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

/// Keeps every upload in memory; rejects them while `failing` is set
#[derive(Default)]
pub struct CapturingTransport {
    pub failing: AtomicBool,
    delay_ms: AtomicU64,
    uploads: Mutex<Vec<UploadRequest>>,
}

impl CapturingTransport {
    pub fn uploads(&self) -> Vec<UploadRequest> {
        self.uploads.lock().clone()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Make every upload take this long before it is accepted
    pub fn set_upload_delay(&self, delay: Duration) {
        self.delay_ms.store(u64::try_from(delay.as_millis()).unwrap(), Ordering::SeqCst);
    }

    /// Every metric record delivered so far, in upload order
    pub fn metrics(&self) -> Vec<MetricRecord> {
        self.uploads
            .lock()
            .iter()
            .flat_map(|u| u.payload.messages.iter())
            .filter(|m| m.topic == stackpulse_common::TOPIC_METRIC)
            .filter_map(|m| serde_json::from_value(m.content.clone()).ok())
            .collect()
    }
}

#[async_trait]
impl Transport for CapturingTransport {
    async fn upload(&self, request: &UploadRequest) -> Result<(), TransportError> {
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(TransportError::Rejected("collector unavailable".to_string()));
        }
        self.uploads.lock().push(request.clone());
        Ok(())
    }
}
