//! Outbound message queue
//!
//! ```text
//!   reporters ──enqueue──► [ m1 m2 m3 ... ]  (FIFO, parking_lot::Mutex)
//!                                │
//!                 flush timer ───┤  expire() drops entries older than the window
//!                                ▼
//!                      detach whole batch ──► Transport::upload
//!                                │
//!                ok: backoff = 0 │ err: batch goes back in FRONT of anything
//!                                │      queued meanwhile, backoff grows
//! ```
//!
//! Backoff starts at 0, becomes [`MIN_BACKOFF`] on the first failure and then
//! doubles while the doubled value stays below [`MAX_BACKOFF`]. The flush
//! timer consults it; a direct [`DeliveryQueue::flush`] call always attempts.

use parking_lot::Mutex;
use serde::Serialize;
use stackpulse_common::{MessageRecord, UploadPayload, UploadRequest};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, MissedTickBehavior};

use super::transport::Transport;
use crate::diagnostics::Diagnostics;
use crate::domain::{TransportError, UnixTime};
use crate::{agent_error, agent_log};

/// Backoff after the first failed upload
pub const MIN_BACKOFF: Duration = Duration::from_secs(10);

/// Backoff never doubles to or past this
pub const MAX_BACKOFF: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq)]
pub enum MessageBody {
    /// Nested JSON content, uploaded as the message content
    Structured(serde_json::Value),
    /// Pre-flattened values, uploaded as labels only
    Flattened(Vec<String>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub topic: String,
    pub body: MessageBody,
    pub added_at: UnixTime,
}

impl Message {
    #[must_use]
    pub fn new(topic: impl Into<String>, body: MessageBody) -> Self {
        Self { topic: topic.into(), body, added_at: UnixTime::now() }
    }
}

/// Per-process fields stamped on every upload
#[derive(Debug, Clone, Default)]
pub struct Envelope {
    pub agent_version: String,
    pub app_name: String,
    pub app_version: String,
    pub app_environment: String,
    pub host_name: String,
    pub process_id: String,
    pub build_id: String,
    pub run_id: String,
    pub run_ts: u64,
}

impl Envelope {
    fn request(&self, payload: UploadPayload) -> UploadRequest {
        UploadRequest {
            runtime_type: stackpulse_common::RUNTIME_TYPE.to_string(),
            agent_version: self.agent_version.clone(),
            app_name: self.app_name.clone(),
            app_version: self.app_version.clone(),
            app_environment: self.app_environment.clone(),
            host_name: self.host_name.clone(),
            process_id: self.process_id.clone(),
            build_id: self.build_id.clone(),
            run_id: self.run_id.clone(),
            run_ts: self.run_ts,
            sent_at: UnixTime::now().as_secs(),
            payload,
        }
    }
}

#[derive(Debug, Default)]
struct BackoffState {
    backoff: Duration,
    last_attempt: Option<Instant>,
}

pub struct DeliveryQueue {
    queue: Mutex<Vec<Message>>,
    backoff: Mutex<BackoffState>,
    /// One upload in flight at a time
    flush_lock: tokio::sync::Mutex<()>,
    transport: Arc<dyn Transport>,
    envelope: Envelope,
    expiry_secs: u64,
    diagnostics: Diagnostics,
}

impl DeliveryQueue {
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        envelope: Envelope,
        expiry_secs: u64,
        diagnostics: Diagnostics,
    ) -> Self {
        Self {
            queue: Mutex::new(Vec::new()),
            backoff: Mutex::new(BackoffState::default()),
            flush_lock: tokio::sync::Mutex::new(()),
            transport,
            envelope,
            expiry_secs,
            diagnostics,
        }
    }

    pub fn push(&self, message: Message) {
        self.queue.lock().push(message);
    }

    pub fn enqueue(&self, topic: &str, content: serde_json::Value) {
        self.push(Message::new(topic, MessageBody::Structured(content)));
    }

    pub fn enqueue_flat(&self, topic: &str, labels: Vec<String>) {
        self.push(Message::new(topic, MessageBody::Flattened(labels)));
    }

    /// Serialize `record` and enqueue it as structured content
    ///
    /// # Errors
    /// Returns an error if `record` cannot be represented as JSON
    pub fn enqueue_record<T: Serialize>(&self, topic: &str, record: &T) -> Result<(), serde_json::Error> {
        let content = serde_json::to_value(record)?;
        self.enqueue(topic, content);
        Ok(())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Snapshot of the queued messages in order
    #[must_use]
    pub fn pending(&self) -> Vec<Message> {
        self.queue.lock().clone()
    }

    #[must_use]
    pub fn backoff(&self) -> Duration {
        self.backoff.lock().backoff
    }

    #[must_use]
    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    /// Whether the advisory backoff since the last attempt has elapsed
    #[must_use]
    pub fn ready_to_flush(&self) -> bool {
        let state = self.backoff.lock();
        state.last_attempt.map_or(true, |at| at.elapsed() >= state.backoff)
    }

    /// Drop every message added before the expiry window, wherever it sits
    pub fn expire(&self) -> usize {
        self.expire_before(UnixTime::now().minus_secs(self.expiry_secs))
    }

    fn expire_before(&self, cutoff: UnixTime) -> usize {
        let mut queue = self.queue.lock();
        let before = queue.len();
        queue.retain(|m| m.added_at >= cutoff);
        let dropped = before - queue.len();
        if dropped > 0 {
            agent_log!(self.diagnostics, "Dropped {} expired messages", dropped);
        }
        dropped
    }

    /// Upload everything currently queued as one batch
    ///
    /// Returns the number of messages delivered.
    ///
    /// Cancelling the returned future mid-upload also puts the batch back.
    ///
    /// # Errors
    /// Returns the transport error; the batch is then back at the head of the queue
    pub async fn flush(&self) -> Result<usize, TransportError> {
        let _in_flight = self.flush_lock.lock().await;

        let outgoing = Batch { queue: &self.queue, messages: std::mem::take(&mut *self.queue.lock()), delivered: false };
        if outgoing.messages.is_empty() {
            return Ok(0);
        }

        let request = self.envelope.request(payload_for(&outgoing.messages));
        self.backoff.lock().last_attempt = Some(Instant::now());

        match self.transport.upload(&request).await {
            Ok(()) => {
                self.backoff.lock().backoff = Duration::ZERO;
                let delivered = outgoing.delivered();
                agent_log!(self.diagnostics, "Uploaded {} messages", delivered);
                Ok(delivered)
            }
            Err(err) => {
                drop(outgoing);
                let backoff = self.grow_backoff();
                agent_error!(
                    self.diagnostics,
                    "Upload failed, retrying in {}s: {}",
                    backoff.as_secs(),
                    err
                );
                Err(err)
            }
        }
    }

    fn grow_backoff(&self) -> Duration {
        let mut state = self.backoff.lock();
        state.backoff = if state.backoff.is_zero() {
            MIN_BACKOFF
        } else if state.backoff * 2 < MAX_BACKOFF {
            state.backoff * 2
        } else {
            state.backoff
        };
        state.backoff
    }

    /// Spawn the periodic flush loop on the current runtime
    pub fn spawn_flush_loop(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if queue.is_empty() || !queue.ready_to_flush() {
                    continue;
                }
                queue.expire();
                // Failures are logged and retried on a later tick
                let _ = queue.flush().await;
            }
        })
    }
}

/// Messages detached for one upload; back to the head of the queue on drop
/// unless delivered
struct Batch<'a> {
    queue: &'a Mutex<Vec<Message>>,
    messages: Vec<Message>,
    delivered: bool,
}

impl Batch<'_> {
    fn delivered(mut self) -> usize {
        self.delivered = true;
        self.messages.len()
    }
}

impl Drop for Batch<'_> {
    fn drop(&mut self) {
        if self.delivered || self.messages.is_empty() {
            return;
        }
        let mut queue = self.queue.lock();
        let newer = std::mem::replace(&mut *queue, std::mem::take(&mut self.messages));
        queue.extend(newer);
    }
}

fn payload_for(messages: &[Message]) -> UploadPayload {
    let mut payload = UploadPayload::default();
    for message in messages {
        match &message.body {
            MessageBody::Structured(content) => payload.messages.push(MessageRecord {
                topic: message.topic.clone(),
                content: content.clone(),
            }),
            MessageBody::Flattened(labels) => {
                payload.messages.push(MessageRecord {
                    topic: message.topic.clone(),
                    content: serde_json::Value::Null,
                });
                payload.labels.extend(labels.iter().cloned());
            }
        }
    }
    payload
}
