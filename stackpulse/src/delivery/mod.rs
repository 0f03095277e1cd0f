//! Batching and shipping of emitted metrics
//!
//! - [`queue`]: the FIFO [`DeliveryQueue`] with expiry, retry and backoff
//! - [`transport`]: the [`Transport`] seam plus the bundled implementations

pub mod queue;
pub mod transport;

pub use queue::{DeliveryQueue, Envelope, Message, MessageBody, MAX_BACKOFF, MIN_BACKOFF};
pub use transport::{JsonLinesTransport, LogTransport, Transport};
