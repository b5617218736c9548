//! Durable work queue
//!
//! Each subject is its own stream with work-queue retention: a message is handed to
//! exactly one member of the subject's durable consumer group, stays leased until it
//! is acknowledged, and is redelivered if the lease runs out. A message that keeps
//! failing is terminated after `max_deliver` deliveries and a dead-letter advisory is
//! published in its place.
//!
//! # Components
//!
//! - `WorkQueue`: publish/fetch/ack/nak/term contract
//! - `SqliteQueue`: durable implementation backed by a SQLite file
//! - `Consumer`: the fetch-dispatch loop run by every worker and processor
//! - `Publisher`: typed publishing of `Message` values

mod consumer;
mod publisher;
mod sqlite;

pub use consumer::{Consumer, HandlerError, MessageHandler};
pub use publisher::Publisher;
pub use sqlite::SqliteQueue;

use crate::config::QueueConfig;
use crate::messages::{MessageError, Subject};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;

/// Errors raised by queue operations
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Message error: {0}")]
    Message(#[from] MessageError),

    #[error("Subject {subject} is already consumed by durable {existing}, not {requested}")]
    ConsumerConflict {
        subject: Subject,
        existing: String,
        requested: String,
    },

    #[error("Queue lock poisoned")]
    Poisoned,
}

/// Result type for queue operations
pub type QueueResult<T> = Result<T, QueueError>;

/// Consumer group settings for one subject
#[derive(Debug, Clone)]
pub struct ConsumerSpec {
    pub subject: Subject,
    pub durable: String,
    /// Deliveries after which a failing message is terminated
    pub max_deliver: u32,
    /// Lease length of a fetched message
    pub ack_wait: Duration,
    /// Upper bound on leased, unacknowledged messages for the group
    pub max_ack_pending: u32,
    pub fetch_batch: u32,
    pub poll_interval: Duration,
    pub nak_delay: Duration,
}

impl ConsumerSpec {
    pub fn from_config(subject: Subject, config: &QueueConfig) -> Self {
        Self {
            subject,
            durable: subject.durable_name().to_string(),
            max_deliver: config.max_deliver,
            ack_wait: config.ack_wait(),
            max_ack_pending: config.max_ack_pending,
            fetch_batch: config.fetch_batch,
            poll_interval: config.poll_interval(),
            nak_delay: config.nak_delay(),
        }
    }
}

/// A leased message
#[derive(Debug, Clone)]
pub struct Delivery {
    pub seq: i64,
    pub message_id: String,
    pub subject: Subject,
    pub payload: Vec<u8>,
    /// Delivery count including this one
    pub deliveries: u32,
    pub published_at: DateTime<Utc>,
    pub(crate) lease: String,
}

/// Durable publish and consumer-group fetch with explicit acknowledgement
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Appends a message to a subject's stream and returns its message id
    async fn publish(&self, subject: Subject, payload: Vec<u8>) -> QueueResult<String>;

    /// Registers the durable consumer group of a subject
    ///
    /// A subject has exactly one group; registering a different durable name fails.
    async fn ensure_consumer(&self, spec: &ConsumerSpec) -> QueueResult<()>;

    /// Leases up to `spec.fetch_batch` messages, respecting `max_ack_pending`
    async fn fetch(&self, spec: &ConsumerSpec) -> QueueResult<Vec<Delivery>>;

    /// Extends a held lease to `ack_wait` from now
    ///
    /// Returns false when the lease was already released or taken over.
    async fn in_progress(&self, delivery: &Delivery, ack_wait: Duration) -> QueueResult<bool>;

    /// Removes a message for good
    async fn ack(&self, delivery: &Delivery) -> QueueResult<()>;

    /// Releases a message for redelivery after `delay`
    async fn nak(&self, delivery: &Delivery, delay: Duration) -> QueueResult<()>;

    /// Removes a message and publishes a dead-letter advisory for it
    async fn term(&self, delivery: &Delivery, reason: &str) -> QueueResult<()>;

    /// Messages stored on a subject, leased or not
    async fn depth(&self, subject: Subject) -> QueueResult<u64>;
}
