//! Consumer loop
//!
//! A consumer fetches leased messages for one subject, decodes them through
//! `Message::decode` and hands them to its handler. The handler's verdict decides the
//! message's fate:
//!
//! | Handler result | Disposition |
//! |----------------|-------------|
//! | `Ok(())` | ack |
//! | `Err(Retry)`, deliveries < max | nak |
//! | `Err(Retry)`, deliveries == max | term + dead-letter advisory |
//! | `Err(Terminal)` | term + dead-letter advisory |
//! | undecodable payload | term + dead-letter advisory |

use crate::messages::Message;
use crate::queue::{ConsumerSpec, Delivery, QueueResult, WorkQueue};
use crate::storage::StorageError;
use crate::LeakwatchError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Why a handler could not process a message
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Transient; the message is redelivered until its delivery budget runs out
    #[error("{0}")]
    Retry(String),

    /// Redelivery cannot help; the message is terminated at once
    #[error("{0}")]
    Terminal(String),
}

impl From<LeakwatchError> for HandlerError {
    fn from(err: LeakwatchError) -> Self {
        match err {
            LeakwatchError::TaskNotFound(_)
            | LeakwatchError::SiteNotFound(_)
            | LeakwatchError::InvalidRequest(_)
            | LeakwatchError::Message(_)
            | LeakwatchError::Storage(StorageError::TaskNotFound(_))
            | LeakwatchError::Storage(StorageError::SiteNotFound(_)) => {
                HandlerError::Terminal(err.to_string())
            }
            other => HandlerError::Retry(other.to_string()),
        }
    }
}

impl From<StorageError> for HandlerError {
    fn from(err: StorageError) -> Self {
        LeakwatchError::from(err).into()
    }
}

impl From<crate::queue::QueueError> for HandlerError {
    fn from(err: crate::queue::QueueError) -> Self {
        HandlerError::Retry(err.to_string())
    }
}

/// Processes decoded messages for one subject
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: Message) -> Result<(), HandlerError>;
}

/// Fetch-dispatch loop for one member of a durable consumer group
pub struct Consumer {
    queue: Arc<dyn WorkQueue>,
    spec: ConsumerSpec,
    handler: Arc<dyn MessageHandler>,
}

impl Consumer {
    pub fn new(
        queue: Arc<dyn WorkQueue>,
        spec: ConsumerSpec,
        handler: Arc<dyn MessageHandler>,
    ) -> Self {
        Self {
            queue,
            spec,
            handler,
        }
    }

    pub fn spec(&self) -> &ConsumerSpec {
        &self.spec
    }

    /// Consumes until `cancel` fires
    ///
    /// A message whose handler is interrupted by cancellation keeps its lease and is
    /// redelivered once the lease expires.
    pub async fn run(&self, cancel: CancellationToken) -> QueueResult<()> {
        self.queue.ensure_consumer(&self.spec).await?;
        info!(subject = %self.spec.subject, durable = %self.spec.durable, "Consumer started");

        loop {
            let polled = tokio::select! {
                _ = cancel.cancelled() => break,
                polled = self.poll_once() => polled,
            };

            let idle = match polled {
                Ok(0) => true,
                Ok(_) => false,
                Err(e) => {
                    error!(subject = %self.spec.subject, "Queue fetch failed: {}", e);
                    true
                }
            };

            if idle {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.spec.poll_interval) => {}
                }
            }
        }

        info!(subject = %self.spec.subject, "Consumer stopped");
        Ok(())
    }

    /// Fetches one batch and disposes of every message in it
    ///
    /// Returns the number of messages handled. A message whose disposition fails
    /// keeps its lease and is redelivered once it expires; the rest of the batch
    /// is still dispatched.
    pub async fn poll_once(&self) -> QueueResult<usize> {
        let batch = self.queue.fetch(&self.spec).await?;
        let count = batch.len();
        for delivery in batch {
            let subject = delivery.subject;
            let message_id = delivery.message_id.clone();
            if let Err(e) = self.dispatch(delivery).await {
                error!(subject = %subject, message_id = %message_id, "Message disposition failed: {}", e);
            }
        }
        Ok(count)
    }

    /// Polls until a fetch comes back empty and returns the number of messages handled
    pub async fn drain(&self) -> QueueResult<usize> {
        self.queue.ensure_consumer(&self.spec).await?;
        let mut total = 0;
        loop {
            let handled = self.poll_once().await?;
            if handled == 0 {
                return Ok(total);
            }
            total += handled;
        }
    }

    /// Runs the handler while renewing the message's lease every third of `ack_wait`
    ///
    /// A handler may take longer than `ack_wait`; the lease only runs out when the
    /// process holding it stops.
    async fn handle_leased(&self, delivery: &Delivery, message: Message) -> Result<(), HandlerError> {
        let period = (self.spec.ack_wait / 3).max(Duration::from_millis(10));
        let mut heartbeat = tokio::time::interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let handling = self.handler.handle(message);
        tokio::pin!(handling);
        loop {
            tokio::select! {
                result = &mut handling => return result,
                _ = heartbeat.tick() => {
                    match self.queue.in_progress(delivery, self.spec.ack_wait).await {
                        Ok(true) => {}
                        Ok(false) => warn!(
                            subject = %delivery.subject,
                            message_id = %delivery.message_id,
                            "Lease lost while handling, message may be redelivered"
                        ),
                        Err(e) => warn!(
                            subject = %delivery.subject,
                            message_id = %delivery.message_id,
                            "Lease renewal failed: {}",
                            e
                        ),
                    }
                }
            }
        }
    }

    async fn dispatch(&self, delivery: Delivery) -> QueueResult<()> {
        let message = match Message::decode(delivery.subject, &delivery.payload) {
            Ok(message) => message,
            Err(e) => {
                warn!(subject = %delivery.subject, message_id = %delivery.message_id, "Undecodable message: {}", e);
                return self.queue.term(&delivery, &e.to_string()).await;
            }
        };

        match self.handle_leased(&delivery, message).await {
            Ok(()) => {
                debug!(subject = %delivery.subject, message_id = %delivery.message_id, "Acked");
                self.queue.ack(&delivery).await
            }
            Err(HandlerError::Terminal(reason)) => self.queue.term(&delivery, &reason).await,
            Err(HandlerError::Retry(reason)) if delivery.deliveries >= self.spec.max_deliver => {
                self.queue.term(&delivery, &reason).await
            }
            Err(HandlerError::Retry(reason)) => {
                warn!(
                    subject = %delivery.subject,
                    message_id = %delivery.message_id,
                    deliveries = delivery.deliveries,
                    "Handler failed, will retry: {}",
                    reason
                );
                self.queue.nak(&delivery, self.spec.nak_delay).await
            }
        }
    }
}
