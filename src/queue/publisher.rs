use crate::messages::Message;
use crate::queue::{QueueResult, WorkQueue};
use std::sync::Arc;
use tracing::debug;

/// Publishes typed messages on the subject their type belongs to
#[derive(Clone)]
pub struct Publisher {
    queue: Arc<dyn WorkQueue>,
}

impl Publisher {
    pub fn new(queue: Arc<dyn WorkQueue>) -> Self {
        Self { queue }
    }

    /// Encodes and publishes a message, returning its message id
    pub async fn publish(&self, message: impl Into<Message> + Send) -> QueueResult<String> {
        let message = message.into();
        let subject = message.subject();
        let payload = message.encode()?;
        let id = self.queue.publish(subject, payload).await?;
        debug!(subject = %subject, message_id = %id, task_id = ?message.task_id(), "Published");
        Ok(id)
    }

    pub fn queue(&self) -> &Arc<dyn WorkQueue> {
        &self.queue
    }
}
