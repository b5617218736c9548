//! SQLite-backed durable queue
//!
//! All subjects share one table. A row is a message; a non-NULL `lease_token` with a
//! future `lease_expires_at` marks it as in flight. Acknowledgement deletes the row,
//! so the table only ever holds outstanding work.

use crate::messages::{DeadLetterAdvisory, Message, Subject};
use crate::queue::{ConsumerSpec, Delivery, QueueError, QueueResult, WorkQueue};
use crate::storage::{from_db_time, to_db_time};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

const QUEUE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS queue_messages (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    message_id TEXT NOT NULL UNIQUE,
    subject TEXT NOT NULL,
    payload BLOB NOT NULL,
    published_at TEXT NOT NULL,
    deliveries INTEGER NOT NULL DEFAULT 0,
    available_at INTEGER NOT NULL,
    lease_token TEXT,
    lease_expires_at INTEGER
);

CREATE INDEX IF NOT EXISTS idx_queue_messages_subject ON queue_messages(subject, available_at);

CREATE TABLE IF NOT EXISTS queue_consumers (
    subject TEXT PRIMARY KEY,
    durable TEXT NOT NULL,
    max_deliver INTEGER NOT NULL,
    ack_wait_ms INTEGER NOT NULL,
    max_ack_pending INTEGER NOT NULL,
    created_at TEXT NOT NULL
);
"#;

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Durable work queue stored in SQLite
#[derive(Clone)]
pub struct SqliteQueue {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteQueue {
    /// Opens (or creates) a queue database file
    pub fn open(path: &Path) -> QueueResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
        ",
        )?;
        conn.execute_batch(QUEUE_SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Opens a queue that lives only as long as this handle
    pub fn open_in_memory() -> QueueResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(QUEUE_SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> QueueResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| QueueError::Poisoned)
    }

    fn publish_sync(&self, subject: Subject, payload: &[u8]) -> QueueResult<String> {
        let conn = self.lock()?;
        insert_message(&conn, subject, payload)
    }

    fn ensure_consumer_sync(&self, spec: &ConsumerSpec) -> QueueResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR IGNORE INTO queue_consumers
             (subject, durable, max_deliver, ack_wait_ms, max_ack_pending, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                spec.subject.as_str(),
                spec.durable,
                spec.max_deliver,
                spec.ack_wait.as_millis() as i64,
                spec.max_ack_pending,
                to_db_time(&Utc::now())
            ],
        )?;

        let existing: String = conn.query_row(
            "SELECT durable FROM queue_consumers WHERE subject = ?1",
            params![spec.subject.as_str()],
            |row| row.get(0),
        )?;
        if existing != spec.durable {
            return Err(QueueError::ConsumerConflict {
                subject: spec.subject,
                existing,
                requested: spec.durable.clone(),
            });
        }

        conn.execute(
            "UPDATE queue_consumers SET max_deliver = ?1, ack_wait_ms = ?2, max_ack_pending = ?3
             WHERE subject = ?4",
            params![
                spec.max_deliver,
                spec.ack_wait.as_millis() as i64,
                spec.max_ack_pending,
                spec.subject.as_str()
            ],
        )?;
        Ok(())
    }

    fn fetch_sync(&self, spec: &ConsumerSpec) -> QueueResult<Vec<Delivery>> {
        let now = now_ms();
        let subject = spec.subject.as_str();
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        // Leases that ran out on their last allowed delivery
        let exhausted: Vec<(i64, String, Vec<u8>, u32)> = {
            let mut stmt = tx.prepare(
                "SELECT seq, message_id, payload, deliveries FROM queue_messages
                 WHERE subject = ?1 AND lease_token IS NOT NULL
                   AND lease_expires_at <= ?2 AND deliveries >= ?3",
            )?;
            let rows = stmt
                .query_map(params![subject, now, spec.max_deliver], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };
        for (seq, message_id, payload, deliveries) in exhausted {
            let reason = format!("ack wait expired after {} deliveries", deliveries);
            dead_letter(&tx, spec.subject, seq, &message_id, &payload, deliveries, &reason)?;
        }

        let in_flight: i64 = tx.query_row(
            "SELECT COUNT(*) FROM queue_messages
             WHERE subject = ?1 AND lease_token IS NOT NULL AND lease_expires_at > ?2",
            params![subject, now],
            |row| row.get(0),
        )?;
        let room = (spec.max_ack_pending as i64 - in_flight).max(0);
        let take = room.min(spec.fetch_batch as i64);
        if take == 0 {
            tx.commit()?;
            return Ok(Vec::new());
        }

        let candidates: Vec<(i64, String, Vec<u8>, u32, String)> = {
            let mut stmt = tx.prepare(
                "SELECT seq, message_id, payload, deliveries, published_at FROM queue_messages
                 WHERE subject = ?1 AND available_at <= ?2
                   AND (lease_token IS NULL OR lease_expires_at <= ?2)
                 ORDER BY seq
                 LIMIT ?3",
            )?;
            let rows = stmt
                .query_map(params![subject, now, take], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        let lease_expires_at = now + spec.ack_wait.as_millis() as i64;
        let mut deliveries = Vec::with_capacity(candidates.len());
        for (seq, message_id, payload, delivered, published_at) in candidates {
            let lease = Uuid::new_v4().to_string();
            tx.execute(
                "UPDATE queue_messages
                 SET lease_token = ?1, lease_expires_at = ?2, deliveries = deliveries + 1
                 WHERE seq = ?3",
                params![lease, lease_expires_at, seq],
            )?;
            deliveries.push(Delivery {
                seq,
                message_id,
                subject: spec.subject,
                payload,
                deliveries: delivered + 1,
                published_at: from_db_time(&published_at).unwrap_or_else(Utc::now),
                lease,
            });
        }

        tx.commit()?;
        Ok(deliveries)
    }

    fn in_progress_sync(&self, delivery: &Delivery, ack_wait: Duration) -> QueueResult<bool> {
        let now = now_ms();
        let conn = self.lock()?;
        let renewed = conn.execute(
            "UPDATE queue_messages SET lease_expires_at = ?1
             WHERE seq = ?2 AND lease_token = ?3 AND lease_expires_at > ?4",
            params![now + ack_wait.as_millis() as i64, delivery.seq, delivery.lease, now],
        )?;
        Ok(renewed > 0)
    }

    fn ack_sync(&self, delivery: &Delivery) -> QueueResult<()> {
        let conn = self.lock()?;
        let removed = conn.execute(
            "DELETE FROM queue_messages WHERE seq = ?1 AND lease_token = ?2",
            params![delivery.seq, delivery.lease],
        )?;
        if removed == 0 {
            debug!(message_id = %delivery.message_id, "Ack on a lease that was already released");
        }
        Ok(())
    }

    fn nak_sync(&self, delivery: &Delivery, delay: Duration) -> QueueResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE queue_messages
             SET lease_token = NULL, lease_expires_at = NULL, available_at = ?1
             WHERE seq = ?2 AND lease_token = ?3",
            params![now_ms() + delay.as_millis() as i64, delivery.seq, delivery.lease],
        )?;
        Ok(())
    }

    fn term_sync(&self, delivery: &Delivery, reason: &str) -> QueueResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let held: Option<i64> = tx
            .query_row(
                "SELECT seq FROM queue_messages WHERE seq = ?1 AND lease_token = ?2",
                params![delivery.seq, delivery.lease],
                |row| row.get(0),
            )
            .optional()?;

        if held.is_some() {
            dead_letter(
                &tx,
                delivery.subject,
                delivery.seq,
                &delivery.message_id,
                &delivery.payload,
                delivery.deliveries,
                reason,
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn depth_sync(&self, subject: Subject) -> QueueResult<u64> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM queue_messages WHERE subject = ?1",
            params![subject.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}

fn insert_message(conn: &Connection, subject: Subject, payload: &[u8]) -> QueueResult<String> {
    let message_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO queue_messages (message_id, subject, payload, published_at, available_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            message_id,
            subject.as_str(),
            payload,
            to_db_time(&Utc::now()),
            now_ms()
        ],
    )?;
    Ok(message_id)
}

/// Removes a message and publishes its advisory in the same transaction
///
/// Advisories are never raised for the advisory subject itself.
fn dead_letter(
    tx: &Transaction<'_>,
    subject: Subject,
    seq: i64,
    message_id: &str,
    payload: &[u8],
    deliveries: u32,
    reason: &str,
) -> QueueResult<()> {
    tx.execute("DELETE FROM queue_messages WHERE seq = ?1", params![seq])?;

    if subject == Subject::DeadLetter {
        warn!(message_id = %message_id, reason = %reason, "Dropping undeliverable dead-letter advisory");
        return Ok(());
    }

    let advisory = Message::from(DeadLetterAdvisory {
        subject: subject.to_string(),
        message_id: message_id.to_string(),
        deliveries,
        reason: reason.to_string(),
        payload: String::from_utf8_lossy(payload).into_owned(),
        terminated_at: Utc::now(),
    });
    let bytes = advisory.encode()?;
    insert_message(tx, Subject::DeadLetter, &bytes)?;

    warn!(
        subject = %subject,
        message_id = %message_id,
        deliveries,
        reason = %reason,
        "Message terminated"
    );
    Ok(())
}

#[async_trait]
impl WorkQueue for SqliteQueue {
    async fn publish(&self, subject: Subject, payload: Vec<u8>) -> QueueResult<String> {
        self.publish_sync(subject, &payload)
    }

    async fn ensure_consumer(&self, spec: &ConsumerSpec) -> QueueResult<()> {
        self.ensure_consumer_sync(spec)
    }

    async fn fetch(&self, spec: &ConsumerSpec) -> QueueResult<Vec<Delivery>> {
        self.fetch_sync(spec)
    }

    async fn in_progress(&self, delivery: &Delivery, ack_wait: Duration) -> QueueResult<bool> {
        self.in_progress_sync(delivery, ack_wait)
    }

    async fn ack(&self, delivery: &Delivery) -> QueueResult<()> {
        self.ack_sync(delivery)
    }

    async fn nak(&self, delivery: &Delivery, delay: Duration) -> QueueResult<()> {
        self.nak_sync(delivery, delay)
    }

    async fn term(&self, delivery: &Delivery, reason: &str) -> QueueResult<()> {
        self.term_sync(delivery, reason)
    }

    async fn depth(&self, subject: Subject) -> QueueResult<u64> {
        self.depth_sync(subject)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(subject: Subject) -> ConsumerSpec {
        ConsumerSpec {
            subject,
            durable: subject.durable_name().to_string(),
            max_deliver: 3,
            ack_wait: Duration::from_secs(60),
            max_ack_pending: 2,
            fetch_batch: 5,
            poll_interval: Duration::from_millis(10),
            nak_delay: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn test_publish_fetch_ack() {
        let queue = SqliteQueue::open_in_memory().unwrap();
        let spec = spec(Subject::Progress);
        queue.publish(Subject::Progress, b"one".to_vec()).await.unwrap();

        let batch = queue.fetch(&spec).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].payload, b"one");
        assert_eq!(batch[0].deliveries, 1);

        queue.ack(&batch[0]).await.unwrap();
        assert_eq!(queue.depth(Subject::Progress).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_subjects_are_isolated() {
        let queue = SqliteQueue::open_in_memory().unwrap();
        queue.publish(Subject::PageTasks, b"p".to_vec()).await.unwrap();

        assert!(queue.fetch(&spec(Subject::SitemapTasks)).await.unwrap().is_empty());
        assert_eq!(queue.fetch(&spec(Subject::PageTasks)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_max_ack_pending_bounds_in_flight() {
        let queue = SqliteQueue::open_in_memory().unwrap();
        let spec = spec(Subject::PageSingle);
        for i in 0..4 {
            queue
                .publish(Subject::PageSingle, format!("m{}", i).into_bytes())
                .await
                .unwrap();
        }

        let first = queue.fetch(&spec).await.unwrap();
        assert_eq!(first.len(), 2);
        assert!(queue.fetch(&spec).await.unwrap().is_empty());

        queue.ack(&first[0]).await.unwrap();
        let next = queue.fetch(&spec).await.unwrap();
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].payload, b"m2");
    }

    #[tokio::test]
    async fn test_nak_redelivers_with_incremented_count() {
        let queue = SqliteQueue::open_in_memory().unwrap();
        let spec = spec(Subject::Progress);
        queue.publish(Subject::Progress, b"x".to_vec()).await.unwrap();

        let first = queue.fetch(&spec).await.unwrap();
        queue.nak(&first[0], Duration::ZERO).await.unwrap();

        let second = queue.fetch(&spec).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].deliveries, 2);
        assert_eq!(second[0].message_id, first[0].message_id);
    }

    #[tokio::test]
    async fn test_nak_delay_hides_message() {
        let queue = SqliteQueue::open_in_memory().unwrap();
        let spec = spec(Subject::Progress);
        queue.publish(Subject::Progress, b"x".to_vec()).await.unwrap();

        let first = queue.fetch(&spec).await.unwrap();
        queue.nak(&first[0], Duration::from_secs(60)).await.unwrap();
        assert!(queue.fetch(&spec).await.unwrap().is_empty());
        assert_eq!(queue.depth(Subject::Progress).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_expired_lease_is_redelivered() {
        let queue = SqliteQueue::open_in_memory().unwrap();
        let mut spec = spec(Subject::Progress);
        spec.ack_wait = Duration::from_millis(20);
        queue.publish(Subject::Progress, b"x".to_vec()).await.unwrap();

        let first = queue.fetch(&spec).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        let second = queue.fetch(&spec).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].deliveries, 2);

        // the stale lease can no longer acknowledge the message
        queue.ack(&first[0]).await.unwrap();
        assert_eq!(queue.depth(Subject::Progress).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_in_progress_extends_lease() {
        let queue = SqliteQueue::open_in_memory().unwrap();
        let mut spec = spec(Subject::PageTasks);
        spec.ack_wait = Duration::from_millis(50);
        queue.publish(Subject::PageTasks, b"x".to_vec()).await.unwrap();

        let first = queue.fetch(&spec).await.unwrap();
        assert!(queue.in_progress(&first[0], Duration::from_secs(30)).await.unwrap());
        tokio::time::sleep(Duration::from_millis(80)).await;

        assert!(queue.fetch(&spec).await.unwrap().is_empty());
        queue.ack(&first[0]).await.unwrap();
        assert_eq!(queue.depth(Subject::PageTasks).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_in_progress_on_lost_lease() {
        let queue = SqliteQueue::open_in_memory().unwrap();
        let mut spec = spec(Subject::PageTasks);
        spec.ack_wait = Duration::from_millis(20);
        queue.publish(Subject::PageTasks, b"x".to_vec()).await.unwrap();

        let first = queue.fetch(&spec).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(!queue.in_progress(&first[0], Duration::from_secs(30)).await.unwrap());

        let second = queue.fetch(&spec).await.unwrap();
        assert_eq!(second.len(), 1);
        assert!(!queue.in_progress(&first[0], Duration::from_secs(30)).await.unwrap());
        assert!(queue.in_progress(&second[0], Duration::from_secs(30)).await.unwrap());
    }

    #[tokio::test]
    async fn test_term_publishes_dead_letter_advisory() {
        let queue = SqliteQueue::open_in_memory().unwrap();
        let spec = spec(Subject::PageTasks);
        queue.publish(Subject::PageTasks, b"{}".to_vec()).await.unwrap();

        let batch = queue.fetch(&spec).await.unwrap();
        queue.term(&batch[0], "handler gave up").await.unwrap();
        assert_eq!(queue.depth(Subject::PageTasks).await.unwrap(), 0);

        let advisories = queue.fetch(&self::spec(Subject::DeadLetter)).await.unwrap();
        assert_eq!(advisories.len(), 1);
        let message = Message::decode(Subject::DeadLetter, &advisories[0].payload).unwrap();
        match message {
            Message::DeadLetter(advisory) => {
                assert_eq!(advisory.subject, "crawl.page.tasks");
                assert_eq!(advisory.message_id, batch[0].message_id);
                assert_eq!(advisory.reason, "handler gave up");
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_exhausted_lease_is_dead_lettered_on_fetch() {
        let queue = SqliteQueue::open_in_memory().unwrap();
        let mut spec = spec(Subject::Progress);
        spec.max_deliver = 1;
        spec.ack_wait = Duration::from_millis(10);
        queue.publish(Subject::Progress, b"x".to_vec()).await.unwrap();

        assert_eq!(queue.fetch(&spec).await.unwrap().len(), 1);
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(queue.fetch(&spec).await.unwrap().is_empty());
        assert_eq!(queue.depth(Subject::Progress).await.unwrap(), 0);
        assert_eq!(queue.depth(Subject::DeadLetter).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_consumer_group_conflict() {
        let queue = SqliteQueue::open_in_memory().unwrap();
        let spec = spec(Subject::PageTasks);
        queue.ensure_consumer(&spec).await.unwrap();
        queue.ensure_consumer(&spec).await.unwrap();

        let mut other = spec.clone();
        other.durable = "someone-else".to_string();
        assert!(matches!(
            queue.ensure_consumer(&other).await,
            Err(QueueError::ConsumerConflict { .. })
        ));
    }

    #[tokio::test]
    async fn test_messages_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.db");

        {
            let queue = SqliteQueue::open(&path).unwrap();
            queue.publish(Subject::SitemapTasks, b"durable".to_vec()).await.unwrap();
        }

        let queue = SqliteQueue::open(&path).unwrap();
        let batch = queue.fetch(&spec(Subject::SitemapTasks)).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].payload, b"durable");
    }
}
