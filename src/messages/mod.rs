//! Queue message types
//!
//! Every subject carries exactly one payload type. `Message` is the closed set of
//! those payloads, and `Message::decode` is the single place where raw bytes from
//! the queue are turned into typed values.

mod payloads;

pub use payloads::{
    merge_cookies, Cookie, DeadLetterAdvisory, PageCrawlResult, PageCrawlTask, PageData,
    PageSingleResult, ProgressKind, SitemapCrawlResult, SitemapCrawlTask, SitemapStats,
    SitemapUrlBatch, SitemapUrlEntry, Stage, TaskProgressEvent, UrlSource,
};

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors raised while encoding or decoding queue payloads
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("Unknown subject: {0}")]
    UnknownSubject(String),

    #[error("Failed to decode {subject} payload: {source}")]
    Decode {
        subject: Subject,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Durable subjects, one per message type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subject {
    SitemapTasks,
    SitemapUrls,
    SitemapResults,
    PageTasks,
    PageSingle,
    PageResults,
    Progress,
    DeadLetter,
}

impl Subject {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SitemapTasks => "crawl.sitemap.tasks",
            Self::SitemapUrls => "crawl.sitemap.urls",
            Self::SitemapResults => "crawl.sitemap.results",
            Self::PageTasks => "crawl.page.tasks",
            Self::PageSingle => "crawl.page.single",
            Self::PageResults => "crawl.page.results",
            Self::Progress => "crawl.progress",
            Self::DeadLetter => "crawl.advisory.dead_letter",
        }
    }

    /// Name of the durable consumer group that owns the subject
    pub fn durable_name(&self) -> &'static str {
        match self {
            Self::SitemapTasks => "sitemap-workers",
            Self::SitemapUrls => "frontier-ingest",
            Self::SitemapResults => "sitemap-result-processor",
            Self::PageTasks => "page-workers",
            Self::PageSingle => "page-single-processor",
            Self::PageResults => "page-result-processor",
            Self::Progress => "progress-processor",
            Self::DeadLetter => "dead-letter-processor",
        }
    }

    pub fn all() -> Vec<Self> {
        vec![
            Self::SitemapTasks,
            Self::SitemapUrls,
            Self::SitemapResults,
            Self::PageTasks,
            Self::PageSingle,
            Self::PageResults,
            Self::Progress,
            Self::DeadLetter,
        ]
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Subject {
    type Err = MessageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Subject::all()
            .into_iter()
            .find(|subject| subject.as_str() == s)
            .ok_or_else(|| MessageError::UnknownSubject(s.to_string()))
    }
}

/// A decoded queue message
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    SitemapTask(SitemapCrawlTask),
    SitemapUrls(SitemapUrlBatch),
    SitemapResult(SitemapCrawlResult),
    PageTask(PageCrawlTask),
    PageSingle(PageSingleResult),
    PageResult(PageCrawlResult),
    Progress(TaskProgressEvent),
    DeadLetter(DeadLetterAdvisory),
}

impl Message {
    /// Decodes a payload according to the subject it arrived on
    pub fn decode(subject: Subject, payload: &[u8]) -> Result<Self, MessageError> {
        fn parse<T: serde::de::DeserializeOwned>(
            subject: Subject,
            payload: &[u8],
        ) -> Result<T, MessageError> {
            serde_json::from_slice(payload).map_err(|source| MessageError::Decode { subject, source })
        }

        let message = match subject {
            Subject::SitemapTasks => Self::SitemapTask(parse(subject, payload)?),
            Subject::SitemapUrls => Self::SitemapUrls(parse(subject, payload)?),
            Subject::SitemapResults => Self::SitemapResult(parse(subject, payload)?),
            Subject::PageTasks => Self::PageTask(parse(subject, payload)?),
            Subject::PageSingle => Self::PageSingle(parse(subject, payload)?),
            Subject::PageResults => Self::PageResult(parse(subject, payload)?),
            Subject::Progress => Self::Progress(parse(subject, payload)?),
            Subject::DeadLetter => Self::DeadLetter(parse(subject, payload)?),
        };
        Ok(message)
    }

    /// The subject this message is published on
    pub fn subject(&self) -> Subject {
        match self {
            Self::SitemapTask(_) => Subject::SitemapTasks,
            Self::SitemapUrls(_) => Subject::SitemapUrls,
            Self::SitemapResult(_) => Subject::SitemapResults,
            Self::PageTask(_) => Subject::PageTasks,
            Self::PageSingle(_) => Subject::PageSingle,
            Self::PageResult(_) => Subject::PageResults,
            Self::Progress(_) => Subject::Progress,
            Self::DeadLetter(_) => Subject::DeadLetter,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, MessageError> {
        let bytes = match self {
            Self::SitemapTask(m) => serde_json::to_vec(m)?,
            Self::SitemapUrls(m) => serde_json::to_vec(m)?,
            Self::SitemapResult(m) => serde_json::to_vec(m)?,
            Self::PageTask(m) => serde_json::to_vec(m)?,
            Self::PageSingle(m) => serde_json::to_vec(m)?,
            Self::PageResult(m) => serde_json::to_vec(m)?,
            Self::Progress(m) => serde_json::to_vec(m)?,
            Self::DeadLetter(m) => serde_json::to_vec(m)?,
        };
        Ok(bytes)
    }

    /// Task the message belongs to, if any
    pub fn task_id(&self) -> Option<&str> {
        match self {
            Self::SitemapTask(m) => Some(&m.id),
            Self::SitemapUrls(m) => Some(&m.task_id),
            Self::SitemapResult(m) => Some(&m.task_id),
            Self::PageTask(m) => Some(&m.id),
            Self::PageSingle(m) => Some(&m.task_id),
            Self::PageResult(m) => Some(&m.task_id),
            Self::Progress(m) => Some(&m.task_id),
            Self::DeadLetter(_) => None,
        }
    }
}

macro_rules! impl_from_payload {
    ($($payload:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$payload> for Message {
                fn from(value: $payload) -> Self {
                    Message::$variant(value)
                }
            }
        )*
    };
}

impl_from_payload! {
    SitemapCrawlTask => SitemapTask,
    SitemapUrlBatch => SitemapUrls,
    SitemapCrawlResult => SitemapResult,
    PageCrawlTask => PageTask,
    PageSingleResult => PageSingle,
    PageCrawlResult => PageResult,
    TaskProgressEvent => Progress,
    DeadLetterAdvisory => DeadLetter,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn progress_event() -> TaskProgressEvent {
        TaskProgressEvent {
            task_id: "t1".to_string(),
            site_id: "s1".to_string(),
            stage: Stage::Sitemap,
            kind: ProgressKind::Found,
            count: 12,
        }
    }

    #[test]
    fn test_subject_names_are_unique() {
        let names: std::collections::HashSet<_> =
            Subject::all().iter().map(|s| s.as_str()).collect();
        assert_eq!(names.len(), Subject::all().len());
    }

    #[test]
    fn test_subject_from_str() {
        assert_eq!(
            "crawl.page.single".parse::<Subject>().unwrap(),
            Subject::PageSingle
        );
        assert!(matches!(
            "crawl.unknown".parse::<Subject>(),
            Err(MessageError::UnknownSubject(_))
        ));
    }

    #[test]
    fn test_decode_dispatches_on_subject() {
        let message = Message::from(progress_event());
        let bytes = message.encode().unwrap();

        let decoded = Message::decode(Subject::Progress, &bytes).unwrap();
        assert_eq!(decoded, message);
        assert_eq!(decoded.subject(), Subject::Progress);
        assert_eq!(decoded.task_id(), Some("t1"));
    }

    #[test]
    fn test_decode_on_wrong_subject_fails() {
        let bytes = Message::from(progress_event()).encode().unwrap();
        let err = Message::decode(Subject::PageResults, &bytes).unwrap_err();
        assert!(matches!(
            err,
            MessageError::Decode {
                subject: Subject::PageResults,
                ..
            }
        ));
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(Message::decode(Subject::SitemapTasks, b"not json").is_err());
    }

    #[test]
    fn test_dead_letter_has_no_task() {
        let advisory = DeadLetterAdvisory {
            subject: Subject::PageTasks.to_string(),
            message_id: "m1".to_string(),
            deliveries: 5,
            reason: "boom".to_string(),
            payload: "{}".to_string(),
            terminated_at: Utc::now(),
        };
        assert_eq!(Message::from(advisory).task_id(), None);
    }
}
