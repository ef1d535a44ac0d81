//! Conversation history hydration.
//!
//! Defines the [`HistorySource`] trait the session fetches prior messages
//! through, the [`HttpHistory`] implementation backed by the history
//! endpoint, and [`StaticHistory`], a scripted in-memory source for tests.
//!
//! A failed fetch is never fatal: the session logs it and proceeds with an
//! empty history — a degraded-but-functional conversation beats a stuck
//! one.

use std::collections::HashMap;
use std::time::Duration;

use duochat_proto::identity::UserId;
use duochat_proto::message::Message;
use duochat_proto::wire::HistoryRecord;

/// Errors that can occur while fetching history.
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    /// The HTTP request itself failed (connect, timeout, TLS).
    #[error("history request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The endpoint answered with a non-success status.
    #[error("history endpoint returned status {0}")]
    Status(reqwest::StatusCode),

    /// The response body could not be parsed.
    #[error("malformed history response: {0}")]
    Malformed(String),
}

/// Source of prior messages for a conversation pair.
///
/// Returns messages oldest → newest, ready to be placed ahead of live
/// traffic in the conversation view.
pub trait HistorySource: Send + Sync {
    /// Fetches the history of the conversation between `local` and `peer`.
    fn fetch(
        &self,
        local: &UserId,
        peer: &UserId,
    ) -> impl std::future::Future<Output = Result<Vec<Message>, HistoryError>> + Send;
}

/// History source backed by the HTTP history endpoint:
/// `GET {base}/chat/messages/{local}/{peer}`.
#[derive(Debug, Clone)]
pub struct HttpHistory {
    http: reqwest::Client,
    base: url::Url,
}

impl HttpHistory {
    /// Creates a history client rooted at `base` (an `http://` or
    /// `https://` URL).
    #[must_use]
    pub fn new(http: reqwest::Client, base: url::Url) -> Self {
        Self { http, base }
    }

    fn endpoint(&self, local: &UserId, peer: &UserId) -> String {
        format!(
            "{}/chat/messages/{local}/{peer}",
            self.base.as_str().trim_end_matches('/')
        )
    }
}

impl HistorySource for HttpHistory {
    async fn fetch(&self, local: &UserId, peer: &UserId) -> Result<Vec<Message>, HistoryError> {
        let response = self.http.get(self.endpoint(local, peer)).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(HistoryError::Status(status));
        }

        let records: Vec<HistoryRecord> = response
            .json()
            .await
            .map_err(|e| HistoryError::Malformed(e.to_string()))?;

        let total = records.len();
        let messages: Vec<Message> = records
            .into_iter()
            .filter_map(|record| record.into_message(local, peer))
            .collect();
        if messages.len() < total {
            tracing::warn!(
                dropped = total - messages.len(),
                peer = %peer,
                "skipped unusable history records"
            );
        }

        Ok(messages)
    }
}

/// Scripted in-memory history source for testing.
///
/// Results are keyed by peer. The source can be told to fail, and can
/// delay its responses so tests can land a fetch result after a newer
/// conversation switch.
#[derive(Default)]
pub struct StaticHistory {
    entries: parking_lot::Mutex<HashMap<UserId, Vec<Message>>>,
    failing: std::sync::atomic::AtomicBool,
    delay: parking_lot::Mutex<Option<Duration>>,
}

impl StaticHistory {
    /// Creates an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts the history returned for `peer`.
    pub fn put(&self, peer: UserId, messages: Vec<Message>) {
        self.entries.lock().insert(peer, messages);
    }

    /// Makes subsequent fetches fail.
    pub fn set_failing(&self, fail: bool) {
        self.failing
            .store(fail, std::sync::atomic::Ordering::SeqCst);
    }

    /// Delays subsequent fetches by `delay` before resolving.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock() = delay;
    }
}

impl HistorySource for StaticHistory {
    async fn fetch(&self, _local: &UserId, peer: &UserId) -> Result<Vec<Message>, HistoryError> {
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(HistoryError::Malformed("scripted failure".into()));
        }
        Ok(self.entries.lock().get(peer).cloned().unwrap_or_default())
    }
}
