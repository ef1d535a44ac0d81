//! Message model for one-to-one conversations.
//!
//! A [`Message`] is the in-memory unit a conversation view is built from.
//! Messages are immutable once constructed; the body carries either literal
//! text or the URI of an uploaded asset, disambiguated by [`ContentKind`].

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::UserId;

/// Discriminates what a message body holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    /// The body is literal text.
    #[default]
    Text,
    /// The body is the URI of an uploaded image asset.
    Image,
}

impl std::fmt::Display for ContentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Image => write!(f, "image"),
        }
    }
}

/// One message in a one-to-one conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Who sent the message.
    pub sender: UserId,
    /// Who it was addressed to.
    pub receiver: UserId,
    /// Literal text, or an asset URI when `kind` is [`ContentKind::Image`].
    pub body: String,
    /// What the body holds.
    pub kind: ContentKind,
    /// When the message was created.
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Builds an outgoing message from `sender` to `receiver`, stamped now.
    #[must_use]
    pub fn outgoing(sender: UserId, receiver: UserId, body: String, kind: ContentKind) -> Self {
        Self {
            sender,
            receiver,
            body,
            kind,
            timestamp: Utc::now(),
        }
    }

    /// Whether this message belongs to the unordered conversation pair `{a, b}`.
    #[must_use]
    pub fn belongs_to(&self, a: &UserId, b: &UserId) -> bool {
        (self.sender == *a && self.receiver == *b) || (self.sender == *b && self.receiver == *a)
    }
}

/// Parses a timestamp string from an external collaborator.
///
/// The history endpoint serialises timestamps as either RFC 3339 or the
/// bare `YYYY-MM-DD HH:MM:SS.ffffff` form; both are accepted. Returns
/// `None` for anything else.
#[must_use]
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}
