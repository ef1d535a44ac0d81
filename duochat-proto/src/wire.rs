//! JSON wire format for channel frames and HTTP payloads.
//!
//! Both channels carry JSON text frames. Inbound frames are discriminated
//! by a `type` tag (`chat`, `notification`, `user_list`); outbound chat
//! frames are the bare payload `{sender, receiver, message, content_type}`
//! with no tag, so the decoder also accepts untagged chat frames.

use serde::{Deserialize, Serialize};

use crate::identity::UserId;
use crate::message::{ContentKind, Message, parse_timestamp};

/// Error type for wire encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// Serialization of an outbound frame failed.
    #[error("serialization error: {0}")]
    Serialize(String),
    /// An inbound frame is not valid JSON or is missing required fields.
    #[error("malformed frame: {0}")]
    Malformed(String),
}

/// The chat-channel payload.
///
/// Outbound frames serialize exactly as
/// `{sender, receiver, message, content_type}`; the server's reflection of
/// a frame adds a `type` tag and a `timestamp`, both tolerated here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatPayload {
    /// Who sent the message.
    pub sender: UserId,
    /// Who it is addressed to.
    pub receiver: UserId,
    /// Message body (text, or an asset URI for images).
    pub message: String,
    /// What the body holds; absent means text.
    #[serde(default)]
    pub content_type: ContentKind,
    /// Server-assigned timestamp string, present on reflected frames only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl ChatPayload {
    /// Builds an outbound payload (no timestamp; the server assigns one).
    #[must_use]
    pub const fn outbound(
        sender: UserId,
        receiver: UserId,
        message: String,
        content_type: ContentKind,
    ) -> Self {
        Self {
            sender,
            receiver,
            message,
            content_type,
            timestamp: None,
        }
    }

    /// Converts a received payload into a [`Message`].
    ///
    /// Falls back to the local clock when the frame carries no parseable
    /// timestamp, so arrival order is preserved either way.
    #[must_use]
    pub fn into_message(self) -> Message {
        let timestamp = self
            .timestamp
            .as_deref()
            .and_then(parse_timestamp)
            .unwrap_or_else(chrono::Utc::now);
        Message {
            sender: self.sender,
            receiver: self.receiver,
            body: self.message,
            kind: self.content_type,
            timestamp,
        }
    }
}

/// A frame received on either channel, discriminated by its `type` tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundFrame {
    /// A chat message reflected or relayed by the server.
    Chat(ChatPayload),
    /// An unread-message notification event.
    Notification {
        /// Who the unseen message is from.
        from: UserId,
    },
    /// A broadcast of the currently connected users.
    UserList {
        /// Connected usernames, self included.
        users: Vec<UserId>,
    },
}

/// Encodes an outbound chat payload as a JSON text frame.
///
/// # Errors
///
/// Returns [`WireError::Serialize`] if the payload cannot be serialized.
pub fn encode_chat(payload: &ChatPayload) -> Result<String, WireError> {
    serde_json::to_string(payload).map_err(|e| WireError::Serialize(e.to_string()))
}

/// Decodes an inbound text frame.
///
/// Tries the tagged form first; an untagged frame that parses as a bare
/// [`ChatPayload`] is accepted as chat, since that is the outbound shape
/// peers produce.
///
/// # Errors
///
/// Returns [`WireError::Malformed`] if the frame is neither.
pub fn decode_inbound(text: &str) -> Result<InboundFrame, WireError> {
    if let Ok(frame) = serde_json::from_str::<InboundFrame>(text) {
        return Ok(frame);
    }
    serde_json::from_str::<ChatPayload>(text)
        .map(InboundFrame::Chat)
        .map_err(|e| WireError::Malformed(e.to_string()))
}

/// One record served by the history endpoint.
///
/// The endpoint names only the sender; the receiver is implied by the
/// conversation pair the history was requested for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRecord {
    /// Who sent the message.
    pub sender: UserId,
    /// Message body.
    pub message: String,
    /// What the body holds; absent means text.
    #[serde(default)]
    pub content_type: ContentKind,
    /// Timestamp string as serialised by the endpoint.
    pub timestamp: String,
}

impl HistoryRecord {
    /// Rebuilds the full [`Message`] for the conversation pair
    /// `{local, peer}`: the receiver is whichever member did not send.
    ///
    /// Returns `None` when the timestamp cannot be parsed, or when the
    /// record's sender belongs to neither member of the pair.
    #[must_use]
    pub fn into_message(self, local: &UserId, peer: &UserId) -> Option<Message> {
        let receiver = if self.sender == *local {
            peer.clone()
        } else if self.sender == *peer {
            local.clone()
        } else {
            return None;
        };
        let timestamp = parse_timestamp(&self.timestamp)?;
        Some(Message {
            sender: self.sender,
            receiver,
            body: self.message,
            kind: self.content_type,
            timestamp,
        })
    }
}

/// One record served by the user directory endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    /// The user's login name.
    pub username: UserId,
}

/// Response body of the upload endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    /// Whether the asset was stored.
    pub success: bool,
    /// URI of the stored asset; empty when `success` is false.
    #[serde(default)]
    pub url: String,
}
