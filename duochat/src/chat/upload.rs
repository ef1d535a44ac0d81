//! Out-of-band image upload.
//!
//! Images travel outside the chat channel: the bytes are POSTed to the
//! upload endpoint, and only the returned asset URL is injected into the
//! live message stream, as a regular message with
//! [`ContentKind::Image`].

use duochat_proto::identity::UserId;
use duochat_proto::message::{ContentKind, Message};
use duochat_proto::wire::{self, ChatPayload, UploadResponse};

use crate::transport::{Channel, ChannelError, ChannelState};

/// Errors that can occur while uploading and announcing an image.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    /// No Open chat channel to announce the asset on. Checked before the
    /// upload starts; nothing is transferred.
    #[error("conversation channel not ready")]
    ChannelNotReady,

    /// The endpoint declined the upload (`success: false`).
    #[error("upload rejected by server")]
    Rejected,

    /// The HTTP request itself failed.
    #[error("upload request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The endpoint answered with a non-success status.
    #[error("upload endpoint returned status {0}")]
    Status(reqwest::StatusCode),

    /// The response body was not the expected `{success, url}` shape.
    #[error("malformed upload response: {0}")]
    Malformed(String),

    /// The announcement frame could not be encoded.
    #[error("wire error: {0}")]
    Wire(#[from] duochat_proto::wire::WireError),

    /// The asset was stored but the announcement could not be sent; the
    /// caller decides whether to retry the send.
    #[error("failed to announce uploaded asset: {0}")]
    Announce(#[source] ChannelError),
}

/// Uploads image assets and injects their references into the live stream.
#[derive(Debug, Clone)]
pub struct Uploader {
    http: reqwest::Client,
    endpoint: url::Url,
}

impl Uploader {
    /// Creates an uploader posting to `endpoint`.
    #[must_use]
    pub fn new(http: reqwest::Client, endpoint: url::Url) -> Self {
        Self { http, endpoint }
    }

    /// Uploads `bytes` and sends the returned asset URL to `peer` over
    /// `channel`, exactly as a text message would be sent.
    ///
    /// Returns the announced [`Message`] on success, so a frontend talking
    /// to a server that does not echo the sender's own frames can append
    /// it to its view itself.
    ///
    /// # Errors
    ///
    /// - [`UploadError::ChannelNotReady`] when the channel is not Open —
    ///   checked up front, nothing is uploaded.
    /// - [`UploadError::Rejected`] / [`UploadError::Malformed`] /
    ///   [`UploadError::Http`] / [`UploadError::Status`] on upload
    ///   failure; no message is sent.
    pub async fn upload_and_send<C: Channel>(
        &self,
        file_name: &str,
        bytes: Vec<u8>,
        local: &UserId,
        peer: &UserId,
        channel: &C,
    ) -> Result<Message, UploadError> {
        if channel.state() != ChannelState::Open {
            return Err(UploadError::ChannelNotReady);
        }

        let part = reqwest::multipart::Part::bytes(bytes).file_name(file_name.to_string());
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .http
            .post(self.endpoint.clone())
            .multipart(form)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(UploadError::Status(status));
        }

        let body: UploadResponse = response
            .json()
            .await
            .map_err(|e| UploadError::Malformed(e.to_string()))?;
        if !body.success {
            tracing::warn!(file = file_name, "upload rejected by server");
            return Err(UploadError::Rejected);
        }
        if body.url.is_empty() {
            return Err(UploadError::Malformed("success without asset url".into()));
        }
        tracing::info!(file = file_name, url = %body.url, "asset uploaded");

        let message = Message::outgoing(
            local.clone(),
            peer.clone(),
            body.url,
            ContentKind::Image,
        );
        let payload = ChatPayload::outbound(
            message.sender.clone(),
            message.receiver.clone(),
            message.body.clone(),
            message.kind,
        );
        let frame = wire::encode_chat(&payload)?;
        channel.send(&frame).await.map_err(|e| match e {
            ChannelError::NotReady | ChannelError::Closed => UploadError::ChannelNotReady,
            other => UploadError::Announce(other),
        })?;

        Ok(message)
    }
}
