//! Conversation layer for `DuoChat`.
//!
//! Contains the [`ConversationSession`], which owns the active-chat
//! channel lifecycle, binds it to a specific peer, and merges hydrated
//! history with live traffic into a single ordered view.

pub mod history;
pub mod upload;

use std::sync::Arc;

use tokio::sync::mpsc;

use duochat_proto::identity::UserId;
use duochat_proto::message::{ContentKind, Message};
use duochat_proto::wire::{self, ChatPayload, InboundFrame, WireError};

use crate::notify::NotificationTracker;
use crate::transport::{Channel, ChannelError, ChannelState, Dialer};

use history::{HistoryError, HistorySource};

/// Errors surfaced by session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// No conversation has been started.
    #[error("no active conversation")]
    NoActivePeer,

    /// The message body is empty (or whitespace only).
    #[error("message body is empty")]
    EmptyBody,

    /// A send was attempted while the active channel is not Open. The
    /// message is dropped, never queued; the conversation stays selected.
    #[error("conversation channel not ready")]
    ChannelNotReady,

    /// The channel layer failed (dialing, I/O).
    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),

    /// An outbound frame could not be encoded.
    #[error("wire error: {0}")]
    Wire(#[from] WireError),
}

/// Events surfaced by [`ConversationSession::next_event`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// History for the current peer was applied to the view. `count` is 0
    /// when the fetch failed and the session degraded to an empty history.
    HistoryLoaded {
        /// Peer the history belongs to.
        peer: UserId,
        /// Number of hydrated messages.
        count: usize,
    },
    /// A live message was appended to the view.
    Message(Message),
    /// The server broadcast the list of connected users.
    Roster(Vec<UserId>),
    /// The active channel closed. The peer stays current; sends fail fast
    /// until [`start_chat`](ConversationSession::start_chat) or
    /// [`reconnect`](ConversationSession::reconnect).
    Disconnected,
}

/// Resolution of a history fetch, reconciled at append time.
struct HistoryOutcome {
    /// Which conversation switch issued the fetch.
    switch: u64,
    /// Peer the fetch was for.
    peer: UserId,
    result: Result<Vec<Message>, HistoryError>,
}

/// Owns the active conversation: its channel, its peer, and its view.
///
/// At most one chat channel exists at a time — starting a conversation
/// closes any previous one first. The session is driven by awaiting
/// [`next_event`](Self::next_event), which multiplexes live frames and
/// pending history outcomes.
pub struct ConversationSession<D: Dialer, H: HistorySource> {
    local: UserId,
    dialer: D,
    history: Arc<H>,
    tracker: Arc<NotificationTracker<D>>,
    /// Currently selected peer; survives channel loss.
    peer: Option<UserId>,
    /// The conversation view: history first, then live in arrival order.
    view: Vec<Message>,
    /// The active chat channel, if connected.
    channel: Option<D::Channel>,
    /// Conversation switch counter; stale history outcomes are dropped
    /// against it.
    switch: u64,
    history_tx: mpsc::Sender<HistoryOutcome>,
    history_rx: mpsc::Receiver<HistoryOutcome>,
}

impl<D, H> ConversationSession<D, H>
where
    D: Dialer + 'static,
    H: HistorySource + 'static,
{
    /// Creates an idle session (no peer selected).
    #[must_use]
    pub fn new(
        local: UserId,
        dialer: D,
        history: Arc<H>,
        tracker: Arc<NotificationTracker<D>>,
    ) -> Self {
        let (history_tx, history_rx) = mpsc::channel(8);
        Self {
            local,
            dialer,
            history,
            tracker,
            peer: None,
            view: Vec::new(),
            channel: None,
            switch: 0,
            history_tx,
            history_rx,
        }
    }

    /// The local identity this session sends as.
    #[must_use]
    pub const fn local(&self) -> &UserId {
        &self.local
    }

    /// The currently selected peer, if any.
    #[must_use]
    pub const fn peer(&self) -> Option<&UserId> {
        self.peer.as_ref()
    }

    /// The conversation view, scoped to `{local, peer}`.
    #[must_use]
    pub fn view(&self) -> &[Message] {
        &self.view
    }

    /// The active channel, if connected. Exposed for collaborators that
    /// send through the same channel (image upload).
    #[must_use]
    pub const fn channel(&self) -> Option<&D::Channel> {
        self.channel.as_ref()
    }

    /// Whether the active channel is Open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.channel
            .as_ref()
            .is_some_and(|ch| ch.state() == ChannelState::Open)
    }

    /// Switches the conversation to `peer`.
    ///
    /// Runs, strictly in order: close any previous channel, reset the
    /// view, request history, clear the peer's unread counter, dial the
    /// new channel. On dial failure the session stays selected but
    /// disconnected and the error is returned.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Channel`] if the new channel cannot be
    /// dialed.
    pub async fn start_chat(&mut self, peer: UserId) -> Result<(), SessionError> {
        // Tear down any previous active channel before opening a new one;
        // at most one exists at a time.
        if let Some(old) = self.channel.take() {
            old.close().await;
        }

        self.view.clear();
        self.peer = Some(peer.clone());
        self.switch += 1;

        // Request history now, before the live channel can produce frames.
        // The outcome is reconciled at append time, so a result landing
        // after a newer switch is discarded rather than contaminating the
        // next conversation.
        let outcome_tx = self.history_tx.clone();
        let source = Arc::clone(&self.history);
        let local = self.local.clone();
        let fetch_peer = peer.clone();
        let switch = self.switch;
        tokio::spawn(async move {
            let result = source.fetch(&local, &fetch_peer).await;
            let _ = outcome_tx
                .send(HistoryOutcome {
                    switch,
                    peer: fetch_peer,
                    result,
                })
                .await;
        });

        // The conversation is on screen now; its badge resets.
        self.tracker.open_conversation(&peer);

        let channel = self.dialer.dial_chat(&self.local, &peer).await.map_err(|e| {
            tracing::warn!(peer = %peer, err = %e, "conversation channel dial failed");
            SessionError::Channel(e)
        })?;
        tracing::info!(peer = %peer, "conversation channel open");
        self.channel = Some(channel);
        Ok(())
    }

    /// Re-dials the current peer without resetting the view.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NoActivePeer`] when no conversation is
    /// selected, or [`SessionError::Channel`] if dialing fails.
    pub async fn reconnect(&mut self) -> Result<(), SessionError> {
        let peer = self.peer.clone().ok_or(SessionError::NoActivePeer)?;
        if let Some(old) = self.channel.take() {
            old.close().await;
        }
        let channel = self.dialer.dial_chat(&self.local, &peer).await?;
        tracing::info!(peer = %peer, "conversation channel reopened");
        self.channel = Some(channel);
        Ok(())
    }

    /// Returns the session to Idle: closes the channel and drops the
    /// selection.
    pub async fn leave(&mut self) {
        if let Some(old) = self.channel.take() {
            old.close().await;
        }
        self.peer = None;
        self.view.clear();
        self.tracker.leave_conversation();
    }

    /// Sends a message to the current peer.
    ///
    /// The message is NOT appended to the view here: the server reflects
    /// every chat frame back to its sender, and the view follows that
    /// authoritative echo.
    ///
    /// # Errors
    ///
    /// - [`SessionError::NoActivePeer`] when no conversation is selected.
    /// - [`SessionError::EmptyBody`] for empty or whitespace-only bodies.
    /// - [`SessionError::ChannelNotReady`] when the channel is not Open;
    ///   nothing is queued.
    pub async fn send_message(&self, body: &str, kind: ContentKind) -> Result<(), SessionError> {
        let peer = self.peer.as_ref().ok_or(SessionError::NoActivePeer)?;
        let body = body.trim();
        if body.is_empty() {
            return Err(SessionError::EmptyBody);
        }
        let channel = self.channel.as_ref().ok_or(SessionError::ChannelNotReady)?;
        if channel.state() != ChannelState::Open {
            return Err(SessionError::ChannelNotReady);
        }

        let payload =
            ChatPayload::outbound(self.local.clone(), peer.clone(), body.to_string(), kind);
        let frame = wire::encode_chat(&payload)?;
        channel.send(&frame).await.map_err(|e| match e {
            ChannelError::NotReady | ChannelError::Closed => SessionError::ChannelNotReady,
            other => SessionError::Channel(other),
        })?;
        tracing::debug!(peer = %peer, kind = %kind, "message sent");
        Ok(())
    }

    /// Waits for the next session event.
    ///
    /// Multiplexes the active channel and pending history outcomes.
    /// Malformed frames, frames outside the conversation pair, stale
    /// history results, and notification-class frames (which belong to
    /// the notification channel) are consumed silently; the call keeps
    /// waiting until something reportable happens.
    pub async fn next_event(&mut self) -> SessionEvent {
        enum Step {
            History(HistoryOutcome),
            Frame(Result<String, ChannelError>),
        }

        loop {
            let step = tokio::select! {
                outcome = self.history_rx.recv() => match outcome {
                    Some(outcome) => Step::History(outcome),
                    // Unreachable while the session holds its own sender.
                    None => continue,
                },
                frame = recv_or_pending(self.channel.as_ref()) => Step::Frame(frame),
            };

            match step {
                Step::History(outcome) => {
                    if let Some(event) = self.apply_history(outcome) {
                        return event;
                    }
                }
                Step::Frame(Ok(text)) => {
                    if let Some(event) = self.apply_frame(&text) {
                        return event;
                    }
                }
                Step::Frame(Err(_)) => {
                    // The peer stays current; only the channel is gone.
                    self.channel.take();
                    tracing::warn!("conversation channel closed");
                    return SessionEvent::Disconnected;
                }
            }
        }
    }

    /// Decodes and applies one inbound frame.
    fn apply_frame(&mut self, text: &str) -> Option<SessionEvent> {
        let frame = match wire::decode_inbound(text) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(err = %e, "dropping malformed frame");
                return None;
            }
        };

        match frame {
            InboundFrame::Chat(payload) => {
                let peer = self.peer.as_ref()?;
                let message = payload.into_message();
                if !message.belongs_to(&self.local, peer) {
                    tracing::warn!(
                        sender = %message.sender,
                        receiver = %message.receiver,
                        "dropping frame outside the conversation pair"
                    );
                    return None;
                }
                self.view.push(message.clone());
                Some(SessionEvent::Message(message))
            }
            InboundFrame::Notification { from } => {
                // Unread accounting belongs to the notification channel.
                tracing::debug!(from = %from, "notification frame on chat channel ignored");
                None
            }
            InboundFrame::UserList { users } => Some(SessionEvent::Roster(users)),
        }
    }

    /// Applies a resolved history fetch, unless it is stale.
    fn apply_history(&mut self, outcome: HistoryOutcome) -> Option<SessionEvent> {
        let HistoryOutcome {
            switch,
            peer,
            result,
        } = outcome;

        if self.peer.as_ref() != Some(&peer) || switch != self.switch {
            tracing::debug!(peer = %peer, "discarding stale history result");
            return None;
        }

        match result {
            Ok(mut messages) => {
                messages.retain(|m| m.belongs_to(&self.local, &peer));
                let count = messages.len();
                // History goes ahead of any live messages that arrived
                // while the fetch was in flight.
                messages.extend(self.view.drain(..));
                self.view = messages;
                tracing::debug!(peer = %peer, count, "history hydrated");
                Some(SessionEvent::HistoryLoaded { peer, count })
            }
            Err(e) => {
                tracing::warn!(
                    peer = %peer,
                    err = %e,
                    "history unavailable, continuing with empty history"
                );
                Some(SessionEvent::HistoryLoaded { peer, count: 0 })
            }
        }
    }
}

/// Receives from the channel when there is one; otherwise waits forever
/// (an idle or disconnected session only has history outcomes to wait on).
async fn recv_or_pending<C: Channel>(channel: Option<&C>) -> Result<String, ChannelError> {
    match channel {
        Some(channel) => channel.recv().await,
        None => std::future::pending().await,
    }
}
