//! Channel layer abstraction for `DuoChat`.
//!
//! Defines the [`Channel`] trait that all channel implementations must
//! satisfy, the channel lifecycle state machine, and the [`Dialer`] seam
//! that maps identities onto endpoints. Concrete implementations:
//! - [`ws::WsChannel`] — the WebSocket channel (the only code touching the
//!   raw socket)
//! - [`loopback::LoopbackChannel`] — in-process pair for testing

pub mod loopback;
pub mod ws;

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use duochat_proto::identity::UserId;

/// Lifecycle state of one logical connection.
///
/// Transitions only move forward: Connecting → Open → Closing → Closed,
/// or Connecting → Closed on handshake failure. No transition leaves
/// Closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ChannelState {
    /// Handshake in progress.
    Connecting,
    /// Connected; sends are accepted.
    Open,
    /// Local close requested; the socket is being torn down.
    Closing,
    /// Connection is gone. Terminal.
    Closed,
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Open => write!(f, "open"),
            Self::Closing => write!(f, "closing"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Lock-free holder for a [`ChannelState`] shared between the channel
/// handle and its background tasks.
///
/// Transitions are monotonic: `advance` only ever moves the state forward
/// in lifecycle order, so a Closed channel can never be resurrected and a
/// racing close/error cannot move an already-Closing channel back to Open.
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl StateCell {
    /// Creates a cell holding the given initial state.
    #[must_use]
    pub const fn new(state: ChannelState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    /// Returns the current state.
    #[must_use]
    pub fn get(&self) -> ChannelState {
        match self.0.load(Ordering::SeqCst) {
            0 => ChannelState::Connecting,
            1 => ChannelState::Open,
            2 => ChannelState::Closing,
            _ => ChannelState::Closed,
        }
    }

    /// Advances the state, never moving backwards.
    ///
    /// Returns `true` if the cell now holds `next` because of this call,
    /// `false` if a later state was already in place.
    pub fn advance(&self, next: ChannelState) -> bool {
        self.0.fetch_max(next as u8, Ordering::SeqCst) <= next as u8
    }
}

/// Errors that can occur during channel operations.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// A send was attempted while the channel is not Open, or the outbound
    /// buffer could not accept the payload synchronously.
    #[error("channel not ready")]
    NotReady,

    /// The connection is gone.
    #[error("channel closed")]
    Closed,

    /// Establishing the connection failed.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// An underlying I/O error occurred.
    #[error("channel I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Duplex, message-oriented connection carrying JSON text frames.
///
/// The channel never interprets payloads — framing and decoding happen at
/// the consuming layer. Callback-style events map onto suspension points:
/// `recv` resolving with a frame is `onMessage`, `recv` resolving with
/// `Err(Closed)` is `onClose`.
pub trait Channel: Send + Sync {
    /// Sends one text frame.
    ///
    /// Fails fast: returns [`ChannelError::NotReady`] unless the state is
    /// [`ChannelState::Open`], and never blocks waiting for buffer space —
    /// a payload the transport cannot accept synchronously is rejected,
    /// not queued.
    fn send(
        &self,
        text: &str,
    ) -> impl std::future::Future<Output = Result<(), ChannelError>> + Send;

    /// Receives the next inbound text frame.
    ///
    /// Suspends until a frame arrives. Returns [`ChannelError::Closed`]
    /// once the connection is down; every subsequent call does the same.
    fn recv(&self) -> impl std::future::Future<Output = Result<String, ChannelError>> + Send;

    /// Returns the current lifecycle state.
    fn state(&self) -> ChannelState;

    /// Closes the channel. Idempotent: closing a Closing or Closed handle
    /// has no effect.
    fn close(&self) -> impl std::future::Future<Output = ()> + Send;
}

/// Maps identities onto channel endpoints.
///
/// Chat channels encode both members of the conversation pair;
/// notification channels encode the local identity alone. The exact
/// addressing scheme is a routing concern of the implementation.
pub trait Dialer: Send + Sync {
    /// The channel type this dialer produces.
    type Channel: Channel + Send + 'static;

    /// Opens a chat channel scoped to `(local, peer)`.
    fn dial_chat(
        &self,
        local: &UserId,
        peer: &UserId,
    ) -> impl std::future::Future<Output = Result<Self::Channel, ChannelError>> + Send;

    /// Opens the notification channel scoped to `local`.
    fn dial_notify(
        &self,
        local: &UserId,
    ) -> impl std::future::Future<Output = Result<Self::Channel, ChannelError>> + Send;
}
