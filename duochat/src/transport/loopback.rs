//! Loopback channel for testing.
//!
//! Uses in-process [`tokio::sync::mpsc`] queues to simulate a connection.
//! [`LoopbackChannel::create_pair`] returns two connected endpoints —
//! frames sent on one arrive at the other. [`LoopbackDialer`] hands out
//! such pairs on demand, delivering the far ("server") end to the test
//! through an accept queue, and can be told to refuse dials.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tokio::sync::mpsc;

use duochat_proto::identity::UserId;

use super::{Channel, ChannelError, ChannelState, Dialer, StateCell};

/// In-process channel endpoint backed by mpsc queues.
pub struct LoopbackChannel {
    /// Lifecycle state of this endpoint.
    state: Arc<StateCell>,
    /// Sender toward the remote endpoint; taken on close.
    tx: parking_lot::Mutex<Option<mpsc::Sender<String>>>,
    /// Receiver fed by the remote endpoint.
    rx: tokio::sync::Mutex<mpsc::Receiver<String>>,
}

impl LoopbackChannel {
    /// Creates a pair of connected endpoints, both Open.
    ///
    /// `buffer` is the per-direction queue capacity; sends beyond it fail
    /// fast with [`ChannelError::NotReady`], matching the live channel's
    /// no-queueing contract.
    #[must_use]
    pub fn create_pair(buffer: usize) -> (Self, Self) {
        let (tx_a, rx_a) = mpsc::channel(buffer);
        let (tx_b, rx_b) = mpsc::channel(buffer);

        let a = Self {
            state: Arc::new(StateCell::new(ChannelState::Open)),
            tx: parking_lot::Mutex::new(Some(tx_b)),
            rx: tokio::sync::Mutex::new(rx_a),
        };
        let b = Self {
            state: Arc::new(StateCell::new(ChannelState::Open)),
            tx: parking_lot::Mutex::new(Some(tx_a)),
            rx: tokio::sync::Mutex::new(rx_b),
        };
        (a, b)
    }

    /// Returns a shared handle to this endpoint's state cell, for tests
    /// that need to observe the lifecycle after handing the endpoint off.
    #[must_use]
    pub fn state_handle(&self) -> Arc<StateCell> {
        Arc::clone(&self.state)
    }
}

impl Channel for LoopbackChannel {
    async fn send(&self, text: &str) -> Result<(), ChannelError> {
        if self.state.get() != ChannelState::Open {
            return Err(ChannelError::NotReady);
        }

        let sender = self.tx.lock().clone();
        let Some(sender) = sender else {
            return Err(ChannelError::Closed);
        };
        match sender.try_send(text.to_string()) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => Err(ChannelError::NotReady),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(ChannelError::Closed),
        }
    }

    async fn recv(&self) -> Result<String, ChannelError> {
        let mut rx = self.rx.lock().await;
        rx.recv().await.ok_or(ChannelError::Closed)
    }

    fn state(&self) -> ChannelState {
        self.state.get()
    }

    async fn close(&self) {
        if self.state.get() >= ChannelState::Closing {
            return;
        }
        self.state.advance(ChannelState::Closing);
        // Dropping our sender ends the remote's recv stream; closing our
        // receiver makes the remote's sends fail.
        self.tx.lock().take();
        self.rx.lock().await.close();
        self.state.advance(ChannelState::Closed);
    }
}

/// The far ("server") end of a dialed loopback channel, as delivered to
/// the test through the dialer's accept queue.
pub struct AcceptedChannel {
    /// Local identity the client dialed with.
    pub local: UserId,
    /// Peer identity for chat dials; `None` for notification dials.
    pub peer: Option<UserId>,
    /// The far endpoint itself.
    pub channel: LoopbackChannel,
    /// State handle of the client-side endpoint.
    pub client_state: Arc<StateCell>,
}

/// Dialer handing out in-process channel pairs.
///
/// Every successful dial delivers an [`AcceptedChannel`] on the accept
/// queue returned by [`LoopbackDialer::new`]. Clones share the accept
/// queue, dial counter, and failure toggle.
#[derive(Clone)]
pub struct LoopbackDialer {
    accepted: mpsc::UnboundedSender<AcceptedChannel>,
    dial_count: Arc<AtomicUsize>,
    failing: Arc<AtomicBool>,
    buffer: usize,
}

impl LoopbackDialer {
    /// Creates a dialer and the queue its accepted far ends arrive on.
    #[must_use]
    pub fn new(buffer: usize) -> (Self, mpsc::UnboundedReceiver<AcceptedChannel>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let dialer = Self {
            accepted: tx,
            dial_count: Arc::new(AtomicUsize::new(0)),
            failing: Arc::new(AtomicBool::new(false)),
            buffer,
        };
        (dialer, rx)
    }

    /// Makes subsequent dials fail with a handshake error.
    pub fn set_failing(&self, fail: bool) {
        self.failing.store(fail, Ordering::SeqCst);
    }

    /// Number of dial attempts so far, successful or not.
    #[must_use]
    pub fn dials(&self) -> usize {
        self.dial_count.load(Ordering::SeqCst)
    }

    fn accept(&self, local: &UserId, peer: Option<&UserId>) -> Result<LoopbackChannel, ChannelError> {
        self.dial_count.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(ChannelError::Handshake("dial refused".into()));
        }

        let (client, server) = LoopbackChannel::create_pair(self.buffer);
        let accepted = AcceptedChannel {
            local: local.clone(),
            peer: peer.cloned(),
            channel: server,
            client_state: client.state_handle(),
        };
        // The accept queue being gone just means the test no longer cares.
        let _ = self.accepted.send(accepted);
        Ok(client)
    }
}

impl Dialer for LoopbackDialer {
    type Channel = LoopbackChannel;

    async fn dial_chat(&self, local: &UserId, peer: &UserId) -> Result<LoopbackChannel, ChannelError> {
        self.accept(local, Some(peer))
    }

    async fn dial_notify(&self, local: &UserId) -> Result<LoopbackChannel, ChannelError> {
        self.accept(local, None)
    }
}
