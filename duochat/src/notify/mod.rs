//! Unread-message tracking for `DuoChat`.
//!
//! The [`NotificationTracker`] owns the long-lived notification channel
//! and the per-peer unread counters. The channel is scoped to the local
//! identity alone, independent of whichever conversation is active, and is
//! kept alive for the life of the process: on loss it reconnects after a
//! fixed delay, forever. Counters are owned here exclusively — other
//! components read them via [`get_count`](NotificationTracker::get_count)
//! and reset them via [`clear`](NotificationTracker::clear) /
//! [`open_conversation`](NotificationTracker::open_conversation), never
//! mutate them directly.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::mpsc;

use duochat_proto::identity::UserId;
use duochat_proto::wire::{self, InboundFrame};

use crate::transport::{Channel, Dialer};

/// Baseline delay between reconnect attempts.
pub const RETRY_DELAY: Duration = Duration::from_secs(3);

/// Maximum random jitter added to the reconnect delay so simultaneous
/// clients do not reconnect in lockstep.
const RETRY_JITTER: Duration = Duration::from_millis(250);

/// Default capacity of the [`NotifyEvent`] queue.
const DEFAULT_EVENT_BUFFER: usize = 64;

/// Configuration for the notification channel lifecycle.
#[derive(Debug, Clone)]
pub struct NotifyConfig {
    /// Delay between reconnect attempts.
    pub retry_delay: Duration,
    /// Upper bound of the random jitter added to `retry_delay`.
    pub jitter: Duration,
    /// Capacity of the event queue toward the UI.
    pub event_buffer: usize,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            retry_delay: RETRY_DELAY,
            jitter: RETRY_JITTER,
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

/// Events emitted by the tracker for UI notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyEvent {
    /// The notification channel came up.
    Connected,
    /// The notification channel went down; a reconnect is scheduled.
    Disconnected,
    /// A peer's unread counter changed.
    Unread {
        /// The peer with unseen messages.
        from: UserId,
        /// The counter value after the increment.
        count: u64,
    },
}

/// Owns the notification channel and the per-peer unread counters.
pub struct NotificationTracker<D: Dialer> {
    /// The local identity the channel is scoped to.
    local: UserId,
    /// How the notification channel is (re)opened.
    dialer: D,
    config: NotifyConfig,
    /// Unread count per peer. Lives for the duration of the process.
    counts: parking_lot::Mutex<HashMap<UserId, u64>>,
    /// Peer of the currently open conversation, if any. Notifications for
    /// this peer are suppressed so its counter stays at zero while the
    /// conversation is open.
    active: parking_lot::Mutex<Option<UserId>>,
    /// Queue toward the UI; events are dropped when it is full.
    event_tx: mpsc::Sender<NotifyEvent>,
}

impl<D: Dialer + 'static> NotificationTracker<D> {
    /// Creates a tracker scoped to `local`.
    ///
    /// Returns the tracker and a receiver for [`NotifyEvent`]s. Nothing
    /// connects until [`spawn`](Self::spawn) is called.
    #[must_use]
    pub fn new(
        local: UserId,
        dialer: D,
        config: NotifyConfig,
    ) -> (Arc<Self>, mpsc::Receiver<NotifyEvent>) {
        let (event_tx, event_rx) = mpsc::channel(config.event_buffer);
        let tracker = Arc::new(Self {
            local,
            dialer,
            config,
            counts: parking_lot::Mutex::new(HashMap::new()),
            active: parking_lot::Mutex::new(None),
            event_tx,
        });
        (tracker, event_rx)
    }

    /// Returns the unread count for `peer` (0 if never notified).
    #[must_use]
    pub fn get_count(&self, peer: &UserId) -> u64 {
        self.counts.lock().get(peer).copied().unwrap_or(0)
    }

    /// Resets the unread counter for `peer` to zero.
    pub fn clear(&self, peer: &UserId) {
        self.counts.lock().insert(peer.clone(), 0);
    }

    /// Snapshot of all peers with a non-zero unread count.
    #[must_use]
    pub fn unread_peers(&self) -> Vec<(UserId, u64)> {
        self.counts
            .lock()
            .iter()
            .filter(|(_, count)| **count > 0)
            .map(|(peer, count)| (peer.clone(), *count))
            .collect()
    }

    /// Marks `peer`'s conversation as the active one.
    ///
    /// Zeroes its counter and suppresses further increments for it while
    /// it stays active, so the open conversation's badge never lights up.
    pub fn open_conversation(&self, peer: &UserId) {
        *self.active.lock() = Some(peer.clone());
        self.clear(peer);
        tracing::debug!(peer = %peer, "conversation active, unread cleared");
    }

    /// Marks no conversation as active.
    pub fn leave_conversation(&self) {
        *self.active.lock() = None;
    }

    /// Applies one notification event from `from`.
    ///
    /// Increments that peer's unread counter unless its conversation is
    /// the active one. Normally driven by the channel pump; exposed so a
    /// frontend embedding its own transport can feed events in directly.
    pub fn on_notification(&self, from: UserId) {
        if self.active.lock().as_ref() == Some(&from) {
            // The conversation with this peer is on screen.
            tracing::debug!(from = %from, "notification for active conversation ignored");
            return;
        }

        let count = {
            let mut counts = self.counts.lock();
            let entry = counts.entry(from.clone()).or_insert(0);
            *entry += 1;
            *entry
        };
        tracing::debug!(from = %from, count, "unread count incremented");
        let _ = self.event_tx.try_send(NotifyEvent::Unread { from, count });
    }

    /// Starts the connect/pump/reconnect loop on a background task.
    ///
    /// The loop never gives up (unread tracking is only meaningful while
    /// the channel is live); it stops only when the returned handle is
    /// aborted at process shutdown.
    pub fn spawn(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let tracker = Arc::clone(self);
        tokio::spawn(async move { tracker.run().await })
    }

    /// The reconnect-forever loop.
    async fn run(self: Arc<Self>) {
        loop {
            match self.dialer.dial_notify(&self.local).await {
                Ok(channel) => {
                    tracing::info!(local = %self.local, "notification channel open");
                    let _ = self.event_tx.try_send(NotifyEvent::Connected);
                    self.pump(&channel).await;
                    channel.close().await;
                    tracing::warn!("notification channel lost, will reconnect");
                    let _ = self.event_tx.try_send(NotifyEvent::Disconnected);
                }
                Err(e) => {
                    tracing::warn!(err = %e, "notification channel dial failed");
                }
            }

            let pause = self.retry_pause();
            tracing::debug!(pause_ms = pause.as_millis() as u64, "notification reconnect scheduled");
            tokio::time::sleep(pause).await;
        }
    }

    /// Consumes frames from an open channel until it closes.
    async fn pump(&self, channel: &D::Channel) {
        loop {
            let text = match channel.recv().await {
                Ok(text) => text,
                Err(_) => break,
            };
            match wire::decode_inbound(&text) {
                Ok(InboundFrame::Notification { from }) => self.on_notification(from),
                Ok(frame) => {
                    tracing::debug!(?frame, "non-notification frame on notification channel");
                }
                Err(e) => {
                    tracing::warn!(err = %e, "dropping malformed notification frame");
                }
            }
        }
    }

    fn retry_pause(&self) -> Duration {
        let jitter_ms = u64::try_from(self.config.jitter.as_millis()).unwrap_or(0);
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
        };
        self.config.retry_delay + jitter
    }
}
