//! WebSocket channel for `DuoChat`.
//!
//! Implements the [`Channel`] trait over a WebSocket connection. This is
//! the only module that touches the raw socket; everything else interacts
//! with it through send/recv/state/close.
//!
//! A connected channel runs two background tasks: a reader that forwards
//! inbound text frames into a bounded queue, and a writer that drains the
//! outbound queue into the socket. `send` hands frames to the writer with
//! a non-blocking `try_send`, so a full outbound buffer fails fast instead
//! of queueing behind a stalled socket.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use duochat_proto::identity::UserId;

use super::{Channel, ChannelError, ChannelState, Dialer, StateCell};

/// Type alias for the write half of a WebSocket connection.
type WsSink = futures_util::stream::SplitSink<
    WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;

/// Type alias for the read half of a WebSocket connection.
type WsSource =
    futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>>;

/// Default timeout for establishing a connection.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Capacity of the inbound frame queue.
const INBOUND_BUFFER: usize = 256;

/// Capacity of the outbound frame queue. Deliberately small: `send` is
/// fail-fast, so the buffer only smooths bursts, it is not a retry queue.
const OUTBOUND_BUFFER: usize = 32;

/// One logical WebSocket connection carrying JSON text frames.
///
/// Created via [`WsChannel::connect`]. The handle is owned exclusively by
/// the component that opened it; dropping the handle tears down both
/// background tasks.
pub struct WsChannel {
    /// Shared lifecycle state, also flipped by the background tasks.
    state: Arc<StateCell>,
    /// Queue into the writer task.
    outbound: mpsc::Sender<String>,
    /// Queue out of the reader task.
    incoming: Mutex<mpsc::Receiver<String>>,
    /// Signal that asks the writer task to send a Close frame and stop.
    close_signal: parking_lot::Mutex<Option<oneshot::Sender<()>>>,
}

impl WsChannel {
    /// Connects to `url` and transitions the handle to Open.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Handshake`] if the connection cannot be
    /// established within `connect_timeout` — the handle goes
    /// Connecting → Closed and is never returned.
    pub async fn connect(url: &str, connect_timeout: Duration) -> Result<Self, ChannelError> {
        let state = Arc::new(StateCell::new(ChannelState::Connecting));

        let connected = tokio::time::timeout(connect_timeout, connect_async(url)).await;
        let ws_stream = match connected {
            Ok(Ok((stream, _response))) => stream,
            Ok(Err(e)) => {
                state.advance(ChannelState::Closed);
                tracing::warn!(url, err = %e, "WebSocket connect failed");
                return Err(ChannelError::Handshake(e.to_string()));
            }
            Err(_) => {
                state.advance(ChannelState::Closed);
                tracing::warn!(url, "WebSocket connect timed out");
                return Err(ChannelError::Handshake(format!(
                    "connect timed out after {connect_timeout:?}"
                )));
            }
        };

        state.advance(ChannelState::Open);
        tracing::debug!(url, "channel open");

        let (sink, source) = ws_stream.split();
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_BUFFER);
        let (incoming_tx, incoming_rx) = mpsc::channel(INBOUND_BUFFER);
        let (close_tx, close_rx) = oneshot::channel();

        tokio::spawn(writer_loop(sink, outbound_rx, close_rx, Arc::clone(&state)));
        tokio::spawn(reader_loop(source, incoming_tx, Arc::clone(&state)));

        Ok(Self {
            state,
            outbound: outbound_tx,
            incoming: Mutex::new(incoming_rx),
            close_signal: parking_lot::Mutex::new(Some(close_tx)),
        })
    }
}

impl Channel for WsChannel {
    async fn send(&self, text: &str) -> Result<(), ChannelError> {
        if self.state.get() != ChannelState::Open {
            return Err(ChannelError::NotReady);
        }

        match self.outbound.try_send(text.to_string()) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("outbound buffer full, rejecting frame");
                Err(ChannelError::NotReady)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(ChannelError::Closed),
        }
    }

    async fn recv(&self) -> Result<String, ChannelError> {
        let mut rx = self.incoming.lock().await;
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
        let signal = self.close_signal.lock().take();
        match signal {
            Some(tx) => {
                if tx.send(()).is_err() {
                    // Writer already gone; nothing left to shut down cleanly.
                    self.state.advance(ChannelState::Closed);
                }
            }
            // Writer already gone; nothing left to shut down cleanly.
            None => {
                self.state.advance(ChannelState::Closed);
            }
        }
    }
}

/// Background task draining the outbound queue into the socket.
///
/// Exits on close signal (after sending a Close frame), on socket error,
/// or when the channel handle is dropped. Marks the state Closed on exit.
async fn writer_loop(
    mut sink: WsSink,
    mut outbound: mpsc::Receiver<String>,
    mut close: oneshot::Receiver<()>,
    state: Arc<StateCell>,
) {
    loop {
        tokio::select! {
            biased;
            _ = &mut close => {
                let _ = sink.send(Message::Close(None)).await;
                let _ = sink.close().await;
                break;
            }
            frame = outbound.recv() => match frame {
                Some(text) => {
                    if let Err(e) = sink.send(Message::Text(text.into())).await {
                        tracing::warn!(err = %e, "WebSocket send failed");
                        break;
                    }
                }
                // Handle dropped.
                None => break,
            },
        }
    }
    state.advance(ChannelState::Closed);
}

/// Background task forwarding inbound text frames.
///
/// Binary, ping and pong frames are ignored — this protocol is JSON text
/// only. Exits (dropping its sender, which surfaces `Closed` to `recv`)
/// when the socket closes or errors, and marks the state Closed.
async fn reader_loop(mut source: WsSource, tx: mpsc::Sender<String>, state: Arc<StateCell>) {
    while let Some(frame) = source.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                if tx.send(text.to_string()).await.is_err() {
                    // Receiver dropped — handle is gone, exit.
                    break;
                }
            }
            Ok(Message::Close(_)) => {
                tracing::debug!("WebSocket closed by remote");
                break;
            }
            Ok(Message::Binary(_) | Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {}
            Err(e) => {
                tracing::warn!(err = %e, "WebSocket read error");
                break;
            }
        }
    }
    state.advance(ChannelState::Closed);
    tracing::debug!("channel reader exiting");
}

/// Dialer that maps identities onto WebSocket endpoints under a base URL:
/// `{base}/chat/{local}/{peer}` for conversations and
/// `{base}/notify/{local}` for the notification channel.
#[derive(Debug, Clone)]
pub struct WsDialer {
    base: url::Url,
    connect_timeout: Duration,
}

impl WsDialer {
    /// Creates a dialer rooted at `base` (a `ws://` or `wss://` URL).
    #[must_use]
    pub fn new(base: url::Url) -> Self {
        Self {
            base,
            connect_timeout: CONNECT_TIMEOUT,
        }
    }

    /// Overrides the connect timeout.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    fn chat_url(&self, local: &UserId, peer: &UserId) -> String {
        format!(
            "{}/chat/{local}/{peer}",
            self.base.as_str().trim_end_matches('/')
        )
    }

    fn notify_url(&self, local: &UserId) -> String {
        format!(
            "{}/notify/{local}",
            self.base.as_str().trim_end_matches('/')
        )
    }
}

impl Dialer for WsDialer {
    type Channel = WsChannel;

    async fn dial_chat(&self, local: &UserId, peer: &UserId) -> Result<WsChannel, ChannelError> {
        WsChannel::connect(&self.chat_url(local, peer), self.connect_timeout).await
    }

    async fn dial_notify(&self, local: &UserId) -> Result<WsChannel, ChannelError> {
        WsChannel::connect(&self.notify_url(local), self.connect_timeout).await
    }
}
