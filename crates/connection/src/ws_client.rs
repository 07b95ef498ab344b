//! Websocket client for the cloud session.
//!
//! One client wraps one socket. Inbound text is handed to a callback,
//! transport pings keep the link alive and a read deadline detects dead
//! peers.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_util::sync::CancellationToken;

use printlink_protocol::constants::{
    WS_CLOSE_NORMAL, WS_CLOSE_REASON, WS_CONNECT_TIMEOUT, WS_MAX_MESSAGE_SIZE,
};

use crate::types::CloseInfo;

/// How long `close` waits for the close frame to be flushed.
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// Errors from the websocket client.
#[derive(Debug, thiserror::Error)]
pub enum WsError {
    #[error("WebSocket error: {0}")]
    Ws(#[from] tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("connect timed out")]
    Timeout,

    #[error("connection closed")]
    Closed,
}

/// Callback for inbound text frames.
pub type FrameCallback = Box<dyn Fn(String) + Send + Sync>;

/// Callback fired once when the read side ends.
pub type DisconnectCallback = Box<dyn Fn(Option<CloseInfo>) + Send + Sync>;

/// Websocket client connected to the remote service.
pub struct WsClient {
    write_tx: mpsc::Sender<tungstenite::Message>,
    last_pong: Arc<Mutex<Instant>>,
    read_handle: tokio::task::JoinHandle<()>,
    write_handle: tokio::task::JoinHandle<()>,
    ping_handle: tokio::task::JoinHandle<()>,
    cancel: CancellationToken,
}

impl WsClient {
    /// Opens the socket and starts the pumps.
    ///
    /// Fails with [`WsError::Timeout`] when the handshake takes longer than
    /// [`WS_CONNECT_TIMEOUT`].
    pub async fn connect(
        url: &str,
        on_frame: FrameCallback,
        on_disconnect: DisconnectCallback,
    ) -> Result<Self, WsError> {
        let mut ws_config = tungstenite::protocol::WebSocketConfig::default();
        ws_config.max_message_size = Some(WS_MAX_MESSAGE_SIZE);
        ws_config.max_frame_size = Some(WS_MAX_MESSAGE_SIZE);
        let connect = tokio_tungstenite::connect_async_with_config(url, Some(ws_config), false);
        let (ws_stream, _) = tokio::time::timeout(WS_CONNECT_TIMEOUT, connect)
            .await
            .map_err(|_| WsError::Timeout)??;
        let (write, read) = ws_stream.split();

        let (write_tx, write_rx) = mpsc::channel::<tungstenite::Message>(256);
        let last_pong = Arc::new(Mutex::new(Instant::now()));
        let cancel = CancellationToken::new();

        let write_handle = {
            let cancel = cancel.clone();
            tokio::spawn(crate::pumps::write::write_pump(write, write_rx, cancel))
        };

        let read_handle = {
            let last_pong = last_pong.clone();
            let write_tx = write_tx.clone();
            let cancel = cancel.clone();
            tokio::spawn(crate::pumps::read::read_pump(
                read,
                on_frame,
                on_disconnect,
                last_pong,
                write_tx,
                cancel,
            ))
        };

        let ping_handle = {
            let write_tx = write_tx.clone();
            let cancel = cancel.clone();
            tokio::spawn(crate::pumps::ping::ping_pump(write_tx, cancel))
        };

        Ok(Self {
            write_tx,
            last_pong,
            read_handle,
            write_handle,
            ping_handle,
            cancel,
        })
    }

    /// Queues a text frame. Never blocks; fails when the write queue is
    /// full or the socket is gone.
    pub fn send_text(&self, text: String) -> Result<(), WsError> {
        self.write_tx
            .try_send(tungstenite::Message::Text(text.into()))
            .map_err(|_| WsError::Closed)
    }

    /// Time of the last pong (or of the connect, if none arrived yet).
    pub fn last_pong(&self) -> Instant {
        *self.last_pong.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sends a normal-closure frame, waits briefly for it to be written and
    /// stops the pumps.
    pub async fn close(&mut self) {
        let frame = CloseFrame {
            code: CloseCode::from(WS_CLOSE_NORMAL),
            reason: WS_CLOSE_REASON.into(),
        };
        if self
            .write_tx
            .send(tungstenite::Message::Close(Some(frame)))
            .await
            .is_ok()
        {
            let _ = tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, &mut self.write_handle).await;
        }
        self.cancel.cancel();
    }
}

#[cfg(test)]
impl WsClient {
    /// Client without a socket; queued frames land on `write_tx`.
    pub(crate) fn detached(write_tx: mpsc::Sender<tungstenite::Message>) -> Self {
        Self {
            write_tx,
            last_pong: Arc::new(Mutex::new(Instant::now())),
            read_handle: tokio::spawn(async {}),
            write_handle: tokio::spawn(async {}),
            ping_handle: tokio::spawn(async {}),
            cancel: CancellationToken::new(),
        }
    }
}

impl Drop for WsClient {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.read_handle.abort();
        self.write_handle.abort();
        self.ping_handle.abort();
    }
}
