//! Read pump: forwards inbound text and watches the read deadline.

use std::sync::{Arc, Mutex, PoisonError};

use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use printlink_protocol::constants::{WS_MAX_MESSAGE_SIZE, WS_PONG_WAIT};

use crate::types::CloseInfo;
use crate::ws_client::{DisconnectCallback, FrameCallback};

/// What the pump does after handling one inbound frame.
enum Flow {
    Continue,
    Stop(Option<CloseInfo>),
}

/// Reads frames until the socket closes, errors, goes silent for
/// [`WS_PONG_WAIT`] or the pump is cancelled, then fires `on_disconnect`
/// exactly once with the remote close frame if there was one.
pub(crate) async fn read_pump<S>(
    mut read: S,
    on_frame: FrameCallback,
    on_disconnect: DisconnectCallback,
    last_pong: Arc<Mutex<Instant>>,
    write_tx: mpsc::Sender<Message>,
    cancel: CancellationToken,
) where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    // Deadline slides on every inbound frame.
    let deadline = tokio::time::sleep(WS_PONG_WAIT);
    tokio::pin!(deadline);

    let close_info = loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break None,
            () = &mut deadline => {
                warn!("no traffic within read deadline, dropping connection");
                break None;
            }
            next = read.next() => next,
        };

        let frame = match next {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => {
                warn!(error = %e, "socket read failed");
                break None;
            }
            None => {
                debug!("socket stream ended");
                break None;
            }
        };
        deadline.as_mut().reset(Instant::now() + WS_PONG_WAIT);

        match on_inbound(frame, &on_frame, &last_pong, &write_tx).await {
            Flow::Continue => {}
            Flow::Stop(info) => break info,
        }
    };

    on_disconnect(close_info);
}

async fn on_inbound(
    frame: Message,
    on_frame: &FrameCallback,
    last_pong: &Mutex<Instant>,
    write_tx: &mpsc::Sender<Message>,
) -> Flow {
    match frame {
        Message::Text(text) => handle_text_message(text.as_str(), on_frame),
        Message::Ping(payload) => {
            trace!("ping");
            if write_tx.send(Message::Pong(payload)).await.is_err() {
                trace!("write queue gone, pong not queued");
            }
        }
        Message::Pong(_) => {
            *last_pong.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
        }
        Message::Close(frame) => {
            let info = frame.map(|f| CloseInfo {
                code: u16::from(f.code),
                reason: f.reason.as_str().to_string(),
            });
            debug!(?info, "remote close");
            return Flow::Stop(info);
        }
        // Binary frames carry nothing in this protocol.
        Message::Binary(_) | Message::Frame(_) => {}
    }
    Flow::Continue
}

fn handle_text_message(text: &str, on_frame: &FrameCallback) {
    if text.len() > WS_MAX_MESSAGE_SIZE {
        warn!(len = text.len(), "oversized frame dropped");
        return;
    }
    on_frame(text.to_string());
}
