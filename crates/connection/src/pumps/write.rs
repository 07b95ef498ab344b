//! Outbound frame pump.

use futures_util::{Sink, SinkExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_util::sync::CancellationToken;

/// Drains `write_rx` onto the socket sink in queue order.
///
/// Stops after writing a queued close frame. On cancel or an emptied queue a
/// bare close frame is sent on the way out.
pub(crate) async fn write_pump<S>(
    mut sink: S,
    mut write_rx: mpsc::Receiver<Message>,
    cancel: CancellationToken,
) where
    S: Sink<Message, Error = WsError> + Unpin,
{
    while let Some(Some(frame)) = cancel.run_until_cancelled(write_rx.recv()).await {
        let closing = frame.is_close();
        if let Err(e) = sink.send(frame).await {
            tracing::error!(error = %e, "socket write failed");
            return;
        }
        if closing {
            return;
        }
    }

    if let Err(e) = sink.send(Message::Close(None)).await {
        tracing::debug!(error = %e, "close frame not written");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::sink;

    /// Sink that records every frame it is given.
    fn recording_sink(
        out: mpsc::UnboundedSender<Message>,
    ) -> impl Sink<Message, Error = WsError> + Unpin {
        Box::pin(sink::unfold(out, |out, frame: Message| async move {
            let _ = out.send(frame);
            Ok::<_, WsError>(out)
        }))
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Message>) -> Vec<Message> {
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    #[tokio::test]
    async fn cancel_sends_bare_close() {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let (_write_tx, write_rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        cancel.cancel();

        write_pump(recording_sink(out_tx), write_rx, cancel).await;

        assert_eq!(drain(&mut out_rx), vec![Message::Close(None)]);
    }

    #[tokio::test]
    async fn queued_close_is_last_frame() {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let (write_tx, write_rx) = mpsc::channel(8);
        for text in ["a", "b"] {
            write_tx.send(Message::Text(text.into())).await.unwrap();
        }
        write_tx.send(Message::Close(None)).await.unwrap();
        write_tx.send(Message::Text("late".into())).await.unwrap();

        write_pump(recording_sink(out_tx), write_rx, CancellationToken::new()).await;

        assert_eq!(
            drain(&mut out_rx),
            vec![
                Message::Text("a".into()),
                Message::Text("b".into()),
                Message::Close(None),
            ]
        );
    }

    #[tokio::test]
    async fn dropped_queue_closes_socket() {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let (write_tx, write_rx) = mpsc::channel(4);
        write_tx.send(Message::Text("only".into())).await.unwrap();
        drop(write_tx);

        write_pump(recording_sink(out_tx), write_rx, CancellationToken::new()).await;

        assert_eq!(
            drain(&mut out_rx),
            vec![Message::Text("only".into()), Message::Close(None)]
        );
    }
}
