//! Transport ping pump.

use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use printlink_protocol::constants::WS_PING_PERIOD;

/// Queues an empty ping every [`WS_PING_PERIOD`], first one a full period
/// after start. Ends on cancel or once the write queue is gone.
pub(crate) async fn ping_pump(write_tx: mpsc::Sender<Message>, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval_at(Instant::now() + WS_PING_PERIOD, WS_PING_PERIOD);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    while cancel
        .run_until_cancelled(ticker.tick())
        .await
        .is_some()
    {
        if write_tx.send(Message::Ping(Default::default())).await.is_err() {
            tracing::trace!("write queue closed, ping pump exiting");
            return;
        }
    }
}
