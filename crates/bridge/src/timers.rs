//! One-shot timers that post a message to a mailbox.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Handle to a pending timer. Dropping it cancels the timer.
#[derive(Debug)]
pub struct TimerHandle {
    cancel: CancellationToken,
}

impl TimerHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Posts `msg` to `tx` after `delay` unless the returned handle is
/// cancelled or dropped first.
pub fn schedule_after<T: Send + 'static>(
    delay: Duration,
    tx: mpsc::Sender<T>,
    msg: T,
) -> TimerHandle {
    let deadline = tokio::time::Instant::now() + delay;
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = token.cancelled() => {}
            _ = tokio::time::sleep_until(deadline) => {
                if tx.send(msg).await.is_err() {
                    tracing::trace!("timer fired after mailbox closed");
                }
            }
        }
    });
    TimerHandle { cancel }
}
