//! Reconnect scheduling and keepalive.
//!
//! Holds the shared [`WsContext`] and the free functions that the socket
//! callbacks and the manager both drive: the connect loop, disconnect
//! handling, the single pending reconnect and the keepalive timer.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use printlink_protocol::constants::{CONNECTION_ERROR_LOG_TIME, KEEPALIVE_TIME, RECONNECT_DELAY};
use printlink_protocol::{Frame, MessageType};

use crate::types::{CloseInfo, ConnectionEvent};
use crate::ws_client::{WsClient, WsError};

/// Connection parameters that survive transient disconnects.
#[derive(Debug)]
pub(crate) struct SessionState {
    pub(crate) url: String,
    pub(crate) set_up: bool,
    pub(crate) reconnect_token: Option<String>,
    pub(crate) reconnect_delay: Duration,
    /// The remote acknowledged the session with `connected`.
    pub(crate) connected: bool,
    /// Bumped on every connect attempt; stale socket callbacks compare
    /// against it.
    pub(crate) generation: u64,
    /// Last generation whose socket reported a disconnect.
    pub(crate) dropped_generation: Option<u64>,
    pub(crate) last_error_log: Option<Instant>,
}

impl SessionState {
    pub(crate) fn new(url: String, set_up: bool) -> Self {
        Self {
            url,
            set_up,
            reconnect_token: None,
            reconnect_delay: RECONNECT_DELAY,
            connected: false,
            generation: 0,
            dropped_generation: None,
            last_error_log: None,
        }
    }

    /// URL for the next attempt, with the reconnect token appended.
    pub(crate) fn attempt_url(&self) -> String {
        match &self.reconnect_token {
            Some(token) => format!("{}/{token}", self.url),
            None => self.url.clone(),
        }
    }
}

/// Shared state handed to socket callbacks and spawned tasks.
#[derive(Clone)]
pub(crate) struct WsContext {
    pub(crate) session: Arc<Mutex<SessionState>>,
    pub(crate) ws_client: Arc<Mutex<Option<WsClient>>>,
    pub(crate) events_tx: mpsc::Sender<ConnectionEvent>,
    /// The pending reconnect, tagged so a finished task only clears its own.
    pub(crate) reconnect_cancel: Arc<Mutex<Option<(u64, CancellationToken)>>>,
    pub(crate) keepalive_cancel: Arc<Mutex<Option<CancellationToken>>>,
    pub(crate) closing: Arc<AtomicBool>,
    /// Parent of every reconnect and keepalive token; cancelled on close.
    pub(crate) shutdown: CancellationToken,
}

impl WsContext {
    pub(crate) fn new(session: SessionState, events_tx: mpsc::Sender<ConnectionEvent>) -> Self {
        Self {
            session: Arc::new(Mutex::new(session)),
            ws_client: Arc::new(Mutex::new(None)),
            events_tx,
            reconnect_cancel: Arc::new(Mutex::new(None)),
            keepalive_cancel: Arc::new(Mutex::new(None)),
            closing: Arc::new(AtomicBool::new(false)),
            shutdown: CancellationToken::new(),
        }
    }

    pub(crate) fn session(&self) -> MutexGuard<'_, SessionState> {
        lock(&self.session)
    }

    pub(crate) fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }
}

/// Locks a std mutex, recovering the data if a holder panicked.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Cancels the keepalive timer, if armed.
pub(crate) fn cancel_keepalive(ctx: &WsContext) {
    if let Some(token) = lock(&ctx.keepalive_cancel).take() {
        token.cancel();
    }
}

/// Cancels the pending reconnect, if any.
pub(crate) fn cancel_reconnect(ctx: &WsContext) {
    if let Some((_, token)) = lock(&ctx.reconnect_cancel).take() {
        token.cancel();
    }
}

static NEXT_RECONNECT_ID: AtomicU64 = AtomicU64::new(0);

/// Connects until a socket is open, the loop is cancelled or the manager
/// starts closing.
///
/// With `try_once` the first failure returns `false` right away. A loop run
/// by a scheduled reconnect passes its slot id so the slot is released as
/// soon as the socket is installed. Returns a boxed future to break the type
/// cycle with [`handle_disconnect`], which schedules this loop from a socket
/// callback.
pub(crate) fn connect_loop(
    ctx: WsContext,
    try_once: bool,
    cancel: CancellationToken,
    reconnect_id: Option<u64>,
) -> Pin<Box<dyn std::future::Future<Output = bool> + Send>> {
    Box::pin(async move {
        let url = ctx.session().attempt_url();
        info!("connecting to remote service");

        loop {
            if ctx.is_closing() || cancel.is_cancelled() {
                return false;
            }

            let generation = {
                let mut session = ctx.session();
                session.generation += 1;
                session.generation
            };

            match WsClient::connect(&url, frame_callback(&ctx), disconnect_callback(&ctx, generation))
                .await
            {
                Ok(client) => {
                    if ctx.is_closing() || cancel.is_cancelled() {
                        return false;
                    }
                    // The socket's callbacks are live already. Installing under
                    // the session lock orders this against handle_disconnect.
                    let installed = {
                        let session = ctx.session();
                        if session.dropped_generation == Some(generation) {
                            false
                        } else {
                            if let Some(id) = reconnect_id {
                                release_reconnect_slot(&ctx, id);
                            }
                            *lock(&ctx.ws_client) = Some(client);
                            true
                        }
                    };
                    if installed {
                        info!("connected to remote service");
                        if let Err(e) = ctx.events_tx.try_send(ConnectionEvent::Opened) {
                            warn!("failed to forward connection event: {e}");
                        }
                        return true;
                    }
                    debug!(generation, "socket dropped during handshake");
                    // Without a slot of our own, handle_disconnect already
                    // scheduled the retry.
                    if try_once || reconnect_id.is_none() {
                        return false;
                    }
                }
                Err(e) => {
                    log_connect_failure(&ctx, &e);
                    if try_once {
                        return false;
                    }
                }
            }

            let delay = ctx.session().reconnect_delay;
            tokio::select! {
                _ = cancel.cancelled() => return false,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    })
}

/// Frees the reconnect slot if it still belongs to `id`.
fn release_reconnect_slot(ctx: &WsContext, id: u64) {
    let mut slot = lock(&ctx.reconnect_cancel);
    if slot.as_ref().is_some_and(|(current, _)| *current == id) {
        *slot = None;
    }
}

fn log_connect_failure(ctx: &WsContext, err: &WsError) {
    let now = Instant::now();
    let mut session = ctx.session();
    let due = session
        .last_error_log
        .is_none_or(|t| now.duration_since(t) > CONNECTION_ERROR_LOG_TIME);
    if due {
        session.last_error_log = Some(now);
        warn!(error = %err, "failed to connect to remote service");
    } else {
        trace!(error = %err, "connect attempt failed");
    }
}

fn frame_callback(ctx: &WsContext) -> crate::ws_client::FrameCallback {
    let events_tx = ctx.events_tx.clone();
    Box::new(move |text| {
        if let Err(e) = events_tx.try_send(ConnectionEvent::Frame(text)) {
            warn!("failed to forward inbound frame: {e}");
        }
    })
}

fn disconnect_callback(ctx: &WsContext, generation: u64) -> crate::ws_client::DisconnectCallback {
    let ctx = ctx.clone();
    Box::new(move |close| handle_disconnect(&ctx, generation, close))
}

/// Handles a transport drop that was not caused by a local close.
pub(crate) fn handle_disconnect(ctx: &WsContext, generation: u64, close: Option<CloseInfo>) {
    if ctx.is_closing() {
        return;
    }
    let client = {
        let mut session = ctx.session();
        if session.generation != generation {
            debug!(generation, "ignoring disconnect of a stale socket");
            return;
        }
        session.connected = false;
        session.dropped_generation = Some(generation);
        lock(&ctx.ws_client).take()
    };

    let pong_elapsed = client
        .as_ref()
        .map(|c| c.last_pong().elapsed().as_secs_f64())
        .unwrap_or_default();
    match &close {
        Some(info) => info!(
            code = info.code,
            reason = %info.reason,
            pong_elapsed,
            "remote service disconnected"
        ),
        None => info!(pong_elapsed, "remote service disconnected"),
    }
    drop(client);

    cancel_keepalive(ctx);
    schedule_reconnect(ctx, None);

    if let Err(e) = ctx.events_tx.try_send(ConnectionEvent::Disconnected(close)) {
        warn!("failed to forward connection event: {e}");
    }
}

/// Schedules one reconnect after `delay` (default: the current reconnect
/// delay). Does nothing while another reconnect is pending or the manager
/// is closing.
pub(crate) fn schedule_reconnect(ctx: &WsContext, delay: Option<Duration>) {
    if ctx.is_closing() {
        return;
    }
    let (id, cancel) = {
        let mut slot = lock(&ctx.reconnect_cancel);
        if slot.as_ref().is_some_and(|(_, t)| !t.is_cancelled()) {
            debug!("reconnect already scheduled");
            return;
        }
        let id = NEXT_RECONNECT_ID.fetch_add(1, Ordering::Relaxed);
        let cancel = ctx.shutdown.child_token();
        *slot = Some((id, cancel.clone()));
        (id, cancel)
    };
    let delay = delay.unwrap_or_else(|| ctx.session().reconnect_delay);
    debug!(delay_secs = delay.as_secs_f64(), "reconnect scheduled");

    let ctx = ctx.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
        connect_loop(ctx.clone(), false, cancel.clone(), Some(id)).await;
        release_reconnect_slot(&ctx, id);
    });
}

/// Serializes and queues a frame on the live socket.
///
/// Returns `false` when the session is not connected or the socket's write
/// queue rejects the frame. Every successful send restarts the keepalive.
pub(crate) fn send_frame(ctx: &WsContext, frame: &Frame) -> bool {
    if !ctx.session().connected {
        return false;
    }
    let json = match frame.to_json() {
        Ok(json) => json,
        Err(e) => {
            warn!(msg_type = %frame.msg_type, error = %e, "failed to encode frame");
            return false;
        }
    };
    let sent = match lock(&ctx.ws_client).as_ref() {
        Some(client) => client.send_text(json.clone()),
        None => return false,
    };
    match sent {
        Ok(()) => {
            debug!(sent = %json, "frame sent");
            reset_keepalive(ctx);
            true
        }
        Err(e) => {
            warn!(msg_type = %frame.msg_type, error = %e, "failed to queue frame");
            false
        }
    }
}

/// Restarts the keepalive timer. When it expires without any traffic a
/// `keepalive` frame is sent and the timer rearms.
pub(crate) fn reset_keepalive(ctx: &WsContext) {
    let cancel = ctx.shutdown.child_token();
    if let Some(old) = lock(&ctx.keepalive_cancel).replace(cancel.clone()) {
        old.cancel();
    }
    if ctx.is_closing() {
        cancel.cancel();
        return;
    }

    let ctx = ctx.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(KEEPALIVE_TIME) => {}
            }
            if !send_keepalive(&ctx) {
                return;
            }
        }
    });
}

fn send_keepalive(ctx: &WsContext) -> bool {
    if !ctx.session().connected {
        return false;
    }
    let frame = Frame::empty(MessageType::Keepalive);
    let Ok(json) = frame.to_json() else {
        return false;
    };
    let sent = lock(&ctx.ws_client)
        .as_ref()
        .is_some_and(|client| client.send_text(json).is_ok());
    if sent {
        debug!("keepalive sent");
    }
    sent
}
