//! Connection manager: owns the socket lifecycle for one printer session.

use std::sync::atomic::Ordering;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info};

use printlink_protocol::constants::STARTUP_RETRY_DELAY;
use printlink_protocol::{Frame, MessageType};

use crate::reconnection::{self, SessionState, WsContext, lock};
use crate::types::{ConnectionEvent, EndpointSettings, build_url};

/// Manages the websocket to the remote service.
///
/// Inbound frames and transport events are delivered on the channel
/// returned by [`take_events`](Self::take_events). Sending, credential
/// updates and reconnect tuning are synchronous so they can be called from
/// a single-threaded owner.
pub struct ConnectionManager {
    ctx: WsContext,
    endpoint: &'static str,
    url_override: Option<String>,
    events_rx: Mutex<Option<mpsc::Receiver<ConnectionEvent>>>,
}

impl ConnectionManager {
    pub fn new(settings: EndpointSettings) -> Self {
        let endpoint = settings.endpoint();
        let session = match &settings.url_override {
            Some(url) => SessionState::new(url.clone(), true),
            None => {
                let (url, set_up) = build_url(
                    endpoint,
                    settings.printer_id.as_deref(),
                    settings.token.as_deref(),
                );
                SessionState::new(url, set_up)
            }
        };
        let (events_tx, events_rx) = mpsc::channel(256);
        Self {
            ctx: WsContext::new(session, events_tx),
            endpoint,
            url_override: settings.url_override,
            events_rx: Mutex::new(Some(events_rx)),
        }
    }

    /// Takes the event receiver. Returns `None` after the first call.
    pub fn take_events(&self) -> Option<mpsc::Receiver<ConnectionEvent>> {
        lock(&self.events_rx).take()
    }

    /// Tries to connect once; on failure schedules a single retry that then
    /// keeps going until connected.
    pub async fn start(&self) -> bool {
        if self.connect(true).await {
            return true;
        }
        reconnection::schedule_reconnect(&self.ctx, Some(STARTUP_RETRY_DELAY));
        false
    }

    /// Connects, retrying every reconnect delay unless `try_once` is set.
    /// Returns whether a socket is open.
    pub async fn connect(&self, try_once: bool) -> bool {
        reconnection::connect_loop(self.ctx.clone(), try_once, self.ctx.shutdown.child_token(), None)
            .await
    }

    /// Sends a frame on the live session. Returns `false` when the session
    /// is not connected.
    pub fn send(&self, frame: &Frame) -> bool {
        reconnection::send_frame(&self.ctx, frame)
    }

    /// Closes the session. Idempotent.
    ///
    /// Sends `shutdown` best-effort, stops every timer and pending
    /// reconnect and closes the socket with a normal-closure frame.
    pub async fn close(&self) {
        if self.ctx.is_closing() {
            return;
        }
        self.send(&Frame::empty(MessageType::Shutdown));
        self.ctx.closing.store(true, Ordering::Release);
        self.ctx.shutdown.cancel();
        reconnection::cancel_reconnect(&self.ctx);
        reconnection::cancel_keepalive(&self.ctx);

        self.ctx.session().connected = false;
        let client = lock(&self.ctx.ws_client).take();
        if let Some(mut client) = client {
            client.close().await;
        }
        info!("connection closed");
    }

    pub fn is_closing(&self) -> bool {
        self.ctx.is_closing()
    }

    /// Marks the session live (after `connected`) or not.
    pub fn set_session_connected(&self, connected: bool) {
        self.ctx.session().connected = connected;
    }

    pub fn is_session_connected(&self) -> bool {
        self.ctx.session().connected
    }

    /// Whether the printer has both an id and a token (or a URL override).
    pub fn is_set_up(&self) -> bool {
        self.ctx.session().set_up
    }

    /// Recomputes the connect URL from newly issued credentials. Ignored
    /// when a URL override is configured.
    pub fn set_credentials(&self, printer_id: Option<&str>, token: Option<&str>) {
        if self.url_override.is_some() {
            return;
        }
        let (url, set_up) = build_url(self.endpoint, printer_id, token);
        let mut session = self.ctx.session();
        session.url = url;
        session.set_up = set_up;
        debug!(set_up, "connect url updated");
    }

    /// URL used by the next attempt, without the reconnect token.
    pub fn connect_url(&self) -> String {
        self.ctx.session().url.clone()
    }

    pub fn set_reconnect_token(&self, token: Option<String>) {
        self.ctx.session().reconnect_token = token;
    }

    pub fn reconnect_token(&self) -> Option<String> {
        self.ctx.session().reconnect_token.clone()
    }

    pub fn set_reconnect_delay(&self, delay: Duration) {
        self.ctx.session().reconnect_delay = delay;
    }

    pub fn reconnect_delay(&self) -> Duration {
        self.ctx.session().reconnect_delay
    }

    /// Restarts the keepalive timer (on inbound traffic).
    pub fn reset_keepalive(&self) {
        reconnection::reset_keepalive(&self.ctx);
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.ctx.closing.store(true, Ordering::Release);
        self.ctx.shutdown.cancel();
    }
}
