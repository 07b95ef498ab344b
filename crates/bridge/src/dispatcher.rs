//! Inbound frame routing.
//!
//! Session-level frames (`connected`, `error`, `new_token`, `set_up`) are
//! handled here against the connection and the persisted store. Anything
//! that touches telemetry state is returned to the bridge as a
//! [`Dispatched`] value.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use printlink_connection::{ConnectionManager, InfoStore};
use printlink_protocol::constants::{ERROR_RECONNECT_DELAY, RECONNECT_DELAY};
use printlink_protocol::messages::{ConnectedPayload, NewTokenPayload, SetUpPayload};
use printlink_protocol::{Demand, Frame, MessageType};

/// Work the bridge must do after a frame was routed.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatched {
    /// The remote acknowledged the session. Carries the interval update
    /// from the ack, if any.
    SessionStarted { intervals: Option<Map<String, Value>> },
    /// New reporting intervals, in milliseconds.
    Intervals(Map<String, Value>),
    Demand(Demand),
}

pub struct ProtocolDispatcher {
    conn: Arc<ConnectionManager>,
    store: Arc<InfoStore>,
}

impl ProtocolDispatcher {
    pub fn new(conn: Arc<ConnectionManager>, store: Arc<InfoStore>) -> Self {
        Self { conn, store }
    }

    /// Routes one inbound text frame.
    pub fn handle_text(&self, text: &str) -> Option<Dispatched> {
        self.conn.reset_keepalive();

        let frame = match Frame::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                debug!(error = %e, "dropping non-JSON frame");
                return None;
            }
        };
        debug!(received = %text, "frame received");
        self.handle_frame(&frame)
    }

    fn handle_frame(&self, frame: &Frame) -> Option<Dispatched> {
        match frame.msg_type {
            MessageType::Connected => Some(self.on_connected(frame)),
            MessageType::Error => {
                self.on_error(frame);
                None
            }
            MessageType::NewToken => {
                self.on_new_token(frame);
                None
            }
            MessageType::SetUp => {
                self.on_set_up(frame);
                None
            }
            MessageType::Demand => match Demand::from_frame(frame) {
                Ok(demand) => Some(Dispatched::Demand(demand)),
                Err(e) => {
                    warn!(error = %e, "malformed demand");
                    None
                }
            },
            MessageType::IntervalChange => match &frame.data {
                Some(Value::Object(map)) => Some(Dispatched::Intervals(map.clone())),
                _ => {
                    warn!("interval_change without an interval map");
                    None
                }
            },
            other => {
                info!(msg_type = %other, "unhandled frame type");
                None
            }
        }
    }

    fn on_connected(&self, frame: &Frame) -> Dispatched {
        let payload = ConnectedPayload::from_frame(frame);
        info!("remote service acknowledged the session");

        self.conn.set_session_connected(true);
        self.conn.set_reconnect_token(payload.reconnect_token);
        self.conn.set_reconnect_delay(RECONNECT_DELAY);
        if let Some(name) = payload.name {
            self.save_name(&name);
        }
        Dispatched::SessionStarted {
            intervals: payload.interval,
        }
    }

    fn on_error(&self, frame: &Frame) {
        warn!(data = ?frame.data, "remote service reported an error");
        self.conn.set_reconnect_delay(ERROR_RECONNECT_DELAY);
        self.conn.set_reconnect_token(None);
    }

    fn on_new_token(&self, frame: &Frame) {
        let payload = match NewTokenPayload::from_frame(frame) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "invalid new_token frame");
                return;
            }
        };
        info!("received a new printer token");
        if let Err(e) = self.store.set_printer_token(&payload.token) {
            error!(error = %e, "failed to persist printer token");
        }
        self.refresh_credentials();
    }

    fn on_set_up(&self, frame: &Frame) {
        let payload = match SetUpPayload::from_frame(frame) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "invalid set_up frame");
                return;
            }
        };
        info!(printer_id = %payload.printer_id, "printer set up");
        if let Err(e) = self.store.set_printer_id(&payload.printer_id) {
            error!(error = %e, "failed to persist printer id");
        }
        self.refresh_credentials();
        if let Some(name) = payload.name {
            self.save_name(&name);
        }
    }

    fn refresh_credentials(&self) {
        let id = self.store.printer_id();
        let token = self.store.printer_token();
        self.conn.set_credentials(id.as_deref(), token.as_deref());
    }

    fn save_name(&self, name: &str) {
        if let Err(e) = self.store.set_printer_name(name) {
            warn!(error = %e, "failed to persist printer name");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use printlink_connection::EndpointSettings;
    use printlink_protocol::constants::TEST_ENDPOINT;
    use serde_json::json;
    use std::time::Duration;

    struct Fixture {
        _tmp: tempfile::TempDir,
        conn: Arc<ConnectionManager>,
        store: Arc<InfoStore>,
        dispatcher: ProtocolDispatcher,
    }

    fn fixture() -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(InfoStore::in_dir(tmp.path()).unwrap());
        let conn = Arc::new(ConnectionManager::new(EndpointSettings {
            test: true,
            ..Default::default()
        }));
        let dispatcher = ProtocolDispatcher::new(conn.clone(), store.clone());
        Fixture {
            _tmp: tmp,
            conn,
            store,
            dispatcher,
        }
    }

    #[tokio::test]
    async fn non_json_is_dropped() {
        let f = fixture();
        assert_eq!(f.dispatcher.handle_text("not json"), None);
        assert!(!f.conn.is_session_connected());
    }

    #[tokio::test]
    async fn connected_starts_session() {
        let f = fixture();
        f.conn.set_reconnect_delay(ERROR_RECONNECT_DELAY);
        let out = f.dispatcher.handle_text(
            r#"{"type":"connected","data":{"interval":{"job":5000},"reconnect_token":"rt","name":"Voron"}}"#,
        );

        let expected = json!({"job": 5000}).as_object().cloned();
        assert_eq!(out, Some(Dispatched::SessionStarted { intervals: expected }));
        assert!(f.conn.is_session_connected());
        assert_eq!(f.conn.reconnect_token().as_deref(), Some("rt"));
        assert_eq!(f.conn.reconnect_delay(), RECONNECT_DELAY);
        assert_eq!(f.store.printer_name().as_deref(), Some("Voron"));
    }

    #[tokio::test]
    async fn connected_without_token_drops_held_token() {
        let f = fixture();
        f.conn.set_reconnect_token(Some("old".into()));
        let out = f.dispatcher.handle_text(r#"{"type":"connected","data":null}"#);
        assert_eq!(out, Some(Dispatched::SessionStarted { intervals: None }));
        assert!(f.conn.reconnect_token().is_none());
    }

    #[tokio::test]
    async fn connected_with_numeric_name_keeps_intervals_and_token() {
        let f = fixture();
        let out = f.dispatcher.handle_text(
            r#"{"type":"connected","data":{"interval":{"temps":2000},"reconnect_token":"rt","name":5}}"#,
        );
        let expected = json!({"temps": 2000}).as_object().cloned();
        assert_eq!(out, Some(Dispatched::SessionStarted { intervals: expected }));
        assert_eq!(f.conn.reconnect_token().as_deref(), Some("rt"));
        assert!(f.store.printer_name().is_none());
    }

    #[tokio::test]
    async fn error_widens_reconnect_delay() {
        let f = fixture();
        f.conn.set_reconnect_token(Some("rt".into()));
        assert_eq!(f.dispatcher.handle_text(r#"{"type":"error","data":null}"#), None);
        assert_eq!(f.conn.reconnect_delay(), ERROR_RECONNECT_DELAY);
        assert_eq!(f.conn.reconnect_delay(), Duration::from_secs(30));
        assert!(f.conn.reconnect_token().is_none());

        f.dispatcher.handle_text(r#"{"type":"connected"}"#);
        assert_eq!(f.conn.reconnect_delay(), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn new_token_persists_and_updates_url() {
        let f = fixture();
        f.dispatcher
            .handle_text(r#"{"type":"new_token","data":{"token":"abc"}}"#);
        assert_eq!(f.store.printer_token().as_deref(), Some("abc"));
        assert_eq!(f.conn.connect_url(), format!("{TEST_ENDPOINT}/0/abc"));
        assert!(!f.conn.is_set_up());
    }

    #[tokio::test]
    async fn new_token_without_token_is_ignored() {
        let f = fixture();
        f.dispatcher.handle_text(r#"{"type":"new_token","data":{}}"#);
        assert!(f.store.printer_token().is_none());
        assert_eq!(f.conn.connect_url(), format!("{TEST_ENDPOINT}/0/0"));
    }

    #[tokio::test]
    async fn set_up_completes_credentials() {
        let f = fixture();
        f.dispatcher
            .handle_text(r#"{"type":"new_token","data":{"token":"abc"}}"#);
        f.dispatcher
            .handle_text(r#"{"type":"set_up","data":{"id":321,"name":"Prusa"}}"#);

        assert_eq!(f.store.printer_id().as_deref(), Some("321"));
        assert_eq!(f.store.printer_name().as_deref(), Some("Prusa"));
        assert_eq!(f.conn.connect_url(), format!("{TEST_ENDPOINT}/321/abc"));
        assert!(f.conn.is_set_up());
    }

    #[tokio::test]
    async fn set_up_ignores_non_string_name() {
        let f = fixture();
        f.dispatcher
            .handle_text(r#"{"type":"set_up","data":{"id":"9","name":42}}"#);
        assert_eq!(f.store.printer_id().as_deref(), Some("9"));
        assert!(f.store.printer_name().is_none());
    }

    #[tokio::test]
    async fn set_up_without_id_is_ignored() {
        let f = fixture();
        f.dispatcher
            .handle_text(r#"{"type":"set_up","data":{"name":"x"}}"#);
        assert!(f.store.printer_id().is_none());
        assert!(f.store.printer_name().is_none());
    }

    #[tokio::test]
    async fn demand_is_forwarded() {
        let f = fixture();
        let out = f
            .dispatcher
            .handle_text(r#"{"type":"demand","data":{"demand":"pause"}}"#);
        assert_eq!(out, Some(Dispatched::Demand(Demand::Pause)));

        let out = f
            .dispatcher
            .handle_text(r#"{"type":"demand","data":{"demand":"gcode","list":["G28","M84"]}}"#);
        assert_eq!(
            out,
            Some(Dispatched::Demand(Demand::Gcode {
                lines: vec!["G28".into(), "M84".into()]
            }))
        );
    }

    #[tokio::test]
    async fn malformed_demand_is_ignored() {
        let f = fixture();
        assert_eq!(
            f.dispatcher
                .handle_text(r#"{"type":"demand","data":{"what":"pause"}}"#),
            None
        );
        assert_eq!(f.dispatcher.handle_text(r#"{"type":"demand"}"#), None);
    }

    #[tokio::test]
    async fn interval_change_is_forwarded() {
        let f = fixture();
        let out = f
            .dispatcher
            .handle_text(r#"{"type":"interval_change","data":{"temps":2000}}"#);
        let expected = json!({"temps": 2000}).as_object().unwrap().clone();
        assert_eq!(out, Some(Dispatched::Intervals(expected)));
    }

    #[tokio::test]
    async fn unknown_type_is_ignored() {
        let f = fixture();
        assert_eq!(
            f.dispatcher
                .handle_text(r#"{"type":"webcam_snapshot","data":{}}"#),
            None
        );
    }
}
