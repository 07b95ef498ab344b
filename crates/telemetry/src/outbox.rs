use printlink_protocol::{Frame, MessageType};
use serde::Serialize;
use serde_json::Value;

/// Frames produced by one scheduler step, in emission order.
///
/// Carries a snapshot of the session flags so the scheduler can decide
/// between sending and queueing without touching the connection.
#[derive(Debug, Default)]
pub struct Outbox {
    connected: bool,
    set_up: bool,
    frames: Vec<Frame>,
}

impl Outbox {
    pub fn new(connected: bool, set_up: bool) -> Self {
        Self {
            connected,
            set_up,
            frames: Vec::new(),
        }
    }

    /// Whether the remote session is live.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Whether the printer has both an id and a token.
    pub fn is_set_up(&self) -> bool {
        self.set_up
    }

    /// Queues a frame. Returns `false` (and drops it) when not connected.
    pub fn push(&mut self, msg_type: MessageType, data: Value) -> bool {
        if !self.connected {
            return false;
        }
        self.frames.push(Frame::with_value(msg_type, data));
        true
    }

    /// Serializes `data` and queues it.
    pub fn push_payload<T: Serialize>(&mut self, msg_type: MessageType, data: &T) -> bool {
        match serde_json::to_value(data) {
            Ok(value) => self.push(msg_type, value),
            Err(e) => {
                tracing::warn!(%msg_type, error = %e, "failed to encode payload");
                false
            }
        }
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn into_frames(self) -> Vec<Frame> {
        self.frames
    }
}
