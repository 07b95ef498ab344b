use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::MessageType;

/// Envelope for all websocket communication: `{"type": ..., "data": ...}`.
///
/// `data` is always serialized (as `null` when absent), matching what the
/// remote service expects for payload-less frames such as `keepalive`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    #[serde(rename = "type")]
    pub msg_type: MessageType,
    #[serde(default)]
    pub data: Option<Value>,
}

impl Frame {
    /// Creates a new frame with the given type and payload.
    pub fn new<T: Serialize>(msg_type: MessageType, data: Option<&T>) -> Result<Self, serde_json::Error> {
        let data = match data {
            Some(d) => Some(serde_json::to_value(d)?),
            None => None,
        };
        Ok(Self { msg_type, data })
    }

    /// Creates a frame from an already-built JSON payload.
    pub fn with_value(msg_type: MessageType, data: Value) -> Self {
        let data = if data.is_null() { None } else { Some(data) };
        Self { msg_type, data }
    }

    /// Creates a payload-less frame.
    pub fn empty(msg_type: MessageType) -> Self {
        Self {
            msg_type,
            data: None,
        }
    }

    /// Parses an inbound text frame.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Serializes the frame for the wire.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserializes the payload into the given type.
    pub fn parse_data<T: DeserializeOwned>(&self) -> Result<Option<T>, serde_json::Error> {
        match &self.data {
            Some(Value::Null) | None => Ok(None),
            Some(v) => Ok(Some(T::deserialize(v)?)),
        }
    }
}
