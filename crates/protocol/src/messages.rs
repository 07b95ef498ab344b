use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::envelope::Frame;

/// Errors raised while extracting a typed payload from an inbound frame.
#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("frame has no data")]
    MissingData,

    #[error("missing or invalid field `{0}`")]
    InvalidField(&'static str),

    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// Inbound payloads
// ---------------------------------------------------------------------------

/// Payload of the `connected` acknowledgement. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectedPayload {
    pub interval: Option<Map<String, Value>>,
    pub reconnect_token: Option<String>,
    pub name: Option<String>,
}

/// Payload of `new_token`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NewTokenPayload {
    pub token: String,
}

/// Payload of `set_up`.
///
/// The printer id has been observed both as a string and as an integer, so
/// both are accepted and normalized to a string.
#[derive(Debug, Clone, PartialEq)]
pub struct SetUpPayload {
    pub printer_id: String,
    pub name: Option<String>,
}

/// A remote-initiated command.
#[derive(Debug, Clone, PartialEq)]
pub enum Demand {
    Pause,
    Resume,
    Cancel,
    /// Toggles relaying of gcode terminal traffic. `None` leaves it unchanged.
    Terminal { enabled: Option<bool> },
    /// Script lines to execute.
    Gcode { lines: Vec<String> },
    /// Anything this client does not implement.
    Other(String),
}

impl ConnectedPayload {
    /// Reads each field on its own; a field of the wrong type is treated as
    /// absent without affecting the others.
    pub fn from_frame(frame: &Frame) -> Self {
        let Ok(data) = data_object(frame) else {
            return Self::default();
        };
        let string = |key: &str| data.get(key).and_then(Value::as_str).map(str::to_string);
        Self {
            interval: data.get("interval").and_then(Value::as_object).cloned(),
            reconnect_token: string("reconnect_token"),
            name: string("name"),
        }
    }
}

impl NewTokenPayload {
    pub fn from_frame(frame: &Frame) -> Result<Self, PayloadError> {
        let data = data_object(frame)?;
        match data.get("token") {
            Some(Value::String(token)) if !token.is_empty() => Ok(Self {
                token: token.clone(),
            }),
            _ => Err(PayloadError::InvalidField("token")),
        }
    }
}

impl SetUpPayload {
    pub fn from_frame(frame: &Frame) -> Result<Self, PayloadError> {
        let data = data_object(frame)?;
        let printer_id = match data.get("id") {
            Some(Value::String(id)) if !id.is_empty() => id.clone(),
            Some(Value::Number(n)) if n.is_i64() || n.is_u64() => n.to_string(),
            _ => return Err(PayloadError::InvalidField("id")),
        };
        let name = data
            .get("name")
            .and_then(Value::as_str)
            .map(str::to_string);
        Ok(Self { printer_id, name })
    }
}

impl Demand {
    pub fn from_frame(frame: &Frame) -> Result<Self, PayloadError> {
        let data = data_object(frame)?;
        let name = data
            .get("demand")
            .and_then(Value::as_str)
            .ok_or(PayloadError::InvalidField("demand"))?;
        Ok(match name {
            "pause" => Self::Pause,
            "resume" => Self::Resume,
            "cancel" => Self::Cancel,
            "terminal" => Self::Terminal {
                enabled: data.get("enabled").and_then(Value::as_bool),
            },
            "gcode" => {
                let lines = data
                    .get("list")
                    .and_then(Value::as_array)
                    .map(|list| {
                        list.iter()
                            .filter_map(Value::as_str)
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default();
                Self::Gcode { lines }
            }
            other => Self::Other(other.to_string()),
        })
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Cancel => "cancel",
            Self::Terminal { .. } => "terminal",
            Self::Gcode { .. } => "gcode",
            Self::Other(name) => name,
        }
    }
}

fn data_object(frame: &Frame) -> Result<&Map<String, Value>, PayloadError> {
    match &frame.data {
        Some(Value::Object(map)) => Ok(map),
        Some(Value::Null) | None => Err(PayloadError::MissingData),
        Some(_) => Err(PayloadError::InvalidField("data")),
    }
}

// ---------------------------------------------------------------------------
// Outbound payloads
// ---------------------------------------------------------------------------

/// `{"new": value}` payload shared by `state_change`, `tool`, `ambient` and
/// `connection`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewValue<T> {
    pub new: T,
}

impl<T> NewValue<T> {
    pub fn new(new: T) -> Self {
        Self { new }
    }
}

/// Payload of the `firmware` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FirmwarePayload {
    pub fw: Map<String, Value>,
    pub raw: bool,
}

/// Payload of the `term_update` frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TermUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,
}
