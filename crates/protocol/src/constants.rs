use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Protocol version embedded in the connect URL path.
pub const PROTOCOL_VERSION: &str = "0.1";

/// Production websocket endpoint (without the printer id / token suffix).
pub const PROD_ENDPOINT: &str = "wss://ws.simplyprint.io/0.1/p";

/// Test websocket endpoint (without the printer id / token suffix).
pub const TEST_ENDPOINT: &str = "wss://testws.simplyprint.io/0.1/p";

/// Time allowed for the websocket handshake of a single connect attempt.
pub const WS_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// How often transport-level pings are sent.
pub const WS_PING_PERIOD: Duration = Duration::from_secs(15);

/// Read deadline: if nothing (pong or any message) arrives within this
/// window the connection is considered dead.
pub const WS_PONG_WAIT: Duration = Duration::from_secs(45);

/// Maximum inbound message size in bytes.
pub const WS_MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

/// Idle time after which a `keepalive` frame is sent.
pub const KEEPALIVE_TIME: Duration = Duration::from_secs(96);

/// Reconnect delay in effect after a successful `connected` acknowledgement.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Reconnect delay in effect after the remote reported an `error`.
pub const ERROR_RECONNECT_DELAY: Duration = Duration::from_secs(30);

/// Delay before the one-shot retry that follows a failed startup connect.
pub const STARTUP_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Minimum spacing between two logged connection failures.
pub const CONNECTION_ERROR_LOG_TIME: Duration = Duration::from_secs(60);

/// Close code used for a client-initiated shutdown (normal closure).
pub const WS_CLOSE_NORMAL: u16 = 1000;

/// Close reason used for a client-initiated shutdown.
pub const WS_CLOSE_REASON: &str = "Client Shutdown";

/// Maximum number of job events buffered while disconnected.
pub const MAX_MISSED_JOB_EVENTS: usize = 10;

/// Grace delay before re-asserting state after a rejected demand.
pub const STATE_REASSERT_DELAY: Duration = Duration::from_millis(50);

/// Frame type identifier.
///
/// Inbound and outbound types share one namespace on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    // Inbound (remote -> client)
    Connected,
    Error,
    NewToken,
    SetUp,
    Demand,
    IntervalChange,

    // Outbound (client -> remote)
    StateChange,
    Temps,
    JobInfo,
    MeshData,
    Tool,
    Ambient,
    Cpu,
    CpuInfo,
    Firmware,
    MachineData,
    Connection,
    PrinterError,
    TermUpdate,
    Keepalive,
    Shutdown,

    /// Forward compatibility: unknown frame types deserialize here.
    #[serde(other)]
    Unknown,
}

impl MessageType {
    /// Wire name of this type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Error => "error",
            Self::NewToken => "new_token",
            Self::SetUp => "set_up",
            Self::Demand => "demand",
            Self::IntervalChange => "interval_change",
            Self::StateChange => "state_change",
            Self::Temps => "temps",
            Self::JobInfo => "job_info",
            Self::MeshData => "mesh_data",
            Self::Tool => "tool",
            Self::Ambient => "ambient",
            Self::Cpu => "cpu",
            Self::CpuInfo => "cpu_info",
            Self::Firmware => "firmware",
            Self::MachineData => "machine_data",
            Self::Connection => "connection",
            Self::PrinterError => "printer_error",
            Self::TermUpdate => "term_update",
            Self::Keepalive => "keepalive",
            Self::Shutdown => "shutdown",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_type_serialization() {
        assert_eq!(
            serde_json::to_string(&MessageType::StateChange).unwrap(),
            "\"state_change\""
        );
        assert_eq!(
            serde_json::to_string(&MessageType::CpuInfo).unwrap(),
            "\"cpu_info\""
        );
        assert_eq!(
            serde_json::to_string(&MessageType::MachineData).unwrap(),
            "\"machine_data\""
        );
    }

    #[test]
    fn message_type_deserialization() {
        let mt: MessageType = serde_json::from_str("\"interval_change\"").unwrap();
        assert_eq!(mt, MessageType::IntervalChange);
        let mt: MessageType = serde_json::from_str("\"new_token\"").unwrap();
        assert_eq!(mt, MessageType::NewToken);
    }

    #[test]
    fn unknown_message_type() {
        let mt: MessageType = serde_json::from_str("\"some_future_type\"").unwrap();
        assert_eq!(mt, MessageType::Unknown);
    }

    #[test]
    fn as_str_matches_serde() {
        for mt in [
            MessageType::Connected,
            MessageType::SetUp,
            MessageType::Temps,
            MessageType::TermUpdate,
            MessageType::PrinterError,
        ] {
            let json = serde_json::to_string(&mt).unwrap();
            assert_eq!(json, format!("\"{}\"", mt.as_str()));
        }
    }

    #[test]
    fn endpoints_carry_protocol_version() {
        assert!(PROD_ENDPOINT.contains(PROTOCOL_VERSION));
        assert!(TEST_ENDPOINT.contains(PROTOCOL_VERSION));
    }
}
