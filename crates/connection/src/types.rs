use printlink_protocol::constants::{PROD_ENDPOINT, TEST_ENDPOINT};

/// Events emitted by the connection manager.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// A socket was opened. The session is not live until the remote
    /// acknowledges it with a `connected` frame.
    Opened,
    /// Raw inbound text frame.
    Frame(String),
    /// The socket dropped without a local close.
    Disconnected(Option<CloseInfo>),
}

/// Close code and reason reported by the remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    pub code: u16,
    pub reason: String,
}

/// Where to connect and with which stored credentials.
#[derive(Debug, Clone, Default)]
pub struct EndpointSettings {
    /// Use the test service instead of production.
    pub test: bool,
    /// Full URL that replaces the computed one.
    pub url_override: Option<String>,
    pub printer_id: Option<String>,
    pub token: Option<String>,
}

impl EndpointSettings {
    pub fn endpoint(&self) -> &'static str {
        if self.test { TEST_ENDPOINT } else { PROD_ENDPOINT }
    }
}

/// Builds the connect URL from the stored credentials.
///
/// Returns the URL and whether the printer is fully set up (id and token
/// both known).
pub(crate) fn build_url(
    endpoint: &str,
    printer_id: Option<&str>,
    token: Option<&str>,
) -> (String, bool) {
    let printer_id = printer_id.filter(|s| !s.is_empty());
    let token = token.filter(|s| !s.is_empty());
    match (printer_id, token) {
        (Some(id), Some(token)) => (format!("{endpoint}/{id}/{token}"), true),
        (None, Some(token)) => (format!("{endpoint}/0/{token}"), false),
        _ => (format!("{endpoint}/0/0"), false),
    }
}
