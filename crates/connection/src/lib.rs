//! Websocket connection to the cloud service.
//!
//! Provides a [`WsClient`] for a single socket (read/write/ping pumps), the
//! [`ConnectionManager`] that owns reconnection, keepalive and URL
//! construction, and the [`InfoStore`] where issued credentials persist.

pub mod manager;
pub(crate) mod pumps;
pub(crate) mod reconnection;
pub mod store;
pub mod types;
pub mod ws_client;

pub use manager::ConnectionManager;
pub use store::{InfoStore, StoreError};
pub use types::{CloseInfo, ConnectionEvent, EndpointSettings};
pub use ws_client::{WsClient, WsError};
