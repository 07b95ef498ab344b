//! Host-side collaborators consumed by the bridge.
//!
//! The bridge never talks to the machine host directly. Job state, machine
//! control, file metadata, host introspection and the UI-connection
//! registry are injected as trait objects at construction.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use printlink_telemetry::{FileMetadata, JobStats, MachineState, UiConnection};

/// A boxed future returned by machine actions.
pub type ControlFuture<'a> = Pin<Box<dyn Future<Output = Result<(), ControlError>> + Send + 'a>>;

/// A boxed future returned by network introspection.
pub type NetworkFuture<'a> = Pin<Box<dyn Future<Output = NetworkInfo> + Send + 'a>>;

/// Errors from machine actions.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("machine not connected")]
    NotConnected,

    #[error("machine rejected the request: {0}")]
    Rejected(String),

    #[error("action not supported")]
    Unsupported,
}

/// Last statistics of the current or most recent print job.
pub trait JobStateProvider: Send + Sync + 'static {
    fn last_stats(&self) -> JobStats;
}

/// Actions on the machine firmware.
pub trait MachineControl: Send + Sync + 'static {
    fn is_connected(&self) -> bool;

    fn state(&self) -> MachineState;

    fn pause(&self) -> ControlFuture<'_>;

    fn resume(&self) -> ControlFuture<'_>;

    fn cancel(&self) -> ControlFuture<'_>;

    /// Runs a gcode script (lines joined with `\n`).
    fn run_script(&self, script: String) -> ControlFuture<'_>;
}

/// Slicer metadata lookup for job files.
pub trait MetadataProvider: Send + Sync + 'static {
    /// Returns the metadata of `filename`, empty when unknown.
    fn metadata(&self, filename: &str) -> FileMetadata;
}

/// System and network facts about the controller host.
pub trait HostIntrospection: Send + Sync + 'static {
    fn system_info(&self) -> SystemInfo;

    /// Resolves the network used to reach the internet. May take a while.
    fn public_network(&self) -> NetworkFuture<'_>;

    /// Firmware version of the connected machine, if known.
    fn firmware(&self) -> Option<FirmwareVersion>;
}

/// Registry of UI clients connected to the machine host.
pub trait UiConnectionRegistry: Send + Sync + 'static {
    /// Web connections, longest lived first.
    fn web_connections(&self) -> Vec<UiConnection>;
}

/// The full set of collaborators handed to the bridge.
#[derive(Clone)]
pub struct Collaborators {
    pub job: Arc<dyn JobStateProvider>,
    pub machine: Arc<dyn MachineControl>,
    pub metadata: Arc<dyn MetadataProvider>,
    pub host: Arc<dyn HostIntrospection>,
    pub ui: Arc<dyn UiConnectionRegistry>,
}

/// Static facts about the host system.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SystemInfo {
    /// Name of the host API (e.g. `Moonraker`).
    pub api: String,
    pub api_version: String,
    /// Version of the host's runtime.
    pub runtime_version: String,
    pub cpu_model: String,
    pub cpu_desc: String,
    pub distribution: String,
}

/// Network the host uses to reach the remote service.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NetworkInfo {
    pub is_wifi: bool,
    pub ssid: Option<String>,
    pub address: Option<String>,
    pub hostname: String,
}

/// Firmware version string as reported by the machine.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FirmwareVersion {
    pub version: String,
    pub date: Option<String>,
}
