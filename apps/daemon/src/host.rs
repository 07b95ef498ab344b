//! Standalone collaborators for running without a machine host.
//!
//! The daemon reports the controller host itself (system facts, network,
//! cpu stats). There is no firmware behind it, so the machine is always
//! disconnected and no job ever runs.

use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;

use printlink_bridge::collaborators::{ControlFuture, NetworkFuture};
use printlink_bridge::{
    Collaborators, ControlError, FirmwareVersion, HostIntrospection, JobStateProvider,
    MachineControl, MetadataProvider, NetworkInfo, SystemInfo, UiConnectionRegistry,
};
use printlink_telemetry::{FileMetadata, JobStats, MachineState, UiConnection};

pub fn standalone() -> Collaborators {
    Collaborators {
        job: Arc::new(NoJob),
        machine: Arc::new(NoMachine),
        metadata: Arc::new(NoMetadata),
        host: Arc::new(LocalHost),
        ui: Arc::new(NoUi),
    }
}

struct NoJob;

impl JobStateProvider for NoJob {
    fn last_stats(&self) -> JobStats {
        JobStats::default()
    }
}

struct NoMachine;

impl MachineControl for NoMachine {
    fn is_connected(&self) -> bool {
        false
    }

    fn state(&self) -> MachineState {
        MachineState::Disconnected
    }

    fn pause(&self) -> ControlFuture<'_> {
        Box::pin(async { Err(ControlError::NotConnected) })
    }

    fn resume(&self) -> ControlFuture<'_> {
        Box::pin(async { Err(ControlError::NotConnected) })
    }

    fn cancel(&self) -> ControlFuture<'_> {
        Box::pin(async { Err(ControlError::NotConnected) })
    }

    fn run_script(&self, _script: String) -> ControlFuture<'_> {
        Box::pin(async { Err(ControlError::NotConnected) })
    }
}

struct NoMetadata;

impl MetadataProvider for NoMetadata {
    fn metadata(&self, _filename: &str) -> FileMetadata {
        FileMetadata::default()
    }
}

struct NoUi;

impl UiConnectionRegistry for NoUi {
    fn web_connections(&self) -> Vec<UiConnection> {
        Vec::new()
    }
}

/// Introspection of the machine the daemon runs on.
struct LocalHost;

impl HostIntrospection for LocalHost {
    fn system_info(&self) -> SystemInfo {
        let (cpu_model, cpu_desc) = std::fs::read_to_string("/proc/cpuinfo")
            .map(|s| parse_cpuinfo(&s))
            .unwrap_or_default();
        let distribution = std::fs::read_to_string("/etc/os-release")
            .ok()
            .and_then(|s| parse_os_release(&s))
            .unwrap_or_default();
        SystemInfo {
            api: "printlink".into(),
            api_version: env!("CARGO_PKG_VERSION").into(),
            runtime_version: String::new(),
            cpu_model,
            cpu_desc,
            distribution,
        }
    }

    fn public_network(&self) -> NetworkFuture<'_> {
        Box::pin(async {
            match tokio::task::spawn_blocking(local_network).await {
                Ok(info) => info,
                Err(e) => {
                    tracing::warn!(error = %e, "network lookup failed");
                    NetworkInfo::default()
                }
            }
        })
    }

    fn firmware(&self) -> Option<FirmwareVersion> {
        None
    }
}

/// Picks the first routable IPv4 interface.
fn local_network() -> NetworkInfo {
    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_default();

    let iface = if_addrs::get_if_addrs().ok().and_then(|ifaces| {
        ifaces
            .into_iter()
            .find(|iface| !iface.is_loopback() && is_routable(&iface.ip()))
    });

    match iface {
        Some(iface) => NetworkInfo {
            is_wifi: is_wireless(&iface.name),
            ssid: None,
            address: Some(iface.ip().to_string()),
            hostname,
        },
        None => NetworkInfo {
            hostname,
            ..Default::default()
        },
    }
}

/// IPv4, not loopback and not link-local (169.254.x.x).
fn is_routable(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => !v4.is_loopback() && !v4.is_link_local(),
        IpAddr::V6(_) => false,
    }
}

fn is_wireless(iface: &str) -> bool {
    Path::new("/sys/class/net")
        .join(iface)
        .join("wireless")
        .exists()
}

/// Extracts `(model, description)` from `/proc/cpuinfo`.
///
/// ARM boards put the board name under `Model`; x86 has `model name`. Some
/// kernels report a bare number as `model`, which the caller treats as
/// missing.
fn parse_cpuinfo(content: &str) -> (String, String) {
    let mut model = String::new();
    let mut desc = String::new();
    for line in content.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "Model" if model.is_empty() => model = value.to_string(),
            "model" if model.is_empty() => model = value.to_string(),
            "model name" | "Processor" if desc.is_empty() => desc = value.to_string(),
            _ => {}
        }
    }
    (model, desc)
}

/// Returns `PRETTY_NAME`, falling back to `NAME`.
fn parse_os_release(content: &str) -> Option<String> {
    let mut name = None;
    for line in content.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim().trim_matches('"').to_string();
        match key.trim() {
            "PRETTY_NAME" if !value.is_empty() => return Some(value),
            "NAME" if !value.is_empty() => name = Some(value),
            _ => {}
        }
    }
    name
}
