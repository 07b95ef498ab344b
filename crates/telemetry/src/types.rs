//! Inputs consumed by the telemetry pipeline.

use std::collections::HashMap;

use printlink_protocol::PrinterState;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Lifecycle state of the machine firmware connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MachineState {
    #[default]
    Disconnected,
    Startup,
    Ready,
    Error,
    Shutdown,
}

impl MachineState {
    /// Printer state reported when a job ends or the machine changes state
    /// outside of a job.
    pub fn printer_state(&self) -> PrinterState {
        match self {
            Self::Ready => PrinterState::Operational,
            Self::Error | Self::Shutdown => PrinterState::Error,
            Self::Disconnected | Self::Startup => PrinterState::Offline,
        }
    }
}

/// State of the print job as tracked by the host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    #[default]
    Standby,
    Printing,
    Paused,
    Complete,
    Cancelled,
    Error,
}

/// Snapshot of the last job statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobStats {
    pub state: JobState,
    /// Seconds spent actually printing.
    pub print_duration: f64,
    pub filename: String,
}

/// How a job left the printing/paused states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobEnd {
    Complete,
    Cancelled,
    Failed,
    Standby,
}

impl JobEnd {
    /// The `job_info` flag reported for this outcome, if any.
    pub fn flag(&self) -> Option<&'static str> {
        match self {
            Self::Complete => Some("finished"),
            Self::Cancelled => Some("cancelled"),
            Self::Failed => Some("failed"),
            Self::Standby => None,
        }
    }
}

/// Slicer metadata of the file being printed. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileMetadata {
    #[serde(default)]
    pub filament_total: Option<f64>,
    #[serde(default)]
    pub estimated_time: Option<f64>,
    #[serde(default)]
    pub layer_height: Option<f64>,
    #[serde(default)]
    pub first_layer_height: Option<f64>,
    #[serde(default)]
    pub layer_count: Option<i64>,
    #[serde(default)]
    pub object_height: Option<f64>,
}

/// Host process statistics as delivered by the proc sampler.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcStats {
    /// System-wide cpu usage in percent. `None` until two samples exist.
    pub cpu_usage: Option<f64>,
    /// CPU temperature in Celsius.
    pub cpu_temp: Option<f64>,
    pub memory_used: Option<u64>,
    pub memory_total: Option<u64>,
}

/// Partial heater update. Missing fields keep their previous value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HeaterUpdate {
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub target: Option<f64>,
}

/// Partial machine status update, keyed the way the machine reports it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    /// Keyed by device name (`extruder`, `extruder1`, `heater_bed`).
    #[serde(default)]
    pub heaters: HashMap<String, HeaterUpdate>,
    /// Print progress in `0.0..=1.0`.
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub bed_mesh: Option<Map<String, Value>>,
    /// Active extruder device name.
    #[serde(default)]
    pub active_extruder: Option<String>,
    /// `[x, y, z, e]`.
    #[serde(default)]
    pub gcode_position: Option<[f64; 4]>,
}

/// Current heater reading.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HeaterReading {
    pub temperature: f64,
    pub target: f64,
}

/// Accumulated machine status.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MachineStatus {
    pub heaters: HashMap<String, HeaterReading>,
    pub progress: Option<f64>,
    pub bed_mesh: Option<Map<String, Value>>,
    pub active_extruder: Option<String>,
    pub gcode_position: Option<[f64; 4]>,
}

impl MachineStatus {
    /// Merges a partial update into the accumulated status.
    pub fn apply(&mut self, update: &StatusUpdate) {
        for (name, upd) in &update.heaters {
            let reading = self.heaters.entry(name.clone()).or_default();
            if let Some(t) = upd.temperature {
                reading.temperature = t;
            }
            if let Some(t) = upd.target {
                reading.target = t;
            }
        }
        if update.progress.is_some() {
            self.progress = update.progress;
        }
        if update.bed_mesh.is_some() {
            self.bed_mesh = update.bed_mesh.clone();
        }
        if update.active_extruder.is_some() {
            self.active_extruder = update.active_extruder.clone();
        }
        if update.gcode_position.is_some() {
            self.gcode_position = update.gcode_position;
        }
    }
}

/// A UI client connected to the machine host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UiConnection {
    pub id: u64,
    /// Client type as identified by the host (`web`, `mobile`, ...).
    pub client_type: String,
    pub name: String,
    pub version: String,
}

impl UiConnection {
    pub fn is_web(&self) -> bool {
        self.client_type == "web"
    }
}
