//! Machine-side events delivered to the bridge.

use printlink_telemetry::{JobEnd, MachineState, ProcStats, StatusUpdate, UiConnection};

/// Something happened on the machine host.
///
/// The host integration translates its own notifications into these and
/// posts them through a [`BridgeHandle`](crate::BridgeHandle).
#[derive(Debug, Clone, PartialEq)]
pub enum MachineEvent {
    /// The firmware connection came up in `state`.
    Startup { state: MachineState },
    /// The machine is ready. `heaters` lists the available heater devices;
    /// `initial` carries the first full status, if the host has one.
    Ready {
        heaters: Vec<String>,
        initial: Option<StatusUpdate>,
    },
    Shutdown,
    Disconnected,

    PrintStarted,
    PrintPaused,
    PrintResumed,
    PrintEnded(JobEnd),

    /// A pause/resume/cancel was requested locally.
    PauseRequested,
    ResumeRequested,
    CancelRequested,

    Status(StatusUpdate),
    ProcStats(ProcStats),

    UiIdentified(UiConnection),
    UiRemoved { id: u64 },

    /// Firmware response text.
    GcodeResponse(String),
    /// A gcode script submitted by any client.
    GcodeReceived(String),
}
