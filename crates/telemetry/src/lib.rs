//! Telemetry reporting pipeline for the printlink bridge.
//!
//! Holds the last-sent report cache, the ambient and layer detectors, the
//! missed job event queue and the [`TelemetryScheduler`] that ties them
//! together. Also provides a host proc-stats sampler for setups where the
//! machine host does not report its own.

pub mod ambient;
pub mod buffer;
pub mod cache;
pub mod layer;
pub mod outbox;
pub mod sampler;
pub mod scheduler;
pub mod types;

#[cfg(target_os = "linux")]
#[path = "sysfs_linux.rs"]
mod platform;

#[cfg(not(target_os = "linux"))]
#[path = "sysfs_other.rs"]
mod platform;

pub use ambient::{AmbientDetector, AMBIENT_TICK, INITIAL_AMBIENT};
pub use buffer::MissedJobQueue;
pub use cache::{diff, ReportCache};
pub use layer::LayerDetector;
pub use outbox::Outbox;
pub use sampler::ProcSampler;
pub use scheduler::TelemetryScheduler;
pub use types::{
    FileMetadata, HeaterUpdate, JobEnd, JobState, JobStats, MachineState, ProcStats, StatusUpdate,
    UiConnection,
};
