//! Cloud bridge for a 3D printer host.
//!
//! The [`Bridge`] actor owns all reporting state. Machine events arrive
//! through a [`BridgeHandle`], remote frames through the
//! [`ConnectionManager`](printlink_connection::ConnectionManager), and the
//! host is reached through the traits in [`collaborators`].

pub mod bridge;
pub mod collaborators;
pub mod config;
pub mod dispatcher;
pub mod events;
pub mod machine_info;
pub mod timers;

pub use bridge::{Bridge, BridgeHandle};
pub use collaborators::{
    Collaborators, ControlError, FirmwareVersion, HostIntrospection, JobStateProvider,
    MachineControl, MetadataProvider, NetworkInfo, SystemInfo, UiConnectionRegistry,
};
pub use config::{Config, ConfigError};
pub use dispatcher::{Dispatched, ProtocolDispatcher};
pub use events::MachineEvent;
pub use timers::{TimerHandle, schedule_after};
