//! Wire protocol for the printlink cloud bridge.
//!
//! Every frame is a JSON text message of the form
//! `{"type": <string>, "data": <object|null>}`.

pub mod constants;
pub mod envelope;
pub mod messages;
pub mod types;

// Re-export primary types for convenience.
pub use constants::MessageType;
pub use envelope::Frame;
pub use messages::{Demand, PayloadError};
pub use types::{IntervalKind, Intervals, PrinterState};
