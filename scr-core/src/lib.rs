//! Simulated car racing client protocol.
//! Host-driven: no I/O; host passes datagrams and timeouts and receives actions.

pub mod command;
pub mod policy;
pub mod protocol;
pub mod sensor;
pub mod session;
pub mod wire;

pub use command::ControlCommand;
pub use policy::{DrivePolicy, ModelPolicy, PolicyError, RuleBasedPolicy};
pub use protocol::{Marker, RangefinderConfig, Stage};
pub use sensor::{Readings, SensorFrame};
pub use session::{
    Action, EpisodeEnd, Session, SessionConfig, SessionError, SessionState, TickRecord,
};
pub use wire::{decode_command, decode_frame, encode_command, encode_init};
