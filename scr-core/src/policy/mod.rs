//! Decision policies: turn a sensor frame into a control command.
//!
//! The session picks one policy at construction and talks to it only through
//! [`DrivePolicy`]. Policy state is private to the implementation, survives across
//! ticks of one episode and is cleared by [`DrivePolicy::reset`] when a new episode starts.

pub mod human;
pub mod model;
pub mod rule;

pub use human::{GamepadState, HumanPolicy, InputDevice, InputSnapshot, KeyboardState};
pub use model::{ModelError, ModelPolicy, NetworkArtifact};
pub use rule::{RuleBasedPolicy, RuleState};

use crate::command::ControlCommand;
use crate::sensor::SensorFrame;

/// A policy could not produce a command this tick. The session answers with
/// [`ControlCommand::neutral`] instead.
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("policy unavailable: {0}")]
    Unavailable(String),
    #[error("input device error: {0}")]
    Device(String),
}

pub trait DrivePolicy: Send {
    /// Short label used in logs and telemetry file names.
    fn name(&self) -> &str;

    /// Decide the command for one frame.
    fn decide(&mut self, frame: &SensorFrame) -> Result<ControlCommand, PolicyError>;

    /// Clear per-episode state. Called before the first frame of every episode.
    fn reset(&mut self);

    /// Server signalled shutdown.
    fn on_shutdown(&mut self) {}

    /// Server signalled restart.
    fn on_restart(&mut self) {}

    /// The run is over; no further episode follows. Give back any held devices.
    fn on_teardown(&mut self) {}

    /// Labels of inputs active during the last decision (human policies only).
    fn active_inputs(&self) -> Vec<String> {
        Vec::new()
    }
}

impl<P: DrivePolicy + ?Sized> DrivePolicy for Box<P> {
    fn name(&self) -> &str {
        (**self).name()
    }
    fn decide(&mut self, frame: &SensorFrame) -> Result<ControlCommand, PolicyError> {
        (**self).decide(frame)
    }
    fn reset(&mut self) {
        (**self).reset()
    }
    fn on_shutdown(&mut self) {
        (**self).on_shutdown()
    }
    fn on_restart(&mut self) {
        (**self).on_restart()
    }
    fn on_teardown(&mut self) {
        (**self).on_teardown()
    }
    fn active_inputs(&self) -> Vec<String> {
        (**self).active_inputs()
    }
}
