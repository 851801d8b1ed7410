//! Reference rule-based driver: proportional steering, rpm-triggered shifting,
//! and an accel integrator chasing a target speed.

use crate::command::ControlCommand;
use crate::sensor::SensorFrame;

use super::{DrivePolicy, PolicyError};

/// Steering lock in radians (45°).
pub const STEER_LOCK: f64 = 0.785398;
pub const DEFAULT_MAX_SPEED: f64 = 100.0;
pub const SHIFT_UP_RPM: f64 = 7000.0;
pub const SHIFT_DOWN_RPM: f64 = 3000.0;
const ACCEL_STEP: f64 = 0.1;

/// State carried from one tick to the next within an episode.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RuleState {
    /// Rpm seen on the previous tick.
    pub prev_rpm: Option<f64>,
    /// Accel sent on the previous tick; base of the integrator.
    pub accel: f64,
    /// Gear sent on the previous tick; used when the frame omits gear.
    pub gear: Option<i32>,
}

#[derive(Debug, Clone)]
pub struct RuleBasedPolicy {
    max_speed: f64,
    state: RuleState,
}

impl RuleBasedPolicy {
    pub fn new(max_speed: f64) -> Self {
        Self {
            max_speed,
            state: RuleState::default(),
        }
    }

    pub fn state(&self) -> &RuleState {
        &self.state
    }

    /// Pure step: same frame and state always give the same command and next state.
    pub fn step(&self, frame: &SensorFrame, state: &RuleState) -> (ControlCommand, RuleState) {
        let mut cmd = ControlCommand::new();
        let mut next = *state;

        cmd.set_steer(steer(frame.angle.unwrap_or(0.0), frame.track_pos.unwrap_or(0.0)));

        let current_gear = frame.gear_number().or(state.gear).unwrap_or(1);
        let gear = match frame.rpm {
            Some(rpm) => {
                next.prev_rpm = Some(rpm);
                shift(current_gear, state.prev_rpm, rpm)
            }
            None => current_gear,
        };
        cmd.set_gear(gear);
        next.gear = cmd.gear();

        let accel = match frame.speed_x {
            Some(speed) => integrate_accel(state.accel, speed, self.max_speed),
            None => state.accel,
        };
        cmd.set_accel(accel);
        next.accel = cmd.accel().unwrap_or(0.0);

        cmd.set_brake(0.0);
        cmd.set_clutch(0.0);
        cmd.set_meta(false);
        (cmd, next)
    }
}

impl Default for RuleBasedPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SPEED)
    }
}

impl DrivePolicy for RuleBasedPolicy {
    fn name(&self) -> &str {
        "rule"
    }

    fn decide(&mut self, frame: &SensorFrame) -> Result<ControlCommand, PolicyError> {
        let (cmd, next) = self.step(frame, &self.state);
        self.state = next;
        Ok(cmd)
    }

    fn reset(&mut self) {
        self.state = RuleState::default();
    }
}

/// Unclamped steering request; the command clamps it to [-1, 1].
pub fn steer(angle: f64, track_pos: f64) -> f64 {
    (angle - track_pos * 0.5) / STEER_LOCK
}

/// Shift up when rpm is rising past the upper threshold, down when falling below the lower one.
/// No floor or ceiling is applied here beyond the command's legal gear range.
pub fn shift(gear: i32, prev_rpm: Option<f64>, rpm: f64) -> i32 {
    let up = match prev_rpm {
        None => true,
        Some(prev) => prev - rpm < 0.0,
    };
    if up && rpm > SHIFT_UP_RPM {
        gear + 1
    } else if !up && rpm < SHIFT_DOWN_RPM {
        gear - 1
    } else {
        gear
    }
}

pub fn integrate_accel(prev: f64, speed: f64, max_speed: f64) -> f64 {
    if speed < max_speed {
        (prev + ACCEL_STEP).min(1.0)
    } else {
        (prev - ACCEL_STEP).max(0.0)
    }
}
