//! Human-driven policy. The input device is an injected capability: acquired when the
//! policy is built, polled once per tick, released at session teardown or drop.

use crate::command::ControlCommand;
use crate::sensor::SensorFrame;

use super::{DrivePolicy, PolicyError};

/// Analog inputs below this magnitude are not reported as active.
const ANALOG_LABEL_THRESHOLD: f64 = 0.1;

/// Device-independent view of what the driver is doing right now.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InputSnapshot {
    /// Positive steers left.
    pub steer: f64,
    pub throttle: f64,
    pub brake: f64,
    pub shift_up: bool,
    pub shift_down: bool,
    pub labels: Vec<String>,
}

/// Keys held on a keyboard.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyboardState {
    pub left: bool,
    pub right: bool,
    pub up: bool,
    pub down: bool,
    /// Gear down.
    pub z: bool,
    /// Gear up.
    pub x: bool,
}

/// Raw gamepad reading. Triggers report -1 released through 1 fully pressed.
#[derive(Debug, Clone, Copy, Default)]
pub struct GamepadState {
    pub stick_x: f64,
    pub right_trigger: f64,
    pub left_trigger: f64,
    pub button_a: bool,
    pub button_b: bool,
}

impl InputSnapshot {
    pub fn from_keyboard(keys: KeyboardState) -> Self {
        let mut s = InputSnapshot::default();
        if keys.left {
            s.steer = 1.0;
            s.labels.push("LEFT".into());
        } else if keys.right {
            s.steer = -1.0;
            s.labels.push("RIGHT".into());
        }
        if keys.up {
            s.throttle = 1.0;
            s.labels.push("UP".into());
        } else if keys.down {
            s.brake = 1.0;
            s.labels.push("DOWN".into());
        }
        if keys.z {
            s.shift_down = true;
            s.labels.push("Z".into());
        } else if keys.x {
            s.shift_up = true;
            s.labels.push("X".into());
        }
        s
    }

    pub fn from_gamepad(pad: GamepadState) -> Self {
        let mut s = InputSnapshot {
            steer: -pad.stick_x,
            throttle: (pad.right_trigger + 1.0) / 2.0,
            brake: (pad.left_trigger + 1.0) / 2.0,
            ..Default::default()
        };
        if s.steer.abs() > ANALOG_LABEL_THRESHOLD {
            s.labels.push(format!("STEER_{:.2}", s.steer));
        }
        if s.throttle > ANALOG_LABEL_THRESHOLD {
            s.labels.push(format!("ACCEL_{:.2}", s.throttle));
        }
        if s.brake > ANALOG_LABEL_THRESHOLD {
            s.labels.push(format!("BRAKE_{:.2}", s.brake));
        }
        if pad.button_a {
            s.shift_up = true;
            s.labels.push("GEAR_UP".into());
        }
        if pad.button_b {
            s.shift_down = true;
            s.labels.push("GEAR_DOWN".into());
        }
        s
    }
}

/// Source of driver input (keyboard, gamepad, replay file...).
pub trait InputDevice: Send {
    fn poll(&mut self) -> Result<InputSnapshot, PolicyError>;

    /// Give the device back. Called at most once.
    fn release(&mut self) {}
}

/// Gear held until the driver shifts.
const START_GEAR: i32 = 1;

pub struct HumanPolicy<D: InputDevice> {
    device: D,
    released: bool,
    gear: i32,
    last_inputs: Vec<String>,
}

impl<D: InputDevice> HumanPolicy<D> {
    pub fn new(device: D) -> Self {
        Self {
            device,
            released: false,
            gear: START_GEAR,
            last_inputs: Vec::new(),
        }
    }

    fn release(&mut self) {
        if !self.released {
            self.device.release();
            self.released = true;
        }
    }
}

impl<D: InputDevice> DrivePolicy for HumanPolicy<D> {
    fn name(&self) -> &str {
        "human"
    }

    fn decide(&mut self, frame: &SensorFrame) -> Result<ControlCommand, PolicyError> {
        if self.released {
            return Err(PolicyError::Device("input device released".into()));
        }
        let input = self.device.poll()?;
        let mut cmd = ControlCommand::new();
        cmd.set_steer(input.steer);
        cmd.set_accel(input.throttle);
        cmd.set_brake(input.brake);
        let reported = frame.gear_number().unwrap_or(self.gear);
        if input.shift_up {
            self.gear = reported + 1;
        } else if input.shift_down {
            self.gear = reported - 1;
        }
        cmd.set_gear(self.gear);
        if let Some(g) = cmd.gear() {
            self.gear = g;
        }
        self.last_inputs = input.labels;
        Ok(cmd)
    }

    fn reset(&mut self) {
        self.gear = START_GEAR;
        self.last_inputs.clear();
    }

    fn on_teardown(&mut self) {
        self.release();
    }

    fn active_inputs(&self) -> Vec<String> {
        self.last_inputs.clone()
    }
}

impl<D: InputDevice> Drop for HumanPolicy<D> {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Scripted {
        inputs: Vec<InputSnapshot>,
        releases: Arc<AtomicUsize>,
    }

    impl InputDevice for Scripted {
        fn poll(&mut self) -> Result<InputSnapshot, PolicyError> {
            if self.inputs.is_empty() {
                return Err(PolicyError::Device("unplugged".into()));
            }
            Ok(self.inputs.remove(0))
        }
        fn release(&mut self) {
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn third_gear() -> SensorFrame {
        SensorFrame {
            gear: Some(3.0),
            ..Default::default()
        }
    }

    #[test]
    fn keyboard_mapping() {
        let s = InputSnapshot::from_keyboard(KeyboardState {
            left: true,
            right: true,
            down: true,
            x: true,
            ..Default::default()
        });
        assert_eq!(s.steer, 1.0);
        assert_eq!(s.throttle, 0.0);
        assert_eq!(s.brake, 1.0);
        assert!(s.shift_up && !s.shift_down);
        assert_eq!(s.labels, vec!["LEFT", "DOWN", "X"]);
    }

    #[test]
    fn gamepad_mapping() {
        let s = InputSnapshot::from_gamepad(GamepadState {
            stick_x: 0.5,
            right_trigger: 1.0,
            left_trigger: -1.0,
            button_b: true,
            ..Default::default()
        });
        assert_eq!(s.steer, -0.5);
        assert_eq!(s.throttle, 1.0);
        assert_eq!(s.brake, 0.0);
        assert!(s.shift_down);
        assert_eq!(s.labels, vec!["STEER_-0.50", "ACCEL_1.00", "GEAR_DOWN"]);
    }

    #[test]
    fn shifts_relative_to_reported_gear() {
        let releases = Arc::new(AtomicUsize::new(0));
        let mut p = HumanPolicy::new(Scripted {
            inputs: vec![
                InputSnapshot::from_keyboard(KeyboardState {
                    up: true,
                    x: true,
                    ..Default::default()
                }),
                InputSnapshot::from_keyboard(KeyboardState::default()),
            ],
            releases: releases.clone(),
        });
        let cmd = p.decide(&third_gear()).unwrap();
        assert_eq!(cmd.gear(), Some(4));
        assert_eq!(cmd.accel(), Some(1.0));
        assert_eq!(p.active_inputs(), vec!["UP", "X"]);

        let cmd = p.decide(&third_gear()).unwrap();
        assert_eq!(cmd.gear(), Some(4));
        assert!(p.active_inputs().is_empty());

        assert!(matches!(
            p.decide(&third_gear()),
            Err(PolicyError::Device(_))
        ));
    }

    #[test]
    fn device_released_once() {
        let releases = Arc::new(AtomicUsize::new(0));
        let mut p = HumanPolicy::new(Scripted {
            inputs: vec![InputSnapshot::default()],
            releases: releases.clone(),
        });
        p.on_shutdown();
        assert_eq!(releases.load(Ordering::SeqCst), 0);
        p.on_teardown();
        assert_eq!(releases.load(Ordering::SeqCst), 1);
        assert!(p.decide(&third_gear()).is_err());
        drop(p);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn holds_first_gear_without_shifting() {
        let releases = Arc::new(AtomicUsize::new(0));
        let up = InputSnapshot::from_keyboard(KeyboardState {
            up: true,
            ..Default::default()
        });
        let mut p = HumanPolicy::new(Scripted {
            inputs: vec![up.clone(), up],
            releases,
        });
        let neutral = SensorFrame {
            gear: Some(0.0),
            rpm: Some(900.0),
            ..Default::default()
        };
        let cmd = p.decide(&neutral).unwrap();
        assert_eq!(cmd.gear(), Some(1));
        assert_eq!(
            crate::wire::encode_command(&cmd),
            b"(accel 1)(brake 0)(gear 1)(steer 0)".to_vec()
        );

        // A new episode starts from first gear again.
        p.reset();
        assert_eq!(p.decide(&third_gear()).unwrap().gear(), Some(1));
    }
}
