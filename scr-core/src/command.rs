//! Control command: actuator intents sent back to the server each tick.

/// Lowest legal gear (reverse).
pub const MIN_GEAR: i32 = -1;
/// Highest legal gear.
pub const MAX_GEAR: i32 = 6;

/// One control message. `None` means "no opinion" and is omitted on the wire.
/// Setters clamp to the legal range, so a built command is always sendable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ControlCommand {
    accel: Option<f64>,
    brake: Option<f64>,
    clutch: Option<f64>,
    steer: Option<f64>,
    gear: Option<i32>,
    focus: Option<f64>,
    meta: Option<bool>,
}

impl ControlCommand {
    pub fn new() -> Self {
        Self::default()
    }

    /// Safe fallback when a policy cannot decide: no throttle, no brake, wheels straight, first gear.
    pub fn neutral() -> Self {
        let mut c = Self::new();
        c.set_accel(0.0);
        c.set_brake(0.0);
        c.set_clutch(0.0);
        c.set_steer(0.0);
        c.set_gear(1);
        c
    }

    /// Ask the server to end the episode.
    pub fn terminate() -> Self {
        let mut c = Self::new();
        c.set_meta(true);
        c
    }

    pub fn accel(&self) -> Option<f64> {
        self.accel
    }
    pub fn brake(&self) -> Option<f64> {
        self.brake
    }
    pub fn clutch(&self) -> Option<f64> {
        self.clutch
    }
    pub fn steer(&self) -> Option<f64> {
        self.steer
    }
    pub fn gear(&self) -> Option<i32> {
        self.gear
    }
    pub fn focus(&self) -> Option<f64> {
        self.focus
    }
    pub fn meta(&self) -> Option<bool> {
        self.meta
    }

    /// Whether this command requests episode termination.
    pub fn is_terminate(&self) -> bool {
        self.meta == Some(true)
    }

    pub fn set_accel(&mut self, v: f64) {
        self.accel = clamp(v, 0.0, 1.0);
    }
    pub fn set_brake(&mut self, v: f64) {
        self.brake = clamp(v, 0.0, 1.0);
    }
    pub fn set_clutch(&mut self, v: f64) {
        self.clutch = clamp(v, 0.0, 1.0);
    }
    pub fn set_steer(&mut self, v: f64) {
        self.steer = clamp(v, -1.0, 1.0);
    }
    pub fn set_gear(&mut self, g: i32) {
        self.gear = Some(g.clamp(MIN_GEAR, MAX_GEAR));
    }
    /// Focus sensor direction in degrees, limited to ±90°.
    pub fn set_focus(&mut self, deg: f64) {
        self.focus = clamp(deg, -90.0, 90.0);
    }
    pub fn set_meta(&mut self, terminate: bool) {
        self.meta = Some(terminate);
    }
}

// NaN carries no intent; treat it as unset.
fn clamp(v: f64, lo: f64, hi: f64) -> Option<f64> {
    if v.is_nan() {
        None
    } else {
        Some(v.clamp(lo, hi))
    }
}
