//! Sensor frame: one telemetry message from the server.
//!
//! Every field is optional. A key missing from the wire stays `None` so policies
//! can tell "reported zero" apart from "not reported".

use crate::protocol::RANGEFINDER_COUNT;
use crate::wire::Groups;

pub const FOCUS_COUNT: usize = 5;
pub const OPPONENT_COUNT: usize = 36;
pub const WHEEL_COUNT: usize = 4;

/// Fixed-size sensor array. Slots the server did not fill are `None`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Readings<const N: usize>([Option<f64>; N]);

impl<const N: usize> Readings<N> {
    /// Collect up to `N` values; extra values are dropped, missing ones stay unset.
    pub fn from_values<I: IntoIterator<Item = Option<f64>>>(values: I) -> Self {
        let mut out = [None; N];
        for (slot, v) in out.iter_mut().zip(values) {
            *slot = v;
        }
        Self(out)
    }

    pub fn get(&self, i: usize) -> Option<f64> {
        self.0.get(i).copied().flatten()
    }

    pub fn as_slice(&self) -> &[Option<f64>; N] {
        &self.0
    }

    pub const fn len(&self) -> usize {
        N
    }

    pub const fn is_empty(&self) -> bool {
        N == 0
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SensorFrame {
    /// Angle between car heading and track axis (rad).
    pub angle: Option<f64>,
    pub cur_lap_time: Option<f64>,
    pub damage: Option<f64>,
    pub dist_from_start: Option<f64>,
    pub dist_raced: Option<f64>,
    pub fuel: Option<f64>,
    pub gear: Option<f64>,
    pub last_lap_time: Option<f64>,
    pub race_pos: Option<f64>,
    pub rpm: Option<f64>,
    pub speed_x: Option<f64>,
    pub speed_y: Option<f64>,
    pub speed_z: Option<f64>,
    /// Lateral offset from track axis; ±1 at the edges.
    pub track_pos: Option<f64>,
    pub z: Option<f64>,
    pub focus: Option<Readings<FOCUS_COUNT>>,
    pub opponents: Option<Readings<OPPONENT_COUNT>>,
    pub track: Option<Readings<RANGEFINDER_COUNT>>,
    pub wheel_spin_vel: Option<Readings<WHEEL_COUNT>>,
}

impl SensorFrame {
    /// Assemble a frame from parsed groups. Unknown keys and unparsable values are ignored.
    pub fn from_groups(groups: &Groups) -> Self {
        let mut frame = SensorFrame::default();
        for (key, values) in groups.iter() {
            let first = || values.first().and_then(|v| parse_number(v));
            match key {
                "angle" => frame.angle = first(),
                "curLapTime" => frame.cur_lap_time = first(),
                "damage" => frame.damage = first(),
                "distFromStart" => frame.dist_from_start = first(),
                "distRaced" => frame.dist_raced = first(),
                "fuel" => frame.fuel = first(),
                "gear" => frame.gear = first(),
                "lastLapTime" => frame.last_lap_time = first(),
                "racePos" => frame.race_pos = first(),
                "rpm" => frame.rpm = first(),
                "speedX" => frame.speed_x = first(),
                "speedY" => frame.speed_y = first(),
                "speedZ" => frame.speed_z = first(),
                "trackPos" => frame.track_pos = first(),
                "z" => frame.z = first(),
                "focus" => frame.focus = Some(readings(values)),
                "opponents" => frame.opponents = Some(readings(values)),
                "track" => frame.track = Some(readings(values)),
                "wheelSpinVel" => frame.wheel_spin_vel = Some(readings(values)),
                _ => log::trace!("ignoring unknown sensor group {key}"),
            }
        }
        frame
    }

    /// Reported gear as an integer, if present.
    pub fn gear_number(&self) -> Option<i32> {
        self.gear.map(|g| g.round() as i32)
    }
}

fn readings<const N: usize>(values: &[String]) -> Readings<N> {
    Readings::from_values(values.iter().map(|v| parse_number(v)))
}

fn parse_number(s: &str) -> Option<f64> {
    s.parse::<f64>().ok().filter(|v| !v.is_nan())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readings_pad_and_truncate() {
        let short: Readings<4> = Readings::from_values([Some(1.0), Some(2.0)]);
        assert_eq!(short.get(1), Some(2.0));
        assert_eq!(short.get(2), None);
        assert_eq!(short.get(9), None);

        let long: Readings<2> = Readings::from_values([Some(1.0), Some(2.0), Some(3.0)]);
        assert_eq!(long.as_slice(), &[Some(1.0), Some(2.0)]);
        assert_eq!(long.len(), 2);
    }

    #[test]
    fn missing_keys_stay_unset() {
        let groups = Groups::parse("(rpm 0)(speedX 12.5)");
        let frame = SensorFrame::from_groups(&groups);
        assert_eq!(frame.rpm, Some(0.0));
        assert_eq!(frame.speed_x, Some(12.5));
        assert_eq!(frame.angle, None);
        assert!(frame.track.is_none());
    }

    #[test]
    fn bad_number_is_unset() {
        let groups = Groups::parse("(rpm abc)(gear 3)(track 1 x 3)");
        let frame = SensorFrame::from_groups(&groups);
        assert_eq!(frame.rpm, None);
        assert_eq!(frame.gear_number(), Some(3));
        let track = frame.track.unwrap();
        assert_eq!(track.get(0), Some(1.0));
        assert_eq!(track.get(1), None);
        assert_eq!(track.get(2), Some(3.0));
        assert_eq!(track.get(18), None);
    }
}
