//! Racing server protocol: control markers, rangefinder layout, race stage.

/// Reply substring confirming the server accepted our identification.
pub const IDENTIFIED_MARKER: &str = "***identified***";
/// Server is tearing the race down.
pub const SHUTDOWN_MARKER: &str = "***shutdown***";
/// Server is restarting the race; a new episode begins.
pub const RESTART_MARKER: &str = "***restart***";

/// Number of track-edge rangefinders.
pub const RANGEFINDER_COUNT: usize = 19;

/// Control-plane marker carried in a server datagram, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    Identified,
    Shutdown,
    Restart,
}

impl Marker {
    /// Scan a payload for a control marker. Shutdown wins over restart when both appear.
    pub fn scan(payload: &str) -> Option<Marker> {
        if payload.contains(SHUTDOWN_MARKER) {
            Some(Marker::Shutdown)
        } else if payload.contains(RESTART_MARKER) {
            Some(Marker::Restart)
        } else if payload.contains(IDENTIFIED_MARKER) {
            Some(Marker::Identified)
        } else {
            None
        }
    }
}

/// The 19 rangefinder angles (degrees) announced once at identification.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangefinderConfig {
    angles: [f64; RANGEFINDER_COUNT],
}

impl RangefinderConfig {
    /// Outer five per side step 15° inward from ±90°, inner four per side step 5° inward
    /// from ±20°, and the centre ray points straight ahead.
    pub fn standard() -> Self {
        let mut angles = [0.0; RANGEFINDER_COUNT];
        for i in 0..5 {
            let a = -90.0 + 15.0 * i as f64;
            angles[i] = a;
            angles[RANGEFINDER_COUNT - 1 - i] = -a;
        }
        for i in 5..9 {
            let a = -20.0 + 5.0 * (i - 5) as f64;
            angles[i] = a;
            angles[RANGEFINDER_COUNT - 1 - i] = -a;
        }
        Self { angles }
    }

    pub fn angles(&self) -> &[f64; RANGEFINDER_COUNT] {
        &self.angles
    }
}

impl Default for RangefinderConfig {
    fn default() -> Self {
        Self::standard()
    }
}

/// Race stage the client was started for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    WarmUp,
    Qualifying,
    Race,
    Unknown,
}

impl Stage {
    /// Map the numeric stage used on the command line; anything unrecognised is `Unknown`.
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => Stage::WarmUp,
            1 => Stage::Qualifying,
            2 => Stage::Race,
            _ => Stage::Unknown,
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Stage::WarmUp => 0,
            Stage::Qualifying => 1,
            Stage::Race => 2,
            Stage::Unknown => 3,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Stage::WarmUp => "warm-up",
            Stage::Qualifying => "qualifying",
            Stage::Race => "race",
            Stage::Unknown => "unknown",
        };
        f.write_str(s)
    }
}
