//! Text codec: `(<key> <value> ...)` groups concatenated without separators.
//!
//! Decoding never fails. Bytes are read as lossy UTF-8, groups with no value or no
//! closing parenthesis are dropped, and unknown keys are left for the caller to ignore.

use std::fmt::Write;

use crate::command::ControlCommand;
use crate::protocol::RangefinderConfig;
use crate::sensor::SensorFrame;

/// Parsed groups in wire order. Values stay as strings until a typed view reads them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Groups(Vec<(String, Vec<String>)>);

impl Groups {
    pub fn parse(text: &str) -> Self {
        let mut out = Vec::new();
        let mut rest = text;
        while let Some(open) = rest.find('(') {
            let after = &rest[open + 1..];
            let Some(close) = after.find(')') else {
                break;
            };
            let mut tokens = after[..close].split_whitespace();
            if let Some(key) = tokens.next() {
                let values: Vec<String> = tokens.map(str::to_owned).collect();
                if !values.is_empty() {
                    out.push((key.to_owned(), values));
                }
            }
            rest = &after[close + 1..];
        }
        Groups(out)
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self::parse(&String::from_utf8_lossy(bytes))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Values of the last group with this key.
    pub fn get(&self, key: &str) -> Option<&[String]> {
        self.0
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_slice())
    }

    /// First value of `key` as a number.
    pub fn number(&self, key: &str) -> Option<f64> {
        self.get(key)?.first()?.parse().ok()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Decode a telemetry datagram into a sensor frame.
pub fn decode_frame(bytes: &[u8]) -> SensorFrame {
    SensorFrame::from_groups(&Groups::from_bytes(bytes))
}

/// Decode a command payload (server side of the protocol, and logging).
pub fn decode_command(bytes: &[u8]) -> ControlCommand {
    let groups = Groups::from_bytes(bytes);
    let mut cmd = ControlCommand::new();
    if let Some(v) = groups.number("accel") {
        cmd.set_accel(v);
    }
    if let Some(v) = groups.number("brake") {
        cmd.set_brake(v);
    }
    if let Some(v) = groups.number("gear") {
        cmd.set_gear(v.round() as i32);
    }
    if let Some(v) = groups.number("steer") {
        cmd.set_steer(v);
    }
    if let Some(v) = groups.number("clutch") {
        cmd.set_clutch(v);
    }
    if let Some(v) = groups.number("focus") {
        cmd.set_focus(v);
    }
    if let Some(v) = groups.number("meta") {
        cmd.set_meta(v != 0.0);
    }
    cmd
}

/// Encode a command. Unset fields are omitted, never written as zero.
pub fn encode_command(cmd: &ControlCommand) -> Vec<u8> {
    let mut msg = String::new();
    push_group(&mut msg, "accel", cmd.accel());
    push_group(&mut msg, "brake", cmd.brake());
    push_group(&mut msg, "gear", cmd.gear());
    push_group(&mut msg, "steer", cmd.steer());
    push_group(&mut msg, "clutch", cmd.clutch());
    push_group(&mut msg, "focus", cmd.focus());
    push_group(&mut msg, "meta", cmd.meta().map(u8::from));
    msg.into_bytes()
}

/// Identification message: bot id followed by one `init` group listing the rangefinder angles.
pub fn encode_init(bot_id: &str, rangefinders: &RangefinderConfig) -> Vec<u8> {
    let mut msg = String::from(bot_id);
    msg.push_str("(init");
    for a in rangefinders.angles() {
        let _ = write!(msg, " {a}");
    }
    msg.push(')');
    msg.into_bytes()
}

fn push_group<T: std::fmt::Display>(msg: &mut String, key: &str, value: Option<T>) {
    if let Some(v) = value {
        let _ = write!(msg, "({key} {v})");
    }
}
