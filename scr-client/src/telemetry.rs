//! Telemetry recording: one CSV row per driven tick, written by a background task.
//!
//! The drive loop only formats the row and hands it over with `try_send`. A full queue
//! or a failing disk drops rows; it never delays the next control send.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use scr_core::protocol::RANGEFINDER_COUNT;
use scr_core::sensor::{Readings, FOCUS_COUNT, OPPONENT_COUNT, WHEEL_COUNT};
use scr_core::TickRecord;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const QUEUE_DEPTH: usize = 1024;

/// Receives every driven tick. Implementations must not fail into the caller.
pub trait TelemetrySink: Send {
    fn record(&mut self, at: DateTime<Local>, tick: &TickRecord);
}

/// Run metadata written into every row.
#[derive(Debug, Clone)]
pub struct RunInfo {
    pub track: String,
    pub car: String,
}

pub struct CsvTelemetry {
    info: RunInfo,
    tx: Option<mpsc::Sender<String>>,
    writer: JoinHandle<()>,
    dropped: u64,
    path: PathBuf,
}

impl CsvTelemetry {
    /// Create `<dir>/telemetry_<timestamp>_<policy>.csv`, write the header and start the writer.
    pub async fn create(dir: &Path, policy: &str, info: RunInfo) -> std::io::Result<Self> {
        tokio::fs::create_dir_all(dir).await?;
        let stamp = Local::now().format("%Y%m%d_%H%M%S");
        let path = dir.join(format!("telemetry_{stamp}_{policy}.csv"));
        Self::create_at(path, info).await
    }

    pub async fn create_at(path: PathBuf, info: RunInfo) -> std::io::Result<Self> {
        let file = tokio::fs::File::create(&path).await?;
        let mut out = BufWriter::new(file);
        out.write_all(header().as_bytes()).await?;
        out.flush().await?;

        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        let writer = tokio::spawn(write_rows(out, rx, path.clone()));
        Ok(Self {
            info,
            tx: Some(tx),
            writer,
            dropped: 0,
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Close the queue and wait for pending rows to reach the file.
    pub async fn finish(mut self) {
        self.tx.take();
        if let Err(e) = (&mut self.writer).await {
            log::warn!("telemetry writer ended abnormally: {e}");
        }
        if self.dropped > 0 {
            log::warn!("{} telemetry rows dropped", self.dropped);
        }
    }
}

impl TelemetrySink for CsvTelemetry {
    fn record(&mut self, at: DateTime<Local>, tick: &TickRecord) {
        let Some(tx) = &self.tx else {
            return;
        };
        match tx.try_send(row(at, &self.info, tick)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.dropped += 1;
                log::debug!("telemetry queue full, row dropped");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                log::warn!("telemetry writer gone, recording stopped");
                self.tx = None;
            }
        }
    }
}

async fn write_rows(
    mut out: BufWriter<tokio::fs::File>,
    mut rx: mpsc::Receiver<String>,
    path: PathBuf,
) {
    while let Some(line) = rx.recv().await {
        if let Err(e) = out.write_all(line.as_bytes()).await {
            log::error!("telemetry write to {} failed: {e}", path.display());
            return;
        }
        if rx.is_empty() {
            let _ = out.flush().await;
        }
    }
    if let Err(e) = out.flush().await {
        log::error!("telemetry flush to {} failed: {e}", path.display());
    }
}

pub fn header() -> String {
    let mut cols: Vec<String> = [
        "timestamp",
        "track",
        "car",
        "episode",
        "step",
        "angle",
        "curLapTime",
        "damage",
        "distFromStart",
        "distRaced",
        "fuel",
        "gear",
        "lastLapTime",
        "racePos",
        "rpm",
        "speedX",
        "speedY",
        "speedZ",
        "trackPos",
        "z",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    cols.extend((0..FOCUS_COUNT).map(|i| format!("focus_{i}")));
    cols.extend((0..OPPONENT_COUNT).map(|i| format!("opponent_{i}")));
    cols.extend((0..RANGEFINDER_COUNT).map(|i| format!("track_{i}")));
    cols.extend((0..WHEEL_COUNT).map(|i| format!("wheelSpinVel_{i}")));
    cols.extend(
        ["accel", "brake", "clutch", "steer", "gear_cmd", "inputs"]
            .iter()
            .map(|s| s.to_string()),
    );
    let mut line = cols.join(",");
    line.push('\n');
    line
}

pub fn row(at: DateTime<Local>, info: &RunInfo, tick: &TickRecord) -> String {
    let f = &tick.frame;
    let c = &tick.command;
    let mut cells: Vec<String> = vec![
        at.to_rfc3339(),
        quote(&info.track),
        quote(&info.car),
        tick.episode.to_string(),
        tick.step.to_string(),
    ];
    for v in [
        f.angle,
        f.cur_lap_time,
        f.damage,
        f.dist_from_start,
        f.dist_raced,
        f.fuel,
        f.gear,
        f.last_lap_time,
        f.race_pos,
        f.rpm,
        f.speed_x,
        f.speed_y,
        f.speed_z,
        f.track_pos,
        f.z,
    ] {
        cells.push(cell(v));
    }
    push_readings(&mut cells, f.focus.as_ref());
    push_readings(&mut cells, f.opponents.as_ref());
    push_readings(&mut cells, f.track.as_ref());
    push_readings(&mut cells, f.wheel_spin_vel.as_ref());
    for v in [c.accel(), c.brake(), c.clutch(), c.steer()] {
        cells.push(cell(v));
    }
    cells.push(cell(c.gear()));
    cells.push(quote(&tick.inputs.join(",")));

    let mut line = cells.join(",");
    let _ = writeln!(line);
    line
}

fn push_readings<const N: usize>(cells: &mut Vec<String>, r: Option<&Readings<N>>) {
    match r {
        Some(r) => cells.extend(r.as_slice().iter().map(|v| cell(*v))),
        None => cells.extend(std::iter::repeat(String::new()).take(N)),
    }
}

fn cell<T: ToString>(v: Option<T>) -> String {
    v.map(|v| v.to_string()).unwrap_or_default()
}

fn quote(s: &str) -> String {
    if s.contains(|ch: char| matches!(ch, ',' | '"' | '\n')) {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_owned()
    }
}
