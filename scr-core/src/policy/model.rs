//! Learned policy: a small dense network evaluated on a fixed feature vector.
//!
//! The artifact is JSON produced offline: a standard scaler (per-feature mean and
//! scale) followed by dense layers, ReLU on every layer but the last. Output order is
//! accel, brake, steer, gear.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::command::ControlCommand;
use crate::protocol::RANGEFINDER_COUNT;
use crate::sensor::SensorFrame;

use super::{DrivePolicy, PolicyError};

/// 19 track distances, then trackPos, angle, speedX, speedY, speedZ, rpm, gear.
pub const FEATURE_COUNT: usize = RANGEFINDER_COUNT + 7;
pub const OUTPUT_COUNT: usize = 4;
const MIN_MODEL_GEAR: i32 = 1;
const MAX_MODEL_GEAR: i32 = 6;

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("read model artifact: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse model artifact: {0}")]
    Json(#[from] serde_json::Error),
    #[error("bad model shape: {0}")]
    Shape(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scaler {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

/// `weights[o][i]` connects input `i` to output `o`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DenseLayer {
    pub weights: Vec<Vec<f64>>,
    pub bias: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkArtifact {
    pub scaler: Scaler,
    pub layers: Vec<DenseLayer>,
}

impl NetworkArtifact {
    pub fn from_json(s: &str) -> Result<Self, ModelError> {
        let artifact: NetworkArtifact = serde_json::from_str(s)?;
        artifact.validate()?;
        Ok(artifact)
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        if self.scaler.mean.len() != FEATURE_COUNT || self.scaler.scale.len() != FEATURE_COUNT {
            return Err(ModelError::Shape(format!(
                "scaler must have {FEATURE_COUNT} entries"
            )));
        }
        if self.layers.is_empty() {
            return Err(ModelError::Shape("no layers".into()));
        }
        let mut width = FEATURE_COUNT;
        for (n, layer) in self.layers.iter().enumerate() {
            if layer.weights.len() != layer.bias.len() {
                return Err(ModelError::Shape(format!(
                    "layer {n}: {} weight rows, {} biases",
                    layer.weights.len(),
                    layer.bias.len()
                )));
            }
            if let Some(row) = layer.weights.iter().find(|r| r.len() != width) {
                return Err(ModelError::Shape(format!(
                    "layer {n}: expected {width} inputs, row has {}",
                    row.len()
                )));
            }
            width = layer.bias.len();
        }
        if width != OUTPUT_COUNT {
            return Err(ModelError::Shape(format!(
                "expected {OUTPUT_COUNT} outputs, got {width}"
            )));
        }
        Ok(())
    }

    /// Forward pass. Only the layer count is checked here; run [`Self::validate`] for the rest.
    pub fn predict(&self, features: &[f64; FEATURE_COUNT]) -> Result<Vec<f64>, ModelError> {
        let mut x: Vec<f64> = features
            .iter()
            .zip(self.scaler.mean.iter().zip(&self.scaler.scale))
            .map(|(v, (m, s))| if *s == 0.0 { v - m } else { (v - m) / s })
            .collect();
        let last = self
            .layers
            .len()
            .checked_sub(1)
            .ok_or_else(|| ModelError::Shape("no layers".into()))?;
        for (n, layer) in self.layers.iter().enumerate() {
            x = layer
                .weights
                .iter()
                .zip(&layer.bias)
                .map(|(row, b)| {
                    let y = row.iter().zip(&x).map(|(w, v)| w * v).sum::<f64>() + b;
                    if n < last {
                        y.max(0.0)
                    } else {
                        y
                    }
                })
                .collect();
        }
        Ok(x)
    }
}

/// Build the feature vector. Unreported values read as zero, gear as first.
pub fn features(frame: &SensorFrame) -> [f64; FEATURE_COUNT] {
    let mut f = [0.0; FEATURE_COUNT];
    if let Some(track) = &frame.track {
        for (slot, v) in f.iter_mut().zip(track.as_slice()) {
            *slot = v.unwrap_or(0.0);
        }
    }
    let tail = [
        frame.track_pos.unwrap_or(0.0),
        frame.angle.unwrap_or(0.0),
        frame.speed_x.unwrap_or(0.0),
        frame.speed_y.unwrap_or(0.0),
        frame.speed_z.unwrap_or(0.0),
        frame.rpm.unwrap_or(0.0),
        frame.gear.unwrap_or(1.0),
    ];
    f[RANGEFINDER_COUNT..].copy_from_slice(&tail);
    f
}

pub struct ModelPolicy {
    network: Result<NetworkArtifact, String>,
    warmed_up: bool,
}

impl ModelPolicy {
    pub fn new(network: NetworkArtifact) -> Result<Self, ModelError> {
        network.validate()?;
        Ok(Self {
            network: Ok(network),
            warmed_up: false,
        })
    }

    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let s = std::fs::read_to_string(path)?;
        Self::new(NetworkArtifact::from_json(&s)?)
    }

    /// Load the artifact; if that fails keep a policy that refuses every tick so the
    /// session falls back to neutral commands instead of aborting the race.
    pub fn load_or_unavailable(path: &Path) -> Self {
        match Self::load(path) {
            Ok(p) => p,
            Err(e) => {
                log::error!("model policy disabled, {}: {e}", path.display());
                Self {
                    network: Err(e.to_string()),
                    warmed_up: false,
                }
            }
        }
    }

    pub fn is_available(&self) -> bool {
        self.network.is_ok()
    }
}

impl DrivePolicy for ModelPolicy {
    fn name(&self) -> &str {
        "model"
    }

    fn decide(&mut self, frame: &SensorFrame) -> Result<ControlCommand, PolicyError> {
        let network = self
            .network
            .as_ref()
            .map_err(|e| PolicyError::Unavailable(e.clone()))?;

        let mut cmd = ControlCommand::new();
        cmd.set_brake(0.0);
        if !self.warmed_up {
            self.warmed_up = true;
            cmd.set_accel(0.5);
            cmd.set_steer(0.0);
            cmd.set_gear(1);
            return Ok(cmd);
        }

        let out = network
            .predict(&features(frame))
            .map_err(|e| PolicyError::Unavailable(e.to_string()))?;
        cmd.set_accel(out[0]);
        cmd.set_brake(out[1]);
        cmd.set_steer(out[2]);
        cmd.set_gear((out[3].trunc() as i32).clamp(MIN_MODEL_GEAR, MAX_MODEL_GEAR));
        Ok(cmd)
    }

    fn reset(&mut self) {
        self.warmed_up = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Identity scaler, one linear layer reading trackPos, speedX and gear.
    fn linear_artifact() -> NetworkArtifact {
        let mut rows = vec![vec![0.0; FEATURE_COUNT]; OUTPUT_COUNT];
        rows[0][RANGEFINDER_COUNT + 2] = 0.01; // accel from speedX
        rows[2][RANGEFINDER_COUNT] = -1.0; // steer against trackPos
        rows[3][RANGEFINDER_COUNT + 6] = 1.0; // gear passthrough
        NetworkArtifact {
            scaler: Scaler {
                mean: vec![0.0; FEATURE_COUNT],
                scale: vec![1.0; FEATURE_COUNT],
            },
            layers: vec![DenseLayer {
                weights: rows,
                bias: vec![0.0, 0.2, 0.0, 0.5],
            }],
        }
    }

    #[test]
    fn features_layout() {
        let frame = SensorFrame {
            track_pos: Some(0.25),
            rpm: Some(5000.0),
            ..Default::default()
        };
        let f = features(&frame);
        assert_eq!(f[0], 0.0);
        assert_eq!(f[RANGEFINDER_COUNT], 0.25);
        assert_eq!(f[RANGEFINDER_COUNT + 5], 5000.0);
        assert_eq!(f[FEATURE_COUNT - 1], 1.0);
    }

    #[test]
    fn hidden_layer_relu() {
        let mut first = vec![vec![0.0; FEATURE_COUNT]; 2];
        first[0][RANGEFINDER_COUNT + 1] = 1.0; // +angle
        first[1][RANGEFINDER_COUNT + 1] = -1.0; // -angle
        let net = NetworkArtifact {
            scaler: Scaler {
                mean: vec![0.0; FEATURE_COUNT],
                scale: vec![0.0; FEATURE_COUNT],
            },
            layers: vec![
                DenseLayer {
                    weights: first,
                    bias: vec![0.0, 0.0],
                },
                DenseLayer {
                    weights: vec![vec![1.0, 1.0]; OUTPUT_COUNT],
                    bias: vec![0.0; OUTPUT_COUNT],
                },
            ],
        };
        net.validate().unwrap();
        let mut f = [0.0; FEATURE_COUNT];
        f[RANGEFINDER_COUNT + 1] = -0.3;
        let out = net.predict(&f).unwrap();
        assert!((out[0] - 0.3).abs() < 1e-12);
    }

    #[test]
    fn warm_up_then_predict() {
        let mut p = ModelPolicy::new(linear_artifact()).unwrap();
        let frame = SensorFrame {
            speed_x: Some(60.0),
            track_pos: Some(0.4),
            gear: Some(9.0),
            ..Default::default()
        };
        let first = p.decide(&frame).unwrap();
        assert_eq!(first.accel(), Some(0.5));
        assert_eq!(first.gear(), Some(1));

        let cmd = p.decide(&frame).unwrap();
        assert!((cmd.accel().unwrap() - 0.6).abs() < 1e-12);
        assert!((cmd.brake().unwrap() - 0.2).abs() < 1e-12);
        assert!((cmd.steer().unwrap() + 0.4).abs() < 1e-12);
        // 9.5 truncates to 9, then the model clamps to top gear.
        assert_eq!(cmd.gear(), Some(6));

        p.reset();
        assert_eq!(p.decide(&frame).unwrap().accel(), Some(0.5));
    }

    #[test]
    fn shape_errors() {
        let mut a = linear_artifact();
        a.layers[0].bias.pop();
        assert!(matches!(a.validate(), Err(ModelError::Shape(_))));

        let mut a = linear_artifact();
        a.scaler.mean.pop();
        assert!(matches!(a.validate(), Err(ModelError::Shape(_))));

        let mut a = linear_artifact();
        a.layers[0].weights[1].push(0.0);
        assert!(matches!(a.validate(), Err(ModelError::Shape(_))));
    }

    #[test]
    fn json_artifact() {
        let json = serde_json::to_string(&linear_artifact()).unwrap();
        let a = NetworkArtifact::from_json(&json).unwrap();
        assert_eq!(a.layers.len(), 1);
        assert!(matches!(
            NetworkArtifact::from_json("{\"scaler\": 1}"),
            Err(ModelError::Json(_))
        ));
    }

    #[test]
    fn missing_artifact_fails_closed() {
        let mut p = ModelPolicy::load_or_unavailable(Path::new("/nonexistent/nn_model.json"));
        assert!(!p.is_available());
        assert!(matches!(
            p.decide(&SensorFrame::default()),
            Err(PolicyError::Unavailable(_))
        ));
    }

    #[test]
    fn predict_without_layers_is_error() {
        let mut net = linear_artifact();
        net.layers.clear();
        assert!(matches!(
            net.predict(&[0.0; FEATURE_COUNT]),
            Err(ModelError::Shape(_))
        ));
    }
}
