//! Load config from file and environment; command-line flags are applied on top in `main`.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use scr_core::{RangefinderConfig, SessionConfig, Stage};

/// Which decision policy drives the car.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PolicyKind {
    /// Built-in rule-based driver.
    Rule,
    /// Learned network loaded from `model_path`.
    Model,
}

impl PolicyKind {
    pub fn label(self) -> &'static str {
        match self {
            PolicyKind::Rule => "rule",
            PolicyKind::Model => "model",
        }
    }
}

/// Client configuration. File: ~/.config/scr-client/config.toml or /etc/scr-client/config.toml.
/// Env overrides: SCR_HOST, SCR_PORT, SCR_BOT_ID, SCR_LOG_DIR.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Race server host (default localhost).
    #[serde(default = "default_host")]
    pub host: String,
    /// Race server UDP port (default 3001).
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bot_id")]
    pub bot_id: String,
    /// 0 runs until interrupted.
    #[serde(default = "default_max_episodes")]
    pub max_episodes: u32,
    /// 0 leaves episodes unbounded.
    #[serde(default)]
    pub max_steps: u64,
    #[serde(default = "default_unknown")]
    pub track: String,
    #[serde(default = "default_unknown")]
    pub car: String,
    /// 0 warm-up, 1 qualifying, 2 race, 3 unknown.
    #[serde(default = "default_stage")]
    pub stage: i64,
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    #[serde(default = "default_true")]
    pub telemetry: bool,
    #[serde(default = "default_policy")]
    pub policy: PolicyKind,
    #[serde(default = "default_model_path")]
    pub model_path: PathBuf,
    /// Target speed for the rule-based policy.
    #[serde(default = "default_max_speed")]
    pub max_speed: f64,
    #[serde(default = "default_receive_timeout_ms")]
    pub receive_timeout_ms: u64,
    /// Unset retries identification forever.
    #[serde(default)]
    pub handshake_attempts: Option<u32>,
}

fn default_host() -> String {
    "localhost".into()
}
fn default_port() -> u16 {
    3001
}
fn default_bot_id() -> String {
    "SCR".into()
}
fn default_max_episodes() -> u32 {
    1
}
fn default_unknown() -> String {
    "Unknown".into()
}
fn default_stage() -> i64 {
    3
}
fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}
fn default_true() -> bool {
    true
}
fn default_policy() -> PolicyKind {
    PolicyKind::Rule
}
fn default_model_path() -> PathBuf {
    PathBuf::from("models/nn_model.json")
}
fn default_max_speed() -> f64 {
    100.0
}
fn default_receive_timeout_ms() -> u64 {
    1000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            bot_id: default_bot_id(),
            max_episodes: default_max_episodes(),
            max_steps: 0,
            track: default_unknown(),
            car: default_unknown(),
            stage: default_stage(),
            log_dir: default_log_dir(),
            telemetry: true,
            policy: default_policy(),
            model_path: default_model_path(),
            max_speed: default_max_speed(),
            receive_timeout_ms: default_receive_timeout_ms(),
            handshake_attempts: None,
        }
    }
}

impl Config {
    pub fn stage(&self) -> Stage {
        Stage::from_code(self.stage)
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            bot_id: self.bot_id.clone(),
            rangefinders: RangefinderConfig::standard(),
            max_steps: self.max_steps,
            max_episodes: self.max_episodes,
            max_handshake_attempts: self.handshake_attempts,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Load config: merge default, then config file, then env vars.
/// An explicit `path` must exist and parse; the default locations are best effort.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let mut c = match path {
        Some(p) => read_file(p)?,
        None => load_default_file().unwrap_or_default(),
    };
    apply_env(&mut c, |k| std::env::var(k).ok());
    Ok(c)
}

fn apply_env(c: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(s) = var("SCR_HOST") {
        c.host = s;
    }
    if let Some(s) = var("SCR_PORT") {
        match s.parse::<u16>() {
            Ok(p) => c.port = p,
            Err(_) => log::warn!("ignoring SCR_PORT={s}: not a port number"),
        }
    }
    if let Some(s) = var("SCR_BOT_ID") {
        c.bot_id = s;
    }
    if let Some(s) = var("SCR_LOG_DIR") {
        c.log_dir = PathBuf::from(s);
    }
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/scr-client/config.toml"));
    }
    out.push(PathBuf::from("/etc/scr-client/config.toml"));
    out
}

fn load_default_file() -> Option<Config> {
    let p = config_paths().into_iter().find(|p| p.exists())?;
    match read_file(&p) {
        Ok(c) => {
            log::info!("loaded config from {}", p.display());
            Some(c)
        }
        Err(e) => {
            log::warn!("{e}; using defaults");
            None
        }
    }
}

fn read_file(path: &Path) -> Result<Config, ConfigError> {
    let s = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_owned(),
        source,
    })?;
    toml::from_str(&s).map_err(|source| ConfigError::Parse {
        path: path.to_owned(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_client() {
        let c = Config::default();
        assert_eq!(c.host, "localhost");
        assert_eq!(c.port, 3001);
        assert_eq!(c.bot_id, "SCR");
        assert_eq!(c.max_episodes, 1);
        assert_eq!(c.max_steps, 0);
        assert_eq!(c.stage(), Stage::Unknown);
        assert_eq!(c.receive_timeout(), Duration::from_secs(1));
        assert_eq!(c.session_config().max_handshake_attempts, None);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let c: Config = toml::from_str(
            "port = 3002\nbot_id = \"championship\"\nstage = 2\npolicy = \"model\"\nhandshake_attempts = 5\n",
        )
        .unwrap();
        assert_eq!(c.port, 3002);
        assert_eq!(c.bot_id, "championship");
        assert_eq!(c.stage(), Stage::Race);
        assert_eq!(c.policy, PolicyKind::Model);
        assert_eq!(c.handshake_attempts, Some(5));
        assert_eq!(c.host, "localhost");
        assert!(c.telemetry);
    }

    #[test]
    fn unknown_keys_rejected() {
        assert!(toml::from_str::<Config>("prot = 1\n").is_err());
    }

    #[test]
    fn env_overrides() {
        let mut c = Config::default();
        apply_env(&mut c, |k| match k {
            "SCR_HOST" => Some("10.0.0.2".into()),
            "SCR_PORT" => Some("not-a-port".into()),
            "SCR_BOT_ID" => Some("bot7".into()),
            _ => None,
        });
        assert_eq!(c.host, "10.0.0.2");
        assert_eq!(c.port, 3001);
        assert_eq!(c.bot_id, "bot7");
        assert_eq!(c.log_dir, PathBuf::from("logs"));
    }

    #[test]
    fn explicit_missing_file_is_error() {
        let r = load(Some(Path::new("/nonexistent/scr-client.toml")));
        assert!(matches!(r, Err(ConfigError::Read { .. })));
    }
}
