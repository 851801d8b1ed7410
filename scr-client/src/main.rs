// SCR client: identify with the race server, drive each episode, record telemetry.

mod config;
mod telemetry;
mod transport;

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use scr_core::{DrivePolicy, ModelPolicy, RuleBasedPolicy, Session};

use config::{Config, PolicyKind};
use telemetry::{CsvTelemetry, RunInfo, TelemetrySink};

#[derive(Debug, Parser)]
#[command(version, about = "Racing client for the SCR telemetry/control protocol")]
struct Cli {
    /// Config file; defaults to ~/.config/scr-client/config.toml or /etc/scr-client/config.toml.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Server host.
    #[arg(long)]
    host: Option<String>,
    /// Server port.
    #[arg(long)]
    port: Option<u16>,
    /// Bot id sent at identification.
    #[arg(long = "id")]
    bot_id: Option<String>,
    /// Episodes to run (0 = until interrupted).
    #[arg(long, alias = "maxEpisodes")]
    max_episodes: Option<u32>,
    /// Steps per episode before requesting termination (0 = unbounded).
    #[arg(long, alias = "maxSteps")]
    max_steps: Option<u64>,
    #[arg(long)]
    track: Option<String>,
    #[arg(long)]
    car: Option<String>,
    /// 0 warm-up, 1 qualifying, 2 race, 3 unknown.
    #[arg(long)]
    stage: Option<i64>,
    /// Directory for telemetry files.
    #[arg(long)]
    logdir: Option<PathBuf>,
    #[arg(long, value_enum)]
    policy: Option<PolicyKind>,
    /// Model artifact for `--policy model`.
    #[arg(long)]
    model: Option<PathBuf>,
    /// Target speed of the rule-based policy.
    #[arg(long)]
    max_speed: Option<f64>,
    /// Give up after this many identification attempts.
    #[arg(long)]
    handshake_attempts: Option<u32>,
    #[arg(long)]
    no_telemetry: bool,
}

impl Cli {
    fn apply(self, c: &mut Config) {
        if let Some(v) = self.host {
            c.host = v;
        }
        if let Some(v) = self.port {
            c.port = v;
        }
        if let Some(v) = self.bot_id {
            c.bot_id = v;
        }
        if let Some(v) = self.max_episodes {
            c.max_episodes = v;
        }
        if let Some(v) = self.max_steps {
            c.max_steps = v;
        }
        if let Some(v) = self.track {
            c.track = v;
        }
        if let Some(v) = self.car {
            c.car = v;
        }
        if let Some(v) = self.stage {
            c.stage = v;
        }
        if let Some(v) = self.logdir {
            c.log_dir = v;
        }
        if let Some(v) = self.policy {
            c.policy = v;
        }
        if let Some(v) = self.model {
            c.model_path = v;
        }
        if let Some(v) = self.max_speed {
            c.max_speed = v;
        }
        if let Some(v) = self.handshake_attempts {
            c.handshake_attempts = Some(v);
        }
        if self.no_telemetry {
            c.telemetry = false;
        }
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let mut cfg = config::load(cli.config.as_deref())?;
    cli.apply(&mut cfg);

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(cfg))
}

async fn run(cfg: Config) -> anyhow::Result<()> {
    log::info!(
        "bot {} on {}:{}, track {}, car {}, stage {} ({})",
        cfg.bot_id,
        cfg.host,
        cfg.port,
        cfg.track,
        cfg.car,
        cfg.stage(),
        cfg.stage().code()
    );

    let policy: Box<dyn DrivePolicy> = match cfg.policy {
        PolicyKind::Rule => Box::new(RuleBasedPolicy::new(cfg.max_speed)),
        PolicyKind::Model => {
            let model = ModelPolicy::load_or_unavailable(&cfg.model_path);
            if model.is_available() {
                log::info!("model loaded from {}", cfg.model_path.display());
            } else {
                log::warn!("driving with neutral commands until a valid model is supplied");
            }
            Box::new(model)
        }
    };

    let transport = transport::Transport::connect(&cfg.host, cfg.port, cfg.receive_timeout())
        .await
        .context("socket setup")?;
    log::debug!("server address {}", transport.server());

    let mut recorder = None;
    if cfg.telemetry {
        let info = RunInfo {
            track: cfg.track.clone(),
            car: cfg.car.clone(),
        };
        match CsvTelemetry::create(&cfg.log_dir, cfg.policy.label(), info).await {
            Ok(t) => {
                log::info!("recording telemetry to {}", t.path().display());
                recorder = Some(t);
            }
            Err(e) => log::warn!("telemetry disabled, {}: {e}", cfg.log_dir.display()),
        }
    }

    let mut session = Session::new(cfg.session_config(), policy);
    let outcome = {
        let sink = recorder.as_mut().map(|t| t as &mut dyn TelemetrySink);
        tokio::select! {
            r = transport::run(&transport, &mut session, sink) => Some(r),
            _ = shutdown_signal() => None,
        }
    };

    if let Some(t) = recorder {
        t.finish().await;
    }

    match outcome {
        Some(Ok(summary)) => {
            log::info!(
                "client shutdown complete: {} episode(s), {} command(s), {} fallback(s)",
                summary.episodes,
                summary.commands,
                summary.fallbacks
            );
            Ok(())
        }
        Some(Err(e)) => {
            log::error!("{e}");
            Err(e.into())
        }
        None => {
            log::info!(
                "interrupted during episode {} at step {}",
                session.episode(),
                session.step()
            );
            Ok(())
        }
    }
}

/// Wait for Ctrl+C or SIGTERM (Unix). If the handlers cannot be installed, never resolves.
async fn shutdown_signal() {
    if let Err(e) = wait_for_signal().await {
        log::warn!("signal handling unavailable: {e}");
        std::future::pending::<()>().await;
    }
}

async fn wait_for_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            r = tokio::signal::ctrl_c() => r?,
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_config() {
        let cli = Cli::parse_from([
            "scr-client",
            "--port",
            "3005",
            "--id",
            "bot2",
            "--maxSteps",
            "500",
            "--policy",
            "model",
            "--no-telemetry",
        ]);
        let mut c = Config::default();
        cli.apply(&mut c);
        assert_eq!(c.port, 3005);
        assert_eq!(c.bot_id, "bot2");
        assert_eq!(c.max_steps, 500);
        assert_eq!(c.policy, PolicyKind::Model);
        assert!(!c.telemetry);
        assert_eq!(c.host, "localhost");
    }

    #[test]
    fn cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
