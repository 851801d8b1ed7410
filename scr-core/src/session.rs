//! Host-driven session state machine: the host passes datagrams and receive timeouts,
//! the session returns the action to perform. No I/O happens here.

use crate::command::ControlCommand;
use crate::policy::DrivePolicy;
use crate::protocol::{Marker, RangefinderConfig};
use crate::sensor::SensorFrame;
use crate::wire;

/// Session settings fixed for the whole run.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub bot_id: String,
    pub rangefinders: RangefinderConfig,
    /// Steps per episode before a terminate request is sent instead of driving; 0 = unbounded.
    pub max_steps: u64,
    /// Episodes to run before finishing; 0 = unbounded.
    pub max_episodes: u32,
    /// Identification sends per episode before giving up; `None` retries forever.
    pub max_handshake_attempts: Option<u32>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            bot_id: "SCR".into(),
            rangefinders: RangefinderConfig::standard(),
            max_steps: 0,
            max_episodes: 1,
            max_handshake_attempts: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Identified,
    Driving,
    Restarting,
    ShuttingDown,
}

/// Why an episode ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpisodeEnd {
    Shutdown,
    Restart,
}

/// One driven tick, handed to the telemetry sink.
#[derive(Debug, Clone)]
pub struct TickRecord {
    pub episode: u32,
    pub step: u64,
    pub frame: SensorFrame,
    pub command: ControlCommand,
    pub inputs: Vec<String>,
    /// The policy failed and the neutral command was sent instead.
    pub fallback: bool,
}

/// What the host should do next.
#[derive(Debug)]
pub enum Action {
    /// Send the identification message.
    Identify(Vec<u8>),
    /// Server accepted the identification; now driving.
    Identified,
    /// Send a control command.
    Command { payload: Vec<u8>, record: TickRecord },
    /// Nothing to send; keep receiving.
    Idle,
    /// Episode over. When `finished`, the run is complete; otherwise call
    /// [`Session::begin_episode`] to reconnect.
    EpisodeEnded { reason: EpisodeEnd, finished: bool },
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("no identification reply after {attempts} attempts")]
    HandshakeExhausted { attempts: u32 },
}

/// Per-episode state, rebuilt whenever a new episode starts.
#[derive(Debug)]
struct Episode {
    number: u32,
    state: SessionState,
    step: u64,
    handshake_attempts: u32,
}

impl Episode {
    fn new(number: u32) -> Self {
        Self {
            number,
            state: SessionState::Connecting,
            step: 0,
            handshake_attempts: 0,
        }
    }
}

pub struct Session<P: DrivePolicy> {
    config: SessionConfig,
    policy: P,
    init_message: Vec<u8>,
    episode: Episode,
    episodes_completed: u32,
    finished: bool,
}

impl<P: DrivePolicy> Session<P> {
    pub fn new(config: SessionConfig, policy: P) -> Self {
        let init_message = wire::encode_init(&config.bot_id, &config.rangefinders);
        Self {
            config,
            policy,
            init_message,
            episode: Episode::new(1),
            episodes_completed: 0,
            finished: false,
        }
    }

    /// Start (or restart) an episode: reset policy state and send identification.
    pub fn begin_episode(&mut self) -> Action {
        if self.finished {
            log::warn!("begin_episode called on a finished session");
            return Action::Idle;
        }
        if matches!(
            self.episode.state,
            SessionState::Restarting | SessionState::ShuttingDown
        ) {
            self.episode = Episode::new(self.episode.number + 1);
        }
        self.policy.reset();
        log::info!(
            "episode {}: identifying as {}",
            self.episode.number,
            self.config.bot_id
        );
        self.episode.handshake_attempts = 1;
        Action::Identify(self.init_message.clone())
    }

    /// A datagram arrived from the server.
    pub fn on_datagram(&mut self, bytes: &[u8]) -> Result<Action, SessionError> {
        let text = String::from_utf8_lossy(bytes);
        match self.episode.state {
            SessionState::Connecting => {
                if Marker::scan(&text) == Some(Marker::Identified) {
                    self.episode.state = SessionState::Identified;
                    log::info!(
                        "episode {}: identified after {} attempt(s)",
                        self.episode.number,
                        self.episode.handshake_attempts
                    );
                    self.episode.state = SessionState::Driving;
                    Ok(Action::Identified)
                } else {
                    log::debug!("unexpected reply while connecting: {text}");
                    self.resend_identification()
                }
            }
            SessionState::Identified | SessionState::Driving => Ok(match Marker::scan(&text) {
                Some(Marker::Shutdown) => {
                    log::info!("episode {}: server shutdown", self.episode.number);
                    self.policy.on_shutdown();
                    self.episode.state = SessionState::ShuttingDown;
                    self.end_episode(EpisodeEnd::Shutdown)
                }
                Some(Marker::Restart) => {
                    log::info!("episode {}: server restart", self.episode.number);
                    self.policy.on_restart();
                    self.episode.state = SessionState::Restarting;
                    self.end_episode(EpisodeEnd::Restart)
                }
                Some(Marker::Identified) => {
                    log::debug!("duplicate identification reply ignored");
                    Action::Idle
                }
                None => self.drive(bytes),
            }),
            SessionState::Restarting | SessionState::ShuttingDown => {
                log::debug!("datagram after episode end ignored");
                Ok(Action::Idle)
            }
        }
    }

    /// The receive timeout elapsed with no datagram.
    pub fn on_timeout(&mut self) -> Result<Action, SessionError> {
        match self.episode.state {
            SessionState::Connecting => {
                log::warn!("no reply from server, resending identification");
                self.resend_identification()
            }
            SessionState::Identified | SessionState::Driving => {
                log::debug!("receive timeout at step {}", self.episode.step);
                Ok(Action::Idle)
            }
            SessionState::Restarting | SessionState::ShuttingDown => Ok(Action::Idle),
        }
    }

    fn resend_identification(&mut self) -> Result<Action, SessionError> {
        let attempts = self.episode.handshake_attempts;
        if let Some(max) = self.config.max_handshake_attempts {
            if attempts >= max {
                return Err(SessionError::HandshakeExhausted { attempts });
            }
        }
        self.episode.handshake_attempts = attempts + 1;
        Ok(Action::Identify(self.init_message.clone()))
    }

    fn drive(&mut self, bytes: &[u8]) -> Action {
        let frame = wire::decode_frame(bytes);
        self.episode.step += 1;
        let step = self.episode.step;

        let mut fallback = false;
        let command = if self.config.max_steps != 0 && step >= self.config.max_steps {
            log::info!("episode {}: step limit {step} reached", self.episode.number);
            ControlCommand::terminate()
        } else {
            match self.policy.decide(&frame) {
                Ok(cmd) => cmd,
                Err(e) => {
                    log::warn!("{} policy failed at step {step}: {e}", self.policy.name());
                    fallback = true;
                    ControlCommand::neutral()
                }
            }
        };
        let payload = wire::encode_command(&command);
        log::trace!("step {step}: {}", String::from_utf8_lossy(&payload));
        Action::Command {
            payload,
            record: TickRecord {
                episode: self.episode.number,
                step,
                frame,
                command,
                inputs: self.policy.active_inputs(),
                fallback,
            },
        }
    }

    fn end_episode(&mut self, reason: EpisodeEnd) -> Action {
        self.episodes_completed += 1;
        let max = self.config.max_episodes;
        self.finished = max != 0 && self.episodes_completed >= max;
        if self.finished {
            self.policy.on_teardown();
        }
        Action::EpisodeEnded {
            reason,
            finished: self.finished,
        }
    }

    pub fn state(&self) -> SessionState {
        self.episode.state
    }

    /// Current episode number, starting at 1.
    pub fn episode(&self) -> u32 {
        self.episode.number
    }

    /// Telemetry frames accepted in the current episode.
    pub fn step(&self) -> u64 {
        self.episode.step
    }

    pub fn episodes_completed(&self) -> u32 {
        self.episodes_completed
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn policy(&self) -> &P {
        &self.policy
    }
}
