//! UDP transport: one unbound-port socket talking to the race server, driving the session.
//!
//! A receive timeout is never fatal; it is reported to the session, which resends
//! identification or simply waits. A failed send ends the run.

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use chrono::Local;
use scr_core::{Action, DrivePolicy, Session, SessionError};
use tokio::net::UdpSocket;
use tokio::time::Instant;

use crate::telemetry::TelemetrySink;

const RECV_BUF_LEN: usize = 65536;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("resolve {host}:{port}: {source}")]
    Resolve {
        host: String,
        port: u16,
        source: std::io::Error,
    },
    #[error("no address found for {0}")]
    NoAddress(String),
    #[error("bind socket: {0}")]
    Bind(#[source] std::io::Error),
    #[error("send to server: {0}")]
    Send(#[source] std::io::Error),
    #[error(transparent)]
    Session(#[from] SessionError),
}

pub struct Transport {
    socket: UdpSocket,
    server: SocketAddr,
    receive_timeout: Duration,
}

impl Transport {
    /// Resolve the server and bind an ephemeral local port of the same family.
    pub async fn connect(
        host: &str,
        port: u16,
        receive_timeout: Duration,
    ) -> Result<Self, ClientError> {
        let server = tokio::net::lookup_host((host, port))
            .await
            .map_err(|source| ClientError::Resolve {
                host: host.to_owned(),
                port,
                source,
            })?
            .next()
            .ok_or_else(|| ClientError::NoAddress(format!("{host}:{port}")))?;
        let local: SocketAddr = if server.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local).await.map_err(ClientError::Bind)?;
        log::info!("talking to {server} from {:?}", socket.local_addr().ok());
        Ok(Self {
            socket,
            server,
            receive_timeout,
        })
    }

    pub fn server(&self) -> SocketAddr {
        self.server
    }

    async fn send(&self, bytes: &[u8]) -> Result<(), ClientError> {
        self.socket
            .send_to(bytes, self.server)
            .await
            .map_err(ClientError::Send)?;
        Ok(())
    }

    /// Wait up to the receive timeout. `None` means nothing usable arrived.
    async fn recv(&self, buf: &mut [u8]) -> Option<usize> {
        wait_for_datagram(self.receive_timeout, self.socket.recv_from(buf)).await
    }
}

/// A receive error still uses up the whole timeout, so a failing socket does not spin.
async fn wait_for_datagram<F>(limit: Duration, recv: F) -> Option<usize>
where
    F: Future<Output = std::io::Result<(usize, SocketAddr)>>,
{
    let deadline = Instant::now() + limit;
    match tokio::time::timeout_at(deadline, recv).await {
        Ok(Ok((n, from))) => {
            log::trace!("{n} bytes from {from}");
            Some(n)
        }
        Ok(Err(e)) => {
            // e.g. ICMP port unreachable while the server is not up yet.
            log::debug!("receive error: {e}");
            tokio::time::sleep_until(deadline).await;
            None
        }
        Err(_) => None,
    }
}

/// Totals for one run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub episodes: u32,
    pub commands: u64,
    pub fallbacks: u64,
}

/// Drive the session until it finishes. Only transport failures and an exhausted
/// handshake bound end it early.
pub async fn run<P: DrivePolicy>(
    transport: &Transport,
    session: &mut Session<P>,
    mut sink: Option<&mut dyn TelemetrySink>,
) -> Result<RunSummary, ClientError> {
    let mut summary = RunSummary::default();
    let mut buf = vec![0u8; RECV_BUF_LEN];
    let mut action = session.begin_episode();
    loop {
        match action {
            Action::Identify(bytes) => transport.send(&bytes).await?,
            Action::Identified => {}
            Action::Command { payload, record } => {
                transport.send(&payload).await?;
                summary.commands += 1;
                if record.fallback {
                    summary.fallbacks += 1;
                }
                if let Some(sink) = sink.as_deref_mut() {
                    sink.record(Local::now(), &record);
                }
            }
            Action::Idle => {}
            Action::EpisodeEnded { reason, finished } => {
                summary.episodes += 1;
                log::info!("episode {} ended: {reason:?}", session.episode());
                if finished {
                    return Ok(summary);
                }
                action = session.begin_episode();
                continue;
            }
        }
        action = match transport.recv(&mut buf).await {
            Some(n) => session.on_datagram(&buf[..n])?,
            None => session.on_timeout()?,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scr_core::{decode_command, RuleBasedPolicy, SessionConfig, TickRecord};

    #[derive(Default)]
    struct Recorded(Vec<TickRecord>);

    impl TelemetrySink for Recorded {
        fn record(&mut self, _at: chrono::DateTime<Local>, tick: &TickRecord) {
            self.0.push(tick.clone());
        }
    }

    const TICK: &[u8] = b"(angle 0)(trackPos 0)(rpm 4000)(gear 1)(speedX 10)";

    /// Fake server: ignores the first identification, accepts the second, serves
    /// three ticks and then shuts the race down. Returns the commands received.
    async fn serve(server: UdpSocket) -> (u32, Vec<Vec<u8>>) {
        let mut buf = [0u8; 2048];
        let mut inits = 0;
        let client = loop {
            let (n, from) = server.recv_from(&mut buf).await.unwrap();
            assert!(buf[..n].starts_with(b"SCR(init "));
            inits += 1;
            if inits == 2 {
                break from;
            }
        };
        server.send_to(b"***identified***", client).await.unwrap();
        let mut commands = Vec::new();
        for _ in 0..3 {
            server.send_to(TICK, client).await.unwrap();
            let n = loop {
                let (n, _) = server.recv_from(&mut buf).await.unwrap();
                // A retry sent before our reply arrived.
                if !buf[..n].starts_with(b"SCR(init ") {
                    break n;
                }
            };
            commands.push(buf[..n].to_vec());
        }
        server.send_to(b"***shutdown***", client).await.unwrap();
        (inits, commands)
    }

    #[tokio::test]
    async fn handshake_drive_and_shutdown() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = server.local_addr().unwrap().port();
        let server_task = tokio::spawn(serve(server));

        let transport = Transport::connect("127.0.0.1", port, Duration::from_millis(100))
            .await
            .unwrap();
        let config = SessionConfig {
            max_steps: 3,
            ..Default::default()
        };
        let mut session = Session::new(config, RuleBasedPolicy::default());
        let mut sink = Recorded::default();

        let summary = tokio::time::timeout(
            Duration::from_secs(10),
            run(
                &transport,
                &mut session,
                Some(&mut sink as &mut dyn TelemetrySink),
            ),
        )
        .await
        .expect("run timed out")
        .unwrap();

        let (inits, commands) = server_task.await.unwrap();
        assert_eq!(inits, 2);
        assert_eq!(commands.len(), 3);
        let first = decode_command(&commands[0]);
        assert!((first.accel().unwrap() - 0.1).abs() < 1e-9);
        assert_eq!(first.gear(), Some(1));
        assert_eq!(commands[2], b"(meta 1)".to_vec());

        assert_eq!(
            summary,
            RunSummary {
                episodes: 1,
                commands: 3,
                fallbacks: 0
            }
        );
        assert_eq!(sink.0.len(), 3);
        assert!(session.is_finished());
    }

    #[tokio::test]
    async fn handshake_bound_ends_run() {
        // Bound but never answered.
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = silent.local_addr().unwrap().port();
        let transport = Transport::connect("127.0.0.1", port, Duration::from_millis(20))
            .await
            .unwrap();
        let config = SessionConfig {
            max_handshake_attempts: Some(2),
            ..Default::default()
        };
        let mut session = Session::new(config, RuleBasedPolicy::default());
        let r = run(&transport, &mut session, None).await;
        assert!(matches!(
            r,
            Err(ClientError::Session(SessionError::HandshakeExhausted { attempts: 2 }))
        ));
    }

    #[tokio::test]
    async fn receive_error_waits_out_timeout() {
        let limit = Duration::from_millis(50);
        let started = Instant::now();
        let got = wait_for_datagram(limit, async {
            Err::<(usize, SocketAddr), _>(std::io::Error::from(
                std::io::ErrorKind::ConnectionReset,
            ))
        })
        .await;
        assert_eq!(got, None);
        assert!(started.elapsed() >= limit);

        let from: SocketAddr = ([127, 0, 0, 1], 3001).into();
        let got = wait_for_datagram(limit, async move { Ok::<_, std::io::Error>((12usize, from)) })
            .await;
        assert_eq!(got, Some(12));
    }
}
