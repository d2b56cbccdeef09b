//! Request/response engine.
//!
//! The engine owns the [`Connection`] and guarantees that at most one exchange
//! is in flight. Callers are serialised by an async mutex; each one writes its
//! command, then reads until a complete frame decodes or the deadline passes.
//!
//! Failure scope:
//! - a timeout is retried per [`RetryPolicy`] and only reaches its own caller
//! - a [`FrameError`](crate::error::FrameError) or unexpected frame aborts only
//!   its own exchange
//! - an I/O failure drops the connection; every later caller gets
//!   [`DriverError::Disconnected`] until [`ProtocolEngine::replace_connection`]
//!
//! When a caller is cancelled mid-exchange, or an exchange times out, the link
//! is marked dirty. The next exchange drains late bytes and resets the decoder
//! before writing, so a stale response is never matched to a new command. If
//! the cancelled caller was still writing, a bare line terminator goes out
//! first so the device drops the partial command. A drain never runs longer
//! than one response deadline.

use crate::config::ProtocolConfig;
use crate::error::{DriverError, DriverResult};
use crate::error_recovery::RetryPolicy;
use crate::protocol::codec::{FrameDecoder, Response, DEFAULT_MAX_FRAME_LEN};
use crate::protocol::command::{Access, Command, COMMAND_TERMINATOR};
use crate::serial::Connection;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Timing and framing parameters of the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    /// Per-attempt response deadline.
    pub timeout: Duration,
    /// Retries for timed-out attempts.
    pub retry: RetryPolicy,
    /// Quiet period that ends a drain.
    pub drain_window: Duration,
    /// Longest accepted response line.
    pub max_frame_len: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from(&ProtocolConfig::default())
    }
}

impl From<&ProtocolConfig> for EngineSettings {
    fn from(config: &ProtocolConfig) -> Self {
        Self {
            timeout: config.timeout(),
            retry: config.retry_policy(),
            drain_window: config.drain_window(),
            max_frame_len: if config.max_frame_len == 0 {
                DEFAULT_MAX_FRAME_LEN
            } else {
                config.max_frame_len
            },
        }
    }
}

/// State of the most recent exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    /// No exchange has run since the link was (re)established.
    Idle,
    /// Command written, response pending. Seen after a cancelled caller.
    AwaitingResponse,
    /// Matching response received.
    Resolved,
    /// Deadline passed on the last attempt.
    TimedOut,
    /// Frame, matching or I/O error.
    Errored,
}

#[derive(Debug)]
struct Link {
    connection: Option<Connection>,
    decoder: FrameDecoder,
    /// Late bytes may still arrive for an abandoned exchange.
    dirty: bool,
    /// A write was interrupted; the device may hold a partial command line.
    write_pending: bool,
    /// Why the connection was dropped, reported to later callers.
    failure: Option<String>,
    state: ExchangeState,
}

impl Link {
    fn disconnected(&self) -> DriverError {
        DriverError::Disconnected(
            self.failure
                .clone()
                .unwrap_or_else(|| "not connected".to_string()),
        )
    }

    fn connection_mut(&mut self) -> DriverResult<&mut Connection> {
        if !self.connection.as_ref().is_some_and(Connection::is_open) {
            return Err(self.disconnected());
        }
        self.connection
            .as_mut()
            .ok_or_else(|| DriverError::Disconnected("not connected".to_string()))
    }

    /// Drop the connection after a connection-fatal error.
    fn fail(&mut self, error: DriverError) -> DriverError {
        self.state = ExchangeState::Errored;
        let label = self
            .connection
            .take()
            .map(|c| c.label().to_string())
            .unwrap_or_default();
        warn!(port = %label, error = %error, "Serial link failed, dropping connection");
        self.failure = Some(format!("{label}: {error}"));
        self.decoder.reset();
        self.dirty = false;
        self.write_pending = false;
        error
    }

    async fn drain_if_dirty(&mut self, window: Duration, limit: Duration) -> DriverResult<()> {
        if !self.dirty {
            return Ok(());
        }
        if self.write_pending {
            debug!("Terminating a partially written command");
            if let Err(e) = self.connection_mut()?.write(COMMAND_TERMINATOR).await {
                return Err(self.fail(e));
            }
            self.write_pending = false;
        }
        let stale = self.decoder.buffered();
        let discarded = self.connection_mut()?.drain(window, limit).await;
        self.decoder.reset();
        self.dirty = false;
        if stale + discarded > 0 {
            warn!(
                discarded = stale + discarded,
                "Discarded late bytes from an abandoned exchange"
            );
        }
        Ok(())
    }

    /// One attempt: write, then read until a frame decodes or `timeout` passes.
    async fn exchange(&mut self, command: &Command, timeout: Duration) -> DriverResult<Response> {
        let wire = command.encode();
        self.connection_mut()?;
        self.state = ExchangeState::AwaitingResponse;
        self.dirty = true;

        debug!(frame = %command, "-> sending");
        self.write_pending = true;
        if let Err(e) = self.connection_mut()?.write(&wire).await {
            return Err(self.fail(e));
        }
        self.write_pending = false;

        let deadline = Instant::now() + timeout;
        loop {
            if let Some(frame) = self.decoder.next_frame() {
                return match frame {
                    Ok(response) => {
                        debug!(frame = %response, "<- received");
                        self.state = ExchangeState::Resolved;
                        self.dirty = self.decoder.buffered() > 0;
                        let matched = match_response(command, response);
                        if matched.is_err() {
                            self.state = ExchangeState::Errored;
                        }
                        matched
                    }
                    Err(e) => {
                        warn!(command = %command, error = %e, "Malformed response frame");
                        self.state = ExchangeState::Errored;
                        Err(e.into())
                    }
                };
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                self.state = ExchangeState::TimedOut;
                return Err(DriverError::Timeout {
                    attempts: 1,
                    timeout,
                });
            }

            match self.connection_mut()?.read(remaining).await {
                Ok(bytes) => self.decoder.feed(&bytes),
                Err(DriverError::Timeout { .. }) => {
                    self.state = ExchangeState::TimedOut;
                    return Err(DriverError::Timeout {
                        attempts: 1,
                        timeout,
                    });
                }
                Err(e) => return Err(self.fail(e)),
            }
        }
    }
}

fn match_response(command: &Command, response: Response) -> DriverResult<Response> {
    let expected = match command.access() {
        Access::Write if response == Response::Ack => return Ok(response),
        Access::Read if response.opcode() == Some(command.opcode()) => return Ok(response),
        Access::Write => ":ok".to_string(),
        Access::Read => format!(":r{}=...", command.opcode()),
    };
    Err(DriverError::UnexpectedResponse {
        expected,
        received: response.to_string(),
    })
}

/// Serialised command/response exchanges over one connection.
///
/// Cloning is cheap; clones share the connection and its lock.
#[derive(Debug, Clone)]
pub struct ProtocolEngine {
    link: Arc<Mutex<Link>>,
    settings: EngineSettings,
}

impl ProtocolEngine {
    /// Take ownership of an open connection.
    pub fn new(connection: Connection, settings: EngineSettings) -> Self {
        let decoder = FrameDecoder::new(settings.max_frame_len);
        Self {
            link: Arc::new(Mutex::new(Link {
                connection: Some(connection),
                decoder,
                dirty: false,
                write_pending: false,
                failure: None,
                state: ExchangeState::Idle,
            })),
            settings,
        }
    }

    /// Engine parameters.
    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Send `command` with the configured timeout and retry policy.
    pub async fn send_command(&self, command: &Command) -> DriverResult<Response> {
        self.send_command_with_timeout(command, self.settings.timeout)
            .await
    }

    /// Send `command`, waiting up to `timeout` per attempt.
    ///
    /// Timed-out attempts are retried per the configured [`RetryPolicy`];
    /// exhaustion returns [`DriverError::Timeout`] with the total attempt count.
    #[instrument(level = "debug", skip_all, fields(command = %command))]
    pub async fn send_command_with_timeout(
        &self,
        command: &Command,
        timeout: Duration,
    ) -> DriverResult<Response> {
        let mut link = self.link.lock().await;
        let attempts = self.settings.retry.total_attempts();

        for attempt in 1..=attempts {
            link.drain_if_dirty(self.settings.drain_window, timeout)
                .await?;

            match link.exchange(command, timeout).await {
                Err(DriverError::Timeout { .. }) => {
                    warn!(attempt, attempts, timeout = ?timeout, "No response before deadline");
                    if attempt < attempts {
                        tokio::time::sleep(self.settings.retry.backoff_delay).await;
                    }
                }
                result => return result,
            }
        }

        Err(DriverError::Timeout { attempts, timeout })
    }

    /// True while the engine holds an open connection.
    pub async fn is_connected(&self) -> bool {
        let link = self.link.lock().await;
        link.connection.as_ref().is_some_and(Connection::is_open)
    }

    /// State of the most recent exchange.
    pub async fn state(&self) -> ExchangeState {
        self.link.lock().await.state
    }

    /// Install a fresh connection, closing any previous one.
    ///
    /// Clears the recorded failure so callers are served again.
    pub async fn replace_connection(&self, connection: Connection) {
        let mut link = self.link.lock().await;
        if let Some(mut old) = link.connection.take() {
            old.close().await;
        }
        info!(port = %connection.label(), "Connection installed");
        link.connection = Some(connection);
        link.decoder.reset();
        link.dirty = false;
        link.write_pending = false;
        link.failure = None;
        link.state = ExchangeState::Idle;
    }

    /// Close the connection. Later exchanges fail with `Disconnected`.
    pub async fn close(&self) {
        let mut link = self.link.lock().await;
        if let Some(mut connection) = link.connection.take() {
            let label = connection.label().to_string();
            connection.close().await;
            link.failure = Some(format!("{label} was closed"));
        }
        link.decoder.reset();
        link.dirty = false;
        link.write_pending = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FrameError;
    use crate::protocol::command::Opcode;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
    use tracing_test::traced_test;

    fn settings(retries: u32) -> EngineSettings {
        EngineSettings {
            timeout: Duration::from_millis(200),
            retry: RetryPolicy {
                max_attempts: retries,
                backoff_delay: Duration::from_millis(50),
            },
            drain_window: Duration::from_millis(20),
            max_frame_len: 64,
        }
    }

    fn engine(retries: u32) -> (ProtocolEngine, DuplexStream) {
        let (host, device) = tokio::io::duplex(256);
        let conn = Connection::from_stream("duplex", host);
        (ProtocolEngine::new(conn, settings(retries)), device)
    }

    /// Answer each received line with the reply produced by `reply`.
    fn respond(device: DuplexStream, reply: impl Fn(&str) -> String + Send + 'static) {
        tokio::spawn(async move {
            let (read, mut write) = tokio::io::split(device);
            let mut lines = BufReader::new(read).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let answer = reply(&line);
                if write.write_all(answer.as_bytes()).await.is_err() {
                    break;
                }
            }
        });
    }

    fn read_cmd(code: u8) -> Command {
        Command::read(Opcode::new(code).unwrap())
    }

    #[tokio::test]
    async fn test_write_resolves_on_ack() {
        let (engine, device) = engine(0);
        respond(device, |_| ":ok\r\n".to_string());

        let cmd = Command::write(Opcode::new(11).unwrap(), vec![3]);
        let response = engine.send_command(&cmd).await.unwrap();
        assert_eq!(response, Response::Ack);
        assert_eq!(engine.state().await, ExchangeState::Resolved);
    }

    #[tokio::test]
    async fn test_read_resolves_with_value() {
        let (engine, device) = engine(0);
        respond(device, |line| {
            assert_eq!(line, ":r13=0.");
            ":r13=1000000,0.\r\n".to_string()
        });

        let response = engine.send_command(&read_cmd(13)).await.unwrap();
        assert_eq!(response.args(), &[1_000_000, 0]);
    }

    #[tokio::test]
    async fn test_mismatched_opcode_is_exchange_scoped() {
        let (engine, device) = engine(0);
        respond(device, |line| {
            if line.starts_with(":r11") {
                ":r12=0.\r\n".to_string()
            } else {
                ":r13=5,1.\r\n".to_string()
            }
        });

        let err = engine.send_command(&read_cmd(11)).await.unwrap_err();
        assert!(matches!(err, DriverError::UnexpectedResponse { .. }));
        assert_eq!(engine.state().await, ExchangeState::Errored);

        let response = engine.send_command(&read_cmd(13)).await.unwrap();
        assert_eq!(response.args(), &[5, 1]);
    }

    #[tokio::test]
    async fn test_frame_error_keeps_connection() {
        let (engine, device) = engine(0);
        respond(device, |line| {
            if line.starts_with(":r11") {
                "#garbage\r\n".to_string()
            } else {
                ":r13=5,1.\r\n".to_string()
            }
        });

        let err = engine.send_command(&read_cmd(11)).await.unwrap_err();
        assert!(matches!(err, DriverError::Frame(FrameError::MissingPrefix(_))));
        assert!(engine.is_connected().await);

        let response = engine.send_command(&read_cmd(13)).await.unwrap();
        assert_eq!(response.args(), &[5, 1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_without_retries_is_exact() {
        let (engine, _device) = engine(0);

        let start = Instant::now();
        let err = engine.send_command(&read_cmd(11)).await.unwrap_err();
        let elapsed = start.elapsed();

        assert!(matches!(err, DriverError::Timeout { attempts: 1, .. }));
        assert!(elapsed >= Duration::from_millis(200));
        assert!(elapsed < Duration::from_millis(210));
        assert_eq!(engine.state().await, ExchangeState::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_retries_then_reports_attempts() {
        let (engine, _device) = engine(2);

        let start = Instant::now();
        let err = engine.send_command(&read_cmd(11)).await.unwrap_err();
        let elapsed = start.elapsed();

        assert!(matches!(err, DriverError::Timeout { attempts: 3, .. }));
        // Three deadlines and two backoffs, plus a drain before each retry
        assert!(elapsed >= Duration::from_millis(3 * 200 + 2 * 50));
        assert!(elapsed < Duration::from_millis(3 * 200 + 2 * 50 + 2 * 20 + 10));
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn test_timeout_and_drain_are_logged() {
        let (engine, mut device) = engine(0);

        let err = engine.send_command(&read_cmd(11)).await.unwrap_err();
        assert!(matches!(err, DriverError::Timeout { .. }));
        assert!(logs_contain("No response before deadline"));

        // The late answer arrives after the caller gave up
        device.write_all(b":r11=4.\r\n").await.unwrap();
        respond(device, |_| ":r13=1,0.\r\n".to_string());

        let response = engine.send_command(&read_cmd(13)).await.unwrap();
        assert_eq!(response.args(), &[1, 0]);
        assert!(logs_contain("Discarded late bytes"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_is_bounded_on_a_chatty_line() {
        let (engine, mut device) = engine(0);

        let err = engine.send_command(&read_cmd(11)).await.unwrap_err();
        assert!(matches!(err, DriverError::Timeout { .. }));

        // The device now streams noise forever
        tokio::spawn(async move {
            while device.write_all(b"noise\r\n").await.is_ok() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        });

        let start = Instant::now();
        let err = engine.send_command(&read_cmd(13)).await.unwrap_err();
        let elapsed = start.elapsed();

        assert!(err.is_recoverable(), "got {err}");
        // Drain limit plus at most one deadline for the exchange itself
        assert!(elapsed <= Duration::from_millis(2 * 200 + 10), "took {elapsed:?}");
    }

    #[tokio::test]
    async fn test_interrupted_write_is_terminated_before_next_command() {
        // Room for part of a command only, while nobody reads
        let (host, device) = tokio::io::duplex(4);
        let engine = ProtocolEngine::new(Connection::from_stream("duplex", host), settings(0));

        let cancelled = tokio::time::timeout(
            Duration::from_millis(20),
            engine.send_command(&read_cmd(11)),
        )
        .await;
        assert!(cancelled.is_err());

        let (tx, mut lines) = tokio::sync::mpsc::unbounded_channel();
        respond(device, move |line| {
            let _ = tx.send(line.to_string());
            if line == ":r13=0." {
                ":r13=7,0.\r\n".to_string()
            } else {
                String::new()
            }
        });

        let response = engine.send_command(&read_cmd(13)).await.unwrap();
        assert_eq!(response.args(), &[7, 0]);
        assert_eq!(lines.recv().await.unwrap(), ":r11");
        assert_eq!(lines.recv().await.unwrap(), ":r13=0.");
    }

    #[tokio::test]
    async fn test_eof_is_broadcast_until_replaced() {
        let (engine, device) = engine(0);
        drop(device);

        let err = engine.send_command(&read_cmd(11)).await.unwrap_err();
        assert!(err.is_connection_fatal());
        assert!(!engine.is_connected().await);

        let err = engine.send_command(&read_cmd(11)).await.unwrap_err();
        assert!(matches!(err, DriverError::Disconnected(_)));

        let (host, device) = tokio::io::duplex(256);
        respond(device, |_| ":r11=2.\r\n".to_string());
        engine
            .replace_connection(Connection::from_stream("duplex-2", host))
            .await;

        let response = engine.send_command(&read_cmd(11)).await.unwrap();
        assert_eq!(response.args(), &[2]);
    }

    #[tokio::test]
    async fn test_close_disconnects() {
        let (engine, _device) = engine(0);
        engine.close().await;
        let err = engine.send_command(&read_cmd(11)).await.unwrap_err();
        assert!(err.to_string().contains("closed"));
    }
}
