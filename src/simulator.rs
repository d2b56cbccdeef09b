//! In-process PSG9080 simulator.
//!
//! Runs a tokio task on the device end of a `tokio::io::duplex` pair and
//! answers the wire protocol from a register file: reads get `:rNN=...`,
//! writes are stored and acknowledged with `:ok`. Unparseable lines are
//! recorded but not answered; blank lines are skipped.
//!
//! Faults can be injected through the [`SimulatorHandle`]: stop answering,
//! send one garbage line, delay replies, or drop the link.
//!
//! ```rust,ignore
//! let (connection, sim) = Simulator::spawn();
//! let generator = SignalGenerator::from_connection(connection, &ProtocolConfig::default());
//! generator.set_amplitude(Channel::One, 2.0).await?;
//! assert_eq!(sim.register(15).await, Some(vec![2000]));
//! ```

use crate::protocol::{Access, Command, Response};
use crate::serial::Connection;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::sync::{Mutex, Notify};

const PIPE_CAPACITY: usize = 1024;

/// Register contents after power-on: outputs off, sine at 1 kHz, 5 Vpp,
/// no offset, 50 % duty, 0°.
fn power_on_registers() -> BTreeMap<u8, Vec<u64>> {
    let mut registers = BTreeMap::new();
    registers.insert(10, vec![0, 0]);
    for base in [11u8, 13, 15, 17, 19, 21] {
        let value = match base {
            11 => vec![0],
            13 => vec![1_000_000, 0],
            15 => vec![5000],
            17 => vec![1000],
            19 => vec![5000],
            _ => vec![0],
        };
        registers.insert(base, value.clone());
        registers.insert(base + 1, value);
    }
    registers
}

#[derive(Debug)]
struct Shared {
    registers: BTreeMap<u8, Vec<u64>>,
    received: Vec<String>,
    mute: bool,
    garbage_once: bool,
    latency: Duration,
}

impl Shared {
    fn reply(&mut self, line: &str) -> Option<Vec<u8>> {
        let command = Command::parse(line).ok()?;
        let code = command.opcode().code();
        let response = match command.access() {
            Access::Write => {
                self.registers.insert(code, command.args().to_vec());
                Response::Ack
            }
            Access::Read => Response::Value {
                opcode: command.opcode(),
                args: self.registers.get(&code)?.clone(),
            },
        };
        Some(response.encode().to_vec())
    }
}

/// Spawns simulated devices.
#[derive(Debug)]
pub struct Simulator;

impl Simulator {
    /// Start a simulated generator. Must be called inside a tokio runtime.
    pub fn spawn() -> (Connection, SimulatorHandle) {
        Self::spawn_labeled("simulator")
    }

    /// Start a simulated generator whose connection carries `label`.
    pub fn spawn_labeled(label: &str) -> (Connection, SimulatorHandle) {
        let (host, device) = tokio::io::duplex(PIPE_CAPACITY);
        let handle = SimulatorHandle {
            shared: Arc::new(Mutex::new(Shared {
                registers: power_on_registers(),
                received: Vec::new(),
                mute: false,
                garbage_once: false,
                latency: Duration::ZERO,
            })),
            disconnect: Arc::new(Notify::new()),
        };
        tokio::spawn(run(device, handle.clone()));
        tracing::debug!(label, "Simulator started");
        (Connection::from_stream(label, host), handle)
    }
}

async fn run(device: DuplexStream, handle: SimulatorHandle) {
    let (read, mut write) = tokio::io::split(device);
    let mut lines = BufReader::new(read).lines();

    loop {
        let line = tokio::select! {
            biased;
            _ = handle.disconnect.notified() => break,
            line = lines.next_line() => match line {
                Ok(Some(line)) => line,
                _ => break,
            },
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let (reply, latency) = {
            let mut shared = handle.shared.lock().await;
            shared.received.push(line.to_string());
            let reply = if shared.mute {
                None
            } else if std::mem::take(&mut shared.garbage_once) {
                Some(b"#\x7fgarbage\r\n".to_vec())
            } else {
                shared.reply(line)
            };
            (reply, shared.latency)
        };

        if let Some(reply) = reply {
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            if write.write_all(&reply).await.is_err() {
                break;
            }
        }
    }
    tracing::debug!("Simulator stopped");
}

/// Control and inspection of a running simulator.
#[derive(Debug, Clone)]
pub struct SimulatorHandle {
    shared: Arc<Mutex<Shared>>,
    disconnect: Arc<Notify>,
}

impl SimulatorHandle {
    /// Every line received so far, without terminators.
    pub async fn received(&self) -> Vec<String> {
        self.shared.lock().await.received.clone()
    }

    /// Current arguments stored for `opcode`.
    pub async fn register(&self, opcode: u8) -> Option<Vec<u64>> {
        self.shared.lock().await.registers.get(&opcode).cloned()
    }

    /// Overwrite a register, as if changed on the front panel.
    pub async fn set_register(&self, opcode: u8, args: Vec<u64>) {
        self.shared.lock().await.registers.insert(opcode, args);
    }

    /// Stop (or resume) answering. Lines are still recorded.
    pub async fn set_mute(&self, mute: bool) {
        self.shared.lock().await.mute = mute;
    }

    /// Answer the next line with garbage instead of a frame.
    pub async fn reply_garbage_once(&self) {
        self.shared.lock().await.garbage_once = true;
    }

    /// Delay every reply by `latency`.
    pub async fn set_latency(&self, latency: Duration) {
        self.shared.lock().await.latency = latency;
    }

    /// Drop the link; the host sees end of stream.
    pub fn disconnect(&self) {
        self.disconnect.notify_one();
    }
}
