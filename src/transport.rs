//! Modbus-TCP transport.
//!
//! Connection tasks only frame bytes. Decoded frames are queued to the cycle
//! driver, which owns the register bank and applies them in
//! [`ProtocolTransport::service_requests`] without ever blocking. A full
//! queue makes connection tasks wait, so request bursts back up in the
//! transport instead of stretching a cycle.

use crate::modbus::{self, Frame, ModbusError};
use crate::registers::RegisterBank;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub const DEFAULT_QUEUE_DEPTH: usize = 64;
pub const DEFAULT_MAX_REQUESTS_PER_CYCLE: usize = 32;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Protocol servicing as seen by the cycle driver.
pub trait ProtocolTransport {
    /// Apply already-received requests to `bank` and answer them. Never blocks.
    fn service_requests(&mut self, bank: &mut RegisterBank) -> ServiceReport;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceReport {
    pub handled: usize,
    pub exceptions: usize,
    /// The per-cycle budget was reached; more requests may still be queued.
    pub budget_exhausted: bool,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TransportStats {
    pub requests_handled: u64,
    pub exceptions_sent: u64,
    pub replies_dropped: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportConfig {
    pub queue_depth: usize,
    pub max_requests_per_cycle: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            queue_depth: DEFAULT_QUEUE_DEPTH,
            max_requests_per_cycle: DEFAULT_MAX_REQUESTS_PER_CYCLE,
        }
    }
}

#[derive(Debug)]
pub struct PendingRequest {
    pub frame: Frame,
    pub peer: SocketAddr,
    pub reply: oneshot::Sender<Frame>,
}

/// TCP server feeding a bounded request queue.
#[derive(Debug)]
pub struct TcpTransport {
    requests: mpsc::Receiver<PendingRequest>,
    max_requests_per_cycle: usize,
    local_addr: SocketAddr,
    accept_task: JoinHandle<()>,
    stats: TransportStats,
}

impl TcpTransport {
    /// Bind and start accepting. Must be called inside a tokio runtime.
    pub async fn bind(address: SocketAddr, config: TransportConfig) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(address).await?;
        Self::start(listener, config)
    }

    /// Adopt a listener bound during network association.
    pub fn from_std(listener: std::net::TcpListener, config: TransportConfig) -> Result<Self, TransportError> {
        listener.set_nonblocking(true)?;
        Self::start(TcpListener::from_std(listener)?, config)
    }

    fn start(listener: TcpListener, config: TransportConfig) -> Result<Self, TransportError> {
        let local_addr = listener.local_addr()?;
        let (tx, rx) = mpsc::channel(config.queue_depth.max(1));
        let accept_task = tokio::spawn(accept_loop(listener, tx));
        info!("🌐 Modbus TCP server listening on {}", local_addr);

        Ok(Self {
            requests: rx,
            max_requests_per_cycle: config.max_requests_per_cycle.max(1),
            local_addr,
            accept_task,
            stats: TransportStats::default(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stats(&self) -> &TransportStats {
        &self.stats
    }
}

impl ProtocolTransport for TcpTransport {
    fn service_requests(&mut self, bank: &mut RegisterBank) -> ServiceReport {
        let mut report = ServiceReport::default();

        while report.handled < self.max_requests_per_cycle {
            let Ok(pending) = self.requests.try_recv() else {
                return report;
            };

            let reply = modbus::handle_frame(bank, &pending.frame);
            if is_exception(&reply) {
                report.exceptions += 1;
                self.stats.exceptions_sent = self.stats.exceptions_sent.saturating_add(1);
                debug!(peer = %pending.peer, pdu = ?&reply.pdu[..], "exception response");
            }
            if pending.reply.send(reply).is_err() {
                // Client went away while queued
                self.stats.replies_dropped = self.stats.replies_dropped.saturating_add(1);
            }

            report.handled += 1;
            self.stats.requests_handled = self.stats.requests_handled.saturating_add(1);
        }

        report.budget_exhausted = true;
        report
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

fn is_exception(frame: &Frame) -> bool {
    frame.pdu.first().is_some_and(|function| function & 0x80 != 0)
}

async fn accept_loop(listener: TcpListener, requests: mpsc::Sender<PendingRequest>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                info!("🔗 Modbus client connected: {}", peer);
                let requests = requests.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, peer, requests).await {
                        warn!("Client {} error: {}", peer, e);
                    }
                    info!("🔌 Modbus client {} disconnected", peer);
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    requests: mpsc::Sender<PendingRequest>,
) -> Result<(), ModbusError> {
    stream.set_nodelay(true)?;
    let (mut reader, mut writer) = stream.into_split();

    while let Some(frame) = modbus::read_frame(&mut reader).await? {
        let (reply_tx, reply_rx) = oneshot::channel();
        let pending = PendingRequest {
            frame,
            peer,
            reply: reply_tx,
        };

        // Node loop stopped: nothing left to answer with
        if requests.send(pending).await.is_err() {
            return Ok(());
        }
        let Ok(reply) = reply_rx.await else {
            return Ok(());
        };

        modbus::write_frame(&mut writer, &reply).await?;
    }

    Ok(())
}
