use core::fmt;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::net::{SocketAddr, TcpListener};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

pub const DEFAULT_RETRY_MS: u64 = 500;
pub const DEFAULT_STATUS_EVERY: u32 = 10;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("link I/O failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("credentials rejected for network {0:?}")]
    Rejected(String),
    #[error("no association after {0} attempts")]
    Exhausted(u32),
}

#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Credentials {
    pub ssid: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("ssid", &self.ssid)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Connectivity collaborator.
pub trait NetworkLink {
    /// Handle produced once associated (a bound socket on the host).
    type Session;

    fn begin(&mut self, credentials: &Credentials) -> Result<(), LinkError>;

    /// `WouldBlock` while association is still pending.
    fn poll_associated(&mut self) -> nb::Result<Self::Session, LinkError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retry_interval: Duration,
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
    /// Emit a progress line every this many attempts.
    pub status_every: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_millis(DEFAULT_RETRY_MS),
            max_attempts: None,
            status_every: DEFAULT_STATUS_EVERY,
        }
    }
}

#[derive(Debug)]
pub struct Association<S> {
    pub session: S,
    pub attempts: u32,
}

/// Block until `link` associates, sleeping `policy.retry_interval` between polls.
pub fn associate<L, F>(
    link: &mut L,
    credentials: &Credentials,
    policy: &RetryPolicy,
    mut sleep: F,
) -> Result<Association<L::Session>, LinkError>
where
    L: NetworkLink,
    F: FnMut(Duration),
{
    info!(ssid = %credentials.ssid, "connecting to network");
    link.begin(credentials)?;

    let mut attempts: u32 = 0;
    loop {
        attempts = attempts.saturating_add(1);
        match link.poll_associated() {
            Ok(session) => {
                info!(attempts, "network associated");
                return Ok(Association { session, attempts });
            }
            Err(nb::Error::Other(e)) => return Err(e),
            Err(nb::Error::WouldBlock) => {}
        }

        if policy.max_attempts.is_some_and(|max| attempts >= max) {
            return Err(LinkError::Exhausted(attempts));
        }

        if policy.status_every > 0 && attempts % policy.status_every == 0 {
            info!(attempts, "still waiting for network association");
        } else {
            debug!(attempts, "association pending");
        }
        sleep(policy.retry_interval);
    }
}

/// Host link: "associated" once the listen address can be bound.
///
/// An address that is in use or not yet configured on any interface is
/// treated as pending, anything else as fatal.
#[derive(Debug)]
pub struct HostLink {
    bind_address: SocketAddr,
}

impl HostLink {
    pub fn new(bind_address: SocketAddr) -> Self {
        Self { bind_address }
    }
}

impl NetworkLink for HostLink {
    type Session = TcpListener;

    fn begin(&mut self, credentials: &Credentials) -> Result<(), LinkError> {
        debug!(ssid = %credentials.ssid, address = %self.bind_address, "host link ignores credentials");
        Ok(())
    }

    fn poll_associated(&mut self) -> nb::Result<TcpListener, LinkError> {
        match TcpListener::bind(self.bind_address) {
            Ok(listener) => {
                listener
                    .set_nonblocking(true)
                    .map_err(|e| nb::Error::Other(LinkError::Io(e)))?;
                Ok(listener)
            }
            Err(e) if matches!(e.kind(), ErrorKind::AddrInUse | ErrorKind::AddrNotAvailable) => {
                debug!(error = %e, "listen address not available yet");
                Err(nb::Error::WouldBlock)
            }
            Err(e) => Err(nb::Error::Other(LinkError::Io(e))),
        }
    }
}
