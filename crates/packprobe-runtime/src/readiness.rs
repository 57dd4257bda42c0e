//! Readiness polling.
//!
//! The only place where "not reachable yet" is a transient condition: the
//! poller retries a liveness check at a fixed interval until it passes or
//! the deadline expires, then reports `ReadinessTimeout`.

use std::io::ErrorKind;
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use packprobe_common::error::{PackprobeError, Result};
use packprobe_common::poll::{self, PollPolicy};
use serde::{Deserialize, Serialize};

use crate::container::Container;

/// Upper bound for a single connection attempt.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// How long to wait for a freshly accepted connection to be closed by a
/// port forwarder that has no backend yet.
const SETTLE_TIMEOUT: Duration = Duration::from_millis(100);

/// Signal that a published port is serving.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "kind")]
pub enum Liveness {
    /// A TCP connection is accepted and not immediately closed.
    #[default]
    Tcp,
    /// An HTTP request to `path` receives any response.
    Http {
        /// Request path.
        #[serde(default = "root_path")]
        path: String,
    },
}

fn root_path() -> String {
    "/".to_string()
}

impl Liveness {
    /// Runs one liveness check against `addr`.
    ///
    /// # Errors
    ///
    /// Returns a description of why the port is not serving yet.
    pub fn check(&self, addr: SocketAddr) -> std::result::Result<(), String> {
        match self {
            Self::Tcp => tcp_accepts(addr),
            Self::Http { path } => http_responds(addr, path),
        }
    }
}

/// Connects and peeks: a runtime port forwarder accepts connections before
/// the container process listens, then closes them straight away.
fn tcp_accepts(addr: SocketAddr) -> std::result::Result<(), String> {
    let stream = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT).map_err(|e| e.to_string())?;
    stream
        .set_read_timeout(Some(SETTLE_TIMEOUT))
        .map_err(|e| e.to_string())?;
    let mut buf = [0u8; 1];
    match stream.peek(&mut buf) {
        Ok(0) => Err("connection closed by peer".to_string()),
        Ok(_) => Ok(()),
        Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => Ok(()),
        Err(e) => Err(e.to_string()),
    }
}

fn http_responds(addr: SocketAddr, path: &str) -> std::result::Result<(), String> {
    let client = reqwest::blocking::Client::builder()
        .timeout(CONNECT_TIMEOUT)
        .no_proxy()
        .build()
        .map_err(|e| e.to_string())?;
    let url = format!("http://{addr}{path}");
    client.get(&url).send().map(|_| ()).map_err(|e| e.to_string())
}

/// Waits for every published port of a container to pass a liveness check.
#[derive(Debug, Clone)]
pub struct ReadinessPoller {
    liveness: Liveness,
    interval: Duration,
}

impl ReadinessPoller {
    /// Creates a poller using `liveness`, checking every `interval`.
    #[must_use]
    pub const fn new(liveness: Liveness, interval: Duration) -> Self {
        Self { liveness, interval }
    }

    /// Blocks until all published ports of `container` are live.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the container publishes no ports (there is
    /// nothing to probe) and `ReadinessTimeout` if the deadline passes.
    pub fn wait_until_ready(&self, container: &Container, timeout: Duration) -> Result<()> {
        if container.ports.is_empty() {
            return Err(PackprobeError::Config {
                message: format!(
                    "container {} publishes no ports; readiness cannot be observed",
                    container.id.short()
                ),
            });
        }
        let addrs: Vec<SocketAddr> = container
            .ports
            .values()
            .map(|&p| SocketAddr::new(container.host, p))
            .collect();

        tracing::info!(
            id = %container.id.short(),
            liveness = ?self.liveness,
            timeout = ?timeout,
            "waiting for container readiness"
        );

        let policy = PollPolicy::new(self.interval, timeout);
        poll::until(policy, || {
            addrs
                .iter()
                .try_for_each(|&addr| self.liveness.check(addr).map_err(|e| format!("{addr}: {e}")))
        })
        .map_err(|elapsed| PackprobeError::ReadinessTimeout {
            container: container.id.clone(),
            waited: elapsed.waited,
            attempts: elapsed.attempts,
            last_error: elapsed.last_error,
        })?;

        tracing::info!(id = %container.id.short(), "container ready");
        Ok(())
    }
}

impl Default for ReadinessPoller {
    fn default() -> Self {
        Self::new(
            Liveness::default(),
            packprobe_common::constants::DEFAULT_POLL_INTERVAL,
        )
    }
}
