//! Listening socket for the engine's connect-back.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::connection::stream::Connection;
use crate::{AppError, Result};

/// Result of waiting for the engine to connect.
#[derive(Debug)]
pub enum AcceptOutcome {
    /// The engine connected.
    Connected(Connection),
    /// No connection arrived within the timeout.
    TimedOut,
}

/// Loopback listener bound for a single session.
#[derive(Debug)]
pub struct Listener {
    inner: TcpListener,
    port: u16,
}

impl Listener {
    /// Bind `127.0.0.1`, starting at `port_hint`.
    ///
    /// A port that is already taken is skipped; after `attempts` consecutive
    /// ports have failed, an OS-assigned port is used instead. A hint of `0`
    /// goes to the OS directly.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if even the OS-assigned bind fails.
    pub async fn bind(port_hint: u16, attempts: u16) -> Result<Self> {
        if port_hint != 0 {
            for offset in 0..attempts {
                let Some(port) = port_hint.checked_add(offset) else {
                    break;
                };
                match TcpListener::bind((Ipv4Addr::LOCALHOST, port)).await {
                    Ok(inner) => return Self::from_listener(inner),
                    Err(err) => debug!(port, %err, "listener: port unavailable"),
                }
            }
            warn!(
                port_hint,
                attempts, "listener: no hinted port available, using an OS-assigned port"
            );
        }

        let inner = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .map_err(|err| AppError::Io(format!("failed to bind listener: {err}")))?;
        Self::from_listener(inner)
    }

    fn from_listener(inner: TcpListener) -> Result<Self> {
        let port = inner
            .local_addr()
            .map_err(|err| AppError::Io(format!("failed to read listener address: {err}")))?
            .port();
        info!(port, "listener bound");
        Ok(Self { inner, port })
    }

    /// Port the engine must connect to.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Wait up to `timeout` for the engine to connect.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if accepting fails outright.
    pub async fn accept_once(&self, timeout: Duration) -> Result<AcceptOutcome> {
        match tokio::time::timeout(timeout, self.inner.accept()).await {
            Ok(Ok((stream, peer))) => {
                info!(%peer, "engine connected");
                Ok(AcceptOutcome::Connected(Connection::new(stream, peer)))
            }
            Ok(Err(err)) => Err(AppError::Io(format!("accept failed: {err}"))),
            Err(_elapsed) => Ok(AcceptOutcome::TimedOut),
        }
    }

    /// Accept and immediately drop a connection attempt.
    ///
    /// Called while a peer is already active so that a second client is
    /// turned away without disturbing the running session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if accepting fails.
    pub async fn reject_next(&self) -> Result<SocketAddr> {
        let (stream, peer) = self
            .inner
            .accept()
            .await
            .map_err(|err| AppError::Io(format!("accept failed: {err}")))?;
        drop(stream);
        warn!(%peer, "rejected additional connection while a peer is active");
        Ok(peer)
    }
}
