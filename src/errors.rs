//! Error types shared across the bridge.

use std::fmt::{Display, Formatter};

/// Shared bridge result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Bridge error enumeration covering every failure mode of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// The engine executable is missing or the OS refused to launch it.
    Spawn(String),
    /// The engine never connected, or exited before connecting.
    StartupFailure(String),
    /// The engine closed the socket or died mid-session.
    PeerDisconnected(String),
    /// A tag region was opened but never closed before the stream ended.
    MalformedStream(String),
    /// Delivering an out-of-band interrupt to the engine failed.
    Interrupt(String),
    /// A session state change that the lifecycle does not permit.
    InvalidTransition(String),
    /// The controller is gone; requests can no longer be delivered.
    Closed(String),
    /// Socket, pipe, or other I/O failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Spawn(msg) => write!(f, "spawn: {msg}"),
            Self::StartupFailure(msg) => write!(f, "startup failure: {msg}"),
            Self::PeerDisconnected(msg) => write!(f, "peer disconnected: {msg}"),
            Self::MalformedStream(msg) => write!(f, "malformed stream: {msg}"),
            Self::Interrupt(msg) => write!(f, "interrupt: {msg}"),
            Self::InvalidTransition(msg) => write!(f, "invalid transition: {msg}"),
            Self::Closed(msg) => write!(f, "closed: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
