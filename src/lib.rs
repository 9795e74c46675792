#![forbid(unsafe_code)]

//! Session bridge between an interactive client and a socket-driven Maxima
//! engine.
//!
//! The engine is launched as a child process and connects back to a
//! loopback listener. Its byte stream is split into prompts, typeset
//! results, plain text and errors; commands are fed to it one at a time.

pub mod backend;
pub mod config;
pub mod connection;
pub mod errors;
pub mod protocol;
pub mod queue;
pub mod session;

pub use config::BridgeConfig;
pub use errors::{AppError, Result};
