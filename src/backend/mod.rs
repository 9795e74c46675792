//! Engine process management.
//!
//! - `process`: launching, exit polling, out-of-band interrupts and
//!   graceful termination of the engine child process.
//! - `diagnostics`: drains the child's stdout and stderr so that startup
//!   messages and crashes are visible to the client.

pub mod diagnostics;
pub mod process;

pub use diagnostics::{run_drain, spawn_drains, DiagnosticLine, DiagnosticStream};
pub use process::{BackendCommand, BackendHandle, BackendProcess, DiagnosticPipes, QUIT_SEQUENCE};
