//! Session orchestration.
//!
//! A session owns one engine at a time: it launches it, waits for it to
//! connect and announce itself, feeds it queued commands one by one, and
//! tears it down. Collaborators interact only through a [`SessionHandle`]
//! and the [`SessionEvent`] stream.
//!
//! - `state`: lifecycle states and legal transitions.
//! - `machine`: the I/O-free state machine (admission, output guard, questions).
//! - `controller`: the event loop binding the core to the engine's socket
//!   and process.
//! - `handle`: thread-safe submission point for callers on other threads.
//! - `command`: statement normalization applied before sending.

pub mod command;
pub mod controller;
pub mod handle;
pub mod machine;
pub mod state;

use serde::Serialize;

pub use self::controller::SessionController;
pub use self::handle::{Request, SessionHandle};
pub use self::machine::{Directive, SessionCore};
pub use self::state::SessionState;

use crate::backend::DiagnosticStream;

/// Why an in-flight command ended without completing.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InterruptReason {
    /// The caller asked for cancellation.
    User,
    /// The command produced more output than the configured ceiling.
    OutputLimit,
    /// The engine process exited.
    BackendExited,
    /// The engine closed the socket.
    PeerDisconnected,
    /// The session was shut down.
    Shutdown,
    /// The engine is being restarted.
    Restart,
}

/// Everything a session reports to its subscribers.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    /// The session moved to a new lifecycle state.
    StateChanged {
        /// Previous state.
        from: SessionState,
        /// New state.
        to: SessionState,
    },
    /// The listener is bound; the engine will be told to use this port.
    Listening {
        /// Bound loopback port.
        port: u16,
    },
    /// The engine printed an input prompt.
    Prompt {
        /// Prompt text, e.g. `(%i3) `.
        text: String,
    },
    /// The engine asked a question the running command needs answered.
    Question {
        /// Question text.
        text: String,
    },
    /// A typeset result.
    MathResult {
        /// XML fragment to render.
        xml_fragment: String,
    },
    /// Untagged text output.
    PlainText {
        /// The text line.
        text: String,
    },
    /// Error text from the lisp runtime.
    LispError {
        /// Raw error text.
        text: String,
    },
    /// Autocompletion templates.
    SymbolTemplates {
        /// Templates in engine order.
        entries: Vec<String>,
    },
    /// A line the engine printed on stdout or stderr.
    Diagnostic {
        /// Origin stream.
        stream: DiagnosticStream,
        /// Line content.
        line: String,
    },
    /// A command was sent to the engine.
    EvaluationStarted {
        /// Queue sequence number.
        sequence: u64,
        /// Statement as sent.
        text: String,
    },
    /// The engine prompted again after a command.
    EvaluationCompleted {
        /// Queue sequence number.
        sequence: u64,
    },
    /// A command was abandoned before completing.
    EvaluationInterrupted {
        /// Queue sequence number.
        sequence: u64,
        /// Command text as submitted.
        text: String,
        /// Why it was abandoned.
        reason: InterruptReason,
    },
    /// A failure the session could not absorb.
    Error {
        /// Rendered [`AppError`](crate::AppError).
        message: String,
    },
}
