//! Engine stream protocol.
//!
//! The engine writes free-form text into the socket, framed by ad-hoc
//! start/end markers instead of length prefixes. This module turns that
//! byte stream into typed [`ProtocolEvent`]s.
//!
//! - `markers`: the `(start, end, kind)` table plus the two untagged regions
//!   (startup banner, lisp errors).
//! - `demux`: [`StreamDemuxer`](demux::StreamDemuxer), the incremental
//!   tokenizer that owns the raw receive buffer.

pub mod demux;
pub mod markers;

pub use demux::StreamDemuxer;
pub use markers::{MarkerTable, RegionKind};

/// One complete unit recognized in the engine's output stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolEvent {
    /// The engine is ready for the next command (or asks a question).
    Prompt {
        /// Prompt text between the markers, e.g. `(%i2) `.
        text: String,
    },
    /// A typeset result as an XML fragment.
    MathResult {
        /// Markup between the math markers.
        xml_fragment: String,
    },
    /// Untagged status or diagnostic text; one event per line.
    PlainText {
        /// The text, including its line terminator when it had one.
        text: String,
    },
    /// Output of the lisp runtime's debugger or error reporter.
    LispError {
        /// Raw error text.
        text: String,
    },
    /// Autocompletion templates announced after a definition.
    SymbolTemplates {
        /// Templates in the order the engine listed them.
        entries: Vec<String>,
    },
    /// The startup banner ended; the engine is accepting input.
    FirstPromptMarker {
        /// Engine process id announced in the banner, if any.
        pid: Option<u32>,
    },
    /// The engine closed its end of the socket.
    PeerDisconnected,
}
