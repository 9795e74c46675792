//! Loopback transport between the bridge and the engine.
//!
//! The bridge is the listening side: it binds a port on `127.0.0.1`, hands
//! the port to the engine on its command line, and accepts exactly one
//! connection back.
//!
//! - `listener`: port binding with fallback and the single-peer accept.
//! - `stream`: the accepted peer, raw chunk reads and whole writes, plus the
//!   reader task feeding the session controller.

pub mod listener;
pub mod stream;

pub use listener::{AcceptOutcome, Listener};
pub use stream::{run_reader, ChunkReader, ChunkWriter, Connection, Inbound, ReadOutcome};

/// Remove embedded NUL bytes from a received chunk.
///
/// A slow or garbled transmission can leave NULs in the stream, which would
/// cut logical text short and corrupt marker matching downstream. The scrub
/// is stateless, so applying it per chunk is equivalent to applying it to
/// the whole stream; all other bytes keep their relative order.
#[must_use]
pub fn scrub_nuls(raw: &[u8]) -> Vec<u8> {
    raw.iter().copied().filter(|&byte| byte != 0).collect()
}
