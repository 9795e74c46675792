//! Incremental demultiplexer for the engine's output stream.
//!
//! Bytes arrive in arbitrary chunks: a marker may be split across two socket
//! reads and a line may end several reads after it started. The demuxer
//! accumulates everything in a single buffer and extracts units only once
//! they are complete, so the events it produces do not depend on where the
//! chunk boundaries fell.
//!
//! # Recognized units
//!
//! | Unit                     | Emitted as                              |
//! |--------------------------|-----------------------------------------|
//! | startup banner (once)    | [`ProtocolEvent::FirstPromptMarker`]    |
//! | prompt region            | [`ProtocolEvent::Prompt`]               |
//! | math region              | [`ProtocolEvent::MathResult`]           |
//! | symbol template region   | [`ProtocolEvent::SymbolTemplates`]      |
//! | lisp error text          | [`ProtocolEvent::LispError`]            |
//! | any other complete line  | [`ProtocolEvent::PlainText`]            |
//!
//! Lisp errors carry no markers. Once a text segment opens with one of the
//! configured signatures, everything up to the next tagged region is error
//! text, including an unterminated debugger prompt such as `MAXIMA> `.

use bytes::{Buf, BytesMut};
use tracing::{debug, trace};

use crate::protocol::markers::{find, MarkerTable, RegionKind};
use crate::protocol::ProtocolEvent;

/// Marker announcing the engine's process id inside the startup banner.
const PID_MARKER: &[u8] = b"pid=";

/// Outcome of a single extraction attempt.
enum Step {
    /// A unit was extracted and removed from the buffer.
    Emit(ProtocolEvent),
    /// The buffer holds no complete unit; more bytes are needed.
    Wait,
}

/// Incremental tokenizer that owns the raw receive buffer.
#[derive(Debug)]
pub struct StreamDemuxer {
    markers: MarkerTable,
    buffer: BytesMut,
    banner_seen: bool,
    in_lisp_error: bool,
}

impl Default for StreamDemuxer {
    fn default() -> Self {
        Self::new(MarkerTable::default())
    }
}

impl StreamDemuxer {
    /// Create a demuxer that has not yet seen the startup banner.
    #[must_use]
    pub fn new(markers: MarkerTable) -> Self {
        Self {
            markers,
            buffer: BytesMut::with_capacity(4096),
            banner_seen: false,
            in_lisp_error: false,
        }
    }

    /// Append a sanitized chunk and extract every unit that is now complete.
    ///
    /// Events are returned in the order their content appeared in the
    /// stream. Incomplete units stay buffered for the next call.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<ProtocolEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Step::Emit(event) = self.step() {
            trace!(?event, "demux: extracted unit");
            events.push(event);
        }
        events
    }

    /// The peer is gone: drop whatever was still buffered and report the
    /// disconnect.
    pub fn finish(&mut self) -> ProtocolEvent {
        if !self.buffer.is_empty() {
            debug!(
                bytes = self.buffer.len(),
                "demux: discarding unconsumed bytes on disconnect"
            );
        }
        self.buffer.clear();
        self.in_lisp_error = false;
        ProtocolEvent::PeerDisconnected
    }

    /// Forget everything, including the banner, for a fresh engine.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.banner_seen = false;
        self.in_lisp_error = false;
    }

    /// Kind of the tag region that was opened but has not been closed yet.
    #[must_use]
    pub fn unterminated_region(&self) -> Option<RegionKind> {
        if !self.banner_seen {
            return None;
        }
        self.markers
            .region_at(&self.buffer)
            .map(|idx| self.markers.regions()[idx].kind)
    }

    /// Bytes received but not yet emitted.
    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Whether the startup banner has been consumed.
    #[must_use]
    pub fn banner_seen(&self) -> bool {
        self.banner_seen
    }

    fn step(&mut self) -> Step {
        if self.buffer.is_empty() {
            return Step::Wait;
        }
        if !self.banner_seen {
            return self.read_banner();
        }
        if let Some(idx) = self.markers.region_at(&self.buffer) {
            return self.read_region(idx);
        }
        self.read_text()
    }

    fn read_banner(&mut self) -> Step {
        let banner_end = self.markers.banner_end();
        let Some(pos) = find(&self.buffer, banner_end) else {
            return Step::Wait;
        };

        let banner = self.buffer.split_to(pos + banner_end.len());
        let pid = extract_pid(&banner);
        self.banner_seen = true;
        debug!(?pid, banner_bytes = banner.len(), "demux: startup banner consumed");
        Step::Emit(ProtocolEvent::FirstPromptMarker { pid })
    }

    fn read_region(&mut self, idx: usize) -> Step {
        let region = &self.markers.regions()[idx];
        let body_start = region.start.len();
        let Some(body_len) = find(&self.buffer[body_start..], &region.end) else {
            // Split tag: never emit a partial region.
            return Step::Wait;
        };

        let kind = region.kind;
        let span = self
            .buffer
            .split_to(body_start + body_len + region.end.len());
        let body = String::from_utf8_lossy(&span[body_start..body_start + body_len]).into_owned();
        self.in_lisp_error = false;

        let event = match kind {
            RegionKind::Prompt => ProtocolEvent::Prompt { text: body },
            RegionKind::Math => ProtocolEvent::MathResult { xml_fragment: body },
            RegionKind::SymbolTemplates => ProtocolEvent::SymbolTemplates {
                entries: self.markers.split_templates(&body),
            },
        };
        Step::Emit(event)
    }

    fn read_text(&mut self) -> Step {
        let next_tag = self.markers.next_start(&self.buffer);
        let segment_end = next_tag.unwrap_or(self.buffer.len());

        if !self.in_lisp_error && self.markers.is_lisp_error(&self.buffer[..segment_end]) {
            debug!("demux: lisp error signature detected");
            self.in_lisp_error = true;
        }

        if self.in_lisp_error {
            let take = match next_tag {
                Some(pos) => pos,
                None => {
                    let held = segment_end - self.markers.partial_start_suffix(&self.buffer);
                    held - incomplete_utf8_suffix(&self.buffer[..held])
                }
            };
            if take == 0 {
                return Step::Wait;
            }
            return Step::Emit(ProtocolEvent::LispError {
                text: self.take_text(take),
            });
        }

        let newline = self.buffer[..segment_end]
            .iter()
            .position(|&byte| byte == b'\n');
        match (newline, next_tag) {
            (Some(pos), _) => Step::Emit(ProtocolEvent::PlainText {
                text: self.take_text(pos + 1),
            }),
            (None, Some(pos)) => Step::Emit(ProtocolEvent::PlainText {
                text: self.take_text(pos),
            }),
            // Partial line: wait for its terminator.
            (None, None) => Step::Wait,
        }
    }

    fn take_text(&mut self, len: usize) -> String {
        let text = String::from_utf8_lossy(&self.buffer[..len]).into_owned();
        self.buffer.advance(len);
        text
    }
}

/// Length of a multi-byte character cut off at the end of `bytes`.
///
/// Such a tail must stay buffered until its remaining bytes arrive, or it
/// would decode as replacement characters.
fn incomplete_utf8_suffix(bytes: &[u8]) -> usize {
    let start = bytes.len().saturating_sub(3);
    for (idx, &byte) in bytes.iter().enumerate().skip(start).rev() {
        if byte & 0xC0 == 0x80 {
            continue;
        }
        let width = match byte {
            0xC0..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF7 => 4,
            _ => 1,
        };
        let present = bytes.len() - idx;
        return if present < width { present } else { 0 };
    }
    0
}

/// Parse the digits following `pid=` in the startup banner.
fn extract_pid(banner: &[u8]) -> Option<u32> {
    let start = find(banner, PID_MARKER)? + PID_MARKER.len();
    let digits: String = banner[start..]
        .iter()
        .take_while(|byte| byte.is_ascii_digit())
        .map(|&byte| char::from(byte))
        .collect();
    digits.parse().ok()
}
