//! Unit tests for the stream demuxer.
//!
//! Covers:
//! - startup banner handling and pid extraction
//! - tagged regions (prompt, math, symbol templates) in stream order
//! - markers split across chunk boundaries
//! - independence of the event sequence from chunk boundaries
//! - untagged lisp error text
//! - disconnect and reset behaviour

use maxima_bridge::config::MarkerConfig;
use maxima_bridge::protocol::{MarkerTable, ProtocolEvent, RegionKind, StreamDemuxer};

const BANNER: &[u8] = b"Maxima 5.47.0 https://maxima.sourceforge.io\npid=4242\n(%i1) ";

fn demux_after_banner() -> StreamDemuxer {
    let mut demux = StreamDemuxer::default();
    let events = demux.feed(BANNER);
    assert_eq!(
        events,
        vec![ProtocolEvent::FirstPromptMarker { pid: Some(4242) }],
        "banner must produce exactly one first-prompt marker"
    );
    demux
}

fn prompt(text: &str) -> ProtocolEvent {
    ProtocolEvent::Prompt { text: text.into() }
}

fn plain(text: &str) -> ProtocolEvent {
    ProtocolEvent::PlainText { text: text.into() }
}

fn math(xml: &str) -> ProtocolEvent {
    ProtocolEvent::MathResult {
        xml_fragment: xml.into(),
    }
}

// ── Banner ──────────────────────────────────────────────────────────────────

/// A banner delivered in pieces is recognized once, when its end arrives.
#[test]
fn banner_split_across_chunks_yields_one_marker() {
    let mut demux = StreamDemuxer::default();

    assert!(demux.feed(b"Maxima 5.47.0\npi").is_empty());
    assert!(demux.feed(b"d=17\n(%i").is_empty());
    let events = demux.feed(b"1) ");

    assert_eq!(events, vec![ProtocolEvent::FirstPromptMarker { pid: Some(17) }]);
    assert!(demux.banner_seen());
    assert_eq!(demux.buffered_len(), 0);
}

/// A banner without a pid still completes the handshake.
#[test]
fn banner_without_pid_reports_none() {
    let mut demux = StreamDemuxer::default();
    let events = demux.feed(b"Maxima restarted.\n(%i1) ");
    assert_eq!(events, vec![ProtocolEvent::FirstPromptMarker { pid: None }]);
}

/// Bytes following the banner in the same chunk are parsed normally.
#[test]
fn output_after_banner_in_same_chunk_is_parsed() {
    let mut demux = StreamDemuxer::default();
    let events = demux.feed(b"pid=5\n(%i1) <mth>1</mth>");
    assert_eq!(
        events,
        vec![ProtocolEvent::FirstPromptMarker { pid: Some(5) }, math("1")]
    );
}

// ── Tagged regions ──────────────────────────────────────────────────────────

/// Regions are emitted in the order they appear, markers stripped.
#[test]
fn regions_are_emitted_in_stream_order() {
    let mut demux = demux_after_banner();

    let events = demux.feed(b"<mth><mi>x</mi></mth><PROMPT-P/>(%i2) <PROMPT-S/>");

    assert_eq!(events, vec![math("<mi>x</mi>"), prompt("(%i2) ")]);
}

/// Symbol template lists are split on the separator.
#[test]
fn symbol_templates_are_split_into_entries() {
    let mut demux = demux_after_banner();

    let events = demux.feed(b"<wxxml-symbols>foo(x)$ bar(<y>, <z>) $</wxxml-symbols>");

    assert_eq!(
        events,
        vec![ProtocolEvent::SymbolTemplates {
            entries: vec!["foo(x)".into(), "bar(<y>, <z>)".into()],
        }]
    );
}

/// A prompt tag split mid-marker produces one complete prompt, never a
/// partial one.
#[test]
fn prompt_split_mid_tag_yields_single_prompt() {
    let markers = MarkerTable::from_config(&MarkerConfig {
        prompt_start: "<prompt>".into(),
        prompt_end: "</prompt>".into(),
        ..MarkerConfig::default()
    });
    let mut demux = StreamDemuxer::new(markers);
    demux.feed(b"pid=1\n(%i1) ");

    let first = demux.feed(b"<prompt>(%i");
    assert!(first.is_empty(), "no event may be emitted for a partial region");

    let second = demux.feed(b"1) </prompt>");
    assert_eq!(second, vec![prompt("(%i1) ")]);
}

/// A region whose end marker is still missing stays buffered.
#[test]
fn open_region_waits_for_its_end_marker() {
    let mut demux = demux_after_banner();

    assert!(demux.feed(b"<mth><mfrac>1").is_empty());
    assert_eq!(demux.unterminated_region(), Some(RegionKind::Math));

    let events = demux.feed(b"2</mfrac></mth>");
    assert_eq!(events, vec![math("<mfrac>12</mfrac>")]);
    assert_eq!(demux.unterminated_region(), None);
}

// ── Plain text ──────────────────────────────────────────────────────────────

/// Plain text is emitted line by line, terminator included.
#[test]
fn plain_text_is_emitted_per_line() {
    let mut demux = demux_after_banner();

    let events = demux.feed(b"first line\nsecond line\n");

    assert_eq!(events, vec![plain("first line\n"), plain("second line\n")]);
}

/// An unterminated line is held until its newline arrives.
#[test]
fn partial_line_is_held_until_newline() {
    let mut demux = demux_after_banner();

    assert!(demux.feed(b"abc").is_empty());
    assert_eq!(demux.feed(b"def\n"), vec![plain("abcdef\n")]);
}

/// Text directly in front of a tag is flushed when the tag is complete.
#[test]
fn text_before_tag_is_flushed_by_the_tag() {
    let mut demux = demux_after_banner();

    let events = demux.feed(b"Warning: <mth>1</mth>");

    assert_eq!(events, vec![plain("Warning: "), math("1")]);
}

// ── Chunk independence ──────────────────────────────────────────────────────

const SESSION_STREAM: &[u8] = b"Maxima 5.47.0\npid=99\n(%i1) \
plain line one\n\
<mth><msup><mi>x</mi><mn>2</mn></msup></mth>\
partial <wxxml-symbols>foo(x)$bar(y)</wxxml-symbols>\
tail\n\
<PROMPT-P/>(%i2) <PROMPT-S/>";

fn feed_all(demux: &mut StreamDemuxer, chunks: &[&[u8]]) -> Vec<ProtocolEvent> {
    chunks.iter().flat_map(|chunk| demux.feed(chunk)).collect()
}

/// Splitting the stream at any single offset yields the same events as
/// delivering it whole.
#[test]
fn events_do_not_depend_on_split_offset() {
    let reference = StreamDemuxer::default().feed(SESSION_STREAM);
    assert_eq!(reference.len(), 7, "reference parse: {reference:?}");

    for offset in 0..=SESSION_STREAM.len() {
        let (head, tail) = SESSION_STREAM.split_at(offset);
        let events = feed_all(&mut StreamDemuxer::default(), &[head, tail]);
        assert_eq!(events, reference, "split at offset {offset}");
    }
}

/// Byte-at-a-time delivery yields the same events as delivering it whole.
#[test]
fn events_do_not_depend_on_chunk_size() {
    let reference = StreamDemuxer::default().feed(SESSION_STREAM);

    for size in 1..=7 {
        let chunks: Vec<&[u8]> = SESSION_STREAM.chunks(size).collect();
        let events = feed_all(&mut StreamDemuxer::default(), &chunks);
        assert_eq!(events, reference, "chunk size {size}");
    }
}

// ── Lisp errors ─────────────────────────────────────────────────────────────

/// Text opening with a debugger signature is reported as a lisp error up to
/// the next tag.
#[test]
fn lisp_error_runs_until_next_tag() {
    let mut demux = demux_after_banner();

    let events = demux.feed(b"(dbm:1) Maxima encountered a Lisp error\n<PROMPT-P/>(%i2) <PROMPT-S/>");

    assert_eq!(
        events,
        vec![
            ProtocolEvent::LispError {
                text: "(dbm:1) Maxima encountered a Lisp error\n".into(),
            },
            prompt("(%i2) "),
        ]
    );
}

/// An unterminated debugger prompt is emitted without waiting for a newline.
#[test]
fn lisp_debugger_prompt_is_emitted_immediately() {
    let mut demux = demux_after_banner();

    let events = demux.feed(b"MAXIMA> ");

    assert_eq!(
        events,
        vec![ProtocolEvent::LispError {
            text: "MAXIMA> ".into(),
        }]
    );
}

/// A possible marker prefix at the end of lisp error text is held back.
#[test]
fn lisp_error_holds_back_partial_marker() {
    let mut demux = demux_after_banner();

    let events = demux.feed(b"MAXIMA> <PROM");
    assert_eq!(
        events,
        vec![ProtocolEvent::LispError {
            text: "MAXIMA> ".into(),
        }]
    );
    assert_eq!(demux.buffered_len(), 5);

    let events = demux.feed(b"PT-P/>(%i2) <PROMPT-S/>after\n");
    assert_eq!(events, vec![prompt("(%i2) "), plain("after\n")]);
}

/// A multi-byte character split between chunks reaches the client intact.
#[test]
fn lisp_error_keeps_split_character_whole() {
    let mut demux = demux_after_banner();

    let events = demux.feed(b"MAXIMA> \xCF");
    assert_eq!(
        events,
        vec![ProtocolEvent::LispError {
            text: "MAXIMA> ".into(),
        }]
    );
    assert_eq!(demux.buffered_len(), 1);

    let events = demux.feed(b"\x80\n");
    assert_eq!(
        events,
        vec![ProtocolEvent::LispError {
            text: "\u{3c0}\n".into(),
        }]
    );
}

/// Lisp error text is reassembled unchanged wherever the chunks are cut.
#[test]
fn lisp_error_text_does_not_depend_on_split_offset() {
    let input = "MAXIMA> \u{3c0} \u{2200}x \u{1f600}\n".as_bytes();

    for split in 0..=input.len() {
        let mut demux = demux_after_banner();
        let events = feed_all(&mut demux, &[&input[..split], &input[split..]]);
        let text: String = events
            .iter()
            .map(|event| match event {
                ProtocolEvent::LispError { text } => text.as_str(),
                other => panic!("unexpected event {other:?} at split {split}"),
            })
            .collect();

        assert!(!text.contains('\u{fffd}'), "split {split} corrupted the text");
        assert_eq!(text.as_bytes(), input, "split {split}");
    }
}

// ── Disconnect and reset ────────────────────────────────────────────────────

/// Finishing discards partial content and reports the disconnect.
#[test]
fn finish_discards_buffered_bytes() {
    let mut demux = demux_after_banner();
    demux.feed(b"<mth>never closed");

    assert_eq!(demux.unterminated_region(), Some(RegionKind::Math));
    assert_eq!(demux.finish(), ProtocolEvent::PeerDisconnected);
    assert_eq!(demux.buffered_len(), 0);
}

/// After a reset the next engine's banner is expected again.
#[test]
fn reset_requires_a_new_banner() {
    let mut demux = demux_after_banner();
    demux.reset();

    assert!(!demux.banner_seen());
    assert!(demux.feed(b"<mth>1</mth>").is_empty());
    let events = demux.feed(b"\npid=8\n(%i1) ");
    assert_eq!(events, vec![ProtocolEvent::FirstPromptMarker { pid: Some(8) }]);
}
