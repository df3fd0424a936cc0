//! # Frame Buffer
//!
//! One `FrameBuffer` lives for exactly one stream session. Chunks are appended
//! as they arrive with [`FrameBuffer::process`]; [`FrameBuffer::complete_entries`]
//! then yields every record whose boundary has been fully received.
//!
//! After the iterator is exhausted the accumulator holds exactly the
//! unconsumed suffix: a record split across chunks is held until the chunk
//! completing it arrives, and no byte is ever yielded twice.
//!
//! JSON records are delimited structurally: the record is the top-level
//! object from its `{` to the matching `}` (braces inside strings do not
//! count), which must be followed by two whitespace bytes (`\r\n` upstream,
//! two spaces also accepted). A line that cannot be framed this way is
//! skipped up to its line break with a warning, so the stream resynchronizes.

use std::fmt;
use std::str::Utf8Error;

use regex::bytes::Regex;
use static_init::dynamic;

/// Longest prefix of skipped bytes quoted in the resync warning.
const SKIP_PREVIEW: usize = 80;

/// Prefix pattern for Atom framing. Anything before the first `<entry` (XML
/// prolog, `<feed>` opening tag) is discarded; the record ends at `</entry>`.
#[dynamic]
static XML_BOUNDARY: Regex =
    Regex::new(r"(?s-u)\A.*?(<entry[\t\n\r />].*?</entry>)").expect("valid XML boundary pattern");

/// Boundary policy of a stream, chosen when the stream is constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// One compact JSON object per line (PowerTrack).
    Json,
    /// Atom `<entry>` elements, possibly spanning lines (Enterprise Data Collector).
    Xml,
}

impl fmt::Display for Framing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Framing::Json => write!(f, "json"),
            Framing::Xml => write!(f, "xml"),
        }
    }
}

/// A single record extracted from the stream, still in its wire encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    sequence: u64,
    format: Framing,
    bytes: Vec<u8>,
}

impl RawRecord {
    /// Wraps already-framed bytes. `sequence` is the extraction order within the stream.
    pub fn new(sequence: u64, format: Framing, bytes: Vec<u8>) -> Self {
        Self { sequence, format, bytes }
    }

    /// Extraction order of this record within the stream.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Framing the record was extracted with.
    pub fn format(&self) -> Framing {
        self.format
    }

    /// The raw record bytes, exactly as received.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The record as UTF-8 text.
    pub fn to_text(&self) -> Result<&str, Utf8Error> {
        std::str::from_utf8(&self.bytes)
    }

    /// Length of the record in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// True for a zero-length record (never produced by the framer).
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Byte accumulator for one stream session.
#[derive(Debug)]
pub struct FrameBuffer {
    framing: Framing,
    buffer: Vec<u8>,
    next_sequence: u64,
}

impl FrameBuffer {
    /// Creates an empty buffer using the given boundary policy.
    pub fn new(framing: Framing) -> Self {
        Self::starting_at(framing, 0)
    }

    /// Creates an empty buffer whose first record gets `first_sequence`.
    ///
    /// Used when a reconnected session continues the numbering of the stream.
    pub fn starting_at(framing: Framing, first_sequence: u64) -> Self {
        Self {
            framing,
            buffer: Vec::new(),
            next_sequence: first_sequence,
        }
    }

    /// Appends a chunk to the accumulator.
    pub fn process(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Lazily yields every complete record currently in the accumulator.
    ///
    /// Each call starts over from the current accumulator; dropping the
    /// iterator early leaves the remaining records in place for the next call.
    pub fn complete_entries(&mut self) -> CompleteEntries<'_> {
        CompleteEntries { owner: self }
    }

    /// Bytes received but not yet extracted as a record.
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }

    /// Sequence number the next extracted record will carry.
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Policy this buffer frames with.
    pub fn framing(&self) -> Framing {
        self.framing
    }
}

/// Iterator returned by [`FrameBuffer::complete_entries`].
pub struct CompleteEntries<'a> {
    owner: &'a mut FrameBuffer,
}

impl Iterator for CompleteEntries<'_> {
    type Item = RawRecord;

    fn next(&mut self) -> Option<Self::Item> {
        let owner = &mut *self.owner;
        let (record, consumed) = match owner.framing {
            Framing::Json => loop {
                let start = owner.buffer.iter().position(|b| !is_json_space(*b)).unwrap_or(owner.buffer.len());
                owner.buffer.drain(..start);
                match scan_json(&owner.buffer) {
                    JsonScan::Record { end, consumed } => break (owner.buffer[..end].to_vec(), consumed),
                    JsonScan::Skip(skipped) => {
                        let preview = &owner.buffer[..skipped.min(SKIP_PREVIEW)];
                        log::warn!(
                            "Skipping {} unframeable bytes: {:?}",
                            skipped,
                            String::from_utf8_lossy(preview).trim_end()
                        );
                        owner.buffer.drain(..skipped);
                    }
                    JsonScan::Incomplete => return None,
                }
            },
            Framing::Xml => {
                let caps = XML_BOUNDARY.captures(&owner.buffer)?;
                (caps.get(1)?.as_bytes().to_vec(), caps.get(0)?.end())
            }
        };
        owner.buffer.drain(..consumed);

        let sequence = owner.next_sequence;
        owner.next_sequence += 1;
        Some(RawRecord::new(sequence, owner.framing, record))
    }
}

/// Outcome of framing the head of a JSON accumulator.
#[derive(Debug, PartialEq, Eq)]
enum JsonScan {
    /// `buffer[..end]` is a record; `consumed` includes its terminator.
    Record { end: usize, consumed: usize },
    /// The head cannot start a record; drop this many bytes (through the line break).
    Skip(usize),
    /// More data is needed to decide.
    Incomplete,
}

fn is_json_space(byte: u8) -> bool {
    matches!(byte, b' ' | b'\t' | b'\r' | b'\n')
}

fn is_line_break(byte: u8) -> bool {
    matches!(byte, b'\r' | b'\n')
}

/// Frames the head of `buffer`, which starts with a non-whitespace byte or is empty.
fn scan_json(buffer: &[u8]) -> JsonScan {
    let skip_line = |from: usize| match buffer[from..].iter().position(|b| is_line_break(*b)) {
        Some(offset) => JsonScan::Skip(from + offset + 1),
        None => JsonScan::Incomplete,
    };

    match buffer.first() {
        None => return JsonScan::Incomplete,
        Some(b'{') => {}
        Some(_) => return skip_line(0),
    }

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    let mut end = None;
    for (i, &byte) in buffer.iter().enumerate() {
        if is_line_break(byte) {
            // Raw line breaks never occur inside a framed record.
            return JsonScan::Skip(i + 1);
        }
        if in_string {
            match byte {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    end = Some(i + 1);
                    break;
                }
            }
            _ => {}
        }
    }

    let Some(end) = end else {
        return JsonScan::Incomplete;
    };
    match buffer.get(end..end + 2) {
        None => JsonScan::Incomplete,
        Some(terminator) if terminator.iter().all(|b| is_json_space(*b)) => JsonScan::Record {
            end,
            consumed: end + 2,
        },
        Some(_) => skip_line(end),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(buffer: &mut FrameBuffer) -> Vec<String> {
        buffer
            .complete_entries()
            .map(|r| r.to_text().unwrap().to_string())
            .collect()
    }

    fn json_records() -> Vec<String> {
        vec![
            r#"{"id":"tag:search.twitter.com,2005:1","body":"first"}"#.to_string(),
            r#"{"id":"tag:search.twitter.com,2005:2","body":"braces } inside {"}"#.to_string(),
            r#"{"id":"tag:search.twitter.com,2005:3","body":"café ☕"}"#.to_string(),
        ]
    }

    #[test]
    fn test_empty_buffer_yields_nothing() {
        let mut buffer = FrameBuffer::new(Framing::Json);
        assert!(drain(&mut buffer).is_empty());
        assert!(buffer.pending().is_empty());
    }

    #[test]
    fn test_json_whole_payload_at_once() {
        let records = json_records();
        let wire: String = records.iter().map(|r| format!("{}\r\n", r)).collect();

        let mut buffer = FrameBuffer::new(Framing::Json);
        buffer.process(wire.as_bytes());

        assert_eq!(drain(&mut buffer), records);
        assert!(buffer.pending().is_empty());
        assert_eq!(buffer.next_sequence(), 3);
    }

    #[test]
    fn test_json_one_byte_at_a_time() {
        let records = json_records();
        let wire: String = records.iter().map(|r| format!("{}\r\n", r)).collect();

        let mut buffer = FrameBuffer::new(Framing::Json);
        let mut seen = Vec::new();
        for byte in wire.as_bytes() {
            buffer.process(std::slice::from_ref(byte));
            seen.extend(drain(&mut buffer));
        }

        assert_eq!(seen, records);
        assert!(buffer.pending().is_empty());
    }

    #[test]
    fn test_json_every_split_point() {
        let records = json_records();
        let wire: String = records.iter().map(|r| format!("{}  ", r)).collect();
        let bytes = wire.as_bytes();

        for split in 0..=bytes.len() {
            let mut buffer = FrameBuffer::new(Framing::Json);
            buffer.process(&bytes[..split]);
            let mut seen = drain(&mut buffer);
            buffer.process(&bytes[split..]);
            seen.extend(drain(&mut buffer));
            assert_eq!(seen, records, "split at byte {}", split);
        }
    }

    #[test]
    fn test_json_record_not_emitted_before_boundary() {
        let mut buffer = FrameBuffer::new(Framing::Json);
        buffer.process(br#"{"id":"a","body":"x"}"#);
        assert!(drain(&mut buffer).is_empty());

        // Half of the terminator is still not a boundary.
        buffer.process(b"\r");
        assert!(drain(&mut buffer).is_empty());

        buffer.process(b"\n");
        assert_eq!(drain(&mut buffer), vec![r#"{"id":"a","body":"x"}"#.to_string()]);
    }

    #[test]
    fn test_json_keep_alive_newlines_are_absorbed() {
        let mut buffer = FrameBuffer::new(Framing::Json);
        buffer.process(b"\r\n");
        assert!(drain(&mut buffer).is_empty());
        buffer.process(b"\r\n");
        assert!(drain(&mut buffer).is_empty());

        buffer.process(b"{\"id\":\"b\"}\r\n");
        assert_eq!(drain(&mut buffer), vec!["{\"id\":\"b\"}".to_string()]);
    }

    #[test]
    fn test_json_truncated_record_is_held() {
        let mut buffer = FrameBuffer::new(Framing::Json);
        buffer.process(b"{\"id\":\"c\"}\r\n{\"id\":\"d\",\"bo");

        assert_eq!(drain(&mut buffer), vec!["{\"id\":\"c\"}".to_string()]);
        assert_eq!(buffer.pending(), b"{\"id\":\"d\",\"bo");
    }

    #[test]
    fn test_json_brace_and_spaces_inside_string_do_not_end_record() {
        let wire = b"{\"id\":\"1\",\"body\":\"set {x}  done\"}\r\n{\"id\":\"2\"}\r\n{\"id\":\"3\"}\r\n";
        let expected = vec![
            r#"{"id":"1","body":"set {x}  done"}"#.to_string(),
            r#"{"id":"2"}"#.to_string(),
            r#"{"id":"3"}"#.to_string(),
        ];

        for split in 0..=wire.len() {
            let mut buffer = FrameBuffer::new(Framing::Json);
            buffer.process(&wire[..split]);
            let mut seen = drain(&mut buffer);
            buffer.process(&wire[split..]);
            seen.extend(drain(&mut buffer));
            assert_eq!(seen, expected, "split at byte {}", split);
            assert!(buffer.pending().is_empty());
        }

        let mut buffer = FrameBuffer::new(Framing::Json);
        buffer.process(wire);
        assert_eq!(drain(&mut buffer).len(), 3);
        buffer.process(b"{\"id\":\"4\"}\r\n");
        assert_eq!(drain(&mut buffer), vec![r#"{"id":"4"}"#.to_string()]);
    }

    #[test]
    fn test_json_escaped_quotes_inside_string() {
        let mut buffer = FrameBuffer::new(Framing::Json);
        buffer.process(b"{\"body\":\"say \\\"}\\\"  ok\\\\\"}\r\n");
        assert_eq!(drain(&mut buffer), vec![r#"{"body":"say \"}\"  ok\\"}"#.to_string()]);
        assert!(buffer.pending().is_empty());
    }

    #[test]
    fn test_json_unframeable_lines_are_skipped() {
        let mut buffer = FrameBuffer::new(Framing::Json);
        buffer.process(b"garbage head\r\n{\"id\":\"1\"}\r\n{\"id\":\"2\"} trailing\r\n{\"id\":\"3\"\r\n{\"id\":\"4\"}\r\n");

        assert_eq!(
            drain(&mut buffer),
            vec![r#"{"id":"1"}"#.to_string(), r#"{"id":"4"}"#.to_string()]
        );
        assert!(buffer.pending().is_empty());
        assert_eq!(buffer.next_sequence(), 2);
    }

    #[test]
    fn test_json_garbage_without_line_break_is_held() {
        let mut buffer = FrameBuffer::new(Framing::Json);
        buffer.process(b"partial garb");
        assert!(drain(&mut buffer).is_empty());
        assert_eq!(buffer.pending(), b"partial garb");

        buffer.process(b"age\n{\"id\":\"5\"}\r\n");
        assert_eq!(drain(&mut buffer), vec![r#"{"id":"5"}"#.to_string()]);
    }

    #[test]
    fn test_iterator_is_lazy_and_restartable() {
        let mut buffer = FrameBuffer::new(Framing::Json);
        buffer.process(b"{\"n\":1}\r\n{\"n\":2}\r\n");

        let first = buffer.complete_entries().next().unwrap();
        assert_eq!(first.as_bytes(), b"{\"n\":1}");
        assert_eq!(first.sequence(), 0);

        let rest: Vec<RawRecord> = buffer.complete_entries().collect();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].as_bytes(), b"{\"n\":2}");
        assert_eq!(rest[0].sequence(), 1);
    }

    #[test]
    fn test_sequence_continues_across_buffers() {
        let mut buffer = FrameBuffer::starting_at(Framing::Json, 41);
        buffer.process(b"{\"n\":1}\r\n");
        let record = buffer.complete_entries().next().unwrap();
        assert_eq!(record.sequence(), 41);
        assert_eq!(buffer.next_sequence(), 42);
    }

    #[test]
    fn test_xml_multiline_entries_after_prolog() {
        let wire = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<feed xmlns=\"http://www.w3.org/2005/Atom\">\n\
            <entry>\n  <id>tag:a,2012:1</id>\n</entry>\n\
            <entry xmlns:gnip=\"http://www.gnip.com/schemas/2010\">\n  <id>tag:a,2012:2</id>\n</entry>";

        let mut buffer = FrameBuffer::new(Framing::Xml);
        buffer.process(wire.as_bytes());

        let records = drain(&mut buffer);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0], "<entry>\n  <id>tag:a,2012:1</id>\n</entry>");
        assert!(records[1].starts_with("<entry xmlns:gnip="));
        assert!(records[1].ends_with("</entry>"));
        assert!(buffer.pending().is_empty());
    }

    #[test]
    fn test_xml_split_entry_waits_for_closing_tag() {
        let wire = b"<entry><id>1</id></entry><entry><id>2</id></entry>";

        for split in 0..=wire.len() {
            let mut buffer = FrameBuffer::new(Framing::Xml);
            buffer.process(&wire[..split]);
            let mut seen = drain(&mut buffer);
            buffer.process(&wire[split..]);
            seen.extend(drain(&mut buffer));
            assert_eq!(
                seen,
                vec!["<entry><id>1</id></entry>".to_string(), "<entry><id>2</id></entry>".to_string()],
                "split at byte {}",
                split
            );
        }
    }

    #[test]
    fn test_xml_does_not_match_similar_tag_names() {
        let mut buffer = FrameBuffer::new(Framing::Xml);
        buffer.process(b"<entryList></entry>");
        assert!(drain(&mut buffer).is_empty());
    }
}
