//! Newline-delimited record framing.
//!
//! `FrameReader` turns an unbounded byte stream into complete text records.
//! It knows nothing about the transport or the record schema:
//! - Bytes are buffered until a `\n` terminator arrives
//! - The record is yielded without its terminator (a trailing `\r` is also dropped)
//! - An empty line yields an empty record; validation is the decoder's job
//! - An unterminated tail at end-of-stream is discarded
//!
//! - A record longer than the configured limit is dropped whole, and the
//!   reader resynchronizes on the next terminator
//!
//! A reader is bound to one stream. Build a new one per connection.

use std::io::{self, ErrorKind, Read};

use crate::detect::pipeline::MAX_PAYLOAD_BYTES;

const READ_CHUNK_BYTES: usize = 4096;

/// Longest record accepted by default: a maximal base64 frame plus room for
/// the sensor fields around it.
pub const MAX_RECORD_BYTES: usize = MAX_PAYLOAD_BYTES / 3 * 4 + 64 * 1024;

/// Splits a byte stream into newline-terminated text records.
pub struct FrameReader<R> {
    inner: R,
    buf: Vec<u8>,
    /// Start of the not-yet-scanned region of `buf`.
    scanned: usize,
    chunk: Box<[u8]>,
    max_record_bytes: usize,
    /// Skipping input up to the next terminator after an oversized record.
    discarding: bool,
    finished: bool,
}

impl<R: Read> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self::with_max_record_bytes(inner, MAX_RECORD_BYTES)
    }

    pub fn with_max_record_bytes(inner: R, max_record_bytes: usize) -> Self {
        Self {
            inner,
            buf: Vec::new(),
            scanned: 0,
            chunk: vec![0u8; READ_CHUNK_BYTES].into_boxed_slice(),
            max_record_bytes: max_record_bytes.max(1),
            discarding: false,
            finished: false,
        }
    }

    /// Bytes held for a record whose terminator has not arrived yet.
    ///
    /// Never exceeds the record limit by more than one read.
    pub fn pending_bytes(&self) -> usize {
        self.buf.len()
    }

    /// Read the next complete record.
    ///
    /// Returns `Ok(None)` at end-of-stream. Blocks for as long as the
    /// underlying `read` blocks.
    pub fn next_record(&mut self) -> io::Result<Option<String>> {
        if self.finished {
            return Ok(None);
        }
        loop {
            if let Some(pos) = self.buf[self.scanned..].iter().position(|b| *b == b'\n') {
                let end = self.scanned + pos;
                self.scanned = 0;
                if self.discarding || end > self.max_record_bytes {
                    if self.discarding {
                        log::debug!("resynchronized on record terminator");
                    } else {
                        self.log_oversized(end);
                    }
                    self.buf.drain(..=end);
                    self.discarding = false;
                    continue;
                }
                return Ok(Some(take_record(&mut self.buf, end)));
            }
            if self.discarding || self.buf.len() > self.max_record_bytes {
                if !self.discarding {
                    self.log_oversized(self.buf.len());
                    self.discarding = true;
                }
                self.buf.clear();
            }
            self.scanned = self.buf.len();

            match self.inner.read(&mut self.chunk) {
                Ok(0) => {
                    self.finished = true;
                    if !self.buf.is_empty() {
                        log::debug!(
                            "discarding {} bytes of unterminated record at end of stream",
                            self.buf.len()
                        );
                        self.buf.clear();
                        self.scanned = 0;
                    }
                    return Ok(None);
                }
                Ok(n) => self.buf.extend_from_slice(&self.chunk[..n]),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.finished = true;
                    return Err(e);
                }
            }
        }
    }

    fn log_oversized(&self, seen: usize) {
        log::warn!(
            "dropping record over {} bytes ({} buffered without terminator)",
            self.max_record_bytes,
            seen
        );
    }
}

impl<R: Read> Iterator for FrameReader<R> {
    type Item = io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}

/// Split the record ending at `end` (the terminator index) off the front of `buf`.
fn take_record(buf: &mut Vec<u8>, end: usize) -> String {
    let mut line: Vec<u8> = buf.drain(..=end).collect();
    line.pop();
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    match String::from_utf8(line) {
        Ok(text) => text,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Cursor;

    /// Hands out the input in fixed-size pieces so record boundaries land mid-chunk.
    struct Chunked {
        data: Vec<u8>,
        pos: usize,
        sizes: Vec<usize>,
        turn: usize,
    }

    impl Read for Chunked {
        fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
            if self.pos >= self.data.len() {
                return Ok(0);
            }
            let want = self.sizes[self.turn % self.sizes.len()].max(1);
            self.turn += 1;
            let n = want.min(out.len()).min(self.data.len() - self.pos);
            out[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    struct Broken;

    impl Read for Broken {
        fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(ErrorKind::ConnectionReset, "link dropped"))
        }
    }

    fn collect<R: Read>(reader: R) -> Vec<String> {
        FrameReader::new(reader)
            .collect::<io::Result<Vec<_>>>()
            .expect("read records")
    }

    fn split_directly(data: &[u8]) -> Vec<String> {
        let mut records: Vec<String> = Vec::new();
        let mut rest = data;
        while let Some(pos) = rest.iter().position(|b| *b == b'\n') {
            let mut line = &rest[..pos];
            if line.last() == Some(&b'\r') {
                line = &line[..line.len() - 1];
            }
            records.push(String::from_utf8_lossy(line).into_owned());
            rest = &rest[pos + 1..];
        }
        records
    }

    #[test]
    fn yields_each_terminated_line() {
        let records = collect(Cursor::new(b"{\"bpm\":72}\n{\"bpm\":73}\n".to_vec()));
        assert_eq!(records, vec!["{\"bpm\":72}", "{\"bpm\":73}"]);
    }

    #[test]
    fn empty_line_is_passed_through() {
        let records = collect(Cursor::new(b"a\n\nb\n".to_vec()));
        assert_eq!(records, vec!["a", "", "b"]);
    }

    #[test]
    fn unterminated_tail_is_discarded() {
        let records = collect(Cursor::new(b"done\npartial".to_vec()));
        assert_eq!(records, vec!["done"]);
    }

    #[test]
    fn empty_stream_ends_cleanly() {
        let mut reader = FrameReader::new(Cursor::new(Vec::new()));
        assert!(reader.next_record().unwrap().is_none());
        assert!(reader.next_record().unwrap().is_none());
    }

    #[test]
    fn strips_carriage_return_before_terminator() {
        let records = collect(Cursor::new(b"one\r\ntwo\n".to_vec()));
        assert_eq!(records, vec!["one", "two"]);
    }

    #[test]
    fn record_split_across_reads_is_reassembled() {
        let reader = Chunked {
            data: b"{\"dist_cm\": 45.0}\n".to_vec(),
            pos: 0,
            sizes: vec![3],
            turn: 0,
        };
        assert_eq!(collect(reader), vec!["{\"dist_cm\": 45.0}"]);
    }

    #[test]
    fn read_error_is_surfaced_and_ends_sequence() {
        let mut reader = FrameReader::new(Broken);
        let err = reader.next().unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConnectionReset);
        assert!(reader.next().is_none());
    }

    #[test]
    fn oversized_record_is_dropped_and_next_record_survives() {
        let mut data = b"{\"bpm\":1}\n".to_vec();
        data.extend(std::iter::repeat(b'x').take(100));
        data.extend_from_slice(b"\n{\"bpm\":2}\n");

        // Arriving in small reads the oversized record never sees its terminator
        // before the limit trips.
        let chunked = Chunked {
            data: data.clone(),
            pos: 0,
            sizes: vec![7],
            turn: 0,
        };
        let records = FrameReader::with_max_record_bytes(chunked, 16)
            .collect::<io::Result<Vec<_>>>()
            .unwrap();
        assert_eq!(records, vec!["{\"bpm\":1}", "{\"bpm\":2}"]);

        // Arriving in one read it does.
        let records = FrameReader::with_max_record_bytes(Cursor::new(data), 16)
            .collect::<io::Result<Vec<_>>>()
            .unwrap();
        assert_eq!(records, vec!["{\"bpm\":1}", "{\"bpm\":2}"]);
    }

    #[test]
    fn unterminated_flood_stays_bounded() {
        let flood = io::repeat(b'x').take(64 * 1024).chain(Broken);
        let mut reader = FrameReader::with_max_record_bytes(flood, 64);
        let err = reader.next_record().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConnectionReset);
        assert!(reader.pending_bytes() <= 64 + READ_CHUNK_BYTES);
    }

    #[test]
    fn record_at_limit_is_kept() {
        let input = Cursor::new(b"abcd\nabcde\nok\n".to_vec());
        let records = FrameReader::with_max_record_bytes(input, 4)
            .collect::<io::Result<Vec<_>>>()
            .unwrap();
        assert_eq!(records, vec!["abcd", "ok"]);
    }

    #[test]
    fn default_limit_admits_a_maximal_frame() {
        assert!(MAX_RECORD_BYTES > MAX_PAYLOAD_BYTES / 3 * 4);
        assert_eq!(FrameReader::new(io::empty()).max_record_bytes, MAX_RECORD_BYTES);
    }

    proptest! {
        #[test]
        fn chunking_does_not_change_records(
            data in proptest::collection::vec(
                prop_oneof![Just(b'\n'), Just(b'\r'), Just(b'{'), Just(b'a'), Just(b'7')],
                0..256,
            ),
            sizes in proptest::collection::vec(1usize..17, 1..8),
        ) {
            let chunked = Chunked { data: data.clone(), pos: 0, sizes, turn: 0 };
            prop_assert_eq!(collect(chunked), split_directly(&data));
        }
    }
}
