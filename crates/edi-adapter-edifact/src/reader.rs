//! Buffered segment reader.
//!
//! Slices a character stream into segments and lets callers look at the
//! start of the next segment without consuming it.
//!
//! Byte input is decoded lazily, one byte at a time, so only characters
//! that have actually been looked at are bound to an encoding. Everything
//! after them is still raw and is decoded with whatever encoding is active
//! when it is reached. [`SegmentReader::change_encoding`] refuses to switch
//! while a peeked, not yet consumed character depends on the active
//! encoding.

use edi_ir::SegmentPosition;
use edi_schema::Delimiters;
use encoding_rs::{Decoder, DecoderResult, Encoding};
use std::collections::VecDeque;
use std::io::{ErrorKind, Read};
use tracing::{debug, trace};

use crate::{Error, Result};

const CHUNK_SIZE: usize = 8 * 1024;

/// Longest segment code the reader reports from a peek
pub const SEGMENT_CODE_LENGTH: usize = 3;

enum SourceError {
    Io(std::io::Error),
    Decode(String),
}

/// Raw bytes plus an incremental decoder
struct ByteSource<'a> {
    input: Box<dyn Read + 'a>,
    buffer: Vec<u8>,
    /// Next byte to decode
    pos: usize,
    /// First byte of a character the decoder has started but not finished
    pending_from: Option<usize>,
    eof: bool,
    encoding: &'static Encoding,
    decoder: Decoder,
    /// Characters produced by the decoder but not handed out yet
    decoded: VecDeque<char>,
}

impl<'a> ByteSource<'a> {
    fn new(input: Box<dyn Read + 'a>, encoding: &'static Encoding) -> Self {
        Self {
            input,
            buffer: Vec::new(),
            pos: 0,
            pending_from: None,
            eof: false,
            encoding,
            decoder: encoding.new_decoder_without_bom_handling(),
            decoded: VecDeque::new(),
        }
    }

    fn next_char(&mut self) -> std::result::Result<Option<char>, SourceError> {
        loop {
            if let Some(c) = self.decoded.pop_front() {
                return Ok(Some(c));
            }

            if self.pos >= self.buffer.len() && !self.fill()? {
                if self.pending_from.is_some() {
                    return Err(SourceError::Decode(format!(
                        "stream ends inside a {} character",
                        self.encoding.name()
                    )));
                }
                return Ok(None);
            }

            let byte = self.buffer[self.pos];
            if self.pending_from.is_none() && byte.is_ascii() && self.encoding.is_ascii_compatible() {
                self.pos += 1;
                return Ok(Some(char::from(byte)));
            }
            self.decode_byte()?;
        }
    }

    fn decode_byte(&mut self) -> std::result::Result<(), SourceError> {
        let mut out = [0u8; 32];
        let (result, read, written) = self.decoder.decode_to_utf8_without_replacement(
            &self.buffer[self.pos..=self.pos],
            &mut out,
            false,
        );

        if let DecoderResult::Malformed(..) = result {
            return Err(SourceError::Decode(format!(
                "byte 0x{:02X} is not valid {}",
                self.buffer[self.pos],
                self.encoding.name()
            )));
        }

        if self.pending_from.is_none() {
            self.pending_from = Some(self.pos);
        }
        self.pos += read.max(1);

        if written > 0 {
            let text = std::str::from_utf8(&out[..written])
                .map_err(|e| SourceError::Decode(e.to_string()))?;
            self.decoded.extend(text.chars());
            self.pending_from = None;
        }
        Ok(())
    }

    /// Read another chunk, keeping bytes of an unfinished character.
    fn fill(&mut self) -> std::result::Result<bool, SourceError> {
        if self.eof {
            return Ok(false);
        }

        let keep_from = self.pending_from.unwrap_or(self.pos);
        self.buffer.drain(..keep_from);
        self.pos -= keep_from;
        if let Some(pending) = self.pending_from.as_mut() {
            *pending -= keep_from;
        }

        let mut chunk = [0u8; CHUNK_SIZE];
        loop {
            match self.input.read(&mut chunk) {
                Ok(0) => {
                    self.eof = true;
                    return Ok(false);
                }
                Ok(n) => {
                    self.buffer.extend_from_slice(&chunk[..n]);
                    return Ok(true);
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(SourceError::Io(e)),
            }
        }
    }

    fn change_encoding(&mut self, encoding: &'static Encoding) -> std::result::Result<(), SourceError> {
        if encoding == self.encoding {
            return Ok(());
        }
        if !self.decoded.is_empty() {
            return Err(SourceError::Decode(format!(
                "cannot switch to {}: characters were already decoded as {}",
                encoding.name(),
                self.encoding.name()
            )));
        }

        if let Some(from) = self.pending_from.take() {
            self.pos = from;
        }
        debug!(
            "Switching read encoding from {} to {}",
            self.encoding.name(),
            encoding.name()
        );
        self.encoding = encoding;
        self.decoder = encoding.new_decoder_without_bom_handling();
        Ok(())
    }
}

enum Source<'a> {
    Bytes(ByteSource<'a>),
    Text(std::str::Chars<'a>),
}

/// Reads segments from a byte stream or a string.
pub struct SegmentReader<'a> {
    source: Source<'a>,
    lookahead: VecDeque<char>,
    delimiters: Delimiters,
    ignore_newlines: bool,
    segment: String,
    fields: Vec<String>,
    segment_number: usize,
}

impl<'a> SegmentReader<'a> {
    /// Reader over raw bytes, initially decoded as `encoding`.
    pub fn from_reader(
        input: impl Read + 'a,
        encoding: &'static Encoding,
        delimiters: Delimiters,
    ) -> Self {
        Self::new(
            Source::Bytes(ByteSource::new(Box::new(input), encoding)),
            delimiters,
        )
    }

    /// Reader over already decoded text. Encoding changes are ignored.
    pub fn from_text(text: &'a str, delimiters: Delimiters) -> Self {
        Self::new(Source::Text(text.chars()), delimiters)
    }

    fn new(source: Source<'a>, delimiters: Delimiters) -> Self {
        Self {
            source,
            lookahead: VecDeque::new(),
            delimiters,
            ignore_newlines: false,
            segment: String::new(),
            fields: Vec::new(),
            segment_number: 0,
        }
    }

    /// Drop carriage returns and line feeds that are not the terminator.
    #[must_use]
    pub fn with_ignore_newlines(mut self, ignore_newlines: bool) -> Self {
        self.ignore_newlines = ignore_newlines;
        self
    }

    pub fn delimiters(&self) -> &Delimiters {
        &self.delimiters
    }

    pub fn set_delimiters(&mut self, delimiters: Delimiters) {
        trace!("Active delimiters now {:?}", delimiters);
        self.delimiters = delimiters;
    }

    /// Current encoding; `None` for text input.
    pub fn encoding(&self) -> Option<&'static Encoding> {
        match &self.source {
            Source::Bytes(bytes) => Some(bytes.encoding),
            Source::Text(_) => None,
        }
    }

    /// Decode every byte not yet read as `encoding`.
    ///
    /// # Errors
    ///
    /// Fails when peeked characters depended on the current encoding, since
    /// they cannot be decoded again.
    pub fn change_encoding(&mut self, encoding: &'static Encoding) -> Result<()> {
        if let Source::Bytes(bytes) = &self.source {
            if bytes.encoding != encoding && self.lookahead.iter().any(|c| !c.is_ascii()) {
                return Err(Error::encoding(
                    format!(
                        "cannot switch to {}: the next segment was already decoded as {}",
                        encoding.name(),
                        bytes.encoding.name()
                    ),
                    SegmentPosition::new(self.segment_number, Vec::new()),
                ));
            }
        }
        match &mut self.source {
            Source::Bytes(bytes) => bytes
                .change_encoding(encoding)
                .map_err(|e| source_error(e, self.segment_number)),
            Source::Text(_) => {
                debug!(
                    "Ignoring switch to {}: input is already decoded",
                    encoding.name()
                );
                Ok(())
            }
        }
    }

    fn next_source_char(&mut self) -> Result<Option<char>> {
        loop {
            let next = match &mut self.source {
                Source::Bytes(bytes) => bytes
                    .next_char()
                    .map_err(|e| source_error(e, self.segment_number))?,
                Source::Text(chars) => chars.next(),
            };
            match next {
                Some('\r' | '\n')
                    if self.ignore_newlines && next != Some(self.delimiters.segment) => {}
                other => return Ok(other),
            }
        }
    }

    fn next_char(&mut self) -> Result<Option<char>> {
        match self.lookahead.pop_front() {
            Some(c) => Ok(Some(c)),
            None => self.next_source_char(),
        }
    }

    /// Make sure `count` characters are buffered; false at end of stream.
    fn fill_lookahead(&mut self, count: usize) -> Result<bool> {
        while self.lookahead.len() < count {
            match self.next_source_char()? {
                Some(c) => self.lookahead.push_back(c),
                None => return Ok(false),
            }
        }
        Ok(true)
    }

    fn skip_whitespace(&mut self) -> Result<()> {
        while self.fill_lookahead(1)? {
            let c = self.lookahead[0];
            let skippable = c.is_whitespace()
                && (c == self.delimiters.segment || !self.delimiters.is_delimiter(c));
            if !skippable {
                break;
            }
            self.lookahead.pop_front();
        }
        Ok(())
    }

    /// The code of the next segment, or `None` at end of stream.
    ///
    /// # Errors
    ///
    /// Fails on read or decode errors.
    pub fn peek_code(&mut self) -> Result<Option<String>> {
        self.skip_whitespace()?;
        let mut code = String::new();
        let mut index = 0;
        while index < SEGMENT_CODE_LENGTH && self.fill_lookahead(index + 1)? {
            let c = self.lookahead[index];
            if c == self.delimiters.field
                || c == self.delimiters.segment
                || c == self.delimiters.component
            {
                break;
            }
            code.push(c);
            index += 1;
        }
        Ok((!code.is_empty()).then_some(code))
    }

    /// True when another segment follows.
    ///
    /// # Errors
    ///
    /// Fails on read or decode errors.
    pub fn has_next_segment(&mut self) -> Result<bool> {
        Ok(self.peek_code()?.is_some())
    }

    /// The first `count` raw fields of the next segment, not consumed.
    ///
    /// Reads no further than the `count`-th field separator, so bytes after
    /// it are still undecoded.
    ///
    /// # Errors
    ///
    /// Fails on read or decode errors.
    pub fn peek_fields(&mut self, count: usize) -> Result<Vec<String>> {
        self.skip_whitespace()?;
        let mut index = 0;
        let mut separators = 0;
        let mut escaped = false;
        let mut end = None;
        while separators < count && self.fill_lookahead(index + 1)? {
            let c = self.lookahead[index];
            index += 1;
            if escaped {
                escaped = false;
            } else if Some(c) == self.delimiters.escape {
                escaped = true;
            } else if c == self.delimiters.segment {
                end = Some(index - 1);
                break;
            } else if c == self.delimiters.field {
                separators += 1;
            }
        }

        let text: String = self.lookahead.iter().take(end.unwrap_or(index)).collect();
        Ok(self
            .delimiters
            .split_fields(&text)
            .into_iter()
            .take(count)
            .map(str::to_string)
            .collect())
    }

    /// Consume exactly `count` characters, bypassing segment splitting.
    ///
    /// # Errors
    ///
    /// Fails when the stream ends first.
    pub fn read_raw(&mut self, count: usize) -> Result<String> {
        self.skip_whitespace()?;
        let mut raw = String::with_capacity(count);
        for _ in 0..count {
            match self.next_char()? {
                Some(c) => raw.push(c),
                None => {
                    return Err(Error::structural(
                        crate::StructuralError::MalformedSegment(format!(
                            "stream ends after {raw:?}, expected {count} characters"
                        )),
                        self.position(),
                    ));
                }
            }
        }
        Ok(raw)
    }

    /// Advance to the next segment.
    ///
    /// Returns false only at the end of the stream. The segment text keeps
    /// its escape characters; a final segment without terminator is
    /// accepted.
    ///
    /// # Errors
    ///
    /// Fails on read or decode errors.
    pub fn move_to_next_segment(&mut self) -> Result<bool> {
        self.skip_whitespace()?;
        self.segment.clear();
        self.fields.clear();

        let mut escaped = false;
        let mut terminated = false;
        let mut read_any = false;
        while let Some(c) = self.next_char()? {
            read_any = true;
            if escaped {
                self.segment.push(c);
                escaped = false;
            } else if Some(c) == self.delimiters.escape {
                self.segment.push(c);
                escaped = true;
            } else if c == self.delimiters.segment {
                terminated = true;
                break;
            } else {
                self.segment.push(c);
            }
        }

        if !read_any {
            return Ok(false);
        }
        if !terminated {
            debug!("Last segment has no terminator: {:?}", self.segment);
        }
        if self.delimiters.segment == '\n' && self.segment.ends_with('\r') {
            self.segment.pop();
        }

        self.fields = self
            .delimiters
            .split_fields(&self.segment)
            .into_iter()
            .map(str::to_string)
            .collect();
        self.segment_number += 1;
        trace!("Segment {}: {}", self.segment_number, self.segment);
        Ok(true)
    }

    /// Raw text of the current segment, escapes included
    pub fn segment(&self) -> &str {
        &self.segment
    }

    /// Raw fields of the current segment; index 0 is the code
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Code of the current segment
    pub fn segment_code(&self) -> &str {
        self.fields.first().map_or("", String::as_str)
    }

    /// 1-based ordinal of the current segment; 0 before the first
    pub fn segment_number(&self) -> usize {
        self.segment_number
    }

    /// Position of the current segment for diagnostics
    pub fn position(&self) -> SegmentPosition {
        SegmentPosition::new(self.segment_number, self.fields.clone())
    }
}

fn source_error(error: SourceError, segment_number: usize) -> Error {
    match error {
        SourceError::Io(e) => Error::Io(e),
        SourceError::Decode(message) => {
            Error::encoding(message, SegmentPosition::new(segment_number, Vec::new()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn text(input: &str) -> SegmentReader<'_> {
        SegmentReader::from_text(input, Delimiters::unedifact())
    }

    #[test]
    fn test_reads_segments_in_order() {
        let mut reader = text("UNH+1+ORDERS:D:96A:UN'BGM+220+PO1'UNT+3+1'");
        assert!(reader.move_to_next_segment().unwrap());
        assert_eq!(reader.segment_code(), "UNH");
        assert_eq!(reader.fields(), ["UNH", "1", "ORDERS:D:96A:UN"]);
        assert_eq!(reader.segment_number(), 1);

        assert!(reader.move_to_next_segment().unwrap());
        assert_eq!(reader.segment(), "BGM+220+PO1");
        assert!(reader.move_to_next_segment().unwrap());
        assert_eq!(reader.segment_number(), 3);
        assert!(!reader.move_to_next_segment().unwrap());
    }

    #[test]
    fn test_escaped_terminator_stays_in_segment() {
        let mut reader = text("FTX+AAA+++it?'s?+fine'CNT+2'");
        reader.move_to_next_segment().unwrap();
        assert_eq!(reader.segment(), "FTX+AAA+++it?'s?+fine");
        assert_eq!(reader.fields().len(), 5);
        assert_eq!(reader.fields()[4], "it?'s?+fine");
        assert_eq!(reader.peek_code().unwrap().as_deref(), Some("CNT"));
    }

    #[test]
    fn test_peek_does_not_consume() {
        let mut reader = text("\r\n  BGM+220'DTM+137:20240101:102'");
        assert_eq!(reader.peek_code().unwrap().as_deref(), Some("BGM"));
        assert!(reader.has_next_segment().unwrap());
        reader.move_to_next_segment().unwrap();
        assert_eq!(reader.segment_code(), "BGM");
        assert_eq!(reader.peek_code().unwrap().as_deref(), Some("DTM"));
    }

    #[test]
    fn test_peek_code_at_end_of_stream() {
        let mut reader = text("BGM+220'\n");
        reader.move_to_next_segment().unwrap();
        assert_eq!(reader.peek_code().unwrap(), None);
        assert!(!reader.has_next_segment().unwrap());
    }

    #[test]
    fn test_peek_fields_stops_at_count() {
        let mut reader = text("UNB+UNOC:3+SENDER+RECEIVER'");
        assert_eq!(reader.peek_fields(2).unwrap(), ["UNB", "UNOC:3"]);
        assert_eq!(reader.peek_fields(9).unwrap(), ["UNB", "UNOC:3", "SENDER", "RECEIVER"]);
        reader.move_to_next_segment().unwrap();
        assert_eq!(reader.fields().len(), 4);
    }

    #[test]
    fn test_newline_terminator_strips_carriage_return() {
        let delimiters = Delimiters {
            segment: '\n',
            ..Delimiters::unedifact()
        };
        let mut reader = SegmentReader::from_text("BGM+220\r\nCNT+1\r\n", delimiters);
        reader.move_to_next_segment().unwrap();
        assert_eq!(reader.segment(), "BGM+220");
        reader.move_to_next_segment().unwrap();
        assert_eq!(reader.segment(), "CNT+1");
        assert!(!reader.move_to_next_segment().unwrap());
    }

    #[test]
    fn test_ignore_newlines_inside_segment() {
        let mut reader = text("FTX+AAA+++line\r\n one'").with_ignore_newlines(true);
        reader.move_to_next_segment().unwrap();
        assert_eq!(reader.segment(), "FTX+AAA+++line one");
    }

    #[test]
    fn test_unterminated_last_segment() {
        let mut reader = text("UNZ+1+REF");
        assert!(reader.move_to_next_segment().unwrap());
        assert_eq!(reader.fields(), ["UNZ", "1", "REF"]);
        assert!(!reader.move_to_next_segment().unwrap());
    }

    #[test]
    fn test_read_raw_service_string_advice() {
        let mut reader = text("UNA:+.? 'UNB+UNOA:4'");
        assert_eq!(reader.peek_code().unwrap().as_deref(), Some("UNA"));
        assert_eq!(reader.read_raw(9).unwrap(), "UNA:+.? '");
        assert_eq!(reader.segment_number(), 0);
        assert_eq!(reader.peek_code().unwrap().as_deref(), Some("UNB"));

        let mut short = text("UNA:+");
        assert!(matches!(
            short.read_raw(9),
            Err(Error::Structural { .. })
        ));
    }

    #[test]
    fn test_decodes_bytes_with_initial_encoding() {
        let bytes = "FTX+AAA+++Grüße'".as_bytes().to_vec();
        let mut reader =
            SegmentReader::from_reader(Cursor::new(bytes), encoding_rs::UTF_8, Delimiters::unedifact());
        reader.move_to_next_segment().unwrap();
        assert_eq!(reader.fields()[4], "Grüße");
    }

    #[test]
    fn test_switch_encoding_after_ascii_prefix() {
        let mut bytes = b"UNB+UNOC:3+S+R'FTX+AAA+++caf".to_vec();
        bytes.push(0xE9);
        bytes.extend_from_slice(b"'");

        let mut reader =
            SegmentReader::from_reader(Cursor::new(bytes), encoding_rs::UTF_8, Delimiters::unedifact());
        assert_eq!(reader.peek_fields(2).unwrap()[1], "UNOC:3");
        reader.change_encoding(encoding_rs::WINDOWS_1252).unwrap();
        reader.move_to_next_segment().unwrap();
        reader.move_to_next_segment().unwrap();
        assert_eq!(reader.fields()[4], "café");
        assert_eq!(reader.encoding(), Some(encoding_rs::WINDOWS_1252));
    }

    #[test]
    fn test_switch_refused_after_non_ascii_peek() {
        let bytes = "UNB+UNOé:3+S+R'".as_bytes().to_vec();
        let mut reader =
            SegmentReader::from_reader(Cursor::new(bytes), encoding_rs::UTF_8, Delimiters::unedifact());
        reader.peek_fields(2).unwrap();
        let err = reader.change_encoding(encoding_rs::WINDOWS_1252).unwrap_err();
        assert!(matches!(err, Error::Encoding { .. }));

        // Same encoding is always fine.
        reader.change_encoding(encoding_rs::UTF_8).unwrap();
    }

    #[test]
    fn test_switch_allowed_after_consumed_segments() {
        let mut bytes = "FTX+é'".as_bytes().to_vec();
        bytes.extend_from_slice(b"FTX+caf");
        bytes.push(0xE9);
        bytes.extend_from_slice(b"'");
        let mut reader =
            SegmentReader::from_reader(Cursor::new(bytes), encoding_rs::UTF_8, Delimiters::unedifact());
        reader.move_to_next_segment().unwrap();
        assert_eq!(reader.fields()[1], "é");

        reader.change_encoding(encoding_rs::WINDOWS_1252).unwrap();
        reader.move_to_next_segment().unwrap();
        assert_eq!(reader.fields()[1], "café");
    }

    #[test]
    fn test_invalid_bytes_are_encoding_errors() {
        let bytes = vec![b'F', b'T', b'X', b'+', 0xFF, b'\''];
        let mut reader =
            SegmentReader::from_reader(Cursor::new(bytes), encoding_rs::UTF_8, Delimiters::unedifact());
        assert!(matches!(
            reader.move_to_next_segment(),
            Err(Error::Encoding { .. })
        ));
    }

    #[test]
    fn test_truncated_multibyte_character() {
        let bytes = vec![b'F', b'T', b'X', b'+', 0xC3];
        let mut reader =
            SegmentReader::from_reader(Cursor::new(bytes), encoding_rs::UTF_8, Delimiters::unedifact());
        assert!(matches!(
            reader.move_to_next_segment(),
            Err(Error::Encoding { .. })
        ));
    }

    #[test]
    fn test_text_source_ignores_encoding_change() {
        let mut reader = text("BGM+220'");
        reader.change_encoding(encoding_rs::WINDOWS_1252).unwrap();
        assert_eq!(reader.encoding(), None);
    }

    #[test]
    fn test_position_carries_tokens() {
        let mut reader = text("BGM+220+PO1'");
        assert_eq!(reader.position().segment_number, 0);
        reader.move_to_next_segment().unwrap();
        let position = reader.position();
        assert_eq!(position.segment_number, 1);
        assert_eq!(position.tokens, ["BGM", "220", "PO1"]);
    }

    #[test]
    fn test_multi_chunk_input() {
        let mut input = String::new();
        for i in 0..2_000 {
            input.push_str(&format!("LIN+{i}'"));
        }
        let mut reader = SegmentReader::from_reader(
            Cursor::new(input.into_bytes()),
            encoding_rs::UTF_8,
            Delimiters::unedifact(),
        );
        let mut count = 0;
        while reader.move_to_next_segment().unwrap() {
            count += 1;
        }
        assert_eq!(count, 2_000);
    }
}
