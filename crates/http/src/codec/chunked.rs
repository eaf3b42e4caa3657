//! `transfer-encoding: chunked` payload framing.
//!
//! See [RFC 9112 section 7.1](https://www.rfc-editor.org/rfc/rfc9112#section-7.1).

use std::io::Write;

use bytes::{Buf, BufMut, BytesMut};
use tracing::trace;

use crate::ensure;
use crate::protocol::{ParseError, PayloadItem, SendError};

/// Longest accepted chunk size line, extensions included.
const MAX_LINE_BYTES: usize = 4 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Size,
    Data(u64),
    DataEnd,
    Trailer,
    Done,
}

/// Incremental decoder for a chunked request body.
///
/// Chunk extensions and trailer fields are read and ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkedDecoder {
    state: State,
}

impl ChunkedDecoder {
    pub fn new() -> Self {
        Self { state: State::Size }
    }

    /// Returns the next payload item, or `None` when `src` holds too little data.
    pub fn decode(&mut self, src: &mut BytesMut) -> Result<Option<PayloadItem>, ParseError> {
        loop {
            match self.state {
                State::Size => {
                    let Some(line) = take_line(src)? else {
                        return Ok(None);
                    };
                    let size = parse_size(&line)?;
                    trace!(size, "read chunk size");
                    self.state = if size == 0 { State::Trailer } else { State::Data(size) };
                }

                State::Data(remaining) => {
                    if src.is_empty() {
                        return Ok(None);
                    }
                    let len = remaining.min(src.len() as u64);
                    let bytes = src.split_to(usize::try_from(len).unwrap_or(usize::MAX)).freeze();
                    let left = remaining - bytes.len() as u64;
                    self.state = if left == 0 { State::DataEnd } else { State::Data(left) };
                    return Ok(Some(PayloadItem::Chunk(bytes)));
                }

                State::DataEnd => {
                    if src.len() < 2 {
                        return Ok(None);
                    }
                    ensure!(&src[..2] == b"\r\n", ParseError::invalid_body("missing CRLF after chunk data"));
                    src.advance(2);
                    self.state = State::Size;
                }

                State::Trailer => {
                    let Some(line) = take_line(src)? else {
                        return Ok(None);
                    };
                    if line.is_empty() {
                        self.state = State::Done;
                    }
                }

                State::Done => return Ok(Some(PayloadItem::Eof)),
            }
        }
    }
}

impl Default for ChunkedDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Splits one CRLF terminated line off `src`, without the terminator.
fn take_line(src: &mut BytesMut) -> Result<Option<BytesMut>, ParseError> {
    match src.windows(2).position(|w| w == b"\r\n") {
        Some(end) => {
            let mut line = src.split_to(end + 2);
            line.truncate(end);
            Ok(Some(line))
        }
        None => {
            ensure!(src.len() <= MAX_LINE_BYTES, ParseError::invalid_body("chunk line too long"));
            Ok(None)
        }
    }
}

fn parse_size(line: &[u8]) -> Result<u64, ParseError> {
    let digits = line.split(|b| *b == b';').next().unwrap_or_default().trim_ascii();
    let digits = std::str::from_utf8(digits).map_err(|_invalid| ParseError::invalid_body("invalid chunk size"))?;
    ensure!(!digits.is_empty(), ParseError::invalid_body("empty chunk size"));
    u64::from_str_radix(digits, 16).map_err(|e| ParseError::invalid_body(format!("invalid chunk size '{digits}': {e}")))
}

/// Chunked encoder for response payloads.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChunkedEncoder {
    finished: bool,
}

impl ChunkedEncoder {
    pub fn encode<D: Buf>(&mut self, item: PayloadItem<D>, dst: &mut BytesMut) -> Result<(), SendError> {
        ensure!(!self.finished, SendError::invalid_frame("chunk after end of chunked body"));

        match item {
            // a zero sized chunk would terminate the body
            PayloadItem::Chunk(bytes) if !bytes.has_remaining() => Ok(()),
            PayloadItem::Chunk(mut bytes) => {
                let size = bytes.remaining();
                dst.reserve(size + 12);
                write!((&mut *dst).writer(), "{size:X}\r\n")?;
                while bytes.has_remaining() {
                    let chunk = bytes.chunk();
                    let len = chunk.len();
                    dst.extend_from_slice(chunk);
                    bytes.advance(len);
                }
                dst.extend_from_slice(b"\r\n");
                Ok(())
            }
            PayloadItem::Eof => {
                self.finished = true;
                dst.extend_from_slice(b"0\r\n\r\n");
                Ok(())
            }
        }
    }

    pub fn is_finish(&self) -> bool {
        self.finished
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn chunk_of(item: Option<PayloadItem>) -> Bytes {
        item.and_then(PayloadItem::into_bytes).unwrap()
    }

    #[test]
    fn decode_single_chunk() {
        let mut buffer = BytesMut::from(&b"10\r\n1234567890abcdef\r\n0\r\n\r\n"[..]);
        let mut decoder = ChunkedDecoder::new();

        assert_eq!(chunk_of(decoder.decode(&mut buffer).unwrap()), Bytes::from_static(b"1234567890abcdef"));
        assert!(decoder.decode(&mut buffer).unwrap().unwrap().is_eof());
        assert!(buffer.is_empty());
    }

    #[test]
    fn decode_multiple_chunks() {
        let mut buffer = BytesMut::from(&b"5\r\nhello\r\n7\r\n, world\r\n0\r\n\r\nGET"[..]);
        let mut decoder = ChunkedDecoder::new();

        assert_eq!(chunk_of(decoder.decode(&mut buffer).unwrap()), Bytes::from_static(b"hello"));
        assert_eq!(chunk_of(decoder.decode(&mut buffer).unwrap()), Bytes::from_static(b", world"));
        assert!(decoder.decode(&mut buffer).unwrap().unwrap().is_eof());
        assert_eq!(&buffer[..], b"GET");
    }

    #[test]
    fn extensions_and_trailers_are_ignored() {
        let mut buffer = BytesMut::from(&b"5;name=value\r\nhello\r\n0\r\nTrailer: x\r\n\r\n"[..]);
        let mut decoder = ChunkedDecoder::new();

        assert_eq!(chunk_of(decoder.decode(&mut buffer).unwrap()), Bytes::from_static(b"hello"));
        assert!(decoder.decode(&mut buffer).unwrap().unwrap().is_eof());
    }

    #[test]
    fn partial_input() {
        let mut buffer = BytesMut::from(&b"5\r\nhel"[..]);
        let mut decoder = ChunkedDecoder::new();

        assert_eq!(chunk_of(decoder.decode(&mut buffer).unwrap()), Bytes::from_static(b"hel"));
        assert!(decoder.decode(&mut buffer).unwrap().is_none());

        buffer.extend_from_slice(b"lo\r\n0\r");
        assert_eq!(chunk_of(decoder.decode(&mut buffer).unwrap()), Bytes::from_static(b"lo"));
        assert!(decoder.decode(&mut buffer).unwrap().is_none());

        buffer.extend_from_slice(b"\n\r\n");
        assert!(decoder.decode(&mut buffer).unwrap().unwrap().is_eof());
    }

    #[test]
    fn invalid_size() {
        let mut buffer = BytesMut::from(&b"xyz\r\n"[..]);
        assert!(ChunkedDecoder::new().decode(&mut buffer).is_err());
    }

    #[test]
    fn missing_crlf_after_data() {
        let mut buffer = BytesMut::from(&b"5\r\nhelloBad"[..]);
        let mut decoder = ChunkedDecoder::new();

        assert_eq!(chunk_of(decoder.decode(&mut buffer).unwrap()), Bytes::from_static(b"hello"));
        assert!(decoder.decode(&mut buffer).is_err());
    }

    #[test]
    fn encode_chunks() {
        let mut encoder = ChunkedEncoder::default();
        let mut dst = BytesMut::new();

        encoder.encode(PayloadItem::Chunk(Bytes::from_static(b"hello world!")), &mut dst).unwrap();
        encoder.encode(PayloadItem::Chunk(Bytes::new()), &mut dst).unwrap();
        encoder.encode(PayloadItem::<Bytes>::Eof, &mut dst).unwrap();

        assert_eq!(&dst[..], b"C\r\nhello world!\r\n0\r\n\r\n");
        assert!(encoder.is_finish());
        assert!(encoder.encode(PayloadItem::Chunk(Bytes::from_static(b"late")), &mut dst).is_err());
    }
}
