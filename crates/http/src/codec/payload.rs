//! Payload framing selected from a message's [`PayloadSize`].

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::chunked::{ChunkedDecoder, ChunkedEncoder};
use crate::ensure;
use crate::protocol::{ParseError, PayloadItem, PayloadSize, SendError};

/// Decodes a request payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadDecoder {
    /// bytes still expected under `content-length`
    Length(u64),
    Chunked(ChunkedDecoder),
    Empty,
}

impl From<PayloadSize> for PayloadDecoder {
    fn from(size: PayloadSize) -> Self {
        match size {
            PayloadSize::Length(n) => PayloadDecoder::Length(n),
            PayloadSize::Chunked => PayloadDecoder::Chunked(ChunkedDecoder::new()),
            PayloadSize::Empty => PayloadDecoder::Empty,
        }
    }
}

impl Decoder for PayloadDecoder {
    type Item = PayloadItem;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self {
            PayloadDecoder::Length(0) | PayloadDecoder::Empty => Ok(Some(PayloadItem::Eof)),
            PayloadDecoder::Length(remaining) => {
                if src.is_empty() {
                    return Ok(None);
                }
                let len = (*remaining).min(src.len() as u64);
                let bytes = src.split_to(usize::try_from(len).unwrap_or(usize::MAX)).freeze();
                *remaining -= bytes.len() as u64;
                Ok(Some(PayloadItem::Chunk(bytes)))
            }
            PayloadDecoder::Chunked(decoder) => decoder.decode(src),
        }
    }
}

/// Encodes a response payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadEncoder {
    /// bytes still owed under `content-length`
    Length(u64),
    Chunked(ChunkedEncoder),
    Empty,
}

impl From<PayloadSize> for PayloadEncoder {
    fn from(size: PayloadSize) -> Self {
        match size {
            PayloadSize::Length(n) => PayloadEncoder::Length(n),
            PayloadSize::Chunked => PayloadEncoder::Chunked(ChunkedEncoder::default()),
            PayloadSize::Empty => PayloadEncoder::Empty,
        }
    }
}

impl<D: Buf> Encoder<PayloadItem<D>> for PayloadEncoder {
    type Error = SendError;

    fn encode(&mut self, item: PayloadItem<D>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match (self, item) {
            (PayloadEncoder::Chunked(encoder), item) => encoder.encode(item, dst),

            (PayloadEncoder::Length(remaining), PayloadItem::Chunk(mut bytes)) => {
                let size = bytes.remaining() as u64;
                ensure!(size <= *remaining, SendError::invalid_body("response body exceeds content-length"));
                *remaining -= size;
                while bytes.has_remaining() {
                    let chunk = bytes.chunk();
                    let len = chunk.len();
                    dst.extend_from_slice(chunk);
                    bytes.advance(len);
                }
                Ok(())
            }
            (PayloadEncoder::Length(remaining), PayloadItem::Eof) => {
                ensure!(*remaining == 0, SendError::invalid_body("response body shorter than content-length"));
                Ok(())
            }

            (PayloadEncoder::Empty, PayloadItem::Chunk(bytes)) => {
                ensure!(!bytes.has_remaining(), SendError::invalid_body("body written to an empty response"));
                Ok(())
            }
            (PayloadEncoder::Empty, PayloadItem::Eof) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn length_decoder_stops_at_content_length() {
        let mut buffer = BytesMut::from(&b"1012345678GET / HTTP/1.1"[..]);
        let mut decoder = PayloadDecoder::from(PayloadSize::Length(10));

        let item = decoder.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(item.as_bytes().unwrap(), &Bytes::from_static(b"1012345678"));
        assert!(decoder.decode(&mut buffer).unwrap().unwrap().is_eof());
        assert_eq!(&buffer[..], b"GET / HTTP/1.1");
    }

    #[test]
    fn length_decoder_waits_for_data() {
        let mut buffer = BytesMut::new();
        let mut decoder = PayloadDecoder::from(PayloadSize::Length(3));
        assert!(decoder.decode(&mut buffer).unwrap().is_none());
    }

    #[test]
    fn empty_decoder_is_eof() {
        let mut buffer = BytesMut::from(&b"next"[..]);
        let mut decoder = PayloadDecoder::from(PayloadSize::Empty);
        assert!(decoder.decode(&mut buffer).unwrap().unwrap().is_eof());
        assert_eq!(buffer.len(), 4);
    }

    #[test]
    fn length_encoder_enforces_size() {
        let mut dst = BytesMut::new();

        let mut encoder = PayloadEncoder::from(PayloadSize::Length(5));
        encoder.encode(PayloadItem::Chunk(Bytes::from_static(b"hel")), &mut dst).unwrap();
        assert!(encoder.encode(PayloadItem::Chunk(Bytes::from_static(b"lo!")), &mut dst).is_err());
        encoder.encode(PayloadItem::Chunk(Bytes::from_static(b"lo")), &mut dst).unwrap();
        encoder.encode(PayloadItem::<Bytes>::Eof, &mut dst).unwrap();
        assert_eq!(&dst[..], b"hello");

        let mut short = PayloadEncoder::from(PayloadSize::Length(5));
        assert!(short.encode(PayloadItem::<Bytes>::Eof, &mut dst).is_err());
    }
}
