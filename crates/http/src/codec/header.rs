//! Request head decoding and response head encoding.
//!
//! Limits: at most 64 request headers and 8KB for the whole request head.

use std::io::Write;

use bytes::{Buf, BufMut, BytesMut};
use http::{HeaderName, HeaderValue, Method, Request, StatusCode, Uri, Version, header};
use httparse::Status;
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

use crate::ensure;
use crate::protocol::{ParseError, PayloadSize, ReasonPhrase, RequestHeader, ResponseHead, SendError};

const MAX_HEADER_NUM: usize = 64;

const MAX_HEADER_BYTES: usize = 8 * 1024;

const INIT_HEADER_SIZE: usize = 4 * 1024;

/// Parses a request head with `httparse` and selects the payload framing.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeaderDecoder;

impl Decoder for HeaderDecoder {
    type Item = (RequestHeader, PayloadSize);
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }

        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADER_NUM];
        let mut parsed = httparse::Request::new(&mut headers);

        let body_offset = match parsed.parse(src) {
            Ok(Status::Complete(offset)) => offset,
            Ok(Status::Partial) => {
                ensure!(src.len() <= MAX_HEADER_BYTES, ParseError::too_large_header(src.len(), MAX_HEADER_BYTES));
                return Ok(None);
            }
            Err(httparse::Error::TooManyHeaders) => return Err(ParseError::too_many_headers(MAX_HEADER_NUM)),
            Err(e) => return Err(ParseError::invalid_header(e)),
        };

        trace!(header_size = body_offset, "parsed request head");
        ensure!(body_offset <= MAX_HEADER_BYTES, ParseError::too_large_header(body_offset, MAX_HEADER_BYTES));

        let version = match parsed.version {
            Some(0) => Version::HTTP_10,
            Some(1) => Version::HTTP_11,
            v => return Err(ParseError::InvalidVersion(v)),
        };
        let method = parsed.method.ok_or(ParseError::InvalidMethod)?;
        let path = parsed.path.ok_or(ParseError::InvalidUri)?;

        let mut request = Request::new(());
        *request.method_mut() = Method::from_bytes(method.as_bytes()).map_err(|_invalid| ParseError::InvalidMethod)?;
        *request.uri_mut() = path.parse::<Uri>().map_err(|_invalid| ParseError::InvalidUri)?;
        *request.version_mut() = version;

        let map = request.headers_mut();
        map.reserve(parsed.headers.len());
        for h in parsed.headers.iter() {
            let name = HeaderName::from_bytes(h.name.as_bytes()).map_err(ParseError::invalid_header)?;
            let value = HeaderValue::from_bytes(h.value).map_err(ParseError::invalid_header)?;
            map.append(name, value);
        }

        src.advance(body_offset);

        let header = RequestHeader::from(request);
        let payload_size = parse_payload(&header)?;
        Ok(Some((header, payload_size)))
    }
}

/// Selects the request payload framing per RFC 9112 section 6.
fn parse_payload(header: &RequestHeader) -> Result<PayloadSize, ParseError> {
    if !header.need_body() {
        return Ok(PayloadSize::Empty);
    }

    let te = header.headers().get(header::TRANSFER_ENCODING);
    let cl = header.headers().get(header::CONTENT_LENGTH);

    match (te, cl) {
        (None, None) => Ok(PayloadSize::Empty),
        (Some(te), None) if is_chunked(te) => Ok(PayloadSize::Chunked),
        (Some(_), None) => Ok(PayloadSize::Empty),
        (None, Some(cl)) => {
            let text = cl.to_str().map_err(|_invalid| ParseError::invalid_content_length("value is not visible ascii"))?;
            let length = text
                .trim()
                .parse::<u64>()
                .map_err(|_invalid| ParseError::invalid_content_length(format!("value {text} is not u64")))?;
            Ok(if length == 0 { PayloadSize::Empty } else { PayloadSize::Length(length) })
        }
        (Some(_), Some(_)) => {
            Err(ParseError::invalid_content_length("transfer-encoding and content-length both present"))
        }
    }
}

/// `chunked` must be the final transfer coding.
fn is_chunked(value: &HeaderValue) -> bool {
    value.as_bytes().rsplit(|b| *b == b',').next().is_some_and(|last| last.trim_ascii().eq_ignore_ascii_case(b"chunked"))
}

/// Writes the status line and headers of a response head.
///
/// `content-length` / `transfer-encoding` are set from the payload size, overriding
/// whatever the head carried.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeaderEncoder;

impl Encoder<(ResponseHead, PayloadSize)> for HeaderEncoder {
    type Error = SendError;

    fn encode(&mut self, item: (ResponseHead, PayloadSize), dst: &mut BytesMut) -> Result<(), Self::Error> {
        let (mut head, payload_size) = item;
        let status = head.status();

        let reason = match head.extensions().get::<ReasonPhrase>() {
            Some(phrase) => phrase.as_str(),
            None => status.canonical_reason().unwrap_or_default(),
        };

        dst.reserve(INIT_HEADER_SIZE);
        write!((&mut *dst).writer(), "HTTP/1.1 {} {}\r\n", status.as_str(), reason)?;

        let headers = head.headers_mut();
        match payload_size {
            PayloadSize::Length(n) => {
                headers.remove(header::TRANSFER_ENCODING);
                headers.insert(header::CONTENT_LENGTH, n.into());
            }
            PayloadSize::Chunked => {
                headers.remove(header::CONTENT_LENGTH);
                headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
            }
            PayloadSize::Empty if forbids_content_length(status) => {
                headers.remove(header::CONTENT_LENGTH);
                headers.remove(header::TRANSFER_ENCODING);
            }
            PayloadSize::Empty => {
                headers.remove(header::TRANSFER_ENCODING);
                headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("0"));
            }
        }

        for (name, value) in head.headers() {
            dst.put_slice(name.as_ref());
            dst.put_slice(b": ");
            dst.put_slice(value.as_ref());
            dst.put_slice(b"\r\n");
        }
        dst.put_slice(b"\r\n");
        Ok(())
    }
}

fn forbids_content_length(status: StatusCode) -> bool {
    status.is_informational() || status == StatusCode::NO_CONTENT
}
