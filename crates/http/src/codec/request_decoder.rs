use bytes::BytesMut;
use tokio_util::codec::Decoder;

use crate::codec::header::HeaderDecoder;
use crate::codec::payload::PayloadDecoder;
use crate::protocol::{Message, ParseError, PayloadItem, PayloadSize, RequestHeader};

/// Decodes a stream of requests: a head, then its payload items up to `Eof`, then the
/// next head.
#[derive(Debug, Default)]
pub struct RequestDecoder {
    header_decoder: HeaderDecoder,
    payload_decoder: Option<PayloadDecoder>,
}

impl RequestDecoder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for RequestDecoder {
    type Item = Message<(RequestHeader, PayloadSize)>;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(payload_decoder) = &mut self.payload_decoder {
            let item = payload_decoder.decode(src)?;
            if item.as_ref().is_some_and(PayloadItem::is_eof) {
                self.payload_decoder = None;
            }
            return Ok(item.map(Message::Payload));
        }

        Ok(self.header_decoder.decode(src)?.map(|(header, payload_size)| {
            self.payload_decoder = Some(payload_size.into());
            Message::Header((header, payload_size))
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http::Method;
    use indoc::indoc;

    #[test]
    fn pipelined_requests() {
        let str = indoc! {r##"
        POST /echo HTTP/1.1
        Content-Length: 5

        helloGET /next HTTP/1.1

        "##};
        let mut buf = BytesMut::from(str);
        let mut decoder = RequestDecoder::new();

        let Some(Message::Header((header, size))) = decoder.decode(&mut buf).unwrap() else { panic!("expect head") };
        assert_eq!(header.method(), &Method::POST);
        assert_eq!(size, PayloadSize::Length(5));

        let item = decoder.decode(&mut buf).unwrap().and_then(Message::into_payload_item).unwrap();
        assert_eq!(item, PayloadItem::Chunk(Bytes::from_static(b"hello")));
        assert!(decoder.decode(&mut buf).unwrap().and_then(Message::into_payload_item).unwrap().is_eof());

        let Some(Message::Header((header, size))) = decoder.decode(&mut buf).unwrap() else { panic!("expect head") };
        assert_eq!(header.uri().path(), "/next");
        assert!(size.is_empty());
        assert!(decoder.decode(&mut buf).unwrap().and_then(Message::into_payload_item).unwrap().is_eof());
        assert!(decoder.decode(&mut buf).unwrap().is_none());
    }
}
