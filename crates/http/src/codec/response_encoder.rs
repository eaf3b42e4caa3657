use bytes::{Buf, BytesMut};
use tokio_util::codec::Encoder;
use tracing::error;

use crate::codec::header::HeaderEncoder;
use crate::codec::payload::PayloadEncoder;
use crate::protocol::{Message, PayloadItem, PayloadSize, ResponseHead, SendError};

/// Encodes a response head followed by its payload items.
///
/// A head is only accepted once the previous payload reached `Eof`.
#[derive(Debug, Default)]
pub struct ResponseEncoder {
    header_encoder: HeaderEncoder,
    payload_encoder: Option<PayloadEncoder>,
}

impl ResponseEncoder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<D: Buf> Encoder<Message<(ResponseHead, PayloadSize), D>> for ResponseEncoder {
    type Error = SendError;

    fn encode(&mut self, item: Message<(ResponseHead, PayloadSize), D>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            Message::Header((head, payload_size)) => {
                if self.payload_encoder.is_some() {
                    error!("expect payload item but receive response head");
                    return Err(SendError::invalid_frame("response head before end of previous body"));
                }
                self.payload_encoder = Some(payload_size.into());
                self.header_encoder.encode((head, payload_size), dst)
            }

            Message::Payload(payload_item) => {
                let Some(payload_encoder) = &mut self.payload_encoder else {
                    error!("expect response head but receive payload item");
                    return Err(SendError::invalid_frame("payload before response head"));
                };

                let is_eof = matches!(payload_item, PayloadItem::Eof);
                let result = payload_encoder.encode(payload_item, dst);
                if is_eof {
                    self.payload_encoder = None;
                }
                result
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http::Response;

    type Item = Message<(ResponseHead, PayloadSize), Bytes>;

    #[test]
    fn encode_chunked_response() {
        let mut encoder = ResponseEncoder::new();
        let mut dst = BytesMut::new();

        let head = Response::new(());
        encoder.encode(Item::Header((head, PayloadSize::Chunked)), &mut dst).unwrap();
        encoder.encode(Item::Payload(PayloadItem::Chunk(Bytes::from_static(b"abc"))), &mut dst).unwrap();
        encoder.encode(Item::Payload(PayloadItem::Eof), &mut dst).unwrap();

        assert_eq!(&dst[..], b"HTTP/1.1 200 OK\r\ntransfer-encoding: chunked\r\n\r\n3\r\nabc\r\n0\r\n\r\n");
    }

    #[test]
    fn reject_out_of_order_frames() {
        let mut encoder = ResponseEncoder::new();
        let mut dst = BytesMut::new();

        assert!(encoder.encode(Item::Payload(PayloadItem::Eof), &mut dst).is_err());

        encoder.encode(Item::Header((Response::new(()), PayloadSize::Length(1))), &mut dst).unwrap();
        assert!(encoder.encode(Item::Header((Response::new(()), PayloadSize::Empty)), &mut dst).is_err());
    }
}
