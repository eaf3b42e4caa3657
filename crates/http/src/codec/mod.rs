//! HTTP/1.1 wire codec for `tokio_util::codec`.
//!
//! - [`RequestDecoder`]: request heads and their payload items
//! - [`ResponseEncoder`]: response heads and their payload items
//!
//! Payload framing (`content-length`, chunked, none) is chosen from the head and tracked
//! until the payload's `Eof`.

mod chunked;
mod header;
mod payload;
mod request_decoder;
mod response_encoder;

pub use request_decoder::RequestDecoder;
pub use response_encoder::ResponseEncoder;
