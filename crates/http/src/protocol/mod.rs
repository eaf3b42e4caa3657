//! Protocol level types shared by the codec and the connection.
//!
//! - [`Message`], [`PayloadItem`], [`PayloadSize`]: units produced by the decoder and
//!   consumed by the encoder
//! - [`RequestHeader`] / [`ResponseHead`]: message heads
//! - [`body::ReqBody`]: the streaming request body handed to handlers
//! - [`HttpError`], [`ParseError`], [`SendError`]

mod message;
pub use message::Message;
pub use message::PayloadItem;
pub use message::PayloadSize;

mod request;
pub use request::RequestHeader;

mod response;
pub use response::ReasonPhrase;
pub use response::ResponseHead;

mod error;
pub use error::HttpError;
pub use error::ParseError;
pub use error::SendError;

pub mod body;
