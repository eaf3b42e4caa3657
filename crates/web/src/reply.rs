//! What a handler hands back.
//!
//! Every handler result is converted into a [`Reply`] through [`IntoReply`]; the resolver
//! turns a reply into the final response.

use bytes::Bytes;
use http::{Response, StatusCode};
use serde::Serialize;

use crate::body::{BodyStream, ResponseBody};
use crate::error::{HandlerError, SerializationError};
use crate::event::Staged;
use crate::resolver;

/// A handler outcome, resolved in declaration order of the variants.
#[derive(Debug)]
pub enum Reply {
    /// Nothing to send; the pipeline moves on.
    Continue,
    /// `204` with an empty body.
    NoContent,
    /// Text, sent as `text/html` unless a content type was staged.
    Text(String),
    /// Raw bytes, no content type is forced.
    Bytes(Bytes),
    /// Forwarded chunk by chunk.
    Stream(BodyStream),
    Error(HandlerError),
    Json(serde_json::Value),
    /// A complete response merged over the staged one.
    Response(Response<ResponseBody>),
}

pub trait IntoReply {
    fn into_reply(self) -> Reply;
}

impl IntoReply for Reply {
    fn into_reply(self) -> Reply {
        self
    }
}

impl IntoReply for () {
    fn into_reply(self) -> Reply {
        Reply::Continue
    }
}

impl<T: IntoReply> IntoReply for Option<T> {
    fn into_reply(self) -> Reply {
        match self {
            Some(value) => value.into_reply(),
            None => Reply::NoContent,
        }
    }
}

impl<T, E> IntoReply for Result<T, E>
where
    T: IntoReply,
    E: Into<HandlerError>,
{
    fn into_reply(self) -> Reply {
        match self {
            Ok(value) => value.into_reply(),
            Err(e) => Reply::Error(e.into()),
        }
    }
}

impl IntoReply for &'static str {
    fn into_reply(self) -> Reply {
        Reply::Text(self.to_owned())
    }
}

impl IntoReply for String {
    fn into_reply(self) -> Reply {
        Reply::Text(self)
    }
}

impl IntoReply for Bytes {
    fn into_reply(self) -> Reply {
        Reply::Bytes(self)
    }
}

impl IntoReply for Vec<u8> {
    fn into_reply(self) -> Reply {
        Reply::Bytes(Bytes::from(self))
    }
}

impl IntoReply for serde_json::Value {
    fn into_reply(self) -> Reply {
        Reply::Json(self)
    }
}

impl IntoReply for BodyStream {
    fn into_reply(self) -> Reply {
        Reply::Stream(self)
    }
}

impl IntoReply for HandlerError {
    fn into_reply(self) -> Reply {
        Reply::Error(self)
    }
}

impl<B: Into<ResponseBody>> IntoReply for Response<B> {
    fn into_reply(self) -> Reply {
        Reply::Response(self.map(Into::into))
    }
}

/// Overrides the status of the inner reply.
impl<T: IntoReply> IntoReply for (StatusCode, T) {
    fn into_reply(self) -> Reply {
        let (status, value) = self;
        match resolver::resolve(&Staged::default(), value.into_reply(), false) {
            Some(mut response) => {
                *response.status_mut() = status;
                Reply::Response(response)
            }
            None => Reply::Continue,
        }
    }
}

/// Serializes `T` as a JSON reply.
#[derive(Debug, Clone, Copy, Default)]
pub struct Json<T>(pub T);

impl<T: Serialize> IntoReply for Json<T> {
    fn into_reply(self) -> Reply {
        match serde_json::to_value(&self.0) {
            Ok(value) => Reply::Json(value),
            Err(e) => Reply::Error(SerializationError::from(e).into()),
        }
    }
}
