use async_trait::async_trait;
use bytes::Bytes;
use http::Response;
use http::request::Parts;
use tokio_util::sync::CancellationToken;

use crate::body::{BodyStream, ResponseBody};
use crate::error::{AbortedError, HandlerError};

/// The request/response capability an [`Event`](super::Event) is built on.
///
/// Implemented by the streaming socket backend ([`StreamTransport`](super::StreamTransport))
/// and the immutable value backend ([`ValueTransport`](super::ValueTransport)).
#[async_trait]
pub trait Transport: Send {
    /// Method, URI, version and headers of the request.
    fn head(&self) -> &Parts;

    /// Reads the whole request body. Called at most once per request.
    async fn read_body(&mut self) -> Result<Bytes, HandlerError>;

    /// Hands out the request body as a live stream, if it was not taken yet.
    fn take_body_stream(&mut self) -> Option<BodyStream>;

    /// Delivers the finalized response. Called at most once per request.
    async fn send(&mut self, response: Response<ResponseBody>) -> Result<(), AbortedError>;

    /// Cancelled once the client can no longer receive a response.
    fn close_signal(&self) -> &CancellationToken;
}
