use async_trait::async_trait;
use bytes::Bytes;
use http::request::Parts;
use http::{Request, Response};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use super::Transport;
use crate::body::{BodyStream, ResponseBody};
use crate::error::{AbortedError, HandlerError};

pub type ResponseReceiver = oneshot::Receiver<Response<ResponseBody>>;

/// Immutable request/response backend.
///
/// The request arrives fully buffered; the finalized response is delivered through the
/// [`ResponseReceiver`] returned by [`ValueTransport::new`].
#[derive(Debug)]
pub struct ValueTransport {
    parts: Parts,
    body: Option<Bytes>,
    output: Option<oneshot::Sender<Response<ResponseBody>>>,
    closed: CancellationToken,
}

impl ValueTransport {
    pub fn new(request: Request<Bytes>) -> (Self, ResponseReceiver) {
        let (parts, body) = request.into_parts();
        let (tx, rx) = oneshot::channel();
        (Self { parts, body: Some(body), output: Some(tx), closed: CancellationToken::new() }, rx)
    }

    /// Aborts the request when `signal` is cancelled.
    #[must_use]
    pub fn with_abort_signal(mut self, signal: CancellationToken) -> Self {
        self.closed = signal;
        self
    }
}

#[async_trait]
impl Transport for ValueTransport {
    fn head(&self) -> &Parts {
        &self.parts
    }

    async fn read_body(&mut self) -> Result<Bytes, HandlerError> {
        self.body.take().ok_or_else(|| HandlerError::bad_request("request body has already been consumed"))
    }

    fn take_body_stream(&mut self) -> Option<BodyStream> {
        self.body.take().map(BodyStream::once)
    }

    async fn send(&mut self, response: Response<ResponseBody>) -> Result<(), AbortedError> {
        let output = self.output.take().ok_or(AbortedError)?;
        output.send(response).map_err(|_unreceived| AbortedError)
    }

    fn close_signal(&self) -> &CancellationToken {
        &self.closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_response_once() {
        let (mut transport, rx) = ValueTransport::new(Request::new(Bytes::from_static(b"payload")));

        assert_eq!(transport.read_body().await.unwrap(), "payload");
        assert!(transport.read_body().await.is_err());
        assert!(transport.take_body_stream().is_none());

        transport.send(Response::new(ResponseBody::from("ok"))).await.unwrap();
        assert_eq!(transport.send(Response::new(ResponseBody::empty())).await, Err(AbortedError));

        let response = rx.await.unwrap();
        assert_eq!(response.status(), http::StatusCode::OK);
    }

    #[tokio::test]
    async fn abort_signal() {
        let signal = CancellationToken::new();
        let (transport, _rx) = ValueTransport::new(Request::new(Bytes::new()));
        let transport = transport.with_abort_signal(signal.clone());

        assert!(!transport.close_signal().is_cancelled());
        signal.cancel();
        assert!(transport.close_signal().is_cancelled());
    }
}
