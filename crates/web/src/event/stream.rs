use async_trait::async_trait;
use bytes::Bytes;
use http::request::Parts;
use http::{Response, header};
use http_body::Body as HttpBody;
use http_body_util::BodyExt;
use quill_http::connection::{Exchange, ResponseWriter};
use quill_http::protocol::body::ReqBody;
use quill_http::protocol::{PayloadSize, ResponseHead, SendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::Transport;
use crate::body::{BodyStream, ResponseBody};
use crate::date::DateService;
use crate::error::{AbortedError, HandlerError};

/// Streaming backend over a live `quill-http` connection.
///
/// The request body is pulled from the socket on demand. The response is written as frames:
/// streamed bodies are forwarded chunk by chunk and never buffered.
#[derive(Debug)]
pub struct StreamTransport {
    parts: Parts,
    body: Option<ReqBody>,
    writer: ResponseWriter,
    closed: CancellationToken,
}

impl StreamTransport {
    pub fn new(exchange: Exchange) -> Self {
        let (header, body, writer, closed) = exchange.into_parts();
        Self { parts: header.into_parts(), body: Some(body), writer, closed }
    }

    fn abort(&self, e: &SendError) -> AbortedError {
        debug!(cause = %e, "failed to write response, closing exchange");
        self.closed.cancel();
        AbortedError
    }
}

#[async_trait]
impl Transport for StreamTransport {
    fn head(&self) -> &Parts {
        &self.parts
    }

    async fn read_body(&mut self) -> Result<Bytes, HandlerError> {
        let body = self.body.take().ok_or_else(|| HandlerError::bad_request("request body has already been consumed"))?;
        match body.collect().await {
            Ok(collected) => Ok(collected.to_bytes()),
            Err(e) => Err(HandlerError::bad_request(format!("failed to read request body: {e}"))),
        }
    }

    fn take_body_stream(&mut self) -> Option<BodyStream> {
        self.body.take().map(BodyStream::from_body)
    }

    async fn send(&mut self, response: Response<ResponseBody>) -> Result<(), AbortedError> {
        let (mut parts, mut body) = response.into_parts();
        parts.headers.entry(header::DATE).or_insert_with(|| DateService::get_global_instance().http_date());

        let payload_size = PayloadSize::from_exact(body.size_hint().exact());
        let head = ResponseHead::from_parts(parts, ());
        if let Err(e) = self.writer.write_head(head, payload_size).await {
            return Err(self.abort(&e));
        }

        while let Some(frame) = body.frame().await {
            let frame = match frame {
                Ok(frame) => frame,
                Err(e) => {
                    // the head is already out, all that is left is cutting the response short
                    warn!(cause = %e, "response body stream failed");
                    self.closed.cancel();
                    return Err(AbortedError);
                }
            };
            if let Ok(data) = frame.into_data()
                && let Err(e) = self.writer.write_chunk(data).await
            {
                return Err(self.abort(&e));
            }
        }

        self.writer.end().await.map_err(|e| self.abort(&e))
    }

    fn close_signal(&self) -> &CancellationToken {
        &self.closed
    }
}
