use std::sync::Arc;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use http::StatusCode;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::select;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, trace, warn};

use crate::codec::{RequestDecoder, ResponseEncoder};
use crate::connection::exchange::{Exchange, ResponseFrame, ResponseWriter};
use crate::handler::Handler;
use crate::protocol::body::ReqBody;
use crate::protocol::{
    HttpError, Message, ParseError, PayloadItem, PayloadSize, RequestHeader, ResponseHead, SendError,
};

type OutMessage = Message<(ResponseHead, PayloadSize), Bytes>;

/// What the request decoder yields next; `None` once the peer closed its side.
type Incoming = Option<Result<Message<(RequestHeader, PayloadSize)>, ParseError>>;

/// Serves HTTP/1.1 requests from one connection until it closes.
///
/// For every request the handler receives an [`Exchange`]. The handler future, the
/// request body pump and the response writer are driven concurrently on the calling
/// task, so a handler may stream its response while still reading the request.
///
/// Once the request body has ended the connection keeps reading, so a peer that goes away
/// while the handler is still working cancels the exchange. A pipelined request read this
/// way is held back until the current exchange is done.
#[derive(Debug)]
pub struct HttpConnection<R, W> {
    framed_read: FramedRead<R, RequestDecoder>,
    framed_write: FramedWrite<W, ResponseEncoder>,
    read_ahead: Option<Incoming>,
}

#[derive(Debug, Default)]
struct Progress {
    head_written: bool,
    ended: bool,
}

impl<R, W> HttpConnection<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            framed_read: FramedRead::with_capacity(reader, RequestDecoder::new(), 8 * 1024),
            framed_write: FramedWrite::new(writer, ResponseEncoder::new()),
            read_ahead: None,
        }
    }

    pub async fn process<H>(mut self, handler: Arc<H>) -> Result<(), HttpError>
    where
        H: Handler + ?Sized,
    {
        loop {
            let incoming = match self.read_ahead.take() {
                Some(incoming) => incoming,
                None => self.framed_read.next().await,
            };

            match incoming {
                Some(Ok(Message::Header((header, payload_size)))) => {
                    let keep_alive = header.keep_alive();
                    self.do_process(header, payload_size, handler.as_ref()).await?;
                    if !keep_alive {
                        trace!("connection close requested by client");
                        return Ok(());
                    }
                }

                Some(Ok(Message::Payload(_))) => {
                    error!("receive payload while expecting a request head");
                    send_empty(&mut self.framed_write, StatusCode::BAD_REQUEST).await?;
                    return Err(ParseError::invalid_body("need header while receive body").into());
                }

                Some(Err(e)) => {
                    error!(cause = %e, "can't receive next request");
                    send_empty(&mut self.framed_write, StatusCode::BAD_REQUEST).await?;
                    return Err(e.into());
                }

                None => {
                    info!("cant read more request, break this connection down");
                    return Ok(());
                }
            }
        }
    }

    async fn do_process<H>(&mut self, header: RequestHeader, payload_size: PayloadSize, handler: &H) -> Result<(), HttpError>
    where
        H: Handler + ?Sized,
    {
        if header.expects_continue() && !payload_size.is_empty() {
            let writer = self.framed_write.get_mut();
            writer.write_all(b"HTTP/1.1 100 Continue\r\n\r\n").await.map_err(SendError::io)?;
            writer.flush().await.map_err(SendError::io)?;
            info!("receive expect request header, sent continue response");
        }

        let closed = CancellationToken::new();
        let (writer, mut frames) = ResponseWriter::channel();
        let (req_body, mut body_sender) = ReqBody::body_channel(&mut self.framed_read, payload_size);
        let exchange = Exchange::new(header, req_body, writer, closed.clone());

        let mut progress = Progress::default();
        let mut write_error: Option<SendError> = None;
        let mut body_error: Option<ParseError> = None;
        let mut read_ahead: Option<Incoming> = None;

        {
            let handler_future = handler.call(exchange);
            let body_future = async {
                body_sender.send_body().await?;
                body_sender.read_ahead().await
            };
            tokio::pin!(handler_future, body_future);

            let mut handler_done = false;
            let mut frames_done = false;
            let mut body_done = false;

            // The handler may hold the writer beyond its own completion (or drop it early),
            // so both have to finish before the exchange is over.
            while !(handler_done && frames_done) {
                select! {
                    biased;

                    frame = frames.next(), if !frames_done => match frame {
                        Some(_) if write_error.is_some() || closed.is_cancelled() => {}
                        Some(frame) => {
                            if let Err(e) = write_frame(&mut self.framed_write, frame, &mut progress).await {
                                warn!(cause = %e, "failed to write response, connection is closed");
                                closed.cancel();
                                write_error = Some(e);
                            }
                        }
                        None => frames_done = true,
                    },

                    () = &mut handler_future, if !handler_done => handler_done = true,

                    result = &mut body_future, if !body_done => {
                        body_done = true;
                        match result {
                            Ok(incoming) => {
                                if peer_gone(incoming.as_ref()) {
                                    info!("connection closed by peer before the response was done");
                                    closed.cancel();
                                }
                                read_ahead = Some(incoming);
                            }
                            Err(e) => {
                                if e.is_disconnect() {
                                    info!("connection closed while reading request body");
                                } else {
                                    warn!(cause = %e, "failed to read request body");
                                }
                                closed.cancel();
                                body_error = Some(e);
                            }
                        }
                    }
                }
            }
        }

        if let Some(e) = write_error {
            return Err(e.into());
        }
        if let Some(e) = body_error {
            return Err(e.into());
        }
        if closed.is_cancelled() {
            // nobody is left to answer
            return match read_ahead {
                Some(Some(Err(e))) => Err(e.into()),
                _ => {
                    self.read_ahead = Some(None);
                    Ok(())
                }
            };
        }
        self.read_ahead = read_ahead;

        if !progress.head_written {
            error!("handler finished without a response, send internal server error");
            send_empty(&mut self.framed_write, StatusCode::INTERNAL_SERVER_ERROR).await?;
        } else if !progress.ended {
            return Err(SendError::invalid_body("response body was not ended").into());
        }

        // skip body if request handler don't read body
        body_sender.skip_body().await?;
        Ok(())
    }
}

fn peer_gone(incoming: Option<&Result<Message<(RequestHeader, PayloadSize)>, ParseError>>) -> bool {
    match incoming {
        None => true,
        Some(Err(e)) => e.is_disconnect(),
        Some(Ok(_)) => false,
    }
}

async fn write_frame<W>(
    framed_write: &mut FramedWrite<W, ResponseEncoder>,
    frame: ResponseFrame,
    progress: &mut Progress,
) -> Result<(), SendError>
where
    W: AsyncWrite + Unpin,
{
    match frame {
        ResponseFrame::Head(head, payload_size) => {
            progress.head_written = true;
            // buffered only, the first body frame or the end flushes it
            framed_write.feed(OutMessage::Header((head, payload_size))).await
        }
        ResponseFrame::Chunk(bytes) => framed_write.send(OutMessage::Payload(PayloadItem::Chunk(bytes))).await,
        ResponseFrame::End => {
            progress.ended = true;
            framed_write.send(OutMessage::Payload(PayloadItem::Eof)).await
        }
    }
}

async fn send_empty<W>(framed_write: &mut FramedWrite<W, ResponseEncoder>, status: StatusCode) -> Result<(), SendError>
where
    W: AsyncWrite + Unpin,
{
    let mut head = ResponseHead::new(());
    *head.status_mut() = status;
    framed_write.feed(OutMessage::Header((head, PayloadSize::Empty))).await?;
    framed_write.send(OutMessage::Payload(PayloadItem::Eof)).await
}
