use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use bytes::Bytes;
use futures::channel::{mpsc, oneshot};
use futures::{FutureExt, Stream, StreamExt};
use http_body::{Body, Frame, SizeHint};
use tracing::{info, trace};

use crate::protocol::{Message, ParseError, PayloadItem, PayloadSize, RequestHeader};

type PayloadRequest = oneshot::Sender<PayloadItem>;

/// The streaming body of an inbound request.
///
/// Implements [`http_body::Body`]. Chunks are pulled on demand from the connection,
/// so nothing is read from the socket until the body is polled.
#[derive(Debug)]
pub struct ReqBody {
    signal: mpsc::Sender<PayloadRequest>,
    receiving: Option<oneshot::Receiver<PayloadItem>>,
    size: PayloadSize,
    eof: bool,
}

impl ReqBody {
    /// Creates the consumer/producer pair for a request whose payload is read from
    /// `payload_stream`.
    pub fn body_channel<S>(payload_stream: &mut S, size: PayloadSize) -> (ReqBody, ReqBodySender<'_, S>)
    where
        S: Stream + Unpin,
    {
        let (signal, receiver) = mpsc::channel(16);

        let req_body = ReqBody { signal, receiving: None, size, eof: size.is_empty() };
        let body_sender = ReqBodySender { payload_stream, receiver, empty: size.is_empty(), eof: false, failed: false };

        (req_body, body_sender)
    }

    pub fn payload_size(&self) -> PayloadSize {
        self.size
    }
}

impl Body for ReqBody {
    type Data = Bytes;
    type Error = ParseError;

    fn poll_frame(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        if this.eof {
            return Poll::Ready(None);
        }

        loop {
            if let Some(receiving) = &mut this.receiving {
                let item = ready!(receiving.poll_unpin(cx));
                this.receiving = None;
                return match item {
                    Ok(PayloadItem::Chunk(bytes)) => Poll::Ready(Some(Ok(Frame::data(bytes)))),
                    Ok(PayloadItem::Eof) => {
                        this.eof = true;
                        Poll::Ready(None)
                    }
                    Err(_canceled) => {
                        this.eof = true;
                        Poll::Ready(Some(Err(ParseError::invalid_body("request body canceled"))))
                    }
                };
            }

            let sent = ready!(this.signal.poll_ready(cx)).and_then(|()| {
                let (tx, rx) = oneshot::channel();
                this.signal.start_send(tx).map(|()| rx)
            });

            match sent {
                Ok(rx) => this.receiving = Some(rx),
                Err(e) => {
                    this.eof = true;
                    return Poll::Ready(Some(Err(ParseError::invalid_body(e))));
                }
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        self.eof
    }

    fn size_hint(&self) -> SizeHint {
        match self.size {
            PayloadSize::Length(n) => SizeHint::with_exact(n),
            PayloadSize::Empty => SizeHint::with_exact(0),
            PayloadSize::Chunked => SizeHint::default(),
        }
    }
}

/// Producer side of [`ReqBody`], borrowing the connection's decoded message stream.
#[derive(Debug)]
pub struct ReqBodySender<'conn, S>
where
    S: Stream + Unpin,
{
    payload_stream: &'conn mut S,
    receiver: mpsc::Receiver<PayloadRequest>,
    empty: bool,
    eof: bool,
    failed: bool,
}

impl<S> ReqBodySender<'_, S>
where
    S: Stream<Item = Result<Message<(RequestHeader, PayloadSize)>, ParseError>> + Unpin,
{
    /// Answers chunk requests from the [`ReqBody`] until the payload ends.
    ///
    /// On error the channel is closed, so a waiting reader observes a canceled body
    /// instead of hanging. An empty payload ends right away, whether or not the body is read.
    pub async fn send_body(&mut self) -> Result<(), ParseError> {
        if self.empty && !self.eof {
            match self.next_item().await {
                Ok(item) => self.eof = item.is_eof(),
                Err(e) => {
                    self.failed = true;
                    self.receiver.close();
                    return Err(e);
                }
            }
        }

        while !self.eof {
            let Some(sender) = self.receiver.next().await else {
                return Ok(());
            };

            match self.next_item().await {
                Ok(item) => {
                    self.eof = item.is_eof();
                    if sender.send(item).is_err() {
                        trace!("request body reader went away");
                    }
                }
                Err(e) => {
                    self.failed = true;
                    self.receiver.close();
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Reads and discards whatever part of the payload the handler did not consume.
    pub async fn skip_body(&mut self) -> Result<(), ParseError> {
        if self.failed {
            return Err(ParseError::invalid_body("request body stream already failed"));
        }

        let mut size: usize = 0;
        while !self.eof {
            match self.next_item().await? {
                PayloadItem::Chunk(bytes) => size += bytes.len(),
                PayloadItem::Eof => self.eof = true,
            }
        }

        if size > 0 {
            info!(size = size, "skip request body");
        }
        Ok(())
    }

    /// Drains the unread payload, then waits for whatever the peer sends next.
    ///
    /// Yields `None` once the peer has closed its side of the connection. A pipelined request
    /// head comes back as is, to be served after the current exchange.
    pub async fn read_ahead(&mut self) -> Result<Option<S::Item>, ParseError> {
        self.skip_body().await?;
        Ok(self.payload_stream.next().await)
    }

    async fn next_item(&mut self) -> Result<PayloadItem, ParseError> {
        match self.payload_stream.next().await {
            Some(Ok(Message::Payload(item))) => Ok(item),
            Some(Ok(Message::Header(_))) => Err(ParseError::invalid_body("received header while reading body")),
            Some(Err(e)) => Err(e),
            None => Err(ParseError::io(io::Error::from(io::ErrorKind::UnexpectedEof))),
        }
    }
}
