use bytes::Bytes;
use futures::SinkExt;
use futures::channel::mpsc;
use tokio_util::sync::CancellationToken;

use crate::ensure;
use crate::protocol::body::ReqBody;
use crate::protocol::{PayloadSize, RequestHeader, ResponseHead, SendError};

/// A response unit sent from the handler to the connection.
#[derive(Debug)]
pub enum ResponseFrame {
    Head(ResponseHead, PayloadSize),
    Chunk(Bytes),
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterState {
    Idle,
    Body,
    Ended,
}

/// Writes the response of one exchange as frames: a head, body chunks, then the end.
///
/// Frames are forwarded to the connection task through a bounded channel, which
/// provides backpressure when the socket is slower than the handler.
#[derive(Debug)]
pub struct ResponseWriter {
    tx: mpsc::Sender<ResponseFrame>,
    state: WriterState,
}

impl ResponseWriter {
    pub(crate) fn channel() -> (ResponseWriter, mpsc::Receiver<ResponseFrame>) {
        let (tx, rx) = mpsc::channel(8);
        (ResponseWriter { tx, state: WriterState::Idle }, rx)
    }

    pub async fn write_head(&mut self, head: ResponseHead, payload_size: PayloadSize) -> Result<(), SendError> {
        ensure!(self.state == WriterState::Idle, SendError::invalid_frame("response head already written"));
        self.send(ResponseFrame::Head(head, payload_size)).await?;
        self.state = WriterState::Body;
        Ok(())
    }

    pub async fn write_chunk(&mut self, bytes: Bytes) -> Result<(), SendError> {
        ensure!(self.state == WriterState::Body, SendError::invalid_frame("body chunk outside of response body"));
        if bytes.is_empty() {
            return Ok(());
        }
        self.send(ResponseFrame::Chunk(bytes)).await
    }

    pub async fn end(&mut self) -> Result<(), SendError> {
        ensure!(self.state == WriterState::Body, SendError::invalid_frame("end outside of response body"));
        self.send(ResponseFrame::End).await?;
        self.state = WriterState::Ended;
        Ok(())
    }

    async fn send(&mut self, frame: ResponseFrame) -> Result<(), SendError> {
        self.tx.send(frame).await.map_err(|_disconnected| SendError::Closed)
    }
}

/// One request/response exchange on a live connection.
///
/// `closed` is cancelled by the connection once it can no longer deliver a response:
/// reading the request or writing the response failed, or the peer closed its side.
#[derive(Debug)]
pub struct Exchange {
    header: RequestHeader,
    body: ReqBody,
    writer: ResponseWriter,
    closed: CancellationToken,
}

impl Exchange {
    pub(crate) fn new(header: RequestHeader, body: ReqBody, writer: ResponseWriter, closed: CancellationToken) -> Self {
        Self { header, body, writer, closed }
    }

    pub fn into_parts(self) -> (RequestHeader, ReqBody, ResponseWriter, CancellationToken) {
        (self.header, self.body, self.writer, self.closed)
    }
}
