//! Body types of the event layer.
//!
//! [`BodyStream`] is a boxed, streaming body used both for live request bodies and for
//! streamed replies. [`ResponseBody`] is the body of a finalized response: either a single
//! buffer or a forwarded stream.

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::{Stream, TryStreamExt};
use http_body::Body as HttpBody;
use http_body::{Frame, SizeHint};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full, StreamBody};

use crate::error::BoxError;

/// A streaming body of `Bytes` chunks.
pub struct BodyStream {
    inner: UnsyncBoxBody<Bytes, BoxError>,
}

impl BodyStream {
    pub fn empty() -> Self {
        Self::from_body(Empty::<Bytes>::new())
    }

    /// A stream that yields `bytes` once.
    pub fn once(bytes: Bytes) -> Self {
        Self::from_body(Full::new(bytes))
    }

    pub fn from_body<B>(body: B) -> Self
    where
        B: HttpBody<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        Self { inner: body.map_err(Into::<BoxError>::into).boxed_unsync() }
    }

    /// Adapts a stream of chunks; the stream is forwarded as it produces data.
    pub fn from_stream<S, E>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        Self::from_body(StreamBody::new(stream.map_ok(Frame::data).map_err(Into::<BoxError>::into)))
    }

    /// Reads the remaining chunks into one buffer.
    pub async fn collect_bytes(self) -> Result<Bytes, BoxError> {
        Ok(self.inner.collect().await?.to_bytes())
    }
}

impl fmt::Debug for BodyStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BodyStream").field("size_hint", &self.inner.size_hint()).finish_non_exhaustive()
    }
}

impl HttpBody for BodyStream {
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        Pin::new(&mut self.get_mut().inner).poll_frame(cx)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

/// The body of a finalized response.
#[derive(Debug)]
pub struct ResponseBody {
    inner: Kind,
}

#[derive(Debug)]
enum Kind {
    Once(Option<Bytes>),
    Stream(BodyStream),
}

impl ResponseBody {
    pub fn empty() -> Self {
        Self { inner: Kind::Once(None) }
    }

    pub fn once(bytes: Bytes) -> Self {
        if bytes.is_empty() { Self::empty() } else { Self { inner: Kind::Once(Some(bytes)) } }
    }

    pub fn stream(body: BodyStream) -> Self {
        Self { inner: Kind::Stream(body) }
    }

    /// Whether the body is forwarded from a stream rather than held in memory.
    pub fn is_stream(&self) -> bool {
        matches!(self.inner, Kind::Stream(_))
    }
}

impl Default for ResponseBody {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<String> for ResponseBody {
    fn from(value: String) -> Self {
        Self::once(Bytes::from(value))
    }
}

impl From<&'static str> for ResponseBody {
    fn from(value: &'static str) -> Self {
        Self::once(Bytes::from_static(value.as_bytes()))
    }
}

impl From<Bytes> for ResponseBody {
    fn from(value: Bytes) -> Self {
        Self::once(value)
    }
}

impl From<Vec<u8>> for ResponseBody {
    fn from(value: Vec<u8>) -> Self {
        Self::once(Bytes::from(value))
    }
}

impl From<()> for ResponseBody {
    fn from((): ()) -> Self {
        Self::empty()
    }
}

impl From<BodyStream> for ResponseBody {
    fn from(value: BodyStream) -> Self {
        Self::stream(value)
    }
}

impl HttpBody for ResponseBody {
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        match &mut self.get_mut().inner {
            Kind::Once(option_bytes) => Poll::Ready(option_bytes.take().map(|bytes| Ok(Frame::data(bytes)))),
            Kind::Stream(stream) => Pin::new(stream).poll_frame(cx),
        }
    }

    fn is_end_stream(&self) -> bool {
        match &self.inner {
            Kind::Once(option_bytes) => option_bytes.is_none(),
            Kind::Stream(stream) => stream.is_end_stream(),
        }
    }

    fn size_hint(&self) -> SizeHint {
        match &self.inner {
            Kind::Once(None) => SizeHint::with_exact(0),
            Kind::Once(Some(bytes)) => SizeHint::with_exact(bytes.len() as u64),
            Kind::Stream(stream) => stream.size_hint(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    fn check_send<T: Send>() {}

    #[test]
    fn is_send() {
        check_send::<ResponseBody>();
        check_send::<BodyStream>();
    }

    #[tokio::test]
    async fn string_body() {
        let mut body = ResponseBody::from("Hello world".to_string());

        assert_eq!(body.size_hint().exact(), Some(11));
        assert!(!body.is_end_stream());

        let bytes = body.frame().await.unwrap().unwrap().into_data().unwrap();
        assert_eq!(bytes, Bytes::from("Hello world"));

        assert!(body.is_end_stream());
        assert!(body.frame().await.is_none());
    }

    #[tokio::test]
    async fn empty_body() {
        let mut body = ResponseBody::from("");

        assert!(body.is_end_stream());
        assert_eq!(body.size_hint().exact(), Some(0));
        assert!(body.frame().await.is_none());
    }

    #[tokio::test]
    async fn stream_body_is_not_sized() {
        let chunks: Vec<Result<Bytes, io::Error>> =
            vec![Ok(Bytes::from_static(b"a")), Ok(Bytes::from_static(b"b")), Ok(Bytes::from_static(b"c"))];
        let mut body = ResponseBody::stream(BodyStream::from_stream(futures::stream::iter(chunks)));

        assert!(body.is_stream());
        assert!(body.size_hint().exact().is_none());
        assert_eq!(body.frame().await.unwrap().unwrap().into_data().unwrap(), "a");
        assert_eq!(body.frame().await.unwrap().unwrap().into_data().unwrap(), "b");
        assert_eq!(body.frame().await.unwrap().unwrap().into_data().unwrap(), "c");
        assert!(body.frame().await.is_none());
    }

    #[tokio::test]
    async fn stream_error_is_forwarded() {
        let chunks: Vec<Result<Bytes, io::Error>> =
            vec![Ok(Bytes::from_static(b"a")), Err(io::Error::new(io::ErrorKind::BrokenPipe, "gone"))];
        let stream = BodyStream::from_stream(futures::stream::iter(chunks));
        let error = stream.collect_bytes().await.unwrap_err();
        assert_eq!(error.to_string(), "gone");
    }

    #[tokio::test]
    async fn stream_of_boxed_errors() {
        let chunks: Vec<Result<Bytes, BoxError>> = vec![Ok(Bytes::from_static(b"x")), Err("broken upstream".into())];
        let error = BodyStream::from_stream(futures::stream::iter(chunks)).collect_bytes().await.unwrap_err();
        assert_eq!(error.to_string(), "broken upstream");
    }

    #[tokio::test]
    async fn once_stream() {
        let stream = BodyStream::once(Bytes::from_static(b"cached"));
        assert_eq!(stream.size_hint().exact(), Some(6));
        assert_eq!(stream.collect_bytes().await.unwrap(), "cached");
    }
}
