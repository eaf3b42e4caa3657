use http::request::Parts;
use http::{HeaderMap, Method, Request, Uri, Version, header};

/// The decoded head of an inbound request.
#[derive(Debug)]
pub struct RequestHeader {
    inner: Request<()>,
}

impl AsRef<Request<()>> for RequestHeader {
    fn as_ref(&self) -> &Request<()> {
        &self.inner
    }
}

impl AsMut<Request<()>> for RequestHeader {
    fn as_mut(&mut self) -> &mut Request<()> {
        &mut self.inner
    }
}

impl RequestHeader {
    pub fn into_inner(self) -> Request<()> {
        self.inner
    }

    pub fn into_parts(self) -> Parts {
        self.inner.into_parts().0
    }

    /// Attaches a body, producing a full `Request<T>`.
    pub fn body<T>(self, body: T) -> Request<T> {
        self.inner.map(|()| body)
    }

    pub fn method(&self) -> &Method {
        self.inner.method()
    }

    pub fn uri(&self) -> &Uri {
        self.inner.uri()
    }

    pub fn version(&self) -> Version {
        self.inner.version()
    }

    pub fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    /// Whether the request framing may carry a payload.
    ///
    /// `GET`, `HEAD`, `DELETE`, `OPTIONS` and `CONNECT` bodies are not read.
    pub fn need_body(&self) -> bool {
        !matches!(*self.method(), Method::GET | Method::HEAD | Method::DELETE | Method::OPTIONS | Method::CONNECT)
    }

    /// Whether the connection may serve another request after this one.
    pub fn keep_alive(&self) -> bool {
        let connection = self.headers().get(header::CONNECTION).map(|v| v.as_bytes());
        match self.version() {
            Version::HTTP_10 => connection.is_some_and(|v| v.eq_ignore_ascii_case(b"keep-alive")),
            _ => !connection.is_some_and(|v| v.eq_ignore_ascii_case(b"close")),
        }
    }

    /// Whether the client waits for `100 Continue` before sending the body.
    pub fn expects_continue(&self) -> bool {
        self.headers()
            .get(header::EXPECT)
            .is_some_and(|v| v.as_bytes().len() >= 4 && v.as_bytes()[..4].eq_ignore_ascii_case(b"100-"))
    }
}

impl From<Parts> for RequestHeader {
    #[inline]
    fn from(parts: Parts) -> Self {
        Self { inner: Request::from_parts(parts, ()) }
    }
}

impl From<Request<()>> for RequestHeader {
    #[inline]
    fn from(inner: Request<()>) -> Self {
        Self { inner }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(version: Version, connection: Option<&str>) -> RequestHeader {
        let mut builder = Request::builder().method(Method::GET).uri("/").version(version);
        if let Some(value) = connection {
            builder = builder.header(header::CONNECTION, value);
        }
        builder.body(()).unwrap().into()
    }

    #[test]
    fn keep_alive_defaults() {
        assert!(header(Version::HTTP_11, None).keep_alive());
        assert!(!header(Version::HTTP_11, Some("close")).keep_alive());
        assert!(!header(Version::HTTP_10, None).keep_alive());
        assert!(header(Version::HTTP_10, Some("Keep-Alive")).keep_alive());
    }

    #[test]
    fn need_body() {
        let get: RequestHeader = Request::get("/").body(()).unwrap().into();
        let post: RequestHeader = Request::post("/").body(()).unwrap().into();
        assert!(!get.need_body());
        assert!(post.need_body());
    }

    #[test]
    fn expect_continue() {
        let req: RequestHeader = Request::post("/").header(header::EXPECT, "100-continue").body(()).unwrap().into();
        assert!(req.expects_continue());
        assert!(!header(Version::HTTP_11, None).expects_continue());
    }
}
