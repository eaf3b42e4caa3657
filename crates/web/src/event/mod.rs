//! The per-request [`Event`].
//!
//! An event exclusively owns the transport of one request. Everything derived from the
//! request (query, body bytes, text, JSON, form, multipart) is computed at most once and
//! cached on the event; the response is staged on it until the pipeline finalizes it.

mod stream;
mod transport;
mod value;

pub use stream::StreamTransport;
pub use transport::Transport;
pub use value::{ResponseReceiver, ValueTransport};

use std::error::Error;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use http::header::{self, HeaderName};
use http::{Extensions, HeaderMap, HeaderValue, Method, Request, Response, StatusCode, Uri, Version};
use once_cell::unsync::OnceCell;
use quill_http::connection::Exchange;
use quill_router::Params;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::body::BodyStream;
use crate::codec::{Part, QueryMap, parse_boundary, parse_multipart, parse_query_string, parse_urlencoded};
use crate::error::{AbortedError, HandlerError, LateWriteError, sanitize_status, strip_control};
use crate::reply::{IntoReply, Reply};
use crate::resolver;

/// Open-ended per-request storage: router captures, the matched pattern and typed user data.
#[derive(Debug, Default)]
pub struct Context {
    params: Params,
    matched_route: Option<Arc<str>>,
    extensions: Extensions,
}

impl Context {
    pub fn params(&self) -> &Params {
        &self.params
    }

    /// The pattern of the terminal route that matched, e.g. `/users/:id`.
    pub fn matched_route(&self) -> Option<&str> {
        self.matched_route.as_deref()
    }

    pub fn get<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.extensions.get::<T>()
    }

    pub fn get_mut<T: Send + Sync + 'static>(&mut self) -> Option<&mut T> {
        self.extensions.get_mut::<T>()
    }

    /// Stores `value`, returning the previous value of the same type.
    pub fn insert<T: Clone + Send + Sync + 'static>(&mut self, value: T) -> Option<T> {
        self.extensions.insert(value)
    }

    pub fn remove<T: Send + Sync + 'static>(&mut self) -> Option<T> {
        self.extensions.remove::<T>()
    }

    pub(crate) fn set_route(&mut self, params: Params, pattern: &str) {
        self.params = params;
        self.matched_route = Some(Arc::from(pattern));
    }
}

/// The response as staged by handlers before it is finalized.
#[derive(Debug)]
pub(crate) struct Staged {
    pub(crate) status: StatusCode,
    pub(crate) status_text: Option<String>,
    pub(crate) headers: HeaderMap,
}

impl Default for Staged {
    fn default() -> Self {
        Self { status: StatusCode::OK, status_text: None, headers: HeaderMap::new() }
    }
}

#[derive(Debug)]
enum BodyState {
    Unread,
    Buffered(Bytes),
    Streamed,
}

type CloseCallback = Box<dyn FnOnce() + Send>;

/// One request moving through the dispatch pipeline.
pub struct Event {
    transport: Box<dyn Transport>,
    path: Option<String>,
    query: OnceCell<QueryMap>,
    body: BodyState,
    text: Option<String>,
    json: Option<serde_json::Value>,
    form: Option<Vec<(String, String)>>,
    multipart: Option<Vec<Part>>,
    staged: Staged,
    context: Context,
    on_close: Vec<CloseCallback>,
    handled: bool,
    expose_errors: bool,
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("method", self.method())
            .field("path", &self.path())
            .field("handled", &self.handled)
            .field("staged", &self.staged)
            .finish_non_exhaustive()
    }
}

impl Event {
    pub fn new<T: Transport + 'static>(transport: T) -> Self {
        Self {
            transport: Box::new(transport),
            path: None,
            query: OnceCell::new(),
            body: BodyState::Unread,
            text: None,
            json: None,
            form: None,
            multipart: None,
            staged: Staged::default(),
            context: Context::default(),
            on_close: Vec::new(),
            handled: false,
            expose_errors: false,
        }
    }

    /// An event on the streaming backend.
    pub fn from_exchange(exchange: Exchange) -> Self {
        Self::new(StreamTransport::new(exchange))
    }

    /// An event on the immutable backend; the response arrives on the returned receiver.
    pub fn from_request(request: Request<Bytes>) -> (Self, ResponseReceiver) {
        let (transport, rx) = ValueTransport::new(request);
        (Self::new(transport), rx)
    }

    pub fn method(&self) -> &Method {
        &self.transport.head().method
    }

    pub fn uri(&self) -> &Uri {
        &self.transport.head().uri
    }

    pub fn version(&self) -> Version {
        self.transport.head().version
    }

    /// The path the current handler sees, without the query.
    ///
    /// Inside a middleware registered under a prefix this is the remainder after the prefix.
    pub fn path(&self) -> &str {
        match &self.path {
            Some(path) => path,
            None => self.original_path(),
        }
    }

    /// The full request path, regardless of the middleware prefix currently applied.
    pub fn original_path(&self) -> &str {
        match self.uri().path() {
            "" => "/",
            path => path,
        }
    }

    pub(crate) fn replace_path(&mut self, path: Option<String>) -> Option<String> {
        std::mem::replace(&mut self.path, path)
    }

    pub fn request_headers(&self) -> &HeaderMap {
        &self.transport.head().headers
    }

    /// The value of a request header; repeated headers are joined with `", "`.
    pub fn request_header(&self, name: &str) -> Option<String> {
        join_values(self.request_headers(), name)
    }

    pub fn query(&self) -> &QueryMap {
        self.query.get_or_init(|| parse_query_string(self.transport.head().uri.query().unwrap_or_default()))
    }

    pub fn query_value(&self, name: &str) -> Option<&str> {
        self.query().get(name)
    }

    /// Deserializes the query string, nested keys (`a[b]=1`) included.
    pub fn query_as<T: DeserializeOwned>(&self) -> Result<T, HandlerError> {
        serde_qs::from_str(self.uri().query().unwrap_or_default())
            .map_err(|e| HandlerError::bad_request(format!("invalid query string: {e}")))
    }

    pub fn params(&self) -> &Params {
        &self.context.params
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.context.params.get(name)
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut Context {
        &mut self.context
    }

    fn carries_body(&self) -> bool {
        !matches!(*self.method(), Method::GET | Method::HEAD)
    }

    /// The whole request body. The transport is read at most once.
    pub async fn raw_body(&mut self) -> Result<Bytes, HandlerError> {
        if !self.carries_body() {
            return Ok(Bytes::new());
        }
        if let BodyState::Buffered(bytes) = &self.body {
            return Ok(bytes.clone());
        }
        if matches!(self.body, BodyState::Streamed) {
            return Err(body_consumed());
        }
        let bytes = self.transport.read_body().await?;
        self.body = BodyState::Buffered(bytes.clone());
        Ok(bytes)
    }

    pub async fn text_body(&mut self) -> Result<&str, HandlerError> {
        if self.text.is_none() {
            let raw = self.raw_body().await?;
            let text = String::from_utf8(raw.to_vec())
                .map_err(|_invalid| HandlerError::bad_request("request body is not valid UTF-8"))?;
            self.text = Some(text);
        }
        Ok(self.text.as_deref().unwrap_or_default())
    }

    /// Deserializes the JSON body; an empty body reads as `null`.
    pub async fn json_body<T: DeserializeOwned>(&mut self) -> Result<T, HandlerError> {
        if self.json.is_none() {
            let text = self.text_body().await?;
            let value = if text.trim().is_empty() {
                serde_json::Value::Null
            } else {
                serde_json::from_str(text).map_err(|e| HandlerError::bad_request(format!("invalid JSON body: {e}")))?
            };
            self.json = Some(value);
        }
        let value = self.json.clone().unwrap_or_default();
        serde_json::from_value(value).map_err(|e| HandlerError::bad_request(format!("unexpected JSON body: {e}")))
    }

    /// The `application/x-www-form-urlencoded` body as ordered pairs.
    pub async fn form_body(&mut self) -> Result<&[(String, String)], HandlerError> {
        if self.form.is_none() {
            let raw = self.raw_body().await?;
            let pairs = parse_urlencoded(&raw).map_err(|e| HandlerError::bad_request(e.to_string()))?;
            self.form = Some(pairs);
        }
        Ok(self.form.as_deref().unwrap_or_default())
    }

    /// The parts of a `multipart/form-data` body, `None` for any other content type.
    pub async fn multipart_form_data(&mut self) -> Result<Option<&[Part]>, HandlerError> {
        let Some(boundary) = self.request_header(header::CONTENT_TYPE.as_str()).as_deref().and_then(parse_boundary)
        else {
            return Ok(None);
        };
        if self.multipart.is_none() {
            let raw = self.raw_body().await?;
            let parts = parse_multipart(&raw, &boundary).map_err(|e| HandlerError::bad_request(e.to_string()))?;
            self.multipart = Some(parts);
        }
        Ok(self.multipart.as_deref())
    }

    /// The request body as a stream.
    ///
    /// Once the live stream was handed out the buffered accessors fail; if the body was
    /// already buffered, the stream replays the cached bytes.
    pub fn body_stream(&mut self) -> Result<BodyStream, HandlerError> {
        if !self.carries_body() {
            return Ok(BodyStream::empty());
        }
        match std::mem::replace(&mut self.body, BodyState::Streamed) {
            BodyState::Buffered(bytes) => {
                self.body = BodyState::Buffered(bytes.clone());
                Ok(BodyStream::once(bytes))
            }
            BodyState::Streamed => Err(body_consumed()),
            BodyState::Unread => self.transport.take_body_stream().ok_or_else(body_consumed),
        }
    }

    /// Whether the response was finalized or the client is gone.
    pub fn handled(&self) -> bool {
        self.handled || self.transport.close_signal().is_cancelled()
    }

    pub fn close_signal(&self) -> CancellationToken {
        self.transport.close_signal().clone()
    }

    /// Registers a callback that runs exactly once when the exchange finishes.
    pub fn on_close<F: FnOnce() + Send + 'static>(&mut self, callback: F) {
        self.on_close.push(Box::new(callback));
    }

    pub(crate) fn finish(&mut self) {
        for callback in self.on_close.drain(..) {
            callback();
        }
    }

    fn writable(&self, action: &'static str) -> bool {
        if self.handled() {
            warn!(cause = %LateWriteError::new(action), path = %self.original_path(), "ignoring write to a finished response");
            return false;
        }
        true
    }

    /// Stages the response status; codes outside `100..=999` become `200`.
    pub fn set_response_status(&mut self, code: u16, text: Option<&str>) {
        if !self.writable("set the response status") {
            return;
        }
        self.staged.status = sanitize_status(code, StatusCode::OK);
        self.staged.status_text = text.map(strip_control);
    }

    pub fn response_status(&self) -> StatusCode {
        self.staged.status
    }

    pub fn response_status_text(&self) -> Option<&str> {
        self.staged.status_text.as_deref()
    }

    pub fn response_headers(&self) -> &HeaderMap {
        &self.staged.headers
    }

    pub fn response_header(&self, name: &str) -> Option<String> {
        join_values(&self.staged.headers, name)
    }

    /// Replaces the staged values of a response header.
    pub fn set_response_header<K, V>(&mut self, name: K, value: V) -> Result<(), HandlerError>
    where
        K: TryInto<HeaderName>,
        K::Error: Error + Send + Sync + 'static,
        V: TryInto<HeaderValue>,
        V::Error: Error + Send + Sync + 'static,
    {
        if self.writable("set a response header") {
            self.staged.headers.insert(name.try_into()?, value.try_into()?);
        }
        Ok(())
    }

    pub fn append_response_header<K, V>(&mut self, name: K, value: V) -> Result<(), HandlerError>
    where
        K: TryInto<HeaderName>,
        K::Error: Error + Send + Sync + 'static,
        V: TryInto<HeaderValue>,
        V::Error: Error + Send + Sync + 'static,
    {
        if self.writable("append a response header") {
            self.staged.headers.append(name.try_into()?, value.try_into()?);
        }
        Ok(())
    }

    pub fn remove_response_header(&mut self, name: &str) {
        if self.writable("remove a response header") {
            self.staged.headers.remove(name);
        }
    }

    /// Resolves `reply` against the staged response and finalizes it.
    ///
    /// A `Reply::Continue` sends nothing.
    pub async fn send<R: IntoReply>(&mut self, reply: R) -> Result<(), AbortedError> {
        self.respond(reply.into_reply()).await.map(|_sent| ())
    }

    /// Redirects to `location` with `code` (`302` when out of range).
    pub async fn send_redirect(&mut self, location: &str, code: u16) -> Result<(), HandlerError> {
        let status = sanitize_status(code, StatusCode::FOUND);
        let body = format!(
            r#"<!DOCTYPE html><html><head><meta http-equiv="refresh" content="0; url={}"></head></html>"#,
            escape_html(location)
        );
        let response = Response::builder()
            .status(status)
            .header(header::LOCATION, HeaderValue::try_from(location)?)
            .header(header::CONTENT_TYPE, mime::TEXT_HTML_UTF_8.as_ref())
            .body(body.into())?;
        self.send(Reply::Response(response)).await?;
        Ok(())
    }

    pub async fn send_no_content(&mut self) -> Result<(), AbortedError> {
        self.send(Reply::NoContent).await
    }

    /// Returns whether the reply finalized the response (or it already was).
    pub(crate) async fn respond(&mut self, reply: Reply) -> Result<bool, AbortedError> {
        if !self.writable("send a response") {
            return Ok(true);
        }
        let Some(response) = resolver::resolve(&self.staged, reply, self.expose_errors) else {
            return Ok(false);
        };
        self.finalize(response).await?;
        Ok(true)
    }

    /// Sends `response` as is, bypassing the staged response.
    pub(crate) async fn finalize(&mut self, response: Response<crate::body::ResponseBody>) -> Result<(), AbortedError> {
        self.handled = true;
        self.transport.send(response).await
    }

    pub(crate) fn set_expose_errors(&mut self, expose: bool) {
        self.expose_errors = expose;
    }
}

impl Drop for Event {
    fn drop(&mut self) {
        self.finish();
    }
}

fn body_consumed() -> HandlerError {
    HandlerError::bad_request("request body has already been consumed")
}

fn join_values(headers: &HeaderMap, name: &str) -> Option<String> {
    let mut values = headers.get_all(name).iter().map(|value| String::from_utf8_lossy(value.as_bytes()));
    let first = values.next()?;
    Some(values.fold(first.into_owned(), |mut joined, value| {
        joined.push_str(", ");
        joined.push_str(&value);
        joined
    }))
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '"' => escaped.push_str("&quot;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            c => escaped.push(c),
        }
    }
    escaped
}
