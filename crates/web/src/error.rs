//! Error taxonomy of the dispatch pipeline.
//!
//! - [`HandlerError`]: raised by user code, rendered as a JSON error response
//! - [`LateWriteError`]: a write after the response was finalized, logged and swallowed
//! - [`SerializationError`]: a value that cannot be represented as JSON
//! - [`AbortedError`]: the client went away before a response was finalized
//! - [`ConfigurationError`]: an invalid route registration, raised at startup

use std::error::Error;
use std::fmt;

use http::StatusCode;
use serde::Serialize;
use thiserror::Error;

pub use quill_router::ConfigurationError;

pub type BoxError = Box<dyn Error + Send + Sync>;

/// An error produced by a handler.
///
/// Any `std::error::Error` converts into a `HandlerError` through `?`. Such errors are marked
/// *unhandled*: they answer `500` and their message is only shown to clients in debug mode.
/// Errors built with the constructors below are *handled* and rendered as they are.
#[derive(Debug)]
pub struct HandlerError {
    status: StatusCode,
    status_message: Option<String>,
    message: String,
    data: Option<serde_json::Value>,
    unhandled: bool,
    source: Option<BoxError>,
}

impl HandlerError {
    pub fn new<S: Into<String>>(status: StatusCode, message: S) -> Self {
        Self { status, status_message: None, message: message.into(), data: None, unhandled: false, source: None }
    }

    /// Builds an error from a raw status code; codes outside `100..=999` become `500`.
    pub fn from_code<S: Into<String>>(code: u16, message: S) -> Self {
        Self::new(sanitize_status(code, StatusCode::INTERNAL_SERVER_ERROR), message)
    }

    pub fn bad_request<S: Into<String>>(message: S) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized<S: Into<String>>(message: S) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn forbidden<S: Into<String>>(message: S) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub fn not_found<S: Into<String>>(message: S) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    /// Wraps an arbitrary error as an unhandled `500`.
    pub fn unhandled<E: Into<BoxError>>(source: E) -> Self {
        let source = source.into();
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            status_message: None,
            message: source.to_string(),
            data: None,
            unhandled: true,
            source: Some(source),
        }
    }

    /// Overrides the status message, control characters are stripped.
    #[must_use]
    pub fn with_status_message<S: AsRef<str>>(mut self, status_message: S) -> Self {
        self.status_message = Some(strip_control(status_message.as_ref()));
        self
    }

    #[must_use]
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// The custom status message, or the canonical reason of the status.
    pub fn status_message(&self) -> &str {
        match &self.status_message {
            Some(message) => message,
            None => self.status.canonical_reason().unwrap_or_default(),
        }
    }

    pub(crate) fn custom_status_message(&self) -> Option<&str> {
        self.status_message.as_deref()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn data(&self) -> Option<&serde_json::Value> {
        self.data.as_ref()
    }

    pub fn is_unhandled(&self) -> bool {
        self.unhandled
    }

    pub fn source(&self) -> Option<&(dyn Error + Send + Sync + 'static)> {
        self.source.as_deref()
    }

    /// The JSON document sent to the client.
    ///
    /// The message of an unhandled error is replaced by the status message unless `expose`
    /// is set.
    pub fn to_body(&self, expose: bool) -> ErrorBody<'_> {
        let message = if self.unhandled && !expose { self.status_message() } else { &self.message };
        ErrorBody { status_code: self.status.as_u16(), status_message: self.status_message(), message, data: self.data.as_ref() }
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.status.as_u16(), self.message)
    }
}

impl<E> From<E> for HandlerError
where
    E: Error + Send + Sync + 'static,
{
    fn from(e: E) -> Self {
        Self::unhandled(e)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody<'a> {
    pub status_code: u16,
    pub status_message: &'a str,
    pub message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<&'a serde_json::Value>,
}

/// A response write attempted after the response was finalized.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("cannot {action}: the response was already sent")]
pub struct LateWriteError {
    action: &'static str,
}

impl LateWriteError {
    pub fn new(action: &'static str) -> Self {
        Self { action }
    }
}

/// A reply value that cannot be represented as JSON.
#[derive(Error, Debug)]
#[error("cannot serialize response value: {source}")]
pub struct SerializationError {
    #[from]
    source: serde_json::Error,
}

/// The client closed the connection before a response was finalized.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("request aborted, the connection was closed")]
pub struct AbortedError;

/// Maps `code` to a status, falling back to `default` outside `100..=999`.
pub fn sanitize_status(code: u16, default: StatusCode) -> StatusCode {
    StatusCode::from_u16(code).unwrap_or(default)
}

pub(crate) fn strip_control(text: &str) -> String {
    text.chars().filter(|c| !c.is_control()).collect()
}
