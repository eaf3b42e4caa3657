//! Errors of the HTTP/1.1 transport.
//!
//! Reading a request fails with [`ParseError`], writing a response with [`SendError`]; both
//! end the connection and surface from `HttpConnection::process` as [`HttpError`].

use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("request error: {source}")]
    RequestError {
        #[from]
        source: ParseError,
    },

    #[error("response error: {source}")]
    ResponseError {
        #[from]
        source: SendError,
    },
}

/// The request on the wire could not be read.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("request head of {current_size} bytes exceeds the limit of {max_size}")]
    TooLargeHeader { current_size: usize, max_size: usize },

    #[error("request has more than {max_num} headers")]
    TooManyHeaders { max_num: usize },

    #[error("invalid header: {reason}")]
    InvalidHeader { reason: String },

    #[error("unsupported http version: {0:?}")]
    InvalidVersion(Option<u8>),

    #[error("invalid http method")]
    InvalidMethod,

    #[error("invalid request target")]
    InvalidUri,

    #[error("invalid content-length header: {reason}")]
    InvalidContentLength { reason: String },

    #[error("invalid request body: {reason}")]
    InvalidBody { reason: String },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl ParseError {
    pub fn too_large_header(current_size: usize, max_size: usize) -> Self {
        Self::TooLargeHeader { current_size, max_size }
    }

    pub fn too_many_headers(max_num: usize) -> Self {
        Self::TooManyHeaders { max_num }
    }

    pub fn invalid_header<S: ToString>(reason: S) -> Self {
        Self::InvalidHeader { reason: reason.to_string() }
    }

    pub fn invalid_body<S: ToString>(reason: S) -> Self {
        Self::InvalidBody { reason: reason.to_string() }
    }

    pub fn invalid_content_length<S: ToString>(reason: S) -> Self {
        Self::InvalidContentLength { reason: reason.to_string() }
    }

    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self::Io { source: e.into() }
    }

    /// Whether the peer went away rather than sent something malformed.
    pub fn is_disconnect(&self) -> bool {
        let ParseError::Io { source } = self else { return false };
        matches!(
            source.kind(),
            io::ErrorKind::UnexpectedEof
                | io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::BrokenPipe
        )
    }
}

/// The response could not be written.
#[derive(Error, Debug)]
pub enum SendError {
    /// The body frames disagree with the announced payload size.
    #[error("invalid response body: {reason}")]
    InvalidBody { reason: String },

    /// Frames arrived out of order, e.g. a chunk before the head.
    #[error("invalid response frame: {reason}")]
    InvalidFrame { reason: &'static str },

    /// The connection task stopped accepting frames.
    #[error("connection closed")]
    Closed,

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl SendError {
    pub fn invalid_body<S: ToString>(reason: S) -> Self {
        Self::InvalidBody { reason: reason.to_string() }
    }

    pub fn invalid_frame(reason: &'static str) -> Self {
        Self::InvalidFrame { reason }
    }

    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self::Io { source: e.into() }
    }
}
