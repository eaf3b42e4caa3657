//! Pure body and URL codecs over buffered bytes.
//!
//! None of these touch the transport; the event layer feeds them the memoized request body
//! or the URL query component.

mod form;
mod multipart;
mod query;

pub use form::parse_urlencoded;
pub use multipart::{Part, parse_boundary, parse_multipart};
pub use query::{QueryMap, parse_query_string};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("invalid urlencoded body: {0}")]
    Urlencoded(#[from] serde_urlencoded::de::Error),
    #[error("invalid multipart body: {reason}")]
    Multipart { reason: &'static str },
}

impl CodecError {
    pub(crate) fn multipart(reason: &'static str) -> Self {
        Self::Multipart { reason }
    }
}
