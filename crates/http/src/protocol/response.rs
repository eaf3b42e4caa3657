//! Response head types.
//!
//! A response head is an `http::Response<()>`; the body is written separately as frames.

use http::Response;

/// The head of a response before its body frames.
pub type ResponseHead = Response<()>;

/// Custom reason phrase for the status line.
///
/// Stored in the head's extensions; the canonical reason of the status code is used
/// when absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReasonPhrase(String);

impl ReasonPhrase {
    /// Builds a reason phrase with control characters removed.
    pub fn new<S: AsRef<str>>(phrase: S) -> Self {
        Self(phrase.as_ref().chars().filter(|c| !c.is_control()).collect())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}
