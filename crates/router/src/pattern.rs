//! Route pattern parsing.
//!
//! A pattern is split on `/` into segments:
//!
//! - `users` - static literal, matched exactly
//! - `:id` - named parameter, matches one non-empty segment
//! - `*` - unnamed single segment wildcard, captured as `_0`, `_1`, ...
//! - `**` - greedy wildcard, captures the rest of the path as `_`
//! - `**:rest` - named greedy wildcard
//!
//! A greedy wildcard is only valid as the last segment.

use std::collections::HashSet;
use std::sync::Arc;

use crate::ConfigurationError;

/// Name under which an unnamed greedy wildcard is captured.
pub const CATCH_ALL_NAME: &str = "_";

/// One `/` delimited component of a route pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Static(String),
    Param(String),
    Wildcard { name: Option<String>, greedy: bool },
}

impl Segment {
    /// `None` for a `**` prefix followed by anything but `:name`.
    fn parse(raw: &str) -> Option<Self> {
        if let Some(rest) = raw.strip_prefix("**") {
            let name = match rest.strip_prefix(':') {
                Some(name) => Some(name).filter(|n| !n.is_empty()).map(str::to_owned),
                None if rest.is_empty() => None,
                None => return None,
            };
            return Some(Segment::Wildcard { name, greedy: true });
        }

        if raw == "*" {
            return Some(Segment::Wildcard { name: None, greedy: false });
        }

        Some(match raw.strip_prefix(':') {
            Some(name) => Segment::Param(name.to_owned()),
            None => Segment::Static(raw.to_owned()),
        })
    }

    #[inline]
    pub fn is_greedy(&self) -> bool {
        matches!(self, Segment::Wildcard { greedy: true, .. })
    }
}

/// A parsed, validated route pattern.
#[derive(Debug, Clone)]
pub struct Pattern {
    raw: Arc<str>,
    segments: Vec<Segment>,
    capture_names: Arc<[Arc<str>]>,
}

impl Pattern {
    /// Parses and validates `raw`.
    ///
    /// An empty pattern is treated as `/`, a missing leading slash is added.
    pub fn parse(raw: &str) -> Result<Self, ConfigurationError> {
        let raw: Arc<str> = match raw {
            "" => Arc::from("/"),
            r if r.starts_with('/') => Arc::from(r),
            r => Arc::from(format!("/{r}")),
        };

        let segments = split_path(&raw)
            .into_iter()
            .map(|segment| {
                Segment::parse(segment).ok_or_else(|| ConfigurationError::malformed_wildcard(&raw, segment))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut names: Vec<Arc<str>> = Vec::new();
        let mut seen = HashSet::new();
        let mut unnamed = 0usize;

        for (index, segment) in segments.iter().enumerate() {
            let name = match segment {
                Segment::Static(_) => continue,
                Segment::Param(name) if name.is_empty() => {
                    return Err(ConfigurationError::empty_param_name(&raw));
                }
                Segment::Param(name) => name.clone(),
                Segment::Wildcard { greedy: false, .. } => {
                    let name = format!("_{unnamed}");
                    unnamed += 1;
                    name
                }
                Segment::Wildcard { name, greedy: true } => {
                    if index + 1 != segments.len() {
                        return Err(ConfigurationError::non_trailing_wildcard(&raw));
                    }
                    name.clone().unwrap_or_else(|| CATCH_ALL_NAME.to_owned())
                }
            };

            if !seen.insert(name.clone()) {
                return Err(ConfigurationError::duplicate_param(&raw, name));
            }
            names.push(Arc::from(name));
        }

        Ok(Self { raw, segments, capture_names: names.into() })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Names of the captured values, in path order.
    pub fn capture_names(&self) -> &[Arc<str>] {
        &self.capture_names
    }

    pub(crate) fn shared_raw(&self) -> Arc<str> {
        Arc::clone(&self.raw)
    }

    pub(crate) fn shared_names(&self) -> Arc<[Arc<str>]> {
        Arc::clone(&self.capture_names)
    }
}

/// Splits a path into segments after its leading slash.
///
/// `/` yields no segments, a trailing slash yields a trailing empty segment.
pub fn split_path(path: &str) -> Vec<&str> {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    if trimmed.is_empty() { Vec::new() } else { trimmed.split('/').collect() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_segments() {
        let pattern = Pattern::parse("/users/:id/files/*/**:rest").unwrap();
        assert_eq!(
            pattern.segments(),
            &[
                Segment::Static("users".into()),
                Segment::Param("id".into()),
                Segment::Static("files".into()),
                Segment::Wildcard { name: None, greedy: false },
                Segment::Wildcard { name: Some("rest".into()), greedy: true },
            ]
        );

        let names: Vec<&str> = pattern.capture_names().iter().map(|n| n.as_ref()).collect();
        assert_eq!(names, vec!["id", "_0", "rest"]);
    }

    #[test]
    fn empty_and_relative_patterns() {
        assert_eq!(Pattern::parse("").unwrap().as_str(), "/");
        assert_eq!(Pattern::parse("users").unwrap().as_str(), "/users");
        assert!(Pattern::parse("/").unwrap().segments().is_empty());
    }

    #[test]
    fn trailing_slash_is_a_segment() {
        let pattern = Pattern::parse("/users/").unwrap();
        assert_eq!(pattern.segments(), &[Segment::Static("users".into()), Segment::Static(String::new())]);
    }

    #[test]
    fn reject_non_trailing_wildcard() {
        let err = Pattern::parse("/files/**/meta").unwrap_err();
        assert_eq!(err, ConfigurationError::non_trailing_wildcard("/files/**/meta"));
    }

    #[test]
    fn reject_duplicate_params() {
        let err = Pattern::parse("/a/:id/b/:id").unwrap_err();
        assert_eq!(err, ConfigurationError::duplicate_param("/a/:id/b/:id", "id"));

        let err = Pattern::parse("/a/:_0/*").unwrap_err();
        assert_eq!(err, ConfigurationError::duplicate_param("/a/:_0/*", "_0"));
    }

    #[test]
    fn reject_empty_param_name() {
        assert_eq!(Pattern::parse("/a/:").unwrap_err(), ConfigurationError::empty_param_name("/a/:"));
    }

    #[test]
    fn reject_malformed_greedy_wildcard() {
        assert_eq!(
            Pattern::parse("/files/**rest").unwrap_err(),
            ConfigurationError::malformed_wildcard("/files/**rest", "**rest")
        );
        assert!(Pattern::parse("/files/***").is_err());

        // `**:` keeps the default capture name
        let pattern = Pattern::parse("/files/**:").unwrap();
        assert_eq!(pattern.capture_names().first().map(|n| n.as_ref()), Some(CATCH_ALL_NAME));
    }

    #[test]
    fn split() {
        assert!(split_path("/").is_empty());
        assert!(split_path("").is_empty());
        assert_eq!(split_path("/a/b"), vec!["a", "b"]);
        assert_eq!(split_path("/a/"), vec!["a", ""]);
        assert_eq!(split_path("//a"), vec!["", "a"]);
    }
}
