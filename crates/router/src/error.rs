use thiserror::Error;

/// Raised when a route pattern can not be registered.
///
/// Registration happens before serving, so this error is fatal to startup.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("greedy wildcard must be the last segment of pattern '{pattern}'")]
    NonTrailingWildcard { pattern: String },

    #[error("duplicate parameter name '{name}' in pattern '{pattern}'")]
    DuplicateParam { pattern: String, name: String },

    #[error("empty parameter name in pattern '{pattern}'")]
    EmptyParamName { pattern: String },

    #[error("malformed greedy wildcard '{segment}' in pattern '{pattern}', expected '**' or '**:name'")]
    MalformedWildcard { pattern: String, segment: String },
}

impl ConfigurationError {
    pub fn non_trailing_wildcard<S: ToString>(pattern: S) -> Self {
        Self::NonTrailingWildcard { pattern: pattern.to_string() }
    }

    pub fn duplicate_param<S: ToString, N: ToString>(pattern: S, name: N) -> Self {
        Self::DuplicateParam { pattern: pattern.to_string(), name: name.to_string() }
    }

    pub fn empty_param_name<S: ToString>(pattern: S) -> Self {
        Self::EmptyParamName { pattern: pattern.to_string() }
    }

    pub fn malformed_wildcard<S: ToString, G: ToString>(pattern: S, segment: G) -> Self {
        Self::MalformedWildcard { pattern: pattern.to_string(), segment: segment.to_string() }
    }
}
