use tracing::debug;

/// Decoded query parameters in their original order; a name may repeat.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryMap {
    pairs: Vec<(String, String)>,
}

impl QueryMap {
    /// The first value of `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.pairs.iter().find(|(key, _)| key == name).map(|(_, value)| value.as_str())
    }

    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.pairs.iter().filter(move |(key, _)| key == name).map(|(_, value)| value.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.pairs.iter().any(|(key, _)| key == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(key, value)| (key.as_str(), value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

impl From<Vec<(String, String)>> for QueryMap {
    fn from(pairs: Vec<(String, String)>) -> Self {
        Self { pairs }
    }
}

/// Parses a URL search component (without the leading `?`).
///
/// Percent escapes are decoded and `+` stands for a space. An undecodable query yields an
/// empty map.
pub fn parse_query_string(raw: &str) -> QueryMap {
    let raw = raw.strip_prefix('?').unwrap_or(raw);
    match serde_urlencoded::from_str::<Vec<(String, String)>>(raw) {
        Ok(pairs) => QueryMap { pairs },
        Err(e) => {
            debug!(cause = %e, "ignoring undecodable query string");
            QueryMap::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_pairs() {
        let query = parse_query_string("name=J%C3%BCrgen+Smith&tag=a&tag=b&empty=");
        assert_eq!(query.get("name"), Some("Jürgen Smith"));
        assert_eq!(query.get_all("tag").collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(query.get("empty"), Some(""));
        assert_eq!(query.get("missing"), None);
        assert_eq!(query.len(), 4);
    }

    #[test]
    fn flag_without_value() {
        let query = parse_query_string("?debug&x=1");
        assert!(query.contains("debug"));
        assert_eq!(query.get("debug"), Some(""));
        assert_eq!(query.get("x"), Some("1"));
    }

    #[test]
    fn empty_query() {
        assert!(parse_query_string("").is_empty());
    }
}
