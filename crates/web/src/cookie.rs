//! Reading and writing cookies on an [`Event`].

use std::fmt;

use http::header;
use quill_router::percent_decode;

use crate::error::HandlerError;
use crate::event::Event;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl SameSite {
    pub fn as_str(self) -> &'static str {
        match self {
            SameSite::Strict => "Strict",
            SameSite::Lax => "Lax",
            SameSite::None => "None",
        }
    }
}

/// A `Set-Cookie` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    name: String,
    value: String,
    path: Option<String>,
    domain: Option<String>,
    max_age: Option<i64>,
    secure: bool,
    http_only: bool,
    same_site: Option<SameSite>,
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            path: None,
            domain: None,
            max_age: None,
            secure: false,
            http_only: false,
            same_site: None,
        }
    }

    /// An expired, empty cookie that makes the client drop `name`.
    pub fn removal(name: impl Into<String>) -> Self {
        Self::new(name, "").max_age(0)
    }

    #[must_use]
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    #[must_use]
    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    #[must_use]
    pub fn max_age(mut self, seconds: i64) -> Self {
        self.max_age = Some(seconds);
        self
    }

    #[must_use]
    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    #[must_use]
    pub fn http_only(mut self, http_only: bool) -> Self {
        self.http_only = http_only;
        self
    }

    #[must_use]
    pub fn same_site(mut self, same_site: SameSite) -> Self {
        self.same_site = Some(same_site);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

/// Renders the `Set-Cookie` header value.
impl fmt::Display for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.value)?;
        if let Some(path) = &self.path {
            write!(f, "; Path={path}")?;
        }
        if let Some(domain) = &self.domain {
            write!(f, "; Domain={domain}")?;
        }
        if let Some(max_age) = self.max_age {
            write!(f, "; Max-Age={max_age}")?;
        }
        if self.secure {
            f.write_str("; Secure")?;
        }
        if self.http_only {
            f.write_str("; HttpOnly")?;
        }
        if let Some(same_site) = self.same_site {
            write!(f, "; SameSite={}", same_site.as_str())?;
        }
        Ok(())
    }
}

/// Parses a `Cookie` request header into name/value pairs, values percent-decoded.
///
/// Entries without `=` are skipped; surrounding double quotes are removed from values.
pub fn parse_cookies(header: &str) -> Vec<(String, String)> {
    header
        .split(';')
        .filter_map(|pair| {
            let (name, value) = pair.split_once('=')?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            let value = value.trim();
            let value = value.strip_prefix('"').and_then(|v| v.strip_suffix('"')).unwrap_or(value);
            Some((name.to_owned(), percent_decode(value).into_owned()))
        })
        .collect()
}

/// The first cookie named `name` across all `Cookie` headers of the request.
pub fn get_cookie(event: &Event, name: &str) -> Option<String> {
    event
        .request_headers()
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(parse_cookies)
        .find_map(|(key, value)| (key == name).then_some(value))
}

/// Stages a `Set-Cookie` header, replacing one staged earlier for the same name.
pub fn set_cookie(event: &mut Event, cookie: &Cookie) -> Result<(), HandlerError> {
    let prefix = format!("{}=", cookie.name);
    let kept: Vec<_> = event
        .response_headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter(|value| !value.as_bytes().starts_with(prefix.as_bytes()))
        .cloned()
        .collect();

    event.remove_response_header(header::SET_COOKIE.as_str());
    for value in kept {
        event.append_response_header(header::SET_COOKIE, value)?;
    }
    event.append_response_header(header::SET_COOKIE, cookie.to_string())
}

pub fn delete_cookie(event: &mut Event, name: &str) -> Result<(), HandlerError> {
    set_cookie(event, &Cookie::removal(name).path("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http::Request;

    #[test]
    fn parse_header() {
        let cookies = parse_cookies(r#"a=1; b = two%20words ;broken; c="quoted"; =nameless"#);
        assert_eq!(
            cookies,
            vec![
                ("a".to_owned(), "1".to_owned()),
                ("b".to_owned(), "two words".to_owned()),
                ("c".to_owned(), "quoted".to_owned()),
            ]
        );
    }

    #[test]
    fn render() {
        let cookie = Cookie::new("sid", "abc").path("/").max_age(60).secure(true).http_only(true).same_site(SameSite::Lax);
        assert_eq!(cookie.to_string(), "sid=abc; Path=/; Max-Age=60; Secure; HttpOnly; SameSite=Lax");
        assert_eq!(Cookie::removal("sid").to_string(), "sid=; Max-Age=0");
    }

    #[test]
    fn read_from_event() {
        let request = Request::builder()
            .header("cookie", "theme=dark")
            .header("cookie", "lang=en; theme=light")
            .body(Bytes::new())
            .unwrap();
        let (event, _rx) = Event::from_request(request);

        assert_eq!(get_cookie(&event, "theme").as_deref(), Some("dark"));
        assert_eq!(get_cookie(&event, "lang").as_deref(), Some("en"));
        assert!(get_cookie(&event, "missing").is_none());
    }

    #[test]
    fn write_to_event() {
        let (mut event, _rx) = Event::from_request(Request::new(Bytes::new()));
        set_cookie(&mut event, &Cookie::new("a", "1")).unwrap();
        delete_cookie(&mut event, "b").unwrap();

        let values: Vec<_> = event.response_headers().get_all(header::SET_COOKIE).iter().collect();
        assert_eq!(values, vec!["a=1", "b=; Path=/; Max-Age=0"]);

        set_cookie(&mut event, &Cookie::new("a", "2")).unwrap();
        let values: Vec<_> = event.response_headers().get_all(header::SET_COOKIE).iter().collect();
        assert_eq!(values, vec!["b=; Path=/; Max-Age=0", "a=2"]);
    }

    #[test]
    fn invalid_value_is_an_error() {
        let (mut event, _rx) = Event::from_request(Request::new(Bytes::new()));
        assert!(set_cookie(&mut event, &Cookie::new("a", "line\nbreak")).is_err());
    }
}
