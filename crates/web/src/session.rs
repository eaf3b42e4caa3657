//! Cookie backed sessions.
//!
//! The session document is serialized to JSON, sealed by a [`Sealer`] and stored in a single
//! cookie. Cryptography is not part of this crate: plug in any sealing scheme (iron style,
//! JWE, HMAC signed blobs) by implementing [`Sealer`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;
use uuid::Uuid;

use crate::cookie::{Cookie, SameSite, get_cookie, set_cookie};
use crate::error::{BoxError, HandlerError};
use crate::event::Event;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SealOptions {
    /// How long a sealed token stays valid, `None` for no limit.
    pub ttl: Option<Duration>,
}

/// Seals a payload into an opaque token and back.
pub trait Sealer: Send + Sync {
    fn seal(&self, secret: &str, payload: &str, options: &SealOptions) -> Result<String, BoxError>;

    fn unseal(&self, secret: &str, token: &str, options: &SealOptions) -> Result<String, BoxError>;
}

#[derive(Clone)]
pub struct SessionConfig {
    name: String,
    password: String,
    max_age: Option<Duration>,
    path: String,
    domain: Option<String>,
    secure: bool,
    http_only: bool,
    same_site: SameSite,
    sealer: Arc<dyn Sealer>,
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("name", &self.name)
            .field("max_age", &self.max_age)
            .field("path", &self.path)
            .field("secure", &self.secure)
            .finish_non_exhaustive()
    }
}

impl SessionConfig {
    /// A config storing the session in the `quill` cookie, secure and http only.
    pub fn new<S: Sealer + 'static>(password: impl Into<String>, sealer: S) -> Self {
        Self {
            name: "quill".to_owned(),
            password: password.into(),
            max_age: None,
            path: "/".to_owned(),
            domain: None,
            secure: true,
            http_only: true,
            same_site: SameSite::Lax,
            sealer: Arc::new(sealer),
        }
    }

    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sessions older than `max_age` are replaced by a fresh one.
    #[must_use]
    pub fn max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    #[must_use]
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    #[must_use]
    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
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
        self.same_site = same_site;
        self
    }

    fn seal_options(&self) -> SealOptions {
        SealOptions { ttl: self.max_age }
    }

    fn cookie(&self, value: String) -> Cookie {
        let mut cookie = Cookie::new(self.name.as_str(), value)
            .path(self.path.as_str())
            .secure(self.secure)
            .http_only(self.http_only)
            .same_site(self.same_site);
        if let Some(domain) = &self.domain {
            cookie = cookie.domain(domain.as_str());
        }
        if let Some(max_age) = self.max_age {
            cookie = cookie.max_age(i64::try_from(max_age.as_secs()).unwrap_or(i64::MAX));
        }
        cookie
    }
}

/// The session document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    /// Unix time in milliseconds.
    pub created_at: u64,
    pub data: Map<String, Value>,
}

impl Session {
    fn fresh() -> Self {
        Self { id: Uuid::new_v4().to_string(), created_at: now_millis(), data: Map::new() }
    }

    fn expired(&self, max_age: Option<Duration>) -> bool {
        let Some(max_age) = max_age else { return false };
        let age = now_millis().saturating_sub(self.created_at);
        u128::from(age) > max_age.as_millis()
    }
}

/// Sessions already resolved for this request, by cookie name.
#[derive(Debug, Clone, Default)]
struct SessionCache(HashMap<String, Session>);

/// The session of the request, creating (and staging the cookie of) a new one when the cookie
/// is missing, can not be unsealed or is expired.
pub fn get_session(event: &mut Event, config: &SessionConfig) -> Result<Session, HandlerError> {
    if let Some(session) = cached(event, &config.name) {
        return Ok(session);
    }

    let restored = get_cookie(event, &config.name).and_then(|token| unseal(config, &token));
    match restored {
        Some(session) if !session.expired(config.max_age) => {
            store(event, &config.name, session.clone());
            Ok(session)
        }
        _ => {
            let session = Session::fresh();
            write(event, config, &session)?;
            Ok(session)
        }
    }
}

/// Applies `update` to the session data and stages the resealed cookie.
pub fn update_session<F>(event: &mut Event, config: &SessionConfig, update: F) -> Result<Session, HandlerError>
where
    F: FnOnce(&mut Map<String, Value>),
{
    let mut session = get_session(event, config)?;
    update(&mut session.data);
    write(event, config, &session)?;
    Ok(session)
}

/// Forgets the session and makes the client drop its cookie.
pub fn clear_session(event: &mut Event, config: &SessionConfig) -> Result<(), HandlerError> {
    if let Some(cache) = event.context_mut().get_mut::<SessionCache>() {
        cache.0.remove(&config.name);
    }
    set_cookie(event, &config.cookie(String::new()).max_age(0))
}

fn unseal(config: &SessionConfig, token: &str) -> Option<Session> {
    let payload = match config.sealer.unseal(&config.password, token, &config.seal_options()) {
        Ok(payload) => payload,
        Err(e) => {
            debug!(cause = %e, name = %config.name, "discarding session cookie that can not be unsealed");
            return None;
        }
    };
    match serde_json::from_str(&payload) {
        Ok(session) => Some(session),
        Err(e) => {
            debug!(cause = %e, name = %config.name, "discarding malformed session");
            None
        }
    }
}

fn write(event: &mut Event, config: &SessionConfig, session: &Session) -> Result<(), HandlerError> {
    let payload = serde_json::to_string(session)?;
    let token = config.sealer.seal(&config.password, &payload, &config.seal_options()).map_err(HandlerError::unhandled)?;
    set_cookie(event, &config.cookie(token))?;
    store(event, &config.name, session.clone());
    Ok(())
}

fn cached(event: &Event, name: &str) -> Option<Session> {
    event.context().get::<SessionCache>()?.0.get(name).cloned()
}

fn store(event: &mut Event, name: &str, session: Session) {
    let context = event.context_mut();
    match context.get_mut::<SessionCache>() {
        Some(cache) => {
            cache.0.insert(name.to_owned(), session);
        }
        None => {
            context.insert(SessionCache(HashMap::from([(name.to_owned(), session)])));
        }
    }
}

fn now_millis() -> u64 {
    let elapsed = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http::{Request, header};
    use serde_json::json;

    /// Prefixes the payload with the secret; good enough to observe the round trip.
    struct PlainSealer;

    impl Sealer for PlainSealer {
        fn seal(&self, secret: &str, payload: &str, _options: &SealOptions) -> Result<String, BoxError> {
            Ok(format!("{secret}|{payload}"))
        }

        fn unseal(&self, secret: &str, token: &str, _options: &SealOptions) -> Result<String, BoxError> {
            token.strip_prefix(&format!("{secret}|")).map(str::to_owned).ok_or_else(|| "bad seal".into())
        }
    }

    fn config() -> SessionConfig {
        SessionConfig::new("pw", PlainSealer).name("sid")
    }

    fn event_with_cookie(cookie: Option<&str>) -> Event {
        let mut builder = Request::builder();
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        Event::from_request(builder.body(Bytes::new()).unwrap()).0
    }

    fn staged_token(event: &Event) -> String {
        let set_cookie = event.response_header("set-cookie").unwrap();
        let value = set_cookie.strip_prefix("sid=").unwrap();
        value.split("; ").next().unwrap().to_owned()
    }

    #[test]
    fn new_session_sets_cookie() {
        let mut event = event_with_cookie(None);
        let session = get_session(&mut event, &config()).unwrap();
        assert!(session.data.is_empty());
        assert!(Uuid::parse_str(&session.id).is_ok());

        let set_cookie = event.response_header("set-cookie").unwrap();
        assert!(set_cookie.contains("; Path=/; Secure; HttpOnly; SameSite=Lax"));

        // same request, same session
        assert_eq!(get_session(&mut event, &config()).unwrap(), session);
    }

    #[test]
    fn session_survives_requests() {
        let mut first = event_with_cookie(None);
        let session = update_session(&mut first, &config(), |data| {
            data.insert("user".to_owned(), json!("ada"));
        })
        .unwrap();
        let token = staged_token(&first);

        let mut second = event_with_cookie(Some(&format!("sid={token}")));
        let restored = get_session(&mut second, &config()).unwrap();
        assert_eq!(restored, session);
        assert_eq!(restored.data["user"], "ada");
        assert!(second.response_header("set-cookie").is_none());
    }

    #[test]
    fn unreadable_cookie_starts_over() {
        let mut event = event_with_cookie(Some("sid=forged"));
        let session = get_session(&mut event, &config()).unwrap();
        assert!(session.data.is_empty());
        assert!(event.response_header("set-cookie").is_some());
    }

    #[test]
    fn expired_session_is_replaced() {
        let old = Session { id: "old".to_owned(), created_at: 0, data: Map::new() };
        let token = format!("pw|{}", serde_json::to_string(&old).unwrap());

        let config = config().max_age(Duration::from_secs(60));
        let mut event = event_with_cookie(Some(&format!("sid={token}")));
        let session = get_session(&mut event, &config).unwrap();
        assert_ne!(session.id, "old");
        assert!(event.response_header("set-cookie").unwrap().contains("Max-Age=60"));
    }

    #[test]
    fn clear() {
        let mut event = event_with_cookie(None);
        let first = get_session(&mut event, &config()).unwrap();
        clear_session(&mut event, &config()).unwrap();

        let set_cookie = event.response_header("set-cookie").unwrap();
        assert!(set_cookie.starts_with("sid=; "));
        assert!(set_cookie.contains("Max-Age=0"));

        let second = get_session(&mut event, &config()).unwrap();
        assert_ne!(first.id, second.id);
    }
}
