//! The dispatch pipeline.
//!
//! An [`App`] owns an ordered middleware stack and a terminal route table. For every
//! request it runs the middleware whose prefix applies, then the terminal route matching the
//! full path, and resolves the first reply into the response. Errors from anywhere go to a
//! single error handler; a request whose client disconnects is abandoned without a response.

use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;
use http::{Method, Request, Response};
use quill_http::connection::Exchange;
use quill_http::handler::Handler;
use quill_router::{Pattern, RouteMethod, Router};
use serde_json::json;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::body::ResponseBody;
use crate::error::{AbortedError, ConfigurationError, HandlerError};
use crate::event::{Event, ResponseReceiver, ValueTransport};
use crate::handler::{
    AfterResponseHook, BeforeResponseHook, ErrorHandler, EventHandler, Flow, RequestHook, error_handler_fn,
    normalize_prefix, strip_prefix,
};
use crate::reply::Reply;
use crate::resolver;

type Matcher = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Runtime switches of an [`App`].
#[derive(Debug, Clone, Copy, Default)]
pub struct AppOptions {
    /// Show the message of unhandled errors to clients.
    pub debug: bool,
}

/// Where a middleware applies.
#[derive(Clone, Default)]
pub struct UseOptions {
    prefix: String,
    matcher: Option<Matcher>,
}

impl UseOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies below `prefix`, at a segment boundary.
    #[must_use]
    pub fn prefix(mut self, prefix: &str) -> Self {
        self.prefix = normalize_prefix(prefix);
        self
    }

    /// Applies only when `matcher` accepts the path (relative to the prefix).
    #[must_use]
    pub fn matcher<F>(mut self, matcher: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.matcher = Some(Arc::new(matcher));
        self
    }
}

impl fmt::Debug for UseOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UseOptions").field("prefix", &self.prefix).field("matcher", &self.matcher.is_some()).finish()
    }
}

#[derive(Clone)]
struct Layer {
    options: UseOptions,
    handler: Arc<dyn EventHandler>,
}

impl Layer {
    /// The path the handler sees, `None` when the layer does not apply.
    fn applies<'p>(&self, path: &'p str) -> Option<&'p str> {
        let rest = strip_prefix(path, &self.options.prefix)?;
        match &self.options.matcher {
            Some(matcher) if !matcher(rest) => None,
            _ => Some(rest),
        }
    }
}

/// An immutable snapshot of the middleware stack and the route table.
#[derive(Clone, Default)]
struct Routes {
    layers: Vec<Layer>,
    router: Router<Arc<dyn EventHandler>>,
}

#[derive(Default, Clone)]
struct Hooks {
    on_request: Option<Arc<dyn RequestHook>>,
    on_before_response: Option<Arc<dyn BeforeResponseHook>>,
    on_after_response: Option<Arc<dyn AfterResponseHook>>,
}

pub struct App {
    routes: ArcSwap<Routes>,
    options: AppOptions,
    hooks: Hooks,
    error_handler: Option<Arc<dyn ErrorHandler>>,
}

impl fmt::Debug for App {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let routes = self.routes.load();
        f.debug_struct("App")
            .field("options", &self.options)
            .field("layers", &routes.layers.len())
            .field("routes", &routes.router.len())
            .finish_non_exhaustive()
    }
}

impl App {
    pub fn builder() -> AppBuilder {
        AppBuilder::new()
    }

    pub fn options(&self) -> AppOptions {
        self.options
    }

    /// Registers a terminal route on a running app.
    ///
    /// In-flight requests keep the route table they started with.
    pub fn on<M, H>(&self, method: M, pattern: &str, handler: H) -> Result<(), ConfigurationError>
    where
        M: Into<RouteMethod>,
        H: EventHandler + 'static,
    {
        let method = method.into();
        let pattern = Pattern::parse(pattern)?;
        let handler: Arc<dyn EventHandler> = Arc::new(handler);
        self.routes.rcu(|routes| {
            let mut next = Routes::clone(routes);
            next.router.insert_pattern(method.clone(), &pattern, Arc::clone(&handler));
            next
        });
        Ok(())
    }

    /// Appends a middleware on a running app.
    pub fn use_handler<H: EventHandler + 'static>(&self, options: UseOptions, handler: H) {
        let layer = Layer { options, handler: Arc::new(handler) };
        self.routes.rcu(|routes| {
            let mut next = Routes::clone(routes);
            next.layers.push(layer.clone());
            next
        });
    }

    /// Serves an immutable request and returns the response.
    pub async fn handle_request(&self, request: Request<Bytes>) -> Result<Response<ResponseBody>, AbortedError> {
        let (transport, rx) = ValueTransport::new(request);
        self.handle_transport(transport, rx).await
    }

    /// Like [`handle_request`](Self::handle_request), abandoned once `signal` is cancelled.
    pub async fn handle_request_with_signal(
        &self,
        request: Request<Bytes>,
        signal: CancellationToken,
    ) -> Result<Response<ResponseBody>, AbortedError> {
        let (transport, rx) = ValueTransport::new(request);
        self.handle_transport(transport.with_abort_signal(signal), rx).await
    }

    async fn handle_transport(
        &self,
        transport: ValueTransport,
        rx: ResponseReceiver,
    ) -> Result<Response<ResponseBody>, AbortedError> {
        let mut event = Event::new(transport);
        self.handle_event(&mut event).await?;
        drop(event);
        rx.await.map_err(|_unsent| AbortedError)
    }

    /// Serves a request of a live connection; the response is written to the connection.
    pub async fn handle_stream(&self, exchange: Exchange) {
        let mut event = Event::from_exchange(exchange);
        if let Err(e) = self.handle_event(&mut event).await {
            debug!(cause = %e, "stream exchange ended without response");
        }
    }

    /// Runs the pipeline for `event`, racing it against the client going away.
    pub async fn handle_event(&self, event: &mut Event) -> Result<(), AbortedError> {
        event.set_expose_errors(self.options.debug);
        let closed = event.close_signal();
        let result = select! {
            biased;
            () = closed.cancelled() => Err(AbortedError),
            result = self.dispatch(event) => result,
        };

        match result {
            Ok(()) => {
                if let Some(hook) = &self.hooks.on_after_response {
                    hook.call(event).await;
                }
            }
            Err(AbortedError) => debug!(path = %event.original_path(), "request aborted"),
        }
        event.finish();
        result
    }

    async fn dispatch(&self, event: &mut Event) -> Result<(), AbortedError> {
        let routes = self.routes.load_full();
        match self.run_chain(&routes, event).await {
            Ok(Some(reply)) => self.respond(&routes, event, reply).await,
            Ok(None) if event.handled() => Ok(()),
            Ok(None) => {
                let error = not_found(&routes, event);
                self.handle_error(event, error).await
            }
            Err(error) => self.handle_error(event, error).await,
        }
    }

    /// Runs middleware then the terminal route; `None` when nobody produced a reply.
    async fn run_chain(&self, routes: &Routes, event: &mut Event) -> Result<Option<Reply>, HandlerError> {
        if let Some(hook) = &self.hooks.on_request {
            hook.call(event).await?;
            if event.handled() {
                return Ok(None);
            }
        }

        let full_path = event.original_path().to_owned();
        for layer in &routes.layers {
            let Some(rest) = layer.applies(&full_path) else { continue };
            let previous = event.replace_path(Some(rest.to_owned()));
            let flow = layer.handler.call(event).await;
            event.replace_path(previous);

            match flow {
                Flow::Continue if event.handled() => return Ok(None),
                Flow::Continue => {}
                Flow::Respond(reply) => return Ok(Some(reply)),
                Flow::Throw(error) => return Err(error),
            }
        }

        let Some(matched) = routes.router.find(event.method(), &full_path) else {
            return Ok(None);
        };
        event.context_mut().set_route(matched.params, matched.pattern);
        match matched.value.call(event).await {
            Flow::Continue => Ok(None),
            Flow::Respond(reply) => Ok(Some(reply)),
            Flow::Throw(error) => Err(error),
        }
    }

    async fn respond(&self, routes: &Routes, event: &mut Event, mut reply: Reply) -> Result<(), AbortedError> {
        if let Some(hook) = &self.hooks.on_before_response
            && let Err(error) = hook.call(event, &mut reply).await
        {
            return self.handle_error(event, error).await;
        }

        if event.respond(reply).await? || event.handled() {
            return Ok(());
        }
        let error = not_found(routes, event);
        self.handle_error(event, error).await
    }

    async fn handle_error(&self, event: &mut Event, error: HandlerError) -> Result<(), AbortedError> {
        if error.is_unhandled() {
            error!(cause = %error, path = %event.original_path(), "unhandled error");
        } else {
            debug!(cause = %error, path = %event.original_path(), "request failed");
        }

        let reply = match &self.error_handler {
            Some(handler) => handler.handle(&error, event).await,
            None => Ok(Reply::Continue),
        };
        if event.handled() {
            return Ok(());
        }

        match reply {
            Ok(Reply::Continue) => event.respond(Reply::Error(error)).await.map(|_sent| ()),
            Ok(reply) => event.respond(reply).await.map(|_sent| ()),
            Err(e) => {
                error!(cause = %e, original = %error, "error handler failed");
                event.finalize(resolver::minimal_error_response()).await
            }
        }
    }
}

fn not_found(routes: &Routes, event: &Event) -> HandlerError {
    let path = event.original_path();
    let error = HandlerError::not_found(format!("Cannot find any path matching {path}."));
    let allowed = routes.router.allowed_methods(path);
    if allowed.is_empty() {
        return error;
    }
    let allowed: Vec<String> = allowed.iter().map(ToString::to_string).collect();
    error.with_data(json!({ "allowed": allowed }))
}

#[async_trait]
impl Handler for App {
    async fn call(&self, exchange: Exchange) {
        self.handle_stream(exchange).await;
    }
}

/// Builds an [`App`]; the first invalid route registration fails [`build`](Self::build).
pub struct AppBuilder {
    options: AppOptions,
    routes: Routes,
    hooks: Hooks,
    error_handler: Option<Arc<dyn ErrorHandler>>,
    error: Option<ConfigurationError>,
}

impl fmt::Debug for AppBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppBuilder")
            .field("options", &self.options)
            .field("layers", &self.routes.layers.len())
            .field("routes", &self.routes.router.len())
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

impl AppBuilder {
    fn new() -> Self {
        Self { options: AppOptions::default(), routes: Routes::default(), hooks: Hooks::default(), error_handler: None, error: None }
    }

    #[must_use]
    pub fn options(mut self, options: AppOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub fn debug(mut self, debug: bool) -> Self {
        self.options.debug = debug;
        self
    }

    #[must_use]
    pub fn on<M, H>(mut self, method: M, pattern: &str, handler: H) -> Self
    where
        M: Into<RouteMethod>,
        H: EventHandler + 'static,
    {
        let handler: Arc<dyn EventHandler> = Arc::new(handler);
        if let Err(e) = self.routes.router.insert(method, pattern, handler) {
            warn!(cause = %e, "rejected route registration");
            if self.error.is_none() {
                self.error = Some(e);
            }
        }
        self
    }

    #[must_use]
    pub fn get<H: EventHandler + 'static>(self, pattern: &str, handler: H) -> Self {
        self.on(Method::GET, pattern, handler)
    }

    #[must_use]
    pub fn post<H: EventHandler + 'static>(self, pattern: &str, handler: H) -> Self {
        self.on(Method::POST, pattern, handler)
    }

    #[must_use]
    pub fn put<H: EventHandler + 'static>(self, pattern: &str, handler: H) -> Self {
        self.on(Method::PUT, pattern, handler)
    }

    #[must_use]
    pub fn delete<H: EventHandler + 'static>(self, pattern: &str, handler: H) -> Self {
        self.on(Method::DELETE, pattern, handler)
    }

    #[must_use]
    pub fn patch<H: EventHandler + 'static>(self, pattern: &str, handler: H) -> Self {
        self.on(Method::PATCH, pattern, handler)
    }

    #[must_use]
    pub fn head<H: EventHandler + 'static>(self, pattern: &str, handler: H) -> Self {
        self.on(Method::HEAD, pattern, handler)
    }

    #[must_use]
    pub fn options_route<H: EventHandler + 'static>(self, pattern: &str, handler: H) -> Self {
        self.on(Method::OPTIONS, pattern, handler)
    }

    #[must_use]
    pub fn any<H: EventHandler + 'static>(self, pattern: &str, handler: H) -> Self {
        self.on(RouteMethod::Any, pattern, handler)
    }

    /// Appends a middleware that runs below `prefix` (`"/"` for every request).
    #[must_use]
    pub fn use_handler<H: EventHandler + 'static>(self, prefix: &str, handler: H) -> Self {
        self.use_with(UseOptions::new().prefix(prefix), handler)
    }

    #[must_use]
    pub fn use_with<H: EventHandler + 'static>(mut self, options: UseOptions, handler: H) -> Self {
        self.routes.layers.push(Layer { options, handler: Arc::new(handler) });
        self
    }

    #[must_use]
    pub fn error_handler<H: ErrorHandler + 'static>(mut self, handler: H) -> Self {
        self.error_handler = Some(Arc::new(handler));
        self
    }

    #[must_use]
    pub fn on_error<F>(self, f: F) -> Self
    where
        F: for<'e> Fn(&'e HandlerError, &'e mut Event) -> BoxFuture<'e, Result<Reply, HandlerError>>
            + Send
            + Sync
            + 'static,
    {
        self.error_handler(error_handler_fn(f))
    }

    #[must_use]
    pub fn on_request<F>(mut self, f: F) -> Self
    where
        F: for<'e> Fn(&'e mut Event) -> BoxFuture<'e, Result<(), HandlerError>> + Send + Sync + 'static,
    {
        self.hooks.on_request = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn on_before_response<F>(mut self, f: F) -> Self
    where
        F: for<'e> Fn(&'e mut Event, &'e mut Reply) -> BoxFuture<'e, Result<(), HandlerError>> + Send + Sync + 'static,
    {
        self.hooks.on_before_response = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn on_after_response<F>(mut self, f: F) -> Self
    where
        F: for<'e> Fn(&'e mut Event) -> BoxFuture<'e, ()> + Send + Sync + 'static,
    {
        self.hooks.on_after_response = Some(Arc::new(f));
        self
    }

    pub fn build(self) -> Result<App, ConfigurationError> {
        if let Some(e) = self.error {
            return Err(e);
        }
        Ok(App {
            routes: ArcSwap::from_pointee(self.routes),
            options: self.options,
            hooks: self.hooks,
            error_handler: self.error_handler,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{handler_fn, legacy_middleware};
    use http::StatusCode;
    use http_body_util::BodyExt;
    use serde_json::Value;
    use std::io;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    fn request(method: Method, uri: &str, body: &'static str) -> Request<Bytes> {
        Request::builder().method(method).uri(uri).body(Bytes::from_static(body.as_bytes())).unwrap()
    }

    async fn call(app: &App, method: Method, uri: &str, body: &'static str) -> (StatusCode, String) {
        let response = app.handle_request(request(method, uri, body)).await.unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    fn text(value: &'static str) -> impl EventHandler {
        handler_fn(move |_event| Box::pin(async move { value }))
    }

    #[tokio::test]
    async fn hello_name() {
        let app = App::builder()
            .get("/:name", handler_fn(|event| Box::pin(async move { format!("Hello {}", event.param("name").unwrap_or_default()) })))
            .build()
            .unwrap();

        let response = app.handle_request(request(Method::GET, "/world", "")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[http::header::CONTENT_TYPE], "text/html");
        assert_eq!(response.into_body().collect().await.unwrap().to_bytes(), "Hello world");
    }

    #[tokio::test]
    async fn echo_json() {
        let app = App::builder()
            .post("/", handler_fn(|event| Box::pin(async move { event.json_body::<Value>().await })))
            .build()
            .unwrap();

        let response = app.handle_request(request(Method::POST, "/", r#"{"a":1}"#)).await.unwrap();
        assert_eq!(response.headers()[http::header::CONTENT_TYPE], "application/json");
        assert_eq!(response.into_body().collect().await.unwrap().to_bytes(), r#"{"a":1}"#);
    }

    #[tokio::test]
    async fn missing_route_is_404() {
        let app = App::builder().get("/exists", text("yes")).build().unwrap();

        let (status, body) = call(&app, Method::DELETE, "/missing", "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let body: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(body["statusCode"], 404);
        assert_eq!(body["message"], "Cannot find any path matching /missing.");
        assert!(body.get("data").is_none());
    }

    #[tokio::test]
    async fn method_mismatch_lists_allowed() {
        let app = App::builder().get("/items", text("list")).post("/items", text("create")).build().unwrap();

        let (status, body) = call(&app, Method::DELETE, "/items", "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let body: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(body["data"]["allowed"], serde_json::json!(["GET", "POST"]));
    }

    #[tokio::test]
    async fn any_method_fallback() {
        let app = App::builder().any("/ping", text("pong")).put("/ping", text("put")).build().unwrap();
        assert_eq!(call(&app, Method::PATCH, "/ping", "").await.1, "pong");
        assert_eq!(call(&app, Method::PUT, "/ping", "").await.1, "put");
    }

    #[tokio::test]
    async fn invalid_registration_fails_build() {
        let result = App::builder().get("/**/tail", text("x")).get("/:a/:a", text("y")).build();
        assert!(matches!(result, Err(ConfigurationError::NonTrailingWildcard { .. })));
    }

    #[tokio::test]
    async fn middleware_runs_in_order_and_strips_prefix() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let record = |label: &'static str, seen: &Arc<Mutex<Vec<String>>>| {
            let seen = Arc::clone(seen);
            handler_fn(move |event| {
                let seen = Arc::clone(&seen);
                Box::pin(async move {
                    seen.lock().unwrap().push(format!("{label}:{}", event.path()));
                })
            })
        };

        let app = App::builder()
            .use_handler("/", record("all", &seen))
            .use_handler("/api", record("api", &seen))
            .use_handler("/api/v2", record("v2", &seen))
            .get("/api/users", handler_fn(|event| Box::pin(async move { event.path().to_owned() })))
            .build()
            .unwrap();

        assert_eq!(call(&app, Method::GET, "/api/users", "").await.1, "/api/users");
        assert_eq!(*seen.lock().unwrap(), vec!["all:/api/users", "api:/users"]);

        seen.lock().unwrap().clear();
        let (status, _) = call(&app, Method::GET, "/apix", "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(*seen.lock().unwrap(), vec!["all:/apix"]);

        seen.lock().unwrap().clear();
        call(&app, Method::GET, "/api", "").await;
        assert_eq!(*seen.lock().unwrap(), vec!["all:/api", "api:/"]);
    }

    #[tokio::test]
    async fn matcher_predicate() {
        let app = App::builder()
            .use_with(UseOptions::new().matcher(|path| path.ends_with(".json")), text("matched"))
            .get("/**", text("fallback"))
            .build()
            .unwrap();

        assert_eq!(call(&app, Method::GET, "/data.json", "").await.1, "matched");
        assert_eq!(call(&app, Method::GET, "/data.xml", "").await.1, "fallback");
    }

    #[tokio::test]
    async fn middleware_short_circuits() {
        let terminal_ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&terminal_ran);
        let app = App::builder()
            .use_handler("/", text("from middleware"))
            .get(
                "/",
                handler_fn(move |_event| {
                    let flag = Arc::clone(&flag);
                    Box::pin(async move { flag.store(true, Ordering::SeqCst) })
                }),
            )
            .build()
            .unwrap();

        assert_eq!(call(&app, Method::GET, "/", "").await.1, "from middleware");
        assert!(!terminal_ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn error_stops_the_chain() {
        let later_ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&later_ran);
        let received = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&received);

        let app = App::builder()
            .use_handler("/", handler_fn(|_event| Box::pin(async move { Err::<(), _>(HandlerError::forbidden("stop here")) })))
            .use_handler(
                "/",
                handler_fn(move |_event| {
                    let flag = Arc::clone(&flag);
                    Box::pin(async move { flag.store(true, Ordering::SeqCst) })
                }),
            )
            .on_error(move |error, _event| {
                let sink = Arc::clone(&sink);
                let message = error.message().to_owned();
                Box::pin(async move {
                    *sink.lock().unwrap() = Some(message);
                    Ok(Reply::Continue)
                })
            })
            .build()
            .unwrap();

        let (status, body) = call(&app, Method::GET, "/", "").await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(body.contains("stop here"));
        assert!(!later_ran.load(Ordering::SeqCst));
        assert_eq!(received.lock().unwrap().as_deref(), Some("stop here"));
    }

    #[tokio::test]
    async fn error_handler_reply_is_sent() {
        let app = App::builder()
            .get("/", handler_fn(|_event| Box::pin(async move { Err::<(), _>(io::Error::other("boom")) })))
            .on_error(|error, _event| {
                let reply = Reply::Text(format!("custom {}", error.status().as_u16()));
                Box::pin(async move { Ok(reply) })
            })
            .build()
            .unwrap();
        assert_eq!(call(&app, Method::GET, "/", "").await, (StatusCode::OK, "custom 500".to_owned()));
    }

    #[tokio::test]
    async fn failing_error_handler_degrades_to_500() {
        let app = App::builder()
            .get("/", handler_fn(|_event| Box::pin(async move { Err::<(), _>(HandlerError::bad_request("x")) })))
            .on_error(|_error, _event| Box::pin(async move { Err(HandlerError::internal("worse")) }))
            .build()
            .unwrap();
        assert_eq!(call(&app, Method::GET, "/", "").await, (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error".to_owned()));
    }

    #[tokio::test]
    async fn unhandled_errors_are_hidden_unless_debug() {
        let failing = || handler_fn(|_event| Box::pin(async move { Err::<(), _>(io::Error::other("secret detail")) }));

        let app = App::builder().get("/", failing()).build().unwrap();
        let (status, body) = call(&app, Method::GET, "/", "").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!body.contains("secret detail"));

        let app = App::builder().debug(true).get("/", failing()).build().unwrap();
        assert!(call(&app, Method::GET, "/", "").await.1.contains("secret detail"));
    }

    #[tokio::test]
    async fn legacy_next() {
        let app = App::builder()
            .use_handler(
                "/",
                legacy_middleware(|event, next| {
                    Box::pin(async move {
                        if event.request_header("authorization").is_some() {
                            next.proceed();
                        } else {
                            next.fail(HandlerError::unauthorized("login first"));
                        }
                    })
                }),
            )
            .use_handler(
                "/sent",
                legacy_middleware(|event, _next| {
                    Box::pin(async move {
                        let _aborted = event.send("sent by middleware").await;
                    })
                }),
            )
            .get("/**", text("terminal"))
            .build()
            .unwrap();

        let (status, _) = call(&app, Method::GET, "/", "").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let authorized = |uri: &str| Request::builder().uri(uri).header("authorization", "token").body(Bytes::new()).unwrap();
        let response = app.handle_request(authorized("/")).await.unwrap();
        assert_eq!(response.into_body().collect().await.unwrap().to_bytes(), "terminal");

        let response = app.handle_request(authorized("/sent")).await.unwrap();
        assert_eq!(response.into_body().collect().await.unwrap().to_bytes(), "sent by middleware");
    }

    #[tokio::test]
    async fn staged_status_survives_continue() {
        let app = App::builder()
            .use_handler(
                "/",
                handler_fn(|event| {
                    Box::pin(async move {
                        event.set_response_status(202, None);
                        event.set_response_header("x-trace", "abc")
                    })
                }),
            )
            .get("/", text("accepted"))
            .build()
            .unwrap();

        let response = app.handle_request(request(Method::GET, "/", "")).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(response.headers()["x-trace"], "abc");
    }

    #[tokio::test]
    async fn hooks() {
        let after = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&after);
        let app = App::builder()
            .on_request(|event| {
                Box::pin(async move {
                    if event.path() == "/blocked" { Err(HandlerError::forbidden("blocked")) } else { Ok(()) }
                })
            })
            .on_before_response(|_event, reply| {
                Box::pin(async move {
                    if let Reply::Text(text) = reply {
                        text.push_str(" (checked)");
                    }
                    Ok(())
                })
            })
            .on_after_response(move |_event| {
                let counter = Arc::clone(&counter);
                Box::pin(async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
            })
            .get("/**", text("hello"))
            .build()
            .unwrap();

        assert_eq!(call(&app, Method::GET, "/", "").await.1, "hello (checked)");
        assert_eq!(call(&app, Method::GET, "/blocked", "").await.0, StatusCode::FORBIDDEN);
        assert_eq!(after.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn abort_runs_close_callbacks_without_response() {
        let closed = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&closed);
        let app = App::builder()
            .get(
                "/slow",
                handler_fn(move |event| {
                    let flag = Arc::clone(&flag);
                    Box::pin(async move {
                        event.on_close(move || flag.store(true, Ordering::SeqCst));
                        tokio::time::sleep(Duration::from_secs(30)).await;
                        "too late"
                    })
                }),
            )
            .build()
            .unwrap();

        let signal = CancellationToken::new();
        let canceller = signal.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let result = app.handle_request_with_signal(request(Method::GET, "/slow", ""), signal).await;
        assert_eq!(result.unwrap_err(), AbortedError);
        assert!(closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn runtime_registration() {
        let app = App::builder().build().unwrap();
        assert_eq!(call(&app, Method::GET, "/late", "").await.0, StatusCode::NOT_FOUND);

        app.on(Method::GET, "/late", text("registered")).unwrap();
        assert_eq!(call(&app, Method::GET, "/late", "").await.1, "registered");

        app.use_handler(UseOptions::new().prefix("/late"), text("intercepted"));
        assert_eq!(call(&app, Method::GET, "/late", "").await.1, "intercepted");

        assert!(app.on(Method::GET, "/:x/:x", text("dup")).is_err());
    }

    #[tokio::test]
    async fn matched_route_in_context() {
        let app = App::builder()
            .get(
                "/users/:id",
                handler_fn(|event| Box::pin(async move { event.context().matched_route().unwrap_or_default().to_owned() })),
            )
            .build()
            .unwrap();
        assert_eq!(call(&app, Method::GET, "/users/7", "").await.1, "/users/:id");
    }

    #[tokio::test]
    async fn static_route_beats_param() {
        let app = App::builder()
            .get("/users/:id", handler_fn(|event| Box::pin(async move { format!("user {}", event.param("id").unwrap_or_default()) })))
            .get("/users/me", text("me"))
            .build()
            .unwrap();
        assert_eq!(call(&app, Method::GET, "/users/me", "").await.1, "me");
        assert_eq!(call(&app, Method::GET, "/users/42", "").await.1, "user 42");
    }
}
