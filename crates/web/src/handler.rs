//! Handler traits and adapters.
//!
//! Every middleware and terminal route is an [`EventHandler`] whose outcome is a [`Flow`].
//! The adapters cover the common shapes: async closures returning anything [`IntoReply`]
//! ([`handler_fn`]), call-next style middleware ([`legacy_middleware`]), handlers built on
//! first use ([`lazy_handler`]) and handlers mounted below a base path ([`with_base`]).

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::sync::oneshot::{self, error::TryRecvError};
use tokio::sync::OnceCell;

use crate::error::HandlerError;
use crate::event::Event;
use crate::reply::{IntoReply, Reply};

/// What the pipeline does after a handler ran.
#[derive(Debug)]
pub enum Flow {
    /// Run the next handler.
    Continue,
    /// Stop and resolve this reply.
    Respond(Reply),
    /// Stop and hand the error to the error handler.
    Throw(HandlerError),
}

impl Flow {
    /// `Reply::Continue` continues, a returned error is thrown, anything else responds.
    pub fn from_reply(reply: Reply) -> Self {
        match reply {
            Reply::Continue => Flow::Continue,
            Reply::Error(error) => Flow::Throw(error),
            reply => Flow::Respond(reply),
        }
    }
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn call(&self, event: &mut Event) -> Flow;
}

#[async_trait]
impl<H: EventHandler + ?Sized> EventHandler for Arc<H> {
    async fn call(&self, event: &mut Event) -> Flow {
        self.as_ref().call(event).await
    }
}

/// an async closure holder, see [`handler_fn`]
pub struct FnHandler<F, R> {
    f: F,
    _phantom: PhantomData<fn() -> R>,
}

impl<F, R> fmt::Debug for FnHandler<F, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnHandler").finish_non_exhaustive()
    }
}

/// Wraps an async closure whose result converts into a [`Reply`].
///
/// ```
/// use quill_web::handler_fn;
///
/// let hello = handler_fn(|event| Box::pin(async move {
///     format!("Hello {}", event.param("name").unwrap_or("stranger"))
/// }));
/// # let _ = hello;
/// ```
pub fn handler_fn<F, R>(f: F) -> FnHandler<F, R>
where
    F: for<'e> Fn(&'e mut Event) -> BoxFuture<'e, R> + Send + Sync,
    R: IntoReply,
{
    FnHandler { f, _phantom: PhantomData }
}

#[async_trait]
impl<F, R> EventHandler for FnHandler<F, R>
where
    F: for<'e> Fn(&'e mut Event) -> BoxFuture<'e, R> + Send + Sync,
    R: IntoReply,
{
    async fn call(&self, event: &mut Event) -> Flow {
        Flow::from_reply((self.f)(event).await.into_reply())
    }
}

/// The continuation handed to call-next style middleware.
///
/// Dropping it unused ends the middleware without a signal: the chain stops if the response
/// was sent and continues otherwise.
#[derive(Debug)]
pub struct Next {
    tx: oneshot::Sender<Result<(), HandlerError>>,
}

impl Next {
    pub fn proceed(self) {
        let _unreceived = self.tx.send(Ok(()));
    }

    pub fn fail<E: Into<HandlerError>>(self, error: E) {
        let _unreceived = self.tx.send(Err(error.into()));
    }
}

pub struct LegacyMiddleware<F> {
    f: F,
}

impl<F> fmt::Debug for LegacyMiddleware<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LegacyMiddleware").finish_non_exhaustive()
    }
}

/// Adapts a middleware that signals through a [`Next`] continuation.
pub fn legacy_middleware<F>(f: F) -> LegacyMiddleware<F>
where
    F: for<'e> Fn(&'e mut Event, Next) -> BoxFuture<'e, ()> + Send + Sync,
{
    LegacyMiddleware { f }
}

#[async_trait]
impl<F> EventHandler for LegacyMiddleware<F>
where
    F: for<'e> Fn(&'e mut Event, Next) -> BoxFuture<'e, ()> + Send + Sync,
{
    async fn call(&self, event: &mut Event) -> Flow {
        let (tx, mut rx) = oneshot::channel();
        (self.f)(event, Next { tx }).await;

        // a continuation still held elsewhere is waited for
        let signal = match rx.try_recv() {
            Ok(signal) => Some(signal),
            Err(TryRecvError::Empty) => rx.await.ok(),
            Err(TryRecvError::Closed) => None,
        };
        match signal {
            Some(Err(error)) => Flow::Throw(error),
            Some(Ok(())) | None => Flow::Continue,
        }
    }
}

pub struct LazyHandler<F, H> {
    factory: F,
    handler: OnceCell<H>,
}

impl<F, H: fmt::Debug> fmt::Debug for LazyHandler<F, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyHandler").field("handler", &self.handler).finish_non_exhaustive()
    }
}

/// Builds the real handler with `factory` on first use, concurrent first calls share it.
pub fn lazy_handler<F, Fut, H>(factory: F) -> LazyHandler<F, H>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = H> + Send,
    H: EventHandler,
{
    LazyHandler { factory, handler: OnceCell::new() }
}

#[async_trait]
impl<F, Fut, H> EventHandler for LazyHandler<F, H>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = H> + Send,
    H: EventHandler,
{
    async fn call(&self, event: &mut Event) -> Flow {
        let handler = self.handler.get_or_init(|| (self.factory)()).await;
        handler.call(event).await
    }
}

#[derive(Debug)]
pub struct WithBase<H> {
    base: String,
    handler: H,
}

/// Runs `handler` with `base` stripped from the event path.
///
/// Paths outside of `base` are passed through unchanged.
pub fn with_base<H: EventHandler>(base: &str, handler: H) -> WithBase<H> {
    WithBase { base: normalize_prefix(base), handler }
}

#[async_trait]
impl<H: EventHandler> EventHandler for WithBase<H> {
    async fn call(&self, event: &mut Event) -> Flow {
        let Some(rest) = strip_prefix(event.path(), &self.base).map(str::to_owned) else {
            return self.handler.call(event).await;
        };
        let previous = event.replace_path(Some(rest));
        let flow = self.handler.call(event).await;
        event.replace_path(previous);
        flow
    }
}

/// `/api/` and `api` both become `/api`; `/` and the empty string become empty.
pub(crate) fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_end_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else if trimmed.starts_with('/') {
        trimmed.to_owned()
    } else {
        format!("/{trimmed}")
    }
}

/// Strips a normalized prefix at a segment boundary, `"/"` when nothing remains.
pub(crate) fn strip_prefix<'p>(path: &'p str, prefix: &str) -> Option<&'p str> {
    let rest = path.strip_prefix(prefix)?;
    if rest.is_empty() {
        Some("/")
    } else if rest.starts_with('/') {
        Some(rest)
    } else {
        None
    }
}

/// Receives errors thrown anywhere in the pipeline.
///
/// Returning `Reply::Continue` without sending a response renders the error as JSON. An
/// `Err` degrades to a plain `500`.
#[async_trait]
pub trait ErrorHandler: Send + Sync {
    async fn handle(&self, error: &HandlerError, event: &mut Event) -> Result<Reply, HandlerError>;
}

pub struct ErrorHandlerFn<F> {
    f: F,
}

impl<F> fmt::Debug for ErrorHandlerFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorHandlerFn").finish_non_exhaustive()
    }
}

pub fn error_handler_fn<F>(f: F) -> ErrorHandlerFn<F>
where
    F: for<'e> Fn(&'e HandlerError, &'e mut Event) -> BoxFuture<'e, Result<Reply, HandlerError>> + Send + Sync,
{
    ErrorHandlerFn { f }
}

#[async_trait]
impl<F> ErrorHandler for ErrorHandlerFn<F>
where
    F: for<'e> Fn(&'e HandlerError, &'e mut Event) -> BoxFuture<'e, Result<Reply, HandlerError>> + Send + Sync,
{
    async fn handle(&self, error: &HandlerError, event: &mut Event) -> Result<Reply, HandlerError> {
        (self.f)(error, event).await
    }
}

/// Runs before the first middleware.
#[async_trait]
pub trait RequestHook: Send + Sync {
    async fn call(&self, event: &mut Event) -> Result<(), HandlerError>;
}

#[async_trait]
impl<F> RequestHook for F
where
    F: for<'e> Fn(&'e mut Event) -> BoxFuture<'e, Result<(), HandlerError>> + Send + Sync,
{
    async fn call(&self, event: &mut Event) -> Result<(), HandlerError> {
        (self)(event).await
    }
}

/// Sees, and may replace, a reply before it is resolved.
#[async_trait]
pub trait BeforeResponseHook: Send + Sync {
    async fn call(&self, event: &mut Event, reply: &mut Reply) -> Result<(), HandlerError>;
}

#[async_trait]
impl<F> BeforeResponseHook for F
where
    F: for<'e> Fn(&'e mut Event, &'e mut Reply) -> BoxFuture<'e, Result<(), HandlerError>> + Send + Sync,
{
    async fn call(&self, event: &mut Event, reply: &mut Reply) -> Result<(), HandlerError> {
        (self)(event, reply).await
    }
}

/// Runs after the response was finalized.
#[async_trait]
pub trait AfterResponseHook: Send + Sync {
    async fn call(&self, event: &mut Event);
}

#[async_trait]
impl<F> AfterResponseHook for F
where
    F: for<'e> Fn(&'e mut Event) -> BoxFuture<'e, ()> + Send + Sync,
{
    async fn call(&self, event: &mut Event) {
        (self)(event).await;
    }
}
