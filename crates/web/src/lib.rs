//! Event based request dispatch for quill.
//!
//! Requests become an [`Event`] and flow through an [`App`]: middleware registered with
//! `use_handler` first, then the terminal route matching the full path. The first reply a
//! handler produces is resolved into the response.
//!
//! ```
//! use bytes::Bytes;
//! use http::Request;
//! use http_body_util::BodyExt;
//! use quill_web::{App, handler_fn};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let app = App::builder()
//!     .get("/:name", handler_fn(|event| Box::pin(async move {
//!         format!("Hello {}", event.param("name").unwrap_or("stranger"))
//!     })))
//!     .build()
//!     .unwrap();
//!
//! let response = app.handle_request(Request::get("/world").body(Bytes::new()).unwrap()).await.unwrap();
//! assert_eq!(response.into_body().collect().await.unwrap().to_bytes(), "Hello world");
//! # }
//! ```

mod app;
mod body;
mod date;
mod error;
mod event;
mod handler;
mod reply;
mod resolver;

pub mod codec;
pub mod cookie;
pub mod server;
pub mod session;

pub use app::{App, AppBuilder, AppOptions, UseOptions};
pub use body::{BodyStream, ResponseBody};
pub use error::{
    AbortedError, BoxError, ConfigurationError, ErrorBody, HandlerError, LateWriteError, SerializationError,
    sanitize_status,
};
pub use event::{Context, Event, ResponseReceiver, StreamTransport, Transport, ValueTransport};
pub use handler::{
    AfterResponseHook, BeforeResponseHook, ErrorHandler, ErrorHandlerFn, EventHandler, Flow, FnHandler, LazyHandler,
    LegacyMiddleware, Next, RequestHook, WithBase, error_handler_fn, handler_fn, lazy_handler, legacy_middleware,
    with_base,
};
pub use reply::{IntoReply, Json, Reply};
pub use server::{Server, ServerBuilder};
