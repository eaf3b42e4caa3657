//! Streaming HTTP/1.1 transport for quill.
//!
//! This crate reads requests off a socket and exposes each one as an
//! [`connection::Exchange`]: the decoded request head, a lazily pulled request body and a
//! frame based response writer. It knows nothing about routing; `quill-web` builds its
//! streaming event backend on top of it.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use bytes::Bytes;
//! use http::Response;
//! use quill_http::connection::{Exchange, HttpConnection};
//! use quill_http::handler::make_handler;
//! use quill_http::protocol::PayloadSize;
//! use tokio::net::TcpListener;
//! use tracing::{error, info, warn};
//!
//! #[tokio::main]
//! async fn main() {
//!     let tcp_listener = match TcpListener::bind("127.0.0.1:8080").await {
//!         Ok(tcp_listener) => tcp_listener,
//!         Err(e) => {
//!             error!(cause = %e, "bind server error");
//!             return;
//!         }
//!     };
//!
//!     let handler = Arc::new(make_handler(hello_world));
//!
//!     loop {
//!         let (tcp_stream, _remote_addr) = match tcp_listener.accept().await {
//!             Ok(stream_and_addr) => stream_and_addr,
//!             Err(e) => {
//!                 warn!(cause = %e, "failed to accept");
//!                 continue;
//!             }
//!         };
//!
//!         let handler = handler.clone();
//!         tokio::spawn(async move {
//!             let (reader, writer) = tcp_stream.into_split();
//!             if let Err(e) = HttpConnection::new(reader, writer).process(handler).await {
//!                 info!(cause = %e, "connection shutdown");
//!             }
//!         });
//!     }
//! }
//!
//! async fn hello_world(exchange: Exchange) {
//!     let (_header, _body, mut writer, _closed) = exchange.into_parts();
//!     let body = Bytes::from_static(b"Hello World!\r\n");
//!     if writer.write_head(Response::new(()), PayloadSize::Length(body.len() as u64)).await.is_ok() {
//!         let _ = writer.write_chunk(body).await;
//!         let _ = writer.end().await;
//!     }
//! }
//! ```
//!
//! # Limitations
//!
//! - HTTP/1.0 and HTTP/1.1 only, no TLS
//! - at most 64 request headers and 8KB of request head
//! - a client disconnect is only noticed when reading the request or writing the response fails

pub mod codec;
pub mod connection;
pub mod handler;
pub mod protocol;

mod utils;
pub(crate) use utils::ensure;
