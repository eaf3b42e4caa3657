//! Per-connection request processing.
//!
//! [`HttpConnection`] reads requests off a socket, hands each one to a
//! [`Handler`](crate::handler::Handler) as an [`Exchange`], writes the frames the handler
//! produces and keeps the connection alive between requests.

mod exchange;
mod http_connection;

pub use exchange::{Exchange, ResponseFrame, ResponseWriter};
pub use http_connection::HttpConnection;
