//! Request body streaming.
//!
//! [`ReqBody`] is the consumer side handed to handlers. [`ReqBodySender`] is the producer
//! side, driven by the connection concurrently with the handler. Each time the consumer
//! wants a chunk it sends a oneshot sender through a bounded channel; the producer answers
//! it with the next decoded payload item. Whatever the handler leaves unread is drained by
//! [`ReqBodySender::skip_body`] so the connection can serve its next request.

mod req_body;

pub use req_body::ReqBody;
pub use req_body::ReqBodySender;
