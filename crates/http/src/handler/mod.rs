use async_trait::async_trait;

use crate::connection::Exchange;

/// Serves one request/response exchange.
///
/// The handler owns the exchange: it reads the request body and writes the response
/// through the exchange's [`ResponseWriter`](crate::connection::ResponseWriter).
/// Returning without writing a response head makes the connection answer `500`.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn call(&self, exchange: Exchange);
}

#[derive(Debug)]
pub struct HandlerFn<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> Handler for HandlerFn<F>
where
    F: Fn(Exchange) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send,
{
    async fn call(&self, exchange: Exchange) {
        (self.f)(exchange).await;
    }
}

pub fn make_handler<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(Exchange) -> Fut,
    Fut: Future<Output = ()>,
{
    HandlerFn { f }
}
