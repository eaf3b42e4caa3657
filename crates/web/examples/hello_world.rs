use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use quill_web::server::init_tracing;
use quill_web::{App, BodyStream, HandlerError, Json, Server, handler_fn, legacy_middleware};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};

#[derive(Deserialize)]
struct Greeting {
    name: String,
}

#[tokio::main]
async fn main() {
    if let Err(e) = init_tracing() {
        eprintln!("failed to install tracing subscriber: {e}");
    }

    let app = App::builder()
        .use_handler(
            "/",
            legacy_middleware(|event, next| {
                Box::pin(async move {
                    info!(method = %event.method(), path = %event.path(), "incoming request");
                    next.proceed();
                })
            }),
        )
        .get("/", handler_fn(|_event| Box::pin(async move { "hello world" })))
        .get("/hello/:name", handler_fn(|event| Box::pin(async move { format!("Hello {}", event.param("name").unwrap_or_default()) })))
        .post(
            "/greet",
            handler_fn(|event| {
                Box::pin(async move {
                    let greeting: Greeting = event.json_body().await?;
                    Ok::<_, HandlerError>(Json(json!({ "message": format!("Hello {}", greeting.name) })))
                })
            }),
        )
        .get(
            "/ticks",
            handler_fn(|_event| {
                Box::pin(async move {
                    let ticks = ticks().map(|n| Ok::<_, std::io::Error>(Bytes::from(format!("tick {n}\n"))));
                    BodyStream::from_stream(ticks)
                })
            }),
        )
        .build();

    let app = match app {
        Ok(app) => app,
        Err(e) => {
            error!(cause = %e, "invalid route table");
            return;
        }
    };

    let server = match Server::builder().app(app).address("127.0.0.1:3000").build() {
        Ok(server) => server,
        Err(e) => {
            error!(cause = %e, "failed to build server");
            return;
        }
    };

    if let Err(e) = server.start().await {
        error!(cause = %e, "server stopped");
    }
}

fn ticks() -> impl futures::Stream<Item = u32> + Send + 'static {
    futures::stream::unfold(0u32, |n| async move {
        if n == 5 {
            return None;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
        Some((n, n + 1))
    })
}
