//! TCP bootstrap: accepts connections and serves every request through an [`App`].

use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;

use quill_http::connection::HttpConnection;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{Level, info, warn};
use tracing_subscriber::FmtSubscriber;

use crate::app::App;

/// Installs a global `fmt` subscriber logging at `INFO`.
pub fn init_tracing() -> Result<(), tracing::subscriber::SetGlobalDefaultError> {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    tracing::subscriber::set_global_default(subscriber)
}

#[derive(Debug)]
pub struct ServerBuilder {
    app: Option<App>,
    address: Option<io::Result<Vec<SocketAddr>>>,
    shutdown: CancellationToken,
}

impl ServerBuilder {
    fn new() -> Self {
        Self { app: None, address: None, shutdown: CancellationToken::new() }
    }

    #[must_use]
    pub fn app(mut self, app: App) -> Self {
        self.app = Some(app);
        self
    }

    #[must_use]
    pub fn address<A: ToSocketAddrs>(mut self, address: A) -> Self {
        self.address = Some(address.to_socket_addrs().map(Iterator::collect));
        self
    }

    /// Stops accepting connections once `shutdown` is cancelled.
    #[must_use]
    pub fn shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn build(self) -> Result<Server, ServerBuildError> {
        let app = self.app.ok_or(ServerBuildError::MissingApp)?;
        let address = self.address.ok_or(ServerBuildError::MissingAddress)??;
        if address.is_empty() {
            return Err(ServerBuildError::MissingAddress);
        }
        Ok(Server { app: Arc::new(app), address, shutdown: self.shutdown })
    }
}

#[derive(Error, Debug)]
pub enum ServerBuildError {
    #[error("app must be set")]
    MissingApp,
    #[error("address must be set")]
    MissingAddress,
    #[error("invalid address: {0}")]
    InvalidAddress(#[from] io::Error),
}

#[derive(Debug)]
pub struct Server {
    app: Arc<App>,
    address: Vec<SocketAddr>,
    shutdown: CancellationToken,
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Binds the configured address and serves until shutdown.
    pub async fn start(self) -> io::Result<()> {
        let listener = TcpListener::bind(self.address.as_slice()).await?;
        info!("start listening at {:?}", listener.local_addr()?);
        serve(self.app, listener, self.shutdown).await;
        Ok(())
    }
}

/// Serves every connection accepted on `listener` on its own task until `shutdown` fires.
///
/// Connections already accepted keep running after shutdown.
pub async fn serve(app: Arc<App>, listener: TcpListener, shutdown: CancellationToken) {
    loop {
        let accepted = select! {
            biased;
            () = shutdown.cancelled() => {
                info!("shutdown requested, no longer accepting connections");
                return;
            }
            accepted = listener.accept() => accepted,
        };

        let (tcp_stream, remote_addr) = match accepted {
            Ok(stream_and_addr) => stream_and_addr,
            Err(e) => {
                warn!(cause = %e, "failed to accept");
                continue;
            }
        };

        let app = Arc::clone(&app);
        tokio::spawn(async move {
            let (reader, writer) = tcp_stream.into_split();
            match HttpConnection::new(reader, writer).process(app).await {
                Ok(()) => info!(%remote_addr, "finished process, connection shutdown"),
                Err(e) => warn!(cause = %e, %remote_addr, "connection shutdown with error"),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::handler_fn;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    #[test]
    fn build_requires_app_and_address() {
        assert!(matches!(Server::builder().address("127.0.0.1:0").build(), Err(ServerBuildError::MissingApp)));

        let app = App::builder().build().unwrap();
        assert!(matches!(Server::builder().app(app).build(), Err(ServerBuildError::MissingAddress)));

        let app = App::builder().build().unwrap();
        assert!(matches!(
            Server::builder().app(app).address("not an address").build(),
            Err(ServerBuildError::InvalidAddress(_))
        ));
    }

    #[tokio::test]
    async fn serves_over_tcp() {
        let app = App::builder()
            .get("/hello/:name", handler_fn(|event| Box::pin(async move { format!("hi {}", event.param("name").unwrap_or_default()) })))
            .build()
            .unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let server = tokio::spawn(serve(Arc::new(app), listener, shutdown.clone()));

        let mut client = TcpStream::connect(address).await.unwrap();
        client.write_all(b"GET /hello/quill HTTP/1.1\r\nConnection: close\r\n\r\n").await.unwrap();
        let mut response = String::new();
        client.read_to_string(&mut response).await.unwrap();

        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "{response}");
        assert!(response.contains("content-type: text/html\r\n"));
        assert!(response.contains("date: "));
        assert!(response.ends_with("\r\n\r\nhi quill"));

        shutdown.cancel();
        server.await.unwrap();
    }
}
