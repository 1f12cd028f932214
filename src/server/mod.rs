//! Async TCP host server using Tokio.
//!
//! Accepts TCP connections and dispatches HTTP/1.1 requests to a handler
//! function. [`Server::serve`] wires the handler to an [`Interceptor`], which
//! turns the process into a caching reverse proxy in front of the origin.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::http::{
    Response, StatusCode,
    request::{Request, RequestError},
};
use crate::interceptor::Interceptor;

/// Errors produced by the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// Maximum size of a complete HTTP request we will buffer before rejecting it (8 MiB).
const MAX_REQUEST_SIZE: usize = 8 * 1024 * 1024;

/// Initial read buffer capacity per connection.
const INITIAL_BUF_SIZE: usize = 4096;

/// The host server.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use shelfcache::http::{RequestDescriptor, Response, StatusCode};
/// use shelfcache::interceptor::Interceptor;
/// use shelfcache::lifecycle::LifecycleManager;
/// use shelfcache::origin::HttpOrigin;
/// use shelfcache::policy::PolicyMatcher;
/// use shelfcache::server::Server;
/// use shelfcache::store::MemoryStore;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let manager = LifecycleManager::new(Arc::new(MemoryStore::new()), "catalog");
///     manager.on_init("v1")?;
///     let origin = HttpOrigin::new("http://127.0.0.1:8000")?;
///     let interceptor = Interceptor::from_lifecycle(&manager, PolicyMatcher::default(), origin);
///
///     let server = Server::bind("127.0.0.1:8080").await?;
///     server.serve(Arc::new(interceptor)).await?;
///     Ok(())
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Server {
    /// Binds the server to the given TCP address.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address cannot be bound
    /// (e.g. port already in use, insufficient permissions).
    pub async fn bind(addr: impl AsRef<str>) -> Result<Self, ServerError> {
        let addr = addr.as_ref();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr: addr.to_owned(),
                source: e,
            })?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serves every request through `interceptor` until the process ends.
    pub async fn serve(self, interceptor: Arc<Interceptor>) -> Result<(), ServerError> {
        self.serve_until(interceptor, CancellationToken::new()).await
    }

    /// Serves every request through `interceptor` until `shutdown` fires.
    pub async fn serve_until(
        self,
        interceptor: Arc<Interceptor>,
        shutdown: CancellationToken,
    ) -> Result<(), ServerError> {
        self.run_until(
            move |request: Request| {
                let interceptor = Arc::clone(&interceptor);
                async move { interceptor.on_intercept(request.into_descriptor()).await }
            },
            shutdown,
        )
        .await
    }

    /// Starts accepting connections and dispatching requests to `handler`.
    ///
    /// The handler is wrapped in an [`Arc`] and shared across all spawned
    /// Tokio tasks, so it must be `Send + Sync + 'static`.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Io`] if the TCP listener itself fails.
    pub async fn run<H, F>(self, handler: H) -> Result<(), ServerError>
    where
        H: Fn(Request) -> F + Send + Sync + 'static,
        F: Future<Output = Response> + Send + 'static,
    {
        self.run_until(handler, CancellationToken::new()).await
    }

    /// Like [`run`](Self::run), but stops accepting and closes open
    /// connections once `shutdown` is cancelled.
    pub async fn run_until<H, F>(
        self,
        handler: H,
        shutdown: CancellationToken,
    ) -> Result<(), ServerError>
    where
        H: Fn(Request) -> F + Send + Sync + 'static,
        F: Future<Output = Response> + Send + 'static,
    {
        let handler = Arc::new(handler);
        info!(address = %self.local_addr, "shelfcache listening");

        loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!(address = %self.local_addr, "shutting down");
                    return Ok(());
                }
                accepted = self.listener.accept() => accepted,
            };

            let (stream, peer_addr) = match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    error!(error = %e, "failed to accept connection");
                    continue;
                }
            };

            debug!(peer = %peer_addr, "connection accepted");
            let handler = Arc::clone(&handler);
            let shutdown = shutdown.child_token();

            tokio::spawn(async move {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!(peer = %peer_addr, "connection dropped on shutdown");
                    }
                    result = handle_connection(stream, peer_addr, handler) => {
                        if let Err(e) = result {
                            warn!(peer = %peer_addr, error = %e, "connection closed with error");
                        }
                    }
                }
            });
        }
    }
}

/// Handles a single TCP connection over its lifetime.
///
/// HTTP/1.1 connections are persistent by default: we loop, serving every
/// complete request in the buffer, until the peer closes the connection or
/// signals `Connection: close`. A peer that closes while its request is
/// still being handled cancels that request.
async fn handle_connection<H, F>(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    handler: Arc<H>,
) -> Result<(), std::io::Error>
where
    H: Fn(Request) -> F + Send + Sync + 'static,
    F: Future<Output = Response> + Send + 'static,
{
    let mut buf = BytesMut::with_capacity(INITIAL_BUF_SIZE);

    loop {
        // Serve whatever is already buffered before reading more.
        let (request, consumed) = match Request::parse(&buf) {
            Ok(pair) => pair,
            Err(RequestError::Incomplete) => {
                if buf.len() > MAX_REQUEST_SIZE {
                    warn!(peer = %peer_addr, "request too large, sending 413");
                    let response = Response::new(StatusCode::PAYLOAD_TOO_LARGE)
                        .header("Content-Type", "text/plain; charset=utf-8")
                        .body("Request entity too large");
                    stream.write_all(&response.into_bytes(false)).await?;
                    break;
                }
                if stream.read_buf(&mut buf).await? == 0 {
                    debug!(peer = %peer_addr, "connection closed by peer");
                    break;
                }
                continue;
            }
            Err(e) => {
                warn!(peer = %peer_addr, error = %e, "bad request, sending 400");
                let response = Response::new(StatusCode::BAD_REQUEST)
                    .header("Content-Type", "text/plain; charset=utf-8")
                    .body(format!("Bad Request: {e}"));
                stream.write_all(&response.into_bytes(false)).await?;
                break;
            }
        };

        let keep_alive = request.is_keep_alive();
        debug!(
            peer = %peer_addr,
            method = %request.method(),
            target = %request.target(),
            "dispatching request"
        );

        // Keep reading while the handler runs: EOF means the client is gone,
        // and dropping the handler future abandons its origin call.
        let pending = handler(request);
        tokio::pin!(pending);
        let response = loop {
            tokio::select! {
                response = &mut pending => break response,
                read = stream.read_buf(&mut buf), if buf.len() <= MAX_REQUEST_SIZE => {
                    if read? == 0 {
                        debug!(peer = %peer_addr, "client went away mid-request; abandoning it");
                        return Ok(());
                    }
                }
            }
        };
        stream.write_all(&response.into_bytes(keep_alive)).await?;
        stream.flush().await?;

        let _ = buf.split_to(consumed);

        if !keep_alive {
            debug!(peer = %peer_addr, "Connection: close, shutting down");
            break;
        }
    }

    Ok(())
}
