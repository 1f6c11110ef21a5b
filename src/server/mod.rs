//! Async TCP front end using Tokio.
//!
//! Accepts HTTP/1.1 connections (keep-alive included) and hands every request
//! to a [`CacheWorker`], which answers from its bucket or the upstream network.
//! This is the one place where a request-path failure is turned into an HTTP
//! status, because a proxy must always answer something.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{Buf, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::http::{
    StatusCode,
    request::{Request, RequestError},
    response::Response,
};
use crate::network::FetchError;
use crate::worker::{CacheWorker, Source};

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

/// The offcache edge server.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use offcache::server::Server;
/// # use offcache::worker::CacheWorker;
///
/// # async fn example(worker: Arc<CacheWorker>) -> Result<(), Box<dyn std::error::Error>> {
/// let server = Server::bind("127.0.0.1:8080").await?;
/// server.serve(worker).await?;
/// # Ok(())
/// # }
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

    /// Serves requests through `worker` until the process is terminated.
    pub async fn serve(self, worker: Arc<CacheWorker>) -> Result<(), ServerError> {
        self.serve_with_shutdown(worker, std::future::pending()).await
    }

    /// Serves requests through `worker` until `shutdown` resolves.
    ///
    /// Connections already accepted keep running on their own tasks; only
    /// the accept loop stops.
    pub async fn serve_with_shutdown<S>(
        self,
        worker: Arc<CacheWorker>,
        shutdown: S,
    ) -> Result<(), ServerError>
    where
        S: Future<Output = ()> + Send,
    {
        info!(address = %self.local_addr, bucket = %worker.bucket(), "offcache listening");
        tokio::pin!(shutdown);

        loop {
            let accepted = tokio::select! {
                accepted = self.listener.accept() => accepted,
                () = &mut shutdown => {
                    info!(address = %self.local_addr, "shutting down");
                    return Ok(());
                }
            };

            let (stream, peer_addr) = match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    error!(error = %e, "failed to accept connection");
                    continue;
                }
            };

            debug!(peer = %peer_addr, "connection accepted");
            let worker = Arc::clone(&worker);

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, peer_addr, worker).await {
                    warn!(peer = %peer_addr, error = %e, "connection closed with error");
                }
            });
        }
    }
}

/// Produces the downstream response for one request.
///
/// Absolute-form targets for an origin the worker does not serve are refused
/// with `403 Forbidden` and never reach the network. Network failures behind a
/// cache miss become `502 Bad Gateway` carrying the error text; cache hits and
/// upstream responses pass through unchanged.
pub async fn respond(worker: &CacheWorker, request: &Request) -> Response {
    if let Some(origin) = request.origin() {
        if !worker.serves_origin(origin) {
            warn!(method = %request.method(), %origin, path = %request.path(), "refusing foreign origin");
            return Response::new(StatusCode::Forbidden)
                .body(format!("Forbidden: {origin} is not served here"));
        }
    }

    match worker.intercept(request).await {
        Ok(interception) => {
            debug!(
                method = %request.method(),
                path = %request.path(),
                status = interception.response.status().as_u16(),
                cached = interception.source == Source::Cache,
                "request answered"
            );
            interception.response
        }
        Err(e) => {
            warn!(method = %request.method(), path = %request.path(), error = %e, "upstream fetch failed");
            bad_gateway(&e)
        }
    }
}

fn bad_gateway(error: &FetchError) -> Response {
    Response::new(StatusCode::BadGateway).body(format!("Bad Gateway: {error}"))
}

/// Handles a single TCP connection over its lifetime.
///
/// HTTP/1.1 connections are persistent by default: we loop, answering every
/// complete request in the buffer, until the peer closes the connection or
/// signals `Connection: close`.
async fn handle_connection(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    worker: Arc<CacheWorker>,
) -> Result<(), std::io::Error> {
    let mut buf = BytesMut::with_capacity(INITIAL_BUF_SIZE);

    loop {
        // Drain every complete (possibly pipelined) request already buffered.
        loop {
            let (request, consumed) = match Request::parse(&buf) {
                Ok(pair) => pair,
                Err(RequestError::Incomplete) => break,
                Err(e) => {
                    warn!(peer = %peer_addr, error = %e, "bad request, sending 400");
                    let response = Response::new(StatusCode::BadRequest)
                        .body(format!("Bad Request: {e}"))
                        .keep_alive(false);
                    stream.write_all(&response.into_bytes()).await?;
                    return Ok(());
                }
            };
            buf.advance(consumed);

            let keep_alive = request.is_keep_alive();
            let response = respond(&worker, &request).await.keep_alive(keep_alive);
            stream.write_all(&response.into_bytes()).await?;
            stream.flush().await?;

            if !keep_alive {
                debug!(peer = %peer_addr, "Connection: close, shutting down");
                return Ok(());
            }
        }

        if buf.len() > MAX_REQUEST_SIZE {
            warn!(peer = %peer_addr, "request too large, sending 413");
            let response = Response::new(StatusCode::PayloadTooLarge)
                .body("Request entity too large")
                .keep_alive(false);
            stream.write_all(&response.into_bytes()).await?;
            return Ok(());
        }

        if stream.read_buf(&mut buf).await? == 0 {
            debug!(peer = %peer_addr, "connection closed by peer");
            return Ok(());
        }
    }
}
