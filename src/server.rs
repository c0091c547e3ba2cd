//! HTTP server and graceful shutdown.
//!
//! Each request body is collected up front, turned into a [`Context`] and
//! run through the application chain, which is frozen once when serving
//! starts. An error escaping the chain is answered with
//! [`Error::status_code`]; hyper itself never sees an error.
//!
//! # Shutdown
//!
//! By default the server stops on SIGTERM or Ctrl-C. Hosts and tests can
//! supply their own signal with [`Server::with_graceful_shutdown`]. Either
//! way the server:
//! 1. stops calling `accept()`, so queued connections are refused;
//! 2. waits for every connection task already spawned;
//! 3. returns from [`Server::serve`].
//!
//! Spans of requests still in flight are closed by the requests themselves,
//! so an instrumented app loses no tracer on shutdown.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http::StatusCode;
use http_body_util::{BodyExt, Full};
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::app::{App, run_chain};
use crate::context::Context;
use crate::error::Error;
use crate::middleware::{BoxFuture, SharedMiddleware};

type Chain = Arc<[SharedMiddleware]>;

/// The HTTP server.
pub struct Server {
    addr: SocketAddr,
    shutdown: Option<BoxFuture<()>>,
}

impl Server {
    /// Configures the server to bind to `addr` when [`serve`](Server::serve)
    /// is called.
    ///
    /// # Panics
    ///
    /// Panics if `addr` is not a valid `host:port` string.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use tsu_apm::Server;
    /// let server = Server::bind("0.0.0.0:3000");
    /// ```
    pub fn bind(addr: &str) -> Self {
        let addr: SocketAddr = addr.parse().expect("invalid socket address");
        Self { addr, shutdown: None }
    }

    /// Drains and stops once `signal` resolves, instead of on SIGTERM/Ctrl-C.
    pub fn with_graceful_shutdown(mut self, signal: impl Future<Output = ()> + Send + 'static) -> Self {
        self.shutdown = Some(Box::pin(signal));
        self
    }

    /// Starts accepting connections and running each request through `app`.
    ///
    /// Returns only after a full graceful shutdown: the shutdown signal,
    /// followed by every in-flight connection completing.
    pub async fn serve(self, app: App) -> Result<(), Error> {
        let listener = TcpListener::bind(self.addr).await?;
        let chain: Chain = app.into_chain();
        let mut shutdown = self.shutdown.unwrap_or_else(|| Box::pin(shutdown_signal()));

        info!(addr = %self.addr, middleware = chain.len(), "tsu-apm listening");

        let mut connections = JoinSet::new();
        loop {
            tokio::select! {
                // Checked first, so a pending signal wins over queued connections.
                biased;

                () = &mut shutdown => {
                    info!(in_flight = connections.len(), "shutdown signal received, draining connections");
                    break;
                }

                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        connections.spawn(serve_connection(Arc::clone(&chain), stream, peer));
                    }
                    Err(e) => error!("accept error: {e}"),
                },

                // Finished connections are reaped as we go; the set stays as
                // large as the number of open connections.
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        while connections.join_next().await.is_some() {}

        info!("tsu-apm stopped");
        Ok(())
    }
}

/// Serves every request of one connection, HTTP/1.1 or HTTP/2 as negotiated.
async fn serve_connection(chain: Chain, stream: TcpStream, peer: SocketAddr) {
    debug!(%peer, "connection accepted");
    // service_fn is invoked once per request, so the chain is cloned per request.
    let service = service_fn(move |req| dispatch(Arc::clone(&chain), req, peer));
    if let Err(e) = ConnBuilder::new(TokioExecutor::new())
        .serve_connection(TokioIo::new(stream), service)
        .await
    {
        error!(%peer, "connection error: {e}");
    }
}

// ── Request dispatch ──────────────────────────────────────────────────────────

/// Runs one request through the middleware chain.
///
/// A body that fails to arrive is answered `400`, a failed chain with the
/// error's status. The response is otherwise whatever the chain left on the
/// [`Context`].
async fn dispatch(
    chain: Chain,
    req: hyper::Request<hyper::body::Incoming>,
    peer: SocketAddr,
) -> Result<http::Response<Full<Bytes>>, std::convert::Infallible> {
    let (parts, body) = req.into_parts();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!(%peer, "failed to read request body: {e}");
            return Ok(empty(StatusCode::BAD_REQUEST));
        }
    };

    // Only the path takes part in routing and naming; the query is dropped.
    let ctx = Context::from_parts(parts.method, parts.uri.path().to_owned(), parts.headers, body);
    match run_chain(chain, ctx.clone()).await {
        Ok(()) => Ok(ctx.to_response()),
        Err(e) => {
            error!(method = %ctx.method(), path = ctx.path(), status = e.status_code().as_u16(), "request failed: {e}");
            Ok(empty(e.status_code()))
        }
    }
}

fn empty(status: StatusCode) -> http::Response<Full<Bytes>> {
    let mut response = http::Response::new(Full::new(Bytes::new()));
    *response.status_mut() = status;
    response
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// Resolves on the first SIGTERM or Ctrl-C. Only Ctrl-C exists off Unix.
async fn shutdown_signal() {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("cannot listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("cannot listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = interrupt => {}
        () = terminate => {}
    }
}
