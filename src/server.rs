//! Scrape Server
//!
//! Serves `/metrics` from the Prometheus sink plus liveness and readiness
//! probes on one HTTP/1 listener.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::adapters::PrometheusSink;
use crate::error::{Error, Result};
use crate::liveness::LivenessContext;

/// What the HTTP handlers need to answer.
#[derive(Debug, Clone)]
pub struct ScrapeState {
    pub sink: Arc<PrometheusSink>,
    pub ctx: Arc<LivenessContext>,
}

fn respond(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
}

/// Answer one request path.
pub fn route(path: &str, state: &ScrapeState) -> Response<Full<Bytes>> {
    match path {
        "/metrics" => match state.sink.render() {
            Ok(buffer) => {
                let mut response = respond(StatusCode::OK, buffer);
                response.headers_mut().insert(
                    CONTENT_TYPE,
                    HeaderValue::from_static(state.sink.content_type()),
                );
                response
            }
            Err(e) => {
                error!(error = %e, "Failed to encode metrics");
                respond(StatusCode::INTERNAL_SERVER_ERROR, "failed to encode metrics")
            }
        },
        "/healthz" | "/livez" => respond(StatusCode::OK, "ok"),
        "/readyz" => {
            if state.ctx.is_ready() {
                respond(StatusCode::OK, "ok")
            } else {
                respond(StatusCode::SERVICE_UNAVAILABLE, "waiting for lookupd sync")
            }
        }
        _ => respond(StatusCode::NOT_FOUND, "not found"),
    }
}

/// Bind the scrape listener. Failure here is fatal for the process.
pub async fn bind(addr: SocketAddr) -> Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Internal(format!("Failed to bind metrics server on {}: {}", addr, e)))
}

/// Accept connections until `shutdown` fires.
pub async fn serve(
    listener: TcpListener,
    state: ScrapeState,
    shutdown: CancellationToken,
) -> Result<()> {
    info!("Metrics server listening on {}", listener.local_addr()?);

    loop {
        let (stream, _) = tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Metrics server shutting down");
                return Ok(());
            }
            accepted = listener.accept() => accepted?,
        };

        let io = TokioIo::new(stream);
        let state = state.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                let response = route(req.uri().path(), &state);
                async move { Ok::<_, Infallible>(response) }
            });

            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                error!("Metrics server connection error: {}", e);
            }
        });
    }
}
