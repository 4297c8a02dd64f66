//! # HTTP module
//!
//! This module provides a small hyper server used to expose the operator's
//! health check and, when the `metrics` feature is enabled, its prometheus
//! endpoint.

use std::time::Instant;

use hyper::{header, Body, Request, Response, StatusCode};
use tracing::info;

#[cfg(feature = "metrics")]
pub mod metrics;
pub mod server;

// -----------------------------------------------------------------------------
// Router

/// dispatches an incoming request to the matching handler and emits an access log.
#[tracing::instrument(skip_all)]
pub async fn router(req: Request<Body>) -> Result<Response<Body>, hyper::Error> {
    let method = req.method().to_string();
    let uri = req.uri().to_string();
    let begin = Instant::now();

    let res = match (req.method(), req.uri().path()) {
        (&hyper::Method::GET, "/healthz") => healthz(req).await,
        #[cfg(feature = "metrics")]
        (&hyper::Method::GET, "/metrics") => metrics::handler(req).await,
        _ => not_found(req).await,
    };

    info!(
        method = method,
        uri = uri,
        duration = format!("{}us", begin.elapsed().as_micros()),
        status = res.status().as_u16(),
        "Request received"
    );

    Ok(res)
}

// -----------------------------------------------------------------------------
// Not found

#[tracing::instrument(skip_all)]
pub async fn not_found(_req: Request<Body>) -> Response<Body> {
    let mut res = Response::default();

    *res.status_mut() = StatusCode::NOT_FOUND;
    res
}

// -----------------------------------------------------------------------------
// Healthz

#[tracing::instrument(skip_all)]
pub async fn healthz(_req: Request<Body>) -> Response<Body> {
    let mut res = Response::default();

    let message = serde_json::json!({"message": "Everything is fine!"}).to_string();

    res.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("application/json"),
    );
    *res.status_mut() = StatusCode::OK;
    *res.body_mut() = Body::from(message);

    res
}
