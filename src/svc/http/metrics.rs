//! # Prometheus module
//!
//! This module provides a handler to export telemetry using prometheus format

use hyper::{header, Body, HeaderMap, Request, Response, StatusCode};
use prometheus::{Encoder, TextEncoder};

// -----------------------------------------------------------------------------
// handler

#[tracing::instrument(skip_all)]
pub async fn handler(_req: Request<Body>) -> Response<Body> {
    let mut res = Response::default();
    let headers: &mut HeaderMap = res.headers_mut();

    let encoder = TextEncoder::new();
    let families = prometheus::gather();

    let mut buf = vec![];
    match encoder.encode(&families, &mut buf) {
        Ok(_) => {
            headers.insert(
                header::CONTENT_TYPE,
                header::HeaderValue::from_static("text/plain; charset=utf-8"),
            );
            headers.insert(
                header::CONTENT_LENGTH,
                header::HeaderValue::from_str(&buf.len().to_string())
                    .expect("content-length to be iso8859-1 compliant"),
            );

            *res.status_mut() = StatusCode::OK;
            *res.body_mut() = Body::from(buf);
        }
        Err(err) => {
            let message = serde_json::json!({"error": err.to_string() }).to_string();

            headers.insert(
                header::CONTENT_TYPE,
                header::HeaderValue::from_static("application/json"),
            );
            headers.insert(
                header::CONTENT_LENGTH,
                header::HeaderValue::from_str(&message.len().to_string())
                    .expect("content length to be iso8859-1 compliant"),
            );

            *res.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            *res.body_mut() = Body::from(message);
        }
    }

    res
}
