use axum::extract::{ConnectInfo, Request};
use axum::middleware::Next;
use axum::response::Response;
use std::net::SocketAddr;
use tracing::info;

use crate::identity::extract_identity;

/// Request/response logging middleware.
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    let client = extract_identity(request.headers(), peer);

    info!(
        target: "refiner::middleware",
        method = %method,
        uri = %uri,
        client = %client,
        "Incoming request"
    );

    let response = next.run(request).await;

    let status = response.status();
    info!(
        target: "refiner::middleware",
        method = %method,
        uri = %uri,
        status = %status,
        "Request completed"
    );

    response
}
