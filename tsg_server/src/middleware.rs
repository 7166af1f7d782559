use crate::auth::AuthenticatorExt;
use crate::error::ApiError;
use axum::middleware::Next;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::{body::Body, http::Request};
use std::time::Instant;

/// Reject requests the configured authenticator does not accept.
///
/// A router without an `AuthenticatorExt` rejects everything.
pub async fn authenticate(req: Request<Body>, next: Next) -> Response {
    let allowed = match req.extensions().get::<AuthenticatorExt>() {
        Some(auth) => auth.0.is_authenticated(req.headers()).await,
        None => false,
    };

    if !allowed {
        tracing::warn!(method = %req.method(), path = %req.uri().path(), "request not authenticated");
        return ApiError::Unauthorized.into_response();
    }

    next.run(req).await
}

/// Emit one event per request. The request and the response pass through as-is.
pub async fn log_requests(req: Request<Body>, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let started = Instant::now();

    let resp = next.run(req).await;

    tracing::info!(
        %method,
        %path,
        status = resp.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "http request"
    );
    resp
}
