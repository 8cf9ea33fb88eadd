//! Shared-secret request signatures.
//!
//! A client sends `x-blocker-date` and an `Authorization` header holding the
//! base64 HMAC-SHA256 of `METHOD\ndate\npath` under the shared key.

use crate::api::AppState;
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use blocker_core::crypto::signing;

/// Header carrying the signed request date.
pub const DATE_HEADER: &str = "x-blocker-date";

fn header_str<'a>(headers: &'a HeaderMap, name: impl header::AsHeaderName) -> &'a str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}

/// Reject requests whose signature does not match. Passes everything when no
/// shared key is configured.
pub async fn require_signature(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(key) = state.shared_key.as_deref() else {
        return next.run(request).await;
    };

    let method = request.method().as_str();
    let resource = request.uri().path();
    let date = header_str(request.headers(), DATE_HEADER);
    let presented = header_str(request.headers(), header::AUTHORIZATION);

    if signing::verify(key, method, date, resource, presented) {
        return next.run(request).await;
    }

    tracing::warn!(%method, %resource, %date, "request signature rejected");
    (StatusCode::UNAUTHORIZED, "Unauthorized").into_response()
}
