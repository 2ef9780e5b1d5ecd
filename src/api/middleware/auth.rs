//! Bearer token authentication middleware.
//!
//! Extracts `Authorization: Bearer <token>`, resolves the session, and
//! injects the `Caller` (plus the raw token, for logout) into request
//! extensions for downstream handlers.

use axum::http::{HeaderValue, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use chrono::Utc;

use crate::api::error::ApiError;
use crate::api::types::{ApiContext, BearerToken};
use crate::auth;
use crate::authorization::Caller;

/// Require a valid, unexpired session token of an active user.
///
/// Accesses `ApiContext` from request extensions (injected by Extension layer).
pub async fn require_auth(req: Request<axum::body::Body>, next: Next) -> Response {
    match require_auth_inner(req, next).await {
        Ok(resp) => resp,
        Err(err) => err.into_response(),
    }
}

async fn require_auth_inner(
    mut req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let ctx: ApiContext = req
        .extensions()
        .get::<ApiContext>()
        .cloned()
        .ok_or(ApiError::Internal("missing API context".into()))?;

    let token = bearer_token(&req).ok_or(ApiError::Unauthorized)?;

    // Connection dropped before the handler runs.
    let user = {
        let conn = ctx.core.open_db()?;
        auth::resolve_session(&conn, &token, Utc::now())?
    };

    req.extensions_mut().insert(Caller::from(&user));
    req.extensions_mut().insert(BearerToken(token));

    let mut response = next.run(req).await;
    response
        .headers_mut()
        .insert("Cache-Control", HeaderValue::from_static("no-store"));
    Ok(response)
}

fn bearer_token<B>(req: &Request<B>) -> Option<String> {
    req.headers()
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(header: Option<&str>) -> Request<()> {
        let mut builder = Request::builder().uri("/api/appointments");
        if let Some(value) = header {
            builder = builder.header("Authorization", value);
        }
        builder.body(()).unwrap()
    }

    #[test]
    fn extracts_bearer_token() {
        assert_eq!(bearer_token(&request(Some("Bearer abc.def"))).as_deref(), Some("abc.def"));
    }

    #[test]
    fn rejects_other_schemes_and_blanks() {
        assert!(bearer_token(&request(None)).is_none());
        assert!(bearer_token(&request(Some("Basic dXNlcjpwYXNz"))).is_none());
        assert!(bearer_token(&request(Some("Bearer   "))).is_none());
    }
}
