//! Shared types for the API layer.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, Request};
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::core_state::CoreState;

// ═══════════════════════════════════════════════════════════
// API context: shared state for the router
// ═══════════════════════════════════════════════════════════

/// Shared context for all API routes and middleware.
#[derive(Clone)]
pub struct ApiContext {
    pub core: Arc<CoreState>,
}

impl ApiContext {
    pub fn new(core: Arc<CoreState>) -> Self {
        Self { core }
    }

    pub fn token_ttl(&self) -> chrono::Duration {
        self.core.config.token_ttl
    }
}

// ═══════════════════════════════════════════════════════════
// Request helpers
// ═══════════════════════════════════════════════════════════

/// Raw bearer token of the current request, injected by the auth
/// middleware next to the `Caller`.
#[derive(Debug, Clone)]
pub struct BearerToken(pub String);

/// `Json` extractor whose rejections are 400s in the API error format.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApiJson<T>(pub T);

#[axum::async_trait]
impl<S, T> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match axum::Json::<T>::from_request(req, state).await {
            Ok(axum::Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(json_rejection(rejection)),
        }
    }
}

fn json_rejection(rejection: JsonRejection) -> ApiError {
    tracing::debug!(error = %rejection.body_text(), "Rejected request body");
    match rejection {
        JsonRejection::MissingJsonContentType(_) => {
            ApiError::BadRequest("Expected a JSON request body".into())
        }
        other => ApiError::BadRequest(format!("Invalid request body: {}", other.body_text())),
    }
}

/// Parse a path id, 400 on malformed input.
pub fn parse_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw.trim()).map_err(|_| ApiError::BadRequest("Invalid ID format".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_id_accepts_uuid() {
        let id = Uuid::new_v4();
        assert_eq!(parse_id(&id.to_string()).unwrap(), id);
    }

    #[test]
    fn parse_id_rejects_garbage() {
        assert!(matches!(parse_id("507f1f77bcf86cd799439011"), Err(ApiError::BadRequest(_))));
    }
}
