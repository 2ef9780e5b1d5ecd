//! Authentication endpoints.
//!
//! `POST /api/auth/register` and `POST /api/auth/login` are unprotected;
//! `GET /api/auth/me` and `POST /api/auth/logout` need a bearer token.

use axum::extract::State;
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::Serialize;

use crate::api::error::ApiError;
use crate::api::types::{ApiContext, ApiJson, BearerToken};
use crate::auth::{self, AuthSession, LoginRequest, RegisterRequest};
use crate::authorization::Caller;
use crate::db;
use crate::models::User;

#[derive(Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}

/// `POST /api/auth/register`: self-service signup; admins cannot be registered.
pub async fn register(
    State(ctx): State<ApiContext>,
    ApiJson(request): ApiJson<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthSession>), ApiError> {
    let conn = ctx.core.open_db()?;
    let session = auth::register(&conn, request, ctx.token_ttl())?;
    Ok((StatusCode::CREATED, Json(session)))
}

/// `POST /api/auth/login`
pub async fn login(
    State(ctx): State<ApiContext>,
    ApiJson(request): ApiJson<LoginRequest>,
) -> Result<Json<AuthSession>, ApiError> {
    let conn = ctx.core.open_db()?;
    let session = auth::login(&conn, request, ctx.token_ttl())?;
    Ok(Json(session))
}

/// `GET /api/auth/me`: the authenticated user.
pub async fn me(
    State(ctx): State<ApiContext>,
    Extension(caller): Extension<Caller>,
) -> Result<Json<User>, ApiError> {
    let conn = ctx.core.open_db()?;
    let user = db::get_user(&conn, &caller.user_id)?.ok_or(ApiError::Unauthorized)?;
    Ok(Json(user))
}

/// `POST /api/auth/logout`: revokes the presented token.
pub async fn logout(
    State(ctx): State<ApiContext>,
    Extension(token): Extension<BearerToken>,
) -> Result<Json<MessageResponse>, ApiError> {
    let conn = ctx.core.open_db()?;
    auth::logout(&conn, &token.0)?;
    Ok(Json(MessageResponse {
        message: "Logged out",
    }))
}
