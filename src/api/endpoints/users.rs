//! User administration endpoints (admin only).

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::Serialize;

use crate::api::endpoints::appointments::DeletedResponse;
use crate::api::error::ApiError;
use crate::api::types::{parse_id, ApiContext, ApiJson};
use crate::authorization::Caller;
use crate::directory::{self, NewUser, UserQuery, UserStatusUpdate};
use crate::models::{Pagination, User};

#[derive(Serialize)]
pub struct UsersResponse {
    pub users: Vec<User>,
    pub pagination: Pagination,
}

/// `GET /api/users`
pub async fn list(
    State(ctx): State<ApiContext>,
    Extension(caller): Extension<Caller>,
    Query(query): Query<UserQuery>,
) -> Result<Json<UsersResponse>, ApiError> {
    let conn = ctx.core.open_db()?;
    let page = directory::list_users(&conn, &caller, &query)?;
    Ok(Json(UsersResponse {
        users: page.items,
        pagination: page.pagination,
    }))
}

/// `POST /api/users`
pub async fn create(
    State(ctx): State<ApiContext>,
    Extension(caller): Extension<Caller>,
    ApiJson(request): ApiJson<NewUser>,
) -> Result<(StatusCode, Json<User>), ApiError> {
    let mut conn = ctx.core.open_db()?;
    let user = directory::create_user(&mut conn, &caller, request)?;
    Ok((StatusCode::CREATED, Json(user)))
}

/// `PUT /api/users/:id/status`: deactivation also revokes sessions.
pub async fn set_status(
    State(ctx): State<ApiContext>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<String>,
    ApiJson(update): ApiJson<UserStatusUpdate>,
) -> Result<Json<User>, ApiError> {
    let id = parse_id(&id)?;
    let conn = ctx.core.open_db()?;
    Ok(Json(directory::set_user_status(&conn, &caller, &id, update)?))
}

/// `DELETE /api/users/:id`: refused while the linked profile has history.
pub async fn remove(
    State(ctx): State<ApiContext>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<String>,
) -> Result<Json<DeletedResponse>, ApiError> {
    let id = parse_id(&id)?;
    let mut conn = ctx.core.open_db()?;
    directory::delete_user(&mut conn, &caller, &id)?;
    Ok(Json(DeletedResponse {
        message: "User deleted successfully",
    }))
}
