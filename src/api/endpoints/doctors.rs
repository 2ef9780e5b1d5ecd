//! Doctor endpoints. Any authenticated role may browse doctors.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::Serialize;

use crate::api::endpoints::appointments::DeletedResponse;
use crate::api::error::ApiError;
use crate::api::types::{parse_id, ApiContext, ApiJson};
use crate::authorization::Caller;
use crate::directory::{self, DoctorPatch, DoctorQuery, NewDoctor};
use crate::models::{Doctor, Pagination};

#[derive(Serialize)]
pub struct DoctorsResponse {
    pub doctors: Vec<Doctor>,
    pub pagination: Pagination,
}

/// `GET /api/doctors`
pub async fn list(
    State(ctx): State<ApiContext>,
    Query(query): Query<DoctorQuery>,
) -> Result<Json<DoctorsResponse>, ApiError> {
    let conn = ctx.core.open_db()?;
    let page = directory::list_doctors(&conn, &query)?;
    Ok(Json(DoctorsResponse {
        doctors: page.items,
        pagination: page.pagination,
    }))
}

/// `GET /api/doctors/:id`
pub async fn detail(
    State(ctx): State<ApiContext>,
    Path(id): Path<String>,
) -> Result<Json<Doctor>, ApiError> {
    let id = parse_id(&id)?;
    let conn = ctx.core.open_db()?;
    Ok(Json(directory::get_doctor(&conn, &id)?))
}

/// `POST /api/doctors`
pub async fn create(
    State(ctx): State<ApiContext>,
    Extension(caller): Extension<Caller>,
    ApiJson(request): ApiJson<NewDoctor>,
) -> Result<(StatusCode, Json<Doctor>), ApiError> {
    let conn = ctx.core.open_db()?;
    let doctor = directory::create_doctor(&conn, &caller, request)?;
    Ok((StatusCode::CREATED, Json(doctor)))
}

/// `PUT /api/doctors/:id`: admin, or the doctor linked to this profile.
pub async fn update(
    State(ctx): State<ApiContext>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<String>,
    ApiJson(patch): ApiJson<DoctorPatch>,
) -> Result<Json<Doctor>, ApiError> {
    let id = parse_id(&id)?;
    let conn = ctx.core.open_db()?;
    Ok(Json(directory::update_doctor(&conn, &caller, &id, patch)?))
}

/// `DELETE /api/doctors/:id`
pub async fn remove(
    State(ctx): State<ApiContext>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<String>,
) -> Result<Json<DeletedResponse>, ApiError> {
    let id = parse_id(&id)?;
    let conn = ctx.core.open_db()?;
    directory::delete_doctor(&conn, &caller, &id)?;
    Ok(Json(DeletedResponse {
        message: "Doctor deleted successfully",
    }))
}
