//! Patient endpoints.
//!
//! Staff manage every patient; a patient reads and completes their own
//! profile through `/api/patients/me`.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::Serialize;

use crate::api::endpoints::appointments::DeletedResponse;
use crate::api::error::ApiError;
use crate::api::types::{parse_id, ApiContext, ApiJson};
use crate::authorization::Caller;
use crate::directory::{self, NewPatient, PatientPatch, PatientQuery};
use crate::models::{Pagination, Patient};

#[derive(Serialize)]
pub struct PatientsResponse {
    pub patients: Vec<Patient>,
    pub pagination: Pagination,
}

/// `GET /api/patients`
pub async fn list(
    State(ctx): State<ApiContext>,
    Extension(caller): Extension<Caller>,
    Query(query): Query<PatientQuery>,
) -> Result<Json<PatientsResponse>, ApiError> {
    let conn = ctx.core.open_db()?;
    let page = directory::list_patients(&conn, &caller, &query)?;
    Ok(Json(PatientsResponse {
        patients: page.items,
        pagination: page.pagination,
    }))
}

/// `POST /api/patients`
pub async fn create(
    State(ctx): State<ApiContext>,
    Extension(caller): Extension<Caller>,
    ApiJson(request): ApiJson<NewPatient>,
) -> Result<(StatusCode, Json<Patient>), ApiError> {
    let conn = ctx.core.open_db()?;
    let patient = directory::create_patient(&conn, &caller, request)?;
    Ok((StatusCode::CREATED, Json(patient)))
}

/// `GET /api/patients/me`
pub async fn me(
    State(ctx): State<ApiContext>,
    Extension(caller): Extension<Caller>,
) -> Result<Json<Patient>, ApiError> {
    let conn = ctx.core.open_db()?;
    Ok(Json(directory::my_patient_profile(&conn, &caller)?))
}

/// `PUT /api/patients/me`: marks the profile complete.
pub async fn update_me(
    State(ctx): State<ApiContext>,
    Extension(caller): Extension<Caller>,
    ApiJson(patch): ApiJson<PatientPatch>,
) -> Result<Json<Patient>, ApiError> {
    let conn = ctx.core.open_db()?;
    Ok(Json(directory::update_my_patient_profile(&conn, &caller, patch)?))
}

/// `GET /api/patients/:id`
pub async fn detail(
    State(ctx): State<ApiContext>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<String>,
) -> Result<Json<Patient>, ApiError> {
    let id = parse_id(&id)?;
    let conn = ctx.core.open_db()?;
    Ok(Json(directory::get_patient(&conn, &caller, &id)?))
}

/// `PUT /api/patients/:id`
pub async fn update(
    State(ctx): State<ApiContext>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<String>,
    ApiJson(patch): ApiJson<PatientPatch>,
) -> Result<Json<Patient>, ApiError> {
    let id = parse_id(&id)?;
    let conn = ctx.core.open_db()?;
    Ok(Json(directory::update_patient(&conn, &caller, &id, patch)?))
}

/// `DELETE /api/patients/:id`: refused while history exists.
pub async fn remove(
    State(ctx): State<ApiContext>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<String>,
) -> Result<Json<DeletedResponse>, ApiError> {
    let id = parse_id(&id)?;
    let conn = ctx.core.open_db()?;
    directory::delete_patient(&conn, &caller, &id)?;
    Ok(Json(DeletedResponse {
        message: "Patient deleted successfully",
    }))
}
