//! Medical record endpoints. Writes are admin/doctor only; reads are scoped.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::Serialize;

use crate::api::endpoints::appointments::DeletedResponse;
use crate::api::error::ApiError;
use crate::api::types::{parse_id, ApiContext, ApiJson};
use crate::authorization::Caller;
use crate::medical_record::{self, MedicalRecordPatch, MedicalRecordQuery, NewMedicalRecord};
use crate::models::{MedicalRecord, Pagination};

#[derive(Serialize)]
pub struct RecordsResponse {
    pub records: Vec<MedicalRecord>,
    pub pagination: Pagination,
}

/// `GET /api/medical-records`
pub async fn list(
    State(ctx): State<ApiContext>,
    Extension(caller): Extension<Caller>,
    Query(query): Query<MedicalRecordQuery>,
) -> Result<Json<RecordsResponse>, ApiError> {
    let conn = ctx.core.open_db()?;
    let page = medical_record::list_medical_records(&conn, &caller, &query)?;
    Ok(Json(RecordsResponse {
        records: page.items,
        pagination: page.pagination,
    }))
}

/// `POST /api/medical-records`
pub async fn create(
    State(ctx): State<ApiContext>,
    Extension(caller): Extension<Caller>,
    ApiJson(request): ApiJson<NewMedicalRecord>,
) -> Result<(StatusCode, Json<MedicalRecord>), ApiError> {
    let conn = ctx.core.open_db()?;
    let record = medical_record::create_medical_record(&conn, &caller, request)?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// `GET /api/medical-records/:id`: 403 outside the caller's scope.
pub async fn detail(
    State(ctx): State<ApiContext>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<String>,
) -> Result<Json<MedicalRecord>, ApiError> {
    let id = parse_id(&id)?;
    let conn = ctx.core.open_db()?;
    Ok(Json(medical_record::get_medical_record(&conn, &caller, &id)?))
}

/// `PUT /api/medical-records/:id`
pub async fn update(
    State(ctx): State<ApiContext>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<String>,
    ApiJson(patch): ApiJson<MedicalRecordPatch>,
) -> Result<Json<MedicalRecord>, ApiError> {
    let id = parse_id(&id)?;
    let conn = ctx.core.open_db()?;
    Ok(Json(medical_record::update_medical_record(&conn, &caller, &id, patch)?))
}

/// `DELETE /api/medical-records/:id`
pub async fn remove(
    State(ctx): State<ApiContext>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<String>,
) -> Result<Json<DeletedResponse>, ApiError> {
    let id = parse_id(&id)?;
    let conn = ctx.core.open_db()?;
    medical_record::delete_medical_record(&conn, &caller, &id)?;
    Ok(Json(DeletedResponse {
        message: "Medical record deleted successfully",
    }))
}
