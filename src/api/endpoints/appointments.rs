//! Appointment endpoints.
//!
//! - `GET /api/appointments`: scoped, filtered, paginated list
//! - `POST /api/appointments`: book (conflict-checked)
//! - `GET /api/appointments/stats`: scoped dashboard counts
//! - `GET|PUT|DELETE /api/appointments/:id`

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use chrono::Utc;
use serde::Serialize;

use crate::api::error::ApiError;
use crate::api::types::{parse_id, ApiContext, ApiJson};
use crate::appointment::{self, AppointmentPatch, AppointmentQuery, NewAppointment};
use crate::authorization::Caller;
use crate::db::AppointmentStats;
use crate::models::{Appointment, AppointmentView, Pagination};

#[derive(Serialize)]
pub struct AppointmentsResponse {
    pub appointments: Vec<AppointmentView>,
    pub pagination: Pagination,
}

#[derive(Serialize)]
pub struct DeletedResponse {
    pub message: &'static str,
}

/// `GET /api/appointments`: list appointments visible to the caller.
pub async fn list(
    State(ctx): State<ApiContext>,
    Extension(caller): Extension<Caller>,
    Query(query): Query<AppointmentQuery>,
) -> Result<Json<AppointmentsResponse>, ApiError> {
    let conn = ctx.core.open_db()?;
    let page = appointment::list_appointments(&conn, &caller, &query)?;
    Ok(Json(AppointmentsResponse {
        appointments: page.items,
        pagination: page.pagination,
    }))
}

/// `POST /api/appointments`
pub async fn create(
    State(ctx): State<ApiContext>,
    Extension(caller): Extension<Caller>,
    ApiJson(request): ApiJson<NewAppointment>,
) -> Result<(StatusCode, Json<Appointment>), ApiError> {
    let mut conn = ctx.core.open_db()?;
    let created = appointment::create_appointment(&mut conn, &caller, request)?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// `GET /api/appointments/stats`
pub async fn stats(
    State(ctx): State<ApiContext>,
    Extension(caller): Extension<Caller>,
) -> Result<Json<AppointmentStats>, ApiError> {
    let conn = ctx.core.open_db()?;
    Ok(Json(appointment::appointment_stats(&conn, &caller, Utc::now())?))
}

/// `GET /api/appointments/:id`
pub async fn detail(
    State(ctx): State<ApiContext>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<String>,
) -> Result<Json<Appointment>, ApiError> {
    let id = parse_id(&id)?;
    let conn = ctx.core.open_db()?;
    Ok(Json(appointment::get_appointment(&conn, &caller, &id)?))
}

/// `PUT /api/appointments/:id`: partial update by admin or doctor.
pub async fn update(
    State(ctx): State<ApiContext>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<String>,
    ApiJson(patch): ApiJson<AppointmentPatch>,
) -> Result<Json<Appointment>, ApiError> {
    let id = parse_id(&id)?;
    let mut conn = ctx.core.open_db()?;
    Ok(Json(appointment::update_appointment(&mut conn, &caller, &id, patch)?))
}

/// `DELETE /api/appointments/:id`
pub async fn remove(
    State(ctx): State<ApiContext>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<String>,
) -> Result<Json<DeletedResponse>, ApiError> {
    let id = parse_id(&id)?;
    let conn = ctx.core.open_db()?;
    appointment::delete_appointment(&conn, &caller, &id)?;
    Ok(Json(DeletedResponse {
        message: "Appointment deleted successfully",
    }))
}
