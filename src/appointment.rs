//! Appointment scheduling behind `/api/appointments`.
//!
//! The conflict check and the write that follows it run inside one
//! `BEGIN IMMEDIATE` transaction. SQLite grants a single writer at a time,
//! so two overlapping bookings for the same doctor serialize and the second
//! one observes the first.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{Connection, TransactionBehavior};
use serde::Deserialize;
use uuid::Uuid;

use crate::authorization::{AccessDenied, Caller, STAFF};
use crate::db::{self, AppointmentStats, DatabaseError};
use crate::models::*;
use crate::patient_profile::{ensure_patient_profile, ProfileError};
use crate::validation::{self, FieldError, Validator};
use crate::visibility;

pub const CONFLICT_MESSAGE: &str = "Doctor already has an appointment at this time";
const DURATION_MESSAGE: &str = "Duration must be between 15 and 120 minutes";

// ─── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum AppointmentError {
    #[error("Doctor already has an appointment at this time")]
    Conflict { conflicting_id: Uuid },

    #[error("Validation failed")]
    Validation(Vec<FieldError>),

    #[error("Doctor not found")]
    DoctorNotFound,

    #[error("Patient not found")]
    PatientNotFound,

    #[error("Appointment not found")]
    NotFound,

    #[error("{0}")]
    Forbidden(String),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl From<rusqlite::Error> for AppointmentError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(DatabaseError::from(err))
    }
}

impl From<ProfileError> for AppointmentError {
    fn from(err: ProfileError) -> Self {
        match err {
            ProfileError::EmailClaimed => Self::Forbidden(err.to_string()),
            ProfileError::Database(e) => Self::Database(e),
        }
    }
}

impl From<AccessDenied> for AppointmentError {
    fn from(err: AccessDenied) -> Self {
        Self::Forbidden(err.0)
    }
}

impl From<Vec<FieldError>> for AppointmentError {
    fn from(errors: Vec<FieldError>) -> Self {
        Self::Validation(errors)
    }
}

// ─── Conflict checker ─────────────────────────────────────────────────────────

/// First appointment of `doctor_id` whose interval overlaps `slot`.
///
/// Cancelled and no-show appointments never block; `exclude` skips the
/// appointment being updated.
pub fn find_conflict(
    conn: &Connection,
    doctor_id: &Uuid,
    slot: &TimeSlot,
    exclude: Option<&Uuid>,
) -> Result<Option<Appointment>, DatabaseError> {
    let candidates = db::list_blocking_appointments(conn, doctor_id, &slot.end, exclude)?;
    Ok(candidates
        .into_iter()
        .find(|existing| slot.overlaps(&existing.slot())))
}

pub fn check_conflict(
    conn: &Connection,
    doctor_id: &Uuid,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    exclude: Option<&Uuid>,
) -> Result<bool, DatabaseError> {
    Ok(find_conflict(conn, doctor_id, &TimeSlot { start, end }, exclude)?.is_some())
}

fn ensure_slot_free(
    conn: &Connection,
    doctor_id: &Uuid,
    slot: &TimeSlot,
    exclude: Option<&Uuid>,
) -> Result<(), AppointmentError> {
    if let Some(existing) = find_conflict(conn, doctor_id, slot, exclude)? {
        tracing::info!(
            doctor_id = %doctor_id,
            conflicting_id = %existing.id,
            start = %slot.start,
            "Rejected overlapping appointment"
        );
        return Err(AppointmentError::Conflict {
            conflicting_id: existing.id,
        });
    }
    Ok(())
}

/// Whether an update moves the appointment onto the schedule in a way that
/// needs a fresh conflict check.
fn reschedules(current: &Appointment, next: &Appointment) -> bool {
    if !next.status.blocks_schedule() {
        return false;
    }
    next.date_time != current.date_time
        || next.doctor_id != current.doctor_id
        || next.duration_minutes != current.duration_minutes
        || !current.status.blocks_schedule()
}

// ─── Requests ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAppointment {
    #[serde(alias = "doctorId")]
    pub doctor: Option<String>,
    /// Ignored for patient callers, who always book for themselves.
    #[serde(alias = "patientId")]
    pub patient: Option<String>,
    pub date_time: Option<String>,
    pub duration: Option<i64>,
    #[serde(rename = "type")]
    pub appointment_type: Option<String>,
    pub reason: Option<String>,
    pub notes: Option<String>,
    pub payment_status: Option<String>,
    pub amount: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentPatch {
    #[serde(alias = "doctorId")]
    pub doctor: Option<String>,
    #[serde(alias = "patientId")]
    pub patient: Option<String>,
    pub date_time: Option<String>,
    pub duration: Option<i64>,
    pub status: Option<String>,
    #[serde(rename = "type")]
    pub appointment_type: Option<String>,
    pub reason: Option<String>,
    pub notes: Option<String>,
    pub cancellation_reason: Option<String>,
    pub payment_status: Option<String>,
    pub amount: Option<f64>,
}

/// Query string of `GET /api/appointments`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentQuery {
    pub status: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub doctor_id: Option<String>,
    pub patient_id: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn check_duration(v: &mut Validator, raw: Option<i64>) -> Option<u32> {
    let minutes = raw?;
    match u32::try_from(minutes) {
        Ok(m) if (MIN_DURATION_MINUTES..=MAX_DURATION_MINUTES).contains(&m) => Some(m),
        _ => {
            v.push("duration", DURATION_MESSAGE);
            None
        }
    }
}

fn check_amount(v: &mut Validator, raw: Option<f64>) -> Option<f64> {
    let amount = raw?;
    if !amount.is_finite() || amount < 0.0 {
        v.push("amount", "Amount cannot be negative");
        return None;
    }
    Some(amount)
}

fn check_text(v: &mut Validator, reason: Option<&str>, notes: Option<&str>) {
    v.max_chars("reason", "Reason", reason, MAX_REASON_CHARS);
    v.max_chars("notes", "Notes", notes, MAX_NOTES_CHARS);
}

/// Unparseable ids are reported the same way as unknown ones.
fn parse_reference(raw: &str, missing: AppointmentError) -> Result<Uuid, AppointmentError> {
    Uuid::parse_str(raw.trim()).map_err(|_| missing)
}

impl AppointmentQuery {
    pub fn page(&self) -> PageRequest {
        PageRequest::new(self.page, self.limit)
    }

    /// A date-only `endDate` covers that whole day; an instant is inclusive.
    pub fn to_filter(&self) -> Result<AppointmentFilter, AppointmentError> {
        let mut v = Validator::new();
        let status = v.parse("status", non_empty(&self.status), "Invalid status");
        let start = v.instant("startDate", "Start date", non_empty(&self.start_date));
        let end = non_empty(&self.end_date).and_then(|raw| {
            let ts = v.instant("endDate", "End date", Some(raw))?;
            Some(if validation::is_date_only(raw) {
                ts + Duration::days(1)
            } else {
                ts + Duration::seconds(1)
            })
        });
        let doctor_id = v.parse("doctorId", non_empty(&self.doctor_id), "Invalid doctor id");
        let patient_id = v.parse("patientId", non_empty(&self.patient_id), "Invalid patient id");
        v.finish()?;
        Ok(AppointmentFilter {
            status,
            start,
            end,
            doctor_id,
            patient_id,
        })
    }
}

// ─── Operations ───────────────────────────────────────────────────────────────

pub fn create_appointment(
    conn: &mut Connection,
    caller: &Caller,
    req: NewAppointment,
) -> Result<Appointment, AppointmentError> {
    let books_for_self = match caller.role {
        Role::Patient => true,
        Role::Admin | Role::Doctor => false,
    };

    let mut v = Validator::new();
    let doctor_raw = v.required("doctor", "Doctor", req.doctor.as_deref());
    let patient_raw = if books_for_self {
        None
    } else {
        v.required("patient", "Patient", req.patient.as_deref())
    };
    let start = v
        .required("dateTime", "Date and time", req.date_time.as_deref())
        .and_then(|raw| v.instant("dateTime", "Date and time", Some(raw)));
    let duration = check_duration(&mut v, req.duration).unwrap_or(DEFAULT_DURATION_MINUTES);
    let appointment_type: AppointmentType = v
        .parse("type", non_empty(&req.appointment_type), "Invalid appointment type")
        .unwrap_or_default();
    let payment_status: PaymentStatus = v
        .parse("paymentStatus", non_empty(&req.payment_status), "Invalid payment status")
        .unwrap_or_default();
    let reason = v.required("reason", "Reason", req.reason.as_deref());
    check_text(&mut v, reason, req.notes.as_deref());
    let amount = check_amount(&mut v, req.amount);

    v.finish()?;
    let (Some(doctor_raw), Some(start), Some(reason)) = (doctor_raw, start, reason) else {
        // Each missing field has already been reported above.
        return Err(AppointmentError::Validation(Vec::new()));
    };
    let doctor_id = parse_reference(doctor_raw, AppointmentError::DoctorNotFound)?;
    let explicit_patient = patient_raw
        .map(|raw| parse_reference(raw, AppointmentError::PatientNotFound))
        .transpose()?;

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let doctor = db::get_doctor(&tx, &doctor_id)?.ok_or(AppointmentError::DoctorNotFound)?;
    let patient_id = match explicit_patient {
        Some(id) => db::get_patient(&tx, &id)?
            .ok_or(AppointmentError::PatientNotFound)?
            .id,
        None => ensure_patient_profile(&tx, &caller.user_id, &caller.email, Some(&caller.name))?.id(),
    };

    let slot = TimeSlot::new(start, duration);
    ensure_slot_free(&tx, &doctor.id, &slot, None)?;

    let now = Utc::now();
    let appointment = Appointment {
        id: Uuid::new_v4(),
        patient_id,
        doctor_id: doctor.id,
        date_time: start,
        duration_minutes: duration,
        status: AppointmentStatus::default(),
        appointment_type,
        reason: reason.to_string(),
        notes: req.notes.map(|n| n.trim().to_string()).filter(|n| !n.is_empty()),
        cancelled_by: None,
        cancellation_reason: None,
        payment_status,
        amount: amount.or(doctor.consultation_fee),
        created_at: now,
        updated_at: now,
    };
    db::insert_appointment(&tx, &appointment)?;
    tx.commit()?;

    tracing::info!(
        appointment_id = %appointment.id,
        doctor_id = %appointment.doctor_id,
        patient_id = %appointment.patient_id,
        booked_by = %caller.user_id,
        "Appointment booked"
    );
    Ok(appointment)
}

/// Partial update by admin or doctor. Any status may follow any other.
pub fn update_appointment(
    conn: &mut Connection,
    caller: &Caller,
    id: &Uuid,
    patch: AppointmentPatch,
) -> Result<Appointment, AppointmentError> {
    caller.require(STAFF, "update appointments")?;

    let mut v = Validator::new();
    let start = v.instant("dateTime", "Date and time", non_empty(&patch.date_time));
    let duration = check_duration(&mut v, patch.duration);
    let status: Option<AppointmentStatus> = v.parse("status", non_empty(&patch.status), "Invalid status");
    let appointment_type: Option<AppointmentType> =
        v.parse("type", non_empty(&patch.appointment_type), "Invalid appointment type");
    let payment_status: Option<PaymentStatus> =
        v.parse("paymentStatus", non_empty(&patch.payment_status), "Invalid payment status");
    if patch.reason.as_deref().is_some_and(|r| r.trim().is_empty()) {
        v.push("reason", "Reason is required");
    }
    check_text(&mut v, patch.reason.as_deref(), patch.notes.as_deref());
    v.max_chars(
        "cancellationReason",
        "Cancellation reason",
        patch.cancellation_reason.as_deref(),
        MAX_REASON_CHARS,
    );
    let amount = check_amount(&mut v, patch.amount);
    v.finish()?;

    let doctor_id = non_empty(&patch.doctor)
        .map(|raw| parse_reference(raw, AppointmentError::DoctorNotFound))
        .transpose()?;
    let patient_id = non_empty(&patch.patient)
        .map(|raw| parse_reference(raw, AppointmentError::PatientNotFound))
        .transpose()?;

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let current = db::get_appointment(&tx, id)?.ok_or(AppointmentError::NotFound)?;
    let mut next = current.clone();

    if let Some(doctor_id) = doctor_id {
        if db::get_doctor(&tx, &doctor_id)?.is_none() {
            return Err(AppointmentError::DoctorNotFound);
        }
        next.doctor_id = doctor_id;
    }
    if let Some(patient_id) = patient_id {
        if db::get_patient(&tx, &patient_id)?.is_none() {
            return Err(AppointmentError::PatientNotFound);
        }
        next.patient_id = patient_id;
    }
    if let Some(start) = start {
        next.date_time = start;
    }
    if let Some(duration) = duration {
        next.duration_minutes = duration;
    }
    if let Some(kind) = appointment_type {
        next.appointment_type = kind;
    }
    if let Some(payment_status) = payment_status {
        next.payment_status = payment_status;
    }
    if let Some(reason) = patch.reason {
        next.reason = reason.trim().to_string();
    }
    if let Some(notes) = patch.notes {
        next.notes = Some(notes.trim().to_string()).filter(|n| !n.is_empty());
    }
    if amount.is_some() {
        next.amount = amount;
    }
    if let Some(status) = status {
        match status {
            AppointmentStatus::Cancelled if current.status != AppointmentStatus::Cancelled => {
                next.cancelled_by = Some(caller.user_id);
            }
            AppointmentStatus::Cancelled => {}
            _ => next.cancelled_by = None,
        }
        next.status = status;
    }
    if let Some(reason) = patch.cancellation_reason {
        next.cancellation_reason = Some(reason.trim().to_string()).filter(|r| !r.is_empty());
    }

    if reschedules(&current, &next) {
        ensure_slot_free(&tx, &next.doctor_id, &next.slot(), Some(&next.id))?;
    }

    next.updated_at = Utc::now();
    db::update_appointment(&tx, &next)?;
    tx.commit()?;

    if next.status != current.status {
        tracing::info!(
            appointment_id = %next.id,
            from = %current.status,
            to = %next.status,
            "Appointment status changed"
        );
    }
    Ok(next)
}

/// Staff may delete any appointment; a patient only one of their own.
pub fn delete_appointment(conn: &Connection, caller: &Caller, id: &Uuid) -> Result<(), AppointmentError> {
    let appointment = db::get_appointment(conn, id)?.ok_or(AppointmentError::NotFound)?;
    match caller.role {
        Role::Admin | Role::Doctor => {}
        Role::Patient => {
            let own = visibility::resolve_patient(conn, caller)?.map(|p| p.id);
            if own != Some(appointment.patient_id) {
                tracing::warn!(user_id = %caller.user_id, appointment_id = %id, "Refused foreign appointment delete");
                return Err(AppointmentError::Forbidden(
                    "Not authorized to delete this appointment".into(),
                ));
            }
        }
    }
    db::delete_appointment(conn, id)?;
    tracing::info!(appointment_id = %id, deleted_by = %caller.user_id, "Appointment deleted");
    Ok(())
}

/// Single read. Exists-but-outside-scope is `Forbidden`, not `NotFound`.
pub fn get_appointment(conn: &Connection, caller: &Caller, id: &Uuid) -> Result<Appointment, AppointmentError> {
    let appointment = db::get_appointment(conn, id)?.ok_or(AppointmentError::NotFound)?;
    let scope = visibility::resolve_scope(conn, caller)?;
    if !scope.permits(&appointment.patient_id, &appointment.doctor_id) {
        return Err(AppointmentError::Forbidden(
            "Not authorized to view this appointment".into(),
        ));
    }
    Ok(appointment)
}

pub fn list_appointments(
    conn: &Connection,
    caller: &Caller,
    query: &AppointmentQuery,
) -> Result<Page<AppointmentView>, AppointmentError> {
    let filter = query.to_filter()?;
    let scope = visibility::resolve_scope(conn, caller)?;
    Ok(db::list_appointments(conn, &scope, &filter, &query.page())?)
}

/// Scoped dashboard counts; "today" is the UTC day containing `now`.
pub fn appointment_stats(
    conn: &Connection,
    caller: &Caller,
    now: DateTime<Utc>,
) -> Result<AppointmentStats, AppointmentError> {
    let scope = visibility::resolve_scope(conn, caller)?;
    let day_start = now
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|naive| naive.and_utc())
        .unwrap_or(now);
    let day_end = day_start + Duration::days(1);
    Ok(db::appointment_stats(conn, &scope, &now, &day_start, &day_end)?)
}
