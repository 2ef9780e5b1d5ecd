use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::Serialize;
use uuid::Uuid;

use super::{opt_uuid_from_sql, uuid_from_sql, SqlFilter};
use crate::db::{ts_from_sql, ts_to_sql, DatabaseError};
use crate::models::*;
use crate::visibility::Scope;

const APPOINTMENT_COLUMNS: &str = "a.id, a.patient_id, a.doctor_id, a.date_time, a.duration_minutes,
     a.status, a.type, a.reason, a.notes, a.cancelled_by, a.cancellation_reason,
     a.payment_status, a.amount, a.created_at, a.updated_at";

/// Statuses that free the doctor's slot, as an SQL list.
const NON_BLOCKING_STATUSES: &str = "('cancelled', 'no-show')";

struct AppointmentRow {
    id: String,
    patient_id: String,
    doctor_id: String,
    date_time: String,
    duration_minutes: u32,
    status: String,
    appointment_type: String,
    reason: String,
    notes: Option<String>,
    cancelled_by: Option<String>,
    cancellation_reason: Option<String>,
    payment_status: String,
    amount: Option<f64>,
    created_at: String,
    updated_at: String,
}

impl AppointmentRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            patient_id: row.get(1)?,
            doctor_id: row.get(2)?,
            date_time: row.get(3)?,
            duration_minutes: row.get(4)?,
            status: row.get(5)?,
            appointment_type: row.get(6)?,
            reason: row.get(7)?,
            notes: row.get(8)?,
            cancelled_by: row.get(9)?,
            cancellation_reason: row.get(10)?,
            payment_status: row.get(11)?,
            amount: row.get(12)?,
            created_at: row.get(13)?,
            updated_at: row.get(14)?,
        })
    }

    fn into_appointment(self) -> Result<Appointment, DatabaseError> {
        Ok(Appointment {
            id: uuid_from_sql(&self.id)?,
            patient_id: uuid_from_sql(&self.patient_id)?,
            doctor_id: uuid_from_sql(&self.doctor_id)?,
            date_time: ts_from_sql(&self.date_time)?,
            duration_minutes: self.duration_minutes,
            status: AppointmentStatus::from_str(&self.status)?,
            appointment_type: AppointmentType::from_str(&self.appointment_type)?,
            reason: self.reason,
            notes: self.notes,
            cancelled_by: opt_uuid_from_sql(self.cancelled_by)?,
            cancellation_reason: self.cancellation_reason,
            payment_status: PaymentStatus::from_str(&self.payment_status)?,
            amount: self.amount,
            created_at: ts_from_sql(&self.created_at)?,
            updated_at: ts_from_sql(&self.updated_at)?,
        })
    }
}

pub fn insert_appointment(conn: &Connection, appt: &Appointment) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO appointments (id, patient_id, doctor_id, date_time, duration_minutes, status,
         type, reason, notes, cancelled_by, cancellation_reason, payment_status, amount,
         created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
        params![
            appt.id.to_string(),
            appt.patient_id.to_string(),
            appt.doctor_id.to_string(),
            ts_to_sql(&appt.date_time),
            appt.duration_minutes,
            appt.status.as_str(),
            appt.appointment_type.as_str(),
            appt.reason,
            appt.notes,
            appt.cancelled_by.map(|id| id.to_string()),
            appt.cancellation_reason,
            appt.payment_status.as_str(),
            appt.amount,
            ts_to_sql(&appt.created_at),
            ts_to_sql(&appt.updated_at),
        ],
    )
    .map_err(DatabaseError::from_write)?;
    Ok(())
}

/// Overwrite every mutable column of an existing appointment.
pub fn update_appointment(conn: &Connection, appt: &Appointment) -> Result<(), DatabaseError> {
    let changed = conn
        .execute(
            "UPDATE appointments SET patient_id = ?2, doctor_id = ?3, date_time = ?4,
             duration_minutes = ?5, status = ?6, type = ?7, reason = ?8, notes = ?9,
             cancelled_by = ?10, cancellation_reason = ?11, payment_status = ?12, amount = ?13,
             updated_at = ?14
             WHERE id = ?1",
            params![
                appt.id.to_string(),
                appt.patient_id.to_string(),
                appt.doctor_id.to_string(),
                ts_to_sql(&appt.date_time),
                appt.duration_minutes,
                appt.status.as_str(),
                appt.appointment_type.as_str(),
                appt.reason,
                appt.notes,
                appt.cancelled_by.map(|id| id.to_string()),
                appt.cancellation_reason,
                appt.payment_status.as_str(),
                appt.amount,
                ts_to_sql(&appt.updated_at),
            ],
        )
        .map_err(DatabaseError::from_write)?;
    if changed == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "Appointment".into(),
            id: appt.id.to_string(),
        });
    }
    Ok(())
}

pub fn get_appointment(conn: &Connection, id: &Uuid) -> Result<Option<Appointment>, DatabaseError> {
    let row = conn
        .query_row(
            &format!("SELECT {APPOINTMENT_COLUMNS} FROM appointments a WHERE a.id = ?1"),
            params![id.to_string()],
            AppointmentRow::read,
        )
        .optional()?;
    row.map(AppointmentRow::into_appointment).transpose()
}

pub fn delete_appointment(conn: &Connection, id: &Uuid) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "DELETE FROM appointments WHERE id = ?1",
        params![id.to_string()],
    )?;
    Ok(changed > 0)
}

/// Appointments that still occupy `doctor_id`'s time and start before `before`.
///
/// The caller finishes the overlap test against each row's end time.
pub fn list_blocking_appointments(
    conn: &Connection,
    doctor_id: &Uuid,
    before: &DateTime<Utc>,
    exclude: Option<&Uuid>,
) -> Result<Vec<Appointment>, DatabaseError> {
    let mut where_clause = SqlFilter::new();
    where_clause.and("a.doctor_id = ?", doctor_id.to_string());
    where_clause.and("a.date_time < ?", ts_to_sql(before));
    if let Some(id) = exclude {
        where_clause.and("a.id != ?", id.to_string());
    }

    let mut stmt = conn.prepare(&format!(
        "SELECT {APPOINTMENT_COLUMNS} FROM appointments a{} AND a.status NOT IN {NON_BLOCKING_STATUSES}
         ORDER BY a.date_time ASC",
        where_clause.sql()
    ))?;
    let rows = stmt
        .query_map(params_from_iter(where_clause.params()), AppointmentRow::read)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(AppointmentRow::into_appointment).collect()
}

fn filtered(scope: &Scope, filter: &AppointmentFilter) -> Option<SqlFilter> {
    let mut where_clause = SqlFilter::new();
    if !where_clause.scoped(scope, "a.patient_id", "a.doctor_id") {
        return None;
    }
    if let Some(status) = filter.status {
        where_clause.and("a.status = ?", status.as_str().to_string());
    }
    if let Some(start) = &filter.start {
        where_clause.and("a.date_time >= ?", ts_to_sql(start));
    }
    if let Some(end) = &filter.end {
        where_clause.and("a.date_time < ?", ts_to_sql(end));
    }
    if let Some(doctor_id) = &filter.doctor_id {
        where_clause.and("a.doctor_id = ?", doctor_id.to_string());
    }
    if let Some(patient_id) = &filter.patient_id {
        where_clause.and("a.patient_id = ?", patient_id.to_string());
    }
    Some(where_clause)
}

/// Scoped, filtered page of appointments ordered by start time.
pub fn list_appointments(
    conn: &Connection,
    scope: &Scope,
    filter: &AppointmentFilter,
    page: &PageRequest,
) -> Result<Page<AppointmentView>, DatabaseError> {
    let Some(where_clause) = filtered(scope, filter) else {
        return Ok(Page::empty(page));
    };

    let total: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM appointments a{}", where_clause.sql()),
        params_from_iter(where_clause.params()),
        |row| row.get(0),
    )?;

    let mut stmt = conn.prepare(&format!(
        "SELECT {APPOINTMENT_COLUMNS},
                COALESCE(p.name, ''), COALESCE(d.name, ''), COALESCE(d.specialization, '')
         FROM appointments a
         LEFT JOIN patients p ON a.patient_id = p.id
         LEFT JOIN doctors d ON a.doctor_id = d.id{}
         ORDER BY a.date_time ASC
         LIMIT ? OFFSET ?",
        where_clause.sql()
    ))?;
    let rows = stmt
        .query_map(params_from_iter(where_clause.params_with_page(page)), |row| {
            Ok((
                AppointmentRow::read(row)?,
                row.get::<_, String>(15)?,
                row.get::<_, String>(16)?,
                row.get::<_, String>(17)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let items = rows
        .into_iter()
        .map(|(row, patient_name, doctor_name, doctor_specialization)| {
            Ok(AppointmentView {
                appointment: row.into_appointment()?,
                patient_name,
                doctor_name,
                doctor_specialization,
            })
        })
        .collect::<Result<Vec<_>, DatabaseError>>()?;

    Ok(Page {
        items,
        pagination: Pagination::new(page, total.max(0) as u64),
    })
}

/// Aggregate counts shown on the appointments dashboard card.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AppointmentStats {
    pub total: u64,
    pub today: u64,
    pub upcoming: u64,
    pub completed: u64,
}

/// Scoped counts. `today` covers `[day_start, day_end)`; `upcoming` counts
/// booked/confirmed appointments starting at or after `now`.
pub fn appointment_stats(
    conn: &Connection,
    scope: &Scope,
    now: &DateTime<Utc>,
    day_start: &DateTime<Utc>,
    day_end: &DateTime<Utc>,
) -> Result<AppointmentStats, DatabaseError> {
    let mut base = SqlFilter::new();
    if !base.scoped(scope, "a.patient_id", "a.doctor_id") {
        return Ok(AppointmentStats::default());
    }

    let sql = format!(
        "SELECT COUNT(*),
                COALESCE(SUM(CASE WHEN a.date_time >= ? AND a.date_time < ? THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN a.date_time >= ? AND a.status IN ('booked', 'confirmed')
                                  THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN a.status = 'completed' THEN 1 ELSE 0 END), 0)
         FROM appointments a{}",
        base.sql()
    );
    let mut values: Vec<rusqlite::types::Value> = vec![
        ts_to_sql(day_start).into(),
        ts_to_sql(day_end).into(),
        ts_to_sql(now).into(),
    ];
    values.extend(base.params().iter().cloned());

    let (total, today, upcoming, completed): (i64, i64, i64, i64) =
        conn.query_row(&sql, params_from_iter(values), |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
        })?;

    Ok(AppointmentStats {
        total: total.max(0) as u64,
        today: today.max(0) as u64,
        upcoming: upcoming.max(0) as u64,
        completed: completed.max(0) as u64,
    })
}

pub fn count_appointments_for_patient(conn: &Connection, patient_id: &Uuid) -> Result<u64, DatabaseError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM appointments WHERE patient_id = ?1",
        params![patient_id.to_string()],
        |row| row.get(0),
    )?;
    Ok(count.max(0) as u64)
}

pub fn count_appointments_for_doctor(conn: &Connection, doctor_id: &Uuid) -> Result<u64, DatabaseError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM appointments WHERE doctor_id = ?1",
        params![doctor_id.to_string()],
        |row| row.get(0),
    )?;
    Ok(count.max(0) as u64)
}
