//! Repository layer: entity-scoped database operations.
//!
//! One sub-module per table; all public functions are re-exported here.
//! Functions take a borrowed `Connection` (or `Transaction`, via deref) so
//! callers decide the transaction boundary.

mod appointment;
mod doctor;
mod medical_record;
mod patient;
mod session;
mod user;

use rusqlite::types::Value;
use uuid::Uuid;

use super::DatabaseError;
use crate::models::PageRequest;
use crate::visibility::Scope;

pub use appointment::*;
pub use doctor::*;
pub use medical_record::*;
pub use patient::*;
pub use session::*;
pub use user::*;

/// Incrementally built `WHERE` clause with positional parameters.
pub(crate) struct SqlFilter {
    sql: String,
    params: Vec<Value>,
}

impl SqlFilter {
    pub(crate) fn new() -> Self {
        Self {
            sql: String::from(" WHERE 1=1"),
            params: Vec::new(),
        }
    }

    /// Append `AND <condition>`; the condition holds exactly one `?`.
    pub(crate) fn and(&mut self, condition: &str, value: impl Into<Value>) {
        self.sql.push_str(" AND ");
        self.sql.push_str(condition);
        self.params.push(value.into());
    }

    /// Append `AND <condition>` where the condition holds one `?` per value.
    pub(crate) fn and_all(&mut self, condition: &str, values: impl IntoIterator<Item = Value>) {
        self.sql.push_str(" AND ");
        self.sql.push_str(condition);
        self.params.extend(values);
    }

    /// Constrain by visibility scope. Returns `false` for `Scope::Nothing`,
    /// in which case the caller should skip the query entirely.
    pub(crate) fn scoped(&mut self, scope: &Scope, patient_col: &str, doctor_col: &str) -> bool {
        match scope {
            Scope::All => true,
            Scope::Doctor(id) => {
                self.and(&format!("{doctor_col} = ?"), id.to_string());
                true
            }
            Scope::Patient(id) => {
                self.and(&format!("{patient_col} = ?"), id.to_string());
                true
            }
            Scope::Nothing => false,
        }
    }

    pub(crate) fn sql(&self) -> &str {
        &self.sql
    }

    pub(crate) fn params(&self) -> &[Value] {
        &self.params
    }

    /// Parameters followed by the `LIMIT ? OFFSET ?` values.
    pub(crate) fn params_with_page(&self, page: &PageRequest) -> Vec<Value> {
        let mut out = self.params.clone();
        out.push(Value::Integer(i64::from(page.limit)));
        out.push(Value::Integer(page.offset()));
        out
    }
}

/// Parse a stored UUID column, surfacing corruption as a typed error.
pub(crate) fn uuid_from_sql(raw: &str) -> Result<Uuid, DatabaseError> {
    Uuid::parse_str(raw).map_err(|_| DatabaseError::InvalidEnum {
        field: "uuid".into(),
        value: raw.into(),
    })
}

pub(crate) fn opt_uuid_from_sql(raw: Option<String>) -> Result<Option<Uuid>, DatabaseError> {
    raw.as_deref().map(uuid_from_sql).transpose()
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::{NaiveDate, TimeZone, Utc};
    use rusqlite::Connection;
    use uuid::Uuid;

    use super::*;
    use crate::db::sqlite::open_database;
    use crate::models::*;

    pub fn test_db() -> (tempfile::TempDir, Connection) {
        let dir = tempfile::tempdir().unwrap();
        let conn = open_database(&dir.path().join("hospital.db")).unwrap();
        (dir, conn)
    }

    pub fn make_user(conn: &Connection, email: &str, role: Role) -> User {
        let user = User {
            id: Uuid::new_v4(),
            name: email.split('@').next().unwrap_or(email).to_string(),
            email: email.to_string(),
            role,
            is_active: true,
            created_at: Utc::now(),
        };
        insert_user(conn, &user, "pbkdf2-sha256$1$c2FsdA$aGFzaA").unwrap();
        user
    }

    pub fn make_patient(conn: &Connection, email: &str, user_id: Option<Uuid>) -> Patient {
        let patient = Patient {
            id: Uuid::new_v4(),
            user_id,
            name: "Ada Patient".into(),
            email: email.to_string(),
            phone: "555-0100".into(),
            date_of_birth: NaiveDate::from_ymd_opt(1985, 3, 2).unwrap(),
            gender: Gender::Female,
            address: "1 Main St".into(),
            blood_group: BloodGroup::APositive,
            emergency_contact: None,
            medical_history: None,
            profile_complete: true,
            created_at: Utc::now(),
        };
        insert_patient(conn, &patient).unwrap();
        patient
    }

    pub fn make_doctor(conn: &Connection, email: &str, user_id: Option<Uuid>) -> Doctor {
        let doctor = Doctor {
            id: Uuid::new_v4(),
            user_id,
            name: "Dr. Chen".into(),
            email: email.to_string(),
            phone: None,
            specialization: "Cardiology".into(),
            license_number: Some("LIC-1".into()),
            experience_years: Some(12),
            consultation_fee: Some(80.0),
            schedule: vec![ScheduleSlot {
                day: "Monday".into(),
                from: "09:00".into(),
                to: "17:00".into(),
                is_available: true,
            }],
            is_active: true,
            created_at: Utc::now(),
        };
        insert_doctor(conn, &doctor).unwrap();
        doctor
    }

    /// 2024-01-10 at the given wall-clock time, UTC.
    pub fn jan10(h: u32, m: u32) -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 10, h, m, 0).unwrap()
    }

    pub fn make_appointment(
        conn: &Connection,
        patient_id: Uuid,
        doctor_id: Uuid,
        start: chrono::DateTime<Utc>,
        status: AppointmentStatus,
    ) -> Appointment {
        let now = Utc::now();
        let appt = Appointment {
            id: Uuid::new_v4(),
            patient_id,
            doctor_id,
            date_time: start,
            duration_minutes: 30,
            status,
            appointment_type: AppointmentType::Consultation,
            reason: "Checkup".into(),
            notes: None,
            cancelled_by: None,
            cancellation_reason: None,
            payment_status: PaymentStatus::Pending,
            amount: None,
            created_at: now,
            updated_at: now,
        };
        insert_appointment(conn, &appt).unwrap();
        appt
    }
}
