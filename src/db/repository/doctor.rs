use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use uuid::Uuid;

use super::{opt_uuid_from_sql, uuid_from_sql, SqlFilter};
use crate::db::{ts_from_sql, ts_to_sql, DatabaseError};
use crate::models::*;

const DOCTOR_COLUMNS: &str = "id, user_id, name, email, phone, specialization, license_number,
     experience_years, consultation_fee, schedule, is_active, created_at";

struct DoctorRow {
    id: String,
    user_id: Option<String>,
    name: String,
    email: String,
    phone: Option<String>,
    specialization: String,
    license_number: Option<String>,
    experience_years: Option<u32>,
    consultation_fee: Option<f64>,
    schedule: String,
    is_active: bool,
    created_at: String,
}

impl DoctorRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            name: row.get(2)?,
            email: row.get(3)?,
            phone: row.get(4)?,
            specialization: row.get(5)?,
            license_number: row.get(6)?,
            experience_years: row.get(7)?,
            consultation_fee: row.get(8)?,
            schedule: row.get(9)?,
            is_active: row.get(10)?,
            created_at: row.get(11)?,
        })
    }

    fn into_doctor(self) -> Result<Doctor, DatabaseError> {
        Ok(Doctor {
            id: uuid_from_sql(&self.id)?,
            user_id: opt_uuid_from_sql(self.user_id)?,
            name: self.name,
            email: self.email,
            phone: self.phone,
            specialization: self.specialization,
            license_number: self.license_number,
            experience_years: self.experience_years,
            consultation_fee: self.consultation_fee,
            schedule: serde_json::from_str(&self.schedule)?,
            is_active: self.is_active,
            created_at: ts_from_sql(&self.created_at)?,
        })
    }
}

fn find_doctor_by(conn: &Connection, column: &str, value: String) -> Result<Option<Doctor>, DatabaseError> {
    let row = conn
        .query_row(
            &format!("SELECT {DOCTOR_COLUMNS} FROM doctors WHERE {column} = ?1"),
            params![value],
            DoctorRow::read,
        )
        .optional()?;
    row.map(DoctorRow::into_doctor).transpose()
}

pub fn insert_doctor(conn: &Connection, doctor: &Doctor) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO doctors (id, user_id, name, email, phone, specialization, license_number,
         experience_years, consultation_fee, schedule, is_active, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            doctor.id.to_string(),
            doctor.user_id.map(|id| id.to_string()),
            doctor.name,
            doctor.email,
            doctor.phone,
            doctor.specialization,
            doctor.license_number,
            doctor.experience_years,
            doctor.consultation_fee,
            serde_json::to_string(&doctor.schedule)?,
            doctor.is_active,
            ts_to_sql(&doctor.created_at),
        ],
    )
    .map_err(DatabaseError::from_write)?;
    Ok(())
}

pub fn update_doctor(conn: &Connection, doctor: &Doctor) -> Result<(), DatabaseError> {
    let changed = conn
        .execute(
            "UPDATE doctors SET user_id = ?2, name = ?3, email = ?4, phone = ?5,
             specialization = ?6, license_number = ?7, experience_years = ?8,
             consultation_fee = ?9, schedule = ?10, is_active = ?11
             WHERE id = ?1",
            params![
                doctor.id.to_string(),
                doctor.user_id.map(|id| id.to_string()),
                doctor.name,
                doctor.email,
                doctor.phone,
                doctor.specialization,
                doctor.license_number,
                doctor.experience_years,
                doctor.consultation_fee,
                serde_json::to_string(&doctor.schedule)?,
                doctor.is_active,
            ],
        )
        .map_err(DatabaseError::from_write)?;
    if changed == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "Doctor".into(),
            id: doctor.id.to_string(),
        });
    }
    Ok(())
}

pub fn get_doctor(conn: &Connection, id: &Uuid) -> Result<Option<Doctor>, DatabaseError> {
    find_doctor_by(conn, "id", id.to_string())
}

pub fn find_doctor_by_user(conn: &Connection, user_id: &Uuid) -> Result<Option<Doctor>, DatabaseError> {
    find_doctor_by(conn, "user_id", user_id.to_string())
}

pub fn find_doctor_by_email(conn: &Connection, email: &str) -> Result<Option<Doctor>, DatabaseError> {
    find_doctor_by(conn, "email", email.to_string())
}

/// Legacy doctor with this email that no account has claimed yet.
pub fn find_unlinked_doctor_by_email(conn: &Connection, email: &str) -> Result<Option<Doctor>, DatabaseError> {
    let row = conn
        .query_row(
            &format!("SELECT {DOCTOR_COLUMNS} FROM doctors WHERE email = ?1 AND user_id IS NULL"),
            params![email],
            DoctorRow::read,
        )
        .optional()?;
    row.map(DoctorRow::into_doctor).transpose()
}

pub fn delete_doctor(conn: &Connection, id: &Uuid) -> Result<bool, DatabaseError> {
    let changed = conn.execute("DELETE FROM doctors WHERE id = ?1", params![id.to_string()])?;
    Ok(changed > 0)
}

pub fn list_doctors(
    conn: &Connection,
    filter: &DoctorFilter,
    page: &PageRequest,
) -> Result<Page<Doctor>, DatabaseError> {
    let mut where_clause = SqlFilter::new();
    if let Some(spec) = filter.specialization.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        where_clause.and("LOWER(specialization) = ?", spec.to_lowercase());
    }

    let total: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM doctors{}", where_clause.sql()),
        params_from_iter(where_clause.params()),
        |row| row.get(0),
    )?;

    let mut stmt = conn.prepare(&format!(
        "SELECT {DOCTOR_COLUMNS} FROM doctors{} ORDER BY name ASC LIMIT ? OFFSET ?",
        where_clause.sql()
    ))?;
    let rows = stmt
        .query_map(
            params_from_iter(where_clause.params_with_page(page)),
            DoctorRow::read,
        )?
        .collect::<Result<Vec<_>, _>>()?;
    let items = rows
        .into_iter()
        .map(DoctorRow::into_doctor)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Page {
        items,
        pagination: Pagination::new(page, total.max(0) as u64),
    })
}
