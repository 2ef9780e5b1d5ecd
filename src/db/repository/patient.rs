use std::str::FromStr;

use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use uuid::Uuid;

use super::{opt_uuid_from_sql, uuid_from_sql, SqlFilter};
use crate::db::{date_from_sql, ts_from_sql, ts_to_sql, DatabaseError};
use crate::models::*;

const PATIENT_COLUMNS: &str = "id, user_id, name, email, phone, date_of_birth, gender, address,
     blood_group, emergency_contact, medical_history, profile_complete, created_at";

struct PatientRow {
    id: String,
    user_id: Option<String>,
    name: String,
    email: String,
    phone: String,
    date_of_birth: String,
    gender: String,
    address: String,
    blood_group: String,
    emergency_contact: Option<String>,
    medical_history: Option<String>,
    profile_complete: bool,
    created_at: String,
}

impl PatientRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            name: row.get(2)?,
            email: row.get(3)?,
            phone: row.get(4)?,
            date_of_birth: row.get(5)?,
            gender: row.get(6)?,
            address: row.get(7)?,
            blood_group: row.get(8)?,
            emergency_contact: row.get(9)?,
            medical_history: row.get(10)?,
            profile_complete: row.get(11)?,
            created_at: row.get(12)?,
        })
    }

    fn into_patient(self) -> Result<Patient, DatabaseError> {
        Ok(Patient {
            id: uuid_from_sql(&self.id)?,
            user_id: opt_uuid_from_sql(self.user_id)?,
            name: self.name,
            email: self.email,
            phone: self.phone,
            date_of_birth: date_from_sql(&self.date_of_birth)?,
            gender: Gender::from_str(&self.gender)?,
            address: self.address,
            blood_group: BloodGroup::from_str(&self.blood_group)?,
            emergency_contact: self.emergency_contact,
            medical_history: self.medical_history,
            profile_complete: self.profile_complete,
            created_at: ts_from_sql(&self.created_at)?,
        })
    }
}

fn find_patient_by(
    conn: &Connection,
    column: &str,
    value: String,
) -> Result<Option<Patient>, DatabaseError> {
    let row = conn
        .query_row(
            &format!("SELECT {PATIENT_COLUMNS} FROM patients WHERE {column} = ?1"),
            params![value],
            PatientRow::read,
        )
        .optional()?;
    row.map(PatientRow::into_patient).transpose()
}

pub fn insert_patient(conn: &Connection, patient: &Patient) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO patients (id, user_id, name, email, phone, date_of_birth, gender, address,
         blood_group, emergency_contact, medical_history, profile_complete, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            patient.id.to_string(),
            patient.user_id.map(|id| id.to_string()),
            patient.name,
            patient.email,
            patient.phone,
            patient.date_of_birth.to_string(),
            patient.gender.as_str(),
            patient.address,
            patient.blood_group.as_str(),
            patient.emergency_contact,
            patient.medical_history,
            patient.profile_complete,
            ts_to_sql(&patient.created_at),
        ],
    )
    .map_err(DatabaseError::from_write)?;
    Ok(())
}

/// Overwrite every mutable column of an existing patient.
pub fn update_patient(conn: &Connection, patient: &Patient) -> Result<(), DatabaseError> {
    let changed = conn
        .execute(
            "UPDATE patients SET user_id = ?2, name = ?3, email = ?4, phone = ?5,
             date_of_birth = ?6, gender = ?7, address = ?8, blood_group = ?9,
             emergency_contact = ?10, medical_history = ?11, profile_complete = ?12
             WHERE id = ?1",
            params![
                patient.id.to_string(),
                patient.user_id.map(|id| id.to_string()),
                patient.name,
                patient.email,
                patient.phone,
                patient.date_of_birth.to_string(),
                patient.gender.as_str(),
                patient.address,
                patient.blood_group.as_str(),
                patient.emergency_contact,
                patient.medical_history,
                patient.profile_complete,
            ],
        )
        .map_err(DatabaseError::from_write)?;
    if changed == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "Patient".into(),
            id: patient.id.to_string(),
        });
    }
    Ok(())
}

pub fn get_patient(conn: &Connection, id: &Uuid) -> Result<Option<Patient>, DatabaseError> {
    find_patient_by(conn, "id", id.to_string())
}

pub fn find_patient_by_user(conn: &Connection, user_id: &Uuid) -> Result<Option<Patient>, DatabaseError> {
    find_patient_by(conn, "user_id", user_id.to_string())
}

pub fn find_patient_by_email(conn: &Connection, email: &str) -> Result<Option<Patient>, DatabaseError> {
    find_patient_by(conn, "email", email.to_string())
}

/// Legacy patient with this email that no account has claimed yet.
pub fn find_unlinked_patient_by_email(conn: &Connection, email: &str) -> Result<Option<Patient>, DatabaseError> {
    let row = conn
        .query_row(
            &format!("SELECT {PATIENT_COLUMNS} FROM patients WHERE email = ?1 AND user_id IS NULL"),
            params![email],
            PatientRow::read,
        )
        .optional()?;
    row.map(PatientRow::into_patient).transpose()
}

/// Attach a legacy patient record to its user account.
pub fn link_patient_user(conn: &Connection, patient_id: &Uuid, user_id: &Uuid) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE patients SET user_id = ?1 WHERE id = ?2",
        params![user_id.to_string(), patient_id.to_string()],
    )
    .map_err(DatabaseError::from_write)?;
    Ok(())
}

pub fn delete_patient(conn: &Connection, id: &Uuid) -> Result<bool, DatabaseError> {
    let changed = conn.execute("DELETE FROM patients WHERE id = ?1", params![id.to_string()])?;
    Ok(changed > 0)
}

pub fn list_patients(
    conn: &Connection,
    filter: &PatientFilter,
    page: &PageRequest,
) -> Result<Page<Patient>, DatabaseError> {
    let mut where_clause = SqlFilter::new();
    if let Some(term) = filter.search.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
        let pattern = format!("%{}%", term.to_lowercase());
        where_clause.and_all(
            "(LOWER(name) LIKE ? OR LOWER(email) LIKE ? OR phone LIKE ?)",
            std::iter::repeat(Value::Text(pattern)).take(3),
        );
    }

    let total: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM patients{}", where_clause.sql()),
        params_from_iter(where_clause.params()),
        |row| row.get(0),
    )?;

    let mut stmt = conn.prepare(&format!(
        "SELECT {PATIENT_COLUMNS} FROM patients{} ORDER BY name ASC LIMIT ? OFFSET ?",
        where_clause.sql()
    ))?;
    let rows = stmt
        .query_map(
            params_from_iter(where_clause.params_with_page(page)),
            PatientRow::read,
        )?
        .collect::<Result<Vec<_>, _>>()?;
    let items = rows
        .into_iter()
        .map(PatientRow::into_patient)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Page {
        items,
        pagination: Pagination::new(page, total.max(0) as u64),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::test_support::*;

    #[test]
    fn lookup_by_user_and_email() {
        let (_dir, conn) = test_db();
        let user = make_user(&conn, "ada@example.com", Role::Patient);
        let patient = make_patient(&conn, "ada@example.com", Some(user.id));

        assert_eq!(find_patient_by_user(&conn, &user.id).unwrap().unwrap().id, patient.id);
        assert_eq!(
            find_patient_by_email(&conn, "ada@example.com").unwrap().unwrap().id,
            patient.id
        );
        assert!(find_patient_by_user(&conn, &Uuid::new_v4()).unwrap().is_none());
    }

    #[test]
    fn second_patient_for_same_user_is_duplicate() {
        let (_dir, conn) = test_db();
        let user = make_user(&conn, "ada@example.com", Role::Patient);
        make_patient(&conn, "ada@example.com", Some(user.id));

        let mut dup = find_patient_by_user(&conn, &user.id).unwrap().unwrap();
        dup.id = Uuid::new_v4();
        dup.email = "other@example.com".into();
        assert!(matches!(
            insert_patient(&conn, &dup),
            Err(DatabaseError::DuplicateKey(_))
        ));
    }

    #[test]
    fn link_backfills_user() {
        let (_dir, conn) = test_db();
        let legacy = make_patient(&conn, "legacy@example.com", None);
        let user = make_user(&conn, "legacy@example.com", Role::Patient);
        link_patient_user(&conn, &legacy.id, &user.id).unwrap();
        assert_eq!(get_patient(&conn, &legacy.id).unwrap().unwrap().user_id, Some(user.id));
    }

    #[test]
    fn search_matches_name_case_insensitively() {
        let (_dir, conn) = test_db();
        make_patient(&conn, "one@example.com", None);
        let page = list_patients(
            &conn,
            &PatientFilter { search: Some("ADA".into()) },
            &PageRequest::default(),
        )
        .unwrap();
        assert_eq!(page.pagination.total, 1);

        let none = list_patients(
            &conn,
            &PatientFilter { search: Some("zzz".into()) },
            &PageRequest::default(),
        )
        .unwrap();
        assert!(none.items.is_empty());
    }
}
