use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use uuid::Uuid;

use super::{opt_uuid_from_sql, uuid_from_sql, SqlFilter};
use crate::db::{date_from_sql, ts_from_sql, ts_to_sql, DatabaseError};
use crate::models::*;
use crate::visibility::Scope;

const RECORD_COLUMNS: &str = "r.id, r.patient_id, r.doctor_id, r.appointment_id, r.visit_date,
     r.diagnosis, r.symptoms, r.treatment, r.prescriptions, r.notes, r.follow_up_date,
     r.created_at, r.updated_at";

struct RecordRow {
    id: String,
    patient_id: String,
    doctor_id: String,
    appointment_id: Option<String>,
    visit_date: String,
    diagnosis: String,
    symptoms: String,
    treatment: Option<String>,
    prescriptions: String,
    notes: Option<String>,
    follow_up_date: Option<String>,
    created_at: String,
    updated_at: String,
}

impl RecordRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            patient_id: row.get(1)?,
            doctor_id: row.get(2)?,
            appointment_id: row.get(3)?,
            visit_date: row.get(4)?,
            diagnosis: row.get(5)?,
            symptoms: row.get(6)?,
            treatment: row.get(7)?,
            prescriptions: row.get(8)?,
            notes: row.get(9)?,
            follow_up_date: row.get(10)?,
            created_at: row.get(11)?,
            updated_at: row.get(12)?,
        })
    }

    fn into_record(self) -> Result<MedicalRecord, DatabaseError> {
        Ok(MedicalRecord {
            id: uuid_from_sql(&self.id)?,
            patient_id: uuid_from_sql(&self.patient_id)?,
            doctor_id: uuid_from_sql(&self.doctor_id)?,
            appointment_id: opt_uuid_from_sql(self.appointment_id)?,
            visit_date: date_from_sql(&self.visit_date)?,
            diagnosis: self.diagnosis,
            symptoms: serde_json::from_str(&self.symptoms)?,
            treatment: self.treatment,
            prescriptions: serde_json::from_str(&self.prescriptions)?,
            notes: self.notes,
            follow_up_date: self.follow_up_date.as_deref().map(date_from_sql).transpose()?,
            created_at: ts_from_sql(&self.created_at)?,
            updated_at: ts_from_sql(&self.updated_at)?,
        })
    }
}

pub fn insert_medical_record(conn: &Connection, record: &MedicalRecord) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO medical_records (id, patient_id, doctor_id, appointment_id, visit_date,
         diagnosis, symptoms, treatment, prescriptions, notes, follow_up_date, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            record.id.to_string(),
            record.patient_id.to_string(),
            record.doctor_id.to_string(),
            record.appointment_id.map(|id| id.to_string()),
            record.visit_date.to_string(),
            record.diagnosis,
            serde_json::to_string(&record.symptoms)?,
            record.treatment,
            serde_json::to_string(&record.prescriptions)?,
            record.notes,
            record.follow_up_date.map(|d| d.to_string()),
            ts_to_sql(&record.created_at),
            ts_to_sql(&record.updated_at),
        ],
    )
    .map_err(DatabaseError::from_write)?;
    Ok(())
}

pub fn update_medical_record(conn: &Connection, record: &MedicalRecord) -> Result<(), DatabaseError> {
    let changed = conn.execute(
        "UPDATE medical_records SET appointment_id = ?2, visit_date = ?3, diagnosis = ?4,
         symptoms = ?5, treatment = ?6, prescriptions = ?7, notes = ?8, follow_up_date = ?9,
         updated_at = ?10
         WHERE id = ?1",
        params![
            record.id.to_string(),
            record.appointment_id.map(|id| id.to_string()),
            record.visit_date.to_string(),
            record.diagnosis,
            serde_json::to_string(&record.symptoms)?,
            record.treatment,
            serde_json::to_string(&record.prescriptions)?,
            record.notes,
            record.follow_up_date.map(|d| d.to_string()),
            ts_to_sql(&record.updated_at),
        ],
    )?;
    if changed == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "MedicalRecord".into(),
            id: record.id.to_string(),
        });
    }
    Ok(())
}

pub fn get_medical_record(conn: &Connection, id: &Uuid) -> Result<Option<MedicalRecord>, DatabaseError> {
    let row = conn
        .query_row(
            &format!("SELECT {RECORD_COLUMNS} FROM medical_records r WHERE r.id = ?1"),
            params![id.to_string()],
            RecordRow::read,
        )
        .optional()?;
    row.map(RecordRow::into_record).transpose()
}

pub fn delete_medical_record(conn: &Connection, id: &Uuid) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "DELETE FROM medical_records WHERE id = ?1",
        params![id.to_string()],
    )?;
    Ok(changed > 0)
}

/// Scoped page of records, newest visit first.
pub fn list_medical_records(
    conn: &Connection,
    scope: &Scope,
    filter: &MedicalRecordFilter,
    page: &PageRequest,
) -> Result<Page<MedicalRecord>, DatabaseError> {
    let mut where_clause = SqlFilter::new();
    if !where_clause.scoped(scope, "r.patient_id", "r.doctor_id") {
        return Ok(Page::empty(page));
    }
    if let Some(patient_id) = &filter.patient_id {
        where_clause.and("r.patient_id = ?", patient_id.to_string());
    }

    let total: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM medical_records r{}", where_clause.sql()),
        params_from_iter(where_clause.params()),
        |row| row.get(0),
    )?;

    let mut stmt = conn.prepare(&format!(
        "SELECT {RECORD_COLUMNS} FROM medical_records r{}
         ORDER BY r.visit_date DESC, r.created_at DESC LIMIT ? OFFSET ?",
        where_clause.sql()
    ))?;
    let rows = stmt
        .query_map(
            params_from_iter(where_clause.params_with_page(page)),
            RecordRow::read,
        )?
        .collect::<Result<Vec<_>, _>>()?;
    let items = rows
        .into_iter()
        .map(RecordRow::into_record)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Page {
        items,
        pagination: Pagination::new(page, total.max(0) as u64),
    })
}

pub fn count_records_for_patient(conn: &Connection, patient_id: &Uuid) -> Result<u64, DatabaseError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM medical_records WHERE patient_id = ?1",
        params![patient_id.to_string()],
        |row| row.get(0),
    )?;
    Ok(count.max(0) as u64)
}

pub fn count_records_for_doctor(conn: &Connection, doctor_id: &Uuid) -> Result<u64, DatabaseError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM medical_records WHERE doctor_id = ?1",
        params![doctor_id.to_string()],
        |row| row.get(0),
    )?;
    Ok(count.max(0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::test_support::*;
    use chrono::{NaiveDate, Utc};

    fn record(patient_id: Uuid, doctor_id: Uuid) -> MedicalRecord {
        let now = Utc::now();
        MedicalRecord {
            id: Uuid::new_v4(),
            patient_id,
            doctor_id,
            appointment_id: None,
            visit_date: NaiveDate::from_ymd_opt(2024, 1, 10).unwrap(),
            diagnosis: "Hypertension".into(),
            symptoms: vec!["headache".into()],
            treatment: Some("Lifestyle".into()),
            prescriptions: vec![Prescription {
                medication: "Lisinopril".into(),
                dosage: "10mg".into(),
                frequency: "daily".into(),
                duration: Some("30 days".into()),
            }],
            notes: None,
            follow_up_date: NaiveDate::from_ymd_opt(2024, 2, 10),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn record_lists_survive_storage() {
        let (_dir, conn) = test_db();
        let patient = make_patient(&conn, "p@example.com", None);
        let doctor = make_doctor(&conn, "d@example.com", None);
        let rec = record(patient.id, doctor.id);
        insert_medical_record(&conn, &rec).unwrap();

        let stored = get_medical_record(&conn, &rec.id).unwrap().unwrap();
        assert_eq!(stored.prescriptions, rec.prescriptions);
        assert_eq!(stored.symptoms, rec.symptoms);
        assert_eq!(stored.follow_up_date, rec.follow_up_date);
        assert_eq!(count_records_for_patient(&conn, &patient.id).unwrap(), 1);
        assert_eq!(count_records_for_doctor(&conn, &doctor.id).unwrap(), 1);
    }

    #[test]
    fn doctor_scope_hides_other_doctors_records() {
        let (_dir, conn) = test_db();
        let patient = make_patient(&conn, "p@example.com", None);
        let mine = make_doctor(&conn, "mine@example.com", None);
        let other = make_doctor(&conn, "other@example.com", None);
        insert_medical_record(&conn, &record(patient.id, mine.id)).unwrap();
        insert_medical_record(&conn, &record(patient.id, other.id)).unwrap();

        let page = list_medical_records(
            &conn,
            &Scope::Doctor(mine.id),
            &MedicalRecordFilter::default(),
            &PageRequest::default(),
        )
        .unwrap();
        assert_eq!(page.pagination.total, 1);
        assert!(page.items.iter().all(|r| r.doctor_id == mine.id));
    }
}
