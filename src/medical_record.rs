//! Medical records behind `/api/medical-records`.
//!
//! Writes are staff-only and always name both parties explicitly. Reads go
//! through the visibility scope; a single record outside the caller's scope
//! is reported as forbidden rather than missing.

use chrono::Utc;
use rusqlite::Connection;
use serde::Deserialize;
use uuid::Uuid;

use crate::authorization::{AccessDenied, Caller, STAFF};
use crate::db::{self, DatabaseError};
use crate::models::*;
use crate::validation::{FieldError, Validator};
use crate::visibility;

#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("Validation failed")]
    Validation(Vec<FieldError>),

    #[error("Patient not found")]
    PatientNotFound,

    #[error("Doctor not found")]
    DoctorNotFound,

    #[error("Appointment not found")]
    AppointmentNotFound,

    #[error("Medical record not found")]
    NotFound,

    #[error("{0}")]
    Forbidden(String),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl From<AccessDenied> for RecordError {
    fn from(err: AccessDenied) -> Self {
        Self::Forbidden(err.0)
    }
}

impl From<Vec<FieldError>> for RecordError {
    fn from(errors: Vec<FieldError>) -> Self {
        Self::Validation(errors)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMedicalRecord {
    #[serde(alias = "patient")]
    pub patient_id: Option<String>,
    #[serde(alias = "doctor")]
    pub doctor_id: Option<String>,
    #[serde(alias = "appointment")]
    pub appointment_id: Option<String>,
    pub visit_date: Option<String>,
    pub diagnosis: Option<String>,
    #[serde(default)]
    pub symptoms: Vec<String>,
    pub treatment: Option<String>,
    #[serde(default)]
    pub prescriptions: Vec<Prescription>,
    pub notes: Option<String>,
    pub follow_up_date: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MedicalRecordPatch {
    #[serde(alias = "appointment")]
    pub appointment_id: Option<String>,
    pub visit_date: Option<String>,
    pub diagnosis: Option<String>,
    pub symptoms: Option<Vec<String>>,
    pub treatment: Option<String>,
    pub prescriptions: Option<Vec<Prescription>>,
    pub notes: Option<String>,
    pub follow_up_date: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MedicalRecordQuery {
    pub patient_id: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

fn check_prescriptions(v: &mut Validator, prescriptions: &[Prescription]) {
    for (i, p) in prescriptions.iter().enumerate() {
        for (name, value) in [
            ("medication", &p.medication),
            ("dosage", &p.dosage),
            ("frequency", &p.frequency),
        ] {
            if value.trim().is_empty() {
                v.push(&format!("prescriptions[{i}].{name}"), format!("Prescription {name} is required"));
            }
        }
    }
}

fn clean(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn clean_symptoms(symptoms: Vec<String>) -> Vec<String> {
    symptoms
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Resolve an optional appointment link, which must exist when given.
fn appointment_link(conn: &Connection, raw: Option<&str>) -> Result<Option<Uuid>, RecordError> {
    let Some(raw) = raw.map(str::trim).filter(|r| !r.is_empty()) else {
        return Ok(None);
    };
    let id = Uuid::parse_str(raw).map_err(|_| RecordError::AppointmentNotFound)?;
    match db::get_appointment(conn, &id)? {
        Some(appt) => Ok(Some(appt.id)),
        None => Err(RecordError::AppointmentNotFound),
    }
}

pub fn create_medical_record(
    conn: &Connection,
    caller: &Caller,
    req: NewMedicalRecord,
) -> Result<MedicalRecord, RecordError> {
    caller.require(STAFF, "create medical records")?;

    let mut v = Validator::new();
    let patient_raw = v.required("patientId", "Patient", req.patient_id.as_deref());
    let doctor_raw = v.required("doctorId", "Doctor", req.doctor_id.as_deref());
    let diagnosis = v.required("diagnosis", "Diagnosis", req.diagnosis.as_deref());
    v.max_chars("diagnosis", "Diagnosis", diagnosis, MAX_DIAGNOSIS_CHARS);
    let visit_date = v.date("visitDate", "Visit date", req.visit_date.as_deref());
    let follow_up_date = v.date("followUpDate", "Follow-up date", req.follow_up_date.as_deref());
    check_prescriptions(&mut v, &req.prescriptions);
    v.finish()?;
    let (Some(patient_raw), Some(doctor_raw), Some(diagnosis)) = (patient_raw, doctor_raw, diagnosis) else {
        return Err(RecordError::Validation(Vec::new()));
    };

    let patient_id = Uuid::parse_str(patient_raw).map_err(|_| RecordError::PatientNotFound)?;
    let doctor_id = Uuid::parse_str(doctor_raw).map_err(|_| RecordError::DoctorNotFound)?;
    let patient = db::get_patient(conn, &patient_id)?.ok_or(RecordError::PatientNotFound)?;
    let doctor = db::get_doctor(conn, &doctor_id)?.ok_or(RecordError::DoctorNotFound)?;
    let appointment_id = appointment_link(conn, req.appointment_id.as_deref())?;

    let now = Utc::now();
    let record = MedicalRecord {
        id: Uuid::new_v4(),
        patient_id: patient.id,
        doctor_id: doctor.id,
        appointment_id,
        visit_date: visit_date.unwrap_or_else(|| now.date_naive()),
        diagnosis: diagnosis.to_string(),
        symptoms: clean_symptoms(req.symptoms),
        treatment: clean(req.treatment),
        prescriptions: req.prescriptions,
        notes: clean(req.notes),
        follow_up_date,
        created_at: now,
        updated_at: now,
    };
    db::insert_medical_record(conn, &record)?;
    tracing::info!(
        record_id = %record.id,
        patient_id = %record.patient_id,
        created_by = %caller.user_id,
        "Medical record created"
    );
    Ok(record)
}

pub fn update_medical_record(
    conn: &Connection,
    caller: &Caller,
    id: &Uuid,
    patch: MedicalRecordPatch,
) -> Result<MedicalRecord, RecordError> {
    caller.require(STAFF, "update medical records")?;

    let mut v = Validator::new();
    if patch.diagnosis.as_deref().is_some_and(|d| d.trim().is_empty()) {
        v.push("diagnosis", "Diagnosis is required");
    }
    v.max_chars("diagnosis", "Diagnosis", patch.diagnosis.as_deref(), MAX_DIAGNOSIS_CHARS);
    let visit_date = v.date("visitDate", "Visit date", patch.visit_date.as_deref());
    let follow_up_date = v.date("followUpDate", "Follow-up date", patch.follow_up_date.as_deref());
    if let Some(prescriptions) = &patch.prescriptions {
        check_prescriptions(&mut v, prescriptions);
    }
    v.finish()?;

    let mut record = db::get_medical_record(conn, id)?.ok_or(RecordError::NotFound)?;
    if patch.appointment_id.is_some() {
        record.appointment_id = appointment_link(conn, patch.appointment_id.as_deref())?;
    }
    if let Some(date) = visit_date {
        record.visit_date = date;
    }
    if let Some(diagnosis) = patch.diagnosis {
        record.diagnosis = diagnosis.trim().to_string();
    }
    if let Some(symptoms) = patch.symptoms {
        record.symptoms = clean_symptoms(symptoms);
    }
    if patch.treatment.is_some() {
        record.treatment = clean(patch.treatment);
    }
    if let Some(prescriptions) = patch.prescriptions {
        record.prescriptions = prescriptions;
    }
    if patch.notes.is_some() {
        record.notes = clean(patch.notes);
    }
    if follow_up_date.is_some() {
        record.follow_up_date = follow_up_date;
    }
    record.updated_at = Utc::now();
    db::update_medical_record(conn, &record)?;
    Ok(record)
}

pub fn delete_medical_record(conn: &Connection, caller: &Caller, id: &Uuid) -> Result<(), RecordError> {
    caller.require(STAFF, "delete medical records")?;
    if !db::delete_medical_record(conn, id)? {
        return Err(RecordError::NotFound);
    }
    tracing::info!(record_id = %id, deleted_by = %caller.user_id, "Medical record deleted");
    Ok(())
}

pub fn get_medical_record(conn: &Connection, caller: &Caller, id: &Uuid) -> Result<MedicalRecord, RecordError> {
    let record = db::get_medical_record(conn, id)?.ok_or(RecordError::NotFound)?;
    let scope = visibility::resolve_scope(conn, caller)?;
    if !scope.permits(&record.patient_id, &record.doctor_id) {
        tracing::warn!(user_id = %caller.user_id, record_id = %id, "Medical record outside caller scope");
        return Err(RecordError::Forbidden(
            "Not authorized to view this record".into(),
        ));
    }
    Ok(record)
}

pub fn list_medical_records(
    conn: &Connection,
    caller: &Caller,
    query: &MedicalRecordQuery,
) -> Result<Page<MedicalRecord>, RecordError> {
    let mut v = Validator::new();
    let patient_id = v.parse(
        "patientId",
        query.patient_id.as_deref().map(str::trim).filter(|p| !p.is_empty()),
        "Invalid patient id",
    );
    v.finish()?;

    let scope = visibility::resolve_scope(conn, caller)?;
    let page = PageRequest::new(query.page, query.limit);
    Ok(db::list_medical_records(
        conn,
        &scope,
        &MedicalRecordFilter { patient_id },
        &page,
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::test_support::*;

    fn new_record(patient: &Patient, doctor: &Doctor) -> NewMedicalRecord {
        NewMedicalRecord {
            patient_id: Some(patient.id.to_string()),
            doctor_id: Some(doctor.id.to_string()),
            visit_date: Some("2024-01-10".into()),
            diagnosis: Some("Hypertension".into()),
            symptoms: vec!["headache".into(), "  ".into()],
            prescriptions: vec![Prescription {
                medication: "Lisinopril".into(),
                dosage: "10mg".into(),
                frequency: "daily".into(),
                duration: None,
            }],
            ..Default::default()
        }
    }

    #[test]
    fn create_requires_both_parties() {
        let (_dir, conn) = test_db();
        let admin = Caller::from(&make_user(&conn, "admin@example.com", Role::Admin));
        let patient = make_patient(&conn, "p@example.com", None);
        let doctor = make_doctor(&conn, "d@example.com", None);

        let mut req = new_record(&patient, &doctor);
        req.doctor_id = None;
        let err = create_medical_record(&conn, &admin, req).unwrap_err();
        let RecordError::Validation(errors) = err else {
            panic!("expected validation error");
        };
        assert_eq!(errors[0].field, "doctorId");

        let mut req = new_record(&patient, &doctor);
        req.patient_id = Some(Uuid::new_v4().to_string());
        assert!(matches!(
            create_medical_record(&conn, &admin, req),
            Err(RecordError::PatientNotFound)
        ));

        let record = create_medical_record(&conn, &admin, new_record(&patient, &doctor)).unwrap();
        assert_eq!(record.symptoms, vec!["headache".to_string()]);
    }

    #[test]
    fn patient_cannot_write() {
        let (_dir, conn) = test_db();
        let user = make_user(&conn, "p@example.com", Role::Patient);
        let patient = make_patient(&conn, "p@example.com", Some(user.id));
        let doctor = make_doctor(&conn, "d@example.com", None);
        let err = create_medical_record(&conn, &Caller::from(&user), new_record(&patient, &doctor)).unwrap_err();
        assert!(matches!(err, RecordError::Forbidden(_)));
    }

    #[test]
    fn get_checks_ownership() {
        let (_dir, conn) = test_db();
        let admin = Caller::from(&make_user(&conn, "admin@example.com", Role::Admin));
        let owner_user = make_user(&conn, "owner@example.com", Role::Patient);
        let owner = make_patient(&conn, "owner@example.com", Some(owner_user.id));
        let stranger_user = make_user(&conn, "stranger@example.com", Role::Patient);
        make_patient(&conn, "stranger@example.com", Some(stranger_user.id));
        let doctor = make_doctor(&conn, "d@example.com", None);
        let record = create_medical_record(&conn, &admin, new_record(&owner, &doctor)).unwrap();

        let own = get_medical_record(&conn, &Caller::from(&owner_user), &record.id).unwrap();
        assert_eq!(own.id, record.id);

        let err = get_medical_record(&conn, &Caller::from(&stranger_user), &record.id).unwrap_err();
        assert!(matches!(err, RecordError::Forbidden(_)));

        let err = get_medical_record(&conn, &admin, &Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, RecordError::NotFound));
    }

    #[test]
    fn list_scoped_to_patient() {
        let (_dir, conn) = test_db();
        let admin = Caller::from(&make_user(&conn, "admin@example.com", Role::Admin));
        let user = make_user(&conn, "p@example.com", Role::Patient);
        let mine = make_patient(&conn, "p@example.com", Some(user.id));
        let other = make_patient(&conn, "o@example.com", None);
        let doctor = make_doctor(&conn, "d@example.com", None);
        create_medical_record(&conn, &admin, new_record(&mine, &doctor)).unwrap();
        create_medical_record(&conn, &admin, new_record(&other, &doctor)).unwrap();

        let page = list_medical_records(&conn, &Caller::from(&user), &MedicalRecordQuery::default()).unwrap();
        assert_eq!(page.pagination.total, 1);
        assert_eq!(page.items[0].patient_id, mine.id);

        // An explicit foreign patient filter cannot widen the scope.
        let query = MedicalRecordQuery {
            patient_id: Some(other.id.to_string()),
            ..Default::default()
        };
        assert_eq!(list_medical_records(&conn, &Caller::from(&user), &query).unwrap().pagination.total, 0);
        assert_eq!(list_medical_records(&conn, &admin, &query).unwrap().pagination.total, 1);
    }

    #[test]
    fn update_and_delete() {
        let (_dir, conn) = test_db();
        let admin = Caller::from(&make_user(&conn, "admin@example.com", Role::Admin));
        let patient = make_patient(&conn, "p@example.com", None);
        let doctor = make_doctor(&conn, "d@example.com", None);
        let record = create_medical_record(&conn, &admin, new_record(&patient, &doctor)).unwrap();

        let patch = MedicalRecordPatch {
            diagnosis: Some("Controlled hypertension".into()),
            follow_up_date: Some("2024-03-01".into()),
            ..Default::default()
        };
        let updated = update_medical_record(&conn, &admin, &record.id, patch).unwrap();
        assert_eq!(updated.diagnosis, "Controlled hypertension");
        assert_eq!(updated.prescriptions, record.prescriptions);

        delete_medical_record(&conn, &admin, &record.id).unwrap();
        assert!(matches!(
            delete_medical_record(&conn, &admin, &record.id),
            Err(RecordError::NotFound)
        ));
    }
}
