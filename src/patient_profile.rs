//! Patient self-resolution: the "ensure patient profile" step run before a
//! patient-role caller books an appointment.
//!
//! Resolution order:
//! 1. Patient linked by `user_id`
//! 2. Legacy patient with the account email, backfilled with `user_id`
//! 3. New placeholder patient, flagged `profile_complete = false`
//!
//! A duplicate-key failure in step 3 means another request provisioned the
//! same email first; we re-query and link instead of failing. An email that
//! already belongs to another account's patient is refused.

use chrono::{NaiveDate, Utc};
use rusqlite::Connection;
use uuid::Uuid;

use crate::db::{self, DatabaseError};
use crate::models::{BloodGroup, Gender, Patient};

pub const PLACEHOLDER_PHONE: &str = "0000000000";
pub const PLACEHOLDER_ADDRESS: &str = "Not provided";

#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    #[error("A patient profile with this email belongs to another account")]
    EmailClaimed,

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

fn placeholder_birth_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(1990, 1, 1).unwrap_or_default()
}

/// How the caller's patient record was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatientResolution {
    Linked(Uuid),
    Backfilled(Uuid),
    Provisioned(Uuid),
}

impl PatientResolution {
    pub fn id(&self) -> Uuid {
        match self {
            Self::Linked(id) | Self::Backfilled(id) | Self::Provisioned(id) => *id,
        }
    }
}

pub fn ensure_patient_profile(
    conn: &Connection,
    user_id: &Uuid,
    email: &str,
    name_hint: Option<&str>,
) -> Result<PatientResolution, ProfileError> {
    if let Some(patient) = db::find_patient_by_user(conn, user_id)? {
        return Ok(PatientResolution::Linked(patient.id));
    }

    if let Some(patient) = db::find_patient_by_email(conn, email)? {
        return backfill(conn, patient, user_id);
    }

    let patient = placeholder_patient(user_id, email, name_hint);
    match db::insert_patient(conn, &patient) {
        Ok(()) => {
            tracing::info!(
                patient_id = %patient.id,
                user_id = %user_id,
                "Provisioned placeholder patient profile"
            );
            Ok(PatientResolution::Provisioned(patient.id))
        }
        Err(DatabaseError::DuplicateKey(detail)) => {
            tracing::warn!(user_id = %user_id, %detail, "Concurrent patient provisioning, re-resolving");
            if let Some(existing) = db::find_patient_by_user(conn, user_id)? {
                return Ok(PatientResolution::Linked(existing.id));
            }
            match db::find_patient_by_email(conn, email)? {
                Some(existing) => backfill(conn, existing, user_id),
                None => Err(DatabaseError::DuplicateKey(detail).into()),
            }
        }
        Err(e) => Err(e.into()),
    }
}

fn backfill(conn: &Connection, patient: Patient, user_id: &Uuid) -> Result<PatientResolution, ProfileError> {
    if patient.user_id.as_ref() == Some(user_id) {
        return Ok(PatientResolution::Linked(patient.id));
    }
    if let Some(owner) = patient.user_id {
        tracing::warn!(
            patient_id = %patient.id,
            %owner,
            user_id = %user_id,
            "Patient email already claimed by another account"
        );
        return Err(ProfileError::EmailClaimed);
    }
    db::link_patient_user(conn, &patient.id, user_id)?;
    tracing::info!(patient_id = %patient.id, user_id = %user_id, "Linked legacy patient record");
    Ok(PatientResolution::Backfilled(patient.id))
}

fn placeholder_patient(user_id: &Uuid, email: &str, name_hint: Option<&str>) -> Patient {
    let name = name_hint
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| email.split('@').next().unwrap_or(email))
        .to_string();
    Patient {
        id: Uuid::new_v4(),
        user_id: Some(*user_id),
        name,
        email: email.to_string(),
        phone: PLACEHOLDER_PHONE.into(),
        date_of_birth: placeholder_birth_date(),
        gender: Gender::Other,
        address: PLACEHOLDER_ADDRESS.into(),
        blood_group: BloodGroup::OPositive,
        emergency_contact: None,
        medical_history: None,
        profile_complete: false,
        created_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::test_support::*;
    use crate::models::{PageRequest, PatientFilter, Role};

    fn patient_count(conn: &Connection) -> u64 {
        db::list_patients(conn, &PatientFilter::default(), &PageRequest::default())
            .unwrap()
            .pagination
            .total
    }

    #[test]
    fn provisions_exactly_one_placeholder() {
        let (_dir, conn) = test_db();
        let user = make_user(&conn, "sam@example.com", Role::Patient);

        let first = ensure_patient_profile(&conn, &user.id, &user.email, Some("Sam Lee")).unwrap();
        assert!(matches!(first, PatientResolution::Provisioned(_)));

        let second = ensure_patient_profile(&conn, &user.id, &user.email, Some("Sam Lee")).unwrap();
        assert_eq!(second, PatientResolution::Linked(first.id()));
        assert_eq!(patient_count(&conn), 1);
    }

    #[test]
    fn placeholder_defaults() {
        let (_dir, conn) = test_db();
        let user = make_user(&conn, "sam@example.com", Role::Patient);
        let id = ensure_patient_profile(&conn, &user.id, &user.email, None).unwrap().id();

        let patient = db::get_patient(&conn, &id).unwrap().unwrap();
        assert_eq!(patient.name, "sam");
        assert_eq!(patient.phone, "0000000000");
        assert_eq!(patient.date_of_birth, NaiveDate::from_ymd_opt(1990, 1, 1).unwrap());
        assert_eq!(patient.gender, Gender::Other);
        assert_eq!(patient.address, "Not provided");
        assert_eq!(patient.blood_group, BloodGroup::OPositive);
        assert_eq!(patient.user_id, Some(user.id));
        assert!(!patient.profile_complete);
    }

    #[test]
    fn backfills_legacy_record_by_email() {
        let (_dir, conn) = test_db();
        let user = make_user(&conn, "legacy@example.com", Role::Patient);
        let legacy = make_patient(&conn, "legacy@example.com", None);

        let resolved = ensure_patient_profile(&conn, &user.id, &user.email, None).unwrap();
        assert_eq!(resolved, PatientResolution::Backfilled(legacy.id));

        let stored = db::get_patient(&conn, &legacy.id).unwrap().unwrap();
        assert_eq!(stored.user_id, Some(user.id));
        assert!(stored.profile_complete);
        assert_eq!(patient_count(&conn), 1);
    }

    #[test]
    fn email_owned_by_other_account_is_rejected() {
        let (_dir, conn) = test_db();
        let owner = make_user(&conn, "owner@example.com", Role::Patient);
        make_patient(&conn, "shared@example.com", Some(owner.id));
        let other = make_user(&conn, "shared@example.com", Role::Patient);

        let err = ensure_patient_profile(&conn, &other.id, &other.email, None).unwrap_err();
        assert!(matches!(err, ProfileError::EmailClaimed));
        assert_eq!(patient_count(&conn), 1);
    }
}
