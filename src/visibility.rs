//! Visibility filter: which appointments and medical records a caller may see.
//!
//! - admin   → everything
//! - doctor  → rows whose doctor is the caller's linked Doctor record
//! - patient → rows whose patient is the caller's linked Patient record
//!
//! Identity resolution goes by `user_id` first and falls back to the
//! account email, only for records no account has claimed yet. A caller
//! whose record cannot be resolved sees nothing; that is not an error.

use rusqlite::Connection;
use uuid::Uuid;

use crate::authorization::Caller;
use crate::db::{self, DatabaseError};
use crate::models::{Doctor, Patient, Role};

/// The resolved visibility of one caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    All,
    Doctor(Uuid),
    Patient(Uuid),
    /// No linked profile: every scoped query returns an empty result.
    Nothing,
}

impl Scope {
    /// Whether a row owned by (`patient_id`, `doctor_id`) is inside this scope.
    pub fn permits(&self, patient_id: &Uuid, doctor_id: &Uuid) -> bool {
        match self {
            Scope::All => true,
            Scope::Doctor(id) => id == doctor_id,
            Scope::Patient(id) => id == patient_id,
            Scope::Nothing => false,
        }
    }
}

pub fn resolve_scope(conn: &Connection, caller: &Caller) -> Result<Scope, DatabaseError> {
    let scope = match caller.role {
        Role::Admin => Scope::All,
        Role::Doctor => match resolve_doctor(conn, caller)? {
            Some(doctor) => Scope::Doctor(doctor.id),
            None => Scope::Nothing,
        },
        Role::Patient => match resolve_patient(conn, caller)? {
            Some(patient) => Scope::Patient(patient.id),
            None => Scope::Nothing,
        },
    };
    if scope == Scope::Nothing {
        tracing::debug!(user_id = %caller.user_id, role = %caller.role, "No linked profile, empty scope");
    }
    Ok(scope)
}

/// Doctor record linked to the caller, by user reference then unclaimed email.
pub fn resolve_doctor(conn: &Connection, caller: &Caller) -> Result<Option<Doctor>, DatabaseError> {
    if let Some(doctor) = db::find_doctor_by_user(conn, &caller.user_id)? {
        return Ok(Some(doctor));
    }
    db::find_unlinked_doctor_by_email(conn, &caller.email)
}

/// Patient record linked to the caller, by user reference then unclaimed email.
/// Read-only: never backfills or provisions (see `patient_profile`).
pub fn resolve_patient(conn: &Connection, caller: &Caller) -> Result<Option<Patient>, DatabaseError> {
    if let Some(patient) = db::find_patient_by_user(conn, &caller.user_id)? {
        return Ok(Some(patient));
    }
    db::find_unlinked_patient_by_email(conn, &caller.email)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::test_support::*;

    fn caller_for(user: &crate::models::User) -> Caller {
        Caller::from(user)
    }

    #[test]
    fn admin_sees_everything() {
        let (_dir, conn) = test_db();
        let admin = make_user(&conn, "admin@example.com", Role::Admin);
        assert_eq!(resolve_scope(&conn, &caller_for(&admin)).unwrap(), Scope::All);
    }

    #[test]
    fn doctor_scope_by_user_link() {
        let (_dir, conn) = test_db();
        let user = make_user(&conn, "chen@example.com", Role::Doctor);
        let doctor = make_doctor(&conn, "chen-clinic@example.com", Some(user.id));
        assert_eq!(
            resolve_scope(&conn, &caller_for(&user)).unwrap(),
            Scope::Doctor(doctor.id)
        );
    }

    #[test]
    fn doctor_scope_falls_back_to_email() {
        let (_dir, conn) = test_db();
        let user = make_user(&conn, "legacy@example.com", Role::Doctor);
        let doctor = make_doctor(&conn, "legacy@example.com", None);
        assert_eq!(
            resolve_scope(&conn, &caller_for(&user)).unwrap(),
            Scope::Doctor(doctor.id)
        );
    }

    #[test]
    fn unlinked_patient_sees_nothing() {
        let (_dir, conn) = test_db();
        let user = make_user(&conn, "new@example.com", Role::Patient);
        assert_eq!(resolve_scope(&conn, &caller_for(&user)).unwrap(), Scope::Nothing);
    }

    #[test]
    fn patient_resolution_does_not_backfill() {
        let (_dir, conn) = test_db();
        let user = make_user(&conn, "legacy@example.com", Role::Patient);
        let patient = make_patient(&conn, "legacy@example.com", None);
        assert_eq!(
            resolve_scope(&conn, &caller_for(&user)).unwrap(),
            Scope::Patient(patient.id)
        );
        assert!(db::get_patient(&conn, &patient.id).unwrap().unwrap().user_id.is_none());
    }

    #[test]
    fn email_fallback_skips_records_claimed_by_another_account() {
        let (_dir, conn) = test_db();
        let owner = make_user(&conn, "owner@example.com", Role::Patient);
        make_patient(&conn, "shared@example.com", Some(owner.id));
        let other = make_user(&conn, "shared@example.com", Role::Patient);
        assert_eq!(resolve_scope(&conn, &caller_for(&other)).unwrap(), Scope::Nothing);

        let doc_owner = make_user(&conn, "doc-owner@example.com", Role::Doctor);
        make_doctor(&conn, "ward@example.com", Some(doc_owner.id));
        let doc_other = make_user(&conn, "ward@example.com", Role::Doctor);
        assert_eq!(resolve_scope(&conn, &caller_for(&doc_other)).unwrap(), Scope::Nothing);
    }

    #[test]
    fn permits_matches_owner_column() {
        let (p, d) = (Uuid::new_v4(), Uuid::new_v4());
        assert!(Scope::All.permits(&p, &d));
        assert!(Scope::Patient(p).permits(&p, &d));
        assert!(!Scope::Patient(d).permits(&p, &d));
        assert!(Scope::Doctor(d).permits(&p, &d));
        assert!(!Scope::Nothing.permits(&p, &d));
    }
}
