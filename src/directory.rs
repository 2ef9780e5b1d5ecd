//! Patient, doctor and user administration.
//!
//! Deleting a patient, doctor or user is refused while appointments or
//! medical records still reference the profile. Deactivating a user is
//! always allowed and revokes their sessions.

use chrono::Utc;
use rusqlite::Connection;
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::{self, AuthError};
use crate::authorization::{AccessDenied, Caller, ADMIN_ONLY, PATIENT_ONLY, STAFF};
use crate::db::{self, DatabaseError};
use crate::models::*;
use crate::patient_profile::{ensure_patient_profile, ProfileError};
use crate::validation::{FieldError, Validator};
use crate::visibility;

const MAX_NAME_CHARS: usize = 100;
const MAX_HISTORY_CHARS: usize = 2000;

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("Validation failed")]
    Validation(Vec<FieldError>),

    #[error("{0}")]
    Duplicate(String),

    #[error("Cannot delete {0} with associated appointments or medical records")]
    HasAssociatedData(&'static str),

    #[error("{0}")]
    InvalidOperation(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Forbidden(String),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl From<rusqlite::Error> for DirectoryError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(DatabaseError::from(err))
    }
}

impl From<ProfileError> for DirectoryError {
    fn from(err: ProfileError) -> Self {
        match err {
            ProfileError::EmailClaimed => Self::Forbidden(err.to_string()),
            ProfileError::Database(e) => Self::Database(e),
        }
    }
}

impl From<AccessDenied> for DirectoryError {
    fn from(err: AccessDenied) -> Self {
        Self::Forbidden(err.0)
    }
}

impl From<Vec<FieldError>> for DirectoryError {
    fn from(errors: Vec<FieldError>) -> Self {
        Self::Validation(errors)
    }
}

impl From<AuthError> for DirectoryError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::EmailTaken => Self::Duplicate("User already exists with this email".into()),
            AuthError::Validation(errors) => Self::Validation(errors),
            AuthError::Forbidden(message) => Self::Forbidden(message),
            AuthError::Database(e) => Self::Database(e),
            other => Self::InvalidOperation(other.to_string()),
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn clean(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn duplicate(err: DatabaseError, message: &str) -> DirectoryError {
    match err {
        DatabaseError::DuplicateKey(_) => DirectoryError::Duplicate(message.to_string()),
        other => other.into(),
    }
}

/// Existing user of `role` to link a profile to.
fn linkable_user(conn: &Connection, v: &mut Validator, raw: Option<&str>, role: Role) -> Result<Option<Uuid>, DatabaseError> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    let user = match Uuid::parse_str(raw) {
        Ok(id) => db::get_user(conn, &id)?,
        Err(_) => None,
    };
    match user {
        Some(user) if user.role == role => Ok(Some(user.id)),
        Some(_) => {
            v.push("user", format!("User is not a {role}"));
            Ok(None)
        }
        None => {
            v.push("user", "User not found");
            Ok(None)
        }
    }
}

// ─── Patients ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPatient {
    #[serde(alias = "userId")]
    pub user: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub date_of_birth: Option<String>,
    pub gender: Option<String>,
    pub address: Option<String>,
    pub blood_group: Option<String>,
    pub emergency_contact: Option<String>,
    pub medical_history: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientPatch {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub date_of_birth: Option<String>,
    pub gender: Option<String>,
    pub address: Option<String>,
    pub blood_group: Option<String>,
    pub emergency_contact: Option<String>,
    pub medical_history: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientQuery {
    pub search: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

pub fn list_patients(conn: &Connection, caller: &Caller, query: &PatientQuery) -> Result<Page<Patient>, DirectoryError> {
    caller.require(STAFF, "list patients")?;
    let filter = PatientFilter {
        search: non_empty(&query.search).map(String::from),
    };
    Ok(db::list_patients(conn, &filter, &PageRequest::new(query.page, query.limit))?)
}

pub fn create_patient(conn: &Connection, caller: &Caller, req: NewPatient) -> Result<Patient, DirectoryError> {
    caller.require(STAFF, "create patients")?;

    let mut v = Validator::new();
    let name = v.required("name", "Name", req.name.as_deref());
    v.max_chars("name", "Name", name, MAX_NAME_CHARS);
    let email = v.email("email", req.email.as_deref());
    let phone = v.required("phone", "Phone", req.phone.as_deref());
    let date_of_birth = v
        .required("dateOfBirth", "Date of birth", req.date_of_birth.as_deref())
        .and_then(|raw| v.date("dateOfBirth", "Date of birth", Some(raw)));
    let gender = v
        .required("gender", "Gender", req.gender.as_deref())
        .and_then(|raw| v.parse::<Gender>("gender", Some(raw), "Invalid gender"));
    let address = v.required("address", "Address", req.address.as_deref());
    let blood_group = v
        .required("bloodGroup", "Blood group", req.blood_group.as_deref())
        .and_then(|raw| v.parse::<BloodGroup>("bloodGroup", Some(raw), "Invalid blood group"));
    v.max_chars("medicalHistory", "Medical history", req.medical_history.as_deref(), MAX_HISTORY_CHARS);
    let user_id = linkable_user(conn, &mut v, non_empty(&req.user), Role::Patient)?;
    v.finish()?;

    let (Some(name), Some(email), Some(phone), Some(date_of_birth), Some(gender), Some(address), Some(blood_group)) =
        (name, email, phone, date_of_birth, gender, address, blood_group)
    else {
        return Err(DirectoryError::Validation(Vec::new()));
    };

    let patient = Patient {
        id: Uuid::new_v4(),
        user_id,
        name: name.to_string(),
        email,
        phone: phone.to_string(),
        date_of_birth,
        gender,
        address: address.to_string(),
        blood_group,
        emergency_contact: clean(req.emergency_contact),
        medical_history: clean(req.medical_history),
        profile_complete: true,
        created_at: Utc::now(),
    };
    db::insert_patient(conn, &patient)
        .map_err(|e| duplicate(e, "Patient with this email already exists"))?;
    tracing::info!(patient_id = %patient.id, created_by = %caller.user_id, "Patient created");
    Ok(patient)
}

/// Staff see any patient; a patient only their own record.
pub fn get_patient(conn: &Connection, caller: &Caller, id: &Uuid) -> Result<Patient, DirectoryError> {
    let patient = db::get_patient(conn, id)?.ok_or(DirectoryError::NotFound("Patient"))?;
    match caller.role {
        Role::Admin | Role::Doctor => Ok(patient),
        Role::Patient => {
            let own = visibility::resolve_patient(conn, caller)?.map(|p| p.id);
            if own == Some(patient.id) {
                Ok(patient)
            } else {
                Err(DirectoryError::Forbidden("Not authorized to view this patient".into()))
            }
        }
    }
}

fn apply_patient_patch(patient: &mut Patient, patch: PatientPatch, allow_email: bool) -> Result<(), DirectoryError> {
    let mut v = Validator::new();
    for (field, label, value) in [
        ("name", "Name", &patch.name),
        ("phone", "Phone", &patch.phone),
        ("address", "Address", &patch.address),
    ] {
        if value.as_deref().is_some_and(|s| s.trim().is_empty()) {
            v.push(field, format!("{label} is required"));
        }
    }
    v.max_chars("name", "Name", patch.name.as_deref(), MAX_NAME_CHARS);
    v.max_chars("medicalHistory", "Medical history", patch.medical_history.as_deref(), MAX_HISTORY_CHARS);
    let email = if allow_email && patch.email.is_some() {
        v.email("email", patch.email.as_deref())
    } else {
        None
    };
    let date_of_birth = v.date("dateOfBirth", "Date of birth", non_empty(&patch.date_of_birth));
    let gender: Option<Gender> = v.parse("gender", non_empty(&patch.gender), "Invalid gender");
    let blood_group: Option<BloodGroup> = v.parse("bloodGroup", non_empty(&patch.blood_group), "Invalid blood group");
    v.finish()?;

    if let Some(name) = clean(patch.name) {
        patient.name = name;
    }
    if let Some(email) = email {
        patient.email = email;
    }
    if let Some(phone) = clean(patch.phone) {
        patient.phone = phone;
    }
    if let Some(date) = date_of_birth {
        patient.date_of_birth = date;
    }
    if let Some(gender) = gender {
        patient.gender = gender;
    }
    if let Some(address) = clean(patch.address) {
        patient.address = address;
    }
    if let Some(blood_group) = blood_group {
        patient.blood_group = blood_group;
    }
    if patch.emergency_contact.is_some() {
        patient.emergency_contact = clean(patch.emergency_contact);
    }
    if patch.medical_history.is_some() {
        patient.medical_history = clean(patch.medical_history);
    }
    Ok(())
}

pub fn update_patient(conn: &Connection, caller: &Caller, id: &Uuid, patch: PatientPatch) -> Result<Patient, DirectoryError> {
    caller.require(STAFF, "update patients")?;
    let mut patient = db::get_patient(conn, id)?.ok_or(DirectoryError::NotFound("Patient"))?;
    apply_patient_patch(&mut patient, patch, true)?;
    db::update_patient(conn, &patient)
        .map_err(|e| duplicate(e, "Patient with this email already exists"))?;
    Ok(patient)
}

/// The caller's own patient record. Read-only: nothing is provisioned.
pub fn my_patient_profile(conn: &Connection, caller: &Caller) -> Result<Patient, DirectoryError> {
    caller.require(PATIENT_ONLY, "view their patient profile")?;
    visibility::resolve_patient(conn, caller)?.ok_or(DirectoryError::NotFound("Patient profile"))
}

/// Patient completes (or edits) their own profile. Provisions the record
/// first if needed, and always marks it complete.
pub fn update_my_patient_profile(conn: &Connection, caller: &Caller, patch: PatientPatch) -> Result<Patient, DirectoryError> {
    caller.require(PATIENT_ONLY, "update their patient profile")?;
    let id = ensure_patient_profile(conn, &caller.user_id, &caller.email, Some(&caller.name))?.id();
    let mut patient = db::get_patient(conn, &id)?.ok_or(DirectoryError::NotFound("Patient profile"))?;
    apply_patient_patch(&mut patient, patch, false)?;
    if !patient.profile_complete {
        tracing::info!(patient_id = %patient.id, "Patient profile completed");
    }
    patient.profile_complete = true;
    db::update_patient(conn, &patient)?;
    Ok(patient)
}

pub fn delete_patient(conn: &Connection, caller: &Caller, id: &Uuid) -> Result<(), DirectoryError> {
    caller.require(ADMIN_ONLY, "delete patients")?;
    let patient = db::get_patient(conn, id)?.ok_or(DirectoryError::NotFound("Patient"))?;
    if patient_has_history(conn, &patient.id)? {
        return Err(DirectoryError::HasAssociatedData("patient"));
    }
    db::delete_patient(conn, id)?;
    tracing::info!(patient_id = %id, deleted_by = %caller.user_id, "Patient deleted");
    Ok(())
}

fn patient_has_history(conn: &Connection, id: &Uuid) -> Result<bool, DatabaseError> {
    Ok(db::count_appointments_for_patient(conn, id)? + db::count_records_for_patient(conn, id)? > 0)
}

// ─── Doctors ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewDoctor {
    #[serde(alias = "userId")]
    pub user: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub specialization: Option<String>,
    pub license_number: Option<String>,
    pub experience_years: Option<i64>,
    pub consultation_fee: Option<f64>,
    #[serde(default)]
    pub schedule: Vec<ScheduleSlot>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DoctorPatch {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub specialization: Option<String>,
    pub license_number: Option<String>,
    pub experience_years: Option<i64>,
    pub consultation_fee: Option<f64>,
    pub schedule: Option<Vec<ScheduleSlot>>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DoctorQuery {
    pub specialization: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

fn check_experience(v: &mut Validator, raw: Option<i64>) -> Option<u32> {
    let years = raw?;
    match u32::try_from(years) {
        Ok(y) => Some(y),
        Err(_) => {
            v.push("experienceYears", "Experience cannot be negative");
            None
        }
    }
}

fn check_fee(v: &mut Validator, raw: Option<f64>) -> Option<f64> {
    let fee = raw?;
    if !fee.is_finite() || fee < 0.0 {
        v.push("consultationFee", "Consultation fee cannot be negative");
        return None;
    }
    Some(fee)
}

fn check_schedule(v: &mut Validator, schedule: &[ScheduleSlot]) {
    for (i, slot) in schedule.iter().enumerate() {
        if slot.day.trim().is_empty() || slot.from.trim().is_empty() || slot.to.trim().is_empty() {
            v.push(&format!("schedule[{i}]"), "Schedule entries need a day, from and to");
        }
    }
}

pub fn list_doctors(conn: &Connection, query: &DoctorQuery) -> Result<Page<Doctor>, DirectoryError> {
    let filter = DoctorFilter {
        specialization: non_empty(&query.specialization).map(String::from),
    };
    Ok(db::list_doctors(conn, &filter, &PageRequest::new(query.page, query.limit))?)
}

pub fn get_doctor(conn: &Connection, id: &Uuid) -> Result<Doctor, DirectoryError> {
    db::get_doctor(conn, id)?.ok_or(DirectoryError::NotFound("Doctor"))
}

pub fn create_doctor(conn: &Connection, caller: &Caller, req: NewDoctor) -> Result<Doctor, DirectoryError> {
    caller.require(ADMIN_ONLY, "create doctors")?;

    let mut v = Validator::new();
    let name = v.required("name", "Name", req.name.as_deref());
    v.max_chars("name", "Name", name, MAX_NAME_CHARS);
    let email = v.email("email", req.email.as_deref());
    let specialization = v.required("specialization", "Specialization", req.specialization.as_deref());
    let experience_years = check_experience(&mut v, req.experience_years);
    let consultation_fee = check_fee(&mut v, req.consultation_fee);
    check_schedule(&mut v, &req.schedule);
    let user_id = linkable_user(conn, &mut v, non_empty(&req.user), Role::Doctor)?;
    v.finish()?;
    let (Some(name), Some(email), Some(specialization)) = (name, email, specialization) else {
        return Err(DirectoryError::Validation(Vec::new()));
    };

    let doctor = Doctor {
        id: Uuid::new_v4(),
        user_id,
        name: name.to_string(),
        email,
        phone: clean(req.phone),
        specialization: specialization.to_string(),
        license_number: clean(req.license_number),
        experience_years,
        consultation_fee,
        schedule: req.schedule,
        is_active: true,
        created_at: Utc::now(),
    };
    db::insert_doctor(conn, &doctor)
        .map_err(|e| duplicate(e, "Doctor with this email already exists"))?;
    tracing::info!(doctor_id = %doctor.id, created_by = %caller.user_id, "Doctor created");
    Ok(doctor)
}

/// Admin edits any doctor; a doctor edits their own profile but not its
/// email or active flag.
pub fn update_doctor(conn: &Connection, caller: &Caller, id: &Uuid, patch: DoctorPatch) -> Result<Doctor, DirectoryError> {
    let mut doctor = db::get_doctor(conn, id)?.ok_or(DirectoryError::NotFound("Doctor"))?;
    let is_admin = match caller.role {
        Role::Admin => true,
        Role::Doctor => {
            let own = visibility::resolve_doctor(conn, caller)?.map(|d| d.id);
            if own != Some(doctor.id) {
                return Err(DirectoryError::Forbidden("Not authorized to update this doctor".into()));
            }
            false
        }
        Role::Patient => {
            return Err(DirectoryError::Forbidden("Only admin/doctor can update doctors".into()));
        }
    };

    let mut v = Validator::new();
    for (field, label, value) in [("name", "Name", &patch.name), ("specialization", "Specialization", &patch.specialization)] {
        if value.as_deref().is_some_and(|s| s.trim().is_empty()) {
            v.push(field, format!("{label} is required"));
        }
    }
    v.max_chars("name", "Name", patch.name.as_deref(), MAX_NAME_CHARS);
    let email = if is_admin && patch.email.is_some() {
        v.email("email", patch.email.as_deref())
    } else {
        None
    };
    let experience_years = check_experience(&mut v, patch.experience_years);
    let consultation_fee = check_fee(&mut v, patch.consultation_fee);
    if let Some(schedule) = &patch.schedule {
        check_schedule(&mut v, schedule);
    }
    v.finish()?;

    if let Some(name) = clean(patch.name) {
        doctor.name = name;
    }
    if let Some(email) = email {
        doctor.email = email;
    }
    if patch.phone.is_some() {
        doctor.phone = clean(patch.phone);
    }
    if let Some(specialization) = clean(patch.specialization) {
        doctor.specialization = specialization;
    }
    if patch.license_number.is_some() {
        doctor.license_number = clean(patch.license_number);
    }
    if experience_years.is_some() {
        doctor.experience_years = experience_years;
    }
    if consultation_fee.is_some() {
        doctor.consultation_fee = consultation_fee;
    }
    if let Some(schedule) = patch.schedule {
        doctor.schedule = schedule;
    }
    if let (true, Some(active)) = (is_admin, patch.is_active) {
        doctor.is_active = active;
    }
    db::update_doctor(conn, &doctor)
        .map_err(|e| duplicate(e, "Doctor with this email already exists"))?;
    Ok(doctor)
}

pub fn delete_doctor(conn: &Connection, caller: &Caller, id: &Uuid) -> Result<(), DirectoryError> {
    caller.require(ADMIN_ONLY, "delete doctors")?;
    let doctor = db::get_doctor(conn, id)?.ok_or(DirectoryError::NotFound("Doctor"))?;
    if doctor_has_history(conn, &doctor.id)? {
        return Err(DirectoryError::HasAssociatedData("doctor"));
    }
    db::delete_doctor(conn, id)?;
    tracing::info!(doctor_id = %id, deleted_by = %caller.user_id, "Doctor deleted");
    Ok(())
}

fn doctor_has_history(conn: &Connection, id: &Uuid) -> Result<bool, DatabaseError> {
    Ok(db::count_appointments_for_doctor(conn, id)? + db::count_records_for_doctor(conn, id)? > 0)
}

// ─── Users ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUser {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub role: Option<String>,
    /// Required for doctors: a linked doctor profile is created alongside.
    pub specialization: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStatusUpdate {
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserQuery {
    pub role: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

pub fn list_users(conn: &Connection, caller: &Caller, query: &UserQuery) -> Result<Page<User>, DirectoryError> {
    caller.require(ADMIN_ONLY, "list users")?;
    let mut v = Validator::new();
    let role = v.parse("role", non_empty(&query.role), "Invalid role");
    v.finish()?;
    Ok(db::list_users(conn, &UserFilter { role }, &PageRequest::new(query.page, query.limit))?)
}

/// Admin-created account of any role. A doctor account gets its linked
/// doctor profile in the same transaction.
pub fn create_user(conn: &mut Connection, caller: &Caller, req: NewUser) -> Result<User, DirectoryError> {
    caller.require(ADMIN_ONLY, "create users")?;
    let account = auth::validate_account(
        req.name.as_deref(),
        req.email.as_deref(),
        req.password.as_deref(),
        req.role.as_deref(),
    )?;
    let specialization = match account.role {
        Role::Doctor => {
            let mut v = Validator::new();
            let spec = v.required("specialization", "Specialization", req.specialization.as_deref());
            v.finish()?;
            spec.map(String::from)
        }
        Role::Admin | Role::Patient => None,
    };

    let tx = conn.transaction()?;
    let user = auth::create_account(&tx, &account)?;
    if let Some(specialization) = specialization {
        let doctor = Doctor {
            id: Uuid::new_v4(),
            user_id: Some(user.id),
            name: user.name.clone(),
            email: user.email.clone(),
            phone: clean(req.phone),
            specialization,
            license_number: None,
            experience_years: None,
            consultation_fee: None,
            schedule: Vec::new(),
            is_active: true,
            created_at: user.created_at,
        };
        db::insert_doctor(&tx, &doctor)
            .map_err(|e| duplicate(e, "Doctor with this email already exists"))?;
    }
    tx.commit()?;
    tracing::info!(user_id = %user.id, role = %user.role, created_by = %caller.user_id, "User created");
    Ok(user)
}

pub fn set_user_status(conn: &Connection, caller: &Caller, id: &Uuid, update: UserStatusUpdate) -> Result<User, DirectoryError> {
    caller.require(ADMIN_ONLY, "change user status")?;
    let Some(active) = update.is_active else {
        return Err(DirectoryError::Validation(vec![FieldError {
            field: "isActive".into(),
            message: "isActive must be a boolean".into(),
        }]));
    };
    if !active && *id == caller.user_id {
        return Err(DirectoryError::InvalidOperation("You cannot deactivate your own account".into()));
    }
    db::set_user_active(conn, id, active).map_err(|e| match e {
        DatabaseError::NotFound { .. } => DirectoryError::NotFound("User"),
        other => other.into(),
    })?;
    if !active {
        let revoked = db::delete_sessions_for_user(conn, id)?;
        tracing::info!(user_id = %id, revoked, "User deactivated");
    } else {
        tracing::info!(user_id = %id, "User activated");
    }
    db::get_user(conn, id)?.ok_or(DirectoryError::NotFound("User"))
}

/// Delete a user and their linked profile. Refused while the profile has
/// appointments or medical records.
pub fn delete_user(conn: &mut Connection, caller: &Caller, id: &Uuid) -> Result<(), DirectoryError> {
    caller.require(ADMIN_ONLY, "delete users")?;
    if *id == caller.user_id {
        return Err(DirectoryError::InvalidOperation("You cannot delete your own account".into()));
    }

    let tx = conn.transaction()?;
    let user = db::get_user(&tx, id)?.ok_or(DirectoryError::NotFound("User"))?;
    let patient = db::find_patient_by_user(&tx, &user.id)?;
    let doctor = db::find_doctor_by_user(&tx, &user.id)?;

    let mut has_history = false;
    if let Some(patient) = &patient {
        has_history |= patient_has_history(&tx, &patient.id)?;
    }
    if let Some(doctor) = &doctor {
        has_history |= doctor_has_history(&tx, &doctor.id)?;
    }
    if has_history {
        tracing::info!(user_id = %id, "Refused delete of user with clinical history");
        return Err(DirectoryError::HasAssociatedData("user"));
    }

    if let Some(patient) = patient {
        db::delete_patient(&tx, &patient.id)?;
    }
    if let Some(doctor) = doctor {
        db::delete_doctor(&tx, &doctor.id)?;
    }
    db::delete_sessions_for_user(&tx, &user.id)?;
    db::delete_user(&tx, &user.id)?;
    tx.commit()?;
    tracing::info!(user_id = %id, deleted_by = %caller.user_id, "User deleted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::test_support::*;

    fn admin(conn: &Connection) -> Caller {
        Caller::from(&make_user(conn, "admin@example.com", Role::Admin))
    }

    fn new_patient(email: &str) -> NewPatient {
        NewPatient {
            name: Some("Grace Hopper".into()),
            email: Some(email.into()),
            phone: Some("555-0199".into()),
            date_of_birth: Some("1980-12-09".into()),
            gender: Some("Female".into()),
            address: Some("42 Navy Way".into()),
            blood_group: Some("B+".into()),
            ..Default::default()
        }
    }

    #[test]
    fn create_patient_validates_and_rejects_duplicates() {
        let (_dir, conn) = test_db();
        let admin = admin(&conn);

        let patient = create_patient(&conn, &admin, new_patient("Grace@Example.com")).unwrap();
        assert_eq!(patient.email, "grace@example.com");
        assert!(patient.profile_complete);

        let err = create_patient(&conn, &admin, new_patient("grace@example.com")).unwrap_err();
        assert!(matches!(err, DirectoryError::Duplicate(_)));

        let mut bad = new_patient("x@example.com");
        bad.blood_group = Some("Z+".into());
        bad.phone = None;
        let Err(DirectoryError::Validation(errors)) = create_patient(&conn, &admin, bad) else {
            panic!("expected validation error");
        };
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, ["phone", "bloodGroup"]);
    }

    #[test]
    fn patient_reads_only_self() {
        let (_dir, conn) = test_db();
        let user = make_user(&conn, "p@example.com", Role::Patient);
        let own = make_patient(&conn, "p@example.com", Some(user.id));
        let other = make_patient(&conn, "o@example.com", None);
        let caller = Caller::from(&user);

        assert_eq!(get_patient(&conn, &caller, &own.id).unwrap().id, own.id);
        assert!(matches!(get_patient(&conn, &caller, &other.id), Err(DirectoryError::Forbidden(_))));
        assert!(matches!(
            list_patients(&conn, &caller, &PatientQuery::default()),
            Err(DirectoryError::Forbidden(_))
        ));
    }

    #[test]
    fn completing_own_profile() {
        let (_dir, conn) = test_db();
        let user = make_user(&conn, "new@example.com", Role::Patient);
        let caller = Caller::from(&user);
        assert!(matches!(
            my_patient_profile(&conn, &caller),
            Err(DirectoryError::NotFound(_))
        ));

        let patch = PatientPatch {
            phone: Some("555-0123".into()),
            date_of_birth: Some("1975-06-30".into()),
            blood_group: Some("AB-".into()),
            email: Some("hijack@example.com".into()),
            ..Default::default()
        };
        let patient = update_my_patient_profile(&conn, &caller, patch).unwrap();
        assert!(patient.profile_complete);
        assert_eq!(patient.phone, "555-0123");
        assert_eq!(patient.blood_group, BloodGroup::AbNegative);
        assert_eq!(patient.email, "new@example.com");
        assert_eq!(my_patient_profile(&conn, &caller).unwrap().id, patient.id);
    }

    #[test]
    fn delete_patient_guarded() {
        let (_dir, conn) = test_db();
        let admin = admin(&conn);
        let patient = make_patient(&conn, "p@example.com", None);
        let doctor = make_doctor(&conn, "d@example.com", None);
        make_appointment(&conn, patient.id, doctor.id, jan10(9, 0), AppointmentStatus::Cancelled);

        assert!(matches!(
            delete_patient(&conn, &admin, &patient.id),
            Err(DirectoryError::HasAssociatedData("patient"))
        ));
        assert!(matches!(
            delete_doctor(&conn, &admin, &doctor.id),
            Err(DirectoryError::HasAssociatedData("doctor"))
        ));

        let idle = make_patient(&conn, "idle@example.com", None);
        delete_patient(&conn, &admin, &idle.id).unwrap();
        assert!(db::get_patient(&conn, &idle.id).unwrap().is_none());
    }

    #[test]
    fn doctor_updates_own_profile_only() {
        let (_dir, conn) = test_db();
        let user = make_user(&conn, "chen@example.com", Role::Doctor);
        let own = make_doctor(&conn, "chen@example.com", Some(user.id));
        let other = make_doctor(&conn, "other@example.com", None);
        let caller = Caller::from(&user);

        let patch = DoctorPatch {
            consultation_fee: Some(95.0),
            is_active: Some(false),
            ..Default::default()
        };
        let updated = update_doctor(&conn, &caller, &own.id, patch).unwrap();
        assert_eq!(updated.consultation_fee, Some(95.0));
        assert!(updated.is_active);

        assert!(matches!(
            update_doctor(&conn, &caller, &other.id, DoctorPatch::default()),
            Err(DirectoryError::Forbidden(_))
        ));
    }

    #[test]
    fn create_doctor_account_links_profile() {
        let (_dir, mut conn) = test_db();
        let admin = admin(&conn);
        let req = NewUser {
            name: Some("Dr. Okafor".into()),
            email: Some("okafor@example.com".into()),
            password: Some("long enough".into()),
            role: Some("doctor".into()),
            specialization: Some("Neurology".into()),
            phone: None,
        };
        let user = create_user(&mut conn, &admin, req).unwrap();
        let doctor = db::find_doctor_by_user(&conn, &user.id).unwrap().unwrap();
        assert_eq!(doctor.specialization, "Neurology");

        let missing_spec = NewUser {
            name: Some("Dr. Who".into()),
            email: Some("who@example.com".into()),
            password: Some("long enough".into()),
            role: Some("doctor".into()),
            ..Default::default()
        };
        assert!(matches!(
            create_user(&mut conn, &admin, missing_spec),
            Err(DirectoryError::Validation(_))
        ));
    }

    #[test]
    fn delete_user_with_history_rejected_but_deactivation_succeeds() {
        let (_dir, mut conn) = test_db();
        let admin = admin(&conn);
        let user = make_user(&conn, "p@example.com", Role::Patient);
        let patient = make_patient(&conn, "p@example.com", Some(user.id));
        let doctor = make_doctor(&conn, "d@example.com", None);
        make_appointment(&conn, patient.id, doctor.id, jan10(9, 0), AppointmentStatus::Completed);
        let session = auth::register(
            &conn,
            auth::RegisterRequest {
                name: Some("Other".into()),
                email: Some("other@example.com".into()),
                password: Some("long enough".into()),
                role: None,
            },
            chrono::Duration::hours(1),
        )
        .unwrap();

        let err = delete_user(&mut conn, &admin, &user.id).unwrap_err();
        assert!(matches!(err, DirectoryError::HasAssociatedData("user")));

        let updated = set_user_status(&conn, &admin, &user.id, UserStatusUpdate { is_active: Some(false) }).unwrap();
        assert!(!updated.is_active);

        // A user without clinical history is removed with their sessions.
        delete_user(&mut conn, &admin, &session.user.id).unwrap();
        assert!(db::get_user(&conn, &session.user.id).unwrap().is_none());
        assert!(db::get_session(&conn, &auth::hash_token(&session.token)).unwrap().is_none());
    }

    #[test]
    fn delete_user_cascades_linked_profile() {
        let (_dir, mut conn) = test_db();
        let admin = admin(&conn);
        let user = make_user(&conn, "p@example.com", Role::Patient);
        let patient = make_patient(&conn, "p@example.com", Some(user.id));

        delete_user(&mut conn, &admin, &user.id).unwrap();
        assert!(db::get_patient(&conn, &patient.id).unwrap().is_none());
    }

    #[test]
    fn admin_cannot_remove_self() {
        let (_dir, mut conn) = test_db();
        let admin = admin(&conn);
        assert!(matches!(
            delete_user(&mut conn, &admin, &admin.user_id),
            Err(DirectoryError::InvalidOperation(_))
        ));
        assert!(matches!(
            set_user_status(&conn, &admin, &admin.user_id, UserStatusUpdate { is_active: Some(false) }),
            Err(DirectoryError::InvalidOperation(_))
        ));
    }

    #[test]
    fn list_users_by_role() {
        let (_dir, conn) = test_db();
        let admin = admin(&conn);
        make_user(&conn, "d@example.com", Role::Doctor);
        make_user(&conn, "p@example.com", Role::Patient);
        let query = UserQuery {
            role: Some("doctor".into()),
            ..Default::default()
        };
        let page = list_users(&conn, &admin, &query).unwrap();
        assert_eq!(page.pagination.total, 1);
        assert_eq!(page.items[0].role, Role::Doctor);
    }
}
