use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{BloodGroup, Gender};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Patient {
    pub id: Uuid,
    /// Back-reference to the owning `User`, absent for walk-in patients.
    pub user_id: Option<Uuid>,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub date_of_birth: NaiveDate,
    pub gender: Gender,
    pub address: String,
    pub blood_group: BloodGroup,
    pub emergency_contact: Option<String>,
    pub medical_history: Option<String>,
    /// False while the record still carries self-provisioning placeholders.
    pub profile_complete: bool,
    pub created_at: DateTime<Utc>,
}
