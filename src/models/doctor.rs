use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One weekly availability entry. Displayed to patients, not enforced on booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleSlot {
    pub day: String,
    pub from: String,
    pub to: String,
    #[serde(default = "default_true")]
    pub is_available: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Doctor {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub specialization: String,
    pub license_number: Option<String>,
    pub experience_years: Option<u32>,
    pub consultation_fee: Option<f64>,
    pub schedule: Vec<ScheduleSlot>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}
