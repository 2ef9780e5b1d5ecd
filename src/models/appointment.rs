use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{AppointmentStatus, AppointmentType, PaymentStatus};

pub const MIN_DURATION_MINUTES: u32 = 15;
pub const MAX_DURATION_MINUTES: u32 = 120;
pub const DEFAULT_DURATION_MINUTES: u32 = 30;
pub const MAX_REASON_CHARS: usize = 500;
pub const MAX_NOTES_CHARS: usize = 1000;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Appointment {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub date_time: DateTime<Utc>,
    #[serde(rename = "duration")]
    pub duration_minutes: u32,
    pub status: AppointmentStatus,
    #[serde(rename = "type")]
    pub appointment_type: AppointmentType,
    pub reason: String,
    pub notes: Option<String>,
    pub cancelled_by: Option<Uuid>,
    pub cancellation_reason: Option<String>,
    pub payment_status: PaymentStatus,
    pub amount: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    pub fn slot(&self) -> TimeSlot {
        TimeSlot::new(self.date_time, self.duration_minutes)
    }

    pub fn end_time(&self) -> DateTime<Utc> {
        self.slot().end
    }
}

/// Half-open interval `[start, end)` occupied by an appointment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSlot {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeSlot {
    pub fn new(start: DateTime<Utc>, duration_minutes: u32) -> Self {
        Self {
            start,
            end: start + Duration::minutes(i64::from(duration_minutes)),
        }
    }

    /// Touching endpoints do not overlap.
    pub fn overlaps(&self, other: &TimeSlot) -> bool {
        self.start < other.end && self.end > other.start
    }
}

/// Appointment joined with the display names of both parties.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentView {
    #[serde(flatten)]
    pub appointment: Appointment,
    pub patient_name: String,
    pub doctor_name: String,
    pub doctor_specialization: String,
}
