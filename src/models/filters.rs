use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::enums::{AppointmentStatus, Role};

pub const DEFAULT_PAGE_LIMIT: u32 = 10;
pub const MAX_PAGE_LIMIT: u32 = 100;

#[derive(Debug, Default, Clone)]
pub struct AppointmentFilter {
    pub status: Option<AppointmentStatus>,
    pub start: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `date_time`.
    pub end: Option<DateTime<Utc>>,
    pub doctor_id: Option<Uuid>,
    pub patient_id: Option<Uuid>,
}

#[derive(Debug, Default, Clone)]
pub struct MedicalRecordFilter {
    pub patient_id: Option<Uuid>,
}

#[derive(Debug, Default, Clone)]
pub struct PatientFilter {
    /// Case-insensitive substring over name, email and phone.
    pub search: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct DoctorFilter {
    pub specialization: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct UserFilter {
    pub role: Option<Role>,
}

/// 1-based page request, clamped to sane bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub limit: u32,
}

impl PageRequest {
    pub fn new(page: Option<u32>, limit: Option<u32>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            limit: limit
                .unwrap_or(DEFAULT_PAGE_LIMIT)
                .clamp(1, MAX_PAGE_LIMIT),
        }
    }

    pub fn offset(&self) -> i64 {
        i64::from(self.page - 1) * i64::from(self.limit)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(None, None)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Pagination {
    pub current: u32,
    pub pages: u32,
    pub total: u64,
}

impl Pagination {
    pub fn new(page: &PageRequest, total: u64) -> Self {
        let pages = total.div_ceil(u64::from(page.limit));
        Self {
            current: page.page,
            pages: u32::try_from(pages).unwrap_or(u32::MAX),
            total,
        }
    }

    pub fn empty(page: &PageRequest) -> Self {
        Self::new(page, 0)
    }
}

/// A page of rows plus its pagination metadata.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub pagination: Pagination,
}

impl<T> Page<T> {
    pub fn empty(page: &PageRequest) -> Self {
        Self {
            items: Vec::new(),
            pagination: Pagination::empty(page),
        }
    }
}
