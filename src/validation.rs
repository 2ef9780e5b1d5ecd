//! Field-level request validation shared by every write operation.
//!
//! Validators accumulate errors instead of failing fast, so a 400 response
//! lists every offending field at once.

use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime, SubsecRound, Utc};
use regex::Regex;
use serde::Serialize;

static EMAIL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap());

/// One rejected input field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct Validator {
    errors: Vec<FieldError>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, field: &str, message: impl Into<String>) {
        self.errors.push(FieldError {
            field: field.to_string(),
            message: message.into(),
        });
    }

    /// Trimmed non-empty value, or records "`<label>` is required".
    pub fn required<'a>(&mut self, field: &str, label: &str, value: Option<&'a str>) -> Option<&'a str> {
        match value.map(str::trim).filter(|v| !v.is_empty()) {
            Some(v) => Some(v),
            None => {
                self.push(field, format!("{label} is required"));
                None
            }
        }
    }

    pub fn max_chars(&mut self, field: &str, label: &str, value: Option<&str>, max: usize) {
        if value.is_some_and(|v| v.chars().count() > max) {
            self.push(field, format!("{label} cannot exceed {max} characters"));
        }
    }

    pub fn email(&mut self, field: &str, value: Option<&str>) -> Option<String> {
        let value = self.required(field, "Email", value)?;
        if is_valid_email(value) {
            Some(normalize_email(value))
        } else {
            self.push(field, "Please enter a valid email");
            None
        }
    }

    /// Parse a string-backed enum, recording `message` on failure.
    pub fn parse<T: std::str::FromStr>(&mut self, field: &str, value: Option<&str>, message: &str) -> Option<T> {
        let raw = value?;
        match raw.parse() {
            Ok(v) => Some(v),
            Err(_) => {
                self.push(field, message);
                None
            }
        }
    }

    pub fn instant(&mut self, field: &str, label: &str, value: Option<&str>) -> Option<DateTime<Utc>> {
        let raw = value?;
        let parsed = parse_instant(raw);
        if parsed.is_none() {
            self.push(field, format!("{label} must be a valid ISO-8601 date"));
        }
        parsed
    }

    pub fn date(&mut self, field: &str, label: &str, value: Option<&str>) -> Option<NaiveDate> {
        let raw = value?;
        let parsed = parse_date(raw);
        if parsed.is_none() {
            self.push(field, format!("{label} must be a valid date"));
        }
        parsed
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn finish(self) -> Result<(), Vec<FieldError>> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self.errors)
        }
    }
}

pub fn is_valid_email(value: &str) -> bool {
    EMAIL_PATTERN.is_match(value.trim())
}

/// Emails are stored and compared lower-cased.
pub fn normalize_email(value: &str) -> String {
    value.trim().to_lowercase()
}

/// RFC 3339, or a naive `YYYY-MM-DDTHH:MM[:SS]` / `YYYY-MM-DD` read as UTC.
/// Truncated to the millisecond precision the store keeps.
pub fn parse_instant(raw: &str) -> Option<DateTime<Utc>> {
    parse_instant_exact(raw.trim()).map(|ts| ts.trunc_subsecs(3))
}

fn parse_instant_exact(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// `YYYY-MM-DD`, or the date part of a full timestamp.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .or_else(|| parse_instant(raw).map(|ts| ts.date_naive()))
}

/// True when `raw` names a whole day rather than an instant.
pub fn is_date_only(raw: &str) -> bool {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").is_ok()
}
