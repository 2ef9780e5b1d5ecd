//! API error types with structured JSON responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::appointment::AppointmentError;
use crate::auth::AuthError;
use crate::authorization::AccessDenied;
use crate::core_state::CoreError;
use crate::directory::DirectoryError;
use crate::medical_record::RecordError;
use crate::validation::FieldError;

/// Structured error response body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub message: String,
    pub error: ErrorDetail,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<FieldError>>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub has_associated_data: bool,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: &'static str,
    pub message: String,
}

/// API-level errors with HTTP status mapping.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Authentication required")]
    Unauthorized,
    #[error("Token expired")]
    TokenExpired,
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("Account is deactivated")]
    AccountDisabled,
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Invalid request: {0}")]
    BadRequest(String),
    #[error("Validation failed")]
    Validation(Vec<FieldError>),
    #[error("Appointment conflict")]
    Conflict,
    #[error("{0}")]
    HasAssociatedData(String),
    #[error("Store unavailable")]
    StoreUnavailable,
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "AUTH_REQUIRED",
                "Authentication required".to_string(),
            ),
            ApiError::TokenExpired => (
                StatusCode::UNAUTHORIZED,
                "TOKEN_EXPIRED",
                "Token expired, please log in again".to_string(),
            ),
            ApiError::InvalidCredentials => (
                StatusCode::UNAUTHORIZED,
                "INVALID_CREDENTIALS",
                "Invalid credentials".to_string(),
            ),
            ApiError::AccountDisabled => (
                StatusCode::UNAUTHORIZED,
                "ACCOUNT_DISABLED",
                "Account is deactivated".to_string(),
            ),
            ApiError::Forbidden(detail) => (StatusCode::FORBIDDEN, "FORBIDDEN", detail.clone()),
            ApiError::NotFound(detail) => (StatusCode::NOT_FOUND, "NOT_FOUND", detail.clone()),
            ApiError::BadRequest(detail) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", detail.clone()),
            ApiError::Validation(errors) => (
                StatusCode::BAD_REQUEST,
                "VALIDATION_FAILED",
                errors
                    .first()
                    .map(|e| e.message.clone())
                    .unwrap_or_else(|| "Validation failed".to_string()),
            ),
            ApiError::Conflict => (
                StatusCode::BAD_REQUEST,
                "APPOINTMENT_CONFLICT",
                crate::appointment::CONFLICT_MESSAGE.to_string(),
            ),
            ApiError::HasAssociatedData(detail) => {
                (StatusCode::BAD_REQUEST, "HAS_ASSOCIATED_DATA", detail.clone())
            }
            ApiError::StoreUnavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                "STORE_UNAVAILABLE",
                "Service temporarily unavailable".to_string(),
            ),
            ApiError::Internal(detail) => {
                tracing::error!(detail, "API internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let has_associated_data = matches!(self, ApiError::HasAssociatedData(_));
        let errors = match self {
            ApiError::Validation(errors) => Some(errors),
            _ => None,
        };
        let body = ErrorBody {
            message: message.clone(),
            error: ErrorDetail { code, message },
            errors,
            has_associated_data,
        };
        (status, Json(body)).into_response()
    }
}

// ─── Conversions from domain errors ───────────────────────────

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::StoreUnavailable(state) => {
                tracing::warn!(state, "Request refused, store not ready");
                ApiError::StoreUnavailable
            }
            CoreError::LockPoisoned => ApiError::Internal("lock poisoned".into()),
            CoreError::Database(e) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<rusqlite::Error> for ApiError {
    fn from(err: rusqlite::Error) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<crate::db::DatabaseError> for ApiError {
    fn from(err: crate::db::DatabaseError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<AccessDenied> for ApiError {
    fn from(err: AccessDenied) -> Self {
        ApiError::Forbidden(err.0)
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidCredentials => ApiError::InvalidCredentials,
            AuthError::MissingToken | AuthError::InvalidToken => ApiError::Unauthorized,
            AuthError::TokenExpired => ApiError::TokenExpired,
            AuthError::AccountDisabled => ApiError::AccountDisabled,
            AuthError::EmailTaken => ApiError::BadRequest(err.to_string()),
            AuthError::Validation(errors) => ApiError::Validation(errors),
            AuthError::Forbidden(message) => ApiError::Forbidden(message),
            AuthError::Database(e) => e.into(),
        }
    }
}

impl From<AppointmentError> for ApiError {
    fn from(err: AppointmentError) -> Self {
        match err {
            AppointmentError::Conflict { conflicting_id } => {
                tracing::info!(%conflicting_id, "Booking rejected, slot taken");
                ApiError::Conflict
            }
            AppointmentError::Validation(errors) => ApiError::Validation(errors),
            AppointmentError::DoctorNotFound | AppointmentError::PatientNotFound => {
                ApiError::BadRequest(err.to_string())
            }
            AppointmentError::NotFound => ApiError::NotFound(err.to_string()),
            AppointmentError::Forbidden(message) => ApiError::Forbidden(message),
            AppointmentError::Database(e) => e.into(),
        }
    }
}

impl From<RecordError> for ApiError {
    fn from(err: RecordError) -> Self {
        match err {
            RecordError::Validation(errors) => ApiError::Validation(errors),
            RecordError::PatientNotFound
            | RecordError::DoctorNotFound
            | RecordError::AppointmentNotFound => ApiError::BadRequest(err.to_string()),
            RecordError::NotFound => ApiError::NotFound(err.to_string()),
            RecordError::Forbidden(message) => ApiError::Forbidden(message),
            RecordError::Database(e) => e.into(),
        }
    }
}

impl From<DirectoryError> for ApiError {
    fn from(err: DirectoryError) -> Self {
        match err {
            DirectoryError::Validation(errors) => ApiError::Validation(errors),
            DirectoryError::Duplicate(message) | DirectoryError::InvalidOperation(message) => {
                ApiError::BadRequest(message)
            }
            DirectoryError::HasAssociatedData(_) => ApiError::HasAssociatedData(err.to_string()),
            DirectoryError::NotFound(_) => ApiError::NotFound(err.to_string()),
            DirectoryError::Forbidden(message) => ApiError::Forbidden(message),
            DirectoryError::Database(e) => e.into(),
        }
    }
}
