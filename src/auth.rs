//! Accounts and bearer sessions.
//!
//! Passwords are stored as `pbkdf2-sha256$<iterations>$<salt>$<hash>` with
//! base64 (no padding) salt and hash. Bearer tokens are random 32-byte
//! strings; only their SHA-256 digest is persisted, so a leaked database
//! does not leak live sessions.

use base64::engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD};
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use pbkdf2::pbkdf2_hmac;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::db::{self, DatabaseError, SessionRecord};
use crate::models::{Role, User};
use crate::validation::{self, FieldError, Validator};

pub const MIN_PASSWORD_CHARS: usize = 8;
pub const MAX_NAME_CHARS: usize = 100;

#[cfg(not(test))]
const PBKDF2_ITERATIONS: u32 = 210_000;
#[cfg(test)]
const PBKDF2_ITERATIONS: u32 = 1_000;
const SALT_LENGTH: usize = 16;
const HASH_LENGTH: usize = 32;
const HASH_SCHEME: &str = "pbkdf2-sha256";

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Authentication required")]
    MissingToken,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Token expired")]
    TokenExpired,

    #[error("Account is deactivated")]
    AccountDisabled,

    #[error("User already exists with this email")]
    EmailTaken,

    #[error("Validation failed")]
    Validation(Vec<FieldError>),

    #[error("{0}")]
    Forbidden(String),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl From<Vec<FieldError>> for AuthError {
    fn from(errors: Vec<FieldError>) -> Self {
        Self::Validation(errors)
    }
}

// ─── Passwords ────────────────────────────────────────────────────────────────

pub fn hash_password(password: &str) -> String {
    use rand::RngCore;
    let mut salt = [0u8; SALT_LENGTH];
    rand::thread_rng().fill_bytes(&mut salt);
    let hash = derive(password, &salt, PBKDF2_ITERATIONS);
    format!(
        "{HASH_SCHEME}${PBKDF2_ITERATIONS}${}${}",
        STANDARD_NO_PAD.encode(salt),
        STANDARD_NO_PAD.encode(hash)
    )
}

/// Constant-time check of `password` against a stored hash string.
/// Malformed stored hashes never verify.
pub fn verify_password(password: &str, stored: &str) -> bool {
    let mut parts = stored.split('$');
    let (Some(HASH_SCHEME), Some(iterations), Some(salt), Some(hash), None) =
        (parts.next(), parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return false;
    };
    let Ok(iterations) = iterations.parse::<u32>() else {
        return false;
    };
    let (Ok(salt), Ok(expected)) = (STANDARD_NO_PAD.decode(salt), STANDARD_NO_PAD.decode(hash)) else {
        return false;
    };
    if iterations == 0 || expected.len() != HASH_LENGTH {
        return false;
    }
    let actual = derive(password, &salt, iterations);
    actual.as_slice().ct_eq(expected.as_slice()).into()
}

fn derive(password: &str, salt: &[u8], iterations: u32) -> [u8; HASH_LENGTH] {
    let mut out = [0u8; HASH_LENGTH];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut out);
    out
}

// ─── Tokens ───────────────────────────────────────────────────────────────────

/// Generate a random bearer token (URL-safe base64, 32 bytes of entropy).
pub fn generate_token() -> String {
    let bytes: [u8; 32] = rand::random();
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Storage key of a bearer token: its SHA-256 digest, base64-encoded.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// Token plus the user it authenticates, returned by register and login.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthSession {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub user: User,
}

fn issue_session(conn: &Connection, user: User, ttl: Duration) -> Result<AuthSession, AuthError> {
    let token = generate_token();
    let now = Utc::now();
    let record = SessionRecord {
        user_id: user.id,
        created_at: now,
        expires_at: now + ttl,
    };
    db::insert_session(conn, &hash_token(&token), &record)?;
    Ok(AuthSession {
        token,
        expires_at: record.expires_at,
        user,
    })
}

/// The active user behind a bearer token.
pub fn resolve_session(conn: &Connection, token: &str, now: DateTime<Utc>) -> Result<User, AuthError> {
    let key = hash_token(token);
    let session = db::get_session(conn, &key)?.ok_or(AuthError::InvalidToken)?;
    if session.expires_at <= now {
        db::delete_session(conn, &key)?;
        return Err(AuthError::TokenExpired);
    }
    let user = db::get_user(conn, &session.user_id)?.ok_or(AuthError::InvalidToken)?;
    if !user.is_active {
        return Err(AuthError::AccountDisabled);
    }
    Ok(user)
}

pub fn logout(conn: &Connection, token: &str) -> Result<(), AuthError> {
    db::delete_session(conn, &hash_token(token))?;
    Ok(())
}

// ─── Accounts ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub role: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub email: Option<String>,
    pub password: Option<String>,
}

/// Passwords are taken verbatim; only a blank one is rejected.
fn raw_password<'a>(v: &mut Validator, password: Option<&'a str>) -> Option<&'a str> {
    let password = password.filter(|p| !p.trim().is_empty());
    if password.is_none() {
        v.push("password", "Password is required");
    }
    password
}

/// Validated account fields shared by self-registration and admin creation.
pub struct NewAccount {
    pub name: String,
    pub email: String,
    pub password: String,
    pub role: Role,
}

pub fn validate_account(
    name: Option<&str>,
    email: Option<&str>,
    password: Option<&str>,
    role: Option<&str>,
) -> Result<NewAccount, Vec<FieldError>> {
    let mut v = Validator::new();
    let name = v.required("name", "Name", name);
    v.max_chars("name", "Name", name, MAX_NAME_CHARS);
    let email = v.email("email", email);
    let password = raw_password(&mut v, password);
    if password.is_some_and(|p| p.chars().count() < MIN_PASSWORD_CHARS) {
        v.push("password", format!("Password must be at least {MIN_PASSWORD_CHARS} characters"));
    }
    let role = v
        .parse::<Role>("role", role.map(str::trim).filter(|r| !r.is_empty()), "Invalid role")
        .unwrap_or(Role::Patient);
    v.finish()?;
    match (name, email, password) {
        (Some(name), Some(email), Some(password)) => Ok(NewAccount {
            name: name.to_string(),
            email,
            password: password.to_string(),
            role,
        }),
        _ => Err(Vec::new()),
    }
}

/// Insert a user row for a validated account.
pub fn create_account(conn: &Connection, account: &NewAccount) -> Result<User, AuthError> {
    if db::email_exists(conn, &account.email)? {
        return Err(AuthError::EmailTaken);
    }
    let user = User {
        id: Uuid::new_v4(),
        name: account.name.clone(),
        email: account.email.clone(),
        role: account.role,
        is_active: true,
        created_at: Utc::now(),
    };
    match db::insert_user(conn, &user, &hash_password(&account.password)) {
        Ok(()) => Ok(user),
        Err(DatabaseError::DuplicateKey(_)) => Err(AuthError::EmailTaken),
        Err(e) => Err(e.into()),
    }
}

/// Self-registration. Admin accounts cannot be self-registered.
pub fn register(conn: &Connection, req: RegisterRequest, ttl: Duration) -> Result<AuthSession, AuthError> {
    let account = validate_account(
        req.name.as_deref(),
        req.email.as_deref(),
        req.password.as_deref(),
        req.role.as_deref(),
    )?;
    match account.role {
        Role::Admin => {
            tracing::warn!(email = %account.email, "Refused admin self-registration");
            return Err(AuthError::Forbidden("Cannot register as admin".into()));
        }
        Role::Doctor | Role::Patient => {}
    }
    let user = create_account(conn, &account)?;
    tracing::info!(user_id = %user.id, role = %user.role, "User registered");
    issue_session(conn, user, ttl)
}

pub fn login(conn: &Connection, req: LoginRequest, ttl: Duration) -> Result<AuthSession, AuthError> {
    let mut v = Validator::new();
    let email = v.required("email", "Email", req.email.as_deref()).map(validation::normalize_email);
    let password = raw_password(&mut v, req.password.as_deref());
    v.finish()?;
    let (Some(email), Some(password)) = (email, password) else {
        return Err(AuthError::InvalidCredentials);
    };

    let Some((user, stored)) = db::get_user_credentials(conn, &email)? else {
        return Err(AuthError::InvalidCredentials);
    };
    if !verify_password(password, &stored) {
        tracing::info!(user_id = %user.id, "Login rejected: bad password");
        return Err(AuthError::InvalidCredentials);
    }
    if !user.is_active {
        return Err(AuthError::AccountDisabled);
    }
    tracing::info!(user_id = %user.id, role = %user.role, "User logged in");
    issue_session(conn, user, ttl)
}

/// Create the configured admin account on first start. Existing accounts
/// with that email are left untouched.
pub fn bootstrap_admin(conn: &Connection, email: &str, password: &str) -> Result<Option<User>, AuthError> {
    let account = validate_account(Some("Administrator"), Some(email), Some(password), Some("admin"))?;
    if db::email_exists(conn, &account.email)? {
        tracing::debug!(email = %account.email, "Bootstrap admin already present");
        return Ok(None);
    }
    let user = create_account(conn, &account)?;
    tracing::info!(user_id = %user.id, "Bootstrap admin account created");
    Ok(Some(user))
}
