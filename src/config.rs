use std::net::SocketAddr;
use std::path::PathBuf;

/// Application-level constants
pub const APP_NAME: &str = "hospital-api";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:5000";
const DEFAULT_TOKEN_TTL_HOURS: i64 = 24;
const DEFAULT_CONNECT_ATTEMPTS: u32 = 5;

/// Filter used when `RUST_LOG` is unset.
pub fn default_log_filter() -> &'static str {
    "hospital_api=info,tower_http=info"
}

/// Get the application data directory (platform data dir, falling back to
/// the working directory when the platform has none).
pub fn app_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
}

pub fn default_db_path() -> PathBuf {
    app_data_dir().join("hospital.db")
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} is not a valid {expected}: {value:?}")]
    Invalid {
        var: &'static str,
        expected: &'static str,
        value: String,
    },

    #[error("HOSPITAL_ADMIN_EMAIL and HOSPITAL_ADMIN_PASSWORD must be set together")]
    IncompleteAdmin,
}

/// Credentials for the admin account created on first start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminBootstrap {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub db_path: PathBuf,
    pub token_ttl: chrono::Duration,
    /// `None` allows any origin.
    pub cors_origin: Option<String>,
    pub admin: Option<AdminBootstrap>,
    pub store_connect_attempts: u32,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let bind_raw = get("HOSPITAL_BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let bind_addr = bind_raw.parse().map_err(|_| ConfigError::Invalid {
            var: "HOSPITAL_BIND_ADDR",
            expected: "socket address",
            value: bind_raw.clone(),
        })?;

        let token_ttl_hours = match get("HOSPITAL_TOKEN_TTL_HOURS") {
            None => DEFAULT_TOKEN_TTL_HOURS,
            Some(raw) => raw
                .parse::<i64>()
                .ok()
                .filter(|h| (1..=24 * 365).contains(h))
                .ok_or(ConfigError::Invalid {
                    var: "HOSPITAL_TOKEN_TTL_HOURS",
                    expected: "hour count between 1 and 8760",
                    value: raw,
                })?,
        };

        let store_connect_attempts = match get("HOSPITAL_STORE_CONNECT_ATTEMPTS") {
            None => DEFAULT_CONNECT_ATTEMPTS,
            Some(raw) => raw.parse::<u32>().ok().filter(|n| *n > 0).ok_or(ConfigError::Invalid {
                var: "HOSPITAL_STORE_CONNECT_ATTEMPTS",
                expected: "positive integer",
                value: raw,
            })?,
        };

        let admin = match (get("HOSPITAL_ADMIN_EMAIL"), get("HOSPITAL_ADMIN_PASSWORD")) {
            (Some(email), Some(password)) => Some(AdminBootstrap { email, password }),
            (None, None) => None,
            _ => return Err(ConfigError::IncompleteAdmin),
        };

        Ok(Self {
            bind_addr,
            db_path: get("HOSPITAL_DB_PATH").map(PathBuf::from).unwrap_or_else(default_db_path),
            token_ttl: chrono::Duration::hours(token_ttl_hours),
            cors_origin: get("HOSPITAL_CORS_ORIGIN"),
            admin,
            store_connect_attempts,
        })
    }

    /// Defaults with the database at `db_path`.
    pub fn with_db_path(db_path: PathBuf) -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 5000)),
            db_path,
            token_ttl: chrono::Duration::hours(DEFAULT_TOKEN_TTL_HOURS),
            cors_origin: None,
            admin: None,
            store_connect_attempts: DEFAULT_CONNECT_ATTEMPTS,
        }
    }
}
