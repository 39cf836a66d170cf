use crate::error::ConfigError;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Longest accepted session lifetime, one year.
pub const MAX_SESSION_HOURS: u64 = 366 * 24;

/// SMTP relay settings for password reset mail.
#[derive(Clone, Debug, PartialEq)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
}

/// Application configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct AppConfig {
    pub bind_addr: String,
    /// Root for the database snapshot and stored uploads.
    pub data_dir: PathBuf,
    pub max_upload_bytes: u64,
    /// Per-sheet row ceiling applied by the workbook reader.
    pub max_sheet_rows: usize,
    pub session_ttl: Duration,
    pub reset_code_ttl: Duration,
    /// Usernames granted the admin role.
    pub admin_users: Vec<String>,
    /// Allowed CORS origins; empty allows any origin.
    pub cors_origins: Vec<String>,
    pub smtp: Option<SmtpConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:3000".to_string(),
            data_dir: PathBuf::from("data"),
            max_upload_bytes: 10 * 1024 * 1024,
            max_sheet_rows: 100_000,
            session_ttl: Duration::from_secs(24 * 60 * 60),
            reset_code_ttl: Duration::from_secs(60 * 60),
            admin_users: Vec::new(),
            cors_origins: Vec::new(),
            smtp: None,
        }
    }
}

impl AppConfig {
    /// Reads configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads configuration through `lookup`, falling back to defaults for
    /// unset keys.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = AppConfig::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let session_hours: u64 = parse_or(&get, "SHEETCHARTS_SESSION_HOURS", 24)?;
        let session_ttl = Some(session_hours)
            .filter(|h| *h <= MAX_SESSION_HOURS)
            .and_then(|h| h.checked_mul(60 * 60))
            .map(Duration::from_secs)
            .ok_or_else(|| ConfigError::InvalidValue {
                key: "SHEETCHARTS_SESSION_HOURS".to_string(),
                value: session_hours.to_string(),
            })?;

        let smtp = match get("SMTP_HOST") {
            Some(host) => Some(SmtpConfig {
                port: parse_or(&get, "SMTP_PORT", 465)?,
                username: get("SMTP_USERNAME").unwrap_or_default(),
                password: get("SMTP_PASSWORD").unwrap_or_default(),
                from: get("SMTP_FROM").unwrap_or_else(|| format!("sheetcharts@{}", host)),
                host,
            }),
            None => None,
        };

        Ok(AppConfig {
            bind_addr: get("SHEETCHARTS_BIND").unwrap_or(defaults.bind_addr),
            data_dir: get("SHEETCHARTS_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            max_upload_bytes: parse_or(&get, "SHEETCHARTS_MAX_UPLOAD_BYTES", defaults.max_upload_bytes)?,
            max_sheet_rows: parse_or(&get, "SHEETCHARTS_MAX_SHEET_ROWS", defaults.max_sheet_rows)?,
            session_ttl,
            reset_code_ttl: defaults.reset_code_ttl,
            admin_users: list(get("SHEETCHARTS_ADMINS")),
            cors_origins: list(get("SHEETCHARTS_CORS_ORIGINS")),
            smtp,
        })
    }

    pub fn is_admin(&self, username: &str) -> bool {
        self.admin_users.iter().any(|a| a == username)
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(value) => value.trim().parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value,
        }),
        None => Ok(default),
    }
}

fn list(value: Option<String>) -> Vec<String> {
    value
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}
