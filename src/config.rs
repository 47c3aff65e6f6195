//! Connection configuration read from the process environment.
//!
//! Variables:
//! - `DB_HOST` (required)
//! - `DB_PORT` (default: 4000)
//! - `DB_USER`, `DB_PASSWORD`, `DB_NAME` (default: empty)
//! - `DB_KIND` - `mysql` (default) or `postgres`
//! - `DB_SSL_MODE` - `disabled`, `preferred` (default), `required`, `verify_identity`

use std::fmt;

pub const DEFAULT_PORT: u16 = 4000;

/// Wire protocol spoken by the monitored server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DbKind {
    /// MySQL protocol: MySQL, MariaDB, TiDB.
    #[default]
    MySql,
    Postgres,
}

impl DbKind {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "mysql" | "tidb" | "mariadb" => Some(DbKind::MySql),
            "postgres" | "postgresql" | "pg" => Some(DbKind::Postgres),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            DbKind::MySql => "MySQL",
            DbKind::Postgres => "PostgreSQL",
        }
    }
}

/// Transport security for the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SslMode {
    Disabled,
    /// Use TLS when the server offers it, without verifying the certificate.
    #[default]
    Preferred,
    /// Require TLS, accept self-signed certificates.
    Required,
    /// Require TLS with full certificate and hostname verification.
    VerifyIdentity,
}

impl SslMode {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "disabled" | "disable" | "off" => Some(SslMode::Disabled),
            "preferred" | "prefer" => Some(SslMode::Preferred),
            "required" | "require" => Some(SslMode::Required),
            "verify_identity" | "verify_full" => Some(SslMode::VerifyIdentity),
            _ => None,
        }
    }
}

/// Error produced while reading the configuration.
#[derive(Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// Required variable not set or empty.
    Missing(&'static str),
    /// Variable set to a value that cannot be used.
    Invalid {
        var: &'static str,
        value: String,
        reason: &'static str,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Missing(var) => write!(f, "{} is not set", var),
            ConfigError::Invalid { var, value, reason } => {
                write!(f, "invalid {} '{}': {}", var, value, reason)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Database connection parameters.
///
/// Built once at startup and passed by reference to the backend.
#[derive(Clone, PartialEq, Eq)]
pub struct DbConfig {
    pub kind: DbKind,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub ssl_mode: SslMode,
}

impl fmt::Debug for DbConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbConfig")
            .field("kind", &self.kind)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .field("ssl_mode", &self.ssl_mode)
            .finish()
    }
}

impl DbConfig {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the configuration through an arbitrary key lookup.
    ///
    /// Host and port are validated eagerly; user, password and database are
    /// passed through as-is and left for the server to judge.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = lookup("DB_HOST")
            .map(|h| h.trim().to_string())
            .filter(|h| !h.is_empty())
            .ok_or(ConfigError::Missing("DB_HOST"))?;

        let port = match lookup("DB_PORT").filter(|p| !p.trim().is_empty()) {
            Some(raw) => parse_port(&raw)?,
            None => DEFAULT_PORT,
        };

        let kind = match lookup("DB_KIND").filter(|k| !k.trim().is_empty()) {
            Some(raw) => DbKind::parse(&raw).ok_or(ConfigError::Invalid {
                var: "DB_KIND",
                value: raw,
                reason: "expected mysql or postgres",
            })?,
            None => DbKind::default(),
        };

        let ssl_mode = match lookup("DB_SSL_MODE").filter(|m| !m.trim().is_empty()) {
            Some(raw) => SslMode::parse(&raw).ok_or(ConfigError::Invalid {
                var: "DB_SSL_MODE",
                value: raw,
                reason: "expected disabled, preferred, required or verify_identity",
            })?,
            None => SslMode::default(),
        };

        Ok(Self {
            kind,
            host,
            port,
            user: lookup("DB_USER").unwrap_or_default(),
            password: lookup("DB_PASSWORD").unwrap_or_default(),
            database: lookup("DB_NAME").unwrap_or_default(),
            ssl_mode,
        })
    }

    /// `host:port` for log lines.
    pub fn target(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_port(raw: &str) -> Result<u16, ConfigError> {
    match raw.trim().parse::<u16>() {
        Ok(0) => Err(ConfigError::Invalid {
            var: "DB_PORT",
            value: raw.to_string(),
            reason: "port must be non-zero",
        }),
        Ok(port) => Ok(port),
        Err(_) => Err(ConfigError::Invalid {
            var: "DB_PORT",
            value: raw.to_string(),
            reason: "expected an integer between 1 and 65535",
        }),
    }
}
