//! PostgreSQL backend.

use std::time::Duration;

use postgres::config::SslMode as PgSslMode;
use postgres::error::SqlState;
use postgres::{Client, Config};
use postgres_native_tls::MakeTlsConnector;
use tracing::debug;

use super::{Timeouts, count_statement, rows_from_count};
use crate::config::{DbConfig, SslMode};
use crate::monitor::{Connector, DbError, Session};

/// PostgreSQL connector.
///
/// Connect timeout is applied by the client; the query timeout is sent to
/// the server as `statement_timeout` for every session.
pub struct PgConnector {
    config: Config,
    tls: MakeTlsConnector,
}

impl PgConnector {
    pub fn new(db: &DbConfig, timeouts: Timeouts) -> Result<Self, DbError> {
        let mut config = Config::new();
        config
            .host(&db.host)
            .port(db.port)
            .connect_timeout(timeouts.connect)
            .options(&statement_timeout_option(timeouts.query))
            .ssl_mode(pg_ssl_mode(db.ssl_mode));
        if !db.user.is_empty() {
            config.user(&db.user);
        }
        if !db.password.is_empty() {
            config.password(&db.password);
        }
        if !db.database.is_empty() {
            config.dbname(&db.database);
        }

        Ok(Self {
            config,
            tls: build_tls(db.ssl_mode)?,
        })
    }
}

fn statement_timeout_option(limit: Duration) -> String {
    format!("-c statement_timeout={}", limit.as_millis())
}

fn pg_ssl_mode(mode: SslMode) -> PgSslMode {
    match mode {
        SslMode::Disabled => PgSslMode::Disable,
        SslMode::Preferred => PgSslMode::Prefer,
        SslMode::Required | SslMode::VerifyIdentity => PgSslMode::Require,
    }
}

fn build_tls(mode: SslMode) -> Result<MakeTlsConnector, DbError> {
    let mut builder = native_tls::TlsConnector::builder();
    if mode != SslMode::VerifyIdentity {
        builder
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true);
    }
    let connector = builder
        .build()
        .map_err(|e| DbError::Connection(format!("TLS setup failed: {}", e)))?;
    Ok(MakeTlsConnector::new(connector))
}

impl Connector for PgConnector {
    type Session = PgSession;

    fn connect(&self) -> Result<PgSession, DbError> {
        match self.config.connect(self.tls.clone()) {
            Ok(client) => {
                debug!("PostgreSQL session opened");
                Ok(PgSession { client })
            }
            Err(e) => Err(DbError::Connection(format_postgres_error(&e))),
        }
    }
}

/// One open PostgreSQL connection.
pub struct PgSession {
    client: Client,
}

impl Session for PgSession {
    fn count_rows(&mut self, table: &str) -> Result<u64, DbError> {
        let sql = count_statement(&quote_ident(table));
        let row = self.client.query_one(sql.as_str(), &[]).map_err(classify)?;
        let count: i64 = row
            .try_get(0)
            .map_err(|e| DbError::Query(format_postgres_error(&e)))?;
        rows_from_count(table, count)
    }

    fn close(self) -> Result<(), DbError> {
        self.client
            .close()
            .map_err(|e| DbError::Connection(format_postgres_error(&e)))
    }
}

fn classify(e: postgres::Error) -> DbError {
    let code = e.as_db_error().map(|db| db.code());
    if rejected_statement(e.is_closed(), code) {
        DbError::Query(format_postgres_error(&e))
    } else {
        DbError::Connection(format_postgres_error(&e))
    }
}

/// True when the server refused one statement and the session is still
/// usable: unknown table, permission denied, or `statement_timeout`
/// cancellation. Connection exceptions (class 08), shutdown and crash
/// notices (57P) and errors without a server code end the session.
fn rejected_statement(closed: bool, code: Option<&SqlState>) -> bool {
    match code {
        _ if closed => false,
        None => false,
        Some(code) => {
            let code = code.code();
            !(code.starts_with("08") || code.starts_with("57P"))
        }
    }
}

/// Quotes an identifier with double quotes, preserving case.
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Formats PostgreSQL error message for display.
pub(crate) fn format_postgres_error(e: &postgres::Error) -> String {
    match e.as_db_error() {
        Some(db_error) => format!("{}: {}", db_error.severity(), db_error.message()),
        None => condense_client_error(&e.to_string()),
    }
}

/// Shortens client-side connection failures to their cause.
fn condense_client_error(msg: &str) -> String {
    if msg.contains("Connection refused") {
        "connection refused".to_string()
    } else if msg.contains("timeout waiting for server") {
        "connection timed out".to_string()
    } else {
        msg.to_string()
    }
}
