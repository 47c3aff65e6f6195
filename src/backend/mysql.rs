//! MySQL-protocol backend (MySQL, MariaDB, TiDB).
//!
//! `sqlx` is async; each connector owns a current-thread tokio runtime and
//! blocks on it, so callers see a synchronous session like the PostgreSQL one.
//!
//! The query timeout is enforced by the server through `max_execution_time`,
//! so a slow table is cancelled without breaking the session. A client-side
//! timeout a little longer than that remains as a backstop for a server that
//! stops answering; hitting it fails the session.

use std::sync::Arc;
use std::time::Duration;

use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlSslMode};
use sqlx::{ConnectOptions, Connection};
use tokio::runtime::Runtime;
use tracing::debug;

use super::{Timeouts, count_statement, rows_from_count};
use crate::config::{DbConfig, SslMode};
use crate::monitor::{Connector, DbError, Session};

/// Extra time the client waits beyond the server-side execution limit.
const BACKSTOP_GRACE: Duration = Duration::from_secs(2);

pub struct MySqlConnector {
    options: MySqlConnectOptions,
    runtime: Arc<Runtime>,
    timeouts: Timeouts,
}

impl MySqlConnector {
    pub fn new(config: &DbConfig, timeouts: Timeouts) -> Result<Self, DbError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| DbError::Connection(format!("failed to start I/O runtime: {}", e)))?;

        Ok(Self {
            options: connect_options(config),
            runtime: Arc::new(runtime),
            timeouts,
        })
    }
}

fn connect_options(config: &DbConfig) -> MySqlConnectOptions {
    let mut options = MySqlConnectOptions::new()
        .host(&config.host)
        .port(config.port)
        .username(&config.user)
        .ssl_mode(ssl_mode(config.ssl_mode));
    if !config.password.is_empty() {
        options = options.password(&config.password);
    }
    if !config.database.is_empty() {
        options = options.database(&config.database);
    }
    // One COUNT(*) per table per tick would otherwise be logged by sqlx at info.
    options.disable_statement_logging()
}

fn ssl_mode(mode: SslMode) -> MySqlSslMode {
    match mode {
        SslMode::Disabled => MySqlSslMode::Disabled,
        SslMode::Preferred => MySqlSslMode::Preferred,
        SslMode::Required => MySqlSslMode::Required,
        SslMode::VerifyIdentity => MySqlSslMode::VerifyIdentity,
    }
}

impl Connector for MySqlConnector {
    type Session = MySqlSession;

    fn connect(&self) -> Result<MySqlSession, DbError> {
        let options = &self.options;
        let limit = self.timeouts.connect;
        let result = self
            .runtime
            .block_on(async move { tokio::time::timeout(limit, options.connect()).await });

        let mut conn = match result {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => return Err(DbError::Connection(format_mysql_error(&e))),
            Err(_) => return Err(DbError::Connection(timed_out("connection", limit))),
        };
        debug!("MySQL session opened");

        let sql = execution_limit_statement(self.timeouts.query);
        let session_conn = &mut conn;
        let applied = self.runtime.block_on(async move {
            tokio::time::timeout(limit, sqlx::query(&sql).execute(session_conn)).await
        });
        match applied {
            Ok(Ok(_)) => {}
            // MariaDB has no max_execution_time; only the backstop applies there.
            Ok(Err(sqlx::Error::Database(db))) => {
                debug!(error = %db.message(), "server-side execution limit not supported");
            }
            Ok(Err(e)) => return Err(DbError::Connection(format_mysql_error(&e))),
            Err(_) => return Err(DbError::Connection(timed_out("session setup", limit))),
        }

        Ok(MySqlSession {
            conn,
            runtime: Arc::clone(&self.runtime),
            query_timeout: self.timeouts.query,
        })
    }
}

/// Statement limiting every later SELECT in the session to `limit`.
fn execution_limit_statement(limit: Duration) -> String {
    format!("SET SESSION max_execution_time = {}", limit.as_millis())
}

/// One open MySQL connection.
pub struct MySqlSession {
    conn: MySqlConnection,
    runtime: Arc<Runtime>,
    query_timeout: Duration,
}

impl Session for MySqlSession {
    fn count_rows(&mut self, table: &str) -> Result<u64, DbError> {
        let sql = count_statement(&quote_ident(table));
        let conn = &mut self.conn;
        let backstop = self.query_timeout + BACKSTOP_GRACE;
        let result = self.runtime.block_on(async move {
            tokio::time::timeout(
                backstop,
                sqlx::query_scalar::<_, i64>(&sql).fetch_one(conn),
            )
            .await
        });

        match result {
            Ok(Ok(count)) => rows_from_count(table, count),
            Ok(Err(e)) => Err(classify(e)),
            Err(_) => Err(DbError::Connection(timed_out("query", backstop))),
        }
    }

    fn close(self) -> Result<(), DbError> {
        let MySqlSession {
            conn,
            runtime,
            query_timeout,
        } = self;
        let result = runtime
            .block_on(async move { tokio::time::timeout(query_timeout, conn.close()).await });
        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(DbError::Connection(format_mysql_error(&e))),
            Err(_) => Err(DbError::Connection(timed_out("close", query_timeout))),
        }
    }
}

/// Statement rejected by the server (unknown table, execution limit hit) is a
/// table-level error; anything else means the session can no longer be trusted.
fn classify(e: sqlx::Error) -> DbError {
    match e {
        sqlx::Error::Database(db) => DbError::Query(db.message().to_string()),
        other => DbError::Connection(format_mysql_error(&other)),
    }
}

/// Quotes an identifier with backticks.
fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

fn timed_out(what: &str, limit: Duration) -> String {
    format!("{} timed out after {}s", what, limit.as_secs_f64())
}

/// Formats a MySQL error message for display.
pub(crate) fn format_mysql_error(e: &sqlx::Error) -> String {
    match e {
        sqlx::Error::Database(db) => match db.code() {
            Some(code) => format!("{} ({})", db.message(), code),
            None => db.message().to_string(),
        },
        sqlx::Error::Io(io) if io.kind() == std::io::ErrorKind::ConnectionRefused => {
            "connection refused".to_string()
        }
        other => other.to_string(),
    }
}
