//! Table row-count poller.
//!
//! One call to [`poll`] is one cycle: open a session, count rows in each
//! monitored table, close the session. Nothing is kept between cycles.
//!
//! ```
//! use dbwatch::monitor::mock::MockConnector;
//! use dbwatch::monitor::{poll, TableCount};
//!
//! let connector = MockConnector::new().with_table("Users", 10);
//! let snapshot = poll(&connector, &["Users".to_string(), "Posts".to_string()]);
//! assert_eq!(snapshot.count_of("Users"), Some(TableCount::Count(10)));
//! assert_eq!(snapshot.count_of("Posts"), Some(TableCount::Unavailable));
//! assert!(connector.all_sessions_closed());
//! ```

pub mod mock;

use std::fmt;

use tracing::{debug, warn};

/// Tables watched when no override is given on the command line.
pub const MONITORED_TABLES: [&str; 7] = [
    "Users",
    "Posts",
    "Comments",
    "Likes",
    "Friendships",
    "Notifications",
    "Bookmarks",
];

/// Returns the default table list as owned names.
pub fn default_tables() -> Vec<String> {
    MONITORED_TABLES.iter().map(|t| t.to_string()).collect()
}

/// Checks that a table name is a plain SQL identifier.
pub fn validate_table_name(name: &str) -> Result<(), String> {
    let mut chars = name.chars();
    match chars.next() {
        None => return Err("table name is empty".to_string()),
        Some(c) if !(c.is_ascii_alphabetic() || c == '_') => {
            return Err(format!("table name '{}' must start with a letter or '_'", name));
        }
        Some(_) => {}
    }
    if chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(())
    } else {
        Err(format!(
            "table name '{}' may only contain letters, digits and '_'",
            name
        ))
    }
}

/// Error type for database access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbError {
    /// Session could not be opened, or died while in use.
    Connection(String),
    /// The server rejected a single statement (e.g. unknown table).
    Query(String),
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DbError::Connection(msg) => write!(f, "{}", msg),
            DbError::Query(msg) => write!(f, "query error: {}", msg),
        }
    }
}

impl std::error::Error for DbError {}

/// An open database session.
pub trait Session {
    /// Runs `SELECT COUNT(*)` against `table`.
    fn count_rows(&mut self, table: &str) -> Result<u64, DbError>;

    /// Closes the session and releases the underlying connection.
    fn close(self) -> Result<(), DbError>;
}

/// Opens sessions against one configured database.
pub trait Connector {
    type Session: Session;

    fn connect(&self) -> Result<Self::Session, DbError>;
}

/// Row count of a single table, or a marker when it could not be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableCount {
    Count(u64),
    Unavailable,
}

impl fmt::Display for TableCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableCount::Count(n) => write!(f, "{}", n),
            TableCount::Unavailable => f.write_str("N/A"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableStat {
    pub table: String,
    pub count: TableCount,
}

/// Result of one poll cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Snapshot {
    /// Session opened; one entry per requested table, in request order.
    Connected { tables: Vec<TableStat> },
    /// Session could not be opened or was lost mid-cycle.
    ConnectionFailed { error: String },
}

impl Snapshot {
    pub fn is_healthy(&self) -> bool {
        matches!(self, Snapshot::Connected { .. })
    }

    /// Looks up the result for one table. `None` for a failed snapshot or
    /// a table that was not requested.
    pub fn count_of(&self, table: &str) -> Option<TableCount> {
        match self {
            Snapshot::Connected { tables } => {
                tables.iter().find(|s| s.table == table).map(|s| s.count)
            }
            Snapshot::ConnectionFailed { .. } => None,
        }
    }
}

/// Holds a session and closes it when dropped, so an unwinding poll
/// still releases the connection.
struct SessionGuard<S: Session> {
    session: Option<S>,
}

impl<S: Session> SessionGuard<S> {
    fn new(session: S) -> Self {
        Self {
            session: Some(session),
        }
    }

    fn count_rows(&mut self, table: &str) -> Result<u64, DbError> {
        match self.session.as_mut() {
            Some(session) => session.count_rows(table),
            None => Err(DbError::Connection("session already closed".to_string())),
        }
    }

    fn close(mut self) {
        if let Some(session) = self.session.take() {
            if let Err(e) = session.close() {
                warn!(error = %e, "failed to close database session");
            }
        }
    }
}

impl<S: Session> Drop for SessionGuard<S> {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            if let Err(e) = session.close() {
                warn!(error = %e, "failed to close database session");
            }
        }
    }
}

/// Runs one poll cycle against `connector` for `tables`.
///
/// A table whose query is rejected is reported as [`TableCount::Unavailable`]
/// without affecting the others. Losing the session mid-cycle turns the
/// whole snapshot into [`Snapshot::ConnectionFailed`]. The session is closed
/// before returning on every path.
pub fn poll<C: Connector>(connector: &C, tables: &[String]) -> Snapshot {
    let session = match connector.connect() {
        Ok(session) => session,
        Err(e) => {
            debug!(error = %e, "connection failed");
            return Snapshot::ConnectionFailed {
                error: e.to_string(),
            };
        }
    };
    let mut session = SessionGuard::new(session);

    let mut stats = Vec::with_capacity(tables.len());
    for table in tables {
        let count = match session.count_rows(table) {
            Ok(n) => {
                debug!(table = %table, rows = n, "counted rows");
                TableCount::Count(n)
            }
            Err(DbError::Query(msg)) => {
                warn!(table = %table, error = %msg, "table unavailable");
                TableCount::Unavailable
            }
            Err(e @ DbError::Connection(_)) => {
                warn!(table = %table, error = %e, "session lost during poll");
                session.close();
                return Snapshot::ConnectionFailed {
                    error: e.to_string(),
                };
            }
        };
        stats.push(TableStat {
            table: table.clone(),
            count,
        });
    }

    session.close();
    Snapshot::Connected { tables: stats }
}
