//! Database backends implementing [`Connector`](crate::monitor::Connector).
//!
//! - [`MySqlConnector`] - MySQL protocol (MySQL, MariaDB, TiDB)
//! - [`PgConnector`] - PostgreSQL protocol

mod mysql;
mod pg;

pub use self::mysql::{MySqlConnector, MySqlSession};
pub use self::pg::{PgConnector, PgSession};

use std::time::Duration;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bounds on blocking database calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub connect: Duration,
    pub query: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: DEFAULT_CONNECT_TIMEOUT,
            query: DEFAULT_QUERY_TIMEOUT,
        }
    }
}

/// Builds the row-count statement for an already quoted table name.
fn count_statement(quoted_table: &str) -> String {
    format!("SELECT COUNT(*) FROM {}", quoted_table)
}

fn rows_from_count(table: &str, count: i64) -> Result<u64, crate::monitor::DbError> {
    u64::try_from(count).map_err(|_| {
        crate::monitor::DbError::Query(format!("negative row count {} for {}", count, table))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::DbError;

    #[test]
    fn count_statement_wraps_table() {
        assert_eq!(count_statement("`Users`"), "SELECT COUNT(*) FROM `Users`");
    }

    #[test]
    fn negative_count_is_a_query_error() {
        assert_eq!(rows_from_count("Users", 7), Ok(7));
        assert!(matches!(rows_from_count("Users", -1), Err(DbError::Query(_))));
    }
}
