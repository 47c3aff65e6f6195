//! Scripted in-memory database for testing the poller without a server.
//!
//! `MockConnector` answers row counts from a table map and records every
//! session it opens, every query, and every close, so tests can check that
//! no session is left open.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use super::{Connector, DbError, Session};

#[derive(Debug, Default)]
struct MockState {
    tables: HashMap<String, u64>,
    refuse: Option<String>,
    drop_session_at: Option<String>,
    panic_at: Option<String>,
    fail_close: bool,
    connect_attempts: usize,
    connects: usize,
    closes: usize,
    queries: Vec<String>,
}

/// In-memory connector for tests.
///
/// Clones share state, so a clone handed to a `Monitor` can still be
/// inspected afterwards.
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    state: Rc<RefCell<MockState>>,
}

impl MockConnector {
    /// Creates a reachable database with no tables.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a table holding `rows` rows.
    pub fn with_table(self, name: &str, rows: u64) -> Self {
        self.state.borrow_mut().tables.insert(name.to_string(), rows);
        self
    }

    /// Makes every connection attempt fail with `error`.
    pub fn refuse(self, error: &str) -> Self {
        self.state.borrow_mut().refuse = Some(error.to_string());
        self
    }

    /// Loses the session when `table` is queried.
    pub fn drop_session_at(self, table: &str) -> Self {
        self.state.borrow_mut().drop_session_at = Some(table.to_string());
        self
    }

    /// Panics inside the query for `table`.
    pub fn panic_at(self, table: &str) -> Self {
        self.state.borrow_mut().panic_at = Some(table.to_string());
        self
    }

    /// Makes `close` report an error (the session is still counted as closed).
    pub fn fail_close(self) -> Self {
        self.state.borrow_mut().fail_close = true;
        self
    }

    /// Changes a table's row count, or creates the table.
    pub fn set_rows(&self, name: &str, rows: u64) {
        self.state.borrow_mut().tables.insert(name.to_string(), rows);
    }

    /// Number of connection attempts, successful or not.
    pub fn connect_attempts(&self) -> usize {
        self.state.borrow().connect_attempts
    }

    /// Number of sessions opened.
    pub fn connects(&self) -> usize {
        self.state.borrow().connects
    }

    /// Number of sessions closed.
    pub fn closes(&self) -> usize {
        self.state.borrow().closes
    }

    /// Tables queried so far, in order, across all sessions.
    pub fn queries(&self) -> Vec<String> {
        self.state.borrow().queries.clone()
    }

    /// True when every opened session has been closed.
    pub fn all_sessions_closed(&self) -> bool {
        let state = self.state.borrow();
        state.connects == state.closes
    }
}

impl Connector for MockConnector {
    type Session = MockSession;

    fn connect(&self) -> Result<MockSession, DbError> {
        let mut state = self.state.borrow_mut();
        state.connect_attempts += 1;
        if let Some(ref error) = state.refuse {
            return Err(DbError::Connection(error.clone()));
        }
        state.connects += 1;
        Ok(MockSession {
            state: Rc::clone(&self.state),
            alive: true,
        })
    }
}

/// Session handed out by [`MockConnector`].
#[derive(Debug)]
pub struct MockSession {
    state: Rc<RefCell<MockState>>,
    alive: bool,
}

impl Session for MockSession {
    fn count_rows(&mut self, table: &str) -> Result<u64, DbError> {
        let panic_here = self.state.borrow().panic_at.as_deref() == Some(table);
        if panic_here {
            panic!("mock panic while counting {}", table);
        }

        let mut state = self.state.borrow_mut();
        state.queries.push(table.to_string());

        if !self.alive {
            return Err(DbError::Connection("Lost connection to server".to_string()));
        }
        if state.drop_session_at.as_deref() == Some(table) {
            self.alive = false;
            return Err(DbError::Connection(
                "Lost connection to server during query".to_string(),
            ));
        }

        state
            .tables
            .get(table)
            .copied()
            .ok_or_else(|| DbError::Query(format!("Table '{}' doesn't exist", table)))
    }

    fn close(self) -> Result<(), DbError> {
        let mut state = self.state.borrow_mut();
        state.closes += 1;
        if state.fail_close {
            Err(DbError::Connection("close failed".to_string()))
        } else {
            Ok(())
        }
    }
}
