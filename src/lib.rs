//! dbwatch - database table row-count monitor.
//!
//! Polls a MySQL-protocol (MySQL, MariaDB, TiDB) or PostgreSQL server at a
//! fixed interval and reports connectivity and row counts for a fixed set of
//! tables. The `dbwatch` binary wires these pieces together:
//! - [`config`] - connection parameters from the environment
//! - [`monitor`] - one poll cycle, producing a [`monitor::Snapshot`]
//! - [`backend`] - MySQL and PostgreSQL connectors
//! - [`render`] - text and JSON output
//! - [`runner`] - the poll/render/wait loop

pub mod backend;
pub mod config;
pub mod monitor;
pub mod render;
pub mod runner;
