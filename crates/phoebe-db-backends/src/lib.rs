//! # phoebe-db-backends
//!
//! Concrete [`DbExecutor`](phoebe_db::DbExecutor) implementations for the
//! phoebe kernel: SQLite (via `rusqlite`, behind `spawn_blocking`),
//! PostgreSQL (via `tokio-postgres` / `deadpool-postgres`), and MySQL (via
//! `mysql_async`). Each backend is gated by a cargo feature.
//!
//! Every backend funnels statements through one choke point where they are
//! logged at `debug` level and where driver-native errors are remapped onto
//! the [`OrmError`](phoebe_core::OrmError) taxonomy.

pub mod base;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "postgres")]
pub mod postgresql;

#[cfg(feature = "mysql")]
pub mod mysql;

pub use base::{DatabaseConfig, Proxy};

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteDatabase;

#[cfg(feature = "postgres")]
pub use postgresql::PostgresDatabase;

#[cfg(feature = "mysql")]
pub use mysql::MySqlDatabase;
