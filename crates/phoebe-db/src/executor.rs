//! The minimal async executor interface between the kernel and the backends.
//!
//! Query objects compile themselves and then hand SQL plus parameters to a
//! [`DbExecutor`]. Backends implement this trait; anything else (transaction
//! managers, test spies) can wrap one.

use crate::query::compiler::Dialect;
use crate::row::Row;
use crate::value::Value;
use phoebe_core::OrmResult;

/// Minimal async database executor.
///
/// Implementations log every statement at `debug` level and remap
/// driver-native errors onto the [`phoebe_core::OrmError`] taxonomy at this
/// single choke point.
#[async_trait::async_trait]
pub trait DbExecutor: Send + Sync {
    /// Returns the SQL dialect used to compile queries for this executor.
    fn dialect(&self) -> Dialect;

    /// Whether multi-row `INSERT ... VALUES (...), (...)` is supported.
    ///
    /// Defaults to the dialect's capability flag; wrappers and test doubles
    /// may override.
    fn supports_insert_many(&self) -> bool {
        self.dialect().insert_many()
    }

    /// Runs a statement that does not return rows; returns rows affected.
    async fn execute_sql(&self, sql: &str, params: &[Value]) -> OrmResult<u64>;

    /// Runs a query and returns all result rows.
    async fn query_rows(&self, sql: &str, params: &[Value]) -> OrmResult<Vec<Row>>;

    /// Executes an INSERT and returns the generated row id.
    async fn insert_returning_id(&self, sql: &str, params: &[Value]) -> OrmResult<Value>;
}
