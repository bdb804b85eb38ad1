//! Transaction management: atomic blocks and savepoints.
//!
//! A [`TransactionManager`] wraps an executor and tracks nesting depth. Only
//! the outermost scope issues `BEGIN`/`COMMIT`; nested scopes are savepoints,
//! each with a unique generated name, so an inner failure can roll back
//! without aborting the outer transaction. Absent an explicit transaction,
//! every statement is its own implicit transaction (the drivers autocommit).

use crate::executor::DbExecutor;
use crate::query::compiler::Dialect;
use crate::row::Row;
use crate::value::Value;
use phoebe_core::{OrmError, OrmResult};
use std::future::Future;
use tokio::sync::Mutex;

/// State of a savepoint within a transaction.
#[derive(Debug, Clone)]
pub struct Savepoint {
    /// The unique name of this savepoint.
    pub name: String,
    /// Whether this savepoint has been released.
    pub released: bool,
    /// Whether this savepoint has been rolled back.
    pub rolled_back: bool,
}

impl Savepoint {
    /// Creates a savepoint with a unique generated name.
    pub fn new() -> Self {
        Self {
            name: format!("sp_{}", uuid::Uuid::new_v4().simple()),
            released: false,
            rolled_back: false,
        }
    }

    /// Creates a savepoint with a caller-chosen name.
    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            released: false,
            rolled_back: false,
        }
    }
}

impl Default for Savepoint {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks transaction nesting for one database handle.
pub struct TransactionManager<'a> {
    db: &'a dyn DbExecutor,
    /// Current nesting depth (0 = no transaction, 1 = outermost, 2+ = savepoint).
    depth: Mutex<u32>,
    /// Stack of active savepoints for nested scopes.
    savepoints: Mutex<Vec<Savepoint>>,
}

impl<'a> TransactionManager<'a> {
    /// Creates a manager over the given executor.
    pub fn new(db: &'a dyn DbExecutor) -> Self {
        Self {
            db,
            depth: Mutex::new(0),
            savepoints: Mutex::new(Vec::new()),
        }
    }

    /// The current nesting depth.
    pub async fn depth(&self) -> u32 {
        *self.depth.lock().await
    }

    /// The wrapped executor.
    pub fn executor(&self) -> &dyn DbExecutor {
        self.db
    }

    /// Enters a transaction scope: `BEGIN` at the outermost level, a
    /// savepoint when already inside a transaction.
    pub async fn begin(&self) -> OrmResult<()> {
        let mut depth = self.depth.lock().await;
        if *depth == 0 {
            self.db.execute_sql("BEGIN", &[]).await?;
        } else {
            let sp = Savepoint::new();
            let sql = format!("SAVEPOINT {}", sp.name);
            self.db.execute_sql(&sql, &[]).await?;
            self.savepoints.lock().await.push(sp);
        }
        *depth += 1;
        Ok(())
    }

    /// Leaves a scope cleanly: `COMMIT` at the outermost level, `RELEASE
    /// SAVEPOINT` for nested scopes.
    pub async fn commit(&self) -> OrmResult<()> {
        let mut depth = self.depth.lock().await;
        if *depth == 0 {
            return Err(OrmError::ProgrammingError(
                "cannot commit: not in a transaction".to_string(),
            ));
        }
        if *depth == 1 {
            self.db.execute_sql("COMMIT", &[]).await?;
        } else {
            let mut savepoints = self.savepoints.lock().await;
            if let Some(mut sp) = savepoints.pop() {
                let sql = format!("RELEASE SAVEPOINT {}", sp.name);
                self.db.execute_sql(&sql, &[]).await?;
                sp.released = true;
            }
        }
        *depth -= 1;
        Ok(())
    }

    /// Leaves a scope on failure: `ROLLBACK` at the outermost level,
    /// `ROLLBACK TO SAVEPOINT` for nested scopes.
    pub async fn rollback(&self) -> OrmResult<()> {
        let mut depth = self.depth.lock().await;
        if *depth == 0 {
            return Err(OrmError::ProgrammingError(
                "cannot rollback: not in a transaction".to_string(),
            ));
        }
        if *depth == 1 {
            self.db.execute_sql("ROLLBACK", &[]).await?;
        } else {
            let mut savepoints = self.savepoints.lock().await;
            if let Some(mut sp) = savepoints.pop() {
                let sql = format!("ROLLBACK TO SAVEPOINT {}", sp.name);
                self.db.execute_sql(&sql, &[]).await?;
                sp.rolled_back = true;
            }
        }
        *depth -= 1;
        Ok(())
    }
}

#[async_trait::async_trait]
impl DbExecutor for TransactionManager<'_> {
    fn dialect(&self) -> Dialect {
        self.db.dialect()
    }

    fn supports_insert_many(&self) -> bool {
        self.db.supports_insert_many()
    }

    async fn execute_sql(&self, sql: &str, params: &[Value]) -> OrmResult<u64> {
        self.db.execute_sql(sql, params).await
    }

    async fn query_rows(&self, sql: &str, params: &[Value]) -> OrmResult<Vec<Row>> {
        self.db.query_rows(sql, params).await
    }

    async fn insert_returning_id(&self, sql: &str, params: &[Value]) -> OrmResult<Value> {
        self.db.insert_returning_id(sql, params).await
    }
}

/// Runs a future inside a transaction scope on the given manager.
///
/// The scope commits when the future resolves `Ok` and rolls back (then
/// re-raises) when it resolves `Err`. Nesting is savepoint-based: an inner
/// `atomic` failure only rolls back to its own savepoint.
pub async fn atomic<T, Fut>(manager: &TransactionManager<'_>, fut: Fut) -> OrmResult<T>
where
    Fut: Future<Output = OrmResult<T>>,
{
    manager.begin().await?;
    match fut.await {
        Ok(value) => {
            manager.commit().await?;
            Ok(value)
        }
        Err(err) => {
            manager.rollback().await?;
            Err(err)
        }
    }
}
