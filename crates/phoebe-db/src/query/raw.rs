//! Raw SQL queries.
//!
//! A [`RawQuery`] bypasses the compiler entirely: the caller's SQL and
//! parameters are executed verbatim. There is deliberately no `where_`,
//! `join`, or `switch` surface; a raw query is not composable. Results are
//! routed through the usual wrappers, with columns matched back onto the
//! model's fields by name.

use crate::executor::DbExecutor;
use crate::query::results::{
    DictMapper, NamedInstanceMapper, ResultWrapper, RowCursor, TupleMapper,
};
use crate::query::{DictRows, TupleRows};
use crate::schema::{Model, ModelSchema};
use crate::value::Value;
use phoebe_core::OrmResult;
use std::sync::Arc;

impl Model {
    /// Builds a raw query bound to this model.
    pub fn raw(&self, sql: impl Into<String>, params: Vec<Value>) -> RawQuery {
        RawQuery {
            schema: self.schema().clone(),
            sql: sql.into(),
            params,
        }
    }
}

/// Caller-supplied SQL executed verbatim.
#[derive(Debug, Clone)]
pub struct RawQuery {
    schema: Arc<ModelSchema>,
    sql: String,
    params: Vec<Value>,
}

impl RawQuery {
    /// The SQL text as given.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Executes and maps rows onto model instances, matching columns to
    /// fields by database column name.
    pub async fn execute(
        &self,
        db: &dyn DbExecutor,
    ) -> OrmResult<ResultWrapper<NamedInstanceMapper>> {
        let rows = db.query_rows(&self.sql, &self.params).await?;
        Ok(ResultWrapper::new(
            RowCursor::new(rows),
            NamedInstanceMapper::new(self.schema.clone()),
        ))
    }

    /// Executes and wraps rows as plain value tuples.
    pub async fn tuples(&self, db: &dyn DbExecutor) -> OrmResult<TupleRows> {
        let rows = db.query_rows(&self.sql, &self.params).await?;
        Ok(ResultWrapper::new(RowCursor::new(rows), TupleMapper))
    }

    /// Executes and wraps rows as column-keyed maps.
    pub async fn dicts(&self, db: &dyn DbExecutor) -> OrmResult<DictRows> {
        let rows = db.query_rows(&self.sql, &self.params).await?;
        Ok(ResultWrapper::new(RowCursor::new(rows), DictMapper))
    }

    /// Executes as a statement, returning the affected-row count.
    pub async fn run(&self, db: &dyn DbExecutor) -> OrmResult<u64> {
        db.execute_sql(&self.sql, &self.params).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::Field;
    use crate::schema::{ModelBuilder, Registry};

    #[test]
    fn test_raw_query_keeps_sql_verbatim() {
        let registry = Registry::new();
        let user = registry
            .register(ModelBuilder::new("User").field(Field::char("username", 80)))
            .unwrap();
        let query = user.raw(
            "SELECT * FROM user WHERE username = ?",
            vec![Value::from("alice")],
        );
        assert_eq!(query.sql(), "SELECT * FROM user WHERE username = ?");
    }
}
