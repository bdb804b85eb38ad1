//! INSERT, UPDATE, and DELETE query builders.
//!
//! Unlike SELECT, these operate on a single table: there is no join surface,
//! and asking for one is an error by construction. Rows handed to
//! [`InsertQuery`] are normalized eagerly; unknown field names fail before
//! anything reaches the database.

use crate::ast::Node;
use crate::executor::DbExecutor;
use crate::query::compiler::QueryCompiler;
use crate::schema::{Model, ModelSchema};
use crate::value::Value;
use phoebe_core::{OrmError, OrmResult};
use std::sync::Arc;

impl Model {
    /// Builds a single-row INSERT.
    pub fn insert(&self, row: Vec<(&str, Value)>) -> OrmResult<InsertQuery> {
        self.insert_many(vec![row])
    }

    /// Builds a multi-row INSERT.
    pub fn insert_many(&self, rows: Vec<Vec<(&str, Value)>>) -> OrmResult<InsertQuery> {
        let rows = rows
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .map(|(name, value)| (name.to_string(), value))
                    .collect()
            })
            .collect();
        InsertQuery::from_named_rows(self.schema().clone(), rows)
    }

    /// Builds an UPDATE with the given assignments.
    pub fn update(&self, sets: Vec<(&str, Value)>) -> OrmResult<UpdateQuery> {
        UpdateQuery::new(self.schema().clone()).set_values(sets)
    }

    /// Builds a DELETE.
    pub fn delete(&self) -> DeleteQuery {
        DeleteQuery::new(self.schema().clone())
    }
}

/// A single- or multi-row INSERT.
#[derive(Debug, Clone)]
pub struct InsertQuery {
    schema: Arc<ModelSchema>,
    rows: Vec<Vec<(String, Value)>>,
    upsert: bool,
}

impl InsertQuery {
    /// Normalizes caller rows against the model's declared fields: unknown
    /// keys fail eagerly, missing fields are filled from field defaults
    /// (callable defaults evaluated once per row), and every row ends up
    /// with the same columns in schema order.
    pub(crate) fn from_named_rows(
        schema: Arc<ModelSchema>,
        rows: Vec<Vec<(String, Value)>>,
    ) -> OrmResult<Self> {
        if rows.is_empty() {
            return Err(OrmError::ProgrammingError(
                "cannot insert zero rows".to_string(),
            ));
        }

        let mut provided_columns: Vec<String> = Vec::new();
        for row in &rows {
            for (name, _) in row {
                if schema.field(name).is_none() {
                    return Err(OrmError::ProgrammingError(format!(
                        "model '{}' has no field '{name}'",
                        schema.name
                    )));
                }
                if !provided_columns.contains(name) {
                    provided_columns.push(name.clone());
                }
            }
        }

        // Columns in schema order: everything provided, plus defaulted
        // fields, minus an untouched auto key.
        let columns: Vec<Arc<crate::fields::Field>> = schema
            .fields
            .iter()
            .filter(|f| {
                provided_columns.contains(&f.name)
                    || f.default.is_some()
                    || f.default_fn.is_some()
            })
            .cloned()
            .collect();

        let normalized: Vec<Vec<(String, Value)>> = rows
            .into_iter()
            .map(|row| {
                columns
                    .iter()
                    .map(|field| {
                        let value = row
                            .iter()
                            .find(|(name, _)| *name == field.name)
                            .map(|(_, v)| v.clone())
                            .or_else(|| field.default_value())
                            .unwrap_or(Value::Null);
                        (field.name.clone(), value)
                    })
                    .collect()
            })
            .collect();

        Ok(Self {
            schema,
            rows: normalized,
            upsert: false,
        })
    }

    /// Requests `INSERT OR REPLACE` (SQLite only; other dialects refuse at
    /// compile time).
    #[must_use]
    pub fn upsert(&self) -> Self {
        let mut query = self.clone();
        query.upsert = true;
        query
    }

    /// The normalized rows (visible for inspection and tests).
    pub fn rows(&self) -> &[Vec<(String, Value)>] {
        &self.rows
    }

    /// Compiles this insert for the given dialect.
    pub fn to_sql(&self, compiler: &QueryCompiler) -> OrmResult<(String, Vec<Value>)> {
        compiler.generate_insert(&self.schema, &self.rows, self.upsert)
    }

    /// Executes the insert, returning the last generated row id.
    ///
    /// When the executor does not support multi-row INSERT, an N-row insert
    /// decomposes into N sequential single-row statements; only the last
    /// row's id is returned.
    pub async fn execute(&self, db: &dyn DbExecutor) -> OrmResult<Value> {
        let compiler = QueryCompiler::new(db.dialect());
        if self.rows.len() > 1 && !db.supports_insert_many() {
            let mut last = Value::Null;
            for row in &self.rows {
                let (sql, params) =
                    compiler.generate_insert(&self.schema, std::slice::from_ref(row), self.upsert)?;
                last = db.insert_returning_id(&sql, &params).await?;
            }
            return Ok(last);
        }
        let (sql, params) = compiler.generate_insert(&self.schema, &self.rows, self.upsert)?;
        db.insert_returning_id(&sql, &params).await
    }
}

/// An UPDATE over a single table.
#[derive(Debug, Clone)]
pub struct UpdateQuery {
    schema: Arc<ModelSchema>,
    sets: Vec<(String, Node)>,
    where_clause: Option<Node>,
}

impl UpdateQuery {
    pub(crate) fn new(schema: Arc<ModelSchema>) -> Self {
        Self {
            schema,
            sets: Vec::new(),
            where_clause: None,
        }
    }

    /// Adds plain value assignments, validating field names eagerly.
    pub fn set_values(&self, sets: Vec<(&str, Value)>) -> OrmResult<Self> {
        let mut query = self.clone();
        for (name, value) in sets {
            if query.schema.field(name).is_none() {
                return Err(OrmError::ProgrammingError(format!(
                    "model '{}' has no field '{name}'",
                    query.schema.name
                )));
            }
            query.sets.push((name.to_string(), Node::value(value)));
        }
        Ok(query)
    }

    /// Adds an expression assignment (e.g. `count = count + 1`).
    pub fn set_expr(&self, field: &str, expr: Node) -> OrmResult<Self> {
        if self.schema.field(field).is_none() {
            return Err(OrmError::ProgrammingError(format!(
                "model '{}' has no field '{field}'",
                self.schema.name
            )));
        }
        let mut query = self.clone();
        query.sets.push((field.to_string(), expr));
        Ok(query)
    }

    /// ANDs an expression onto the WHERE clause.
    #[must_use]
    pub fn where_(&self, expr: Node) -> Self {
        let mut query = self.clone();
        query.where_clause = Some(match query.where_clause.take() {
            Some(existing) => existing & expr,
            None => expr,
        });
        query
    }

    /// UPDATE operates on a single table; joining is always an error.
    pub fn join(&self, _model: &Model) -> OrmResult<Self> {
        Err(OrmError::NotSupportedError(
            "UPDATE queries cannot join".to_string(),
        ))
    }

    /// Compiles this update for the given dialect.
    pub fn to_sql(&self, compiler: &QueryCompiler) -> OrmResult<(String, Vec<Value>)> {
        compiler.generate_update(&self.schema, &self.sets, self.where_clause.as_ref())
    }

    /// Executes the update, returning the number of affected rows.
    pub async fn execute(&self, db: &dyn DbExecutor) -> OrmResult<u64> {
        let compiler = QueryCompiler::new(db.dialect());
        let (sql, params) = self.to_sql(&compiler)?;
        db.execute_sql(&sql, &params).await
    }
}

/// A DELETE over a single table.
#[derive(Debug, Clone)]
pub struct DeleteQuery {
    schema: Arc<ModelSchema>,
    where_clause: Option<Node>,
}

impl DeleteQuery {
    pub(crate) fn new(schema: Arc<ModelSchema>) -> Self {
        Self {
            schema,
            where_clause: None,
        }
    }

    /// ANDs an expression onto the WHERE clause.
    #[must_use]
    pub fn where_(&self, expr: Node) -> Self {
        let mut query = self.clone();
        query.where_clause = Some(match query.where_clause.take() {
            Some(existing) => existing & expr,
            None => expr,
        });
        query
    }

    /// DELETE operates on a single table; joining is always an error.
    pub fn join(&self, _model: &Model) -> OrmResult<Self> {
        Err(OrmError::NotSupportedError(
            "DELETE queries cannot join".to_string(),
        ))
    }

    /// Compiles this delete for the given dialect.
    pub fn to_sql(&self, compiler: &QueryCompiler) -> OrmResult<(String, Vec<Value>)> {
        compiler.generate_delete(&self.schema, self.where_clause.as_ref())
    }

    /// Executes the delete, returning the number of affected rows.
    pub async fn execute(&self, db: &dyn DbExecutor) -> OrmResult<u64> {
        let compiler = QueryCompiler::new(db.dialect());
        let (sql, params) = self.to_sql(&compiler)?;
        db.execute_sql(&sql, &params).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::Field;
    use crate::query::compiler::Dialect;
    use crate::schema::{ModelBuilder, Registry};

    fn user_model() -> Model {
        let registry = Registry::new();
        registry
            .register(
                ModelBuilder::new("User")
                    .field(Field::char("username", 80))
                    .field(Field::integer("age").default(18)),
            )
            .unwrap()
    }

    #[test]
    fn test_insert_unknown_field_fails_eagerly() {
        let user = user_model();
        let result = user.insert(vec![("nope", Value::from("x"))]);
        assert!(matches!(result, Err(OrmError::ProgrammingError(_))));
    }

    #[test]
    fn test_insert_merges_defaults() {
        let user = user_model();
        let insert = user.insert(vec![("username", Value::from("alice"))]).unwrap();
        let row = &insert.rows()[0];
        assert!(row.contains(&("username".to_string(), Value::from("alice"))));
        assert!(row.contains(&("age".to_string(), Value::Int(18))));
        // The untouched auto key is left to the database.
        assert!(!row.iter().any(|(name, _)| name == "id"));
    }

    #[test]
    fn test_insert_callable_default_evaluated_per_row() {
        use std::sync::atomic::{AtomicI64, Ordering};
        use std::sync::Arc as StdArc;

        let counter = StdArc::new(AtomicI64::new(0));
        let registry = Registry::new();
        let counter2 = counter.clone();
        let model = registry
            .register(
                ModelBuilder::new("Ticket")
                    .field(Field::char("title", 80))
                    .field(Field::integer("serial").default_fn(move || {
                        Value::Int(counter2.fetch_add(1, Ordering::SeqCst))
                    })),
            )
            .unwrap();

        let insert = model
            .insert_many(vec![
                vec![("title", Value::from("a"))],
                vec![("title", Value::from("b"))],
            ])
            .unwrap();
        let serials: Vec<&Value> = insert
            .rows()
            .iter()
            .map(|row| &row.iter().find(|(n, _)| n == "serial").unwrap().1)
            .collect();
        assert_ne!(serials[0], serials[1]);
    }

    #[test]
    fn test_insert_multi_row_uniform_columns() {
        let user = user_model();
        let insert = user
            .insert_many(vec![
                vec![("username", Value::from("a")), ("age", Value::Int(30))],
                vec![("username", Value::from("b"))],
            ])
            .unwrap();
        let compiler = QueryCompiler::new(Dialect::Sqlite);
        let (sql, params) = insert.to_sql(&compiler).unwrap();
        assert_eq!(
            sql,
            "INSERT INTO \"user\" (\"username\", \"age\") VALUES (?, ?), (?, ?)"
        );
        // The second row fell back to the field default.
        assert_eq!(params[3], Value::Int(18));
    }

    #[test]
    fn test_update_join_not_allowed() {
        let user = user_model();
        let update = user.update(vec![("age", Value::Int(1))]).unwrap();
        assert!(matches!(
            update.join(&user),
            Err(OrmError::NotSupportedError(_))
        ));
        let delete = user.delete();
        assert!(matches!(
            delete.join(&user),
            Err(OrmError::NotSupportedError(_))
        ));
    }

    #[test]
    fn test_update_unknown_field_fails() {
        let user = user_model();
        assert!(user.update(vec![("nope", Value::Int(1))]).is_err());
    }

    #[test]
    fn test_update_set_expr() {
        let user = user_model();
        let age = user.f("age");
        let update = user
            .update(vec![])
            .unwrap()
            .set_expr("age", age.clone() + Node::value(1))
            .unwrap()
            .where_(age.gt(0));
        let compiler = QueryCompiler::new(Dialect::Sqlite);
        let (sql, _) = update.to_sql(&compiler).unwrap();
        assert!(sql.contains("SET \"age\" = (\"age\" + ?)"));
    }

    #[test]
    fn test_delete_where_compiles() {
        let user = user_model();
        let delete = user.delete().where_(user.f("age").lt(0));
        let compiler = QueryCompiler::new(Dialect::Sqlite);
        let (sql, params) = delete.to_sql(&compiler).unwrap();
        assert_eq!(sql, "DELETE FROM \"user\" WHERE (\"age\" < ?)");
        assert_eq!(params, vec![Value::Int(0)]);
    }

    #[test]
    fn test_upsert_flag_clones() {
        let user = user_model();
        let insert = user.insert(vec![("username", Value::from("a"))]).unwrap();
        let upserting = insert.upsert();
        let compiler = QueryCompiler::new(Dialect::Sqlite);
        let (plain_sql, _) = insert.to_sql(&compiler).unwrap();
        let (upsert_sql, _) = upserting.to_sql(&compiler).unwrap();
        assert!(plain_sql.starts_with("INSERT INTO"));
        assert!(upsert_sql.starts_with("INSERT OR REPLACE INTO"));
    }
}
