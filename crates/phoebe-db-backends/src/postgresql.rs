//! PostgreSQL backend using `tokio-postgres` with `deadpool-postgres`
//! connection pooling.

use crate::base::DatabaseConfig;
use phoebe_core::{OrmError, OrmResult};
use phoebe_db::{DbExecutor, Dialect, Row, Value};

/// A PostgreSQL database handle.
pub struct PostgresDatabase {
    pool: deadpool_postgres::Pool,
}

impl PostgresDatabase {
    /// Wraps an existing pool.
    pub const fn new(pool: deadpool_postgres::Pool) -> Self {
        Self { pool }
    }

    /// Builds a pool from a [`DatabaseConfig`].
    pub fn from_config(config: &DatabaseConfig) -> OrmResult<Self> {
        let mut pg_config = deadpool_postgres::Config::new();
        pg_config.dbname = Some(config.name.clone());
        pg_config.host = config.host.clone();
        pg_config.port = config.port;
        pg_config.user = config.user.clone();
        pg_config.password = config.password.clone();

        let pool = pg_config
            .create_pool(
                Some(deadpool_postgres::Runtime::Tokio1),
                tokio_postgres::NoTls,
            )
            .map_err(|e| OrmError::OperationalError(format!("Failed to create pool: {e}")))?;

        Ok(Self { pool })
    }

    async fn client(&self) -> OrmResult<deadpool_postgres::Object> {
        self.pool
            .get()
            .await
            .map_err(|e| OrmError::InterfaceError(format!("connection checkout failed: {e}")))
    }

    /// Converts kernel values to driver parameter references.
    fn to_sql_params(
        params: &[Value],
    ) -> Vec<Box<dyn tokio_postgres::types::ToSql + Sync + Send>> {
        params
            .iter()
            .map(|v| -> Box<dyn tokio_postgres::types::ToSql + Sync + Send> {
                match v {
                    Value::Null => Box::new(Option::<String>::None),
                    Value::Bool(b) => Box::new(*b),
                    Value::Int(i) => Box::new(*i),
                    Value::Float(f) => Box::new(*f),
                    Value::String(s) => Box::new(s.clone()),
                    Value::Bytes(b) => Box::new(b.clone()),
                    Value::Date(d) => Box::new(*d),
                    Value::Time(t) => Box::new(*t),
                    Value::DateTime(dt) => Box::new(*dt),
                    Value::List(vals) => {
                        let json = serde_json::to_string(
                            &vals.iter().map(ToString::to_string).collect::<Vec<_>>(),
                        )
                        .unwrap_or_default();
                        Box::new(json)
                    }
                }
            })
            .collect()
    }

    /// Converts a driver row into the kernel's row shape.
    fn convert_row(pg_row: &tokio_postgres::Row) -> Row {
        use tokio_postgres::types::Type;

        let columns: Vec<String> = pg_row
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();

        let values: Vec<Value> = pg_row
            .columns()
            .iter()
            .enumerate()
            .map(|(i, col)| match *col.type_() {
                Type::BOOL => pg_row
                    .try_get::<_, Option<bool>>(i)
                    .ok()
                    .flatten()
                    .map_or(Value::Null, Value::Bool),
                Type::INT2 => pg_row
                    .try_get::<_, Option<i16>>(i)
                    .ok()
                    .flatten()
                    .map_or(Value::Null, |v| Value::Int(i64::from(v))),
                Type::INT4 => pg_row
                    .try_get::<_, Option<i32>>(i)
                    .ok()
                    .flatten()
                    .map_or(Value::Null, |v| Value::Int(i64::from(v))),
                Type::INT8 => pg_row
                    .try_get::<_, Option<i64>>(i)
                    .ok()
                    .flatten()
                    .map_or(Value::Null, Value::Int),
                Type::FLOAT4 => pg_row
                    .try_get::<_, Option<f32>>(i)
                    .ok()
                    .flatten()
                    .map_or(Value::Null, |v| Value::Float(f64::from(v))),
                Type::FLOAT8 => pg_row
                    .try_get::<_, Option<f64>>(i)
                    .ok()
                    .flatten()
                    .map_or(Value::Null, Value::Float),
                Type::BYTEA => pg_row
                    .try_get::<_, Option<Vec<u8>>>(i)
                    .ok()
                    .flatten()
                    .map_or(Value::Null, Value::Bytes),
                Type::DATE => pg_row
                    .try_get::<_, Option<chrono::NaiveDate>>(i)
                    .ok()
                    .flatten()
                    .map_or(Value::Null, Value::Date),
                Type::TIME => pg_row
                    .try_get::<_, Option<chrono::NaiveTime>>(i)
                    .ok()
                    .flatten()
                    .map_or(Value::Null, Value::Time),
                Type::TIMESTAMP => pg_row
                    .try_get::<_, Option<chrono::NaiveDateTime>>(i)
                    .ok()
                    .flatten()
                    .map_or(Value::Null, Value::DateTime),
                _ => pg_row
                    .try_get::<_, Option<String>>(i)
                    .ok()
                    .flatten()
                    .map_or(Value::Null, Value::String),
            })
            .collect();

        Row::new(columns, values)
    }
}

#[async_trait::async_trait]
impl DbExecutor for PostgresDatabase {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    async fn execute_sql(&self, sql: &str, params: &[Value]) -> OrmResult<u64> {
        tracing::debug!(target: "phoebe::sql", %sql, ?params, "execute");
        let client = self.client().await?;
        let boxed = Self::to_sql_params(params);
        let refs: Vec<&(dyn tokio_postgres::types::ToSql + Sync)> = boxed
            .iter()
            .map(|p| p.as_ref() as &(dyn tokio_postgres::types::ToSql + Sync))
            .collect();
        client.execute(sql, &refs).await.map_err(|e| remap_error(&e))
    }

    async fn query_rows(&self, sql: &str, params: &[Value]) -> OrmResult<Vec<Row>> {
        tracing::debug!(target: "phoebe::sql", %sql, ?params, "query");
        let client = self.client().await?;
        let boxed = Self::to_sql_params(params);
        let refs: Vec<&(dyn tokio_postgres::types::ToSql + Sync)> = boxed
            .iter()
            .map(|p| p.as_ref() as &(dyn tokio_postgres::types::ToSql + Sync))
            .collect();
        let rows = client.query(sql, &refs).await.map_err(|e| remap_error(&e))?;
        Ok(rows.iter().map(Self::convert_row).collect())
    }

    async fn insert_returning_id(&self, sql: &str, params: &[Value]) -> OrmResult<Value> {
        tracing::debug!(target: "phoebe::sql", %sql, ?params, "insert");
        let client = self.client().await?;
        let boxed = Self::to_sql_params(params);
        let refs: Vec<&(dyn tokio_postgres::types::ToSql + Sync)> = boxed
            .iter()
            .map(|p| p.as_ref() as &(dyn tokio_postgres::types::ToSql + Sync))
            .collect();
        client.execute(sql, &refs).await.map_err(|e| remap_error(&e))?;
        // LASTVAL reads the most recently assigned sequence value on this
        // connection; statements must share the checkout.
        match client.query_one("SELECT LASTVAL()", &[]).await {
            Ok(row) => Ok(row
                .try_get::<_, i64>(0)
                .map_or(Value::Null, Value::Int)),
            Err(_) => Ok(Value::Null),
        }
    }
}

/// Remaps a driver error onto the kernel taxonomy by SQLSTATE class.
fn remap_error(err: &tokio_postgres::Error) -> OrmError {
    let Some(db_err) = err.as_db_error() else {
        return OrmError::OperationalError(err.to_string());
    };
    let text = db_err.message().to_string();
    match &db_err.code().code()[..2] {
        "22" => OrmError::DataError(text),
        "23" => OrmError::IntegrityError(text),
        "42" => OrmError::ProgrammingError(text),
        "0A" => OrmError::NotSupportedError(text),
        "08" => OrmError::InterfaceError(text),
        "40" | "53" | "54" | "55" | "57" | "58" => OrmError::OperationalError(text),
        "XX" => OrmError::InternalError(text),
        _ => OrmError::DatabaseError(text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_builds_pool() {
        let config = DatabaseConfig::postgres("app", "localhost", 5432, "app", "secret");
        let db = PostgresDatabase::from_config(&config).unwrap();
        assert_eq!(db.dialect(), Dialect::Postgres);
    }
}
