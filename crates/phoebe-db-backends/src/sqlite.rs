//! SQLite backend using `rusqlite`.
//!
//! The synchronous driver is wrapped in `tokio::task::spawn_blocking` behind
//! an async mutex, keeping the async executor unblocked. Because SQLite lacks
//! `date_part`/`date_trunc` SQL functions and a native `REGEXP`, they are
//! registered here as user-defined functions implemented in application code
//! against the kernel's fixed list of accepted timestamp formats.

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use phoebe_core::{OrmError, OrmResult};
use phoebe_db::fields::{DATETIME_FORMATS, TIME_FORMATS};
use phoebe_db::{DbExecutor, Dialect, Row, Value};
use rusqlite::functions::FunctionFlags;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

/// A SQLite database handle.
///
/// One physical connection, guarded by an async mutex; all driver calls run
/// via `spawn_blocking`.
pub struct SqliteDatabase {
    path: PathBuf,
    conn: Arc<Mutex<rusqlite::Connection>>,
    autorollback: bool,
}

impl SqliteDatabase {
    /// Opens a database at the given path (`:memory:` for in-memory).
    ///
    /// Foreign-key enforcement is switched on, and the `date_part`,
    /// `date_trunc`, and `regexp` functions are registered.
    pub fn open(path: impl Into<PathBuf>) -> OrmResult<Self> {
        let path = path.into();
        let conn = if path.to_str() == Some(":memory:") {
            rusqlite::Connection::open_in_memory()
        } else {
            rusqlite::Connection::open(&path)
        }
        .map_err(|e| OrmError::OperationalError(format!("SQLite open failed: {e}")))?;

        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(|e| OrmError::OperationalError(format!("Failed to set pragmas: {e}")))?;

        register_functions(&conn)?;

        Ok(Self {
            path,
            conn: Arc::new(Mutex::new(conn)),
            autorollback: false,
        })
    }

    /// Opens an in-memory database.
    pub fn memory() -> OrmResult<Self> {
        Self::open(":memory:")
    }

    /// Enables automatic rollback of an aborted implicit transaction when a
    /// statement fails.
    #[must_use]
    pub const fn with_autorollback(mut self) -> Self {
        self.autorollback = true;
        self
    }

    /// The database file path.
    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Binds kernel values onto a prepared statement.
    fn bind_params(stmt: &mut rusqlite::Statement<'_>, params: &[Value]) -> OrmResult<()> {
        for (i, param) in params.iter().enumerate() {
            let idx = i + 1;
            match param {
                Value::Null => stmt.raw_bind_parameter(idx, rusqlite::types::Null),
                Value::Bool(b) => stmt.raw_bind_parameter(idx, b),
                Value::Int(v) => stmt.raw_bind_parameter(idx, v),
                Value::Float(v) => stmt.raw_bind_parameter(idx, v),
                Value::String(s) => stmt.raw_bind_parameter(idx, s.as_str()),
                Value::Bytes(b) => stmt.raw_bind_parameter(idx, b.as_slice()),
                Value::Date(d) => stmt.raw_bind_parameter(idx, d.to_string().as_str()),
                Value::Time(t) => stmt.raw_bind_parameter(idx, t.to_string().as_str()),
                Value::DateTime(dt) => {
                    stmt.raw_bind_parameter(idx, dt.format("%Y-%m-%d %H:%M:%S").to_string())
                }
                Value::List(vals) => {
                    let json = serde_json::to_string(
                        &vals.iter().map(ToString::to_string).collect::<Vec<_>>(),
                    )
                    .unwrap_or_default();
                    stmt.raw_bind_parameter(idx, json.as_str())
                }
            }
            .map_err(|e| remap_error(&e))?;
        }
        Ok(())
    }

    /// Converts a driver row into the kernel's row shape.
    fn convert_row(sqlite_row: &rusqlite::Row<'_>, column_names: &[String]) -> Row {
        let values: Vec<Value> = column_names
            .iter()
            .enumerate()
            .map(|(i, _)| {
                let val_ref = sqlite_row
                    .get_ref(i)
                    .unwrap_or(rusqlite::types::ValueRef::Null);
                match val_ref {
                    rusqlite::types::ValueRef::Null => Value::Null,
                    rusqlite::types::ValueRef::Integer(v) => Value::Int(v),
                    rusqlite::types::ValueRef::Real(v) => Value::Float(v),
                    rusqlite::types::ValueRef::Text(b) => {
                        Value::String(String::from_utf8_lossy(b).to_string())
                    }
                    rusqlite::types::ValueRef::Blob(b) => Value::Bytes(b.to_vec()),
                }
            })
            .collect();

        Row::new(column_names.to_vec(), values)
    }
}

#[async_trait::async_trait]
impl DbExecutor for SqliteDatabase {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    async fn execute_sql(&self, sql: &str, params: &[Value]) -> OrmResult<u64> {
        tracing::debug!(target: "phoebe::sql", %sql, ?params, "execute");
        let conn = self.conn.clone();
        let sql = sql.to_string();
        let params = params.to_vec();
        let autorollback = self.autorollback;

        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let result = (|| -> OrmResult<u64> {
                let mut stmt = conn.prepare(&sql).map_err(|e| remap_error(&e))?;
                Self::bind_params(&mut stmt, &params)?;
                let count = stmt.raw_execute().map_err(|e| remap_error(&e))?;
                Ok(count as u64)
            })();
            if result.is_err() && autorollback && !conn.is_autocommit() {
                if let Err(rollback_err) = conn.execute_batch("ROLLBACK") {
                    tracing::warn!(%rollback_err, "autorollback failed");
                }
            }
            result
        })
        .await
        .map_err(|e| OrmError::InternalError(format!("task join error: {e}")))?
    }

    async fn query_rows(&self, sql: &str, params: &[Value]) -> OrmResult<Vec<Row>> {
        tracing::debug!(target: "phoebe::sql", %sql, ?params, "query");
        let conn = self.conn.clone();
        let sql = sql.to_string();
        let params = params.to_vec();

        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let mut stmt = conn.prepare(&sql).map_err(|e| remap_error(&e))?;

            let column_names: Vec<String> = stmt
                .column_names()
                .into_iter()
                .map(String::from)
                .collect();

            Self::bind_params(&mut stmt, &params)?;

            let mut raw_rows = stmt.raw_query();
            let mut rows = Vec::new();
            while let Some(row) = raw_rows.next().map_err(|e| remap_error(&e))? {
                rows.push(Self::convert_row(row, &column_names));
            }
            Ok(rows)
        })
        .await
        .map_err(|e| OrmError::InternalError(format!("task join error: {e}")))?
    }

    async fn insert_returning_id(&self, sql: &str, params: &[Value]) -> OrmResult<Value> {
        tracing::debug!(target: "phoebe::sql", %sql, ?params, "insert");
        let conn = self.conn.clone();
        let sql = sql.to_string();
        let params = params.to_vec();

        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let mut stmt = conn.prepare(&sql).map_err(|e| remap_error(&e))?;
            Self::bind_params(&mut stmt, &params)?;
            stmt.raw_execute().map_err(|e| remap_error(&e))?;
            Ok(Value::Int(conn.last_insert_rowid()))
        })
        .await
        .map_err(|e| OrmError::InternalError(format!("task join error: {e}")))?
    }
}

/// Remaps a driver error onto the kernel taxonomy by its extended result
/// code.
fn remap_error(err: &rusqlite::Error) -> OrmError {
    use rusqlite::ErrorCode;

    match err {
        rusqlite::Error::SqliteFailure(code, message) => {
            let text = message
                .clone()
                .unwrap_or_else(|| code.to_string());
            match code.code {
                ErrorCode::ConstraintViolation => OrmError::IntegrityError(text),
                ErrorCode::TypeMismatch => OrmError::DataError(text),
                ErrorCode::ApiMisuse => OrmError::InterfaceError(text),
                ErrorCode::InternalMalfunction => OrmError::InternalError(text),
                ErrorCode::DatabaseBusy
                | ErrorCode::DatabaseLocked
                | ErrorCode::DiskFull
                | ErrorCode::CannotOpen
                | ErrorCode::SystemIoFailure
                | ErrorCode::DatabaseCorrupt
                | ErrorCode::OperationInterrupted => OrmError::OperationalError(text),
                _ => OrmError::DatabaseError(text),
            }
        }
        rusqlite::Error::InvalidQuery | rusqlite::Error::InvalidParameterName(_) => {
            OrmError::ProgrammingError(err.to_string())
        }
        rusqlite::Error::FromSqlConversionFailure(..)
        | rusqlite::Error::IntegralValueOutOfRange(..) => OrmError::DataError(err.to_string()),
        other => OrmError::DatabaseError(other.to_string()),
    }
}

/// Registers `date_part`, `date_trunc`, and `regexp` user-defined functions.
fn register_functions(conn: &rusqlite::Connection) -> OrmResult<()> {
    let flags = FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC;

    conn.create_scalar_function("date_part", 2, flags, |ctx| {
        let part: Option<String> = ctx.get(0).ok();
        let ts: Option<String> = ctx.get(1).ok();
        Ok(match (part, ts) {
            (Some(part), Some(ts)) => date_part(&part, &ts),
            _ => None,
        })
    })
    .map_err(|e| remap_error(&e))?;

    conn.create_scalar_function("date_trunc", 2, flags, |ctx| {
        let kind: Option<String> = ctx.get(0).ok();
        let ts: Option<String> = ctx.get(1).ok();
        Ok(match (kind, ts) {
            (Some(kind), Some(ts)) => date_trunc(&kind, &ts),
            _ => None,
        })
    })
    .map_err(|e| remap_error(&e))?;

    conn.create_scalar_function("regexp", 2, flags, |ctx| {
        let pattern: String = ctx.get(0)?;
        let value: Option<String> = ctx.get(1).ok();
        let regex = regex::Regex::new(&pattern)
            .map_err(|e| rusqlite::Error::UserFunctionError(Box::new(e)))?;
        Ok(value.is_some_and(|v| regex.is_match(&v)))
    })
    .map_err(|e| remap_error(&e))?;

    Ok(())
}

/// Parses a timestamp string against the accepted formats.
fn parse_timestamp(ts: &str) -> Option<NaiveDateTime> {
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(ts, fmt) {
            return Some(dt);
        }
        if let Ok(d) = NaiveDate::parse_from_str(ts, fmt) {
            return d.and_hms_opt(0, 0, 0);
        }
    }
    for fmt in TIME_FORMATS {
        if let Ok(t) = chrono::NaiveTime::parse_from_str(ts, fmt) {
            return NaiveDate::from_ymd_opt(1970, 1, 1).map(|d| d.and_time(t));
        }
    }
    None
}

/// Extracts one component of a timestamp.
fn date_part(part: &str, ts: &str) -> Option<i64> {
    let dt = parse_timestamp(ts)?;
    let value = match part.to_ascii_lowercase().as_str() {
        "year" => i64::from(dt.year()),
        "month" => i64::from(dt.month()),
        "day" => i64::from(dt.day()),
        "hour" => i64::from(dt.hour()),
        "minute" => i64::from(dt.minute()),
        "second" => i64::from(dt.second()),
        _ => return None,
    };
    Some(value)
}

/// Truncates a timestamp to the given precision, returning the canonical
/// string form.
fn date_trunc(kind: &str, ts: &str) -> Option<String> {
    let dt = parse_timestamp(ts)?;
    let out = match kind.to_ascii_lowercase().as_str() {
        "year" => format!("{:04}-01-01 00:00:00", dt.year()),
        "month" => format!("{:04}-{:02}-01 00:00:00", dt.year(), dt.month()),
        "day" => format!("{:04}-{:02}-{:02} 00:00:00", dt.year(), dt.month(), dt.day()),
        "hour" => format!(
            "{:04}-{:02}-{:02} {:02}:00:00",
            dt.year(),
            dt.month(),
            dt.day(),
            dt.hour()
        ),
        "minute" => format!(
            "{:04}-{:02}-{:02} {:02}:{:02}:00",
            dt.year(),
            dt.month(),
            dt.day(),
            dt.hour(),
            dt.minute()
        ),
        "second" => format!(
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            dt.year(),
            dt.month(),
            dt.day(),
            dt.hour(),
            dt.minute(),
            dt.second()
        ),
        _ => return None,
    };
    Some(out)
}
