//! Field definitions for the ORM.
//!
//! A [`Field`] describes one column: its logical type ([`FieldKind`]), storage
//! options, and the two value conversions: outbound [`Field::db_value`] and
//! inbound [`Field::from_db_value`]. Fields are declared with builder-style
//! constructors and bound onto a model by the schema builder, which fills in
//! the column name and verbose name.

use crate::value::Value;
use phoebe_core::{OrmError, OrmResult};
use std::fmt;
use std::sync::Arc;

/// Accepted datetime parse formats, tried in order.
pub const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d"];

/// Accepted date parse formats, tried in order.
pub const DATE_FORMATS: &[&str] = &["%Y-%m-%d"];

/// Accepted time parse formats, tried in order.
pub const TIME_FORMATS: &[&str] = &["%H:%M:%S%.f", "%H:%M:%S", "%H:%M"];

/// Rounding modes for [`FieldKind::Decimal`] auto-rounding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rounding {
    /// Round half away from zero (2.5 -> 3).
    #[default]
    HalfUp,
    /// Round half to even (banker's rounding; 2.5 -> 2).
    HalfEven,
    /// Truncate toward zero.
    Down,
    /// Round away from zero.
    Up,
}

/// The logical type of a field, determining its column type and coercions.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    /// Auto-incrementing integer primary key.
    PrimaryKey,
    /// 32-bit signed integer.
    Integer,
    /// 64-bit signed integer.
    BigInteger,
    /// Single-precision float.
    Float,
    /// Double-precision float.
    Double,
    /// Fixed-precision decimal number.
    Decimal {
        /// Maximum total digits.
        max_digits: u32,
        /// Digits after the decimal point.
        decimal_places: u32,
        /// Whether values are rounded to `decimal_places` on the way out.
        auto_round: bool,
        /// The rounding mode used when `auto_round` is set.
        rounding: Rounding,
    },
    /// Variable-length string with a maximum length.
    Char {
        /// Maximum character length.
        max_length: u32,
    },
    /// Unlimited-length text.
    Text,
    /// Boolean (true/false).
    Boolean,
    /// Date without time.
    Date,
    /// Time without date.
    Time,
    /// Date and time.
    DateTime,
    /// Raw binary data.
    Blob,
    /// Many-to-one relationship.
    ForeignKey {
        /// The target model name, or `"self"` for a self-reference.
        to: String,
        /// The referenced field on the target; defaults to its primary key.
        to_field: Option<String>,
        /// The name of the reverse accessor installed on the target.
        related_name: Option<String>,
        /// Optional ON DELETE action emitted in DDL (e.g. "CASCADE").
        on_delete: Option<String>,
    },
}

impl FieldKind {
    /// Returns the logical type tag used to look up the dialect's column type.
    pub fn db_field(&self) -> &'static str {
        match self {
            Self::PrimaryKey => "primary_key",
            Self::Integer => "int",
            Self::BigInteger => "bigint",
            Self::Float => "float",
            Self::Double => "double",
            Self::Decimal { .. } => "decimal",
            Self::Char { .. } => "string",
            Self::Text => "text",
            Self::Boolean => "bool",
            Self::Date => "date",
            Self::Time => "time",
            Self::DateTime => "datetime",
            Self::Blob => "blob",
            Self::ForeignKey { .. } => "int",
        }
    }
}

/// A callable default, evaluated once per inserted row.
pub type DefaultFn = Arc<dyn Fn() -> Value + Send + Sync>;

/// Complete definition of a model field.
///
/// Constructed via the typed builders (`Field::char`, `Field::integer`, ...)
/// and finalized by the schema builder, which sets `db_column` and
/// `verbose_name` when the field is bound to its model.
#[derive(Clone)]
pub struct Field {
    /// The attribute name of this field.
    pub name: String,
    /// The logical type.
    pub kind: FieldKind,
    /// Whether NULL is allowed.
    pub null: bool,
    /// Whether a non-unique index should be created.
    pub index: bool,
    /// Whether a UNIQUE constraint is applied.
    pub unique: bool,
    /// Whether this field is the primary key.
    pub primary_key: bool,
    /// Static default value for new instances.
    pub default: Option<Value>,
    /// Callable default, evaluated per row at insert time.
    pub default_fn: Option<DefaultFn>,
    /// The database column name (defaults to `name` at bind time).
    pub db_column: String,
    /// Sequence backing this column (PostgreSQL).
    pub sequence: Option<String>,
    /// Extra column constraints spliced into DDL verbatim.
    pub constraints: Vec<String>,
    /// Human-readable name (defaults to a humanized `name` at bind time).
    pub verbose_name: String,
    /// Allowed values as (value, display label) pairs.
    pub choices: Option<Vec<(Value, String)>>,
    /// For a bound foreign key: a copy of the referenced field, used for
    /// value conversion. Filled by the schema registry.
    pub rel_target: Option<Box<Field>>,
}

impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Field")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("null", &self.null)
            .field("unique", &self.unique)
            .field("primary_key", &self.primary_key)
            .field("db_column", &self.db_column)
            .field("has_default_fn", &self.default_fn.is_some())
            .finish_non_exhaustive()
    }
}

impl Field {
    /// Creates a new field with the given name and kind.
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        let name = name.into();
        let primary_key = matches!(kind, FieldKind::PrimaryKey);
        Self {
            db_column: name.clone(),
            verbose_name: name.replace('_', " "),
            name,
            kind,
            null: false,
            index: false,
            unique: false,
            primary_key,
            default: None,
            default_fn: None,
            sequence: None,
            constraints: Vec::new(),
            choices: None,
            rel_target: None,
        }
    }

    /// An auto-incrementing integer primary key.
    pub fn auto(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::PrimaryKey)
    }

    /// A variable-length string field.
    pub fn char(name: impl Into<String>, max_length: u32) -> Self {
        Self::new(name, FieldKind::Char { max_length })
    }

    /// An unlimited-length text field.
    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Text)
    }

    /// A 32-bit integer field.
    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Integer)
    }

    /// A 64-bit integer field.
    pub fn big_integer(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::BigInteger)
    }

    /// A single-precision float field.
    pub fn float(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Float)
    }

    /// A double-precision float field.
    pub fn double(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Double)
    }

    /// A fixed-precision decimal field. Rounding is off by default.
    pub fn decimal(name: impl Into<String>, max_digits: u32, decimal_places: u32) -> Self {
        Self::new(
            name,
            FieldKind::Decimal {
                max_digits,
                decimal_places,
                auto_round: false,
                rounding: Rounding::default(),
            },
        )
    }

    /// A boolean field.
    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Boolean)
    }

    /// A date field.
    pub fn date(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Date)
    }

    /// A time field.
    pub fn time(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Time)
    }

    /// A datetime field.
    pub fn datetime(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::DateTime)
    }

    /// A binary blob field.
    pub fn blob(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Blob)
    }

    /// A foreign key to another model. `"self"` targets the declaring model.
    pub fn foreign_key(name: impl Into<String>, to: impl Into<String>) -> Self {
        Self::new(
            name,
            FieldKind::ForeignKey {
                to: to.into(),
                to_field: None,
                related_name: None,
                on_delete: None,
            },
        )
    }

    // ── Builder options ──────────────────────────────────────────────

    /// Allows NULL values.
    #[must_use]
    pub const fn null(mut self) -> Self {
        self.null = true;
        self
    }

    /// Requests a non-unique index.
    #[must_use]
    pub const fn index(mut self) -> Self {
        self.index = true;
        self
    }

    /// Applies a UNIQUE constraint.
    #[must_use]
    pub const fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Marks this field as the primary key.
    #[must_use]
    pub const fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    /// Sets a static default value.
    #[must_use]
    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Sets a callable default, evaluated once per inserted row.
    #[must_use]
    pub fn default_fn(mut self, f: impl Fn() -> Value + Send + Sync + 'static) -> Self {
        self.default_fn = Some(Arc::new(f));
        self
    }

    /// Sets the database column name.
    #[must_use]
    pub fn db_column(mut self, column: impl Into<String>) -> Self {
        self.db_column = column.into();
        self
    }

    /// Sets the backing sequence name (PostgreSQL).
    #[must_use]
    pub fn sequence(mut self, seq: impl Into<String>) -> Self {
        self.sequence = Some(seq.into());
        self
    }

    /// Appends a raw column constraint to the DDL.
    #[must_use]
    pub fn constraint(mut self, c: impl Into<String>) -> Self {
        self.constraints.push(c.into());
        self
    }

    /// Sets the verbose (human-readable) name.
    #[must_use]
    pub fn verbose_name(mut self, name: impl Into<String>) -> Self {
        self.verbose_name = name.into();
        self
    }

    /// Restricts the field to the given (value, label) choices.
    #[must_use]
    pub fn choices(mut self, choices: Vec<(Value, String)>) -> Self {
        self.choices = Some(choices);
        self
    }

    /// Enables decimal auto-rounding with the given mode.
    ///
    /// Only meaningful on decimal fields; a no-op on other kinds.
    #[must_use]
    pub fn auto_round(mut self, mode: Rounding) -> Self {
        if let FieldKind::Decimal {
            auto_round,
            rounding,
            ..
        } = &mut self.kind
        {
            *auto_round = true;
            *rounding = mode;
        }
        self
    }

    /// Sets the reverse-accessor name on a foreign key.
    #[must_use]
    pub fn related_name(mut self, name: impl Into<String>) -> Self {
        if let FieldKind::ForeignKey { related_name, .. } = &mut self.kind {
            *related_name = Some(name.into());
        }
        self
    }

    /// Sets the referenced field on a foreign key (defaults to the target's
    /// primary key).
    #[must_use]
    pub fn to_field(mut self, name: impl Into<String>) -> Self {
        if let FieldKind::ForeignKey { to_field, .. } = &mut self.kind {
            *to_field = Some(name.into());
        }
        self
    }

    /// Sets the ON DELETE action emitted in foreign-key DDL.
    #[must_use]
    pub fn on_delete(mut self, action: impl Into<String>) -> Self {
        if let FieldKind::ForeignKey { on_delete, .. } = &mut self.kind {
            *on_delete = Some(action.into());
        }
        self
    }

    /// Returns `true` if this is a foreign-key field.
    pub const fn is_foreign_key(&self) -> bool {
        matches!(self.kind, FieldKind::ForeignKey { .. })
    }

    /// Returns the logical type tag used for dialect column-type lookup.
    ///
    /// A bound foreign key reports the referenced field's tag, so the column
    /// type matches the column it points at.
    pub fn db_field(&self) -> &'static str {
        if self.is_foreign_key() {
            if let Some(target) = &self.rel_target {
                return match target.kind {
                    // An FK to an auto primary key stores a plain integer.
                    FieldKind::PrimaryKey => "int",
                    _ => target.db_field(),
                };
            }
        }
        self.kind.db_field()
    }

    /// Evaluates the field's default, if any.
    pub fn default_value(&self) -> Option<Value> {
        if let Some(f) = &self.default_fn {
            return Some(f());
        }
        self.default.clone()
    }

    // ── Value conversions ────────────────────────────────────────────

    /// Converts an outbound value to its storage representation.
    ///
    /// `Null` always passes through untouched.
    pub fn db_value(&self, value: Value) -> OrmResult<Value> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        match &self.kind {
            FieldKind::Char { .. } | FieldKind::Text => Ok(coerce_string(value)),
            FieldKind::PrimaryKey | FieldKind::Integer | FieldKind::BigInteger => {
                coerce_int(&self.name, value)
            }
            FieldKind::Float | FieldKind::Double => coerce_float(&self.name, value),
            FieldKind::Decimal {
                decimal_places,
                auto_round,
                rounding,
                ..
            } => {
                let coerced = coerce_float(&self.name, value)?;
                match coerced {
                    Value::Float(f) if *auto_round => {
                        Ok(Value::Float(round_to(f, *decimal_places, *rounding)))
                    }
                    other => Ok(other),
                }
            }
            FieldKind::Boolean => coerce_bool(&self.name, value),
            FieldKind::Date => Ok(parse_date(value)),
            FieldKind::Time => Ok(parse_time(value)),
            FieldKind::DateTime => Ok(parse_datetime(value)),
            FieldKind::Blob => Ok(coerce_bytes(value)),
            FieldKind::ForeignKey { .. } => match &self.rel_target {
                Some(target) => target.db_value(value),
                None => Ok(value),
            },
        }
    }

    /// Converts an inbound value from its storage representation.
    ///
    /// `Null` always passes through untouched.
    pub fn from_db_value(&self, value: Value) -> OrmResult<Value> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        match &self.kind {
            FieldKind::Char { .. } | FieldKind::Text => Ok(coerce_string(value)),
            FieldKind::PrimaryKey | FieldKind::Integer | FieldKind::BigInteger => {
                coerce_int(&self.name, value)
            }
            FieldKind::Float | FieldKind::Double | FieldKind::Decimal { .. } => {
                coerce_float(&self.name, value)
            }
            FieldKind::Boolean => coerce_bool(&self.name, value),
            FieldKind::Date => Ok(parse_date(value)),
            FieldKind::Time => Ok(parse_time(value)),
            FieldKind::DateTime => Ok(parse_datetime(value)),
            FieldKind::Blob => Ok(coerce_bytes(value)),
            FieldKind::ForeignKey { .. } => match &self.rel_target {
                Some(target) => target.from_db_value(value),
                None => Ok(value),
            },
        }
    }
}

/// Character coercion: falsy scalars become the empty string, everything else
/// its display form.
fn coerce_string(value: Value) -> Value {
    if value.is_falsy() {
        return Value::String(String::new());
    }
    match value {
        Value::String(s) => Value::String(s),
        Value::Bytes(b) => Value::String(String::from_utf8_lossy(&b).into_owned()),
        other => Value::String(other.to_string()),
    }
}

#[allow(clippy::cast_possible_truncation)]
fn coerce_int(field: &str, value: Value) -> OrmResult<Value> {
    match value {
        Value::Int(i) => Ok(Value::Int(i)),
        Value::Bool(b) => Ok(Value::Int(i64::from(b))),
        Value::Float(f) => Ok(Value::Int(f as i64)),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| OrmError::DataError(format!("'{s}' is not an integer for '{field}'"))),
        other => Err(OrmError::DataError(format!(
            "Cannot coerce {other:?} to an integer for '{field}'"
        ))),
    }
}

#[allow(clippy::cast_precision_loss)]
fn coerce_float(field: &str, value: Value) -> OrmResult<Value> {
    match value {
        Value::Float(f) => Ok(Value::Float(f)),
        Value::Int(i) => Ok(Value::Float(i as f64)),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| OrmError::DataError(format!("'{s}' is not a number for '{field}'"))),
        other => Err(OrmError::DataError(format!(
            "Cannot coerce {other:?} to a float for '{field}'"
        ))),
    }
}

fn coerce_bool(field: &str, value: Value) -> OrmResult<Value> {
    match value {
        Value::Bool(b) => Ok(Value::Bool(b)),
        Value::Int(i) => Ok(Value::Bool(i != 0)),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "t" | "1" => Ok(Value::Bool(true)),
            "false" | "f" | "0" => Ok(Value::Bool(false)),
            _ => Err(OrmError::DataError(format!(
                "'{s}' is not a boolean for '{field}'"
            ))),
        },
        other => Err(OrmError::DataError(format!(
            "Cannot coerce {other:?} to a boolean for '{field}'"
        ))),
    }
}

fn coerce_bytes(value: Value) -> Value {
    match value {
        Value::Bytes(b) => Value::Bytes(b),
        Value::String(s) => Value::Bytes(s.into_bytes()),
        other => other,
    }
}

/// Parses a date from the accepted formats; unparseable values pass through
/// unchanged (permissive by design, not an error).
fn parse_date(value: Value) -> Value {
    match value {
        Value::Date(d) => Value::Date(d),
        Value::DateTime(dt) => Value::Date(dt.date()),
        Value::String(s) => {
            for fmt in DATE_FORMATS {
                if let Ok(d) = chrono::NaiveDate::parse_from_str(&s, fmt) {
                    return Value::Date(d);
                }
            }
            Value::String(s)
        }
        other => other,
    }
}

fn parse_time(value: Value) -> Value {
    match value {
        Value::Time(t) => Value::Time(t),
        Value::DateTime(dt) => Value::Time(dt.time()),
        Value::String(s) => {
            for fmt in TIME_FORMATS {
                if let Ok(t) = chrono::NaiveTime::parse_from_str(&s, fmt) {
                    return Value::Time(t);
                }
            }
            Value::String(s)
        }
        other => other,
    }
}

fn parse_datetime(value: Value) -> Value {
    match value {
        Value::DateTime(dt) => Value::DateTime(dt),
        Value::Date(d) => match d.and_hms_opt(0, 0, 0) {
            Some(dt) => Value::DateTime(dt),
            None => Value::Date(d),
        },
        Value::String(s) => {
            for fmt in DATETIME_FORMATS {
                if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(&s, fmt) {
                    return Value::DateTime(dt);
                }
                // A bare date is accepted as midnight.
                if let Ok(d) = chrono::NaiveDate::parse_from_str(&s, fmt) {
                    if let Some(dt) = d.and_hms_opt(0, 0, 0) {
                        return Value::DateTime(dt);
                    }
                }
            }
            Value::String(s)
        }
        other => other,
    }
}

/// Rounds `value` to `places` decimal places using the given mode.
#[allow(clippy::cast_possible_truncation)]
fn round_to(value: f64, places: u32, mode: Rounding) -> f64 {
    let factor = 10_f64.powi(places.min(18) as i32);
    let scaled = value * factor;
    let rounded = match mode {
        Rounding::HalfUp => scaled.round(),
        Rounding::HalfEven => {
            let floor = scaled.floor();
            let frac = scaled - floor;
            if (frac - 0.5).abs() < f64::EPSILON {
                if (floor as i64) % 2 == 0 {
                    floor
                } else {
                    floor + 1.0
                }
            } else {
                scaled.round()
            }
        }
        Rounding::Down => scaled.trunc(),
        Rounding::Up => {
            if scaled >= 0.0 {
                scaled.ceil()
            } else {
                scaled.floor()
            }
        }
    };
    rounded / factor
}
