//! The error taxonomy for the phoebe ORM.
//!
//! Driver-native errors are caught at the single execution choke point in the
//! backends crate and remapped onto [`OrmError`]. Everything above the driver
//! layer (schema registration, query construction, compilation) raises the
//! appropriate variant eagerly, before any statement reaches the network.

use thiserror::Error;

/// The primary error type for the phoebe ORM.
///
/// The first eight variants mirror the standard database exception taxonomy
/// that most drivers follow; backends remap their native errors onto them.
/// The remaining variants are raised by the framework itself.
#[derive(Error, Debug)]
pub enum OrmError {
    /// A generic database error not covered by a more specific variant.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// A problem with the processed data (invalid coercion, out of range).
    #[error("Data error: {0}")]
    DataError(String),

    /// A relational integrity constraint was violated.
    #[error("Integrity error: {0}")]
    IntegrityError(String),

    /// A problem with the database interface rather than the database itself
    /// (e.g. statement issued on a closed connection).
    #[error("Interface error: {0}")]
    InterfaceError(String),

    /// The database encountered an internal error.
    #[error("Internal error: {0}")]
    InternalError(String),

    /// An operation was attempted that the active backend does not support.
    #[error("Not supported: {0}")]
    NotSupportedError(String),

    /// An operational failure outside the caller's control (connection lost,
    /// disk full, ...).
    #[error("Operational error: {0}")]
    OperationalError(String),

    /// A programming mistake: malformed SQL, an unknown field name, a join
    /// with no discoverable relationship.
    #[error("Programming error: {0}")]
    ProgrammingError(String),

    /// A single-row lookup matched no rows. Carries the model name so callers
    /// can tell *whose* row is missing.
    #[error("{model} matching query does not exist")]
    DoesNotExist {
        /// The name of the model the lookup ran against.
        model: String,
    },

    /// A single-row lookup matched more than one row.
    #[error("Multiple objects returned when one expected: {0}")]
    MultipleObjectsReturned(String),

    /// The framework is misconfigured: overdetermined primary key, colliding
    /// reverse-relation names, a deferred database that was never initialized.
    #[error("Improperly configured: {0}")]
    ImproperlyConfigured(String),
}

impl OrmError {
    /// Shorthand constructor for [`OrmError::DoesNotExist`].
    pub fn does_not_exist(model: impl Into<String>) -> Self {
        Self::DoesNotExist {
            model: model.into(),
        }
    }

    /// Returns `true` if this error is a `DoesNotExist` for any model.
    pub const fn is_does_not_exist(&self) -> bool {
        matches!(self, Self::DoesNotExist { .. })
    }
}

/// A convenience type alias for `Result<T, OrmError>`.
pub type OrmResult<T> = Result<T, OrmError>;
