//! # phoebe
//!
//! A small, expressive query-builder and ORM kernel. Models are declared
//! through an explicit schema builder, queries are composable clone-on-mutate
//! templates, and one compiler renders them for SQLite, PostgreSQL, or MySQL.
//!
//! This facade crate re-exports the kernel ([`phoebe_db`]), the foundation
//! types ([`phoebe_core`]), and whichever backends are enabled via cargo
//! features (`sqlite` by default; `postgres` and `mysql` opt-in).
//!
//! ```no_run
//! use phoebe::{Field, ModelBuilder, Registry, Value};
//!
//! # async fn demo() -> phoebe::OrmResult<()> {
//! let registry = Registry::new();
//! let user = registry.register(
//!     ModelBuilder::new("User").field(Field::char("username", 80).unique()),
//! )?;
//!
//! let db = phoebe::backends::SqliteDatabase::memory()?;
//! phoebe::ddl::create_tables(&db, &registry, false).await?;
//!
//! let alice = user.create(&db, vec![("username", Value::from("alice"))]).await?;
//! let found = user.get(&db, vec![user.f("username").eq("alice")]).await?;
//! assert_eq!(alice.pk(), found.pk());
//! # Ok(())
//! # }
//! ```

pub use phoebe_core::{logging, OrmError, OrmResult};

// Third-party re-exports for user convenience.
pub use async_trait;
pub use chrono;
pub use tokio;
pub use tracing;

pub use phoebe_db::{
    atomic, ddl, fn_, CompoundOp, CompoundSelect, DbExecutor, DeleteQuery, Dialect, Field,
    FieldKind, FromValue, InsertQuery, Instance, IntoNode, JoinKind, MetaOptions, Model,
    ModelBuilder, ModelSchema, Node, OpCode, QueryCompiler, RawQuery, Registry, Rounding, Row,
    Savepoint, SelectQuery, SortOrder, TransactionManager, UpdateQuery, Value, DQ,
};

/// The enabled database backends.
pub mod backends {
    pub use phoebe_db_backends::{DatabaseConfig, Proxy};

    #[cfg(feature = "sqlite")]
    pub use phoebe_db_backends::SqliteDatabase;

    #[cfg(feature = "postgres")]
    pub use phoebe_db_backends::PostgresDatabase;

    #[cfg(feature = "mysql")]
    pub use phoebe_db_backends::MySqlDatabase;
}
