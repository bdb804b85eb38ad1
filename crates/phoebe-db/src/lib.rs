//! # phoebe-db
//!
//! The phoebe ORM kernel. Provides the expression AST ([`ast::Node`]), typed
//! field definitions ([`fields::Field`]), the schema builder and registry
//! ([`schema::Registry`]), lazily-executed query objects, the per-dialect SQL
//! compiler ([`query::QueryCompiler`]), and the result wrappers that map rows
//! back into model instances.
//!
//! ## Architecture
//!
//! Everything is built around two disciplines:
//!
//! - **Clone-on-mutate**: every query-builder method returns a new object
//!   with the change applied, leaving the receiver untouched. A query built
//!   once is a reusable template.
//! - **Fail before the network**: declaration mistakes (overdetermined keys,
//!   colliding reverse names, unknown fields, unsupported operations for the
//!   active dialect) surface at registration or construction time, never as
//!   a late driver error.
//!
//! SQL is only generated when a terminal method runs, at which point the
//! compiler renders the AST for the executing backend's dialect and the rows
//! come back through a lazy, replayable result wrapper.

// These clippy lints are intentionally allowed for the kernel crate:
// - too_many_lines: the compiler's render methods are inherently large match
//   dispatches
// - format_push_string: format! with push_str is clearer than write! for SQL
//   assembly in several spots
// - needless_pass_by_value: builder APIs take owned values by design
// - return_self_not_must_use: builder pattern methods are self-documenting
// - option_if_let_else / use_self: explicit forms are clearer in context
#![allow(clippy::too_many_lines)]
#![allow(clippy::format_push_string)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::option_if_let_else)]
#![allow(clippy::use_self)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::match_same_arms)]
// float_cmp: falsy-value detection compares against exact 0.0 on purpose
#![allow(clippy::float_cmp)]

pub mod ast;
pub mod ddl;
pub mod executor;
pub mod fields;
pub mod model;
pub mod query;
pub mod row;
pub mod schema;
pub mod transactions;
pub mod value;

// Re-export the most commonly used types at the crate root.
pub use ast::{fn_, IntoNode, Node, NodeKind, OpCode, SortOrder};
pub use executor::DbExecutor;
pub use fields::{Field, FieldKind, Rounding};
pub use model::Instance;
pub use query::{
    CompoundOp, CompoundSelect, DeleteQuery, Dialect, DictRows, InsertQuery, InstanceRows,
    JoinKind, QueryCompiler, RawQuery, ResultWrapper, RowCursor, SelectQuery, TupleRows,
    UpdateQuery, DQ,
};
pub use row::{FromValue, Row};
pub use schema::{
    CompositeKey, MetaOptions, Model, ModelBuilder, ModelSchema, PrimaryKeyDef, Registry,
};
pub use transactions::{atomic, Savepoint, TransactionManager};
pub use value::Value;
