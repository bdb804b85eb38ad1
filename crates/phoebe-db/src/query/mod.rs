//! Query objects, their compiler, and the result wrappers.
//!
//! Query objects are lazy builders: they accumulate AST fragments through
//! chained calls and only produce SQL when compiled. Every mutator clones the
//! receiver and returns the modified clone, so an already-built query is never
//! changed behind a caller's back, so a base query can be reused as a template
//! indefinitely.

pub mod compiler;
pub mod compound;
pub mod dq;
pub mod modify;
pub mod raw;
pub mod results;
pub mod select;

use crate::ast::Node;
use crate::schema::ModelSchema;
use std::sync::Arc;

pub use compiler::{Dialect, QueryCompiler};
pub use compound::{CompoundOp, CompoundSelect};
pub use dq::DQ;
pub use modify::{DeleteQuery, InsertQuery, UpdateQuery};
pub use raw::RawQuery;
pub use results::{DictRows, InstanceRows, ResultWrapper, RowCursor, TupleRows};
pub use select::SelectQuery;

/// The SQL join types the kernel can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    /// INNER JOIN.
    Inner,
    /// LEFT OUTER JOIN.
    LeftOuter,
    /// FULL OUTER JOIN.
    FullOuter,
}

impl JoinKind {
    /// Returns the SQL keyword for this join type.
    pub const fn sql_keyword(self) -> &'static str {
        match self {
            Self::Inner => "INNER JOIN",
            Self::LeftOuter => "LEFT OUTER JOIN",
            Self::FullOuter => "FULL OUTER JOIN",
        }
    }
}

/// One edge in a query's join graph.
#[derive(Debug, Clone)]
pub struct Join {
    /// The joined model.
    pub dest: Arc<ModelSchema>,
    /// The join type.
    pub kind: JoinKind,
    /// Explicit ON condition; when absent the compiler resolves the foreign
    /// key between the two models automatically.
    pub on: Option<Node>,
}

/// A join edge keyed by its source model.
#[derive(Debug, Clone)]
pub struct JoinEdge {
    /// The source model's name.
    pub src: String,
    /// The join itself.
    pub join: Join,
}

/// The shape rows are materialized into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RowShape {
    /// Model instances with join-graph reconstruction.
    #[default]
    Model,
    /// Model instances, single-table attribute stuffing (cheapest).
    Naive,
    /// Plain value tuples.
    Tuples,
    /// Column-name keyed maps.
    Dicts,
}
