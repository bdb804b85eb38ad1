//! Compound selects: UNION, INTERSECT, EXCEPT.
//!
//! Two selects over compatible shapes combine through the set operators
//! (`|`, `&`, `-`); symmetric difference (`^`) is defined in terms of the
//! other three as `(A | B) - wrap(A & B)`. Whether a dialect supports an
//! operator is checked at compile time, before anything reaches the
//! database.

use crate::executor::DbExecutor;
use crate::query::compiler::QueryCompiler;
use crate::query::results::{DictMapper, ResultWrapper, RowCursor, TupleMapper};
use crate::query::select::SelectQuery;
use crate::query::{DictRows, TupleRows};
use crate::value::Value;
use phoebe_core::{OrmError, OrmResult};
use std::ops;

/// A compound set operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompoundOp {
    /// UNION (deduplicating).
    Union,
    /// UNION ALL.
    UnionAll,
    /// INTERSECT.
    Intersect,
    /// EXCEPT.
    Except,
}

impl CompoundOp {
    /// The SQL keyword for this operation.
    pub const fn sql_keyword(self) -> &'static str {
        match self {
            Self::Union => "UNION",
            Self::UnionAll => "UNION ALL",
            Self::Intersect => "INTERSECT",
            Self::Except => "EXCEPT",
        }
    }
}

/// One operand of a compound select.
#[derive(Debug, Clone)]
pub enum CompoundPart {
    /// A plain select.
    Select(Box<SelectQuery>),
    /// A nested compound rendered inline (left-associative chaining).
    Compound(Box<CompoundSelect>),
    /// A nested compound wrapped as a subselect, for operands that must be
    /// evaluated as a unit.
    Wrapped(Box<CompoundSelect>),
}

/// A compound select combining two operands.
#[derive(Debug, Clone)]
pub struct CompoundSelect {
    lhs: CompoundPart,
    op: CompoundOp,
    rhs: CompoundPart,
}

impl CompoundSelect {
    fn new(lhs: CompoundPart, op: CompoundOp, rhs: CompoundPart) -> Self {
        Self { lhs, op, rhs }
    }

    /// Chains another select with UNION.
    #[must_use]
    pub fn union(self, rhs: SelectQuery) -> Self {
        Self::new(
            CompoundPart::Compound(Box::new(self)),
            CompoundOp::Union,
            CompoundPart::Select(Box::new(rhs)),
        )
    }

    /// Chains another select with INTERSECT.
    #[must_use]
    pub fn intersect(self, rhs: SelectQuery) -> Self {
        Self::new(
            CompoundPart::Compound(Box::new(self)),
            CompoundOp::Intersect,
            CompoundPart::Select(Box::new(rhs)),
        )
    }

    /// Chains another select with EXCEPT.
    #[must_use]
    pub fn except(self, rhs: SelectQuery) -> Self {
        Self::new(
            CompoundPart::Compound(Box::new(self)),
            CompoundOp::Except,
            CompoundPart::Select(Box::new(rhs)),
        )
    }

    fn check_support(&self, compiler: &QueryCompiler) -> OrmResult<()> {
        if !compiler.dialect().compound_operations().contains(&self.op) {
            return Err(OrmError::NotSupportedError(format!(
                "{} is not supported by this dialect",
                self.op.sql_keyword()
            )));
        }
        for part in [&self.lhs, &self.rhs] {
            match part {
                CompoundPart::Compound(inner) | CompoundPart::Wrapped(inner) => {
                    inner.check_support(compiler)?;
                }
                CompoundPart::Select(_) => {}
            }
        }
        Ok(())
    }

    fn render(
        &self,
        compiler: &QueryCompiler,
        params: &mut Vec<Value>,
    ) -> OrmResult<String> {
        let lhs = Self::render_part(&self.lhs, compiler, params)?;
        let rhs = Self::render_part(&self.rhs, compiler, params)?;
        Ok(format!("{lhs} {} {rhs}", self.op.sql_keyword()))
    }

    fn render_part(
        part: &CompoundPart,
        compiler: &QueryCompiler,
        params: &mut Vec<Value>,
    ) -> OrmResult<String> {
        match part {
            CompoundPart::Select(query) => compiler.select_into_shared(query, params),
            CompoundPart::Compound(inner) => inner.render(compiler, params),
            CompoundPart::Wrapped(inner) => {
                let body = inner.render(compiler, params)?;
                Ok(format!("SELECT * FROM ({body}) AS wrapped"))
            }
        }
    }

    /// Compiles the compound for the given dialect, checking operator
    /// support first.
    pub fn to_sql(&self, compiler: &QueryCompiler) -> OrmResult<(String, Vec<Value>)> {
        self.check_support(compiler)?;
        let mut params = Vec::new();
        let sql = self.render(compiler, &mut params)?;
        Ok((sql, params))
    }

    /// Executes and wraps rows as plain value tuples.
    pub async fn tuples(&self, db: &dyn DbExecutor) -> OrmResult<TupleRows> {
        let compiler = QueryCompiler::new(db.dialect());
        let (sql, params) = self.to_sql(&compiler)?;
        let rows = db.query_rows(&sql, &params).await?;
        Ok(ResultWrapper::new(RowCursor::new(rows), TupleMapper))
    }

    /// Executes and wraps rows as column-keyed maps.
    pub async fn dicts(&self, db: &dyn DbExecutor) -> OrmResult<DictRows> {
        let compiler = QueryCompiler::new(db.dialect());
        let (sql, params) = self.to_sql(&compiler)?;
        let rows = db.query_rows(&sql, &params).await?;
        Ok(ResultWrapper::new(RowCursor::new(rows), DictMapper))
    }
}

impl SelectQuery {
    /// `self UNION other`.
    #[must_use]
    pub fn union(&self, other: &SelectQuery) -> CompoundSelect {
        CompoundSelect::new(
            CompoundPart::Select(Box::new(self.clone())),
            CompoundOp::Union,
            CompoundPart::Select(Box::new(other.clone())),
        )
    }

    /// `self UNION ALL other`.
    #[must_use]
    pub fn union_all(&self, other: &SelectQuery) -> CompoundSelect {
        CompoundSelect::new(
            CompoundPart::Select(Box::new(self.clone())),
            CompoundOp::UnionAll,
            CompoundPart::Select(Box::new(other.clone())),
        )
    }

    /// `self INTERSECT other`.
    #[must_use]
    pub fn intersect(&self, other: &SelectQuery) -> CompoundSelect {
        CompoundSelect::new(
            CompoundPart::Select(Box::new(self.clone())),
            CompoundOp::Intersect,
            CompoundPart::Select(Box::new(other.clone())),
        )
    }

    /// `self EXCEPT other`.
    #[must_use]
    pub fn except(&self, other: &SelectQuery) -> CompoundSelect {
        CompoundSelect::new(
            CompoundPart::Select(Box::new(self.clone())),
            CompoundOp::Except,
            CompoundPart::Select(Box::new(other.clone())),
        )
    }

    /// Symmetric difference, defined as `(self | other) - wrap(self & other)`.
    #[must_use]
    pub fn symmetric_difference(&self, other: &SelectQuery) -> CompoundSelect {
        let union = self.union(other);
        let intersection = self.intersect(other);
        CompoundSelect::new(
            CompoundPart::Compound(Box::new(union)),
            CompoundOp::Except,
            CompoundPart::Wrapped(Box::new(intersection)),
        )
    }
}

impl ops::BitOr for SelectQuery {
    type Output = CompoundSelect;

    fn bitor(self, rhs: Self) -> Self::Output {
        self.union(&rhs)
    }
}

impl ops::BitAnd for SelectQuery {
    type Output = CompoundSelect;

    fn bitand(self, rhs: Self) -> Self::Output {
        self.intersect(&rhs)
    }
}

impl ops::Sub for SelectQuery {
    type Output = CompoundSelect;

    fn sub(self, rhs: Self) -> Self::Output {
        self.except(&rhs)
    }
}

impl ops::BitXor for SelectQuery {
    type Output = CompoundSelect;

    fn bitxor(self, rhs: Self) -> Self::Output {
        self.symmetric_difference(&rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::Field;
    use crate::query::compiler::Dialect;
    use crate::schema::{ModelBuilder, Registry};

    fn user_model() -> crate::schema::Model {
        let registry = Registry::new();
        registry
            .register(
                ModelBuilder::new("User")
                    .field(Field::char("username", 80))
                    .field(Field::integer("age")),
            )
            .unwrap()
    }

    #[test]
    fn test_union_compiles() {
        let user = user_model();
        let young = user.select().where_(user.f("age").lt(30));
        let named = user.select().where_(user.f("username").eq("zed"));
        let compound = young | named;
        let compiler = QueryCompiler::new(Dialect::Sqlite);
        let (sql, params) = compound.to_sql(&compiler).unwrap();
        assert!(sql.contains(" UNION "));
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn test_postgres_numbering_spans_parts() {
        let user = user_model();
        let a = user.select().where_(user.f("age").lt(30));
        let b = user.select().where_(user.f("age").gt(60));
        let compound = a | b;
        let compiler = QueryCompiler::new(Dialect::Postgres);
        let (sql, params) = compound.to_sql(&compiler).unwrap();
        assert!(sql.contains("$1"));
        assert!(sql.contains("$2"));
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn test_unsupported_compound_is_checked_before_io() {
        let user = user_model();
        let a = user.select();
        let b = user.select();
        let compound = a & b;
        let compiler = QueryCompiler::new(Dialect::MySql);
        assert!(matches!(
            compound.to_sql(&compiler),
            Err(OrmError::NotSupportedError(_))
        ));
    }

    #[test]
    fn test_symmetric_difference_shape() {
        let user = user_model();
        let a = user.select().where_(user.f("age").lt(30));
        let b = user.select().where_(user.f("age").gt(20));
        let compound = a ^ b;
        let compiler = QueryCompiler::new(Dialect::Sqlite);
        let (sql, _) = compound.to_sql(&compiler).unwrap();
        assert!(sql.contains(" UNION "));
        assert!(sql.contains(" EXCEPT SELECT * FROM ("));
        assert!(sql.contains(" INTERSECT "));
    }

    #[test]
    fn test_chained_compound() {
        let user = user_model();
        let compound = user
            .select()
            .union(&user.select())
            .union(user.select());
        let compiler = QueryCompiler::new(Dialect::Sqlite);
        let (sql, _) = compound.to_sql(&compiler).unwrap();
        assert_eq!(sql.matches(" UNION ").count(), 2);
    }
}
