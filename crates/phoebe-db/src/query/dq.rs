//! Django-style double-underscore filter expressions.
//!
//! A [`DQ`] is a composable filter written as `"field__lookup"` paths
//! (`"age__gt"`, `"blog__user__username"`), combined with `&`, `|`, and `!`.
//! When applied to a select, relation segments are resolved against the
//! model graph, any implied joins are added (idempotently), and the whole
//! tree collapses into one expression ANDed onto the WHERE clause.

use crate::ast::Node;
use crate::query::select::SelectQuery;
use crate::schema::ModelSchema;
use crate::value::Value;
use phoebe_core::{OrmError, OrmResult};
use std::ops;
use std::sync::Arc;

/// The recognized lookup suffixes.
const LOOKUPS: &[&str] = &[
    "eq",
    "ne",
    "lt",
    "lte",
    "gt",
    "gte",
    "in",
    "is",
    "isnull",
    "like",
    "ilike",
    "contains",
    "icontains",
    "startswith",
    "istartswith",
    "endswith",
    "iendswith",
    "between",
    "regexp",
];

/// A composable double-underscore filter.
#[derive(Debug, Clone, PartialEq)]
pub enum DQ {
    /// A single `path -> value` filter.
    Filter {
        /// The lookup path (`"field"`, `"field__gt"`, `"rel__field"`).
        path: String,
        /// The comparison value.
        value: Value,
    },
    /// Logical AND of sub-filters.
    And(Vec<DQ>),
    /// Logical OR of sub-filters.
    Or(Vec<DQ>),
    /// Logical negation.
    Not(Box<DQ>),
}

impl DQ {
    /// Creates a filter from a path and value.
    pub fn new(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Filter {
            path: path.into(),
            value: value.into(),
        }
    }
}

impl ops::BitAnd for DQ {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self::Output {
        match (self, rhs) {
            // Flatten nested ANDs
            (Self::And(mut left), Self::And(right)) => {
                left.extend(right);
                Self::And(left)
            }
            (Self::And(mut left), other) => {
                left.push(other);
                Self::And(left)
            }
            (other, Self::And(mut right)) => {
                right.insert(0, other);
                Self::And(right)
            }
            (left, right) => Self::And(vec![left, right]),
        }
    }
}

impl ops::BitOr for DQ {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        match (self, rhs) {
            // Flatten nested ORs
            (Self::Or(mut left), Self::Or(right)) => {
                left.extend(right);
                Self::Or(left)
            }
            (Self::Or(mut left), other) => {
                left.push(other);
                Self::Or(left)
            }
            (other, Self::Or(mut right)) => {
                right.insert(0, other);
                Self::Or(right)
            }
            (left, right) => Self::Or(vec![left, right]),
        }
    }
}

impl ops::Not for DQ {
    type Output = Self;

    fn not(self) -> Self::Output {
        // Double negation cancellation
        match self {
            Self::Not(inner) => *inner,
            other => Self::Not(Box::new(other)),
        }
    }
}

/// Expands a DQ tree against a query: discovers joins implied by relation
/// traversal, applies them, and returns the query plus the built expression.
pub(crate) fn apply(query: &SelectQuery, dq: &DQ) -> OrmResult<(SelectQuery, Node)> {
    match dq {
        DQ::Filter { path, value } => expand_filter(query, path, value),
        DQ::And(children) => {
            let mut query = query.clone();
            let mut node: Option<Node> = None;
            for child in children {
                let (next, expr) = apply(&query, child)?;
                query = next;
                node = Some(match node {
                    Some(existing) => existing & expr,
                    None => expr,
                });
            }
            let node = node.ok_or_else(|| {
                OrmError::ProgrammingError("empty filter conjunction".to_string())
            })?;
            Ok((query, node))
        }
        DQ::Or(children) => {
            let mut query = query.clone();
            let mut node: Option<Node> = None;
            for child in children {
                let (next, expr) = apply(&query, child)?;
                query = next;
                node = Some(match node {
                    Some(existing) => existing | expr,
                    None => expr,
                });
            }
            let node = node.ok_or_else(|| {
                OrmError::ProgrammingError("empty filter disjunction".to_string())
            })?;
            Ok((query, node))
        }
        DQ::Not(inner) => {
            let (query, node) = apply(query, inner)?;
            Ok((query, !node))
        }
    }
}

fn expand_filter(query: &SelectQuery, path: &str, value: &Value) -> OrmResult<(SelectQuery, Node)> {
    let mut segments: Vec<&str> = path.split("__").collect();
    let has_lookup =
        segments.len() >= 2 && segments.last().is_some_and(|last| LOOKUPS.contains(last));
    let lookup = if has_lookup {
        segments.pop().unwrap_or("eq")
    } else {
        "eq"
    };
    let field_segment = segments.pop().ok_or_else(|| {
        OrmError::ProgrammingError(format!("malformed filter path '{path}'"))
    })?;

    // Walk the relation segments, joining as we go.
    let mut query = query.clone();
    let mut ctx: Arc<ModelSchema> = query.model().clone();
    for segment in segments {
        let registry = ctx.registry()?;
        if let Some(rel) = ctx.rel.get(segment) {
            let target = registry.get(&rel.to_model)?;
            query = query.ensure_join(&ctx, &target)?;
            ctx = target.schema().clone();
        } else if let Some(reverse) = ctx
            .reverse_rels()
            .into_iter()
            .find(|r| r.related_name == segment)
        {
            let source = registry.get(&reverse.source_model)?;
            query = query.ensure_join(&ctx, &source)?;
            ctx = source.schema().clone();
        } else {
            return Err(OrmError::ProgrammingError(format!(
                "'{segment}' is neither a foreign key nor a reverse relation on '{}'",
                ctx.name
            )));
        }
    }

    let field = ctx.field(field_segment).ok_or_else(|| {
        OrmError::ProgrammingError(format!(
            "model '{}' has no field '{field_segment}'",
            ctx.name
        ))
    })?;
    let node = Node::field_ref(ctx.name.clone(), field.clone());
    let expr = build_lookup(node, lookup, value)?;
    Ok((query, expr))
}

fn build_lookup(node: Node, lookup: &str, value: &Value) -> OrmResult<Node> {
    let expr = match lookup {
        "eq" => node.eq(value.clone()),
        "ne" => node.ne(value.clone()),
        "lt" => node.lt(value.clone()),
        "lte" => node.lte(value.clone()),
        "gt" => node.gt(value.clone()),
        "gte" => node.gte(value.clone()),
        "in" => match value {
            Value::List(items) => node.in_list(items.clone()),
            other => {
                return Err(OrmError::DataError(format!(
                    "'in' lookup requires a list, got {other:?}"
                )))
            }
        },
        "is" => node.eq(value.clone()),
        "isnull" => match value {
            Value::Bool(b) => node.is_null(*b),
            other => {
                return Err(OrmError::DataError(format!(
                    "'isnull' lookup requires a boolean, got {other:?}"
                )))
            }
        },
        "like" => match value.as_str() {
            Some(s) => node.like(s),
            None => return Err(lookup_needs_string(lookup, value)),
        },
        "ilike" => match value.as_str() {
            Some(s) => node.ilike(s),
            None => return Err(lookup_needs_string(lookup, value)),
        },
        "contains" | "icontains" => match value.as_str() {
            Some(s) => node.contains(s),
            None => return Err(lookup_needs_string(lookup, value)),
        },
        "startswith" | "istartswith" => match value.as_str() {
            Some(s) => node.startswith(s),
            None => return Err(lookup_needs_string(lookup, value)),
        },
        "endswith" | "iendswith" => match value.as_str() {
            Some(s) => node.endswith(s),
            None => return Err(lookup_needs_string(lookup, value)),
        },
        "between" => match value {
            Value::List(items) if items.len() == 2 => {
                node.between(items[0].clone(), items[1].clone())
            }
            other => {
                return Err(OrmError::DataError(format!(
                    "'between' lookup requires a two-element list, got {other:?}"
                )))
            }
        },
        "regexp" => match value.as_str() {
            Some(s) => node.regexp(s),
            None => return Err(lookup_needs_string(lookup, value)),
        },
        other => {
            return Err(OrmError::ProgrammingError(format!(
                "unknown lookup '{other}'"
            )))
        }
    };
    Ok(expr)
}

fn lookup_needs_string(lookup: &str, value: &Value) -> OrmError {
    OrmError::DataError(format!("'{lookup}' lookup requires a string, got {value:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{NodeKind, OpCode};
    use crate::fields::Field;
    use crate::schema::{ModelBuilder, Registry};

    fn blog_models() -> (crate::schema::Model, crate::schema::Model) {
        let registry = Registry::new();
        let user = registry
            .register(
                ModelBuilder::new("User")
                    .field(Field::char("username", 80))
                    .field(Field::integer("age")),
            )
            .unwrap();
        let blog = registry
            .register(
                ModelBuilder::new("Blog")
                    .field(Field::foreign_key("user", "User").related_name("blogs"))
                    .field(Field::char("name", 120)),
            )
            .unwrap();
        // The models hold only a Weak<Registry>; keep the registry alive for
        // the test process so relation traversal can resolve related models.
        std::mem::forget(registry);
        (user, blog)
    }

    #[test]
    fn test_simple_lookup() {
        let (user, _) = blog_models();
        let query = user.select().filter(DQ::new("age__gt", 25)).unwrap();
        assert!(query.where_clause.is_some());
        assert!(query.joins.is_empty());
    }

    #[test]
    fn test_default_lookup_is_eq() {
        let (user, _) = blog_models();
        let query = user.select().filter(DQ::new("username", "alice")).unwrap();
        match &query.where_clause.as_ref().unwrap().kind {
            NodeKind::Expression { op, .. } => assert_eq!(*op, OpCode::Eq),
            other => panic!("expected expression, got {other:?}"),
        }
    }

    #[test]
    fn test_relation_traversal_adds_join() {
        let (_, blog) = blog_models();
        let query = blog
            .select()
            .filter(DQ::new("user__username", "alice"))
            .unwrap();
        assert_eq!(query.joins.len(), 1);
        assert_eq!(query.joins[0].join.dest.name, "User");
    }

    #[test]
    fn test_reverse_relation_traversal() {
        let (user, _) = blog_models();
        let query = user
            .select()
            .filter(DQ::new("blogs__name", "tech"))
            .unwrap();
        assert_eq!(query.joins.len(), 1);
        assert_eq!(query.joins[0].join.dest.name, "Blog");
    }

    #[test]
    fn test_repeated_traversal_joins_once() {
        let (_, blog) = blog_models();
        let query = blog
            .select()
            .filter(DQ::new("user__username", "alice") & DQ::new("user__age__gte", 21))
            .unwrap();
        assert_eq!(query.joins.len(), 1);
    }

    #[test]
    fn test_unknown_segment_fails() {
        let (user, _) = blog_models();
        assert!(user.select().filter(DQ::new("nope__x", 1)).is_err());
        assert!(user.select().filter(DQ::new("missing", 1)).is_err());
    }

    #[test]
    fn test_combinators_flatten() {
        let a = DQ::new("a", 1);
        let b = DQ::new("b", 2);
        let c = DQ::new("c", 3);
        match (a.clone() & b.clone()) & c.clone() {
            DQ::And(children) => assert_eq!(children.len(), 3),
            other => panic!("expected And, got {other:?}"),
        }
        match (a.clone() | b) | c {
            DQ::Or(children) => assert_eq!(children.len(), 3),
            other => panic!("expected Or, got {other:?}"),
        }
        let double = !!a.clone();
        assert_eq!(double, a);
    }

    #[test]
    fn test_isnull_lookup() {
        let (user, _) = blog_models();
        let query = user
            .select()
            .filter(DQ::new("username__isnull", true))
            .unwrap();
        match &query.where_clause.as_ref().unwrap().kind {
            NodeKind::Expression { op, .. } => assert_eq!(*op, OpCode::Is),
            other => panic!("expected expression, got {other:?}"),
        }
    }

    #[test]
    fn test_in_lookup_requires_list() {
        let (user, _) = blog_models();
        assert!(user.select().filter(DQ::new("age__in", 5)).is_err());
        let ok = user
            .select()
            .filter(DQ::new(
                "age__in",
                Value::List(vec![Value::Int(1), Value::Int(2)]),
            ))
            .unwrap();
        assert!(ok.where_clause.is_some());
    }

    #[test]
    fn test_between_lookup() {
        let (user, _) = blog_models();
        let query = user
            .select()
            .filter(DQ::new(
                "age__between",
                Value::List(vec![Value::Int(18), Value::Int(65)]),
            ))
            .unwrap();
        match &query.where_clause.as_ref().unwrap().kind {
            NodeKind::Expression { op, .. } => assert_eq!(*op, OpCode::Between),
            other => panic!("expected expression, got {other:?}"),
        }
    }
}
