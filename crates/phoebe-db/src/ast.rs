//! The composable SQL expression AST.
//!
//! Every fragment of a query (a column reference, a comparison, a function
//! call, a raw snippet) is a [`Node`]. Nodes are built with method-style
//! sugar (`field.eq(5)`, `field.between(1, 10)`) and the Rust operators that
//! map cleanly (`&` for AND, `|` for OR, `!` for NOT, plus arithmetic).
//!
//! This layer knows nothing about SQL syntax, only about shape: rendering a
//! node into SQL text and bound parameters is entirely the
//! [compiler's](crate::query::compiler) job. Nodes own all of their data, so
//! a `clone()` is structurally independent of the original: the invariant
//! that makes query objects safely reusable as templates.

use crate::fields::Field;
use crate::query::select::SelectQuery;
use crate::value::Value;
use std::ops;
use std::sync::Arc;

/// A logical operator. SQL tokens come from the dialect's operator map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    /// Logical AND.
    And,
    /// Logical OR.
    Or,
    /// Equality.
    Eq,
    /// Less than.
    Lt,
    /// Less than or equal.
    Lte,
    /// Greater than.
    Gt,
    /// Greater than or equal.
    Gte,
    /// Inequality.
    Ne,
    /// Membership (`IN`).
    In,
    /// Identity (`IS`, used for NULL tests).
    Is,
    /// Negated identity (`IS NOT`).
    IsNot,
    /// Case-sensitive pattern match.
    Like,
    /// Case-insensitive pattern match.
    ILike,
    /// Range test (`BETWEEN low AND high`).
    Between,
    /// Regular-expression match.
    Regexp,
    /// Addition.
    Add,
    /// Subtraction.
    Sub,
    /// Multiplication.
    Mul,
    /// Division.
    Div,
    /// Modulo.
    Mod,
    /// String concatenation.
    Concat,
}

/// Sort direction attached to an ordering node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    /// Ascending.
    Asc,
    /// Descending.
    Desc,
}

/// One element of the expression tree.
///
/// The three modifiers (`negated`, `alias`, `ordering`) are cross-cutting
/// and independent of the node kind.
#[derive(Debug, Clone)]
pub struct Node {
    /// What this node is.
    pub kind: NodeKind,
    /// Whether the rendered fragment is wrapped in NOT.
    pub negated: bool,
    /// Optional `AS` alias.
    pub alias: Option<String>,
    /// Optional ASC/DESC suffix (ORDER BY position).
    pub ordering: Option<SortOrder>,
}

/// The closed set of node kinds the compiler can render.
#[derive(Debug, Clone)]
pub enum NodeKind {
    /// A binary operation; `flat` suppresses the enclosing parentheses.
    Expression {
        /// Left-hand side.
        lhs: Box<Node>,
        /// The logical operator.
        op: OpCode,
        /// Right-hand side.
        rhs: Box<Node>,
        /// Render without enclosing parentheses.
        flat: bool,
    },
    /// A generic join of sub-nodes by a separator.
    Clause {
        /// The sub-nodes, in order.
        nodes: Vec<Node>,
        /// The separator between nodes.
        glue: String,
        /// Whether the whole clause is parenthesized.
        parens: bool,
    },
    /// Literal SQL text with positional parameters: the escape hatch.
    Sql {
        /// The SQL fragment, spliced verbatim.
        value: String,
        /// Parameters bound in order.
        params: Vec<Value>,
    },
    /// A value that is always bound as a driver parameter, never inlined.
    Param {
        /// The bound value.
        value: Value,
    },
    /// A dotted, quoted identifier (e.g. `table.column`).
    Entity {
        /// The path segments, quoted individually.
        path: Vec<String>,
    },
    /// A SQL function call; `coerce` controls result-type conversion.
    Func {
        /// The function name, rendered as-is.
        name: String,
        /// The arguments.
        args: Vec<Node>,
        /// Whether result values are converted through the conversion context.
        coerce: bool,
    },
    /// A column bound to a model's field. Carries the owning model's name for
    /// alias resolution and the field itself for value coercion.
    FieldRef {
        /// The owning model's name.
        model: String,
        /// The bound field.
        field: Arc<Field>,
    },
    /// A correlated subquery, rendered parenthesized.
    Subquery(Box<SelectQuery>),
    /// A raw value, converted through the active conversion context at
    /// compile time and bound as a parameter.
    Value(Value),
    /// A parenthesized, comma-joined parameter list (IN lists).
    List(Vec<Value>),
}

impl Node {
    fn from_kind(kind: NodeKind) -> Self {
        Self {
            kind,
            negated: false,
            alias: None,
            ordering: None,
        }
    }

    /// A raw value node.
    pub fn value(v: impl Into<Value>) -> Self {
        Self::from_kind(NodeKind::Value(v.into()))
    }

    /// A value that must always be bound as a parameter.
    pub fn param(v: impl Into<Value>) -> Self {
        Self::from_kind(NodeKind::Param { value: v.into() })
    }

    /// A literal SQL fragment with no parameters.
    pub fn sql(value: impl Into<String>) -> Self {
        Self::from_kind(NodeKind::Sql {
            value: value.into(),
            params: Vec::new(),
        })
    }

    /// A literal SQL fragment with positional parameters.
    pub fn sql_params(value: impl Into<String>, params: Vec<Value>) -> Self {
        Self::from_kind(NodeKind::Sql {
            value: value.into(),
            params,
        })
    }

    /// A dotted quoted identifier.
    pub fn entity(path: Vec<String>) -> Self {
        Self::from_kind(NodeKind::Entity { path })
    }

    /// A function call with result-type coercion enabled.
    pub fn func(name: impl Into<String>, args: Vec<Node>) -> Self {
        Self::from_kind(NodeKind::Func {
            name: name.into(),
            args,
            coerce: true,
        })
    }

    /// A function call with result-type coercion disabled.
    pub fn func_no_coerce(name: impl Into<String>, args: Vec<Node>) -> Self {
        Self::from_kind(NodeKind::Func {
            name: name.into(),
            args,
            coerce: false,
        })
    }

    /// A column reference bound to a model field.
    pub fn field_ref(model: impl Into<String>, field: Arc<Field>) -> Self {
        Self::from_kind(NodeKind::FieldRef {
            model: model.into(),
            field,
        })
    }

    /// A generic clause joining `nodes` with `glue`.
    pub fn clause(nodes: Vec<Node>, glue: impl Into<String>, parens: bool) -> Self {
        Self::from_kind(NodeKind::Clause {
            nodes,
            glue: glue.into(),
            parens,
        })
    }

    /// A comma-joined clause without parentheses.
    pub fn comma_clause(nodes: Vec<Node>) -> Self {
        Self::clause(nodes, ", ", false)
    }

    /// A comma-joined clause wrapped in parentheses.
    pub fn enclosed_clause(nodes: Vec<Node>) -> Self {
        Self::clause(nodes, ", ", true)
    }

    /// A correlated subquery node.
    pub fn subquery(query: SelectQuery) -> Self {
        Self::from_kind(NodeKind::Subquery(Box::new(query)))
    }

    /// A binary expression node.
    pub fn expr(lhs: Node, op: OpCode, rhs: Node, flat: bool) -> Self {
        Self::from_kind(NodeKind::Expression {
            lhs: Box::new(lhs),
            op,
            rhs: Box::new(rhs),
            flat,
        })
    }

    // ── Modifiers ────────────────────────────────────────────────────

    /// Attaches an `AS` alias.
    #[must_use]
    pub fn alias(mut self, name: impl Into<String>) -> Self {
        self.alias = Some(name.into());
        self
    }

    /// Marks this node as an ascending ordering term.
    #[must_use]
    pub const fn asc(mut self) -> Self {
        self.ordering = Some(SortOrder::Asc);
        self
    }

    /// Marks this node as a descending ordering term.
    #[must_use]
    pub const fn desc(mut self) -> Self {
        self.ordering = Some(SortOrder::Desc);
        self
    }

    // ── Comparison sugar ─────────────────────────────────────────────

    /// `self = rhs`; comparing against NULL produces `IS NULL`.
    #[must_use]
    pub fn eq(self, rhs: impl IntoNode) -> Self {
        let rhs = rhs.into_node();
        if rhs.is_null_value() {
            return Self::expr(self, OpCode::Is, Node::sql("NULL"), false);
        }
        Self::expr(self, OpCode::Eq, rhs, false)
    }

    /// `self != rhs`; comparing against NULL produces `IS NOT NULL`.
    #[must_use]
    pub fn ne(self, rhs: impl IntoNode) -> Self {
        let rhs = rhs.into_node();
        if rhs.is_null_value() {
            return Self::expr(self, OpCode::IsNot, Node::sql("NULL"), false);
        }
        Self::expr(self, OpCode::Ne, rhs, false)
    }

    /// `self < rhs`.
    #[must_use]
    pub fn lt(self, rhs: impl IntoNode) -> Self {
        Self::expr(self, OpCode::Lt, rhs.into_node(), false)
    }

    /// `self <= rhs`.
    #[must_use]
    pub fn lte(self, rhs: impl IntoNode) -> Self {
        Self::expr(self, OpCode::Lte, rhs.into_node(), false)
    }

    /// `self > rhs`.
    #[must_use]
    pub fn gt(self, rhs: impl IntoNode) -> Self {
        Self::expr(self, OpCode::Gt, rhs.into_node(), false)
    }

    /// `self >= rhs`.
    #[must_use]
    pub fn gte(self, rhs: impl IntoNode) -> Self {
        Self::expr(self, OpCode::Gte, rhs.into_node(), false)
    }

    /// Case-sensitive pattern match with a caller-supplied pattern.
    #[must_use]
    pub fn like(self, pattern: impl Into<String>) -> Self {
        Self::expr(self, OpCode::Like, Node::value(pattern.into()), false)
    }

    /// Case-insensitive pattern match with a caller-supplied pattern.
    #[must_use]
    pub fn ilike(self, pattern: impl Into<String>) -> Self {
        Self::expr(self, OpCode::ILike, Node::value(pattern.into()), false)
    }

    /// Regular-expression match.
    #[must_use]
    pub fn regexp(self, pattern: impl Into<String>) -> Self {
        Self::expr(self, OpCode::Regexp, Node::value(pattern.into()), false)
    }

    /// Membership in a literal value list.
    #[must_use]
    pub fn in_list<V: Into<Value>>(self, values: Vec<V>) -> Self {
        let list = values.into_iter().map(Into::into).collect();
        Self::expr(self, OpCode::In, Self::from_kind(NodeKind::List(list)), false)
    }

    /// Membership in a subquery's result.
    #[must_use]
    pub fn in_subquery(self, query: SelectQuery) -> Self {
        Self::expr(self, OpCode::In, Node::subquery(query), false)
    }

    /// `IS NULL` / `IS NOT NULL` test.
    #[must_use]
    pub fn is_null(self, null: bool) -> Self {
        let op = if null { OpCode::Is } else { OpCode::IsNot };
        Self::expr(self, op, Node::sql("NULL"), false)
    }

    /// `BETWEEN low AND high`.
    #[must_use]
    pub fn between(self, low: impl Into<Value>, high: impl Into<Value>) -> Self {
        let range = Node::clause(
            vec![Node::param(low), Node::sql("AND"), Node::param(high)],
            " ",
            false,
        );
        Self::expr(self, OpCode::Between, range, true)
    }

    /// Substring match (case-insensitive).
    #[must_use]
    pub fn contains(self, needle: impl Into<String>) -> Self {
        Self::expr(
            self,
            OpCode::ILike,
            Node::value(format!("%{}%", needle.into())),
            false,
        )
    }

    /// Prefix match (case-insensitive).
    #[must_use]
    pub fn startswith(self, prefix: impl Into<String>) -> Self {
        Self::expr(
            self,
            OpCode::ILike,
            Node::value(format!("{}%", prefix.into())),
            false,
        )
    }

    /// Suffix match (case-insensitive).
    #[must_use]
    pub fn endswith(self, suffix: impl Into<String>) -> Self {
        Self::expr(
            self,
            OpCode::ILike,
            Node::value(format!("%{}", suffix.into())),
            false,
        )
    }

    /// String concatenation.
    #[must_use]
    pub fn concat(self, rhs: impl IntoNode) -> Self {
        Self::expr(self, OpCode::Concat, rhs.into_node(), false)
    }

    /// Modulo.
    #[must_use]
    pub fn modulo(self, rhs: impl IntoNode) -> Self {
        Self::expr(self, OpCode::Mod, rhs.into_node(), false)
    }

    /// Returns the referenced field when this node is a bound column.
    pub fn as_field(&self) -> Option<&Arc<Field>> {
        match &self.kind {
            NodeKind::FieldRef { field, .. } => Some(field),
            _ => None,
        }
    }

    fn is_null_value(&self) -> bool {
        matches!(
            &self.kind,
            NodeKind::Value(Value::Null) | NodeKind::Param { value: Value::Null }
        )
    }
}

/// Conversion into a [`Node`], used by the comparison sugar so the right-hand
/// side can be another node or a plain Rust value.
pub trait IntoNode {
    /// Converts `self` into a node.
    fn into_node(self) -> Node;
}

impl IntoNode for Node {
    fn into_node(self) -> Node {
        self
    }
}

impl IntoNode for &Node {
    fn into_node(self) -> Node {
        self.clone()
    }
}

impl IntoNode for Value {
    fn into_node(self) -> Node {
        Node::value(self)
    }
}

macro_rules! impl_into_node_via_value {
    ($($t:ty),* $(,)?) => {
        $(
            impl IntoNode for $t {
                fn into_node(self) -> Node {
                    Node::value(Value::from(self))
                }
            }
        )*
    };
}

impl_into_node_via_value!(
    bool,
    i16,
    i32,
    i64,
    f32,
    f64,
    String,
    &str,
    chrono::NaiveDate,
    chrono::NaiveTime,
    chrono::NaiveDateTime,
);

impl ops::BitAnd for Node {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self::Output {
        Self::expr(self, OpCode::And, rhs, false)
    }
}

impl ops::BitOr for Node {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self::expr(self, OpCode::Or, rhs, false)
    }
}

impl ops::Not for Node {
    type Output = Self;

    /// Toggles the `negated` modifier.
    fn not(mut self) -> Self::Output {
        self.negated = !self.negated;
        self
    }
}

impl ops::Add for Node {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self::expr(self, OpCode::Add, rhs, false)
    }
}

impl ops::Sub for Node {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self::expr(self, OpCode::Sub, rhs, false)
    }
}

impl ops::Mul for Node {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self::Output {
        Self::expr(self, OpCode::Mul, rhs, false)
    }
}

impl ops::Div for Node {
    type Output = Self;

    fn div(self, rhs: Self) -> Self::Output {
        Self::expr(self, OpCode::Div, rhs, false)
    }
}

/// Shorthand constructors for common SQL functions.
pub mod fn_ {
    use super::Node;

    /// `COUNT(arg)`.
    pub fn count(arg: Node) -> Node {
        Node::func_no_coerce("COUNT", vec![arg])
    }

    /// `COUNT(1)`.
    pub fn count_star() -> Node {
        Node::func_no_coerce("COUNT", vec![Node::sql("1")])
    }

    /// `SUM(arg)`.
    pub fn sum(arg: Node) -> Node {
        Node::func("SUM", vec![arg])
    }

    /// `AVG(arg)`.
    pub fn avg(arg: Node) -> Node {
        Node::func_no_coerce("AVG", vec![arg])
    }

    /// `MIN(arg)`.
    pub fn min(arg: Node) -> Node {
        Node::func("MIN", vec![arg])
    }

    /// `MAX(arg)`.
    pub fn max(arg: Node) -> Node {
        Node::func("MAX", vec![arg])
    }

    /// `LOWER(arg)`.
    pub fn lower(arg: Node) -> Node {
        Node::func_no_coerce("LOWER", vec![arg])
    }

    /// `UPPER(arg)`.
    pub fn upper(arg: Node) -> Node {
        Node::func_no_coerce("UPPER", vec![arg])
    }

    /// `COALESCE(args...)`.
    pub fn coalesce(args: Vec<Node>) -> Node {
        Node::func("COALESCE", args)
    }

    /// `date_part(part, arg)`: extracts a timestamp component.
    pub fn date_part(part: &str, arg: Node) -> Node {
        Node::func_no_coerce("date_part", vec![Node::value(part), arg])
    }

    /// `date_trunc(kind, arg)`: truncates a timestamp.
    pub fn date_trunc(kind: &str, arg: Node) -> Node {
        Node::func_no_coerce("date_trunc", vec![Node::value(kind), arg])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::Field;

    fn field_node(name: &str) -> Node {
        Node::field_ref("User", Arc::new(Field::integer(name)))
    }

    #[test]
    fn test_eq_builds_expression() {
        let node = field_node("age").eq(5);
        match node.kind {
            NodeKind::Expression { op, rhs, .. } => {
                assert_eq!(op, OpCode::Eq);
                assert!(matches!(rhs.kind, NodeKind::Value(Value::Int(5))));
            }
            _ => panic!("Expected Expression"),
        }
    }

    #[test]
    fn test_eq_null_rewrites_to_is() {
        let node = field_node("age").eq(Value::Null);
        match node.kind {
            NodeKind::Expression { op, rhs, .. } => {
                assert_eq!(op, OpCode::Is);
                assert!(matches!(rhs.kind, NodeKind::Sql { ref value, .. } if value == "NULL"));
            }
            _ => panic!("Expected Expression"),
        }
    }

    #[test]
    fn test_ne_null_rewrites_to_is_not() {
        let node = field_node("age").ne(Value::Null);
        match node.kind {
            NodeKind::Expression { op, .. } => assert_eq!(op, OpCode::IsNot),
            _ => panic!("Expected Expression"),
        }
    }

    #[test]
    fn test_and_or_operators() {
        let combined = field_node("a").eq(1) & field_node("b").eq(2);
        match combined.kind {
            NodeKind::Expression { op, .. } => assert_eq!(op, OpCode::And),
            _ => panic!("Expected Expression"),
        }

        let either = field_node("a").eq(1) | field_node("b").eq(2);
        match either.kind {
            NodeKind::Expression { op, .. } => assert_eq!(op, OpCode::Or),
            _ => panic!("Expected Expression"),
        }
    }

    #[test]
    fn test_not_toggles_negated() {
        let node = field_node("a").eq(1);
        assert!(!node.negated);
        let negated = !node;
        assert!(negated.negated);
        let back = !negated;
        assert!(!back.negated);
    }

    #[test]
    fn test_clone_independence() {
        let original = field_node("a").eq(1).alias("x");
        let mut cloned = original.clone();
        cloned.alias = Some("y".to_string());
        cloned.negated = true;
        assert_eq!(original.alias.as_deref(), Some("x"));
        assert!(!original.negated);
    }

    #[test]
    fn test_in_list() {
        let node = field_node("id").in_list(vec![1_i64, 2, 3]);
        match node.kind {
            NodeKind::Expression { op, rhs, .. } => {
                assert_eq!(op, OpCode::In);
                match rhs.kind {
                    NodeKind::List(values) => assert_eq!(values.len(), 3),
                    _ => panic!("Expected List"),
                }
            }
            _ => panic!("Expected Expression"),
        }
    }

    #[test]
    fn test_between() {
        let node = field_node("age").between(18, 65);
        match node.kind {
            NodeKind::Expression { op, flat, .. } => {
                assert_eq!(op, OpCode::Between);
                assert!(flat);
            }
            _ => panic!("Expected Expression"),
        }
    }

    #[test]
    fn test_string_sugar_patterns() {
        let contains = field_node("name").contains("li");
        match contains.kind {
            NodeKind::Expression { op, rhs, .. } => {
                assert_eq!(op, OpCode::ILike);
                assert!(matches!(
                    rhs.kind,
                    NodeKind::Value(Value::String(ref s)) if s == "%li%"
                ));
            }
            _ => panic!("Expected Expression"),
        }

        let starts = field_node("name").startswith("al");
        match starts.kind {
            NodeKind::Expression { rhs, .. } => {
                assert!(matches!(
                    rhs.kind,
                    NodeKind::Value(Value::String(ref s)) if s == "al%"
                ));
            }
            _ => panic!("Expected Expression"),
        }
    }

    #[test]
    fn test_arithmetic_operators() {
        let node = field_node("price") * Node::value(2) + Node::value(1);
        match node.kind {
            NodeKind::Expression { op, .. } => assert_eq!(op, OpCode::Add),
            _ => panic!("Expected Expression"),
        }
    }

    #[test]
    fn test_ordering_modifiers() {
        let node = field_node("name").asc();
        assert_eq!(node.ordering, Some(SortOrder::Asc));
        let node = field_node("name").desc();
        assert_eq!(node.ordering, Some(SortOrder::Desc));
    }

    #[test]
    fn test_fn_helpers() {
        let node = fn_::count_star();
        match node.kind {
            NodeKind::Func { name, coerce, .. } => {
                assert_eq!(name, "COUNT");
                assert!(!coerce);
            }
            _ => panic!("Expected Func"),
        }

        let node = fn_::lower(field_node("name"));
        match node.kind {
            NodeKind::Func { name, args, .. } => {
                assert_eq!(name, "LOWER");
                assert_eq!(args.len(), 1);
            }
            _ => panic!("Expected Func"),
        }
    }
}
