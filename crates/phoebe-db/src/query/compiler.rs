//! The SQL compiler: pure translation from query objects to parameterized SQL.
//!
//! [`QueryCompiler`] walks the expression AST and a query object's accumulated
//! clauses and emits `(sql, params)`. Dialect differences (placeholder style,
//! quoting, operator tokens, column types, capability flags) live entirely in
//! [`Dialect`]; the compiler's control flow is shared by all backends.

use crate::ast::{Node, NodeKind, OpCode, SortOrder};
use crate::fields::{Field, FieldKind};
use crate::query::compound::CompoundOp;
use crate::query::select::SelectQuery;
use crate::query::JoinEdge;
use crate::schema::{ModelSchema, PrimaryKeyDef};
use crate::value::Value;
use md5::{Digest, Md5};
use phoebe_core::{OrmError, OrmResult};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;

/// Identifier length limit shared by the dialects we target; longer index
/// names are hashed down to fit.
const MAX_INDEX_NAME: usize = 64;

/// A database backend's rendering and capability profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// SQLite.
    Sqlite,
    /// PostgreSQL.
    Postgres,
    /// MySQL.
    MySql,
}

impl Dialect {
    /// The identifier quote character.
    pub const fn quote_char(self) -> char {
        match self {
            Self::Sqlite | Self::Postgres => '"',
            Self::MySql => '`',
        }
    }

    /// Quotes an identifier.
    pub fn quote(self, ident: &str) -> String {
        let q = self.quote_char();
        format!("{q}{ident}{q}")
    }

    /// Returns a parameter placeholder for the given 1-based index.
    pub fn placeholder(self, index: usize) -> String {
        match self {
            Self::Postgres => format!("${index}"),
            Self::Sqlite | Self::MySql => "?".to_string(),
        }
    }

    /// Maps a logical operator onto this dialect's SQL token.
    ///
    /// SQLite has no case-sensitivity distinction at the operator level, so
    /// logical ILIKE maps to its case-insensitive `LIKE` and logical LIKE to
    /// the case-sensitive `GLOB`.
    pub const fn op_token(self, op: OpCode) -> &'static str {
        match op {
            OpCode::And => "AND",
            OpCode::Or => "OR",
            OpCode::Eq => "=",
            OpCode::Lt => "<",
            OpCode::Lte => "<=",
            OpCode::Gt => ">",
            OpCode::Gte => ">=",
            OpCode::Ne => "!=",
            OpCode::In => "IN",
            OpCode::Is => "IS",
            OpCode::IsNot => "IS NOT",
            OpCode::Like => match self {
                Self::Sqlite => "GLOB",
                Self::Postgres | Self::MySql => "LIKE",
            },
            OpCode::ILike => match self {
                Self::Postgres => "ILIKE",
                Self::Sqlite | Self::MySql => "LIKE",
            },
            OpCode::Between => "BETWEEN",
            OpCode::Regexp => match self {
                Self::Postgres => "~",
                Self::Sqlite | Self::MySql => "REGEXP",
            },
            OpCode::Add => "+",
            OpCode::Sub => "-",
            OpCode::Mul => "*",
            OpCode::Div => "/",
            OpCode::Mod => "%",
            OpCode::Concat => "||",
        }
    }

    /// Maps a field onto this dialect's column type.
    pub fn column_type(self, field: &Field) -> OrmResult<String> {
        let kind = if field.is_foreign_key() {
            match &field.rel_target {
                Some(target) => &target.kind,
                None => {
                    return Err(OrmError::ImproperlyConfigured(format!(
                        "foreign key '{}' was never bound to its target",
                        field.name
                    )))
                }
            }
        } else {
            &field.kind
        };
        let auto_increment = field.primary_key && !field.is_foreign_key();
        let ty = match kind {
            FieldKind::PrimaryKey if auto_increment => match self {
                Self::Sqlite => "INTEGER".to_string(),
                Self::Postgres => "SERIAL".to_string(),
                Self::MySql => "INTEGER AUTO_INCREMENT".to_string(),
            },
            // A column referencing an auto key stores a plain integer.
            FieldKind::PrimaryKey => "INTEGER".to_string(),
            FieldKind::Integer => "INTEGER".to_string(),
            FieldKind::BigInteger => "BIGINT".to_string(),
            FieldKind::Float => match self {
                Self::Sqlite | Self::Postgres => "REAL".to_string(),
                Self::MySql => "FLOAT".to_string(),
            },
            FieldKind::Double => match self {
                Self::Sqlite => "REAL".to_string(),
                Self::Postgres | Self::MySql => "DOUBLE PRECISION".to_string(),
            },
            FieldKind::Decimal {
                max_digits,
                decimal_places,
                ..
            } => match self {
                Self::Postgres => format!("NUMERIC({max_digits}, {decimal_places})"),
                Self::Sqlite | Self::MySql => {
                    format!("DECIMAL({max_digits}, {decimal_places})")
                }
            },
            FieldKind::Char { max_length } => format!("VARCHAR({max_length})"),
            FieldKind::Text => "TEXT".to_string(),
            FieldKind::Boolean => match self {
                Self::Sqlite => "SMALLINT".to_string(),
                Self::Postgres => "BOOLEAN".to_string(),
                Self::MySql => "BOOL".to_string(),
            },
            FieldKind::Date => "DATE".to_string(),
            FieldKind::Time => "TIME".to_string(),
            FieldKind::DateTime => match self {
                Self::Postgres => "TIMESTAMP".to_string(),
                Self::Sqlite | Self::MySql => "DATETIME".to_string(),
            },
            FieldKind::Blob => match self {
                Self::Postgres => "BYTEA".to_string(),
                Self::Sqlite | Self::MySql => "BLOB".to_string(),
            },
            FieldKind::ForeignKey { .. } => {
                return Err(OrmError::ImproperlyConfigured(format!(
                    "foreign key '{}' references another foreign key",
                    field.name
                )))
            }
        };
        Ok(ty)
    }

    /// The compound set operations this dialect supports.
    pub const fn compound_operations(self) -> &'static [CompoundOp] {
        match self {
            Self::Sqlite | Self::Postgres => &[
                CompoundOp::Union,
                CompoundOp::UnionAll,
                CompoundOp::Intersect,
                CompoundOp::Except,
            ],
            Self::MySql => &[CompoundOp::Union, CompoundOp::UnionAll],
        }
    }

    /// Whether multi-row INSERT is supported.
    pub const fn insert_many(self) -> bool {
        true
    }

    /// Whether `SELECT ... FOR UPDATE` is supported.
    pub const fn for_update(self) -> bool {
        !matches!(self, Self::Sqlite)
    }

    /// Whether `FOR UPDATE NOWAIT` is supported.
    pub const fn nowait(self) -> bool {
        matches!(self, Self::Postgres)
    }

    /// Whether sequences can be created and dropped.
    pub const fn sequences(self) -> bool {
        matches!(self, Self::Postgres)
    }

    /// The stand-in "unlimited" LIMIT used when only an OFFSET is given and
    /// the dialect requires a LIMIT clause to use OFFSET.
    pub const fn limit_max(self) -> Option<&'static str> {
        match self {
            Self::Sqlite => Some("-1"),
            Self::MySql => Some("18446744073709551615"),
            Self::Postgres => None,
        }
    }
}

/// Table aliases assigned for one compilation: `t1`, `t2`, ... in traversal
/// order, with a model's fixed `table_alias` taking precedence.
pub(crate) struct AliasMap {
    positions: Vec<(Arc<ModelSchema>, String)>,
    by_name: HashMap<String, String>,
    end_offset: usize,
}

impl AliasMap {
    fn build(query: &SelectQuery, offset: usize) -> Self {
        let models = query.models();
        let mut positions = Vec::with_capacity(models.len());
        let mut by_name = HashMap::new();
        for (i, schema) in models.into_iter().enumerate() {
            let alias = schema
                .table_alias
                .clone()
                .unwrap_or_else(|| format!("t{}", offset + i + 1));
            by_name
                .entry(schema.name.clone())
                .or_insert_with(|| alias.clone());
            positions.push((schema, alias));
        }
        Self {
            end_offset: offset + positions.len(),
            positions,
            by_name,
        }
    }

    fn alias_for(&self, model: &str) -> Option<&str> {
        self.by_name.get(model).map(String::as_str)
    }

    fn position(&self, idx: usize) -> &(Arc<ModelSchema>, String) {
        &self.positions[idx]
    }
}

/// The pure SQL compiler for one dialect.
#[derive(Debug, Clone, Copy)]
pub struct QueryCompiler {
    dialect: Dialect,
}

impl QueryCompiler {
    /// Creates a compiler for the given dialect.
    pub const fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }

    /// The dialect this compiler renders for.
    pub const fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn quote(&self, ident: &str) -> String {
        self.dialect.quote(ident)
    }

    fn table_reference(&self, schema: &ModelSchema) -> String {
        match &schema.schema {
            Some(ns) => format!("{}.{}", self.quote(ns), self.quote(&schema.db_table)),
            None => self.quote(&schema.db_table),
        }
    }

    // ── Node rendering ───────────────────────────────────────────────

    /// Renders a single node with no table qualification (used by tests and
    /// single-table statements).
    pub fn parse_node(&self, node: &Node) -> OrmResult<(String, Vec<Value>)> {
        let mut params = Vec::new();
        let sql = self.render_node(node, None, None, &mut params)?;
        Ok((sql, params))
    }

    fn render_node(
        &self,
        node: &Node,
        aliases: Option<&AliasMap>,
        conv: Option<&Field>,
        params: &mut Vec<Value>,
    ) -> OrmResult<String> {
        let base = match &node.kind {
            NodeKind::Expression { lhs, op, rhs, flat } => {
                // A bound field on either side becomes the conversion context
                // for raw values on the other.
                let conv_field: Option<&Field> = lhs
                    .as_field()
                    .or_else(|| rhs.as_field())
                    .map(AsRef::as_ref)
                    .or(conv);
                let lhs_sql = self.render_node(lhs, aliases, conv_field, params)?;
                let rhs_sql = self.render_node(rhs, aliases, conv_field, params)?;
                let body = format!("{lhs_sql} {} {rhs_sql}", self.dialect.op_token(*op));
                if *flat {
                    body
                } else {
                    format!("({body})")
                }
            }
            NodeKind::Clause {
                nodes,
                glue,
                parens,
            } => {
                let parts: Vec<String> = nodes
                    .iter()
                    .map(|n| self.render_node(n, aliases, conv, params))
                    .collect::<OrmResult<_>>()?;
                let body = parts.join(glue);
                if *parens {
                    format!("({body})")
                } else {
                    body
                }
            }
            NodeKind::Sql {
                value,
                params: raw_params,
            } => {
                params.extend(raw_params.iter().cloned());
                value.clone()
            }
            NodeKind::Param { value } => {
                let bound = match conv {
                    Some(field) => field.db_value(value.clone())?,
                    None => value.clone(),
                };
                params.push(bound);
                self.dialect.placeholder(params.len())
            }
            NodeKind::Entity { path } => path
                .iter()
                .map(|part| self.quote(part))
                .collect::<Vec<_>>()
                .join("."),
            NodeKind::Func { name, args, .. } => {
                let parts: Vec<String> = args
                    .iter()
                    .map(|a| self.render_node(a, aliases, conv, params))
                    .collect::<OrmResult<_>>()?;
                format!("{name}({})", parts.join(", "))
            }
            NodeKind::FieldRef { model, field } => {
                let column = self.quote(&field.db_column);
                match aliases.and_then(|a| a.alias_for(model)) {
                    Some(alias) => format!("{}.{column}", self.quote(alias)),
                    None => column,
                }
            }
            NodeKind::Subquery(inner) => {
                let mut subquery = (**inner).clone();
                // An inner query with no explicit projection selects the
                // conversion field's target, falling back to its primary key.
                if subquery.projection.is_empty() {
                    let field_name = conv
                        .and_then(|c| c.rel_target.as_ref())
                        .map(|t| t.name.clone())
                        .filter(|n| subquery.model.field(n).is_some())
                        .or_else(|| subquery.model.pk_name().map(String::from));
                    if let Some(name) = field_name {
                        if let Some(field) = subquery.model.field(&name) {
                            subquery.projection = vec![Node::field_ref(
                                subquery.model.name.clone(),
                                field.clone(),
                            )];
                        }
                    }
                }
                let offset = aliases.map_or(0, |a| a.end_offset);
                let inner_sql = self.select_into(&subquery, offset, params)?;
                format!("({inner_sql})")
            }
            NodeKind::Value(value) => {
                let bound = match conv {
                    Some(field) => field.db_value(value.clone())?,
                    None => value.clone(),
                };
                params.push(bound);
                self.dialect.placeholder(params.len())
            }
            NodeKind::List(values) => {
                let parts: Vec<String> = values
                    .iter()
                    .map(|v| {
                        let bound = match conv {
                            Some(field) => field.db_value(v.clone())?,
                            None => v.clone(),
                        };
                        params.push(bound);
                        Ok(self.dialect.placeholder(params.len()))
                    })
                    .collect::<OrmResult<_>>()?;
                format!("({})", parts.join(", "))
            }
        };

        let mut sql = if node.negated {
            format!("NOT ({base})")
        } else {
            base
        };
        if let Some(alias) = &node.alias {
            let _ = write!(sql, " AS {}", self.quote(alias));
        }
        match node.ordering {
            Some(SortOrder::Asc) => sql.push_str(" ASC"),
            Some(SortOrder::Desc) => sql.push_str(" DESC"),
            None => {}
        }
        Ok(sql)
    }

    // ── SELECT ───────────────────────────────────────────────────────

    /// Compiles a SELECT query into SQL and parameters.
    pub fn generate_select(&self, query: &SelectQuery) -> OrmResult<(String, Vec<Value>)> {
        let mut params = Vec::new();
        let sql = self.select_into(query, 0, &mut params)?;
        Ok((sql, params))
    }

    /// Compiles a SELECT into an existing parameter list, so compound parts
    /// share one placeholder numbering.
    pub(crate) fn select_into_shared(
        &self,
        query: &SelectQuery,
        params: &mut Vec<Value>,
    ) -> OrmResult<String> {
        self.select_into(query, 0, params)
    }

    fn select_into(
        &self,
        query: &SelectQuery,
        alias_offset: usize,
        params: &mut Vec<Value>,
    ) -> OrmResult<String> {
        let aliases = AliasMap::build(query, alias_offset);

        let mut sql = String::from("SELECT ");
        if query.distinct {
            sql.push_str("DISTINCT ");
        }

        let projection = query.effective_projection();
        let cols: Vec<String> = projection
            .iter()
            .map(|n| self.render_node(n, Some(&aliases), None, params))
            .collect::<OrmResult<_>>()?;
        sql.push_str(&cols.join(", "));

        let (root, root_alias) = aliases.position(0);
        let _ = write!(
            sql,
            " FROM {} AS {}",
            self.table_reference(root),
            self.quote(root_alias)
        );

        self.generate_joins(query, &aliases, &mut sql, params)?;

        if let Some(where_clause) = &query.where_clause {
            sql.push_str(" WHERE ");
            sql.push_str(&self.render_node(where_clause, Some(&aliases), None, params)?);
        }

        if !query.group_by.is_empty() {
            let parts: Vec<String> = query
                .group_by
                .iter()
                .map(|n| self.render_node(n, Some(&aliases), None, params))
                .collect::<OrmResult<_>>()?;
            let _ = write!(sql, " GROUP BY {}", parts.join(", "));
        }

        if let Some(having) = &query.having {
            sql.push_str(" HAVING ");
            sql.push_str(&self.render_node(having, Some(&aliases), None, params)?);
        }

        if !query.order_by.is_empty() {
            let parts: Vec<String> = query
                .order_by
                .iter()
                .map(|n| self.render_node(n, Some(&aliases), None, params))
                .collect::<OrmResult<_>>()?;
            let _ = write!(sql, " ORDER BY {}", parts.join(", "));
        }

        match (query.limit, query.offset) {
            (Some(limit), offset) => {
                let _ = write!(sql, " LIMIT {limit}");
                if let Some(offset) = offset {
                    let _ = write!(sql, " OFFSET {offset}");
                }
            }
            (None, Some(offset)) => {
                // Some dialects cannot express OFFSET without a LIMIT.
                if let Some(limit_max) = self.dialect.limit_max() {
                    let _ = write!(sql, " LIMIT {limit_max}");
                }
                let _ = write!(sql, " OFFSET {offset}");
            }
            (None, None) => {}
        }

        if query.for_update {
            if !self.dialect.for_update() {
                return Err(OrmError::NotSupportedError(
                    "FOR UPDATE is not supported by this dialect".to_string(),
                ));
            }
            sql.push_str(" FOR UPDATE");
            if query.nowait {
                if !self.dialect.nowait() {
                    return Err(OrmError::NotSupportedError(
                        "FOR UPDATE NOWAIT is not supported by this dialect".to_string(),
                    ));
                }
                sql.push_str(" NOWAIT");
            }
        }

        Ok(sql)
    }

    /// Renders the join clauses, resolving the foreign-key relationship
    /// automatically for joins without an explicit ON expression.
    ///
    /// The edge list is walked with a visited set so cyclic join graphs
    /// cannot loop forever.
    fn generate_joins(
        &self,
        query: &SelectQuery,
        aliases: &AliasMap,
        sql: &mut String,
        params: &mut Vec<Value>,
    ) -> OrmResult<()> {
        let mut visited: Vec<usize> = Vec::new();
        let mut stack: Vec<usize> = (0..query.joins.len()).rev().collect();

        while let Some(idx) = stack.pop() {
            if visited.contains(&idx) {
                continue;
            }
            visited.push(idx);

            let JoinEdge { src, join } = &query.joins[idx];
            let (dest_schema, dest_alias) = aliases.position(idx + 1);
            let src_alias = aliases.alias_for(src).ok_or_else(|| {
                OrmError::ProgrammingError(format!("join source '{src}' is not part of the query"))
            })?;

            let on_sql = if let Some(on) = &join.on {
                self.render_node(on, Some(aliases), None, params)?
            } else {
                self.resolve_join_condition(query, src, src_alias, dest_schema, dest_alias)?
            };

            let _ = write!(
                sql,
                " {} {} AS {} ON {on_sql}",
                join.kind.sql_keyword(),
                self.table_reference(dest_schema),
                self.quote(dest_alias)
            );
        }
        Ok(())
    }

    /// Finds the FK edge between two joined models, inspecting both
    /// directions.
    fn resolve_join_condition(
        &self,
        query: &SelectQuery,
        src_name: &str,
        src_alias: &str,
        dest: &Arc<ModelSchema>,
        dest_alias: &str,
    ) -> OrmResult<String> {
        let src = query
            .models()
            .into_iter()
            .find(|m| m.name == src_name)
            .ok_or_else(|| {
                OrmError::ProgrammingError(format!(
                    "join source '{src_name}' is not part of the query"
                ))
            })?;

        if let Some(rel) = src.rel_for(&dest.name) {
            let fk_col = src
                .field(&rel.field)
                .map(|f| f.db_column.clone())
                .unwrap_or_else(|| rel.field.clone());
            let to_col = dest
                .field(&rel.to_field)
                .map(|f| f.db_column.clone())
                .unwrap_or_else(|| rel.to_field.clone());
            return Ok(format!(
                "{}.{} = {}.{}",
                self.quote(src_alias),
                self.quote(&fk_col),
                self.quote(dest_alias),
                self.quote(&to_col)
            ));
        }
        if let Some(rel) = dest.rel_for(&src.name) {
            let fk_col = dest
                .field(&rel.field)
                .map(|f| f.db_column.clone())
                .unwrap_or_else(|| rel.field.clone());
            let to_col = src
                .field(&rel.to_field)
                .map(|f| f.db_column.clone())
                .unwrap_or_else(|| rel.to_field.clone());
            return Ok(format!(
                "{}.{} = {}.{}",
                self.quote(dest_alias),
                self.quote(&fk_col),
                self.quote(src_alias),
                self.quote(&to_col)
            ));
        }
        Err(OrmError::ProgrammingError(format!(
            "no foreign key between '{src_name}' and '{}' and no ON expression given",
            dest.name
        )))
    }

    // ── INSERT / UPDATE / DELETE ─────────────────────────────────────

    /// Compiles an INSERT statement over pre-normalized rows (uniform
    /// columns, field names as keys).
    pub fn generate_insert(
        &self,
        schema: &ModelSchema,
        rows: &[Vec<(String, Value)>],
        upsert: bool,
    ) -> OrmResult<(String, Vec<Value>)> {
        let Some(first) = rows.first() else {
            return Err(OrmError::ProgrammingError(
                "cannot insert zero rows".to_string(),
            ));
        };

        let command = if upsert {
            if self.dialect != Dialect::Sqlite {
                return Err(OrmError::NotSupportedError(
                    "INSERT OR REPLACE is a SQLite-specific idiom".to_string(),
                ));
            }
            "INSERT OR REPLACE INTO"
        } else {
            "INSERT INTO"
        };

        if first.is_empty() {
            let sql = match self.dialect {
                Dialect::MySql => format!("{command} {} () VALUES ()", self.table_reference(schema)),
                _ => format!("{command} {} DEFAULT VALUES", self.table_reference(schema)),
            };
            return Ok((sql, Vec::new()));
        }

        let columns: Vec<String> = first
            .iter()
            .map(|(name, _)| {
                schema.field(name).map_or_else(
                    || self.quote(name),
                    |f| self.quote(&f.db_column),
                )
            })
            .collect();

        let mut params = Vec::new();
        let mut groups = Vec::with_capacity(rows.len());
        for row in rows {
            let placeholders: Vec<String> = row
                .iter()
                .map(|(name, value)| {
                    let bound = match schema.field(name) {
                        Some(field) => field.db_value(value.clone())?,
                        None => value.clone(),
                    };
                    params.push(bound);
                    Ok(self.dialect.placeholder(params.len()))
                })
                .collect::<OrmResult<_>>()?;
            groups.push(format!("({})", placeholders.join(", ")));
        }

        let sql = format!(
            "{command} {} ({}) VALUES {}",
            self.table_reference(schema),
            columns.join(", "),
            groups.join(", ")
        );
        Ok((sql, params))
    }

    /// Compiles an UPDATE statement.
    pub fn generate_update(
        &self,
        schema: &ModelSchema,
        sets: &[(String, Node)],
        where_clause: Option<&Node>,
    ) -> OrmResult<(String, Vec<Value>)> {
        if sets.is_empty() {
            return Err(OrmError::ProgrammingError(
                "UPDATE requires at least one assignment".to_string(),
            ));
        }
        let mut params = Vec::new();
        let assignments: Vec<String> = sets
            .iter()
            .map(|(name, value)| {
                let field = schema.field(name).ok_or_else(|| {
                    OrmError::ProgrammingError(format!(
                        "model '{}' has no field '{name}'",
                        schema.name
                    ))
                })?;
                let rendered =
                    self.render_node(value, None, Some(field.as_ref()), &mut params)?;
                Ok(format!("{} = {rendered}", self.quote(&field.db_column)))
            })
            .collect::<OrmResult<_>>()?;

        let mut sql = format!(
            "UPDATE {} SET {}",
            self.table_reference(schema),
            assignments.join(", ")
        );
        if let Some(where_clause) = where_clause {
            sql.push_str(" WHERE ");
            sql.push_str(&self.render_node(where_clause, None, None, &mut params)?);
        }
        Ok((sql, params))
    }

    /// Compiles a DELETE statement.
    pub fn generate_delete(
        &self,
        schema: &ModelSchema,
        where_clause: Option<&Node>,
    ) -> OrmResult<(String, Vec<Value>)> {
        let mut params = Vec::new();
        let mut sql = format!("DELETE FROM {}", self.table_reference(schema));
        if let Some(where_clause) = where_clause {
            sql.push_str(" WHERE ");
            sql.push_str(&self.render_node(where_clause, None, None, &mut params)?);
        }
        Ok((sql, params))
    }

    // ── DDL ──────────────────────────────────────────────────────────

    /// Renders one column definition, including inline foreign-key
    /// references.
    pub fn field_definition(&self, schema: &ModelSchema, field: &Field) -> OrmResult<String> {
        let mut parts = vec![
            self.quote(&field.db_column),
            self.dialect.column_type(field)?,
        ];
        if !field.null {
            parts.push("NOT NULL".to_string());
        }
        if field.primary_key && matches!(schema.primary_key, PrimaryKeyDef::Single(_)) {
            parts.push("PRIMARY KEY".to_string());
        }
        if let Some(sequence) = &field.sequence {
            if self.dialect.sequences() {
                parts.push(format!("DEFAULT NEXTVAL('{sequence}')"));
            }
        }
        if let Some(rel) = schema.rel.get(&field.name) {
            let target_table = if rel.to_model == schema.name {
                self.table_reference(schema)
            } else {
                let registry = schema.registry()?;
                let target = registry.get(&rel.to_model)?;
                self.table_reference(target.schema())
            };
            let to_column = field
                .rel_target
                .as_ref()
                .map_or_else(|| rel.to_field.clone(), |t| t.db_column.clone());
            parts.push(format!(
                "REFERENCES {target_table} ({})",
                self.quote(&to_column)
            ));
            if let FieldKind::ForeignKey {
                on_delete: Some(action),
                ..
            } = &field.kind
            {
                parts.push(format!("ON DELETE {action}"));
            }
        }
        parts.extend(field.constraints.iter().cloned());
        Ok(parts.join(" "))
    }

    /// Renders `CREATE TABLE [IF NOT EXISTS]`.
    pub fn create_table(&self, schema: &ModelSchema, safe: bool) -> OrmResult<String> {
        let safe_clause = if safe { "IF NOT EXISTS " } else { "" };
        let mut defs: Vec<String> = schema
            .fields
            .iter()
            .map(|f| self.field_definition(schema, f))
            .collect::<OrmResult<_>>()?;

        if let PrimaryKeyDef::Composite(parts) = &schema.primary_key {
            let cols: Vec<String> = parts
                .iter()
                .map(|name| {
                    schema
                        .field(name)
                        .map_or_else(|| self.quote(name), |f| self.quote(&f.db_column))
                })
                .collect();
            defs.push(format!("PRIMARY KEY ({})", cols.join(", ")));
        }
        defs.extend(schema.constraints.iter().cloned());

        Ok(format!(
            "CREATE TABLE {safe_clause}{} ({})",
            self.table_reference(schema),
            defs.join(", ")
        ))
    }

    /// Renders `DROP TABLE [IF EXISTS] [CASCADE]`.
    pub fn drop_table(&self, schema: &ModelSchema, safe: bool, cascade: bool) -> String {
        let safe_clause = if safe { "IF EXISTS " } else { "" };
        let cascade_clause = if cascade { " CASCADE" } else { "" };
        format!(
            "DROP TABLE {safe_clause}{}{cascade_clause}",
            self.table_reference(schema)
        )
    }

    /// Computes a deterministic index name, hashing names that exceed the
    /// identifier length limit.
    pub fn index_name(table: &str, columns: &[String]) -> String {
        let base = format!("{table}_{}", columns.join("_"));
        if base.len() <= MAX_INDEX_NAME {
            return base;
        }
        let digest: String = Md5::digest(base.as_bytes())
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect();
        format!("{}_{}", &base[..MAX_INDEX_NAME - 9], &digest[..8])
    }

    /// Renders `CREATE [UNIQUE] INDEX`.
    pub fn create_index(
        &self,
        schema: &ModelSchema,
        columns: &[String],
        unique: bool,
        safe: bool,
    ) -> String {
        let unique_clause = if unique { "UNIQUE " } else { "" };
        let safe_clause = if safe { "IF NOT EXISTS " } else { "" };
        let name = Self::index_name(&schema.db_table, columns);
        let cols: Vec<String> = columns.iter().map(|c| self.quote(c)).collect();
        format!(
            "CREATE {unique_clause}INDEX {safe_clause}{} ON {} ({})",
            self.quote(&name),
            self.table_reference(schema),
            cols.join(", ")
        )
    }

    /// Renders `ALTER TABLE ... ADD CONSTRAINT ... FOREIGN KEY`.
    pub fn create_foreign_key(&self, schema: &ModelSchema, field: &Field) -> OrmResult<String> {
        let rel = schema.rel.get(&field.name).ok_or_else(|| {
            OrmError::ProgrammingError(format!(
                "'{}' is not a foreign key on '{}'",
                field.name, schema.name
            ))
        })?;
        let registry = schema.registry()?;
        let target = if rel.to_model == schema.name {
            self.table_reference(schema)
        } else {
            self.table_reference(registry.get(&rel.to_model)?.schema())
        };
        let to_column = field
            .rel_target
            .as_ref()
            .map_or_else(|| rel.to_field.clone(), |t| t.db_column.clone());
        let constraint = format!("fk_{}_{}", schema.db_table, field.db_column);
        Ok(format!(
            "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {target} ({})",
            self.table_reference(schema),
            self.quote(&constraint),
            self.quote(&field.db_column),
            self.quote(&to_column)
        ))
    }

    /// Renders `CREATE SEQUENCE`, gated by the dialect capability flag.
    pub fn create_sequence(&self, name: &str) -> OrmResult<String> {
        if !self.dialect.sequences() {
            return Err(OrmError::NotSupportedError(
                "sequences are not supported by this dialect".to_string(),
            ));
        }
        Ok(format!("CREATE SEQUENCE IF NOT EXISTS {}", self.quote(name)))
    }

    /// Renders `DROP SEQUENCE`, gated by the dialect capability flag.
    pub fn drop_sequence(&self, name: &str) -> OrmResult<String> {
        if !self.dialect.sequences() {
            return Err(OrmError::NotSupportedError(
                "sequences are not supported by this dialect".to_string(),
            ));
        }
        Ok(format!("DROP SEQUENCE IF EXISTS {}", self.quote(name)))
    }
}
