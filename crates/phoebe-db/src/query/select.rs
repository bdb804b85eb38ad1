//! The SELECT query builder.
//!
//! A [`SelectQuery`] accumulates AST fragments through chained calls; nothing
//! touches the database until a terminal method (`execute`, `count`, `get`,
//! ...) runs. Every mutator clones the receiver and returns the clone; the
//! receiver is never mutated in place, so an existing query keeps working as
//! a template no matter what is derived from it.

use crate::ast::{fn_, Node};
use crate::executor::DbExecutor;
use crate::model::Instance;
use crate::query::compiler::QueryCompiler;
use crate::query::dq::DQ;
use crate::query::results::{
    InstanceMapper, InstanceRows, JoinLink, ProjectedColumn, ResultWrapper, RowCursor,
};
use crate::query::{DictRows, Join, JoinEdge, JoinKind, RowShape, TupleRows};
use crate::schema::{Model, ModelSchema};
use crate::value::Value;
use phoebe_core::{OrmError, OrmResult};
use std::sync::Arc;

/// A lazy, composable SELECT query.
#[derive(Debug, Clone)]
pub struct SelectQuery {
    pub(crate) model: Arc<ModelSchema>,
    pub(crate) projection: Vec<Node>,
    pub(crate) joins: Vec<JoinEdge>,
    pub(crate) where_clause: Option<Node>,
    pub(crate) group_by: Vec<Node>,
    pub(crate) having: Option<Node>,
    pub(crate) order_by: Vec<Node>,
    pub(crate) limit: Option<u64>,
    pub(crate) offset: Option<u64>,
    pub(crate) distinct: bool,
    pub(crate) for_update: bool,
    pub(crate) nowait: bool,
    pub(crate) shape: RowShape,
    pub(crate) query_ctx: Arc<ModelSchema>,
}

impl Model {
    /// Builds a SELECT over this model, pre-applying the model's default
    /// ordering if one was declared.
    pub fn select(&self) -> SelectQuery {
        let mut query = SelectQuery::new(self.schema().clone());
        for (field_name, desc) in &self.schema().order_by {
            if let Some(field) = self.schema().field(field_name) {
                let node = Node::field_ref(self.schema().name.clone(), field.clone());
                query
                    .order_by
                    .push(if *desc { node.desc() } else { node.asc() });
            }
        }
        query
    }

    /// Builds a SELECT with an explicit projection.
    pub fn select_cols(&self, columns: Vec<Node>) -> SelectQuery {
        self.select().projection(columns)
    }

    /// All of this model's columns as reference nodes, for building explicit
    /// multi-model projections.
    pub fn star(&self) -> Vec<Node> {
        self.schema()
            .fields
            .iter()
            .map(|f| Node::field_ref(self.schema().name.clone(), f.clone()))
            .collect()
    }

    /// Executes a single-row lookup filtered by the given expressions.
    ///
    /// Returns `DoesNotExist` on an empty result; more than one row is not
    /// special-cased: the first row wins.
    pub async fn get(&self, db: &dyn DbExecutor, exprs: Vec<Node>) -> OrmResult<Instance> {
        let mut query = self.select().naive();
        for expr in exprs {
            query = query.where_(expr);
        }
        query.get(db).await
    }

    /// Inserts a new row and returns it as an instance.
    pub async fn create(&self, db: &dyn DbExecutor, row: Vec<(&str, Value)>) -> OrmResult<Instance> {
        let mut instance = self.instance();
        for (name, value) in row {
            instance.set(name, value)?;
        }
        instance.save(db, true).await?;
        Ok(instance)
    }

    /// Fetches the row matching `row`'s field/value pairs, creating it if it
    /// does not exist. Returns the instance and whether it was created.
    pub async fn get_or_create(
        &self,
        db: &dyn DbExecutor,
        row: Vec<(&str, Value)>,
    ) -> OrmResult<(Instance, bool)> {
        let exprs: OrmResult<Vec<Node>> = row
            .iter()
            .map(|(name, value)| Ok(self.try_f(name)?.eq(value.clone())))
            .collect();
        match self.get(db, exprs?).await {
            Ok(instance) => Ok((instance, false)),
            Err(err) if err.is_does_not_exist() => {
                let instance = self.create(db, row).await?;
                Ok((instance, true))
            }
            Err(err) => Err(err),
        }
    }
}

impl SelectQuery {
    pub(crate) fn new(model: Arc<ModelSchema>) -> Self {
        Self {
            query_ctx: model.clone(),
            model,
            projection: Vec::new(),
            joins: Vec::new(),
            where_clause: None,
            group_by: Vec::new(),
            having: None,
            order_by: Vec::new(),
            limit: None,
            offset: None,
            distinct: false,
            for_update: false,
            nowait: false,
            shape: RowShape::Model,
        }
    }

    /// The root model of the query.
    pub fn model(&self) -> &Arc<ModelSchema> {
        &self.model
    }

    /// Every model involved: the root first, then join targets in edge order.
    pub(crate) fn models(&self) -> Vec<Arc<ModelSchema>> {
        let mut models = Vec::with_capacity(self.joins.len() + 1);
        models.push(self.model.clone());
        models.extend(self.joins.iter().map(|edge| edge.join.dest.clone()));
        models
    }

    /// The projection actually compiled: the explicit one, or every column of
    /// the root model.
    pub(crate) fn effective_projection(&self) -> Vec<Node> {
        if self.projection.is_empty() {
            self.model
                .fields
                .iter()
                .map(|f| Node::field_ref(self.model.name.clone(), f.clone()))
                .collect()
        } else {
            self.projection.clone()
        }
    }

    // ── Mutators (clone-on-mutate) ───────────────────────────────────

    /// Replaces the projection.
    #[must_use]
    pub fn projection(&self, columns: Vec<Node>) -> Self {
        let mut query = self.clone();
        query.projection = columns;
        query
    }

    /// ANDs an expression onto the WHERE clause.
    #[must_use]
    pub fn where_(&self, expr: Node) -> Self {
        let mut query = self.clone();
        query.where_clause = Some(match query.where_clause.take() {
            Some(existing) => existing & expr,
            None => expr,
        });
        query
    }

    /// Joins another model, switching the query context to it.
    ///
    /// Requires a discoverable foreign key between the current context model
    /// and the target (in either direction) or an explicit `on` expression.
    pub fn join(&self, model: &Model, kind: JoinKind, on: Option<Node>) -> OrmResult<Self> {
        let dest = model.schema();
        if on.is_none()
            && self.query_ctx.rel_for(&dest.name).is_none()
            && dest.rel_for(&self.query_ctx.name).is_none()
        {
            return Err(OrmError::ProgrammingError(format!(
                "no foreign key between '{}' and '{}' and no ON expression given",
                self.query_ctx.name, dest.name
            )));
        }
        let mut query = self.clone();
        query.joins.push(JoinEdge {
            src: self.query_ctx.name.clone(),
            join: Join {
                dest: dest.clone(),
                kind,
                on,
            },
        });
        query.query_ctx = dest.clone();
        Ok(query)
    }

    /// Resets the query context without adding a join.
    pub fn switch(&self, model: &Model) -> OrmResult<Self> {
        let name = &model.schema().name;
        if !self.models().iter().any(|m| m.name == *name) {
            return Err(OrmError::ProgrammingError(format!(
                "cannot switch to '{name}': it is not part of the query"
            )));
        }
        let mut query = self.clone();
        query.query_ctx = model.schema().clone();
        Ok(query)
    }

    /// Idempotent join: reuses an equivalent existing edge instead of adding
    /// a duplicate. The query context is left untouched.
    pub(crate) fn ensure_join(&self, src: &Arc<ModelSchema>, dest: &Model) -> OrmResult<Self> {
        let dest_schema = dest.schema();
        let already = self
            .joins
            .iter()
            .any(|edge| edge.src == src.name && edge.join.dest.name == dest_schema.name);
        if already {
            return Ok(self.clone());
        }
        if src.rel_for(&dest_schema.name).is_none() && dest_schema.rel_for(&src.name).is_none() {
            return Err(OrmError::ProgrammingError(format!(
                "no foreign key between '{}' and '{}'",
                src.name, dest_schema.name
            )));
        }
        let mut query = self.clone();
        query.joins.push(JoinEdge {
            src: src.name.clone(),
            join: Join {
                dest: dest_schema.clone(),
                kind: JoinKind::Inner,
                on: None,
            },
        });
        Ok(query)
    }

    /// Applies a django-style double-underscore filter, discovering and
    /// adding any joins implied by relation traversal.
    pub fn filter(&self, dq: DQ) -> OrmResult<Self> {
        let (query, node) = crate::query::dq::apply(self, &dq)?;
        Ok(query.where_(node))
    }

    /// Replaces the GROUP BY columns.
    #[must_use]
    pub fn group_by(&self, columns: Vec<Node>) -> Self {
        let mut query = self.clone();
        query.group_by = columns;
        query
    }

    /// ANDs an expression onto the HAVING clause.
    #[must_use]
    pub fn having(&self, expr: Node) -> Self {
        let mut query = self.clone();
        query.having = Some(match query.having.take() {
            Some(existing) => existing & expr,
            None => expr,
        });
        query
    }

    /// Replaces the ordering.
    #[must_use]
    pub fn order_by(&self, columns: Vec<Node>) -> Self {
        let mut query = self.clone();
        query.order_by = columns;
        query
    }

    /// Sets the LIMIT.
    #[must_use]
    pub fn limit(&self, n: u64) -> Self {
        let mut query = self.clone();
        query.limit = Some(n);
        query
    }

    /// Sets the OFFSET.
    #[must_use]
    pub fn offset(&self, n: u64) -> Self {
        let mut query = self.clone();
        query.offset = Some(n);
        query
    }

    /// Adds DISTINCT.
    #[must_use]
    pub fn distinct(&self) -> Self {
        let mut query = self.clone();
        query.distinct = true;
        query
    }

    /// Adds `FOR UPDATE`, optionally with `NOWAIT`.
    #[must_use]
    pub fn for_update(&self, nowait: bool) -> Self {
        let mut query = self.clone();
        query.for_update = true;
        query.nowait = nowait;
        query
    }

    /// Computes LIMIT/OFFSET from a 1-based page number. Page 0 and page 1
    /// behave identically.
    #[must_use]
    pub fn paginate(&self, page: u64, per_page: u64) -> Self {
        let page = page.max(1);
        let mut query = self.clone();
        query.limit = Some(per_page);
        query.offset = Some((page - 1) * per_page);
        query
    }

    /// Uses single-table attribute stuffing even when the query has joins.
    #[must_use]
    pub fn naive(&self) -> Self {
        let mut query = self.clone();
        query.shape = RowShape::Naive;
        query
    }

    /// Auto-joins `rel`, groups by the current selection, and appends an
    /// aggregate over the related model (COUNT of its primary key by
    /// default, aliased `"count"`).
    pub fn annotate(&self, rel: &Model, aggregate: Option<Node>) -> OrmResult<Self> {
        let root = self.model.clone();
        let mut query = self.ensure_join(&root, rel)?;

        let aggregate = match aggregate {
            Some(node) => node,
            None => {
                let pk = rel.schema().pk_field().ok_or_else(|| {
                    OrmError::ProgrammingError(format!(
                        "cannot annotate over '{}': it has a composite key",
                        rel.schema().name
                    ))
                })?;
                fn_::count(Node::field_ref(rel.schema().name.clone(), pk.clone())).alias("count")
            }
        };

        let base = if query.projection.is_empty() {
            query.effective_projection()
        } else {
            query.projection.clone()
        };
        if query.group_by.is_empty() {
            query.group_by = base.clone();
        }
        let mut projection = base;
        projection.push(aggregate);
        query.projection = projection;
        Ok(query)
    }

    // ── Terminals ────────────────────────────────────────────────────

    /// Compiles this query for the given dialect; useful for inspection.
    pub fn to_sql(&self, compiler: &QueryCompiler) -> OrmResult<(String, Vec<Value>)> {
        compiler.generate_select(self)
    }

    /// Executes and wraps rows as model instances (with join-graph
    /// reconstruction when the projection spans several models).
    pub async fn execute(&self, db: &dyn DbExecutor) -> OrmResult<InstanceRows> {
        let compiler = QueryCompiler::new(db.dialect());
        let (sql, params) = compiler.generate_select(self)?;
        let rows = db.query_rows(&sql, &params).await?;
        Ok(ResultWrapper::new(
            RowCursor::new(rows),
            self.instance_mapper(),
        ))
    }

    /// Executes and wraps rows as plain value tuples.
    pub async fn tuples(&self, db: &dyn DbExecutor) -> OrmResult<TupleRows> {
        let compiler = QueryCompiler::new(db.dialect());
        let (sql, params) = compiler.generate_select(self)?;
        let rows = db.query_rows(&sql, &params).await?;
        Ok(ResultWrapper::new(
            RowCursor::new(rows),
            crate::query::results::TupleMapper,
        ))
    }

    /// Executes and wraps rows as column-keyed maps.
    pub async fn dicts(&self, db: &dyn DbExecutor) -> OrmResult<DictRows> {
        let compiler = QueryCompiler::new(db.dialect());
        let (sql, params) = compiler.generate_select(self)?;
        let rows = db.query_rows(&sql, &params).await?;
        Ok(ResultWrapper::new(
            RowCursor::new(rows),
            crate::query::results::DictMapper,
        ))
    }

    /// Counts the rows this query matches.
    ///
    /// When DISTINCT or GROUP BY is active the whole query is wrapped as a
    /// subquery, so grouping cannot collapse the count.
    pub async fn count(&self, db: &dyn DbExecutor) -> OrmResult<u64> {
        if self.distinct || !self.group_by.is_empty() {
            return self.wrapped_count(db).await;
        }
        let mut query = self.clone();
        query.projection = vec![fn_::count_star()];
        query.order_by.clear();
        query.limit = None;
        query.offset = None;
        let scalar = query.scalar(db).await?;
        scalar_to_count(scalar)
    }

    /// Counts via `SELECT COUNT(1) FROM (...) AS wrapped_select`.
    pub async fn wrapped_count(&self, db: &dyn DbExecutor) -> OrmResult<u64> {
        let compiler = QueryCompiler::new(db.dialect());
        let mut query = self.clone();
        query.order_by.clear();
        let (inner, params) = compiler.generate_select(&query)?;
        let sql = format!("SELECT COUNT(1) FROM ({inner}) AS wrapped_select");
        let rows = db.query_rows(&sql, &params).await?;
        let scalar = rows
            .first()
            .and_then(|row| row.values().first().cloned());
        scalar_to_count(scalar)
    }

    /// Cheap existence probe: `LIMIT 1` over a constant selection.
    pub async fn exists(&self, db: &dyn DbExecutor) -> OrmResult<bool> {
        let mut query = self.clone();
        query.projection = vec![Node::sql("1")];
        query.order_by.clear();
        query.limit = Some(1);
        query.offset = None;
        let compiler = QueryCompiler::new(db.dialect());
        let (sql, params) = compiler.generate_select(&query)?;
        let rows = db.query_rows(&sql, &params).await?;
        Ok(!rows.is_empty())
    }

    /// Fetches exactly one row, raising the model's `DoesNotExist` on an
    /// empty result. More than one matching row is not special-cased.
    pub async fn get(&self, db: &dyn DbExecutor) -> OrmResult<Instance> {
        let query = self.paginate(1, 1);
        let mut rows = query.execute(db).await?;
        rows.get(0)?
            .ok_or_else(|| OrmError::does_not_exist(&self.model.name))
    }

    /// Returns the first row, or `None` (never an error) on an empty
    /// result.
    pub async fn first(&self, db: &dyn DbExecutor) -> OrmResult<Option<Instance>> {
        let mut rows = self.execute(db).await?;
        rows.get(0)
    }

    /// Strict single-row fetch: `DoesNotExist` on an empty result and
    /// `MultipleObjectsReturned` when more than one row matches.
    pub async fn one(&self, db: &dyn DbExecutor) -> OrmResult<Instance> {
        let query = self.limit(2);
        let mut rows = query.execute(db).await?;
        let mut found = rows.all()?;
        match found.len() {
            0 => Err(OrmError::does_not_exist(&self.model.name)),
            1 => Ok(found.remove(0)),
            n => Err(OrmError::MultipleObjectsReturned(format!(
                "{} matched at least {n} rows",
                self.model.name
            ))),
        }
    }

    /// Returns the first column of the first row.
    pub async fn scalar(&self, db: &dyn DbExecutor) -> OrmResult<Option<Value>> {
        let compiler = QueryCompiler::new(db.dialect());
        let (sql, params) = compiler.generate_select(self)?;
        let rows = db.query_rows(&sql, &params).await?;
        Ok(rows.first().and_then(|row| row.values().first().cloned()))
    }

    /// Evaluates a single aggregate expression over this query.
    pub async fn aggregate(&self, db: &dyn DbExecutor, node: Node) -> OrmResult<Option<Value>> {
        let mut query = self.clone();
        query.projection = vec![node];
        query.order_by.clear();
        query.limit = None;
        query.offset = None;
        query.scalar(db).await
    }

    // ── Result-shape plumbing ────────────────────────────────────────

    fn projection_meta(&self) -> Vec<ProjectedColumn> {
        let models = self.models();
        self.effective_projection()
            .iter()
            .enumerate()
            .map(|(i, node)| {
                if let Some(field) = node.as_field() {
                    if let crate::ast::NodeKind::FieldRef { model, .. } = &node.kind {
                        let pos = models.iter().position(|m| m.name == *model);
                        return ProjectedColumn {
                            model_pos: pos,
                            field: Some(field.clone()),
                            name: node
                                .alias
                                .clone()
                                .unwrap_or_else(|| field.name.clone()),
                        };
                    }
                }
                ProjectedColumn {
                    model_pos: None,
                    field: None,
                    name: node.alias.clone().unwrap_or_else(|| format!("col{i}")),
                }
            })
            .collect()
    }

    fn join_links(&self) -> Vec<JoinLink> {
        let models = self.models();
        let mut links = Vec::new();
        for (idx, edge) in self.joins.iter().enumerate() {
            let dest_pos = idx + 1;
            let Some(src_pos) = models.iter().position(|m| m.name == edge.src) else {
                continue;
            };
            let src = &models[src_pos];
            let dest = &models[dest_pos];
            if let Some(rel) = src.rel_for(&dest.name) {
                links.push(JoinLink {
                    owner: src_pos,
                    fk_field: rel.field.clone(),
                    target: dest_pos,
                    to_field: rel.to_field.clone(),
                });
            } else if let Some(rel) = dest.rel_for(&src.name) {
                links.push(JoinLink {
                    owner: dest_pos,
                    fk_field: rel.field.clone(),
                    target: src_pos,
                    to_field: rel.to_field.clone(),
                });
            }
        }
        links
    }

    fn instance_mapper(&self) -> InstanceMapper {
        let columns = self.projection_meta();
        let models = self.models();
        let distinct_models: std::collections::HashSet<usize> =
            columns.iter().filter_map(|c| c.model_pos).collect();

        if self.shape == RowShape::Naive || distinct_models.len() <= 1 {
            InstanceMapper::naive(self.model.clone(), columns)
        } else {
            InstanceMapper::joined(models, columns, self.join_links())
        }
    }
}

fn scalar_to_count(scalar: Option<Value>) -> OrmResult<u64> {
    match scalar {
        Some(Value::Int(n)) => u64::try_from(n)
            .map_err(|_| OrmError::DataError(format!("negative count: {n}"))),
        other => Err(OrmError::DataError(format!(
            "COUNT returned a non-integer value: {other:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::Field;
    use crate::schema::{ModelBuilder, Registry};

    fn user_model() -> Model {
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
    fn test_clone_on_mutate_leaves_receiver_untouched() {
        let user = user_model();
        let base = user.select();
        let filtered = base.where_(user.f("age").gt(21));
        let limited = filtered.limit(5);

        assert!(base.where_clause.is_none());
        assert!(base.limit.is_none());
        assert!(filtered.where_clause.is_some());
        assert!(filtered.limit.is_none());
        assert_eq!(limited.limit, Some(5));

        // The template keeps producing fresh derivations.
        let another = base.where_(user.f("username").eq("zed"));
        assert!(base.where_clause.is_none());
        assert!(another.where_clause.is_some());
    }

    #[test]
    fn test_where_ands_successive_calls() {
        let user = user_model();
        let query = user
            .select()
            .where_(user.f("age").gt(21))
            .where_(user.f("username").ne("bob"));
        match &query.where_clause {
            Some(node) => match &node.kind {
                crate::ast::NodeKind::Expression { op, .. } => {
                    assert_eq!(*op, crate::ast::OpCode::And);
                }
                other => panic!("expected AND expression, got {other:?}"),
            },
            None => panic!("expected where clause"),
        }
    }

    #[test]
    fn test_paginate_determinism() {
        let user = user_model();
        let page1 = user.select().paginate(1, 20);
        let page0 = user.select().paginate(0, 20);
        assert_eq!(page1.limit, page0.limit);
        assert_eq!(page1.offset, page0.offset);
        assert_eq!(page1.offset, Some(0));

        let page2 = user.select().paginate(2, 20);
        assert_eq!(page2.limit, Some(20));
        assert_eq!(page2.offset, Some(20));
    }

    #[test]
    fn test_join_requires_relationship_or_on() {
        let registry = Registry::new();
        let user = registry
            .register(ModelBuilder::new("User").field(Field::char("username", 80)))
            .unwrap();
        let unrelated = registry
            .register(ModelBuilder::new("Widget").field(Field::char("label", 40)))
            .unwrap();

        let result = user.select().join(&unrelated, JoinKind::Inner, None);
        assert!(matches!(result, Err(OrmError::ProgrammingError(_))));

        // An explicit ON expression makes it legal.
        let on = Node::sql("\"t1\".\"id\" = \"t2\".\"id\"");
        assert!(user
            .select()
            .join(&unrelated, JoinKind::Inner, Some(on))
            .is_ok());
    }

    #[test]
    fn test_join_switches_context() {
        let registry = Registry::new();
        let user = registry
            .register(ModelBuilder::new("User").field(Field::char("username", 80)))
            .unwrap();
        let blog = registry
            .register(
                ModelBuilder::new("Blog")
                    .field(Field::foreign_key("user", "User").related_name("blogs"))
                    .field(Field::char("name", 120)),
            )
            .unwrap();

        let query = blog.select();
        assert_eq!(query.query_ctx.name, "Blog");
        let joined = query.join(&user, JoinKind::Inner, None).unwrap();
        assert_eq!(joined.query_ctx.name, "User");
        let back = joined.switch(&blog).unwrap();
        assert_eq!(back.query_ctx.name, "Blog");
    }

    #[test]
    fn test_switch_to_unjoined_model_fails() {
        let registry = Registry::new();
        let user = registry
            .register(ModelBuilder::new("User").field(Field::char("username", 80)))
            .unwrap();
        let other = registry
            .register(ModelBuilder::new("Widget").field(Field::char("label", 40)))
            .unwrap();
        assert!(user.select().switch(&other).is_err());
    }

    #[test]
    fn test_ensure_join_is_idempotent() {
        let registry = Registry::new();
        let user = registry
            .register(ModelBuilder::new("User").field(Field::char("username", 80)))
            .unwrap();
        let blog = registry
            .register(
                ModelBuilder::new("Blog")
                    .field(Field::foreign_key("user", "User").related_name("blogs")),
            )
            .unwrap();

        let root = blog.select();
        let once = root.ensure_join(&root.model.clone(), &user).unwrap();
        let twice = once.ensure_join(&once.model.clone(), &user).unwrap();
        assert_eq!(once.joins.len(), 1);
        assert_eq!(twice.joins.len(), 1);
    }

    #[test]
    fn test_default_ordering_applied() {
        let registry = Registry::new();
        let post = registry
            .register(
                ModelBuilder::new("Post")
                    .field(Field::char("title", 200))
                    .field(Field::datetime("created"))
                    .order_by(vec!["-created"]),
            )
            .unwrap();
        let query = post.select();
        assert_eq!(query.order_by.len(), 1);
        assert_eq!(
            query.order_by[0].ordering,
            Some(crate::ast::SortOrder::Desc)
        );
    }

    #[test]
    fn test_annotate_groups_and_appends_aggregate() {
        let registry = Registry::new();
        let user = registry
            .register(ModelBuilder::new("User").field(Field::char("username", 80)))
            .unwrap();
        let blog = registry
            .register(
                ModelBuilder::new("Blog")
                    .field(Field::foreign_key("user", "User").related_name("blogs")),
            )
            .unwrap();

        let query = user.select().annotate(&blog, None).unwrap();
        assert_eq!(query.joins.len(), 1);
        assert!(!query.group_by.is_empty());
        let last = query.projection.last().unwrap();
        assert_eq!(last.alias.as_deref(), Some("count"));
    }

    #[test]
    fn test_star_projection() {
        let user = user_model();
        let nodes = user.star();
        assert_eq!(nodes.len(), 3); // id + username + age
    }
}
