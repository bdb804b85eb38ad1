//! Model instances.
//!
//! An [`Instance`] is one row of a model: a field-name keyed value store plus
//! a dirty-set of fields changed since the last save or load, and a memo
//! cache of resolved related instances. There is no attribute interception;
//! reads and writes go through [`get`](Instance::get) / [`set`](Instance::set)
//! explicitly.

use crate::ast::Node;
use crate::executor::DbExecutor;
use crate::query::modify::{DeleteQuery, InsertQuery, UpdateQuery};
use crate::query::select::SelectQuery;
use crate::schema::{ModelSchema, PrimaryKeyDef};
use crate::value::Value;
use phoebe_core::{OrmError, OrmResult};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// One row of a model.
#[derive(Debug, Clone)]
pub struct Instance {
    schema: Arc<ModelSchema>,
    data: HashMap<String, Value>,
    dirty: HashSet<String>,
    rel_cache: HashMap<String, Instance>,
}

impl Instance {
    /// Creates a fresh unsaved instance with field defaults populated.
    pub fn new(schema: Arc<ModelSchema>) -> Self {
        let data = schema.defaults().into_iter().collect();
        Self {
            schema,
            data,
            dirty: HashSet::new(),
            rel_cache: HashMap::new(),
        }
    }

    /// Constructs an instance from already-loaded row data, bypassing
    /// defaults, and invokes the model's prepared hook.
    pub(crate) fn hydrated(schema: Arc<ModelSchema>, data: HashMap<String, Value>) -> Self {
        let hook = schema.prepared_hook();
        let mut instance = Self {
            schema,
            data,
            dirty: HashSet::new(),
            rel_cache: HashMap::new(),
        };
        if let Some(hook) = hook {
            hook(&mut instance);
        }
        instance
    }

    /// The instance's model schema.
    pub fn schema(&self) -> &Arc<ModelSchema> {
        &self.schema
    }

    /// Reads a field value.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.data.get(field)
    }

    /// Writes a field value, recording it in the dirty set. Setting a
    /// foreign key to a different raw id drops any stale cached instance.
    pub fn set(&mut self, field: &str, value: impl Into<Value>) -> OrmResult<()> {
        let value = value.into();
        if self.schema.field(field).is_none() {
            return Err(OrmError::ProgrammingError(format!(
                "model '{}' has no field '{field}'",
                self.schema.name
            )));
        }
        if self.schema.rel.contains_key(field) && self.data.get(field) != Some(&value) {
            self.rel_cache.remove(field);
        }
        self.data.insert(field.to_string(), value);
        self.dirty.insert(field.to_string());
        Ok(())
    }

    /// Writes a value without dirty tracking or field validation; used by the
    /// result wrappers while assembling instances.
    pub(crate) fn set_raw(&mut self, field: &str, value: Value) {
        self.data.insert(field.to_string(), value);
    }

    /// Memoizes a resolved related instance.
    pub(crate) fn cache_related(&mut self, field: &str, related: Instance) {
        self.rel_cache.insert(field.to_string(), related);
    }

    /// Whether any field changed since the last save or load.
    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    /// The changed field names, in schema order.
    pub fn dirty_fields(&self) -> Vec<String> {
        self.schema
            .fields
            .iter()
            .filter(|f| self.dirty.contains(&f.name))
            .map(|f| f.name.clone())
            .collect()
    }

    /// The primary-key value, if set (single-field keys only).
    pub fn pk(&self) -> Option<&Value> {
        self.schema
            .pk_name()
            .and_then(|name| self.data.get(name))
            .filter(|v| !v.is_null())
    }

    /// Sets the primary-key value (single-field keys only).
    pub fn set_pk(&mut self, value: Value) {
        if let Some(name) = self.schema.pk_name().map(String::from) {
            self.data.insert(name, value);
        }
    }

    /// Builds the WHERE clause identifying this row by its key, handling
    /// composite keys.
    fn pk_where(&self) -> Option<Node> {
        match &self.schema.primary_key {
            PrimaryKeyDef::Single(name) => {
                let value = self.data.get(name).filter(|v| !v.is_null())?.clone();
                let field = self.schema.field(name)?;
                Some(Node::field_ref(self.schema.name.clone(), field.clone()).eq(value))
            }
            PrimaryKeyDef::Composite(parts) => {
                let mut node: Option<Node> = None;
                for part in parts {
                    let value = self.data.get(part).filter(|v| !v.is_null())?.clone();
                    let field = self.schema.field(part)?;
                    let expr =
                        Node::field_ref(self.schema.name.clone(), field.clone()).eq(value);
                    node = Some(match node {
                        Some(existing) => existing & expr,
                        None => expr,
                    });
                }
                node
            }
        }
    }

    /// Saves this instance: an INSERT when the primary key is unset (or
    /// `force_insert` is given), otherwise an UPDATE of the dirty fields
    /// scoped to the key. Clears the dirty set on success.
    pub async fn save(&mut self, db: &dyn DbExecutor, force_insert: bool) -> OrmResult<()> {
        let pk_set = self.pk().is_some();
        if pk_set && !force_insert {
            if self.dirty.is_empty() {
                return Ok(());
            }
            let where_clause = self.pk_where().ok_or_else(|| {
                OrmError::ProgrammingError(format!(
                    "cannot update '{}' without a complete key",
                    self.schema.name
                ))
            })?;
            let sets: Vec<(&str, Value)> = self
                .schema
                .fields
                .iter()
                .filter(|f| self.dirty.contains(&f.name))
                .filter_map(|f| {
                    self.data
                        .get(&f.name)
                        .map(|v| (f.name.as_str(), v.clone()))
                })
                .collect();
            UpdateQuery::new(self.schema.clone())
                .set_values(sets)?
                .where_(where_clause)
                .execute(db)
                .await?;
        } else {
            let mut row: Vec<(String, Value)> = Vec::new();
            for field in &self.schema.fields {
                let Some(value) = self.data.get(&field.name) else {
                    continue;
                };
                // An unset auto key is left to the database.
                if field.primary_key
                    && matches!(field.kind, crate::fields::FieldKind::PrimaryKey)
                    && value.is_null()
                {
                    continue;
                }
                row.push((field.name.clone(), value.clone()));
            }
            let insert = InsertQuery::from_named_rows(self.schema.clone(), vec![row])?;
            let id = insert.execute(db).await?;
            if self.pk().is_none() {
                if let Some(pk_field) = self.schema.pk_field() {
                    self.set_pk(pk_field.from_db_value(id)?);
                }
            }
        }
        self.dirty.clear();
        Ok(())
    }

    /// Deletes this row.
    ///
    /// With `recursive`, dependents found through the reverse relations are
    /// handled first, transitively: rows holding a nullable foreign key are
    /// updated to NULL (unless `delete_nullable`, which deletes them too);
    /// rows holding a non-nullable foreign key are deleted.
    pub async fn delete_instance(
        &self,
        db: &dyn DbExecutor,
        recursive: bool,
        delete_nullable: bool,
    ) -> OrmResult<u64> {
        let where_clause = self.pk_where().ok_or_else(|| {
            OrmError::ProgrammingError(format!(
                "cannot delete an unsaved '{}' instance",
                self.schema.name
            ))
        })?;
        if recursive {
            cascade(self.clone(), db, delete_nullable).await?;
        }
        DeleteQuery::new(self.schema.clone())
            .where_(where_clause)
            .execute(db)
            .await
    }

    /// Resolves a foreign key to its related instance, lazily and with
    /// caching.
    ///
    /// Returns `None` for a nullable unset key; an unset non-nullable key is
    /// the target model's `DoesNotExist`.
    pub async fn related(
        &mut self,
        db: &dyn DbExecutor,
        field: &str,
    ) -> OrmResult<Option<Instance>> {
        let rel = self
            .schema
            .rel
            .get(field)
            .ok_or_else(|| {
                OrmError::ProgrammingError(format!(
                    "'{field}' is not a foreign key on '{}'",
                    self.schema.name
                ))
            })?
            .clone();

        if let Some(cached) = self.rel_cache.get(field) {
            return Ok(Some(cached.clone()));
        }

        let raw = self.data.get(field).cloned().unwrap_or(Value::Null);
        if raw.is_null() {
            let nullable = self.schema.field(field).is_some_and(|f| f.null);
            if nullable {
                return Ok(None);
            }
            return Err(OrmError::does_not_exist(&rel.to_model));
        }

        let registry = self.schema.registry()?;
        let target = registry.get(&rel.to_model)?;
        let instance = target
            .get(db, vec![target.try_f(&rel.to_field)?.eq(raw)])
            .await?;
        self.rel_cache.insert(field.to_string(), instance.clone());
        Ok(Some(instance))
    }

    /// Points a foreign key at a related instance, storing the referenced
    /// field's value and caching the instance.
    pub fn set_related(&mut self, field: &str, related: &Instance) -> OrmResult<()> {
        let rel = self
            .schema
            .rel
            .get(field)
            .ok_or_else(|| {
                OrmError::ProgrammingError(format!(
                    "'{field}' is not a foreign key on '{}'",
                    self.schema.name
                ))
            })?
            .clone();
        let value = related.get(&rel.to_field).cloned().ok_or_else(|| {
            OrmError::ProgrammingError(format!(
                "related '{}' instance has no '{}' value",
                rel.to_model, rel.to_field
            ))
        })?;
        self.set(field, value)?;
        self.rel_cache.insert(field.to_string(), related.clone());
        Ok(())
    }

    /// Returns the pre-filtered select behind a reverse relation: every row
    /// of the source model whose foreign key points at this instance.
    pub fn reverse(&self, related_name: &str) -> OrmResult<SelectQuery> {
        let reverse = self
            .schema
            .reverse_rels()
            .into_iter()
            .find(|r| r.related_name == related_name)
            .ok_or_else(|| {
                OrmError::ProgrammingError(format!(
                    "'{}' has no reverse relation '{related_name}'",
                    self.schema.name
                ))
            })?;
        let registry = self.schema.registry()?;
        let source = registry.get(&reverse.source_model)?;
        let rel = source
            .schema()
            .rel
            .get(&reverse.source_field)
            .cloned()
            .ok_or_else(|| {
                OrmError::InternalError(format!(
                    "reverse relation '{related_name}' has no forward counterpart"
                ))
            })?;
        let key = self.data.get(&rel.to_field).cloned().ok_or_else(|| {
            OrmError::ProgrammingError(format!(
                "cannot follow '{related_name}' before '{}' is set",
                rel.to_field
            ))
        })?;
        Ok(source
            .select()
            .where_(source.try_f(&reverse.source_field)?.eq(key)))
    }

    /// Re-reads this row from the database and overwrites local state.
    pub async fn refresh(&mut self, db: &dyn DbExecutor) -> OrmResult<()> {
        let where_clause = self.pk_where().ok_or_else(|| {
            OrmError::ProgrammingError(format!(
                "cannot refresh an unsaved '{}' instance",
                self.schema.name
            ))
        })?;
        let fresh = SelectQuery::new(self.schema.clone())
            .where_(where_clause)
            .naive()
            .get(db)
            .await?;
        self.data = fresh.data;
        self.dirty.clear();
        self.rel_cache.clear();
        Ok(())
    }
}

/// Depth-first cascade over the reverse relations, leaf-most rows first.
fn cascade<'a>(
    instance: Instance,
    db: &'a dyn DbExecutor,
    delete_nullable: bool,
) -> Pin<Box<dyn Future<Output = OrmResult<()>> + Send + 'a>> {
    Box::pin(async move {
        let registry = instance.schema.registry()?;
        for reverse in instance.schema.reverse_rels() {
            let source = registry.get(&reverse.source_model)?;
            let rel = source
                .schema()
                .rel
                .get(&reverse.source_field)
                .cloned()
                .ok_or_else(|| {
                    OrmError::InternalError(format!(
                        "reverse relation '{}' has no forward counterpart",
                        reverse.related_name
                    ))
                })?;
            let Some(key) = instance.data.get(&rel.to_field).cloned() else {
                continue;
            };
            let fk_node = source.try_f(&reverse.source_field)?;

            if reverse.nullable && !delete_nullable {
                UpdateQuery::new(source.schema().clone())
                    .set_values(vec![(reverse.source_field.as_str(), Value::Null)])?
                    .where_(fk_node.eq(key))
                    .execute(db)
                    .await?;
            } else {
                let mut dependents = source
                    .select()
                    .naive()
                    .where_(fk_node.eq(key))
                    .execute(db)
                    .await?;
                for dependent in dependents.all()? {
                    cascade(dependent.clone(), db, delete_nullable).await?;
                    let where_clause = dependent.pk_where().ok_or_else(|| {
                        OrmError::InternalError(
                            "dependent row has no usable key".to_string(),
                        )
                    })?;
                    DeleteQuery::new(source.schema().clone())
                        .where_(where_clause)
                        .execute(db)
                        .await?;
                }
            }
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::Field;
    use crate::schema::{ModelBuilder, Registry};

    fn user() -> crate::schema::Model {
        let registry = Registry::new();
        registry
            .register(
                ModelBuilder::new("User")
                    .field(Field::char("username", 80))
                    .field(Field::integer("age").default(0)),
            )
            .unwrap()
    }

    #[test]
    fn test_new_instance_populates_defaults() {
        let model = user();
        let instance = model.instance();
        assert_eq!(instance.get("age"), Some(&Value::Int(0)));
        assert_eq!(instance.get("username"), None);
        assert!(!instance.is_dirty());
    }

    #[test]
    fn test_set_tracks_dirty() {
        let model = user();
        let mut instance = model.instance();
        instance.set("username", "alice").unwrap();
        assert!(instance.is_dirty());
        assert_eq!(instance.dirty_fields(), vec!["username".to_string()]);
        assert!(instance.set("missing", 1).is_err());
    }

    #[test]
    fn test_pk_accessors() {
        let model = user();
        let mut instance = model.instance();
        assert!(instance.pk().is_none());
        instance.set_pk(Value::Int(7));
        assert_eq!(instance.pk(), Some(&Value::Int(7)));
    }

    #[test]
    fn test_pk_where_composite() {
        let registry = Registry::new();
        let membership = registry
            .register(
                ModelBuilder::new("Membership")
                    .field(Field::integer("user_id"))
                    .field(Field::integer("group_id"))
                    .composite_key(vec!["user_id", "group_id"]),
            )
            .unwrap();
        let mut instance = membership.instance();
        assert!(instance.pk_where().is_none());
        instance.set("user_id", 1).unwrap();
        instance.set("group_id", 2).unwrap();
        assert!(instance.pk_where().is_some());
    }

    #[test]
    fn test_setting_fk_invalidates_cache() {
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

        let mut owner = user.instance();
        owner.set_pk(Value::Int(1));
        owner.set("username", "alice").unwrap();

        let mut post = blog.instance();
        post.set_related("user", &owner).unwrap();
        assert_eq!(post.get("user"), Some(&Value::Int(1)));
        assert!(post.rel_cache.contains_key("user"));

        // Same id: cache stays.
        post.set("user", 1).unwrap();
        assert!(post.rel_cache.contains_key("user"));

        // Different id: stale cache dropped.
        post.set("user", 2).unwrap();
        assert!(!post.rel_cache.contains_key("user"));
    }

    #[test]
    fn test_prepared_hook_runs_on_hydration() {
        let registry = Registry::new();
        let model = registry
            .register(
                ModelBuilder::new("Audited")
                    .field(Field::char("name", 40))
                    .prepared(|instance| {
                        instance.set_raw("loaded", Value::Bool(true));
                    }),
            )
            .unwrap();

        let hydrated = Instance::hydrated(
            model.schema().clone(),
            std::iter::once(("name".to_string(), Value::from("x"))).collect(),
        );
        assert_eq!(hydrated.get("loaded"), Some(&Value::Bool(true)));

        // Direct construction does not run the hook.
        let fresh = model.instance();
        assert_eq!(fresh.get("loaded"), None);
    }
}
