//! Model schemas, the schema builder, and the model registry.
//!
//! A model is declared as a [`ModelBuilder`] (a field list plus
//! [`MetaOptions`]) and finalized exactly once by [`Registry::register`],
//! which validates the declaration, resolves the primary key and foreign
//! keys, installs reverse relations on the targets, and hands back a cheap
//! [`Model`] handle used for query building.
//!
//! All declaration mistakes (overdetermined primary key, colliding reverse
//! names, a foreign key to an unknown model) fail at registration time, not
//! at query time.

use crate::ast::Node;
use crate::fields::{Field, FieldKind};
use crate::model::Instance;
use crate::value::Value;
use phoebe_core::{OrmError, OrmResult};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock, Weak};

/// A hook invoked on every instance constructed from a database row, after
/// its fields are populated.
pub type PreparedHook = Arc<dyn Fn(&mut Instance) + Send + Sync>;

/// A composite primary key over several fields.
#[derive(Debug, Clone)]
pub struct CompositeKey(pub Vec<String>);

/// Per-model declaration options (the `Meta` block).
#[derive(Default)]
pub struct MetaOptions {
    /// Table name; defaults to the lower-cased model name.
    pub db_table: Option<String>,
    /// Fixed table alias used instead of a generated `t1`-style alias.
    pub table_alias: Option<String>,
    /// Default ordering as field names, `-` prefix for descending.
    pub order_by: Vec<String>,
    /// Multi-column indexes as (columns, unique) pairs.
    pub indexes: Vec<(Vec<String>, bool)>,
    /// Table-level constraints spliced into DDL verbatim.
    pub constraints: Vec<String>,
    /// Database schema (namespace) qualifier.
    pub schema: Option<String>,
    /// Composite primary key declaration.
    pub primary_key: Option<CompositeKey>,
}

/// The primary key of a model: one field or a composite.
#[derive(Debug, Clone)]
pub enum PrimaryKeyDef {
    /// A single-field key, by field name.
    Single(String),
    /// A composite key over several field names.
    Composite(Vec<String>),
}

/// An outgoing foreign-key relation, fully resolved.
#[derive(Debug, Clone)]
pub struct RelDef {
    /// The foreign-key field on the source model.
    pub field: String,
    /// The target model name.
    pub to_model: String,
    /// The referenced field on the target model.
    pub to_field: String,
    /// The reverse-accessor name installed on the target.
    pub related_name: String,
}

/// An incoming relation recorded on the target model.
#[derive(Debug, Clone)]
pub struct ReverseRel {
    /// The reverse-accessor name.
    pub related_name: String,
    /// The model holding the foreign key.
    pub source_model: String,
    /// The foreign-key field on the source model.
    pub source_field: String,
    /// Whether the foreign key is nullable (drives cascade behavior).
    pub nullable: bool,
}

/// A model declaration, consumed by [`Registry::register`].
pub struct ModelBuilder {
    name: String,
    fields: Vec<Field>,
    meta: MetaOptions,
    prepared: Option<PreparedHook>,
}

impl ModelBuilder {
    /// Starts a declaration for a model with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            meta: MetaOptions::default(),
            prepared: None,
        }
    }

    /// Adds a field.
    #[must_use]
    pub fn field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    /// Adds several fields.
    #[must_use]
    pub fn fields(mut self, fields: Vec<Field>) -> Self {
        self.fields.extend(fields);
        self
    }

    /// Sets the meta options wholesale.
    #[must_use]
    pub fn meta(mut self, meta: MetaOptions) -> Self {
        self.meta = meta;
        self
    }

    /// Sets the table name.
    #[must_use]
    pub fn db_table(mut self, table: impl Into<String>) -> Self {
        self.meta.db_table = Some(table.into());
        self
    }

    /// Sets a fixed table alias.
    #[must_use]
    pub fn table_alias(mut self, alias: impl Into<String>) -> Self {
        self.meta.table_alias = Some(alias.into());
        self
    }

    /// Sets the default ordering (`"name"`, `"-created"`).
    #[must_use]
    pub fn order_by(mut self, fields: Vec<&str>) -> Self {
        self.meta.order_by = fields.into_iter().map(String::from).collect();
        self
    }

    /// Adds a multi-column index.
    #[must_use]
    pub fn add_index(mut self, columns: Vec<&str>, unique: bool) -> Self {
        self.meta
            .indexes
            .push((columns.into_iter().map(String::from).collect(), unique));
        self
    }

    /// Declares a composite primary key.
    #[must_use]
    pub fn composite_key(mut self, fields: Vec<&str>) -> Self {
        self.meta.primary_key = Some(CompositeKey(
            fields.into_iter().map(String::from).collect(),
        ));
        self
    }

    /// Installs a hook run on every instance constructed from a row.
    #[must_use]
    pub fn prepared(mut self, hook: impl Fn(&mut Instance) + Send + Sync + 'static) -> Self {
        self.prepared = Some(Arc::new(hook));
        self
    }
}

/// The finalized, immutable description of one model.
pub struct ModelSchema {
    /// The model name as declared.
    pub name: String,
    /// The database table name.
    pub db_table: String,
    /// Fixed table alias, if any.
    pub table_alias: Option<String>,
    /// Database schema (namespace) qualifier.
    pub schema: Option<String>,
    /// All fields, primary key first.
    pub fields: Vec<Arc<Field>>,
    /// The primary key definition.
    pub primary_key: PrimaryKeyDef,
    /// Default ordering as (field name, descending) pairs.
    pub order_by: Vec<(String, bool)>,
    /// Declared multi-column indexes as (columns, unique) pairs.
    pub indexes: Vec<(Vec<String>, bool)>,
    /// Table-level DDL constraints.
    pub constraints: Vec<String>,
    /// Outgoing foreign keys by field name.
    pub rel: HashMap<String, RelDef>,
    /// Incoming relations by reverse-accessor name. Filled as later models
    /// register foreign keys pointing here.
    pub reverse_rel: RwLock<HashMap<String, ReverseRel>>,
    prepared: Option<PreparedHook>,
    registry: RwLock<Weak<Registry>>,
    field_index: HashMap<String, usize>,
}

impl fmt::Debug for ModelSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelSchema")
            .field("name", &self.name)
            .field("db_table", &self.db_table)
            .field("fields", &self.fields.len())
            .field("primary_key", &self.primary_key)
            .finish_non_exhaustive()
    }
}

impl ModelSchema {
    /// Looks up a field by name.
    pub fn field(&self, name: &str) -> Option<&Arc<Field>> {
        self.field_index.get(name).map(|idx| &self.fields[*idx])
    }

    /// Looks up a field by database column name.
    pub fn field_by_column(&self, column: &str) -> Option<&Arc<Field>> {
        self.fields.iter().find(|f| f.db_column == column)
    }

    /// Returns the primary-key field for a single-field key.
    pub fn pk_field(&self) -> Option<&Arc<Field>> {
        match &self.primary_key {
            PrimaryKeyDef::Single(name) => self.field(name),
            PrimaryKeyDef::Composite(_) => None,
        }
    }

    /// Returns the primary-key field name for a single-field key.
    pub fn pk_name(&self) -> Option<&str> {
        match &self.primary_key {
            PrimaryKeyDef::Single(name) => Some(name),
            PrimaryKeyDef::Composite(_) => None,
        }
    }

    /// Computes the defaults map for a fresh instance, evaluating callable
    /// defaults.
    pub fn defaults(&self) -> Vec<(String, Value)> {
        self.fields
            .iter()
            .filter_map(|f| f.default_value().map(|v| (f.name.clone(), v)))
            .collect()
    }

    /// Returns the prepared-hook, if one is installed.
    pub fn prepared_hook(&self) -> Option<PreparedHook> {
        self.prepared.clone()
    }

    /// Returns the registry this schema was registered into.
    pub fn registry(&self) -> OrmResult<Arc<Registry>> {
        self.registry
            .read()
            .ok()
            .and_then(|weak| weak.upgrade())
            .ok_or_else(|| {
                OrmError::ImproperlyConfigured(format!(
                    "model '{}' is not attached to a registry",
                    self.name
                ))
            })
    }

    /// Finds the outgoing foreign key from this model to `target`, if any.
    pub fn rel_for(&self, target: &str) -> Option<&RelDef> {
        self.rel.values().find(|r| r.to_model == target)
    }

    /// Returns the incoming relations in declaration order.
    pub fn reverse_rels(&self) -> Vec<ReverseRel> {
        self.reverse_rel
            .read()
            .map(|map| map.values().cloned().collect())
            .unwrap_or_default()
    }
}

/// A cheap, clonable handle to a registered model.
///
/// The handle is the entry point for query building: `model.select()`,
/// `model.f("name").eq("x")`, `model.insert(...)` and friends.
#[derive(Debug, Clone)]
pub struct Model {
    schema: Arc<ModelSchema>,
}

impl Model {
    pub(crate) fn from_schema(schema: Arc<ModelSchema>) -> Self {
        Self { schema }
    }

    /// Returns the underlying schema.
    pub fn schema(&self) -> &Arc<ModelSchema> {
        &self.schema
    }

    /// Returns the model name.
    pub fn name(&self) -> &str {
        &self.schema.name
    }

    /// Returns a column-reference node for the given field.
    ///
    /// # Panics
    ///
    /// Panics if the field does not exist on this model; use
    /// [`try_f`](Self::try_f) for a fallible lookup.
    pub fn f(&self, name: &str) -> Node {
        self.try_f(name)
            .unwrap_or_else(|_| panic!("model '{}' has no field '{name}'", self.schema.name))
    }

    /// Returns a column-reference node for the given field.
    pub fn try_f(&self, name: &str) -> OrmResult<Node> {
        let field = self.schema.field(name).ok_or_else(|| {
            OrmError::ProgrammingError(format!(
                "model '{}' has no field '{name}'",
                self.schema.name
            ))
        })?;
        Ok(Node::field_ref(self.schema.name.clone(), field.clone()))
    }

    /// Creates a fresh unsaved instance with field defaults applied.
    pub fn instance(&self) -> Instance {
        Instance::new(self.schema.clone())
    }
}

/// The model registry: the single place where declarations become schemas.
pub struct Registry {
    models: RwLock<HashMap<String, Arc<ModelSchema>>>,
    self_ref: Weak<Registry>,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            models: RwLock::new(HashMap::new()),
            self_ref: self_ref.clone(),
        })
    }

    /// Returns the handle for a registered model.
    pub fn get(&self, name: &str) -> OrmResult<Model> {
        self.models
            .read()
            .ok()
            .and_then(|models| models.get(name).cloned())
            .map(Model::from_schema)
            .ok_or_else(|| {
                OrmError::ImproperlyConfigured(format!("model '{name}' is not registered"))
            })
    }

    /// Returns all registered models sorted so that every foreign-key target
    /// precedes its sources (self-references ignored).
    pub fn sorted_models(&self) -> Vec<Model> {
        let models: Vec<Arc<ModelSchema>> = self
            .models
            .read()
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default();

        let mut sorted: Vec<Arc<ModelSchema>> = Vec::with_capacity(models.len());
        let mut remaining: Vec<Arc<ModelSchema>> = models;
        remaining.sort_by(|a, b| a.name.cmp(&b.name));

        while !remaining.is_empty() {
            let mut progressed = false;
            let mut still: Vec<Arc<ModelSchema>> = Vec::new();
            for schema in remaining {
                let ready = schema.rel.values().all(|rel| {
                    rel.to_model == schema.name
                        || sorted.iter().any(|s| s.name == rel.to_model)
                });
                if ready {
                    sorted.push(schema);
                    progressed = true;
                } else {
                    still.push(schema);
                }
            }
            if !progressed {
                // Cyclic declarations; append the rest in name order.
                sorted.extend(still);
                break;
            }
            remaining = still;
        }

        sorted.into_iter().map(Model::from_schema).collect()
    }

    /// Finalizes a model declaration.
    ///
    /// Performs, in order: primary-key resolution (synthesizing an
    /// auto-increment `id` when none is declared), table-name derivation,
    /// field binding, foreign-key resolution (including `"self"`), reverse
    /// relation installation, and default-ordering normalization.
    ///
    /// # Errors
    ///
    /// `ImproperlyConfigured` on an overdetermined primary key, a colliding
    /// `related_name`, a foreign key to an unregistered model, an unknown
    /// field in `order_by` or the composite key, or a duplicate model name.
    pub fn register(&self, builder: ModelBuilder) -> OrmResult<Model> {
        let ModelBuilder {
            name,
            mut fields,
            meta,
            prepared,
        } = builder;

        {
            let models = self.models.read().map_err(|_| poisoned())?;
            if models.contains_key(&name) {
                return Err(OrmError::ImproperlyConfigured(format!(
                    "model '{name}' is already registered"
                )));
            }
        }

        // Primary key resolution.
        let explicit_pks: Vec<String> = fields
            .iter()
            .filter(|f| f.primary_key)
            .map(|f| f.name.clone())
            .collect();
        if explicit_pks.len() > 1 {
            return Err(OrmError::ImproperlyConfigured(format!(
                "primary key for '{name}' is overdetermined: {explicit_pks:?}"
            )));
        }
        if !explicit_pks.is_empty() && meta.primary_key.is_some() {
            return Err(OrmError::ImproperlyConfigured(format!(
                "primary key for '{name}' is overdetermined: both a primary_key field \
                 and a composite key are declared"
            )));
        }

        let primary_key = if let Some(CompositeKey(parts)) = meta.primary_key {
            for part in &parts {
                if !fields.iter().any(|f| f.name == *part) {
                    return Err(OrmError::ImproperlyConfigured(format!(
                        "composite key field '{part}' does not exist on '{name}'"
                    )));
                }
            }
            PrimaryKeyDef::Composite(parts)
        } else if let Some(pk) = explicit_pks.into_iter().next() {
            PrimaryKeyDef::Single(pk)
        } else {
            fields.insert(0, Field::auto("id"));
            PrimaryKeyDef::Single("id".to_string())
        };

        // Bind the primary key first.
        if let PrimaryKeyDef::Single(pk_name) = &primary_key {
            if let Some(pos) = fields.iter().position(|f| f.name == *pk_name) {
                if pos != 0 {
                    let pk = fields.remove(pos);
                    fields.insert(0, pk);
                }
            }
        }

        let db_table = meta.db_table.unwrap_or_else(|| derive_table_name(&name));

        // Foreign-key resolution.
        let mut rel: HashMap<String, RelDef> = HashMap::new();
        let mut reverse_installs: Vec<(String, ReverseRel)> = Vec::new();
        let models = self.models.read().map_err(|_| poisoned())?;
        for idx in 0..fields.len() {
            let (to, to_field_opt, related_name_opt, nullable) = match &fields[idx].kind {
                FieldKind::ForeignKey {
                    to,
                    to_field,
                    related_name,
                    ..
                } => (
                    to.clone(),
                    to_field.clone(),
                    related_name.clone(),
                    fields[idx].null,
                ),
                _ => continue,
            };
            let to_model = if to == "self" { name.clone() } else { to };

            // Locate the referenced field, either on the target schema or,
            // for self-references, among the fields being bound right now.
            let (to_field_name, target_field) = if to_model == name {
                let to_field_name = match to_field_opt {
                    Some(explicit) => explicit,
                    None => match &primary_key {
                        PrimaryKeyDef::Single(pk) => pk.clone(),
                        PrimaryKeyDef::Composite(_) => {
                            return Err(OrmError::ImproperlyConfigured(format!(
                                "foreign key '{}' cannot reference the composite key of '{name}'",
                                fields[idx].name
                            )))
                        }
                    },
                };
                let target = fields
                    .iter()
                    .find(|f| f.name == to_field_name)
                    .cloned()
                    .ok_or_else(|| {
                        OrmError::ImproperlyConfigured(format!(
                            "foreign key '{}' references unknown field '{to_field_name}' \
                             on '{name}'",
                            fields[idx].name
                        ))
                    })?;
                (to_field_name, target)
            } else {
                let target_schema = models.get(&to_model).ok_or_else(|| {
                    OrmError::ImproperlyConfigured(format!(
                        "foreign key '{}' on '{name}' references unregistered model \
                         '{to_model}' (register the target first)",
                        fields[idx].name
                    ))
                })?;
                let to_field_name = match to_field_opt {
                    Some(explicit) => explicit,
                    None => target_schema
                        .pk_name()
                        .ok_or_else(|| {
                            OrmError::ImproperlyConfigured(format!(
                                "foreign key '{}' cannot reference the composite key of \
                                 '{to_model}'",
                                fields[idx].name
                            ))
                        })?
                        .to_string(),
                };
                let target = target_schema
                    .field(&to_field_name)
                    .map(|f| (**f).clone())
                    .ok_or_else(|| {
                        OrmError::ImproperlyConfigured(format!(
                            "foreign key '{}' references unknown field '{to_field_name}' \
                             on '{to_model}'",
                            fields[idx].name
                        ))
                    })?;
                (to_field_name, target)
            };

            let related_name =
                related_name_opt.unwrap_or_else(|| format!("{}_set", name.to_lowercase()));

            // The reverse name must be unique among the target's fields and
            // its existing reverse relations.
            if to_model == name {
                if fields
                    .iter()
                    .any(|f| f.name == related_name && f.name != fields[idx].name)
                {
                    return Err(related_name_collision(&name, &related_name, &name));
                }
            } else if let Some(target_schema) = models.get(&to_model) {
                if target_schema.field(&related_name).is_some() {
                    return Err(related_name_collision(&name, &related_name, &to_model));
                }
                let taken = target_schema
                    .reverse_rel
                    .read()
                    .map_err(|_| poisoned())?
                    .contains_key(&related_name);
                if taken {
                    return Err(related_name_collision(&name, &related_name, &to_model));
                }
            }
            if reverse_installs
                .iter()
                .any(|(m, r)| *m == to_model && r.related_name == related_name)
            {
                return Err(related_name_collision(&name, &related_name, &to_model));
            }

            fields[idx].rel_target = Some(Box::new(target_field));
            if let FieldKind::ForeignKey { to_field, .. } = &mut fields[idx].kind {
                *to_field = Some(to_field_name.clone());
            }
            rel.insert(
                fields[idx].name.clone(),
                RelDef {
                    field: fields[idx].name.clone(),
                    to_model: to_model.clone(),
                    to_field: to_field_name,
                    related_name: related_name.clone(),
                },
            );
            reverse_installs.push((
                to_model,
                ReverseRel {
                    related_name,
                    source_model: name.clone(),
                    source_field: fields[idx].name.clone(),
                    nullable,
                },
            ));
        }
        drop(models);

        // Normalize default ordering.
        let mut order_by = Vec::new();
        for entry in &meta.order_by {
            let (field_name, desc) = entry
                .strip_prefix('-')
                .map_or((entry.as_str(), false), |rest| (rest, true));
            if !fields.iter().any(|f| f.name == field_name) {
                return Err(OrmError::ImproperlyConfigured(format!(
                    "order_by references unknown field '{field_name}' on '{name}'"
                )));
            }
            order_by.push((field_name.to_string(), desc));
        }

        let field_index: HashMap<String, usize> = fields
            .iter()
            .enumerate()
            .map(|(i, f)| (f.name.clone(), i))
            .collect();

        let schema = Arc::new(ModelSchema {
            name: name.clone(),
            db_table,
            table_alias: meta.table_alias,
            schema: meta.schema,
            fields: fields.into_iter().map(Arc::new).collect(),
            primary_key,
            order_by,
            indexes: meta.indexes,
            constraints: meta.constraints,
            rel,
            reverse_rel: RwLock::new(HashMap::new()),
            prepared,
            registry: RwLock::new(Weak::new()),
            field_index,
        });

        *schema.registry.write().map_err(|_| poisoned())? = self.self_ref.clone();

        // Install reverse relations on the targets (including self).
        {
            let models = self.models.read().map_err(|_| poisoned())?;
            for (to_model, reverse) in reverse_installs {
                let target = if to_model == name {
                    &schema
                } else {
                    models.get(&to_model).ok_or_else(|| {
                        OrmError::ImproperlyConfigured(format!(
                            "model '{to_model}' vanished during registration"
                        ))
                    })?
                };
                target
                    .reverse_rel
                    .write()
                    .map_err(|_| poisoned())?
                    .insert(reverse.related_name.clone(), reverse);
            }
        }

        self.models
            .write()
            .map_err(|_| poisoned())?
            .insert(name, schema.clone());
        Ok(Model::from_schema(schema))
    }
}

/// Lower-cases the model name and strips everything but word characters.
fn derive_table_name(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect()
}

fn related_name_collision(source: &str, related_name: &str, target: &str) -> OrmError {
    OrmError::ImproperlyConfigured(format!(
        "related_name '{related_name}' from '{source}' collides with an existing \
         field or reverse relation on '{target}'"
    ))
}

fn poisoned() -> OrmError {
    OrmError::InternalError("registry lock poisoned".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_builder() -> ModelBuilder {
        ModelBuilder::new("User").field(Field::char("username", 80).unique())
    }

    #[test]
    fn test_pk_synthesized_when_missing() {
        let registry = Registry::new();
        let user = registry.register(user_builder()).unwrap();
        let schema = user.schema();
        assert_eq!(schema.pk_name(), Some("id"));
        assert_eq!(schema.fields[0].name, "id");
        assert!(matches!(schema.fields[0].kind, FieldKind::PrimaryKey));
    }

    #[test]
    fn test_explicit_pk_wins() {
        let registry = Registry::new();
        let model = registry
            .register(
                ModelBuilder::new("Tag")
                    .field(Field::char("slug", 40).primary_key())
                    .field(Field::char("label", 80)),
            )
            .unwrap();
        assert_eq!(model.schema().pk_name(), Some("slug"));
        assert_eq!(model.schema().fields[0].name, "slug");
    }

    #[test]
    fn test_overdetermined_pk_is_fatal() {
        let registry = Registry::new();
        let result = registry.register(
            ModelBuilder::new("Broken")
                .field(Field::integer("a").primary_key())
                .field(Field::integer("b").primary_key()),
        );
        match result {
            Err(OrmError::ImproperlyConfigured(msg)) => {
                assert!(msg.contains("overdetermined"));
            }
            other => panic!("expected ImproperlyConfigured, got {other:?}"),
        }
    }

    #[test]
    fn test_composite_key() {
        let registry = Registry::new();
        let model = registry
            .register(
                ModelBuilder::new("Membership")
                    .field(Field::integer("user_id"))
                    .field(Field::integer("group_id"))
                    .composite_key(vec!["user_id", "group_id"]),
            )
            .unwrap();
        assert!(matches!(
            model.schema().primary_key,
            PrimaryKeyDef::Composite(ref parts) if parts.len() == 2
        ));
        assert!(model.schema().pk_name().is_none());
    }

    #[test]
    fn test_db_table_derived() {
        let registry = Registry::new();
        let model = registry
            .register(ModelBuilder::new("BlogEntry2").field(Field::text("body")))
            .unwrap();
        assert_eq!(model.schema().db_table, "blogentry2");
    }

    #[test]
    fn test_fk_binding_and_reverse_rel() {
        let registry = Registry::new();
        let user = registry.register(user_builder()).unwrap();
        let blog = registry
            .register(
                ModelBuilder::new("Blog")
                    .field(Field::foreign_key("user", "User").related_name("blogs"))
                    .field(Field::char("name", 120)),
            )
            .unwrap();

        let rel = blog.schema().rel.get("user").unwrap();
        assert_eq!(rel.to_model, "User");
        assert_eq!(rel.to_field, "id");
        assert_eq!(rel.related_name, "blogs");

        let reverse = user.schema().reverse_rels();
        assert_eq!(reverse.len(), 1);
        assert_eq!(reverse[0].source_model, "Blog");
        assert_eq!(reverse[0].source_field, "user");

        // FK field picked up the target's conversion behavior.
        let fk = blog.schema().field("user").unwrap();
        assert!(fk.rel_target.is_some());
    }

    #[test]
    fn test_fk_to_unregistered_model_is_fatal() {
        let registry = Registry::new();
        let result = registry.register(
            ModelBuilder::new("Blog").field(Field::foreign_key("user", "User")),
        );
        assert!(matches!(result, Err(OrmError::ImproperlyConfigured(_))));
    }

    #[test]
    fn test_self_fk() {
        let registry = Registry::new();
        let model = registry
            .register(
                ModelBuilder::new("Category")
                    .field(Field::char("name", 60))
                    .field(Field::foreign_key("parent", "self").null().related_name("children")),
            )
            .unwrap();
        let rel = model.schema().rel.get("parent").unwrap();
        assert_eq!(rel.to_model, "Category");
        assert_eq!(rel.to_field, "id");
        let reverse = model.schema().reverse_rels();
        assert_eq!(reverse.len(), 1);
        assert_eq!(reverse[0].related_name, "children");
    }

    #[test]
    fn test_related_name_collision_with_existing_reverse() {
        let registry = Registry::new();
        registry.register(user_builder()).unwrap();
        registry
            .register(
                ModelBuilder::new("Blog")
                    .field(Field::foreign_key("user", "User").related_name("content")),
            )
            .unwrap();
        let result = registry.register(
            ModelBuilder::new("Photo")
                .field(Field::foreign_key("owner", "User").related_name("content")),
        );
        assert!(matches!(result, Err(OrmError::ImproperlyConfigured(_))));
    }

    #[test]
    fn test_related_name_collision_within_one_model() {
        let registry = Registry::new();
        registry.register(user_builder()).unwrap();
        // Two FKs onto the same target with the defaulted related_name.
        let result = registry.register(
            ModelBuilder::new("Follow")
                .field(Field::foreign_key("follower", "User"))
                .field(Field::foreign_key("followee", "User")),
        );
        assert!(matches!(result, Err(OrmError::ImproperlyConfigured(_))));
    }

    #[test]
    fn test_related_name_collision_with_target_field() {
        let registry = Registry::new();
        registry.register(user_builder()).unwrap();
        let result = registry.register(
            ModelBuilder::new("Blog")
                .field(Field::foreign_key("user", "User").related_name("username")),
        );
        assert!(matches!(result, Err(OrmError::ImproperlyConfigured(_))));
    }

    #[test]
    fn test_duplicate_registration_is_fatal() {
        let registry = Registry::new();
        registry.register(user_builder()).unwrap();
        assert!(matches!(
            registry.register(user_builder()),
            Err(OrmError::ImproperlyConfigured(_))
        ));
    }

    #[test]
    fn test_order_by_normalized() {
        let registry = Registry::new();
        let model = registry
            .register(
                ModelBuilder::new("Post")
                    .field(Field::char("title", 200))
                    .field(Field::datetime("created"))
                    .order_by(vec!["-created", "title"]),
            )
            .unwrap();
        assert_eq!(
            model.schema().order_by,
            vec![("created".to_string(), true), ("title".to_string(), false)]
        );
    }

    #[test]
    fn test_order_by_unknown_field_is_fatal() {
        let registry = Registry::new();
        let result = registry.register(
            ModelBuilder::new("Post")
                .field(Field::char("title", 200))
                .order_by(vec!["missing"]),
        );
        assert!(matches!(result, Err(OrmError::ImproperlyConfigured(_))));
    }

    #[test]
    fn test_sorted_models_targets_first() {
        let registry = Registry::new();
        registry.register(user_builder()).unwrap();
        registry
            .register(
                ModelBuilder::new("Blog").field(Field::foreign_key("user", "User")),
            )
            .unwrap();
        registry
            .register(
                ModelBuilder::new("Entry").field(Field::foreign_key("blog", "Blog")),
            )
            .unwrap();

        let order: Vec<String> = registry
            .sorted_models()
            .into_iter()
            .map(|m| m.name().to_string())
            .collect();
        let user_pos = order.iter().position(|n| n == "User").unwrap();
        let blog_pos = order.iter().position(|n| n == "Blog").unwrap();
        let entry_pos = order.iter().position(|n| n == "Entry").unwrap();
        assert!(user_pos < blog_pos);
        assert!(blog_pos < entry_pos);
    }

    #[test]
    fn test_field_lookup() {
        let registry = Registry::new();
        let user = registry.register(user_builder()).unwrap();
        assert!(user.schema().field("username").is_some());
        assert!(user.schema().field("missing").is_none());
        assert!(user.try_f("missing").is_err());
        let node = user.f("username");
        assert!(node.as_field().is_some());
    }
}
