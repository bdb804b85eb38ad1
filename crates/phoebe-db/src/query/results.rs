//! Result wrappers: lazy row-to-shape adapters between a cursor and the
//! caller-visible result type.
//!
//! A wrapper moves through three states: not yet iterated, partially iterated
//! (rows so far cached, cursor not exhausted), and fully populated. Iteration
//! replays from the cache once the cursor is drained, so a query executed once
//! can be walked any number of times without re-hitting the database, but the
//! underlying cursor itself is consumed at most once, forward only.

use crate::fields::Field;
use crate::model::Instance;
use crate::row::Row;
use crate::schema::ModelSchema;
use crate::value::Value;
use phoebe_core::OrmResult;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// A single-forward-pass row source.
pub struct RowCursor {
    rows: VecDeque<Row>,
}

impl RowCursor {
    /// Wraps the rows fetched by a backend.
    pub fn new(rows: Vec<Row>) -> Self {
        Self { rows: rows.into() }
    }

    fn next_row(&mut self) -> Option<Row> {
        self.rows.pop_front()
    }
}

/// Converts one raw row into the wrapper's output shape.
pub trait RowMapper {
    /// The materialized row type.
    type Out: Clone;

    /// Maps a single row.
    fn map_row(&self, row: &Row) -> OrmResult<Self::Out>;
}

/// The generic lazy, restartable-via-cache result wrapper.
pub struct ResultWrapper<M: RowMapper> {
    cursor: RowCursor,
    mapper: M,
    cache: Vec<M::Out>,
    exhausted: bool,
}

impl<M: RowMapper> ResultWrapper<M> {
    /// Creates a wrapper over a cursor.
    pub fn new(cursor: RowCursor, mapper: M) -> Self {
        Self {
            cursor,
            mapper,
            cache: Vec::new(),
            exhausted: false,
        }
    }

    /// Pulls one row from the cursor into the cache. Returns `false` once
    /// the cursor is exhausted.
    fn pull(&mut self) -> OrmResult<bool> {
        if self.exhausted {
            return Ok(false);
        }
        match self.cursor.next_row() {
            Some(row) => {
                let item = self.mapper.map_row(&row)?;
                self.cache.push(item);
                Ok(true)
            }
            None => {
                self.exhausted = true;
                Ok(false)
            }
        }
    }

    /// Eagerly advances until at least `n` rows are cached or the cursor is
    /// exhausted.
    pub fn fill_cache(&mut self, n: usize) -> OrmResult<()> {
        while self.cache.len() < n && self.pull()? {}
        Ok(())
    }

    /// Returns the item at `idx`, advancing the cursor as needed.
    pub fn get(&mut self, idx: usize) -> OrmResult<Option<M::Out>> {
        self.fill_cache(idx + 1)?;
        Ok(self.cache.get(idx).cloned())
    }

    /// Drains the cursor and returns every row.
    pub fn all(&mut self) -> OrmResult<Vec<M::Out>> {
        while self.pull()? {}
        Ok(self.cache.clone())
    }

    /// The number of rows cached so far.
    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }

    /// Whether the underlying cursor has been fully consumed.
    pub fn is_fully_populated(&self) -> bool {
        self.exhausted
    }

    /// Starts a traversal from the beginning of the cache, pulling further
    /// rows from the cursor as needed.
    pub fn iter(&mut self) -> WrapperIter<'_, M> {
        WrapperIter {
            wrapper: self,
            pos: 0,
        }
    }
}

/// One independent traversal over a wrapper.
pub struct WrapperIter<'a, M: RowMapper> {
    wrapper: &'a mut ResultWrapper<M>,
    pos: usize,
}

impl<M: RowMapper> Iterator for WrapperIter<'_, M> {
    type Item = OrmResult<M::Out>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.wrapper.cache.len() {
            match self.wrapper.pull() {
                Ok(true) => {}
                Ok(false) => return None,
                Err(err) => return Some(Err(err)),
            }
        }
        let item = self.wrapper.cache.get(self.pos).cloned();
        self.pos += 1;
        item.map(Ok)
    }
}

// ── Mappers ──────────────────────────────────────────────────────────

/// Rows as plain value tuples.
pub struct TupleMapper;

impl RowMapper for TupleMapper {
    type Out = Vec<Value>;

    fn map_row(&self, row: &Row) -> OrmResult<Self::Out> {
        Ok(row.values().to_vec())
    }
}

/// Rows as column-name keyed maps.
pub struct DictMapper;

impl RowMapper for DictMapper {
    type Out = HashMap<String, Value>;

    fn map_row(&self, row: &Row) -> OrmResult<Self::Out> {
        Ok(row
            .columns()
            .iter()
            .cloned()
            .zip(row.values().iter().cloned())
            .collect())
    }
}

/// One projected column's mapping metadata: which model position it belongs
/// to, the field used for inbound conversion, and the attribute name used
/// when no field matches.
#[derive(Debug, Clone)]
pub struct ProjectedColumn {
    /// Index into the query's model list, when the column is a bound field.
    pub model_pos: Option<usize>,
    /// The field used for inbound conversion.
    pub field: Option<Arc<Field>>,
    /// The attribute name (alias, field name, or a positional fallback).
    pub name: String,
}

/// A foreign-key edge between two model positions in a joined selection.
#[derive(Debug, Clone)]
pub struct JoinLink {
    /// Position of the model holding the foreign key.
    pub owner: usize,
    /// The foreign-key field name on the owner.
    pub fk_field: String,
    /// Position of the referenced model.
    pub target: usize,
    /// The referenced field name on the target.
    pub to_field: String,
}

/// Materializes rows into model instances: either single-table attribute
/// stuffing, or full multi-table object-graph reconstruction.
pub enum InstanceMapper {
    /// Single-table shape: every column lands on one fresh root instance.
    Naive {
        /// The root model.
        schema: Arc<ModelSchema>,
        /// Per-column mapping metadata.
        columns: Vec<ProjectedColumn>,
    },
    /// Multi-table shape: one instance per joined model, wired together
    /// through their foreign-key attributes.
    Joined {
        /// Every model in the query, root first.
        models: Vec<Arc<ModelSchema>>,
        /// Per-column mapping metadata.
        columns: Vec<ProjectedColumn>,
        /// Foreign-key wiring between model positions.
        links: Vec<JoinLink>,
    },
}

impl InstanceMapper {
    /// Builds the single-table mapper.
    pub fn naive(schema: Arc<ModelSchema>, columns: Vec<ProjectedColumn>) -> Self {
        Self::Naive { schema, columns }
    }

    /// Builds the multi-table mapper.
    pub fn joined(
        models: Vec<Arc<ModelSchema>>,
        columns: Vec<ProjectedColumn>,
        links: Vec<JoinLink>,
    ) -> Self {
        Self::Joined {
            models,
            columns,
            links,
        }
    }
}

impl RowMapper for InstanceMapper {
    type Out = Instance;

    fn map_row(&self, row: &Row) -> OrmResult<Self::Out> {
        match self {
            Self::Naive { schema, columns } => {
                let mut data = HashMap::new();
                for (idx, column) in columns.iter().enumerate() {
                    let raw = row.get_by_index::<Value>(idx)?;
                    match &column.field {
                        Some(field) => {
                            data.insert(field.name.clone(), field.from_db_value(raw)?);
                        }
                        None => {
                            data.insert(column.name.clone(), raw);
                        }
                    }
                }
                Ok(Instance::hydrated(schema.clone(), data))
            }
            Self::Joined {
                models,
                columns,
                links,
            } => {
                let mut buckets: Vec<HashMap<String, Value>> =
                    vec![HashMap::new(); models.len()];
                let mut extras: HashMap<String, Value> = HashMap::new();
                for (idx, column) in columns.iter().enumerate() {
                    let raw = row.get_by_index::<Value>(idx)?;
                    match (&column.model_pos, &column.field) {
                        (Some(pos), Some(field)) => {
                            buckets[*pos].insert(field.name.clone(), field.from_db_value(raw)?);
                        }
                        _ => {
                            extras.insert(column.name.clone(), raw);
                        }
                    }
                }

                let mut instances: Vec<Instance> = models
                    .iter()
                    .zip(buckets)
                    .map(|(schema, data)| Instance::hydrated(schema.clone(), data))
                    .collect();

                // Wire leaf-most edges first so a related instance is complete
                // before it is attached to its owner.
                for link in links.iter().rev() {
                    let target_value = instances[link.target].get(&link.to_field).cloned();
                    let owner_value = instances[link.owner].get(&link.fk_field).cloned();
                    // Back-fill the raw key on whichever side is missing it.
                    let owner_missing = !matches!(owner_value, Some(ref v) if !v.is_null());
                    let target_missing = !matches!(target_value, Some(ref v) if !v.is_null());
                    if owner_missing {
                        if let Some(v) = target_value.filter(|v| !v.is_null()) {
                            instances[link.owner].set_raw(&link.fk_field, v);
                        }
                    } else if target_missing {
                        if let Some(v) = owner_value.filter(|v| !v.is_null()) {
                            instances[link.target].set_raw(&link.to_field, v);
                        }
                    }
                    let related = instances[link.target].clone();
                    instances[link.owner].cache_related(&link.fk_field, related);
                }

                let mut root = instances.swap_remove(0);
                for (name, value) in extras {
                    root.set_raw(&name, value);
                }
                Ok(root)
            }
        }
    }
}

/// Matches columns to a model's fields by database column name; used by raw
/// queries where there is no projection metadata.
pub struct NamedInstanceMapper {
    schema: Arc<ModelSchema>,
}

impl NamedInstanceMapper {
    /// Builds the mapper for a model.
    pub fn new(schema: Arc<ModelSchema>) -> Self {
        Self { schema }
    }
}

impl RowMapper for NamedInstanceMapper {
    type Out = Instance;

    fn map_row(&self, row: &Row) -> OrmResult<Self::Out> {
        let mut data = HashMap::new();
        for (idx, column) in row.columns().iter().enumerate() {
            let raw = row.get_by_index::<Value>(idx)?;
            match self.schema.field_by_column(column) {
                Some(field) => {
                    data.insert(field.name.clone(), field.from_db_value(raw)?);
                }
                None => {
                    data.insert(column.clone(), raw);
                }
            }
        }
        Ok(Instance::hydrated(self.schema.clone(), data))
    }
}

/// Instance-yielding rows.
pub type InstanceRows = ResultWrapper<InstanceMapper>;
/// Tuple-yielding rows.
pub type TupleRows = ResultWrapper<TupleMapper>;
/// Map-yielding rows.
pub type DictRows = ResultWrapper<DictMapper>;
