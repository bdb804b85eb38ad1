//! Schema-management helpers: create and drop tables, indexes, and foreign
//! keys against a live executor.

use crate::executor::DbExecutor;
use crate::query::compiler::QueryCompiler;
use crate::schema::{Model, Registry};
use phoebe_core::OrmResult;

/// Creates the model's table plus the indexes its fields and meta options
/// declare.
pub async fn create_table(db: &dyn DbExecutor, model: &Model, safe: bool) -> OrmResult<()> {
    let compiler = QueryCompiler::new(db.dialect());
    let schema = model.schema();
    tracing::debug!(model = %schema.name, table = %schema.db_table, "creating table");

    let sql = compiler.create_table(schema, safe)?;
    db.execute_sql(&sql, &[]).await?;

    for field in &schema.fields {
        if field.primary_key || (!field.index && !field.unique) {
            continue;
        }
        let sql = compiler.create_index(schema, &[field.db_column.clone()], field.unique, safe);
        db.execute_sql(&sql, &[]).await?;
    }

    for (columns, unique) in &schema.indexes {
        let db_columns: Vec<String> = columns
            .iter()
            .map(|name| {
                schema
                    .field(name)
                    .map_or_else(|| name.clone(), |f| f.db_column.clone())
            })
            .collect();
        let sql = compiler.create_index(schema, &db_columns, *unique, safe);
        db.execute_sql(&sql, &[]).await?;
    }

    Ok(())
}

/// Creates every registered model's table, foreign-key targets first.
pub async fn create_tables(db: &dyn DbExecutor, registry: &Registry, safe: bool) -> OrmResult<()> {
    for model in registry.sorted_models() {
        create_table(db, &model, safe).await?;
    }
    Ok(())
}

/// Drops the model's table.
pub async fn drop_table(
    db: &dyn DbExecutor,
    model: &Model,
    safe: bool,
    cascade: bool,
) -> OrmResult<()> {
    let compiler = QueryCompiler::new(db.dialect());
    let sql = compiler.drop_table(model.schema(), safe, cascade);
    db.execute_sql(&sql, &[]).await?;
    Ok(())
}
