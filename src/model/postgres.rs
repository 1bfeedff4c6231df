//! Model handle over a PostgreSQL table, using the safe SQL builder.

use crate::config::{ModelSchema, RelationDef};
use crate::error::PersistenceError;
use crate::model::{Filter, ListQuery, ModelHandle, Projection, Row};
use crate::relations::RelationSplit;
use crate::sql::{self, IncludeSelect, PgBindValue, QueryBuf};
use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::{PgExecutor, PgPool};
use std::collections::HashMap;

pub struct PgModel {
    pool: PgPool,
    schema: ModelSchema,
    /// Schemas of relation targets, keyed by lowercase model name.
    related: HashMap<String, ModelSchema>,
}

impl PgModel {
    pub fn new(pool: PgPool, schema: ModelSchema) -> Self {
        PgModel {
            pool,
            schema,
            related: HashMap::new(),
        }
    }

    /// Register the schema of a relation target so includes and nested writes can reach it.
    pub fn with_related(mut self, schema: ModelSchema) -> Self {
        self.related.insert(schema.name.to_lowercase(), schema);
        self
    }

    fn relation(&self, field: &str) -> Result<(&RelationDef, &ModelSchema), PersistenceError> {
        let rel = self
            .schema
            .relation_def(field)
            .ok_or_else(|| PersistenceError::new("42703", format!("{} is not a relation of {}", field, self.schema.name)))?;
        let target = self
            .related
            .get(&rel.target.to_lowercase())
            .ok_or_else(|| PersistenceError::new("42703", format!("relation target {} is not registered", rel.target)))?;
        Ok((rel, target))
    }

    /// Includes that resolve to a registered target; unknown names are skipped.
    fn include_selects(&self, names: &[String]) -> Vec<IncludeSelect<'_>> {
        names
            .iter()
            .filter_map(|n| match self.relation(n) {
                Ok((relation, target)) => Some(IncludeSelect { relation, target }),
                Err(e) => {
                    tracing::debug!(include = %n, error = %e, "skipping include");
                    None
                }
            })
            .collect()
    }

    async fn write_relations(
        &self,
        tx: &mut sqlx::PgConnection,
        parent: &mut Map<String, Value>,
        write: &RelationSplit,
    ) -> Result<(), PersistenceError> {
        let parent_id = parent.get(&self.schema.primary_key).cloned().unwrap_or(Value::Null);
        for (field, child) in &write.single_relations {
            let (rel, target) = self.relation(field)?;
            let row = insert_child(&mut *tx, target, rel, child, &parent_id).await?;
            parent.insert(field.clone(), row);
        }
        for (field, children) in &write.bulk_relations {
            let (rel, target) = self.relation(field)?;
            let mut rows = Vec::new();
            for child in children.as_array().map(Vec::as_slice).unwrap_or(&[]) {
                rows.push(insert_child(&mut *tx, target, rel, child, &parent_id).await?);
            }
            parent.insert(field.clone(), Value::Array(rows));
        }
        Ok(())
    }
}

async fn insert_child(
    tx: &mut sqlx::PgConnection,
    target: &ModelSchema,
    rel: &RelationDef,
    child: &Value,
    parent_id: &Value,
) -> Result<Value, PersistenceError> {
    let mut data = child.as_object().cloned().unwrap_or_default();
    data.insert(rel.foreign_key.clone(), parent_id.clone());
    let q = sql::insert(target, &data);
    fetch_optional(&mut *tx, &q)
        .await?
        .ok_or_else(|| PersistenceError::other(format!("insert into {} returned no row", target.name)))
}

fn build_query<'q>(q: &'q QueryBuf) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
    q.params
        .iter()
        .fold(sqlx::query(&q.sql), |query, p| PgBindValue::from_json(p).bind(query))
}

async fn fetch_all<'e>(executor: impl PgExecutor<'e>, q: &QueryBuf) -> Result<Vec<Value>, PersistenceError> {
    tracing::debug!(sql = %q.sql, params = ?q.params, "query");
    let rows = build_query(q).fetch_all(executor).await?;
    Ok(rows.iter().map(row_to_json).collect())
}

async fn fetch_optional<'e>(executor: impl PgExecutor<'e>, q: &QueryBuf) -> Result<Option<Value>, PersistenceError> {
    tracing::debug!(sql = %q.sql, params = ?q.params, "query");
    let row = build_query(q).fetch_optional(executor).await?;
    Ok(row.map(|r| row_to_json(&r)))
}

#[async_trait]
impl ModelHandle for PgModel {
    fn name(&self) -> &str {
        &self.schema.name
    }

    fn schema(&self) -> Option<&ModelSchema> {
        Some(&self.schema)
    }

    async fn list(&self, query: &ListQuery) -> Result<Vec<Row>, PersistenceError> {
        let includes = self.include_selects(query.projection.includes());
        let q = sql::select_list(&self.schema, query, &includes);
        fetch_all(&self.pool, &q).await
    }

    async fn count(&self, filter: &Filter) -> Result<u64, PersistenceError> {
        use sqlx::Row as _;
        let q = sql::select_count(&self.schema, filter);
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let row = build_query(&q).fetch_one(&self.pool).await?;
        let n: i64 = row.try_get("count")?;
        Ok(n.max(0) as u64)
    }

    async fn get_by_id(&self, id: &Value, projection: &Projection) -> Result<Option<Row>, PersistenceError> {
        let includes = self.include_selects(projection.includes());
        let q = sql::select_by_id(&self.schema, id, projection, &includes);
        fetch_optional(&self.pool, &q).await
    }

    async fn find_first(&self, filter: &Filter) -> Result<Option<Row>, PersistenceError> {
        let q = sql::select_first(&self.schema, filter);
        fetch_optional(&self.pool, &q).await
    }

    async fn create(&self, data: &Map<String, Value>, include: &[String]) -> Result<Row, PersistenceError> {
        let q = sql::insert(&self.schema, data);
        let row = fetch_optional(&self.pool, &q)
            .await?
            .ok_or_else(|| PersistenceError::other("insert returned no row"))?;
        if include.is_empty() {
            return Ok(row);
        }
        let id = row.get(&self.schema.primary_key).cloned().unwrap_or(Value::Null);
        Ok(self
            .get_by_id(&id, &Projection::Include(include.to_vec()))
            .await?
            .unwrap_or(row))
    }

    async fn update(&self, id: &Value, data: &Map<String, Value>, include: &[String]) -> Result<Row, PersistenceError> {
        let q = sql::update(&self.schema, id, data);
        let row = fetch_optional(&self.pool, &q)
            .await?
            .ok_or_else(|| PersistenceError::not_found(id))?;
        if include.is_empty() {
            return Ok(row);
        }
        Ok(self
            .get_by_id(id, &Projection::Include(include.to_vec()))
            .await?
            .unwrap_or(row))
    }

    async fn update_many(&self, filter: &Filter, data: &Map<String, Value>) -> Result<u64, PersistenceError> {
        let q = sql::update_many(&self.schema, filter, data);
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let result = build_query(&q).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn delete(&self, id: &Value) -> Result<Row, PersistenceError> {
        let q = sql::delete(&self.schema, id);
        fetch_optional(&self.pool, &q)
            .await?
            .ok_or_else(|| PersistenceError::not_found(id))
    }

    async fn create_nested(&self, write: &RelationSplit) -> Result<Row, PersistenceError> {
        let mut tx = self.pool.begin().await?;
        let q = sql::insert(&self.schema, &write.main_data);
        let row = fetch_optional(&mut *tx, &q)
            .await?
            .ok_or_else(|| PersistenceError::other("insert returned no row"))?;
        let mut parent = row.as_object().cloned().unwrap_or_default();
        self.write_relations(&mut tx, &mut parent, write).await?;
        tx.commit().await?;
        Ok(Value::Object(parent))
    }

    async fn update_nested(&self, id: &Value, write: &RelationSplit) -> Result<Row, PersistenceError> {
        let mut tx = self.pool.begin().await?;
        let q = sql::update(&self.schema, id, &write.main_data);
        let row = fetch_optional(&mut *tx, &q)
            .await?
            .ok_or_else(|| PersistenceError::not_found(id))?;
        let mut parent = row.as_object().cloned().unwrap_or_default();
        self.write_relations(&mut tx, &mut parent, write).await?;
        tx.commit().await?;
        Ok(Value::Object(parent))
    }
}

fn row_to_json(row: &sqlx::postgres::PgRow) -> Value {
    use sqlx::Column;
    use sqlx::Row as _;
    let mut map = Map::new();
    for col in row.columns() {
        let name = col.name();
        map.insert(name.to_string(), cell_to_value(row, name));
    }
    Value::Object(map)
}

fn cell_to_value(row: &sqlx::postgres::PgRow, name: &str) -> Value {
    use sqlx::Row as _;
    if let Ok(Some(n)) = row.try_get::<Option<i16>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<i32>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<i64>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<f32>, _>(name) {
        if let Some(n) = serde_json::Number::from_f64(n as f64) {
            return Value::Number(n);
        }
    }
    if let Ok(Some(n)) = row.try_get::<Option<f64>, _>(name) {
        if let Some(n) = serde_json::Number::from_f64(n) {
            return Value::Number(n);
        }
    }
    if let Ok(Some(b)) = row.try_get::<Option<bool>, _>(name) {
        return Value::Bool(b);
    }
    if let Ok(Some(u)) = row.try_get::<Option<uuid::Uuid>, _>(name) {
        return Value::String(u.to_string());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(name) {
        return Value::String(d.to_rfc3339());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::NaiveDateTime>, _>(name) {
        return Value::String(d.format("%Y-%m-%dT%H:%M:%S%.f").to_string());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::NaiveDate>, _>(name) {
        return Value::String(d.format("%Y-%m-%d").to_string());
    }
    if let Ok(Some(s)) = row.try_get::<Option<String>, _>(name) {
        return Value::String(s);
    }
    if let Ok(Some(j)) = row.try_get::<Option<Value>, _>(name) {
        return j;
    }
    Value::Null
}
