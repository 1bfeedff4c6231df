//! In-process model handle. Rows live behind one lock, so nested writes are atomic.

use crate::config::{FieldType, ModelSchema};
use crate::error::PersistenceError;
use crate::model::{value_eq, Filter, ListQuery, ModelHandle, Projection, Row, SortDirection};
use crate::relations::RelationSplit;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::sync::atomic::{AtomicI64, Ordering as AtomicOrdering};
use tokio::sync::RwLock;

pub struct MemoryModel {
    name: String,
    schema: Option<ModelSchema>,
    rows: RwLock<Vec<Map<String, Value>>>,
    next_id: AtomicI64,
}

impl MemoryModel {
    pub fn new(name: impl Into<String>) -> Self {
        MemoryModel {
            name: name.into(),
            schema: None,
            rows: RwLock::new(Vec::new()),
            next_id: AtomicI64::new(1),
        }
    }

    pub fn with_schema(schema: ModelSchema) -> Self {
        let mut m = Self::new(schema.name.clone());
        m.schema = Some(schema);
        m
    }

    /// Seed rows; rows without a primary key get one assigned.
    pub fn with_rows(mut self, rows: Vec<Value>) -> Self {
        let pk = self.pk().to_string();
        let seeded = self.rows.get_mut();
        for row in rows {
            if let Value::Object(mut m) = row {
                match m.get(&pk).and_then(Value::as_i64) {
                    Some(n) => {
                        self.next_id.fetch_max(n + 1, AtomicOrdering::SeqCst);
                    }
                    None if !m.contains_key(&pk) => {
                        let id = self.next_id.fetch_add(1, AtomicOrdering::SeqCst);
                        m.insert(pk.clone(), Value::from(id));
                    }
                    None => {}
                }
                seeded.push(m);
            }
        }
        self
    }

    /// Snapshot of all stored rows, in insertion order.
    pub async fn rows(&self) -> Vec<Value> {
        self.rows.read().await.iter().cloned().map(Value::Object).collect()
    }

    fn pk(&self) -> &str {
        self.schema.as_ref().map(|s| s.primary_key.as_str()).unwrap_or("id")
    }

    fn relation_fields(&self) -> Vec<&str> {
        self.schema
            .as_ref()
            .map(|s| s.relations.iter().map(|r| r.field.as_str()).collect())
            .unwrap_or_default()
    }

    fn find_index(rows: &[Map<String, Value>], pk: &str, id: &Value) -> Option<usize> {
        rows.iter().position(|r| r.get(pk).map_or(false, |v| value_eq(v, id)))
    }

    /// Apply schema defaults and required checks to a new row.
    fn prepare_insert(&self, mut row: Map<String, Value>) -> Result<Map<String, Value>, PersistenceError> {
        let pk = self.pk().to_string();
        if !row.contains_key(&pk) {
            let id = self.next_id.fetch_add(1, AtomicOrdering::SeqCst);
            row.insert(pk, Value::from(id));
        }
        if let Some(schema) = &self.schema {
            for f in &schema.fields {
                let present = row.get(&f.name).map_or(false, |v| !v.is_null());
                if present {
                    continue;
                }
                if f.has_default && f.type_ == FieldType::DateTime {
                    row.insert(f.name.clone(), Value::String(chrono::Utc::now().to_rfc3339()));
                } else if f.required && !f.has_default {
                    return Err(PersistenceError::new(
                        "23502",
                        format!("null value in column \"{}\" violates not-null constraint", f.name),
                    ));
                }
            }
        }
        Ok(row)
    }

    fn check_unique(&self, rows: &[Map<String, Value>], row: &Map<String, Value>, skip: Option<usize>) -> Result<(), PersistenceError> {
        let Some(schema) = &self.schema else { return Ok(()) };
        for f in schema.fields.iter().filter(|f| f.unique || f.name == schema.primary_key) {
            let Some(v) = row.get(&f.name).filter(|v| !v.is_null()) else { continue };
            let clash = rows
                .iter()
                .enumerate()
                .any(|(i, r)| Some(i) != skip && r.get(&f.name).map_or(false, |o| value_eq(o, v)));
            if clash {
                return Err(PersistenceError::new(
                    "23505",
                    format!("duplicate key value violates unique constraint on \"{}\"", f.name),
                ));
            }
        }
        Ok(())
    }

    fn touch(&self, row: &mut Map<String, Value>) {
        let Some(schema) = &self.schema else { return };
        if schema.field_def("updatedAt").map_or(false, |f| f.has_default) {
            row.insert("updatedAt".into(), Value::String(chrono::Utc::now().to_rfc3339()));
        }
    }

    fn project(&self, row: &Map<String, Value>, projection: &Projection) -> Value {
        let relations = self.relation_fields();
        let out: Map<String, Value> = match projection {
            Projection::Select(fields) => row
                .iter()
                .filter(|(k, _)| fields.contains(k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            Projection::Include(names) => row
                .iter()
                .filter(|(k, _)| !relations.contains(&k.as_str()) || names.contains(k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            Projection::All => row
                .iter()
                .filter(|(k, _)| !relations.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        };
        Value::Object(out)
    }

    fn include_projection(include: &[String]) -> Projection {
        Projection::Include(include.to_vec())
    }

    /// Embed relation payloads into `row`, linking children through the declared foreign key.
    fn attach_relations(&self, row: &mut Map<String, Value>, write: &RelationSplit) {
        let pk_value = row.get(self.pk()).cloned().unwrap_or(Value::Null);
        let link = |field: &str, child: &Value| -> Value {
            let mut child = child.clone();
            let fk = self
                .schema
                .as_ref()
                .and_then(|s| s.relation_def(field))
                .map(|r| r.foreign_key.clone());
            if let (Some(fk), Value::Object(m)) = (fk, &mut child) {
                m.insert(fk, pk_value.clone());
            }
            child
        };
        for (field, child) in &write.single_relations {
            row.insert(field.clone(), link(field, child));
        }
        for (field, children) in &write.bulk_relations {
            let mut items = match row.remove(field) {
                Some(Value::Array(existing)) => existing,
                _ => Vec::new(),
            };
            if let Value::Array(new_items) = children {
                items.extend(new_items.iter().map(|c| link(field, c)));
            }
            row.insert(field.clone(), Value::Array(items));
        }
    }
}

fn matches(row: &Map<String, Value>, filter: &Filter) -> bool {
    filter
        .iter()
        .all(|(k, v)| row.get(k).map_or(v.is_null(), |rv| value_eq(rv, v)))
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (None | Some(Value::Null), None | Some(Value::Null)) => Ordering::Equal,
        (None | Some(Value::Null), _) => Ordering::Less,
        (_, None | Some(Value::Null)) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}

fn merge(row: &mut Map<String, Value>, data: &Map<String, Value>, pk: &str) {
    for (k, v) in data {
        if k != pk {
            row.insert(k.clone(), v.clone());
        }
    }
}

#[async_trait]
impl ModelHandle for MemoryModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn schema(&self) -> Option<&ModelSchema> {
        self.schema.as_ref()
    }

    async fn list(&self, query: &ListQuery) -> Result<Vec<Row>, PersistenceError> {
        let rows = self.rows.read().await;
        let mut hits: Vec<&Map<String, Value>> = rows.iter().filter(|r| matches(r, &query.filter)).collect();
        if !query.order_by.is_empty() {
            hits.sort_by(|a, b| {
                query
                    .order_by
                    .iter()
                    .map(|o| {
                        let ord = compare_values(a.get(&o.field), b.get(&o.field));
                        match o.direction {
                            SortDirection::Asc => ord,
                            SortDirection::Desc => ord.reverse(),
                        }
                    })
                    .find(|o| *o != Ordering::Equal)
                    .unwrap_or(Ordering::Equal)
            });
        }
        Ok(hits
            .into_iter()
            .skip(query.skip as usize)
            .take(query.take as usize)
            .map(|r| self.project(r, &query.projection))
            .collect())
    }

    async fn count(&self, filter: &Filter) -> Result<u64, PersistenceError> {
        let rows = self.rows.read().await;
        Ok(rows.iter().filter(|r| matches(r, filter)).count() as u64)
    }

    async fn get_by_id(&self, id: &Value, projection: &Projection) -> Result<Option<Row>, PersistenceError> {
        let rows = self.rows.read().await;
        Ok(Self::find_index(&rows, self.pk(), id).map(|i| self.project(&rows[i], projection)))
    }

    async fn find_first(&self, filter: &Filter) -> Result<Option<Row>, PersistenceError> {
        let rows = self.rows.read().await;
        Ok(rows
            .iter()
            .find(|r| matches(r, filter))
            .map(|r| self.project(r, &Projection::All)))
    }

    async fn create(&self, data: &Map<String, Value>, include: &[String]) -> Result<Row, PersistenceError> {
        let mut rows = self.rows.write().await;
        let row = self.prepare_insert(data.clone())?;
        self.check_unique(&rows, &row, None)?;
        let out = self.project(&row, &Self::include_projection(include));
        rows.push(row);
        Ok(out)
    }

    async fn update(&self, id: &Value, data: &Map<String, Value>, include: &[String]) -> Result<Row, PersistenceError> {
        let mut rows = self.rows.write().await;
        let pk = self.pk().to_string();
        let idx = Self::find_index(&rows, &pk, id).ok_or_else(|| PersistenceError::not_found(id))?;
        let mut row = rows[idx].clone();
        merge(&mut row, data, &pk);
        self.touch(&mut row);
        self.check_unique(&rows, &row, Some(idx))?;
        let out = self.project(&row, &Self::include_projection(include));
        rows[idx] = row;
        Ok(out)
    }

    async fn update_many(&self, filter: &Filter, data: &Map<String, Value>) -> Result<u64, PersistenceError> {
        let mut rows = self.rows.write().await;
        let pk = self.pk().to_string();
        let mut n = 0;
        for row in rows.iter_mut().filter(|r| matches(r, filter)) {
            merge(row, data, &pk);
            n += 1;
        }
        Ok(n)
    }

    async fn delete(&self, id: &Value) -> Result<Row, PersistenceError> {
        let mut rows = self.rows.write().await;
        let idx = Self::find_index(&rows, self.pk(), id).ok_or_else(|| PersistenceError::not_found(id))?;
        let row = rows.remove(idx);
        Ok(self.project(&row, &Projection::All))
    }

    async fn create_nested(&self, write: &RelationSplit) -> Result<Row, PersistenceError> {
        let mut rows = self.rows.write().await;
        let mut row = self.prepare_insert(write.main_data.clone())?;
        self.check_unique(&rows, &row, None)?;
        self.attach_relations(&mut row, write);
        let out = Value::Object(row.clone());
        rows.push(row);
        Ok(out)
    }

    async fn update_nested(&self, id: &Value, write: &RelationSplit) -> Result<Row, PersistenceError> {
        let mut rows = self.rows.write().await;
        let pk = self.pk().to_string();
        let idx = Self::find_index(&rows, &pk, id).ok_or_else(|| PersistenceError::not_found(id))?;
        let mut row = rows[idx].clone();
        merge(&mut row, &write.main_data, &pk);
        self.touch(&mut row);
        self.check_unique(&rows, &row, Some(idx))?;
        self.attach_relations(&mut row, write);
        let out = Value::Object(row.clone());
        rows[idx] = row;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FieldDef, RelationKind};
    use crate::model::OrderBy;
    use crate::relations::split_payload;
    use serde_json::json;

    fn users() -> MemoryModel {
        let schema = ModelSchema::new("User")
            .field(FieldDef::new("id", FieldType::Integer).with_default())
            .field(FieldDef::new("email", FieldType::String).required().unique())
            .field(FieldDef::new("name", FieldType::String))
            .relation("profile", RelationKind::Single, "Profile", "userId");
        MemoryModel::with_schema(schema).with_rows(vec![
            json!({ "id": 1, "email": "a@x.com", "name": "Ann" }),
            json!({ "id": 2, "email": "b@x.com", "name": "Bob" }),
            json!({ "id": 3, "email": "c@x.com", "name": "Cid" }),
        ])
    }

    fn obj(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn list_filters_sorts_and_pages() {
        let m = users();
        let q = ListQuery {
            order_by: vec![OrderBy {
                field: "name".into(),
                direction: SortDirection::Desc,
            }],
            skip: 1,
            take: 1,
            ..Default::default()
        };
        let rows = m.list(&q).await.unwrap();
        assert_eq!(rows, vec![json!({ "id": 2, "email": "b@x.com", "name": "Bob" })]);
        assert_eq!(m.count(&obj(json!({ "name": "Ann" }))).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn create_assigns_next_id_and_enforces_unique() {
        let m = users();
        let row = m.create(&obj(json!({ "email": "d@x.com" })), &[]).await.unwrap();
        assert_eq!(row["id"], 4);
        let err = m.create(&obj(json!({ "email": "a@x.com" })), &[]).await.unwrap_err();
        assert_eq!(err.code.as_deref(), Some("23505"));
        let err = m.create(&obj(json!({ "name": "no email" })), &[]).await.unwrap_err();
        assert_eq!(err.code.as_deref(), Some("23502"));
    }

    #[tokio::test]
    async fn nested_create_embeds_linked_relation() {
        let m = users();
        let split = split_payload(&obj(json!({ "email": "j@x.com", "profile": { "bio": "dev" } })));
        let row = m.create_nested(&split).await.unwrap();
        assert_eq!(row["profile"]["bio"], "dev");
        assert_eq!(row["profile"]["userId"], row["id"]);

        let hidden = m.get_by_id(&row["id"], &Projection::All).await.unwrap().unwrap();
        assert!(hidden.get("profile").is_none());
        let shown = m
            .get_by_id(&row["id"], &Projection::Include(vec!["profile".into()]))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(shown["profile"]["bio"], "dev");
    }

    #[tokio::test]
    async fn update_and_delete_missing_rows_are_not_found() {
        let m = users();
        let err = m.update(&json!(99), &obj(json!({ "name": "x" })), &[]).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(m.delete(&json!(99)).await.unwrap_err().is_not_found());
        let deleted = m.delete(&json!(1)).await.unwrap();
        assert_eq!(deleted["name"], "Ann");
        assert_eq!(m.rows().await.len(), 2);
    }

    #[tokio::test]
    async fn update_many_rewrites_matching_rows() {
        let m = users();
        let n = m
            .update_many(&obj(json!({ "name": "Bob" })), &obj(json!({ "name": "Robert" })))
            .await
            .unwrap();
        assert_eq!(n, 1);
        let row = m.find_first(&obj(json!({ "id": 2 }))).await.unwrap().unwrap();
        assert_eq!(row["name"], "Robert");
    }
}
