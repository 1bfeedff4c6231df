//! Advisory constraint checks before a write and cascade passes around it.
//!
//! Nothing here runs inside the write's transaction: a concurrent request can still
//! violate a constraint that passed here, and the store's own error is authoritative.

use crate::config::{ModelStructure, ReferentialAction};
use crate::model::{primary_key_of, value_eq, ListQuery, ModelHandle, ModelRegistry, Projection};
use serde_json::{Map, Value};

/// Upper bound on dependents fetched by one cascade-delete step.
const CASCADE_BATCH: u64 = 10_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteKind<'a> {
    Create,
    Update(&'a Value),
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConstraintReport {
    pub violations: Vec<String>,
}

impl ConstraintReport {
    pub fn is_ok(&self) -> bool {
        self.violations.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CascadeStep {
    pub field: String,
    pub target: Value,
    pub ok: bool,
    pub error: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct CascadeOutcome {
    pub steps: Vec<CascadeStep>,
    pub warnings: Vec<String>,
}

fn is_empty_value(v: Option<&Value>) -> bool {
    match v {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        _ => false,
    }
}

pub struct ConstraintAdvisor<'a> {
    structure: &'a ModelStructure,
    model: &'a dyn ModelHandle,
    registry: &'a ModelRegistry,
}

impl<'a> ConstraintAdvisor<'a> {
    pub fn new(structure: &'a ModelStructure, model: &'a dyn ModelHandle, registry: &'a ModelRegistry) -> Self {
        ConstraintAdvisor {
            structure,
            model,
            registry,
        }
    }

    /// Every required field present and non-empty. Create only.
    pub fn required_violations(&self, data: &Map<String, Value>) -> Vec<String> {
        self.structure
            .required_fields
            .iter()
            .filter(|f| is_empty_value(data.get(*f)))
            .map(|f| format!("{} is required", f))
            .collect()
    }

    /// Required, unique and foreign-key checks. Lookup failures are logged and skipped.
    pub async fn check(&self, data: &Map<String, Value>, kind: WriteKind<'_>) -> ConstraintReport {
        let mut violations = Vec::new();
        if kind == WriteKind::Create {
            violations.extend(self.required_violations(data));
        }

        for field in &self.structure.unique_fields {
            let Some(value) = data.get(field).filter(|v| !v.is_null()) else { continue };
            let mut filter = Map::new();
            filter.insert(field.clone(), value.clone());
            match self.model.find_first(&filter).await {
                Ok(Some(existing)) => {
                    let is_self = match kind {
                        WriteKind::Update(id) => existing
                            .get(&self.structure.primary_key)
                            .map_or(false, |pk| value_eq(pk, id)),
                        WriteKind::Create => false,
                    };
                    if !is_self {
                        violations.push(format!("{} must be unique", field));
                    }
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(model = %self.structure.model, field = %field, error = %e, "uniqueness lookup failed"),
            }
        }

        for fk in &self.structure.foreign_keys {
            let Some(value) = data.get(&fk.field).filter(|v| !v.is_null()) else { continue };
            let Some(target) = self.registry.get(&fk.referenced_model) else {
                tracing::debug!(model = %fk.referenced_model, "referenced model not in registry; skipping");
                continue;
            };
            match target.get_by_id(value, &Projection::All).await {
                Ok(Some(_)) => {}
                Ok(None) => violations.push(format!(
                    "{} references a missing {} ({})",
                    fk.field,
                    target.name(),
                    primary_key_of(target.as_ref())
                )),
                Err(e) => tracing::warn!(model = %fk.referenced_model, field = %fk.field, error = %e, "foreign key lookup failed"),
            }
        }

        ConstraintReport { violations }
    }

    /// Delete same-model rows whose cascade-on-delete field points at `id`, one at a time.
    pub async fn cascade_delete(&self, id: &Value) -> CascadeOutcome {
        let mut outcome = CascadeOutcome::default();
        for fk in self.structure.foreign_keys.iter().filter(|f| f.on_delete == ReferentialAction::Cascade) {
            let mut filter = Map::new();
            filter.insert(fk.field.clone(), id.clone());
            let dependents = match self.model.list(&ListQuery::filtered(filter, CASCADE_BATCH)).await {
                Ok(rows) => rows,
                Err(e) => {
                    outcome.warnings.push(format!("cascade lookup on {} failed: {}", fk.field, e));
                    continue;
                }
            };
            for row in dependents {
                let Some(dep_id) = row.get(&self.structure.primary_key).cloned() else { continue };
                if value_eq(&dep_id, id) {
                    continue;
                }
                let step = match self.model.delete(&dep_id).await {
                    Ok(_) => CascadeStep {
                        field: fk.field.clone(),
                        target: dep_id,
                        ok: true,
                        error: None,
                    },
                    Err(e) => {
                        outcome.warnings.push(format!("cascade delete of {} failed: {}", dep_id, e));
                        CascadeStep {
                            field: fk.field.clone(),
                            target: dep_id,
                            ok: false,
                            error: Some(e.to_string()),
                        }
                    }
                };
                outcome.steps.push(step);
            }
        }
        outcome
    }

    /// When a cascade-on-update field of `id` changes, rows referencing `id` through that field follow it
    /// to the new value. Rows that only share the old value are left alone.
    pub async fn cascade_update(&self, id: &Value, data: &Map<String, Value>) -> CascadeOutcome {
        let mut outcome = CascadeOutcome::default();
        let fields: Vec<_> = self
            .structure
            .foreign_keys
            .iter()
            .filter(|f| f.on_update == ReferentialAction::Cascade && data.contains_key(&f.field))
            .collect();
        if fields.is_empty() {
            return outcome;
        }
        let current = match self.model.get_by_id(id, &Projection::All).await {
            Ok(Some(row)) => row,
            Ok(None) => return outcome,
            Err(e) => {
                outcome.warnings.push(format!("cascade lookup of {} failed: {}", id, e));
                return outcome;
            }
        };
        for fk in fields {
            let (Some(old), Some(new)) = (current.get(&fk.field), data.get(&fk.field)) else { continue };
            if old.is_null() || value_eq(old, new) {
                continue;
            }
            let mut filter = Map::new();
            filter.insert(fk.field.clone(), id.clone());
            let mut set = Map::new();
            set.insert(fk.field.clone(), new.clone());
            match self.model.update_many(&filter, &set).await {
                Ok(_) => outcome.steps.push(CascadeStep {
                    field: fk.field.clone(),
                    target: id.clone(),
                    ok: true,
                    error: None,
                }),
                Err(e) => {
                    outcome.warnings.push(format!("cascade update of {} failed: {}", fk.field, e));
                    outcome.steps.push(CascadeStep {
                        field: fk.field.clone(),
                        target: id.clone(),
                        ok: false,
                        error: Some(e.to_string()),
                    });
                }
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FieldDef, FieldType, ModelSchema};
    use crate::error::PersistenceError;
    use crate::model::{Filter, MemoryModel, Row};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Arc;

    fn obj(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    fn user_schema() -> ModelSchema {
        ModelSchema::new("User")
            .field(FieldDef::new("id", FieldType::Integer).with_default())
            .field(FieldDef::new("email", FieldType::String).required().unique())
    }

    fn post_schema() -> ModelSchema {
        ModelSchema::new("Post")
            .field(FieldDef::new("id", FieldType::Integer).with_default())
            .field(FieldDef::new("title", FieldType::String).required())
            .field(FieldDef::new("slug", FieldType::String).unique())
            .field(FieldDef::new("content", FieldType::String))
            .field(FieldDef::new("authorId", FieldType::Integer).references("user", ReferentialAction::NoAction, ReferentialAction::NoAction))
    }

    fn comment_schema() -> ModelSchema {
        ModelSchema::new("Comment")
            .field(FieldDef::new("id", FieldType::Integer).with_default())
            .field(FieldDef::new("body", FieldType::String))
            .field(FieldDef::new("parentId", FieldType::Integer).references("Comment", ReferentialAction::Cascade, ReferentialAction::Cascade))
    }

    fn registry_with_users() -> ModelRegistry {
        let users = MemoryModel::with_schema(user_schema()).with_rows(vec![json!({ "id": 1, "email": "a@x.com" })]);
        ModelRegistry::new().with(Arc::new(users))
    }

    #[tokio::test]
    async fn reports_each_missing_required_field() {
        let structure = ModelStructure::from_schema(&post_schema());
        let posts = MemoryModel::with_schema(post_schema());
        let registry = ModelRegistry::new();
        let advisor = ConstraintAdvisor::new(&structure, &posts, &registry);

        for payload in [json!({ "content": "hi" }), json!({ "title": null }), json!({ "title": "" })] {
            let report = advisor.check(&obj(payload), WriteKind::Create).await;
            assert_eq!(report.violations, vec!["title is required"]);
        }
        let report = advisor.check(&obj(json!({ "title": "T" })), WriteKind::Create).await;
        assert!(report.is_ok());
        let report = advisor.check(&obj(json!({ "content": "x" })), WriteKind::Update(&json!(1))).await;
        assert!(report.is_ok());
    }

    #[tokio::test]
    async fn uniqueness_ignores_the_row_being_updated() {
        let structure = ModelStructure::from_schema(&post_schema());
        let posts = MemoryModel::with_schema(post_schema()).with_rows(vec![json!({ "id": 5, "title": "T", "slug": "t" })]);
        let registry = ModelRegistry::new();
        let advisor = ConstraintAdvisor::new(&structure, &posts, &registry);

        let clash = advisor.check(&obj(json!({ "title": "U", "slug": "t" })), WriteKind::Create).await;
        assert_eq!(clash.violations, vec!["slug must be unique"]);
        let same_row = advisor.check(&obj(json!({ "slug": "t" })), WriteKind::Update(&json!(5))).await;
        assert!(same_row.is_ok());
    }

    #[tokio::test]
    async fn foreign_keys_resolve_case_insensitively() {
        let structure = ModelStructure::from_schema(&post_schema());
        let posts = MemoryModel::with_schema(post_schema());
        let registry = registry_with_users();
        let advisor = ConstraintAdvisor::new(&structure, &posts, &registry);

        let ok = advisor.check(&obj(json!({ "title": "T", "authorId": 1 })), WriteKind::Create).await;
        assert!(ok.is_ok());
        let missing = advisor.check(&obj(json!({ "title": "T", "authorId": 42 })), WriteKind::Create).await;
        assert_eq!(missing.violations.len(), 1);
        assert!(missing.violations[0].starts_with("authorId references a missing User"));
    }

    #[tokio::test]
    async fn cascade_delete_removes_dependents() {
        let structure = ModelStructure::from_schema(&comment_schema());
        let comments = MemoryModel::with_schema(comment_schema()).with_rows(vec![
            json!({ "id": 1, "body": "root" }),
            json!({ "id": 2, "body": "reply", "parentId": 1 }),
            json!({ "id": 3, "body": "reply", "parentId": 1 }),
            json!({ "id": 4, "body": "other", "parentId": 9 }),
        ]);
        let registry = ModelRegistry::new();
        let advisor = ConstraintAdvisor::new(&structure, &comments, &registry);

        let outcome = advisor.cascade_delete(&json!(1)).await;
        assert!(outcome.warnings.is_empty());
        assert_eq!(outcome.steps.len(), 2);
        assert!(outcome.steps.iter().all(|s| s.ok));
        let left: Vec<Value> = comments.rows().await.iter().map(|r| r["id"].clone()).collect();
        assert_eq!(left, vec![json!(1), json!(4)]);
    }

    #[tokio::test]
    async fn cascade_update_moves_only_rows_referencing_the_updated_row() {
        let structure = ModelStructure::from_schema(&comment_schema());
        let comments = MemoryModel::with_schema(comment_schema()).with_rows(vec![
            json!({ "id": 7 }),
            json!({ "id": 8 }),
            json!({ "id": 1, "parentId": 7 }),
            json!({ "id": 2, "parentId": 7 }),
            json!({ "id": 3, "parentId": 1 }),
        ]);
        let registry = ModelRegistry::new();
        let advisor = ConstraintAdvisor::new(&structure, &comments, &registry);

        let outcome = advisor.cascade_update(&json!(1), &obj(json!({ "parentId": 8 }))).await;
        assert!(outcome.warnings.is_empty());
        assert_eq!(outcome.steps.len(), 1);
        assert_eq!(outcome.steps[0].target, json!(1));
        let rows = comments.rows().await;
        let parent_of = |id: i64| rows.iter().find(|r| r["id"] == id).map(|r| r["parentId"].clone());
        assert_eq!(parent_of(1), Some(json!(7)));
        assert_eq!(parent_of(2), Some(json!(7)));
        assert_eq!(parent_of(3), Some(json!(8)));
    }

    #[tokio::test]
    async fn cascade_update_skips_unchanged_values() {
        let structure = ModelStructure::from_schema(&comment_schema());
        let comments = MemoryModel::with_schema(comment_schema()).with_rows(vec![
            json!({ "id": 1, "parentId": 7 }),
            json!({ "id": 3, "parentId": 1 }),
        ]);
        let registry = ModelRegistry::new();
        let advisor = ConstraintAdvisor::new(&structure, &comments, &registry);

        let outcome = advisor.cascade_update(&json!(1), &obj(json!({ "parentId": 7 }))).await;
        assert!(outcome.steps.is_empty());
        assert_eq!(comments.rows().await[1]["parentId"], 1);
    }

    struct BrokenLookups(MemoryModel);

    #[async_trait]
    impl ModelHandle for BrokenLookups {
        fn name(&self) -> &str {
            self.0.name()
        }
        fn schema(&self) -> Option<&ModelSchema> {
            self.0.schema()
        }
        async fn list(&self, _query: &ListQuery) -> Result<Vec<Row>, PersistenceError> {
            Err(PersistenceError::other("connection reset"))
        }
        async fn count(&self, filter: &Filter) -> Result<u64, PersistenceError> {
            self.0.count(filter).await
        }
        async fn get_by_id(&self, id: &Value, projection: &Projection) -> Result<Option<Row>, PersistenceError> {
            self.0.get_by_id(id, projection).await
        }
        async fn find_first(&self, _filter: &Filter) -> Result<Option<Row>, PersistenceError> {
            Err(PersistenceError::other("connection reset"))
        }
        async fn create(&self, data: &Map<String, Value>, include: &[String]) -> Result<Row, PersistenceError> {
            self.0.create(data, include).await
        }
        async fn update(&self, id: &Value, data: &Map<String, Value>, include: &[String]) -> Result<Row, PersistenceError> {
            self.0.update(id, data, include).await
        }
        async fn update_many(&self, filter: &Filter, data: &Map<String, Value>) -> Result<u64, PersistenceError> {
            self.0.update_many(filter, data).await
        }
        async fn delete(&self, id: &Value) -> Result<Row, PersistenceError> {
            self.0.delete(id).await
        }
    }

    #[tokio::test]
    async fn lookup_failures_are_advisory() {
        let structure = ModelStructure::from_schema(&comment_schema());
        let comments = BrokenLookups(MemoryModel::with_schema(comment_schema()));
        let registry = ModelRegistry::new();
        let advisor = ConstraintAdvisor::new(&structure, &comments, &registry);

        let outcome = advisor.cascade_delete(&json!(1)).await;
        assert_eq!(outcome.warnings.len(), 1);
        assert!(outcome.warnings[0].contains("connection reset"));

        let post_structure = ModelStructure::from_schema(&post_schema());
        let posts = BrokenLookups(MemoryModel::with_schema(post_schema()));
        let advisor = ConstraintAdvisor::new(&post_structure, &posts, &registry);
        let report = advisor.check(&obj(json!({ "title": "T", "slug": "s" })), WriteKind::Create).await;
        assert!(report.is_ok());
    }
}
