//! Resolved model structure: schema flattened for constraint checks and query filtering.

use crate::config::{ModelSchema, ReferentialAction, RelationDef};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq)]
pub struct ForeignKey {
    pub field: String,
    pub referenced_model: String,
    pub on_delete: ReferentialAction,
    pub on_update: ReferentialAction,
}

#[derive(Clone, Debug, Default)]
pub struct ModelStructure {
    pub model: String,
    pub primary_key: String,
    /// Must be present on create: not the primary key and no store default.
    pub required_fields: Vec<String>,
    pub optional_fields: Vec<String>,
    pub unique_fields: Vec<String>,
    pub foreign_keys: Vec<ForeignKey>,
    pub relations: Vec<RelationDef>,
    /// Scalar fields plus relation names. `None` when the model exposed no schema.
    pub known_fields: Option<HashSet<String>>,
}

impl ModelStructure {
    /// Structure for a model with no metadata: nothing is enforced and nothing is filtered.
    pub fn empty(model: impl Into<String>) -> Self {
        ModelStructure {
            model: model.into(),
            primary_key: "id".into(),
            ..Default::default()
        }
    }

    pub fn from_schema(schema: &ModelSchema) -> Self {
        let mut required_fields = Vec::new();
        let mut optional_fields = Vec::new();
        let mut unique_fields = Vec::new();
        let mut foreign_keys = Vec::new();
        let mut known_fields = HashSet::new();

        for f in &schema.fields {
            known_fields.insert(f.name.clone());
            let is_pk = f.name == schema.primary_key;
            if f.required && !is_pk && !f.has_default {
                required_fields.push(f.name.clone());
            } else if !is_pk {
                optional_fields.push(f.name.clone());
            }
            if f.unique && !is_pk {
                unique_fields.push(f.name.clone());
            }
            if let Some(r) = &f.references {
                foreign_keys.push(ForeignKey {
                    field: f.name.clone(),
                    referenced_model: r.model.clone(),
                    on_delete: r.on_delete,
                    on_update: r.on_update,
                });
            }
        }
        known_fields.insert(schema.primary_key.clone());
        for r in &schema.relations {
            known_fields.insert(r.field.clone());
        }

        ModelStructure {
            model: schema.name.clone(),
            primary_key: schema.primary_key.clone(),
            required_fields,
            optional_fields,
            unique_fields,
            foreign_keys,
            relations: schema.relations.clone(),
            known_fields: Some(known_fields),
        }
    }

    pub fn is_known(&self, field: &str) -> bool {
        self.known_fields.as_ref().map_or(true, |k| k.contains(field))
    }

    pub fn is_introspected(&self) -> bool {
        self.known_fields.is_some()
    }
}

/// Structures keyed by lowercase model name. Built once, then shared read-only.
#[derive(Clone, Debug, Default)]
pub struct StructureCache {
    by_model: HashMap<String, Arc<ModelStructure>>,
}

impl StructureCache {
    /// Returns the cached structure, computing it from `schema` on first use.
    pub fn get_or_resolve(&mut self, model: &str, schema: Option<&ModelSchema>) -> Arc<ModelStructure> {
        self.by_model
            .entry(model.to_lowercase())
            .or_insert_with(|| {
                Arc::new(match schema {
                    Some(s) => ModelStructure::from_schema(s),
                    None => {
                        tracing::warn!(model = %model, "no schema exposed; constraints disabled for model");
                        ModelStructure::empty(model)
                    }
                })
            })
            .clone()
    }

    pub fn get(&self, model: &str) -> Option<&Arc<ModelStructure>> {
        self.by_model.get(&model.to_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FieldDef, FieldType, RelationKind};

    fn post_schema() -> ModelSchema {
        ModelSchema::new("Post")
            .field(FieldDef::new("id", FieldType::Integer).required().with_default())
            .field(FieldDef::new("title", FieldType::String).required())
            .field(FieldDef::new("slug", FieldType::String).required().unique())
            .field(FieldDef::new("content", FieldType::String))
            .field(FieldDef::new("createdAt", FieldType::DateTime).required().with_default())
            .field(
                FieldDef::new("authorId", FieldType::Integer)
                    .references("User", ReferentialAction::Cascade, ReferentialAction::NoAction),
            )
            .relation("comments", RelationKind::Bulk, "Comment", "postId")
    }

    #[test]
    fn required_excludes_primary_key_and_defaults() {
        let s = ModelStructure::from_schema(&post_schema());
        assert_eq!(s.required_fields, vec!["title", "slug"]);
        assert_eq!(s.optional_fields, vec!["content", "createdAt", "authorId"]);
        assert_eq!(s.unique_fields, vec!["slug"]);
        assert_eq!(s.primary_key, "id");
        assert_eq!(s.foreign_keys.len(), 1);
        assert_eq!(s.foreign_keys[0].referenced_model, "User");
        assert!(s.is_known("comments"));
        assert!(!s.is_known("password"));
    }

    #[test]
    fn empty_structure_knows_everything() {
        let s = ModelStructure::empty("Anything");
        assert!(!s.is_introspected());
        assert!(s.is_known("whatever"));
        assert!(s.required_fields.is_empty());
    }

    #[test]
    fn cache_is_keyed_case_insensitively() {
        let mut cache = StructureCache::default();
        let schema = post_schema();
        let a = cache.get_or_resolve("Post", Some(&schema));
        let b = cache.get_or_resolve("post", None);
        assert!(Arc::ptr_eq(&a, &b));
        assert!(cache.get("POST").is_some());
    }
}
