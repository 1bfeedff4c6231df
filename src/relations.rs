//! Relation detection: split a write payload into scalar data and nested relation payloads.

use crate::config::{ModelStructure, RelationDef, RelationKind};
use crate::error::AppError;
use serde_json::{Map, Value};
use std::collections::HashSet;

/// Keys never treated as relations, whatever their value.
pub const NON_RELATION_KEYS: [&str; 4] = ["id", "createdAt", "updatedAt", "uploadedFiles"];

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RelationSplit {
    pub main_data: Map<String, Value>,
    /// Relation name to a JSON object.
    pub single_relations: Map<String, Value>,
    /// Relation name to a JSON array.
    pub bulk_relations: Map<String, Value>,
}

impl RelationSplit {
    pub fn has_relations(&self) -> bool {
        !self.single_relations.is_empty() || !self.bulk_relations.is_empty()
    }

    pub fn relation_names(&self) -> Vec<String> {
        self.single_relations
            .keys()
            .chain(self.bulk_relations.keys())
            .cloned()
            .collect()
    }
}

/// Shape heuristic: objects are single relations, arrays are bulk relations.
/// Knows nothing about the model, so any nested object counts as a relation.
pub fn split_payload(payload: &Map<String, Value>) -> RelationSplit {
    let mut split = RelationSplit::default();
    for (key, value) in payload {
        if NON_RELATION_KEYS.contains(&key.as_str()) {
            split.main_data.insert(key.clone(), value.clone());
            continue;
        }
        match value {
            Value::Array(_) => {
                split.bulk_relations.insert(key.clone(), value.clone());
            }
            Value::Object(_) => {
                split.single_relations.insert(key.clone(), value.clone());
            }
            _ => {
                split.main_data.insert(key.clone(), value.clone());
            }
        }
    }
    split
}

/// Only declared relation fields are split; other nested values stay as scalar (JSON) data.
/// A declared relation whose value has the wrong shape is rejected. `null` is left as data.
pub fn split_declared(payload: &Map<String, Value>, relations: &[RelationDef]) -> Result<RelationSplit, AppError> {
    let mut split = RelationSplit::default();
    for (key, value) in payload {
        let declared = relations.iter().find(|r| r.field == *key);
        match (declared, value) {
            (Some(_), Value::Null) | (None, _) => {
                split.main_data.insert(key.clone(), value.clone());
            }
            (Some(r), Value::Object(_)) if r.kind == RelationKind::Single => {
                split.single_relations.insert(key.clone(), value.clone());
            }
            (Some(r), Value::Array(_)) if r.kind == RelationKind::Bulk => {
                split.bulk_relations.insert(key.clone(), value.clone());
            }
            (Some(r), _) => {
                let expected = match r.kind {
                    RelationKind::Single => "an object",
                    RelationKind::Bulk => "an array",
                };
                return Err(AppError::Validation(format!("relation {} must be {}", key, expected)));
            }
        }
    }
    Ok(split)
}

pub enum RelationDetector<'a> {
    Structural,
    Declared(&'a [RelationDef]),
}

impl<'a> RelationDetector<'a> {
    /// Declared mode when the model's schema lists relations, the shape heuristic otherwise.
    pub fn for_structure(structure: &'a ModelStructure) -> Self {
        if structure.relations.is_empty() {
            RelationDetector::Structural
        } else {
            RelationDetector::Declared(&structure.relations)
        }
    }

    /// Splits `payload`; keys in `excluded` are dropped from the write.
    pub fn split(&self, payload: &Map<String, Value>, excluded: &HashSet<String>) -> Result<RelationSplit, AppError> {
        let mut split = match self {
            RelationDetector::Structural => split_payload(payload),
            RelationDetector::Declared(relations) => split_declared(payload, relations)?,
        };
        for name in excluded {
            if split.single_relations.remove(name).is_some() || split.bulk_relations.remove(name).is_some() {
                tracing::debug!(relation = %name, "dropping excluded relation from write");
            }
        }
        Ok(split)
    }
}
