//! Schema validation: field uniqueness, primary keys and cross-model references.

use crate::config::ModelSchema;
use crate::error::ConfigError;
use std::collections::HashSet;

pub fn validate_schemas(schemas: &[ModelSchema]) -> Result<(), ConfigError> {
    let mut model_names = HashSet::new();
    for s in schemas {
        if s.name.trim().is_empty() {
            return Err(ConfigError::Validation("model name must not be empty".into()));
        }
        if !model_names.insert(s.name.to_lowercase()) {
            return Err(ConfigError::Validation(format!("duplicate model: {}", s.name)));
        }
    }

    for s in schemas {
        let mut fields = HashSet::new();
        for f in &s.fields {
            if !fields.insert(f.name.as_str()) {
                return Err(ConfigError::DuplicateField {
                    model: s.name.clone(),
                    field: f.name.clone(),
                });
            }
        }
        if !fields.contains(s.primary_key.as_str()) {
            return Err(ConfigError::InvalidPrimaryKey {
                model: s.name.clone(),
                field: s.primary_key.clone(),
            });
        }

        for f in &s.fields {
            if let Some(r) = &f.references {
                if !model_names.contains(&r.model.to_lowercase()) {
                    return Err(ConfigError::MissingReference {
                        kind: "model",
                        id: r.model.clone(),
                    });
                }
            }
        }

        for r in &s.relations {
            if fields.contains(r.field.as_str()) {
                return Err(ConfigError::DuplicateField {
                    model: s.name.clone(),
                    field: r.field.clone(),
                });
            }
            let target = schemas
                .iter()
                .find(|t| t.name.eq_ignore_ascii_case(&r.target))
                .ok_or_else(|| ConfigError::MissingReference {
                    kind: "model",
                    id: r.target.clone(),
                })?;
            if target.field_def(&r.foreign_key).is_none() {
                return Err(ConfigError::MissingReference {
                    kind: "field",
                    id: format!("{}.{}", target.name, r.foreign_key),
                });
            }
        }
    }
    Ok(())
}
