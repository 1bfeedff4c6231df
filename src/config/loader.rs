//! Load model schemas from JSON (string or file) and validate them.

use crate::config::{validate_schemas, ModelSchema};
use crate::error::ConfigError;
use std::path::Path;

/// Parse a JSON array of model schemas and validate cross references.
pub fn load_schemas_from_str(json: &str) -> Result<Vec<ModelSchema>, ConfigError> {
    let schemas: Vec<ModelSchema> = serde_json::from_str(json).map_err(|e| ConfigError::Load(e.to_string()))?;
    validate_schemas(&schemas)?;
    Ok(schemas)
}

/// Read `path` (a JSON file holding an array of model schemas).
pub async fn load_schemas_from_path(path: impl AsRef<Path>) -> Result<Vec<ModelSchema>, ConfigError> {
    let path = path.as_ref();
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))?;
    load_schemas_from_str(&content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FieldType, ReferentialAction, RelationKind};

    const SCHEMAS: &str = r#"[
        {
            "name": "User",
            "table": "users",
            "fields": [
                { "name": "id", "type": "integer", "has_default": true },
                { "name": "email", "type": "string", "required": true, "unique": true,
                  "rules": { "format": "email" } },
                { "name": "password", "type": "string" }
            ],
            "relations": [
                { "field": "posts", "kind": "bulk", "target": "Post", "foreign_key": "authorId" }
            ]
        },
        {
            "name": "Post",
            "fields": [
                { "name": "id", "type": "integer", "has_default": true },
                { "name": "title", "required": true },
                { "name": "authorId", "type": "integer",
                  "references": { "model": "User", "on_delete": "cascade" } }
            ]
        }
    ]"#;

    #[test]
    fn parses_defaults_and_references() {
        let schemas = load_schemas_from_str(SCHEMAS).unwrap();
        assert_eq!(schemas.len(), 2);
        let user = &schemas[0];
        assert_eq!(user.table_name(), "users");
        assert_eq!(user.namespace(), "public");
        assert_eq!(user.primary_key, "id");
        assert_eq!(user.relations[0].kind, RelationKind::Bulk);

        let post = &schemas[1];
        assert_eq!(post.table_name(), "Post");
        assert_eq!(post.field_def("title").unwrap().type_, FieldType::String);
        let fk = post.field_def("authorId").unwrap().references.as_ref().unwrap();
        assert_eq!(fk.on_delete, ReferentialAction::Cascade);
        assert_eq!(fk.on_update, ReferentialAction::NoAction);
    }

    #[test]
    fn malformed_json_is_a_load_error() {
        assert!(matches!(load_schemas_from_str("{not json"), Err(ConfigError::Load(_))));
    }
}
