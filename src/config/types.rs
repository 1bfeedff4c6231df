//! Raw schema descriptor types matching the JSON model definitions.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    #[default]
    String,
    Integer,
    Float,
    Boolean,
    DateTime,
    Uuid,
    Json,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferentialAction {
    #[default]
    NoAction,
    Restrict,
    Cascade,
    SetNull,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ForeignKeyConfig {
    /// Referenced model name, matched case-insensitively against the registry.
    pub model: String,
    #[serde(default)]
    pub on_delete: ReferentialAction,
    #[serde(default)]
    pub on_update: ReferentialAction,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ValidationRule {
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub max_length: Option<u32>,
    #[serde(default)]
    pub min_length: Option<u32>,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub allowed: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    pub minimum: Option<f64>,
    #[serde(default)]
    pub maximum: Option<f64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    #[serde(rename = "type", default)]
    pub type_: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub unique: bool,
    /// Whether the store fills the field itself (sequence, NOW(), gen_random_uuid()).
    #[serde(default)]
    pub has_default: bool,
    #[serde(default)]
    pub references: Option<ForeignKeyConfig>,
    #[serde(default)]
    pub rules: Option<ValidationRule>,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, type_: FieldType) -> Self {
        FieldDef {
            name: name.into(),
            type_,
            required: false,
            unique: false,
            has_default: false,
            references: None,
            rules: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn with_default(mut self) -> Self {
        self.has_default = true;
        self
    }

    pub fn references(mut self, model: impl Into<String>, on_delete: ReferentialAction, on_update: ReferentialAction) -> Self {
        self.references = Some(ForeignKeyConfig {
            model: model.into(),
            on_delete,
            on_update,
        });
        self
    }

    pub fn rules(mut self, rules: ValidationRule) -> Self {
        self.rules = Some(rules);
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationKind {
    /// One related record, sent as a JSON object.
    Single,
    /// Many related records, sent as a JSON array.
    Bulk,
}

/// A declared relation: `target` rows carry `foreign_key` pointing at this model's primary key.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RelationDef {
    pub field: String,
    pub kind: RelationKind,
    pub target: String,
    pub foreign_key: String,
}

fn default_primary_key() -> String {
    "id".into()
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelSchema {
    pub name: String,
    /// Table name for SQL-backed models; defaults to `name`.
    #[serde(default)]
    pub table: Option<String>,
    /// Database schema (namespace) for SQL-backed models; defaults to `public`.
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default = "default_primary_key")]
    pub primary_key: String,
    pub fields: Vec<FieldDef>,
    #[serde(default)]
    pub relations: Vec<RelationDef>,
}

impl ModelSchema {
    pub fn new(name: impl Into<String>) -> Self {
        ModelSchema {
            name: name.into(),
            table: None,
            namespace: None,
            primary_key: default_primary_key(),
            fields: Vec::new(),
            relations: Vec::new(),
        }
    }

    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn primary_key(mut self, pk: impl Into<String>) -> Self {
        self.primary_key = pk.into();
        self
    }

    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    pub fn relation(mut self, field: impl Into<String>, kind: RelationKind, target: impl Into<String>, foreign_key: impl Into<String>) -> Self {
        self.relations.push(RelationDef {
            field: field.into(),
            kind,
            target: target.into(),
            foreign_key: foreign_key.into(),
        });
        self
    }

    pub fn table_name(&self) -> &str {
        self.table.as_deref().unwrap_or(&self.name)
    }

    pub fn namespace(&self) -> &str {
        self.namespace.as_deref().unwrap_or("public")
    }

    pub fn field_def(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn relation_def(&self, field: &str) -> Option<&RelationDef> {
        self.relations.iter().find(|r| r.field == field)
    }
}
