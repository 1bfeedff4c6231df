//! Architect CRUD: generated REST endpoints over caller-supplied model handles.

pub mod config;
pub mod constraints;
pub mod error;
pub mod handlers;
pub mod hooks;
pub mod model;
pub mod relations;
pub mod response;
pub mod routes;
pub mod service;
pub mod sql;

pub use config::{
    load_schemas_from_path, load_schemas_from_str, validate_schemas, FieldDef, FieldType, ModelSchema, ModelStructure,
    Operation, ReferentialAction, RelationKind, RouteConfig, Settings, ValidationRule,
};
pub use constraints::{CascadeOutcome, ConstraintAdvisor, ConstraintReport, WriteKind};
pub use error::{AppError, ConfigError, PersistenceError};
pub use hooks::{hook, middleware, validator, HookInput, ValidationOutcome};
pub use model::{ListQuery, MemoryModel, ModelHandle, ModelRegistry, PgModel, Projection};
pub use relations::{split_declared, split_payload, RelationDetector, RelationSplit};
pub use response::{FormatOptions, ResponseEnvelope, ResponseFormatter, ResponseKind, Verb};
pub use routes::{common_routes, plugin_fn, CrudRouter, Plugin};
