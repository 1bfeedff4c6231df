//! Model handle contract consumed by the generated routes, plus the bundled engines.

mod memory;
mod postgres;
mod query;

pub use memory::MemoryModel;
pub use postgres::PgModel;
pub use query::{ListQuery, OrderBy, Projection, SortDirection};

use crate::config::ModelSchema;
use crate::error::PersistenceError;
use crate::relations::RelationSplit;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

pub type Row = Value;
pub type Filter = Map<String, Value>;

/// Reference to one persistence collection. Supplied by the caller; routes never create or drop it.
#[async_trait]
pub trait ModelHandle: Send + Sync {
    fn name(&self) -> &str;

    /// Metadata the store exposes about this model. `None` disables constraint checks and field filtering.
    fn schema(&self) -> Option<&ModelSchema> {
        None
    }

    async fn list(&self, query: &ListQuery) -> Result<Vec<Row>, PersistenceError>;

    async fn count(&self, filter: &Filter) -> Result<u64, PersistenceError>;

    async fn get_by_id(&self, id: &Value, projection: &Projection) -> Result<Option<Row>, PersistenceError>;

    async fn find_first(&self, filter: &Filter) -> Result<Option<Row>, PersistenceError>;

    async fn create(&self, data: &Map<String, Value>, include: &[String]) -> Result<Row, PersistenceError>;

    /// Fails with a not-found code when no row has `id`.
    async fn update(&self, id: &Value, data: &Map<String, Value>, include: &[String]) -> Result<Row, PersistenceError>;

    async fn update_many(&self, filter: &Filter, data: &Map<String, Value>) -> Result<u64, PersistenceError>;

    /// Fails with a not-found code when no row has `id`.
    async fn delete(&self, id: &Value) -> Result<Row, PersistenceError>;

    /// Parent plus relation rows written as one atomic unit; relations are returned embedded.
    async fn create_nested(&self, write: &RelationSplit) -> Result<Row, PersistenceError> {
        let _ = write;
        Err(PersistenceError::unsupported("nested create"))
    }

    /// Updates the parent and creates the relation rows, atomically.
    async fn update_nested(&self, id: &Value, write: &RelationSplit) -> Result<Row, PersistenceError> {
        let _ = (id, write);
        Err(PersistenceError::unsupported("nested update"))
    }
}

/// Model name to handle, looked up case-insensitively. Used for foreign-key resolution.
#[derive(Clone, Default)]
pub struct ModelRegistry {
    models: HashMap<String, Arc<dyn ModelHandle>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, model: Arc<dyn ModelHandle>) -> &mut Self {
        self.models.insert(model.name().to_lowercase(), model);
        self
    }

    pub fn with(mut self, model: Arc<dyn ModelHandle>) -> Self {
        self.insert(model);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ModelHandle>> {
        self.models.get(&name.to_lowercase()).cloned()
    }
}

/// Primary key field of a model: from its schema, else `id`.
pub fn primary_key_of(model: &dyn ModelHandle) -> &str {
    model.schema().map(|s| s.primary_key.as_str()).unwrap_or("id")
}

/// JSON equality that treats `1` and `1.0` as the same value.
pub(crate) fn value_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(n), Value::Number(m)) => n.as_f64() == m.as_f64(),
        _ => a == b,
    }
}
