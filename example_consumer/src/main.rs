//! Example consumer: mounts generated CRUD routes for users and posts.
//!
//! Run from repo root: `cargo run -p example-consumer`
//! With `DATABASE_URL` and `SCHEMA_PATH` set, models are served from PostgreSQL;
//! otherwise seeded in-memory models are used.

use architect_crud::{
    common_routes, load_schemas_from_path, validator, CrudRouter, FieldDef, FieldType, MemoryModel, ModelHandle,
    ModelRegistry, ModelSchema, Operation, PgModel, ReferentialAction, RelationKind, RouteConfig, Settings,
    ValidationOutcome,
};
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;

fn demo_schemas() -> Vec<ModelSchema> {
    vec![
        ModelSchema::new("User")
            .field(FieldDef::new("id", FieldType::Integer).with_default())
            .field(FieldDef::new("name", FieldType::String))
            .field(FieldDef::new("email", FieldType::String).required().unique())
            .field(FieldDef::new("password", FieldType::String))
            .field(FieldDef::new("createdAt", FieldType::DateTime).with_default())
            .relation("posts", RelationKind::Bulk, "Post", "authorId"),
        ModelSchema::new("Post")
            .field(FieldDef::new("id", FieldType::Integer).with_default())
            .field(FieldDef::new("title", FieldType::String).required())
            .field(FieldDef::new("content", FieldType::String))
            .field(FieldDef::new("authorId", FieldType::Integer).references(
                "User",
                ReferentialAction::Cascade,
                ReferentialAction::Cascade,
            )),
    ]
}

async fn models() -> Result<Vec<Arc<dyn ModelHandle>>, Box<dyn std::error::Error>> {
    let (Ok(url), Ok(path)) = (dotenvy::var("DATABASE_URL"), dotenvy::var("SCHEMA_PATH")) else {
        let mut handles: Vec<Arc<dyn ModelHandle>> = Vec::new();
        for schema in demo_schemas() {
            let seed = if schema.name == "User" {
                vec![json!({ "id": 1, "name": "Ada", "email": "ada@example.com", "password": "hidden" })]
            } else {
                Vec::new()
            };
            handles.push(Arc::new(MemoryModel::with_schema(schema).with_rows(seed)));
        }
        return Ok(handles);
    };

    let schemas = load_schemas_from_path(&path).await?;
    let pool = sqlx::postgres::PgPoolOptions::new().max_connections(5).connect(&url).await?;
    Ok(schemas
        .iter()
        .map(|schema| {
            let model = schemas
                .iter()
                .fold(PgModel::new(pool.clone(), schema.clone()), |m, s| m.with_related(s.clone()));
            Arc::new(model) as Arc<dyn ModelHandle>
        })
        .collect())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("architect_crud=info")),
        )
        .init();

    let settings = Settings::from_env();
    let handles = models().await?;
    let registry = handles
        .iter()
        .fold(ModelRegistry::new(), |r, m| r.with(m.clone()));

    let mut router = CrudRouter::new(settings.clone(), registry);
    for model in handles {
        let path = format!("/api/v1/{}s", model.name().to_lowercase());
        let config = RouteConfig::new().nested_writes(true).validate(
            Operation::Create,
            validator(|body| async move {
                match body.get("email").and_then(|v| v.as_str()) {
                    Some(e) if !e.contains('@') => ValidationOutcome::invalid("email must contain '@'"),
                    _ => ValidationOutcome::valid(),
                }
            }),
        );
        router.register(&path, model, config)?;
    }

    let app = router.into_router().merge(common_routes(&settings));
    let listener = TcpListener::bind("127.0.0.1:3000").await?;
    let port = listener.local_addr()?.port();
    tracing::info!("Example consumer listening on http://127.0.0.1:{}", port);
    axum::serve(listener, app).await?;
    Ok(())
}
