//! Handlers for the five generated operations. Each one runs the fixed sequence
//! before-hook, validation, constraint check, cascade advisory, persistence, after-hook,
//! and turns any failure into a formatted error response.

use crate::config::{ModelStructure, Operation, RouteConfig, Settings};
use crate::constraints::{CascadeOutcome, ConstraintAdvisor, WriteKind};
use crate::error::AppError;
use crate::hooks::HookInput;
use crate::model::{ListQuery, ModelHandle, ModelRegistry, Projection};
use crate::relations::{RelationDetector, RelationSplit};
use crate::response::{FormatOptions, ResponseFormatter, ResponseKind, HEADER_CORRELATION_ID};
use crate::service::{parse_id, parse_list_query, parse_projection, strip_fields, FieldPolicy, RequestValidator};
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// Everything one registered path needs, shared read-only by its handlers.
pub struct RouteContext {
    pub path: String,
    pub model: Arc<dyn ModelHandle>,
    pub config: RouteConfig,
    pub structure: Arc<ModelStructure>,
    pub registry: ModelRegistry,
    pub formatter: ResponseFormatter,
    pub settings: Arc<Settings>,
    pub policy: FieldPolicy,
}

pub type SharedContext = Arc<RouteContext>;

/// Incoming `x-correlation-id` or `x-request-id`, else a fresh v4 uuid.
pub fn correlation_id(headers: &HeaderMap) -> String {
    [HEADER_CORRELATION_ID, "x-request-id"]
        .iter()
        .find_map(|h| headers.get(*h).and_then(|v| v.to_str().ok()))
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

/// Request body as a JSON object. Empty or non-object bodies are rejected.
fn body_object(bytes: &Bytes) -> Result<Map<String, Value>, AppError> {
    if bytes.is_empty() {
        return Err(AppError::BadRequest("request body must be a JSON object".into()));
    }
    match serde_json::from_slice::<Value>(bytes) {
        Ok(Value::Object(m)) => Ok(m),
        Ok(_) => Err(AppError::BadRequest("request body must be a JSON object".into())),
        Err(e) => Err(AppError::BadRequest(format!("invalid JSON body: {}", e))),
    }
}

impl RouteContext {
    fn advisor(&self) -> ConstraintAdvisor<'_> {
        ConstraintAdvisor::new(&self.structure, self.model.as_ref(), &self.registry)
    }

    async fn run_before(&self, op: Operation, id: Option<&Value>, payload: Value) -> Result<Option<Value>, AppError> {
        match self.config.before.get(&op) {
            Some(h) => {
                h(HookInput {
                    operation: op,
                    id: id.cloned(),
                    payload,
                })
                .await
            }
            None => Ok(None),
        }
    }

    /// Result after the after-hook, and whether the hook replaced it.
    async fn run_after(&self, op: Operation, id: Option<&Value>, result: Value) -> Result<(Value, bool), AppError> {
        let Some(h) = self.config.after.get(&op) else { return Ok((result, false)) };
        let replacement = h(HookInput {
            operation: op,
            id: id.cloned(),
            payload: result.clone(),
        })
        .await?;
        Ok(match replacement {
            Some(v) => (v, true),
            None => (result, false),
        })
    }

    /// Before-hook that may rewrite a create/update body; the rewrite must stay an object.
    async fn rewrite_body(&self, op: Operation, id: Option<&Value>, body: Map<String, Value>) -> Result<Map<String, Value>, AppError> {
        match self.run_before(op, id, Value::Object(body.clone())).await? {
            Some(Value::Object(m)) => Ok(m),
            Some(other) => Err(AppError::Internal(format!(
                "before-{} hook must return an object, got {}",
                op.as_str(),
                other
            ))),
            None => Ok(body),
        }
    }

    async fn validate_body(&self, op: Operation, body: &Map<String, Value>) -> Result<(), AppError> {
        if let Some(v) = self.config.validators.get(&op) {
            let outcome = v(Value::Object(body.clone())).await;
            if !outcome.is_valid {
                return Err(AppError::Validation(
                    outcome.message.unwrap_or_else(|| format!("{} rejected by validator", op.as_str())),
                ));
            }
        }
        if let Some(schema) = self.model.schema() {
            RequestValidator::validate(body, &schema.fields)?;
        }
        Ok(())
    }

    async fn check_constraints(&self, body: &Map<String, Value>, kind: WriteKind<'_>) -> Result<(), AppError> {
        if !self.config.check_constraints {
            return Ok(());
        }
        let report = self.advisor().check(body, kind).await;
        if report.is_ok() {
            Ok(())
        } else {
            Err(AppError::Constraint(report.violations))
        }
    }

    fn split(&self, body: &Map<String, Value>) -> Result<RelationSplit, AppError> {
        let split = RelationDetector::for_structure(&self.structure).split(body, &self.config.excluded_relations)?;
        if split.has_relations() && !self.config.nested_writes {
            return Err(AppError::BadRequest(format!(
                "nested writes are disabled for {}: {}",
                self.path,
                split.relation_names().join(", ")
            )));
        }
        Ok(split)
    }

    fn log_cascade(&self, op: Operation, outcome: &CascadeOutcome, cid: &str) {
        for w in &outcome.warnings {
            tracing::warn!(
                model = %self.model.name(),
                operation = op.as_str(),
                correlation_id = %cid,
                warning = %w,
                "cascade step failed"
            );
        }
    }

    fn respond(&self, op: Operation, data: Value, status: Option<StatusCode>, started: Instant, cid: String) -> Response {
        let mut opts = FormatOptions::timed(started, Some(cid));
        opts.status = status;
        opts.primary_key = Some(self.structure.primary_key.clone());
        self.formatter.format(ResponseKind::Ok, op.verb(), data, opts).into_response()
    }

    fn fail(&self, op: Operation, err: AppError, started: Instant, cid: String) -> Response {
        let status = err.status();
        tracing::error!(
            model = %self.model.name(),
            operation = op.as_str(),
            code = err.code(),
            status = status.as_u16(),
            correlation_id = %cid,
            error = %err,
            "request failed"
        );
        if let Some(handler) = &self.config.error_handler {
            return handler(&err, op);
        }
        self.formatter
            .error(op.verb(), &err, FormatOptions::timed(started, Some(cid)))
            .into_response()
    }

    async fn list(&self, params: HashMap<String, String>) -> Result<Value, AppError> {
        let mut query = parse_list_query(&params, &self.structure, &self.policy, &self.settings)?;
        let as_json = serde_json::to_value(&query).map_err(|e| AppError::Internal(e.to_string()))?;
        if let Some(replacement) = self.run_before(Operation::List, None, as_json).await? {
            query = serde_json::from_value::<ListQuery>(replacement)
                .map_err(|e| AppError::Internal(format!("before-list hook returned an invalid query: {}", e)))?;
        }
        let (mut rows, count) = tokio::try_join!(self.model.list(&query), self.model.count(&query.filter))?;
        for row in &mut rows {
            strip_fields(row, &self.policy.excluded_fields);
        }
        let result = json!({ "data": rows, "count": count });
        Ok(self.run_after(Operation::List, None, result).await?.0)
    }

    async fn get(&self, raw_id: &str, params: HashMap<String, String>) -> Result<Value, AppError> {
        let id = parse_id(raw_id);
        if let Some(mut substitute) = self.run_before(Operation::Get, Some(&id), Value::Null).await? {
            strip_fields(&mut substitute, &self.policy.excluded_fields);
            return Ok(substitute);
        }
        let projection = parse_projection(&params, &self.structure, &self.policy)?;
        let mut row = self
            .model
            .get_by_id(&id, &projection)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("{} {}", self.model.name(), raw_id)))?;
        strip_fields(&mut row, &self.policy.excluded_fields);
        Ok(self.run_after(Operation::Get, Some(&id), row).await?.0)
    }

    async fn create(&self, bytes: Bytes) -> Result<Value, AppError> {
        let body = self.rewrite_body(Operation::Create, None, body_object(&bytes)?).await?;
        self.validate_body(Operation::Create, &body).await?;
        self.check_constraints(&body, WriteKind::Create).await?;
        let split = self.split(&body)?;
        let mut row = if split.has_relations() {
            self.model.create_nested(&split).await?
        } else {
            self.model.create(&split.main_data, &[]).await?
        };
        strip_fields(&mut row, &self.policy.excluded_fields);
        Ok(self.run_after(Operation::Create, None, row).await?.0)
    }

    async fn update(&self, raw_id: &str, bytes: Bytes, cid: &str) -> Result<Value, AppError> {
        let id = parse_id(raw_id);
        let body = self.rewrite_body(Operation::Update, Some(&id), body_object(&bytes)?).await?;
        self.validate_body(Operation::Update, &body).await?;
        self.check_constraints(&body, WriteKind::Update(&id)).await?;
        let split = self.split(&body)?;
        if self.config.cascade {
            let outcome = self.advisor().cascade_update(&id, &split.main_data).await;
            self.log_cascade(Operation::Update, &outcome, cid);
        }
        let mut row = if split.has_relations() {
            self.model.update_nested(&id, &split).await?
        } else {
            self.model.update(&id, &split.main_data, &[]).await?
        };
        strip_fields(&mut row, &self.policy.excluded_fields);
        Ok(self.run_after(Operation::Update, Some(&id), row).await?.0)
    }

    /// Deleted row and whether a hook supplied the result.
    async fn delete(&self, raw_id: &str, cid: &str) -> Result<(Value, bool), AppError> {
        let id = parse_id(raw_id);
        if let Some(mut substitute) = self.run_before(Operation::Delete, Some(&id), Value::Null).await? {
            strip_fields(&mut substitute, &self.policy.excluded_fields);
            return Ok((substitute, true));
        }
        if self.config.cascade {
            let outcome = self.advisor().cascade_delete(&id).await;
            self.log_cascade(Operation::Delete, &outcome, cid);
        }
        let mut row = self.model.delete(&id).await?;
        strip_fields(&mut row, &self.policy.excluded_fields);
        self.run_after(Operation::Delete, Some(&id), row).await
    }
}

pub async fn list(
    State(ctx): State<SharedContext>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let started = Instant::now();
    let cid = correlation_id(&headers);
    match ctx.list(params).await {
        Ok(data) => ctx.respond(Operation::List, data, None, started, cid),
        Err(e) => ctx.fail(Operation::List, e, started, cid),
    }
}

pub async fn get(
    State(ctx): State<SharedContext>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let started = Instant::now();
    let cid = correlation_id(&headers);
    match ctx.get(&id, params).await {
        Ok(data) => ctx.respond(Operation::Get, data, None, started, cid),
        Err(e) => ctx.fail(Operation::Get, e, started, cid),
    }
}

pub async fn create(State(ctx): State<SharedContext>, headers: HeaderMap, body: Bytes) -> Response {
    let started = Instant::now();
    let cid = correlation_id(&headers);
    match ctx.create(body).await {
        Ok(data) => ctx.respond(Operation::Create, data, None, started, cid),
        Err(e) => ctx.fail(Operation::Create, e, started, cid),
    }
}

pub async fn update(State(ctx): State<SharedContext>, headers: HeaderMap, Path(id): Path<String>, body: Bytes) -> Response {
    let started = Instant::now();
    let cid = correlation_id(&headers);
    match ctx.update(&id, body, &cid).await {
        Ok(data) => ctx.respond(Operation::Update, data, None, started, cid),
        Err(e) => ctx.fail(Operation::Update, e, started, cid),
    }
}

/// 204 with no body, or 200 when a hook supplied the result.
pub async fn delete(State(ctx): State<SharedContext>, headers: HeaderMap, Path(id): Path<String>) -> Response {
    let started = Instant::now();
    let cid = correlation_id(&headers);
    match ctx.delete(&id, &cid).await {
        Ok((data, true)) => ctx.respond(Operation::Delete, data, Some(StatusCode::OK), started, cid),
        Ok((data, false)) => ctx.respond(Operation::Delete, data, None, started, cid),
        Err(e) => ctx.fail(Operation::Delete, e, started, cid),
    }
}
