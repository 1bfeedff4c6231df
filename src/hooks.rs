//! Caller-supplied hook, validator, middleware and error-handler types.

use crate::config::Operation;
use crate::error::AppError;
use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;
use futures::future::BoxFuture;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

/// What a before/after hook sees. `payload` is the query object (list), the body
/// (create/update) or the result (after hooks); `Null` for get/delete before hooks.
#[derive(Clone, Debug)]
pub struct HookInput {
    pub operation: Operation,
    pub id: Option<Value>,
    pub payload: Value,
}

/// `Ok(Some(v))` replaces the payload (or short-circuits get/delete), `Ok(None)` keeps it.
pub type Hook = Arc<dyn Fn(HookInput) -> BoxFuture<'static, Result<Option<Value>, AppError>> + Send + Sync>;

pub fn hook<F, Fut>(f: F) -> Hook
where
    F: Fn(HookInput) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<Value>, AppError>> + Send + 'static,
{
    Arc::new(move |input| Box::pin(f(input)))
}

#[derive(Clone, Debug, PartialEq)]
pub struct ValidationOutcome {
    pub is_valid: bool,
    pub message: Option<String>,
}

impl ValidationOutcome {
    pub fn valid() -> Self {
        ValidationOutcome {
            is_valid: true,
            message: None,
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        ValidationOutcome {
            is_valid: false,
            message: Some(message.into()),
        }
    }
}

pub type Validator = Arc<dyn Fn(Value) -> BoxFuture<'static, ValidationOutcome> + Send + Sync>;

pub fn validator<F, Fut>(f: F) -> Validator
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ValidationOutcome> + Send + 'static,
{
    Arc::new(move |body| Box::pin(f(body)))
}

pub type Middleware = Arc<dyn Fn(Request, Next) -> BoxFuture<'static, Response> + Send + Sync>;

pub fn middleware<F, Fut>(f: F) -> Middleware
where
    F: Fn(Request, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    Arc::new(move |req, next| Box::pin(f(req, next)))
}

/// Replaces the default error formatting for a route.
pub type ErrorHandler = Arc<dyn Fn(&AppError, Operation) -> Response + Send + Sync>;
