//! Response formatter: outcome kind x verb to status, message, body and headers.

use crate::config::Settings;
use crate::error::AppError;
use axum::{
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::MethodFilter,
    Json,
};
use base64::Engine;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Instant;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Verb {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Verb {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Get => "GET",
            Verb::Post => "POST",
            Verb::Put => "PUT",
            Verb::Patch => "PATCH",
            Verb::Delete => "DELETE",
        }
    }

    pub fn method_filter(&self) -> MethodFilter {
        match self {
            Verb::Get => MethodFilter::GET,
            Verb::Post => MethodFilter::POST,
            Verb::Put => MethodFilter::PUT,
            Verb::Patch => MethodFilter::PATCH,
            Verb::Delete => MethodFilter::DELETE,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResponseKind {
    Ok,
    Error,
    Info,
    Warning,
}

impl ResponseKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseKind::Ok => "success",
            ResponseKind::Error => "error",
            ResponseKind::Info => "info",
            ResponseKind::Warning => "warning",
        }
    }
}

pub fn default_status(kind: ResponseKind, verb: Verb) -> StatusCode {
    use ResponseKind::*;
    use Verb::*;
    match (kind, verb) {
        (Ok, Get) | (Ok, Put) | (Ok, Patch) => StatusCode::OK,
        (Ok, Post) => StatusCode::CREATED,
        (Ok, Delete) => StatusCode::NO_CONTENT,
        (Error, Get) | (Error, Delete) => StatusCode::NOT_FOUND,
        (Error, _) => StatusCode::BAD_REQUEST,
        (Info, Get) => StatusCode::OK,
        (Info, _) => StatusCode::ACCEPTED,
        (Warning, _) => StatusCode::OK,
    }
}

pub fn default_message(kind: ResponseKind, verb: Verb) -> &'static str {
    use ResponseKind::*;
    use Verb::*;
    match (kind, verb) {
        (Ok, Get) => "Resource retrieved successfully",
        (Ok, Post) => "Resource created successfully",
        (Ok, Put) | (Ok, Patch) => "Resource updated successfully",
        (Ok, Delete) => "Resource deleted successfully",
        (Error, Get) => "Resource not found",
        (Error, Post) => "Failed to create resource",
        (Error, Put) | (Error, Patch) => "Failed to update resource",
        (Error, Delete) => "Failed to delete resource",
        (Info, Get) => "Request processed",
        (Info, _) => "Request accepted for processing",
        (Warning, _) => "Request completed with warnings",
    }
}

pub const HEADER_RESPONSE_TYPE: &str = "x-response-type";
pub const HEADER_METHOD: &str = "x-http-method";
pub const HEADER_CORRELATION_ID: &str = "x-correlation-id";
pub const HEADER_RESPONSE_TIME: &str = "x-response-time";
pub const HEADER_API_VERSION: &str = "x-api-version";
pub const HEADER_ENVIRONMENT: &str = "x-environment";
pub const HEADER_ENCRYPTED: &str = "x-encrypted";
pub const HEADER_RESOURCE_ID: &str = "x-resource-id";
pub const HEADER_RESOURCE_IDS: &str = "x-resource-ids";

/// Keys the formatter writes into success bodies. A payload object carrying any of them is
/// nested under `data` instead of merged, so none of its fields are overwritten.
const ENVELOPE_KEYS: [&str; 5] = ["message", "timestamp", "created", "updated", "deleted"];

/// Finished response; converted to an axum `Response` unchanged.
#[derive(Clone, Debug)]
pub struct ResponseEnvelope {
    pub body: Value,
    pub headers: HeaderMap,
    pub status: StatusCode,
}

impl IntoResponse for ResponseEnvelope {
    fn into_response(self) -> Response {
        if self.status == StatusCode::NO_CONTENT {
            return (self.status, self.headers).into_response();
        }
        (self.status, self.headers, Json(self.body)).into_response()
    }
}

#[derive(Clone, Debug, Default)]
pub struct FormatOptions {
    pub message: Option<String>,
    pub status: Option<StatusCode>,
    pub correlation_id: Option<String>,
    pub started: Option<Instant>,
    /// Field read for the resource-id headers; `id` when unset.
    pub primary_key: Option<String>,
}

impl FormatOptions {
    pub fn timed(started: Instant, correlation_id: Option<String>) -> Self {
        FormatOptions {
            started: Some(started),
            correlation_id,
            ..Default::default()
        }
    }
}

#[derive(Clone)]
pub struct ResponseFormatter {
    settings: Arc<Settings>,
}

impl Default for ResponseFormatter {
    fn default() -> Self {
        Self::new(Arc::new(Settings::default()))
    }
}

impl ResponseFormatter {
    pub fn new(settings: Arc<Settings>) -> Self {
        ResponseFormatter { settings }
    }

    pub fn format(&self, kind: ResponseKind, verb: Verb, data: Value, opts: FormatOptions) -> ResponseEnvelope {
        let status = opts.status.unwrap_or_else(|| default_status(kind, verb));
        let message = opts
            .message
            .clone()
            .unwrap_or_else(|| default_message(kind, verb).to_string());

        let mut body = Map::new();
        if kind == ResponseKind::Error {
            body.insert("error".into(), Value::Bool(true));
            if self.settings.verbose_errors && !data.is_null() {
                body.insert("details".into(), data.clone());
            }
        } else {
            match &data {
                Value::Object(m) if m.keys().any(|k| ENVELOPE_KEYS.contains(&k.as_str())) => {
                    body.insert("data".into(), data.clone());
                }
                Value::Object(m) => body.extend(m.iter().map(|(k, v)| (k.clone(), v.clone()))),
                Value::Null => {}
                other => {
                    body.insert("data".into(), other.clone());
                }
            }
            if kind == ResponseKind::Ok {
                match verb {
                    Verb::Post => {
                        body.insert("created".into(), Value::Bool(true));
                    }
                    Verb::Put | Verb::Patch => {
                        body.insert("updated".into(), Value::Bool(true));
                    }
                    Verb::Delete => {
                        body.insert("deleted".into(), Value::Bool(true));
                    }
                    Verb::Get => {}
                }
            }
        }
        body.insert("message".into(), Value::String(message));
        body.insert("timestamp".into(), Value::String(chrono::Utc::now().to_rfc3339()));

        let mut headers = self.base_headers(kind, verb, &opts);
        if kind != ResponseKind::Error {
            insert_resource_headers(&mut headers, &data, opts.primary_key.as_deref().unwrap_or("id"));
        }
        let body = self.obfuscate_body(Value::Object(body), &mut headers);
        ResponseEnvelope { body, headers, status }
    }

    /// Error envelope for `err`: verbose mode exposes the error text, otherwise the mapped message.
    pub fn error(&self, verb: Verb, err: &AppError, mut opts: FormatOptions) -> ResponseEnvelope {
        let message = if self.settings.verbose_errors {
            err.to_string()
        } else {
            err.public_message().to_string()
        };
        opts.message.get_or_insert(message);
        opts.status.get_or_insert(err.status());
        let details = match err {
            AppError::Constraint(violations) => Value::Array(violations.iter().cloned().map(Value::String).collect()),
            _ => Value::Null,
        };
        let mut envelope = self.format(ResponseKind::Error, verb, details, opts);
        if let Value::Object(body) = &mut envelope.body {
            body.insert("code".into(), Value::String(err.code().into()));
        }
        envelope
    }

    fn base_headers(&self, kind: ResponseKind, verb: Verb, opts: &FormatOptions) -> HeaderMap {
        let correlation_id = opts
            .correlation_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let elapsed_ms = opts.started.map(|s| s.elapsed().as_millis()).unwrap_or(0);
        let mut headers = HeaderMap::new();
        set_header(&mut headers, HEADER_RESPONSE_TYPE, kind.as_str());
        set_header(&mut headers, HEADER_METHOD, verb.as_str());
        set_header(&mut headers, HEADER_CORRELATION_ID, &correlation_id);
        set_header(&mut headers, HEADER_RESPONSE_TIME, &format!("{}ms", elapsed_ms));
        set_header(&mut headers, HEADER_API_VERSION, &self.settings.api_version);
        set_header(&mut headers, HEADER_ENVIRONMENT, &self.settings.environment);
        set_header(&mut headers, HEADER_ENCRYPTED, "false");
        headers
    }

    /// Base64 of the JSON body when an encoding key is configured. Obfuscation only.
    fn obfuscate_body(&self, body: Value, headers: &mut HeaderMap) -> Value {
        if self.settings.encoding_key.is_none() {
            return body;
        }
        set_header(headers, HEADER_ENCRYPTED, "true");
        Value::String(base64::engine::general_purpose::STANDARD.encode(body.to_string()))
    }
}

fn set_header(headers: &mut HeaderMap, name: &'static str, value: &str) {
    if let Ok(v) = HeaderValue::from_str(value) {
        headers.insert(HeaderName::from_static(name), v);
    }
}

fn id_string(v: &Value, pk: &str) -> Option<String> {
    match v.get(pk)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn insert_resource_headers(headers: &mut HeaderMap, data: &Value, pk: &str) {
    let many = match data {
        Value::Array(items) => Some(items),
        Value::Object(m) => m.get("data").and_then(Value::as_array),
        _ => None,
    };
    if let Some(items) = many {
        let ids: Vec<String> = items.iter().filter_map(|item| id_string(item, pk)).collect();
        if !ids.is_empty() {
            set_header(headers, HEADER_RESOURCE_IDS, &ids.join(","));
        }
    } else if let Some(id) = id_string(data, pk) {
        set_header(headers, HEADER_RESOURCE_ID, &id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn formatter(settings: Settings) -> ResponseFormatter {
        ResponseFormatter::new(Arc::new(settings))
    }

    fn without_timestamp(mut v: Value) -> Value {
        if let Value::Object(m) = &mut v {
            m.remove("timestamp");
        }
        v
    }

    #[test]
    fn default_status_table() {
        assert_eq!(default_status(ResponseKind::Ok, Verb::Delete), StatusCode::NO_CONTENT);
        assert_eq!(default_status(ResponseKind::Ok, Verb::Post), StatusCode::CREATED);
        assert_eq!(default_status(ResponseKind::Error, Verb::Post), StatusCode::BAD_REQUEST);
        assert_eq!(default_status(ResponseKind::Error, Verb::Get), StatusCode::NOT_FOUND);
        assert_eq!(default_status(ResponseKind::Error, Verb::Delete), StatusCode::NOT_FOUND);
        assert_eq!(default_status(ResponseKind::Info, Verb::Get), StatusCode::OK);
        assert_eq!(default_status(ResponseKind::Info, Verb::Patch), StatusCode::ACCEPTED);
        assert_eq!(default_status(ResponseKind::Warning, Verb::Post), StatusCode::OK);
    }

    #[test]
    fn explicit_status_overrides_table() {
        let f = ResponseFormatter::default();
        let env = f.format(
            ResponseKind::Ok,
            Verb::Delete,
            Value::Null,
            FormatOptions {
                status: Some(StatusCode::OK),
                ..Default::default()
            },
        );
        assert_eq!(env.status, StatusCode::OK);
        assert_eq!(env.body["deleted"], true);
    }

    #[test]
    fn formatting_is_idempotent_apart_from_volatile_fields() {
        let f = ResponseFormatter::default();
        let data = json!({ "id": 3, "name": "J" });
        let a = f.format(ResponseKind::Ok, Verb::Put, data.clone(), FormatOptions::default());
        let b = f.format(ResponseKind::Ok, Verb::Put, data, FormatOptions::default());
        assert_eq!(without_timestamp(a.body).to_string(), without_timestamp(b.body).to_string());
        assert_ne!(a.headers[HEADER_CORRELATION_ID], b.headers[HEADER_CORRELATION_ID]);
    }

    #[test]
    fn object_data_is_merged_with_message_and_flags() {
        let f = ResponseFormatter::default();
        let env = f.format(ResponseKind::Ok, Verb::Post, json!({ "id": 1, "name": "J" }), FormatOptions::default());
        assert_eq!(env.status, StatusCode::CREATED);
        assert_eq!(env.body["name"], "J");
        assert_eq!(env.body["created"], true);
        assert_eq!(env.body["message"], "Resource created successfully");
        assert_eq!(env.headers[HEADER_RESOURCE_ID], "1");
        assert_eq!(env.headers[HEADER_RESPONSE_TYPE], "success");
        assert_eq!(env.headers[HEADER_METHOD], "POST");
        assert_eq!(env.headers[HEADER_ENCRYPTED], "false");
    }

    #[test]
    fn colliding_payload_keys_are_nested_not_overwritten() {
        let f = ResponseFormatter::default();
        let row = json!({ "id": 4, "message": "hello", "timestamp": "2020-01-01T00:00:00Z" });
        let env = f.format(ResponseKind::Ok, Verb::Get, row, FormatOptions::default());
        assert_eq!(env.body["message"], "Resource retrieved successfully");
        assert_eq!(env.body["data"]["message"], "hello");
        assert_eq!(env.body["data"]["timestamp"], "2020-01-01T00:00:00Z");
        assert!(env.body.get("id").is_none());
        assert_eq!(env.headers[HEADER_RESOURCE_ID], "4");
    }

    #[test]
    fn resource_headers_follow_the_primary_key() {
        let f = ResponseFormatter::default();
        let opts = FormatOptions {
            primary_key: Some("sku".into()),
            ..Default::default()
        };
        let one = f.format(ResponseKind::Ok, Verb::Get, json!({ "id": 1, "sku": "A-1" }), opts.clone());
        assert_eq!(one.headers[HEADER_RESOURCE_ID], "A-1");

        let many = f.format(
            ResponseKind::Ok,
            Verb::Get,
            json!({ "data": [{ "sku": "A-1" }, { "sku": "B-2" }], "count": 2 }),
            opts,
        );
        assert_eq!(many.headers[HEADER_RESOURCE_IDS], "A-1,B-2");
    }

    #[test]
    fn list_data_sets_resource_ids() {
        let f = ResponseFormatter::default();
        let env = f.format(
            ResponseKind::Ok,
            Verb::Get,
            json!({ "data": [{ "id": 1 }, { "id": "b" }], "count": 2 }),
            FormatOptions::default(),
        );
        assert_eq!(env.headers[HEADER_RESOURCE_IDS], "1,b");
        assert!(env.headers.get(HEADER_RESOURCE_ID).is_none());
        assert_eq!(env.body["count"], 2);
    }

    #[test]
    fn correlation_id_is_reused_when_supplied() {
        let f = ResponseFormatter::default();
        let env = f.format(
            ResponseKind::Info,
            Verb::Post,
            Value::Null,
            FormatOptions {
                correlation_id: Some("req-42".into()),
                ..Default::default()
            },
        );
        assert_eq!(env.headers[HEADER_CORRELATION_ID], "req-42");
        assert_eq!(env.status, StatusCode::ACCEPTED);
    }

    #[test]
    fn error_message_depends_on_verbosity() {
        let err = AppError::Validation("title is required".into());
        let verbose = formatter(Settings::default()).error(Verb::Post, &err, FormatOptions::default());
        assert_eq!(verbose.status, StatusCode::BAD_REQUEST);
        assert_eq!(verbose.body["error"], true);
        assert!(verbose.body["message"].as_str().unwrap().contains("title"));
        assert_eq!(verbose.body["code"], "validation_error");

        let quiet = formatter(Settings::production()).error(Verb::Post, &err, FormatOptions::default());
        assert_eq!(quiet.body["message"], "Validation failed");
        assert!(quiet.body.get("details").is_none());
    }

    #[test]
    fn encoded_body_is_base64_json() {
        let settings = Settings {
            encoding_key: Some("k".into()),
            ..Default::default()
        };
        let env = formatter(settings).format(ResponseKind::Ok, Verb::Get, json!({ "id": 9 }), FormatOptions::default());
        assert_eq!(env.headers[HEADER_ENCRYPTED], "true");
        let encoded = env.body.as_str().unwrap();
        let decoded = base64::engine::general_purpose::STANDARD.decode(encoded).unwrap();
        let inner: Value = serde_json::from_slice(&decoded).unwrap();
        assert_eq!(inner["id"], 9);
    }
}
