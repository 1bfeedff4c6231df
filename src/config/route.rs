//! Per-route configuration attached at registration time.

use crate::hooks::{ErrorHandler, Hook, Middleware, Validator};
use crate::response::Verb;
use axum::handler::Handler;
use axum::routing::{on, MethodRouter};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    List,
    Get,
    Create,
    Update,
    Delete,
}

impl Operation {
    pub const ALL: [Operation; 5] = [
        Operation::List,
        Operation::Get,
        Operation::Create,
        Operation::Update,
        Operation::Delete,
    ];

    pub fn verb(&self) -> Verb {
        match self {
            Operation::List | Operation::Get => Verb::Get,
            Operation::Create => Verb::Post,
            Operation::Update => Verb::Put,
            Operation::Delete => Verb::Delete,
        }
    }

    /// Whether the operation lives on `P/:id` rather than `P`.
    pub fn targets_item(&self) -> bool {
        matches!(self, Operation::Get | Operation::Update | Operation::Delete)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::List => "list",
            Operation::Get => "get",
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }
}

/// A caller handler mounted at `base path + sub_path` for one verb.
#[derive(Clone)]
pub struct CustomAction {
    pub verb: Verb,
    pub sub_path: String,
    pub handler: MethodRouter,
}

#[derive(Clone)]
pub struct RouteConfig {
    pub validators: HashMap<Operation, Validator>,
    pub before: HashMap<Operation, Hook>,
    pub after: HashMap<Operation, Hook>,
    pub custom_actions: Vec<CustomAction>,
    pub error_handler: Option<ErrorHandler>,
    /// Honour `include` query parameters.
    pub include_relations: bool,
    pub excluded_relations: HashSet<String>,
    /// Stripped from responses in addition to the global exclusion list.
    pub excluded_fields: HashSet<String>,
    /// Split relation payloads and write them as nested creates.
    pub nested_writes: bool,
    pub check_constraints: bool,
    pub cascade: bool,
    pub middleware: Vec<Middleware>,
    pub operation_middleware: HashMap<Operation, Vec<Middleware>>,
    pub auth: Option<Middleware>,
    pub excluded_operations: HashSet<Operation>,
}

impl Default for RouteConfig {
    fn default() -> Self {
        RouteConfig {
            validators: HashMap::new(),
            before: HashMap::new(),
            after: HashMap::new(),
            custom_actions: Vec::new(),
            error_handler: None,
            include_relations: true,
            excluded_relations: HashSet::new(),
            excluded_fields: HashSet::new(),
            nested_writes: false,
            check_constraints: true,
            cascade: true,
            middleware: Vec::new(),
            operation_middleware: HashMap::new(),
            auth: None,
            excluded_operations: HashSet::new(),
        }
    }
}

impl RouteConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs for create and update bodies.
    pub fn validate(mut self, op: Operation, v: Validator) -> Self {
        self.validators.insert(op, v);
        self
    }

    pub fn before(mut self, op: Operation, h: Hook) -> Self {
        self.before.insert(op, h);
        self
    }

    pub fn after(mut self, op: Operation, h: Hook) -> Self {
        self.after.insert(op, h);
        self
    }

    pub fn custom_action<H, T>(mut self, verb: Verb, sub_path: impl Into<String>, handler: H) -> Self
    where
        H: Handler<T, ()>,
        T: 'static,
    {
        self.custom_actions.push(CustomAction {
            verb,
            sub_path: sub_path.into(),
            handler: on(verb.method_filter(), handler),
        });
        self
    }

    pub fn error_handler<F>(mut self, f: F) -> Self
    where
        F: Fn(&crate::error::AppError, Operation) -> axum::response::Response + Send + Sync + 'static,
    {
        self.error_handler = Some(Arc::new(f));
        self
    }

    pub fn include_relations(mut self, enabled: bool) -> Self {
        self.include_relations = enabled;
        self
    }

    pub fn exclude_relation(mut self, name: impl Into<String>) -> Self {
        self.excluded_relations.insert(name.into());
        self
    }

    pub fn exclude_field(mut self, name: impl Into<String>) -> Self {
        self.excluded_fields.insert(name.into());
        self
    }

    pub fn nested_writes(mut self, enabled: bool) -> Self {
        self.nested_writes = enabled;
        self
    }

    pub fn check_constraints(mut self, enabled: bool) -> Self {
        self.check_constraints = enabled;
        self
    }

    pub fn cascade(mut self, enabled: bool) -> Self {
        self.cascade = enabled;
        self
    }

    pub fn middleware(mut self, m: Middleware) -> Self {
        self.middleware.push(m);
        self
    }

    pub fn operation_middleware(mut self, op: Operation, m: Middleware) -> Self {
        self.operation_middleware.entry(op).or_default().push(m);
        self
    }

    pub fn auth(mut self, m: Middleware) -> Self {
        self.auth = Some(m);
        self
    }

    pub fn exclude_operation(mut self, op: Operation) -> Self {
        self.excluded_operations.insert(op);
        self
    }

    pub fn is_enabled(&self, op: Operation) -> bool {
        !self.excluded_operations.contains(&op)
    }
}
