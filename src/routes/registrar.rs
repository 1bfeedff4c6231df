//! `CrudRouter`: mounts the generated operations for each registered path.

use crate::config::{CustomAction, Operation, RouteConfig, Settings, StructureCache};
use crate::error::ConfigError;
use crate::handlers::crud::{self, RouteContext, SharedContext};
use crate::hooks::Middleware;
use crate::model::{ModelHandle, ModelRegistry};
use crate::response::{ResponseFormatter, Verb};
use crate::service::FieldPolicy;
use axum::extract::{DefaultBodyLimit, Request};
use axum::middleware::{from_fn, Next};
use axum::routing::{delete, get, post, put, MethodRouter};
use axum::Router;
use std::collections::HashSet;
use std::sync::Arc;
use tower_http::limit::RequestBodyLimitLayer;

/// Extension point for bundles of routes or middleware.
pub trait Plugin {
    fn apply(&self, router: &mut CrudRouter) -> Result<(), ConfigError>;
}

pub struct FnPlugin<F>(F);

impl<F> Plugin for FnPlugin<F>
where
    F: Fn(&mut CrudRouter) -> Result<(), ConfigError>,
{
    fn apply(&self, router: &mut CrudRouter) -> Result<(), ConfigError> {
        (self.0)(router)
    }
}

/// Adapt a closure into a [`Plugin`].
pub fn plugin_fn<F>(f: F) -> FnPlugin<F>
where
    F: Fn(&mut CrudRouter) -> Result<(), ConfigError>,
{
    FnPlugin(f)
}

pub struct CrudRouter {
    settings: Arc<Settings>,
    registry: ModelRegistry,
    formatter: ResponseFormatter,
    structures: StructureCache,
    global: Vec<Middleware>,
    paths: HashSet<String>,
    router: Router,
}

fn normalize_path(path: &str) -> Result<String, ConfigError> {
    let trimmed = path.trim().trim_end_matches('/');
    if trimmed.is_empty() || !trimmed.starts_with('/') {
        return Err(ConfigError::Validation(format!("route path {:?} must start with '/' and name a segment", path)));
    }
    Ok(trimmed.to_string())
}

fn operation_route(op: Operation) -> MethodRouter<SharedContext> {
    match op {
        Operation::List => get(crud::list),
        Operation::Get => get(crud::get),
        Operation::Create => post(crud::create),
        Operation::Update => put(crud::update),
        Operation::Delete => delete(crud::delete),
    }
}

/// Wrap `route` so `chain` runs outermost first, then the route itself.
fn with_middleware<S>(mut route: MethodRouter<S>, chain: &[&Middleware]) -> MethodRouter<S>
where
    S: Clone + Send + Sync + 'static,
{
    for m in chain.iter().rev() {
        let m = Arc::clone(m);
        route = route.layer(from_fn(move |req: Request, next: Next| {
            let m = m.clone();
            async move { m(req, next).await }
        }));
    }
    route
}

fn merge_into<S>(slot: &mut Option<MethodRouter<S>>, route: MethodRouter<S>)
where
    S: Clone + Send + Sync + 'static,
{
    *slot = Some(match slot.take() {
        Some(existing) => existing.merge(route),
        None => route,
    });
}

impl CrudRouter {
    pub fn new(settings: Settings, registry: ModelRegistry) -> Self {
        let settings = Arc::new(settings);
        CrudRouter {
            formatter: ResponseFormatter::new(settings.clone()),
            settings,
            registry,
            structures: StructureCache::default(),
            global: Vec::new(),
            paths: HashSet::new(),
            router: Router::new(),
        }
    }

    /// Router-global middleware; wraps every route registered after this call.
    pub fn middleware(&mut self, m: Middleware) -> &mut Self {
        self.global.push(m);
        self
    }

    pub fn plugin(&mut self, plugin: impl Plugin) -> Result<&mut Self, ConfigError> {
        plugin.apply(self)?;
        Ok(self)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// Mounts the enabled operations on `path` and `path/:id`, plus custom actions.
    pub fn register(&mut self, path: &str, model: Arc<dyn ModelHandle>, mut config: RouteConfig) -> Result<&mut Self, ConfigError> {
        let base = normalize_path(path)?;
        if self.paths.contains(&base) {
            return Err(ConfigError::DuplicatePathSegment(base));
        }
        let item_path = format!("{}/:id", base);

        let actions: Vec<(String, CustomAction)> = std::mem::take(&mut config.custom_actions)
            .into_iter()
            .map(|a| (format!("{}{}", base, a.sub_path.trim_end_matches('/')), a))
            .collect();
        let mut claimed: HashSet<(&str, Verb)> = HashSet::new();
        for (full, action) in &actions {
            if !action.sub_path.is_empty() && !action.sub_path.starts_with('/') {
                return Err(ConfigError::Validation(format!("custom action path {:?} must start with '/'", action.sub_path)));
            }
            if !claimed.insert((full.as_str(), action.verb)) {
                return Err(ConfigError::DuplicatePathSegment(format!("{} {}", action.verb.as_str(), full)));
            }
        }

        let structure = self.structures.get_or_resolve(model.name(), model.schema());
        let policy = FieldPolicy::new(&self.settings, &config.excluded_fields, &config.excluded_relations, config.include_relations);

        let route_chain: Vec<&Middleware> = self.global.iter().chain(config.middleware.iter()).collect();
        let mut collection: Option<MethodRouter<SharedContext>> = None;
        let mut item: Option<MethodRouter<SharedContext>> = None;
        let mut mounted = Vec::new();
        for op in Operation::ALL {
            if !config.is_enabled(op) {
                continue;
            }
            let path = if op.targets_item() { &item_path } else { &base };
            if claimed.contains(&(path.as_str(), op.verb())) {
                tracing::debug!(path = %path, operation = op.as_str(), "custom action replaces operation");
                continue;
            }
            let mut chain = route_chain.clone();
            chain.extend(config.operation_middleware.get(&op).into_iter().flatten());
            chain.extend(config.auth.iter());
            let route = with_middleware(operation_route(op), &chain);
            merge_into(if op.targets_item() { &mut item } else { &mut collection }, route);
            mounted.push(op.as_str());
        }

        let mut action_chain = route_chain.clone();
        action_chain.extend(config.auth.iter());
        let mut sub: Router<SharedContext> = Router::new();
        if let Some(c) = collection {
            sub = sub.route(&base, c);
        }
        if let Some(i) = item {
            sub = sub.route(&item_path, i);
        }
        for (full, action) in &actions {
            let route: MethodRouter<SharedContext> = action.handler.clone().with_state(());
            sub = sub.route(full, with_middleware(route, &action_chain));
        }

        tracing::info!(path = %base, model = %model.name(), operations = ?mounted, custom_actions = actions.len(), "registered CRUD routes");
        let ctx = Arc::new(RouteContext {
            path: base.clone(),
            model,
            config,
            structure,
            registry: self.registry.clone(),
            formatter: self.formatter.clone(),
            settings: self.settings.clone(),
            policy,
        });
        let sub: Router = sub.with_state(ctx);
        self.router = std::mem::take(&mut self.router).merge(sub);
        self.paths.insert(base);
        Ok(self)
    }

    /// Finished router with the request body limit applied.
    pub fn into_router(self) -> Router {
        self.router
            .layer(DefaultBodyLimit::disable())
            .layer(RequestBodyLimitLayer::new(self.settings.body_limit_bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MemoryModel;

    fn router() -> CrudRouter {
        CrudRouter::new(Settings::default(), ModelRegistry::new())
    }

    #[test]
    fn paths_are_normalized() {
        assert_eq!(normalize_path("/users/").unwrap(), "/users");
        assert!(normalize_path("users").is_err());
        assert!(normalize_path("/").is_err());
    }

    #[test]
    fn duplicate_paths_are_rejected() {
        let mut r = router();
        r.register("/users", Arc::new(MemoryModel::new("User")), RouteConfig::new()).unwrap();
        let err = r.register("/users/", Arc::new(MemoryModel::new("User")), RouteConfig::new()).err().unwrap();
        assert!(matches!(err, ConfigError::DuplicatePathSegment(p) if p == "/users"));
    }

    #[test]
    fn duplicate_custom_actions_are_rejected() {
        let config = RouteConfig::new()
            .custom_action(Verb::Post, "/import", || async { "a" })
            .custom_action(Verb::Post, "/import/", || async { "b" });
        let err = router().register("/users", Arc::new(MemoryModel::new("User")), config).err().unwrap();
        assert!(matches!(err, ConfigError::DuplicatePathSegment(_)));
    }

    #[test]
    fn closures_register_through_plugin_fn() {
        let mut r = router();
        r.plugin(plugin_fn(|r: &mut CrudRouter| {
            r.register("/tags", Arc::new(MemoryModel::new("Tag")), RouteConfig::new())?;
            Ok(())
        }))
        .unwrap();
        assert!(r.paths.contains("/tags"));
    }
}
