//! Application state: the shared store, resource-type hooks and mounted resources.

use crate::config::{load_from_dir, resolve, ResolvedConfig, ResourceConfig, Settings, DEFAULT_BODY_LIMIT};
use crate::error::{ApiError, ConfigError};
use crate::hooks::DefaultHooks;
use crate::model::Model;
use crate::response::error_body;
use crate::routes::{common_routes, RouteParser, VersionedRouteParser};
use crate::service::Resource;
use crate::store::{DataStore, LockedStore, MemoryStore, PgStore};
use crate::transport::AxumTransport;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json, Router,
};
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;
use tower_http::{catch_panic::CatchPanicLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};

pub const PANIC_MESSAGE: &str = "An internal error occurred. It has been logged.";

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn DataStore>,
    pub defaults: DefaultHooks,
    /// Keyed by public route.
    pub resources: BTreeMap<String, Arc<Resource>>,
    pub parsers: Vec<Arc<dyn RouteParser>>,
    pub body_limit: usize,
}

impl AppState {
    pub fn new(store: Arc<dyn DataStore>) -> Self {
        AppState {
            store,
            defaults: DefaultHooks::new(),
            resources: BTreeMap::new(),
            parsers: vec![Arc::new(VersionedRouteParser)],
            body_limit: DEFAULT_BODY_LIMIT,
        }
    }

    /// Locked in-memory store; used by tests and when no database is configured.
    pub fn in_memory() -> Self {
        AppState::new(Arc::new(LockedStore::new(MemoryStore::new())))
    }

    /// Connects the store named by `settings` and mounts every configured resource.
    pub async fn from_settings(settings: &Settings) -> Result<Self, ApiError> {
        let store: Arc<dyn DataStore> = match &settings.database_url {
            Some(url) => Arc::new(LockedStore::new(PgStore::connect(url, &settings.schema).await?)),
            None => {
                tracing::warn!("DATABASE_URL not set, using the in-memory store");
                Arc::new(LockedStore::new(MemoryStore::new()))
            }
        };
        let resolved = resolve(&load_from_dir(&settings.config_path)?)?;
        let mut state = AppState::new(store);
        state.body_limit = settings.body_limit;
        state.mount_config(&resolved)?;
        Ok(state)
    }

    pub fn mount(&mut self, config: ResourceConfig, model: Arc<Model>) -> Arc<Resource> {
        let route = config.public_route.clone();
        let resource = Resource::new(config, model, self.store.clone(), &self.defaults);
        tracing::info!(route = %route, model = %resource.model().name, routes = resource.route_count(), "resource mounted");
        self.resources.insert(route, resource.clone());
        resource
    }

    pub fn mount_config(&mut self, resolved: &ResolvedConfig) -> Result<(), ConfigError> {
        for config in &resolved.resources {
            let model = resolved
                .model(&config.model)
                .cloned()
                .ok_or_else(|| ConfigError::MissingReference {
                    kind: "model",
                    id: config.model.clone(),
                })?;
            self.mount(config.clone(), model);
        }
        Ok(())
    }

    pub fn resource(&self, public_route: &str) -> Option<&Arc<Resource>> {
        self.resources.get(public_route)
    }

    /// Binds every resource route plus the common routes, wrapped in tracing, a body
    /// limit and panic-to-500 conversion.
    pub fn router(&self) -> Router {
        let mut transport = AxumTransport::new();
        for resource in self.resources.values() {
            resource.init_routes(&mut transport, &self.parsers);
        }
        transport
            .into_router()
            .merge(common_routes(self.store.clone()))
            .layer(CatchPanicLayer::custom(panic_response))
            .layer(RequestBodyLimitLayer::new(self.body_limit))
            .layer(TraceLayer::new_for_http())
    }
}

fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };
    tracing::error!(panic = %detail, "handler panicked");
    let status = StatusCode::INTERNAL_SERVER_ERROR;
    (status, Json(error_body(status.as_u16(), PANIC_MESSAGE.into()))).into_response()
}
