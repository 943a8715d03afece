//! Scaffold SDK: model-driven REST resources with before/after hook pipelines.

pub mod config;
pub mod error;
pub mod hooks;
pub mod logging;
pub mod model;
pub mod response;
pub mod routes;
pub mod service;
pub mod sql;
pub mod state;
pub mod store;
pub mod transport;

pub use config::{load_from_dir, resolve, FullConfig, ModelConfig, ResolvedConfig, ResourceConfig, Settings};
pub use error::{ApiError, ConfigError, HookError, ResponseError, StoreError};
pub use hooks::{interceptor, DefaultHooks, HookContext, HookRegistry, HookResult, Interceptor, Operation, Phase};
pub use logging::init_tracing;
pub use model::{compose, Model, Record};
pub use response::{error_body, ResponseEnvelope};
pub use routes::{common_routes, RouteEntry, RouteParser, RouteTable, VersionedRouteParser};
pub use service::Resource;
pub use state::AppState;
pub use store::{ensure_database_exists, DataStore, LockedStore, MemoryStore, PgStore};
pub use transport::{handler_fn, ApiRequest, AxumTransport, Requester, Transport};
