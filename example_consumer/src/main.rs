//! Example consumer: boots the configured resources and adds hooks from application code.
//!
//! Run from repo root: `cargo run -p example-consumer`
//! Reads `DATABASE_URL` (in-memory store when unset) and `CONFIG_PATH` (default `config`).

use scaffold_sdk::{init_tracing, interceptor, AppState, HookError, HookResult, Operation, Settings};
use serde_json::{Map, Value};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing("scaffold_sdk=info,example_consumer=info,tower_http=info");

    let settings = Settings::from_env()?;
    let state = AppState::from_settings(&settings).await?;

    // Every resource backed by the `posts` model rejects untitled posts.
    state.defaults.registry("posts").before(
        Operation::Create,
        interceptor(|ctx| async move {
            let title = ctx
                .get("record")
                .and_then(|r| r.get("title"))
                .and_then(Value::as_str)
                .unwrap_or("");
            if title.trim().is_empty() {
                return Err(HookError::Validation("title cannot be empty".into()));
            }
            HookResult::Ok(None)
        }),
    );

    if let Some(posts) = state.resource("/posts") {
        // Listing hides drafts unless the caller asked for a status explicitly.
        posts.before_list(interceptor(|ctx| async move {
            let Some(Value::Object(query)) = ctx.get("query") else {
                return HookResult::Ok(None);
            };
            let mut query = query.clone();
            let mut conditions = match query.get("conditions") {
                Some(Value::Object(c)) => c.clone(),
                _ => Map::new(),
            };
            conditions
                .entry("status")
                .or_insert_with(|| serde_json::json!({"$ne": "draft"}));
            query.insert("conditions".into(), Value::Object(conditions));
            let mut delta = Map::new();
            delta.insert("query".into(), Value::Object(query));
            Ok(Some(delta))
        }));
    }

    let app = state.router();
    let listener = TcpListener::bind(settings.bind_addr).await?;
    tracing::info!("example consumer listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
