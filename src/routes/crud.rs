//! CRUD route synthesis for a resource.

use super::RouteEntry;
use crate::service::Resource;
use crate::transport::{handler_fn, Handler};
use axum::http::Method;
use serde_json::{json, Value};
use std::sync::{Arc, Weak};

#[derive(Clone, Copy, Debug)]
enum Action {
    List,
    GetOne,
    Totals,
    Sum,
    Describe,
    Save,
    Order,
    Delete,
}

/// Handlers hold the resource weakly since the resource owns the table holding them.
/// `Resource::init_routes` binds them with a strong owner attached.
fn handler(resource: &Arc<Resource>, action: Action) -> Handler {
    let resource: Weak<Resource> = Arc::downgrade(resource);
    handler_fn(move |req, mut res| {
        let resource = resource.clone();
        async move {
            let Some(resource) = resource.upgrade() else {
                return res.handle_error(503, "Resource is no longer available");
            };
            let req = Arc::new(req);
            let result = match action {
                Action::List => resource.list(req).await,
                Action::GetOne => resource.get_one(req).await,
                Action::Totals => resource.total(req).await,
                Action::Sum => resource.sum(req).await,
                Action::Describe => Ok(resource.describe()),
                Action::Save => resource.save(req).await,
                Action::Delete => resource.delete(req).await,
                Action::Order => resource.order(req).await.map(|updated| {
                    res.meta("updated", Value::from(updated));
                    json!({ "ok": true })
                }),
            };
            match result {
                Ok(data) => {
                    res.data(data);
                    res.send()
                }
                Err(err) => res.fail(&err),
            }
        }
    })
}

/// Entries for list, get, totals, sum and model on the public route; create, update and
/// order when writes are enabled; delete when deletes are enabled.
pub fn crud_routes(resource: &Arc<Resource>) -> Vec<RouteEntry> {
    let config = resource.config();
    let base = config.public_route.trim_end_matches('/').to_string();
    if base.is_empty() {
        return Vec::new();
    }
    let entry = |method: Method, path: String, action: Action| {
        RouteEntry::new(method, path, handler(resource, action))
            .requires_auth(config.requires_auth)
            .version(config.version.clone())
    };

    let mut routes = vec![
        entry(Method::GET, base.clone(), Action::List),
        entry(Method::GET, format!("{}/model", base), Action::Describe),
        entry(Method::GET, format!("{}/:_id", base), Action::GetOne),
        entry(Method::POST, format!("{}/totals", base), Action::Totals),
        entry(Method::POST, format!("{}/sum", base), Action::Sum),
    ];
    if config.allows_writes() {
        routes.push(entry(Method::PUT, format!("{}/:_id", base), Action::Save));
        routes.push(entry(Method::POST, base.clone(), Action::Save));
        routes.push(entry(Method::POST, format!("{}/order", base), Action::Order).requires_auth(true));
    }
    if config.allows_deletes() {
        routes.push(entry(Method::DELETE, base.clone(), Action::Delete));
        routes.push(entry(Method::DELETE, format!("{}/:_id", base), Action::Delete));
    }
    routes
}
