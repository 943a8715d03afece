//! HTTP transport boundary: the request handed to handlers, handler signature, and binding.

mod axum_transport;
mod requester;

pub use axum_transport::AxumTransport;
pub use requester::{Requester, USER_ID_HEADER, USER_ROLE_HEADER};

use crate::error::{ApiError, ResponseError};
use crate::response::ResponseEnvelope;
use axum::http::{HeaderMap, Method};
use futures::future::BoxFuture;
use serde_json::{Map, Value};
use std::future::Future;
use std::sync::Arc;

/// One inbound request: path params, query string and JSON body merged into `params`.
#[derive(Clone, Debug)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub params: Map<String, Value>,
    pub headers: HeaderMap,
    pub requester: Requester,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        ApiRequest {
            method,
            path: path.into(),
            params: Map::new(),
            headers: HeaderMap::new(),
            requester: Requester::anonymous(),
        }
    }

    pub fn with_params(mut self, params: Value) -> Self {
        if let Value::Object(map) = params {
            self.params.extend(map);
        }
        self
    }

    pub fn with_requester(mut self, requester: Requester) -> Self {
        self.requester = requester;
        self
    }

    pub fn param(&self, key: &str) -> Option<&Value> {
        self.params.get(key).filter(|v| !v.is_null())
    }

    /// String form of a scalar param. Numbers are rendered, empty strings are absent.
    pub fn param_text(&self, key: &str) -> Option<String> {
        match self.param(key)? {
            Value::String(s) if s.is_empty() => None,
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// Object param, accepting either a JSON object or a string holding one. Anything else is empty.
    pub fn param_object(&self, key: &str) -> Map<String, Value> {
        match self.param(key) {
            Some(Value::Object(m)) => m.clone(),
            Some(Value::String(s)) => match serde_json::from_str::<Value>(s) {
                Ok(Value::Object(m)) => m,
                _ => Map::new(),
            },
            _ => Map::new(),
        }
    }

    pub fn param_i64(&self, key: &str) -> Option<i64> {
        match self.param(key)? {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn param_bool(&self, key: &str) -> Option<bool> {
        match self.param(key)? {
            Value::Bool(b) => Some(*b),
            Value::String(s) if s.eq_ignore_ascii_case("true") => Some(true),
            Value::String(s) if s.eq_ignore_ascii_case("false") => Some(false),
            _ => None,
        }
    }

    /// Record id from `_id`, falling back to `id`. Routes bind the path segment as `_id`,
    /// and path params replace body and query values, so the URL id wins.
    pub fn id_param(&self) -> Option<String> {
        self.param_text("_id").or_else(|| self.param_text("id"))
    }
}

/// Authorization requirements checked before a handler runs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Access {
    pub requires_auth: bool,
    pub requires_admin: bool,
}

impl Access {
    pub fn check(&self, requester: &Requester) -> Result<(), ApiError> {
        if (self.requires_auth || self.requires_admin) && requester.id.is_none() {
            return Err(ApiError::Unauthorized("Not authorized".into()));
        }
        if self.requires_admin && !requester.is_admin {
            return Err(ApiError::Forbidden("Admin access required".into()));
        }
        Ok(())
    }
}

pub type HandlerFuture = BoxFuture<'static, Result<(), ResponseError>>;

/// A route handler answers through the envelope it is given.
pub type Handler = Arc<dyn Fn(ApiRequest, ResponseEnvelope) -> HandlerFuture + Send + Sync>;

pub fn handler_fn<F, Fut>(f: F) -> Handler
where
    F: Fn(ApiRequest, ResponseEnvelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ResponseError>> + Send + 'static,
{
    Arc::new(move |req, resp| Box::pin(f(req, resp)))
}

/// Where route entries end up. Implemented for axum; tests may record bindings instead.
pub trait Transport {
    fn is_bound(&self, method: &Method, path: &str) -> bool;
    fn bind(&mut self, method: Method, path: &str, access: Access, handler: Handler);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn param_helpers_accept_strings_from_query() {
        let req = ApiRequest::new(Method::GET, "/posts").with_params(json!({
            "conditions": "{\"type\":\"stream\"}",
            "limit": "20",
            "wholeWords": "true",
            "bad": "{not json",
            "id": "abc",
        }));
        assert_eq!(req.param_object("conditions")["type"], json!("stream"));
        assert!(req.param_object("bad").is_empty());
        assert!(req.param_object("missing").is_empty());
        assert_eq!(req.param_i64("limit"), Some(20));
        assert_eq!(req.param_bool("wholeWords"), Some(true));
        assert_eq!(req.id_param().as_deref(), Some("abc"));
    }

    #[test]
    fn access_requires_identity_then_admin() {
        let admin_only = Access {
            requires_auth: false,
            requires_admin: true,
        };
        assert!(matches!(admin_only.check(&Requester::anonymous()), Err(ApiError::Unauthorized(_))));
        assert!(matches!(admin_only.check(&Requester::user("u1")), Err(ApiError::Forbidden(_))));
        assert!(admin_only.check(&Requester::admin("root")).is_ok());
        assert!(Access::default().check(&Requester::anonymous()).is_ok());
    }
}
