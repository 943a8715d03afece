//! Binds route entries onto an axum `Router`.

use super::{Access, ApiRequest, Handler, Requester, Transport};
use crate::error::ApiError;
use crate::response::{error_body, ResponseEnvelope, ResponseSink};
use axum::{
    body::Bytes,
    extract::{Path, Query},
    http::{HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{on, MethodFilter, MethodRouter},
    Json, Router,
};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Collects per-path method routers until `into_router` assembles them.
#[derive(Default)]
pub struct AxumTransport {
    routes: BTreeMap<String, MethodRouter>,
    bound: HashSet<(Method, String)>,
}

impl AxumTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_router(self) -> Router {
        self.routes
            .into_iter()
            .fold(Router::new(), |router, (path, methods)| router.route(&path, methods))
    }
}

fn method_filter(method: &Method) -> Option<MethodFilter> {
    Some(match *method {
        Method::GET => MethodFilter::GET,
        Method::POST => MethodFilter::POST,
        Method::PUT => MethodFilter::PUT,
        Method::DELETE => MethodFilter::DELETE,
        Method::PATCH => MethodFilter::PATCH,
        Method::HEAD => MethodFilter::HEAD,
        Method::OPTIONS => MethodFilter::OPTIONS,
        _ => return None,
    })
}

impl Transport for AxumTransport {
    fn is_bound(&self, method: &Method, path: &str) -> bool {
        self.bound.contains(&(method.clone(), path.to_string()))
    }

    fn bind(&mut self, method: Method, path: &str, access: Access, handler: Handler) {
        let Some(filter) = method_filter(&method) else {
            tracing::warn!(method = %method, path, "unsupported method, route not bound");
            return;
        };
        if !self.bound.insert((method.clone(), path.to_string())) {
            tracing::warn!(method = %method, path, "route already bound");
            return;
        }
        let route = move |requester: Requester,
                          uri: Uri,
                          path_params: Option<Path<HashMap<String, String>>>,
                          Query(query): Query<HashMap<String, String>>,
                          headers: HeaderMap,
                          body: Bytes| {
            let handler = handler.clone();
            let method = method.clone();
            async move {
                let path_params = path_params.map(|Path(p)| p).unwrap_or_default();
                let params = match collect_params(path_params, query, &body) {
                    Ok(params) => params,
                    Err(err) => return err.into_response(),
                };
                let request = ApiRequest {
                    method,
                    path: uri.path().to_string(),
                    params,
                    headers,
                    requester,
                };
                dispatch(handler, access, request).await
            }
        };
        let methods = match self.routes.remove(path) {
            Some(existing) => existing.on(filter, route),
            None => on(filter, route),
        };
        self.routes.insert(path.to_string(), methods);
    }
}

/// Query string first, then the JSON body over it, then path params over both.
/// A body that is not an object is kept under `body`.
fn collect_params(
    path: HashMap<String, String>,
    query: HashMap<String, String>,
    body: &Bytes,
) -> Result<Map<String, Value>, ApiError> {
    let mut params: Map<String, Value> = query.into_iter().map(|(k, v)| (k, Value::String(v))).collect();
    if !body.iter().all(u8::is_ascii_whitespace) {
        let parsed: Value =
            serde_json::from_slice(body).map_err(|_| ApiError::BadRequest("Invalid JSON body".into()))?;
        match parsed {
            Value::Object(map) => params.extend(map),
            Value::Null => {}
            other => {
                params.insert("body".into(), other);
            }
        }
    }
    params.extend(path.into_iter().map(|(k, v)| (k, Value::String(v))));
    Ok(params)
}

async fn dispatch(handler: Handler, access: Access, request: ApiRequest) -> Response {
    if let Err(err) = access.check(&request.requester) {
        return err.into_response();
    }
    let (sink, reply) = ResponseSink::channel();
    let method = request.method.clone();
    let path = request.path.clone();
    if let Err(err) = handler(request, ResponseEnvelope::bound(sink)).await {
        tracing::error!(method = %method, path = %path, error = %err, "handler failed");
    }
    match reply.await {
        Ok(reply) => (reply.status, Json(reply.body)).into_response(),
        Err(_) => {
            tracing::error!(method = %method, path = %path, "handler returned without responding");
            let status = StatusCode::INTERNAL_SERVER_ERROR;
            let body = error_body(status.as_u16(), "An internal error occurred. It has been logged.".into());
            (status, Json(body)).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::handler_fn;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::json;
    use tower::ServiceExt;

    async fn call(router: Router, req: Request<Body>) -> (StatusCode, Value) {
        let res = router.oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    fn echo() -> Handler {
        handler_fn(|req: ApiRequest, mut res: ResponseEnvelope| async move {
            res.data(Value::Object(req.params));
            res.send()
        })
    }

    #[tokio::test]
    async fn params_merge_query_body_and_path() {
        let mut transport = AxumTransport::new();
        transport.bind(Method::PUT, "/posts/:id", Access::default(), echo());
        let req = Request::put("/posts/p1?limit=5&title=q")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"title":"body","id":"ignored"}"#))
            .unwrap();
        let (status, body) = call(transport.into_router(), req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"], json!({"limit": "5", "title": "body", "id": "p1"}));
    }

    #[tokio::test]
    async fn malformed_body_is_rejected() {
        let mut transport = AxumTransport::new();
        transport.bind(Method::POST, "/posts", Access::default(), echo());
        let req = Request::post("/posts").body(Body::from("{oops")).unwrap();
        let (status, body) = call(transport.into_router(), req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["statusMessage"], json!("Invalid JSON body"));
    }

    #[tokio::test]
    async fn access_is_checked_before_the_handler() {
        let mut transport = AxumTransport::new();
        let access = Access {
            requires_auth: true,
            requires_admin: false,
        };
        transport.bind(Method::POST, "/posts/order", access, echo());
        let router = transport.into_router();

        let anonymous = Request::post("/posts/order").body(Body::empty()).unwrap();
        assert_eq!(call(router.clone(), anonymous).await.0, StatusCode::UNAUTHORIZED);

        let signed_in = Request::post("/posts/order")
            .header("X-User-Id", "u1")
            .body(Body::empty())
            .unwrap();
        assert_eq!(call(router, signed_in).await.0, StatusCode::OK);
    }

    #[tokio::test]
    async fn handler_that_never_sends_yields_500() {
        let mut transport = AxumTransport::new();
        transport.bind(
            Method::GET,
            "/silent",
            Access::default(),
            handler_fn(|_req: ApiRequest, _res: ResponseEnvelope| async move { Ok(()) }),
        );
        let req = Request::get("/silent").body(Body::empty()).unwrap();
        let (status, body) = call(transport.into_router(), req).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], json!(true));
    }

    #[test]
    fn second_bind_of_same_route_is_ignored() {
        let mut transport = AxumTransport::new();
        transport.bind(Method::GET, "/posts", Access::default(), echo());
        transport.bind(Method::GET, "/posts", Access::default(), echo());
        transport.bind(Method::POST, "/posts", Access::default(), echo());
        assert!(transport.is_bound(&Method::GET, "/posts"));
        assert!(transport.is_bound(&Method::POST, "/posts"));
        assert!(!transport.is_bound(&Method::DELETE, "/posts"));
    }
}
