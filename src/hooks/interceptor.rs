//! Interceptor contract and the context each one receives.

use super::{Operation, Phase};
use crate::error::HookError;
use crate::transport::{ApiRequest, Requester};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::future::Future;
use std::sync::Arc;

/// Keys an interceptor wants to overwrite in the payload. `None` leaves it untouched.
pub type HookDelta = Option<Map<String, Value>>;

pub type HookResult = Result<HookDelta, HookError>;

/// Read-only snapshot handed to every interceptor of one pipeline run.
#[derive(Clone, Debug)]
pub struct HookContext {
    pub resource: Arc<str>,
    pub operation: Operation,
    pub phase: Phase,
    pub payload: Arc<Map<String, Value>>,
    pub request: Option<Arc<ApiRequest>>,
}

impl HookContext {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    pub fn requester(&self) -> Option<&Requester> {
        self.request.as_deref().map(|r| &r.requester)
    }
}

#[async_trait]
pub trait Interceptor: Send + Sync {
    async fn intercept(&self, ctx: HookContext) -> HookResult;
}

struct FnInterceptor<F>(F);

#[async_trait]
impl<F, Fut> Interceptor for FnInterceptor<F>
where
    F: Fn(HookContext) -> Fut + Send + Sync,
    Fut: Future<Output = HookResult> + Send,
{
    async fn intercept(&self, ctx: HookContext) -> HookResult {
        (self.0)(ctx).await
    }
}

/// Wraps an async closure as an interceptor.
pub fn interceptor<F, Fut>(f: F) -> Arc<dyn Interceptor>
where
    F: Fn(HookContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HookResult> + Send + 'static,
{
    Arc::new(FnInterceptor(f))
}
