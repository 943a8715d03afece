//! Fork/join execution of one (operation, phase) bucket.

use super::{HookContext, HookRegistry, Interceptor, Operation, Phase};
use crate::error::HookError;
use crate::transport::ApiRequest;
use futures::future::try_join_all;
use serde_json::{Map, Value};
use std::mem::discriminant;
use std::sync::Arc;

/// Runs the resource-type defaults and the resource's own hooks as one joint wait set.
///
/// Candidate order is defaults first, then instance hooks, each in registration order.
/// All interceptors are dispatched at once on the calling task and see the same payload
/// snapshot. The first failure to settle fails the run and drops the remaining branches.
/// Returned deltas are applied to the payload in candidate order, so two hooks writing
/// the same key race on registration order, not on completion order.
#[derive(Clone, Debug)]
pub struct PipelineRunner {
    resource: Arc<str>,
    global: Arc<HookRegistry>,
    instance: Arc<HookRegistry>,
}

impl PipelineRunner {
    pub fn new(resource: impl Into<Arc<str>>, global: Arc<HookRegistry>, instance: Arc<HookRegistry>) -> Self {
        PipelineRunner {
            resource: resource.into(),
            global,
            instance,
        }
    }

    pub fn instance(&self) -> &Arc<HookRegistry> {
        &self.instance
    }

    pub fn global(&self) -> &Arc<HookRegistry> {
        &self.global
    }

    pub fn candidates(&self, operation: Operation, phase: Phase) -> Vec<Arc<dyn Interceptor>> {
        let mut chain = self.global.list(operation, phase);
        chain.extend(self.instance.list(operation, phase));
        chain
    }

    pub async fn run(
        &self,
        operation: Operation,
        phase: Phase,
        payload: Map<String, Value>,
        request: Option<Arc<ApiRequest>>,
    ) -> Result<Map<String, Value>, HookError> {
        let chain = self.candidates(operation, phase);
        if chain.is_empty() {
            return Ok(payload);
        }
        tracing::debug!(
            resource = %self.resource,
            operation = %operation,
            phase = ?phase,
            hooks = chain.len(),
            "running hook pipeline"
        );

        let ctx = HookContext {
            resource: self.resource.clone(),
            operation,
            phase,
            payload: Arc::new(payload),
            request,
        };
        let deltas = try_join_all(chain.iter().map(|hook| hook.intercept(ctx.clone()))).await;
        let HookContext { payload, .. } = ctx;
        let mut payload = Arc::try_unwrap(payload).unwrap_or_else(|shared| (*shared).clone());

        for delta in deltas?.into_iter().flatten() {
            for (key, value) in delta {
                if let Some(existing) = payload.get(&key) {
                    if !same_shape(existing, &value) {
                        return Err(HookError::ShapeMismatch(key));
                    }
                }
                payload.insert(key, value);
            }
        }
        Ok(payload)
    }
}

/// Hooks may enrich a value but not swap its JSON kind. Null is compatible with anything.
fn same_shape(existing: &Value, replacement: &Value) -> bool {
    existing.is_null() || replacement.is_null() || discriminant(existing) == discriminant(replacement)
}
