//! Before/after interceptor pipelines around each CRUD operation.

mod interceptor;
mod pipeline;
mod registry;

pub use interceptor::{interceptor, HookContext, HookDelta, HookResult, Interceptor};
pub use pipeline::PipelineRunner;
pub use registry::{DefaultHooks, HookRegistry, Operation, Phase};
