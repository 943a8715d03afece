//! Resolved configuration: models composed along `extends`, ready for runtime use.

use crate::config::ResourceConfig;
use crate::model::Model;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone, Debug, Default)]
pub struct ResolvedConfig {
    pub models: HashMap<String, Arc<Model>>,
    pub resources: Vec<ResourceConfig>,
}

impl ResolvedConfig {
    pub fn model(&self, name: &str) -> Option<&Arc<Model>> {
        self.models.get(name)
    }
}
