//! Raw config types matching `models.json` and `resources.json`.

use crate::hooks::Operation;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,
}

/// A built-in validation by name (`"checkEmail"`) or an inline rule object.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ValidationConfig {
    Named(String),
    Rule(ValidationRule),
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub name: String,
    /// Defaults to `name`.
    #[serde(default)]
    pub collection: Option<String>,
    /// Another model to compose onto. Every model implicitly extends the base model.
    #[serde(default)]
    pub extends: Option<String>,
    /// Field name to default value.
    #[serde(default)]
    pub fields: BTreeMap<String, Value>,
    #[serde(default)]
    pub validations: BTreeMap<String, ValidationConfig>,
    /// Per verb (`post`, `put`, ...), fields whose validation is skipped.
    #[serde(default)]
    pub validation_exceptions: BTreeMap<Operation, Vec<String>>,
    #[serde(default)]
    pub non_editable: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default)]
    pub admin_only: Vec<String>,
    #[serde(default)]
    pub requires_owner: Vec<Operation>,
}

/// Route configuration of one resource. Writes are enabled by a non-empty
/// `public_post_route`, deletes by a non-empty `public_delete_route`; all routes are
/// mounted under `public_route`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceConfig {
    pub model: String,
    pub public_route: String,
    #[serde(default)]
    pub public_post_route: Option<String>,
    #[serde(default)]
    pub public_delete_route: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub requires_auth: bool,
}

impl ResourceConfig {
    pub fn new(model: impl Into<String>, public_route: impl Into<String>) -> Self {
        ResourceConfig {
            model: model.into(),
            public_route: public_route.into(),
            ..Self::default()
        }
    }

    /// Enables create, update, order and delete on the public route.
    pub fn writable(mut self) -> Self {
        self.public_post_route = Some(self.public_route.clone());
        self.public_delete_route = Some(self.public_route.clone());
        self
    }

    pub fn allows_writes(&self) -> bool {
        self.public_post_route.as_deref().map_or(false, |r| !r.is_empty())
    }

    pub fn allows_deletes(&self) -> bool {
        self.public_delete_route.as_deref().map_or(false, |r| !r.is_empty())
    }
}

/// Both config files in one struct for in-memory loading.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FullConfig {
    pub models: Vec<ModelConfig>,
    pub resources: Vec<ResourceConfig>,
}
