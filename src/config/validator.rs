//! Config validation: referential integrity and route consistency.

use crate::config::FullConfig;
use crate::error::ConfigError;
use std::collections::{HashMap, HashSet};

pub fn validate(config: &FullConfig) -> Result<(), ConfigError> {
    let mut models = HashMap::new();
    for m in &config.models {
        if m.name.trim().is_empty() {
            return Err(ConfigError::Validation("model name must not be empty".into()));
        }
        if models.insert(m.name.as_str(), m).is_some() {
            return Err(ConfigError::Validation(format!("model '{}' defined twice", m.name)));
        }
    }

    for m in &config.models {
        if let Some(parent) = &m.extends {
            if !models.contains_key(parent.as_str()) {
                return Err(ConfigError::MissingReference {
                    kind: "model",
                    id: parent.clone(),
                });
            }
        }
        // Walk the extends chain; revisiting a model means a cycle.
        let mut seen = HashSet::from([m.name.as_str()]);
        let mut current = m.extends.as_deref();
        while let Some(name) = current {
            if !seen.insert(name) {
                return Err(ConfigError::InheritanceCycle(m.name.clone()));
            }
            current = models.get(name).and_then(|p| p.extends.as_deref());
        }
    }

    let mut routes = HashSet::new();
    for r in &config.resources {
        if !models.contains_key(r.model.as_str()) {
            return Err(ConfigError::MissingReference {
                kind: "model",
                id: r.model.clone(),
            });
        }
        if !r.public_route.starts_with('/') {
            return Err(ConfigError::Validation(format!(
                "public_route '{}' must start with '/'",
                r.public_route
            )));
        }
        let route = r.public_route.trim_end_matches('/').to_string();
        let versioned = match &r.version {
            Some(v) => format!("/{}{}", v.trim_matches('/'), route),
            None => route,
        };
        if !routes.insert(versioned.clone()) {
            return Err(ConfigError::DuplicateRoute(versioned));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ModelConfig, ResourceConfig};

    fn model(name: &str, extends: Option<&str>) -> ModelConfig {
        ModelConfig {
            name: name.into(),
            extends: extends.map(String::from),
            ..ModelConfig::default()
        }
    }

    #[test]
    fn accepts_a_chain() {
        let config = FullConfig {
            models: vec![model("content", None), model("posts", Some("content"))],
            resources: vec![ResourceConfig::new("posts", "/posts")],
        };
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn rejects_cycles_and_dangling_references() {
        let config = FullConfig {
            models: vec![model("a", Some("b")), model("b", Some("a"))],
            resources: vec![],
        };
        assert!(matches!(validate(&config), Err(ConfigError::InheritanceCycle(_))));

        let config = FullConfig {
            models: vec![model("a", Some("ghost"))],
            resources: vec![],
        };
        assert!(matches!(validate(&config), Err(ConfigError::MissingReference { .. })));

        let config = FullConfig {
            models: vec![model("a", None)],
            resources: vec![ResourceConfig::new("ghost", "/ghost")],
        };
        assert!(matches!(validate(&config), Err(ConfigError::MissingReference { .. })));
    }

    #[test]
    fn rejects_bad_and_duplicate_routes() {
        let config = FullConfig {
            models: vec![model("a", None)],
            resources: vec![ResourceConfig::new("a", "items")],
        };
        assert!(matches!(validate(&config), Err(ConfigError::Validation(_))));

        let config = FullConfig {
            models: vec![model("a", None)],
            resources: vec![ResourceConfig::new("a", "/items"), ResourceConfig::new("a", "/items/")],
        };
        assert!(matches!(validate(&config), Err(ConfigError::DuplicateRoute(_))));
    }
}
