//! Load config from a directory of JSON files and resolve it into models.

use crate::config::resolved::ResolvedConfig;
use crate::config::types::*;
use crate::config::{validate, FullConfig};
use crate::error::ConfigError;
use crate::model::{compose, Builtin, FieldCheck, Model, NonEditableSet};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

pub const MODELS_FILE: &str = "models.json";
pub const RESOURCES_FILE: &str = "resources.json";

/// Build resolved config (validates first). Each model is the base model composed with
/// its `extends` chain, root first.
pub fn resolve(config: &FullConfig) -> Result<ResolvedConfig, ConfigError> {
    validate(config)?;
    let by_name: HashMap<&str, &ModelConfig> = config.models.iter().map(|m| (m.name.as_str(), m)).collect();

    let mut models = HashMap::new();
    for m in &config.models {
        let mut chain = vec![m];
        let mut parent = m.extends.as_deref();
        while let Some(name) = parent {
            let p = by_name.get(name).ok_or_else(|| ConfigError::MissingReference {
                kind: "model",
                id: name.to_string(),
            })?;
            chain.push(*p);
            parent = p.extends.as_deref();
        }
        let mut model = Model::base();
        for layer in chain.iter().rev() {
            model = compose(&model, &layer_model(layer)?);
        }
        models.insert(m.name.clone(), Arc::new(model));
    }

    Ok(ResolvedConfig {
        models,
        resources: config.resources.clone(),
    })
}

fn layer_model(config: &ModelConfig) -> Result<Model, ConfigError> {
    let mut model = Model::layer(config.name.clone());
    if let Some(collection) = &config.collection {
        model.collection = collection.clone();
    }
    for (field, default) in &config.fields {
        model.fields.insert(field.clone(), default.clone());
    }
    for (field, validation) in &config.validations {
        let check = match validation {
            ValidationConfig::Named(name) => {
                let builtin: Builtin = name.parse().map_err(|name| ConfigError::UnknownValidation {
                    field: field.clone(),
                    name,
                })?;
                FieldCheck::Builtin(builtin)
            }
            ValidationConfig::Rule(rule) => FieldCheck::Rule(rule.clone()),
        };
        model.validations.insert(field.clone(), check);
    }
    for (operation, fields) in &config.validation_exceptions {
        for field in fields {
            model.validations.except(*operation, field.clone());
        }
    }
    model.non_editable = config.non_editable.iter().cloned().collect::<NonEditableSet>();
    model.exclude.extend(config.exclude.iter().cloned());
    model.admin_only.extend(config.admin_only.iter().cloned());
    model.requires_owner.extend(config.requires_owner.iter().copied());
    Ok(model)
}

/// Reads `models.json` and `resources.json` from `dir`. A missing resources file means
/// no resources.
pub fn load_from_dir(dir: impl AsRef<Path>) -> Result<FullConfig, ConfigError> {
    let dir = dir.as_ref();
    let models = read_json::<Vec<ModelConfig>>(&dir.join(MODELS_FILE))?;
    let resources_path = dir.join(RESOURCES_FILE);
    let resources = if resources_path.exists() {
        read_json::<Vec<ResourceConfig>>(&resources_path)?
    } else {
        Vec::new()
    };
    tracing::info!(
        dir = %dir.display(),
        models = models.len(),
        resources = resources.len(),
        "config loaded"
    );
    Ok(FullConfig { models, resources })
}

fn read_json<T>(path: &Path) -> Result<T, ConfigError>
where
    T: for<'de> serde::Deserialize<'de>,
{
    let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))?;
    serde_json::from_str(&raw).map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::Operation;
    use serde_json::json;

    fn config() -> FullConfig {
        let models: Vec<ModelConfig> = serde_json::from_value(json!([
            {
                "name": "content",
                "fields": {"title": "", "body": ""},
                "validations": {"title": "notEmpty"},
                "non_editable": ["slug"]
            },
            {
                "name": "posts",
                "extends": "content",
                "fields": {"title": "untitled", "views": 0},
                "validations": {"views": "isInteger"},
                "validation_exceptions": {"put": ["title"]},
                "admin_only": ["views"],
                "requires_owner": ["put"]
            }
        ]))
        .unwrap();
        FullConfig {
            models,
            resources: vec![ResourceConfig::new("posts", "/posts")],
        }
    }

    #[test]
    fn composes_along_extends() {
        let resolved = resolve(&config()).unwrap();
        let posts = resolved.model("posts").unwrap();
        assert_eq!(posts.collection, "posts");
        let defaults = posts.fields.defaults();
        assert_eq!(defaults["title"], json!("untitled"));
        assert_eq!(defaults["body"], json!(""));
        assert!(defaults.contains_key("_owner"));
        assert!(posts.non_editable.contains("slug"));
        assert!(posts.non_editable.contains("create_time"));
        assert!(posts.requires_owner(Operation::Update));
        assert!(posts.exclude.contains("_ip_address"));
        let checked: Vec<_> = posts.validations.applicable(Operation::Update).map(|(f, _)| f).collect();
        assert_eq!(checked, vec!["views"]);
    }

    #[test]
    fn unknown_builtin_is_rejected() {
        let mut config = config();
        config.models[0]
            .validations
            .insert("title".into(), ValidationConfig::Named("isShiny".into()));
        assert!(matches!(resolve(&config), Err(ConfigError::UnknownValidation { .. })));
    }

    #[test]
    fn loads_from_a_directory() {
        let dir = std::env::temp_dir().join(format!("scaffold-config-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(MODELS_FILE), r#"[{"name": "notes", "fields": {"text": ""}}]"#).unwrap();
        let loaded = load_from_dir(&dir).unwrap();
        assert_eq!(loaded.models.len(), 1);
        assert!(loaded.resources.is_empty());
        assert!(load_from_dir(dir.join("missing")).is_err());
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
