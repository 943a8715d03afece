//! Process settings from the environment (`.env` honoured).

use crate::error::ConfigError;
use std::net::SocketAddr;
use std::path::PathBuf;

pub const DEFAULT_SCHEMA: &str = "scaffold";
pub const DEFAULT_BODY_LIMIT: usize = 1024 * 1024;

#[derive(Clone, Debug, PartialEq)]
pub struct Settings {
    /// No URL means the in-memory store.
    pub database_url: Option<String>,
    pub schema: String,
    pub config_path: PathBuf,
    pub bind_addr: SocketAddr,
    pub body_limit: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            database_url: None,
            schema: DEFAULT_SCHEMA.into(),
            config_path: PathBuf::from("config"),
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            body_limit: DEFAULT_BODY_LIMIT,
        }
    }
}

impl Settings {
    /// DATABASE_URL, SCAFFOLD_SCHEMA, CONFIG_PATH, BIND_ADDR, BODY_LIMIT.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Settings::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let bind_addr = match get("BIND_ADDR") {
            Some(raw) => raw
                .parse()
                .map_err(|_| ConfigError::Validation(format!("BIND_ADDR '{}' is not a socket address", raw)))?,
            None => defaults.bind_addr,
        };
        let body_limit = match get("BODY_LIMIT") {
            Some(raw) => raw
                .parse()
                .map_err(|_| ConfigError::Validation(format!("BODY_LIMIT '{}' is not a byte count", raw)))?,
            None => defaults.body_limit,
        };
        Ok(Settings {
            database_url: get("DATABASE_URL"),
            schema: get("SCAFFOLD_SCHEMA").unwrap_or(defaults.schema),
            config_path: get("CONFIG_PATH").map(PathBuf::from).unwrap_or(defaults.config_path),
            bind_addr,
            body_limit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(vars: &[(&str, &str)]) -> Result<Settings, ConfigError> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Settings::from_lookup(|k| vars.get(k).cloned())
    }

    #[test]
    fn defaults_without_env() {
        assert_eq!(settings(&[]).unwrap(), Settings::default());
    }

    #[test]
    fn reads_overrides() {
        let s = settings(&[
            ("DATABASE_URL", "postgres://localhost/blog"),
            ("SCAFFOLD_SCHEMA", "docs"),
            ("BIND_ADDR", "127.0.0.1:8080"),
            ("BODY_LIMIT", "2048"),
        ])
        .unwrap();
        assert_eq!(s.database_url.as_deref(), Some("postgres://localhost/blog"));
        assert_eq!(s.schema, "docs");
        assert_eq!(s.bind_addr.port(), 8080);
        assert_eq!(s.body_limit, 2048);
    }

    #[test]
    fn rejects_garbage() {
        assert!(settings(&[("BIND_ADDR", "nowhere")]).is_err());
        assert!(settings(&[("BODY_LIMIT", "lots")]).is_err());
    }
}
