//! Typed bind values for generated statements.

use crate::error::StoreError;
use serde_json::Value;
use sqlx::postgres::PgArguments;
use sqlx::Arguments;

/// One positional parameter. Each variant binds as its natural PostgreSQL type.
#[derive(Clone, Debug, PartialEq)]
pub enum SqlArg {
    Json(Value),
    Text(String),
    Path(Vec<String>),
    Float(f64),
    BigInt(i64),
    Uuid(uuid::Uuid),
}

impl SqlArg {
    /// JSON path for the `#>` / `#>>` operators from a dotted field name.
    pub fn path(field: &str) -> Self {
        SqlArg::Path(field.split('.').map(str::to_string).collect())
    }
}

/// Encodes `params` in order into an argument buffer for `sqlx::query_with`.
pub fn arguments(params: &[SqlArg]) -> Result<PgArguments, StoreError> {
    let mut args = PgArguments::default();
    for param in params {
        let added = match param {
            SqlArg::Json(v) => args.add(v.clone()),
            SqlArg::Text(s) => args.add(s.clone()),
            SqlArg::Path(p) => args.add(p.clone()),
            SqlArg::Float(f) => args.add(*f),
            SqlArg::BigInt(n) => args.add(*n),
            SqlArg::Uuid(u) => args.add(*u),
        };
        added.map_err(|e| StoreError::Query(format!("bind: {}", e)))?;
    }
    Ok(args)
}
