//! PostgreSQL document store: one JSONB table per collection inside a dedicated schema.

use super::{id_of, project, DataStore, Document, FindQuery, RecordId, ID_FIELD, LOCATION_FIELD};
use crate::error::StoreError;
use crate::sql::{self, arguments, QueryBuf};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::{ConnectOptions, PgPool};
use std::collections::HashSet;
use std::str::FromStr;
use tokio::sync::RwLock;

pub struct PgStore {
    pool: PgPool,
    schema: String,
    known: RwLock<HashSet<String>>,
}

impl PgStore {
    pub fn new(pool: PgPool, schema: impl Into<String>) -> Self {
        PgStore {
            pool,
            schema: schema.into(),
            known: RwLock::new(HashSet::new()),
        }
    }

    /// Creates the database if needed, connects, and creates the document schema.
    pub async fn connect(database_url: &str, schema: &str) -> Result<Self, StoreError> {
        ensure_database_exists(database_url).await?;
        let pool = PgPoolOptions::new().max_connections(10).connect(database_url).await?;
        sqlx::query(&sql::create_schema(schema)).execute(&pool).await?;
        tracing::info!(schema, "document store ready");
        Ok(PgStore::new(pool, schema))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Tables are created lazily on first touch and remembered for the life of the store.
    async fn ensure_collection(&self, collection: &str) -> Result<(), StoreError> {
        if self.known.read().await.contains(collection) {
            return Ok(());
        }
        let mut known = self.known.write().await;
        if !known.contains(collection) {
            sqlx::query(&sql::create_collection(&self.schema, collection))
                .execute(&self.pool)
                .await?;
            known.insert(collection.to_string());
        }
        Ok(())
    }

    async fn fetch_docs(&self, q: QueryBuf) -> Result<Vec<Document>, StoreError> {
        tracing::debug!(sql = %q.sql, params = q.params.len(), "find");
        let rows: Vec<Value> = sqlx::query_scalar_with(&q.sql, arguments(&q.params)?)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .filter_map(|v| match v {
                Value::Object(m) => Some(m),
                _ => None,
            })
            .collect())
    }

    async fn execute(&self, q: QueryBuf) -> Result<u64, StoreError> {
        tracing::debug!(sql = %q.sql, params = q.params.len(), "execute");
        let done = sqlx::query_with(&q.sql, arguments(&q.params)?)
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected())
    }
}

#[async_trait]
impl DataStore for PgStore {
    async fn find(&self, collection: &str, query: &FindQuery) -> Result<Vec<Document>, StoreError> {
        self.ensure_collection(collection).await?;
        let q = sql::select(&self.schema, collection, query)?;
        let docs = self.fetch_docs(q).await?;
        Ok(docs
            .into_iter()
            .map(|doc| project(doc, query.fields.as_deref()))
            .collect())
    }

    async fn count(&self, collection: &str, filter: Option<&Document>) -> Result<u64, StoreError> {
        self.ensure_collection(collection).await?;
        let q = sql::count(&self.schema, collection, filter)?;
        tracing::debug!(sql = %q.sql, "count");
        let n: i64 = sqlx::query_scalar_with(&q.sql, arguments(&q.params)?)
            .fetch_one(&self.pool)
            .await?;
        Ok(n.max(0) as u64)
    }

    async fn sum(&self, collection: &str, filter: &Document, field: &str) -> Result<f64, StoreError> {
        self.ensure_collection(collection).await?;
        let q = sql::sum(&self.schema, collection, filter, field)?;
        tracing::debug!(sql = %q.sql, "sum");
        let total: f64 = sqlx::query_scalar_with(&q.sql, arguments(&q.params)?)
            .fetch_one(&self.pool)
            .await?;
        Ok(total)
    }

    async fn save(&self, collection: &str, mut record: Document) -> Result<Document, StoreError> {
        self.ensure_collection(collection).await?;
        if let Some(id) = id_of(&record) {
            let id = RecordId::from_str(id)?;
            record.insert(ID_FIELD.into(), Value::String(id.to_string()));
            self.execute(sql::upsert(&self.schema, collection, id.as_uuid(), &record)).await?;
            return Ok(record);
        }

        let id = RecordId::generate();
        let mut tx = self.pool.begin().await?;
        let count = sql::count(&self.schema, collection, None)?;
        let location: i64 = sqlx::query_scalar_with(&count.sql, arguments(&count.params)?)
            .fetch_one(&mut *tx)
            .await?;
        record.insert(ID_FIELD.into(), Value::String(id.to_string()));
        record.insert(LOCATION_FIELD.into(), Value::from(location));
        let insert = sql::upsert(&self.schema, collection, id.as_uuid(), &record);
        tracing::debug!(sql = %insert.sql, "insert");
        sqlx::query_with(&insert.sql, arguments(&insert.params)?)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(record)
    }

    async fn delete(&self, collection: &str, id: &RecordId) -> Result<u64, StoreError> {
        self.ensure_collection(collection).await?;
        self.execute(sql::delete(&self.schema, collection, id.as_uuid())).await
    }

    async fn update_fields(&self, collection: &str, filter: &Document, patch: &Document) -> Result<u64, StoreError> {
        self.ensure_collection(collection).await?;
        self.execute(sql::update_fields(&self.schema, collection, filter, patch)?).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Ensure the database in `database_url` exists; create it if not. Connects to the
/// default `postgres` database to run CREATE DATABASE.
pub async fn ensure_database_exists(database_url: &str) -> Result<(), StoreError> {
    let (admin_url, db_name) = parse_db_name_from_url(database_url)?;
    if db_name.is_empty() || db_name == "postgres" {
        return Ok(());
    }
    let opts = sqlx::postgres::PgConnectOptions::from_str(&admin_url)?;
    let mut conn = opts.connect().await?;
    let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)")
        .bind(&db_name)
        .fetch_one(&mut conn)
        .await?;
    if !exists {
        tracing::info!(database = %db_name, "creating database");
        sqlx::query(&format!("CREATE DATABASE {}", sql::quoted(&db_name)))
            .execute(&mut conn)
            .await?;
    }
    Ok(())
}

fn parse_db_name_from_url(url: &str) -> Result<(String, String), StoreError> {
    let path_start = url
        .rfind('/')
        .ok_or_else(|| StoreError::Query("DATABASE_URL: no path".into()))?
        + 1;
    let path_and_query = url.get(path_start..).unwrap_or("");
    let db_name = path_and_query.split('?').next().unwrap_or("").trim();
    let base = url.get(..path_start).unwrap_or(url);
    Ok((format!("{}postgres", base), db_name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_url_points_at_postgres_database() {
        let (admin, name) = parse_db_name_from_url("postgres://u:p@localhost:5432/blog?sslmode=disable").unwrap();
        assert_eq!(admin, "postgres://u:p@localhost:5432/postgres");
        assert_eq!(name, "blog");
        assert!(parse_db_name_from_url("nonsense").is_err());
    }
}
