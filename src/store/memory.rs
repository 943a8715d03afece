//! Process-local document store. Used by tests and when no database is configured.

use super::{filter, id_of, project, DataStore, Document, FindQuery, RecordId, ID_FIELD, LOCATION_FIELD};
use crate::error::StoreError;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Default, Debug)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Vec<Document>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a collection in insertion order.
    pub async fn dump(&self, collection: &str) -> Vec<Document> {
        self.collections.read().await.get(collection).cloned().unwrap_or_default()
    }
}

fn matching<'a>(docs: &'a [Document], filter: &Document) -> Result<Vec<&'a Document>, StoreError> {
    let mut out = Vec::new();
    for doc in docs {
        if filter::matches(doc, filter)? {
            out.push(doc);
        }
    }
    Ok(out)
}

#[async_trait]
impl DataStore for MemoryStore {
    async fn find(&self, collection: &str, query: &FindQuery) -> Result<Vec<Document>, StoreError> {
        let collections = self.collections.read().await;
        let Some(docs) = collections.get(collection) else {
            return Ok(Vec::new());
        };
        let mut rows: Vec<Document> = matching(docs, &query.filter)?.into_iter().cloned().collect();
        filter::sort(&mut rows, &query.sort);
        let take = if query.limit == 0 { usize::MAX } else { query.limit as usize };
        Ok(rows
            .into_iter()
            .skip(query.skip as usize)
            .take(take)
            .map(|doc| project(doc, query.fields.as_deref()))
            .collect())
    }

    async fn count(&self, collection: &str, filter: Option<&Document>) -> Result<u64, StoreError> {
        let collections = self.collections.read().await;
        let Some(docs) = collections.get(collection) else {
            return Ok(0);
        };
        let n = match filter {
            Some(filter) => matching(docs, filter)?.len(),
            None => docs.len(),
        };
        Ok(n as u64)
    }

    async fn sum(&self, collection: &str, filter: &Document, field: &str) -> Result<f64, StoreError> {
        let collections = self.collections.read().await;
        let Some(docs) = collections.get(collection) else {
            return Ok(0.0);
        };
        Ok(matching(docs, filter)?
            .into_iter()
            .filter_map(|doc| filter::lookup(doc, field).and_then(Value::as_f64))
            .sum())
    }

    async fn save(&self, collection: &str, mut record: Document) -> Result<Document, StoreError> {
        let mut collections = self.collections.write().await;
        let docs = collections.entry(collection.to_string()).or_default();
        match id_of(&record).map(str::to_string) {
            Some(id) => {
                let id = id.parse::<RecordId>()?.to_string();
                record.insert(ID_FIELD.into(), Value::String(id.clone()));
                match docs.iter_mut().find(|d| id_of(d) == Some(id.as_str())) {
                    Some(existing) => *existing = record.clone(),
                    None => docs.push(record.clone()),
                }
            }
            None => {
                record.insert(ID_FIELD.into(), Value::String(RecordId::generate().to_string()));
                record.insert(LOCATION_FIELD.into(), Value::from(docs.len() as u64));
                docs.push(record.clone());
            }
        }
        Ok(record)
    }

    async fn delete(&self, collection: &str, id: &RecordId) -> Result<u64, StoreError> {
        let mut collections = self.collections.write().await;
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(0);
        };
        let id = id.to_string();
        let before = docs.len();
        docs.retain(|d| id_of(d) != Some(id.as_str()));
        Ok((before - docs.len()) as u64)
    }

    async fn update_fields(&self, collection: &str, filter: &Document, patch: &Document) -> Result<u64, StoreError> {
        let mut collections = self.collections.write().await;
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(0);
        };
        let mut touched = 0;
        for doc in docs.iter_mut() {
            if filter::matches(doc, filter)? {
                for (k, v) in patch {
                    doc.insert(k.clone(), v.clone());
                }
                touched += 1;
            }
        }
        Ok(touched)
    }
}
