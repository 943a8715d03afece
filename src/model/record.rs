use super::{Model, OWNER_FIELD};
use crate::store::{Document, ID_FIELD};
use serde_json::Value;
use std::sync::Arc;

/// One record of a model: declared fields (defaults filled in) plus `_id` once persisted.
#[derive(Clone, Debug)]
pub struct Record {
    model: Arc<Model>,
    fields: Document,
}

impl Record {
    pub fn new(model: Arc<Model>) -> Self {
        let fields = model.fields.defaults();
        Record { model, fields }
    }

    pub fn from_document(model: Arc<Model>, doc: &Document) -> Self {
        let mut record = Record::new(model);
        record.update(doc);
        record
    }

    /// Copies known fields (and `_id`) from `params`; unknown keys are ignored.
    pub fn update(&mut self, params: &Document) -> &mut Self {
        for (key, value) in params {
            if self.model.is_known_field(key) {
                self.fields.insert(key.clone(), value.clone());
            }
        }
        self
    }

    /// External projection: excluded fields are dropped, admin-only fields unless `is_admin`.
    pub fn output(&self, is_admin: bool) -> Document {
        self.fields
            .iter()
            .filter(|(k, _)| !self.model.exclude.contains(*k))
            .filter(|(k, _)| is_admin || !self.model.admin_only.contains(*k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn id(&self) -> Option<&str> {
        self.fields.get(ID_FIELD).and_then(Value::as_str)
    }

    pub fn owner(&self) -> Option<&str> {
        self.fields.get(OWNER_FIELD).and_then(Value::as_str)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) -> &mut Self {
        self.fields.insert(key.into(), value);
        self
    }

    pub fn as_document(&self) -> &Document {
        &self.fields
    }

    pub fn into_document(self) -> Document {
        self.fields
    }

    pub fn model(&self) -> &Arc<Model> {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{compose, Model};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn blog() -> Arc<Model> {
        let mut layer = Model::layer("posts").field("title", json!("")).field("secret", Value::Null);
        layer.admin_only.insert("secret".into());
        Arc::new(compose(&Model::base(), &layer))
    }

    fn doc(v: Value) -> Document {
        match v {
            Value::Object(m) => m,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn update_ignores_unknown_fields_but_keeps_id() {
        let mut record = Record::new(blog());
        record.update(&doc(json!({"_id": "abc", "title": "hi", "bogus": 1})));
        assert_eq!(record.id(), Some("abc"));
        assert_eq!(record.get("title"), Some(&json!("hi")));
        assert!(record.get("bogus").is_none());
    }

    #[test]
    fn output_hides_excluded_and_admin_only() {
        let record = Record::from_document(blog(), &doc(json!({"secret": "s", "_ip_address": "1.2.3.4"})));
        let public = record.output(false);
        assert!(!public.contains_key("secret"));
        assert!(!public.contains_key("_ip_address"));
        assert!(!public.contains_key("_additional_fields"));
        assert_eq!(record.output(true)["secret"], json!("s"));
    }

    #[test]
    fn output_update_round_trip_is_stable() {
        let model = blog();
        let first = Record::from_document(model.clone(), &doc(json!({"_id": "x", "title": "t", "_owner": "u1"})));
        let again = Record::from_document(model, &first.output(false));
        assert_eq!(again.output(false), first.output(false));
    }
}
