//! Resource: the CRUD operations of one configured collection, wrapped in hook pipelines.

use super::query::{force_owner, ListQuery};
use super::validation::RequestValidator;
use crate::config::ResourceConfig;
use crate::error::{ApiError, HookError};
use crate::hooks::{DefaultHooks, HookRegistry, Interceptor, Operation, Phase, PipelineRunner};
use crate::model::{Model, Record, CREATE_TIME_FIELD, OWNER_FIELD, UPDATE_TIME_FIELD};
use crate::routes::{crud_routes, RouteEntry, RouteParser, RouteTable};
use crate::store::{project, DataStore, Document, FindQuery, ID_FIELD, LOCATION_FIELD};
use crate::transport::{ApiRequest, Transport};
use axum::http::Method;
use chrono::{SecondsFormat, Utc};
use futures::future::try_join_all;
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex, PoisonError};

pub struct Resource {
    config: ResourceConfig,
    model: Arc<Model>,
    store: Arc<dyn DataStore>,
    hooks: PipelineRunner,
    routes: Mutex<RouteTable>,
}

impl std::fmt::Debug for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resource")
            .field("model", &self.model.name)
            .field("public_route", &self.config.public_route)
            .field("routes", &self.route_count())
            .finish()
    }
}

/// Object payload slot; anything else reads as empty.
fn take_object(payload: &mut Map<String, Value>, key: &str) -> Map<String, Value> {
    match payload.remove(key) {
        Some(Value::Object(m)) => m,
        _ => Map::new(),
    }
}

fn now() -> Value {
    Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// Integral sums are reported as integers.
fn number(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Value::from(n as i64)
    } else {
        Value::from(n)
    }
}

impl Resource {
    /// Builds the resource and synthesizes its CRUD routes. Resource-type hooks come from
    /// `defaults`, keyed by the model name.
    pub fn new(
        config: ResourceConfig,
        model: Arc<Model>,
        store: Arc<dyn DataStore>,
        defaults: &DefaultHooks,
    ) -> Arc<Self> {
        let resource = Arc::new(Resource {
            hooks: PipelineRunner::new(
                model.name.as_str(),
                defaults.registry(&model.name),
                Arc::new(HookRegistry::new()),
            ),
            config,
            model,
            store,
            routes: Mutex::new(RouteTable::default()),
        });
        for entry in crud_routes(&resource) {
            resource.add_route(entry);
        }
        resource
    }

    pub fn config(&self) -> &ResourceConfig {
        &self.config
    }

    pub fn model(&self) -> &Arc<Model> {
        &self.model
    }

    pub fn collection(&self) -> &str {
        &self.model.collection
    }

    pub fn store(&self) -> &Arc<dyn DataStore> {
        &self.store
    }

    /// Hooks of this resource only.
    pub fn hooks(&self) -> &Arc<HookRegistry> {
        self.hooks.instance()
    }

    pub fn use_hook(&self, operation: Operation, phase: Phase, hook: Arc<dyn Interceptor>, priority: Option<usize>) {
        self.hooks().register(operation, phase, hook, priority);
    }

    pub fn before_list(&self, hook: Arc<dyn Interceptor>) {
        self.hooks().before(Operation::List, hook);
    }

    pub fn after_list(&self, hook: Arc<dyn Interceptor>) {
        self.hooks().after(Operation::List, hook);
    }

    pub fn before_create(&self, hook: Arc<dyn Interceptor>) {
        self.hooks().before(Operation::Create, hook);
    }

    pub fn after_create(&self, hook: Arc<dyn Interceptor>) {
        self.hooks().after(Operation::Create, hook);
    }

    pub fn before_update(&self, hook: Arc<dyn Interceptor>) {
        self.hooks().before(Operation::Update, hook);
    }

    pub fn after_update(&self, hook: Arc<dyn Interceptor>) {
        self.hooks().after(Operation::Update, hook);
    }

    pub fn before_delete(&self, hook: Arc<dyn Interceptor>) {
        self.hooks().before(Operation::Delete, hook);
    }

    pub fn after_delete(&self, hook: Arc<dyn Interceptor>) {
        self.hooks().after(Operation::Delete, hook);
    }

    pub fn before_sum(&self, hook: Arc<dyn Interceptor>) {
        self.hooks().before(Operation::Sum, hook);
    }

    pub fn after_sum(&self, hook: Arc<dyn Interceptor>) {
        self.hooks().after(Operation::Sum, hook);
    }

    pub fn before_total(&self, hook: Arc<dyn Interceptor>) {
        self.hooks().before(Operation::Total, hook);
    }

    pub fn after_total(&self, hook: Arc<dyn Interceptor>) {
        self.hooks().after(Operation::Total, hook);
    }

    /// Adds a custom route. An existing (method, path) keeps its first handler.
    pub fn add_route(&self, entry: RouteEntry) {
        self.routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .add_route(entry);
    }

    pub fn route(&self, method: &Method, path: &str) -> Option<RouteEntry> {
        self.routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(method, path)
            .cloned()
    }

    pub fn route_count(&self) -> usize {
        self.routes.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Binds every route of this resource into `transport`. The bound handlers keep the
    /// resource alive for as long as the transport holds them. Returns how many were bound.
    pub fn init_routes(self: &Arc<Self>, transport: &mut dyn Transport, parsers: &[Arc<dyn RouteParser>]) -> usize {
        let owned: RouteTable = self
            .routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|entry| entry.clone().owned_by(self.clone()))
            .collect();
        owned.init_routes(transport, parsers)
    }

    pub fn describe(&self) -> Value {
        self.model.describe()
    }

    pub async fn list(&self, req: Arc<ApiRequest>) -> Result<Value, ApiError> {
        let mut query = ListQuery::from_request(&req, self.store.as_ref())?;
        force_owner(&mut query.conditions, &self.model, Operation::List, &req.requester)?;

        let mut payload = Map::new();
        payload.insert("query".into(), serde_json::to_value(&query).map_err(|_| HookError::ShapeMismatch("query".into()))?);
        let mut payload = self
            .hooks
            .run(Operation::List, Phase::Before, payload, Some(req.clone()))
            .await?;
        let query: ListQuery = serde_json::from_value(Value::Object(take_object(&mut payload, "query")))
            .map_err(|_| HookError::ShapeMismatch("query".into()))?;

        let rows = self.store.find(self.collection(), &query.find_query()).await?;
        let is_admin = req.requester.is_admin;
        let objects: Vec<Value> = rows
            .iter()
            .map(|row| {
                let out = Record::from_document(self.model.clone(), row).output(is_admin);
                Value::Object(project(out, query.fields.as_deref()))
            })
            .collect();

        let mut payload = Map::new();
        payload.insert("objects".into(), Value::Array(objects));
        let mut payload = self
            .hooks
            .run(Operation::List, Phase::After, payload, Some(req))
            .await?;
        Ok(payload.remove("objects").unwrap_or_else(|| Value::Array(Vec::new())))
    }

    /// List narrowed to the id in the path. The first match, or NotFound.
    pub async fn get_one(&self, req: Arc<ApiRequest>) -> Result<Value, ApiError> {
        if req.id_param().is_none() {
            return Err(ApiError::MissingParameter("Missing id".into()));
        }
        match self.list(req).await? {
            Value::Array(items) => items
                .into_iter()
                .next()
                .ok_or_else(|| ApiError::NotFound("Object not found".into())),
            other => Ok(other),
        }
    }

    /// Create when no id is supplied, update otherwise. Checks and hooks follow the verb:
    /// POST runs Create even when it carries an id, PUT runs Update.
    pub async fn save(&self, req: Arc<ApiRequest>) -> Result<Value, ApiError> {
        let requester = &req.requester;
        let id = req.id_param();
        let operation = match req.method {
            Method::POST => Operation::Create,
            Method::PUT => Operation::Update,
            _ if id.is_some() => Operation::Update,
            _ => Operation::Create,
        };

        let mut params = req.params.clone();
        RequestValidator::validate(&mut params, &self.model.validations, operation)?;
        params.remove("id");
        if !requester.is_admin {
            self.model.non_editable.strip(&mut params);
        }

        let (mut record, original) = match id {
            Some(id) => {
                let id = self.store.id_from_str(&id)?;
                let mut filter = Map::new();
                filter.insert(ID_FIELD.into(), Value::String(id.to_string()));
                let found = self
                    .store
                    .find_one(self.collection(), &filter)
                    .await?
                    .ok_or_else(|| ApiError::NotFound("Object not found".into()))?;
                let original = Record::from_document(self.model.clone(), &found);
                if self.model.requires_owner(operation) && !requester.owns(original.owner()) {
                    return Err(ApiError::Forbidden("You do not own this object".into()));
                }
                if !requester.is_admin {
                    params.remove(OWNER_FIELD);
                }
                params.insert(ID_FIELD.into(), Value::String(id.to_string()));
                let mut record = original.clone();
                record.update(&params);
                (record, Some(original))
            }
            None => {
                params.remove(ID_FIELD);
                let mut record = Record::new(self.model.clone());
                record.update(&params);
                if record.owner().is_none() {
                    if let Some(me) = &requester.id {
                        record.set(OWNER_FIELD, Value::String(me.clone()));
                    }
                }
                if self.model.requires_owner(operation) && !requester.owns(record.owner()) {
                    return Err(ApiError::Forbidden("You do not own this object".into()));
                }
                (record, None)
            }
        };

        let stamp = now();
        if original.is_none() {
            record.set(CREATE_TIME_FIELD, stamp.clone());
        }
        record.set(UPDATE_TIME_FIELD, stamp);

        let mut payload = Map::new();
        payload.insert("record".into(), Value::Object(record.as_document().clone()));
        payload.insert(
            "original".into(),
            original.map_or(Value::Null, |o| Value::Object(o.into_document())),
        );
        let mut payload = self
            .hooks
            .run(operation, Phase::Before, payload, Some(req.clone()))
            .await?;
        let record = Record::from_document(self.model.clone(), &take_object(&mut payload, "record"));

        let saved = self.store.save(self.collection(), record.into_document()).await?;
        tracing::debug!(collection = %self.collection(), operation = %operation, "record saved");

        let mut payload = Map::new();
        payload.insert("record".into(), Value::Object(saved));
        let mut payload = self
            .hooks
            .run(operation, Phase::After, payload, Some(req.clone()))
            .await?;
        let saved = Record::from_document(self.model.clone(), &take_object(&mut payload, "record"));
        Ok(Value::Object(saved.output(requester.is_admin)))
    }

    pub async fn delete(&self, req: Arc<ApiRequest>) -> Result<Value, ApiError> {
        let id = req
            .id_param()
            .ok_or_else(|| ApiError::MissingParameter("Missing id".into()))?;
        let id = self.store.id_from_str(&id)?;
        let mut filter = Map::new();
        filter.insert(ID_FIELD.into(), Value::String(id.to_string()));
        let found = self
            .store
            .find_one(self.collection(), &filter)
            .await?
            .ok_or_else(|| ApiError::NotFound("Object does not exist".into()))?;
        let record = Record::from_document(self.model.clone(), &found);
        if self.model.requires_owner(Operation::Delete) && !req.requester.owns(record.owner()) {
            return Err(ApiError::Forbidden("You do not own this object".into()));
        }

        let mut payload = Map::new();
        payload.insert("record".into(), Value::Object(record.as_document().clone()));
        self.hooks
            .run(Operation::Delete, Phase::Before, payload, Some(req.clone()))
            .await?;

        let removed = self.store.delete(self.collection(), &id).await?;
        tracing::debug!(collection = %self.collection(), id = %id, removed, "record deleted");

        let mut payload = Map::new();
        payload.insert("ok".into(), Value::Bool(true));
        payload.insert("record".into(), Value::Object(record.into_document()));
        let mut payload = self
            .hooks
            .run(Operation::Delete, Phase::After, payload, Some(req))
            .await?;
        Ok(payload.remove("ok").unwrap_or(Value::Bool(true)))
    }

    pub async fn sum(&self, req: Arc<ApiRequest>) -> Result<Value, ApiError> {
        let field = req
            .param_text("field")
            .ok_or_else(|| ApiError::MissingParameter("Missing field".into()))?;
        let mut conditions = req.param_object("conditions");
        force_owner(&mut conditions, &self.model, Operation::Sum, &req.requester)?;

        let mut payload = Map::new();
        payload.insert("conditions".into(), Value::Object(conditions));
        payload.insert("field".into(), Value::String(field.clone()));
        let mut payload = self
            .hooks
            .run(Operation::Sum, Phase::Before, payload, Some(req.clone()))
            .await?;
        let conditions = take_object(&mut payload, "conditions");
        let field = match payload.remove("field") {
            Some(Value::String(f)) if !f.is_empty() => f,
            _ => field,
        };

        let sum = self.store.sum(self.collection(), &conditions, &field).await?;

        let mut payload = Map::new();
        payload.insert("sum".into(), number(sum));
        let mut payload = self
            .hooks
            .run(Operation::Sum, Phase::After, payload, Some(req))
            .await?;
        Ok(payload.remove("sum").unwrap_or(Value::from(0)))
    }

    pub async fn total(&self, req: Arc<ApiRequest>) -> Result<Value, ApiError> {
        let mut conditions = req.param_object("conditions");
        force_owner(&mut conditions, &self.model, Operation::Total, &req.requester)?;

        let mut payload = Map::new();
        payload.insert("conditions".into(), Value::Object(conditions));
        let mut payload = self
            .hooks
            .run(Operation::Total, Phase::Before, payload, Some(req.clone()))
            .await?;
        let conditions = take_object(&mut payload, "conditions");

        let total = self.store.count(self.collection(), Some(&conditions)).await?;

        let mut payload = Map::new();
        payload.insert("total".into(), Value::from(total));
        let mut payload = self
            .hooks
            .run(Operation::Total, Phase::After, payload, Some(req))
            .await?;
        Ok(payload.remove("total").unwrap_or(Value::from(0)))
    }

    /// Applies `[{_id, _location}, ...]` as independent positional updates. The whole batch
    /// is checked before the first write; writes are not rolled back if a later one fails.
    /// Returns the number of records touched.
    pub async fn order(&self, req: Arc<ApiRequest>) -> Result<u64, ApiError> {
        let items = match req.param("order").or_else(|| req.param("body")) {
            Some(Value::String(s)) => match serde_json::from_str(s) {
                Ok(Value::Array(items)) => items,
                Ok(_) => return Err(ApiError::BadRequest("Order must be an array".into())),
                Err(_) => return Err(ApiError::BadRequest("Invalid JSON in order".into())),
            },
            Some(Value::Array(items)) => items.clone(),
            Some(_) => return Err(ApiError::BadRequest("Order must be an array".into())),
            None => return Err(ApiError::BadRequest("Missing order".into())),
        };

        let mut pairs = Vec::with_capacity(items.len());
        for item in &items {
            let id = item
                .get(ID_FIELD)
                .or_else(|| item.get("id"))
                .and_then(Value::as_str);
            let location = item
                .get(LOCATION_FIELD)
                .or_else(|| item.get("position"))
                .filter(|v| v.is_number());
            let (Some(id), Some(location)) = (id, location) else {
                return Err(ApiError::BadRequest("Each order entry needs _id and _location".into()));
            };
            let id = self.store.id_from_str(id)?;
            pairs.push((id, location.clone()));
        }

        let owner = if req.requester.is_admin {
            None
        } else {
            Some(
                req.requester
                    .id
                    .clone()
                    .ok_or_else(|| ApiError::Unauthorized("Not authorized".into()))?,
            )
        };

        let updates = pairs.into_iter().map(|(id, location)| {
            let mut filter = Document::new();
            filter.insert(ID_FIELD.into(), Value::String(id.to_string()));
            if let Some(owner) = &owner {
                filter.insert(OWNER_FIELD.into(), Value::String(owner.clone()));
            }
            let mut patch = Document::new();
            patch.insert(LOCATION_FIELD.into(), location);
            async move { self.store.update_fields(self.collection(), &filter, &patch).await }
        });
        let touched = try_join_all(updates).await?;
        Ok(touched.into_iter().sum())
    }

    /// Records whose `field` equals `value`. No hooks run.
    pub async fn find_by_field(&self, field: &str, value: Value) -> Result<Vec<Record>, ApiError> {
        if !self.model.is_known_field(field) {
            return Err(ApiError::BadRequest(format!("Unknown field {}", field)));
        }
        let mut filter = Document::new();
        filter.insert(field.to_string(), value);
        let rows = self.store.find(self.collection(), &FindQuery::filter(filter)).await?;
        Ok(rows
            .iter()
            .map(|row| Record::from_document(self.model.clone(), row))
            .collect())
    }
}
