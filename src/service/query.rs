//! List query assembly from request params.

use super::search::{convert_search_to_conditions, SearchOptions, SearchType};
use crate::error::ApiError;
use crate::hooks::Operation;
use crate::model::{Model, OWNER_FIELD};
use crate::store::{DataStore, FindQuery, SortDirection, SortKey, ID_FIELD, LOCATION_FIELD};
use crate::transport::{ApiRequest, Requester};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const DEFAULT_LIMIT: u64 = 50;
pub const MAX_LIMIT: u64 = 1000;

/// One sort column as it appears in hook payloads: `direction` is 1 or -1.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SortSpec {
    pub field: String,
    pub direction: i64,
}

/// The query descriptor handed to List before-hooks under `query`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub conditions: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<String>>,
    #[serde(default)]
    pub skip: u64,
    #[serde(default = "default_limit")]
    pub limit: u64,
    #[serde(default)]
    pub sort: Vec<SortSpec>,
}

fn default_limit() -> u64 {
    DEFAULT_LIMIT
}

impl Default for ListQuery {
    fn default() -> Self {
        ListQuery {
            conditions: Map::new(),
            fields: None,
            skip: 0,
            limit: DEFAULT_LIMIT,
            sort: vec![SortSpec {
                field: LOCATION_FIELD.into(),
                direction: 1,
            }],
        }
    }
}

impl ListQuery {
    /// Reads `conditions`, `not`, `_id`/`id`, `search` (+ options), `skip`, `limit`,
    /// `sort`/`sortDir` and `fields`.
    pub fn from_request(req: &ApiRequest, store: &dyn DataStore) -> Result<Self, ApiError> {
        let mut conditions = req.param_object("conditions");

        for (key, value) in req.param_object("not") {
            if key == ID_FIELD {
                let ids = match &value {
                    Value::Array(items) => items.iter().collect::<Vec<_>>(),
                    single => vec![single],
                };
                for id in ids {
                    let valid = id.as_str().map(|s| store.id_from_str(s).is_ok()).unwrap_or(false);
                    if !valid {
                        return Err(ApiError::BadRequest("Invalid ID in not condition".into()));
                    }
                }
            }
            let clause = match value {
                Value::Array(items) => serde_json::json!({ "$nin": items }),
                single => serde_json::json!({ "$ne": single }),
            };
            conditions.insert(key, clause);
        }

        if let Some(id) = req.id_param() {
            let id = store
                .id_from_str(&id)
                .map_err(|_| ApiError::BadRequest("Invalid ID".into()))?;
            conditions.insert(ID_FIELD.into(), Value::String(id.to_string()));
        }

        let search = req.param_object("search");
        if !search.is_empty() {
            convert_search_to_conditions(&search, &mut conditions, &search_options(req))?;
        }

        let skip = req.param_i64("skip").unwrap_or(0).max(0) as u64;
        let limit = match req.param_i64("limit") {
            Some(n) if n > 0 => (n as u64).min(MAX_LIMIT),
            _ => DEFAULT_LIMIT,
        };

        Ok(ListQuery {
            conditions,
            fields: list_param(req.param("fields")).filter(|f| !f.is_empty()),
            skip,
            limit,
            sort: sort_specs(req),
        })
    }

    pub fn find_query(&self) -> FindQuery {
        FindQuery {
            filter: self.conditions.clone(),
            fields: self.fields.clone(),
            skip: self.skip,
            limit: self.limit,
            sort: self
                .sort
                .iter()
                .map(|s| SortKey::new(s.field.clone(), SortDirection::from_value(&Value::from(s.direction))))
                .collect(),
        }
    }
}

fn search_options(req: &ApiRequest) -> SearchOptions {
    let defaults = SearchOptions::default();
    SearchOptions {
        search_type: req
            .param_text("searchType")
            .map(|s| SearchType::parse(&s))
            .unwrap_or(defaults.search_type),
        whole_words: req.param_bool("wholeWords").unwrap_or(defaults.whole_words),
        is_regex: req.param_bool("isRegex").unwrap_or(defaults.is_regex),
        regex_options: req
            .param_text("regexOptions")
            .or_else(|| req.param_text("searchOptions"))
            .unwrap_or(defaults.regex_options),
    }
}

/// Array param, a JSON-encoded array, or a comma separated string.
fn list_param(value: Option<&Value>) -> Option<Vec<String>> {
    let items = match value? {
        Value::Array(items) => items.clone(),
        Value::String(s) if s.trim_start().starts_with('[') => match serde_json::from_str(s) {
            Ok(Value::Array(items)) => items,
            _ => return None,
        },
        Value::String(s) => s.split(',').map(|p| Value::String(p.trim().to_string())).collect(),
        Value::Number(n) => vec![Value::String(n.to_string())],
        _ => return None,
    };
    Some(
        items
            .iter()
            .filter_map(|v| match v {
                Value::String(s) if !s.is_empty() => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect(),
    )
}

/// `sort` names the columns; `sortDir` supplies matching directions, missing ones ascend.
fn sort_specs(req: &ApiRequest) -> Vec<SortSpec> {
    let fields = list_param(req.param("sort")).unwrap_or_default();
    if fields.is_empty() {
        let direction = direction_of(req.param_text("sortDir").as_deref());
        return vec![SortSpec {
            field: LOCATION_FIELD.into(),
            direction,
        }];
    }
    let dirs = list_param(req.param("sortDir")).unwrap_or_default();
    fields
        .into_iter()
        .enumerate()
        .map(|(i, field)| SortSpec {
            field,
            direction: direction_of(dirs.get(i).map(String::as_str)),
        })
        .collect()
}

fn direction_of(raw: Option<&str>) -> i64 {
    match raw {
        Some(s) if SortDirection::from_value(&Value::String(s.trim().to_string())) == SortDirection::Desc => -1,
        _ => 1,
    }
}

/// Pins `_owner` to the requester when the model protects `operation` and the requester
/// is not an admin.
pub fn force_owner(
    conditions: &mut Map<String, Value>,
    model: &Model,
    operation: Operation,
    requester: &Requester,
) -> Result<(), ApiError> {
    if !model.requires_owner(operation) || requester.is_admin {
        return Ok(());
    }
    let id = requester
        .id
        .clone()
        .ok_or_else(|| ApiError::Unauthorized("Not authorized".into()))?;
    conditions.insert(OWNER_FIELD.into(), Value::String(id));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use axum::http::Method;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn request(params: Value) -> ApiRequest {
        ApiRequest::new(Method::GET, "/posts").with_params(params)
    }

    fn assemble(params: Value) -> Result<ListQuery, ApiError> {
        ListQuery::from_request(&request(params), &MemoryStore::new())
    }

    #[test]
    fn defaults() {
        let q = assemble(json!({})).unwrap();
        assert_eq!(q, ListQuery::default());
        let find = q.find_query();
        assert_eq!(find.limit, 50);
        assert_eq!(find.sort, vec![SortKey::new("_location", SortDirection::Asc)]);
    }

    #[test]
    fn whole_word_search_becomes_or_clause() {
        let q = assemble(json!({"search": "{\"title\":\"single\"}", "wholeWords": "true"})).unwrap();
        assert_eq!(
            Value::Object(q.conditions),
            json!({"$or": [{"title": {"$regex": "\\bsingle\\b", "$options": "ig"}}]})
        );
    }

    #[test]
    fn not_builds_exclusions() {
        let q = assemble(json!({"not": {"type": "draft", "tag": ["a", "b"]}})).unwrap();
        assert_eq!(q.conditions["type"], json!({"$ne": "draft"}));
        assert_eq!(q.conditions["tag"], json!({"$nin": ["a", "b"]}));

        let err = assemble(json!({"not": {"_id": "nope"}})).unwrap_err();
        assert_eq!(err.to_string(), "Invalid ID in not condition");
    }

    #[test]
    fn id_is_validated() {
        let err = assemble(json!({"id": "not-a-uuid"})).unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
        let id = uuid::Uuid::new_v4().to_string();
        let q = assemble(json!({"_id": id})).unwrap();
        assert_eq!(q.conditions["_id"], json!(id));
    }

    #[test]
    fn pagination_and_multi_sort() {
        let q = assemble(json!({
            "skip": "10",
            "limit": 5000,
            "sort": "title,create_time",
            "sortDir": "1,-1",
            "fields": ["title"]
        }))
        .unwrap();
        assert_eq!(q.skip, 10);
        assert_eq!(q.limit, MAX_LIMIT);
        assert_eq!(
            q.sort,
            vec![
                SortSpec { field: "title".into(), direction: 1 },
                SortSpec { field: "create_time".into(), direction: -1 },
            ]
        );
        assert_eq!(q.fields, Some(vec!["title".to_string()]));
    }

    #[test]
    fn single_sort_direction_applies_to_location() {
        let q = assemble(json!({"sortDir": "-1"})).unwrap();
        assert_eq!(q.sort[0].direction, -1);
    }

    #[test]
    fn owner_is_forced_for_protected_lists() {
        let model = Model::layer("posts").owner_required(Operation::List);
        let mut conditions = Map::new();
        force_owner(&mut conditions, &model, Operation::List, &Requester::user("u1")).unwrap();
        assert_eq!(conditions["_owner"], json!("u1"));

        let mut conditions = Map::new();
        force_owner(&mut conditions, &model, Operation::List, &Requester::admin("root")).unwrap();
        assert!(conditions.is_empty());

        let err = force_owner(&mut Map::new(), &model, Operation::List, &Requester::anonymous()).unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(_)));
    }
}
