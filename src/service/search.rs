//! Free-text search terms to regex filter clauses.

use crate::error::ApiError;
use crate::store::filter::build_regex;
use serde_json::{json, Map, Value};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SearchType {
    And,
    #[default]
    Or,
}

impl SearchType {
    /// Case-insensitive; anything other than AND/OR falls back to OR.
    pub fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("and") {
            SearchType::And
        } else {
            SearchType::Or
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SearchOptions {
    pub search_type: SearchType,
    pub whole_words: bool,
    pub is_regex: bool,
    pub regex_options: String,
}

impl Default for SearchOptions {
    fn default() -> Self {
        SearchOptions {
            search_type: SearchType::Or,
            whole_words: false,
            is_regex: true,
            regex_options: "ig".into(),
        }
    }
}

/// Merges clauses generated from `search` (`{field: term | [terms]}`) into `conditions`.
/// An empty search leaves the conditions untouched.
pub fn convert_search_to_conditions(
    search: &Map<String, Value>,
    conditions: &mut Map<String, Value>,
    options: &SearchOptions,
) -> Result<(), ApiError> {
    if search.is_empty() {
        return Ok(());
    }
    let mut primary = Vec::new();
    for (field, terms) in search {
        let clauses = build_clauses(field, terms, options)?;
        match options.search_type {
            SearchType::And if clauses.len() == 1 => primary.extend(clauses),
            SearchType::And => primary.push(json!({ "$and": clauses })),
            SearchType::Or => primary.extend(clauses),
        }
    }
    merge_or_clause(conditions, primary);
    Ok(())
}

fn build_clauses(field: &str, terms: &Value, options: &SearchOptions) -> Result<Vec<Value>, ApiError> {
    let terms: Vec<String> = match terms {
        Value::Array(items) => items.iter().filter_map(term_text).collect(),
        single => term_text(single).into_iter().collect(),
    };
    let boundary = if options.whole_words { "\\b" } else { "" };
    terms
        .into_iter()
        .map(|term| {
            let term = if options.is_regex { term } else { regex::escape(&term) };
            let pattern = format!("{}{}{}", boundary, term, boundary);
            build_regex(&pattern, &options.regex_options)
                .map_err(|_| ApiError::BadRequest(format!("Invalid search pattern for {}", field)))?;
            Ok(json!({ field: { "$regex": pattern, "$options": options.regex_options } }))
        })
        .collect()
}

fn term_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Sets `$or` when absent. When one exists, both are kept conjunctively under `$and`
/// (new clause first) and the top-level `$or` is removed.
pub fn merge_or_clause(conditions: &mut Map<String, Value>, clause: Vec<Value>) {
    if clause.is_empty() {
        return;
    }
    let Some(existing) = conditions.remove("$or") else {
        conditions.insert("$or".into(), Value::Array(clause));
        return;
    };
    let pair = [json!({ "$or": clause }), json!({ "$or": existing })];
    match conditions.get_mut("$and") {
        Some(Value::Array(and)) => and.extend(pair),
        _ => {
            conditions.insert("$and".into(), Value::Array(pair.into()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn obj(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(m) => m,
            _ => panic!("not an object"),
        }
    }

    fn whole_words() -> SearchOptions {
        SearchOptions {
            whole_words: true,
            ..SearchOptions::default()
        }
    }

    fn re(p: &str) -> Value {
        json!({"$regex": p, "$options": "ig"})
    }

    #[test]
    fn whole_word_single_terms() {
        let mut conditions = obj(json!({"type": "stream"}));
        let search = obj(json!({"title": "single", "body": "single"}));
        convert_search_to_conditions(&search, &mut conditions, &whole_words()).unwrap();
        assert_eq!(
            Value::Object(conditions),
            json!({
                "type": "stream",
                "$or": [{"body": re("\\bsingle\\b")}, {"title": re("\\bsingle\\b")}]
            })
        );
    }

    #[test]
    fn and_groups_terms_per_field() {
        let mut conditions = Map::new();
        let search = obj(json!({"title": ["one", "two"], "body": "one"}));
        let options = SearchOptions {
            search_type: SearchType::parse("and"),
            ..whole_words()
        };
        convert_search_to_conditions(&search, &mut conditions, &options).unwrap();
        assert_eq!(
            Value::Object(conditions),
            json!({
                "$or": [
                    {"body": re("\\bone\\b")},
                    {"$and": [{"title": re("\\bone\\b")}, {"title": re("\\btwo\\b")}]}
                ]
            })
        );
    }

    #[test]
    fn or_flattens_all_terms() {
        let mut conditions = Map::new();
        let search = obj(json!({"title": ["one", "two"]}));
        convert_search_to_conditions(&search, &mut conditions, &SearchOptions::default()).unwrap();
        assert_eq!(
            Value::Object(conditions),
            json!({"$or": [{"title": re("one")}, {"title": re("two")}]})
        );
    }

    #[test]
    fn unknown_search_type_falls_back_to_or() {
        assert_eq!(SearchType::parse("XOR"), SearchType::Or);
        assert_eq!(SearchType::parse("And"), SearchType::And);
    }

    #[test]
    fn literal_terms_are_escaped() {
        let mut conditions = Map::new();
        let search = obj(json!({"title": "a.b(c"}));
        let options = SearchOptions {
            is_regex: false,
            ..SearchOptions::default()
        };
        convert_search_to_conditions(&search, &mut conditions, &options).unwrap();
        assert_eq!(conditions["$or"][0]["title"]["$regex"], json!("a\\.b\\(c"));
    }

    #[test]
    fn invalid_regex_is_bad_request() {
        let mut conditions = Map::new();
        let search = obj(json!({"title": "a(b"}));
        let err = convert_search_to_conditions(&search, &mut conditions, &SearchOptions::default()).unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[test]
    fn existing_or_is_combined_conjunctively() {
        let mut conditions = obj(json!({"$or": [{"a": 1}]}));
        merge_or_clause(&mut conditions, vec![json!({"b": 2})]);
        assert_eq!(
            Value::Object(conditions.clone()),
            json!({"$and": [{"$or": [{"b": 2}]}, {"$or": [{"a": 1}]}]})
        );

        let mut conditions = obj(json!({"$or": [{"a": 1}], "$and": [{"c": 3}]}));
        merge_or_clause(&mut conditions, vec![json!({"b": 2})]);
        assert_eq!(
            conditions["$and"],
            json!([{"c": 3}, {"$or": [{"b": 2}]}, {"$or": [{"a": 1}]}])
        );
        assert!(conditions.get("$or").is_none());
    }

    #[test]
    fn empty_search_leaves_conditions_alone() {
        let mut conditions = obj(json!({"type": "stream"}));
        convert_search_to_conditions(&Map::new(), &mut conditions, &whole_words()).unwrap();
        assert_eq!(Value::Object(conditions), json!({"type": "stream"}));
    }
}
