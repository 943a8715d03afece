//! In-process evaluation of filter documents.
//!
//! Supported: field equality (array fields match on any element), `$eq`, `$ne`, `$in`,
//! `$nin`, `$gt`, `$gte`, `$lt`, `$lte`, `$exists`, `$regex` with `$options`, and the
//! logical `$or` / `$and`. Dotted keys address nested objects.

use super::{Document, SortDirection, SortKey};
use crate::error::StoreError;
use regex::{Regex, RegexBuilder};
use serde_json::Value;
use std::cmp::Ordering;

pub fn matches(doc: &Document, filter: &Document) -> Result<bool, StoreError> {
    for (key, cond) in filter {
        let ok = match key.as_str() {
            "$or" => {
                let mut any = false;
                for clause in clauses(key, cond)? {
                    if matches(doc, clause)? {
                        any = true;
                        break;
                    }
                }
                any
            }
            "$and" => {
                let mut all = true;
                for clause in clauses(key, cond)? {
                    if !matches(doc, clause)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            op if op.starts_with('$') => return Err(StoreError::Query(format!("unknown operator {}", op))),
            field => field_matches(lookup(doc, field), cond)?,
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Sub-filters of a logical operator.
pub fn clauses<'a>(op: &str, cond: &'a Value) -> Result<Vec<&'a Document>, StoreError> {
    let items = cond
        .as_array()
        .ok_or_else(|| StoreError::Query(format!("{} expects an array", op)))?;
    items
        .iter()
        .map(|item| {
            item.as_object()
                .ok_or_else(|| StoreError::Query(format!("{} entries must be objects", op)))
        })
        .collect()
}

/// True when `cond` is an operator object such as `{"$gt": 3}`.
pub fn is_operator_object(cond: &Value) -> bool {
    cond.as_object()
        .map_or(false, |m| !m.is_empty() && m.keys().all(|k| k.starts_with('$')))
}

pub fn lookup<'a>(doc: &'a Document, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = doc.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

fn field_matches(value: Option<&Value>, cond: &Value) -> Result<bool, StoreError> {
    let Some(ops) = cond.as_object().filter(|_| is_operator_object(cond)) else {
        return Ok(equals(value, cond));
    };
    for (op, arg) in ops {
        let ok = match op.as_str() {
            "$eq" => equals(value, arg),
            "$ne" => !equals(value, arg),
            "$in" => in_list(value, arg)?,
            "$nin" => !in_list(value, arg)?,
            "$gt" => compare(value, arg).map_or(false, |o| o == Ordering::Greater),
            "$gte" => compare(value, arg).map_or(false, |o| o != Ordering::Less),
            "$lt" => compare(value, arg).map_or(false, |o| o == Ordering::Less),
            "$lte" => compare(value, arg).map_or(false, |o| o != Ordering::Greater),
            "$exists" => value.is_some() == truthy(arg),
            "$regex" => {
                let pattern = arg
                    .as_str()
                    .ok_or_else(|| StoreError::Query("$regex expects a string".into()))?;
                let options = ops.get("$options").and_then(Value::as_str).unwrap_or("");
                let re = build_regex(pattern, options)?;
                match value {
                    Some(Value::String(s)) => re.is_match(s),
                    Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).any(|s| re.is_match(s)),
                    _ => false,
                }
            }
            "$options" => true,
            other => return Err(StoreError::Query(format!("unknown operator {}", other))),
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn equals(value: Option<&Value>, expected: &Value) -> bool {
    match (value, expected) {
        (None, Value::Null) | (Some(Value::Null), Value::Null) => true,
        (None, _) => false,
        (Some(actual), expected) if loosely_equal(actual, expected) => true,
        (Some(Value::Array(items)), expected) => items.iter().any(|item| loosely_equal(item, expected)),
        _ => false,
    }
}

/// Numbers compare by value so `1` and `1.0` are equal.
fn loosely_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn in_list(value: Option<&Value>, list: &Value) -> Result<bool, StoreError> {
    let list = list
        .as_array()
        .ok_or_else(|| StoreError::Query("$in/$nin expects an array".into()))?;
    Ok(list.iter().any(|candidate| equals(value, candidate)))
}

fn truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(false, |f| f != 0.0),
        _ => true,
    }
}

/// Range comparison: only numbers with numbers and strings with strings are ordered.
fn compare(value: Option<&Value>, bound: &Value) -> Option<Ordering> {
    match (value?, bound) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// Regex from a pattern plus flag letters. `i`, `m`, `s` and `x` are honored; `g` is accepted and ignored.
pub fn build_regex(pattern: &str, options: &str) -> Result<Regex, StoreError> {
    RegexBuilder::new(pattern)
        .case_insensitive(options.contains('i'))
        .multi_line(options.contains('m'))
        .dot_matches_new_line(options.contains('s'))
        .ignore_whitespace(options.contains('x'))
        .build()
        .map_err(|e| StoreError::Query(format!("invalid regex: {}", e)))
}

/// Ordering rank across JSON kinds: missing/null, numbers, strings, objects, arrays, booleans.
fn kind_rank(v: Option<&Value>) -> u8 {
    match v {
        None | Some(Value::Null) => 0,
        Some(Value::Number(_)) => 1,
        Some(Value::String(_)) => 2,
        Some(Value::Object(_)) => 3,
        Some(Value::Array(_)) => 4,
        Some(Value::Bool(_)) => 5,
    }
}

fn total_order(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        _ => kind_rank(a).cmp(&kind_rank(b)),
    }
}

/// Stable multi-key sort.
pub fn sort(docs: &mut [Document], keys: &[SortKey]) {
    if keys.is_empty() {
        return;
    }
    docs.sort_by(|a, b| {
        for key in keys {
            let ord = total_order(lookup(a, &key.field), lookup(b, &key.field));
            let ord = match key.direction {
                SortDirection::Asc => ord,
                SortDirection::Desc => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(v: Value) -> Document {
        match v {
            Value::Object(m) => m,
            _ => panic!("not an object"),
        }
    }

    fn check(record: Value, filter: Value) -> bool {
        matches(&doc(record), &doc(filter)).unwrap()
    }

    #[test]
    fn equality_and_array_membership() {
        assert!(check(json!({"type": "stream"}), json!({"type": "stream"})));
        assert!(!check(json!({"type": "video"}), json!({"type": "stream"})));
        assert!(check(json!({"tags": ["a", "b"]}), json!({"tags": "b"})));
        assert!(check(json!({"n": 1}), json!({"n": 1.0})));
        assert!(check(json!({}), json!({"missing": null})));
    }

    #[test]
    fn exclusion_operators_include_missing_fields() {
        assert!(check(json!({}), json!({"type": {"$ne": "stream"}})));
        assert!(!check(json!({"type": "stream"}), json!({"type": {"$ne": "stream"}})));
        assert!(check(json!({"type": "x"}), json!({"type": {"$nin": ["a", "b"]}})));
        assert!(!check(json!({"type": "a"}), json!({"type": {"$nin": ["a", "b"]}})));
    }

    #[test]
    fn ranges_only_compare_like_kinds() {
        assert!(check(json!({"price": 5}), json!({"price": {"$gt": 3, "$lte": 5}})));
        assert!(!check(json!({"price": "5"}), json!({"price": {"$gt": 3}})));
        assert!(check(json!({"name": "b"}), json!({"name": {"$gte": "a"}})));
    }

    #[test]
    fn regex_with_options() {
        let filter = json!({"title": {"$regex": "\\bsingle\\b", "$options": "ig"}});
        assert!(check(json!({"title": "A Single Post"}), filter.clone()));
        assert!(!check(json!({"title": "singles"}), filter));
    }

    #[test]
    fn logical_operators_nest() {
        let filter = json!({
            "$and": [
                {"$or": [{"a": 1}, {"b": 1}]},
                {"$or": [{"c": 1}]}
            ]
        });
        assert!(check(json!({"b": 1, "c": 1}), filter.clone()));
        assert!(!check(json!({"b": 1}), filter));
    }

    #[test]
    fn unknown_operator_is_an_error() {
        assert!(matches(&doc(json!({"a": 1})), &doc(json!({"a": {"$near": 1}}))).is_err());
        assert!(matches(&doc(json!({"a": 1})), &doc(json!({"$where": "x"}))).is_err());
    }

    #[test]
    fn nested_paths() {
        assert!(check(json!({"meta": {"views": 10}}), json!({"meta.views": {"$gte": 10}})));
    }

    #[test]
    fn multi_key_sort() {
        let mut docs = vec![
            doc(json!({"k": 1, "n": "b"})),
            doc(json!({"k": 2, "n": "a"})),
            doc(json!({"k": 1, "n": "a"})),
            doc(json!({"n": "z"})),
        ];
        sort(
            &mut docs,
            &[SortKey::new("k", SortDirection::Desc), SortKey::new("n", SortDirection::Asc)],
        );
        let order: Vec<_> = docs.iter().map(|d| d["n"].clone()).collect();
        assert_eq!(order, vec![json!("a"), json!("a"), json!("b"), json!("z")]);
    }
}
