//! Request validation from model checks.

use crate::config::ValidationRule;
use crate::error::ApiError;
use crate::hooks::Operation;
use crate::model::{Builtin, FieldCheck, ValidationSet};
use chrono::{DateTime, NaiveDate, SecondsFormat, TimeZone, Utc};
use regex::Regex;
use serde_json::{Map, Value};

pub struct RequestValidator;

impl RequestValidator {
    /// Runs every check not excepted for `operation`, in field order. The first failure
    /// aborts. Coerced values replace fields present in `params`; absent fields stay absent.
    pub fn validate(
        params: &mut Map<String, Value>,
        validations: &ValidationSet,
        operation: Operation,
    ) -> Result<(), ApiError> {
        for (field, check) in validations.applicable(operation) {
            let coerced = match check {
                FieldCheck::Builtin(builtin) => run_builtin(*builtin, field, params),
                FieldCheck::Rule(rule) => validate_rule(field, params.get(field), rule).map(|_| None),
                FieldCheck::Custom(f) => f(field, params).map(Some),
            }
            .map_err(ApiError::Validation)?;
            if let (Some(value), Some(slot)) = (coerced, params.get_mut(field)) {
                *slot = value;
            }
        }
        Ok(())
    }
}

/// Display text of a param the way string checks see it; missing is empty.
fn text_of(v: Option<&Value>) -> String {
    match v {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn run_builtin(builtin: Builtin, field: &str, params: &Map<String, Value>) -> Result<Option<Value>, String> {
    let value = params.get(field);
    let text = text_of(value);
    match builtin {
        Builtin::CheckPassword => {
            if text.chars().count() < 6 {
                return Err("Password must be at least 6 characters in length".into());
            }
            if text != text_of(params.get(&format!("confirm_{}", field))) {
                return Err("Passwords did not match".into());
            }
            Ok(None)
        }
        Builtin::CheckEmail => {
            if !is_email(&text) {
                return Err("Email is invalid".into());
            }
            Ok(None)
        }
        Builtin::CheckUsername => {
            if text.chars().count() < 3 {
                return Err("Username is invalid. Must be at least 3 characters".into());
            }
            Ok(None)
        }
        Builtin::NotEmpty => {
            if text.is_empty() {
                return Err(format!("{} cannot be empty", field));
            }
            Ok(None)
        }
        Builtin::NotNull => match value {
            None | Some(Value::Null) => Err(format!("{} cannot be null", field)),
            Some(_) => Ok(None),
        },
        Builtin::IsInteger => Ok(Some(Value::from(coerce_integer(value)))),
        Builtin::IsDate => coerce_date(value)
            .map(|d| Some(Value::String(d.to_rfc3339_opts(SecondsFormat::Millis, true))))
            .ok_or_else(|| format!("{} is not a valid date", field)),
    }
}

fn is_email(s: &str) -> bool {
    let mut parts = s.splitn(2, '@');
    let (Some(local), Some(domain)) = (parts.next(), parts.next()) else {
        return false;
    };
    !local.is_empty()
        && !s.chars().any(char::is_whitespace)
        && !domain.contains('@')
        && domain.split('.').count() >= 2
        && domain.split('.').all(|label| !label.is_empty())
}

/// Integer value of a param; anything unparseable becomes 0.
fn coerce_integer(value: Option<&Value>) -> i64 {
    match value {
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)).unwrap_or(0),
        Some(Value::String(s)) => {
            let s = s.trim();
            let end = s
                .char_indices()
                .find(|&(i, c)| !(c.is_ascii_digit() || (i == 0 && (c == '-' || c == '+'))))
                .map_or(s.len(), |(i, _)| i);
            s[..end].parse().unwrap_or(0)
        }
        _ => 0,
    }
}

/// RFC 3339 timestamps, plain dates, or epoch milliseconds.
fn coerce_date(value: Option<&Value>) -> Option<DateTime<Utc>> {
    match value? {
        Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
            .map(|d| d.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
                    .ok()
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
                    .map(|d| Utc.from_utc_datetime(&d))
            }),
        Value::Number(n) => n.as_i64().and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    }
}

fn validate_rule(field: &str, v: Option<&Value>, rule: &ValidationRule) -> Result<(), String> {
    let v = match v {
        None | Some(Value::Null) if rule.required == Some(true) => return Err(format!("{} is required", field)),
        None | Some(Value::Null) => return Ok(()),
        Some(v) => v,
    };
    if let Some(format) = &rule.format {
        validate_format(field, v, format)?;
    }
    if let (Some(max), Some(s)) = (rule.max_length, v.as_str()) {
        if s.chars().count() > max as usize {
            return Err(format!("{} must be at most {} characters", field, max));
        }
    }
    if let (Some(min), Some(s)) = (rule.min_length, v.as_str()) {
        if s.chars().count() < min as usize {
            return Err(format!("{} must be at least {} characters", field, min));
        }
    }
    if let Some(ref pattern) = rule.pattern {
        let re = Regex::new(pattern).map_err(|_| format!("invalid pattern for {}", field))?;
        if let Some(s) = v.as_str() {
            if !re.is_match(s) {
                return Err(format!("{} does not match required pattern", field));
            }
        }
    }
    if let Some(ref allowed) = rule.allowed {
        if !allowed.iter().any(|a| value_eq(v, a)) {
            return Err(format!(
                "{} must be one of: {:?}",
                field,
                allowed.iter().take(5).collect::<Vec<_>>()
            ));
        }
    }
    if let (Some(min), Some(n)) = (rule.minimum, v.as_f64()) {
        if n < min {
            return Err(format!("{} must be at least {}", field, min));
        }
    }
    if let (Some(max), Some(n)) = (rule.maximum, v.as_f64()) {
        if n > max {
            return Err(format!("{} must be at most {}", field, max));
        }
    }
    Ok(())
}

fn value_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(n), Value::Number(m)) => n.as_f64() == m.as_f64(),
        _ => a == b,
    }
}

fn validate_format(field: &str, v: &Value, format: &str) -> Result<(), String> {
    let Some(s) = v.as_str() else {
        return Ok(());
    };
    match format.to_lowercase().as_str() {
        "email" if !is_email(s) => Err(format!("{} must be a valid email", field)),
        "uuid" if uuid::Uuid::parse_str(s).is_err() => Err(format!("{} must be a valid UUID", field)),
        "date-time" if DateTime::parse_from_rfc3339(s).is_err() => Err(format!("{} must be an RFC 3339 timestamp", field)),
        _ => Ok(()),
    }
}
