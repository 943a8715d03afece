//! Model description as plain value objects, merged with [`compose`].

mod record;

pub use record::Record;

use crate::config::ValidationRule;
use crate::hooks::Operation;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

pub const OWNER_FIELD: &str = "_owner";
pub const CREATE_TIME_FIELD: &str = "create_time";
pub const UPDATE_TIME_FIELD: &str = "update_time";

/// Declared fields with their default values.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FieldSet(BTreeMap<String, Value>);

impl FieldSet {
    /// Fields every model carries.
    pub fn base() -> Self {
        let mut set = FieldSet::default();
        set.insert("_location", json!(0));
        set.insert(OWNER_FIELD, Value::Null);
        set.insert(CREATE_TIME_FIELD, Value::Null);
        set.insert(UPDATE_TIME_FIELD, Value::Null);
        set.insert("_additional_fields", json!({}));
        set.insert("_ip_address", Value::Null);
        set
    }

    pub fn insert(&mut self, name: impl Into<String>, default: Value) {
        self.0.insert(name.into(), default);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn defaults(&self) -> Map<String, Value> {
        self.0.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    pub fn compose(&self, overrides: &FieldSet) -> FieldSet {
        let mut merged = self.clone();
        merged.0.extend(overrides.0.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged
    }
}

impl FromIterator<(String, Value)> for FieldSet {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        FieldSet(iter.into_iter().collect())
    }
}

/// Named validations shipped with the framework.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Builtin {
    CheckPassword,
    CheckEmail,
    CheckUsername,
    NotEmpty,
    NotNull,
    IsInteger,
    IsDate,
}

impl Builtin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Builtin::CheckPassword => "checkPassword",
            Builtin::CheckEmail => "checkEmail",
            Builtin::CheckUsername => "checkUsername",
            Builtin::NotEmpty => "notEmpty",
            Builtin::NotNull => "notNull",
            Builtin::IsInteger => "isInteger",
            Builtin::IsDate => "isDate",
        }
    }
}

impl FromStr for Builtin {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "checkPassword" => Builtin::CheckPassword,
            "checkEmail" => Builtin::CheckEmail,
            "checkUsername" => Builtin::CheckUsername,
            "notEmpty" => Builtin::NotEmpty,
            "notNull" => Builtin::NotNull,
            "isInteger" => Builtin::IsInteger,
            "isDate" => Builtin::IsDate,
            other => return Err(other.to_string()),
        })
    }
}

/// Custom validator: receives the field name and all request params, returns the
/// (possibly coerced) value or a message.
pub type ValidatorFn = Arc<dyn Fn(&str, &Map<String, Value>) -> Result<Value, String> + Send + Sync>;

#[derive(Clone)]
pub enum FieldCheck {
    Builtin(Builtin),
    Rule(ValidationRule),
    Custom(ValidatorFn),
}

impl FieldCheck {
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&str, &Map<String, Value>) -> Result<Value, String> + Send + Sync + 'static,
    {
        FieldCheck::Custom(Arc::new(f))
    }

    fn describe(&self) -> Value {
        match self {
            FieldCheck::Builtin(b) => json!(b.as_str()),
            FieldCheck::Rule(rule) => serde_json::to_value(rule).unwrap_or(Value::Null),
            FieldCheck::Custom(_) => json!("custom"),
        }
    }
}

impl fmt::Debug for FieldCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldCheck::Builtin(b) => f.debug_tuple("Builtin").field(b).finish(),
            FieldCheck::Rule(r) => f.debug_tuple("Rule").field(r).finish(),
            FieldCheck::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Per-field checks plus the fields each verb skips.
#[derive(Clone, Debug, Default)]
pub struct ValidationSet {
    checks: BTreeMap<String, FieldCheck>,
    exceptions: BTreeMap<Operation, BTreeSet<String>>,
}

impl ValidationSet {
    pub fn insert(&mut self, field: impl Into<String>, check: FieldCheck) {
        self.checks.insert(field.into(), check);
    }

    pub fn except(&mut self, operation: Operation, field: impl Into<String>) {
        self.exceptions.entry(operation).or_default().insert(field.into());
    }

    /// Checks that apply to `operation`, in field order.
    pub fn applicable(&self, operation: Operation) -> impl Iterator<Item = (&str, &FieldCheck)> {
        let skipped = self.exceptions.get(&operation);
        self.checks
            .iter()
            .filter(move |(field, _)| !skipped.map_or(false, |s| s.contains(*field)))
            .map(|(field, check)| (field.as_str(), check))
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    pub fn compose(&self, overrides: &ValidationSet) -> ValidationSet {
        let mut merged = self.clone();
        merged
            .checks
            .extend(overrides.checks.iter().map(|(k, v)| (k.clone(), v.clone())));
        for (op, fields) in &overrides.exceptions {
            merged.exceptions.entry(*op).or_default().extend(fields.iter().cloned());
        }
        merged
    }
}

/// Fields a non-admin request may not write.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NonEditableSet(BTreeSet<String>);

impl NonEditableSet {
    pub fn base() -> Self {
        [CREATE_TIME_FIELD.to_string()].into_iter().collect()
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains(field)
    }

    /// Removes every non-editable key from `params`.
    pub fn strip(&self, params: &mut Map<String, Value>) {
        params.retain(|k, _| !self.0.contains(k));
    }

    pub fn compose(&self, overrides: &NonEditableSet) -> NonEditableSet {
        NonEditableSet(self.0.union(&overrides.0).cloned().collect())
    }
}

impl FromIterator<String> for NonEditableSet {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        NonEditableSet(iter.into_iter().collect())
    }
}

#[derive(Clone, Debug)]
pub struct Model {
    pub name: String,
    pub collection: String,
    pub fields: FieldSet,
    pub validations: ValidationSet,
    pub non_editable: NonEditableSet,
    pub exclude: BTreeSet<String>,
    pub admin_only: BTreeSet<String>,
    pub requires_owner: BTreeSet<Operation>,
}

impl Model {
    /// The root every model composes onto.
    pub fn base() -> Self {
        Model {
            name: "base".into(),
            collection: "base".into(),
            fields: FieldSet::base(),
            validations: ValidationSet::default(),
            non_editable: NonEditableSet::base(),
            exclude: ["_additional_fields", "_ip_address"].into_iter().map(String::from).collect(),
            admin_only: BTreeSet::new(),
            requires_owner: BTreeSet::new(),
        }
    }

    /// Empty layer to be composed onto a base.
    pub fn layer(name: impl Into<String>) -> Self {
        let name = name.into();
        Model {
            collection: name.clone(),
            name,
            fields: FieldSet::default(),
            validations: ValidationSet::default(),
            non_editable: NonEditableSet::default(),
            exclude: BTreeSet::new(),
            admin_only: BTreeSet::new(),
            requires_owner: BTreeSet::new(),
        }
    }

    pub fn field(mut self, name: impl Into<String>, default: Value) -> Self {
        self.fields.insert(name, default);
        self
    }

    pub fn validate(mut self, field: impl Into<String>, check: FieldCheck) -> Self {
        self.validations.insert(field, check);
        self
    }

    pub fn owner_required(mut self, operation: Operation) -> Self {
        self.requires_owner.insert(operation);
        self
    }

    pub fn requires_owner(&self, operation: Operation) -> bool {
        self.requires_owner.contains(&operation)
    }

    pub fn is_known_field(&self, name: &str) -> bool {
        name == crate::store::ID_FIELD || self.fields.contains(name)
    }

    /// Introspection payload for `GET <route>/model`.
    pub fn describe(&self) -> Value {
        let validations: Map<String, Value> = self
            .validations
            .checks
            .iter()
            .map(|(field, check)| (field.clone(), check.describe()))
            .collect();
        json!({
            "name": self.name,
            "collection": self.collection,
            "fields": self.fields.defaults(),
            "validations": validations,
            "non_editable": self.non_editable.0,
            "exclude": self.exclude,
            "admin_only": self.admin_only,
            "requires_owner": self.requires_owner,
        })
    }
}

/// Merges `overrides` onto `base`: scalar identity comes from the override, sets are unioned,
/// maps are merged with the override winning per key.
pub fn compose(base: &Model, overrides: &Model) -> Model {
    Model {
        name: overrides.name.clone(),
        collection: overrides.collection.clone(),
        fields: base.fields.compose(&overrides.fields),
        validations: base.validations.compose(&overrides.validations),
        non_editable: base.non_editable.compose(&overrides.non_editable),
        exclude: base.exclude.union(&overrides.exclude).cloned().collect(),
        admin_only: base.admin_only.union(&overrides.admin_only).cloned().collect(),
        requires_owner: base.requires_owner.union(&overrides.requires_owner).copied().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn compose_merges_layers() {
        let page = Model::layer("pages")
            .field("title", json!(""))
            .field("_location", json!(100))
            .validate("title", FieldCheck::Builtin(Builtin::NotEmpty))
            .owner_required(Operation::Update);
        let merged = compose(&Model::base(), &page);

        assert_eq!(merged.name, "pages");
        assert!(merged.fields.contains("title"));
        assert!(merged.fields.contains(OWNER_FIELD));
        assert_eq!(merged.fields.defaults()["_location"], json!(100));
        assert!(merged.non_editable.contains(CREATE_TIME_FIELD));
        assert!(merged.exclude.contains("_ip_address"));
        assert!(merged.requires_owner(Operation::Update));
        assert!(!merged.requires_owner(Operation::Create));
    }

    #[test]
    fn exceptions_hide_checks_per_verb() {
        let mut set = ValidationSet::default();
        set.insert("email", FieldCheck::Builtin(Builtin::CheckEmail));
        set.insert("password", FieldCheck::Builtin(Builtin::CheckPassword));
        set.except(Operation::Update, "password");

        let on_create: Vec<_> = set.applicable(Operation::Create).map(|(f, _)| f).collect();
        let on_update: Vec<_> = set.applicable(Operation::Update).map(|(f, _)| f).collect();
        assert_eq!(on_create, vec!["email", "password"]);
        assert_eq!(on_update, vec!["email"]);
    }

    #[test]
    fn builtin_names_round_trip() {
        for b in [Builtin::CheckPassword, Builtin::IsDate, Builtin::NotNull] {
            assert_eq!(b.as_str().parse::<Builtin>(), Ok(b));
        }
        assert!("isCreditCard".parse::<Builtin>().is_err());
    }

    #[test]
    fn strip_removes_non_editable_keys() {
        let mut params = Map::new();
        params.insert("create_time".into(), json!("2020-01-01T00:00:00Z"));
        params.insert("title".into(), json!("x"));
        NonEditableSet::base().strip(&mut params);
        assert_eq!(params.keys().collect::<Vec<_>>(), vec!["title"]);
    }
}
