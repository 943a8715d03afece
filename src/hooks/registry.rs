//! Ordered interceptor buckets keyed by (operation, phase).

use super::Interceptor;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

/// The CRUD operations that expose hook phases.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    #[serde(alias = "get")]
    List,
    #[serde(alias = "post")]
    Create,
    #[serde(alias = "put")]
    Update,
    #[serde(alias = "del")]
    Delete,
    Sum,
    Total,
}

impl Operation {
    pub const ALL: [Operation; 6] = [
        Operation::List,
        Operation::Create,
        Operation::Update,
        Operation::Delete,
        Operation::Sum,
        Operation::Total,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::List => "list",
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
            Operation::Sum => "sum",
            Operation::Total => "total",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Position relative to the data store call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Before,
    After,
}

type Bucket = Vec<Arc<dyn Interceptor>>;

/// Interceptors per (operation, phase), in execution-candidate order.
///
/// Registration takes `&self` so hooks can be added after the owning resource has been
/// shared with route handlers.
#[derive(Default)]
pub struct HookRegistry {
    buckets: RwLock<HashMap<(Operation, Phase), Bucket>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends the interceptor, or inserts it at `priority` shifting later entries right.
    /// A priority past the end appends. The same interceptor may be registered twice.
    pub fn register(
        &self,
        operation: Operation,
        phase: Phase,
        interceptor: Arc<dyn Interceptor>,
        priority: Option<usize>,
    ) {
        let mut buckets = self.buckets.write().unwrap_or_else(PoisonError::into_inner);
        let bucket = buckets.entry((operation, phase)).or_default();
        let index = priority.map_or(bucket.len(), |p| p.min(bucket.len()));
        bucket.insert(index, interceptor);
    }

    pub fn before(&self, operation: Operation, interceptor: Arc<dyn Interceptor>) {
        self.register(operation, Phase::Before, interceptor, None);
    }

    pub fn after(&self, operation: Operation, interceptor: Arc<dyn Interceptor>) {
        self.register(operation, Phase::After, interceptor, None);
    }

    /// Snapshot of the bucket; later registrations do not affect it.
    pub fn list(&self, operation: Operation, phase: Phase) -> Vec<Arc<dyn Interceptor>> {
        let buckets = self.buckets.read().unwrap_or_else(PoisonError::into_inner);
        buckets.get(&(operation, phase)).cloned().unwrap_or_default()
    }

    pub fn len(&self, operation: Operation, phase: Phase) -> usize {
        let buckets = self.buckets.read().unwrap_or_else(PoisonError::into_inner);
        buckets.get(&(operation, phase)).map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        let buckets = self.buckets.read().unwrap_or_else(PoisonError::into_inner);
        buckets.values().all(Vec::is_empty)
    }
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let buckets = self.buckets.read().unwrap_or_else(PoisonError::into_inner);
        let counts: HashMap<_, _> = buckets.iter().map(|(k, v)| (*k, v.len())).collect();
        f.debug_struct("HookRegistry").field("buckets", &counts).finish()
    }
}

/// Process-wide registries keyed by resource type. Every resource of a type shares one.
#[derive(Clone, Default, Debug)]
pub struct DefaultHooks {
    by_kind: Arc<RwLock<HashMap<String, Arc<HookRegistry>>>>,
}

impl DefaultHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry for `kind`, created empty on first use.
    pub fn registry(&self, kind: &str) -> Arc<HookRegistry> {
        if let Some(found) = self
            .by_kind
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(kind)
        {
            return found.clone();
        }
        let mut by_kind = self.by_kind.write().unwrap_or_else(PoisonError::into_inner);
        by_kind.entry(kind.to_string()).or_default().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::{interceptor, HookContext, HookResult};

    fn tagged(tag: &'static str) -> Arc<dyn Interceptor> {
        interceptor(move |_ctx: HookContext| async move {
            let mut delta = serde_json::Map::new();
            delta.insert("tag".into(), serde_json::json!(tag));
            HookResult::Ok(Some(delta))
        })
    }

    fn order_of(registry: &HookRegistry, probe: &[(&'static str, &Arc<dyn Interceptor>)]) -> Vec<&'static str> {
        registry
            .list(Operation::List, Phase::Before)
            .iter()
            .map(|i| {
                probe
                    .iter()
                    .find(|(_, p)| Arc::ptr_eq(p, i))
                    .map(|(name, _)| *name)
                    .unwrap_or("?")
            })
            .collect()
    }

    #[test]
    fn unprioritized_registrations_keep_fifo_order() {
        let reg = HookRegistry::new();
        let (a, b, c) = (tagged("a"), tagged("b"), tagged("c"));
        for h in [&a, &b, &c] {
            reg.register(Operation::List, Phase::Before, h.clone(), None);
        }
        assert_eq!(order_of(&reg, &[("a", &a), ("b", &b), ("c", &c)]), vec!["a", "b", "c"]);
    }

    #[test]
    fn priority_insert_shifts_later_entries() {
        let reg = HookRegistry::new();
        let (a, b, c, x) = (tagged("a"), tagged("b"), tagged("c"), tagged("x"));
        for h in [&a, &b, &c] {
            reg.register(Operation::List, Phase::Before, h.clone(), None);
        }
        reg.register(Operation::List, Phase::Before, x.clone(), Some(1));
        let probe = [("a", &a), ("b", &b), ("c", &c), ("x", &x)];
        assert_eq!(order_of(&reg, &probe), vec!["a", "x", "b", "c"]);

        let y = tagged("y");
        reg.register(Operation::List, Phase::Before, y.clone(), Some(0));
        reg.register(Operation::List, Phase::Before, y.clone(), Some(99));
        let probe = [("a", &a), ("b", &b), ("c", &c), ("x", &x), ("y", &y)];
        assert_eq!(order_of(&reg, &probe), vec!["y", "a", "x", "b", "c", "y"]);
    }

    #[test]
    fn unknown_bucket_is_empty_not_an_error() {
        let reg = HookRegistry::new();
        assert_eq!(reg.len(Operation::Sum, Phase::After), 0);
        assert!(reg.list(Operation::Sum, Phase::After).is_empty());
        assert!(reg.is_empty());
    }

    #[test]
    fn default_hooks_share_registry_per_kind() {
        let defaults = DefaultHooks::new();
        let first = defaults.registry("posts");
        let second = defaults.registry("posts");
        assert!(Arc::ptr_eq(&first, &second));
        assert!(!Arc::ptr_eq(&first, &defaults.registry("users")));
    }

    #[test]
    fn operation_accepts_http_verb_aliases() {
        let ops: Vec<Operation> = serde_json::from_str(r#"["get", "post", "put", "delete", "del", "sum", "total"]"#).unwrap();
        assert_eq!(
            ops,
            vec![
                Operation::List,
                Operation::Create,
                Operation::Update,
                Operation::Delete,
                Operation::Delete,
                Operation::Sum,
                Operation::Total
            ]
        );
    }
}
