//! Route table: entries keyed by (method, path), bound into a transport at startup.

use crate::response::ResponseEnvelope;
use crate::transport::{Access, ApiRequest, Handler, Transport};
use axum::http::Method;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

#[derive(Clone)]
pub struct RouteEntry {
    pub method: Method,
    pub path: String,
    pub handler: Handler,
    pub requires_auth: bool,
    pub requires_admin: bool,
    pub version: Option<String>,
}

impl RouteEntry {
    pub fn new(method: Method, path: impl Into<String>, handler: Handler) -> Self {
        RouteEntry {
            method,
            path: path.into(),
            handler,
            requires_auth: false,
            requires_admin: false,
            version: None,
        }
    }

    pub fn requires_auth(mut self, yes: bool) -> Self {
        self.requires_auth = yes;
        self
    }

    pub fn requires_admin(mut self, yes: bool) -> Self {
        self.requires_admin = yes;
        self
    }

    pub fn version(mut self, version: Option<String>) -> Self {
        self.version = version.filter(|v| !v.trim_matches('/').is_empty());
        self
    }

    /// Wraps the handler so that whatever holds the binding also keeps `owner` alive.
    pub fn owned_by<T: Send + Sync + 'static>(mut self, owner: Arc<T>) -> Self {
        let inner = self.handler;
        self.handler = Arc::new(move |req: ApiRequest, res: ResponseEnvelope| {
            let _owner = &owner;
            inner(req, res)
        });
        self
    }

    pub fn access(&self) -> Access {
        Access {
            requires_auth: self.requires_auth,
            requires_admin: self.requires_admin,
        }
    }
}

impl fmt::Debug for RouteEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteEntry")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("requires_auth", &self.requires_auth)
            .field("requires_admin", &self.requires_admin)
            .field("version", &self.version)
            .finish()
    }
}

/// Adapts binding for one kind of entry. Returns true when it handled the entry.
pub trait RouteParser: Send + Sync {
    fn bind(&self, entry: &RouteEntry, transport: &mut dyn Transport) -> bool;
}

/// Binds entries that carry a version under `/<version><path>`.
#[derive(Clone, Copy, Debug, Default)]
pub struct VersionedRouteParser;

impl RouteParser for VersionedRouteParser {
    fn bind(&self, entry: &RouteEntry, transport: &mut dyn Transport) -> bool {
        let Some(version) = &entry.version else {
            return false;
        };
        let path = format!("/{}{}", version.trim_matches('/'), entry.path);
        if !transport.is_bound(&entry.method, &path) {
            transport.bind(entry.method.clone(), &path, entry.access(), entry.handler.clone());
        }
        true
    }
}

fn default_bind(entry: &RouteEntry, transport: &mut dyn Transport) {
    transport.bind(entry.method.clone(), &entry.path, entry.access(), entry.handler.clone());
}

/// Entries in insertion order, unique by (method, path).
#[derive(Default)]
pub struct RouteTable {
    entries: Vec<RouteEntry>,
    keys: HashSet<(Method, String)>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// First registration wins; a repeat is logged and dropped.
    pub fn add_route(&mut self, entry: RouteEntry) {
        let key = (entry.method.clone(), entry.path.clone());
        if self.keys.contains(&key) {
            tracing::warn!(method = %entry.method, path = %entry.path, "route already exists, skipping");
            return;
        }
        self.keys.insert(key);
        self.entries.push(entry);
    }

    pub fn get(&self, method: &Method, path: &str) -> Option<&RouteEntry> {
        self.entries.iter().find(|e| e.method == *method && e.path == path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RouteEntry> {
        self.entries.iter()
    }

    /// Binds each entry through the first parser that handles it, else the default bind.
    /// Paths the transport already serves are skipped. Returns how many entries were bound.
    pub fn init_routes(&self, transport: &mut dyn Transport, parsers: &[Arc<dyn RouteParser>]) -> usize {
        let mut bound = 0;
        for entry in &self.entries {
            if transport.is_bound(&entry.method, &entry.path) {
                tracing::warn!(method = %entry.method, path = %entry.path, "already bound, skipping");
                continue;
            }
            if !parsers.iter().any(|p| p.bind(entry, transport)) {
                default_bind(entry, transport);
            }
            tracing::info!(method = %entry.method, path = %entry.path, "route bound");
            bound += 1;
        }
        bound
    }
}

impl FromIterator<RouteEntry> for RouteTable {
    fn from_iter<I: IntoIterator<Item = RouteEntry>>(iter: I) -> Self {
        let mut table = RouteTable::new();
        for entry in iter {
            table.add_route(entry);
        }
        table
    }
}

impl fmt::Debug for RouteTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.entries.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::handler_fn;

    fn noop() -> Handler {
        handler_fn(|_, res| async move { res.send() })
    }

    /// Records bindings instead of serving them.
    #[derive(Default)]
    struct Recorder {
        bound: Vec<(Method, String, Access)>,
    }

    impl Transport for Recorder {
        fn is_bound(&self, method: &Method, path: &str) -> bool {
            self.bound.iter().any(|(m, p, _)| m == method && p == path)
        }

        fn bind(&mut self, method: Method, path: &str, access: Access, _handler: Handler) {
            self.bound.push((method, path.to_string(), access));
        }
    }

    #[test]
    fn add_route_keeps_the_first_handler() {
        let first = noop();
        let mut table = RouteTable::new();
        table.add_route(RouteEntry::new(Method::GET, "/items", first.clone()));
        table.add_route(RouteEntry::new(Method::GET, "/items", noop()));
        table.add_route(RouteEntry::new(Method::POST, "/items", noop()));
        assert_eq!(table.len(), 2);
        let kept = table.get(&Method::GET, "/items").unwrap();
        assert!(Arc::ptr_eq(&kept.handler, &first));
    }

    #[test]
    fn init_skips_paths_already_bound() {
        let mut table = RouteTable::new();
        table.add_route(RouteEntry::new(Method::GET, "/items", noop()));
        table.add_route(RouteEntry::new(Method::POST, "/items/order", noop()).requires_auth(true));
        let mut transport = Recorder::default();
        assert_eq!(table.init_routes(&mut transport, &[]), 2);
        assert_eq!(table.init_routes(&mut transport, &[]), 0);
        assert_eq!(transport.bound.len(), 2);
        assert!(transport.bound[1].2.requires_auth);
    }

    #[test]
    fn owned_entries_keep_their_owner_alive() {
        let owner = Arc::new(());
        let entry = RouteEntry::new(Method::GET, "/items", noop()).owned_by(owner.clone());
        assert_eq!(Arc::strong_count(&owner), 2);
        drop(entry);
        assert_eq!(Arc::strong_count(&owner), 1);
    }

    #[test]
    fn versioned_entries_are_prefixed() {
        let mut table = RouteTable::new();
        table.add_route(RouteEntry::new(Method::GET, "/items", noop()).version(Some("v2".into())));
        table.add_route(RouteEntry::new(Method::GET, "/plain", noop()).version(Some("/".into())));
        let mut transport = Recorder::default();
        let parsers: Vec<Arc<dyn RouteParser>> = vec![Arc::new(VersionedRouteParser)];
        table.init_routes(&mut transport, &parsers);
        let paths: Vec<_> = transport.bound.iter().map(|(_, p, _)| p.as_str()).collect();
        assert_eq!(paths, vec!["/v2/items", "/plain"]);
    }
}
