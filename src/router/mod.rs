//! Route table: normalized route keys and single-variable backtracking lookup.
//!
//! A route pattern may contain at most one variable segment, written `:name`.
//! Registration replaces that segment with the placeholder `:param`, so every
//! route is stored under a [`RouteKey`] such as `GET /users/:param/posts`.
//!
//! | Pattern             | Stored key               | Variable      |
//! |---------------------|--------------------------|---------------|
//! | `/users`            | `GET /users`             | *(none)*      |
//! | `/users/:id`        | `GET /users/:param`      | `id`, seg 2   |
//! | `/a/:id/c`          | `GET /a/:param/c`        | `id`, seg 2   |
//!
//! Lookup tries the literal key first, so literal routes always beat variable
//! ones. On a miss it walks the request's segments from the rightmost to the
//! leftmost, each time replacing exactly that one segment with the placeholder,
//! and the first candidate present in the table wins.
//!
//! Trailing slashes are dropped on both patterns and request paths, so `/users/`
//! and `/users` are the same route.

mod handler;

use std::collections::{HashMap, HashSet};
use std::fmt;

use thiserror::Error;

use crate::context::PathVar;
use crate::http::Method;

pub use handler::{
    Controller, Fault, Handler, HandlerBinding, HandlerFuture, HandlerResult, IntoHandler, boxed,
};

/// Segment a variable is normalized to.
pub const PLACEHOLDER: &str = ":param";

/// Routing configuration errors. All of them are detected before the server
/// accepts traffic and must stop startup.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown HTTP method: {0}")]
    UnknownMethod(String),

    #[error("route {path} declares more than one variable segment")]
    MultipleVariables { path: String },

    #[error("route {path} has a variable segment without a name")]
    EmptyVariableName { path: String },

    #[error("route {key} is already registered")]
    DuplicateRoute { key: String },

    #[error("controller {controller} has no action {action}")]
    MissingHandler { controller: String, action: String },

    #[error("malformed route key {0:?}, expected \"METHOD /path\"")]
    MalformedRouteKey(String),

    #[error("reserved error route for {status} ({path}) is not registered")]
    MissingErrorRoute { status: u16, path: String },
}

/// `(method, normalized path)` identifying one registration.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RouteKey {
    method: Method,
    path: String,
}

impl RouteKey {
    fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

/// The variable a route declares and the segment it sits in. Segment indices
/// count the empty segment before the leading slash, so in `/a/:id` the variable
/// is segment 2.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteVar {
    pub name: String,
    pub segment: usize,
}

/// One registered route. Immutable once in the table.
#[derive(Debug, Clone)]
pub struct RouteEntry {
    key: RouteKey,
    var: Option<RouteVar>,
    binding: HandlerBinding,
}

impl RouteEntry {
    fn build(method: &str, raw_path: &str, binding: HandlerBinding) -> Result<Self, ConfigError> {
        let (key, var) = normalize(method, raw_path)?;
        Ok(Self { key, var, binding })
    }

    pub fn key(&self) -> &RouteKey {
        &self.key
    }

    pub fn var(&self) -> Option<&RouteVar> {
        self.var.as_ref()
    }

    pub fn binding(&self) -> &HandlerBinding {
        &self.binding
    }
}

/// A successful lookup: the entry plus the value bound to its variable.
#[derive(Debug, Clone)]
pub struct RouteMatch<'a> {
    pub entry: &'a RouteEntry,
    pub var: Option<PathVar>,
}

/// Registered routes, keyed by normalized [`RouteKey`].
///
/// Built once at startup, then shared read-only between connection tasks.
///
/// # Examples
///
/// ```
/// use waypost::context::Context;
/// use waypost::http::Method;
/// use waypost::router::{HandlerBinding, HandlerResult, RouteTable};
///
/// async fn show(ctx: Context) -> HandlerResult {
///     ctx.done()
/// }
///
/// let mut table = RouteTable::new();
/// table.register("GET", "/a/:id/c", HandlerBinding::new("Items", "show", show)).unwrap();
///
/// let hit = table.lookup(&Method::Get, "/a/123/c").unwrap();
/// assert_eq!(hit.var.unwrap().value, "123");
/// assert!(table.lookup(&Method::Get, "/a/123/d").is_none());
/// ```
#[derive(Debug, Default)]
pub struct RouteTable {
    entries: HashMap<RouteKey, RouteEntry>,
    ignored: HashSet<String>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `binding` under `method raw_path`.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::UnknownMethod`]: `method` is not a standard verb.
    /// - [`ConfigError::MultipleVariables`]: more than one `:name` segment.
    /// - [`ConfigError::EmptyVariableName`]: a bare `:` segment.
    /// - [`ConfigError::DuplicateRoute`]: the normalized key is taken.
    pub fn register(
        &mut self,
        method: &str,
        raw_path: &str,
        binding: HandlerBinding,
    ) -> Result<&RouteEntry, ConfigError> {
        let entry = RouteEntry::build(method, raw_path, binding)?;
        if self.entries.contains_key(&entry.key) {
            return Err(ConfigError::DuplicateRoute {
                key: entry.key.to_string(),
            });
        }
        let key = entry.key.clone();
        Ok(self.entries.entry(key).or_insert(entry))
    }

    /// Registers `controller.action` under a `"METHOD /path"` key.
    ///
    /// # Errors
    ///
    /// Everything [`register`](Self::register) returns, plus
    /// [`ConfigError::MalformedRouteKey`] and [`ConfigError::MissingHandler`].
    pub fn register_path(
        &mut self,
        route: &str,
        controller: &Controller,
        action: &str,
    ) -> Result<&RouteEntry, ConfigError> {
        let (method, path) = route
            .split_once(' ')
            .ok_or_else(|| ConfigError::MalformedRouteKey(route.to_owned()))?;
        let handler = controller
            .get(action)
            .ok_or_else(|| ConfigError::MissingHandler {
                controller: controller.name().to_owned(),
                action: action.to_owned(),
            })?;
        let binding = HandlerBinding::from_handler(controller.name(), action, handler.clone());
        self.register(method, path.trim(), binding)
    }

    /// Registers a bare handler for `GET path`.
    pub fn get(&mut self, path: &str, handler: impl IntoHandler) -> Result<&RouteEntry, ConfigError> {
        self.register_inline("GET", path, handler)
    }

    /// Registers a bare handler for `POST path`.
    pub fn post(&mut self, path: &str, handler: impl IntoHandler) -> Result<&RouteEntry, ConfigError> {
        self.register_inline("POST", path, handler)
    }

    /// Registers a bare handler for `PUT path`.
    pub fn put(&mut self, path: &str, handler: impl IntoHandler) -> Result<&RouteEntry, ConfigError> {
        self.register_inline("PUT", path, handler)
    }

    /// Registers a bare handler for `DELETE path`.
    pub fn delete(&mut self, path: &str, handler: impl IntoHandler) -> Result<&RouteEntry, ConfigError> {
        self.register_inline("DELETE", path, handler)
    }

    fn register_inline(
        &mut self,
        method: &str,
        path: &str,
        handler: impl IntoHandler,
    ) -> Result<&RouteEntry, ConfigError> {
        let binding = HandlerBinding::new("inline", format!("{method} {path}"), handler);
        self.register(method, path, binding)
    }

    /// Resolves `method path`: literal key first, then one placeholder segment at
    /// a time from the right.
    pub fn lookup(&self, method: &Method, path: &str) -> Option<RouteMatch<'_>> {
        let path = trim_trailing_slash(path);

        if let Some(entry) = self.entries.get(&RouteKey::new(method.clone(), path)) {
            return Some(RouteMatch {
                entry,
                var: bind_var(entry, path),
            });
        }

        let segments: Vec<&str> = path.split('/').collect();
        for idx in (1..segments.len()).rev() {
            let mut candidate = segments.clone();
            candidate[idx] = PLACEHOLDER;
            let key = RouteKey::new(method.clone(), candidate.join("/"));
            if let Some(entry) = self.entries.get(&key) {
                return Some(RouteMatch {
                    entry,
                    var: bind_var(entry, path),
                });
            }
        }

        None
    }

    /// `true` when `method raw_path` normalizes to a registered key.
    pub fn contains(&self, method: &str, raw_path: &str) -> bool {
        normalize(method, raw_path)
            .map(|(key, _)| self.entries.contains_key(&key))
            .unwrap_or(false)
    }

    /// Paths answered with an empty `200` without being routed.
    pub fn ignore(&mut self, path: impl Into<String>) {
        self.ignored.insert(path.into());
    }

    pub fn unignore(&mut self, path: &str) -> bool {
        self.ignored.remove(path)
    }

    pub fn is_ignored(&self, path: &str) -> bool {
        self.ignored.contains(path)
    }

    /// Entries sorted by key, for listing the table at startup.
    pub fn entries(&self) -> Vec<&RouteEntry> {
        let mut entries: Vec<&RouteEntry> = self.entries.values().collect();
        entries.sort_by_key(|e| e.key.to_string());
        entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Validates `method raw_path` and replaces its variable segment, if any, with
/// [`PLACEHOLDER`].
fn normalize(method: &str, raw_path: &str) -> Result<(RouteKey, Option<RouteVar>), ConfigError> {
    let method = match method.parse::<Method>() {
        Ok(m) if m.is_standard() => m,
        Ok(m) => return Err(ConfigError::UnknownMethod(m.as_str().to_owned())),
        Err(never) => match never {},
    };

    let path = trim_trailing_slash(raw_path);
    let mut segments: Vec<&str> = path.split('/').collect();

    let mut var = None;
    for (idx, segment) in segments.iter().enumerate() {
        let Some(name) = segment.strip_prefix(':') else {
            continue;
        };
        if var.is_some() {
            return Err(ConfigError::MultipleVariables {
                path: raw_path.to_owned(),
            });
        }
        if name.is_empty() {
            return Err(ConfigError::EmptyVariableName {
                path: raw_path.to_owned(),
            });
        }
        var = Some(RouteVar {
            name: name.to_owned(),
            segment: idx,
        });
    }

    if let Some(var) = &var {
        segments[var.segment] = PLACEHOLDER;
    }

    Ok((RouteKey::new(method, segments.join("/")), var))
}

fn trim_trailing_slash(path: &str) -> &str {
    if path.len() > 1 && path.ends_with('/') {
        &path[..path.len() - 1]
    } else {
        path
    }
}

// Reads the value at the entry's variable segment out of the request path.
fn bind_var(entry: &RouteEntry, path: &str) -> Option<PathVar> {
    let var = entry.var.as_ref()?;
    let value = path.split('/').nth(var.segment)?;
    Some(PathVar {
        name: var.name.clone(),
        value: value.to_owned(),
    })
}
