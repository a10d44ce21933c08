//! # Context Store
//!
//! A stack of key/value layers. The base layer holds the run-wide defaults
//! (configuration variables, selected target); every scoped override pushes
//! a layer that shadows outer keys until it is popped again. Lookups resolve
//! through the topmost layer containing the key.
//!
//! Scopes must close in LIFO order. Closing anything other than the innermost
//! open scope is rejected without touching the stack.

use crate::models::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContextError {
    #[error("Required setting '{0}' is missing.")]
    MissingKey(String),
    #[error("Scope #{closing} closed while scope #{innermost} is still open.")]
    MisnestedScope { closing: u64, innermost: u64 },
    #[error("Scope #{0} is not open.")]
    ScopeNotOpen(u64),
}

/// Keys the engine itself understands. Anything else is a free-form
/// template/deployment variable.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Key {
    Host,
    Role,
    Target,
    Cwd,
    Prefix,
    WarnOnly,
    Var(String),
}

impl Key {
    pub fn var(name: impl Into<String>) -> Self {
        Key::from(name.into().as_str())
    }

    pub fn name(&self) -> &str {
        match self {
            Key::Host => "host",
            Key::Role => "role",
            Key::Target => "target",
            Key::Cwd => "cwd",
            Key::Prefix => "prefix",
            Key::WarnOnly => "warn_only",
            Key::Var(name) => name,
        }
    }
}

impl From<&str> for Key {
    fn from(name: &str) -> Self {
        match name {
            "host" => Key::Host,
            "role" => Key::Role,
            "target" => Key::Target,
            "cwd" => Key::Cwd,
            "prefix" => Key::Prefix,
            "warn_only" => Key::WarnOnly,
            other => Key::Var(other.to_string()),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A set of overrides to push as one scope.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Layer {
    values: BTreeMap<Key, Value>,
}

impl Layer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<Key>, value: impl Into<Value>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn set(&mut self, key: impl Into<Key>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn extend_vars<'a>(&mut self, vars: impl IntoIterator<Item = (&'a String, &'a Value)>) {
        for (name, value) in vars {
            self.values.insert(Key::var(name.as_str()), value.clone());
        }
    }

    pub fn get(&self, key: &Key) -> Option<&Value> {
        self.values.get(key)
    }
}

/// Handle to an open scope, returned by `push` and consumed by `pop`.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "an open scope must be closed with ContextStore::pop"]
pub struct ScopeId(u64);

#[derive(Debug, Clone)]
struct Frame {
    id: u64,
    layer: Layer,
}

#[derive(Debug, Clone, Default)]
struct Stack {
    base: Layer,
    frames: Vec<Frame>,
    next_id: u64,
}

/// Process-wide context for one run (or one worker, see `fork`).
///
/// Clones share the same stack. All mutation goes through `push`/`pop`.
#[derive(Debug, Clone, Default)]
pub struct ContextStore {
    stack: Arc<Mutex<Stack>>,
}

impl ContextStore {
    pub fn new(base: Layer) -> Self {
        Self {
            stack: Arc::new(Mutex::new(Stack {
                base,
                frames: Vec::new(),
                next_id: 1,
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Stack> {
        self.stack.lock().expect("Mutex should not be poisoned")
    }

    /// An independent copy of the current view, for a worker that must not
    /// observe another worker's scopes.
    pub fn fork(&self) -> Self {
        let snapshot = self.lock().clone();
        Self {
            stack: Arc::new(Mutex::new(snapshot)),
        }
    }

    pub fn push(&self, overrides: Layer) -> ScopeId {
        let mut stack = self.lock();
        let id = stack.next_id;
        stack.next_id += 1;
        log::trace!("Context scope #{} opened (depth {})", id, stack.frames.len() + 1);
        stack.frames.push(Frame {
            id,
            layer: overrides,
        });
        ScopeId(id)
    }

    pub fn pop(&self, scope: ScopeId) -> Result<(), ContextError> {
        let mut stack = self.lock();
        let innermost = stack.frames.last().map(|f| f.id);
        match innermost {
            Some(top) if top == scope.0 => {
                stack.frames.pop();
                log::trace!("Context scope #{} closed", scope.0);
                Ok(())
            }
            Some(top) if stack.frames.iter().any(|f| f.id == scope.0) => {
                Err(ContextError::MisnestedScope {
                    closing: scope.0,
                    innermost: top,
                })
            }
            _ => Err(ContextError::ScopeNotOpen(scope.0)),
        }
    }

    /// Runs `f` with `overrides` pushed, restoring the previous view on exit,
    /// including when `f` panics.
    pub fn with_scope<T>(&self, overrides: Layer, f: impl FnOnce() -> T) -> Result<T, ContextError> {
        let id = self.push(overrides);
        let guard = scopeguard::guard(id, |id| {
            if let Err(e) = self.pop(id) {
                log::error!("Failed to restore context while unwinding: {}", e);
            }
        });
        let out = f();
        let id = scopeguard::ScopeGuard::into_inner(guard);
        self.pop(id)?;
        Ok(out)
    }

    pub fn get(&self, key: &Key) -> Option<Value> {
        let stack = self.lock();
        stack
            .frames
            .iter()
            .rev()
            .find_map(|f| f.layer.get(key))
            .or_else(|| stack.base.get(key))
            .cloned()
    }

    pub fn require(&self, key: &Key) -> Result<Value, ContextError> {
        self.get(key)
            .ok_or_else(|| ContextError::MissingKey(key.name().to_string()))
    }

    pub fn get_str(&self, key: &Key) -> Option<String> {
        self.get(key).map(|v| match v {
            Value::String(s) => s,
            other => other.to_string(),
        })
    }

    pub fn is_true(&self, key: &Key) -> bool {
        matches!(self.get(key), Some(Value::Boolean(true)))
    }

    /// `prefix` values accumulate rather than shadow, in outer-to-inner order.
    pub fn prefixes(&self) -> Vec<String> {
        let stack = self.lock();
        std::iter::once(&stack.base)
            .chain(stack.frames.iter().map(|f| &f.layer))
            .filter_map(|layer| layer.get(&Key::Prefix))
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect()
    }

    /// Flattened view of all visible keys, used by the template renderer.
    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        let stack = self.lock();
        let mut merged = BTreeMap::new();
        for layer in std::iter::once(&stack.base).chain(stack.frames.iter().map(|f| &f.layer)) {
            for (key, value) in &layer.values {
                merged.insert(key.name().to_string(), value.clone());
            }
        }
        merged
    }

    pub fn depth(&self) -> usize {
        self.lock().frames.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ContextStore {
        ContextStore::new(
            Layer::new()
                .with("project_name", "shop")
                .with("wsgi_port", 8000i64)
                .with(Key::Target, "staging"),
        )
    }

    #[test]
    fn test_push_shadows_and_pop_restores() {
        let ctx = store();
        let scope = ctx.push(Layer::new().with("project_name", "blog").with(Key::Host, "a1"));
        assert_eq!(ctx.get_str(&Key::var("project_name")).as_deref(), Some("blog"));
        assert_eq!(ctx.get_str(&Key::Host).as_deref(), Some("a1"));
        // Unrelated keys remain visible.
        assert_eq!(ctx.get(&Key::var("wsgi_port")), Some(Value::Integer(8000)));

        ctx.pop(scope).unwrap();
        assert_eq!(ctx.get_str(&Key::var("project_name")).as_deref(), Some("shop"));
        assert!(ctx.get(&Key::Host).is_none());
    }

    #[test]
    fn test_every_key_restored_after_scope() {
        let ctx = store();
        let before = ctx.snapshot();
        let scope = ctx.push(
            Layer::new()
                .with("project_name", "other")
                .with(Key::Target, "prod")
                .with("new_key", true),
        );
        ctx.pop(scope).unwrap();
        assert_eq!(ctx.snapshot(), before);
    }

    #[test]
    fn test_closing_outer_scope_first_is_rejected() {
        let ctx = store();
        let outer = ctx.push(Layer::new().with(Key::Role, "app"));
        let inner = ctx.push(Layer::new().with(Key::Host, "a1"));

        let err = ctx.pop(outer).unwrap_err();
        assert_eq!(
            err,
            ContextError::MisnestedScope {
                closing: 1,
                innermost: 2
            }
        );
        // Nothing was popped by the rejected call.
        assert_eq!(ctx.depth(), 2);
        assert_eq!(ctx.get_str(&Key::Host).as_deref(), Some("a1"));

        ctx.pop(inner).unwrap();
        ctx.pop(ScopeId(1)).unwrap();
        assert_eq!(ctx.depth(), 0);
    }

    #[test]
    fn test_popping_a_closed_scope_is_rejected() {
        let ctx = store();
        let scope = ctx.push(Layer::new());
        ctx.pop(scope).unwrap();
        assert_eq!(ctx.pop(ScopeId(1)), Err(ContextError::ScopeNotOpen(1)));
    }

    #[test]
    fn test_with_scope_restores_on_error_result() {
        let ctx = store();
        let out: Result<Result<(), String>, ContextError> =
            ctx.with_scope(Layer::new().with(Key::Host, "db1"), || {
                assert_eq!(ctx.get_str(&Key::Host).as_deref(), Some("db1"));
                Err("boom".to_string())
            });
        assert!(out.unwrap().is_err());
        assert!(ctx.get(&Key::Host).is_none());
    }

    #[test]
    fn test_with_scope_restores_on_panic() {
        let ctx = store();
        let inner = ctx.clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            inner
                .with_scope(Layer::new().with(Key::Host, "db1"), || panic!("task blew up"))
                .ok();
        }));
        assert!(result.is_err());
        assert_eq!(ctx.depth(), 0);
    }

    #[test]
    fn test_require_missing_key() {
        let ctx = ContextStore::new(Layer::new());
        assert_eq!(
            ctx.require(&Key::Target),
            Err(ContextError::MissingKey("target".to_string()))
        );
    }

    #[test]
    fn test_prefixes_accumulate_outer_to_inner() {
        let ctx = store();
        let a = ctx.push(Layer::new().with(Key::Prefix, "workon shop"));
        let b = ctx.push(Layer::new().with(Key::Prefix, "export DEBUG=0"));
        assert_eq!(ctx.prefixes(), vec!["workon shop", "export DEBUG=0"]);
        ctx.pop(b).unwrap();
        ctx.pop(a).unwrap();
        assert!(ctx.prefixes().is_empty());
    }

    #[test]
    fn test_fork_is_independent() {
        let ctx = store();
        let worker = ctx.fork();
        let scope = worker.push(Layer::new().with(Key::Host, "a2"));
        assert!(ctx.get(&Key::Host).is_none());
        worker.pop(scope).unwrap();
    }

    #[test]
    fn test_key_names_round_trip() {
        assert_eq!(Key::from("host"), Key::Host);
        assert_eq!(Key::from("domain"), Key::Var("domain".to_string()));
        assert_eq!(Key::WarnOnly.to_string(), "warn_only");
    }
}
