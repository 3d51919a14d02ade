//! Workflow execution context: step outputs plus the cancellation signal.

use crate::cancel::CancellationSignal;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::time::Instant;

/// Type-safe context key wrapper.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContextKey(String);

impl ContextKey {
    /// Creates a new ContextKey.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Returns the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContextKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ContextKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ContextKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::borrow::Borrow<str> for ContextKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// State carried through one workflow execution.
///
/// Steps read their input from the context and store their output in it, so
/// one step's result becomes the next step's input. The context also carries
/// the [`CancellationSignal`] that every step must honor.
///
/// # Examples
///
/// ```
/// use tasuki_core::Context;
///
/// let mut ctx = Context::new();
/// ctx.insert("company", "Acme".to_string());
/// ctx.insert("attempts", 3u32);
///
/// assert_eq!(ctx.get::<String>("company").map(String::as_str), Some("Acme"));
/// assert_eq!(ctx.get::<u32>("attempts"), Some(&3));
///
/// // Wrong type returns None
/// assert_eq!(ctx.get::<String>("attempts"), None);
/// ```
pub struct Context {
    data: HashMap<ContextKey, Box<dyn Any + Send + Sync>>,
    cancellation: CancellationSignal,
    started_at: Instant,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("keys", &self.data.keys().collect::<Vec<_>>())
            .field("cancelled", &self.cancellation.is_cancelled())
            .field("started_at", &self.started_at)
            .finish()
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    /// Creates an empty context with a fresh cancellation signal.
    pub fn new() -> Self {
        Self::with_cancellation(CancellationSignal::new())
    }

    /// Creates an empty context bound to an existing cancellation signal.
    pub fn with_cancellation(cancellation: CancellationSignal) -> Self {
        Self {
            data: HashMap::new(),
            cancellation,
            started_at: Instant::now(),
        }
    }

    /// Inserts a value with the given key, replacing any previous value.
    pub fn insert<T: Any + Send + Sync>(&mut self, key: impl Into<ContextKey>, value: T) {
        self.data.insert(key.into(), Box::new(value));
    }

    /// Returns a reference to the value for the given key.
    ///
    /// Returns `None` if the key doesn't exist or the type doesn't match.
    pub fn get<T: Any>(&self, key: &str) -> Option<&T> {
        self.data.get(key).and_then(|v| v.downcast_ref::<T>())
    }

    /// Removes a value by key and returns it.
    ///
    /// Returns `None` if the key doesn't exist or the type doesn't match; a
    /// value of the wrong type is left in place.
    pub fn take<T: Any>(&mut self, key: &str) -> Option<T> {
        if self.get::<T>(key).is_none() {
            return None;
        }
        self.data
            .remove(key)
            .and_then(|v| v.downcast::<T>().ok())
            .map(|b| *b)
    }

    /// Returns `true` if the context contains a value for the given key.
    pub fn contains_key(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    /// Returns the number of stored values.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if no values are stored.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The cancellation signal for this execution.
    pub fn cancellation(&self) -> &CancellationSignal {
        &self.cancellation
    }

    /// Swaps in another cancellation signal and returns the previous one.
    ///
    /// The orchestrator uses this to give a single step attempt its own
    /// signal, which it fires on timeout without touching the caller's.
    pub fn replace_cancellation(&mut self, cancellation: CancellationSignal) -> CancellationSignal {
        std::mem::replace(&mut self.cancellation, cancellation)
    }

    /// Returns the time elapsed since the context was created.
    pub fn elapsed(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heterogeneous_storage() {
        let mut ctx = Context::new();

        ctx.insert("int", 42i32);
        ctx.insert("string", "hello".to_string());

        assert_eq!(ctx.get::<i32>("int"), Some(&42));
        assert_eq!(ctx.get::<String>("string"), Some(&"hello".to_string()));
        assert_eq!(ctx.get::<String>("int"), None);
        assert_eq!(ctx.len(), 2);
    }

    #[test]
    fn test_take_keeps_mismatched_type() {
        let mut ctx = Context::new();
        ctx.insert("key", "value".to_string());

        assert_eq!(ctx.take::<u64>("key"), None);
        assert!(ctx.contains_key("key"));

        assert_eq!(ctx.take::<String>("key"), Some("value".to_string()));
        assert!(ctx.is_empty());
    }

    #[test]
    fn test_shared_cancellation() {
        let signal = CancellationSignal::new();
        let ctx = Context::with_cancellation(signal.clone());
        signal.cancel();
        assert!(ctx.cancellation().is_cancelled());
    }

    #[test]
    fn test_replace_cancellation_returns_previous() {
        let outer = CancellationSignal::new();
        let mut ctx = Context::with_cancellation(outer.clone());

        let previous = ctx.replace_cancellation(CancellationSignal::new());
        ctx.cancellation().cancel();
        assert!(!outer.is_cancelled());

        ctx.replace_cancellation(previous);
        assert!(!ctx.cancellation().is_cancelled());
        outer.cancel();
        assert!(ctx.cancellation().is_cancelled());
    }
}
