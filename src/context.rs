//! Shared registry of named producers and their cached values.
//!
//! Every job in a run reads and writes the same [`Context`]. A key is bound to
//! a producer closure; binding evaluates the producer right away and caches
//! the result, so reads never run user code. [`Context::eval`] refreshes a
//! cached value on demand and is the only operation that swallows a producer
//! failure.

use std::fmt;
use std::ops::Index;
use std::path::PathBuf;
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::{Map, Value};
use tracing::{debug, warn};

/// A deferred computation stored under a context key.
pub type Producer = Arc<dyn Fn() -> anyhow::Result<Value> + Send + Sync>;

static NULL: Value = Value::Null;

#[derive(Clone)]
struct Entry {
    producer: Producer,
    value: Value,
}

/// Mutable key/value store shared by the jobs of one workflow run.
///
/// Keys keep registration order. Registering an existing key replaces its
/// producer and value in place.
#[derive(Clone, Default)]
pub struct Context {
    entries: IndexMap<String, Entry>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `producer` to `key`, evaluate it immediately and return the cached value.
    ///
    /// A producer error propagates to the caller and leaves any previous
    /// binding for `key` untouched.
    pub fn register<K, F>(&mut self, key: K, producer: F) -> anyhow::Result<Value>
    where
        K: Into<String>,
        F: Fn() -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.register_producer(key.into(), Arc::new(producer))
    }

    /// Bind a constant value. Shorthand for a producer that clones `value`.
    pub fn register_value<K, V>(&mut self, key: K, value: V) -> Value
    where
        K: Into<String>,
        V: Into<Value>,
    {
        let value = value.into();
        let cached = value.clone();
        let key = key.into();
        debug!(key = %key, "registering context value");
        self.entries.insert(
            key,
            Entry {
                producer: Arc::new(move || Ok(value.clone())),
                value: cached.clone(),
            },
        );
        cached
    }

    fn register_producer(&mut self, key: String, producer: Producer) -> anyhow::Result<Value> {
        let value = producer()?;
        debug!(key = %key, "registering context producer");
        self.entries.insert(
            key,
            Entry {
                producer,
                value: value.clone(),
            },
        );
        Ok(value)
    }

    /// Cached value for `key`. Never re-runs the producer.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key).map(|entry| &entry.value)
    }

    /// Cached value for `key` when it is a string.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    /// Cached value for `key` interpreted as a filesystem path.
    pub fn get_path(&self, key: &str) -> Option<PathBuf> {
        self.get_str(key).map(PathBuf::from)
    }

    /// Re-run the producer for `key` and replace its cached value.
    ///
    /// Returns `None` when `key` is unknown or the producer fails. A failed
    /// producer leaves the previous cached value in place.
    pub fn eval(&mut self, key: &str) -> Option<Value> {
        let entry = self.entries.get_mut(key)?;
        match (entry.producer)() {
            Ok(value) => {
                entry.value = value.clone();
                Some(value)
            }
            Err(err) => {
                warn!(key, error = %format!("{err:#}"), "context re-evaluation failed, keeping cached value");
                None
            }
        }
    }

    /// True when `key` has been registered, whatever its cached value is.
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// New context holding this context's bindings followed by `other`'s.
    ///
    /// `other` wins on shared keys. Every producer of the result is evaluated
    /// afresh; neither input is modified.
    pub fn merge(&self, other: &Context) -> anyhow::Result<Context> {
        Ok(Context {
            entries: Self::reevaluate(self.combined(other))?,
        })
    }

    /// Same as [`Context::merge`] but replaces `self`'s bindings.
    ///
    /// On a producer error `self` is left exactly as it was.
    pub fn merge_in_place(&mut self, other: &Context) -> anyhow::Result<()> {
        self.entries = Self::reevaluate(self.combined(other))?;
        Ok(())
    }

    fn combined(&self, other: &Context) -> IndexMap<String, Producer> {
        self.entries
            .iter()
            .chain(other.entries.iter())
            .map(|(key, entry)| (key.clone(), Arc::clone(&entry.producer)))
            .collect()
    }

    fn reevaluate(producers: IndexMap<String, Producer>) -> anyhow::Result<IndexMap<String, Entry>> {
        producers
            .into_iter()
            .map(|(key, producer)| {
                let value = producer()?;
                Ok((key, Entry { producer, value }))
            })
            .collect()
    }

    /// Snapshot of every cached value, detached from the producers.
    pub fn to_map(&self) -> Map<String, Value> {
        self.entries
            .iter()
            .map(|(key, entry)| (key.clone(), entry.value.clone()))
            .collect()
    }
}

impl Index<&str> for Context {
    type Output = Value;

    /// Missing keys read as `Value::Null`, like indexing a `serde_json::Value`.
    fn index(&self, key: &str) -> &Value {
        self.get(key).unwrap_or(&NULL)
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|(key, entry)| (key, &entry.value)))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicI64, Ordering};

    #[test]
    fn register_then_get_returns_produced_value() {
        let mut ctx = Context::new();
        let value = ctx.register("model", || Ok(json!("seed.osm"))).unwrap();
        assert_eq!(value, json!("seed.osm"));
        assert_eq!(ctx.get("model"), Some(&json!("seed.osm")));
        assert_eq!(ctx["model"], json!("seed.osm"));
    }

    #[test]
    fn register_overwrites_previous_binding() {
        let mut ctx = Context::new();
        ctx.register("weather", || Ok(json!("a.epw"))).unwrap();
        ctx.register("weather", || Ok(json!("b.epw"))).unwrap();
        assert_eq!(ctx.get("weather"), Some(&json!("b.epw")));
        assert!(ctx.contains_key("weather"));
        assert_eq!(ctx.len(), 1);
    }

    #[test]
    fn register_evaluates_producer_exactly_once() {
        let calls = Arc::new(AtomicI64::new(0));
        let counter = Arc::clone(&calls);
        let mut ctx = Context::new();
        ctx.register("n", move || Ok(json!(counter.fetch_add(1, Ordering::SeqCst))))
            .unwrap();
        ctx.get("n");
        let _ = &ctx["n"];
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn missing_key_reads_as_absent() {
        let ctx = Context::new();
        assert_eq!(ctx.get("nope"), None);
        assert!(!ctx.contains_key("nope"));
        assert_eq!(ctx["nope"], Value::Null);
    }

    #[test]
    fn null_value_still_counts_as_registered() {
        let mut ctx = Context::new();
        ctx.register("datapoint", || Ok(Value::Null)).unwrap();
        assert!(ctx.contains_key("datapoint"));
        assert_eq!(ctx.get("datapoint"), Some(&Value::Null));
    }

    #[test]
    fn register_propagates_producer_error_and_keeps_old_binding() {
        let mut ctx = Context::new();
        ctx.register_value("model", "old.osm");
        let err = ctx
            .register("model", || anyhow::bail!("translator crashed"))
            .unwrap_err();
        assert_eq!(err.to_string(), "translator crashed");
        assert_eq!(ctx.get_str("model"), Some("old.osm"));
    }

    #[test]
    fn eval_reflects_changed_closure_state() {
        let source = Arc::new(AtomicI64::new(1));
        let read = Arc::clone(&source);
        let mut ctx = Context::new();
        ctx.register("timestep", move || Ok(json!(read.load(Ordering::SeqCst))))
            .unwrap();

        source.store(6, Ordering::SeqCst);
        assert_eq!(ctx.get("timestep"), Some(&json!(1)));
        assert_eq!(ctx.eval("timestep"), Some(json!(6)));
        assert_eq!(ctx.get("timestep"), Some(&json!(6)));
        assert_eq!(ctx.len(), 1);
        assert_eq!(ctx.keys().collect::<Vec<_>>(), vec!["timestep"]);
    }

    #[test]
    fn eval_unknown_key_changes_nothing() {
        let mut ctx = Context::new();
        ctx.register_value("a", 1);
        assert_eq!(ctx.eval("b"), None);
        assert_eq!(ctx.len(), 1);
    }

    #[test]
    fn eval_failure_keeps_stale_value() {
        let fail = Arc::new(AtomicI64::new(0));
        let flag = Arc::clone(&fail);
        let mut ctx = Context::new();
        ctx.register("sql", move || {
            if flag.load(Ordering::SeqCst) == 1 {
                anyhow::bail!("eplusout.sql locked");
            }
            Ok(json!("eplusout.sql"))
        })
        .unwrap();

        fail.store(1, Ordering::SeqCst);
        assert_eq!(ctx.eval("sql"), None);
        assert_eq!(ctx.get("sql"), Some(&json!("eplusout.sql")));
    }

    #[test]
    fn merge_prefers_other_and_leaves_inputs_alone() {
        let mut a = Context::new();
        a.register_value("shared", "from a");
        a.register_value("only_a", 1);
        let mut b = Context::new();
        b.register_value("shared", "from b");
        b.register_value("only_b", 2);

        let merged = a.merge(&b).unwrap();
        assert_eq!(merged.get_str("shared"), Some("from b"));
        assert_eq!(merged.get("only_a"), Some(&json!(1)));
        assert_eq!(merged.get("only_b"), Some(&json!(2)));
        assert_eq!(merged.keys().collect::<Vec<_>>(), vec!["shared", "only_a", "only_b"]);

        assert_eq!(a.get_str("shared"), Some("from a"));
        assert!(!a.contains_key("only_b"));
        assert_eq!(b.len(), 2);
    }

    #[test]
    fn merge_reevaluates_producers() {
        let source = Arc::new(AtomicI64::new(1));
        let read = Arc::clone(&source);
        let mut a = Context::new();
        a.register("live", move || Ok(json!(read.load(Ordering::SeqCst))))
            .unwrap();

        source.store(2, Ordering::SeqCst);
        let merged = a.merge(&Context::new()).unwrap();
        assert_eq!(merged.get("live"), Some(&json!(2)));
        assert_eq!(a.get("live"), Some(&json!(1)));
    }

    #[test]
    fn merge_in_place_mutates_self() {
        let mut a = Context::new();
        a.register_value("x", 1);
        let mut b = Context::new();
        b.register_value("x", 2);
        b.register_value("y", 3);

        a.merge_in_place(&b).unwrap();
        assert_eq!(a.get("x"), Some(&json!(2)));
        assert_eq!(a.get("y"), Some(&json!(3)));
        assert_eq!(b.len(), 2);
    }

    #[test]
    fn to_map_snapshots_values() {
        let mut ctx = Context::new();
        ctx.register_value("run_dir", "/tmp/run");
        ctx.register_value("datapoint", Value::Null);
        let snapshot = ctx.to_map();
        ctx.register_value("run_dir", "/elsewhere");
        assert_eq!(snapshot.get("run_dir"), Some(&json!("/tmp/run")));
        assert_eq!(snapshot.get("datapoint"), Some(&Value::Null));
        assert!(!ctx.is_empty());
    }
}
