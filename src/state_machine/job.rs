use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::adapter::Adapter;
use crate::context::Context;
use crate::engine::Engine;
use crate::timing::TimeLogger;

/// Free-form job options. Runner-wide options are merged with each
/// descriptor's options before a job is built.
pub type Options = Map<String, Value>;

/// `defaults` overridden key by key by `overrides`.
pub fn merge_options(defaults: &Options, overrides: &Options) -> Options {
    let mut merged = defaults.clone();
    for (key, value) in overrides {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

/// A single stage of work, built fresh for each state and performed once.
///
/// `perform` reads inputs from the context, does its work through the
/// adapter/engine collaborators, registers outputs back into the context and
/// returns a value the runner stores under the state. Errors are not caught
/// here; the runner turns them into the `errored` state.
#[async_trait]
pub trait Job: Send {
    async fn perform(&mut self) -> anyhow::Result<Value>;
}

/// Everything a job is constructed with.
pub struct JobArgs<'a> {
    pub adapter: &'a dyn Adapter,
    pub engine: &'a dyn Engine,
    pub context: &'a mut Context,
    pub timer: &'a mut TimeLogger,
    /// Directory holding the workflow description.
    pub directory: &'a Path,
    /// Runner options overridden by the descriptor's options.
    pub options: Options,
}

impl JobArgs<'_> {
    /// The job's own `defaults` with the caller's options layered on top.
    pub fn options_with_defaults(&self, defaults: &Options) -> Options {
        merge_options(defaults, &self.options)
    }
}

/// Builds a job from its construction arguments.
pub type JobFactory = Arc<dyn for<'a> Fn(JobArgs<'a>) -> Box<dyn Job + 'a> + Send + Sync>;

/// Maps job identifiers used in job tables to constructors.
#[derive(Clone, Default)]
pub struct JobRegistry {
    factories: HashMap<String, JobFactory>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the eight standard jobs.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        crate::jobs::register_builtin(&mut registry);
        registry
    }

    pub fn register<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: for<'a> Fn(JobArgs<'a>) -> Box<dyn Job + 'a> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
        self
    }

    pub fn get(&self, name: &str) -> Option<&JobFactory> {
        self.factories.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }
}

impl fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.factories.keys().collect();
        names.sort();
        f.debug_struct("JobRegistry").field("jobs", &names).finish()
    }
}

/// Typed accessors over option maps.
pub trait OptionsExt {
    fn flag(&self, key: &str) -> bool;
    fn flag_or(&self, key: &str, default: bool) -> bool;
}

impl OptionsExt for Options {
    fn flag(&self, key: &str) -> bool {
        self.flag_or(key, false)
    }

    fn flag_or(&self, key: &str, default: bool) -> bool {
        self.get(key).and_then(Value::as_bool).unwrap_or(default)
    }
}
