use anyhow::Context as _;
use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::info;

use super::{effective_options, keys, required_path, run_dir_from};
use crate::context::Context;
use crate::engine::Engine;
use crate::state_machine::{Job, JobArgs, Options};

/// Turns the current OSM model into an IDF. An IDF seed passes through.
pub struct RunTranslation<'a> {
    engine: &'a dyn Engine,
    context: &'a mut Context,
    options: Options,
}

pub(super) fn build<'a>(args: JobArgs<'a>) -> Box<dyn Job + 'a> {
    Box::new(RunTranslation::new(args))
}

impl<'a> RunTranslation<'a> {
    pub fn new(args: JobArgs<'a>) -> Self {
        Self {
            engine: args.engine,
            context: args.context,
            options: args.options,
        }
    }

    /// Forward translator switches from `ft_options`.
    fn ft_options(&self) -> Options {
        effective_options(self.context, &self.options)
            .get("ft_options")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl<'a> Job for RunTranslation<'a> {
    async fn perform(&mut self) -> anyhow::Result<Value> {
        let model = required_path(self.context, keys::MODEL)?;
        let run_dir = run_dir_from(self.context)?;

        let is_idf = model
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("idf"));
        let idf = if is_idf {
            info!(model = %model.display(), "model is already an IDF, skipping translation");
            model
        } else {
            let ft_options = self.ft_options();
            info!(model = %model.display(), "translating model to IDF");
            self.engine
                .translate(&model, &run_dir, &ft_options)
                .await
                .with_context(|| format!("translating {}", model.display()))?
        };

        let idf = idf.display().to_string();
        self.context.register_value(keys::MODEL_IDF, idf.clone());
        Ok(json!({ "model_idf": idf }))
    }
}
