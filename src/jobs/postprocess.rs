use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value, json};
use tracing::{debug, info};

use super::measures::MEASURES_DIR;
use super::{effective_options, keys, run_dir_from, workflow_from};
use crate::context::Context;
use crate::state_machine::{Job, JobArgs, Options, OptionsExt, merge_options};

/// Writes the output workflow and removes scratch directories.
pub struct RunPostprocess<'a> {
    context: &'a mut Context,
    directory: &'a Path,
    options: Options,
}

pub(super) fn build<'a>(args: JobArgs<'a>) -> Box<dyn Job + 'a> {
    Box::new(RunPostprocess::new(args))
}

fn defaults() -> Options {
    let mut defaults = Options::new();
    defaults.insert("cleanup".into(), Value::Bool(true));
    defaults.insert("debug".into(), Value::Bool(false));
    defaults
}

impl<'a> RunPostprocess<'a> {
    pub fn new(args: JobArgs<'a>) -> Self {
        Self {
            context: args.context,
            directory: args.directory,
            options: args.options,
        }
    }
}

#[async_trait]
impl<'a> Job for RunPostprocess<'a> {
    async fn perform(&mut self) -> anyhow::Result<Value> {
        let workflow = workflow_from(self.context)?;
        let run_dir = run_dir_from(self.context)?;
        let options = merge_options(&defaults(), &effective_options(self.context, &self.options));

        let mut out = workflow.to_value()?;
        if let Some(fields) = out.as_object_mut() {
            fields.insert("completed_status".into(), Value::String("Success".into()));
            fields.insert("completed_at".into(), Value::String(Utc::now().to_rfc3339()));
        }
        let out_path = self.directory.join(workflow.out_name());
        tokio::fs::write(&out_path, serde_json::to_string_pretty(&out)?).await?;
        info!(path = %out_path.display(), "wrote output workflow");

        let scratch = run_dir.join(MEASURES_DIR);
        let cleaned = options.flag("cleanup")
            && !options.flag("debug")
            && tokio::fs::try_exists(&scratch).await?;
        if cleaned {
            debug!(path = %scratch.display(), "removing measure scratch directories");
            tokio::fs::remove_dir_all(&scratch).await?;
        }

        Ok(json!({
            "out_osw": out_path.display().to_string(),
            "cleaned": cleaned,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::testing::Harness;

    fn prepared() -> Harness {
        let mut h = Harness::new();
        h.load_workflow(json!({
            "out_name": "final.osw",
            "steps": [{"measure_dir_name": "m", "result": {"step_result": "Success"}}]
        }));
        std::fs::create_dir_all(h.run_dir().join(MEASURES_DIR).join("000_m")).unwrap();
        h
    }

    #[tokio::test]
    async fn writes_out_osw_and_cleans_up() {
        let mut h = prepared();
        let result = h.perform(build, Options::new()).await.unwrap();
        assert_eq!(result["cleaned"], json!(true));

        let out: Value =
            serde_json::from_str(&std::fs::read_to_string(h.path().join("final.osw")).unwrap()).unwrap();
        assert_eq!(out["completed_status"], json!("Success"));
        assert_eq!(out["steps"][0]["result"]["step_result"], json!("Success"));
        assert!(!h.run_dir().join(MEASURES_DIR).exists());
    }

    #[tokio::test]
    async fn debug_keeps_scratch_directories() {
        let mut h = prepared();
        let mut options = Options::new();
        options.insert("debug".into(), Value::Bool(true));
        let result = h.perform(build, options).await.unwrap();
        assert_eq!(result["cleaned"], json!(false));
        assert!(h.run_dir().join(MEASURES_DIR).join("000_m").is_dir());
    }
}
