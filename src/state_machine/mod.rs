mod job;
mod state;

pub use job::{Job, JobArgs, JobFactory, JobRegistry, Options, OptionsExt, merge_options};
pub use state::{JobDescriptor, JobTable, State};
