pub mod cli;
mod logging;
pub mod preprocess;

pub use preprocess::{
    PipelineResult, RunnerParameters, completion_summary, preprocess_job, preprocessing_pipeline,
};
