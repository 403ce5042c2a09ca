pub mod config;
pub mod database_ops;
pub mod http;
pub mod model;
pub mod normalization;
pub mod pipeline;
pub mod steam;
pub mod tracing;

pub mod util {
    pub mod env;
}

pub use config::PipelineConfig;
pub use model::RunKey;
pub use pipeline::{Pipeline, RunReport, Stage, StageFailure};
