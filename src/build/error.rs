use crate::context::ContextError;
use crate::spec::ImageRefError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Invalid image specification: {0}")]
    InvalidSpec(String),

    #[error("Invalid base image: {0}")]
    InvalidBase(#[from] ImageRefError),

    #[error(transparent)]
    Context(#[from] ContextError),

    #[error("Step {index} ({instruction}) failed: {detail}")]
    StepFailed {
        index: usize,
        instruction: String,
        detail: String,
    },

    #[error("Step {index} ({instruction}) could not start: {source}")]
    Spawn {
        index: usize,
        instruction: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Build context changed during the build: {0}")]
    ContextChanged(String),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}
