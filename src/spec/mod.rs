//! Image build specification model

pub mod image_ref;
pub mod schema;

pub use image_ref::{ImageRefError, ImageReference};
pub use schema::{
    BuildStep, CommandLine, CopyStep, ImageSpec, RunStep, StepRole, DEFAULT_MANIFEST,
    NO_BYTECODE_FLAG, UNBUFFERED_FLAG,
};
