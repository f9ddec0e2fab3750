//! Dockerfile front end for image specifications

pub mod parser;
pub mod render;

pub use parser::{parse, DockerfileError};
pub use render::render;
