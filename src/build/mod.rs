//! Build phase: layer-cached execution of an image specification
//!
//! A build walks the spec's steps in order. Each step gets a cache key from
//! its parent layer's key and its own inputs; when a layer with that key is
//! already committed the step is skipped and the layer reused. Only after
//! the last step succeeds is the resulting image tagged in the
//! [`ImageStore`].

pub mod builder;
pub mod cache;
pub mod digest;
pub mod error;
pub mod executor;
pub mod index;
pub mod store;

pub use builder::{BuildOptions, BuildReport, Builder, StepReport};
pub use cache::{LayerCache, LayerRecord};
pub use digest::Digest;
pub use error::BuildError;
pub use executor::{LocalExecutor, StepExecutor};
pub use store::{ImageConfig, ImageManifest, ImageRecord, ImageStore};
