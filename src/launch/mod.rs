//! Run phase: instantiate a built image as one foreground process

pub mod exit;
pub mod launcher;

pub use exit::exit_code;
pub use launcher::{Instance, LaunchError, LaunchOptions, Launcher};
