//! Shared helpers for the CLI.

pub mod logging;

pub use logging::{LogFormat, initialize_logging, level_from_name};
