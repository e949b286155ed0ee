//! Display helpers shared by the library and the CLI.

pub mod format;

pub use format::{format_elapsed, format_optional, truncate_string};
