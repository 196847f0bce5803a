//! Log processing for dockscope
//!
//! This crate provides log level classification and filtering.

mod classifier;
mod filter;

pub use classifier::{ClassifyError, LevelClassifier};
pub use filter::{CompiledFilter, FilterError};

// Re-export types used in our public API
pub use dockscope_types::{LogEvent, LogLevel, LogMessage};
