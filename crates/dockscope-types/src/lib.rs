//! Shared types for dockscope
//!
//! This crate contains data structures used across multiple dockscope crates.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Log Levels
// ============================================================================

/// Log severity level
///
/// The nine real levels are listed in [`LogLevel::ORDERED`], which is also the
/// order in which free-text heuristics try them. `Unknown` is the fallback when
/// nothing matches. Variants sort in that same order, `Unknown` last.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Warning,
    Info,
    Debug,
    Trace,
    Severe,
    Critical,
    Fatal,
    Unknown,
}

impl LogLevel {
    /// Real levels in match precedence order
    pub const ORDERED: [LogLevel; 9] = [
        Self::Error,
        Self::Warn,
        Self::Warning,
        Self::Info,
        Self::Debug,
        Self::Trace,
        Self::Severe,
        Self::Critical,
        Self::Fatal,
    ];

    /// Lower-case name as producers usually write it
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Warning => "warning",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
            Self::Severe => "severe",
            Self::Critical => "critical",
            Self::Fatal => "fatal",
            Self::Unknown => "unknown",
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown)
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string is not an exact lower-case level name
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParseLevelError(pub String);

impl fmt::Display for ParseLevelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unsupported log level: {}", self.0)
    }
}

impl std::error::Error for ParseLevelError {}

impl FromStr for LogLevel {
    type Err = ParseLevelError;

    /// Exact match on the lower-case names, `unknown` included.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unknown" => Ok(Self::Unknown),
            _ => Self::ORDERED
                .into_iter()
                .find(|level| level.as_str() == s)
                .ok_or_else(|| ParseLevelError(s.to_string())),
        }
    }
}

// ============================================================================
// Log Records
// ============================================================================

/// Decoded payload of a log record
///
/// Which variant a record ends up in depends on how the producer wrote it and
/// on which decoder handled it.
#[derive(Clone, Debug, PartialEq)]
pub enum LogMessage {
    /// No payload at all
    Empty,

    /// Free text line
    Text(String),

    /// Ordered structured record with heterogeneous values (e.g. a JSON object)
    Fields(Map<String, Value>),

    /// Ordered structured record whose values are all text (e.g. logfmt)
    TextFields(IndexMap<String, String>),

    /// Legacy untyped collection without ordering
    Unordered(HashMap<String, Value>),

    /// Legacy untyped text collection without ordering
    UnorderedText(HashMap<String, String>),

    /// Any other decoded value (number, bool, array, null)
    Other(Value),
}

impl LogMessage {
    /// Decode a raw line: JSON objects become `Fields`, everything else is text
    pub fn decode(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.starts_with('{')
            && let Ok(Value::Object(map)) = serde_json::from_str::<Value>(trimmed)
        {
            return Self::Fields(map);
        }
        Self::Text(raw.to_string())
    }

    /// Human readable name of the payload shape, used in diagnostics
    pub fn shape(&self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Text(_) => "text",
            Self::Fields(_) => "ordered map",
            Self::TextFields(_) => "ordered text map",
            Self::Unordered(_) => "unordered map",
            Self::UnorderedText(_) => "unordered text map",
            Self::Other(Value::Null) => "null",
            Self::Other(Value::Bool(_)) => "bool",
            Self::Other(Value::Number(_)) => "number",
            Self::Other(Value::Array(_)) => "array",
            Self::Other(Value::String(_)) => "string value",
            Self::Other(Value::Object(_)) => "object value",
        }
    }
}

impl From<Value> for LogMessage {
    fn from(value: Value) -> Self {
        match value {
            Value::String(s) => Self::Text(s),
            Value::Object(map) => Self::Fields(map),
            Value::Null => Self::Empty,
            other => Self::Other(other),
        }
    }
}

impl From<String> for LogMessage {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for LogMessage {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

/// A single log record
#[derive(Clone, Debug)]
pub struct LogEvent {
    /// Line number within the source stream
    pub line_number: u64,

    /// Source container (or file) name
    pub source: String,

    /// Original raw log line
    pub raw: String,

    /// Decoded payload
    pub message: LogMessage,

    /// Detected log level
    pub level: LogLevel,
}

impl LogEvent {
    /// Create a new log event, decoding the payload from the raw line
    pub fn new(source: String, line_number: u64, raw: String) -> Self {
        let message = LogMessage::decode(&raw);
        Self {
            line_number,
            source,
            raw,
            message,
            level: LogLevel::Unknown,
        }
    }
}
