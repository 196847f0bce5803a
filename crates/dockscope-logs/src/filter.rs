use regex::{Regex, RegexBuilder};
use std::collections::HashSet;

use dockscope_types::{LogEvent, LogLevel};

use crate::LevelClassifier;

/// Errors raised while compiling a filter
#[derive(Debug, thiserror::Error)]
pub enum FilterError {
    #[error("invalid filter pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("unknown log level '{0}'")]
    UnknownLevel(String),
}

/// Compiled filter for log events
#[derive(Clone)]
pub struct CompiledFilter {
    /// Regex pattern (if any)
    regex: Option<Regex>,

    /// Pattern as given, kept for diagnostics
    pattern: String,

    /// Log levels to include (empty = all)
    levels: HashSet<LogLevel>,

    /// Whether to invert match
    invert: bool,
}

impl CompiledFilter {
    /// Compile a case-sensitive filter (empty pattern matches every line)
    pub fn new(pattern: &str) -> Result<Self, FilterError> {
        Self::compile(pattern, false)
    }

    pub fn new_case_insensitive(pattern: &str) -> Result<Self, FilterError> {
        Self::compile(pattern, true)
    }

    fn compile(pattern: &str, case_insensitive: bool) -> Result<Self, FilterError> {
        let regex = match pattern {
            "" => None,
            pattern => Some(
                RegexBuilder::new(pattern)
                    .case_insensitive(case_insensitive)
                    .build()?,
            ),
        };

        Ok(Self {
            regex,
            pattern: pattern.to_string(),
            levels: HashSet::new(),
            invert: false,
        })
    }

    /// Set log levels to filter by
    pub fn with_levels(mut self, levels: HashSet<LogLevel>) -> Self {
        self.levels = levels;
        self
    }

    /// Parse user supplied level names (comma separated) against the vocabulary
    pub fn with_level_names<S: AsRef<str>>(
        self,
        names: &[S],
        classifier: &LevelClassifier,
    ) -> Result<Self, FilterError> {
        let mut levels = HashSet::new();
        for name in names.iter().flat_map(|n| n.as_ref().split(',')) {
            let name = name.trim().to_lowercase();
            if name.is_empty() {
                continue;
            }
            if !classifier.is_supported(&name) {
                return Err(FilterError::UnknownLevel(name));
            }
            levels.insert(classifier.normalize(&name));
        }
        Ok(self.with_levels(levels))
    }

    /// Invert the match
    pub fn inverted(mut self) -> Self {
        self.invert = true;
        self
    }

    /// Check if a log event matches this filter
    pub fn matches(&self, event: &LogEvent) -> bool {
        if !self.levels.is_empty() && !self.levels.contains(&event.level) {
            return self.invert;
        }

        let text_match = match &self.regex {
            Some(re) => re.is_match(&event.raw),
            None => true,
        };

        if self.invert { !text_match } else { text_match }
    }
}

impl std::fmt::Debug for CompiledFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledFilter")
            .field("pattern", &self.pattern)
            .field("levels", &self.levels)
            .field("invert", &self.invert)
            .finish()
    }
}
