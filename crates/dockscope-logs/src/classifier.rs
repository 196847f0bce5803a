use regex::Regex;
use serde_json::Value;
use std::borrow::Cow;
use std::collections::HashSet;

use dockscope_types::{LogEvent, LogLevel, LogMessage};

/// Terminal color and cursor control sequences (CSI, OSC terminated by BEL)
const ANSI_PATTERN: &str = r"[\x1b\x{9b}][\[\]()#;?]*(?:(?:(?:[a-zA-Z\d]*(?:;[a-zA-Z\d]*)*)?\x07)|(?:(?:\d{1,4}(?:;\d{0,4})*)?[\dA-PRZcf-ntqry=><~]))";

/// Errors raised while building or running the classifier
#[derive(Debug, thiserror::Error)]
pub enum ClassifyError {
    /// A matcher failed to compile
    #[error("invalid level pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    /// The record payload has a shape the classifier refuses to guess about
    #[error("unsupported log message shape: {0}")]
    UnsupportedShape(&'static str),
}

/// Precompiled matchers for one level
#[derive(Debug)]
struct LevelMatcher {
    level: LogLevel,
    /// Level word at the start of the text followed by a non-letter
    plain: Regex,
    /// Level word in square brackets, optionally padded by one space
    bracket: Regex,
    /// `error=` or `level=error` style key/value pairs
    key_value: Regex,
    /// ` ERROR ` as a standalone upper-case token
    upper_token: String,
}

impl LevelMatcher {
    fn new(level: LogLevel) -> Result<Self, regex::Error> {
        let name = regex::escape(level.as_str());
        Ok(Self {
            level,
            plain: Regex::new(&format!("(?i)^{name}[^a-z]"))?,
            bracket: Regex::new(&format!(r"(?i)\[ ?{name} ?\]"))?,
            key_value: Regex::new(&format!(
                r#"(?i)(?:{name}=|\b(?:level|severity)=["']?{name}(?:[^a-z]|$))"#
            ))?,
            upper_token: format!(" {} ", level.as_str().to_uppercase()),
        })
    }

    fn matches(&self, text: &str) -> bool {
        self.plain.is_match(text)
            || self.bracket.is_match(text)
            || text.contains(&self.upper_token)
            || self.key_value.is_match(text)
    }
}

/// Best-effort log level classifier
///
/// Built once at startup and shared read-only afterwards; all matchers are
/// compiled in [`LevelClassifier::new`].
#[derive(Debug)]
pub struct LevelClassifier {
    matchers: Vec<LevelMatcher>,
    supported: HashSet<LogLevel>,
    ansi: Regex,
}

impl LevelClassifier {
    /// Compile matchers for every level in the vocabulary
    pub fn new() -> Result<Self, ClassifyError> {
        let matchers = LogLevel::ORDERED
            .into_iter()
            .map(LevelMatcher::new)
            .collect::<Result<Vec<_>, _>>()?;

        let mut supported: HashSet<LogLevel> = LogLevel::ORDERED.into_iter().collect();
        supported.insert(LogLevel::Unknown);

        Ok(Self {
            matchers,
            supported,
            ansi: Regex::new(ANSI_PATTERN)?,
        })
    }

    /// Every level a classification can return, `unknown` included
    pub fn supported_levels(&self) -> &HashSet<LogLevel> {
        &self.supported
    }

    /// Check whether `name` is an exact (lower-case) member of the vocabulary
    pub fn is_supported(&self, name: &str) -> bool {
        name.parse::<LogLevel>()
            .is_ok_and(|level| self.supported.contains(&level))
    }

    /// Remove terminal escape sequences
    pub fn strip_ansi<'a>(&self, text: &'a str) -> Cow<'a, str> {
        self.ansi.replace_all(text, "")
    }

    /// Classify a log event by its decoded payload
    pub fn classify(&self, event: &LogEvent) -> Result<LogLevel, ClassifyError> {
        self.classify_message(&event.message)
    }

    /// Classify a decoded payload
    ///
    /// For `Fields`, `severity` is consulted whenever `level` is missing *or*
    /// not text; older producers only fell back when `level` was absent.
    pub fn classify_message(&self, message: &LogMessage) -> Result<LogLevel, ClassifyError> {
        match message {
            LogMessage::Text(text) => Ok(self.guess_from_text(text)),

            LogMessage::Fields(fields) => {
                let text_field = |key: &str| fields.get(key).and_then(Value::as_str);
                Ok(match text_field("level").or_else(|| text_field("severity")) {
                    Some(level) => self.normalize(level),
                    None => LogLevel::Unknown,
                })
            }

            LogMessage::TextFields(fields) => {
                Ok(match fields.get("level").or_else(|| fields.get("severity")) {
                    Some(level) => self.normalize(level),
                    None => LogLevel::Unknown,
                })
            }

            LogMessage::Unordered(_) | LogMessage::UnorderedText(_) => {
                Err(ClassifyError::UnsupportedShape(message.shape()))
            }

            LogMessage::Empty => Ok(LogLevel::Unknown),

            LogMessage::Other(_) => {
                tracing::debug!(shape = message.shape(), "unexpected log message shape");
                Ok(LogLevel::Unknown)
            }
        }
    }

    /// Map a level name as written by a producer onto the vocabulary
    pub fn normalize(&self, text: &str) -> LogLevel {
        self.strip_ansi(text)
            .to_lowercase()
            .parse::<LogLevel>()
            .ok()
            .filter(|level| self.supported.contains(level))
            .unwrap_or(LogLevel::Unknown)
    }

    fn guess_from_text(&self, text: &str) -> LogLevel {
        let text = self.strip_ansi(text);
        self.matchers
            .iter()
            .find(|m| m.matches(&text))
            .map(|m| m.level)
            .unwrap_or(LogLevel::Unknown)
    }
}
