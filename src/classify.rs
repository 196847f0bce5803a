//! `dockscope classify`: tag each log line with its detected level

use anyhow::{Context, Result};
use std::io::Write;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::debug;

use dockscope_logs::{CompiledFilter, FilterError, LevelClassifier, LogEvent};
use dockscope_types::LogLevel;

/// Line counts reported once the input is exhausted
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ClassifySummary {
    pub read: u64,
    pub printed: u64,
    /// Lines no rule recognised
    pub unknown: u64,
}

/// Every level the classifier can report, in precedence order
pub fn vocabulary(classifier: &LevelClassifier) -> Vec<LogLevel> {
    let mut levels: Vec<LogLevel> = classifier.supported_levels().iter().copied().collect();
    levels.sort();
    levels
}

/// Compile the user's filter flags into a [`CompiledFilter`]
pub fn build_filter(
    classifier: &LevelClassifier,
    pattern: Option<&str>,
    case_insensitive: bool,
    levels: &[String],
    invert: bool,
) -> Result<CompiledFilter, FilterError> {
    let pattern = pattern.unwrap_or_default();
    let filter = if case_insensitive {
        CompiledFilter::new_case_insensitive(pattern)?
    } else {
        CompiledFilter::new(pattern)?
    };
    let filter = filter.with_level_names(levels, classifier)?;
    Ok(if invert { filter.inverted() } else { filter })
}

/// Read lines until EOF, writing `level<TAB>line` for every line the filter keeps
pub async fn classify_lines<R, W>(
    reader: R,
    out: &mut W,
    source: &str,
    classifier: &LevelClassifier,
    filter: &CompiledFilter,
) -> Result<ClassifySummary>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let mut summary = ClassifySummary::default();
    let mut lines = reader.lines();
    debug!(source, ?filter, "classifying");

    while let Some(line) = lines.next_line().await.context("Failed to read input")? {
        summary.read += 1;
        let mut event = LogEvent::new(source.to_string(), summary.read, line);
        event.level = classifier
            .classify(&event)
            .with_context(|| format!("{}:{}", event.source, event.line_number))?;
        if event.level.is_unknown() {
            summary.unknown += 1;
        }

        if filter.matches(&event) {
            writeln!(out, "{}\t{}", event.level, event.raw)?;
            summary.printed += 1;
        }
    }

    out.flush()?;
    debug!(
        source,
        read = summary.read,
        printed = summary.printed,
        unknown = summary.unknown,
        "classification finished"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn run(input: &str, filter: &CompiledFilter) -> (String, ClassifySummary) {
        let classifier = LevelClassifier::new().unwrap();
        let mut out = Vec::new();
        let summary = classify_lines(input.as_bytes(), &mut out, "test", &classifier, filter)
            .await
            .unwrap();
        (String::from_utf8(out).unwrap(), summary)
    }

    #[tokio::test]
    async fn test_every_line_is_tagged() {
        let input = concat!(
            "ERROR: disk full\n",
            "{\"level\":\"warn\",\"msg\":\"slow\"}\n",
            "just some text\n",
        );
        let (out, summary) = run(input, &CompiledFilter::new("").unwrap()).await;

        assert_eq!(
            out,
            concat!(
                "error\tERROR: disk full\n",
                "warn\t{\"level\":\"warn\",\"msg\":\"slow\"}\n",
                "unknown\tjust some text\n",
            )
        );
        assert_eq!(
            summary,
            ClassifySummary {
                read: 3,
                printed: 3,
                unknown: 1
            }
        );
    }

    #[tokio::test]
    async fn test_level_filter() {
        let classifier = LevelClassifier::new().unwrap();
        let filter = build_filter(&classifier, None, false, &["error,fatal".to_string()], false)
            .unwrap();
        let input = "INFO started\nERROR boom\nFATAL: gone\n";
        let (out, summary) = run(input, &filter).await;

        assert_eq!(out, "error\tERROR boom\nfatal\tFATAL: gone\n");
        assert_eq!(summary.read, 3);
        assert_eq!(summary.printed, 2);
        assert_eq!(summary.unknown, 0);
    }

    #[tokio::test]
    async fn test_inverted_pattern() {
        let classifier = LevelClassifier::new().unwrap();
        let filter = build_filter(&classifier, Some("health"), true, &[], true).unwrap();
        let (out, _) = run("GET /Health 200\nDEBUG cache miss\n", &filter).await;

        assert_eq!(out, "debug\tDEBUG cache miss\n");
    }

    #[test]
    fn test_vocabulary_lists_supported_levels_in_order() {
        let classifier = LevelClassifier::new().unwrap();
        let levels = vocabulary(&classifier);

        assert_eq!(levels.len(), classifier.supported_levels().len());
        assert_eq!(&levels[..9], &LogLevel::ORDERED[..]);
        assert_eq!(levels.last(), Some(&LogLevel::Unknown));
    }

    #[test]
    fn test_unknown_level_name_is_rejected() {
        let classifier = LevelClassifier::new().unwrap();
        let err = build_filter(&classifier, None, false, &["loud".to_string()], false).unwrap_err();
        assert!(matches!(err, FilterError::UnknownLevel(name) if name == "loud"));
    }
}
