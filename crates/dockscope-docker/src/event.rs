//! Health event vocabulary shim
//!
//! Docker reports health transitions as `"Action": "health_status: healthy"`.
//! Podman's compatible API sends `"Action": "health_status"` and puts the new
//! state in a separate `HealthStatus` field. [`rewrite_health_action`] patches
//! the Podman form into the Docker form so consumers only handle one of them.

use serde::Deserialize;
use std::borrow::Cow;
use std::ops::Range;
use std::str::FromStr;

/// `Action` value Podman uses for every health transition
pub const HEALTH_STATUS_ACTION: &str = "health_status";

/// Health state carried in Podman's `HealthStatus` field
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HealthStatus {
    Starting,
    Healthy,
    Unhealthy,
}

impl HealthStatus {
    /// Docker's `Action` value for the same transition
    pub fn docker_action(&self) -> &'static str {
        match self {
            Self::Starting => "health_status: running",
            Self::Healthy => "health_status: healthy",
            Self::Unhealthy => "health_status: unhealthy",
        }
    }
}

impl FromStr for HealthStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "starting" => Ok(Self::Starting),
            "healthy" => Ok(Self::Healthy),
            "unhealthy" => Ok(Self::Unhealthy),
            _ => Err(()),
        }
    }
}

/// The only two fields the rewrite looks at
#[derive(Deserialize)]
struct EventHeader {
    #[serde(rename = "Action")]
    action: Option<String>,
    #[serde(rename = "HealthStatus")]
    health_status: Option<String>,
}

/// Rewrite a Podman health event line into Docker's vocabulary.
///
/// Lines that are not health events, carry an unexpected health state, or
/// fail to parse are returned untouched. Only the bytes of the `Action` value
/// change; field order and whitespace are preserved.
pub fn rewrite_health_action(line: &[u8]) -> Cow<'_, [u8]> {
    match try_rewrite(line) {
        Some(rewritten) => Cow::Owned(rewritten),
        None => Cow::Borrowed(line),
    }
}

fn try_rewrite(line: &[u8]) -> Option<Vec<u8>> {
    let header: EventHeader = serde_json::from_slice(line).ok()?;
    if header.action.as_deref() != Some(HEALTH_STATUS_ACTION) {
        return None;
    }
    let status: HealthStatus = header.health_status?.parse().ok()?;

    let span = top_level_value_span(line, "Action")?;
    let value = serde_json::to_vec(status.docker_action()).ok()?;

    let mut out = Vec::with_capacity(line.len() - span.len() + value.len());
    out.extend_from_slice(&line[..span.start]);
    out.extend_from_slice(&value);
    out.extend_from_slice(&line[span.end..]);
    Some(out)
}

/// Byte range of the value stored under `key` in a top-level JSON object.
///
/// Expects input that already parsed as JSON.
fn top_level_value_span(json: &[u8], key: &str) -> Option<Range<usize>> {
    let mut pos = skip_whitespace(json, 0);
    if json.get(pos) != Some(&b'{') {
        return None;
    }
    pos += 1;

    loop {
        pos = skip_whitespace(json, pos);
        match json.get(pos)? {
            b'}' => return None,
            b',' => {
                pos += 1;
                continue;
            }
            b'"' => {}
            _ => return None,
        }

        let key_end = skip_string(json, pos)?;
        let name: Cow<'_, str> = serde_json::from_slice(&json[pos..key_end]).ok()?;

        pos = skip_whitespace(json, key_end);
        if json.get(pos) != Some(&b':') {
            return None;
        }
        pos = skip_whitespace(json, pos + 1);

        let value_end = skip_value(json, pos)?;
        if name == key {
            return Some(pos..value_end);
        }
        pos = value_end;
    }
}

fn skip_whitespace(json: &[u8], mut pos: usize) -> usize {
    while matches!(json.get(pos), Some(b' ' | b'\t' | b'\n' | b'\r')) {
        pos += 1;
    }
    pos
}

/// `start` points at the opening quote; returns the index after the closing one
fn skip_string(json: &[u8], start: usize) -> Option<usize> {
    let mut pos = start + 1;
    while pos < json.len() {
        match json[pos] {
            b'\\' => pos += 2,
            b'"' => return Some(pos + 1),
            _ => pos += 1,
        }
    }
    None
}

fn skip_value(json: &[u8], start: usize) -> Option<usize> {
    match json.get(start)? {
        b'"' => skip_string(json, start),
        b'{' | b'[' => {
            let mut depth = 0usize;
            let mut pos = start;
            while pos < json.len() {
                match json[pos] {
                    b'"' => {
                        pos = skip_string(json, pos)?;
                        continue;
                    }
                    b'{' | b'[' => depth += 1,
                    b'}' | b']' => {
                        depth -= 1;
                        if depth == 0 {
                            return Some(pos + 1);
                        }
                    }
                    _ => {}
                }
                pos += 1;
            }
            None
        }
        _ => {
            let end = json[start..]
                .iter()
                .position(|b| matches!(b, b',' | b'}' | b']' | b' ' | b'\t' | b'\n' | b'\r'))
                .map_or(json.len(), |offset| start + offset);
            (end > start).then_some(end)
        }
    }
}
