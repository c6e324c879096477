use crate::domain::{SessionEvent, SourceKind};
use serde_json::Value;
use std::path::PathBuf;
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported record shape: {0}")]
    UnsupportedShape(&'static str),

    #[error("unparsable timestamp: {0}")]
    Timestamp(String),
}

/// One line of a log file as read from disk.
#[derive(Clone, Copy, Debug)]
pub struct RawLine<'a> {
    pub text: &'a str,
    pub line_no: u64,
    /// Whether the line ended with a newline. An unterminated line may still be mid-write.
    pub terminated: bool,
}

/// Session-level metadata a single record may carry.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RecordMeta {
    pub native_id: Option<String>,
    pub cwd: Option<PathBuf>,
    pub model: Option<String>,
    pub git_branch: Option<String>,
    pub timestamp_ms: Option<i64>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ParsedRecord {
    pub meta: RecordMeta,
    pub events: Vec<SessionEvent>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RecordOutcome {
    Parsed(ParsedRecord),
    Blank,
    /// Trailing partial line; not an error, the rest has not been written yet.
    Pending,
}

pub fn parse_record(line: RawLine<'_>, source: SourceKind) -> Result<RecordOutcome, ParseError> {
    let trimmed = line.text.trim();
    if trimmed.is_empty() {
        return Ok(RecordOutcome::Blank);
    }

    let value: Value = match serde_json::from_str(trimmed) {
        Ok(value) => value,
        Err(_) if !line.terminated => return Ok(RecordOutcome::Pending),
        Err(error) => return Err(error.into()),
    };
    if !value.is_object() {
        return Err(ParseError::UnsupportedShape("record is not an object"));
    }

    let record = match source {
        SourceKind::Codex => super::parse_codex_record(&value, line.line_no)?,
        SourceKind::Claude => super::parse_claude_record(&value, line.line_no)?,
    };
    Ok(RecordOutcome::Parsed(record))
}

const CODEX_PREAMBLE_PREFIXES: &[&str] = &[
    "# AGENTS.md instructions",
    "<environment_context>",
    "<INSTRUCTIONS>",
    "<user_instructions>",
    "<permissions instructions>",
];

const CLAUDE_PREAMBLE_PREFIXES: &[&str] = &[
    "Caveat: The messages below were generated by the user while running local commands",
    "<command-name>",
    "<command-message>",
    "<local-command-stdout>",
    "<local-command-stderr>",
    "<system-reminder>",
    "<user-prompt-submit-hook>",
];

/// Classifies agent-injected boilerplate. Anything not matching a known marker is genuine.
pub fn is_preamble_text(source: SourceKind, text: &str) -> bool {
    let trimmed = text.trim_start();
    let prefixes = match source {
        SourceKind::Codex => CODEX_PREAMBLE_PREFIXES,
        SourceKind::Claude => CLAUDE_PREAMBLE_PREFIXES,
    };
    if prefixes.iter().any(|prefix| trimmed.starts_with(prefix)) {
        return true;
    }
    source == SourceKind::Codex && trimmed.starts_with("<skill>") && trimmed.contains("</skill>")
}

/// Reads a timestamp field. Missing or null is `Ok(None)`; present but unparsable is an error.
pub fn parse_timestamp_value(value: Option<&Value>) -> Result<Option<i64>, ParseError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(text)) => parse_rfc3339_to_unix_ms(text)
            .map(Some)
            .ok_or_else(|| ParseError::Timestamp(text.clone())),
        Some(Value::Number(number)) => {
            let raw = number
                .as_f64()
                .ok_or_else(|| ParseError::Timestamp(number.to_string()))?;
            Ok(Some(epoch_to_unix_ms(raw)))
        }
        Some(other) => Err(ParseError::Timestamp(other.to_string())),
    }
}

// Numeric epochs show up in seconds, milliseconds and microseconds.
fn epoch_to_unix_ms(raw: f64) -> i64 {
    let ms = if raw > 1e14 {
        raw / 1_000.0
    } else if raw > 1e11 {
        raw
    } else {
        raw * 1_000.0
    };
    ms as i64
}

pub fn parse_rfc3339_to_unix_ms(value: &str) -> Option<i64> {
    let timestamp = OffsetDateTime::parse(value.trim(), &Rfc3339).ok()?;
    let ms: i128 = timestamp.unix_timestamp_nanos() / 1_000_000;
    i64::try_from(ms).ok()
}

pub fn format_unix_ms_rfc3339(ms: i64) -> String {
    let nanos = i128::from(ms) * 1_000_000;
    OffsetDateTime::from_unix_timestamp_nanos(nanos)
        .ok()
        .and_then(|timestamp| timestamp.format(&Rfc3339).ok())
        .unwrap_or_default()
}

const MAX_TITLE_CHARS: usize = 200;

pub fn derive_title_from_user_text(text: &str) -> Option<String> {
    let first_line = text
        .lines()
        .map(|line| line.trim())
        .find(|line| !line.is_empty())?;
    let collapsed = first_line.split_whitespace().collect::<Vec<_>>().join(" ");
    Some(collapsed.chars().take(MAX_TITLE_CHARS).collect())
}

pub(crate) fn str_field(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .filter(|s| !s.trim().is_empty())
}
