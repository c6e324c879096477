use crate::domain::{
    EventKind, ParseError, ParsedRecord, RecordMeta, SessionEvent, SourceFields, SourceKind,
    is_preamble_text, parse_timestamp_value, str_field,
};
use serde_json::Value;
use std::path::PathBuf;

/// Parses one Codex rollout record.
///
/// Rollouts wrap everything in `{timestamp, type, payload}`. Early rollouts wrote response items
/// at the top level and started with a bare `{id, timestamp, instructions}` header; both shapes
/// are accepted.
pub fn parse_codex_record(value: &Value, line_no: u64) -> Result<ParsedRecord, ParseError> {
    let timestamp_ms = parse_timestamp_value(value.get("timestamp"))?;

    let Some(line_type) = value.get("type").and_then(|v| v.as_str()) else {
        if value.get("id").is_some() && value.get("timestamp").is_some() {
            return Ok(ParsedRecord {
                meta: RecordMeta {
                    native_id: str_field(value, "id"),
                    timestamp_ms,
                    ..RecordMeta::default()
                },
                events: Vec::new(),
            });
        }
        return Err(ParseError::UnsupportedShape("codex record without type"));
    };

    let payload = value.get("payload").unwrap_or(&Value::Null);
    match line_type {
        "session_meta" => parse_session_meta(payload, timestamp_ms),
        "turn_context" => Ok(ParsedRecord {
            meta: RecordMeta {
                cwd: str_field(payload, "cwd").map(PathBuf::from),
                model: str_field(payload, "model"),
                timestamp_ms,
                ..RecordMeta::default()
            },
            events: Vec::new(),
        }),
        "response_item" => Ok(ParsedRecord {
            meta: RecordMeta {
                timestamp_ms,
                ..RecordMeta::default()
            },
            events: parse_response_item(payload, line_no, timestamp_ms)
                .into_iter()
                .collect(),
        }),
        // Legacy rollouts: the response item is the record itself.
        "message" | "function_call" | "function_call_output" | "custom_tool_call"
        | "custom_tool_call_output" => Ok(ParsedRecord {
            meta: RecordMeta {
                timestamp_ms,
                ..RecordMeta::default()
            },
            events: parse_response_item(value, line_no, timestamp_ms)
                .into_iter()
                .collect(),
        }),
        // `event_msg` duplicates user prompts already present as response items and otherwise
        // carries token counts and progress notices.
        _ => Ok(ParsedRecord {
            meta: RecordMeta {
                timestamp_ms,
                ..RecordMeta::default()
            },
            events: Vec::new(),
        }),
    }
}

fn parse_session_meta(payload: &Value, line_ts: Option<i64>) -> Result<ParsedRecord, ParseError> {
    let started = parse_timestamp_value(payload.get("timestamp"))?.or(line_ts);
    let git_branch = payload
        .get("git")
        .and_then(|git| str_field(git, "branch"));
    Ok(ParsedRecord {
        meta: RecordMeta {
            native_id: str_field(payload, "id"),
            cwd: str_field(payload, "cwd").map(PathBuf::from),
            model: str_field(payload, "model"),
            git_branch,
            timestamp_ms: started,
        },
        events: Vec::new(),
    })
}

fn parse_response_item(
    payload: &Value,
    line_no: u64,
    timestamp_ms: Option<i64>,
) -> Option<SessionEvent> {
    let payload_type = payload.get("type").and_then(|v| v.as_str()).unwrap_or("");
    let call_id = str_field(payload, "call_id");
    let event = |kind: EventKind,
                 text: String,
                 tool_name: Option<String>,
                 call_id: Option<String>| SessionEvent {
        kind,
        line_no,
        timestamp_ms,
        text,
        tool_name,
        fields: SourceFields::Codex {
            record_type: payload_type.to_string(),
            call_id,
        },
    };

    match payload_type {
        "message" => {
            let role = payload.get("role").and_then(|v| v.as_str()).unwrap_or("");
            let text = message_text(payload)?;
            let kind = match role {
                "assistant" => EventKind::Assistant,
                "user" if is_preamble_text(SourceKind::Codex, &text) => EventKind::Preamble,
                "user" => EventKind::User,
                "developer" => EventKind::Preamble,
                _ => EventKind::System,
            };
            Some(event(kind, text, None, None))
        }
        "function_call" | "custom_tool_call" => {
            let name = str_field(payload, "name").unwrap_or_else(|| payload_type.to_string());
            let input = payload
                .get("arguments")
                .or_else(|| payload.get("input"))
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();
            Some(event(EventKind::ToolCall, input, Some(name), call_id))
        }
        "function_call_output" | "custom_tool_call_output" => {
            let output = tool_output_text(payload.get("output").unwrap_or(&Value::Null));
            if output.trim().is_empty() {
                return None;
            }
            Some(event(EventKind::ToolResult, output, None, call_id))
        }
        _ => None,
    }
}

fn message_text(payload: &Value) -> Option<String> {
    let content = payload.get("content")?.as_array()?;
    let texts = content
        .iter()
        .filter(|item| {
            matches!(
                item.get("type").and_then(|v| v.as_str()),
                Some("input_text" | "output_text" | "text")
            )
        })
        .filter_map(|item| item.get("text").and_then(|v| v.as_str()))
        .collect::<Vec<_>>();
    let joined = texts.join("\n");
    if joined.trim().is_empty() {
        None
    } else {
        Some(joined)
    }
}

// Custom tool outputs are JSON-encoded strings wrapping an `output` field.
fn tool_output_text(output: &Value) -> String {
    match output {
        Value::String(raw) => match serde_json::from_str::<Value>(raw) {
            Ok(json) => json
                .get("output")
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| raw.clone()),
            Err(_) => raw.clone(),
        },
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
