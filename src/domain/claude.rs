use crate::domain::{
    EventKind, ParseError, ParsedRecord, RecordMeta, SessionEvent, SourceFields, SourceKind,
    is_preamble_text, parse_timestamp_value, str_field,
};
use serde_json::Value;
use std::path::PathBuf;

/// Parses one Claude Code project-log record.
pub fn parse_claude_record(value: &Value, line_no: u64) -> Result<ParsedRecord, ParseError> {
    let Some(kind) = value.get("type").and_then(|v| v.as_str()) else {
        return Err(ParseError::UnsupportedShape("claude record without type"));
    };
    let timestamp_ms = parse_timestamp_value(value.get("timestamp"))?;

    let message = value.get("message").unwrap_or(&Value::Null);
    let meta = RecordMeta {
        native_id: str_field(value, "sessionId"),
        cwd: str_field(value, "cwd").map(PathBuf::from),
        model: str_field(message, "model").filter(|model| model != "<synthetic>"),
        git_branch: str_field(value, "gitBranch"),
        timestamp_ms,
    };

    let ctx = EventContext {
        line_no,
        timestamp_ms,
        uuid: str_field(value, "uuid"),
        sidechain: value
            .get("isSidechain")
            .and_then(|v| v.as_bool())
            .unwrap_or(false),
    };

    let events = match kind {
        "user" => {
            let is_meta = value.get("isMeta").and_then(|v| v.as_bool()) == Some(true);
            parse_user_events(message.get("content").unwrap_or(&Value::Null), is_meta, &ctx)
        }
        "assistant" => parse_assistant_events(message.get("content").unwrap_or(&Value::Null), &ctx),
        "summary" => str_field(value, "summary")
            .map(|text| ctx.event(EventKind::System, text, None, None))
            .into_iter()
            .collect(),
        "system" => str_field(value, "content")
            .map(|text| ctx.event(EventKind::System, text, None, None))
            .into_iter()
            .collect(),
        _ => Vec::new(),
    };

    Ok(ParsedRecord { meta, events })
}

struct EventContext {
    line_no: u64,
    timestamp_ms: Option<i64>,
    uuid: Option<String>,
    sidechain: bool,
}

impl EventContext {
    fn event(
        &self,
        kind: EventKind,
        text: String,
        tool_name: Option<String>,
        call_id: Option<String>,
    ) -> SessionEvent {
        SessionEvent {
            kind,
            line_no: self.line_no,
            timestamp_ms: self.timestamp_ms,
            text,
            tool_name,
            fields: SourceFields::Claude {
                uuid: self.uuid.clone(),
                call_id,
                sidechain: self.sidechain,
            },
        }
    }

    fn user_text(&self, text: &str, is_meta: bool) -> Option<SessionEvent> {
        let text = text.trim_end();
        if text.trim().is_empty() {
            return None;
        }
        let kind = if is_meta || is_preamble_text(SourceKind::Claude, text) {
            EventKind::Preamble
        } else {
            EventKind::User
        };
        Some(self.event(kind, text.to_string(), None, None))
    }
}

fn parse_user_events(content: &Value, is_meta: bool, ctx: &EventContext) -> Vec<SessionEvent> {
    // Tool results come back as user records carrying `tool_result` blocks.
    let Some(blocks) = content.as_array() else {
        return content
            .as_str()
            .and_then(|text| ctx.user_text(text, is_meta))
            .into_iter()
            .collect();
    };

    let mut out = Vec::new();
    for block in blocks {
        match block.get("type").and_then(|v| v.as_str()).unwrap_or("") {
            "text" => {
                let text = block.get("text").and_then(|v| v.as_str()).unwrap_or("");
                out.extend(ctx.user_text(text, is_meta));
            }
            "tool_result" => {
                let call_id = str_field(block, "tool_use_id").or_else(|| str_field(block, "toolUseId"));
                let detail = tool_result_text(block.get("content").unwrap_or(&Value::Null));
                out.push(ctx.event(EventKind::ToolResult, detail, None, call_id));
            }
            _ => {}
        }
    }
    out
}

fn parse_assistant_events(content: &Value, ctx: &EventContext) -> Vec<SessionEvent> {
    let Some(blocks) = content.as_array() else {
        return content
            .as_str()
            .map(str::trim_end)
            .filter(|text| !text.trim().is_empty())
            .map(|text| ctx.event(EventKind::Assistant, text.to_string(), None, None))
            .into_iter()
            .collect();
    };

    let mut out = Vec::new();
    for block in blocks {
        match block.get("type").and_then(|v| v.as_str()).unwrap_or("") {
            "text" => {
                let text = block.get("text").and_then(|v| v.as_str()).unwrap_or("");
                let text = text.trim_end();
                if !text.trim().is_empty() {
                    out.push(ctx.event(EventKind::Assistant, text.to_string(), None, None));
                }
            }
            "tool_use" => {
                let name = str_field(block, "name").unwrap_or_else(|| "tool".to_string());
                let input = block.get("input").unwrap_or(&Value::Null);
                out.push(ctx.event(
                    EventKind::ToolCall,
                    input.to_string(),
                    Some(name),
                    str_field(block, "id"),
                ));
            }
            _ => {}
        }
    }
    out
}

// Prefer plain string content; structured results keep their text blocks, else raw JSON.
fn tool_result_text(content: &Value) -> String {
    match content {
        Value::String(text) => text.trim_end().to_string(),
        Value::Array(items) => {
            let texts = items
                .iter()
                .filter_map(|item| item.get("text").and_then(|v| v.as_str()))
                .collect::<Vec<_>>();
            if texts.is_empty() {
                content.to_string()
            } else {
                texts.join("\n")
            }
        }
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_record_carries_session_meta() {
        let json = serde_json::json!({
            "type": "user",
            "cwd": "/tmp/p",
            "sessionId": "s1",
            "gitBranch": "feature/x",
            "timestamp": "2026-02-19T00:00:00Z",
            "uuid": "u1",
            "message": { "role": "user", "content": "hello\nworld" }
        });
        let record = parse_claude_record(&json, 1).expect("parse");
        assert_eq!(record.meta.native_id.as_deref(), Some("s1"));
        assert_eq!(record.meta.cwd, Some(PathBuf::from("/tmp/p")));
        assert_eq!(record.meta.git_branch.as_deref(), Some("feature/x"));
        assert_eq!(record.events.len(), 1);
        assert_eq!(record.events[0].kind, EventKind::User);
        assert_eq!(record.events[0].text, "hello\nworld");
    }

    #[test]
    fn parses_tool_use_and_result_with_call_ids() {
        let tool_use = serde_json::json!({
            "type": "assistant",
            "timestamp": "2026-02-19T00:00:00Z",
            "message": {
                "model": "claude-sonnet-4-5",
                "content": [
                    { "type": "text", "text": "Listing files." },
                    { "type": "tool_use", "id": "toolu_1", "name": "Bash", "input": { "cmd": "ls" } }
                ]
            }
        });
        let record = parse_claude_record(&tool_use, 2).expect("parse");
        assert_eq!(record.meta.model.as_deref(), Some("claude-sonnet-4-5"));
        assert_eq!(record.events.len(), 2);
        assert_eq!(record.events[0].kind, EventKind::Assistant);
        assert_eq!(record.events[1].kind, EventKind::ToolCall);
        assert_eq!(record.events[1].tool_name.as_deref(), Some("Bash"));

        let tool_out = serde_json::json!({
            "type": "user",
            "timestamp": "2026-02-19T00:00:01Z",
            "message": {
                "content": [
                    { "type": "tool_result", "tool_use_id": "toolu_1", "content": "ok" }
                ]
            }
        });
        let record = parse_claude_record(&tool_out, 3).expect("parse");
        assert_eq!(record.events.len(), 1);
        assert_eq!(record.events[0].kind, EventKind::ToolResult);
        assert_eq!(record.events[0].text, "ok");
        assert!(matches!(
            &record.events[0].fields,
            SourceFields::Claude { call_id: Some(id), .. } if id == "toolu_1"
        ));
    }

    #[test]
    fn meta_and_command_records_are_preamble() {
        let meta = serde_json::json!({
            "type": "user",
            "isMeta": true,
            "message": { "content": "Caveat: anything" }
        });
        let command = serde_json::json!({
            "type": "user",
            "message": { "content": "<command-name>/clear</command-name>" }
        });
        for json in [meta, command] {
            let record = parse_claude_record(&json, 1).expect("parse");
            assert_eq!(record.events[0].kind, EventKind::Preamble);
        }
    }

    #[test]
    fn summary_lines_become_system_events_and_snapshots_are_skipped() {
        let summary = serde_json::json!({ "type": "summary", "summary": "Refactor parser", "leafUuid": "x" });
        let record = parse_claude_record(&summary, 1).expect("parse");
        assert_eq!(record.events[0].kind, EventKind::System);
        assert_eq!(record.events[0].timestamp_ms, None);

        let snapshot = serde_json::json!({ "type": "file-history-snapshot", "snapshot": {} });
        let record = parse_claude_record(&snapshot, 2).expect("parse");
        assert!(record.events.is_empty());
    }

    #[test]
    fn synthetic_model_is_not_recorded() {
        let json = serde_json::json!({
            "type": "assistant",
            "message": { "model": "<synthetic>", "content": "No response requested." }
        });
        let record = parse_claude_record(&json, 1).expect("parse");
        assert_eq!(record.meta.model, None);
    }

    #[test]
    fn missing_type_is_malformed() {
        let json = serde_json::json!({ "message": {} });
        assert!(matches!(
            parse_claude_record(&json, 1),
            Err(ParseError::UnsupportedShape(_))
        ));
    }
}
