//! Session transcript parsing.
//!
//! Transcripts are append-only JSONL files, one event per line, in the shape
//! agent CLIs write them:
//!
//! ```text
//! {"type":"user","timestamp":"...","message":{"role":"user","content":"hello"}}
//! {"type":"assistant","message":{"role":"assistant","content":[{"type":"text","text":"hi"}]}}
//! {"type":"tool_use","name":"bash","input":{"command":"ls"}}
//! {"type":"tool_result","content":"..."}
//! ```
//!
//! Events are tagged with their byte span in the file so that extraction can
//! resume from a stored offset and facts can carry provenance. Malformed
//! lines are recorded as warnings and skipped; the first malformed offset is
//! reported so the session marker never advances past unread content.

use serde::Serialize;

/// Event categories a transcript can contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    UserMessage,
    AssistantMessage,
    ToolUse,
    ToolResult,
}

/// One parsed transcript event with its byte span.
#[derive(Debug, Clone)]
pub struct TranscriptEvent {
    pub kind: EventKind,
    /// Plain text payload (message text, tool name + input, or tool output).
    pub text: String,
    pub timestamp: Option<String>,
    /// Byte offset of the line start within the transcript file.
    pub start: u64,
    /// Byte offset one past the line's newline.
    pub end: u64,
}

/// A warning produced while parsing, with the offset of the offending line.
#[derive(Debug, Clone)]
pub struct ParseWarning {
    pub offset: u64,
    pub message: String,
}

/// Result of parsing a transcript suffix.
#[derive(Debug, Default)]
pub struct ParsedTranscript {
    pub events: Vec<TranscriptEvent>,
    pub warnings: Vec<ParseWarning>,
    /// Offset of the first line that could not be read, if any.
    pub first_malformed_offset: Option<u64>,
    /// Offset one past the last byte examined.
    pub end_offset: u64,
}

impl ParsedTranscript {
    /// The offset up to which a session marker may safely advance: everything
    /// before the first malformed line, or the whole examined range.
    pub fn committable_offset(&self) -> u64 {
        self.first_malformed_offset.unwrap_or(self.end_offset)
    }
}

/// Parse transcript text starting at `from_offset` (bytes).
///
/// Offsets in the returned events are absolute within `raw`.
pub fn parse_transcript(raw: &str, from_offset: u64) -> ParsedTranscript {
    let mut parsed = ParsedTranscript {
        end_offset: raw.len() as u64,
        ..Default::default()
    };

    let mut offset = 0u64;
    for line in raw.split_inclusive('\n') {
        let start = offset;
        offset += line.len() as u64;

        if start < from_offset {
            continue;
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        match parse_line(trimmed) {
            Ok(Some(mut event)) => {
                event.start = start;
                event.end = offset;
                parsed.events.push(event);
            }
            Ok(None) => {} // recognized but carries no extractable text
            Err(msg) => {
                tracing::warn!(offset = start, %msg, "skipping malformed transcript line");
                if parsed.first_malformed_offset.is_none() {
                    parsed.first_malformed_offset = Some(start);
                }
                parsed.warnings.push(ParseWarning {
                    offset: start,
                    message: msg,
                });
            }
        }
    }

    parsed
}

/// Parse a single JSONL line into an event. `Ok(None)` means the line was
/// valid JSON but not an event we extract from.
fn parse_line(line: &str) -> std::result::Result<Option<TranscriptEvent>, String> {
    let value: serde_json::Value =
        serde_json::from_str(line).map_err(|e| format!("invalid JSON: {e}"))?;

    let event_type = value
        .get("type")
        .and_then(|t| t.as_str())
        .ok_or_else(|| "missing \"type\" field".to_string())?;

    let timestamp = value
        .get("timestamp")
        .and_then(|t| t.as_str())
        .map(str::to_string);

    let (kind, text) = match event_type {
        "user" | "user_message" => {
            (EventKind::UserMessage, message_text(&value)?)
        }
        "assistant" | "assistant_message" => {
            (EventKind::AssistantMessage, message_text(&value)?)
        }
        "tool_use" => {
            let name = value.get("name").and_then(|n| n.as_str()).unwrap_or("");
            let input = value
                .get("input")
                .map(|i| i.to_string())
                .unwrap_or_default();
            (EventKind::ToolUse, format!("{name} {input}").trim().to_string())
        }
        "tool_result" => {
            let content = value
                .get("content")
                .map(content_text)
                .unwrap_or_default();
            (EventKind::ToolResult, content)
        }
        _ => return Ok(None),
    };

    if text.is_empty() {
        return Ok(None);
    }

    Ok(Some(TranscriptEvent {
        kind,
        text,
        timestamp,
        start: 0,
        end: 0,
    }))
}

/// Pull text out of a `{"message": {"content": ...}}` wrapper.
fn message_text(value: &serde_json::Value) -> std::result::Result<String, String> {
    let msg = value
        .get("message")
        .ok_or_else(|| "missing \"message\" field".to_string())?;
    Ok(content_text(
        msg.get("content").unwrap_or(&serde_json::Value::Null),
    ))
}

/// Extract plain text from message content: either a string or a list of
/// `{"type":"text","text":...}` blocks.
fn content_text(content: &serde_json::Value) -> String {
    match content {
        serde_json::Value::String(s) => s.trim().to_string(),
        serde_json::Value::Array(blocks) => {
            let parts: Vec<&str> = blocks
                .iter()
                .filter(|b| b.get("type").and_then(|t| t.as_str()) == Some("text"))
                .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
                .collect();
            parts.join(" ").trim().to_string()
        }
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = concat!(
        r#"{"type":"user","message":{"role":"user","content":"where does the deploy script live?"}}"#,
        "\n",
        r#"{"type":"assistant","message":{"role":"assistant","content":[{"type":"text","text":"It lives at infra/deploy.sh."}]}}"#,
        "\n",
        r#"{"type":"tool_use","name":"bash","input":{"command":"ls infra"}}"#,
        "\n",
        r#"{"type":"tool_result","content":"deploy.sh"}"#,
        "\n",
    );

    #[test]
    fn parses_all_event_kinds() {
        let parsed = parse_transcript(SAMPLE, 0);
        assert!(parsed.warnings.is_empty());
        assert_eq!(parsed.events.len(), 4);
        assert_eq!(parsed.events[0].kind, EventKind::UserMessage);
        assert_eq!(parsed.events[1].kind, EventKind::AssistantMessage);
        assert_eq!(parsed.events[1].text, "It lives at infra/deploy.sh.");
        assert_eq!(parsed.events[2].kind, EventKind::ToolUse);
        assert!(parsed.events[2].text.contains("bash"));
        assert_eq!(parsed.events[3].kind, EventKind::ToolResult);
    }

    #[test]
    fn event_spans_are_contiguous_and_absolute() {
        let parsed = parse_transcript(SAMPLE, 0);
        assert_eq!(parsed.events[0].start, 0);
        for pair in parsed.events.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
        assert_eq!(parsed.end_offset, SAMPLE.len() as u64);
        assert_eq!(parsed.committable_offset(), SAMPLE.len() as u64);
    }

    #[test]
    fn resumes_from_offset() {
        let full = parse_transcript(SAMPLE, 0);
        let resume_at = full.events[2].start;
        let parsed = parse_transcript(SAMPLE, resume_at);
        assert_eq!(parsed.events.len(), 2);
        assert_eq!(parsed.events[0].kind, EventKind::ToolUse);
    }

    #[test]
    fn malformed_line_is_warned_and_skipped() {
        let raw = format!(
            "{}not json at all\n{}",
            r#"{"type":"user","message":{"content":"first"}}
"#,
            r#"{"type":"user","message":{"content":"second"}}
"#
        );
        let parsed = parse_transcript(&raw, 0);
        // Extraction continues past the malformed line
        assert_eq!(parsed.events.len(), 2);
        assert_eq!(parsed.warnings.len(), 1);
        // ...but the marker must stop before it
        let malformed_at = parsed.first_malformed_offset.unwrap();
        assert_eq!(parsed.committable_offset(), malformed_at);
        assert!(malformed_at > 0);
        assert!(malformed_at < parsed.end_offset);
    }

    #[test]
    fn unknown_event_types_are_ignored() {
        let raw = r#"{"type":"summary","text":"ignored"}
{"type":"user","message":{"content":"kept"}}
"#;
        let parsed = parse_transcript(raw, 0);
        assert_eq!(parsed.events.len(), 1);
        assert!(parsed.warnings.is_empty());
    }

    #[test]
    fn missing_message_field_is_malformed() {
        let raw = "{\"type\":\"user\"}\n";
        let parsed = parse_transcript(raw, 0);
        assert!(parsed.events.is_empty());
        assert_eq!(parsed.warnings.len(), 1);
        assert_eq!(parsed.first_malformed_offset, Some(0));
    }

    #[test]
    fn empty_transcript_yields_nothing() {
        let parsed = parse_transcript("", 0);
        assert!(parsed.events.is_empty());
        assert_eq!(parsed.committable_offset(), 0);
    }
}
