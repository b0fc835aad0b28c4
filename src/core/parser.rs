use serde_json::Value;

use super::store::types::Finding;

const DEFAULT_SUMMARY: &str = "Job completed";
const SUMMARY_MAX_CHARS: usize = 500;

#[derive(Debug, Clone)]
pub struct ParsedResponse {
    pub summary: String,
    pub findings: Vec<Finding>,
}

impl Default for ParsedResponse {
    fn default() -> Self {
        Self {
            summary: DEFAULT_SUMMARY.to_string(),
            findings: Vec::new(),
        }
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

/// Text of the last agent-authored message, skipping tool calls and tool
/// results. Content may be a plain string or a list of content blocks.
fn last_agent_message(state: &Value) -> Option<String> {
    let messages = state.get("messages")?.as_array()?;
    for msg in messages.iter().rev() {
        let role = msg
            .get("type")
            .or_else(|| msg.get("role"))
            .and_then(|r| r.as_str())
            .unwrap_or("");
        if role != "ai" && role != "assistant" {
            continue;
        }
        if msg
            .get("tool_calls")
            .and_then(|t| t.as_array())
            .is_some_and(|t| !t.is_empty())
        {
            continue;
        }

        let Some(content) = msg.get("content") else {
            continue;
        };
        let text = match content {
            Value::String(s) => s.clone(),
            Value::Array(blocks) => blocks
                .iter()
                .filter_map(|b| {
                    b.as_str()
                        .map(|s| s.to_string())
                        .or_else(|| b.get("text").and_then(|t| t.as_str()).map(|s| s.to_string()))
                })
                .collect::<Vec<_>>()
                .join("\n"),
            _ => continue,
        };
        if !text.trim().is_empty() {
            return Some(text);
        }
    }
    None
}

fn validated_findings(value: Option<&Value>) -> Vec<Finding> {
    let Some(list) = value.and_then(|v| v.as_array()) else {
        return Vec::new();
    };
    // Invalid entries are dropped, not fatal.
    list.iter()
        .filter_map(|f| serde_json::from_value::<Finding>(f.clone()).ok())
        .collect()
}

/// Extract `{summary, findings}` from the agent's final thread state. Total:
/// any input, including None and arbitrarily malformed text, yields a usable
/// result and never an error.
pub fn parse_agent_output(state: Option<&Value>) -> ParsedResponse {
    let Some(state) = state else {
        return ParsedResponse::default();
    };
    let Some(text) = last_agent_message(state) else {
        return ParsedResponse::default();
    };

    let fence = regex::Regex::new(r"(?s)```json\s*(.*?)```").unwrap();
    let Some(m) = fence.captures_iter(&text).last() else {
        // No fenced block at all: the raw text is the summary.
        return ParsedResponse {
            summary: truncate_chars(text.trim(), SUMMARY_MAX_CHARS),
            findings: Vec::new(),
        };
    };

    let block = m.get(1).map(|g| g.as_str()).unwrap_or("");
    match serde_json::from_str::<Value>(block) {
        Ok(parsed) => {
            let summary = parsed
                .get("summary")
                .and_then(|s| s.as_str())
                .filter(|s| !s.trim().is_empty())
                .map(|s| s.to_string())
                .unwrap_or_else(|| DEFAULT_SUMMARY.to_string());
            ParsedResponse {
                summary,
                findings: validated_findings(parsed.get("findings")),
            }
        }
        Err(_) => {
            // Malformed JSON: fall back to the prose around the block, or the
            // whole message when there is nothing else.
            let stripped = fence.replace_all(&text, "").trim().to_string();
            let fallback = if stripped.is_empty() {
                text.trim().to_string()
            } else {
                stripped
            };
            ParsedResponse {
                summary: truncate_chars(&fallback, SUMMARY_MAX_CHARS),
                findings: Vec::new(),
            }
        }
    }
}
