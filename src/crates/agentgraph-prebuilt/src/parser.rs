//! ReAct response parser
//!
//! Scans an LLM response for line-anchored markers in priority order
//! `Final Answer:`, `Thought:`, `Action:`, `Action Input:`. The action is a
//! token up to end of line and may use the inline call form
//! `tool_name(a=1, b="x")`. Action input is parsed as JSON first, falling
//! back to a loose `k=v, k=v` list (the fallback is logged) after trimming a
//! trailing `Observation:`.
//!
//! A line that precedes any marker is treated as an implicit thought, which
//! keeps responses from models that skip the `Thought:` prefix usable.

use serde_json::Value;
use tracing::debug;

/// A tool invocation extracted from a response
#[derive(Debug, Clone, PartialEq)]
pub struct ActionCall {
    pub tool: String,
    pub input: Value,
}

/// Structured view of one LLM response
#[derive(Debug, Clone, Default)]
pub struct ParsedResponse {
    pub thought: Option<String>,
    pub action: Option<ActionCall>,
    pub final_answer: Option<String>,
    /// A `Thought:` marker was present but its content was empty
    pub has_empty_thought: bool,
}

impl ParsedResponse {
    pub fn has_final_answer(&self) -> bool {
        self.final_answer
            .as_ref()
            .map_or(false, |answer| !answer.trim().is_empty())
    }

    /// Reserialize into the canonical marker grammar. Parsing the result
    /// again yields the same tokens.
    pub fn to_transcript(&self) -> String {
        let mut lines = Vec::new();
        if let Some(thought) = &self.thought {
            lines.push(format!("Thought: {}", thought));
        }
        if let Some(action) = &self.action {
            lines.push(format!("Action: {}", action.tool));
            lines.push(format!("Action Input: {}", action.input));
        }
        if let Some(answer) = &self.final_answer {
            lines.push(format!("Final Answer: {}", answer));
        }
        lines.join("\n")
    }
}

/// Parser for ReAct-formatted LLM output
#[derive(Debug, Clone, Default)]
pub struct ReactParser;

impl ReactParser {
    pub fn new() -> Self {
        Self
    }

    pub fn parse(&self, response: &str) -> ParsedResponse {
        let mut thought: Option<String> = None;
        let mut thought_found = false;
        let mut action_name: Option<String> = None;
        let mut action_input_lines: Vec<String> = Vec::new();
        let mut collecting_input = false;
        let mut final_answer: Option<String> = None;

        for raw_line in response.lines() {
            let line = raw_line.trim();
            if line.is_empty() {
                continue;
            }

            if let Some(rest) = line.strip_prefix("Final Answer:") {
                final_answer = Some(rest.trim().to_string());
                collecting_input = false;
            } else if let Some(rest) = line.strip_prefix("Thought:") {
                thought = Some(rest.trim().to_string());
                thought_found = true;
                collecting_input = false;
            } else if let Some(rest) = line.strip_prefix("Action Input:") {
                action_input_lines.push(rest.trim().to_string());
                collecting_input = true;
            } else if let Some(rest) = line.strip_prefix("Action:") {
                action_name = Some(rest.trim().to_string());
                collecting_input = false;
            } else if line.starts_with("Observation:") {
                collecting_input = false;
            } else if collecting_input {
                // Multi-line action input continues until the next marker
                action_input_lines.push(line.to_string());
            } else if !thought_found {
                // Implicit thought: content before any marker
                thought = Some(line.to_string());
                thought_found = true;
            }
        }

        let has_empty_thought = thought_found
            && thought
                .as_ref()
                .map_or(true, |content| content.trim().is_empty());

        let action = action_name.and_then(|name| {
            let input_text = action_input_lines.join("\n");
            self.build_action(&name, &input_text)
        });

        ParsedResponse {
            thought,
            action,
            final_answer,
            has_empty_thought,
        }
    }

    fn build_action(&self, name: &str, input_text: &str) -> Option<ActionCall> {
        let name = name.trim();
        if name.is_empty() {
            return None;
        }

        // Inline call form: tool_name(a=1, b="x")
        if let Some(open) = name.find('(') {
            if let Some(close) = name.rfind(')') {
                if close > open {
                    let tool = name[..open].trim().to_string();
                    let args = &name[open + 1..close];
                    if tool.is_empty() {
                        return None;
                    }
                    return Some(ActionCall {
                        tool,
                        input: parse_loose_kv(args),
                    });
                }
            }
        }

        // Token up to end of line; anything after whitespace is dropped
        let tool = name.split_whitespace().next()?.to_string();
        Some(ActionCall {
            tool,
            input: self.parse_action_input(input_text),
        })
    }

    /// JSON first, loose `k=v` second. A trailing `Observation:` left in the
    /// captured text is trimmed before parsing.
    pub fn parse_action_input(&self, text: &str) -> Value {
        let mut trimmed = text.trim();
        if let Some(stripped) = trimmed.strip_suffix("Observation:") {
            trimmed = stripped.trim_end();
        }

        if trimmed.is_empty() {
            return Value::Object(serde_json::Map::new());
        }

        match serde_json::from_str::<Value>(trimmed) {
            Ok(value) => value,
            Err(e) => {
                debug!(error = %e, input = trimmed, "Action input is not JSON; using loose k=v parse");
                parse_loose_kv(trimmed)
            }
        }
    }
}

/// Parse `a=1, b="x"` into an object of string values. Text without any
/// `=` becomes `{"input": <text>}`.
fn parse_loose_kv(text: &str) -> Value {
    let text = text.trim();
    if text.is_empty() {
        return Value::Object(serde_json::Map::new());
    }
    if !text.contains('=') {
        return serde_json::json!({"input": text});
    }

    let mut map = serde_json::Map::new();
    for pair in text.split(',') {
        if let Some((key, value)) = pair.split_once('=') {
            let key = key.trim().to_string();
            let value = value.trim().trim_matches(|c| c == '"' || c == '\'');
            if !key.is_empty() {
                map.insert(key, Value::String(value.to_string()));
            }
        }
    }
    Value::Object(map)
}
