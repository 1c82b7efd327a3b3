/// Plan schema: the contract for the action list the model emits.
///
/// A reply is resolved exactly once per turn into `Reply::Chat` or `Reply::Plan`.
/// The model is untrusted input: an action of unknown kind, or one missing a
/// required field, rejects the whole plan. Nothing is coerced.
///
/// Accepted plan shapes (inside a ```json fence, or as the whole reply):
///   {"actions": [ {...}, ... ]}
///   [ {...}, ... ]                (any element carrying "command")
///   {"command": "...", ...}       (a single action)
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::PlanError;

// ── Action ────────────────────────────────────────────────────────────────────

/// Closed set of actions. The JSON tag is the `command` key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Action {
    /// Write a file, creating parent directories as needed.
    CreateFile { path: String, content: String },
    /// Change an existing file: full replacement (`content`) or a unified diff (`diff`).
    EditFile {
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        diff: Option<String>,
    },
    /// Run a shell command to check the work.
    Test {
        test_command: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_secs: Option<u64>,
    },
}

const KNOWN_COMMANDS: &[&str] = &["create_file", "edit_file", "test"];

impl Action {
    pub fn kind(&self) -> &'static str {
        match self {
            Action::CreateFile { .. } => "create_file",
            Action::EditFile { .. } => "edit_file",
            Action::Test { .. } => "test",
        }
    }

    /// File the action touches, if any.
    pub fn path(&self) -> Option<&str> {
        match self {
            Action::CreateFile { path, .. } | Action::EditFile { path, .. } => Some(path),
            Action::Test { .. } => None,
        }
    }

    /// One-line description for lists and result summaries.
    pub fn summary(&self) -> String {
        match self {
            Action::CreateFile { path, content } => {
                format!("create_file {path} ({} lines)", content.lines().count())
            }
            Action::EditFile { path, diff: Some(_), .. } => format!("edit_file {path} (patch)"),
            Action::EditFile { path, .. } => format!("edit_file {path} (full replacement)"),
            Action::Test { test_command, .. } => format!("test `{test_command}`"),
        }
    }

    /// Semantic checks serde cannot express.
    fn check(&self) -> Result<(), String> {
        if let Some(path) = self.path() {
            if path.trim().is_empty() {
                return Err(format!("{}: 'path' is empty", self.kind()));
            }
        }
        match self {
            Action::EditFile { content, diff, .. } => match (content, diff) {
                (None, None) => Err("edit_file: needs either 'content' or 'diff'".to_string()),
                (Some(_), Some(_)) => {
                    Err("edit_file: give 'content' or 'diff', not both".to_string())
                }
                (None, Some(d)) if d.trim().is_empty() => {
                    Err("edit_file: 'diff' is empty".to_string())
                }
                _ => Ok(()),
            },
            Action::Test { test_command, .. } if test_command.trim().is_empty() => {
                Err("test: 'test_command' is empty".to_string())
            }
            _ => Ok(()),
        }
    }
}

// ── Plan / Reply ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub actions: Vec<Action>,
    /// Prose around the JSON. Displayed, never executed.
    pub explanation: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Chat(String),
    Plan(Plan),
}

/// Resolve a model reply into chat text or a validated plan.
pub fn parse_reply(raw: &str) -> Result<Reply, PlanError> {
    let text = strip_reasoning(raw);

    let Some((candidate, explanation)) = extract_candidate(&text) else {
        return Ok(Reply::Chat(text.trim().to_string()));
    };

    let value: Value = serde_json::from_str(&sanitize_json_strings(candidate))?;

    let Some(items) = action_items(&value) else {
        // Well-formed JSON that isn't shaped like a plan (the user asked for JSON data)
        return Ok(Reply::Chat(text.trim().to_string()));
    };

    if items.is_empty() {
        return Err(PlanError::Empty);
    }

    let mut actions = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        actions.push(validate_action(index, item)?);
    }

    Ok(Reply::Plan(Plan { actions, explanation }))
}

/// Pull the action list out of any accepted plan shape.
/// Returns None if the value is not plan-shaped at all.
fn action_items(value: &Value) -> Option<Vec<Value>> {
    match value {
        Value::Object(obj) if obj.contains_key("actions") => match &obj["actions"] {
            Value::Array(items) => Some(items.clone()),
            // An `actions` key that isn't a list is still a plan, just a broken one
            other => Some(vec![other.clone()]),
        },
        Value::Object(obj) if obj.contains_key("command") => Some(vec![value.clone()]),
        Value::Array(items) => {
            // One action-shaped element is enough; the rest must then validate
            let looks_like_plan = items
                .iter()
                .filter_map(Value::as_object)
                .any(|o| o.contains_key("command"));
            looks_like_plan.then(|| items.clone())
        }
        _ => None,
    }
}

fn validate_action(index: usize, item: &Value) -> Result<Action, PlanError> {
    let invalid = |reason: String| PlanError::Invalid { index, reason };

    let obj = item
        .as_object()
        .ok_or_else(|| invalid("expected an object".to_string()))?;
    let command = obj
        .get("command")
        .and_then(Value::as_str)
        .ok_or_else(|| invalid("missing 'command'".to_string()))?;
    if !KNOWN_COMMANDS.contains(&command) {
        return Err(invalid(format!(
            "unknown command '{command}' (expected one of: {})",
            KNOWN_COMMANDS.join(", ")
        )));
    }

    let action: Action =
        serde_json::from_value(item.clone()).map_err(|e| invalid(format!("{command}: {e}")))?;
    action.check().map_err(invalid)?;
    Ok(action)
}

// ── Candidate extraction ──────────────────────────────────────────────────────

/// Find the JSON candidate in a reply: the first ```json fence (or an untagged
/// fence holding an object/array), else the whole reply if it is bare JSON.
/// Returns (candidate, surrounding prose).
fn extract_candidate(text: &str) -> Option<(&str, String)> {
    let mut search_from = 0;
    while let Some(rel) = text[search_from..].find("```") {
        let open = search_from + rel;
        let after_ticks = open + 3;
        let line_end = text[after_ticks..]
            .find('\n')
            .map(|i| after_ticks + i)
            .unwrap_or(text.len());
        let tag = text[after_ticks..line_end].trim();
        let body_start = (line_end + 1).min(text.len());
        let Some(close_rel) = text[body_start..].find("```") else {
            break;
        };
        let close = body_start + close_rel;
        let body = text[body_start..close].trim();

        let is_json = tag.eq_ignore_ascii_case("json")
            || (tag.is_empty() && (body.starts_with('{') || body.starts_with('[')));
        if is_json {
            let before = text[..open].trim();
            let after = text[close + 3..].trim();
            let explanation = match (before.is_empty(), after.is_empty()) {
                (true, true) => String::new(),
                (false, true) => before.to_string(),
                (true, false) => after.to_string(),
                (false, false) => format!("{before}\n\n{after}"),
            };
            return Some((body, explanation));
        }
        search_from = close + 3;
    }

    let trimmed = text.trim();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return Some((trimmed, String::new()));
    }
    None
}

/// Remove `<think>…</think>` blocks some reasoning models emit inline.
/// A dangling `</think>` (opening tag eaten by the chat template) drops everything before it.
pub fn strip_reasoning(text: &str) -> String {
    let mut rest = text;
    if let Some(end) = rest.find("</think>") {
        if !rest[..end].contains("<think>") {
            rest = &rest[end + "</think>".len()..];
        }
    }

    let mut out = String::with_capacity(rest.len());
    while let Some(start) = rest.find("<think>") {
        out.push_str(&rest[..start]);
        match rest[start..].find("</think>") {
            Some(end) => rest = &rest[start + end + "</think>".len()..],
            None => {
                rest = "";
                break;
            }
        }
    }
    out.push_str(rest);
    out
}

// ── JSON sanitizer ────────────────────────────────────────────────────────────

/// Escape raw control characters inside JSON string literals. Small local models
/// often put literal newlines in `content` values, which serde_json rejects.
fn sanitize_json_strings(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut in_string = false;
    let mut escaped = false;
    for ch in input.chars() {
        if escaped {
            out.push(ch);
            escaped = false;
            continue;
        }
        if ch == '\\' && in_string {
            out.push(ch);
            escaped = true;
            continue;
        }
        if ch == '"' {
            in_string = !in_string;
            out.push(ch);
            continue;
        }
        if in_string {
            match ch {
                '\n' => { out.push_str("\\n"); continue; }
                '\r' => { out.push_str("\\r"); continue; }
                '\t' => { out.push_str("\\t"); continue; }
                c if (c as u32) < 0x20 => {
                    out.push_str(&format!("\\u{:04x}", c as u32));
                    continue;
                }
                _ => {}
            }
        }
        out.push(ch);
    }
    out
}
