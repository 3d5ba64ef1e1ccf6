//! Tolerant JSON extraction from model output.
//!
//! Small local models wrap JSON in code fences, prepend prose, leave
//! trailing commas, forget closing braces, and emit unescaped quotes
//! inside `code` string arguments. The helpers here are deterministic
//! and side-effect-free; all side effects happen via the tool gateway.

use serde_json::Value;

use crate::domain::models::ToolCallRequest;

/// Extract the JSON object payload from a model response.
///
/// Handles ```json fences, bare fences, and JSON embedded in prose.
pub fn extract_json_object(response: &str) -> String {
    let trimmed = response.trim();

    if let Some(rest) = trimmed.strip_prefix("```json") {
        if let Some(end) = rest.rfind("```") {
            return rest[..end].trim().to_string();
        }
    }

    if let Some(rest) = trimmed.strip_prefix("```") {
        if let Some(end) = rest.rfind("```") {
            return rest[..end].trim().to_string();
        }
    }

    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        return trimmed.to_string();
    }

    // JSON embedded in surrounding prose.
    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if end > start {
            return trimmed[start..=end].to_string();
        }
    }

    trimmed.to_string()
}

/// Parse JSON, applying progressively heavier repairs on failure:
/// raw newlines inside strings, trailing commas, unbalanced braces,
/// unescaped quotes inside `code` string values.
pub fn parse_lenient(s: &str) -> Option<Value> {
    if let Ok(val) = serde_json::from_str::<Value>(s) {
        return Some(val);
    }

    let multiline_removed = escape_raw_newlines(s);
    if let Ok(val) = serde_json::from_str::<Value>(&multiline_removed) {
        return Some(val);
    }

    let comma_cleaned = remove_trailing_commas(&multiline_removed);
    if let Ok(val) = serde_json::from_str::<Value>(&comma_cleaned) {
        return Some(val);
    }

    let balanced = balance_braces(&comma_cleaned);
    if let Ok(val) = serde_json::from_str::<Value>(&balanced) {
        return Some(val);
    }

    let code_repaired = repair_code_strings(s)?;
    serde_json::from_str(&escape_raw_newlines(&code_repaired)).ok()
}

/// Scan free-form text for tool-call objects of the shape
/// `{"name": "...", "arguments": {...}}` and return every well-formed
/// match in order of appearance.
pub fn extract_tool_calls(text: &str) -> Vec<ToolCallRequest> {
    let mut calls = Vec::new();
    let bytes = text.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'{' {
            i += 1;
            continue;
        }
        match balanced_object_at(text, i) {
            Some(end) => {
                let candidate = &text[i..end];
                if let Some(call) = tool_call_from_object(candidate) {
                    calls.push(call);
                    i = end;
                    continue;
                }
                // Not a tool call; step inside so nested objects are still seen.
                i += 1;
            }
            None => i += 1,
        }
    }

    calls
}

/// Find the end (exclusive) of a balanced JSON object starting at `start`,
/// tracking string state so braces inside strings do not count.
fn balanced_object_at(text: &str, start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        match c {
            '"' if !escaped => in_string = !in_string,
            '\\' if in_string => {
                escaped = !escaped;
                continue;
            }
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(start + offset + 1);
                }
            }
            _ => {}
        }
        escaped = false;
    }
    None
}

/// Interpret one balanced object as a tool call, applying lenient
/// repairs before giving up.
fn tool_call_from_object(candidate: &str) -> Option<ToolCallRequest> {
    let value = parse_lenient(candidate)?;
    let obj = value.as_object()?;
    let name = obj.get("name")?.as_str()?.to_string();
    if name.is_empty() {
        return None;
    }
    let arguments = obj
        .get("arguments")
        .cloned()
        .unwrap_or_else(|| Value::Object(serde_json::Map::new()));
    if !arguments.is_object() {
        return None;
    }
    Some(ToolCallRequest { name, arguments })
}

/// Escape raw newlines that appear inside string literals.
fn escape_raw_newlines(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_string = false;
    let mut escaped = false;

    for c in s.chars() {
        match c {
            '"' if !escaped => {
                in_string = !in_string;
                out.push(c);
            }
            '\\' if in_string => {
                escaped = !escaped;
                out.push(c);
                continue;
            }
            '\n' if in_string => out.push_str("\\n"),
            '\t' if in_string => out.push_str("\\t"),
            '\r' if in_string => out.push_str("\\r"),
            _ => out.push(c),
        }
        escaped = false;
    }
    out
}

/// Drop commas directly preceding a closing brace or bracket.
fn remove_trailing_commas(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    let mut in_string = false;
    let mut escaped = false;

    while let Some(c) = chars.next() {
        match c {
            '"' if !escaped => {
                in_string = !in_string;
                out.push(c);
            }
            '\\' if in_string => {
                escaped = !escaped;
                out.push(c);
                continue;
            }
            ',' if !in_string => {
                if let Some(next) = chars.clone().find(|c| !c.is_whitespace()) {
                    if next == '}' || next == ']' {
                        continue;
                    }
                }
                out.push(c);
            }
            _ => out.push(c),
        }
        escaped = false;
    }
    out
}

/// Append closing braces/brackets for structures the model left open.
/// Returns the input unchanged when closers are mismatched.
fn balance_braces(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 4);
    let mut stack = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for c in s.chars() {
        match c {
            '"' if !escaped => in_string = !in_string,
            '{' if !in_string => stack.push('}'),
            '[' if !in_string => stack.push(']'),
            '}' | ']' if !in_string => {
                if stack.pop() != Some(c) {
                    return s.to_string();
                }
            }
            '\\' if in_string => {
                escaped = !escaped;
                out.push(c);
                continue;
            }
            _ => {}
        }
        escaped = false;
        out.push(c);
    }

    while let Some(closer) = stack.pop() {
        out.push(closer);
    }
    out
}

/// Repair unescaped quotes inside a `"code": "..."` string value.
///
/// The value span is recovered by taking the last quote whose following
/// non-whitespace character closes the value (`,` or `}`), then the raw
/// span is re-escaped. This is the common failure for SHELL_EXECUTOR
/// batch programs, e.g. `{"code": "print("hi")"}`.
fn repair_code_strings(s: &str) -> Option<String> {
    let key_pos = s.find("\"code\"")?;
    let after_key = &s[key_pos + 6..];
    let colon = after_key.find(':')?;
    let after_colon = &after_key[colon + 1..];
    let open_rel = after_colon.find('"')?;
    let value_start = key_pos + 6 + colon + 1 + open_rel + 1;

    // Last candidate terminator: a quote followed (after whitespace) by
    // ',' or '}'.
    let mut value_end = None;
    for (idx, c) in s[value_start..].char_indices() {
        if c != '"' {
            continue;
        }
        let abs = value_start + idx;
        if let Some(next) = s[abs + 1..].chars().find(|c| !c.is_whitespace()) {
            if next == ',' || next == '}' {
                value_end = Some(abs);
            }
        } else {
            value_end = Some(abs);
        }
    }
    let value_end = value_end?;

    let raw = &s[value_start..value_end];
    let mut escaped_value = String::with_capacity(raw.len() + 8);
    for c in raw.chars() {
        match c {
            '"' => escaped_value.push_str("\\\""),
            '\\' => escaped_value.push_str("\\\\"),
            '\n' => escaped_value.push_str("\\n"),
            '\t' => escaped_value.push_str("\\t"),
            '\r' => escaped_value.push_str("\\r"),
            _ => escaped_value.push(c),
        }
    }

    let mut repaired = String::with_capacity(s.len() + 8);
    repaired.push_str(&s[..value_start]);
    repaired.push_str(&escaped_value);
    repaired.push_str(&s[value_end..]);
    Some(repaired)
}
