//! Tolerant fallback parsing for JSON-ish model output.
//!
//! Every pass is string-boundary aware: nothing inside a string literal is rewritten except
//! the delimiters and escapes of single-quoted literals being converted to double quotes.

use crate::json_extract::StringState;
use serde_json::Value;

fn strip_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut strings = StringState::default();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if strings.in_string() || c == '"' || c == '\'' {
            strings.feed(c);
            out.push(c);
            continue;
        }
        if c == '/' && chars.peek() == Some(&'/') {
            for next in chars.by_ref() {
                if next == '\n' {
                    out.push('\n');
                    break;
                }
            }
            continue;
        }
        if c == '/' && chars.peek() == Some(&'*') {
            chars.next();
            let mut prev = '\0';
            for next in chars.by_ref() {
                if prev == '*' && next == '/' {
                    break;
                }
                prev = next;
            }
            continue;
        }
        out.push(c);
    }
    out
}

/// Remove redundant outer braces such as `{{"edits": []}}` or `{ {"edits": []} }`.
fn collapse_double_braces(text: &str) -> String {
    let mut current = text.trim();
    loop {
        let Some(inner) = current
            .strip_prefix('{')
            .and_then(|rest| rest.strip_suffix('}'))
            .map(str::trim)
        else {
            break;
        };
        if inner.starts_with('{') && inner.ends_with('}') && is_single_object(inner) {
            current = inner;
        } else {
            break;
        }
    }
    current.to_string()
}

/// True when `text` (starting with `{`) closes its first object at its final character.
fn is_single_object(text: &str) -> bool {
    let mut strings = StringState::default();
    let mut depth = 0usize;
    for (idx, c) in text.char_indices() {
        if strings.feed(c) {
            continue;
        }
        match c {
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return idx + c.len_utf8() == text.len();
                }
            }
            _ => {}
        }
    }
    false
}

fn single_to_double_quotes(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        match c {
            '"' => {
                out.push('"');
                let mut escape = false;
                for next in chars.by_ref() {
                    out.push(next);
                    if escape {
                        escape = false;
                    } else if next == '\\' {
                        escape = true;
                    } else if next == '"' {
                        break;
                    }
                }
            }
            '\'' => {
                out.push('"');
                let mut escape = false;
                for next in chars.by_ref() {
                    if escape {
                        escape = false;
                        if next == '\'' {
                            out.pop();
                            out.push('\'');
                        } else {
                            out.push(next);
                        }
                        continue;
                    }
                    match next {
                        '\\' => {
                            escape = true;
                            out.push('\\');
                        }
                        '\'' => {
                            out.push('"');
                            break;
                        }
                        '"' => out.push_str("\\\""),
                        '\n' => out.push_str("\\n"),
                        '\r' => out.push_str("\\r"),
                        '\t' => out.push_str("\\t"),
                        _ => out.push(next),
                    }
                }
            }
            _ => out.push(c),
        }
    }
    out
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == '$'
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$' || c == '-'
}

fn quote_bare_keys(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len() + 16);
    let mut strings = StringState::default();
    let mut last_significant: Option<char> = None;
    let mut idx = 0usize;

    while idx < chars.len() {
        let c = chars[idx];
        if strings.feed(c) {
            out.push(c);
            if !strings.in_string() {
                last_significant = Some(c);
            }
            idx += 1;
            continue;
        }

        if is_ident_start(c) && matches!(last_significant, Some('{') | Some(',')) {
            let mut end = idx;
            while end < chars.len() && is_ident_continue(chars[end]) {
                end += 1;
            }
            let mut colon = end;
            while colon < chars.len() && chars[colon].is_whitespace() {
                colon += 1;
            }
            if colon < chars.len() && chars[colon] == ':' {
                out.push('"');
                out.extend(&chars[idx..end]);
                out.push('"');
                last_significant = Some('"');
                idx = end;
                continue;
            }
        }

        out.push(c);
        if !c.is_whitespace() {
            last_significant = Some(c);
        }
        idx += 1;
    }
    out
}

fn strip_trailing_commas(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut strings = StringState::default();

    for (idx, &c) in chars.iter().enumerate() {
        if strings.feed(c) {
            out.push(c);
            continue;
        }
        if c == ',' {
            let next = chars[idx + 1..].iter().find(|ch| !ch.is_whitespace());
            if matches!(next, Some('}') | Some(']')) {
                continue;
            }
        }
        out.push(c);
    }
    out
}

const PASSES: [fn(&str) -> String; 5] = [
    strip_comments,
    collapse_double_braces,
    single_to_double_quotes,
    quote_bare_keys,
    strip_trailing_commas,
];

/// Apply every repair pass and return the rewritten text.
///
/// Repairing already-canonical JSON returns it unchanged.
pub fn repair_loose_json(text: &str) -> String {
    PASSES
        .iter()
        .fold(text.to_string(), |current, pass| pass(&current))
}

/// Best-effort parse of text that failed strict parsing.
///
/// Strict parsing is retried after each cumulative pass. Returns `None` rather than
/// guessing when no pass produces valid JSON.
pub fn try_parse_loose_json(text: &str) -> Option<Value> {
    if let Ok(value) = serde_json::from_str::<Value>(text) {
        return Some(value);
    }
    let mut current = text.to_string();
    for pass in PASSES {
        current = pass(&current);
        if let Ok(value) = serde_json::from_str::<Value>(&current) {
            return Some(value);
        }
    }
    None
}
