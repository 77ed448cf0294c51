//! Canonicalizes raw model output before JSON extraction.
//!
//! Models routinely wrap JSON in markdown fences, use typographic quotes as string
//! delimiters, and emit raw newlines inside string literals. This pass fixes those without
//! touching the content of well-formed string literals.

/// Strip a surrounding markdown code fence (```json ... ```), if present.
fn strip_markdown_fences(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(without_open) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let after_header = match without_open.find('\n') {
        Some(newline_idx) => &without_open[newline_idx + 1..],
        None => without_open,
    };
    match after_header.rfind("```") {
        Some(end_idx) => after_header[..end_idx].trim(),
        None => after_header.trim(),
    }
}

fn is_unicode_space(c: char) -> bool {
    matches!(
        c,
        '\u{00A0}' | '\u{2000}'..='\u{200A}' | '\u{202F}' | '\u{205F}' | '\u{3000}'
    )
}

fn is_zero_width(c: char) -> bool {
    matches!(c, '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{2060}' | '\u{FEFF}')
}

fn is_curly_double(c: char) -> bool {
    matches!(c, '\u{201C}' | '\u{201D}' | '\u{201E}' | '\u{201F}')
}

fn is_curly_single(c: char) -> bool {
    matches!(c, '\u{2018}' | '\u{2019}' | '\u{201A}' | '\u{201B}')
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Delimiter {
    Ascii,
    Curly,
}

fn push_escaped_control(out: &mut String, c: char) {
    match c {
        '\n' => out.push_str("\\n"),
        '\r' => out.push_str("\\r"),
        '\t' => out.push_str("\\t"),
        other => out.push_str(&format!("\\u{:04x}", other as u32)),
    }
}

/// Normalize a model response into text that is safe to hand to the JSON extractor.
///
/// Outside string literals: curly quotes become ASCII, unicode spaces become `' '`, and
/// zero-width characters are dropped. Inside string literals: raw control characters are
/// escaped and everything else is preserved. String tracking only starts at the first `{`
/// or `[`, so apostrophes and quotes in leading prose cannot desynchronize it.
pub fn normalize_response(raw: &str) -> String {
    let text = strip_markdown_fences(raw.trim_start_matches('\u{FEFF}'));
    let mut out = String::with_capacity(text.len());
    let mut json_started = false;
    let mut delimiter: Option<Delimiter> = None;
    let mut escape = false;

    for c in text.chars() {
        if let Some(open) = delimiter {
            if escape {
                escape = false;
                out.push(c);
                continue;
            }
            match c {
                '\\' => {
                    escape = true;
                    out.push(c);
                }
                '"' if open == Delimiter::Ascii => {
                    delimiter = None;
                    out.push('"');
                }
                '"' => out.push_str("\\\""),
                c if open == Delimiter::Curly && is_curly_double(c) => {
                    delimiter = None;
                    out.push('"');
                }
                c if c.is_control() && (c as u32) < 0x20 => push_escaped_control(&mut out, c),
                _ => out.push(c),
            }
            continue;
        }

        if is_zero_width(c) {
            continue;
        }
        if is_unicode_space(c) {
            out.push(' ');
            continue;
        }
        if is_curly_single(c) {
            out.push('\'');
            continue;
        }
        if !json_started {
            if c == '{' || c == '[' {
                json_started = true;
            }
            if is_curly_double(c) {
                out.push('"');
            } else {
                out.push(c);
            }
            continue;
        }

        match c {
            '"' => {
                delimiter = Some(Delimiter::Ascii);
                out.push('"');
            }
            c if is_curly_double(c) => {
                delimiter = Some(Delimiter::Curly);
                out.push('"');
            }
            _ => out.push(c),
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_json_fence() {
        let raw = "```json\n{\"edits\": []}\n```";
        assert_eq!(normalize_response(raw), "{\"edits\": []}");
    }

    #[test]
    fn test_curly_delimiters_become_ascii() {
        let raw = "{\u{201C}path\u{201D}: \u{201C}a.js\u{201D}}";
        assert_eq!(normalize_response(raw), "{\"path\": \"a.js\"}");
    }

    #[test]
    fn test_curly_quotes_inside_ascii_string_are_preserved() {
        let raw = "{\"replace\": \"say \u{201C}hi\u{201D}\"}";
        assert_eq!(normalize_response(raw), raw);
    }

    #[test]
    fn test_raw_newlines_inside_strings_are_escaped() {
        let raw = "{\"content\": \"line one\nline two\tend\"}";
        assert_eq!(
            normalize_response(raw),
            "{\"content\": \"line one\\nline two\\tend\"}"
        );
    }

    #[test]
    fn test_newlines_between_tokens_are_kept() {
        let raw = "{\n  \"edits\": []\n}";
        assert_eq!(normalize_response(raw), raw);
    }

    #[test]
    fn test_apostrophe_in_leading_prose_does_not_open_string() {
        let raw = "Here's the plan:\n{\"a\": \"x\ny\"}";
        assert_eq!(normalize_response(raw), "Here's the plan:\n{\"a\": \"x\\ny\"}");
    }

    #[test]
    fn test_unicode_spaces_outside_strings_are_normalized() {
        let raw = "{\u{00A0}\"a\":\u{200B}1}";
        assert_eq!(normalize_response(raw), "{ \"a\":1}");
    }

    #[test]
    fn test_ascii_quote_inside_curly_string_is_escaped() {
        let raw = "{\"a\": \u{201C}say \"x\"\u{201D}}";
        assert_eq!(normalize_response(raw), "{\"a\": \"say \\\"x\\\"\"}");
    }
}
