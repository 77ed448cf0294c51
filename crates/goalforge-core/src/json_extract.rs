//! Balanced JSON span extraction from free-form model output.

/// String-literal tracker shared by the extractor and the loose repair passes.
///
/// Both quote styles open a literal; a literal only closes on its own delimiter.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct StringState {
    quote: Option<char>,
    escape: bool,
}

impl StringState {
    pub(crate) fn in_string(&self) -> bool {
        self.quote.is_some()
    }

    /// Feed one character. Returns true when the character is part of a string literal,
    /// delimiters included.
    pub(crate) fn feed(&mut self, c: char) -> bool {
        match self.quote {
            Some(open) => {
                if self.escape {
                    self.escape = false;
                } else if c == '\\' {
                    self.escape = true;
                } else if c == open {
                    self.quote = None;
                }
                true
            }
            None => {
                if c == '"' || c == '\'' {
                    self.quote = Some(c);
                    true
                } else {
                    false
                }
            }
        }
    }
}

#[derive(Debug, Default)]
struct ScanState {
    strings: StringState,
    depth: usize,
}

/// Return the first balanced JSON object or array in `text`.
///
/// Scanning starts at the first `{` or `[`. Inside the span, `//` and `/* */` comments are
/// skipped, but an unterminated comment fails the extraction rather than being repaired.
pub fn extract_json(text: &str) -> Option<&str> {
    let start = text.find(['{', '['])?;
    let body = &text[start..];
    let mut state = ScanState::default();
    let mut chars = body.char_indices().peekable();

    while let Some((idx, c)) = chars.next() {
        if state.strings.in_string() {
            state.strings.feed(c);
            continue;
        }

        match c {
            '"' | '\'' => {
                state.strings.feed(c);
            }
            '/' if matches!(chars.peek(), Some((_, '/'))) => {
                let mut terminated = false;
                for (_, next) in chars.by_ref() {
                    if next == '\n' {
                        terminated = true;
                        break;
                    }
                }
                if !terminated {
                    return None;
                }
            }
            '/' if matches!(chars.peek(), Some((_, '*'))) => {
                chars.next();
                let mut prev = '\0';
                let mut terminated = false;
                for (_, next) in chars.by_ref() {
                    if prev == '*' && next == '/' {
                        terminated = true;
                        break;
                    }
                    prev = next;
                }
                if !terminated {
                    return None;
                }
            }
            '{' | '[' => state.depth += 1,
            '}' | ']' => {
                state.depth = state.depth.saturating_sub(1);
                if state.depth == 0 {
                    return Some(&body[..idx + c.len_utf8()]);
                }
            }
            _ => {}
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_object_after_prose() {
        let text = "Sure! Here you go: {\"edits\": []} hope that helps";
        assert_eq!(extract_json(text), Some("{\"edits\": []}"));
    }

    #[test]
    fn test_ignores_braces_inside_strings() {
        let text = r#"{"search": "fn a() {", "replace": "}"} trailing"#;
        assert_eq!(
            extract_json(text),
            Some(r#"{"search": "fn a() {", "replace": "}"}"#)
        );
    }

    #[test]
    fn test_respects_escaped_quotes() {
        let text = r#"{"a": "quote \" { inside"}"#;
        assert_eq!(extract_json(text), Some(text));
    }

    #[test]
    fn test_single_quoted_strings_are_tracked() {
        let text = "{'a': '}'} rest";
        assert_eq!(extract_json(text), Some("{'a': '}'}"));
    }

    #[test]
    fn test_array_is_extracted() {
        let text = "edits:\n[{\"type\": \"delete\", \"path\": \"x\"}]";
        assert_eq!(
            extract_json(text),
            Some("[{\"type\": \"delete\", \"path\": \"x\"}]")
        );
    }

    #[test]
    fn test_comments_are_inert() {
        let text = "{\n  // the edits\n  \"edits\": [] /* none } */\n}";
        assert_eq!(extract_json(text), Some(text));
    }

    #[test]
    fn test_unterminated_line_comment_fails() {
        assert_eq!(extract_json("{\"edits\": [] // trailing"), None);
    }

    #[test]
    fn test_unterminated_block_comment_fails() {
        assert_eq!(extract_json("{\"edits\": [] /* never closed }"), None);
    }

    #[test]
    fn test_unbalanced_returns_none() {
        assert_eq!(extract_json("{\"edits\": [{\"type\": \"modify\""), None);
        assert_eq!(extract_json("no json here"), None);
    }
}
