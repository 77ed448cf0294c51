//! Search/replace resolution against live file contents.
//!
//! Each pair must match exactly once. An exact match is tried first; failing that, both
//! sides are projected with all whitespace removed and matched again, and the hit is mapped
//! back to byte offsets in the original text so formatting outside the match is preserved.

use crate::edits::ReplacementPair;
use crate::util::clip;
use thiserror::Error;

/// Characters of search text quoted back in resolution errors.
pub const SNIPPET_CHARS: usize = 80;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReplacementError {
    #[error("Replacement {index}: search text not found. Searched for: {snippet:?}")]
    NotFound {
        index: usize,
        snippet: String,
        placeholder: bool,
    },
    #[error(
        "Replacement {index}: search text matches {occurrences} times (must be unique). Searched for: {snippet:?}"
    )]
    Ambiguous {
        index: usize,
        occurrences: usize,
        snippet: String,
    },
}

impl ReplacementError {
    /// 1-based position of the failing pair.
    pub fn index(&self) -> usize {
        match self {
            ReplacementError::NotFound { index, .. }
            | ReplacementError::Ambiguous { index, .. } => *index,
        }
    }

    pub fn snippet(&self) -> &str {
        match self {
            ReplacementError::NotFound { snippet, .. }
            | ReplacementError::Ambiguous { snippet, .. } => snippet,
        }
    }
}

enum MatchRange {
    None,
    One { start: usize, end: usize },
    Many(usize),
}

/// Byte offsets of every (possibly overlapping) occurrence of `needle`.
fn find_occurrences(haystack: &str, needle: &str) -> Vec<usize> {
    let mut found = Vec::new();
    let step = needle.chars().next().map(char::len_utf8).unwrap_or(1);
    let mut from = 0usize;
    while from <= haystack.len() {
        match haystack[from..].find(needle) {
            Some(rel) => {
                let at = from + rel;
                found.push(at);
                from = at + step;
            }
            None => break,
        }
    }
    found
}

fn find_unique_match_range(content: &str, needle: &str) -> MatchRange {
    let matches = find_occurrences(content, needle);
    match matches.len() {
        0 => MatchRange::None,
        1 => MatchRange::One {
            start: matches[0],
            end: matches[0] + needle.len(),
        },
        n => MatchRange::Many(n),
    }
}

/// Whitespace-free view of a text with a map back to original byte offsets.
struct StrippedProjection {
    text: String,
    /// For each byte of `text`: the original byte offset of the char it came from.
    starts: Vec<usize>,
    /// For each byte of `text`: the original byte offset just past that char.
    ends: Vec<usize>,
}

impl StrippedProjection {
    fn new(original: &str) -> Self {
        let mut text = String::with_capacity(original.len());
        let mut starts = Vec::with_capacity(original.len());
        let mut ends = Vec::with_capacity(original.len());
        for (offset, c) in original.char_indices() {
            if c.is_whitespace() {
                continue;
            }
            text.push(c);
            for _ in 0..c.len_utf8() {
                starts.push(offset);
                ends.push(offset + c.len_utf8());
            }
        }
        Self { text, starts, ends }
    }

    fn original_span(&self, start: usize, len: usize) -> (usize, usize) {
        (self.starts[start], self.ends[start + len - 1])
    }
}

fn strip_whitespace(text: &str) -> String {
    text.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Ellipsis placeholders (`...` / `…`) not attached to an identifier, as in
/// `if (ready) { ... }`. Spread syntax like `...args` is allowed.
fn search_looks_like_placeholder(search: &str) -> bool {
    let chars: Vec<char> = search.trim().chars().collect();
    let len = chars.len();
    let is_ident = |c: char| c.is_ascii_alphanumeric() || c == '_' || c == '$';
    let mut idx = 0usize;
    while idx < len {
        let ellipsis = idx + 2 < len && chars[idx..idx + 3] == ['.', '.', '.'];
        let end = if ellipsis {
            idx + 3
        } else if chars[idx] == '…' {
            idx + 1
        } else {
            idx += 1;
            continue;
        };
        let prev_is_ident = idx > 0 && is_ident(chars[idx - 1]);
        let next_is_ident = end < len && is_ident(chars[end]);
        if !(prev_is_ident || next_is_ident) {
            return true;
        }
        idx = end;
    }
    false
}

fn resolve_pair(
    content: &str,
    pair: &ReplacementPair,
    index: usize,
) -> Result<String, ReplacementError> {
    let snippet = || clip(&pair.search, SNIPPET_CHARS);

    if pair.search.is_empty() {
        if content.is_empty() {
            return Ok(pair.replace.clone());
        }
        return Err(ReplacementError::Ambiguous {
            index,
            occurrences: content.chars().count() + 1,
            snippet: snippet(),
        });
    }

    match find_unique_match_range(content, &pair.search) {
        MatchRange::One { start, end } => {
            let mut updated = content.to_string();
            updated.replace_range(start..end, &pair.replace);
            return Ok(updated);
        }
        MatchRange::Many(occurrences) => {
            return Err(ReplacementError::Ambiguous {
                index,
                occurrences,
                snippet: snippet(),
            });
        }
        MatchRange::None => {}
    }

    if search_looks_like_placeholder(&pair.search) {
        return Err(ReplacementError::NotFound {
            index,
            snippet: snippet(),
            placeholder: true,
        });
    }

    let needle = strip_whitespace(&pair.search);
    if needle.is_empty() {
        return Err(ReplacementError::NotFound {
            index,
            snippet: snippet(),
            placeholder: false,
        });
    }

    let projection = StrippedProjection::new(content);
    match find_unique_match_range(&projection.text, &needle) {
        MatchRange::One { start, .. } => {
            let (orig_start, orig_end) = projection.original_span(start, needle.len());
            let mut updated = content.to_string();
            updated.replace_range(orig_start..orig_end, &pair.replace);
            Ok(updated)
        }
        MatchRange::Many(occurrences) => Err(ReplacementError::Ambiguous {
            index,
            occurrences,
            snippet: snippet(),
        }),
        MatchRange::None => Err(ReplacementError::NotFound {
            index,
            snippet: snippet(),
            placeholder: false,
        }),
    }
}

/// Apply `pairs` in order; each pair sees the output of the previous ones.
pub fn resolve_replacements(
    original: &str,
    pairs: &[ReplacementPair],
) -> Result<String, ReplacementError> {
    let mut current = original.to_string();
    for (i, pair) in pairs.iter().enumerate() {
        current = resolve_pair(&current, pair, i + 1)?;
    }
    Ok(current)
}
