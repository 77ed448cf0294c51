//! Small text helpers shared across crates.

/// The first `max_chars` characters of `text`, marked when anything was cut.
pub fn clip(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{} [truncated]", &text[..cut]),
        None => text.to_string(),
    }
}

/// Head and tail of `content` within `max_chars`, joined by a line saying how much was left out.
pub fn head_and_tail(content: &str, max_chars: usize) -> String {
    let total = content.chars().count();
    if total <= max_chars {
        return content.to_string();
    }
    let keep = max_chars / 2;
    let byte_at = |chars: usize| {
        content
            .char_indices()
            .nth(chars)
            .map_or(content.len(), |(i, _)| i)
    };
    let head_end = byte_at(keep);
    let tail_start = byte_at(total - keep);
    format!(
        "{}\n\n... [{} chars omitted] ...\n\n{}",
        &content[..head_end],
        total - 2 * keep,
        &content[tail_start..]
    )
}

/// Make a full-file rewrite end the way the file it replaces did.
pub fn match_trailing_newline(original: &str, content: String) -> String {
    let mut normalized = content;
    if original.ends_with('\n') {
        if !normalized.ends_with('\n') {
            normalized.push_str(if original.ends_with("\r\n") { "\r\n" } else { "\n" });
        }
    } else {
        loop {
            let cut = if normalized.ends_with("\r\n") {
                2
            } else if normalized.ends_with('\n') {
                1
            } else {
                break;
            };
            normalized.truncate(normalized.len() - cut);
        }
    }
    normalized
}
