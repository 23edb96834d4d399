//! Lenient JSON extraction from model prose.

/// The first balanced JSON object or array embedded in `text`.
///
/// Brackets inside string literals are ignored. Mismatched nesting or an
/// unterminated fragment yields `None`.
pub fn extract_json_snippet(text: &str) -> Option<&str> {
    let text = text.trim();
    let start = text.find(['{', '['])?;

    let mut stack = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' | '[' => stack.push(ch),
            '}' | ']' => {
                let Some(opener) = stack.pop() else {
                    continue;
                };
                if (opener == '{') != (ch == '}') {
                    return None;
                }
                if stack.is_empty() {
                    let end = start + offset + ch.len_utf8();
                    return Some(&text[start..end]);
                }
            }
            _ => {}
        }
    }
    None
}
