use regex::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;

/// Maximum length of a single chat message after cleaning.
pub const DEFAULT_MAX_MESSAGE_LENGTH: usize = 300;

fn control_chars() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[\x00-\x1F\x7F]").expect("control character pattern"))
}

fn code_spans() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?s)`{1,3}.*?`{1,3}").expect("code span pattern"))
}

fn markdown_marks() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[*_>#\-]+").expect("markdown pattern"))
}

/// Prepares one chat message for a prompt.
///
/// Control characters are dropped, whitespace runs collapse to a single
/// space, code spans are removed and markdown marks become spaces. The result
/// is cut to `max_length` characters.
pub fn clean_text(text: &str, max_length: usize) -> String {
    if text.is_empty() {
        return String::new();
    }

    let text = control_chars().replace_all(text, "");
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let text = code_spans().replace_all(&text, "");
    let text = markdown_marks().replace_all(&text, " ");

    text.chars().take(max_length).collect()
}

/// Extracts the JSON object a model embedded in free text.
///
/// Everything between the first `{` and the last `}` must parse as an
/// object; any other shape yields `None`.
pub fn safe_json_parse(text: &str) -> Option<Map<String, Value>> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }

    match serde_json::from_str::<Value>(&text[start..=end]) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}
