use regex::Regex;
use std::sync::OnceLock;

fn word_pattern() -> Option<&'static Regex> {
    static WORD: OnceLock<Option<Regex>> = OnceLock::new();
    WORD.get_or_init(|| Regex::new(r"\w+").ok()).as_ref()
}

/// Lowercase word tokenization shared by lexical indexing and querying
///
/// A token is a maximal run of Unicode word characters (`\w`): letters,
/// digits, combining marks and connector punctuation such as `_`.
pub fn tokenize(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    match word_pattern() {
        Some(word) => word
            .find_iter(&lowered)
            .map(|m| m.as_str().to_string())
            .collect(),
        None => Vec::new(),
    }
}
