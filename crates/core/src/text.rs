//! Text sanitation and hallucination filtering
//!
//! Speech models fed near-silence tend to emit stock closing phrases from
//! their training data. Transcripts matching the denylist never reach the
//! ledger.

use once_cell::sync::Lazy;
use regex::Regex;

/// Characters that terminate a spoken sentence
pub const SENTENCE_SEPARATORS: [char; 4] = ['.', '?', '!', '\n'];

/// Filler phrases a speech model emits on near-silence input
pub const HALLUCINATED_PHRASES: &[&str] = &[
    "thank you",
    "bye-bye",
    "thanks for watching",
    "thank you for watching",
    "i'll see you next time",
    "i will see you next time",
    "thank you so much for watching",
    "next time",
    "i'll see you in the next video",
];

static LEADING_JUNK: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[^a-zA-Z0-9]*").unwrap());
static TRAILING_JUNK: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-zA-Z0-9\n]*$").unwrap());

/// Normalize a transcript for denylist comparison: trim, lowercase, strip
/// trailing punctuation.
fn normalize(text: &str) -> String {
    text.trim()
        .trim_end_matches(|c: char| !c.is_alphanumeric())
        .to_lowercase()
}

/// Check a raw transcript against the hallucination denylist.
///
/// Rejects an exact match, or a transcript that both begins and ends with a
/// denylist entry. Case- and trailing-punctuation-insensitive.
pub fn is_hallucination(text: &str) -> bool {
    let normalized = normalize(text);
    if normalized.is_empty() {
        return true;
    }
    if HALLUCINATED_PHRASES.contains(&normalized.as_str()) {
        return true;
    }
    HALLUCINATED_PHRASES
        .iter()
        .any(|p| normalized.starts_with(p))
        && HALLUCINATED_PHRASES.iter().any(|p| normalized.ends_with(p))
}

/// Strip stray non-alphanumeric characters from both ends of a string.
///
/// Generation services occasionally wrap sentences in markup or quote
/// characters. `suffix` restores the terminal punctuation mark after the
/// trim; an alphanumeric suffix is never appended (nothing was stripped).
pub fn trim_non_alphanumeric(input: &str, suffix: Option<char>) -> String {
    let stripped = LEADING_JUNK.replace(input, "");
    let mut output = TRAILING_JUNK.replace(&stripped, "").into_owned();
    if let Some(c) = suffix {
        if !output.is_empty() && !c.is_alphanumeric() {
            output.push(c);
        }
    }
    output
}
