//! Text normalisation shared by the index, the matcher and intent extraction.
//!
//! Index and query go through exactly the same functions so that a word
//! indexed from a business name is always comparable with a query word.

/// Words shorter than this are never indexed or matched
pub const MIN_TOKEN_CHARS: usize = 3;

/// Filler words that carry no discovery signal
pub const STOP_WORDS: &[&str] = &[
    "the", "and", "but", "for", "with", "are", "was", "you", "your", "can", "could",
    "would", "please", "find", "show", "get", "give", "best", "good", "great", "nice",
    "want", "need", "looking", "look", "some", "any", "near", "nearby", "around", "place",
    "places", "this", "that", "there", "where", "what", "which", "who", "how", "from",
    "about", "into", "have", "has", "just", "really", "very", "top", "recommend",
    "something", "anything", "today", "tonight", "now", "our", "all",
];

#[inline]
pub fn is_stop_word(word: &str) -> bool {
    STOP_WORDS.contains(&word)
}

/// Lower-case a phrase and collapse whitespace runs
pub fn normalize_phrase(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Split text into lower-cased words of at least [`MIN_TOKEN_CHARS`] characters
///
/// Any non-alphanumeric character is a separator. Stop words are kept; use
/// [`significant_words`] when they should be dropped.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|word| word.chars().count() >= MIN_TOKEN_CHARS)
        .map(str::to_lowercase)
        .collect()
}

/// Tokens minus stop words, in order of first appearance, without duplicates
pub fn significant_words(text: &str) -> Vec<String> {
    let mut words: Vec<String> = Vec::new();
    for word in tokenize(text) {
        if !is_stop_word(&word) && !words.contains(&word) {
            words.push(word);
        }
    }
    words
}
