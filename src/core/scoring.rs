use std::collections::{BTreeMap, HashSet};

use crate::core::index::CatalogIndex;
use crate::core::tokenize::{normalize_phrase, significant_words, MIN_TOKEN_CHARS};
use crate::models::ScoringWeights;

/// Query prepared for scoring
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryTerms {
    /// Whole query, lower-cased with collapsed whitespace
    pub phrase: String,
    /// Significant query words in order of appearance
    pub words: Vec<String>,
}

impl QueryTerms {
    pub fn parse(query: &str) -> Self {
        Self {
            phrase: normalize_phrase(query),
            words: significant_words(query),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty() && self.phrase.chars().count() < MIN_TOKEN_CHARS
    }
}

/// Accumulated score for one document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocScore {
    pub score: u32,
    pub matched_term: String,
    strongest: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum TermKey {
    FullName,
    Word(String),
}

/// Per-document accumulator; an indexed term contributes at most once
#[derive(Default)]
struct Tally {
    scores: BTreeMap<usize, DocScore>,
    awarded: HashSet<(usize, TermKey)>,
}

impl Tally {
    fn award(&mut self, doc: usize, key: TermKey, term: &str, points: u32) {
        if !self.awarded.insert((doc, key)) {
            return;
        }

        let entry = self.scores.entry(doc).or_insert_with(|| DocScore {
            score: 0,
            matched_term: term.to_string(),
            strongest: 0,
        });
        entry.score += points;
        if points > entry.strongest {
            entry.strongest = points;
            entry.matched_term = term.to_string();
        }
    }

    fn is_awarded(&self, doc: usize, key: &TermKey) -> bool {
        self.awarded.contains(&(doc, key.clone()))
    }
}

/// Score every document of the index against a query
///
/// Tiers are applied strongest first so that a term matching on several
/// tiers is credited once, at its highest value:
/// 1. query equals the full business name (`weights.full_name`)
/// 2. indexed word equals a query word (`weights.whole_word`)
/// 3. partial: the full name and the query contain one another as whole
///    words, or an indexed word and a query word are prefixes of one
///    another (`weights.partial`)
///
/// Returns only documents with a positive score, in catalog order.
pub fn score_documents(
    index: &CatalogIndex,
    terms: &QueryTerms,
    weights: &ScoringWeights,
) -> Vec<(usize, DocScore)> {
    let mut tally = Tally::default();

    if terms.is_empty() {
        return Vec::new();
    }

    // Tier 1: full name
    for &doc in index.documents_named(&terms.phrase) {
        tally.award(doc, TermKey::FullName, &terms.phrase, weights.full_name);
    }

    // Tier 2: whole words
    for word in &terms.words {
        for &doc in index.postings(word) {
            tally.award(doc, TermKey::Word(word.clone()), word, weights.whole_word);
        }
    }

    // Tier 3: partial phrase
    if terms.phrase.chars().count() >= MIN_TOKEN_CHARS {
        for doc in 0..index.len() {
            if tally.is_awarded(doc, &TermKey::FullName) {
                continue;
            }
            let name = index.full_name(doc);
            if name.chars().count() >= MIN_TOKEN_CHARS
                && (contains_words(name, &terms.phrase) || contains_words(&terms.phrase, name))
            {
                tally.award(doc, TermKey::FullName, name, weights.partial);
            }
        }
    }

    // Tier 3: partial words
    for word in &terms.words {
        for (indexed, docs) in index.words_with_prefix(word) {
            if indexed == word {
                continue;
            }
            for &doc in docs {
                tally.award(doc, TermKey::Word(indexed.to_string()), indexed, weights.partial);
            }
        }

        for (boundary, _) in word.char_indices().skip(MIN_TOKEN_CHARS) {
            let prefix = &word[..boundary];
            for &doc in index.postings(prefix) {
                tally.award(doc, TermKey::Word(prefix.to_string()), prefix, weights.partial);
            }
        }
    }

    tally.scores.into_iter().collect()
}

/// Whole-word containment of one normalised phrase in another
fn contains_words(haystack: &str, needle: &str) -> bool {
    format!(" {} ", haystack).contains(&format!(" {} ", needle))
}
