use crate::core::index::CatalogIndex;
use crate::core::scoring::{score_documents, QueryTerms};
use crate::models::{BusinessRecord, MatchCandidate, MatchInfo, ScoringWeights, SearchMethod};

/// Result of a catalog search
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub candidates: Vec<MatchCandidate>,
    pub match_info: MatchInfo,
}

/// Deterministic relevance matcher
///
/// # Pipeline Stages
/// 1. Tokenize the query exactly like the index
/// 2. Accumulate per-business scores (full name, whole word, partial)
/// 3. Rank by score, ties in catalog order
/// 4. Cap and classify the candidate set
///
/// Nothing here awaits or allocates shared state, so a search is a pure
/// function of the query and the index.
#[derive(Debug, Clone)]
pub struct Matcher {
    weights: ScoringWeights,
    candidate_cap: usize,
    exact_threshold: u32,
}

impl Matcher {
    pub fn new(weights: ScoringWeights, candidate_cap: usize, exact_threshold: u32) -> Self {
        Self {
            weights,
            candidate_cap: candidate_cap.max(1),
            exact_threshold,
        }
    }

    pub fn with_default_weights() -> Self {
        Self::new(ScoringWeights::default(), 10, 15)
    }

    /// Search a raw catalog, building a throwaway index
    pub fn search(&self, query: &str, catalog: &[BusinessRecord]) -> SearchResult {
        let index = CatalogIndex::build(catalog.to_vec());
        self.rank(query, &index, SearchMethod::OnDemandIndex)
    }

    /// Search the process-wide index
    pub fn search_index(&self, query: &str, index: &CatalogIndex) -> SearchResult {
        self.rank(query, index, SearchMethod::CachedIndex)
    }

    fn rank(&self, query: &str, index: &CatalogIndex, method: SearchMethod) -> SearchResult {
        let terms = QueryTerms::parse(query);
        if terms.is_empty() || index.is_empty() {
            return SearchResult {
                candidates: Vec::new(),
                match_info: MatchInfo::none(method),
            };
        }

        let mut candidates: Vec<MatchCandidate> = score_documents(index, &terms, &self.weights)
            .into_iter()
            .map(|(doc, scored)| MatchCandidate {
                business: index.business(doc).clone(),
                score: scored.score,
                matched_term: scored.matched_term,
            })
            .collect();

        let total_matches = candidates.len();

        // Candidates arrive in catalog order and `sort_by` is stable, so equal
        // scores keep catalog insertion order. This tie-break is part of the
        // matcher's contract.
        candidates.sort_by(|a, b| b.score.cmp(&a.score));
        candidates.truncate(self.candidate_cap);

        let match_info = classify(&candidates, total_matches, method, self.exact_threshold);

        tracing::debug!(
            "Search for {:?} scored {} candidates (exact: {}, multiple: {})",
            terms.phrase,
            total_matches,
            match_info.exact_match,
            match_info.has_multiple_matches
        );

        SearchResult {
            candidates,
            match_info,
        }
    }
}

impl Default for Matcher {
    fn default() -> Self {
        Self::with_default_weights()
    }
}

/// Classify a ranked candidate set
///
/// Exactly one of `exact_match`, `partial_match` and `no_match` is set;
/// `has_multiple_matches` is independent of them.
pub fn classify(
    candidates: &[MatchCandidate],
    total_matches: usize,
    search_method: SearchMethod,
    exact_threshold: u32,
) -> MatchInfo {
    let count = candidates.len();
    let top_score = candidates.first().map(|c| c.score).unwrap_or(0);

    let exact_match = count == 1 && top_score > exact_threshold;
    let no_match = count == 0;

    MatchInfo {
        exact_match,
        partial_match: !exact_match && !no_match,
        no_match,
        has_multiple_matches: count > 1,
        search_method,
        total_matches,
    }
}
