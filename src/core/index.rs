use std::collections::{BTreeMap, BTreeSet, HashSet};

use chrono::{DateTime, Utc};

use crate::core::tokenize::{is_stop_word, normalize_phrase, tokenize};
use crate::models::BusinessRecord;

/// Immutable inverted index over the active catalog
///
/// Documents are addressed by their position in catalog order, and every
/// posting list is ascending, so any walk over the index visits businesses
/// in the order the catalog delivered them. The index is never mutated after
/// [`CatalogIndex::build`]; a refresh builds a new one and swaps it in.
#[derive(Debug, Clone)]
pub struct CatalogIndex {
    businesses: Vec<BusinessRecord>,
    full_names: Vec<String>,
    words: BTreeMap<String, Vec<usize>>,
    names: BTreeMap<String, Vec<usize>>,
    skipped: usize,
    built_at: DateTime<Utc>,
}

impl CatalogIndex {
    /// Build an index from a catalog snapshot
    ///
    /// Inactive records, records without id or name and duplicate ids are
    /// skipped rather than rejected.
    pub fn build(records: Vec<BusinessRecord>) -> Self {
        let mut businesses = Vec::with_capacity(records.len());
        let mut full_names = Vec::with_capacity(records.len());
        let mut words: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        let mut names: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        let mut seen_ids = HashSet::new();
        let mut skipped = 0;

        for record in records {
            if !record.is_active()
                || record.id.trim().is_empty()
                || record.name.trim().is_empty()
                || !seen_ids.insert(record.id.clone())
            {
                skipped += 1;
                continue;
            }

            let doc = businesses.len();
            let full_name = normalize_phrase(&record.name);

            let doc_words: BTreeSet<String> = tokenize(&record.name)
                .into_iter()
                .chain(tokenize(&record.description))
                .filter(|word| !is_stop_word(word))
                .collect();

            for word in doc_words {
                words.entry(word).or_default().push(doc);
            }
            names.entry(full_name.clone()).or_default().push(doc);

            full_names.push(full_name);
            businesses.push(record);
        }

        if skipped > 0 {
            tracing::debug!("Catalog index skipped {} unusable records", skipped);
        }

        Self {
            businesses,
            full_names,
            words,
            names,
            skipped,
            built_at: Utc::now(),
        }
    }

    pub fn empty() -> Self {
        Self::build(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.businesses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.businesses.is_empty()
    }

    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    pub fn businesses(&self) -> &[BusinessRecord] {
        &self.businesses
    }

    pub fn business(&self, doc: usize) -> &BusinessRecord {
        &self.businesses[doc]
    }

    /// Normalised full name of a document
    pub fn full_name(&self, doc: usize) -> &str {
        &self.full_names[doc]
    }

    /// Documents whose full name equals `phrase` (already normalised)
    pub fn documents_named(&self, phrase: &str) -> &[usize] {
        self.names.get(phrase).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Documents containing the indexed word `term`
    pub fn postings(&self, term: &str) -> &[usize] {
        self.words.get(term).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains_word(&self, term: &str) -> bool {
        self.words.contains_key(term)
    }

    /// Indexed words starting with `prefix`, in lexical order
    pub fn words_with_prefix<'a>(
        &'a self,
        prefix: &'a str,
    ) -> impl Iterator<Item = (&'a str, &'a [usize])> + 'a {
        self.words
            .range::<str, _>((std::ops::Bound::Included(prefix), std::ops::Bound::Unbounded))
            .take_while(move |(word, _)| word.starts_with(prefix))
            .map(|(word, docs)| (word.as_str(), docs.as_slice()))
    }

    /// Number of distinct indexed words
    pub fn vocabulary_size(&self) -> usize {
        self.words.len()
    }
}

impl Default for CatalogIndex {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, name: &str, description: &str, status: &str) -> BusinessRecord {
        BusinessRecord {
            id: id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            industry_type: "restaurant".to_string(),
            slug: id.to_string(),
            status: status.to_string(),
            location: None,
        }
    }

    #[test]
    fn test_build_skips_unusable_records() {
        let index = CatalogIndex::build(vec![
            record("1", "Spice Pavilion", "Indian curry house", "active"),
            record("2", "Closed Diner", "Burgers", "inactive"),
            record("", "No Id", "", "active"),
            record("1", "Duplicate", "", "active"),
        ]);

        assert_eq!(index.len(), 1);
        assert_eq!(index.skipped(), 3);
    }

    #[test]
    fn test_postings_are_in_catalog_order() {
        let index = CatalogIndex::build(vec![
            record("1", "Pasta Bar", "", "active"),
            record("2", "Pizza Place", "fresh pasta", "active"),
            record("3", "Pasta Pasta", "pasta", "active"),
        ]);

        assert_eq!(index.postings("pasta"), &[0, 1, 2]);
        assert!(index.postings("sushi").is_empty());
    }

    #[test]
    fn test_full_name_indexed_as_phrase() {
        let index = CatalogIndex::build(vec![record("1", "Spice  Pavilion CBD", "", "active")]);

        assert_eq!(index.documents_named("spice pavilion cbd"), &[0]);
        assert_eq!(index.full_name(0), "spice pavilion cbd");
    }

    #[test]
    fn test_stop_words_not_indexed() {
        let index = CatalogIndex::build(vec![record("1", "The Best Cafe", "good coffee", "active")]);

        assert!(!index.contains_word("the"));
        assert!(!index.contains_word("best"));
        assert!(index.contains_word("cafe"));
        assert!(index.contains_word("coffee"));
    }

    #[test]
    fn test_prefix_walk() {
        let index = CatalogIndex::build(vec![record("1", "Pizzeria Roma", "pizza and pizzas", "active")]);

        let words: Vec<&str> = index.words_with_prefix("pizz").map(|(w, _)| w).collect();
        assert_eq!(words, vec!["pizza", "pizzas", "pizzeria"]);
    }
}
