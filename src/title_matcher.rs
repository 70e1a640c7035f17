//! Word-set title comparison used to accept or reject catalog search results.
//!
//! A query matches a candidate title when every normalized query word also
//! appears in the candidate's normalized word set. The comparison is
//! one-directional: extra candidate words are fine, missing query words are not.

use std::collections::HashSet;

use crate::anilist::CandidateMedia;

const RIGHT_SINGLE_QUOTE: char = '\u{2019}';

fn normalize_quotes_and_hyphens(value: &str) -> String {
    value
        .replace(RIGHT_SINGLE_QUOTE, "`")
        .replace('`', "'")
        .replace('-', " ")
}

/// Splits a title into its lowercase, punctuation-free word set.
pub fn title_words(value: &str) -> HashSet<String> {
    let normalized = normalize_quotes_and_hyphens(value);
    let stripped: String = normalized
        .chars()
        .filter(|ch| !ch.is_ascii_punctuation())
        .collect();
    stripped
        .to_lowercase()
        .split_whitespace()
        .map(ToOwned::to_owned)
        .collect()
}

/// Returns true when every word of `query_title` appears in `candidate_title`.
///
/// An empty query has an empty word set and therefore matches every candidate.
pub fn matches(candidate_title: &str, query_title: &str) -> bool {
    let candidate_words = title_words(candidate_title);
    title_words(query_title).is_subset(&candidate_words)
}

/// Returns true when any title variant of `candidate` matches `query_title`.
pub fn candidate_matches(candidate: &CandidateMedia, query_title: &str) -> bool {
    candidate
        .title_variants()
        .any(|variant| matches(variant, query_title))
}
