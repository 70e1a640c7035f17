//! Collapses resolved ids per title and separates ambiguous titles.

use std::collections::{BTreeMap, BTreeSet};

use log::info;

use crate::protocol::ResolvedMatch;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanedIds {
    /// Titles that resolved to exactly one catalog id.
    pub resolved: BTreeMap<String, ResolvedMatch>,
    /// Titles left with several distinct ids; these need a manual decision.
    pub multiple: BTreeMap<String, Vec<u64>>,
}

pub fn clean(title_matches: BTreeMap<String, Vec<ResolvedMatch>>) -> CleanedIds {
    let mut cleaned = CleanedIds::default();
    for (title, matches) in title_matches {
        let distinct_ids: BTreeSet<u64> = matches.iter().map(|item| item.media_id).collect();
        match distinct_ids.len() {
            0 => {}
            1 => {
                if let Some(first) = matches.into_iter().next() {
                    cleaned.resolved.insert(title, first);
                }
            }
            _ => {
                info!("'{title}' matched several ids {distinct_ids:?}; leaving it for manual review");
                cleaned
                    .multiple
                    .insert(title, distinct_ids.into_iter().collect());
            }
        }
    }
    cleaned
}
