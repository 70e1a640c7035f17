//! Title -> catalog id resolution with caching and bounded retries.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};

use crate::anilist::gateway::{GatewayError, Sleeper};
use crate::anilist::{CandidateMedia, MangaCatalog, NOVEL_FORMAT};
use crate::cache::{FormatCache, SearchCache};
use crate::config::{SyncSettings, SKIP_TITLE_SENTINEL};
use crate::protocol::NotFoundEntry;
use crate::title_matcher;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchPolicy {
    /// Logical attempts per title before it is abandoned.
    pub retries: u32,
    pub rate_limit_delay: Duration,
    pub unexpected_error_delay: Duration,
    pub page_size: u32,
}

impl SearchPolicy {
    pub fn from_settings(settings: &SyncSettings) -> Self {
        Self {
            retries: settings.search_retries.max(1),
            rate_limit_delay: settings.rate_limit_delay,
            unexpected_error_delay: settings.unexpected_error_delay,
            page_size: settings.search_page_size,
        }
    }
}

impl Default for SearchPolicy {
    fn default() -> Self {
        Self {
            retries: 3,
            rate_limit_delay: Duration::from_secs(60),
            unexpected_error_delay: Duration::from_secs(2),
            page_size: 100,
        }
    }
}

pub struct SearchEngine {
    policy: SearchPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl SearchEngine {
    pub fn new(policy: SearchPolicy, sleeper: Arc<dyn Sleeper>) -> Self {
        Self { policy, sleeper }
    }

    /// Resolves `query` to matching catalog ids, matches first.
    ///
    /// `title` is the exported title the query stands for; it is what lands in
    /// `not_found` when the query cannot be resolved. Cached queries never touch
    /// the network, and nothing here aborts the run.
    pub fn resolve_ids(
        &self,
        catalog: &dyn MangaCatalog,
        cache: &mut SearchCache,
        not_found: &mut Vec<NotFoundEntry>,
        title: &str,
        query: &str,
        last_chapter_read: Option<u32>,
    ) -> Vec<u64> {
        if query.trim().eq_ignore_ascii_case(SKIP_TITLE_SENTINEL) {
            debug!("'{title}' marked skip; not searching");
            return Vec::new();
        }
        if let Some(ids) = cache.get(query) {
            debug!("Search cache hit for '{query}': {ids:?}");
            return ids.clone();
        }

        let record_not_found = |not_found: &mut Vec<NotFoundEntry>| {
            not_found.push(NotFoundEntry {
                title: title.to_string(),
                last_chapter_read,
            });
        };

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.search_matching_ids(catalog, query) {
                Ok(ids) if ids.is_empty() => {
                    info!("No manga found for '{query}'");
                    record_not_found(not_found);
                    return ids;
                }
                Ok(ids) => {
                    if let Err(err) = cache.insert(query, ids.clone()) {
                        warn!("Failed to persist search cache for '{query}': {err}");
                    }
                    return ids;
                }
                Err(err) if attempt >= self.policy.retries => {
                    warn!("Giving up on '{query}' after {attempt} attempt(s): {err}");
                    record_not_found(not_found);
                    return Vec::new();
                }
                Err(err @ GatewayError::RateLimited { .. }) => {
                    warn!(
                        "Search for '{query}' rate limited ({err}); waiting {}s, attempt {attempt} of {}",
                        self.policy.rate_limit_delay.as_secs(),
                        self.policy.retries
                    );
                    self.sleeper.sleep(self.policy.rate_limit_delay);
                }
                Err(err) => {
                    warn!(
                        "Search for '{query}' failed ({err}); retrying, attempt {attempt} of {}",
                        self.policy.retries
                    );
                    self.sleeper.sleep(self.policy.unexpected_error_delay);
                }
            }
        }
    }

    fn search_matching_ids(
        &self,
        catalog: &dyn MangaCatalog,
        title: &str,
    ) -> Result<Vec<u64>, GatewayError> {
        let candidates = catalog
            .search_manga(title, self.policy.page_size)?
            .unwrap_or_default();
        Ok(rank_matching_ids(&candidates, title))
    }
}

/// Ids of candidates matching `title`, in search order.
pub fn rank_matching_ids(candidates: &[CandidateMedia], title: &str) -> Vec<u64> {
    let mut scored: Vec<(bool, &CandidateMedia)> = candidates
        .iter()
        .map(|candidate| (title_matcher::candidate_matches(candidate, title), candidate))
        .collect();
    // Stable sort keeps search order inside each partition.
    scored.sort_by_key(|(matched, _)| !*matched);
    scored
        .into_iter()
        .take_while(|(matched, _)| *matched)
        .map(|(_, candidate)| candidate.id)
        .collect()
}

/// Drops ids whose catalog format is a novel. Lookup failures keep the id.
pub fn retain_non_novels(
    catalog: &dyn MangaCatalog,
    cache: &mut FormatCache,
    ids: Vec<u64>,
) -> Vec<u64> {
    ids.into_iter()
        .filter(|id| match media_format(catalog, cache, *id) {
            Some(format) if format.eq_ignore_ascii_case(NOVEL_FORMAT) => {
                debug!("Dropping media {id}: format {format}");
                false
            }
            _ => true,
        })
        .collect()
}

fn media_format(catalog: &dyn MangaCatalog, cache: &mut FormatCache, id: u64) -> Option<String> {
    let key = id.to_string();
    if let Some(format) = cache.get(&key) {
        return Some(format.clone());
    }
    match catalog.media_format(id) {
        Ok(Some(format)) => {
            if let Err(err) = cache.insert(key, format.clone()) {
                warn!("Failed to persist format cache for media {id}: {err}");
            }
            Some(format)
        }
        Ok(None) => None,
        Err(err) => {
            warn!("Format lookup for media {id} failed: {err}");
            None
        }
    }
}
