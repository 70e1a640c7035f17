//! Sync session runner.
//!
//! One `SyncManager` owns a single run: the catalog client, both caches and the
//! run-scoped counters. It drives resolve -> format filter -> clean -> reconcile
//! -> reports sequentially and publishes progress on the event bus.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use log::{debug, warn};
use tokio::sync::broadcast::Sender;

use crate::anilist::gateway::Sleeper;
use crate::anilist::{MangaCatalog, RemoteListEntry};
use crate::cache::{open_format_cache, open_search_cache, FormatCache, SearchCache};
use crate::config::SyncSettings;
use crate::error::SyncError;
use crate::id_cleaner;
use crate::protocol::{
    LocalEntry, NotFoundEntry, ResolvedMatch, SyncMessage, SyncPhase, SyncSummary,
};
use crate::reconciliation::{ChapterTally, ReconcileOutcome, Reconciler};
use crate::reports;
use crate::search_engine::{retain_non_novels, SearchEngine, SearchPolicy};

pub struct SyncManager {
    bus_producer: Sender<SyncMessage>,
    catalog: Box<dyn MangaCatalog>,
    search_cache: SearchCache,
    format_cache: FormatCache,
    search_engine: SearchEngine,
    reconciler: Reconciler,
    settings: SyncSettings,
    stop_requested: Arc<AtomicBool>,
    not_found: Vec<NotFoundEntry>,
    tally: ChapterTally,
    summary: SyncSummary,
}

impl SyncManager {
    pub fn new(
        settings: SyncSettings,
        catalog: Box<dyn MangaCatalog>,
        sleeper: Arc<dyn Sleeper>,
        bus_producer: Sender<SyncMessage>,
        stop_requested: Arc<AtomicBool>,
    ) -> Self {
        Self {
            bus_producer,
            catalog,
            search_cache: open_search_cache(&settings.cache_dir),
            format_cache: open_format_cache(&settings.cache_dir),
            search_engine: SearchEngine::new(SearchPolicy::from_settings(&settings), sleeper),
            reconciler: Reconciler::new(
                settings.private_entries,
                settings.staleness_months,
                settings.dry_run,
            ),
            settings,
            stop_requested,
            not_found: Vec::new(),
            tally: ChapterTally::default(),
            summary: SyncSummary::default(),
        }
    }

    fn emit(&self, message: SyncMessage) {
        let _ = self.bus_producer.send(message);
    }

    fn emit_phase(&self, phase: SyncPhase) {
        debug!("Sync phase: {}", phase.label());
        self.emit(SyncMessage::PhaseChanged(phase));
    }

    fn emit_log(&self, line: String) {
        debug!("{line}");
        self.emit(SyncMessage::Log(line));
    }

    fn should_stop(&mut self) -> bool {
        if self.stop_requested.load(Ordering::Relaxed) {
            if !self.summary.stopped {
                warn!("Stop requested; finishing after the current title");
            }
            self.summary.stopped = true;
        }
        self.summary.stopped
    }

    fn reset_session(&mut self) {
        self.not_found.clear();
        self.tally = ChapterTally::default();
        self.summary = SyncSummary::default();
    }

    /// Runs one full sync and publishes `Finished` or `Failed` on the bus.
    pub fn run(&mut self, entries: Vec<LocalEntry>) -> Result<SyncSummary, SyncError> {
        match self.run_session(entries) {
            Ok(summary) => {
                self.emit(SyncMessage::Finished(summary.clone()));
                Ok(summary)
            }
            Err(err) => {
                self.emit(SyncMessage::Failed(err.to_string()));
                Err(err)
            }
        }
    }

    fn run_session(&mut self, entries: Vec<LocalEntry>) -> Result<SyncSummary, SyncError> {
        self.reset_session();
        self.summary.titles_total = entries.len();

        self.emit_phase(SyncPhase::Authenticating);
        let user_id = self.catalog.viewer_id()?;

        self.emit_phase(SyncPhase::FetchingList);
        let remote_entries: HashMap<u64, RemoteListEntry> = self
            .catalog
            .fetch_manga_list(user_id)?
            .into_iter()
            .map(|entry| (entry.media_id, entry))
            .collect();
        self.emit_log(format!(
            "Fetched {} entries from the AniList manga list",
            remote_entries.len()
        ));

        self.emit_phase(SyncPhase::ResolvingTitles);
        if !self.search_cache.is_empty() {
            self.emit_log(format!(
                "Using {} cached title lookups and {} cached media formats",
                self.search_cache.len(),
                self.format_cache.len()
            ));
        }
        let title_matches = self.resolve_titles(&entries);

        let mut multiple = BTreeMap::new();
        if !self.summary.stopped {
            self.emit_phase(SyncPhase::CleaningIds);
            let cleaned = id_cleaner::clean(title_matches);
            multiple = cleaned.multiple;

            self.emit_phase(SyncPhase::UpdatingEntries);
            self.update_entries(&cleaned.resolved, &remote_entries);
        }

        self.emit_phase(SyncPhase::WritingReports);
        self.summary.not_found = self.not_found.len();
        self.summary.multiple_ids = multiple.len();
        self.summary.chapters_updated = self.tally.total;
        match reports::write_reports(&self.settings.report_dir, &self.not_found, &multiple) {
            Ok(written) => {
                for path in [written.not_found, written.multiple_ids].into_iter().flatten() {
                    self.emit_log(format!("Report written to {}", path.display()));
                }
            }
            Err(err) => warn!(
                "Failed to write reports to {}: {}",
                self.settings.report_dir.display(),
                err
            ),
        }

        self.emit_phase(SyncPhase::Finished);
        Ok(self.summary.clone())
    }

    fn search_title<'a>(&'a self, title: &'a str) -> &'a str {
        self.settings
            .title_overrides
            .get(title)
            .map(String::as_str)
            .unwrap_or(title)
    }

    fn resolve_titles(&mut self, entries: &[LocalEntry]) -> BTreeMap<String, Vec<ResolvedMatch>> {
        let mut title_matches: BTreeMap<String, Vec<ResolvedMatch>> = BTreeMap::new();
        let total = entries.len();
        for (index, entry) in entries.iter().enumerate() {
            if self.should_stop() {
                break;
            }
            let query = self.search_title(&entry.title).to_string();
            if query != entry.title {
                self.emit_log(format!("Searching '{}' as '{}'", entry.title, query));
            }
            let ids = self.search_engine.resolve_ids(
                self.catalog.as_ref(),
                &mut self.search_cache,
                &mut self.not_found,
                &entry.title,
                &query,
                entry.last_chapter_read,
            );
            if !ids.is_empty() {
                let ids = retain_non_novels(self.catalog.as_ref(), &mut self.format_cache, ids);
                if ids.is_empty() {
                    self.emit_log(format!("Only novels matched '{}'", entry.title));
                    self.not_found.push(NotFoundEntry {
                        title: entry.title.clone(),
                        last_chapter_read: entry.last_chapter_read,
                    });
                } else {
                    title_matches.insert(
                        entry.title.clone(),
                        ids.into_iter()
                            .map(|id| ResolvedMatch::new(id, entry))
                            .collect(),
                    );
                }
            }
            self.emit(SyncMessage::Progress {
                done: index + 1,
                total,
            });
        }
        title_matches
    }

    fn update_entries(
        &mut self,
        resolved: &BTreeMap<String, ResolvedMatch>,
        remote_entries: &HashMap<u64, RemoteListEntry>,
    ) {
        let total = resolved.len();
        for (index, (title, matched)) in resolved.iter().enumerate() {
            if self.should_stop() {
                break;
            }
            let remote = remote_entries.get(&matched.media_id);
            let outcome = self.reconciler.reconcile(
                self.catalog.as_ref(),
                title,
                matched,
                remote,
                &mut self.tally,
                Utc::now(),
            );
            match outcome {
                ReconcileOutcome::CompletedSkipped => self.summary.completed_skipped += 1,
                ReconcileOutcome::Unchanged => self.summary.unchanged += 1,
                ReconcileOutcome::Updated { chapters_added, .. } => {
                    self.summary.updated += 1;
                    let progress = matched
                        .last_chapter_read
                        .map_or_else(|| "-".to_string(), |chapter| chapter.to_string());
                    let line = match chapters_added {
                        Some(added) => format!(
                            "Updated '{title}' to chapter {progress} (+{added} chapters, {} total)",
                            self.tally.total
                        ),
                        None => format!("Updated '{title}' (chapter {progress})"),
                    };
                    self.emit_log(line);
                }
                ReconcileOutcome::Failed { failed_step } => {
                    self.summary.failed += 1;
                    self.emit_log(format!(
                        "Failed to update '{title}' at step {}",
                        failed_step + 1
                    ));
                }
            }
            self.emit(SyncMessage::Progress {
                done: index + 1,
                total,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use tokio::sync::broadcast;

    use super::SyncManager;
    use crate::anilist::gateway::testing::RecordingSleeper;
    use crate::anilist::gateway::GatewayError;
    use crate::anilist::testing::{media, FakeCatalog};
    use crate::anilist::{MediaListStatus, RemoteListEntry, SaveEntryVariables};
    use crate::config::{Config, SyncSettings};
    use crate::error::SyncError;
    use crate::protocol::{LocalEntry, LocalStatus, SyncMessage};
    use crate::reports::{MULTIPLE_IDS_REPORT, NOT_FOUND_REPORT};

    fn settings(dir: &Path) -> SyncSettings {
        let mut config = Config::default();
        config
            .title_overrides
            .insert("Shingeki".to_string(), "Attack on Titan".to_string());
        config
            .title_overrides
            .insert("Ignored Title".to_string(), "skip".to_string());
        SyncSettings::from_config(
            &config,
            "token".to_string(),
            dir.join("cache"),
            dir.join("reports"),
            false,
        )
    }

    fn entry(title: &str, status: LocalStatus, chapter: Option<u32>) -> LocalEntry {
        LocalEntry {
            title: title.to_string(),
            last_chapter_read: chapter,
            status,
            last_read_at: None,
        }
    }

    fn catalog() -> FakeCatalog {
        let mut catalog = FakeCatalog::default()
            .with_search("Berserk", vec![media(30, "Berserk")])
            .with_search(
                "Vinland Saga",
                vec![media(40, "Vinland Saga"), media(41, "Vinland Saga Prologue")],
            )
            .with_search("Spice and Wolf", vec![media(50, "Spice and Wolf")])
            .with_search("Attack on Titan", vec![media(60, "Attack on Titan")]);
        catalog.viewer = Some(7);
        catalog.list = vec![RemoteListEntry {
            media_id: 30,
            progress: 5,
            status: MediaListStatus::Current,
        }];
        catalog.formats.insert(30, "MANGA".to_string());
        catalog.formats.insert(50, "NOVEL".to_string());
        catalog
    }

    fn manager(
        dir: &Path,
        catalog: FakeCatalog,
        stop: Arc<AtomicBool>,
    ) -> (SyncManager, broadcast::Receiver<SyncMessage>, Arc<FakeCatalog>) {
        let catalog = Arc::new(catalog);
        let (bus_sender, _) = broadcast::channel(256);
        let observer = bus_sender.subscribe();
        let manager = SyncManager::new(
            settings(dir),
            Box::new(Arc::clone(&catalog)),
            Arc::new(RecordingSleeper::default()),
            bus_sender,
            stop,
        );
        (manager, observer, catalog)
    }

    #[test]
    fn test_full_run_updates_and_reports() {
        let dir = tempfile::tempdir().expect("temp dir");
        let (mut manager, mut observer, catalog) =
            manager(dir.path(), catalog(), Arc::new(AtomicBool::new(false)));
        let entries = vec![
            entry("Berserk", LocalStatus::Reading, Some(12)),
            entry("Vinland Saga", LocalStatus::Reading, Some(3)),
            entry("Spice and Wolf", LocalStatus::Reading, Some(1)),
            entry("Unknown Manga", LocalStatus::Reading, Some(9)),
            entry("Shingeki", LocalStatus::Completed, Some(139)),
            entry("Ignored Title", LocalStatus::Reading, Some(2)),
        ];

        let summary = manager.run(entries).expect("run should succeed");

        assert_eq!(summary.titles_total, 6);
        assert_eq!(summary.updated, 1);
        assert_eq!(summary.completed_skipped, 1);
        assert_eq!(summary.not_found, 2);
        assert_eq!(summary.multiple_ids, 1);
        assert_eq!(summary.chapters_updated, 7);
        assert!(!summary.stopped);
        assert_eq!(
            catalog.saved(),
            vec![
                SaveEntryVariables::new(30)
                    .with_private(false)
                    .with_progress(Some(6)),
                SaveEntryVariables::new(30)
                    .with_private(false)
                    .with_progress(Some(12))
                    .with_status(MediaListStatus::Current),
            ]
        );
        assert!(!catalog
            .calls()
            .iter()
            .any(|call| call.contains("Ignored") || call == "search:skip"));

        let reports_dir = dir.path().join("reports");
        let not_found =
            std::fs::read_to_string(reports_dir.join(NOT_FOUND_REPORT)).expect("not found report");
        assert!(not_found.contains("Unknown Manga"));
        assert!(not_found.contains("Spice and Wolf"));
        assert_eq!(
            std::fs::read_to_string(reports_dir.join(MULTIPLE_IDS_REPORT)).expect("multiple report"),
            "Vinland Saga: 40, 41\n"
        );

        let mut finished = None;
        while let Ok(message) = observer.try_recv() {
            if let SyncMessage::Finished(summary) = message {
                finished = Some(summary);
            }
        }
        assert_eq!(finished, Some(summary));
    }

    #[test]
    fn test_invalid_token_aborts_run() {
        let dir = tempfile::tempdir().expect("temp dir");
        let mut catalog = catalog();
        catalog.viewer = None;
        let (mut manager, mut observer, catalog) =
            manager(dir.path(), catalog, Arc::new(AtomicBool::new(false)));

        let result = manager.run(vec![entry("Berserk", LocalStatus::Reading, Some(12))]);

        assert!(matches!(result, Err(SyncError::TokenInvalid { status: 401 })));
        assert_eq!(catalog.calls(), vec!["viewer".to_string()]);
        let mut failed = false;
        while let Ok(message) = observer.try_recv() {
            failed |= matches!(message, SyncMessage::Failed(_));
        }
        assert!(failed);
    }

    #[test]
    fn test_unavailable_list_aborts_before_any_update() {
        let dir = tempfile::tempdir().expect("temp dir");
        let mut catalog = catalog();
        catalog.list_unavailable = true;
        let (mut manager, _observer, catalog) =
            manager(dir.path(), catalog, Arc::new(AtomicBool::new(false)));

        let result = manager.run(vec![entry("Berserk", LocalStatus::Reading, Some(12))]);

        assert!(matches!(
            result,
            Err(SyncError::Gateway(GatewayError::ListUnavailable { chunk: 1 }))
        ));
        assert!(catalog.saved().is_empty());
        assert!(!catalog.calls().iter().any(|call| call.starts_with("search:")));
    }

    #[test]
    fn test_overridden_title_not_found_reports_exported_title() {
        let dir = tempfile::tempdir().expect("temp dir");
        let mut catalog = FakeCatalog::default();
        catalog.viewer = Some(7);
        let (mut manager, _observer, catalog) =
            manager(dir.path(), catalog, Arc::new(AtomicBool::new(false)));

        let summary = manager
            .run(vec![entry("Shingeki", LocalStatus::Reading, Some(20))])
            .expect("run should succeed");

        assert_eq!(summary.not_found, 1);
        assert!(catalog
            .calls()
            .contains(&"search:Attack on Titan".to_string()));
        let not_found = std::fs::read_to_string(dir.path().join("reports").join(NOT_FOUND_REPORT))
            .expect("not found report");
        assert_eq!(not_found, "Shingeki - last chapter read: 20\n");
    }

    #[test]
    fn test_stop_flag_skips_remaining_titles() {
        let dir = tempfile::tempdir().expect("temp dir");
        let stop = Arc::new(AtomicBool::new(false));
        let (mut manager, _observer, catalog) = manager(dir.path(), catalog(), Arc::clone(&stop));
        stop.store(true, Ordering::Relaxed);

        let summary = manager
            .run(vec![entry("Berserk", LocalStatus::Reading, Some(12))])
            .expect("stopped run still finishes");

        assert!(summary.stopped);
        assert_eq!(summary.updated, 0);
        assert!(catalog.saved().is_empty());
        assert!(!catalog.calls().iter().any(|call| call.starts_with("search:")));
    }

    #[test]
    fn test_second_run_reuses_search_cache() {
        let dir = tempfile::tempdir().expect("temp dir");
        let entries = vec![entry("Berserk", LocalStatus::Reading, Some(5))];
        let (mut first, _observer, _) =
            manager(dir.path(), catalog(), Arc::new(AtomicBool::new(false)));
        first.run(entries.clone()).expect("first run");

        let (mut second, _observer, catalog) =
            manager(dir.path(), catalog(), Arc::new(AtomicBool::new(false)));
        let summary = second.run(entries).expect("second run");

        assert_eq!(summary.unchanged, 1);
        assert!(!catalog.calls().iter().any(|call| call.starts_with("search:")));
        assert!(!catalog.calls().iter().any(|call| call.starts_with("format:")));
    }
}
