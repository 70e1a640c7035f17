//! Decides how a remote list entry must change to match local progress,
//! and applies the resulting steps in order.

use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};

use crate::anilist::{MangaCatalog, MediaListStatus, RemoteListEntry, SaveEntryVariables};
use crate::protocol::{LocalStatus, ResolvedMatch};

const DAYS_PER_STALENESS_MONTH: i64 = 30;

/// Maps the local status, demoting stale titles to paused.
pub fn effective_status(
    status: &LocalStatus,
    last_read_at: Option<DateTime<Utc>>,
    staleness_months: u32,
    now: DateTime<Utc>,
) -> MediaListStatus {
    if *status != LocalStatus::PlanToRead && staleness_months > 0 {
        if let Some(read_at) = last_read_at {
            let threshold = Duration::days(i64::from(staleness_months) * DAYS_PER_STALENESS_MONTH);
            if now - read_at >= threshold {
                return MediaListStatus::Paused;
            }
        }
    }
    status.to_list_status()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanDecision {
    /// Locally completed titles are never pushed.
    Completed,
    /// Remote already matches or is ahead.
    Unchanged,
    /// Ordered save steps; each assumes the previous one succeeded.
    Update(Vec<SaveEntryVariables>),
}

/// Builds the update plan for one resolved title against its remote entry, if any.
pub fn build_plan(
    local: &ResolvedMatch,
    remote: Option<&RemoteListEntry>,
    private: bool,
    staleness_months: u32,
    now: DateTime<Utc>,
) -> PlanDecision {
    let manga_status = effective_status(&local.status, local.last_read_at, staleness_months, now);
    let chapter_remote = remote.map(|entry| entry.progress);
    let status_remote = remote.map(|entry| &entry.status);
    let media_id = local.media_id;
    let step = || SaveEntryVariables::new(media_id).with_private(private);

    if manga_status == MediaListStatus::Completed {
        return PlanDecision::Completed;
    }

    let is_planning = manga_status == MediaListStatus::Planning;
    let remote_not_ahead = match (local.last_chapter_read, chapter_remote) {
        (None, _) | (_, None) => true,
        (Some(local_chapter), Some(remote_chapter)) => local_chapter <= remote_chapter,
    };
    if is_planning || (status_remote != Some(&manga_status) && remote_not_ahead) {
        let progress = if is_planning {
            Some(0)
        } else {
            local.last_chapter_read
        };
        return PlanDecision::Update(vec![step()
            .with_status(manga_status)
            .with_progress(progress)]);
    }

    let Some(local_chapter) = local.last_chapter_read else {
        return PlanDecision::Unchanged;
    };
    let local_ahead = chapter_remote.map_or(true, |remote_chapter| local_chapter > remote_chapter);
    if !local_ahead {
        return PlanDecision::Unchanged;
    }

    let first_progress = chapter_remote.map_or(1, |remote_chapter| remote_chapter + 1);
    let mut steps = vec![step().with_progress(Some(first_progress))];
    if first_progress != local_chapter {
        if is_planning {
            steps.push(step().with_progress(Some(local_chapter)));
            steps.push(step().with_status(manga_status));
        } else {
            steps.push(
                step()
                    .with_progress(Some(local_chapter))
                    .with_status(manga_status),
            );
        }
    }
    PlanDecision::Update(steps)
}

/// Running total of chapters pushed, counted once per media id.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ChapterTally {
    pub total: u64,
    last_reported: Option<u64>,
}

impl ChapterTally {
    /// Adds the gap between local and remote progress; returns the amount added.
    pub fn record(
        &mut self,
        media_id: u64,
        local_chapter: Option<u32>,
        remote_chapter: Option<u32>,
    ) -> Option<u64> {
        let local_chapter = local_chapter?;
        let remote_chapter = remote_chapter.unwrap_or(0);
        if local_chapter <= remote_chapter || self.last_reported == Some(media_id) {
            return None;
        }
        let added = u64::from(local_chapter - remote_chapter);
        self.total += added;
        self.last_reported = Some(media_id);
        Some(added)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    CompletedSkipped,
    Unchanged,
    Updated {
        steps: usize,
        chapters_added: Option<u64>,
    },
    /// A step was rejected; later steps were not sent.
    Failed { failed_step: usize },
}

pub struct Reconciler {
    private: bool,
    staleness_months: u32,
    dry_run: bool,
}

impl Reconciler {
    pub fn new(private: bool, staleness_months: u32, dry_run: bool) -> Self {
        Self {
            private,
            staleness_months,
            dry_run,
        }
    }

    pub fn reconcile(
        &self,
        catalog: &dyn MangaCatalog,
        title: &str,
        local: &ResolvedMatch,
        remote: Option<&RemoteListEntry>,
        tally: &mut ChapterTally,
        now: DateTime<Utc>,
    ) -> ReconcileOutcome {
        let steps = match build_plan(local, remote, self.private, self.staleness_months, now) {
            PlanDecision::Completed => {
                debug!("'{title}' is completed locally; not pushing");
                return ReconcileOutcome::CompletedSkipped;
            }
            PlanDecision::Unchanged => {
                debug!("'{title}' (media {}) unchanged", local.media_id);
                return ReconcileOutcome::Unchanged;
            }
            PlanDecision::Update(steps) => steps,
        };

        let remote_chapter = remote.map(|entry| entry.progress);
        let mut chapters_added = None;
        for (index, step) in steps.iter().enumerate() {
            if self.dry_run {
                info!("[dry run] would save {}", step.to_variables());
            } else {
                match catalog.save_entry(step) {
                    Ok(Some(_)) => {}
                    Ok(None) => {
                        warn!("Update {} for '{title}' was rejected", index + 1);
                        return ReconcileOutcome::Failed { failed_step: index };
                    }
                    Err(err) => {
                        warn!("Update {} for '{title}' failed: {err}", index + 1);
                        return ReconcileOutcome::Failed { failed_step: index };
                    }
                }
            }
            if let Some(added) = tally.record(step.media_id, local.last_chapter_read, remote_chapter)
            {
                chapters_added = Some(added);
            }
        }
        ReconcileOutcome::Updated {
            steps: steps.len(),
            chapters_added,
        }
    }
}
