//! End-of-run follow-up files for titles that need manual attention.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use log::info;

use crate::protocol::NotFoundEntry;

pub const NOT_FOUND_REPORT: &str = "not_found.txt";
pub const MULTIPLE_IDS_REPORT: &str = "multiple_ids.txt";

fn render_not_found(entries: &[NotFoundEntry]) -> String {
    entries
        .iter()
        .map(|entry| match entry.last_chapter_read {
            Some(chapter) => format!("{} - last chapter read: {}\n", entry.title, chapter),
            None => format!("{} - last chapter read: none\n", entry.title),
        })
        .collect()
}

fn render_multiple_ids(multiple: &BTreeMap<String, Vec<u64>>) -> String {
    multiple
        .iter()
        .map(|(title, ids)| {
            let ids: Vec<String> = ids.iter().map(u64::to_string).collect();
            format!("{}: {}\n", title, ids.join(", "))
        })
        .collect()
}

/// Writes `content` to `path`, or removes a stale file when there is nothing to report.
fn write_or_remove(path: &Path, content: &str) -> io::Result<Option<PathBuf>> {
    if content.is_empty() {
        return match std::fs::remove_file(path) {
            Ok(()) => Ok(None),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        };
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)?;
    info!("Wrote {}", path.display());
    Ok(Some(path.to_path_buf()))
}

/// Paths of the reports written by one run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WrittenReports {
    pub not_found: Option<PathBuf>,
    pub multiple_ids: Option<PathBuf>,
}

pub fn write_reports(
    report_dir: &Path,
    not_found: &[NotFoundEntry],
    multiple: &BTreeMap<String, Vec<u64>>,
) -> io::Result<WrittenReports> {
    Ok(WrittenReports {
        not_found: write_or_remove(
            &report_dir.join(NOT_FOUND_REPORT),
            &render_not_found(not_found),
        )?,
        multiple_ids: write_or_remove(
            &report_dir.join(MULTIPLE_IDS_REPORT),
            &render_multiple_ids(multiple),
        )?,
    })
}
