//! Reading-history import from the tracking-service CSV export.

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::Path;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use csv::StringRecord;
use log::{debug, info, warn};
use serde::Deserialize;

use crate::error::SyncError;
use crate::protocol::{LocalEntry, LocalStatus};

#[derive(Debug, Deserialize)]
struct ExportRow {
    title: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    last_chapter_read: Option<String>,
    #[serde(default)]
    last_read_at: Option<String>,
}

/// Parses a chapter cell. Decimal chapters round down.
pub fn parse_chapter(raw: &str) -> Option<u32> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    match trimmed.parse::<f64>() {
        Ok(value) if value.is_finite() && value >= 0.0 && value <= f64::from(u32::MAX) => {
            Some(value.floor() as u32)
        }
        _ => {
            warn!("Ignoring unparseable chapter value '{trimmed}'");
            None
        }
    }
}

pub fn parse_read_at(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(parsed.with_timezone(&Utc));
    }
    let without_zone = trimmed.trim_end_matches(" UTC");
    if let Ok(parsed) = NaiveDateTime::parse_from_str(without_zone, "%Y-%m-%d %H:%M:%S") {
        return Some(parsed.and_utc());
    }
    if let Some(parsed) = NaiveDate::parse_from_str(without_zone, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
    {
        return Some(parsed.and_utc());
    }
    warn!("Ignoring unparseable read date '{trimmed}'");
    None
}

/// Reads export rows from any CSV source. Header names are matched case-insensitively.
pub fn parse_export<R: io::Read>(source: R) -> Result<Vec<LocalEntry>, SyncError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(source);
    let headers: StringRecord = reader
        .headers()?
        .iter()
        .map(|header| header.trim().to_ascii_lowercase())
        .collect();
    reader.set_headers(headers);

    let mut entries = Vec::new();
    for row in reader.deserialize::<ExportRow>() {
        let row = row?;
        if row.title.trim().is_empty() {
            debug!("Skipping export row without a title");
            continue;
        }
        let status = match row.status.as_deref().map(str::trim) {
            Some(status) if !status.is_empty() => LocalStatus::parse(status),
            _ => {
                warn!("Skipping '{}': export row has no status", row.title.trim());
                continue;
            }
        };
        entries.push(LocalEntry {
            title: row.title.trim().to_string(),
            last_chapter_read: row.last_chapter_read.as_deref().and_then(parse_chapter),
            status,
            last_read_at: row.last_read_at.as_deref().and_then(parse_read_at),
        });
    }
    Ok(entries)
}

/// Keeps one entry per title: highest chapter, then most recent read date.
pub fn collapse_duplicates(entries: Vec<LocalEntry>) -> Vec<LocalEntry> {
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut collapsed: Vec<LocalEntry> = Vec::new();
    for entry in entries {
        match positions.get(&entry.title) {
            Some(&index) => {
                let current = &collapsed[index];
                let replaces = (entry.last_chapter_read, entry.last_read_at)
                    > (current.last_chapter_read, current.last_read_at);
                if replaces {
                    collapsed[index] = entry;
                }
            }
            None => {
                positions.insert(entry.title.clone(), collapsed.len());
                collapsed.push(entry);
            }
        }
    }
    collapsed
}

/// Drops entries whose title, status and chapter were already in `previous`.
pub fn drop_unchanged(current: Vec<LocalEntry>, previous: &[LocalEntry]) -> Vec<LocalEntry> {
    let seen: HashSet<(&str, &LocalStatus, Option<u32>)> = previous
        .iter()
        .map(|entry| (entry.title.as_str(), &entry.status, entry.last_chapter_read))
        .collect();
    current
        .into_iter()
        .filter(|entry| {
            !seen.contains(&(entry.title.as_str(), &entry.status, entry.last_chapter_read))
        })
        .collect()
}

fn read_export_file(path: &Path) -> Result<Vec<LocalEntry>, SyncError> {
    let file = std::fs::File::open(path)?;
    parse_export(io::BufReader::new(file))
}

/// Loads the export at `csv_path`, keeping only rows changed since `previous_csv`.
pub fn load_local_entries(
    csv_path: &Path,
    previous_csv: Option<&Path>,
) -> Result<Vec<LocalEntry>, SyncError> {
    let entries = collapse_duplicates(read_export_file(csv_path)?);
    info!("Loaded {} titles from {}", entries.len(), csv_path.display());
    let Some(previous_path) = previous_csv else {
        return Ok(entries);
    };
    let previous = read_export_file(previous_path)?;
    let changed = drop_unchanged(entries, &previous);
    info!(
        "{} titles changed since {}",
        changed.len(),
        previous_path.display()
    );
    Ok(changed)
}
