//! Archive naming convention and classification.
//!
//! Every archive produced by the runner is named
//! `YYYY-MM-DD-<group>.<tar|sql>.gz`. The leading date orders archives inside
//! a group, the group name ties together the archives of one directory or
//! database. Names that do not follow the convention are never classified, so
//! retention can never touch unrelated files on a storage.

pub mod producer;

use chrono::{NaiveDate, NaiveDateTime};
use std::collections::BTreeMap;

const DATE_LEN: usize = 10;
const DATE_FORMAT: &str = "%Y-%m-%d";

/// Payload type of an archive, encoded in the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArchiveKind {
    /// Directory tarball (`.tar.gz`)
    Tar,
    /// Database dump (`.sql.gz`)
    Sql,
}

impl ArchiveKind {
    pub fn suffix(self) -> &'static str {
        match self {
            ArchiveKind::Tar => ".tar.gz",
            ArchiveKind::Sql => ".sql.gz",
        }
    }
}

/// A filename recognised as a backup artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveFile {
    pub filename: String,
    pub group: String,
    pub date: NaiveDate,
    pub kind: ArchiveKind,
}

impl ArchiveFile {
    /// Parse a filename against the naming convention.
    ///
    /// Returns `None` for anything that does not match, including names whose
    /// date part is not a real calendar date (`2024-02-30`).
    pub fn parse(filename: &str) -> Option<Self> {
        let (stem, kind) = if let Some(stem) = filename.strip_suffix(ArchiveKind::Tar.suffix()) {
            (stem, ArchiveKind::Tar)
        } else if let Some(stem) = filename.strip_suffix(ArchiveKind::Sql.suffix()) {
            (stem, ArchiveKind::Sql)
        } else {
            return None;
        };

        // `<date>-<group>` with a non-empty group
        if stem.len() < DATE_LEN + 2 || !stem.is_char_boundary(DATE_LEN) {
            return None;
        }
        let (date_part, rest) = stem.split_at(DATE_LEN);
        let group = rest.strip_prefix('-')?;
        if group.is_empty() || !is_date_shape(date_part) {
            return None;
        }

        let date = NaiveDate::parse_from_str(date_part, DATE_FORMAT).ok()?;

        Some(Self {
            filename: filename.to_string(),
            group: group.to_string(),
            date,
            kind,
        })
    }

    /// Sort key: the archive date at midnight.
    pub fn timestamp(&self) -> NaiveDateTime {
        self.date.and_time(chrono::NaiveTime::MIN)
    }
}

/// `\d{4}-\d{2}-\d{2}`
fn is_date_shape(s: &str) -> bool {
    s.bytes().enumerate().all(|(i, b)| match i {
        4 | 7 => b == b'-',
        _ => b.is_ascii_digit(),
    })
}

/// Build the conventional archive name, e.g. `2024-03-01-dir-site.tar.gz`.
pub fn archive_name(date: NaiveDate, group: &str, kind: ArchiveKind) -> String {
    format!("{}-{}{}", date.format(DATE_FORMAT), group, kind.suffix())
}

/// Whether a name follows the archive naming convention.
pub fn is_archive_name(filename: &str) -> bool {
    ArchiveFile::parse(filename).is_some()
}

/// Archives bucketed by group, each bucket ordered newest first.
pub type ArchiveGroups = BTreeMap<String, Vec<ArchiveFile>>;

/// Classify a raw storage listing into groups.
///
/// Non-matching names (including `.` and `..`) are dropped. Inside a group
/// archives are sorted by date, newest first; archives sharing a date keep
/// their listing order.
pub fn classify<I, S>(filenames: I) -> ArchiveGroups
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut groups = ArchiveGroups::new();

    for name in filenames {
        if let Some(file) = ArchiveFile::parse(name.as_ref()) {
            groups.entry(file.group.clone()).or_default().push(file);
        }
    }

    for files in groups.values_mut() {
        // stable
        files.sort_by(|a, b| b.timestamp().cmp(&a.timestamp()));
    }

    groups
}
