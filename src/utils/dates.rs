// pgvault/src/utils/dates.rs
use chrono::{Datelike, NaiveDate};
use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::sync::OnceLock;

use crate::errors::{OpsError, OpsResult};

fn date_arg_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^(\d{4})([-/])(\d{1,2})([-/])(\d{1,2})$").ok())
        .as_ref()
}

/// Calendar day a backup folder belongs to.
///
/// Ordering is by the underlying date, so `2025/10/9` sorts before
/// `2025/10/10` regardless of how the remote path spells it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct BackupDate(NaiveDate);

impl BackupDate {
    /// Parses operator input in `YYYY-MM-DD` or `YYYY/MM/DD` form.
    /// Month and day may be one or two digits; the separator must not be mixed.
    pub fn parse(input: &str) -> OpsResult<Self> {
        let trimmed = input.trim();
        let invalid = |reason: &str| OpsError::InvalidDate {
            input: input.to_string(),
            reason: reason.to_string(),
        };

        let caps = date_arg_pattern()
            .ok_or_else(|| invalid("date pattern unavailable"))?
            .captures(trimmed)
            .ok_or_else(|| invalid("expected YYYY-MM-DD or YYYY/MM/DD"))?;
        if caps[2] != caps[4] {
            return Err(invalid("mixed separators"));
        }

        let year: i32 = caps[1].parse().map_err(|_| invalid("bad year"))?;
        let month: u32 = caps[3].parse().map_err(|_| invalid("bad month"))?;
        let day: u32 = caps[5].parse().map_err(|_| invalid("bad day"))?;

        NaiveDate::from_ymd_opt(year, month, day)
            .map(BackupDate)
            .ok_or_else(|| invalid("no such calendar date"))
    }

    /// Reads a `year/month/day` folder path as listed by the remote store.
    /// Zero padding is tolerated; anything that is not exactly three numeric
    /// segments forming a real date yields `None`.
    pub fn from_remote_path(path: &str) -> Option<Self> {
        let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
        if segments.len() != 3 {
            return None;
        }
        if segments
            .iter()
            .any(|s| s.is_empty() || !s.chars().all(|c| c.is_ascii_digit()))
        {
            return None;
        }

        let year: i32 = segments[0].parse().ok()?;
        let month: u32 = segments[1].parse().ok()?;
        let day: u32 = segments[2].parse().ok()?;
        NaiveDate::from_ymd_opt(year, month, day).map(BackupDate)
    }

    /// Canonical remote spelling: unpadded `year/month/day`.
    pub fn remote_path(&self) -> String {
        format!("{}/{}/{}", self.0.year(), self.0.month(), self.0.day())
    }

    pub fn date(&self) -> NaiveDate {
        self.0
    }
}

impl fmt::Display for BackupDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d"))
    }
}

impl From<NaiveDate> for BackupDate {
    fn from(date: NaiveDate) -> Self {
        BackupDate(date)
    }
}
