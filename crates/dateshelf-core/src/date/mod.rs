pub mod format;
pub mod guess;
pub mod offset;

use std::path::Path;

use chrono::{DateTime, Local, NaiveDateTime, TimeDelta};
use regex::Regex;

use crate::metadata::MetadataRecord;

/// Candidate capture-date tags, most precise first.
pub const DEFAULT_DATE_FIELDS: [&str; 5] = [
    "SubSecCreateDate",
    "SubSecDateTimeOriginal",
    "CreateDate",
    "DateTimeOriginal",
    "MediaCreateDate",
];

/// Tags that may carry the offset of an otherwise naive capture date.
pub const TIMEZONE_FIELDS: [&str; 3] = ["OffsetTimeOriginal", "OffsetTimeDigitized", "TimeZone"];

/// Cameras write `0000:00:00 00:00:00` when the clock was never set.
const ZERO_DATE_PREFIX: &str = "0000";

const DATE_LAYOUTS: [&str; 2] = ["%Y:%m:%d %H:%M:%S", "%Y-%m-%d %H:%M:%S"];

/// Outcome of date resolution for one file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedDate {
    /// Capture time; already shifted by `offset` when that is set.
    pub instant: Option<NaiveDateTime>,
    /// Fractional seconds exactly as written in the source, possibly empty.
    pub subseconds: String,
    /// UTC offset that was found and applied to `instant`. Informational only.
    pub offset: Option<TimeDelta>,
}

impl ResolvedDate {
    /// The "unknown date" value: no instant, no subseconds.
    pub fn unknown() -> Self {
        Self::default()
    }

    fn from_instant(instant: NaiveDateTime) -> Self {
        Self {
            instant: Some(instant),
            ..Self::default()
        }
    }

    pub fn is_known(&self) -> bool {
        self.instant.is_some()
    }
}

/// Parse a metadata timestamp such as `2017:01:01 01:01:01.123+02:00`.
///
/// An offset may trail either the seconds or the fractional part; it is
/// removed from the text before parsing and subtracted from the result. A
/// non-zero offset on the fractional part takes precedence over one on the
/// seconds.
pub fn parse_datestring(s: &str) -> ResolvedDate {
    let mut parts = s.split('.');
    let date = parts.next().unwrap_or_default();
    let subseconds = parts.next().unwrap_or_default();

    let (date, date_offset) = offset::split_offset(date);
    let (subseconds, sub_offset) = offset::split_offset(subseconds);
    let offset = sub_offset.filter(|o| !o.is_zero()).or(date_offset);

    let mut instant = DATE_LAYOUTS
        .iter()
        .find_map(|layout| NaiveDateTime::parse_from_str(&date, layout).ok());

    if let (Some(dt), Some(off)) = (instant, offset) {
        if !off.is_zero() {
            instant = dt.checked_sub_signed(off);
        }
    }

    ResolvedDate {
        instant,
        subseconds,
        offset,
    }
}

/// Turns metadata, file names and file timestamps into a [`ResolvedDate`].
#[derive(Debug, Clone)]
pub struct DateResolver {
    fields: Vec<String>,
    filename_regex: Option<Regex>,
    timestamp_fallback: bool,
}

impl Default for DateResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl DateResolver {
    pub fn new() -> Self {
        Self {
            fields: DEFAULT_DATE_FIELDS.iter().map(|f| f.to_string()).collect(),
            filename_regex: None,
            timestamp_fallback: false,
        }
    }

    /// Replace the candidate tags with a whitespace-separated list. A blank
    /// list keeps the defaults.
    pub fn with_fields(mut self, fields: &str) -> Self {
        let fields: Vec<String> = fields.split_whitespace().map(str::to_string).collect();
        if !fields.is_empty() {
            self.fields = fields;
        }
        self
    }

    pub fn with_filename_regex(mut self, regex: Option<Regex>) -> Self {
        self.filename_regex = regex;
        self
    }

    pub fn with_timestamp_fallback(mut self, enabled: bool) -> Self {
        self.timestamp_fallback = enabled;
        self
    }

    /// Date from metadata alone.
    pub fn from_metadata(&self, record: &MetadataRecord) -> ResolvedDate {
        let datestr = self
            .fields
            .iter()
            .filter_map(|key| record.text(key))
            .find(|value| !value.starts_with(ZERO_DATE_PREFIX));

        let mut resolved = match datestr {
            Some(s) => parse_datestring(s),
            None => ResolvedDate::unknown(),
        };

        if let (Some(instant), None) = (resolved.instant, resolved.offset) {
            let tz = TIMEZONE_FIELDS
                .iter()
                .filter_map(|key| record.text(key))
                .filter_map(offset::parse_offset)
                .find(|o| !o.is_zero());
            if let Some(tz) = tz {
                resolved.instant = instant.checked_sub_signed(tz);
                resolved.offset = Some(tz);
            }
        }

        resolved
    }

    /// Full resolution: metadata, then the file name, then (if enabled) the
    /// file's modification time. Never fails; the worst case is
    /// [`ResolvedDate::unknown`].
    pub fn resolve(&self, record: Option<&MetadataRecord>, path: &Path) -> ResolvedDate {
        if let Some(record) = record {
            let resolved = self.from_metadata(record);
            if resolved.is_known() {
                return resolved;
            }
        }

        let regex = self.filename_regex.as_ref().unwrap_or(&*guess::DEFAULT_FILENAME_RE);
        if let Some(instant) = guess::guess_date_from_filename(regex, path) {
            return ResolvedDate::from_instant(instant);
        }

        if self.timestamp_fallback {
            if let Some(instant) = modified_local(path) {
                return ResolvedDate::from_instant(instant);
            }
        }

        ResolvedDate::unknown()
    }
}

fn modified_local(path: &Path) -> Option<NaiveDateTime> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    Some(DateTime::<Local>::from(modified).naive_local())
}
