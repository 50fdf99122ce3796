use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

/// Matches names such as `IMG_20160915_123456.jpg` or `VID-20170101-010101.mp4`.
pub static DEFAULT_FILENAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r".*[_-](?P<year>\d{4})(?P<month>\d{2})(?P<day>\d{2})[_-]?(?P<hour>\d{2})(?P<minute>\d{2})(?P<second>\d{2})",
    )
    .unwrap()
});

/// Date encoded in the base name of `filename`, using the named groups
/// `year`, `month`, `day` and optionally `hour`, `minute`, `second`.
///
/// Groups that did not take part in the match count as zero. Every named
/// group must hold an integer, and the result must be a real calendar date.
pub fn guess_date_from_filename(regex: &Regex, filename: &Path) -> Option<NaiveDateTime> {
    let basename = filename.file_name()?.to_string_lossy();
    let caps = regex.captures(&basename)?;

    let mut year = None;
    let mut month = None;
    let mut day = None;
    let (mut hour, mut minute, mut second) = (0, 0, 0);
    for name in regex.capture_names().flatten() {
        let value: i64 = caps.name(name).map_or("0", |m| m.as_str()).parse().ok()?;
        match name {
            "year" => year = Some(value),
            "month" => month = Some(value),
            "day" => day = Some(value),
            "hour" => hour = value,
            "minute" => minute = value,
            "second" => second = value,
            _ => {}
        }
    }

    let date = NaiveDate::from_ymd_opt(
        i32::try_from(year?).ok()?,
        u32::try_from(month?).ok()?,
        u32::try_from(day?).ok()?,
    )?;
    date.and_hms_opt(
        u32::try_from(hour).ok()?,
        u32::try_from(minute).ok()?,
        u32::try_from(second).ok()?,
    )
}
