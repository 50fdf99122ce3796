use chrono::TimeDelta;
use regex::Regex;
use std::sync::LazyLock;

static OFFSET_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"([+-])(\d{2}):?(\d{2})").unwrap());
static TRAILING_OFFSET_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(.*)([+-]\d{2}:?\d{2})").unwrap());

/// Parse offsets like `+02:00` or `-0700`. Anything else yields `None`.
pub fn parse_offset(s: &str) -> Option<TimeDelta> {
    let caps = OFFSET_RE.captures(s)?;
    let sign = if &caps[1] == "+" { 1 } else { -1 };
    let hours: i64 = caps[2].parse().ok()?;
    let minutes: i64 = caps[3].parse().ok()?;
    Some(TimeDelta::hours(sign * hours) + TimeDelta::minutes(sign * minutes))
}

/// Cut the last offset out of `s`.
///
/// Returns the remaining text and the offset, or `s` untouched and `None`.
/// Text following the offset stays attached to both halves.
pub fn split_offset(s: &str) -> (String, Option<TimeDelta>) {
    let Some(caps) = TRAILING_OFFSET_RE.captures(s) else {
        return (s.to_string(), None);
    };
    let whole = caps.get(0).map_or(0..0, |m| m.range());
    let tail = &s[whole.end..];
    let host = format!("{}{}", &caps[1], tail);
    let offset = parse_offset(&format!("{}{}", &caps[2], tail));
    (host, offset)
}
