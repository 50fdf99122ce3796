use std::fmt::Write;
use std::path::MAIN_SEPARATOR;

use chrono::NaiveDate;

/// Template tokens and their strftime equivalents. Longer tokens come before
/// their own prefixes.
const TOKENS: &[(&str, &str)] = &[
    ("YYYY", "%Y"), // 2017
    ("YY", "%y"),   // 17
    ("MM", "%m"),   // 12
    ("M", "%B"),    // December
    ("m", "%b"),    // Dec
    ("DDD", "%j"),  // 359 (day of year)
    ("DD", "%d"),   // 25
    ("U", "%U"),    // week number, Sunday first
    ("W", "%W"),    // week number, Monday first
];

/// A directory layout such as `YYYY/MM/DD` or `YYYY/m`.
///
/// Both `/` and `\` become the host separator; characters that are not
/// tokens are copied literally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirFormat {
    strftime: String,
}

impl DirFormat {
    pub fn parse(template: &str) -> Self {
        let mut strftime = String::with_capacity(template.len() * 2);
        let mut rest = template;
        'outer: while !rest.is_empty() {
            for (token, conversion) in TOKENS {
                if let Some(after) = rest.strip_prefix(token) {
                    strftime.push_str(conversion);
                    rest = after;
                    continue 'outer;
                }
            }
            let mut chars = rest.chars();
            match chars.next() {
                Some('/' | '\\') => strftime.push(MAIN_SEPARATOR),
                Some('%') => strftime.push_str("%%"),
                Some(c) => strftime.push(c),
                None => break,
            }
            rest = chars.as_str();
        }
        Self { strftime }
    }

    pub fn as_strftime(&self) -> &str {
        &self.strftime
    }

    /// Expand the template for `date`. `None` if chrono rejects the format.
    pub fn format(&self, date: NaiveDate) -> Option<String> {
        let mut out = String::new();
        write!(out, "{}", date.format(&self.strftime)).ok()?;
        Some(out)
    }
}

impl Default for DirFormat {
    fn default() -> Self {
        Self::parse("YYYY/MM/DD")
    }
}
