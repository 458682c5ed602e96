//! Parsing of the designated reading timestamp field.

use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};

const NANOS_PER_SECOND: i128 = 1_000_000_000;

/// A reading timestamp as UTC nanoseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReadingTime(i128);

impl ReadingTime {
    pub fn unix_nanos(self) -> i128 {
        self.0
    }
}

impl From<OffsetDateTime> for ReadingTime {
    fn from(value: OffsetDateTime) -> Self {
        Self(value.unix_timestamp_nanos())
    }
}

/// Parse a raw field value.
///
/// Accepted: Unix epoch seconds (integer or decimal), RFC 3339, and naive
/// `YYYY-MM-DD HH:MM:SS[.f]` / `YYYY-MM-DDTHH:MM:SS[.f]` read as UTC.
pub fn parse_reading_time(raw: &str) -> Option<ReadingTime> {
    let value = raw.trim();
    if value.is_empty() {
        return None;
    }
    if let Some(nanos) = parse_epoch_seconds(value) {
        return Some(ReadingTime(nanos));
    }
    if let Ok(dt) = OffsetDateTime::parse(value, &Rfc3339) {
        return Some(dt.into());
    }
    parse_naive(value).map(|dt| dt.assume_utc().into())
}

fn parse_naive(value: &str) -> Option<PrimitiveDateTime> {
    let spaced = format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second][optional [.[subsecond]]]"
    );
    let t_sep = format_description!(
        "[year]-[month]-[day]T[hour]:[minute]:[second][optional [.[subsecond]]]"
    );
    PrimitiveDateTime::parse(value, &spaced)
        .or_else(|_| PrimitiveDateTime::parse(value, &t_sep))
        .ok()
}

fn parse_epoch_seconds(value: &str) -> Option<i128> {
    let (negative, digits) = match value.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, value.strip_prefix('+').unwrap_or(value)),
    };
    let (whole, frac) = match digits.split_once('.') {
        Some((whole, frac)) => (whole, frac),
        None => (digits, ""),
    };
    if whole.is_empty() && frac.is_empty() {
        return None;
    }
    if !whole.bytes().all(|b| b.is_ascii_digit()) || !frac.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    // Sub-nanosecond digits are truncated.
    let frac = &frac[..frac.len().min(9)];
    let whole: i128 = if whole.is_empty() {
        0
    } else {
        whole.parse().ok()?
    };
    let mut frac_nanos: i128 = if frac.is_empty() { 0 } else { frac.parse().ok()? };
    for _ in frac.len()..9 {
        frac_nanos *= 10;
    }
    let nanos = whole.checked_mul(NANOS_PER_SECOND)?.checked_add(frac_nanos)?;
    Some(if negative { -nanos } else { nanos })
}
