//! Parsing of the instants and durations accepted on the command line.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::CliError;

/// An RFC 3339 instant such as `2020-06-01T12:00:00Z` or `2020-06-01T13:00:00.5+01:00`.
pub fn parse_instant(s: &str) -> Result<DateTime<Utc>, CliError> {
    DateTime::parse_from_rfc3339(s)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| CliError::InvalidArgument(format!("Invalid instant '{s}': {e}")))
}

/// An ISO-8601 duration of the form `PnDTnHnMn.nS`, e.g. `PT0.5S`, `PT15M` or `P1DT2H`.
/// Letters are case-insensitive. Negative durations and units above days are not accepted.
pub fn parse_duration(s: &str) -> Result<Duration, CliError> {
    let invalid = |reason: &str| CliError::InvalidArgument(format!("Invalid duration '{s}': {reason}"));

    let upper = s.to_ascii_uppercase();
    let rest = upper
        .strip_prefix('P')
        .ok_or_else(|| invalid("must start with 'P'"))?;
    let (date_part, time_part) = match rest.split_once('T') {
        Some((_, "")) => return Err(invalid("no time components after 'T'")),
        Some((date, time)) => (date, Some(time)),
        None => (rest, None),
    };

    let mut nanos: u128 = 0;
    let mut components = 0;
    for (part, units) in [(date_part, &["D"][..]), (time_part.unwrap_or(""), &["H", "M", "S"][..])] {
        let mut remaining = part;
        let mut allowed = units.iter();
        while !remaining.is_empty() {
            let end = remaining
                .find(|c: char| c.is_ascii_alphabetic())
                .ok_or_else(|| invalid("number without unit"))?;
            let (number, unit) = (&remaining[..end], &remaining[end..end + 1]);
            remaining = &remaining[end + 1..];
            // units must appear in order, each at most once
            if !allowed.by_ref().any(|u| *u == unit) {
                return Err(invalid(&format!("unexpected unit '{unit}'")));
            }
            let unit_nanos: u128 = match unit {
                "D" => 86_400_000_000_000,
                "H" => 3_600_000_000_000,
                "M" => 60_000_000_000,
                _ => 1_000_000_000,
            };
            nanos += component_nanos(number, unit_nanos, unit == "S").ok_or_else(|| {
                invalid(&format!("bad number '{number}'"))
            })?;
            components += 1;
        }
    }
    if components == 0 {
        return Err(invalid("no components"));
    }

    let secs = u64::try_from(nanos / 1_000_000_000).map_err(|_| invalid("too large"))?;
    Ok(Duration::new(secs, (nanos % 1_000_000_000) as u32))
}

/// `number` units of `unit_nanos` each. Only seconds may have a fraction, of at most 9 digits.
fn component_nanos(number: &str, unit_nanos: u128, fraction_allowed: bool) -> Option<u128> {
    let (whole, fraction) = match number.split_once(['.', ',']) {
        Some((whole, fraction)) if fraction_allowed => (whole, fraction),
        Some(_) => return None,
        None => (number, ""),
    };
    if whole.is_empty() || !whole.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if fraction.len() > 9 || !fraction.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let whole: u128 = whole.parse().ok()?;
    let fraction: u128 = if fraction.is_empty() {
        0
    } else {
        format!("{fraction:0<9}").parse().ok()?
    };
    whole.checked_mul(unit_nanos)?.checked_add(fraction)
}
