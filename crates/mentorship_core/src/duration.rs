//! crates/mentorship_core/src/duration.rs
//!
//! Converts the free-text meeting durations typed into calendar events
//! ("1h", "2h30m", "90 min", "1.5 hours") into whole minutes. Counters are
//! kept in minutes so that adding and removing the same duration cancels out.

use regex::Regex;
use std::sync::OnceLock;

fn component_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*(hours?|hrs?|h|minutes?|mins?|m)")
            .expect("duration pattern is valid")
    })
}

/// Parses a duration into whole minutes. A bare number is read as hours.
///
/// Returns `None` when the text contains anything other than number/unit pairs.
/// Fractions of a minute round to the nearest minute.
pub fn parse_minutes(text: &str) -> Option<i64> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(hours) = text.parse::<f64>() {
        return (hours.is_finite() && hours >= 0.0).then(|| (hours * 60.0).round() as i64);
    }

    let mut total = 0.0;
    let mut consumed = 0;
    for caps in component_pattern().captures_iter(text) {
        let whole = caps.get(0)?;
        // Only whitespace and commas may sit between components.
        let gap = &text[consumed..whole.start()];
        if !gap.chars().all(|c| c.is_whitespace() || c == ',') {
            return None;
        }
        consumed = whole.end();

        let amount: f64 = caps[1].parse().ok()?;
        let unit = caps[2].to_ascii_lowercase();
        total += if unit.starts_with('h') {
            amount * 60.0
        } else {
            amount
        };
    }
    if consumed == 0 || !text[consumed..].trim().is_empty() || !total.is_finite() {
        return None;
    }
    Some(total.round() as i64)
}

/// Minutes as fractional hours, for display.
pub fn minutes_to_hours(minutes: i64) -> f64 {
    minutes as f64 / 60.0
}
