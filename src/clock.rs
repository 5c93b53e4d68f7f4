use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A point on the 24-hour clock, stored as whole minutes since midnight.
///
/// Parsed from the 12-hour `"<hour>.<minutes><AM|PM>"` format used by
/// time-slot templates (`"9.00AM"`, `"2.30PM"`). Only used for comparison;
/// templates keep the original strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimeOfDay(u16);

impl TimeOfDay {
    pub fn from_hm(hour: u16, minute: u16) -> Option<Self> {
        if hour >= 24 || minute >= 60 {
            return None;
        }
        Some(Self(hour * 60 + minute))
    }

    pub fn minutes(self) -> u16 {
        self.0
    }

    /// Decimal-hour view, e.g. 14:30 → 14.5.
    pub fn decimal_hours(self) -> f64 {
        f64::from(self.0) / 60.0
    }

    /// Parse a 12-hour clock string.
    ///
    /// `12.xxAM` is the midnight hour (0:xx) and `12.xxPM` the noon hour
    /// (12:xx); every other PM hour is shifted by twelve.
    pub fn parse_clock(input: &str) -> Result<Self, ClockError> {
        let s = input.trim();
        if s.is_empty() {
            return Err(ClockError::Empty);
        }
        if !s.is_ascii() || s.len() < 3 {
            return Err(ClockError::Malformed(input.to_string()));
        }
        let (digits, suffix) = s.split_at(s.len() - 2);
        let pm = match suffix.to_ascii_uppercase().as_str() {
            "AM" => false,
            "PM" => true,
            _ => return Err(ClockError::MissingSuffix(input.to_string())),
        };

        let (hour, minute) = digits
            .split_once('.')
            .ok_or_else(|| ClockError::Malformed(input.to_string()))?;
        if hour.is_empty() || hour.len() > 2 || !hour.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ClockError::Malformed(input.to_string()));
        }
        if minute.len() != 2 || !minute.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ClockError::Malformed(input.to_string()));
        }
        let hour: u16 = hour
            .parse()
            .map_err(|_| ClockError::Malformed(input.to_string()))?;
        let minute: u16 = minute
            .parse()
            .map_err(|_| ClockError::Malformed(input.to_string()))?;
        if !(1..=12).contains(&hour) || minute >= 60 {
            return Err(ClockError::OutOfRange(input.to_string()));
        }

        let hour24 = match (hour, pm) {
            (12, false) => 0,
            (12, true) => 12,
            (h, false) => h,
            (h, true) => h + 12,
        };
        Self::from_hm(hour24, minute).ok_or_else(|| ClockError::OutOfRange(input.to_string()))
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.0 / 60, self.0 % 60)
    }
}

/// Closed interval `[start, end]` within a single day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeInterval {
    pub start: TimeOfDay,
    pub end: TimeOfDay,
}

impl TimeInterval {
    pub fn new(start: TimeOfDay, end: TimeOfDay) -> Result<Self, ClockError> {
        if start >= end {
            return Err(ClockError::EmptyInterval { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn parse(start: &str, end: &str) -> Result<Self, ClockError> {
        Self::new(TimeOfDay::parse_clock(start)?, TimeOfDay::parse_clock(end)?)
    }

    /// Touching endpoints count as overlap: back-to-back intervals conflict.
    pub fn overlaps(&self, other: &TimeInterval) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClockError {
    #[error("empty time string")]
    Empty,
    #[error("time {0:?} must end in AM or PM")]
    MissingSuffix(String),
    #[error("time {0:?} is not in <hour>.<minutes><AM|PM> form")]
    Malformed(String),
    #[error("time {0:?} is out of range")]
    OutOfRange(String),
    #[error("interval start {start} must be before end {end}")]
    EmptyInterval { start: TimeOfDay, end: TimeOfDay },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(s: &str) -> TimeOfDay {
        TimeOfDay::parse_clock(s).unwrap()
    }

    fn iv(start: &str, end: &str) -> TimeInterval {
        TimeInterval::parse(start, end).unwrap()
    }

    #[test]
    fn parses_morning_and_afternoon() {
        assert_eq!(t("9.00AM"), TimeOfDay::from_hm(9, 0).unwrap());
        assert_eq!(t("2.30PM"), TimeOfDay::from_hm(14, 30).unwrap());
        assert_eq!(t("11.59PM").minutes(), 23 * 60 + 59);
        assert_eq!(t("2.30pm"), t("2.30PM"));
        assert_eq!(t("  10.15AM "), TimeOfDay::from_hm(10, 15).unwrap());
    }

    #[test]
    fn noon_and_midnight() {
        assert_eq!(t("12.00AM").minutes(), 0);
        assert_eq!(t("12.30AM").minutes(), 30);
        assert_eq!(t("12.00PM").minutes(), 12 * 60);
        assert_eq!(t("12.45PM").minutes(), 12 * 60 + 45);
        assert!(t("11.59AM") < t("12.00PM"));
        assert!(t("12.59PM") < t("1.00PM"));
    }

    #[test]
    fn decimal_hours_view() {
        assert_eq!(t("2.30PM").decimal_hours(), 14.5);
        assert_eq!(t("9.00AM").decimal_hours(), 9.0);
    }

    #[test]
    fn rejects_malformed() {
        assert_eq!(TimeOfDay::parse_clock(""), Err(ClockError::Empty));
        assert!(matches!(TimeOfDay::parse_clock("9.00"), Err(ClockError::MissingSuffix(_))));
        assert!(matches!(TimeOfDay::parse_clock("9AM"), Err(ClockError::Malformed(_))));
        assert!(matches!(TimeOfDay::parse_clock("9.5AM"), Err(ClockError::Malformed(_))));
        assert!(matches!(TimeOfDay::parse_clock("x.00AM"), Err(ClockError::Malformed(_))));
        assert!(matches!(TimeOfDay::parse_clock("13.00PM"), Err(ClockError::OutOfRange(_))));
        assert!(matches!(TimeOfDay::parse_clock("0.30AM"), Err(ClockError::OutOfRange(_))));
        assert!(matches!(TimeOfDay::parse_clock("9.60AM"), Err(ClockError::OutOfRange(_))));
        assert!(matches!(TimeOfDay::parse_clock("9.00XM"), Err(ClockError::MissingSuffix(_))));
    }

    #[test]
    fn interval_requires_start_before_end() {
        assert!(TimeInterval::parse("9.00AM", "9.00AM").is_err());
        assert!(TimeInterval::parse("2.00PM", "9.00AM").is_err());
    }

    #[test]
    fn overlap_is_closed() {
        let booked = iv("9.00AM", "11.00AM");
        // nested
        assert!(booked.overlaps(&iv("10.00AM", "10.30AM")));
        // touching on either side
        assert!(booked.overlaps(&iv("11.00AM", "12.00PM")));
        assert!(booked.overlaps(&iv("8.00AM", "9.00AM")));
        // partial
        assert!(booked.overlaps(&iv("10.30AM", "1.00PM")));
        assert!(booked.overlaps(&iv("8.00AM", "9.30AM")));
        // enclosing and identical
        assert!(booked.overlaps(&iv("8.00AM", "12.00PM")));
        assert!(booked.overlaps(&booked));
        // disjoint
        assert!(!booked.overlaps(&iv("11.01AM", "12.00PM")));
        assert!(!booked.overlaps(&iv("7.00AM", "8.59AM")));
    }

    #[test]
    fn overlap_matches_closed_predicate_on_quarter_hour_grid() {
        // Sampled from a 15-minute grid across the whole day.
        let points: Vec<TimeOfDay> = (0..96u16)
            .map(|q| TimeOfDay::from_hm(q / 4, (q % 4) * 15).unwrap())
            .collect();
        let intervals: Vec<TimeInterval> = points
            .iter()
            .flat_map(|&s| points.iter().filter(move |&&e| e > s).map(move |&e| (s, e)))
            .step_by(37)
            .map(|(s, e)| TimeInterval::new(s, e).unwrap())
            .collect();
        for a in &intervals {
            for b in &intervals {
                assert_eq!(a.overlaps(b), a.start <= b.end && b.start <= a.end);
                assert_eq!(a.overlaps(b), b.overlaps(a));
            }
        }
    }
}
