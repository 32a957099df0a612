//! Pure calendar-predicate matching for the cron worker core.
//!
//! A [`Schedule`] is five independent sets (minute, hour, day-of-month,
//! month, weekday). [`Schedule::matches`] is the only operation that
//! matters to the scheduler: does a given instant satisfy all five sets at
//! once. Everything else here (the `FromStr` grammar) exists only so that
//! tests and the demo binary can write schedules as readable strings; it is
//! deliberately not a general-purpose cron-expression parser.

use chrono::{DateTime, Datelike, TimeZone, Timelike};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// One schedule field: either "any value matches" or an explicit set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Field(Option<BTreeSet<u32>>);

impl Field {
    /// A field that matches any value (the `*` wildcard).
    pub fn any() -> Self {
        Self(None)
    }

    /// A field that matches only the values in `values`.
    pub fn from_values(values: impl IntoIterator<Item = u32>) -> Self {
        Self(Some(values.into_iter().collect()))
    }

    pub fn matches(&self, value: u32) -> bool {
        match &self.0 {
            None => true,
            Some(set) => set.contains(&value),
        }
    }
}

/// A parse error for the small `FromStr` grammar (`*`, single values,
/// comma lists, and `a-b` ranges).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParseError {
    WrongNumberOfFields { found: usize },
    InvalidValue { field: &'static str, token: String },
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::WrongNumberOfFields { found } => write!(
                f,
                "expected 5 whitespace-separated fields (minute hour day-of-month month weekday), found {found}"
            ),
            ParseError::InvalidValue { field, token } => {
                write!(f, "invalid value {token:?} for field {field}")
            }
        }
    }
}

impl std::error::Error for ParseError {}

fn parse_field(field: &'static str, token: &str) -> Result<Field, ParseError> {
    if token == "*" {
        return Ok(Field::any());
    }

    let mut values = BTreeSet::new();
    for part in token.split(',') {
        match part.split_once('-') {
            Some((lo, hi)) => {
                let lo: u32 = lo
                    .parse()
                    .map_err(|_| ParseError::InvalidValue { field, token: token.to_owned() })?;
                let hi: u32 = hi
                    .parse()
                    .map_err(|_| ParseError::InvalidValue { field, token: token.to_owned() })?;
                if lo > hi {
                    return Err(ParseError::InvalidValue { field, token: token.to_owned() });
                }
                values.extend(lo..=hi);
            }
            None => {
                let v: u32 = part
                    .parse()
                    .map_err(|_| ParseError::InvalidValue { field, token: token.to_owned() })?;
                values.insert(v);
            }
        }
    }
    Ok(Field::from_values(values))
}

/// Five independent calendar sets. A match requires all five to agree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Schedule {
    minute: Field,
    hour: Field,
    day_of_month: Field,
    month: Field,
    weekday: Field,
}

impl Schedule {
    pub fn new(minute: Field, hour: Field, day_of_month: Field, month: Field, weekday: Field) -> Self {
        Self { minute, hour, day_of_month, month, weekday }
    }

    /// A schedule matching every minute of every day.
    pub fn every_minute() -> Self {
        Self::new(Field::any(), Field::any(), Field::any(), Field::any(), Field::any())
    }

    /// Does `instant` (truncated to the minute) satisfy every field?
    ///
    /// Weekday is encoded as `0..=6` with Sunday as `0`, matching the
    /// original daemon's `checkWeekday`.
    pub fn matches<Tz: TimeZone>(&self, instant: &DateTime<Tz>) -> bool {
        self.minute.matches(instant.minute())
            && self.hour.matches(instant.hour())
            && self.day_of_month.matches(instant.day())
            && self.month.matches(instant.month())
            && self.weekday.matches(instant.weekday().num_days_from_sunday())
    }
}

impl FromStr for Schedule {
    type Err = ParseError;

    /// Parses `"minute hour day-of-month month weekday"`, e.g.
    /// `"30 * * * *"` (every hour, on the 30th minute) or `"* * * * *"`
    /// (every minute).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(ParseError::WrongNumberOfFields { found: fields.len() });
        }
        Ok(Self {
            minute: parse_field("minute", fields[0])?,
            hour: parse_field("hour", fields[1])?,
            day_of_month: parse_field("day_of_month", fields[2])?,
            month: parse_field("month", fields[3])?,
            weekday: parse_field("weekday", fields[4])?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn wildcard_matches_every_minute() {
        let schedule = Schedule::every_minute();
        assert!(schedule.matches(&at(2026, 7, 28, 13, 0)));
        assert!(schedule.matches(&at(2026, 1, 1, 0, 59)));
    }

    #[test]
    fn single_minute_value_matches_only_that_minute() {
        let schedule: Schedule = "30 * * * *".parse().unwrap();
        assert!(schedule.matches(&at(2026, 7, 28, 13, 30)));
        assert!(!schedule.matches(&at(2026, 7, 28, 13, 31)));
    }

    #[test]
    fn comma_list_matches_any_listed_value() {
        let schedule: Schedule = "0,15,30,45 * * * *".parse().unwrap();
        for minute in [0, 15, 30, 45] {
            assert!(schedule.matches(&at(2026, 7, 28, 9, minute)));
        }
        assert!(!schedule.matches(&at(2026, 7, 28, 9, 20)));
    }

    #[test]
    fn range_matches_inclusive_bounds() {
        let schedule: Schedule = "* 9-17 * * *".parse().unwrap();
        assert!(schedule.matches(&at(2026, 7, 28, 9, 0)));
        assert!(schedule.matches(&at(2026, 7, 28, 17, 59)));
        assert!(!schedule.matches(&at(2026, 7, 28, 18, 0)));
        assert!(!schedule.matches(&at(2026, 7, 28, 8, 59)));
    }

    #[test]
    fn all_five_fields_must_agree() {
        // Every Monday (weekday=1) in March, at 9:00.
        let schedule: Schedule = "0 9 * 3 1".parse().unwrap();
        // 2026-03-02 is a Monday.
        assert!(schedule.matches(&at(2026, 3, 2, 9, 0)));
        // Same time, wrong month.
        assert!(!schedule.matches(&at(2026, 4, 6, 9, 0)));
        // Same month/time, wrong weekday.
        assert!(!schedule.matches(&at(2026, 3, 3, 9, 0)));
    }

    #[test]
    fn wrong_field_count_is_rejected() {
        assert_eq!(
            "* * * *".parse::<Schedule>(),
            Err(ParseError::WrongNumberOfFields { found: 4 })
        );
    }

    #[test]
    fn invalid_value_is_rejected() {
        assert!(matches!(
            "sixty * * * *".parse::<Schedule>(),
            Err(ParseError::InvalidValue { field: "minute", .. })
        ));
    }

    #[test]
    fn inverted_range_is_rejected() {
        assert!("10-5 * * * *".parse::<Schedule>().is_err());
    }
}
