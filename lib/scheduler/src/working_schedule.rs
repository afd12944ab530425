//! Working-hours schedules and weekday window resolution.
//!
//! All times are UTC. A schedule row covers a weekday range such as
//! `Mon-Fri` (or a single day, `Sat` / `Sat-Sat`) from `startHour` to
//! `endHour`, both `HH:MM`.

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Utc, Weekday};
use flowline_core::UserId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One working-hours row of a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserWorkingSchedule {
    pub user_id: UserId,
    pub day_range: String,
    pub start_hour: String,
    pub end_hour: String,
}

impl UserWorkingSchedule {
    #[must_use]
    pub fn new(
        user_id: UserId,
        day_range: impl Into<String>,
        start_hour: impl Into<String>,
        end_hour: impl Into<String>,
    ) -> Self {
        Self {
            user_id,
            day_range: day_range.into(),
            start_hour: start_hour.into(),
            end_hour: end_hour.into(),
        }
    }

    /// Parses the row into a typed window.
    ///
    /// # Errors
    ///
    /// Returns an error if the day range or either hour is malformed, or the
    /// window ends before it starts.
    pub fn parse(&self) -> Result<ParsedSchedule, ScheduleParseError> {
        let days: DayRange = self.day_range.parse()?;
        let start = parse_hour(&self.start_hour)?;
        let end = parse_hour(&self.end_hour)?;
        if end < start {
            return Err(ScheduleParseError::EmptyWindow {
                start: self.start_hour.clone(),
                end: self.end_hour.clone(),
            });
        }
        Ok(ParsedSchedule { days, start, end })
    }
}

/// Errors from parsing a schedule row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleParseError {
    InvalidDayRange { value: String },
    InvalidHour { value: String },
    EmptyWindow { start: String, end: String },
}

impl fmt::Display for ScheduleParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidDayRange { value } => write!(f, "invalid day range: {value}"),
            Self::InvalidHour { value } => write!(f, "invalid hour (expected HH:MM): {value}"),
            Self::EmptyWindow { start, end } => write!(f, "window ends before it starts: {start}-{end}"),
        }
    }
}

impl std::error::Error for ScheduleParseError {}

/// An inclusive range of weekdays in Mon..Sun order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayRange {
    pub from: Weekday,
    pub to: Weekday,
}

impl DayRange {
    /// Returns true if `day` lies within the range.
    #[must_use]
    pub fn contains(&self, day: Weekday) -> bool {
        let index = day.num_days_from_monday();
        self.from.num_days_from_monday() <= index && index <= self.to.num_days_from_monday()
    }
}

fn parse_day(value: &str) -> Option<Weekday> {
    match value.trim().to_ascii_lowercase().as_str() {
        "mon" => Some(Weekday::Mon),
        "tue" => Some(Weekday::Tue),
        "wed" => Some(Weekday::Wed),
        "thu" => Some(Weekday::Thu),
        "fri" => Some(Weekday::Fri),
        "sat" => Some(Weekday::Sat),
        "sun" => Some(Weekday::Sun),
        _ => None,
    }
}

impl FromStr for DayRange {
    type Err = ScheduleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ScheduleParseError::InvalidDayRange {
            value: s.to_string(),
        };
        let (from, to) = match s.split_once('-') {
            Some((from, to)) => (parse_day(from), parse_day(to)),
            None => (parse_day(s), parse_day(s)),
        };
        let (Some(from), Some(to)) = (from, to) else {
            return Err(invalid());
        };
        if from.num_days_from_monday() > to.num_days_from_monday() {
            return Err(invalid());
        }
        Ok(Self { from, to })
    }
}

fn parse_hour(value: &str) -> Result<NaiveTime, ScheduleParseError> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M").map_err(|_| ScheduleParseError::InvalidHour {
        value: value.to_string(),
    })
}

/// A validated schedule row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedSchedule {
    pub days: DayRange,
    pub start: NaiveTime,
    pub end: NaiveTime,
}

/// Resolves the working window for a UTC date.
///
/// The first row (in order) whose day range contains the date's weekday
/// wins. Malformed rows are skipped.
#[must_use]
pub fn window_for(
    schedules: &[UserWorkingSchedule],
    date: NaiveDate,
) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let weekday = date.weekday();
    schedules.iter().find_map(|row| {
        let parsed = match row.parse() {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!(user_id = %row.user_id, error = %e, "skipping malformed working schedule");
                return None;
            }
        };
        parsed.days.contains(weekday).then(|| {
            (
                date.and_time(parsed.start).and_utc(),
                date.and_time(parsed.end).and_utc(),
            )
        })
    })
}

/// Returns the start of the first window strictly after `date`, looking at
/// most a week ahead.
#[must_use]
pub fn next_window_start(schedules: &[UserWorkingSchedule], date: NaiveDate) -> Option<DateTime<Utc>> {
    date.iter_days()
        .skip(1)
        .take(7)
        .find_map(|day| window_for(schedules, day).map(|(start, _)| start))
}
