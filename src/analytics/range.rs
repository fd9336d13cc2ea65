//! Resolves the time range selector into the date window a report covers.

use serde::{Deserialize, Deserializer};
use time::{Date, Duration, Month, macros::format_description};

use crate::Error;

/// The time range presets offered on the analytics page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum TimeRange {
    #[serde(rename = "last7days")]
    Last7Days,
    #[serde(rename = "lastMonth")]
    LastMonth,
    #[serde(rename = "last3Months")]
    Last3Months,
    #[default]
    #[serde(rename = "allTime")]
    AllTime,
    #[serde(rename = "custom")]
    Custom,
}

impl TimeRange {
    /// Every preset, in the order they are listed in the selector.
    pub const ALL: [TimeRange; 5] = [
        TimeRange::Last7Days,
        TimeRange::LastMonth,
        TimeRange::Last3Months,
        TimeRange::AllTime,
        TimeRange::Custom,
    ];

    pub fn as_query_value(self) -> &'static str {
        match self {
            Self::Last7Days => "last7days",
            Self::LastMonth => "lastMonth",
            Self::Last3Months => "last3Months",
            Self::AllTime => "allTime",
            Self::Custom => "custom",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Last7Days => "Last Week",
            Self::LastMonth => "Last Month",
            Self::Last3Months => "Last 3 Months",
            Self::AllTime => "All Time",
            Self::Custom => "Custom Range",
        }
    }
}

/// The dates picked for [TimeRange::Custom]. Either may still be missing
/// while the user is picking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub struct CustomRange {
    #[serde(default, deserialize_with = "deserialize_optional_date")]
    pub start: Option<Date>,
    #[serde(default, deserialize_with = "deserialize_optional_date")]
    pub end: Option<Date>,
}

/// The days a report covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateWindow {
    /// Every day from `start` to `end`, inclusive. `start <= end` always holds.
    Bounded { start: Date, end: Date },
    /// No date filter.
    Unbounded,
}

impl DateWindow {
    pub fn contains(&self, date: Date) -> bool {
        match *self {
            DateWindow::Bounded { start, end } => start <= date && date <= end,
            DateWindow::Unbounded => true,
        }
    }
}

/// Turn a time range selection into a [DateWindow] ending on `today`.
///
/// Month based presets step back whole calendar months, clamping the day to
/// the length of the target month, e.g. 31 March minus one month is the last
/// day of February.
///
/// # Errors
/// Returns [Error::InvalidSelection] if `range` is [TimeRange::Custom] and
/// either date is missing, or if the start date is after the end date.
pub fn resolve_window(
    range: TimeRange,
    custom: CustomRange,
    today: Date,
) -> Result<DateWindow, Error> {
    let window = match range {
        TimeRange::Last7Days => DateWindow::Bounded {
            start: today - Duration::days(7),
            end: today,
        },
        TimeRange::LastMonth => DateWindow::Bounded {
            start: subtract_months(today, 1),
            end: today,
        },
        TimeRange::Last3Months => DateWindow::Bounded {
            start: subtract_months(today, 3),
            end: today,
        },
        TimeRange::AllTime => DateWindow::Unbounded,
        TimeRange::Custom => match (custom.start, custom.end) {
            (Some(start), Some(end)) if start <= end => DateWindow::Bounded { start, end },
            (Some(start), Some(end)) => {
                return Err(Error::InvalidSelection(format!(
                    "the start date {start} is after the end date {end}"
                )));
            }
            _ => {
                return Err(Error::InvalidSelection(
                    "select both a start and an end date".to_owned(),
                ));
            }
        },
    };

    Ok(window)
}

fn subtract_months(date: Date, months: u32) -> Date {
    let month_index = date.year() * 12 + (date.month() as i32 - 1) - months as i32;
    let year = month_index.div_euclid(12);
    let month = Month::try_from((month_index.rem_euclid(12) + 1) as u8)
        .expect("month number is always in 1..=12");
    let day = date.day().min(last_day_of_month(year, month));

    Date::from_calendar_date(year, month, day).expect("day is clamped to the month length")
}

fn last_day_of_month(year: i32, month: Month) -> u8 {
    match month {
        Month::January
        | Month::March
        | Month::May
        | Month::July
        | Month::August
        | Month::October
        | Month::December => 31,
        Month::April | Month::June | Month::September | Month::November => 30,
        Month::February => {
            if is_leap_year(year) {
                29
            } else {
                28
            }
        }
    }
}

fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || (year % 400 == 0)
}

/// Date inputs submit an empty string when cleared, which is read as `None`.
pub(super) fn deserialize_optional_date<'de, D>(deserializer: D) -> Result<Option<Date>, D::Error>
where
    D: Deserializer<'de>,
{
    let text = Option::<String>::deserialize(deserializer)?;

    match text.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(text) => Date::parse(text, format_description!("[year]-[month]-[day]"))
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}
