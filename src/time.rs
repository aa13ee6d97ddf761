//! Parsing and rendering of user supplied datetimes.
//!
//! Inputs are interpreted as UTC. Besides absolute dates in the usual notations,
//! unix timestamps and relative durations such as `-2d`, `P1DT2H` or
//! `3 days 04:05:06` are accepted.

use std::sync::LazyLock;

use chrono::{
    DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone,
    Timelike, Utc,
};
use regex::{Captures, Regex};

use crate::error::AppError;

pub const DISPLAY_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Formats carrying a full date and time.
const DATETIME_FORMATS: [&str; 11] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%Y%m%dT%H%M%S",
    "%Y.%m.%dT%H%M",
    "%d.%m.%Y %H:%M:%S",
    "%d.%m.%Y %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
];

/// Formats that end with an hour only. Parsed with `:00` appended.
const HOUR_FORMATS: [&str; 5] = [
    "%Y-%m-%d %H",
    "%Y.%m.%dT%H",
    "%d.%m.%Y %H",
    "%m/%d/%Y %H",
    "%d/%m/%Y %H",
];

/// Two digit years come first, a four digit year pattern would accept them too.
const DATE_FORMATS: [&str; 10] = [
    "%Y-%m-%d",
    "%d.%m.%y",
    "%y.%m.%d",
    "%Y.%m.%d",
    "%d.%m.%Y",
    "%m/%d/%y",
    "%m/%d/%Y",
    "%d/%m/%y",
    "%d/%m/%Y",
    "%Y%m%d",
];

const TIME_FORMATS: [&str; 2] = ["%H:%M:%S", "%H:%M"];

static STANDARD_DURATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:(?P<days>-?\d+) (?:days?,? ?)?)?(?P<sign>[-+]?)(?:(?P<hours>\d+):)?(?:(?P<minutes>\d+):)?(?P<seconds>\d+)(?:[.,](?P<micros>\d{1,6})\d{0,6})?$",
    )
    .expect("valid standard duration regex")
});

static ISO8601_DURATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<sign>[-+]?)P(?:(?P<days>\d+(?:[.,]\d+)?)D)?(?:T(?:(?P<hours>\d+(?:[.,]\d+)?)H)?(?:(?P<minutes>\d+(?:[.,]\d+)?)M)?(?:(?P<seconds>\d+(?:[.,]\d+)?)S)?)?$",
    )
    .expect("valid ISO 8601 duration regex")
});

static COMPACT_DURATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(?P<sign>[-+]?) ?(?:(?P<days>\d+(?:[.,]\d+)?) ?(?:days|day|d))?[: ]?T?(?:(?P<hours>\d+(?:[.,]\d+)?) ?(?:hours|hour|hrs|hr|h))?[: ]?(?:(?P<minutes>\d+(?:[.,]\d+)?) ?(?:minutes|minute|mins|min|m))?[: ]?(?:(?P<seconds>\d+(?:[.,]\d+)?) ?(?:seconds|second|secs|sec|s))?$",
    )
    .expect("valid compact duration regex")
});

/// Parses user input into a UTC datetime relative to `now`.
pub fn parse(input: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>, AppError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(invalid());
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Some(dt) = parse_absolute(input, now) {
        return Ok(dt);
    }
    if input.chars().all(|c| c.is_ascii_digit() || c == '-')
        && let Ok(ts) = input.parse::<i64>()
        && let Some(dt) = DateTime::from_timestamp(ts, 0)
    {
        return Ok(dt);
    }
    parse_duration(input)
        .and_then(|delta| now.checked_add_signed(delta))
        .ok_or_else(invalid)
}

fn invalid() -> AppError {
    AppError::Conversion("Invalid datetime format".into())
}

fn parse_absolute(input: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let naive = DATETIME_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(input, f).ok())
        .or_else(|| {
            let padded = format!("{input}:00");
            HOUR_FORMATS
                .iter()
                .find_map(|f| NaiveDateTime::parse_from_str(&padded, &format!("{f}:%M")).ok())
        })
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|f| NaiveDate::parse_from_str(input, f).ok())
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .or_else(|| {
            let today = now.date_naive();
            TIME_FORMATS
                .iter()
                .find_map(|f| NaiveTime::parse_from_str(input, f).ok())
                .or_else(|| {
                    (input.len() <= 2)
                        .then(|| NaiveTime::parse_from_str(&format!("{input}:00"), "%H:%M").ok())
                        .flatten()
                })
                .map(|t| today.and_time(t))
        })
        .or_else(|| {
            // Month and day only, in the current year.
            (input.matches('/').count() == 1)
                .then(|| {
                    NaiveDate::parse_from_str(&format!("{input}/{}", now.year()), "%m/%d/%Y").ok()
                })
                .flatten()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })?;
    Some(naive.and_utc())
}

/// Parses a relative duration. Returns `None` if no notation matches.
pub fn parse_duration(input: &str) -> Option<Duration> {
    let input = input.trim();

    if let Some(caps) = STANDARD_DURATION.captures(input) {
        let sign = sign_of(&caps);
        let days = int_group(&caps, "days");
        let (mut hours, mut minutes) = (int_group(&caps, "hours"), caps.name("minutes"));
        // `MM:SS` is captured as hours and seconds.
        if minutes.is_none() && caps.name("hours").is_some() {
            minutes = caps.name("hours");
            hours = 0;
        }
        let minutes = minutes.and_then(|m| m.as_str().parse::<i64>().ok()).unwrap_or(0);
        let seconds = int_group(&caps, "seconds");
        let micros = caps
            .name("micros")
            .map(|m| format!("{:0<6}", m.as_str()))
            .and_then(|m| m.parse::<i64>().ok())
            .unwrap_or(0);
        let time = Duration::hours(hours)
            + Duration::minutes(minutes)
            + Duration::seconds(seconds)
            + Duration::microseconds(micros);
        return Some(Duration::days(days) + time * sign);
    }

    for regex in [&*ISO8601_DURATION, &*COMPACT_DURATION] {
        let Some(caps) = regex.captures(input) else {
            continue;
        };
        if ["days", "hours", "minutes", "seconds"]
            .iter()
            .all(|name| caps.name(name).is_none())
        {
            continue;
        }
        let total = float_group(&caps, "days") * 86_400.0
            + float_group(&caps, "hours") * 3_600.0
            + float_group(&caps, "minutes") * 60.0
            + float_group(&caps, "seconds");
        let millis = (total * 1000.0).round() as i64;
        return Some(Duration::milliseconds(millis) * sign_of(&caps));
    }

    None
}

fn sign_of(caps: &Captures<'_>) -> i32 {
    match caps.name("sign").map(|m| m.as_str()) {
        Some("-") => -1,
        _ => 1,
    }
}

fn int_group(caps: &Captures<'_>, name: &str) -> i64 {
    caps.name(name)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}

fn float_group(caps: &Captures<'_>, name: &str) -> f64 {
    caps.name(name)
        .and_then(|m| m.as_str().replace(',', ".").parse().ok())
        .unwrap_or(0.0)
}

// ==================== Discord rendering ====================

/// Discord timestamp styles. `Combined` renders a short date followed by a long time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimestampStyle {
    Default,
    ShortTime,
    LongTime,
    ShortDate,
    LongDate,
    ShortDateTime,
    LongDateTime,
    Relative,
    #[default]
    Combined,
}

impl TimestampStyle {
    fn code(self) -> Option<char> {
        match self {
            TimestampStyle::Default | TimestampStyle::Combined => None,
            TimestampStyle::ShortTime => Some('t'),
            TimestampStyle::LongTime => Some('T'),
            TimestampStyle::ShortDate => Some('d'),
            TimestampStyle::LongDate => Some('D'),
            TimestampStyle::ShortDateTime => Some('f'),
            TimestampStyle::LongDateTime => Some('F'),
            TimestampStyle::Relative => Some('R'),
        }
    }
}

pub fn to_discord(dt: DateTime<Utc>, style: TimestampStyle) -> String {
    let ts = dt.timestamp();
    match (style, style.code()) {
        (TimestampStyle::Combined, _) => format!(
            "{} {}",
            to_discord(dt, TimestampStyle::ShortDate),
            to_discord(dt, TimestampStyle::LongTime)
        ),
        (_, Some(code)) => format!("<t:{ts}:{code}>"),
        (_, None) => format!("<t:{ts}>"),
    }
}

pub fn display(dt: DateTime<Utc>) -> String {
    dt.format(DISPLAY_FORMAT).to_string()
}

// ==================== Autocomplete ====================

/// Kind of suggestions offered while a datetime option is still empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Suggestion {
    Relative,
    MonthStart,
    MonthEnd,
    WeekStart,
    WeekEnd,
    DayStart,
    DayEnd,
    HourStart,
    HourEnd,
}

/// Fixed offsets the parsed value is echoed in.
const ECHO_OFFSETS: [(&str, i32); 8] = [
    ("UTC", 0),
    ("India", 5 * 3600 + 1800),
    ("China", 8 * 3600),
    ("Central Europe", 3600),
    ("Western Europe", 0),
    ("US Eastern", -5 * 3600),
    ("US Central", -6 * 3600),
    ("US Pacific", -8 * 3600),
];

/// `(name, value)` choices for a datetime option.
pub fn choices(
    input: &str,
    suggestion: Option<Suggestion>,
    now: DateTime<Utc>,
) -> Vec<(String, String)> {
    let input = input.trim();
    if input.is_empty() {
        return suggestion.map(|s| suggest(s, now)).unwrap_or_default();
    }

    match parse(input, now) {
        Ok(dt) => ECHO_OFFSETS
            .iter()
            .filter_map(|(name, secs)| {
                let offset = FixedOffset::east_opt(*secs)?;
                let local = offset.from_utc_datetime(&dt.naive_utc());
                Some((
                    format!("{} {name} ({offset})", local.format(DISPLAY_FORMAT)),
                    display(dt),
                ))
            })
            .collect(),
        Err(_) => {
            let mut choices = vec![(input.to_string(), input.to_string())];
            if let Some(s) = suggestion {
                choices.extend(suggest(s, now).into_iter().take(24));
            }
            choices
        }
    }
}

pub fn suggest(kind: Suggestion, now: DateTime<Utc>) -> Vec<(String, String)> {
    let value = |dt: DateTime<Utc>| display(dt);
    let day_start = start_of_day(now);
    let hour_start = day_start + Duration::hours(now.hour() as i64);

    match kind {
        Suggestion::Relative => {
            let hours = [
                ("In 1 day", 24),
                ("In 1.5 days", 36),
                ("In 2 days", 48),
                ("In 2.5 days", 60),
                ("In 3 days", 72),
            ];
            let days = [4, 5, 6, 7, 8, 9, 10, 14];
            hours
                .iter()
                .map(|(name, h)| (name.to_string(), value(now + Duration::hours(*h))))
                .chain(
                    days.iter()
                        .map(|d| (format!("In {d} days"), value(now + Duration::days(*d)))),
                )
                .collect()
        }
        Suggestion::MonthStart => (0..11)
            .filter_map(|back| month_start(now, back))
            .map(|dt| (format!("Begin of {}", dt.format("%b %y")), value(dt)))
            .collect(),
        Suggestion::MonthEnd => (0..11)
            .filter_map(|back| month_start(now, back - 1))
            .map(|next| next - Duration::seconds(1))
            .map(|dt| (format!("End of {}", dt.format("%b %y")), value(dt)))
            .collect(),
        Suggestion::WeekStart => {
            let monday = day_start - Duration::days(now.weekday().num_days_from_monday() as i64);
            (0..20)
                .map(|back| monday - Duration::weeks(back))
                .map(|dt| (format!("Begin of week {}", dt.format("%W %y")), value(dt)))
                .collect()
        }
        Suggestion::WeekEnd => {
            let next_monday =
                day_start + Duration::days(7 - now.weekday().num_days_from_monday() as i64);
            (0..20)
                .map(|back| next_monday - Duration::weeks(back) - Duration::seconds(1))
                .map(|dt| (format!("End of week {}", dt.format("%W %y")), value(dt)))
                .collect()
        }
        Suggestion::DayStart => (0..24)
            .map(|back| day_start - Duration::days(back))
            .map(|dt| (format!("Begin of {}", dt.format("%d %b %y")), value(dt)))
            .collect(),
        Suggestion::DayEnd => (0..24)
            .map(|back| day_start + Duration::days(1 - back) - Duration::seconds(1))
            .map(|dt| (format!("End of {}", dt.format("%d %b %y")), value(dt)))
            .collect(),
        Suggestion::HourStart => (0..24)
            .map(|back| hour_start - Duration::hours(back))
            .map(|dt| (value(dt), value(dt)))
            .collect(),
        Suggestion::HourEnd => (0..24)
            .map(|back| hour_start + Duration::hours(1 - back) - Duration::seconds(1))
            .map(|dt| (value(dt), value(dt)))
            .collect(),
    }
}

fn start_of_day(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive().and_time(NaiveTime::MIN).and_utc()
}

/// First instant of the month `back` months before the current one. Negative goes forward.
fn month_start(now: DateTime<Utc>, back: i32) -> Option<DateTime<Utc>> {
    let months = now.year() * 12 + now.month0() as i32 - back;
    NaiveDate::from_ymd_opt(months.div_euclid(12), months.rem_euclid(12) as u32 + 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|d| d.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 15, 12, 30, 45).unwrap()
    }

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, s).unwrap()
    }

    #[test]
    fn parses_absolute_formats() {
        let now = now();
        assert_eq!(parse("2024-01-31 18:05", now).unwrap(), at(2024, 1, 31, 18, 5, 0));
        assert_eq!(parse("2024-01-31 18:05:09", now).unwrap(), at(2024, 1, 31, 18, 5, 9));
        assert_eq!(parse("2024-01-31 18", now).unwrap(), at(2024, 1, 31, 18, 0, 0));
        assert_eq!(parse("2024-01-31", now).unwrap(), at(2024, 1, 31, 0, 0, 0));
        assert_eq!(parse("31.01.2024 18:05", now).unwrap(), at(2024, 1, 31, 18, 5, 0));
        assert_eq!(parse("20240131T180509", now).unwrap(), at(2024, 1, 31, 18, 5, 9));
        assert_eq!(parse("2024-01-31T18:05:09Z", now).unwrap(), at(2024, 1, 31, 18, 5, 9));
    }

    #[test]
    fn slashes_prefer_month_first() {
        let now = now();
        assert_eq!(parse("01/02/2024", now).unwrap(), at(2024, 1, 2, 0, 0, 0));
        assert_eq!(parse("13/02/2024", now).unwrap(), at(2024, 2, 13, 0, 0, 0));
        assert_eq!(parse("01/02", now).unwrap(), at(2024, 1, 2, 0, 0, 0));
    }

    #[test]
    fn two_digit_years_are_not_read_as_year_zero() {
        assert_eq!(parse("31.01.24", now()).unwrap(), at(2024, 1, 31, 0, 0, 0));
    }

    #[test]
    fn time_only_uses_today() {
        let now = now();
        assert_eq!(parse("08:15", now).unwrap(), at(2024, 3, 15, 8, 15, 0));
        assert_eq!(parse("08:15:30", now).unwrap(), at(2024, 3, 15, 8, 15, 30));
        assert_eq!(parse("8", now).unwrap(), at(2024, 3, 15, 8, 0, 0));
    }

    #[test]
    fn parses_unix_timestamps() {
        assert_eq!(parse("1700000000", now()).unwrap(), at(2023, 11, 14, 22, 13, 20));
    }

    #[test]
    fn parses_relative_durations() {
        let now = now();
        assert_eq!(parse("-3h", now).unwrap(), now - Duration::hours(3));
        assert_eq!(parse("1d2h3m4s", now).unwrap(), now + Duration::seconds(93_784));
        assert_eq!(parse("-2 days", now).unwrap(), now - Duration::days(2));
        assert_eq!(parse("P1DT2H", now).unwrap(), now + Duration::hours(26));
        assert_eq!(parse("-P1D", now).unwrap(), now - Duration::days(1));
    }

    #[test]
    fn parses_clock_style_durations() {
        assert_eq!(parse_duration("04:05:06"), Some(Duration::seconds(4 * 3600 + 5 * 60 + 6)));
        assert_eq!(parse_duration("05:06"), Some(Duration::seconds(5 * 60 + 6)));
        assert_eq!(
            parse_duration("3 days 04:05:06"),
            Some(Duration::days(3) + Duration::seconds(4 * 3600 + 5 * 60 + 6))
        );
        assert_eq!(parse_duration("-1 day -00:00:10"), Some(-Duration::days(1) - Duration::seconds(10)));
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(parse("yesterday-ish", now()), Err(AppError::Conversion(_))));
        assert!(parse("", now()).is_err());
        assert_eq!(parse_duration("P"), None);
    }

    #[test]
    fn discord_styles() {
        let dt = at(2024, 1, 31, 18, 0, 0);
        let ts = dt.timestamp();
        assert_eq!(to_discord(dt, TimestampStyle::Relative), format!("<t:{ts}:R>"));
        assert_eq!(to_discord(dt, TimestampStyle::Default), format!("<t:{ts}>"));
        assert_eq!(
            to_discord(dt, TimestampStyle::Combined),
            format!("<t:{ts}:d> <t:{ts}:T>")
        );
    }

    #[test]
    fn suggestions_for_days_and_months() {
        let now = now();
        let starts = suggest(Suggestion::DayStart, now);
        assert_eq!(starts.len(), 24);
        assert_eq!(starts[0].1, "2024-03-15 00:00");
        assert_eq!(starts[1].1, "2024-03-14 00:00");

        let ends = suggest(Suggestion::DayEnd, now);
        assert_eq!(ends[0].1, "2024-03-15 23:59");

        let months = suggest(Suggestion::MonthStart, now);
        assert_eq!(months.len(), 11);
        assert_eq!(months[0].1, "2024-03-01 00:00");
        assert_eq!(months[3].1, "2023-12-01 00:00");

        let month_ends = suggest(Suggestion::MonthEnd, now);
        assert_eq!(month_ends[0].1, "2024-03-31 23:59");
        assert_eq!(month_ends[1].1, "2024-02-29 23:59");
    }

    #[test]
    fn week_suggestions_start_on_monday() {
        let weeks = suggest(Suggestion::WeekStart, now());
        assert_eq!(weeks[0].1, "2024-03-11 00:00");
        assert_eq!(weeks[1].1, "2024-03-04 00:00");
        let ends = suggest(Suggestion::WeekEnd, now());
        assert_eq!(ends[0].1, "2024-03-17 23:59");
    }

    #[test]
    fn choices_echo_parsed_value() {
        let choices = choices("2024-01-31 18:00", Some(Suggestion::DayStart), now());
        assert_eq!(choices.len(), ECHO_OFFSETS.len());
        assert!(choices.iter().all(|(_, value)| value == "2024-01-31 18:00"));
        assert!(choices[1].0.starts_with("2024-01-31 23:30"));
    }

    #[test]
    fn choices_for_empty_and_invalid_input() {
        assert_eq!(choices("", Some(Suggestion::HourStart), now()).len(), 24);
        assert!(choices("", None, now()).is_empty());
        let invalid = choices("nope", Some(Suggestion::DayStart), now());
        assert_eq!(invalid[0], ("nope".to_string(), "nope".to_string()));
        assert_eq!(invalid.len(), 25);
    }
}
