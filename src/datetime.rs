use std::sync::LazyLock;

use chrono::{
    DateTime, Datelike, Duration, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike,
};
use regex::Regex;

use crate::model::{EventDate, EventTime};

const MONTHS: &str = "january|february|march|april|may|june|july|august|september|october|november|december|jan|feb|mar|apr|jun|jul|aug|sept|sep|oct|nov|dec";

static ISO_DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{4})-(\d{2})-(\d{2})(?:[T ](\d{2}):(\d{2}))?").unwrap());
static UTC_STAMP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(\d{4}-\d{2}-\d{2})T(\d{2}:\d{2})(:\d{2}(?:\.\d+)?)?Z\b").unwrap()
});
static RELATIVE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(today|tonight|tomorrow)\b").unwrap());
static MONTH_DAY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)\b({MONTHS})\.?\s+(\d{{1,2}})(?:st|nd|rd|th)?\b(?:,?\s+(\d{{4}})\b)?"
    ))
    .unwrap()
});
static DAY_MONTH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)\b(\d{{1,2}})(?:st|nd|rd|th)?\s+({MONTHS})\b\.?(?:,?\s+(\d{{4}})\b)?"
    ))
    .unwrap()
});
static NUMERIC_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{1,2})/(\d{1,2})(?:/(\d{4}|\d{2}))?\b").unwrap());

static MERIDIEM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(1[0-2]|0?[1-9])(?:[:.]([0-5]\d))?\s*([ap])\.?\s?m\b\.?").unwrap()
});
static NOON_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\b(noon|midnight)\b").unwrap());
static H24_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([01]?\d|2[0-3]):([0-5]\d)\b").unwrap());

/// Resolve free text into a canonical (date, time). Date and time are
/// found independently; either may come back `TBA`. Never fails.
pub fn normalize(text: &str, reference: NaiveDateTime) -> (EventDate, EventTime) {
    normalize_in(text, reference, &Local)
}

/// `normalize` with UTC (`Z`) timestamps shifted into `tz`. A numeric offset
/// already marks venue time, so those timestamps are read as written.
pub fn normalize_in<Tz: TimeZone>(
    text: &str,
    reference: NaiveDateTime,
    tz: &Tz,
) -> (EventDate, EventTime) {
    if let Some(local) = utc_timestamp(text, tz) {
        let time = NaiveTime::from_hms_opt(local.hour(), local.minute(), 0)
            .map_or(EventTime::Tba, EventTime::At);
        return (EventDate::On(local.date_naive()), time);
    }
    (parse_date(text, reference), parse_time(text))
}

fn utc_timestamp<Tz: TimeZone>(text: &str, tz: &Tz) -> Option<DateTime<Tz>> {
    let caps = UTC_STAMP_RE.captures(text)?;
    let seconds = caps.get(3).map_or(":00", |m| m.as_str());
    let stamp = format!("{}T{}{}Z", &caps[1], &caps[2], seconds);
    DateTime::parse_from_rfc3339(&stamp)
        .ok()
        .map(|dt| dt.with_timezone(tz))
}

pub fn parse_date(text: &str, reference: NaiveDateTime) -> EventDate {
    let today = reference.date();

    if let Some(caps) = ISO_DATE_RE.captures(text) {
        let ymd = (
            caps[1].parse::<i32>(),
            caps[2].parse::<u32>(),
            caps[3].parse::<u32>(),
        );
        if let (Ok(y), Ok(m), Ok(d)) = ymd {
            if let Some(date) = NaiveDate::from_ymd_opt(y, m, d) {
                return EventDate::On(date);
            }
        }
    }

    let month_day = MONTH_DAY_RE
        .captures(text)
        .and_then(|c| Some((month_number(&c[1])?, c[2].parse::<u32>().ok()?, year_of(c.get(3)))));
    let day_month = || {
        DAY_MONTH_RE.captures(text).and_then(|c| {
            Some((month_number(&c[2])?, c[1].parse::<u32>().ok()?, year_of(c.get(3))))
        })
    };
    if let Some((month, day, year)) = month_day.or_else(day_month) {
        if let Some(date) = resolve(month, day, year, today) {
            return EventDate::On(date);
        }
    }

    if let Some(caps) = NUMERIC_RE.captures(text) {
        let month: u32 = caps[1].parse().unwrap_or(0);
        let day: u32 = caps[2].parse().unwrap_or(0);
        let year = caps.get(3).and_then(|y| {
            let y: i32 = y.as_str().parse().ok()?;
            Some(if y < 100 { 2000 + y } else { y })
        });
        if let Some(date) = resolve(month, day, year, today) {
            return EventDate::On(date);
        }
    }

    // Relative words only count when no explicit date is present.
    if let Some(caps) = RELATIVE_RE.captures(text) {
        let date = match caps[1].to_lowercase().as_str() {
            "tomorrow" => today + Duration::days(1),
            _ => today,
        };
        return EventDate::On(date);
    }

    EventDate::Tba
}

pub fn parse_time(text: &str) -> EventTime {
    if let Some(caps) = MERIDIEM_RE.captures(text) {
        let hour: u32 = caps[1].parse().unwrap_or(0);
        let minute: u32 = caps.get(2).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
        let pm = caps[3].eq_ignore_ascii_case("p");
        let hour24 = match (hour, pm) {
            (12, false) => 0,
            (12, true) => 12,
            (h, true) => h + 12,
            (h, false) => h,
        };
        if let Some(t) = NaiveTime::from_hms_opt(hour24, minute, 0) {
            return EventTime::At(t);
        }
    }

    if let Some(caps) = NOON_RE.captures(text) {
        let hour = if caps[1].eq_ignore_ascii_case("noon") { 12 } else { 0 };
        if let Some(t) = NaiveTime::from_hms_opt(hour, 0, 0) {
            return EventTime::At(t);
        }
    }

    // An ISO timestamp's clock part; `\b` does not split `T19`, so H24_RE misses it.
    if let Some(caps) = ISO_DATE_RE.captures(text) {
        if let (Some(h), Some(m)) = (caps.get(4), caps.get(5)) {
            let t = (h.as_str().parse::<u32>().ok(), m.as_str().parse::<u32>().ok());
            if let (Some(h), Some(m)) = t {
                if let Some(t) = NaiveTime::from_hms_opt(h, m, 0) {
                    return EventTime::At(t);
                }
            }
        }
    }

    if let Some(caps) = H24_RE.captures(text) {
        let h: u32 = caps[1].parse().unwrap_or(99);
        let m: u32 = caps[2].parse().unwrap_or(99);
        if let Some(t) = NaiveTime::from_hms_opt(h, m, 0) {
            return EventTime::At(t);
        }
    }

    EventTime::Tba
}

fn month_number(name: &str) -> Option<u32> {
    let lower = name.to_lowercase();
    let idx = [
        "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
    ]
    .iter()
    .position(|m| lower.starts_with(m))?;
    Some(idx as u32 + 1)
}

fn year_of(m: Option<regex::Match>) -> Option<i32> {
    m.and_then(|y| y.as_str().parse().ok())
}

/// Explicit years are taken as written. Without one, use the reference year,
/// rolling forward while the date is invalid (Feb 29) or already past.
fn resolve(month: u32, day: u32, year: Option<i32>, today: NaiveDate) -> Option<NaiveDate> {
    if let Some(y) = year {
        return NaiveDate::from_ymd_opt(y, month, day);
    }
    (today.year()..=today.year() + 4)
        .filter_map(|y| NaiveDate::from_ymd_opt(y, month, day))
        .find(|d| *d >= today)
}
