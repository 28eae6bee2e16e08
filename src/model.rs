use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

pub const TBA: &str = "TBA";
pub const LOCATION_TBA: &str = "Location TBA";

static LOCALITY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([a-z]{2,3})--([a-z0-9]+(?:-[a-z0-9]+)*)$").unwrap());

// ── Sources ──

/// Listing site an event was acquired from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Source {
    Eventbrite,
    Meetup,
    Luma,
    Dice,
    ResidentAdvisor,
}

impl Source {
    pub const ALL: [Source; 5] = [
        Source::Eventbrite,
        Source::Meetup,
        Source::Luma,
        Source::Dice,
        Source::ResidentAdvisor,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Eventbrite => "Eventbrite",
            Source::Meetup => "Meetup",
            Source::Luma => "Luma",
            Source::Dice => "Dice.fm",
            Source::ResidentAdvisor => "RA.co",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = String;

    /// Accepts the canonical names plus short aliases (`dice`, `ra`, `lu.ma`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "eventbrite" => Ok(Source::Eventbrite),
            "meetup" => Ok(Source::Meetup),
            "luma" | "lu.ma" => Ok(Source::Luma),
            "dice" | "dice.fm" => Ok(Source::Dice),
            "ra" | "ra.co" | "resident_advisor" | "residentadvisor" => {
                Ok(Source::ResidentAdvisor)
            }
            other => Err(format!("unknown source: {other}")),
        }
    }
}

impl TryFrom<String> for Source {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Source> for String {
    fn from(source: Source) -> Self {
        source.as_str().to_string()
    }
}

// ── Localities ──

/// `<region-code>--<city-slug>`, e.g. `ca--los-angeles`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LocalityId {
    region: String,
    city: String,
}

impl LocalityId {
    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn city(&self) -> &str {
        &self.city
    }
}

impl fmt::Display for LocalityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}--{}", self.region, self.city)
    }
}

impl FromStr for LocalityId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        let caps = LOCALITY_RE
            .captures(&lower)
            .ok_or_else(|| format!("invalid locality id '{s}' (expected <region>--<city-slug>)"))?;
        Ok(LocalityId {
            region: caps[1].to_string(),
            city: caps[2].to_string(),
        })
    }
}

impl TryFrom<String> for LocalityId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<LocalityId> for String {
    fn from(id: LocalityId) -> Self {
        id.to_string()
    }
}

// ── Dates and times ──

/// Calendar date or the `TBA` sentinel. Known dates order before `Tba`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum EventDate {
    On(NaiveDate),
    Tba,
}

impl EventDate {
    pub fn is_known(&self) -> bool {
        matches!(self, EventDate::On(_))
    }
}

impl fmt::Display for EventDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventDate::On(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            EventDate::Tba => f.write_str(TBA),
        }
    }
}

impl FromStr for EventDate {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case(TBA) || s.is_empty() {
            return Ok(EventDate::Tba);
        }
        NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map(EventDate::On)
            .map_err(|e| format!("invalid date '{s}': {e}"))
    }
}

impl TryFrom<String> for EventDate {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<EventDate> for String {
    fn from(date: EventDate) -> Self {
        date.to_string()
    }
}

/// Clock time rendered as `HH:MM AM/PM`, or the `TBA` sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum EventTime {
    At(NaiveTime),
    Tba,
}

impl fmt::Display for EventTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventTime::At(t) => write!(f, "{}", t.format("%I:%M %p")),
            EventTime::Tba => f.write_str(TBA),
        }
    }
}

impl FromStr for EventTime {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case(TBA) || s.is_empty() {
            return Ok(EventTime::Tba);
        }
        NaiveTime::parse_from_str(s, "%I:%M %p")
            .map(EventTime::At)
            .map_err(|e| format!("invalid time '{s}': {e}"))
    }
}

impl TryFrom<String> for EventTime {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<EventTime> for String {
    fn from(time: EventTime) -> Self {
        time.to_string()
    }
}

// ── Records ──

/// Extractor output: raw field text, not yet normalized or validated.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CandidateRecord {
    pub title: String,
    pub link: String,
    /// Everything that might carry the date and time, joined.
    pub when: String,
    pub location: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub title: String,
    pub link: String,
    pub date: EventDate,
    pub time: EventTime,
    pub location: String,
    pub description: String,
    pub source: Source,
    pub locality: LocalityId,
}

/// Deduplicated event set for one locality, keyed by link.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalityCatalog {
    pub locality: LocalityId,
    pub events: BTreeMap<String, EventRecord>,
    pub last_updated: DateTime<Utc>,
}

impl LocalityCatalog {
    pub fn empty(locality: LocalityId, now: DateTime<Utc>) -> Self {
        LocalityCatalog {
            locality,
            events: BTreeMap::new(),
            last_updated: now,
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Events ascending by date; `TBA` dates last.
    pub fn sorted_events(&self) -> Vec<&EventRecord> {
        let mut events: Vec<&EventRecord> = self.events.values().collect();
        events.sort_by(|a, b| {
            (a.date, a.time, &a.title, &a.link).cmp(&(b.date, b.time, &b.title, &b.link))
        });
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locality_roundtrip() {
        let id: LocalityId = "ca--los-angeles".parse().unwrap();
        assert_eq!(id.region(), "ca");
        assert_eq!(id.city(), "los-angeles");
        assert_eq!(id.to_string(), "ca--los-angeles");
    }

    #[test]
    fn locality_rejects_malformed() {
        assert!("los-angeles".parse::<LocalityId>().is_err());
        assert!("ca-los-angeles".parse::<LocalityId>().is_err());
        assert!("ca--".parse::<LocalityId>().is_err());
        assert!("ca--los angeles".parse::<LocalityId>().is_err());
    }

    #[test]
    fn source_aliases() {
        assert_eq!("dice".parse::<Source>().unwrap(), Source::Dice);
        assert_eq!("RA.co".parse::<Source>().unwrap(), Source::ResidentAdvisor);
        assert_eq!(Source::Dice.to_string(), "Dice.fm");
        assert!("facebook".parse::<Source>().is_err());
    }

    #[test]
    fn sentinels_serialize_as_tba() {
        assert_eq!(serde_json::to_string(&EventDate::Tba).unwrap(), "\"TBA\"");
        assert_eq!(serde_json::to_string(&EventTime::Tba).unwrap(), "\"TBA\"");
        let t = EventTime::At(NaiveTime::from_hms_opt(19, 5, 0).unwrap());
        assert_eq!(t.to_string(), "07:05 PM");
        assert_eq!("07:05 PM".parse::<EventTime>().unwrap(), t);
    }

    #[test]
    fn unknown_dates_sort_last() {
        let d = |s: &str| s.parse::<EventDate>().unwrap();
        let mut dates = vec![EventDate::Tba, d("2026-05-01"), d("2025-12-31")];
        dates.sort();
        assert_eq!(dates, vec![d("2025-12-31"), d("2026-05-01"), EventDate::Tba]);
    }
}
