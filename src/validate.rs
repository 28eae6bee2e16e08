use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;
use url::Url;

use crate::model::{
    CandidateRecord, EventDate, EventRecord, EventTime, LocalityId, Source, LOCATION_TBA,
};
use crate::parser::clean_text;

static NOISE_TITLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(log ?in|sign ?(up|in)|register|see (all|more)|view (all|more)|load more|show more|more events|filters?|sort by|next|previous|events? near .*|upcoming events|\d+)$",
    )
    .unwrap()
});

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Rejection {
    #[error("empty title")]
    EmptyTitle,
    #[error("empty link")]
    EmptyLink,
    #[error("invalid link: {0}")]
    InvalidLink(String),
    #[error("noise title: {0}")]
    NoiseTitle(String),
}

#[derive(Debug, Clone)]
pub struct RecordValidator {
    description_max_chars: usize,
}

impl RecordValidator {
    pub fn new(description_max_chars: usize) -> Self {
        RecordValidator {
            description_max_chars,
        }
    }

    /// Turn a candidate plus its normalized date/time into a catalog record,
    /// or say why it is not one.
    pub fn validate(
        &self,
        candidate: &CandidateRecord,
        when: (EventDate, EventTime),
        source: Source,
        locality: &LocalityId,
    ) -> Result<EventRecord, Rejection> {
        let title = clean_text(&candidate.title);
        if title.is_empty() {
            return Err(Rejection::EmptyTitle);
        }
        if NOISE_TITLE_RE.is_match(&title) {
            return Err(Rejection::NoiseTitle(title));
        }
        let link = canonical_link(&candidate.link)?;

        let location = candidate
            .location
            .as_deref()
            .map(clean_text)
            .filter(|l| !l.is_empty())
            .unwrap_or_else(|| LOCATION_TBA.to_string());
        let description = candidate
            .description
            .as_deref()
            .map(|d| truncate(&clean_text(d), self.description_max_chars))
            .unwrap_or_default();

        let (date, time) = when;
        Ok(EventRecord {
            title,
            link,
            date,
            time,
            location,
            description,
            source,
            locality: locality.clone(),
        })
    }
}

/// Absolute http(s) URL without fragment or tracking parameters.
pub fn canonical_link(raw: &str) -> Result<String, Rejection> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(Rejection::EmptyLink);
    }
    let mut url = Url::parse(raw).map_err(|_| Rejection::InvalidLink(raw.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(Rejection::InvalidLink(raw.to_string()));
    }
    url.set_fragment(None);

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !is_tracking_param(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }
    Ok(url.to_string())
}

fn is_tracking_param(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    key.starts_with("utm_") || key == "aff" || key == "fbclid"
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    if max_chars < 3 {
        return s.chars().take(max_chars).collect();
    }
    let head: String = s.chars().take(max_chars - 3).collect();
    format!("{}...", head.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn la() -> LocalityId {
        "ca--los-angeles".parse().unwrap()
    }

    fn cand(title: &str, link: &str) -> CandidateRecord {
        CandidateRecord {
            title: title.into(),
            link: link.into(),
            ..Default::default()
        }
    }

    fn check(c: &CandidateRecord) -> Result<EventRecord, Rejection> {
        RecordValidator::new(40).validate(c, (EventDate::Tba, EventTime::Tba), Source::Meetup, &la())
    }

    #[test]
    fn empty_title_or_link_rejected() {
        assert_eq!(check(&cand("   ", "https://x/e/1")), Err(Rejection::EmptyTitle));
        assert_eq!(check(&cand("Jazz Night", "")), Err(Rejection::EmptyLink));
    }

    #[test]
    fn all_sentinel_optionals_accepted() {
        let rec = check(&cand("  Jazz \n Night ", "https://x.com/e/1")).unwrap();
        assert_eq!(rec.title, "Jazz Night");
        assert_eq!(rec.date, EventDate::Tba);
        assert_eq!(rec.time, EventTime::Tba);
        assert_eq!(rec.location, LOCATION_TBA);
        assert_eq!(rec.description, "");
        assert_eq!(rec.source, Source::Meetup);
    }

    #[test]
    fn noise_titles_rejected() {
        for t in ["Log in", "See all", "Events near Los Angeles", "12", "Filters"] {
            assert!(
                matches!(check(&cand(t, "https://x.com/e/1")), Err(Rejection::NoiseTitle(_))),
                "{t}"
            );
        }
        assert!(check(&cand("Sign Up Sheet Potluck", "https://x.com/e/1")).is_ok());
    }

    #[test]
    fn bad_links_rejected() {
        assert!(matches!(check(&cand("Jazz", "/e/1")), Err(Rejection::InvalidLink(_))));
        assert!(matches!(
            check(&cand("Jazz", "mailto:a@b.c")),
            Err(Rejection::InvalidLink(_))
        ));
    }

    #[test]
    fn links_canonicalized() {
        assert_eq!(
            canonical_link("https://www.eventbrite.com/e/x-1?aff=ebdssbdestsearch&utm_source=a#tickets").unwrap(),
            "https://www.eventbrite.com/e/x-1"
        );
        assert_eq!(
            canonical_link("https://dice.fm/event/abc?lang=en&utm_medium=x").unwrap(),
            "https://dice.fm/event/abc?lang=en"
        );
    }

    #[test]
    fn description_capped() {
        let mut c = cand("Jazz Night", "https://x.com/e/1");
        c.description = Some("word ".repeat(30));
        let rec = check(&c).unwrap();
        assert!(rec.description.chars().count() <= 40);
        assert!(rec.description.ends_with("..."));

        c.description = Some("short   and\tsweet".into());
        assert_eq!(check(&c).unwrap().description, "short and sweet");
    }
}
