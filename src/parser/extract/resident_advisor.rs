use scraper::Html;
use serde_json::{Map, Value};
use url::Url;

use crate::model::{CandidateRecord, LocalityId, Source};
use crate::parser::cards::{self, CardRule};
use crate::parser::jsonld::{self, str_field};
use crate::parser::{clean_text, combine, resolve_link, SourceExtractor};

const CARDS: CardRule = CardRule {
    container: "li[data-testid='event-listing'], div[data-testid='event-upcoming-card']",
    link: "a[href^='/events/'], a[href*='ra.co/events/']",
    title: &["h3", "[data-pw-test-id='event-title']"],
    date: &["[data-testid='event-date']", "time"],
    venue: &["a[href^='/clubs/']", "[data-pw-test-id='event-venue-link']"],
    link_contains: "/events/",
    min_title_len: 3,
    stop_words: &["tickets"],
};

/// RA ships an Apollo cache in the Next.js payload: `Event:<id>` entries
/// point at `Venue:<id>` entries through `__ref`.
pub struct ResidentAdvisor;

impl SourceExtractor for ResidentAdvisor {
    fn source(&self) -> Source {
        Source::ResidentAdvisor
    }

    fn listing_url(&self, locality: &LocalityId) -> String {
        format!("https://ra.co/events/us/{}", locality.city().replace('-', ""))
    }

    fn extract(&self, content: &str, base: &Url) -> Vec<CandidateRecord> {
        let doc = Html::parse_document(content);
        let mut structured = apollo_events(&doc, base);
        structured.extend(jsonld::candidates(&doc, base));
        combine(structured, cards::scan(&doc, &CARDS, base))
    }
}

fn apollo_events(doc: &Html, base: &Url) -> Vec<CandidateRecord> {
    let Some(data) = jsonld::next_data(doc) else {
        return Vec::new();
    };

    let mut cache: Option<&Map<String, Value>> = None;
    jsonld::walk_objects(&data, &mut |obj| {
        if cache.is_none() {
            cache = obj.get("apolloState").and_then(Value::as_object);
        }
    });
    let Some(cache) = cache else {
        return Vec::new();
    };

    cache
        .values()
        .filter_map(Value::as_object)
        .filter(|obj| obj.get("__typename").and_then(Value::as_str) == Some("Event"))
        .filter_map(|obj| to_candidate(obj, cache, base))
        .collect()
}

fn to_candidate(
    obj: &Map<String, Value>,
    cache: &Map<String, Value>,
    base: &Url,
) -> Option<CandidateRecord> {
    let title = str_field(obj, "title")?;
    let link = resolve_link(base, str_field(obj, "contentUrl")?)?;
    let when = str_field(obj, "startTime")
        .or_else(|| str_field(obj, "date"))
        .unwrap_or_default()
        .to_string();

    let venue = obj.get("venue").and_then(Value::as_object).and_then(|v| {
        match v.get("__ref").and_then(Value::as_str) {
            Some(key) => cache.get(key).and_then(Value::as_object),
            None => Some(v),
        }
    });
    let location = venue.and_then(|v| {
        let name = str_field(v, "name")?;
        Some(match str_field(v, "address") {
            Some(addr) => format!("{name}, {addr}"),
            None => name.to_string(),
        })
    });

    Some(CandidateRecord {
        title: clean_text(title),
        link,
        when,
        location: location.map(|l| clean_text(&l)),
        description: str_field(obj, "blurb").map(clean_text),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract() -> Vec<CandidateRecord> {
        let html = std::fs::read_to_string("tests/fixtures/resident_advisor.html").unwrap();
        let base = Url::parse("https://ra.co/events/us/losangeles").unwrap();
        ResidentAdvisor.extract(&html, &base)
    }

    #[test]
    fn apollo_cache_events_resolve_venues() {
        let recs = extract();
        let warehouse = recs.iter().find(|r| r.link == "https://ra.co/events/2001").unwrap();
        assert_eq!(warehouse.title, "Warehouse Sessions: Honey Dijon");
        assert_eq!(warehouse.when, "2026-11-07T22:00:00.000");
        assert_eq!(warehouse.location.as_deref(), Some("Factory 93, 1200 S Santa Fe Ave"));
        assert_eq!(warehouse.description.as_deref(), Some("All night long."));

        let ref_less = recs.iter().find(|r| r.link == "https://ra.co/events/2002").unwrap();
        assert_eq!(ref_less.location.as_deref(), Some("Catch One"));
        assert_eq!(ref_less.when, "2026-11-08T00:00:00.000");
    }

    #[test]
    fn card_only_listing_is_kept() {
        let recs = extract();
        assert_eq!(recs.len(), 3);
        let card = recs.iter().find(|r| r.link == "https://ra.co/events/2003").unwrap();
        assert_eq!(card.title, "Dub Club");
        assert_eq!(card.location.as_deref(), Some("The Echoplex"));
        assert!(card.when.contains("Wed, 11 Nov"));
    }
}
