use scraper::Html;
use url::Url;

use crate::model::{CandidateRecord, LocalityId, Source};
use crate::parser::cards::{self, CardRule};
use crate::parser::{combine, jsonld, SourceExtractor};

const CARDS: CardRule = CardRule {
    container: "div[data-testid='search-event'], section.discover-search-desktop-card, div.event-card",
    link: "a.event-card-link, a[href*='/e/']",
    title: &["h3", "h2"],
    date: &["p.event-card__clamp-line--one", "p"],
    venue: &["p.event-card__clamp-line--two", "p + p"],
    link_contains: "/e/",
    min_title_len: 5,
    stop_words: &["promoted", "sales end soon"],
};

/// Search pages carry an `ItemList` of events as JSON-LD; the cards are the fallback.
pub struct Eventbrite;

impl SourceExtractor for Eventbrite {
    fn source(&self) -> Source {
        Source::Eventbrite
    }

    fn listing_url(&self, locality: &LocalityId) -> String {
        format!("https://www.eventbrite.com/d/{}/all-events/", locality)
    }

    fn extract(&self, content: &str, base: &Url) -> Vec<CandidateRecord> {
        let doc = Html::parse_document(content);
        combine(jsonld::candidates(&doc, base), cards::scan(&doc, &CARDS, base))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(fixture: &str) -> Vec<CandidateRecord> {
        let html = std::fs::read_to_string(format!("tests/fixtures/{}.html", fixture)).unwrap();
        let base = Url::parse("https://www.eventbrite.com/d/ca--los-angeles/all-events/").unwrap();
        Eventbrite.extract(&html, &base)
    }

    #[test]
    fn eventbrite_metadata_and_cards() {
        let recs = extract("eventbrite");
        let links: Vec<&str> = recs.iter().map(|r| r.link.as_str()).collect();
        assert_eq!(
            links,
            vec![
                "https://www.eventbrite.com/e/sunset-rooftop-social-tickets-1001",
                "https://www.eventbrite.com/e/founders-breakfast-tickets-1002",
                "https://www.eventbrite.com/e/silent-disco-hike-tickets-1003",
            ]
        );
        assert_eq!(recs[0].title, "Sunset Rooftop Social");
        assert!(recs[0].when.starts_with("2026-11-06T18:00"));
        assert_eq!(recs[0].location.as_deref(), Some("Hotel Figueroa, 939 S Figueroa St, Los Angeles"));
        // card-only event keeps its visible date text
        assert_eq!(recs[2].title, "Silent Disco Hike");
        assert!(recs[2].when.contains("Sat, Nov 14"));
        assert_eq!(recs[2].location.as_deref(), Some("Griffith Observatory"));
    }

    #[test]
    fn eventbrite_promoted_cards_skipped() {
        let recs = extract("eventbrite");
        assert!(recs.iter().all(|r| r.title.to_lowercase() != "promoted"));
    }
}
