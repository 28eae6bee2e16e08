use scraper::Html;
use url::Url;

use crate::model::{CandidateRecord, LocalityId, Source};
use crate::parser::cards::{self, CardRule};
use crate::parser::{combine, jsonld, SourceExtractor};

const CARDS: CardRule = CardRule {
    container: "div[data-testid='categoryResults-eventCard'], div[data-element-name='categoryResults-eventCard']",
    link: "a[href*='/events/']",
    title: &["h2", "h3"],
    date: &["time"],
    venue: &["[data-testid='venue-name']", "[data-event-label='venue']"],
    link_contains: "/events/",
    min_title_len: 5,
    stop_words: &["start a new group", "see all"],
};

pub struct Meetup;

impl SourceExtractor for Meetup {
    fn source(&self) -> Source {
        Source::Meetup
    }

    fn listing_url(&self, locality: &LocalityId) -> String {
        format!(
            "https://www.meetup.com/find/?location=us--{}--{}&source=EVENTS",
            locality.region(),
            locality.city()
        )
    }

    fn extract(&self, content: &str, base: &Url) -> Vec<CandidateRecord> {
        let doc = Html::parse_document(content);
        combine(jsonld::candidates(&doc, base), cards::scan(&doc, &CARDS, base))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meetup_fixture() {
        let html = std::fs::read_to_string("tests/fixtures/meetup.html").unwrap();
        let base = Url::parse("https://www.meetup.com/find/?location=us--ca--los-angeles").unwrap();
        let recs = Meetup.extract(&html, &base);

        assert_eq!(recs.len(), 3);
        assert_eq!(recs[0].title, "LA Rust Meetup: Async in Production");
        assert_eq!(recs[0].link, "https://www.meetup.com/la-rust/events/301234567/");
        assert_eq!(recs[0].location.as_deref(), Some("Cross Campus, 800 Wilshire Blvd, Los Angeles"));

        // card-only, no venue node
        let hike = recs.iter().find(|r| r.title == "Sunrise Hike at Runyon Canyon").unwrap();
        assert_eq!(hike.location, None);
        assert!(hike.when.contains("2026-10-18T06:30"));
    }
}
