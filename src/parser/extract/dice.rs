use scraper::Html;
use url::Url;

use crate::model::{CandidateRecord, LocalityId, Source};
use crate::parser::cards::{self, CardRule};
use crate::parser::{combine, jsonld, SourceExtractor};

// Class names are hashed (`EventCard__Title-sc-1x2y3z`), hence the substring matches.
const CARDS: CardRule = CardRule {
    container: "div[class*='EventCard__Event'], div[class*='EventParts__EventBlock']",
    link: "a[href*='/event/']",
    title: &["[class*='EventCard__Title']", "[class*='EventName']", "h2"],
    date: &["[class*='DateText']", "[class*='EventDate']", "time"],
    venue: &["[class*='Venue']"],
    link_contains: "/event/",
    min_title_len: 3,
    stop_words: &["get the app"],
};

pub struct Dice;

impl SourceExtractor for Dice {
    fn source(&self) -> Source {
        Source::Dice
    }

    fn listing_url(&self, locality: &LocalityId) -> String {
        format!("https://dice.fm/browse/{}", locality.city().replace('-', "_"))
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
    fn dice_cards_without_metadata() {
        let html = std::fs::read_to_string("tests/fixtures/dice.html").unwrap();
        let base = Url::parse("https://dice.fm/browse/los_angeles").unwrap();
        let recs = Dice.extract(&html, &base);

        let titles: Vec<&str> = recs.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, vec!["Floating Points (DJ Set)", "Khruangbin", "Late Night Techno"]);
        assert_eq!(recs[0].link, "https://dice.fm/event/floating-points-dj-set-7xk2");
        assert_eq!(recs[0].when, "Fri, 6 Nov, 10:00 PM");
        assert_eq!(recs[0].location.as_deref(), Some("Sound Nightclub"));
        // no venue node on this card
        assert_eq!(recs[2].location, None);
    }
}
