pub mod dice;
pub mod eventbrite;
pub mod luma;
pub mod meetup;
pub mod resident_advisor;

use super::SourceExtractor;
use crate::model::Source;

/// The extractor registered for a source.
pub fn extractor_for(source: Source) -> Box<dyn SourceExtractor> {
    match source {
        Source::Eventbrite => Box::new(eventbrite::Eventbrite),
        Source::Meetup => Box::new(meetup::Meetup),
        Source::Luma => Box::new(luma::Luma),
        Source::Dice => Box::new(dice::Dice),
        Source::ResidentAdvisor => Box::new(resident_advisor::ResidentAdvisor),
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LocalityId;

    fn la() -> LocalityId {
        "ca--los-angeles".parse().unwrap()
    }

    #[test]
    fn registry_covers_every_source() {
        for source in Source::ALL {
            assert_eq!(extractor_for(source).source(), source);
        }
    }

    #[test]
    fn listing_urls() {
        let urls: Vec<String> = Source::ALL
            .iter()
            .map(|s| extractor_for(*s).listing_url(&la()))
            .collect();
        assert_eq!(
            urls,
            vec![
                "https://www.eventbrite.com/d/ca--los-angeles/all-events/",
                "https://www.meetup.com/find/?location=us--ca--los-angeles&source=EVENTS",
                "https://lu.ma/los-angeles",
                "https://dice.fm/browse/los_angeles",
                "https://ra.co/events/us/losangeles",
            ]
        );
    }

    #[test]
    fn garbage_input_yields_nothing() {
        let base = url::Url::parse("https://example.com/").unwrap();
        for source in Source::ALL {
            let ex = extractor_for(source);
            assert!(ex.extract("", &base).is_empty());
            assert!(ex.extract("<<<not html at all", &base).is_empty());
        }
    }
}
