use scraper::Html;
use serde_json::{Map, Value};
use url::Url;

use crate::model::{CandidateRecord, LocalityId, Source};
use crate::parser::cards::{self, CardRule};
use crate::parser::jsonld::{self, str_field};
use crate::parser::{clean_text, combine, SourceExtractor};

const CARDS: CardRule = CardRule {
    container: "div.card-wrapper, div.content-card",
    link: "a.event-link, a[href]",
    title: &["h3", ".event-title"],
    date: &["time", ".event-time", ".date"],
    venue: &[".event-location", ".attribute .text-ellipses"],
    link_contains: "lu.ma/",
    min_title_len: 4,
    stop_words: &["subscribe", "submit event"],
};

/// City pages embed their events in the Next.js payload, one object per event
/// carrying `name`, `start_at` and a URL slug.
pub struct Luma;

impl SourceExtractor for Luma {
    fn source(&self) -> Source {
        Source::Luma
    }

    fn listing_url(&self, locality: &LocalityId) -> String {
        format!("https://lu.ma/{}", locality.city())
    }

    fn extract(&self, content: &str, base: &Url) -> Vec<CandidateRecord> {
        let doc = Html::parse_document(content);
        let mut structured = next_data_events(&doc);
        structured.extend(jsonld::candidates(&doc, base));
        combine(structured, cards::scan(&doc, &CARDS, base))
    }
}

fn next_data_events(doc: &Html) -> Vec<CandidateRecord> {
    let Some(data) = jsonld::next_data(doc) else {
        return Vec::new();
    };
    let mut out = Vec::new();
    jsonld::walk_objects(&data, &mut |obj| {
        if let Some(rec) = to_candidate(obj) {
            out.push(rec);
        }
    });
    out
}

fn to_candidate(obj: &Map<String, Value>) -> Option<CandidateRecord> {
    let title = str_field(obj, "name")?;
    let start = str_field(obj, "start_at")?;
    let slug = str_field(obj, "url")?;
    let link = if slug.starts_with("http") {
        slug.to_string()
    } else {
        format!("https://lu.ma/{}", slug.trim_start_matches('/'))
    };

    let geo = obj.get("geo_address_info").and_then(Value::as_object);
    let location = geo
        .and_then(|g| {
            str_field(g, "full_address")
                .or_else(|| str_field(g, "address"))
                .or_else(|| str_field(g, "city_state"))
        })
        .map(clean_text)
        .or_else(|| {
            (obj.get("location_type").and_then(Value::as_str) == Some("online"))
                .then(|| "Online".to_string())
        });

    Some(CandidateRecord {
        title: clean_text(title),
        link,
        when: start.to_string(),
        location,
        description: None,
    })
}
