use std::sync::LazyLock;

use scraper::{Html, Selector};
use serde_json::{Map, Value};
use url::Url;

use super::{clean_text, resolve_link};
use crate::model::CandidateRecord;

static LD_JSON: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"script[type="application/ld+json"]"#).unwrap());
static NEXT_DATA: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"script#__NEXT_DATA__"#).unwrap());

/// Every parseable `application/ld+json` payload on the page. Malformed blocks are skipped.
pub fn ld_json_blocks(doc: &Html) -> Vec<Value> {
    doc.select(&LD_JSON)
        .filter_map(|el| {
            let raw = el.text().collect::<String>();
            serde_json::from_str::<Value>(raw.trim()).ok()
        })
        .collect()
}

/// The Next.js bootstrap payload, if the page has one.
pub fn next_data(doc: &Html) -> Option<Value> {
    let el = doc.select(&NEXT_DATA).next()?;
    let raw = el.text().collect::<String>();
    serde_json::from_str(raw.trim()).ok()
}

/// Depth-first visit of every JSON object under `value`.
pub fn walk_objects<'a>(value: &'a Value, visit: &mut dyn FnMut(&'a Map<String, Value>)) {
    match value {
        Value::Object(map) => {
            visit(map);
            for v in map.values() {
                walk_objects(v, visit);
            }
        }
        Value::Array(items) => {
            for v in items {
                walk_objects(v, visit);
            }
        }
        _ => {}
    }
}

/// schema.org `Event` (or any `*Event` subtype) objects, wherever they are
/// nested: top level, arrays, `@graph`, or `ItemList.itemListElement[].item`.
pub fn event_objects(blocks: &[Value]) -> Vec<&Map<String, Value>> {
    let mut events = Vec::new();
    for block in blocks {
        walk_objects(block, &mut |obj| {
            if is_event_type(obj.get("@type")) {
                events.push(obj);
            }
        });
    }
    events
}

fn is_event_type(t: Option<&Value>) -> bool {
    match t {
        Some(Value::String(s)) => s.ends_with("Event"),
        Some(Value::Array(items)) => items
            .iter()
            .any(|v| v.as_str().is_some_and(|s| s.ends_with("Event"))),
        _ => false,
    }
}

pub fn str_field<'a>(obj: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    obj.get(key).and_then(Value::as_str).map(str::trim).filter(|s| !s.is_empty())
}

/// Venue text from a schema.org `location`: a string, a Place, a
/// VirtualLocation, or a list of those.
pub fn location_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(clean_text(s)).filter(|s| !s.is_empty()),
        Value::Array(items) => items.iter().find_map(|v| location_text(Some(v))),
        Value::Object(place) => {
            if place.get("@type").and_then(Value::as_str) == Some("VirtualLocation") {
                return Some("Online".to_string());
            }
            let name = str_field(place, "name");
            let address = match place.get("address") {
                Some(Value::String(s)) => Some(clean_text(s)),
                Some(Value::Object(addr)) => {
                    let parts: Vec<&str> = ["streetAddress", "addressLocality", "addressRegion"]
                        .iter()
                        .filter_map(|k| str_field(addr, k))
                        .collect();
                    Some(parts.join(", ")).filter(|s| !s.is_empty())
                }
                _ => None,
            };
            match (name, address) {
                (Some(n), Some(a)) if !a.starts_with(n) => Some(format!("{n}, {a}")),
                (Some(n), _) => Some(n.to_string()),
                (None, a) => a,
            }
        }
        _ => None,
    }
}

/// Candidates from embedded schema.org Event metadata.
pub fn candidates(doc: &Html, base: &Url) -> Vec<CandidateRecord> {
    let blocks = ld_json_blocks(doc);
    event_objects(&blocks)
        .into_iter()
        .filter_map(|obj| to_candidate(obj, base))
        .collect()
}

fn to_candidate(obj: &Map<String, Value>, base: &Url) -> Option<CandidateRecord> {
    let title = str_field(obj, "name")?;
    let href = str_field(obj, "url").or_else(|| str_field(obj, "@id"))?;
    let link = resolve_link(base, href)?;
    let when = [str_field(obj, "startDate"), str_field(obj, "doorTime")]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(" ");

    Some(CandidateRecord {
        title: clean_text(title),
        link,
        when,
        location: location_text(obj.get("location")),
        description: str_field(obj, "description").map(clean_text),
    })
}
