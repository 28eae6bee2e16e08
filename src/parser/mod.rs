pub mod cards;
pub mod extract;
pub mod jsonld;

use std::collections::HashSet;

use url::Url;

use crate::model::{CandidateRecord, LocalityId, Source};
use crate::validate::canonical_link;

/// One listing site. Implementations never fail: unparseable markup yields
/// fewer records, and missing sub-fields stay empty for the validator to fill.
pub trait SourceExtractor: Send + Sync {
    fn source(&self) -> Source;

    /// Default listing page for a locality.
    fn listing_url(&self, locality: &LocalityId) -> String;

    fn extract(&self, content: &str, base: &Url) -> Vec<CandidateRecord>;
}

/// Resolve `href` against the page it came from.
pub fn resolve_link(base: &Url, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') || href.starts_with("javascript:") {
        return None;
    }
    base.join(href).ok().map(|u| u.to_string())
}

/// Collapse runs of whitespace to single spaces.
pub fn clean_text(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Structured records first, then pattern-matched ones for links the
/// structured pass did not cover. Links compare in canonical form, so a card
/// href with tracking params still matches its metadata record.
pub fn combine(primary: Vec<CandidateRecord>, fallback: Vec<CandidateRecord>) -> Vec<CandidateRecord> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut out = Vec::with_capacity(primary.len() + fallback.len());
    for rec in primary.into_iter().chain(fallback) {
        if rec.link.is_empty() {
            out.push(rec);
            continue;
        }
        let key = canonical_link(&rec.link).unwrap_or_else(|_| rec.link.clone());
        if seen.insert(key) {
            out.push(rec);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(title: &str, link: &str) -> CandidateRecord {
        CandidateRecord {
            title: title.into(),
            link: link.into(),
            ..Default::default()
        }
    }

    #[test]
    fn resolves_relative_links() {
        let base = Url::parse("https://ra.co/events/us/losangeles").unwrap();
        assert_eq!(resolve_link(&base, "/events/123").as_deref(), Some("https://ra.co/events/123"));
        assert_eq!(
            resolve_link(&base, "https://dice.fm/event/x").as_deref(),
            Some("https://dice.fm/event/x")
        );
        assert_eq!(resolve_link(&base, "#top"), None);
        assert_eq!(resolve_link(&base, "  "), None);
    }

    #[test]
    fn combine_prefers_primary() {
        let primary = vec![rec("From metadata", "https://x/e/1")];
        let fallback = vec![rec("From card", "https://x/e/1"), rec("Other", "https://x/e/2")];
        let out = combine(primary, fallback);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].title, "From metadata");
        assert_eq!(out[1].link, "https://x/e/2");
    }

    #[test]
    fn combine_matches_tracked_card_links() {
        let primary = vec![rec("From metadata", "https://www.eventbrite.com/e/show-1001")];
        let fallback = vec![
            rec("From card", "https://www.eventbrite.com/e/show-1001?aff=ebdssbdestsearch"),
            rec("Anchor", "https://www.eventbrite.com/e/show-1001#tickets"),
        ];
        let out = combine(primary, fallback);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].title, "From metadata");
    }

    #[test]
    fn clean_text_collapses() {
        assert_eq!(clean_text("  Jazz \n\n  Night\t"), "Jazz Night");
    }
}
