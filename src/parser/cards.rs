use std::collections::HashSet;

use scraper::{ElementRef, Html, Selector};
use tracing::warn;
use url::Url;

use super::{clean_text, resolve_link};
use crate::model::CandidateRecord;

/// How to find event cards in a listing page when structured metadata is
/// missing. Each field is a CSS selector list; sub-field selectors are
/// tried in order and the first non-empty match wins.
pub struct CardRule {
    pub container: &'static str,
    pub link: &'static str,
    pub title: &'static [&'static str],
    pub date: &'static [&'static str],
    pub venue: &'static [&'static str],
    /// Only keep links whose path contains this.
    pub link_contains: &'static str,
    pub min_title_len: usize,
    pub stop_words: &'static [&'static str],
}

fn compile(sel: &str) -> Option<Selector> {
    match Selector::parse(sel) {
        Ok(s) => Some(s),
        Err(e) => {
            warn!(selector = sel, error = ?e, "Bad card selector");
            None
        }
    }
}

fn first_text(card: &ElementRef, selectors: &[&str]) -> Option<String> {
    selectors.iter().filter_map(|s| compile(s)).find_map(|sel| {
        card.select(&sel)
            .map(|el| clean_text(&el.text().collect::<String>()))
            .find(|t| !t.is_empty())
    })
}

/// `<time datetime="…">` beats visible text when a card has it.
fn time_attr(card: &ElementRef) -> Option<String> {
    let sel = compile("time[datetime]")?;
    card.select(&sel)
        .find_map(|el| el.value().attr("datetime").map(str::to_string))
}

fn is_stop_word(title: &str, stop_words: &[&str]) -> bool {
    let lower = title.to_lowercase();
    stop_words.iter().any(|w| lower == *w || lower.starts_with(&format!("{w} ")))
}

/// Pattern-match repeating cards. Cards missing a link or a plausible title
/// are skipped; a missing date or venue only leaves that field empty.
pub fn scan(doc: &Html, rule: &CardRule, base: &Url) -> Vec<CandidateRecord> {
    let (Some(container), Some(link_sel)) = (compile(rule.container), compile(rule.link)) else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    let mut out = Vec::new();

    for card in doc.select(&container) {
        let Some((anchor, link)) = card.select(&link_sel).find_map(|a| {
            let href = a.value().attr("href")?;
            let link = resolve_link(base, href)?;
            link.contains(rule.link_contains).then_some((a, link))
        }) else {
            continue;
        };
        if !seen.insert(link.clone()) {
            continue;
        }

        let title = first_text(&card, rule.title)
            .or_else(|| anchor.value().attr("aria-label").map(clean_text))
            .or_else(|| Some(clean_text(&anchor.text().collect::<String>())))
            .unwrap_or_default();
        if title.chars().count() < rule.min_title_len || is_stop_word(&title, rule.stop_words) {
            continue;
        }

        // Without a dedicated date node, the whole card is the date blob.
        let card_text = clean_text(&card.text().collect::<Vec<_>>().join(" "));
        let when = time_attr(&card)
            .into_iter()
            .chain(first_text(&card, rule.date))
            .collect::<Vec<_>>()
            .join(" ");
        let when = if when.is_empty() { card_text } else { when };

        out.push(CandidateRecord {
            title,
            link,
            when,
            location: first_text(&card, rule.venue),
            description: None,
        });
    }

    out
}
