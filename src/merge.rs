use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::model::{EventRecord, LocalityCatalog, LocalityId};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MergeStats {
    pub added: usize,
    pub replaced: usize,
    pub retained: usize,
}

/// Fold a batch into the previous generation. Additive: links missing from
/// the batch are kept. Per link the last record in `batch` wins, so callers
/// order the batch by processing order. A link repeated inside the batch
/// counts once as added, then as replaced.
pub fn merge(
    previous: Option<LocalityCatalog>,
    locality: &LocalityId,
    batch: Vec<EventRecord>,
    now: DateTime<Utc>,
) -> (LocalityCatalog, MergeStats) {
    let mut next = previous.unwrap_or_else(|| LocalityCatalog::empty(locality.clone(), now));
    let retained = {
        let incoming: HashSet<&str> = batch.iter().map(|r| r.link.as_str()).collect();
        next.events.keys().filter(|k| !incoming.contains(k.as_str())).count()
    };
    let mut stats = MergeStats {
        retained,
        ..Default::default()
    };

    for record in batch {
        debug_assert_eq!(&record.locality, locality);
        match next.events.insert(record.link.clone(), record) {
            Some(_) => stats.replaced += 1,
            None => stats.added += 1,
        }
    }
    next.last_updated = now;

    info!(
        locality = %locality,
        added = stats.added,
        replaced = stats.replaced,
        retained = stats.retained,
        total = next.len(),
        "Merged catalog"
    );
    (next, stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EventDate, EventTime, Source, LOCATION_TBA};
    use chrono::TimeZone;

    fn la() -> LocalityId {
        "ca--los-angeles".parse().unwrap()
    }

    fn rec(link: &str, title: &str, date: &str, source: Source) -> EventRecord {
        EventRecord {
            title: title.into(),
            link: link.into(),
            date: date.parse().unwrap(),
            time: EventTime::Tba,
            location: LOCATION_TBA.into(),
            description: String::new(),
            source,
            locality: la(),
        }
    }

    fn t(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, day, 12, 0, 0).unwrap()
    }

    #[test]
    fn first_run_creates_catalog() {
        let (cat, stats) = merge(None, &la(), vec![rec("https://x/e/a", "A", "TBA", Source::Luma)], t(1));
        assert_eq!(cat.len(), 1);
        assert_eq!(cat.last_updated, t(1));
        assert_eq!(stats.added, 1);
    }

    #[test]
    fn merging_twice_is_idempotent() {
        let batch = vec![
            rec("https://x/e/a", "A", "2026-05-01", Source::Meetup),
            rec("https://x/e/b", "B", "TBA", Source::Meetup),
        ];
        let (once, _) = merge(None, &la(), batch.clone(), t(1));
        let (twice, stats) = merge(Some(once.clone()), &la(), batch, t(1));
        assert_eq!(once, twice);
        assert_eq!(stats.added, 0);
        assert_eq!(stats.replaced, 2);
    }

    #[test]
    fn merge_is_additive_and_overwrites_by_link() {
        let run1 = vec![
            rec("https://x/e/a", "A", "2026-05-01", Source::Dice),
            rec("https://x/e/b", "B", "TBA", Source::Dice),
        ];
        let (cat, _) = merge(None, &la(), run1, t(1));
        let run2 = vec![
            rec("https://x/e/b", "B updated", "2026-05-02", Source::Dice),
            rec("https://x/e/c", "C", "2026-05-03", Source::Dice),
        ];
        let (cat, stats) = merge(Some(cat), &la(), run2, t(2));

        let titles: Vec<&str> = cat.events.values().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, vec!["A", "B updated", "C"]);
        assert_eq!(stats, MergeStats { added: 1, replaced: 1, retained: 1 });
        assert_eq!(cat.last_updated, t(2));
    }

    #[test]
    fn later_source_wins_same_link_within_run() {
        let batch = vec![
            rec("https://x/e/1", "Show", "TBA", Source::Eventbrite),
            rec("https://x/e/1", "Show", "2026-05-01", Source::ResidentAdvisor),
        ];
        let (cat, _) = merge(None, &la(), batch, t(1));
        let entry = &cat.events["https://x/e/1"];
        assert_eq!(entry.date, EventDate::On(chrono::NaiveDate::from_ymd_opt(2026, 5, 1).unwrap()));
        assert_eq!(entry.source, Source::ResidentAdvisor);
    }

    #[test]
    fn sorted_view_puts_tba_last() {
        let batch = vec![
            rec("https://x/e/1", "Late", "TBA", Source::Luma),
            rec("https://x/e/2", "Soon", "2026-04-01", Source::Luma),
            rec("https://x/e/3", "Later", "2026-06-01", Source::Luma),
        ];
        let (cat, _) = merge(None, &la(), batch, t(1));
        let order: Vec<&str> = cat.sorted_events().iter().map(|r| r.title.as_str()).collect();
        assert_eq!(order, vec!["Soon", "Later", "Late"]);
    }
}
