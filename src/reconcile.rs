//! Change detection against the previously stored state.
//!
//! Feeds are identified by their declared title. A feed counts as changed
//! only when its latest item *link* differs from the stored one; item titles
//! are carried along for display but never compared.

use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};

use crate::feed::FeedSnapshot;
use crate::store::FeedRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    FirstSeen,
    Changed,
    Unchanged,
}

/// A feed whose latest entry is new to us in this run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub title: String,
    pub new_item_title: String,
    pub new_item_link: String,
}

impl ChangeEvent {
    /// One human-readable line for the notification body.
    pub fn summary_line(&self) -> String {
        format!(
            "{}:   {} - {}",
            self.title, self.new_item_title, self.new_item_link
        )
    }
}

#[derive(Debug, Default)]
pub struct Reconciliation {
    /// Events in input order
    pub events: Vec<ChangeEvent>,
    /// Records to commit so storage matches this run's observations
    pub upserts: Vec<FeedRecord>,
    /// Classification of every distinct feed, in input order
    pub classifications: Vec<(String, Classification)>,
    /// Sources skipped because an earlier source already claimed their title
    pub duplicates: Vec<String>,
}

impl Reconciliation {
    pub fn count(&self, classification: Classification) -> usize {
        self.classifications
            .iter()
            .filter(|(_, c)| *c == classification)
            .count()
    }
}

pub fn classify(snapshot: &FeedSnapshot, prior: Option<&FeedRecord>) -> Classification {
    match prior {
        None => Classification::FirstSeen,
        Some(record) if record.last_item_link != snapshot.latest_item_link => {
            Classification::Changed
        }
        Some(_) => Classification::Unchanged,
    }
}

/// Compare this run's snapshots with the prior state.
///
/// Pure: nothing is written here. The caller commits `upserts` once the
/// whole batch has been classified.
pub fn reconcile(
    snapshots: &[FeedSnapshot],
    prior: &HashMap<String, FeedRecord>,
) -> Reconciliation {
    let mut result = Reconciliation::default();
    let mut seen: HashSet<&str> = HashSet::new();

    for snapshot in snapshots {
        if !seen.insert(snapshot.title.as_str()) {
            warn!(
                "Feed title '{}' from {} is already provided by another source, skipping",
                snapshot.title, snapshot.source
            );
            result.duplicates.push(snapshot.source.clone());
            continue;
        }

        let classification = classify(snapshot, prior.get(&snapshot.title));
        debug!("Feed '{}' classified as {:?}", snapshot.title, classification);

        if classification != Classification::Unchanged {
            result.events.push(ChangeEvent {
                title: snapshot.title.clone(),
                new_item_title: snapshot.latest_item_title.clone(),
                new_item_link: snapshot.latest_item_link.clone(),
            });
            result.upserts.push(FeedRecord::new(
                snapshot.title.clone(),
                snapshot.latest_item_title.clone(),
                snapshot.latest_item_link.clone(),
            ));
        }
        result
            .classifications
            .push((snapshot.title.clone(), classification));
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(title: &str, item_title: &str, link: &str) -> FeedSnapshot {
        FeedSnapshot {
            source: format!("https://{}.example.com/rss", title.to_lowercase().replace(' ', "-")),
            title: title.to_string(),
            latest_item_title: item_title.to_string(),
            latest_item_link: link.to_string(),
        }
    }

    fn state(records: &[(&str, &str, &str)]) -> HashMap<String, FeedRecord> {
        records
            .iter()
            .map(|(t, it, l)| (t.to_string(), FeedRecord::new(*t, *it, *l)))
            .collect()
    }

    /// Apply a reconciliation's upserts the way a store would.
    fn apply(prior: &mut HashMap<String, FeedRecord>, result: &Reconciliation) {
        for record in &result.upserts {
            prior.insert(record.title.clone(), record.clone());
        }
    }

    #[test]
    fn test_first_seen_feeds_all_produce_events() {
        let snapshots = vec![
            snapshot("ComicA", "Ep1", "u1"),
            snapshot("ComicB", "Ep1", "u2"),
        ];

        let result = reconcile(&snapshots, &HashMap::new());

        assert_eq!(result.events.len(), 2);
        assert_eq!(result.events[0].title, "ComicA");
        assert_eq!(result.events[1].title, "ComicB");
        assert_eq!(
            result.upserts,
            vec![
                FeedRecord::new("ComicA", "Ep1", "u1"),
                FeedRecord::new("ComicB", "Ep1", "u2"),
            ]
        );
        assert_eq!(result.count(Classification::FirstSeen), 2);
    }

    #[test]
    fn test_same_link_new_title_is_unchanged() {
        let prior = state(&[("ComicA", "Ep1", "u1")]);
        let result = reconcile(&[snapshot("ComicA", "Ep2", "u1")], &prior);

        assert!(result.events.is_empty());
        assert!(result.upserts.is_empty());
        assert_eq!(
            result.classifications,
            vec![("ComicA".to_string(), Classification::Unchanged)]
        );
    }

    #[test]
    fn test_new_link_same_title_is_changed() {
        let prior = state(&[("ComicA", "Ep1", "u1")]);
        let result = reconcile(&[snapshot("ComicA", "Ep1", "u9")], &prior);

        assert_eq!(result.events.len(), 1);
        assert_eq!(result.count(Classification::Changed), 1);
        assert_eq!(result.upserts, vec![FeedRecord::new("ComicA", "Ep1", "u9")]);
    }

    #[test]
    fn test_new_link_and_title_updates_record() {
        let prior = state(&[("ComicA", "Ep1", "u1")]);
        let result = reconcile(&[snapshot("ComicA", "Ep2", "u2")], &prior);

        assert_eq!(
            result.events,
            vec![ChangeEvent {
                title: "ComicA".to_string(),
                new_item_title: "Ep2".to_string(),
                new_item_link: "u2".to_string(),
            }]
        );
        assert_eq!(result.upserts, vec![FeedRecord::new("ComicA", "Ep2", "u2")]);
    }

    #[test]
    fn test_second_pass_is_idempotent() {
        let snapshots = vec![
            snapshot("ComicA", "Ep1", "u1"),
            snapshot("ComicB", "Ep3", "u3"),
        ];
        let mut prior = state(&[("ComicB", "Ep2", "u2")]);

        let first = reconcile(&snapshots, &prior);
        assert_eq!(first.events.len(), 2);
        apply(&mut prior, &first);

        let second = reconcile(&snapshots, &prior);
        assert!(second.events.is_empty());
        assert!(second.upserts.is_empty());
        assert_eq!(second.count(Classification::Unchanged), 2);
    }

    #[test]
    fn test_events_keep_input_order_across_classifications() {
        let prior = state(&[("Beta", "Old", "b0"), ("Gamma", "Same", "g1")]);
        let snapshots = vec![
            snapshot("Gamma", "Same", "g1"),
            snapshot("Beta", "New", "b1"),
            snapshot("Alpha", "First", "a1"),
        ];

        let result = reconcile(&snapshots, &prior);

        let titles: Vec<_> = result.events.iter().map(|e| e.title.as_str()).collect();
        assert_eq!(titles, vec!["Beta", "Alpha"]);
        assert_eq!(
            result.classifications,
            vec![
                ("Gamma".to_string(), Classification::Unchanged),
                ("Beta".to_string(), Classification::Changed),
                ("Alpha".to_string(), Classification::FirstSeen),
            ]
        );
    }

    #[test]
    fn test_duplicate_title_first_source_wins() {
        let mut second = snapshot("ComicA", "Other", "x1");
        second.source = "https://mirror.example.com/rss".to_string();
        let snapshots = vec![snapshot("ComicA", "Ep1", "u1"), second];

        let result = reconcile(&snapshots, &HashMap::new());

        assert_eq!(result.events.len(), 1);
        assert_eq!(result.events[0].new_item_link, "u1");
        assert_eq!(result.upserts.len(), 1);
        assert_eq!(result.duplicates, vec!["https://mirror.example.com/rss"]);
    }

    #[test]
    fn test_stale_records_are_left_alone() {
        let prior = state(&[("Retired", "Last", "r1"), ("ComicA", "Ep1", "u1")]);
        let result = reconcile(&[snapshot("ComicA", "Ep1", "u1")], &prior);

        assert!(result.upserts.is_empty());
        assert_eq!(result.classifications.len(), 1);
    }

    #[test]
    fn test_summary_line() {
        let event = ChangeEvent {
            title: "ComicA".to_string(),
            new_item_title: "Ep2".to_string(),
            new_item_link: "https://a/2".to_string(),
        };
        assert_eq!(event.summary_line(), "ComicA:   Ep2 - https://a/2");
    }
}
