//! Accumulated, deduplicated detection history for one session.
//!
//! Records are keyed by id with first-write-wins semantics: once an id has
//! been accepted, later records carrying the same id are dropped and the
//! stored record is never touched again.

use crate::core::record::DetectionRecord;
use std::collections::HashSet;

/// Number of records shown in the on-screen history table.
pub const DISPLAY_LIMIT: usize = 50;

/// The accumulated record set of a session.
///
/// Insertion order is retained; [`History::sorted`] gives the stable display
/// and export order.
#[derive(Debug, Clone, Default)]
pub struct History {
    records: Vec<DetectionRecord>,
    ids: HashSet<String>,
}

/// Outcome of merging one incoming batch.
#[derive(Debug, Clone, Default)]
pub struct MergeReport {
    /// Records that were new to the history, in batch order
    pub accepted: Vec<DetectionRecord>,
    /// Records dropped because their id was already present
    pub duplicates: usize,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge `incoming` into the history in sequence order.
    ///
    /// Runs in O(incoming) against the id index. A record whose id is already
    /// present, either from earlier merges or earlier in the same batch, is
    /// dropped. Re-merging a batch is therefore a no-op.
    pub fn merge<I>(&mut self, incoming: I) -> MergeReport
    where
        I: IntoIterator<Item = DetectionRecord>,
    {
        let mut report = MergeReport::default();

        for record in incoming {
            if self.ids.contains(&record.id) {
                report.duplicates += 1;
                continue;
            }
            self.ids.insert(record.id.clone());
            self.records.push(record.clone());
            report.accepted.push(record);
        }

        report
    }

    /// Whether a record with this id has been accepted.
    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn get(&self, id: &str) -> Option<&DetectionRecord> {
        if !self.contains(id) {
            return None;
        }
        self.records.iter().find(|r| r.id == id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records in acceptance order.
    pub fn records(&self) -> &[DetectionRecord] {
        &self.records
    }

    /// Records newest first; equal timestamps are ordered by id.
    pub fn sorted(&self) -> Vec<&DetectionRecord> {
        let mut keyed: Vec<_> = self
            .records
            .iter()
            .map(|r| (r.observed_at(), r))
            .collect();
        keyed.sort_by(|(ta, a), (tb, b)| tb.cmp(ta).then_with(|| a.id.cmp(&b.id)));
        keyed.into_iter().map(|(_, r)| r).collect()
    }

    /// The `limit` most recent records, in display order.
    pub fn recent(&self, limit: usize) -> Vec<&DetectionRecord> {
        let mut sorted = self.sorted();
        sorted.truncate(limit);
        sorted
    }
}

impl PartialEq for History {
    fn eq(&self, other: &Self) -> bool {
        self.records == other.records
    }
}

/// Pure form of [`History::merge`]: returns the union of `existing` and
/// `incoming` without modifying `existing`.
pub fn merge(existing: &History, incoming: &[DetectionRecord]) -> History {
    let mut merged = existing.clone();
    merged.merge(incoming.iter().cloned());
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::record::RiskLevel;

    fn record(id: &str, timestamp: &str) -> DetectionRecord {
        DetectionRecord {
            id: id.to_string(),
            timestamp: timestamp.to_string(),
            risk_level: RiskLevel::Low,
            confidence: 0.8,
            position_x: 0.0,
            position_y: 0.0,
            session_id: "s".to_string(),
        }
    }

    #[test]
    fn test_merge_is_idempotent() {
        let mut base = History::new();
        base.merge(vec![record("a", "2024-01-01T00:00:00Z")]);

        let batch = vec![
            record("b", "2024-01-01T00:00:01Z"),
            record("a", "2024-01-01T00:00:09Z"),
            record("c", "2024-01-01T00:00:02Z"),
        ];

        let once = merge(&base, &batch);
        let twice = merge(&once, &batch);

        assert_eq!(once, twice);
        assert_eq!(once.len(), 3);
    }

    #[test]
    fn test_duplicate_within_batch_keeps_first() {
        let mut history = History::new();
        let report = history.merge(vec![
            record("1", "2024-01-01T00:00:01Z"),
            record("1", "2024-01-01T00:00:02Z"),
        ]);

        assert_eq!(history.len(), 1);
        assert_eq!(report.accepted.len(), 1);
        assert_eq!(report.duplicates, 1);
        assert_eq!(history.get("1").unwrap().timestamp, "2024-01-01T00:00:01Z");
    }

    #[test]
    fn test_existing_record_never_overwritten() {
        let mut history = History::new();
        history.merge(vec![record("x", "2024-01-01T00:00:00Z")]);

        let mut changed = record("x", "2024-06-01T00:00:00Z");
        changed.risk_level = RiskLevel::High;
        let report = history.merge(vec![changed]);

        assert!(report.accepted.is_empty());
        let kept = history.get("x").unwrap();
        assert_eq!(kept.risk_level, RiskLevel::Low);
        assert_eq!(kept.timestamp, "2024-01-01T00:00:00Z");
    }

    #[test]
    fn test_pure_merge_leaves_input_untouched() {
        let base = History::new();
        let merged = merge(&base, &[record("a", "2024-01-01T00:00:00Z")]);

        assert!(base.is_empty());
        assert!(merged.contains("a"));
    }

    #[test]
    fn test_sorted_newest_first_ties_by_id() {
        let mut history = History::new();
        history.merge(vec![
            record("b", "2024-01-01T00:00:00Z"),
            record("c", "2024-01-01T00:00:05Z"),
            record("a", "2024-01-01T00:00:00Z"),
        ]);

        let ids: Vec<_> = history.sorted().iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_sorted_compares_instants_not_strings() {
        let mut history = History::new();
        history.merge(vec![
            record("utc", "2024-01-01T10:00:00Z"),
            record("offset", "2024-01-01T11:30:00+02:00"),
        ]);

        let ids: Vec<_> = history.sorted().iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["utc", "offset"]);
    }

    #[test]
    fn test_recent_is_truncated() {
        let mut history = History::new();
        history.merge((0..60).map(|i| record(&format!("p{i:02}"), "2024-01-01T00:00:00Z")));

        let recent = history.recent(DISPLAY_LIMIT);
        assert_eq!(recent.len(), DISPLAY_LIMIT);
        assert_eq!(recent[0].id, "p00");
        assert_eq!(history.len(), 60);
    }
}
