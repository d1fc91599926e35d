use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::models::PairKey;

/// Inspection view of one dispatched pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    #[serde(flatten)]
    pub pair: PairKey,
    #[serde(rename = "notifiedAt")]
    pub notified_at: DateTime<Utc>,
}

/// Record of (volunteer, help request) pairs that have already been dispatched
///
/// Not synchronized; the engine holds it behind a mutex and serializes
/// check-and-mark.
#[derive(Debug, Clone, Default)]
pub struct NotificationLedger {
    entries: HashMap<PairKey, DateTime<Utc>>,
}

impl NotificationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_notified(&self, pair: &PairKey) -> bool {
        self.entries.contains_key(pair)
    }

    /// Mark a pair as dispatched. Returns `false` if it was already marked,
    /// in which case the original mark time is kept.
    pub fn mark_notified(&mut self, pair: PairKey) -> bool {
        if self.entries.contains_key(&pair) {
            return false;
        }
        self.entries.insert(pair, Utc::now());
        true
    }

    pub fn reset(&mut self) -> usize {
        let removed = self.entries.len();
        self.entries.clear();
        removed
    }

    /// Drop every entry referencing a retired help request
    pub fn forget_help_request(&mut self, help_request_id: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|pair, _| pair.help_request_id != help_request_id);
        before - self.entries.len()
    }

    /// Drop every entry referencing a retired volunteer
    pub fn forget_volunteer(&mut self, volunteer_id: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|pair, _| pair.volunteer_id != volunteer_id);
        before - self.entries.len()
    }

    /// Drop entries whose help request or volunteer fails the given predicates
    pub fn retain_present<H, V>(&mut self, help_request_present: H, volunteer_present: V) -> usize
    where
        H: Fn(&str) -> bool,
        V: Fn(&str) -> bool,
    {
        let before = self.entries.len();
        self.entries.retain(|pair, _| {
            help_request_present(&pair.help_request_id) && volunteer_present(&pair.volunteer_id)
        });
        before - self.entries.len()
    }

    /// Bulk restore, e.g. from persisted state
    pub fn extend<I: IntoIterator<Item = PairKey>>(&mut self, pairs: I) {
        let now = Utc::now();
        for pair in pairs {
            self.entries.entry(pair).or_insert(now);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn pairs(&self) -> Vec<PairKey> {
        let mut pairs: Vec<PairKey> = self.entries.keys().cloned().collect();
        pairs.sort();
        pairs
    }

    /// Sorted snapshot for inspection
    pub fn entries(&self) -> Vec<LedgerEntry> {
        let mut entries: Vec<LedgerEntry> = self
            .entries
            .iter()
            .map(|(pair, notified_at)| LedgerEntry {
                pair: pair.clone(),
                notified_at: *notified_at,
            })
            .collect();
        entries.sort_by(|a, b| a.pair.cmp(&b.pair));
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_is_idempotent() {
        let mut ledger = NotificationLedger::new();
        let pair = PairKey::new("v1", "h1");

        assert!(!ledger.has_notified(&pair));
        assert!(ledger.mark_notified(pair.clone()));
        let first = ledger.entries();

        assert!(!ledger.mark_notified(pair.clone()));
        assert_eq!(ledger.entries(), first);
        assert_eq!(ledger.len(), 1);
        assert!(ledger.has_notified(&pair));
    }

    #[test]
    fn test_only_explicit_marks_count() {
        let mut ledger = NotificationLedger::new();
        ledger.mark_notified(PairKey::new("v1", "h1"));

        assert!(!ledger.has_notified(&PairKey::new("v2", "h1")));
        assert!(!ledger.has_notified(&PairKey::new("v1", "h2")));
    }

    #[test]
    fn test_forget_help_request() {
        let mut ledger = NotificationLedger::new();
        ledger.mark_notified(PairKey::new("v1", "h1"));
        ledger.mark_notified(PairKey::new("v2", "h1"));
        ledger.mark_notified(PairKey::new("v1", "h2"));

        assert_eq!(ledger.forget_help_request("h1"), 2);
        assert_eq!(ledger.pairs(), vec![PairKey::new("v1", "h2")]);
        assert_eq!(ledger.forget_help_request("missing"), 0);
    }

    #[test]
    fn test_forget_volunteer() {
        let mut ledger = NotificationLedger::new();
        ledger.mark_notified(PairKey::new("v1", "h1"));
        ledger.mark_notified(PairKey::new("v1", "h2"));
        ledger.mark_notified(PairKey::new("v2", "h1"));

        assert_eq!(ledger.forget_volunteer("v1"), 2);
        assert!(ledger.has_notified(&PairKey::new("v2", "h1")));
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut ledger = NotificationLedger::new();
        ledger.extend([PairKey::new("v1", "h1"), PairKey::new("v2", "h2")]);

        assert_eq!(ledger.reset(), 2);
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_retain_present() {
        let mut ledger = NotificationLedger::new();
        ledger.extend([
            PairKey::new("v1", "h1"),
            PairKey::new("v2", "h1"),
            PairKey::new("v1", "h2"),
        ]);

        let removed = ledger.retain_present(|h| h == "h1", |v| v == "v1");
        assert_eq!(removed, 2);
        assert_eq!(ledger.pairs(), vec![PairKey::new("v1", "h1")]);
    }
}
