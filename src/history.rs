//! Bounded signaling history ring buffer, owned by
//! [`CoreClient`](crate::client::CoreClient) (spec §9 Design Notes
//! "Unbounded history": "a bounded ring buffer owned by CoreClient, capped
//! at a configurable length; oldest entries evicted on overflow").

use std::collections::VecDeque;

/// One recorded signaling event, kept only for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub timestamp_millis: u64,
    pub peer: String,
    pub description: String,
}

/// A fixed-capacity ring buffer of [`HistoryEntry`].
pub struct History {
    capacity: usize,
    entries: VecDeque<HistoryEntry>,
}

impl History {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: VecDeque::with_capacity(capacity),
        }
    }

    /// Records `entry`, evicting the oldest entry if at capacity.
    pub fn record(&mut self, entry: HistoryEntry) {
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The recorded entries, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(n: u64) -> HistoryEntry {
        HistoryEntry {
            timestamp_millis: n,
            peer: "bob".into(),
            description: format!("event-{n}"),
        }
    }

    #[test]
    fn evicts_oldest_entry_on_overflow() {
        let mut history = History::new(2);
        history.record(entry(1));
        history.record(entry(2));
        history.record(entry(3));
        let kept: Vec<_> = history.iter().map(|e| e.timestamp_millis).collect();
        assert_eq!(kept, vec![2, 3]);
    }

    #[test]
    fn capacity_of_zero_is_clamped_to_one() {
        let mut history = History::new(0);
        history.record(entry(1));
        history.record(entry(2));
        assert_eq!(history.len(), 1);
    }
}
