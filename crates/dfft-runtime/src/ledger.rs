#![forbid(unsafe_code)]

//! Bounded FIFO ledger for structured trace records.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Bounded FIFO buffer of trace records.
///
/// Capacity is enforced via `capacity.max(1)`, so a ledger always holds at
/// least one entry. When full, the oldest entry (front of the `VecDeque`) is
/// evicted before a new entry is appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceLedger<T> {
    capacity: usize,
    entries: VecDeque<T>,
    evicted: u64,
}

impl<T> TraceLedger<T> {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: VecDeque::new(),
            evicted: 0,
        }
    }

    /// Append an entry, evicting the oldest if at capacity.
    pub fn record(&mut self, entry: T) {
        if self.entries.len() == self.capacity {
            let _ = self.entries.pop_front();
            self.evicted += 1;
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

    /// The most recently recorded entry.
    #[must_use]
    pub fn latest(&self) -> Option<&T> {
        self.entries.back()
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of entries dropped because the ledger was full.
    #[must_use]
    pub const fn evicted(&self) -> u64 {
        self.evicted
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter()
    }

    /// Remove and return every entry, oldest first.
    pub fn drain(&mut self) -> Vec<T> {
        self.entries.drain(..).collect()
    }
}

impl<T: Serialize> TraceLedger<T> {
    /// Serialize the ledger as JSON lines, oldest first.
    #[must_use]
    pub fn to_jsonl(&self) -> String {
        self.entries
            .iter()
            .filter_map(|entry| serde_json::to_string(entry).ok())
            .collect::<Vec<_>>()
            .join("\n")
    }
}
