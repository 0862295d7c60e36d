//! # Bounded Histories
//!
//! Every history in the engine has a hard capacity. `BoundedHistory` keeps
//! items in insertion order (oldest first) and evicts on overflow, either
//! FIFO or by lowest significance.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Which item to drop when a history is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum EvictionPolicy {
    /// Drop the oldest item.
    #[default]
    Fifo,
    /// Drop the least significant item; the oldest one on ties.
    LowestSignificance,
}

/// An insertion-ordered buffer with a hard capacity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundedHistory<T> {
    capacity: usize,
    items: VecDeque<T>,
}

impl<T> BoundedHistory<T> {
    /// Create an empty history. A capacity of zero is raised to one.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            items: VecDeque::with_capacity(capacity.min(1024)),
        }
    }

    /// Rebuild a history from stored items, keeping the newest `capacity`.
    #[must_use]
    pub fn from_items(capacity: usize, items: Vec<T>) -> Self {
        let mut history = Self::new(capacity);
        for item in items {
            history.push(item);
        }
        history
    }

    /// Append, evicting the oldest item when full. Returns the evicted item.
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = if self.items.len() >= self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item);
        evicted
    }

    /// Append, evicting the item with the lowest `significance` when full.
    ///
    /// The incoming item takes part in the comparison only after it is
    /// stored, so a full history always accepts the new item.
    pub fn push_evicting_by<F>(&mut self, item: T, significance: F) -> Option<T>
    where
        F: Fn(&T) -> f64,
    {
        let evicted = if self.items.len() >= self.capacity {
            let mut victim = 0;
            let mut lowest = f64::INFINITY;
            for (index, existing) in self.items.iter().enumerate() {
                let score = significance(existing);
                if score < lowest {
                    lowest = score;
                    victim = index;
                }
            }
            self.items.remove(victim)
        } else {
            None
        };
        self.items.push_back(item);
        evicted
    }

    /// Append using the given policy.
    pub fn push_with<F>(&mut self, item: T, policy: EvictionPolicy, significance: F) -> Option<T>
    where
        F: Fn(&T) -> f64,
    {
        match policy {
            EvictionPolicy::Fifo => self.push(item),
            EvictionPolicy::LowestSignificance => self.push_evicting_by(item, significance),
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// The most recently appended item.
    #[must_use]
    pub fn latest(&self) -> Option<&T> {
        self.items.back()
    }

    /// Oldest-first iterator.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> {
        self.items.iter()
    }
}

impl<T: Clone> BoundedHistory<T> {
    /// Up to `limit` items, newest first.
    #[must_use]
    pub fn recent(&self, limit: usize) -> Vec<T> {
        self.items.iter().rev().take(limit).cloned().collect()
    }

    /// All items, oldest first.
    #[must_use]
    pub fn to_vec(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }
}
