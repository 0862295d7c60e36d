//! # Memory Grid
//!
//! Bounded store of memory fragments with periodic consolidation into
//! anchors.
//!
//! - Fragments are never mutated. They leave only through capacity eviction
//!   (lowest significance first, oldest on ties, fragments not yet consumed
//!   by an anchor before consumed ones).
//! - Consolidation groups fragments by `(category, sorted tags)` and creates
//!   at most one anchor per group key, ever.
//! - Anchors are evicted lowest reliability first.

use crate::clock::IdSource;
use crate::history::BoundedHistory;
use crate::invariant::clamp_unit;
use crate::primitives::{
    DEFAULT_ANCHOR_CAPACITY, DEFAULT_CONSOLIDATION_THRESHOLD, DEFAULT_FRAGMENT_CAPACITY,
    KEY_POINT_LIMIT, RELIABILITY_BOOST,
};
use crate::types::{ConsolidationReport, MemoryAnchor, MemoryFragment, NodeId, Timestamp};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

/// Memory grid settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub fragment_capacity: usize,
    pub anchor_capacity: usize,
    /// Fragments a group needs before it is consolidated.
    pub consolidation_threshold: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            fragment_capacity: DEFAULT_FRAGMENT_CAPACITY,
            anchor_capacity: DEFAULT_ANCHOR_CAPACITY,
            consolidation_threshold: DEFAULT_CONSOLIDATION_THRESHOLD,
        }
    }
}

/// Fragment query. Empty fields match everything; `tags` matches any-of.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FragmentFilter {
    pub node_id: Option<NodeId>,
    pub category: Option<String>,
    pub tags: BTreeSet<String>,
    pub min_significance: Option<f64>,
}

impl FragmentFilter {
    fn matches(&self, fragment: &MemoryFragment) -> bool {
        self.node_id.as_ref().is_none_or(|n| *n == fragment.node_id)
            && self.category.as_ref().is_none_or(|c| *c == fragment.category)
            && (self.tags.is_empty() || !self.tags.is_disjoint(&fragment.tags))
            && self
                .min_significance
                .is_none_or(|min| fragment.significance >= min)
    }
}

/// Anchor query. Empty fields match everything; `tags` matches any-of.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnchorFilter {
    pub category: Option<String>,
    pub tags: BTreeSet<String>,
    pub min_reliability: Option<f64>,
}

impl AnchorFilter {
    fn matches(&self, anchor: &MemoryAnchor) -> bool {
        self.category.as_ref().is_none_or(|c| *c == anchor.category)
            && (self.tags.is_empty() || !self.tags.is_disjoint(&anchor.tags))
            && self
                .min_reliability
                .is_none_or(|min| anchor.reliability >= min)
    }
}

/// Counts for status output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryStatistics {
    pub fragments: usize,
    pub anchors: usize,
    pub consumed: usize,
    pub fragments_per_category: BTreeMap<String, usize>,
    pub anchors_per_category: BTreeMap<String, usize>,
}

/// Persisted memory grid.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryGridState {
    pub fragments: Vec<MemoryFragment>,
    pub anchors: Vec<MemoryAnchor>,
    /// Group keys that already produced an anchor.
    pub anchor_keys: Vec<String>,
    /// Fragment ids consumed by an anchor.
    pub consumed: Vec<String>,
}

/// Group key: category plus sorted tags.
fn group_key(category: &str, tags: &BTreeSet<String>) -> String {
    let tags: Vec<&str> = tags.iter().map(String::as_str).collect();
    format!("{}|{}", category, tags.join(","))
}

#[derive(Debug)]
pub struct MemoryGrid {
    config: MemoryConfig,
    /// Insertion order, oldest first.
    fragments: Vec<MemoryFragment>,
    anchors: BoundedHistory<MemoryAnchor>,
    anchor_keys: BTreeSet<String>,
    consumed: BTreeSet<String>,
}

impl MemoryGrid {
    #[must_use]
    pub fn new(config: MemoryConfig) -> Self {
        let anchors = BoundedHistory::new(config.anchor_capacity);
        Self {
            config,
            fragments: Vec::new(),
            anchors,
            anchor_keys: BTreeSet::new(),
            consumed: BTreeSet::new(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// Store a fragment, evicting one if the grid is full.
    ///
    /// Returns the evicted fragment, if any.
    pub fn store_fragment(&mut self, mut fragment: MemoryFragment) -> Option<MemoryFragment> {
        fragment.significance = clamp_unit(fragment.significance, "memory.significance");

        let evicted = if self.fragments.len() >= self.config.fragment_capacity.max(1) {
            self.eviction_candidate().map(|idx| {
                let removed = self.fragments.remove(idx);
                self.consumed.remove(&removed.id);
                tracing::debug!(
                    fragment = %removed.id,
                    significance = removed.significance,
                    "Memory fragment evicted"
                );
                removed
            })
        } else {
            None
        };

        self.fragments.push(fragment);
        evicted
    }

    /// Index of the fragment to evict: unconsumed first, then lowest
    /// significance, then oldest.
    fn eviction_candidate(&self) -> Option<usize> {
        let unconsumed = self
            .fragments
            .iter()
            .any(|f| !self.consumed.contains(&f.id));

        self.fragments
            .iter()
            .enumerate()
            .filter(|(_, f)| !unconsumed || !self.consumed.contains(&f.id))
            .min_by(|(ia, a), (ib, b)| {
                a.significance
                    .partial_cmp(&b.significance)
                    .unwrap_or(Ordering::Equal)
                    .then(ia.cmp(ib))
            })
            .map(|(idx, _)| idx)
    }

    /// Matching fragments, significance desc then recency desc.
    #[must_use]
    pub fn retrieve_fragments(&self, filter: &FragmentFilter, limit: usize) -> Vec<MemoryFragment> {
        let mut matched: Vec<(usize, &MemoryFragment)> = self
            .fragments
            .iter()
            .enumerate()
            .filter(|(_, f)| filter.matches(f))
            .collect();
        matched.sort_by(|(ia, a), (ib, b)| {
            b.significance
                .partial_cmp(&a.significance)
                .unwrap_or(Ordering::Equal)
                .then(b.timestamp.cmp(&a.timestamp))
                .then(ib.cmp(ia))
        });
        matched
            .into_iter()
            .take(limit)
            .map(|(_, f)| f.clone())
            .collect()
    }

    /// Matching anchors, reliability desc then recency desc.
    #[must_use]
    pub fn retrieve_anchors(&self, filter: &AnchorFilter, limit: usize) -> Vec<MemoryAnchor> {
        let mut matched: Vec<(usize, &MemoryAnchor)> = self
            .anchors
            .iter()
            .enumerate()
            .filter(|(_, a)| filter.matches(a))
            .collect();
        matched.sort_by(|(ia, a), (ib, b)| {
            b.reliability
                .partial_cmp(&a.reliability)
                .unwrap_or(Ordering::Equal)
                .then(b.timestamp.cmp(&a.timestamp))
                .then(ib.cmp(ia))
        });
        matched
            .into_iter()
            .take(limit)
            .map(|(_, a)| a.clone())
            .collect()
    }

    /// One consolidation sweep.
    pub fn consolidate(&mut self, timestamp: Timestamp, ids: &dyn IdSource) -> ConsolidationReport {
        let mut groups: BTreeMap<String, Vec<&MemoryFragment>> = BTreeMap::new();
        for fragment in &self.fragments {
            groups
                .entry(group_key(&fragment.category, &fragment.tags))
                .or_default()
                .push(fragment);
        }

        let groups_examined = groups.len();
        let mut new_anchors = Vec::new();

        for (key, members) in groups {
            if members.len() < self.config.consolidation_threshold
                || self.anchor_keys.contains(&key)
            {
                continue;
            }
            let Some(first) = members.first() else {
                continue;
            };

            let average =
                members.iter().map(|f| f.significance).sum::<f64>() / members.len() as f64;
            let mut key_points: Vec<String> = Vec::new();
            for fragment in &members {
                if key_points.len() >= KEY_POINT_LIMIT {
                    break;
                }
                if !key_points.contains(&fragment.payload.event) {
                    key_points.push(fragment.payload.event.clone());
                }
            }

            new_anchors.push((
                key,
                MemoryAnchor {
                    id: ids.next_id("anchor"),
                    timestamp,
                    source_fragment_ids: members.iter().map(|f| f.id.clone()).collect(),
                    category: first.category.clone(),
                    tags: first.tags.clone(),
                    summary: format!(
                        "Consolidated {} {} fragments",
                        members.len(),
                        first.category
                    ),
                    key_points,
                    reliability: (average * RELIABILITY_BOOST).min(1.0),
                },
            ));
        }

        let mut anchors_created = Vec::with_capacity(new_anchors.len());
        for (key, anchor) in new_anchors {
            self.anchor_keys.insert(key);
            self.consumed
                .extend(anchor.source_fragment_ids.iter().cloned());
            anchors_created.push(anchor.id.clone());
            tracing::info!(
                event = "consolidation",
                anchor = %anchor.id,
                category = %anchor.category,
                sources = anchor.source_fragment_ids.len(),
                reliability = anchor.reliability,
                "Memory anchor created"
            );
            self.anchors
                .push_evicting_by(anchor, |a: &MemoryAnchor| a.reliability);
        }

        ConsolidationReport {
            timestamp,
            groups_examined,
            anchors_created,
        }
    }

    #[must_use]
    pub fn statistics(&self) -> MemoryStatistics {
        let mut fragments_per_category = BTreeMap::new();
        for fragment in &self.fragments {
            *fragments_per_category
                .entry(fragment.category.clone())
                .or_insert(0) += 1;
        }
        let mut anchors_per_category = BTreeMap::new();
        for anchor in self.anchors.iter() {
            *anchors_per_category
                .entry(anchor.category.clone())
                .or_insert(0) += 1;
        }
        MemoryStatistics {
            fragments: self.fragments.len(),
            anchors: self.anchors.len(),
            consumed: self.consumed.len(),
            fragments_per_category,
            anchors_per_category,
        }
    }

    #[must_use]
    pub fn state(&self) -> MemoryGridState {
        MemoryGridState {
            fragments: self.fragments.clone(),
            anchors: self.anchors.to_vec(),
            anchor_keys: self.anchor_keys.iter().cloned().collect(),
            consumed: self.consumed.iter().cloned().collect(),
        }
    }

    /// Rebuild a grid from persisted state, trimming to the configured
    /// capacities (oldest fragments dropped first).
    #[must_use]
    pub fn from_state(config: MemoryConfig, state: MemoryGridState) -> Self {
        let mut fragments = state.fragments;
        let excess = fragments.len().saturating_sub(config.fragment_capacity.max(1));
        fragments.drain(..excess);

        let ids: BTreeSet<&str> = fragments.iter().map(|f| f.id.as_str()).collect();
        let consumed = state
            .consumed
            .into_iter()
            .filter(|id| ids.contains(id.as_str()))
            .collect();

        Self {
            anchors: BoundedHistory::from_items(config.anchor_capacity, state.anchors),
            config,
            fragments,
            anchor_keys: state.anchor_keys.into_iter().collect(),
            consumed,
        }
    }
}

impl Default for MemoryGrid {
    fn default() -> Self {
        Self::new(MemoryConfig::default())
    }
}
