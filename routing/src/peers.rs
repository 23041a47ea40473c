//! Per-neighbor attenuated filter state.
//!
//! Each neighbor that has sent at least one accepted update owns an
//! entry: D filters plus a millisecond timestamp per level. Entries whose
//! every level has gone stale are removed by the sweeper, which together
//! with the connectivity check on ingest bounds the table to the set of
//! live neighbors.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use libp2p_identity::PeerId;

use crate::config::Config;
use crate::filter::{Filter, FilterParams};

/// Milliseconds since the Unix epoch.
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

/// Attenuated filter vector for one neighbor.
#[derive(Debug, Clone)]
pub struct PeerEntry {
    filters: Vec<Filter>,
    /// Wall-clock milliseconds of the last accepted update per level.
    timestamps: Vec<u64>,
}

impl PeerEntry {
    fn new(params: &FilterParams, depth: usize) -> Self {
        PeerEntry {
            filters: vec![Filter::zero(params); depth],
            timestamps: vec![0u64; depth],
        }
    }

    pub fn level(&self, index: usize) -> &Filter {
        &self.filters[index]
    }

    pub fn timestamp(&self, index: usize) -> u64 {
        self.timestamps[index]
    }

    /// A level is fresh if it was rewritten within `freshness` ms.
    fn level_fresh(&self, index: usize, freshness: u64, now: u64) -> bool {
        now.saturating_sub(self.timestamps[index]) <= freshness
    }

    /// An entry is expired only when every level is stale. The propagator
    /// and the sweeper both use this predicate, so merge skipping and
    /// removal agree on which neighbors still count.
    pub fn expired(&self, freshness: u64, now: u64) -> bool {
        (0..self.timestamps.len()).all(|index| !self.level_fresh(index, freshness, now))
    }
}

/// Table of per-neighbor attenuated filter vectors.
pub struct PeerTable {
    entries: HashMap<PeerId, PeerEntry>,
    params: FilterParams,
    depth: usize,
}

impl PeerTable {
    pub fn new(cfg: &Config) -> Self {
        PeerTable {
            entries: HashMap::new(),
            params: cfg.filter_params(),
            depth: cfg.filters_depth as usize,
        }
    }

    /// Install filter bytes at one level of a peer's vector, creating the
    /// entry on first contact. The caller has already validated the index
    /// range and byte length; both are re-checked here so a bad caller
    /// cannot corrupt the table.
    pub fn install(&mut self, peer: PeerId, index: u32, filter: Vec<u8>, now: u64) {
        let index = index as usize;
        if index >= self.depth.saturating_sub(1) || filter.len() != self.params.byte_len() {
            return;
        }
        let entry = self
            .entries
            .entry(peer)
            .or_insert_with(|| PeerEntry::new(&self.params, self.depth));
        entry.filters[index] = Filter::from_bytes(filter);
        entry.timestamps[index] = now;
    }

    pub fn get(&self, peer: &PeerId) -> Option<&PeerEntry> {
        self.entries.get(peer)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PeerId, &PeerEntry)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Bitwise OR of every live entry's filter at `level`. Entries the
    /// sweeper would remove are skipped so a merge between sweeps does
    /// not resurrect dead routes.
    pub fn merged_level(&self, level: usize, freshness: u64, now: u64) -> Filter {
        let mut merged = Filter::zero(&self.params);
        for entry in self.entries.values() {
            if entry.expired(freshness, now) {
                continue;
            }
            merged.merge(entry.level(level));
        }
        merged
    }

    /// Remove entries whose every level has gone stale. Returns how many
    /// were dropped.
    pub fn sweep(&mut self, freshness: u64, now: u64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.expired(freshness, now));
        before - self.entries.len()
    }
}
