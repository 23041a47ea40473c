//! Probabilistic memory of recently witnessed events.
//!
//! Routing must drop an event the second time it is seen, but an exact
//! set of every (topic, payload) pair ever routed grows without bound.
//! The history keeps two Bloom filters sized for `limit` entries at the
//! configured false-positive rate: inserts go to the active filter, and
//! once it has absorbed `limit` entries it becomes the previous filter
//! and a fresh one takes over. Lookups consult both, so between `limit`
//! and `2 * limit` recent events are remembered in bounded memory.
//!
//! A false positive silently suppresses a legitimate event; that is the
//! accepted tradeoff for bounded memory.

use crate::digest::Digest;
use crate::filter::{Filter, FilterParams};

pub struct EventHistory {
    params: FilterParams,
    limit: usize,
    active: Filter,
    previous: Filter,
    active_count: usize,
}

impl EventHistory {
    /// Size the filters for `limit` entries at false-positive rate
    /// `accuracy` using the standard optimum: m = -n ln p / ln^2 2,
    /// k = (m / n) ln 2.
    pub fn new(limit: usize, accuracy: f64) -> Self {
        let n = limit.max(1) as f64;
        let ln2 = std::f64::consts::LN_2;
        let m_bits = (-(n * accuracy.ln()) / (ln2 * ln2)).ceil() as u64;
        // Round up to a whole number of bytes, keep at least one.
        let m = ((m_bits + 7) / 8 * 8).clamp(8, u64::from(u32::MAX)) as u32;
        let k = ((f64::from(m) / n) * ln2).round().max(1.0) as u32;

        let params = FilterParams { m, k };
        EventHistory {
            params,
            limit: limit.max(1),
            active: Filter::zero(&params),
            previous: Filter::zero(&params),
            active_count: 0,
        }
    }

    /// Returns true if `key` was probably seen already; otherwise records
    /// it and returns false.
    pub fn witness(&mut self, key: &[u8]) -> bool {
        let digest = Digest::of(key);
        if self.active.contains(&self.params, &digest)
            || self.previous.contains(&self.params, &digest)
        {
            return true;
        }

        self.active.insert(&self.params, &digest);
        self.active_count += 1;
        if self.active_count >= self.limit {
            self.rotate();
        }
        false
    }

    fn rotate(&mut self) {
        self.previous = std::mem::replace(&mut self.active, Filter::zero(&self.params));
        self.active_count = 0;
    }

    pub fn params(&self) -> &FilterParams {
        &self.params
    }
}
