use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::filter::FilterParams;

/// Node configuration.
///
/// The defaults suit a mid-sized overlay; the `with_*` builders exist so
/// embedders and tests can shrink the geometry without spelling out every
/// field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Filter width in bits. Must be a multiple of 8.
    pub filters_m: u32,
    /// Hash positions set per inserted digest.
    pub filters_k: u32,
    /// Attenuation levels per peer, including the local-only top level.
    /// Must be at least 2.
    pub filters_depth: u32,
    /// Milliseconds after which a stored peer filter level counts as
    /// stale.
    pub filter_freshness: u64,
    /// Milliseconds between filter broadcasts to neighbors.
    pub propagation_delay: u64,
    /// TTL assigned to locally published events.
    pub default_event_ttl: u32,
    /// Capacity of the duplicate-event history.
    pub history_limit: usize,
    /// Target false-positive rate of the duplicate-event history.
    pub history_accuracy: f64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            filters_m: 8192,
            filters_k: 6,
            filters_depth: 4,
            filter_freshness: 180_000,
            propagation_delay: 30_000,
            default_event_ttl: 32,
            history_limit: 65_536,
            history_accuracy: 0.0001,
        }
    }
}

impl Config {
    pub fn filter_params(&self) -> FilterParams {
        FilterParams {
            m: self.filters_m,
            k: self.filters_k,
        }
    }

    /// Byte length of every filter at this geometry.
    pub fn filter_bytes(&self) -> usize {
        (self.filters_m / 8) as usize
    }

    pub fn with_filter_geometry(mut self, m: u32, k: u32) -> Self {
        self.filters_m = m;
        self.filters_k = k;
        self
    }

    pub fn with_depth(mut self, depth: u32) -> Self {
        self.filters_depth = depth;
        self
    }

    pub fn with_freshness(mut self, millis: u64) -> Self {
        self.filter_freshness = millis;
        self
    }

    pub fn with_propagation_delay(mut self, millis: u64) -> Self {
        self.propagation_delay = millis;
        self
    }

    pub fn with_default_ttl(mut self, ttl: u32) -> Self {
        self.default_event_ttl = ttl;
        self
    }

    pub fn with_history(mut self, limit: usize, accuracy: f64) -> Self {
        self.history_limit = limit;
        self.history_accuracy = accuracy;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.filters_m == 0 || self.filters_m % 8 != 0 {
            bail!(
                "filters_m must be a positive multiple of 8, got {}",
                self.filters_m
            );
        }
        if self.filters_k == 0 {
            bail!("filters_k must be positive");
        }
        if self.filters_depth < 2 {
            bail!(
                "filters_depth must be at least 2, got {}",
                self.filters_depth
            );
        }
        if self.filter_freshness == 0 {
            bail!("filter_freshness must be positive");
        }
        if self.propagation_delay == 0 {
            bail!("propagation_delay must be positive");
        }
        if self.default_event_ttl == 0 {
            bail!("default_event_ttl must be positive");
        }
        if self.history_limit == 0 {
            bail!("history_limit must be positive");
        }
        if !(self.history_accuracy > 0.0 && self.history_accuracy < 1.0) {
            bail!(
                "history_accuracy must be within (0, 1), got {}",
                self.history_accuracy
            );
        }
        Ok(())
    }
}
