//! Bloom filter primitives.
//!
//! A filter is an M-bit array; inserting a digest sets K bit positions
//! derived from it by double hashing, and containment tests that all K
//! are set. Positions depend only on the digest and the (M, K) geometry,
//! so every node in the overlay computes the same bits for the same
//! topic or peer digest. Filters of equal width merge by bitwise OR.

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};

use crate::digest::Digest;

/// Filter geometry shared by every filter a node handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterParams {
    /// Width in bits. Must be a multiple of 8.
    pub m: u32,
    /// Bit positions set per inserted digest.
    pub k: u32,
}

impl FilterParams {
    pub fn byte_len(&self) -> usize {
        (self.m / 8) as usize
    }

    /// Bit positions for a digest: position_j = (h1 + j * h2) mod M,
    /// with h1 and h2 taken from independent halves of a fresh SHA-256
    /// of the digest. h2 is forced odd so the stride never degenerates.
    fn positions(&self, digest: &Digest) -> impl Iterator<Item = usize> + '_ {
        let hash = Sha256::digest(digest.as_bytes());
        let mut h1_bytes = [0u8; 8];
        let mut h2_bytes = [0u8; 8];
        h1_bytes.copy_from_slice(&hash[..8]);
        h2_bytes.copy_from_slice(&hash[8..16]);
        let h1 = u64::from_le_bytes(h1_bytes);
        let h2 = u64::from_le_bytes(h2_bytes) | 1;
        let m = u64::from(self.m);
        (0..self.k).map(move |j| ((h1.wrapping_add(u64::from(j).wrapping_mul(h2))) % m) as usize)
    }
}

/// Fixed-width bit array.
#[derive(Clone, PartialEq, Eq)]
pub struct Filter {
    bits: Vec<u8>,
}

impl Filter {
    /// All-zero filter of the configured width.
    pub fn zero(params: &FilterParams) -> Self {
        Filter {
            bits: vec![0u8; params.byte_len()],
        }
    }

    /// Wrap raw filter bytes received off the wire. The caller is
    /// responsible for having checked the length against the configured
    /// width.
    pub fn from_bytes(bits: Vec<u8>) -> Self {
        Filter { bits }
    }

    pub fn insert(&mut self, params: &FilterParams, digest: &Digest) {
        for pos in params.positions(digest) {
            self.bits[pos / 8] |= 1 << (pos % 8);
        }
    }

    pub fn contains(&self, params: &FilterParams, digest: &Digest) -> bool {
        params
            .positions(digest)
            .all(|pos| self.bits[pos / 8] & (1 << (pos % 8)) != 0)
    }

    /// Bitwise OR of `other` into `self`. Both filters must share the
    /// same width.
    pub fn merge(&mut self, other: &Filter) {
        debug_assert_eq!(self.bits.len(), other.bits.len());
        for (dst, src) in self.bits.iter_mut().zip(&other.bits) {
            *dst |= src;
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bits
    }

    pub fn byte_len(&self) -> usize {
        self.bits.len()
    }

    pub fn count_ones(&self) -> u32 {
        self.bits.iter().map(|byte| byte.count_ones()).sum()
    }

    pub fn is_zero(&self) -> bool {
        self.bits.iter().all(|byte| *byte == 0)
    }
}

impl std::fmt::Debug for Filter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Filter({} bits, {} set)",
            self.bits.len() * 8,
            self.count_ones()
        )
    }
}
