use anyhow::{bail, Context, Result};
use libp2p_identity::PeerId;

use crate::config::Config;

/// One level of a neighbor's attenuated filter vector.
///
/// Wire layout, little-endian like the digest length prefixes elsewhere
/// in this codebase:
///
/// ```text
/// u16 LE  peer-id byte length
/// [u8]    peer-id bytes (canonical multihash encoding)
/// u32 LE  level index
/// [u8]    filter bytes (remainder; must equal M/8)
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterUpdate {
    /// Sender of the update.
    pub peer: PeerId,
    /// Attenuation level the filter belongs to.
    pub index: u32,
    /// Raw filter bits, M/8 bytes.
    pub filter: Vec<u8>,
}

impl FilterUpdate {
    /// Cheap validity pre-check run in the dispatcher before any work is
    /// spawned. The top level is never propagated, so `index` must stay
    /// below depth - 1, and the filter must match the configured width.
    pub fn valid(&self, cfg: &Config) -> bool {
        self.index < cfg.filters_depth - 1 && self.filter.len() == cfg.filter_bytes()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let peer_bytes = self.peer.to_bytes();
        let mut out = Vec::with_capacity(2 + peer_bytes.len() + 4 + self.filter.len());
        out.extend_from_slice(&(peer_bytes.len() as u16).to_le_bytes());
        out.extend_from_slice(&peer_bytes);
        out.extend_from_slice(&self.index.to_le_bytes());
        out.extend_from_slice(&self.filter);
        out
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < 2 {
            bail!("update truncated before peer-id length");
        }
        let peer_len = u16::from_le_bytes([data[0], data[1]]) as usize;
        let rest = &data[2..];
        if rest.len() < peer_len + 4 {
            bail!("update truncated inside header");
        }
        let peer = PeerId::from_bytes(&rest[..peer_len]).context("malformed peer id in update")?;
        let mut index_bytes = [0u8; 4];
        index_bytes.copy_from_slice(&rest[peer_len..peer_len + 4]);
        Ok(FilterUpdate {
            peer,
            index: u32::from_le_bytes(index_bytes),
            filter: rest[peer_len + 4..].to_vec(),
        })
    }
}
