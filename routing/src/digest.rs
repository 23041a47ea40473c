use std::fmt;

use libp2p_identity::PeerId;
use sha2::{Digest as _, Sha256};

/// Length in bytes of a routing digest.
pub const DIGEST_LEN: usize = 20;

/// 20-byte routing digest: SHA-256 of the input, truncated.
///
/// Topics are addressed by their digest everywhere inside the node; the
/// original topic bytes are retained only so subscriptions can be
/// enumerated. Peer ids are digested the same way when they are inserted
/// into filters, so every node derives identical filter bits for the same
/// topic or peer.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest([u8; DIGEST_LEN]);

impl Digest {
    /// Digest arbitrary bytes (topic names, history keys).
    pub fn of(data: &[u8]) -> Self {
        let hash = Sha256::digest(data);
        let mut out = [0u8; DIGEST_LEN];
        out.copy_from_slice(&hash[..DIGEST_LEN]);
        Digest(out)
    }

    /// Digest a peer id through its canonical byte encoding.
    pub fn of_peer(peer: &PeerId) -> Self {
        Self::of(&peer.to_bytes())
    }

    pub fn from_bytes(bytes: [u8; DIGEST_LEN]) -> Self {
        Digest(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl AsRef<[u8]> for Digest {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}
