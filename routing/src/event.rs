use libp2p_identity::PeerId;

use crate::digest::Digest;

/// A topic-tagged payload traveling through the overlay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Routing key: digest of the topic bytes.
    pub digest: Digest,
    pub payload: Vec<u8>,
    /// Remaining hops. Decremented only when the event is forwarded
    /// without a local-subscription match.
    pub ttl: u32,
    /// Peers that have deliberately forwarded the event on behalf of a
    /// local subscription, in path order. Grows monotonically; consulted
    /// for negative-route avoidance.
    pub publishers: Vec<PeerId>,
}

impl Event {
    pub fn new(topic: &[u8], payload: Vec<u8>, ttl: u32) -> Self {
        Event {
            digest: Digest::of(topic),
            payload,
            ttl,
            publishers: Vec::new(),
        }
    }

    /// Ingress validity: an event that arrives already exhausted is
    /// discarded before any routing work is spawned.
    pub fn valid(&self) -> bool {
        self.ttl > 0
    }

    /// Key under which the duplicate history remembers this event.
    pub(crate) fn history_key(&self) -> Vec<u8> {
        let mut key = Vec::with_capacity(self.digest.as_bytes().len() + self.payload.len());
        key.extend_from_slice(self.digest.as_bytes());
        key.extend_from_slice(&self.payload);
        key
    }
}
