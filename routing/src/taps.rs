//! Observability taps: a bounded, non-blocking stream of routing
//! decisions for embedders that want to watch the node work.
//!
//! A slow or absent consumer must never stall routing, so emission is a
//! `try_send` into a bounded channel; records are dropped on the floor
//! when nobody keeps up. Records carry the local peer id inline rather
//! than referencing the node.

use libp2p_identity::PeerId;
use tokio::sync::mpsc;

use crate::digest::Digest;

/// One routing decision, as observed at `node`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TapRecord {
    UpdateSent {
        node: PeerId,
        target: PeerId,
        index: u32,
    },
    UpdateReceived {
        node: PeerId,
        sender: PeerId,
        index: u32,
    },
    /// Update passed validation and was installed in the peer table.
    UpdateAccepted {
        node: PeerId,
        sender: PeerId,
        index: u32,
    },
    /// Update discarded: malformed, out of range, or not from a
    /// currently connected neighbor.
    UpdateRejected {
        node: PeerId,
        sender: PeerId,
        index: u32,
    },
    EventPublished { node: PeerId, digest: Digest },
    EventReceived { node: PeerId, digest: Digest },
    /// Payload written to local subscribers.
    EventDelivered {
        node: PeerId,
        digest: Digest,
        sinks: usize,
    },
    EventDropDuplicate { node: PeerId, digest: Digest },
    EventDropTtl { node: PeerId, digest: Digest },
    /// Flood to a neighbor after a local delivery.
    RouteDirect {
        node: PeerId,
        digest: Digest,
        target: PeerId,
    },
    /// Well-informed forward to a neighbor whose filter matched.
    RouteWell {
        node: PeerId,
        digest: Digest,
        target: PeerId,
    },
    /// Random-walk fallback when no filter matched.
    RouteRandom {
        node: PeerId,
        digest: Digest,
        target: PeerId,
    },
}

/// Handle used by the node to emit records. Cloneable and cheap; a
/// disabled handle discards everything.
#[derive(Clone, Default)]
pub struct Taps {
    tx: Option<mpsc::Sender<TapRecord>>,
}

impl Taps {
    /// No consumer; every record is discarded.
    pub fn disabled() -> Self {
        Taps { tx: None }
    }

    /// Bounded tap stream. Records beyond `capacity` undelivered are
    /// dropped rather than blocking the emitter.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<TapRecord>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Taps { tx: Some(tx) }, rx)
    }

    pub fn emit(&self, record: TapRecord) {
        if let Some(tx) = &self.tx {
            let _ = tx.try_send(record);
        }
    }
}
