use anyhow::Result;
use async_trait::async_trait;
use libp2p_identity::PeerId;
use tokio::sync::mpsc;

use crate::event::Event;
use crate::update::FilterUpdate;

/// Inbound channels handed over by the overlay when it starts. Updates
/// and events arrive on distinct channels so the dispatcher can apply
/// their validity pre-checks independently.
pub struct OverlayInbound {
    pub updates: mpsc::UnboundedReceiver<FilterUpdate>,
    pub events: mpsc::UnboundedReceiver<Event>,
}

/// The unstructured overlay transport the routing core runs on.
///
/// Peer discovery, connection management and wire serialization all live
/// behind this trait; the core only asks who is connected, sends records
/// to specific peers, and consumes the two inbound channels. Sends are
/// fire-and-forget from the router's point of view: a failed send is the
/// overlay's problem to surface.
#[async_trait]
pub trait Overlay: Send + Sync + 'static {
    /// The local node's peer id.
    fn local_id(&self) -> PeerId;

    /// Snapshot of currently connected neighbors.
    fn connected_peers(&self) -> Vec<PeerId>;

    /// Whether `peer` is currently connected. Gates update ingestion so
    /// the peer table stays bounded by live connectivity.
    fn is_connected(&self, peer: &PeerId) -> bool;

    async fn send_update(&self, peer: &PeerId, update: FilterUpdate) -> Result<()>;

    async fn send_event(&self, peer: &PeerId, event: Event) -> Result<()>;

    /// Start the transport and hand back the inbound channels.
    async fn start(&self) -> Result<OverlayInbound>;

    /// Stop the transport. Closing the inbound senders lets the
    /// dispatcher observe shutdown promptly.
    async fn stop(&self) -> Result<()>;
}
