//! In-process demo mesh for the routing engine: every node is connected
//! to every other through channel pairs, one node subscribes, another
//! publishes, and the tap streams show the routing decisions in between.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, ensure, Result};
use async_trait::async_trait;
use clap::Parser;
use libp2p_identity::PeerId;
use parking_lot::Mutex;
use routing::{Config, Event, FilterUpdate, Node, Overlay, OverlayInbound, Taps};
use tokio::sync::mpsc;
use tracing::info;

#[derive(Parser, Debug)]
struct Args {
    /// Number of nodes in the fully connected mesh.
    #[arg(short, long, default_value_t = 4)]
    nodes: usize,

    /// Topic to exercise.
    #[arg(short, long, default_value = "demo")]
    topic: String,

    /// Payload published once filters have had time to propagate.
    #[arg(short, long, default_value = "hello quasar")]
    payload: String,

    /// Milliseconds between filter broadcasts.
    #[arg(long, default_value_t = 500)]
    propagation_delay: u64,
}

struct MeshRoutes {
    update_tx: mpsc::UnboundedSender<FilterUpdate>,
    event_tx: mpsc::UnboundedSender<Event>,
}

/// Channel fabric shared by every overlay in the mesh. Nodes register
/// their inbound senders on start and deregister on stop, so
/// connectivity is simply "registered and not me".
#[derive(Default)]
struct MeshFabric {
    routes: Mutex<HashMap<PeerId, MeshRoutes>>,
}

#[derive(Clone)]
struct MeshOverlay {
    id: PeerId,
    fabric: Arc<MeshFabric>,
}

impl MeshOverlay {
    fn new(fabric: Arc<MeshFabric>) -> Self {
        MeshOverlay {
            id: PeerId::random(),
            fabric,
        }
    }
}

#[async_trait]
impl Overlay for MeshOverlay {
    fn local_id(&self) -> PeerId {
        self.id
    }

    fn connected_peers(&self) -> Vec<PeerId> {
        self.fabric
            .routes
            .lock()
            .keys()
            .filter(|id| **id != self.id)
            .cloned()
            .collect()
    }

    fn is_connected(&self, peer: &PeerId) -> bool {
        *peer != self.id && self.fabric.routes.lock().contains_key(peer)
    }

    async fn send_update(&self, peer: &PeerId, update: FilterUpdate) -> Result<()> {
        let routes = self.fabric.routes.lock();
        let route = routes
            .get(peer)
            .ok_or_else(|| anyhow!("peer {peer} not in mesh"))?;
        route
            .update_tx
            .send(update)
            .map_err(|_| anyhow!("peer {peer} stopped"))
    }

    async fn send_event(&self, peer: &PeerId, event: Event) -> Result<()> {
        let routes = self.fabric.routes.lock();
        let route = routes
            .get(peer)
            .ok_or_else(|| anyhow!("peer {peer} not in mesh"))?;
        route
            .event_tx
            .send(event)
            .map_err(|_| anyhow!("peer {peer} stopped"))
    }

    async fn start(&self) -> Result<OverlayInbound> {
        let (update_tx, updates) = mpsc::unbounded_channel();
        let (event_tx, events) = mpsc::unbounded_channel();
        self.fabric.routes.lock().insert(
            self.id,
            MeshRoutes {
                update_tx,
                event_tx,
            },
        );
        Ok(OverlayInbound { updates, events })
    }

    async fn stop(&self) -> Result<()> {
        self.fabric.routes.lock().remove(&self.id);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    ensure!(args.nodes >= 1, "need at least one node");

    let cfg = Config::default()
        .with_filter_geometry(1024, 4)
        .with_depth(3)
        .with_propagation_delay(args.propagation_delay);

    let fabric = Arc::new(MeshFabric::default());
    let mut nodes = Vec::with_capacity(args.nodes);
    for index in 0..args.nodes {
        let overlay = MeshOverlay::new(Arc::clone(&fabric));
        let (taps, mut tap_rx) = Taps::channel(1024);
        let node = Node::new(overlay, cfg.clone(), taps)?;
        node.start().await?;

        tokio::spawn(async move {
            while let Some(record) = tap_rx.recv().await {
                info!(node = index, ?record, "tap");
            }
        });
        nodes.push(node);
    }

    let (sink, mut delivered) = mpsc::unbounded_channel::<Vec<u8>>();
    nodes[0].subscribe(args.topic.as_bytes(), Arc::new(sink));
    info!(node = 0, topic = %args.topic, "subscribed");

    // A few propagation ticks let the subscription's filter reach the
    // publisher before the event enters the mesh.
    tokio::time::sleep(Duration::from_millis(args.propagation_delay * 3)).await;

    let publisher = args.nodes - 1;
    nodes[publisher]
        .publish(args.topic.as_bytes(), args.payload.clone().into_bytes())
        .await;
    info!(node = publisher, "published");

    match tokio::time::timeout(Duration::from_secs(5), delivered.recv()).await {
        Ok(Some(payload)) => {
            info!(payload = %String::from_utf8_lossy(&payload), "delivered to subscriber")
        }
        _ => anyhow::bail!("payload was not delivered"),
    }

    for node in &nodes {
        node.stop().await?;
    }
    Ok(())
}
