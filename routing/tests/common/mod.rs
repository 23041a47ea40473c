//! Channel-backed overlay for driving a node end to end without a real
//! transport. Updates and events are injected through the same inbound
//! channels a transport would feed, and every outbound send is recorded
//! for assertions.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use routing::{Event, FilterUpdate, Overlay, OverlayInbound, PeerId, TapRecord};
use tokio::sync::mpsc;

#[derive(Default)]
struct Shared {
    connected: Vec<PeerId>,
    update_tx: Option<mpsc::UnboundedSender<FilterUpdate>>,
    event_tx: Option<mpsc::UnboundedSender<Event>>,
    sent_updates: Vec<(PeerId, FilterUpdate)>,
    sent_events: Vec<(PeerId, Event)>,
}

#[derive(Clone)]
pub struct TestOverlay {
    id: PeerId,
    shared: Arc<Mutex<Shared>>,
}

impl TestOverlay {
    pub fn new() -> Self {
        TestOverlay {
            id: PeerId::random(),
            shared: Arc::new(Mutex::new(Shared::default())),
        }
    }

    pub fn connect(&self, peer: PeerId) {
        self.shared.lock().connected.push(peer);
    }

    /// Feed an update into the node as if a neighbor had sent it.
    /// Returns false once the overlay is stopped.
    pub fn inject_update(&self, update: FilterUpdate) -> bool {
        let shared = self.shared.lock();
        match &shared.update_tx {
            Some(tx) => tx.send(update).is_ok(),
            None => false,
        }
    }

    /// Feed an event into the node as if a neighbor had sent it.
    pub fn inject_event(&self, event: Event) -> bool {
        let shared = self.shared.lock();
        match &shared.event_tx {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    pub fn updates_to(&self, peer: &PeerId) -> Vec<FilterUpdate> {
        self.shared
            .lock()
            .sent_updates
            .iter()
            .filter(|(target, _)| target == peer)
            .map(|(_, update)| update.clone())
            .collect()
    }

    pub fn events_to(&self, peer: &PeerId) -> Vec<Event> {
        self.shared
            .lock()
            .sent_events
            .iter()
            .filter(|(target, _)| target == peer)
            .map(|(_, event)| event.clone())
            .collect()
    }

    pub fn sent_event_count(&self) -> usize {
        self.shared.lock().sent_events.len()
    }
}

#[async_trait]
impl Overlay for TestOverlay {
    fn local_id(&self) -> PeerId {
        self.id
    }

    fn connected_peers(&self) -> Vec<PeerId> {
        self.shared.lock().connected.clone()
    }

    fn is_connected(&self, peer: &PeerId) -> bool {
        self.shared.lock().connected.contains(peer)
    }

    async fn send_update(&self, peer: &PeerId, update: FilterUpdate) -> Result<()> {
        self.shared.lock().sent_updates.push((*peer, update));
        Ok(())
    }

    async fn send_event(&self, peer: &PeerId, event: Event) -> Result<()> {
        self.shared.lock().sent_events.push((*peer, event));
        Ok(())
    }

    async fn start(&self) -> Result<OverlayInbound> {
        let (update_tx, updates) = mpsc::unbounded_channel();
        let (event_tx, events) = mpsc::unbounded_channel();
        let mut shared = self.shared.lock();
        shared.update_tx = Some(update_tx);
        shared.event_tx = Some(event_tx);
        Ok(OverlayInbound { updates, events })
    }

    async fn stop(&self) -> Result<()> {
        let mut shared = self.shared.lock();
        shared.update_tx = None;
        shared.event_tx = None;
        Ok(())
    }
}

/// Poll until `cond` holds, failing the test after a second.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met within one second");
}

/// Pull every tap record currently buffered.
pub fn drain_taps(rx: &mut mpsc::Receiver<TapRecord>) -> Vec<TapRecord> {
    let mut records = Vec::new();
    while let Ok(record) = rx.try_recv() {
        records.push(record);
    }
    records
}

/// Keep polling the tap stream until a record matches, accumulating
/// everything seen along the way.
pub async fn wait_for_tap(
    rx: &mut mpsc::Receiver<TapRecord>,
    seen: &mut Vec<TapRecord>,
    mut pred: impl FnMut(&TapRecord) -> bool,
) {
    for _ in 0..200 {
        seen.extend(drain_taps(rx));
        if seen.iter().any(&mut pred) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("expected tap record never arrived");
}
