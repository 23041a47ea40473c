//! The routing node: dispatcher, event router, filter propagator and
//! expiration sweeper around a single set of shared tables.
//!
//! All tables live behind one reader/writer lock. Route decisions and
//! propagation payloads are computed under the lock and returned as
//! plain data; network sends and sink writes always happen after the
//! lock is released, so nothing the node awaits can hold routing state
//! hostage.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use libp2p_identity::PeerId;
use parking_lot::{Mutex, RwLock};
use rand::seq::SliceRandom;
use tokio::sync::watch;
use tokio::time;
use tracing::{debug, warn};

use crate::config::Config;
use crate::digest::Digest;
use crate::event::Event;
use crate::filter::Filter;
use crate::history::EventHistory;
use crate::overlay::{Overlay, OverlayInbound};
use crate::peers::{now_millis, PeerTable};
use crate::subscriptions::{EventSink, SubscriptionTable};
use crate::taps::{TapRecord, Taps};
use crate::update::FilterUpdate;

/// Tables guarded by the node's lock.
struct State {
    peers: PeerTable,
    subscriptions: SubscriptionTable,
}

struct NodeInner<O> {
    overlay: O,
    cfg: Config,
    local_id: PeerId,
    state: RwLock<State>,
    /// Separately synchronized so `witness` (a logical write) can run
    /// while a router holds the table read lock.
    history: Mutex<EventHistory>,
    taps: Taps,
    stop: Mutex<Option<watch::Sender<bool>>>,
}

/// What the router decided to do with one event. Computed under the
/// read lock; executed after it is released.
enum RouteDecision {
    Duplicate,
    Deliver {
        sinks: Vec<Arc<dyn EventSink>>,
        fanout: Vec<PeerId>,
    },
    DropTtl,
    Well(PeerId),
    Random(PeerId),
    NoRoute,
}

/// A pub/sub routing node over an overlay transport.
///
/// Cheap to clone; clones share the same state and can be handed to
/// spawned tasks.
pub struct Node<O: Overlay> {
    inner: Arc<NodeInner<O>>,
}

impl<O: Overlay> Clone for Node<O> {
    fn clone(&self) -> Self {
        Node {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<O: Overlay> Node<O> {
    pub fn new(overlay: O, cfg: Config, taps: Taps) -> Result<Self> {
        cfg.validate().context("invalid node configuration")?;
        let local_id = overlay.local_id();
        let history = EventHistory::new(cfg.history_limit, cfg.history_accuracy);
        let state = State {
            peers: PeerTable::new(&cfg),
            subscriptions: SubscriptionTable::new(),
        };
        Ok(Node {
            inner: Arc::new(NodeInner {
                overlay,
                cfg,
                local_id,
                state: RwLock::new(state),
                history: Mutex::new(history),
                taps,
                stop: Mutex::new(None),
            }),
        })
    }

    pub fn local_id(&self) -> PeerId {
        self.inner.local_id
    }

    pub fn config(&self) -> &Config {
        &self.inner.cfg
    }

    /// Start the overlay and the three background tasks: dispatcher,
    /// filter propagator, expiration sweeper.
    pub async fn start(&self) -> Result<()> {
        let inbound = self
            .inner
            .overlay
            .start()
            .await
            .context("failed to start overlay")?;

        let (stop_tx, stop_rx) = watch::channel(false);
        *self.inner.stop.lock() = Some(stop_tx);

        tokio::spawn(self.clone().dispatch(inbound, stop_rx.clone()));
        tokio::spawn(self.clone().propagate_loop(stop_rx.clone()));
        tokio::spawn(self.clone().sweep_loop(stop_rx));
        Ok(())
    }

    /// Stop the overlay first so the dispatcher sees channel closure
    /// promptly, then signal the background loops. Transient tasks that
    /// are already in flight run to completion.
    pub async fn stop(&self) -> Result<()> {
        self.inner
            .overlay
            .stop()
            .await
            .context("failed to stop overlay")?;
        if let Some(stop) = self.inner.stop.lock().take() {
            let _ = stop.send(true);
        }
        Ok(())
    }

    /// Publish a payload under a topic. The event enters the same
    /// routing path as events received from the overlay.
    pub async fn publish(&self, topic: &[u8], payload: Vec<u8>) {
        let event = Event::new(topic, payload, self.inner.cfg.default_event_ttl);
        self.inner.taps.emit(TapRecord::EventPublished {
            node: self.inner.local_id,
            digest: event.digest,
        });
        self.route(event).await;
    }

    /// Register a sink for a topic. A topic may carry any number of
    /// sinks; each receives every delivered payload.
    pub fn subscribe(&self, topic: &[u8], sink: Arc<dyn EventSink>) {
        let digest = self.inner.state.write().subscriptions.subscribe(topic, sink);
        debug!(topic = %digest, "subscribed");
    }

    /// Remove a sink registered for a topic, compared by identity.
    /// Passing `None` removes every sink for the topic.
    pub fn unsubscribe(&self, topic: &[u8], sink: Option<&Arc<dyn EventSink>>) {
        self.inner.state.write().subscriptions.unsubscribe(topic, sink);
    }

    pub fn subscribers(&self, topic: &[u8]) -> Vec<Arc<dyn EventSink>> {
        self.inner.state.read().subscriptions.subscribers(topic)
    }

    pub fn subscriptions(&self) -> Vec<Vec<u8>> {
        self.inner.state.read().subscriptions.topics()
    }

    // ---- dispatcher ----

    async fn dispatch(self, mut inbound: OverlayInbound, mut stop: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                maybe_update = inbound.updates.recv() => {
                    let Some(update) = maybe_update else { return };
                    self.dispatch_update(update);
                }
                maybe_event = inbound.events.recv() => {
                    let Some(event) = maybe_event else { return };
                    self.dispatch_event(event);
                }
                _ = stop.changed() => return,
            }
        }
    }

    fn dispatch_update(&self, update: FilterUpdate) {
        if update.valid(&self.inner.cfg) {
            let node = self.clone();
            tokio::spawn(async move { node.process_update(update).await });
        } else {
            debug!(
                peer = %update.peer,
                index = update.index,
                len = update.filter.len(),
                "invalid update discarded"
            );
            self.inner.taps.emit(TapRecord::UpdateRejected {
                node: self.inner.local_id,
                sender: update.peer,
                index: update.index,
            });
        }
    }

    fn dispatch_event(&self, event: Event) {
        if event.valid() {
            self.inner.taps.emit(TapRecord::EventReceived {
                node: self.inner.local_id,
                digest: event.digest,
            });
            let node = self.clone();
            tokio::spawn(async move { node.route(event).await });
        } else {
            debug!(digest = %event.digest, "invalid event discarded");
        }
    }

    // ---- update ingestion ----

    pub(crate) async fn process_update(self, update: FilterUpdate) {
        let me = self.inner.local_id;
        let FilterUpdate { peer, index, filter } = update;
        self.inner.taps.emit(TapRecord::UpdateReceived {
            node: me,
            sender: peer,
            index,
        });

        // Filters from peers the overlay does not report as connected
        // would let an anonymous source bias routing and grow the table
        // without bound.
        if !self.inner.overlay.is_connected(&peer) {
            debug!(peer = %peer, "update from unconnected peer rejected");
            self.inner.taps.emit(TapRecord::UpdateRejected {
                node: me,
                sender: peer,
                index,
            });
            return;
        }

        let now = now_millis();
        self.inner.state.write().peers.install(peer, index, filter, now);
        self.inner.taps.emit(TapRecord::UpdateAccepted {
            node: me,
            sender: peer,
            index,
        });
    }

    // ---- event routing ----

    /// Route one event: duplicate check, local delivery with direct
    /// flood, TTL decay, well-informed forwarding with negative-route
    /// avoidance, random fallback.
    pub(crate) async fn route(&self, mut event: Event) {
        let me = self.inner.local_id;
        let digest = event.digest;
        match self.decide(&mut event) {
            RouteDecision::Duplicate => {
                self.inner
                    .taps
                    .emit(TapRecord::EventDropDuplicate { node: me, digest });
            }
            RouteDecision::DropTtl => {
                self.inner
                    .taps
                    .emit(TapRecord::EventDropTtl { node: me, digest });
            }
            RouteDecision::NoRoute => {
                debug!(digest = %digest, "no connected peers, event dropped");
            }
            RouteDecision::Deliver { sinks, fanout } => {
                self.inner.taps.emit(TapRecord::EventDelivered {
                    node: me,
                    digest,
                    sinks: sinks.len(),
                });
                for (position, sink) in sinks.iter().enumerate() {
                    // Best effort: one failed subscriber must not starve
                    // the rest.
                    if let Err(err) = sink.deliver(&event.payload).await {
                        warn!(digest = %digest, position, error = %err, "subscriber write failed");
                    }
                }
                for target in fanout {
                    self.send_event_to(
                        target,
                        event.clone(),
                        TapRecord::RouteDirect {
                            node: me,
                            digest,
                            target,
                        },
                    );
                }
            }
            RouteDecision::Well(target) => {
                self.send_event_to(
                    target,
                    event,
                    TapRecord::RouteWell {
                        node: me,
                        digest,
                        target,
                    },
                );
            }
            RouteDecision::Random(target) => {
                self.send_event_to(
                    target,
                    event,
                    TapRecord::RouteRandom {
                        node: me,
                        digest,
                        target,
                    },
                );
            }
        }
    }

    fn decide(&self, event: &mut Event) -> RouteDecision {
        if self.inner.history.lock().witness(&event.history_key()) {
            return RouteDecision::Duplicate;
        }

        let params = self.inner.cfg.filter_params();
        let state = self.inner.state.read();

        if let Some(sinks) = state.subscriptions.sinks_for(&event.digest) {
            let sinks = sinks.clone();
            drop(state);
            // A delivering node becomes a publisher on the event's path
            // and floods it onward, acting as an implicit rendezvous.
            event.publishers.push(self.inner.local_id);
            return RouteDecision::Deliver {
                sinks,
                fanout: self.inner.overlay.connected_peers(),
            };
        }

        event.ttl -= 1;
        if event.ttl == 0 {
            return RouteDecision::DropTtl;
        }

        // Scan levels closest-first so a neighbor that is fewer hops from
        // a subscriber wins over a distant match.
        for level in 0..self.inner.cfg.filters_depth as usize {
            for (peer, entry) in state.peers.iter() {
                let filter = entry.level(level);
                if !filter.contains(&params, &event.digest) {
                    continue;
                }
                // Negative-route avoidance: a filter that also knows one
                // of the event's previous publishers points back toward
                // territory the event has already covered.
                let backtracks = event
                    .publishers
                    .iter()
                    .any(|publisher| filter.contains(&params, &Digest::of_peer(publisher)));
                if !backtracks {
                    return RouteDecision::Well(*peer);
                }
            }
        }
        drop(state);

        match self
            .inner
            .overlay
            .connected_peers()
            .choose(&mut rand::thread_rng())
        {
            Some(peer) => RouteDecision::Random(*peer),
            None => RouteDecision::NoRoute,
        }
    }

    /// Queue an event send. Sends are fire-and-forget; failures are the
    /// overlay's to surface and are only traced here.
    fn send_event_to(&self, target: PeerId, event: Event, tap: TapRecord) {
        self.inner.taps.emit(tap);
        let node = self.clone();
        tokio::spawn(async move {
            if let Err(err) = node.inner.overlay.send_event(&target, event).await {
                debug!(peer = %target, error = %err, "event send failed");
            }
        });
    }

    // ---- filter propagation ----

    async fn propagate_loop(self, mut stop: watch::Receiver<bool>) {
        let period = Duration::from_millis(self.inner.cfg.propagation_delay.max(1));
        let mut ticker = time::interval_at(time::Instant::now() + period, period);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.send_updates(),
                _ = stop.changed() => return,
            }
        }
    }

    /// Build the local attenuated vector and send every level but the
    /// top to every connected neighbor.
    pub(crate) fn send_updates(&self) {
        let filters = self.build_filters();
        let me = self.inner.local_id;
        let levels_to_send = self.inner.cfg.filters_depth as usize - 1;

        for target in self.inner.overlay.connected_peers() {
            for (index, filter) in filters.iter().take(levels_to_send).enumerate() {
                let update = FilterUpdate {
                    peer: me,
                    index: index as u32,
                    filter: filter.as_bytes().to_vec(),
                };
                self.inner.taps.emit(TapRecord::UpdateSent {
                    node: me,
                    target,
                    index: update.index,
                });
                let node = self.clone();
                tokio::spawn(async move {
                    if let Err(err) = node.inner.overlay.send_update(&target, update).await {
                        debug!(peer = %target, error = %err, "update send failed");
                    }
                });
            }
        }
    }

    /// Local attenuated vector: level 0 carries the node's subscriptions
    /// and its own peer-id digest; level i is the union of every live
    /// neighbor's level i-1, attenuating topic knowledge by hop
    /// distance. The top level is computed for routing only and never
    /// leaves the node.
    fn build_filters(&self) -> Vec<Filter> {
        let params = self.inner.cfg.filter_params();
        let depth = self.inner.cfg.filters_depth as usize;
        let freshness = self.inner.cfg.filter_freshness;
        let mut filters = vec![Filter::zero(&params); depth];

        let state = self.inner.state.read();
        for digest in state.subscriptions.digests() {
            filters[0].insert(&params, digest);
        }
        // The own-id digest is what lets downstream nodes recognize this
        // node in negative-route checks.
        filters[0].insert(&params, &Digest::of_peer(&self.inner.local_id));

        let now = now_millis();
        for level in 1..depth {
            filters[level] = state.peers.merged_level(level - 1, freshness, now);
        }
        filters
    }

    // ---- expiration sweeping ----

    async fn sweep_loop(self, mut stop: watch::Receiver<bool>) {
        // Half the freshness interval bounds how long past expiry an
        // entry can linger.
        let period = Duration::from_millis((self.inner.cfg.filter_freshness / 2).max(1));
        let mut ticker = time::interval_at(time::Instant::now() + period, period);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.remove_expired_peers(),
                _ = stop.changed() => return,
            }
        }
    }

    fn remove_expired_peers(&self) {
        let now = now_millis();
        let removed = self
            .inner
            .state
            .write()
            .peers
            .sweep(self.inner.cfg.filter_freshness, now);
        if removed > 0 {
            debug!(removed, "expired peer entries removed");
        }
    }
}
