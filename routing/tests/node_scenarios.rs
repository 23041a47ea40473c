//! End-to-end scenarios driving a node through the channel-backed
//! overlay harness.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{wait_for_tap, wait_until, TestOverlay};
use routing::{
    Config, Digest, Event, EventSink, Filter, FilterUpdate, Node, PeerId, TapRecord, Taps,
};
use tokio::sync::mpsc;

fn scenario_config() -> Config {
    Config::default()
        .with_filter_geometry(1024, 4)
        .with_depth(3)
        .with_default_ttl(5)
        .with_history(1024, 0.0001)
        .with_propagation_delay(150)
        .with_freshness(60_000)
}

fn filter_bytes(cfg: &Config, digests: &[Digest]) -> Vec<u8> {
    let params = cfg.filter_params();
    let mut filter = Filter::zero(&params);
    for digest in digests {
        filter.insert(&params, digest);
    }
    filter.as_bytes().to_vec()
}

fn channel_sink() -> (Arc<dyn EventSink>, mpsc::UnboundedReceiver<Vec<u8>>) {
    let (tx, rx) = mpsc::unbounded_channel::<Vec<u8>>();
    (Arc::new(tx), rx)
}

#[tokio::test]
async fn s1_local_delivery_and_direct_flood() {
    let overlay = TestOverlay::new();
    let neighbor_b = PeerId::random();
    let neighbor_c = PeerId::random();
    overlay.connect(neighbor_b);
    overlay.connect(neighbor_c);

    let (taps, mut tap_rx) = Taps::channel(256);
    let node = Node::new(overlay.clone(), scenario_config(), taps).unwrap();
    node.start().await.unwrap();

    let (sink, mut payload_rx) = channel_sink();
    node.subscribe(b"news", sink);

    assert!(overlay.inject_event(Event::new(b"news", b"hello".to_vec(), 5)));

    assert_eq!(payload_rx.recv().await.unwrap(), b"hello".to_vec());
    wait_until(|| {
        overlay.events_to(&neighbor_b).len() == 1 && overlay.events_to(&neighbor_c).len() == 1
    })
    .await;

    // The flooded copies carry this node on their path, TTL untouched.
    let forwarded = overlay.events_to(&neighbor_b);
    assert_eq!(forwarded[0].publishers, vec![node.local_id()]);
    assert_eq!(forwarded[0].ttl, 5);

    let mut seen = Vec::new();
    wait_for_tap(&mut tap_rx, &mut seen, |record| {
        matches!(record, TapRecord::EventDelivered { sinks: 1, .. })
    })
    .await;
    assert_eq!(
        seen.iter()
            .filter(|record| matches!(record, TapRecord::EventDelivered { .. }))
            .count(),
        1
    );
}

#[tokio::test]
async fn s2_duplicate_suppression() {
    let overlay = TestOverlay::new();
    let (taps, mut tap_rx) = Taps::channel(256);
    let node = Node::new(overlay.clone(), scenario_config(), taps).unwrap();
    node.start().await.unwrap();

    let (sink, mut payload_rx) = channel_sink();
    node.subscribe(b"news", sink);

    let event = Event::new(b"news", b"hello".to_vec(), 5);
    assert!(overlay.inject_event(event.clone()));
    assert_eq!(payload_rx.recv().await.unwrap(), b"hello".to_vec());

    assert!(overlay.inject_event(event));

    let mut seen = Vec::new();
    wait_for_tap(&mut tap_rx, &mut seen, |record| {
        matches!(record, TapRecord::EventDropDuplicate { .. })
    })
    .await;

    // No second write reached the sink.
    assert!(payload_rx.try_recv().is_err());
    assert_eq!(
        seen.iter()
            .filter(|record| matches!(record, TapRecord::EventDelivered { .. }))
            .count(),
        1
    );
}

#[tokio::test]
async fn s3_ttl_exhaustion() {
    let overlay = TestOverlay::new();
    let (taps, mut tap_rx) = Taps::channel(256);
    let node = Node::new(overlay.clone(), scenario_config(), taps).unwrap();
    node.start().await.unwrap();

    assert!(overlay.inject_event(Event::new(b"topicZ", b"z".to_vec(), 1)));

    let mut seen = Vec::new();
    wait_for_tap(&mut tap_rx, &mut seen, |record| {
        matches!(record, TapRecord::EventDropTtl { .. })
    })
    .await;
    assert_eq!(overlay.sent_event_count(), 0);
}

#[tokio::test]
async fn s4_well_informed_forwarding() {
    let overlay = TestOverlay::new();
    let p1 = PeerId::random();
    let p2 = PeerId::random();
    overlay.connect(p1);
    overlay.connect(p2);

    let cfg = scenario_config();
    let (taps, mut tap_rx) = Taps::channel(256);
    let node = Node::new(overlay.clone(), cfg.clone(), taps).unwrap();
    node.start().await.unwrap();

    assert!(overlay.inject_update(FilterUpdate {
        peer: p1,
        index: 0,
        filter: filter_bytes(&cfg, &[Digest::of(b"rare")]),
    }));
    let mut seen = Vec::new();
    wait_for_tap(&mut tap_rx, &mut seen, |record| {
        matches!(record, TapRecord::UpdateAccepted { .. })
    })
    .await;

    assert!(overlay.inject_event(Event::new(b"rare", b"payload".to_vec(), 3)));

    wait_for_tap(&mut tap_rx, &mut seen, |record| {
        matches!(record, TapRecord::RouteWell { target, .. } if *target == p1)
    })
    .await;
    wait_until(|| overlay.events_to(&p1).len() == 1).await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(overlay.events_to(&p1).len(), 1);
    assert!(overlay.events_to(&p2).is_empty());
}

#[tokio::test]
async fn s5_negative_route_avoidance() {
    let overlay = TestOverlay::new();
    let p1 = PeerId::random();
    let p2 = PeerId::random();
    overlay.connect(p1);
    overlay.connect(p2);

    let cfg = scenario_config();
    let (taps, mut tap_rx) = Taps::channel(256);
    let node = Node::new(overlay.clone(), cfg.clone(), taps).unwrap();
    node.start().await.unwrap();

    // P1 advertises the topic but its filter also knows P1 itself, and
    // the event already traveled through P1.
    assert!(overlay.inject_update(FilterUpdate {
        peer: p1,
        index: 0,
        filter: filter_bytes(&cfg, &[Digest::of(b"rare"), Digest::of_peer(&p1)]),
    }));
    let mut seen = Vec::new();
    wait_for_tap(&mut tap_rx, &mut seen, |record| {
        matches!(record, TapRecord::UpdateAccepted { .. })
    })
    .await;

    let mut event = Event::new(b"rare", b"payload".to_vec(), 3);
    event.publishers.push(p1);
    assert!(overlay.inject_event(event));

    wait_for_tap(&mut tap_rx, &mut seen, |record| {
        matches!(record, TapRecord::RouteRandom { .. })
    })
    .await;
    assert!(!seen
        .iter()
        .any(|record| matches!(record, TapRecord::RouteWell { .. })));
}

#[tokio::test]
async fn s6_filter_propagation() {
    let overlay = TestOverlay::new();
    let p1 = PeerId::random();
    overlay.connect(p1);

    let cfg = scenario_config();
    let node = Node::new(overlay.clone(), cfg.clone(), Taps::disabled()).unwrap();

    let (sink, _rx) = channel_sink();
    node.subscribe(b"t1", Arc::clone(&sink));
    node.subscribe(b"t2", sink);

    node.start().await.unwrap();
    wait_until(|| overlay.updates_to(&p1).len() >= 2).await;

    // One tick ships every level except the local-only top: indices
    // 0..D-2.
    let updates = overlay.updates_to(&p1);
    let mut indices: Vec<u32> = updates.iter().take(2).map(|update| update.index).collect();
    indices.sort_unstable();
    assert_eq!(indices, vec![0, 1]);

    let params = cfg.filter_params();
    let level0 = updates
        .iter()
        .find(|update| update.index == 0)
        .map(|update| Filter::from_bytes(update.filter.clone()))
        .unwrap();
    assert!(level0.contains(&params, &Digest::of(b"t1")));
    assert!(level0.contains(&params, &Digest::of(b"t2")));
    assert!(level0.contains(&params, &Digest::of_peer(&node.local_id())));

    // No neighbor data yet, so the first attenuated level is empty.
    let level1 = updates
        .iter()
        .find(|update| update.index == 1)
        .map(|update| Filter::from_bytes(update.filter.clone()))
        .unwrap();
    assert!(level1.is_zero());
}

#[tokio::test]
async fn expired_neighbor_no_longer_attracts_events() {
    let overlay = TestOverlay::new();
    let p1 = PeerId::random();
    let p2 = PeerId::random();
    overlay.connect(p1);
    overlay.connect(p2);

    let cfg = scenario_config()
        .with_freshness(200)
        .with_propagation_delay(10_000);
    let (taps, mut tap_rx) = Taps::channel(256);
    let node = Node::new(overlay.clone(), cfg.clone(), taps).unwrap();
    node.start().await.unwrap();

    assert!(overlay.inject_update(FilterUpdate {
        peer: p1,
        index: 0,
        filter: filter_bytes(&cfg, &[Digest::of(b"rare")]),
    }));
    let mut seen = Vec::new();
    wait_for_tap(&mut tap_rx, &mut seen, |record| {
        matches!(record, TapRecord::UpdateAccepted { .. })
    })
    .await;

    // Let the entry go uniformly stale and the sweeper collect it.
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert!(overlay.inject_event(Event::new(b"rare", b"payload".to_vec(), 3)));
    wait_for_tap(&mut tap_rx, &mut seen, |record| {
        matches!(record, TapRecord::RouteRandom { .. })
    })
    .await;
    assert!(!seen
        .iter()
        .any(|record| matches!(record, TapRecord::RouteWell { .. })));
}

#[tokio::test]
async fn stop_closes_inbound_channels() {
    let overlay = TestOverlay::new();
    let node = Node::new(overlay.clone(), scenario_config(), Taps::disabled()).unwrap();

    node.start().await.unwrap();
    assert!(overlay.inject_event(Event::new(b"t", b"x".to_vec(), 5)));

    node.stop().await.unwrap();
    assert!(!overlay.inject_event(Event::new(b"t", b"y".to_vec(), 5)));
}

#[tokio::test]
async fn subscribe_unsubscribe_round_trip() {
    let overlay = TestOverlay::new();
    let node = Node::new(overlay, scenario_config(), Taps::disabled()).unwrap();

    assert!(node.subscriptions().is_empty());

    let (sink, _rx) = channel_sink();
    node.subscribe(b"news", Arc::clone(&sink));
    assert_eq!(node.subscriptions(), vec![b"news".to_vec()]);
    assert_eq!(node.subscribers(b"news").len(), 1);

    node.unsubscribe(b"news", Some(&sink));
    assert!(node.subscriptions().is_empty());
    assert!(node.subscribers(b"news").is_empty());
}
