use crate::history::EventHistory;

#[test]
fn test_sizing_is_sane() {
    let history = EventHistory::new(1000, 0.01);
    let params = history.params();

    assert_eq!(params.m % 8, 0);
    assert!(params.k >= 1);
    // ~9.6 bits per entry at 1% false positives.
    assert!(params.m >= 9 * 1000);
}

#[test]
fn test_witness_remembers() {
    let mut history = EventHistory::new(128, 0.001);

    assert!(!history.witness(b"event-1"));
    assert!(history.witness(b"event-1"));
    assert!(!history.witness(b"event-2"));
}

#[test]
fn test_rotation_keeps_recent_window() {
    let mut history = EventHistory::new(4, 0.001);

    // Fill the active filter exactly to capacity; the fourth insert
    // rotates it into the previous slot.
    for key in [b"a", b"b", b"c", b"d"] {
        assert!(!history.witness(key));
    }

    // Still remembered through the previous filter.
    assert!(history.witness(b"a"));
    assert!(history.witness(b"d"));

    // A second full window pushes the first one out entirely.
    for key in [b"e", b"f", b"g", b"h"] {
        assert!(!history.witness(key));
    }
    assert!(history.witness(b"e"));
    assert!(!history.witness(b"a"));
}
