//! Integration tests for the hash ring: lifecycle, reconciliation, and the
//! coverage/replica-distinctness properties from the design doc.

use corelib::node::Node;
use corelib::ring::Ring;
use corelib::NodeId;

fn nid(s: &str) -> NodeId {
    NodeId::from(s)
}

#[test]
fn empty_ring_has_no_owner_and_fails_verify() {
    let ring = Ring::new();
    assert!(ring.find(0).is_none());
    assert_eq!(ring.node_count(), 0);
    assert!(ring.verify().is_err());
}

#[test]
fn add_local_generates_requested_token_count() {
    let ring = Ring::new();
    let node = ring.add_local(Node::new(nid("A"), "a:1"), 4).unwrap();
    assert_eq!(node.ranges.len(), 4);
    assert_eq!(ring.segment_count(), 4);
    ring.verify().unwrap();
}

#[test]
fn second_node_shortens_the_first_nodes_ranges() {
    let ring = Ring::new();
    ring.add_local(Node::new(nid("A"), "a:1"), 8).unwrap();
    ring.add_local(Node::new(nid("B"), "b:1"), 8).unwrap();
    ring.verify().unwrap();
    assert_eq!(ring.node_count(), 2);
    assert_eq!(ring.segment_count(), 16);
}

#[test]
fn membership_is_monotone_across_additions() {
    let ring = Ring::new();
    let mut counts = vec![];
    for name in ["A", "B", "C"] {
        ring.add_local(Node::new(nid(name), format!("{name}:1")), 4)
            .unwrap();
        counts.push(ring.node_count());
    }
    assert_eq!(counts, vec![1, 2, 3]);
}

#[test]
fn find_is_stable_until_the_ring_changes() {
    let ring = Ring::new();
    for name in ["A", "B", "C"] {
        ring.add_local(Node::new(nid(name), format!("{name}:1")), 6)
            .unwrap();
    }
    let first = ring.find(0xabcdef).unwrap().0;
    let second = ring.find(0xabcdef).unwrap().0;
    assert_eq!(first, second);
}

#[test]
fn forgotten_node_reinjection_is_rejected_on_conflicting_starts() {
    let ring = Ring::new();
    ring.add_local(Node::new(nid("A"), "a:1"), 4).unwrap();
    let known = ring.node(&nid("A")).unwrap();

    // A peer claims A's identity with an empty range set -- since lengths
    // differ this is a disagreement, not a silent downgrade.
    let mut forgotten = Node::new(nid("A"), "a:1");
    forgotten.ranges = vec![];
    assert!(ring.update(&forgotten).is_err());

    // The local view is untouched.
    assert_eq!(ring.node(&nid("A")).unwrap().ranges, known.ranges);
}

proptest::proptest! {
    #[test]
    fn p1_coverage_holds_for_any_node_count(n in 1usize..12, tokens in 1usize..16) {
        let ring = Ring::new();
        for i in 0..n {
            ring.add_local(Node::new(nid(&format!("node-{i}")), format!("addr-{i}")), tokens).unwrap();
        }
        ring.verify().unwrap();
    }

    #[test]
    fn p5_replica_distinctness(n in 2usize..10, r in 1usize..9) {
        let ring = Ring::new();
        for i in 0..n {
            ring.add_local(Node::new(nid(&format!("node-{i}")), format!("addr-{i}")), 4).unwrap();
        }
        let (primary, _) = ring.find(0xdead_beef_0000_0000).unwrap();
        let (replicas, _) = ring.find_replicas(0xdead_beef_0000_0000, r, &primary);
        let expected = r.min(n - 1);
        prop_assert_eq!(replicas.len(), expected);
        prop_assert!(!replicas.contains(&primary));
        let unique: std::collections::HashSet<_> = replicas.iter().collect();
        prop_assert_eq!(unique.len(), replicas.len());
    }
}
