//! The consistent hash ring: token generation, routing, replica selection,
//! and reconciliation between partial views.
//!
//! Safe for concurrent readers; every mutation is serialised by a single
//! `parking_lot::RwLock` guarding both the segment list and the node table
//! (reads are O(log S) and never block on I/O,
//! so a single lock is sufficient).

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use rand::Rng;

use crate::error::{Error, Result};
use crate::node::{Node, NodeHandle, NodeId};
use crate::range::Range;
use crate::segment::Segment;

/// Default number of tokens a node generates for itself on `AddLocal`.
pub const DEFAULT_TOKENS: usize = 12;

const TOKEN_COLLISION_RETRIES: u32 = 10;

struct RingState {
    /// Always kept sorted by `range.start`.
    segments: Vec<Segment>,
    nodes: HashMap<NodeId, Node>,
}

impl RingState {
    fn new() -> Self {
        Self {
            segments: Vec::new(),
            nodes: HashMap::new(),
        }
    }

    /// Re-sort by start and recompute every segment's `end` from its
    /// successor's `start` (R1): the last segment wraps to `u64::MAX`.
    fn resort_and_recompute(&mut self) {
        self.segments.sort_by_key(|s| s.range.start);
        let len = self.segments.len();
        for i in 0..len {
            let next_start = if i + 1 < len {
                self.segments[i + 1].range.start
            } else {
                // wraps: last segment owns up to the top of the key space
                0
            };
            self.segments[i].range.end = if i + 1 < len {
                next_start.wrapping_sub(1)
            } else {
                u64::MAX
            };
        }
    }

    fn node_starts(&self, id: &NodeId) -> Vec<u64> {
        let mut starts: Vec<u64> = self
            .segments
            .iter()
            .filter(|s| &s.owner == id)
            .map(|s| s.range.start)
            .collect();
        starts.sort_unstable();
        starts
    }

    fn sync_node_ranges(&mut self, id: &NodeId) {
        let ranges: Vec<Range> = self
            .segments
            .iter()
            .filter(|s| &s.owner == id)
            .map(|s| s.range)
            .collect();
        if let Some(node) = self.nodes.get_mut(id) {
            node.ranges = ranges;
        }
    }
}

/// The consistent hash ring.
pub struct Ring {
    state: RwLock<RingState>,
}

impl Default for Ring {
    fn default() -> Self {
        Self::new()
    }
}

impl Ring {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(RingState::new()),
        }
    }

    /// First-time initialisation for the local node: generates `tokens`
    /// tokens for it and inserts the resulting segments.
    ///
    /// The first token ever drawn on an empty ring is forced to zero so the
    /// ring starts with no gap; every other token (including this node's
    /// remaining ones, and every later node's tokens) is drawn uniformly
    /// from a disjoint sub-range `[i*S, (i+1)*S)` of `[0, u64::MAX]` where
    /// `S = u64::MAX / tokens`, retried up to `TOKEN_COLLISION_RETRIES`
    /// times on a start collision.
    pub fn add_local(&self, mut node: Node, tokens: usize) -> Result<Node> {
        let mut state = self.state.write();
        if state.nodes.contains_key(&node.id) {
            return Err(Error::NodeExists(node.id.to_string()));
        }

        let forced_zero = state.segments.is_empty();
        let existing_starts: std::collections::HashSet<u64> =
            state.segments.iter().map(|s| s.range.start).collect();
        let mut new_starts = std::collections::HashSet::new();

        let span = if tokens == 0 {
            0
        } else {
            u64::MAX / tokens as u64
        };

        for i in 0..tokens {
            let token = if forced_zero && i == 0 {
                0
            } else {
                let lo = i as u64 * span;
                let hi = if i + 1 == tokens {
                    u64::MAX
                } else {
                    (i as u64 + 1) * span
                };
                let mut chosen = None;
                let mut rng = rand::thread_rng();
                for _ in 0..TOKEN_COLLISION_RETRIES {
                    let candidate = if hi > lo {
                        rng.gen_range(lo..hi)
                    } else {
                        lo
                    };
                    if !existing_starts.contains(&candidate) && !new_starts.contains(&candidate) {
                        chosen = Some(candidate);
                        break;
                    }
                }
                match chosen {
                    Some(t) => t,
                    None => {
                        return Err(Error::TokenCollision(
                            node.id.to_string(),
                            TOKEN_COLLISION_RETRIES,
                        ))
                    }
                }
            };
            new_starts.insert(token);
            state.segments.push(Segment::new(
                Range::new(token, token),
                node.id.clone(),
                node.client.clone(),
            ));
        }

        state.resort_and_recompute();
        state.sync_node_ranges(&node.id);
        state.nodes.insert(node.id.clone(), node.clone());
        node.ranges = state.nodes[&node.id].ranges.clone();
        Ok(node)
    }

    /// Merge a peer-supplied node description. Returns whether anything
    /// about the local view actually changed.
    pub fn update(&self, incoming: &Node) -> Result<bool> {
        let mut state = self.state.write();

        if !state.nodes.contains_key(&incoming.id) {
            // Unknown node: admit iff none of its starts collide with an
            // existing segment owned by someone else.
            for r in &incoming.ranges {
                if let Some(existing) = state
                    .segments
                    .iter()
                    .find(|s| s.range.start == r.start && s.owner != incoming.id)
                {
                    return Err(Error::InitialisationCollision {
                        start: r.start,
                        existing: existing.owner.to_string(),
                        incoming: incoming.id.to_string(),
                    });
                }
            }
            for r in &incoming.ranges {
                state
                    .segments
                    .push(Segment::new(*r, incoming.id.clone(), None));
            }
            state.nodes.insert(incoming.id.clone(), incoming.clone());
            state.resort_and_recompute();
            state.sync_node_ranges(&incoming.id);
            return Ok(true);
        }

        // Known node: starts must match exactly (R3).
        let local_starts = state.node_starts(&incoming.id);
        let mut incoming_starts: Vec<u64> = incoming.ranges.iter().map(|r| r.start).collect();
        incoming_starts.sort_unstable();

        if local_starts.len() != incoming_starts.len() {
            let position = local_starts.len().min(incoming_starts.len());
            return Err(Error::RingDisagreement {
                node: incoming.id.to_string(),
                position,
                local: local_starts.get(position).copied().unwrap_or(u64::MAX),
                incoming: incoming_starts.get(position).copied().unwrap_or(u64::MAX),
            });
        }
        for (position, (local, incoming_start)) in local_starts
            .iter()
            .zip(incoming_starts.iter())
            .enumerate()
        {
            if local != incoming_start {
                return Err(Error::RingDisagreement {
                    node: incoming.id.to_string(),
                    position,
                    local: *local,
                    incoming: *incoming_start,
                });
            }
        }

        let mut changed = false;
        {
            let existing = state.nodes.get(&incoming.id).unwrap();
            if existing.address != incoming.address || existing.online != incoming.online {
                changed = true;
            }
        }
        if let Some(existing) = state.nodes.get_mut(&incoming.id) {
            existing.address = incoming.address.clone();
            existing.online = incoming.online;
        }
        // Ends are always re-derived from the globally agreed set of starts
        // (R1), so we don't blindly trust a peer's possibly-stale `end`
        // values; `changed` already reflects every field that can actually
        // vary between two honest views of the same node.
        state.resort_and_recompute();
        state.sync_node_ranges(&incoming.id);

        Ok(changed)
    }

    /// Flip a node's liveness. `client` is installed when transitioning
    /// online, ignored (and nulled) when transitioning offline.
    pub fn update_node(
        &self,
        name: &NodeId,
        online: bool,
        client: Option<Arc<dyn NodeHandle>>,
    ) -> Result<(Node, bool)> {
        let mut state = self.state.write();
        let changed = {
            let node = state
                .nodes
                .get_mut(name)
                .ok_or_else(|| Error::UnknownNode(name.to_string()))?;
            let changed = node.online != online;
            node.online = online;
            node.client = if online { client.clone() } else { None };
            changed
        };
        for seg in state.segments.iter_mut().filter(|s| &s.owner == name) {
            seg.client = if online { client.clone() } else { None };
        }
        let node = state.nodes.get(name).unwrap().clone();
        Ok((node, changed))
    }

    pub fn node(&self, name: &NodeId) -> Option<Node> {
        self.state.read().nodes.get(name).cloned()
    }

    /// The control surface's `Nodes()` operation (§6): every known node
    /// name mapped to its current client handle, null for nodes that are
    /// known-offline.
    pub fn nodes(&self) -> HashMap<NodeId, Option<Arc<dyn NodeHandle>>> {
        self.state
            .read()
            .nodes
            .iter()
            .map(|(id, node)| (id.clone(), node.client.clone()))
            .collect()
    }

    pub fn node_count(&self) -> usize {
        self.state.read().nodes.len()
    }

    pub fn segment_count(&self) -> usize {
        self.state.read().segments.len()
    }

    /// Locate the segment whose range contains `hash`: binary search on
    /// `start`, O(log S).
    pub fn find(&self, hash: u64) -> Option<(NodeId, Option<Arc<dyn NodeHandle>>)> {
        let state = self.state.read();
        find_index(&state.segments, hash)
            .map(|i| (state.segments[i].owner.clone(), state.segments[i].client.clone()))
    }

    /// Starting at `Find(hash)`, walk forward around the ring collecting up
    /// to `n` distinct owners, skipping `exclude` and any owner already
    /// selected. Wraps past the last segment back to the first.
    pub fn find_replicas(
        &self,
        hash: u64,
        n: usize,
        exclude: &NodeId,
    ) -> (Vec<NodeId>, Vec<Option<Arc<dyn NodeHandle>>>) {
        let state = self.state.read();
        let mut names = Vec::with_capacity(n);
        let mut clients = Vec::with_capacity(n);
        if state.segments.is_empty() {
            return (names, clients);
        }
        let start = match find_index(&state.segments, hash) {
            Some(i) => i,
            None => return (names, clients),
        };
        let mut seen: std::collections::HashSet<&NodeId> = std::collections::HashSet::new();
        seen.insert(exclude);
        let len = state.segments.len();
        for step in 1..=len {
            if names.len() >= n {
                break;
            }
            let idx = (start + step) % len;
            let seg = &state.segments[idx];
            if seen.contains(&seg.owner) {
                continue;
            }
            seen.insert(&seg.owner);
            names.push(seg.owner.clone());
            clients.push(seg.client.clone());
        }
        (names, clients)
    }

    /// Deterministic snapshot: nodes sorted by name, each with its ranges
    /// sorted by start.
    pub fn export(&self) -> Vec<Node> {
        let state = self.state.read();
        let mut nodes: Vec<Node> = state.nodes.values().cloned().collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        for node in &mut nodes {
            node.ranges.sort_by_key(|r| r.start);
        }
        nodes
    }

    /// Like `export`, but each node's `ranges` is extended with the ranges
    /// of the next `r - 1` distinct owners walked forward from each of its
    /// own primary ranges -- i.e. every range a node *holds a copy of*,
    /// primary or replica, deduplicated.
    pub fn export_replicas(&self, r: usize) -> Vec<Node> {
        let state = self.state.read();
        if state.segments.is_empty() || r == 0 {
            return self.export();
        }
        let len = state.segments.len();
        let mut held: HashMap<NodeId, Vec<Range>> = HashMap::new();

        for (idx, primary_seg) in state.segments.iter().enumerate() {
            let mut seen: std::collections::HashSet<&NodeId> = std::collections::HashSet::new();
            seen.insert(&primary_seg.owner);
            held
                .entry(primary_seg.owner.clone())
                .or_default()
                .push(primary_seg.range);

            let mut collected = 0;
            for step in 1..len {
                if collected >= r.saturating_sub(1) {
                    break;
                }
                let seg = &state.segments[(idx + step) % len];
                if seen.contains(&seg.owner) {
                    continue;
                }
                seen.insert(&seg.owner);
                held
                    .entry(seg.owner.clone())
                    .or_default()
                    .push(primary_seg.range);
                collected += 1;
            }
        }

        let mut nodes: Vec<Node> = state
            .nodes
            .iter()
            .map(|(id, node)| {
                let mut node = node.clone();
                let mut ranges = held.get(id).cloned().unwrap_or_default();
                ranges.sort_by_key(|rg| rg.start);
                ranges.dedup();
                node.ranges = ranges;
                node
            })
            .collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        nodes
    }

    /// Static integrity check: the ring must cover `[0, u64::MAX]` without
    /// gap or overlap. Reports every violation found, not just the first.
    pub fn verify(&self) -> Result<()> {
        let state = self.state.read();
        if state.segments.is_empty() {
            return Err(Error::EmptyRing);
        }
        let mut problems = Vec::new();
        if state.segments[0].range.start != 0 {
            problems.push("first segment does not start at zero".to_string());
        }
        if state.segments.last().unwrap().range.end != u64::MAX {
            problems.push("last segment does not end at u64::MAX".to_string());
        }
        for pair in state.segments.windows(2) {
            let (prev, next) = (&pair[0], &pair[1]);
            let expected = prev.range.end.wrapping_add(1);
            if next.range.start != expected {
                problems.push(format!(
                    "segment [{}, {}] (owner {}) is not immediately followed by segment starting \
                     at {}, found start {} (owner {})",
                    prev.range.start, prev.range.end, prev.owner, expected, next.range.start, next.owner
                ));
            }
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::Integrity(problems.join("; ")))
        }
    }

    /// Segment count and owner names, for startup/debug logging. Not part
    /// of the routing contract -- callers that need routing data use
    /// `find`/`find_replicas`/`export`.
    pub fn segments_snapshot(&self) -> Vec<(u64, u64, String)> {
        let state = self.state.read();
        state
            .segments
            .iter()
            .map(|s| (s.range.start, s.range.end, s.owner.to_string()))
            .collect()
    }
}

/// Binary search for the segment owning `hash`: the last segment whose
/// `start <= hash`.
fn find_index(segments: &[Segment], hash: u64) -> Option<usize> {
    if segments.is_empty() {
        return None;
    }
    match segments.binary_search_by_key(&hash, |s| s.range.start) {
        Ok(i) => Some(i),
        Err(0) => None,
        Err(i) => Some(i - 1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nid(s: &str) -> NodeId {
        NodeId::from(s)
    }

    #[test]
    fn single_node_bootstrap() {
        let ring = Ring::new();
        ring.add_local(Node::new(nid("A"), "a:1"), 1).unwrap();
        assert_eq!(ring.segment_count(), 1);
        ring.verify().unwrap();
        let (owner, _) = ring.find(0x1234).unwrap();
        assert_eq!(owner, nid("A"));
    }

    #[test]
    fn two_node_split_four_tokens_each() {
        let ring = Ring::new();
        let mut a = Node::new(nid("A"), "a:1");
        a.ranges = vec![
            Range::new(0, 0),
            Range::new(4611686018427387905, 4611686018427387905),
            Range::new(9223372036854775809, 9223372036854775809),
            Range::new(13835058055282163713, 13835058055282163713),
        ];
        ring.update(&a).unwrap();
        let mut b = Node::new(nid("B"), "b:1");
        b.ranges = vec![
            Range::new(2305843009213693952, 2305843009213693952),
            Range::new(6917529027641081856, 6917529027641081856),
            Range::new(11529215046068469761, 11529215046068469761),
            Range::new(16140901064495857665, 16140901064495857665),
        ];
        ring.update(&b).unwrap();

        ring.verify().unwrap();
        assert_eq!(ring.find(0).unwrap().0, nid("A"));
        assert_eq!(ring.find(6917529027841081856).unwrap().0, nid("B"));
        assert_eq!(ring.find(u64::MAX).unwrap().0, nid("B"));
        let (replicas, _) = ring.find_replicas(0, 1, &nid("A"));
        assert_eq!(replicas, vec![nid("B")]);
    }

    #[test]
    fn hash_mismatch_is_rejected() {
        let ring = Ring::new();
        let mut a = Node::new(nid("A"), "a:1");
        a.ranges = vec![Range::new(0, 0), Range::new(1000, 1000)];
        ring.update(&a).unwrap();

        let mut a2 = Node::new(nid("A"), "a:1");
        a2.ranges = vec![Range::new(1, 1), Range::new(1000, 1000)];
        let err = ring.update(&a2).unwrap_err();
        match err {
            Error::RingDisagreement { position, .. } => assert_eq!(position, 0),
            other => panic!("expected RingDisagreement, got {other:?}"),
        }
        let exported = ring.export();
        assert_eq!(exported[0].ranges[0].start, 0);
    }

    #[test]
    fn verify_detects_hole() {
        let ring = Ring::new();
        let mut a = Node::new(nid("A"), "a:1");
        a.ranges = vec![Range::new(2, u64::MAX)];
        ring.update(&a).unwrap();
        let err = ring.verify().unwrap_err();
        assert!(matches!(err, Error::Integrity(msg) if msg.contains("does not start at zero")));
    }

    #[test]
    fn segments_snapshot_reports_every_segment_with_its_owner() {
        let ring = Ring::new();
        ring.add_local(Node::new(nid("A"), "a:1"), 3).unwrap();
        let snapshot = ring.segments_snapshot();
        assert_eq!(snapshot.len(), 3);
        assert!(snapshot.iter().all(|(_, _, owner)| owner == "A"));
    }

    #[test]
    fn nodes_maps_every_name_to_its_current_client_handle() {
        let ring = Ring::new();
        ring.add_local(Node::new(nid("A"), "a:1"), 2).unwrap();
        ring.add_local(Node::new(nid("B"), "b:1"), 2).unwrap();
        ring.update_node(&nid("B"), false, None).unwrap();

        let nodes = ring.nodes();
        assert_eq!(nodes.len(), 2);
        assert!(nodes.contains_key(&nid("A")));
        assert!(nodes[&nid("B")].is_none());
    }

    #[test]
    fn replica_fan_out_distinct_and_excludes_primary() {
        let ring = Ring::new();
        for name in ["A", "B", "C", "D", "E"] {
            ring.add_local(Node::new(nid(name), format!("{name}:1")), 4)
                .unwrap();
        }
        ring.verify().unwrap();
        let (primary, _) = ring.find(0xdead_beef).unwrap();
        let (replicas, _) = ring.find_replicas(0xdead_beef, 2, &primary);
        assert_eq!(replicas.len(), 2);
        assert!(!replicas.contains(&primary));
        let unique: std::collections::HashSet<_> = replicas.iter().collect();
        assert_eq!(unique.len(), replicas.len());
    }

    #[test]
    fn replica_count_capped_when_fewer_nodes_than_requested() {
        let ring = Ring::new();
        ring.add_local(Node::new(nid("A"), "a:1"), 4).unwrap();
        ring.add_local(Node::new(nid("B"), "b:1"), 4).unwrap();
        let (primary, _) = ring.find(0).unwrap();
        let (replicas, _) = ring.find_replicas(0, 5, &primary);
        assert_eq!(replicas.len(), 1);
    }

    #[test]
    fn idempotent_rename_not_allowed_add_local_twice() {
        let ring = Ring::new();
        ring.add_local(Node::new(nid("A"), "a:1"), 4).unwrap();
        let err = ring.add_local(Node::new(nid("A"), "a:1"), 4).unwrap_err();
        assert!(matches!(err, Error::NodeExists(_)));
    }

    #[test]
    fn update_node_flips_liveness_and_nulls_handle() {
        let ring = Ring::new();
        ring.add_local(Node::new(nid("A"), "a:1"), 2).unwrap();
        let (node, changed) = ring.update_node(&nid("A"), false, None).unwrap();
        assert!(changed);
        assert!(!node.online);
        let (_, changed_again) = ring.update_node(&nid("A"), false, None).unwrap();
        assert!(!changed_again);
    }

    #[test]
    fn export_replicas_includes_copies() {
        let ring = Ring::new();
        for name in ["A", "B", "C"] {
            ring.add_local(Node::new(nid(name), format!("{name}:1")), 2)
                .unwrap();
        }
        let exported = ring.export_replicas(2);
        for node in &exported {
            assert!(!node.ranges.is_empty());
        }
    }
}
