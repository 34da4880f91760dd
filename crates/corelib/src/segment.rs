//! Internal segment pairing: a range, the node that owns it, and an opaque
//! handle to that node.

use std::sync::Arc;

use crate::node::{NodeHandle, NodeId};
use crate::range::Range;

/// A `Range` paired with its owner. Segments never carry a back-pointer to
/// the owning `Node` itself -- only its id and an opaque client handle --
/// which keeps `Segment` cheap to sort and clone while lookups resolve the
/// full `Node` record through the ring's node table.
#[derive(Clone, Debug)]
pub struct Segment {
    pub range: Range,
    pub owner: NodeId,
    pub client: Option<Arc<dyn NodeHandle>>,
}

impl Segment {
    pub fn new(range: Range, owner: NodeId, client: Option<Arc<dyn NodeHandle>>) -> Self {
        Self {
            range,
            owner,
            client,
        }
    }
}
