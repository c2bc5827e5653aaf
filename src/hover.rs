//! Hover state and hit-test transitions

use crate::cdp::types::DOMGetNodeForLocationResult;
use crate::cdp::BackendNodeId;
use crate::error::{Error, Result};

/// The node currently under the pointer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HoverState {
    /// DOM agent node id, only present when the document was requested
    pub node_id: Option<i64>,
    pub backend_node_id: BackendNodeId,
    pub frame_id: String,
}

impl HoverState {
    /// Identifier handed to callers and hover subscribers
    pub fn element_id(&self) -> String {
        self.backend_node_id.to_string()
    }

    /// Same underlying node, ignoring the DOM agent id
    pub fn same_node(&self, other: &HoverState) -> bool {
        self.backend_node_id == other.backend_node_id && self.frame_id == other.frame_id
    }
}

/// Parse an element identifier back into a backend node id
pub fn parse_element_id(element_id: &str) -> Option<BackendNodeId> {
    element_id.trim().parse().ok().filter(|id| *id > 0)
}

/// Result of one hit-test round-trip
#[derive(Debug)]
pub enum HitTestOutcome {
    Hit(HoverState),
    /// The pointer is outside every node (e.g. off the page)
    NoNode,
    Failed(Error),
}

impl HitTestOutcome {
    /// Classify a `DOM.getNodeForLocation` reply. `fallback_frame` is used
    /// when the reply carries no frame id.
    pub fn classify(result: Result<DOMGetNodeForLocationResult>, fallback_frame: Option<&str>) -> Self {
        match result {
            Ok(hit) if hit.backend_node_id > 0 => {
                let frame_id = if hit.frame_id.is_empty() {
                    fallback_frame.unwrap_or_default().to_string()
                } else {
                    hit.frame_id
                };
                HitTestOutcome::Hit(HoverState {
                    node_id: hit.node_id.filter(|id| *id > 0),
                    backend_node_id: hit.backend_node_id,
                    frame_id,
                })
            }
            Ok(_) => HitTestOutcome::NoNode,
            Err(e) if e.is_no_node_at_location() => HitTestOutcome::NoNode,
            Err(e) => HitTestOutcome::Failed(e),
        }
    }
}

/// What a tick should do to the hover state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HoverTransition {
    /// Same node as before
    Unchanged,
    /// Hover moved to a new node
    Moved {
        previous: Option<HoverState>,
        next: HoverState,
    },
    /// Pointer left the page while something was hovered
    Cleared(HoverState),
    /// Pointer left the page with nothing hovered: stop until it moves
    StopPolling,
    /// The tick failed; leave everything as is
    Abandoned,
}

/// Decide the transition for a tick given the current hover
pub fn next_transition(current: Option<&HoverState>, outcome: &HitTestOutcome) -> HoverTransition {
    match (current, outcome) {
        (Some(current), HitTestOutcome::Hit(hit)) if current.same_node(hit) => {
            HoverTransition::Unchanged
        }
        (previous, HitTestOutcome::Hit(hit)) => HoverTransition::Moved {
            previous: previous.cloned(),
            next: hit.clone(),
        },
        (Some(current), HitTestOutcome::NoNode) => HoverTransition::Cleared(current.clone()),
        (None, HitTestOutcome::NoNode) => HoverTransition::StopPolling,
        (_, HitTestOutcome::Failed(_)) => HoverTransition::Abandoned,
    }
}
