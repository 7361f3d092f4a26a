//! Search-node arena.
//!
//! Every discovered state gets a `SearchNode` holding exploration
//! metadata. Nodes reference their parent by integer id, never by
//! pointer: the parent chain mirrors the traversal and is acyclic by
//! construction, and walking it backwards reconstructs a trace.

use crate::gen::TransitionId;
use crate::state::State;

/// Index of a node in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u32);

impl NodeId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A state plus exploration metadata.
#[derive(Debug)]
pub struct SearchNode {
    pub state: State,
    /// Parent node in the traversal; None for the root.
    pub parent: Option<NodeId>,
    /// Transition that produced this node from its parent.
    pub step: Option<TransitionId>,
    /// Depth from the root.
    pub depth: usize,
    /// True while this node lies on the current depth-first path.
    pub on_stack: bool,
}

/// Append-only arena of search nodes.
#[derive(Debug, Default)]
pub struct NodeArena {
    nodes: Vec<SearchNode>,
}

impl NodeArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(
        &mut self,
        state: State,
        parent: Option<NodeId>,
        step: Option<TransitionId>,
        depth: usize,
    ) -> NodeId {
        let id = NodeId(u32::try_from(self.nodes.len()).expect("node id space exhausted"));
        self.nodes.push(SearchNode {
            state,
            parent,
            step,
            depth,
            on_stack: false,
        });
        id
    }

    #[inline]
    pub fn get(&self, id: NodeId) -> &SearchNode {
        &self.nodes[id.index()]
    }

    #[inline]
    pub fn get_mut(&mut self, id: NodeId) -> &mut SearchNode {
        &mut self.nodes[id.index()]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
    }
}
