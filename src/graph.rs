//! Reachability graph
//!
//! The nodes and edges the search keeps for certificate output. A node wraps
//! a symbolic state with its fingerprint key and the colour flags of the
//! cover algorithm (covered, expanded); an edge wraps the transition's edge
//! tuple and can be redirected when its target gets covered.
//!
//! Output (DOT and a line-oriented raw listing) sorts nodes by the lexical
//! order on states and edges by their endpoints, so two runs with identical
//! configuration produce byte-identical text.

use std::cell::{Cell, RefCell};
use std::fmt::Write as _;
use std::rc::Rc;
use std::sync::Arc;

use crate::ta::VEdge;
use crate::zg::{lexical_cmp, State, Transition, ZoneGraph};

/// A search node. Reference-counted; the waiting list, the node index and
/// the graph all hold the same allocation.
pub struct Node {
    /// Creation rank, stable across runs with the same configuration.
    pub id: usize,
    pub state: State,
    /// Fingerprint of the discrete part; the node-index key.
    pub key: u64,
    covered: Cell<bool>,
    expanded: Cell<bool>,
    initial: bool,
    accepting: Cell<bool>,
    /// Position inside the node-index bucket, for O(1) removal.
    pub(crate) bucket_pos: Cell<usize>,
}

pub type NodeRef = Rc<Node>;

impl Node {
    pub fn is_covered(&self) -> bool {
        self.covered.get()
    }

    pub fn set_covered(&self) {
        self.covered.set(true);
    }

    pub fn is_expanded(&self) -> bool {
        self.expanded.get()
    }

    pub fn set_expanded(&self) {
        self.expanded.set(true);
    }

    pub fn is_initial(&self) -> bool {
        self.initial
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.get()
    }

    pub fn set_accepting(&self) {
        self.accepting.set(true);
    }
}

/// An edge of the kept graph. The target is a cell so cover steps can
/// redirect edges pointing at a covered node.
struct GraphEdge {
    src: NodeRef,
    tgt: RefCell<NodeRef>,
    vedge: Arc<VEdge>,
}

/// The graph kept during the search.
pub struct Graph {
    nodes: Vec<NodeRef>,
    edges: Vec<GraphEdge>,
}

impl Graph {
    pub fn new() -> Graph {
        Graph { nodes: Vec::new(), edges: Vec::new() }
    }

    /// With node/edge arenas pre-sized to `capacity`.
    pub fn with_capacity(capacity: usize) -> Graph {
        Graph { nodes: Vec::with_capacity(capacity), edges: Vec::with_capacity(capacity) }
    }

    /// Create and register a node.
    pub fn add_node(&mut self, state: State, key: u64, initial: bool) -> NodeRef {
        let node = Rc::new(Node {
            id: self.nodes.len(),
            state,
            key,
            covered: Cell::new(false),
            expanded: Cell::new(false),
            initial,
            accepting: Cell::new(false),
            bucket_pos: Cell::new(usize::MAX),
        });
        self.nodes.push(Rc::clone(&node));
        node
    }

    /// Add the edge `src → tgt` carrying the transition's edge tuple.
    pub fn add_edge(&mut self, src: &NodeRef, tgt: &NodeRef, transition: &Transition) {
        self.edges.push(GraphEdge {
            src: Rc::clone(src),
            tgt: RefCell::new(Rc::clone(tgt)),
            vedge: Arc::clone(&transition.vedge),
        });
    }

    /// Redirect every edge whose target is `from` to point at `to`.
    pub fn redirect_edges(&mut self, from: &NodeRef, to: &NodeRef) {
        for edge in &self.edges {
            let is_from = Rc::ptr_eq(&edge.tgt.borrow(), from);
            if is_from {
                *edge.tgt.borrow_mut() = Rc::clone(to);
            }
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Nodes never covered, the ones the output shows.
    pub fn live_nodes(&self) -> impl Iterator<Item = &NodeRef> {
        self.nodes.iter().filter(|n| !n.is_covered())
    }

    /// Drop all nodes and edges. States released here still hold their
    /// shared components; sweeping the stores afterwards frees those.
    pub fn clear(&mut self) {
        self.edges.clear();
        self.nodes.clear();
    }

    /// Live nodes in lexical order, with their dense output rank.
    fn sorted_live(&self) -> Vec<&NodeRef> {
        let mut live: Vec<&NodeRef> = self.live_nodes().collect();
        live.sort_by(|a, b| {
            lexical_cmp(&a.state, &b.state).then_with(|| a.id.cmp(&b.id))
        });
        live
    }

    /// DOT output with deterministic ordering.
    pub fn dot_output(&self, zg: &ZoneGraph, name: &str, out: &mut String) {
        let live = self.sorted_live();
        let rank = |node: &Node| {
            live.binary_search_by(|probe| {
                lexical_cmp(&probe.state, &node.state).then_with(|| probe.id.cmp(&node.id))
            })
            .ok()
        };
        let _ = writeln!(out, "digraph {name} {{");
        for (i, node) in live.iter().enumerate() {
            let mut attrs = String::new();
            for (k, v) in zg.state_attributes(&node.state) {
                let _ = write!(attrs, " {k}=\"{v}\"");
            }
            if node.is_initial() {
                let _ = write!(attrs, " initial=\"true\"");
            }
            if node.is_accepting() {
                let _ = write!(attrs, " final=\"true\"");
            }
            let _ = writeln!(out, "  n{i} [{}]", attrs.trim_start());
        }
        let mut edges: Vec<(usize, usize, String)> = Vec::new();
        for edge in &self.edges {
            let tgt = edge.tgt.borrow();
            if let (Some(s), Some(t)) = (rank(&edge.src), rank(&tgt)) {
                let vedge = Transition { vedge: Arc::clone(&edge.vedge) };
                let label = zg
                    .transition_attributes(&vedge)
                    .into_iter()
                    .map(|(k, v)| format!("{k}=\"{v}\""))
                    .collect::<Vec<_>>()
                    .join(" ");
                edges.push((s, t, label));
            }
        }
        edges.sort();
        edges.dedup();
        for (s, t, label) in edges {
            let _ = writeln!(out, "  n{s} -> n{t} [{label}]");
        }
        let _ = writeln!(out, "}}");
    }

    /// Line-oriented raw output with the same ordering as DOT.
    pub fn raw_output(&self, zg: &ZoneGraph, out: &mut String) {
        let live = self.sorted_live();
        let rank = |node: &Node| {
            live.binary_search_by(|probe| {
                lexical_cmp(&probe.state, &node.state).then_with(|| probe.id.cmp(&node.id))
            })
            .ok()
        };
        for (i, node) in live.iter().enumerate() {
            let attrs: Vec<String> = zg
                .state_attributes(&node.state)
                .into_iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect();
            let flags = match (node.is_initial(), node.is_accepting()) {
                (true, true) => " initial final",
                (true, false) => " initial",
                (false, true) => " final",
                (false, false) => "",
            };
            let _ = writeln!(out, "node {i} {}{flags}", attrs.join(" "));
        }
        let mut edges: Vec<(usize, usize, String)> = Vec::new();
        for edge in &self.edges {
            let tgt = edge.tgt.borrow();
            if let (Some(s), Some(t)) = (rank(&edge.src), rank(&tgt)) {
                edges.push((s, t, edge.vedge.display(zg.system())));
            }
        }
        edges.sort();
        edges.dedup();
        for (s, t, label) in edges {
            let _ = writeln!(out, "edge {s} {t} {label}");
        }
    }
}

impl Default for Graph {
    fn default() -> Graph {
        Graph::new()
    }
}
