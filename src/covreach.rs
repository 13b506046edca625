//! Covering reachability
//!
//! The search loop over the zone graph: a waiting container (LIFO or FIFO,
//! wrapped in the covered-filter), the fingerprint-keyed node index, the
//! configured cover relation and the accepting predicate. A new state is
//! discarded when a stored node with the same discrete part subsumes its
//! zone; stored nodes subsumed by the new state are covered, removed from
//! the index and skipped by the waiting list when they surface.
//!
//! Termination: the discrete state space is finite, extrapolated zones over
//! a fixed discrete state form a finite lattice, and the cover test keeps at
//! most one representative per equivalence class in the index.

use std::time::{Duration, Instant};

use bitvec::vec::BitVec;
use tracing::debug;

use crate::clockbounds::Bound;
use crate::graph::{Graph, NodeRef};
use crate::index::NodeIndex;
use crate::options::{CoverSpec, SearchOrder};
use crate::report::Reporter;
use crate::store::Gc;
use crate::ta::StateStatus;
use crate::waiting::{Fifo, FilterWaiting, Lifo, Waiting};
use crate::zg::{CheckError, State, Step, Transition, ZoneGraph};

/// Which stored nodes may subsume a new state.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CoveringPolicy {
    /// Both directions against every stored node; smallest graph.
    Full,
    /// New states are only discarded against never-expanded nodes, so a
    /// certificate path can be chased through live pointers.
    Leaf,
}

/// Search statistics, printed per the output contract.
#[derive(Clone, Debug, Default)]
pub struct Stats {
    pub reachable: bool,
    pub stored_nodes: usize,
    pub visited_transitions: usize,
    pub covered_states: usize,
    pub status_counts: [usize; StateStatus::COUNT],
    pub running_time: Duration,
}

impl Stats {
    fn count(&mut self, status: StateStatus) {
        self.status_counts[status.index()] += 1;
    }
}

/// The accepting predicate: a set of labels that must all be present.
/// Requesting an undeclared label makes the predicate unsatisfiable.
struct Accepting {
    labels: BitVec,
    satisfiable: bool,
}

impl Accepting {
    fn new(zg: &ZoneGraph, labels_csv: &str, reporter: &mut Reporter) -> Accepting {
        let (labels, unknown) = zg.system().resolve_labels(labels_csv);
        for name in &unknown {
            reporter.warning(format_args!("accepting label `{name}` is not declared"));
        }
        Accepting { labels, satisfiable: unknown.is_empty() }
    }

    fn accepts(&self, zg: &ZoneGraph, state: &State) -> bool {
        if !self.satisfiable {
            return false;
        }
        let node_labels = zg.labels(state);
        self.labels.iter_ones().all(|i| node_labels[i])
    }
}

/// The cover relation: discrete equality is checked by the caller, this
/// decides the zone part.
struct CoverPredicate {
    spec: CoverSpec,
    row_l: Vec<Bound>,
    row_u: Vec<Bound>,
}

impl CoverPredicate {
    fn new(zg: &ZoneGraph, spec: CoverSpec, reporter: &mut Reporter) -> CoverPredicate {
        let spec = if spec != CoverSpec::Inclusion && zg.clock_bounds().is_none() {
            reporter.warning("cover relation needs clock bounds, falling back to inclusion");
            CoverSpec::Inclusion
        } else {
            spec
        };
        let dim = zg.dim();
        CoverPredicate { spec, row_l: vec![0; dim], row_u: vec![0; dim] }
    }

    /// `s1 ≼ s2` on zones, both states having the same discrete part.
    fn zone_le(&mut self, zg: &ZoneGraph, s1: &State, s2: &State) -> bool {
        match self.spec {
            CoverSpec::Inclusion => s1.zone.is_le(&s2.zone),
            CoverSpec::AluGlobal => {
                let b = zg.clock_bounds().expect("bounds checked at construction");
                s1.zone.is_alu_le(&s2.zone, b.global_l(), b.global_u())
            }
            CoverSpec::AluLocal => {
                let b = zg.clock_bounds().expect("bounds checked at construction");
                b.vloc_l(&s1.vloc, &mut self.row_l);
                b.vloc_u(&s1.vloc, &mut self.row_u);
                s1.zone.is_alu_le(&s2.zone, &self.row_l, &self.row_u)
            }
            CoverSpec::AmGlobal => {
                let b = zg.clock_bounds().expect("bounds checked at construction");
                s1.zone.is_am_le(&s2.zone, b.global_m())
            }
            CoverSpec::AmLocal => {
                let b = zg.clock_bounds().expect("bounds checked at construction");
                b.vloc_m(&s1.vloc, &mut self.row_l);
                s1.zone.is_am_le(&s2.zone, &self.row_l)
            }
        }
    }
}

/// Outcome of a covering reachability run.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Reachable,
    NotReachable,
}

/// Everything `run` needs beyond the zone graph.
pub struct CovReachConfig {
    pub labels: String,
    pub search_order: SearchOrder,
    pub cover: CoverSpec,
    pub policy: CoveringPolicy,
    /// Capacity hint for the node/edge arenas.
    pub block_size: usize,
    /// Capacity hint for the node index.
    pub table_size: usize,
}

impl Default for CovReachConfig {
    fn default() -> CovReachConfig {
        CovReachConfig {
            labels: String::new(),
            search_order: SearchOrder::Bfs,
            cover: CoverSpec::Inclusion,
            policy: CoveringPolicy::Full,
            block_size: 10_000,
            table_size: 65_536,
        }
    }
}

struct Engine<'a, W> {
    zg: &'a mut ZoneGraph,
    graph: Graph,
    index: NodeIndex,
    waiting: W,
    accepting: Accepting,
    cover: CoverPredicate,
    policy: CoveringPolicy,
    stats: Stats,
    gc: &'a Gc,
}

enum Enqueued {
    Accepting,
    Stored,
    Discarded,
}

impl<'a, W: Waiting<NodeRef>> Engine<'a, W> {
    fn run(mut self) -> Result<(Outcome, Stats, Graph), CheckError> {
        let start = Instant::now();
        let outcome = self.search()?;
        self.stats.running_time = start.elapsed();
        self.stats.reachable = outcome == Outcome::Reachable;
        self.stats.stored_nodes = self.index.len();
        self.zg.sweep_stores(self.gc);
        debug!(
            stored = self.stats.stored_nodes,
            visited = self.stats.visited_transitions,
            covered = self.stats.covered_states,
            "covering reachability finished"
        );
        Ok((outcome, self.stats, self.graph))
    }

    fn search(&mut self) -> Result<Outcome, CheckError> {
        for init in self.zg.initial_edges() {
            match self.zg.initial(&init)? {
                Step::Dead(status) => self.stats.count(status),
                Step::Ok { state, transition } => {
                    match self.enqueue_if_uncovered(None, state, &transition)? {
                        Enqueued::Accepting => return Ok(Outcome::Reachable),
                        Enqueued::Stored | Enqueued::Discarded => {}
                    }
                }
            }
        }
        while let Some(node) = self.waiting.remove_first() {
            if node.is_covered() {
                continue;
            }
            if self.accepting.accepts(self.zg, &node.state) && self.zg.is_valid_final(&node.state)
            {
                node.set_accepting();
                return Ok(Outcome::Reachable);
            }
            node.set_expanded();
            for vedge in self.zg.outgoing_edges(&node.state) {
                self.stats.visited_transitions += 1;
                match self.zg.next(&node.state, &vedge)? {
                    Step::Dead(status) => self.stats.count(status),
                    Step::Ok { state, transition } => {
                        match self.enqueue_if_uncovered(Some(&node), state, &transition)? {
                            Enqueued::Accepting => return Ok(Outcome::Reachable),
                            Enqueued::Stored | Enqueued::Discarded => {}
                        }
                    }
                }
            }
        }
        Ok(Outcome::NotReachable)
    }

    /// The covering discipline of the engine. Scans the index bucket of the
    /// state's fingerprint: a subsuming stored node absorbs the new state
    /// (only the edge is added); otherwise stored nodes subsumed by the new
    /// state are covered and removed, then the state is stored and queued.
    fn enqueue_if_uncovered(
        &mut self,
        parent: Option<&NodeRef>,
        state: State,
        transition: &Transition,
    ) -> Result<Enqueued, CheckError> {
        let key = state.discrete_fingerprint();

        for stored in self.index.find(key) {
            if !stored.state.same_discrete(&state) {
                continue;
            }
            let leaf_ok = self.policy == CoveringPolicy::Full || !stored.is_expanded();
            if leaf_ok && self.cover.zone_le(self.zg, &state, &stored.state) {
                if let Some(parent) = parent {
                    self.graph.add_edge(parent, stored, transition);
                }
                self.stats.covered_states += 1;
                self.gc.defer(state);
                return Ok(Enqueued::Discarded);
            }
        }

        let node = self.graph.add_node(state, key, parent.is_none());

        let mut covered: Vec<NodeRef> = Vec::new();
        for stored in self.index.find(key) {
            if stored.state.same_discrete(&node.state)
                && self.cover.zone_le(self.zg, &stored.state, &node.state)
            {
                covered.push(stored.clone());
            }
        }
        for old in covered {
            old.set_covered();
            self.index.remove(&old);
            self.graph.redirect_edges(&old, &node);
            self.stats.covered_states += 1;
            self.gc.defer(old.state.clone());
        }

        if let Some(parent) = parent {
            self.graph.add_edge(parent, &node, transition);
        }
        self.index.insert(&node);

        if self.accepting.accepts(self.zg, &node.state) && self.zg.is_valid_final(&node.state) {
            node.set_accepting();
            return Ok(Enqueued::Accepting);
        }
        self.waiting.insert(node);
        Ok(Enqueued::Stored)
    }
}

/// Run covering reachability over `zg`.
pub fn run(
    zg: &mut ZoneGraph,
    config: &CovReachConfig,
    gc: &Gc,
    reporter: &mut Reporter,
) -> Result<(Outcome, Stats, Graph), CheckError> {
    let accepting = Accepting::new(zg, &config.labels, reporter);
    let cover = CoverPredicate::new(zg, config.cover, reporter);
    let filter = |n: &NodeRef| !n.is_covered();
    match config.search_order {
        SearchOrder::Dfs => Engine {
            zg,
            graph: Graph::with_capacity(config.block_size),
            index: NodeIndex::with_capacity(config.table_size),
            waiting: FilterWaiting::new(Lifo::new(), filter),
            accepting,
            cover,
            policy: config.policy,
            stats: Stats::default(),
            gc,
        }
        .run(),
        SearchOrder::Bfs => Engine {
            zg,
            graph: Graph::with_capacity(config.block_size),
            index: NodeIndex::with_capacity(config.table_size),
            waiting: FilterWaiting::new(Fifo::new(), filter),
            accepting,
            cover,
            policy: config.policy,
            stats: Stats::default(),
            gc,
        }
        .run(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::ModelSpec;
    use crate::parse::parse_system;
    use crate::system::System;
    use std::sync::Arc;

    fn covreach(
        input: &str,
        model: &str,
        cover: CoverSpec,
        labels: &str,
        order: SearchOrder,
    ) -> (Outcome, Stats) {
        let decl = parse_system(input).unwrap();
        let mut reporter = Reporter::quiet();
        let sys = Arc::new(System::build(&decl, &mut reporter).unwrap());
        let spec: ModelSpec = model.parse().unwrap();
        let mut zg =
            ZoneGraph::new(sys, spec.semantics, spec.extrapolation, true, &mut reporter);
        let gc = Gc::start();
        let config = CovReachConfig {
            labels: labels.to_string(),
            search_order: order,
            cover,
            ..CovReachConfig::default()
        };
        let (outcome, stats, graph) = run(&mut zg, &config, &gc, &mut reporter).unwrap();
        drop(graph);
        (outcome, stats)
    }

    const GUARDED_ONE_SHOT: &str = "\
system:oneshot
event:a
process:P
clock:1:x
location:P:l0{initial: , invariant: x<=5}
location:P:l1{labels: at_l1}
edge:P:l0:l1:a{provided: x<3}
";

    #[test]
    fn unknown_label_is_not_reachable() {
        let input = "\
system:s
process:P
clock:1:x
location:P:l0{initial:}
";
        let (outcome, stats) = covreach(
            input,
            "zg:elapsed:extraLU+l",
            CoverSpec::Inclusion,
            "foo",
            SearchOrder::Bfs,
        );
        assert_eq!(outcome, Outcome::NotReachable);
        assert_eq!(stats.stored_nodes, 1);
    }

    #[test]
    fn guarded_one_shot_reaches() {
        for order in [SearchOrder::Bfs, SearchOrder::Dfs] {
            let (outcome, stats) = covreach(
                GUARDED_ONE_SHOT,
                "zg:elapsed:extraLU+l",
                CoverSpec::AluLocal,
                "at_l1",
                order,
            );
            assert_eq!(outcome, Outcome::Reachable);
            assert_eq!(stats.stored_nodes, 2);
        }
    }

    #[test]
    fn empty_label_set_accepts_initial() {
        let (outcome, stats) = covreach(
            GUARDED_ONE_SHOT,
            "zg:elapsed:extraLU+l",
            CoverSpec::Inclusion,
            "",
            SearchOrder::Bfs,
        );
        assert_eq!(outcome, Outcome::Reachable);
        assert_eq!(stats.visited_transitions, 0);
    }

    #[test]
    fn covering_collapses_revisits() {
        // The loop resets x, so the second visit of l0 is subsumed by the
        // first; the search terminates with the loop covered.
        let input = "\
system:loop
event:a
process:P
clock:1:x
location:P:l0{initial: , invariant: x<=2}
location:P:l1{invariant: x<=2}
edge:P:l0:l1:a{provided: x>=1 , do: x=0}
edge:P:l1:l0:a{provided: x>=1 , do: x=0}
";
        let (outcome, stats) = covreach(
            input,
            "zg:elapsed:extraLU+l",
            CoverSpec::AluLocal,
            "nonexistent_label_xyz",
            SearchOrder::Bfs,
        );
        assert_eq!(outcome, Outcome::NotReachable);
        assert!(stats.stored_nodes <= 2, "loop must be covered, got {stats:?}");
    }

    #[test]
    fn dead_statuses_are_counted() {
        let input = "\
system:s
event:a
process:P
int:1:0:1:0:i
clock:1:x
location:P:l0{initial:}
location:P:l1
edge:P:l0:l1:a{provided: i==1}
";
        let (outcome, stats) = covreach(
            input,
            "zg:standard:extraMl",
            CoverSpec::Inclusion,
            "anything",
            SearchOrder::Dfs,
        );
        assert_eq!(outcome, Outcome::NotReachable);
        assert_eq!(stats.status_counts[StateStatus::GuardViolated.index()], 1);
        assert_eq!(stats.visited_transitions, 1);
    }
}
