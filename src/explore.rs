//! Symbolic state-space enumeration
//!
//! The `explore` sub-command: visit every reachable symbolic state exactly
//! once, deduplicating on state *equality* (no subsumption, no covering),
//! and keep the full graph for printing. Mostly useful to inspect a model
//! and to diff state spaces across configurations, so the output ordering
//! is the same deterministic lexical one the cover engine uses.

use std::time::{Duration, Instant};

use tracing::debug;

use crate::graph::{Graph, NodeRef};
use crate::index::NodeIndex;
use crate::options::SearchOrder;
use crate::store::Gc;
use crate::ta::StateStatus;
use crate::waiting::{Fifo, Lifo, Waiting};
use crate::zg::{CheckError, State, Step, Transition, ZoneGraph};

/// Enumeration statistics.
#[derive(Clone, Debug, Default)]
pub struct ExploreStats {
    pub visited_states: usize,
    pub visited_transitions: usize,
    pub status_counts: [usize; StateStatus::COUNT],
    pub running_time: Duration,
}

struct Explorer<'a, W> {
    zg: &'a mut ZoneGraph,
    graph: Graph,
    seen: NodeIndex,
    waiting: W,
    stats: ExploreStats,
    gc: &'a Gc,
}

impl<'a, W: Waiting<NodeRef>> Explorer<'a, W> {
    fn run(mut self) -> Result<(ExploreStats, Graph), CheckError> {
        let start = Instant::now();
        self.visit_all()?;
        self.stats.visited_states = self.seen.len();
        self.stats.running_time = start.elapsed();
        self.zg.sweep_stores(self.gc);
        debug!(
            states = self.stats.visited_states,
            transitions = self.stats.visited_transitions,
            "exploration finished"
        );
        Ok((self.stats, self.graph))
    }

    fn visit_all(&mut self) -> Result<(), CheckError> {
        for init in self.zg.initial_edges() {
            match self.zg.initial(&init)? {
                Step::Dead(status) => self.stats.status_counts[status.index()] += 1,
                Step::Ok { state, transition } => {
                    self.store(None, state, &transition);
                }
            }
        }
        while let Some(node) = self.waiting.remove_first() {
            for vedge in self.zg.outgoing_edges(&node.state) {
                self.stats.visited_transitions += 1;
                match self.zg.next(&node.state, &vedge)? {
                    Step::Dead(status) => self.stats.status_counts[status.index()] += 1,
                    Step::Ok { state, transition } => {
                        self.store(Some(&node), state, &transition);
                    }
                }
            }
        }
        Ok(())
    }

    /// Deduplicate on full state equality; new states join the waiting
    /// list, known ones only get the edge.
    fn store(&mut self, parent: Option<&NodeRef>, state: State, transition: &Transition) {
        let key = full_key(&state);
        for known in self.seen.find(key) {
            if known.state == state {
                if let Some(parent) = parent {
                    self.graph.add_edge(parent, known, transition);
                }
                self.gc.defer(state);
                return;
            }
        }
        let node = self.graph.add_node(state, key, parent.is_none());
        self.seen.insert(&node);
        if let Some(parent) = parent {
            self.graph.add_edge(parent, &node, transition);
        }
        self.waiting.insert(node);
    }
}

fn full_key(state: &State) -> u64 {
    state.discrete_fingerprint() ^ state.zone.fingerprint()
}

/// Enumerate the whole symbolic state space of `zg`.
pub fn run(
    zg: &mut ZoneGraph,
    search_order: SearchOrder,
    gc: &Gc,
) -> Result<(ExploreStats, Graph), CheckError> {
    match search_order {
        SearchOrder::Dfs => Explorer {
            zg,
            graph: Graph::new(),
            seen: NodeIndex::new(),
            waiting: Lifo::new(),
            stats: ExploreStats::default(),
            gc,
        }
        .run(),
        SearchOrder::Bfs => Explorer {
            zg,
            graph: Graph::new(),
            seen: NodeIndex::new(),
            waiting: Fifo::new(),
            stats: ExploreStats::default(),
            gc,
        }
        .run(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse_system;
    use crate::report::Reporter;
    use crate::system::System;
    use crate::zg::{ExtrapolationKind, Semantics};
    use std::sync::Arc;

    fn explore(input: &str, order: SearchOrder) -> (ExploreStats, String) {
        let decl = parse_system(input).unwrap();
        let mut reporter = Reporter::quiet();
        let sys = Arc::new(System::build(&decl, &mut reporter).unwrap());
        let mut zg = ZoneGraph::new(
            sys,
            Semantics::Elapsed,
            ExtrapolationKind::LuPlusLocal,
            true,
            &mut reporter,
        );
        let gc = Gc::start();
        let (stats, graph) = run(&mut zg, order, &gc).unwrap();
        let mut out = String::new();
        graph.raw_output(&zg, &mut out);
        (stats, out)
    }

    const TWO_STEP: &str = "\
system:s
event:a
process:P
clock:1:x
location:P:l0{initial: , invariant: x<=5}
location:P:l1{invariant: x<=5}
edge:P:l0:l1:a{provided: x<3 , do: x=0}
edge:P:l1:l0:a{provided: x<3 , do: x=0}
";

    #[test]
    fn enumerates_all_states_once() {
        let (stats, out) = explore(TWO_STEP, SearchOrder::Bfs);
        // l0 and l1 carry the same zone after the reset-and-delay loop.
        assert_eq!(stats.visited_states, 2);
        assert_eq!(out.lines().filter(|l| l.starts_with("node ")).count(), 2);
        assert!(out.lines().any(|l| l.starts_with("edge ")));
    }

    #[test]
    fn bfs_and_dfs_visit_the_same_set() {
        let (bfs, bfs_out) = explore(TWO_STEP, SearchOrder::Bfs);
        let (dfs, dfs_out) = explore(TWO_STEP, SearchOrder::Dfs);
        assert_eq!(bfs.visited_states, dfs.visited_states);
        // Lexically sorted output makes the two orders print identically.
        assert_eq!(bfs_out, dfs_out);
    }
}
