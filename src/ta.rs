//! Discrete semantics of the timed-automata network
//!
//! Everything about a transition except the zone: tuples of locations, the
//! integer valuation, synchronization instantiation, the committed/urgent
//! delay rules, and label sets. The zone-graph layer drives this module and
//! then applies the returned clock constraints and resets to the DBM.
//!
//! A candidate transition that produces no successor reports *why* through
//! [`StateStatus`]; that is bookkeeping for the search statistics, not an
//! error.

use bitvec::vec::BitVec;

use crate::expr::{
    eval_clock_atoms, eval_int, exec_stmt, ConcreteConstraint, ConcreteReset, EvalEnv,
};
use crate::system::{EdgeId, LocId, ProcessId, SyncStrength, System};

/// Why a candidate transition yields no successor. Counted by the search,
/// never propagated as an error.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum StateStatus {
    SrcInvariantViolated,
    GuardViolated,
    TgtInvariantViolated,
    EmptySync,
    ClocksResetFailed,
    IntvarsOutOfRange,
}

impl StateStatus {
    pub const COUNT: usize = 6;

    #[inline]
    pub fn index(self) -> usize {
        match self {
            StateStatus::SrcInvariantViolated => 0,
            StateStatus::GuardViolated => 1,
            StateStatus::TgtInvariantViolated => 2,
            StateStatus::EmptySync => 3,
            StateStatus::ClocksResetFailed => 4,
            StateStatus::IntvarsOutOfRange => 5,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            StateStatus::SrcInvariantViolated => "SRC_INVARIANT_VIOLATED",
            StateStatus::GuardViolated => "GUARD_VIOLATED",
            StateStatus::TgtInvariantViolated => "TGT_INVARIANT_VIOLATED",
            StateStatus::EmptySync => "EMPTY_SYNC",
            StateStatus::ClocksResetFailed => "CLOCKS_RESET_FAILED",
            StateStatus::IntvarsOutOfRange => "INTVARS_OUT_OF_RANGE",
        }
    }

    pub fn all() -> [StateStatus; StateStatus::COUNT] {
        [
            StateStatus::SrcInvariantViolated,
            StateStatus::GuardViolated,
            StateStatus::TgtInvariantViolated,
            StateStatus::EmptySync,
            StateStatus::ClocksResetFailed,
            StateStatus::IntvarsOutOfRange,
        ]
    }
}

/// A tuple of edges firing together: one entry per process, `None` where the
/// process stays put.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct VEdge {
    edges: Vec<Option<EdgeId>>,
}

impl VEdge {
    /// The empty tuple attached to initial states: no process moves.
    pub fn initial(process_count: usize) -> VEdge {
        VEdge { edges: vec![None; process_count] }
    }

    fn singleton(process_count: usize, pid: ProcessId, edge: EdgeId) -> VEdge {
        let mut edges = vec![None; process_count];
        edges[pid.as_usize()] = Some(edge);
        VEdge { edges }
    }

    /// Participating `(process, edge)` pairs in process order.
    pub fn iter(&self) -> impl Iterator<Item = (ProcessId, EdgeId)> + '_ {
        self.edges
            .iter()
            .enumerate()
            .filter_map(|(p, e)| e.map(|eid| (ProcessId(p), eid)))
    }

    pub fn is_empty(&self) -> bool {
        self.edges.iter().all(Option::is_none)
    }

    /// Render as `<P@a,Q@a>` over the participating processes.
    pub fn display(&self, sys: &System) -> String {
        let parts: Vec<String> = self
            .iter()
            .map(|(p, e)| format!("{}@{}", sys.process_name(p), sys.event_name(sys.edge(e).event)))
            .collect();
        format!("<{}>", parts.join(","))
    }
}

/// Initial location tuples: the cross product of the per-process initial
/// locations, in declaration order.
pub fn initial_vlocs(sys: &System) -> Vec<Vec<LocId>> {
    let n = sys.process_count();
    let mut out = Vec::new();
    let mut current = Vec::with_capacity(n);
    fn rec(sys: &System, p: usize, current: &mut Vec<LocId>, out: &mut Vec<Vec<LocId>>) {
        if p == sys.process_count() {
            out.push(current.clone());
            return;
        }
        for &l in sys.initial_locations(ProcessId(p)) {
            current.push(l);
            rec(sys, p + 1, current, out);
            current.pop();
        }
    }
    rec(sys, 0, &mut current, &mut out);
    out
}

/// Delay is allowed iff no location of the tuple is committed or urgent.
pub fn delay_allowed(sys: &System, vloc: &[LocId]) -> bool {
    vloc.iter().all(|&l| {
        let loc = sys.location(l);
        !loc.committed && !loc.urgent
    })
}

/// Union of the labels of the tuple's locations.
pub fn labels(sys: &System, vloc: &[LocId]) -> BitVec {
    let mut set = BitVec::repeat(false, sys.label_count());
    for &l in vloc {
        for id in sys.location(l).labels.iter_ones() {
            set.set(id, true);
        }
    }
    set
}

/// Enumerate the edge tuples enabled in `vloc` by the synchronization table:
/// asynchronous edges first (process order), then each sync vector's
/// instances. Mandatory participants must move, weak participants join when
/// they have a matching edge. If any process sits in a committed location,
/// only tuples touching a committed location may fire.
pub fn outgoing_vedges(sys: &System, vloc: &[LocId]) -> Vec<VEdge> {
    let n = sys.process_count();
    let mut out = Vec::new();

    for p in 0..n {
        for &eid in sys.outgoing(vloc[p]) {
            let edge = sys.edge(eid);
            if !sys.is_synchronized(edge.pid, edge.event) {
                out.push(VEdge::singleton(n, edge.pid, eid));
            }
        }
    }

    'sync: for sync in sys.syncs() {
        // Candidate edge lists per participating process.
        let mut candidates: Vec<(ProcessId, Vec<EdgeId>)> = Vec::new();
        for c in &sync.constraints {
            let from_here: Vec<EdgeId> = sys
                .outgoing(vloc[c.pid.as_usize()])
                .iter()
                .copied()
                .filter(|&e| sys.edge(e).event == c.event)
                .collect();
            match c.strength {
                SyncStrength::Mandatory => {
                    if from_here.is_empty() {
                        continue 'sync;
                    }
                    candidates.push((c.pid, from_here));
                }
                SyncStrength::Weak => {
                    if !from_here.is_empty() {
                        candidates.push((c.pid, from_here));
                    }
                }
            }
        }
        if candidates.is_empty() {
            continue;
        }
        // Cross product over the candidate lists, first list outermost.
        let mut picks = vec![0usize; candidates.len()];
        loop {
            let mut edges = vec![None; n];
            for (k, (pid, list)) in candidates.iter().enumerate() {
                edges[pid.as_usize()] = Some(list[picks[k]]);
            }
            out.push(VEdge { edges });
            let mut k = candidates.len();
            loop {
                if k == 0 {
                    break;
                }
                k -= 1;
                picks[k] += 1;
                if picks[k] < candidates[k].1.len() {
                    break;
                }
                picks[k] = 0;
                if k == 0 {
                    picks.clear();
                    break;
                }
            }
            if picks.is_empty() {
                break;
            }
        }
    }

    if vloc.iter().any(|&l| sys.location(l).committed) {
        out.retain(|ve| {
            ve.iter().any(|(_, e)| sys.location(sys.edge(e).src).committed)
        });
    }
    out
}

/// The discrete payload of a successful step: the new discrete state plus
/// the clock constraints and resets for the zone layer to apply.
#[derive(Debug)]
pub struct DiscreteNext {
    pub vloc: Vec<LocId>,
    pub intval: Vec<i32>,
    pub src_invariant: Vec<ConcreteConstraint>,
    pub guard: Vec<ConcreteConstraint>,
    pub resets: Vec<ConcreteReset>,
    pub tgt_invariant: Vec<ConcreteConstraint>,
}

/// The discrete payload of an initial state.
#[derive(Debug)]
pub struct DiscreteInitial {
    pub vloc: Vec<LocId>,
    pub intval: Vec<i32>,
    pub invariant: Vec<ConcreteConstraint>,
}

/// Build the initial discrete state for one tuple of initial locations.
pub fn initial(sys: &System, vloc: &[LocId]) -> Result<DiscreteInitial, StateStatus> {
    let mut intval: Vec<i32> = sys.initial_intval().to_vec();
    let mut invariant = Vec::new();
    for &l in vloc {
        let inv = &sys.location(l).invariant;
        let mut env = EvalEnv::new(&mut intval, 0);
        if let Some(pred) = &inv.int {
            match eval_int(pred, &mut env) {
                Ok(v) if v != 0 => {}
                Ok(_) => return Err(StateStatus::SrcInvariantViolated),
                Err(_) => return Err(StateStatus::IntvarsOutOfRange),
            }
        }
        eval_clock_atoms(&inv.clock, &mut env, &mut invariant)
            .map_err(|_| StateStatus::IntvarsOutOfRange)?;
    }
    Ok(DiscreteInitial { vloc: vloc.to_vec(), intval, invariant })
}

/// Fire `vedge` from `(vloc, intval)`: check guards, run statements, move
/// locations, and collect every clock constraint the zone layer needs.
/// Guards and statements execute in process order, so a later guard sees the
/// effects of earlier statements.
pub fn next(
    sys: &System,
    vloc: &[LocId],
    intval: &[i32],
    vedge: &VEdge,
) -> Result<DiscreteNext, StateStatus> {
    if vedge.is_empty() {
        return Err(StateStatus::EmptySync);
    }

    // Source invariant (clock part) over the full source tuple.
    let mut src_invariant = Vec::new();
    {
        let mut scratch: Vec<i32> = intval.to_vec();
        let mut env = EvalEnv::new(&mut scratch, 0);
        for &l in vloc {
            eval_clock_atoms(&sys.location(l).invariant.clock, &mut env, &mut src_invariant)
                .map_err(|_| StateStatus::IntvarsOutOfRange)?;
        }
    }

    let mut new_vloc = vloc.to_vec();
    let mut new_intval: Vec<i32> = intval.to_vec();
    let mut guard = Vec::new();
    let mut resets = Vec::new();

    for (pid, eid) in vedge.iter() {
        let edge = sys.edge(eid);
        debug_assert_eq!(edge.src, vloc[pid.as_usize()]);
        {
            let mut env = EvalEnv::new(&mut new_intval, 0);
            if let Some(pred) = &edge.guard.int {
                match eval_int(pred, &mut env) {
                    Ok(v) if v != 0 => {}
                    Ok(_) => return Err(StateStatus::GuardViolated),
                    Err(_) => return Err(StateStatus::IntvarsOutOfRange),
                }
            }
            eval_clock_atoms(&edge.guard.clock, &mut env, &mut guard)
                .map_err(|_| StateStatus::IntvarsOutOfRange)?;
        }
        {
            let mut env = EvalEnv::new(&mut new_intval, edge.local_slots);
            exec_stmt(&edge.stmt, &mut env, &mut resets)
                .map_err(|_| StateStatus::IntvarsOutOfRange)?;
        }
        new_vloc[pid.as_usize()] = edge.tgt;
    }

    // Target invariant over the full target tuple, on the final valuation.
    let mut tgt_invariant = Vec::new();
    {
        let mut env = EvalEnv::new(&mut new_intval, 0);
        for &l in &new_vloc {
            let inv = &sys.location(l).invariant;
            if let Some(pred) = &inv.int {
                match eval_int(pred, &mut env) {
                    Ok(v) if v != 0 => {}
                    Ok(_) => return Err(StateStatus::TgtInvariantViolated),
                    Err(_) => return Err(StateStatus::IntvarsOutOfRange),
                }
            }
            eval_clock_atoms(&inv.clock, &mut env, &mut tgt_invariant)
                .map_err(|_| StateStatus::IntvarsOutOfRange)?;
        }
    }

    Ok(DiscreteNext {
        vloc: new_vloc,
        intval: new_intval,
        src_invariant,
        guard,
        resets,
        tgt_invariant,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse_system;
    use crate::report::Reporter;

    fn build(input: &str) -> System {
        let decl = parse_system(input).unwrap();
        System::build(&decl, &mut Reporter::quiet()).unwrap()
    }

    const SYNC_SYS: &str = "\
system:s
event:a
event:b
event:c
process:P
process:Q
clock:1:x
location:P:l0{initial:}
location:P:l1
location:Q:m0{initial:}
location:Q:m1
edge:P:l0:l1:a
edge:Q:m0:m1:b
edge:P:l1:l0:c
edge:Q:m1:m0:c
sync:P@c:Q@c
";

    #[test]
    fn initial_tuples_cross_product() {
        let sys = build(SYNC_SYS);
        let inits = initial_vlocs(&sys);
        assert_eq!(inits.len(), 1);
        assert_eq!(inits[0], vec![LocId(0), LocId(2)]);
    }

    #[test]
    fn async_and_sync_enumeration() {
        let sys = build(SYNC_SYS);
        // From (l0, m0): the two async edges, no sync (c edges not enabled).
        let ve = outgoing_vedges(&sys, &[LocId(0), LocId(2)]);
        assert_eq!(ve.len(), 2);
        assert!(ve.iter().all(|v| v.iter().count() == 1));
        // From (l1, m1): only the sync on c.
        let ve = outgoing_vedges(&sys, &[LocId(1), LocId(3)]);
        assert_eq!(ve.len(), 1);
        assert_eq!(ve[0].iter().count(), 2);
        assert_eq!(ve[0].display(&sys), "<P@c,Q@c>");
    }

    #[test]
    fn weak_participant_joins_when_present() {
        let input = "\
system:s
event:a
event:b
process:P
process:Q
location:P:l0{initial:}
location:P:l1
location:Q:m0{initial:}
location:Q:m1
edge:P:l0:l1:a
edge:Q:m0:m1:b
sync:P@a:Q@b?
";
        let sys = build(input);
        let ve = outgoing_vedges(&sys, &[LocId(0), LocId(2)]);
        assert_eq!(ve.len(), 1);
        assert_eq!(ve[0].iter().count(), 2);
        // Once Q has left m0 it cannot join; P still fires alone.
        let ve = outgoing_vedges(&sys, &[LocId(0), LocId(3)]);
        assert_eq!(ve.len(), 1);
        assert_eq!(ve[0].iter().count(), 1);
    }

    #[test]
    fn committed_locations_prioritize() {
        let input = "\
system:s
event:a
event:b
process:P
process:Q
location:P:l0{initial: , committed:}
location:P:l1
location:Q:m0{initial:}
location:Q:m1
edge:P:l0:l1:a
edge:Q:m0:m1:b
";
        let sys = build(input);
        let ve = outgoing_vedges(&sys, &[LocId(0), LocId(2)]);
        // Only the edge of the committed process survives.
        assert_eq!(ve.len(), 1);
        assert_eq!(ve[0].iter().next().unwrap().0, ProcessId(0));
        assert!(!delay_allowed(&sys, &[LocId(0), LocId(2)]));
        assert!(delay_allowed(&sys, &[LocId(1), LocId(2)]));
    }

    #[test]
    fn guard_and_statement_sequencing() {
        let input = "\
system:s
event:a
process:P
process:Q
int:1:0:9:0:i
location:P:l0{initial:}
location:P:l1
location:Q:m0{initial:}
location:Q:m1
edge:P:l0:l1:a
edge:Q:m0:m1:a{provided: i==1}
sync:P@a:Q@a
";
        // P's statement is empty, so Q's guard still sees i == 0 and fails.
        let sys = build(input);
        let ve = outgoing_vedges(&sys, &[LocId(0), LocId(2)]);
        assert_eq!(ve.len(), 1);
        let err = next(&sys, &[LocId(0), LocId(2)], &[0], &ve[0]).unwrap_err();
        assert_eq!(err, StateStatus::GuardViolated);
    }

    #[test]
    fn next_collects_constraints_and_resets() {
        let input = "\
system:s
event:a
process:P
int:1:0:9:0:i
clock:1:x
location:P:l0{initial: , invariant: x<=5}
location:P:l1{invariant: x<=8}
edge:P:l0:l1:a{provided: x>=2 && i<3 , do: i=i+1; x=0}
";
        let sys = build(input);
        let ve = outgoing_vedges(&sys, &[LocId(0)]);
        assert_eq!(ve.len(), 1);
        let step = next(&sys, &[LocId(0)], &[0], &ve[0]).unwrap();
        assert_eq!(step.vloc, vec![LocId(1)]);
        assert_eq!(step.intval, vec![1]);
        assert_eq!(step.src_invariant.len(), 1);
        assert_eq!(step.guard.len(), 1);
        assert_eq!(step.resets, vec![ConcreteReset { left: 1, right: 0, value: 0 }]);
        assert_eq!(step.tgt_invariant.len(), 1);
        // x >= 2 normalized to 0 - x <= -2.
        assert_eq!(step.guard[0].left, 0);
        assert_eq!(step.guard[0].right, 1);
        assert_eq!(step.guard[0].value, -2);
    }

    #[test]
    fn labels_union() {
        let input = "\
system:s
event:a
process:P
process:Q
location:P:l0{initial: , labels: one}
location:Q:m0{initial: , labels: two}
";
        let sys = build(input);
        let set = labels(&sys, &[LocId(0), LocId(1)]);
        assert_eq!(set.count_ones(), 2);
    }

    #[test]
    fn int_guard_out_of_range_suppresses() {
        let input = "\
system:s
event:a
process:P
int:2:0:3:0:t
location:P:l0{initial:}
location:P:l1
edge:P:l0:l1:a{do: t[5]=1}
";
        let sys = build(input);
        let ve = outgoing_vedges(&sys, &[LocId(0)]);
        let err = next(&sys, &[LocId(0)], &[0, 0], &ve[0]).unwrap_err();
        assert_eq!(err, StateStatus::IntvarsOutOfRange);
    }
}
