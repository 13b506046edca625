//! The zone-graph symbolic transition system
//!
//! Couples the system model, the discrete TA semantics and the DBM algebra
//! into a stream of symbolic states for the search algorithms. A state is
//! `(vloc, intval, zone)`; a transition carries the tuple of edges that
//! fired. Two *zone semantics* are provided:
//!
//! - **standard**: delay then jump. `next` opens the zone up (if the source
//!   tuple allows delay), intersects with the source invariant, the guard,
//!   applies the resets, intersects with the target invariant;
//! - **elapsed**: jump then delay. The same sequence without the leading
//!   delay; the delay happens after the jump and the target invariant is
//!   re-applied post-delay.
//!
//! Every intersection can kill the zone; the distinguished
//! [`StateStatus`] says which one did, and the search counts it. After the
//! pipeline the configured extrapolation operator widens the zone so the
//! reachable quotient stays finite.
//!
//! State components are deduplicated through the sharing store, so equality
//! checks on the hot path are mostly pointer comparisons.

use std::cmp::Ordering;
use std::sync::Arc;

use bitvec::vec::BitVec;
use tracing::trace;

use crate::clockbounds::{self, Bound, ClockBounds};
use crate::db::{DbError, Ineq};
use crate::dbm::Dbm;
use crate::expr::{ConcreteConstraint, ConcreteReset};
use crate::report::Reporter;
use crate::store::{Fingerprint, Gc, Interner};
use crate::system::{LocId, System};
use crate::ta::{self, StateStatus, VEdge};

/// Fatal search failure. Unlike a [`StateStatus`], this aborts the run.
#[derive(Debug, thiserror::Error)]
pub enum CheckError {
    #[error("difference-bound arithmetic: {0}")]
    Db(#[from] DbError),
}

/// A symbolic state: one location per process, the flattened integer
/// valuation, and a zone of dimension `clocks + 1`.
#[derive(Clone, Debug)]
pub struct State {
    pub vloc: Arc<Vec<LocId>>,
    pub intval: Arc<Vec<i32>>,
    pub zone: Arc<Dbm>,
}

impl State {
    /// Hash of the discrete part only; the node-index key.
    pub fn discrete_fingerprint(&self) -> u64 {
        self.vloc.fingerprint() ^ self.intval.fingerprint()
    }

    /// Equality of the discrete part.
    pub fn same_discrete(&self, other: &State) -> bool {
        (Arc::ptr_eq(&self.vloc, &other.vloc) || self.vloc == other.vloc)
            && (Arc::ptr_eq(&self.intval, &other.intval) || self.intval == other.intval)
    }
}

impl PartialEq for State {
    fn eq(&self, other: &State) -> bool {
        self.same_discrete(other)
            && (Arc::ptr_eq(&self.zone, &other.zone) || self.zone == other.zone)
    }
}

impl Eq for State {}

/// Total order on states for deterministic output: vloc, then intval, then
/// zone entries.
pub fn lexical_cmp(a: &State, b: &State) -> Ordering {
    a.vloc
        .cmp(&b.vloc)
        .then_with(|| a.intval.cmp(&b.intval))
        .then_with(|| a.zone.entries().cmp(b.zone.entries()))
}

/// A symbolic transition: the edge tuple that fired. Never interned.
#[derive(Clone, Debug)]
pub struct Transition {
    pub vedge: Arc<VEdge>,
}

/// Result of `initial`/`next`: a successor, or the reason there is none.
#[derive(Debug)]
pub enum Step {
    Ok { state: State, transition: Transition },
    Dead(StateStatus),
}

/// Zone semantics selector.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Semantics {
    /// Delay then jump.
    Standard,
    /// Jump then delay.
    Elapsed,
}

/// Extrapolation operator selector.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ExtrapolationKind {
    None,
    MGlobal,
    MLocal,
    MPlusGlobal,
    MPlusLocal,
    LuGlobal,
    LuLocal,
    LuPlusGlobal,
    LuPlusLocal,
}

impl ExtrapolationKind {
    pub fn needs_bounds(self) -> bool {
        self != ExtrapolationKind::None
    }
}

/// An extrapolation operator bound to the solved clock bounds, with scratch
/// rows for the local (per-vloc) variants.
struct Extrapolation {
    kind: ExtrapolationKind,
    bounds: Option<ClockBounds>,
    row_l: Vec<Bound>,
    row_u: Vec<Bound>,
}

impl Extrapolation {
    fn apply(&mut self, dbm: &mut Dbm, vloc: &[LocId]) -> Result<(), DbError> {
        let bounds = match (&self.bounds, self.kind) {
            (_, ExtrapolationKind::None) => return Ok(()),
            (Some(b), _) => b,
            (None, _) => return Ok(()),
        };
        match self.kind {
            ExtrapolationKind::None => Ok(()),
            ExtrapolationKind::MGlobal => dbm.extra_m(bounds.global_m()),
            ExtrapolationKind::MPlusGlobal => dbm.extra_m_plus(bounds.global_m()),
            ExtrapolationKind::LuGlobal => dbm.extra_lu(bounds.global_l(), bounds.global_u()),
            ExtrapolationKind::LuPlusGlobal => {
                dbm.extra_lu_plus(bounds.global_l(), bounds.global_u())
            }
            ExtrapolationKind::MLocal => {
                bounds.vloc_m(vloc, &mut self.row_l);
                dbm.extra_m(&self.row_l)
            }
            ExtrapolationKind::MPlusLocal => {
                bounds.vloc_m(vloc, &mut self.row_l);
                dbm.extra_m_plus(&self.row_l)
            }
            ExtrapolationKind::LuLocal => {
                bounds.vloc_l(vloc, &mut self.row_l);
                bounds.vloc_u(vloc, &mut self.row_u);
                dbm.extra_lu(&self.row_l, &self.row_u)
            }
            ExtrapolationKind::LuPlusLocal => {
                bounds.vloc_l(vloc, &mut self.row_l);
                bounds.vloc_u(vloc, &mut self.row_u);
                dbm.extra_lu_plus(&self.row_l, &self.row_u)
            }
        }
    }
}

/// Zone-pipeline failure: either a dead zone with its status, or a fatal
/// arithmetic error.
enum ZoneFail {
    Dead(StateStatus),
    Db(DbError),
}

impl From<DbError> for ZoneFail {
    fn from(e: DbError) -> ZoneFail {
        ZoneFail::Db(e)
    }
}

fn apply_constraints(
    dbm: &mut Dbm,
    constraints: &[ConcreteConstraint],
    dead: StateStatus,
) -> Result<(), ZoneFail> {
    for c in constraints {
        if c.left == c.right {
            // x − x # v: constant truth value.
            let holds = if c.strict { c.value > 0 } else { c.value >= 0 };
            if !holds {
                return Err(ZoneFail::Dead(dead));
            }
            continue;
        }
        let cmp = if c.strict { Ineq::Lt } else { Ineq::Le };
        if !dbm.constrain(c.left, c.right, cmp, c.value)?.is_non_empty() {
            return Err(ZoneFail::Dead(dead));
        }
    }
    Ok(())
}

fn apply_resets(dbm: &mut Dbm, resets: &[ConcreteReset]) -> Result<(), ZoneFail> {
    for r in resets {
        if r.value < 0 {
            return Err(ZoneFail::Dead(StateStatus::ClocksResetFailed));
        }
        debug_assert!(r.left > 0);
        dbm.reset_to_sum(r.left, r.right, r.value)?;
    }
    Ok(())
}

impl Semantics {
    /// Initial zone: the zero valuation under the invariant; under the
    /// elapsed semantics also its time successors.
    fn initial_zone(
        self,
        dbm: &mut Dbm,
        delay_allowed: bool,
        invariant: &[ConcreteConstraint],
    ) -> Result<(), ZoneFail> {
        apply_constraints(dbm, invariant, StateStatus::SrcInvariantViolated)?;
        if self == Semantics::Elapsed && delay_allowed {
            dbm.open_up();
            apply_constraints(dbm, invariant, StateStatus::SrcInvariantViolated)?;
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn next_zone(
        self,
        dbm: &mut Dbm,
        src_delay_allowed: bool,
        src_invariant: &[ConcreteConstraint],
        guard: &[ConcreteConstraint],
        resets: &[ConcreteReset],
        tgt_delay_allowed: bool,
        tgt_invariant: &[ConcreteConstraint],
    ) -> Result<(), ZoneFail> {
        match self {
            Semantics::Standard => {
                if src_delay_allowed {
                    dbm.open_up();
                }
                apply_constraints(dbm, src_invariant, StateStatus::SrcInvariantViolated)?;
                apply_constraints(dbm, guard, StateStatus::GuardViolated)?;
                apply_resets(dbm, resets)?;
                apply_constraints(dbm, tgt_invariant, StateStatus::TgtInvariantViolated)?;
            }
            Semantics::Elapsed => {
                apply_constraints(dbm, src_invariant, StateStatus::SrcInvariantViolated)?;
                apply_constraints(dbm, guard, StateStatus::GuardViolated)?;
                apply_resets(dbm, resets)?;
                apply_constraints(dbm, tgt_invariant, StateStatus::TgtInvariantViolated)?;
                if tgt_delay_allowed {
                    dbm.open_up();
                    apply_constraints(dbm, tgt_invariant, StateStatus::TgtInvariantViolated)?;
                }
            }
        }
        Ok(())
    }
}

/// The symbolic transition system over zones.
pub struct ZoneGraph {
    system: Arc<System>,
    semantics: Semantics,
    extrapolation: Extrapolation,
    sharing: bool,
    dim: usize,
    vloc_store: Interner<Vec<LocId>>,
    intval_store: Interner<Vec<i32>>,
    zone_store: Interner<Dbm>,
}

impl ZoneGraph {
    /// Build the transition system. When the requested extrapolation needs
    /// clock bounds and the model has none (diagonal guards, unbounded
    /// updates), falls back to running without extrapolation and warns.
    pub fn new(
        system: Arc<System>,
        semantics: Semantics,
        kind: ExtrapolationKind,
        sharing: bool,
        reporter: &mut Reporter,
    ) -> ZoneGraph {
        let dim = system.clock_count() + 1;
        // Bounds are also what the aLU/aM cover predicates consume, so they
        // are solved even when the extrapolation does not need them.
        let bounds = clockbounds::compute(&system);
        let kind = if kind.needs_bounds() && bounds.is_none() {
            reporter
                .warning("system has no computable clock bounds, running without extrapolation");
            ExtrapolationKind::None
        } else {
            kind
        };
        ZoneGraph {
            system,
            semantics,
            extrapolation: Extrapolation {
                kind,
                bounds,
                row_l: vec![0; dim],
                row_u: vec![0; dim],
            },
            sharing,
            dim,
            vloc_store: Interner::new(),
            intval_store: Interner::new(),
            zone_store: Interner::new(),
        }
    }

    pub fn system(&self) -> &System {
        &self.system
    }

    /// DBM dimension of the zones (flattened clocks plus one).
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// The extrapolation actually in effect (after any fallback).
    pub fn extrapolation_kind(&self) -> ExtrapolationKind {
        self.extrapolation.kind
    }

    /// The clock bounds backing the cover predicates, if any.
    pub fn clock_bounds(&self) -> Option<&ClockBounds> {
        self.extrapolation.bounds.as_ref()
    }

    /// Finite enumeration of the initial location tuples.
    pub fn initial_edges(&self) -> Vec<Vec<LocId>> {
        ta::initial_vlocs(&self.system)
    }

    /// Build the initial symbolic state for one tuple of initial locations.
    pub fn initial(&mut self, vloc: &[LocId]) -> Result<Step, CheckError> {
        let discrete = match ta::initial(&self.system, vloc) {
            Ok(d) => d,
            Err(status) => return Ok(Step::Dead(status)),
        };
        let mut dbm = Dbm::zero(self.dim);
        let delay = ta::delay_allowed(&self.system, &discrete.vloc);
        match self.semantics.initial_zone(&mut dbm, delay, &discrete.invariant) {
            Ok(()) => {}
            Err(ZoneFail::Dead(status)) => return Ok(Step::Dead(status)),
            Err(ZoneFail::Db(e)) => return Err(e.into()),
        }
        self.extrapolation.apply(&mut dbm, &discrete.vloc)?;
        let state = self.make_state(discrete.vloc, discrete.intval, dbm);
        let transition = Transition { vedge: Arc::new(VEdge::initial(self.system.process_count())) };
        Ok(Step::Ok { state, transition })
    }

    /// Finite enumeration of the edge tuples enabled in `state`.
    pub fn outgoing_edges(&self, state: &State) -> Vec<VEdge> {
        ta::outgoing_vedges(&self.system, &state.vloc)
    }

    /// Compute the successor of `state` along `vedge`.
    pub fn next(&mut self, state: &State, vedge: &VEdge) -> Result<Step, CheckError> {
        let discrete = match ta::next(&self.system, &state.vloc, &state.intval, vedge) {
            Ok(d) => d,
            Err(status) => return Ok(Step::Dead(status)),
        };
        let src_delay = ta::delay_allowed(&self.system, &state.vloc);
        let tgt_delay = ta::delay_allowed(&self.system, &discrete.vloc);
        let mut dbm = (*state.zone).clone();
        match self.semantics.next_zone(
            &mut dbm,
            src_delay,
            &discrete.src_invariant,
            &discrete.guard,
            &discrete.resets,
            tgt_delay,
            &discrete.tgt_invariant,
        ) {
            Ok(()) => {}
            Err(ZoneFail::Dead(status)) => {
                trace!(status = status.name(), "dead transition");
                return Ok(Step::Dead(status));
            }
            Err(ZoneFail::Db(e)) => return Err(e.into()),
        }
        self.extrapolation.apply(&mut dbm, &discrete.vloc)?;
        let state = self.make_state(discrete.vloc, discrete.intval, dbm);
        let transition = Transition { vedge: Arc::new(vedge.clone()) };
        Ok(Step::Ok { state, transition })
    }

    /// Labels of a state, as a bitset over the global label index.
    pub fn labels(&self, state: &State) -> BitVec {
        ta::labels(&self.system, &state.vloc)
    }

    /// A state can witness reachability iff its zone is non-empty.
    pub fn is_valid_final(&self, state: &State) -> bool {
        !state.zone.is_empty()
    }

    /// Attribute map of a state, for graph output.
    pub fn state_attributes(&self, state: &State) -> Vec<(&'static str, String)> {
        let mut zone = String::new();
        let _ = state.zone.write_constraints(&mut zone, self.system.clock_names());
        vec![
            ("vloc", self.system.vloc_string(&state.vloc)),
            ("intval", self.system.intval_string(&state.intval)),
            ("zone", zone),
        ]
    }

    /// Attribute map of a transition.
    pub fn transition_attributes(&self, transition: &Transition) -> Vec<(&'static str, String)> {
        vec![("vedge", transition.vedge.display(&self.system))]
    }

    /// Release interned components nobody references anymore.
    pub fn sweep_stores(&mut self, gc: &Gc) {
        if self.sharing {
            self.vloc_store.sweep(gc);
            self.intval_store.sweep(gc);
            self.zone_store.sweep(gc);
        }
    }

    fn make_state(&mut self, vloc: Vec<LocId>, intval: Vec<i32>, zone: Dbm) -> State {
        if self.sharing {
            State {
                vloc: self.vloc_store.share(vloc),
                intval: self.intval_store.share(intval),
                zone: self.zone_store.share(zone),
            }
        } else {
            State { vloc: Arc::new(vloc), intval: Arc::new(intval), zone: Arc::new(zone) }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Db;
    use crate::parse::parse_system;
    use crate::system::System;

    fn zg(input: &str, semantics: Semantics, kind: ExtrapolationKind) -> ZoneGraph {
        let decl = parse_system(input).unwrap();
        let sys = Arc::new(System::build(&decl, &mut Reporter::quiet()).unwrap());
        ZoneGraph::new(sys, semantics, kind, true, &mut Reporter::quiet())
    }

    const ONE_SHOT: &str = "\
system:s
event:a
process:P
clock:1:x
location:P:l0{initial: , invariant: x<=5}
location:P:l1
edge:P:l0:l1:a{provided: x<3}
";

    fn only_initial(g: &mut ZoneGraph) -> State {
        let inits = g.initial_edges();
        assert_eq!(inits.len(), 1);
        match g.initial(&inits[0]).unwrap() {
            Step::Ok { state, .. } => state,
            Step::Dead(s) => panic!("initial state dead: {s:?}"),
        }
    }

    #[test]
    fn standard_initial_is_zero_zone() {
        let mut g = zg(ONE_SHOT, Semantics::Standard, ExtrapolationKind::None);
        let s0 = only_initial(&mut g);
        assert_eq!(s0.zone.at(1, 0), Db::LE_ZERO);
        assert_eq!(s0.zone.at(0, 1), Db::LE_ZERO);
    }

    #[test]
    fn elapsed_initial_delays_under_invariant() {
        let mut g = zg(ONE_SHOT, Semantics::Elapsed, ExtrapolationKind::None);
        let s0 = only_initial(&mut g);
        // 0 <= x <= 5.
        assert_eq!(s0.zone.at(1, 0), Db::le(5).unwrap());
        assert_eq!(s0.zone.at(0, 1), Db::LE_ZERO);
    }

    #[test]
    fn standard_next_delays_then_jumps() {
        let mut g = zg(ONE_SHOT, Semantics::Standard, ExtrapolationKind::None);
        let s0 = only_initial(&mut g);
        let edges = g.outgoing_edges(&s0);
        assert_eq!(edges.len(), 1);
        match g.next(&s0, &edges[0]).unwrap() {
            Step::Ok { state, transition } => {
                // After delay and guard x < 3, no reset: 0 <= x < 3.
                assert_eq!(state.zone.at(1, 0), Db::lt(3).unwrap());
                assert_eq!(*state.vloc, vec![crate::system::LocId(1)]);
                assert_eq!(transition.vedge.iter().count(), 1);
            }
            Step::Dead(s) => panic!("expected successor, got {s:?}"),
        }
    }

    #[test]
    fn urgent_location_blocks_delay() {
        let input = "\
system:s
event:a
process:P
clock:1:x
location:P:l0{initial: , urgent:}
location:P:l1
edge:P:l0:l1:a{provided: x>0}
";
        let mut g = zg(input, Semantics::Standard, ExtrapolationKind::None);
        let s0 = only_initial(&mut g);
        let edges = g.outgoing_edges(&s0);
        // No delay in the urgent location: x stays 0 and the guard x > 0
        // can never hold.
        match g.next(&s0, &edges[0]).unwrap() {
            Step::Dead(status) => assert_eq!(status, StateStatus::GuardViolated),
            Step::Ok { .. } => panic!("guard should be unsatisfiable"),
        }
    }

    #[test]
    fn invariant_can_kill_initial() {
        let input = "\
system:s
process:P
int:1:0:1:0:i
clock:1:x
location:P:l0{initial: , invariant: i>0}
";
        let mut g = zg(input, Semantics::Standard, ExtrapolationKind::None);
        let inits = g.initial_edges();
        match g.initial(&inits[0]).unwrap() {
            Step::Dead(status) => assert_eq!(status, StateStatus::SrcInvariantViolated),
            Step::Ok { .. } => panic!("initial invariant should fail"),
        }
    }

    #[test]
    fn extrapolation_keeps_quotient_finite() {
        // x is reset on the loop, y never: without extrapolation the zones
        // grow forever, with ExtraM they saturate.
        let input = "\
system:s
event:a
process:P
clock:1:x
clock:1:y
location:P:l0{initial:}
edge:P:l0:l0:a{provided: x>=1 , do: x=0}
";
        let mut g = zg(input, Semantics::Elapsed, ExtrapolationKind::MLocal);
        assert_eq!(g.extrapolation_kind(), ExtrapolationKind::MLocal);
        let mut seen = Vec::new();
        let mut frontier = vec![only_initial(&mut g)];
        let mut rounds = 0;
        while let Some(s) = frontier.pop() {
            rounds += 1;
            assert!(rounds < 64, "state space must be finite under extrapolation");
            if seen.iter().any(|t| *t == s) {
                continue;
            }
            for e in g.outgoing_edges(&s) {
                if let Step::Ok { state, .. } = g.next(&s, &e).unwrap() {
                    frontier.push(state);
                }
            }
            seen.push(s);
        }
        assert!(seen.len() < 8);
    }

    #[test]
    fn sharing_gives_pointer_equality() {
        let mut g = zg(ONE_SHOT, Semantics::Standard, ExtrapolationKind::None);
        let a = only_initial(&mut g);
        let b = only_initial(&mut g);
        assert!(Arc::ptr_eq(&a.vloc, &b.vloc));
        assert!(Arc::ptr_eq(&a.zone, &b.zone));
        assert_eq!(a.discrete_fingerprint(), b.discrete_fingerprint());
    }

    #[test]
    fn overflow_is_a_fatal_error() {
        let input = "\
system:s
event:a
process:P
clock:1:x
location:P:l0{initial:}
edge:P:l0:l0:a{provided: x<=2100000000}
";
        let mut g = zg(input, Semantics::Elapsed, ExtrapolationKind::None);
        let s0 = only_initial(&mut g);
        let edges = g.outgoing_edges(&s0);
        assert!(matches!(g.next(&s0, &edges[0]), Err(CheckError::Db(_))));
    }
}
