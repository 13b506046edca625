//! Per-location clock bounds for extrapolation
//!
//! For every location `l` and clock `x` the solver derives `L(l,x)`, the
//! largest constant of a lower-bound guard relevant at `l`, and `U(l,x)` for
//! upper bounds (`M = max(L, U)`). A clock with no relevant constant gets
//! [`NO_BOUND`], which the extrapolation operators treat as −∞ (maximally
//! abstractable).
//!
//! The computation encodes one variable per `(location, clock)` pair per
//! bound family and solves the difference-constraint system on an auxiliary
//! DBM:
//!
//! - a guard `x >= c` at `l` contributes `0 − L(l,x) <= −c`;
//! - an edge `l1 → l2` whose statement updates `x := y + c` propagates
//!   `L(l2,x) − L(l1,y) <= c` (and likewise for U), plus the same constraint
//!   into every location of other processes when `x != y` (shared clocks);
//! - tightening yields the least solution; reading row 0 gives the bounds.
//!
//! Diagonal guards and statically undeterminable updates put the system
//! outside the diagonal-free fragment; the solver then reports `None` and
//! the engine falls back to running without extrapolation.

use crate::db::{Db, MAX_VALUE};
use crate::dbm::Dbm;
use crate::expr::{compute_clock_updates, const_evaluate, ClockAtom};
use crate::system::{LocId, System};

/// A clock bound: a constant `>= 0`, or [`NO_BOUND`] standing for −∞.
pub type Bound = i64;

/// No constant constrains this clock; extrapolation may abstract freely.
pub const NO_BOUND: Bound = i64::MIN / 2;

/// Largest representable bound constant; non-constant guard bounds are
/// approximated by it (the strongest assumption).
pub const MAX_BOUND: Bound = MAX_VALUE as i64;

/// The solved bound maps. Rows are indexed by DBM index (entry 0 is the zero
/// clock, pinned to 0).
pub struct ClockBounds {
    dim: usize,
    local_l: Vec<Bound>,
    local_u: Vec<Bound>,
    local_m: Vec<Bound>,
    global_l: Vec<Bound>,
    global_u: Vec<Bound>,
    global_m: Vec<Bound>,
}

impl ClockBounds {
    /// DBM dimension the rows are sized for.
    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn local_l(&self, l: LocId) -> &[Bound] {
        let base = l.as_usize() * self.dim;
        &self.local_l[base..base + self.dim]
    }

    pub fn local_u(&self, l: LocId) -> &[Bound] {
        let base = l.as_usize() * self.dim;
        &self.local_u[base..base + self.dim]
    }

    pub fn local_m(&self, l: LocId) -> &[Bound] {
        let base = l.as_usize() * self.dim;
        &self.local_m[base..base + self.dim]
    }

    pub fn global_l(&self) -> &[Bound] {
        &self.global_l
    }

    pub fn global_u(&self) -> &[Bound] {
        &self.global_u
    }

    pub fn global_m(&self) -> &[Bound] {
        &self.global_m
    }

    /// Pointwise max of the local rows over a location tuple, written into
    /// `out` (len `dim`).
    pub fn vloc_l(&self, vloc: &[LocId], out: &mut [Bound]) {
        self.vloc_max(vloc, out, &self.local_l);
    }

    pub fn vloc_u(&self, vloc: &[LocId], out: &mut [Bound]) {
        self.vloc_max(vloc, out, &self.local_u);
    }

    pub fn vloc_m(&self, vloc: &[LocId], out: &mut [Bound]) {
        self.vloc_max(vloc, out, &self.local_m);
    }

    fn vloc_max(&self, vloc: &[LocId], out: &mut [Bound], rows: &[Bound]) {
        debug_assert_eq!(out.len(), self.dim);
        out.fill(NO_BOUND);
        out[0] = 0;
        for &l in vloc {
            let base = l.as_usize() * self.dim;
            for x in 1..self.dim {
                out[x] = out[x].max(rows[base + x]);
            }
        }
    }
}

/// The diagonal-free solver: one auxiliary DBM per bound family over
/// `1 + locations × clocks` variables.
struct DfSolver {
    loc_number: usize,
    clock_number: usize,
    l: Dbm,
    u: Dbm,
}

impl DfSolver {
    fn new(loc_number: usize, clock_number: usize) -> DfSolver {
        let dim = 1 + loc_number * clock_number;
        DfSolver {
            loc_number,
            clock_number,
            l: Dbm::unconstrained(dim),
            u: Dbm::unconstrained(dim),
        }
    }

    fn index(&self, l: LocId, x: usize) -> usize {
        debug_assert!(x >= 1 && x <= self.clock_number);
        1 + l.as_usize() * self.clock_number + (x - 1)
    }

    /// `L(l,x) >= c`, as `0 − L(l,x) <= −c`.
    fn add_lower_bound_guard(&mut self, l: LocId, x: usize, c: Bound) {
        let j = self.index(l, x);
        self.l.strengthen(0, j, clamp(-c));
    }

    /// `U(l,x) >= c`.
    fn add_upper_bound_guard(&mut self, l: LocId, x: usize, c: Bound) {
        let j = self.index(l, x);
        self.u.strengthen(0, j, clamp(-c));
    }

    /// Propagate `x := y + c` over edge `l1 → l2`.
    fn add_assignment(
        &mut self,
        sys: &System,
        l1: LocId,
        l2: LocId,
        x: usize,
        y: usize,
        c: Bound,
    ) {
        let from = self.index(l1, y);
        let to = self.index(l2, x);
        self.l.strengthen(to, from, clamp(c));
        self.u.strengthen(to, from, clamp(c));
        if x == y {
            return;
        }
        // A shared clock read through y leaks the bound into every location
        // of the other processes.
        let pid = sys.location(l1).pid;
        for m in 0..self.loc_number {
            let mid = LocId(m);
            if sys.location(mid).pid != pid {
                let to = self.index(mid, x);
                self.l.strengthen(to, from, clamp(c));
                self.u.strengthen(to, from, clamp(c));
            }
        }
    }

    fn solve(mut self) -> Option<ClockBounds> {
        if self.l.tighten().ok()?.is_non_empty() && self.u.tighten().ok()?.is_non_empty() {
            let dim = 1 + self.clock_number;
            let mut bounds = ClockBounds {
                dim,
                local_l: vec![NO_BOUND; self.loc_number * dim],
                local_u: vec![NO_BOUND; self.loc_number * dim],
                local_m: vec![NO_BOUND; self.loc_number * dim],
                global_l: vec![NO_BOUND; dim],
                global_u: vec![NO_BOUND; dim],
                global_m: vec![NO_BOUND; dim],
            };
            for l in 0..self.loc_number {
                let row = l * dim;
                bounds.local_l[row] = 0;
                bounds.local_u[row] = 0;
                bounds.local_m[row] = 0;
                for x in 1..dim {
                    let lb = self.extract(&self.l, LocId(l), x);
                    let ub = self.extract(&self.u, LocId(l), x);
                    bounds.local_l[row + x] = lb;
                    bounds.local_u[row + x] = ub;
                    bounds.local_m[row + x] = lb.max(ub);
                    bounds.global_l[x] = bounds.global_l[x].max(lb);
                    bounds.global_u[x] = bounds.global_u[x].max(ub);
                }
            }
            bounds.global_l[0] = 0;
            bounds.global_u[0] = 0;
            bounds.global_m[0] = 0;
            for x in 1..dim {
                bounds.global_m[x] = bounds.global_l[x].max(bounds.global_u[x]);
            }
            Some(bounds)
        } else {
            None
        }
    }

    fn extract(&self, matrix: &Dbm, l: LocId, x: usize) -> Bound {
        let db = matrix.at(0, self.index(l, x));
        if db.is_infinity() {
            NO_BOUND
        } else {
            -(db.value() as Bound)
        }
    }
}

fn clamp(c: Bound) -> Db {
    let c = c.clamp(-MAX_BOUND, MAX_BOUND);
    Db::le(c).unwrap_or(Db::INFINITY)
}

/// Add the bound constraints of one guard/invariant's clock atoms at
/// location `l`. Diagonal atoms leave the diagonal-free fragment.
fn add_atom_constraints(solver: &mut DfSolver, l: LocId, atoms: &[ClockAtom]) -> Option<()> {
    for atom in atoms {
        let bound = const_evaluate(&atom.bound).unwrap_or(MAX_BOUND);
        match (&atom.left, &atom.right) {
            // x # c: an upper-bound guard on x.
            (Some(xr), None) => {
                for cell in xr.cells() {
                    solver.add_upper_bound_guard(l, cell, bound);
                }
            }
            // 0 - x # c, i.e. x >= -c: a lower-bound guard.
            (None, Some(xr)) => {
                for cell in xr.cells() {
                    solver.add_lower_bound_guard(l, cell, -bound);
                }
            }
            // Diagonal constraint: unsupported here.
            (Some(_), Some(_)) => return None,
            (None, None) => {}
        }
    }
    Some(())
}

/// Compute the clock-bound maps of a system. `None` means the system is
/// outside the solvable fragment (diagonal guards, undeterminable updates,
/// or an inconsistent constraint system); the caller should then run
/// without extrapolation.
pub fn compute(sys: &System) -> Option<ClockBounds> {
    let clock_number = sys.clock_count();
    let loc_number = sys.locations().len();
    let mut solver = DfSolver::new(loc_number, clock_number);

    for loc in sys.locations() {
        add_atom_constraints(&mut solver, loc.id, &loc.invariant.clock)?;
    }
    for edge in sys.edges() {
        add_atom_constraints(&mut solver, edge.src, &edge.guard.clock)?;
        let updates = compute_clock_updates(clock_number, &edge.stmt);
        for x in 0..clock_number {
            let list = updates.get(x);
            if list.is_empty() {
                return None;
            }
            for up in list {
                // Default 0 yields the strongest constraint on the bounds.
                let v = const_evaluate(&up.value).unwrap_or(0);
                if let Some(y) = up.src {
                    solver.add_assignment(sys, edge.src, edge.tgt, x + 1, y + 1, v);
                }
            }
        }
    }
    solver.solve()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse_system;
    use crate::report::Reporter;

    fn bounds(input: &str) -> Option<ClockBounds> {
        let decl = parse_system(input).unwrap();
        let sys = crate::system::System::build(&decl, &mut Reporter::quiet()).unwrap();
        compute(&sys)
    }

    #[test]
    fn guard_constants_become_bounds() {
        let cb = bounds(
            "\
system:s
event:a
process:P
clock:1:x
location:P:l0{initial: , invariant: x<=5}
location:P:l1
edge:P:l0:l1:a{provided: x>=2 , do: x=0}
",
        )
        .unwrap();
        // l0: U from the invariant, L from the guard.
        assert_eq!(cb.local_u(LocId(0))[1], 5);
        assert_eq!(cb.local_l(LocId(0))[1], 2);
        assert_eq!(cb.local_m(LocId(0))[1], 5);
        // l1 has no constraint of its own and x is reset on the way in.
        assert_eq!(cb.local_l(LocId(1))[1], NO_BOUND);
        assert_eq!(cb.global_m()[1], 5);
    }

    #[test]
    fn bounds_propagate_backwards_over_copies() {
        // y := x on the edge, and y <= 7 required in l1: x inherits the
        // bound in l0.
        let cb = bounds(
            "\
system:s
event:a
process:P
clock:1:x
clock:1:y
location:P:l0{initial:}
location:P:l1{invariant: y<=7}
edge:P:l0:l1:a{do: y=x}
",
        )
        .unwrap();
        assert_eq!(cb.local_u(LocId(0))[1], 7); // x
        assert_eq!(cb.local_u(LocId(1))[2], 7); // y
    }

    #[test]
    fn diagonal_guard_disables_solver() {
        let cb = bounds(
            "\
system:s
event:a
process:P
clock:1:x
clock:1:y
location:P:l0{initial:}
location:P:l1
edge:P:l0:l1:a{provided: x-y<=3}
",
        );
        assert!(cb.is_none());
    }

    #[test]
    fn no_clocks_is_trivially_solved() {
        let cb = bounds("system:s\nprocess:P\nlocation:P:l0{initial:}\n").unwrap();
        assert_eq!(cb.dim(), 1);
    }

    #[test]
    fn vloc_rows_take_the_max() {
        let cb = bounds(
            "\
system:s
event:a
process:P
process:Q
clock:1:x
location:P:l0{initial: , invariant: x<=3}
location:Q:m0{initial: , invariant: x<=9}
",
        )
        .unwrap();
        let mut row = vec![0; cb.dim()];
        cb.vloc_u(&[LocId(0), LocId(1)], &mut row);
        assert_eq!(row[1], 9);
        cb.vloc_u(&[LocId(0)], &mut row);
        assert_eq!(row[1], 3);
    }
}
