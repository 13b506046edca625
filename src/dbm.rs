//! Difference-bound matrices
//!
//! A `dim × dim` matrix of [`Db`] bounds where index 0 is the synthetic zero
//! clock; entry `(i, j)` bounds `x_i − x_j`. A DBM denotes a *zone*, a convex
//! polyhedron of clock valuations.
//!
//! ## Invariants
//! - **Tightness.** `d[i,j] <= d[i,k] + d[k,j]` for all `i,j,k`. Every public
//!   routine documents whether it expects a tight input; every routine
//!   returns a tight (or empty) matrix.
//! - **Consistency.** `d[i,i] == <=0` for every `i`. An empty zone is flagged
//!   by a strictly negative bound at `(0,0)` and nothing else is guaranteed
//!   about its entries; [`Dbm::is_empty`] checks that entry only.
//! - **Uniqueness.** A non-empty zone has exactly one tight DBM, so equality
//!   of zones is entrywise equality of tight matrices.
//!
//! ## Abstractions
//! The four extrapolation operators (`ExtraM`, `ExtraM+`, `ExtraLU`,
//! `ExtraLU+`) and the aLU/aM subsumption tests implement the classical
//! zone abstractions for timed automata (Behrmann et al., TACAS'04;
//! Herbreteau et al., LICS'12). Each extrapolation is a sound, idempotent
//! over-approximation and keeps the quotient finite; each subsumption test
//! decides `Z ⊆ a(Z')` without materializing `a(Z')`.

use std::fmt;

use crate::clockbounds::{Bound, NO_BOUND};
use crate::db::{Db, DbError, Ineq};

/// Outcome of a tightening or constraining step.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ZoneStatus {
    /// The matrix is tight and consistent.
    NonEmpty,
    /// The matrix denotes the empty zone; `(0,0)` holds a negative bound.
    Empty,
}

impl ZoneStatus {
    /// True for [`ZoneStatus::NonEmpty`].
    #[inline]
    pub fn is_non_empty(self) -> bool {
        matches!(self, ZoneStatus::NonEmpty)
    }
}

/// A difference-bound matrix of fixed dimension `dim >= 1`.
#[derive(Clone, PartialEq, Eq)]
pub struct Dbm {
    dim: usize,
    data: Box<[Db]>,
}

impl Dbm {
    /// The zone `{0}`: every difference pinned to `<=0`. Tight, consistent.
    pub fn zero(dim: usize) -> Dbm {
        assert!(dim >= 1, "DBM dimension must be at least 1");
        Dbm { dim, data: vec![Db::LE_ZERO; dim * dim].into_boxed_slice() }
    }

    /// All non-negative valuations: `x_i >= 0` for every clock, nothing
    /// else. Tight.
    pub fn universal_positive(dim: usize) -> Dbm {
        let mut dbm = Dbm::zero(dim);
        for i in 1..dim {
            for j in 0..dim {
                if i != j && j != 0 {
                    dbm.set(i, j, Db::INFINITY);
                }
            }
            dbm.set(i, 0, Db::INFINITY);
        }
        dbm
    }

    /// All differences unconstrained (`<∞` off-diagonal, `<=0` diagonal).
    /// Not positive; the start point of the difference-constraint solvers.
    pub fn unconstrained(dim: usize) -> Dbm {
        let mut dbm = Dbm { dim, data: vec![Db::INFINITY; dim * dim].into_boxed_slice() };
        for i in 0..dim {
            dbm.set(i, i, Db::LE_ZERO);
        }
        dbm
    }

    /// Strengthen entry `(i, j)` to `db` if `db` is stronger, without
    /// re-tightening (solver accumulation; call [`Dbm::tighten`] once at the
    /// end).
    #[inline]
    pub fn strengthen(&mut self, i: usize, j: usize, db: Db) {
        if db < self.at(i, j) {
            self.set(i, j, db);
        }
    }

    /// Dimension of the matrix (number of clocks plus one).
    #[inline]
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Row-major view of all entries (lexical comparisons, hashing).
    #[inline]
    pub fn entries(&self) -> &[Db] {
        &self.data
    }

    /// Entry `(i, j)`, bounding `x_i − x_j`.
    #[inline]
    pub fn at(&self, i: usize, j: usize) -> Db {
        debug_assert!(i < self.dim && j < self.dim);
        self.data[i * self.dim + j]
    }

    #[inline]
    fn set(&mut self, i: usize, j: usize, db: Db) {
        debug_assert!(i < self.dim && j < self.dim);
        self.data[i * self.dim + j] = db;
    }

    /// True iff the empty flag is set at `(0,0)`.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data[0] < Db::LE_ZERO
    }

    /// Mark the zone empty. Only `(0,0)` is meaningful afterwards.
    #[inline]
    pub fn set_empty(&mut self) {
        self.data[0] = Db::LT_ZERO;
    }

    /// Consistency check: `<=0` on the whole diagonal.
    pub fn is_consistent(&self) -> bool {
        (0..self.dim).all(|i| self.at(i, i) == Db::LE_ZERO)
    }

    /// Full tightness check, cubic; meant for assertions and tests.
    pub fn is_tight(&self) -> bool {
        for k in 0..self.dim {
            for i in 0..self.dim {
                for j in 0..self.dim {
                    let through = match self.at(i, k).sum(self.at(k, j)) {
                        Ok(db) => db,
                        Err(_) => continue,
                    };
                    if through < self.at(i, j) {
                        return false;
                    }
                }
            }
        }
        true
    }

    /// Positivity check: `d[0,i] <= <=0` for every clock.
    pub fn is_positive(&self) -> bool {
        (1..self.dim).all(|i| self.at(0, i) <= Db::LE_ZERO)
    }

    /// Floyd–Warshall tightening on the `(min, +)` semiring.
    ///
    /// Exits early with [`ZoneStatus::Empty`] as soon as a diagonal entry
    /// goes strictly negative.
    pub fn tighten(&mut self) -> Result<ZoneStatus, DbError> {
        for k in 0..self.dim {
            for i in 0..self.dim {
                let d_ik = self.at(i, k);
                if d_ik.is_infinity() {
                    continue;
                }
                for j in 0..self.dim {
                    let through = d_ik.sum(self.at(k, j))?;
                    if through < self.at(i, j) {
                        self.set(i, j, through);
                    }
                }
                if self.at(i, i) < Db::LE_ZERO {
                    self.set_empty();
                    return Ok(ZoneStatus::Empty);
                }
            }
        }
        Ok(ZoneStatus::NonEmpty)
    }

    /// Incremental re-tightening after entry `(x, y)` has been strengthened.
    /// Propagates paths through the updated pair in O(dim²).
    ///
    /// Expects the matrix to have been tight before `(x, y)` was written.
    fn tighten_from(&mut self, x: usize, y: usize) -> Result<ZoneStatus, DbError> {
        let d_xy = self.at(x, y);
        for i in 0..self.dim {
            let d_ix = self.at(i, x);
            if d_ix.is_infinity() {
                continue;
            }
            let head = d_ix.sum(d_xy)?;
            for j in 0..self.dim {
                let through = head.sum(self.at(y, j))?;
                if through < self.at(i, j) {
                    self.set(i, j, through);
                }
            }
        }
        for i in 0..self.dim {
            if self.at(i, i) < Db::LE_ZERO {
                self.set_empty();
                return Ok(ZoneStatus::Empty);
            }
        }
        Ok(ZoneStatus::NonEmpty)
    }

    /// Intersect with the half-plane `x_i − x_j # value`.
    ///
    /// Expects a tight, consistent matrix. If the proposed bound is not
    /// stronger than the current entry this is a no-op; otherwise the entry
    /// is written and the matrix re-tightened incrementally.
    pub fn constrain(&mut self, i: usize, j: usize, cmp: Ineq, value: i64) -> Result<ZoneStatus, DbError> {
        debug_assert!(i != j);
        let db = Db::new(cmp, value)?;
        if self.at(i, j) <= db {
            return Ok(ZoneStatus::NonEmpty);
        }
        self.set(i, j, db);
        self.tighten_from(i, j)
    }

    /// Reset `x := value` (the special case `x := 0 + value`).
    pub fn reset_to_value(&mut self, x: usize, value: i64) -> Result<(), DbError> {
        self.reset_to_sum(x, 0, value)
    }

    /// Reset `x := y`.
    pub fn reset_to_clock(&mut self, x: usize, y: usize) -> Result<(), DbError> {
        self.reset_to_sum(x, y, 0)
    }

    /// Reset `x := y + value`.
    ///
    /// Replaces row and column `x` by those of `y` shifted by `value`, then
    /// restores the diagonal. Preserves tightness without a full re-tighten.
    pub fn reset_to_sum(&mut self, x: usize, y: usize, value: i64) -> Result<(), DbError> {
        debug_assert!(x > 0 && x < self.dim && y < self.dim);
        if x == y && value == 0 {
            return Ok(());
        }
        let up = Db::le(value)?;
        let down = Db::le(-value)?;
        for k in 0..self.dim {
            if k == x {
                continue;
            }
            let row = self.at(y, k).sum(up)?;
            let col = self.at(k, y).sum(down)?;
            self.set(x, k, row);
            self.set(k, x, col);
        }
        self.set(x, x, Db::LE_ZERO);
        Ok(())
    }

    /// Forward time elapse: drop every upper bound `x_i − 0`. Stays tight.
    pub fn open_up(&mut self) {
        for i in 1..self.dim {
            self.set(i, 0, Db::INFINITY);
        }
    }

    /// Backward time elapse: relax every lower bound `0 − x_i` down to the
    /// weakest bound implied by the difference constraints. Stays tight.
    pub fn open_down(&mut self) {
        for i in 1..self.dim {
            let mut low = Db::LE_ZERO;
            for j in 1..self.dim {
                low = low.min(self.at(j, i));
            }
            self.set(0, i, low);
        }
    }

    /// Entrywise inclusion: `self ⊆ other` iff every bound of `self` is at
    /// least as strong. Both matrices must be tight and of equal dimension.
    pub fn is_le(&self, other: &Dbm) -> bool {
        debug_assert_eq!(self.dim, other.dim);
        self.data.iter().zip(other.data.iter()).all(|(a, b)| a <= b)
    }

    /// Zone equality on tight matrices.
    #[inline]
    pub fn is_eq(&self, other: &Dbm) -> bool {
        self == other
    }

    /// Order-sensitive mixing of all entries; stable across equal DBMs and
    /// across platforms.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"zonecheck.dbm.v1");
        hasher.update(&(self.dim as u64).to_le_bytes());
        for db in self.data.iter() {
            db.absorb_into(&mut hasher);
        }
        let mut out = [0u8; 8];
        hasher.finalize_xof().fill(&mut out);
        u64::from_le_bytes(out)
    }

    /// Render the zone as a conjunction of difference constraints over the
    /// given clock names (`names[0]` is unused).
    pub fn write_constraints(&self, f: &mut impl fmt::Write, names: &[String]) -> fmt::Result {
        debug_assert_eq!(names.len(), self.dim);
        if self.is_empty() {
            return f.write_str("false");
        }
        let mut first = true;
        let mut sep = |f: &mut dyn fmt::Write, first: &mut bool| -> fmt::Result {
            if !*first {
                f.write_str(" && ")?;
            }
            *first = false;
            Ok(())
        };
        for i in 0..self.dim {
            for j in 0..self.dim {
                if i == j {
                    continue;
                }
                let db = self.at(i, j);
                if db.is_infinity() {
                    continue;
                }
                sep(f, &mut first)?;
                if i == 0 {
                    // 0 − x_j # c, printed as a lower bound on x_j.
                    let rev = match db.cmp_kind() {
                        Ineq::Le => ">=",
                        Ineq::Lt => ">",
                    };
                    write!(f, "{}{}{}", names[j], rev, -db.value())?;
                } else if j == 0 {
                    write!(f, "{}{}{}", names[i], db.cmp_kind().as_str(), db.value())?;
                } else {
                    write!(f, "{}-{}{}{}", names[i], names[j], db.cmp_kind().as_str(), db.value())?;
                }
            }
        }
        if first {
            f.write_str("true")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Dbm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Dbm(dim={})", self.dim)?;
        for i in 0..self.dim {
            let row: Vec<String> = (0..self.dim).map(|j| self.at(i, j).to_string()).collect();
            writeln!(f, "  [{}]", row.join(", "))?;
        }
        Ok(())
    }
}

// ===============================================================================================
// Extrapolation
// ===============================================================================================

/// `(<=, bound)` treated with `NO_BOUND` as −∞: every finite db exceeds it.
#[inline]
fn exceeds_le_bound(db: Db, bound: Bound) -> bool {
    if db.is_infinity() {
        // `<∞` entries are already as weak as possible.
        return false;
    }
    if bound == NO_BOUND {
        return true;
    }
    // db > (<=, bound) iff value > bound.
    (db.value() as i64) > bound
}

/// `db < (<, −bound)` with `NO_BOUND` as −∞ (so `(<, −bound)` is `<∞` and
/// every finite db is below it).
#[inline]
fn below_minus_bound(db: Db, bound: Bound) -> bool {
    if bound == NO_BOUND {
        return !db.is_infinity();
    }
    if db.is_infinity() {
        return false;
    }
    // (cmp, v) < (<, −bound) iff v < −bound: at equal values `<` is already
    // the strongest comparator.
    (db.value() as i64) < -bound
}

/// `(<, −bound)` as a [`Db`], for finite `bound`.
#[inline]
fn lt_minus(bound: Bound) -> Result<Db, DbError> {
    Db::lt(-bound)
}

impl Dbm {
    /// `ExtraM`: relax every bound beyond the maximal constants `m`.
    ///
    /// `m` is indexed like the matrix (`m[0]` ignored). Expects a tight,
    /// consistent, non-empty matrix; returns a tight over-approximation.
    pub fn extra_m(&mut self, m: &[Bound]) -> Result<(), DbError> {
        self.extra_lu(m, m)
    }

    /// `ExtraM+`: the diagonal refinement of [`Dbm::extra_m`].
    pub fn extra_m_plus(&mut self, m: &[Bound]) -> Result<(), DbError> {
        self.extra_lu_plus(m, m)
    }

    /// `ExtraLU`: relax upper bounds beyond `l` and lower bounds beyond `u`.
    ///
    /// For all `i ≠ j`:
    /// - `d[i,j] := <∞` if `d[i,j] > (<=, L(i))`
    /// - `d[i,j] := (<, −U(j))` if `d[i,j] < (<, −U(j))`
    pub fn extra_lu(&mut self, l: &[Bound], u: &[Bound]) -> Result<(), DbError> {
        debug_assert!(l.len() == self.dim && u.len() == self.dim);
        debug_assert!(!self.is_empty());
        for i in 0..self.dim {
            for j in 0..self.dim {
                if i == j {
                    continue;
                }
                let db = self.at(i, j);
                if i > 0 && exceeds_le_bound(db, l[i]) {
                    self.set(i, j, Db::INFINITY);
                } else if j > 0 && below_minus_bound(db, u[j]) {
                    let relaxed = if u[j] == NO_BOUND { Db::INFINITY } else { lt_minus(u[j])? };
                    self.set(i, j, relaxed);
                }
            }
        }
        let status = self.tighten()?;
        debug_assert!(status.is_non_empty());
        Ok(())
    }

    /// `ExtraLU+`: like `ExtraLU` but also drops entries whose row or column
    /// clock is already beyond its bound in the zone itself.
    ///
    /// For all `i ≠ j`:
    /// - `d[i,j] := <∞` if `d[i,j] > (<=, L(i))`
    /// - `d[i,j] := <∞` if `d[0,i] < (<, −L(i))`
    /// - `d[i,j] := <∞` if `d[0,j] < (<, −U(j))` and `i ≠ 0`
    /// - `d[0,j] := (<, −U(j))` if `d[0,j] < (<, −U(j))`
    pub fn extra_lu_plus(&mut self, l: &[Bound], u: &[Bound]) -> Result<(), DbError> {
        debug_assert!(l.len() == self.dim && u.len() == self.dim);
        debug_assert!(!self.is_empty());
        // Row 0 is read throughout; snapshot it before relaxing anything.
        let row0: Vec<Db> = (0..self.dim).map(|j| self.at(0, j)).collect();
        for i in 0..self.dim {
            for j in 0..self.dim {
                if i == j {
                    continue;
                }
                let db = self.at(i, j);
                if i > 0 && exceeds_le_bound(db, l[i]) {
                    self.set(i, j, Db::INFINITY);
                } else if i > 0 && below_minus_bound(row0[i], l[i]) {
                    self.set(i, j, Db::INFINITY);
                } else if i > 0 && j > 0 && below_minus_bound(row0[j], u[j]) {
                    self.set(i, j, Db::INFINITY);
                } else if i == 0 && below_minus_bound(db, u[j]) {
                    let relaxed = if u[j] == NO_BOUND { Db::INFINITY } else { lt_minus(u[j])? };
                    self.set(0, j, relaxed);
                }
            }
        }
        let status = self.tighten()?;
        debug_assert!(status.is_non_empty());
        Ok(())
    }
}

// ===============================================================================================
// Subsumption
// ===============================================================================================

impl Dbm {
    /// `self ⊆ aLU(other)` without building the abstraction (Herbreteau,
    /// Srivathsan, Walukiewicz, LICS'12).
    ///
    /// Not included iff there exist clocks `x ≠ y` with:
    /// - `x == 0` or `(<=, −U(x)) <= self[0,x]`
    /// - `other[y,x] < self[y,x]`
    /// - `y == 0` or `other[y,x] + (<, −L(y)) < self[0,x]`
    ///
    /// Both matrices must be tight and non-empty; `l`/`u` are matrix-indexed.
    pub fn is_alu_le(&self, other: &Dbm, l: &[Bound], u: &[Bound]) -> bool {
        debug_assert_eq!(self.dim, other.dim);
        debug_assert!(l.len() == self.dim && u.len() == self.dim);
        for x in 0..self.dim {
            if x != 0 {
                // Clock x is only relevant below its upper-bound constant.
                if u[x] == NO_BOUND {
                    continue;
                }
                // (<=, -u[x]) <= self[0,x]? Row 0 entries are finite on
                // positive zones; an infinite entry trivially satisfies it.
                let v = self.at(0, x);
                if !v.is_infinity() {
                    let ok = -u[x] < v.value() as i64
                        || (-u[x] == v.value() as i64 && v.cmp_kind() == Ineq::Le);
                    if !ok {
                        continue;
                    }
                }
            }
            for y in 0..self.dim {
                if x == y {
                    continue;
                }
                if other.at(y, x) >= self.at(y, x) {
                    continue;
                }
                if y != 0 {
                    if l[y] == NO_BOUND {
                        continue;
                    }
                    // other[y,x] + (<, -l[y]) < self[0,x]?
                    let oyx = other.at(y, x);
                    let shifted = if oyx.is_infinity() {
                        Db::INFINITY
                    } else {
                        match oyx.sum(match Db::lt(-l[y]) {
                            Ok(db) => db,
                            Err(_) => continue,
                        }) {
                            Ok(db) => db,
                            Err(_) => continue,
                        }
                    };
                    if !(shifted < self.at(0, x)) {
                        continue;
                    }
                }
                return false;
            }
        }
        true
    }

    /// `self ⊆ aM(other)`: the M-simulation test, aLU with `L = U = M`.
    #[inline]
    pub fn is_am_le(&self, other: &Dbm, m: &[Bound]) -> bool {
        self.is_alu_le(other, m, m)
    }
}
