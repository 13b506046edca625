//! Crate root: public surface and tool-wide invariants
//!
//! `zonecheck` is a model checker for networks of timed automata with
//! bounded integer variables and multiparty synchronization. It decides
//! label reachability by exploring a finite symbolic quotient of the
//! infinite concrete semantics: zones represented as difference-bound
//! matrices, widened by an extrapolation operator and pruned by a
//! subsumption relation.
//!
//! ## Invariants (tool-wide)
//!
//! - **Canonical zones.** Every [`dbm::Dbm`] crossing a module boundary is
//!   tight and consistent, or flagged empty. Equal zones are entrywise
//!   equal, so zone equality, hashing and inclusion are entrywise
//!   operations.
//! - **Checked bound arithmetic.** Difference bounds ([`db::Db`]) refuse to
//!   wrap: an overflowing sum is a hard error that aborts the search
//!   cleanly, never an undefined zone.
//! - **Statuses are not errors.** A transition whose guard, invariant or
//!   reset kills the zone reports a [`ta::StateStatus`]; the search counts
//!   it and moves on. Only arithmetic overflow and resource exhaustion
//!   propagate.
//! - **Deterministic output.** Fingerprints are BLAKE3-based and platform
//!   independent; graph output sorts nodes and edges lexically. Identical
//!   input and configuration give byte-identical stats and DOT output.
//! - **Detached destruction.** Discarded states are released through the
//!   collector thread ([`store::Gc`]); the search loop never runs
//!   non-trivial destructors.
//!
//! We forbid `unsafe` throughout the crate.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

/// Difference bounds `<c` / `<=c` with checked arithmetic.
pub mod db;
/// DBM algebra: canonical zones, extrapolation, subsumption.
pub mod dbm;
/// Per-location L/U/M clock bounds (extrapolation parameters).
pub mod clockbounds;
/// Untyped syntax trees and declaration records.
pub mod syntax;
/// Parser for the system description language.
pub mod parse;
/// Typed expressions/statements, interpreter, static analyses.
pub mod expr;
/// Compiled system model with static well-formedness checks.
pub mod system;
/// Discrete semantics of the network (synchronization, committed/urgent).
pub mod ta;
/// The zone-graph symbolic transition system.
pub mod zg;
/// Sharing store and the background release worker.
pub mod store;
/// Fingerprint-keyed node index.
pub mod index;
/// Waiting containers (LIFO/FIFO) with covered-filtering.
pub mod waiting;
/// Reachability graph kept for certificate output.
pub mod graph;
/// The covering reachability algorithm.
pub mod covreach;
/// Plain state-space enumeration.
pub mod explore;
/// Configuration enums for the CLI surface.
pub mod options;
/// User-facing diagnostics with error/warning totals.
pub mod report;

pub use crate::covreach::{CovReachConfig, CoveringPolicy, Outcome, Stats};
pub use crate::options::{Certificate, ConfigurationError, CoverSpec, ModelSpec, SearchOrder};
pub use crate::report::Reporter;
pub use crate::system::System;
pub use crate::zg::{CheckError, ExtrapolationKind, Semantics, State, Step, ZoneGraph};
