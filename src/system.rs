//! Compiled system model
//!
//! Turns a parsed [`SystemDecl`](crate::syntax::SystemDecl) into the
//! id-indexed model the semantics layers work on: processes, events and
//! labels interned to small integers, integer variables and clocks flattened
//! (arrays to consecutive cells), locations and edges with type-checked
//! invariants, guards and statements, and the synchronization vectors with
//! their weak/mandatory strengths.
//!
//! All static well-formedness checks run here. The one with teeth: a weakly
//! synchronized event must carry no guard on any edge labeled with it, since
//! a guarded weak participant could silently drop out of a sync and change
//! the semantics.

use bitvec::vec::BitVec;
use rustc_hash::FxHashMap;

use crate::expr::{
    typecheck_guard, typecheck_stmt, ClockInfo, IntVarInfo, Symbols, TypeError, TypedGuard,
    TypedStmt,
};
use crate::report::Reporter;
use crate::syntax::SystemDecl;

/// Process identifier.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessId(pub usize);
/// Event identifier.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventId(pub usize);
/// Location identifier (global, across processes).
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LocId(pub usize);
/// Edge identifier.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EdgeId(pub usize);
/// Label identifier.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LabelId(pub usize);

impl ProcessId {
    #[inline]
    pub fn as_usize(self) -> usize {
        self.0
    }
}
impl EventId {
    #[inline]
    pub fn as_usize(self) -> usize {
        self.0
    }
}
impl LocId {
    #[inline]
    pub fn as_usize(self) -> usize {
        self.0
    }
}
impl EdgeId {
    #[inline]
    pub fn as_usize(self) -> usize {
        self.0
    }
}
impl LabelId {
    #[inline]
    pub fn as_usize(self) -> usize {
        self.0
    }
}

/// System construction failure.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("line {line}: duplicate {kind} `{name}`")]
    Duplicate { kind: &'static str, name: String, line: usize },
    #[error("line {line}: unknown {kind} `{name}`")]
    Unknown { kind: &'static str, name: String, line: usize },
    #[error("line {line}: process `{name}` appears twice in synchronization")]
    SyncDuplicateProcess { name: String, line: usize },
    #[error("weakly synchronized event has a guard (process `{process}`, event `{event}`)")]
    WeakSyncGuard { process: String, event: String },
    #[error("line {line}: {source}")]
    Type {
        line: usize,
        #[source]
        source: TypeError,
    },
}

/// A location of one process.
#[derive(Debug)]
pub struct Location {
    pub id: LocId,
    pub pid: ProcessId,
    pub name: String,
    pub initial: bool,
    pub committed: bool,
    pub urgent: bool,
    pub invariant: TypedGuard,
    /// Labels as a bitset over the global label index.
    pub labels: BitVec,
}

/// An edge of one process.
#[derive(Debug)]
pub struct Edge {
    pub id: EdgeId,
    pub pid: ProcessId,
    pub src: LocId,
    pub tgt: LocId,
    pub event: EventId,
    pub guard: TypedGuard,
    /// The edge declaration carried a `provided:` attribute.
    pub has_guard: bool,
    pub stmt: TypedStmt,
    pub local_slots: usize,
}

/// Participation strength in a synchronization.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SyncStrength {
    Mandatory,
    Weak,
}

/// One `process@event` constraint of a synchronization vector.
#[derive(Copy, Clone, Debug)]
pub struct SyncConstraint {
    pub pid: ProcessId,
    pub event: EventId,
    pub strength: SyncStrength,
}

/// A multiparty synchronization vector.
#[derive(Debug)]
pub struct Sync {
    pub constraints: Vec<SyncConstraint>,
}

/// A declared integer variable with its flattened layout.
#[derive(Debug)]
pub struct IntVar {
    pub name: String,
    pub size: u32,
    pub min: i32,
    pub max: i32,
    pub init: i32,
    /// First cell in the flattened valuation.
    pub base: usize,
}

/// A declared clock with its flattened layout; `base` is a DBM index.
#[derive(Debug)]
pub struct Clock {
    pub name: String,
    pub size: u32,
    pub base: usize,
}

/// The compiled system.
#[derive(Debug)]
pub struct System {
    pub name: String,
    processes: Vec<String>,
    events: Vec<String>,
    labels: Vec<String>,
    intvars: Vec<IntVar>,
    locations: Vec<Location>,
    edges: Vec<Edge>,
    syncs: Vec<Sync>,
    /// Initial flattened integer valuation.
    initial_intval: Vec<i32>,
    /// Flattened clock count (DBM dimension minus one).
    clock_count: usize,
    /// Flattened clock names indexed by DBM index; entry 0 is `"0"`.
    clock_names: Vec<String>,
    /// Outgoing edges per location.
    outgoing: Vec<Vec<EdgeId>>,
    /// Initial locations per process.
    initial_locs: Vec<Vec<LocId>>,
    /// `(pid, event)` pairs that appear in at least one synchronization.
    synchronized: FxHashMap<(usize, usize), ()>,
    /// Edges per `(pid, event)`, for sync instantiation.
    edges_by_event: FxHashMap<(usize, usize), Vec<EdgeId>>,
    symbols: Symbols,
}

impl System {
    /// Compile a parsed declaration, reporting warnings through `reporter`.
    pub fn build(decl: &SystemDecl, reporter: &mut Reporter) -> Result<System, BuildError> {
        let mut b = Builder::default();
        b.intern_names(decl)?;
        b.layout_variables(decl)?;
        b.build_locations(decl)?;
        b.build_edges(decl)?;
        b.build_syncs(decl)?;
        let sys = b.finish(decl);
        sys.check_weak_sync_guards()?;
        for (p, name) in sys.processes.iter().enumerate() {
            if sys.initial_locs[p].is_empty() {
                reporter.warning(format_args!(
                    "process `{name}` has no initial location, system has no initial state"
                ));
            }
        }
        Ok(sys)
    }

    pub fn process_count(&self) -> usize {
        self.processes.len()
    }

    pub fn process_name(&self, p: ProcessId) -> &str {
        &self.processes[p.0]
    }

    pub fn event_name(&self, e: EventId) -> &str {
        &self.events[e.0]
    }

    pub fn label_count(&self) -> usize {
        self.labels.len()
    }

    pub fn location(&self, l: LocId) -> &Location {
        &self.locations[l.0]
    }

    pub fn locations(&self) -> &[Location] {
        &self.locations
    }

    pub fn edge(&self, e: EdgeId) -> &Edge {
        &self.edges[e.0]
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn syncs(&self) -> &[Sync] {
        &self.syncs
    }

    pub fn outgoing(&self, l: LocId) -> &[EdgeId] {
        &self.outgoing[l.0]
    }

    /// Initial locations of process `p`, in declaration order.
    pub fn initial_locations(&self, p: ProcessId) -> &[LocId] {
        &self.initial_locs[p.0]
    }

    pub fn initial_intval(&self) -> &[i32] {
        &self.initial_intval
    }

    /// Flattened clock count; the DBM dimension is this plus one.
    pub fn clock_count(&self) -> usize {
        self.clock_count
    }

    /// Clock names indexed by DBM index (entry 0 is the zero clock).
    pub fn clock_names(&self) -> &[String] {
        &self.clock_names
    }

    pub fn symbols(&self) -> &Symbols {
        &self.symbols
    }

    /// Is `(pid, event)` bound by some synchronization vector?
    pub fn is_synchronized(&self, pid: ProcessId, event: EventId) -> bool {
        self.synchronized.contains_key(&(pid.0, event.0))
    }

    /// Edges of process `pid` labeled `event` (any source location).
    pub fn edges_for(&self, pid: ProcessId, event: EventId) -> &[EdgeId] {
        self.edges_by_event.get(&(pid.0, event.0)).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Resolve a comma-separated label list. Undeclared names come back in
    /// the second component so the caller can decide (an accepting set with
    /// an undeclared label is simply never satisfied).
    pub fn resolve_labels(&self, csv: &str) -> (BitVec, Vec<String>) {
        let mut set = BitVec::repeat(false, self.labels.len());
        let mut unknown = Vec::new();
        for name in csv.split(',') {
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            match self.labels.iter().position(|l| l.as_str() == name) {
                Some(i) => set.set(i, true),
                None => unknown.push(name.to_string()),
            }
        }
        (set, unknown)
    }

    /// Render a location tuple as `<l0,l1,...>`.
    pub fn vloc_string(&self, vloc: &[LocId]) -> String {
        let names: Vec<&str> = vloc.iter().map(|&l| self.location(l).name.as_str()).collect();
        format!("<{}>", names.join(","))
    }

    /// Render the flattened integer valuation as `i=0,j=1`.
    pub fn intval_string(&self, intval: &[i32]) -> String {
        let mut parts = Vec::new();
        for var in &self.intvars {
            if var.size == 1 {
                parts.push(format!("{}={}", var.name, intval[var.base]));
            } else {
                for k in 0..var.size as usize {
                    parts.push(format!("{}[{}]={}", var.name, k, intval[var.base + k]));
                }
            }
        }
        parts.join(",")
    }

    fn check_weak_sync_guards(&self) -> Result<(), BuildError> {
        for sync in &self.syncs {
            for c in &sync.constraints {
                if c.strength != SyncStrength::Weak {
                    continue;
                }
                for &eid in self.edges_for(c.pid, c.event) {
                    if self.edge(eid).has_guard {
                        return Err(BuildError::WeakSyncGuard {
                            process: self.processes[c.pid.0].clone(),
                            event: self.events[c.event.0].clone(),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

// ===============================================================================================
// Builder
// ===============================================================================================

#[derive(Default)]
struct Builder {
    processes: Vec<String>,
    process_ids: FxHashMap<String, usize>,
    events: Vec<String>,
    event_ids: FxHashMap<String, usize>,
    labels: Vec<String>,
    label_ids: FxHashMap<String, usize>,
    intvars: Vec<IntVar>,
    clocks: Vec<Clock>,
    initial_intval: Vec<i32>,
    clock_count: usize,
    symbols: Symbols,
    locations: Vec<Location>,
    loc_ids: FxHashMap<(usize, String), usize>,
    edges: Vec<Edge>,
    syncs: Vec<Sync>,
}

impl Builder {
    fn intern_names(&mut self, decl: &SystemDecl) -> Result<(), BuildError> {
        for ev in &decl.events {
            if self.event_ids.insert(ev.name.clone(), self.events.len()).is_some() {
                return Err(BuildError::Duplicate { kind: "event", name: ev.name.clone(), line: ev.line });
            }
            self.events.push(ev.name.clone());
        }
        for p in &decl.processes {
            if self.process_ids.insert(p.name.clone(), self.processes.len()).is_some() {
                return Err(BuildError::Duplicate {
                    kind: "process",
                    name: p.name.clone(),
                    line: p.line,
                });
            }
            self.processes.push(p.name.clone());
        }
        // Labels are interned on first use, in declaration order.
        for loc in &decl.locations {
            for label in &loc.attrs.labels {
                if !self.label_ids.contains_key(label) {
                    self.label_ids.insert(label.clone(), self.labels.len());
                    self.labels.push(label.clone());
                }
            }
        }
        Ok(())
    }

    fn layout_variables(&mut self, decl: &SystemDecl) -> Result<(), BuildError> {
        for iv in &decl.intvars {
            if self.symbols.intvars.contains_key(&iv.name) {
                return Err(BuildError::Duplicate { kind: "int", name: iv.name.clone(), line: iv.line });
            }
            let base = self.initial_intval.len();
            self.symbols.intvars.insert(
                iv.name.clone(),
                IntVarInfo { base, size: iv.size, min: iv.min, max: iv.max },
            );
            self.intvars.push(IntVar {
                name: iv.name.clone(),
                size: iv.size,
                min: iv.min,
                max: iv.max,
                init: iv.init,
                base,
            });
            for _ in 0..iv.size {
                self.initial_intval.push(iv.init);
            }
        }
        for ck in &decl.clocks {
            if self.symbols.clocks.contains_key(&ck.name) {
                return Err(BuildError::Duplicate {
                    kind: "clock",
                    name: ck.name.clone(),
                    line: ck.line,
                });
            }
            let base = 1 + self.clock_count;
            self.symbols.clocks.insert(ck.name.clone(), ClockInfo { base, size: ck.size });
            self.clocks.push(Clock { name: ck.name.clone(), size: ck.size, base });
            self.clock_count += ck.size as usize;
        }
        Ok(())
    }

    fn pid(&self, name: &str, line: usize) -> Result<ProcessId, BuildError> {
        self.process_ids
            .get(name)
            .map(|&i| ProcessId(i))
            .ok_or_else(|| BuildError::Unknown { kind: "process", name: name.to_string(), line })
    }

    fn event(&self, name: &str, line: usize) -> Result<EventId, BuildError> {
        self.event_ids
            .get(name)
            .map(|&i| EventId(i))
            .ok_or_else(|| BuildError::Unknown { kind: "event", name: name.to_string(), line })
    }

    fn build_locations(&mut self, decl: &SystemDecl) -> Result<(), BuildError> {
        for loc in &decl.locations {
            let pid = self.pid(&loc.process, loc.line)?;
            let key = (pid.0, loc.name.clone());
            if self.loc_ids.contains_key(&key) {
                return Err(BuildError::Duplicate {
                    kind: "location",
                    name: format!("{}:{}", loc.process, loc.name),
                    line: loc.line,
                });
            }
            let invariant = match &loc.attrs.invariant {
                Some(expr) => typecheck_guard(expr, &self.symbols)
                    .map_err(|source| BuildError::Type { line: loc.line, source })?,
                None => TypedGuard::default(),
            };
            let mut labels = BitVec::repeat(false, self.labels.len());
            for label in &loc.attrs.labels {
                labels.set(self.label_ids[label], true);
            }
            let id = LocId(self.locations.len());
            self.loc_ids.insert(key, id.0);
            self.locations.push(Location {
                id,
                pid,
                name: loc.name.clone(),
                initial: loc.attrs.initial,
                committed: loc.attrs.committed,
                urgent: loc.attrs.urgent,
                invariant,
                labels,
            });
        }
        Ok(())
    }

    fn loc(&self, pid: ProcessId, name: &str, line: usize) -> Result<LocId, BuildError> {
        self.loc_ids
            .get(&(pid.0, name.to_string()))
            .map(|&i| LocId(i))
            .ok_or_else(|| BuildError::Unknown { kind: "location", name: name.to_string(), line })
    }

    fn build_edges(&mut self, decl: &SystemDecl) -> Result<(), BuildError> {
        for edge in &decl.edges {
            let pid = self.pid(&edge.process, edge.line)?;
            let src = self.loc(pid, &edge.src, edge.line)?;
            let tgt = self.loc(pid, &edge.tgt, edge.line)?;
            let event = self.event(&edge.event, edge.line)?;
            let has_guard = edge.attrs.provided.is_some();
            let guard = match &edge.attrs.provided {
                Some(expr) => typecheck_guard(expr, &self.symbols)
                    .map_err(|source| BuildError::Type { line: edge.line, source })?,
                None => TypedGuard::default(),
            };
            let (stmt, local_slots) = match &edge.attrs.do_stmt {
                Some(s) => typecheck_stmt(s, &self.symbols)
                    .map_err(|source| BuildError::Type { line: edge.line, source })?,
                None => (TypedStmt::Nop, 0),
            };
            self.edges.push(Edge {
                id: EdgeId(self.edges.len()),
                pid,
                src,
                tgt,
                event,
                guard,
                has_guard,
                stmt,
                local_slots,
            });
        }
        Ok(())
    }

    fn build_syncs(&mut self, decl: &SystemDecl) -> Result<(), BuildError> {
        for sync in &decl.syncs {
            let mut constraints = Vec::new();
            let mut seen = FxHashMap::default();
            for item in &sync.items {
                let pid = self.pid(&item.process, sync.line)?;
                let event = self.event(&item.event, sync.line)?;
                if seen.insert(pid.0, ()).is_some() {
                    return Err(BuildError::SyncDuplicateProcess {
                        name: item.process.clone(),
                        line: sync.line,
                    });
                }
                constraints.push(SyncConstraint {
                    pid,
                    event,
                    strength: if item.weak { SyncStrength::Weak } else { SyncStrength::Mandatory },
                });
            }
            self.syncs.push(Sync { constraints });
        }
        Ok(())
    }

    fn finish(self, decl: &SystemDecl) -> System {
        let mut outgoing = vec![Vec::new(); self.locations.len()];
        let mut edges_by_event: FxHashMap<(usize, usize), Vec<EdgeId>> = FxHashMap::default();
        for edge in &self.edges {
            outgoing[edge.src.0].push(edge.id);
            edges_by_event.entry((edge.pid.0, edge.event.0)).or_default().push(edge.id);
        }
        let mut initial_locs = vec![Vec::new(); self.processes.len()];
        for loc in &self.locations {
            if loc.initial {
                initial_locs[loc.pid.0].push(loc.id);
            }
        }
        let mut synchronized = FxHashMap::default();
        for sync in &self.syncs {
            for c in &sync.constraints {
                synchronized.insert((c.pid.0, c.event.0), ());
            }
        }
        let mut clock_names = vec!["0".to_string()];
        for ck in &self.clocks {
            if ck.size == 1 {
                clock_names.push(ck.name.clone());
            } else {
                for k in 0..ck.size {
                    clock_names.push(format!("{}[{}]", ck.name, k));
                }
            }
        }
        System {
            name: decl.name.clone(),
            processes: self.processes,
            events: self.events,
            labels: self.labels,
            intvars: self.intvars,
            locations: self.locations,
            edges: self.edges,
            syncs: self.syncs,
            initial_intval: self.initial_intval,
            clock_count: self.clock_count,
            clock_names,
            outgoing,
            initial_locs,
            synchronized,
            edges_by_event,
            symbols: self.symbols,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse_system;

    fn build(input: &str) -> Result<System, BuildError> {
        let decl = parse_system(input).unwrap();
        System::build(&decl, &mut Reporter::quiet())
    }

    const BASE: &str = "\
system:s
event:a
event:b
process:P
process:Q
int:1:0:5:0:i
clock:1:x
location:P:l0{initial:}
location:P:l1{labels: goal}
location:Q:m0{initial: , urgent:}
edge:P:l0:l1:a{provided: x<3 && i==0 , do: i=i+1}
edge:Q:m0:m0:b
";

    #[test]
    fn builds_and_indexes() {
        let sys = build(BASE).unwrap();
        assert_eq!(sys.process_count(), 2);
        assert_eq!(sys.clock_count(), 1);
        assert_eq!(sys.label_count(), 1);
        assert_eq!(sys.initial_intval(), &[0]);
        assert_eq!(sys.initial_locations(ProcessId(0)), &[LocId(0)]);
        let edge = sys.edge(EdgeId(0));
        assert_eq!(edge.guard.clock.len(), 1);
        assert!(edge.guard.int.is_some());
        assert!(sys.location(LocId(2)).urgent);
        assert_eq!(sys.vloc_string(&[LocId(0), LocId(2)]), "<l0,m0>");
        assert_eq!(sys.intval_string(&[3]), "i=3");
    }

    #[test]
    fn duplicate_and_unknown_names() {
        assert!(matches!(
            build("system:s\nevent:a\nevent:a\n"),
            Err(BuildError::Duplicate { kind: "event", .. })
        ));
        assert!(matches!(
            build("system:s\nevent:a\nprocess:P\nlocation:P:l0\nedge:P:l0:l1:a\n"),
            Err(BuildError::Unknown { kind: "location", .. })
        ));
        assert!(matches!(
            build("system:s\nevent:a\nprocess:P\nlocation:Q:l0\n"),
            Err(BuildError::Unknown { kind: "process", .. })
        ));
    }

    #[test]
    fn weak_sync_guard_is_rejected() {
        let input = "\
system:s
event:a1
event:a2
process:P1
process:P2
int:1:1:1:1:i1
location:P1:l0{initial:}
location:P1:l1
edge:P1:l0:l1:a1{provided: i1>0}
location:P2:l0{initial:}
location:P2:l1
edge:P2:l0:l1:a2
sync:P1@a1?:P2@a2
";
        let err = build(input).unwrap_err();
        assert!(err.to_string().contains("weakly synchronized event has a guard"));
        // The same sync with mandatory strength is fine.
        let ok = input.replace("P1@a1?", "P1@a1");
        assert!(build(&ok).is_ok());
    }

    #[test]
    fn sync_rejects_duplicate_process() {
        let input = "\
system:s
event:a
process:P
process:Q
location:P:l0{initial:}
location:Q:m0{initial:}
sync:P@a:P@a
";
        assert!(matches!(build(input), Err(BuildError::SyncDuplicateProcess { .. })));
    }

    #[test]
    fn missing_initial_location_warns() {
        let decl = parse_system("system:s\nprocess:P\nlocation:P:l0\n").unwrap();
        let mut reporter = Reporter::quiet();
        let sys = System::build(&decl, &mut reporter).unwrap();
        assert_eq!(reporter.warning_count(), 1);
        assert!(sys.initial_locations(ProcessId(0)).is_empty());
    }

    #[test]
    fn labels_resolution() {
        let sys = build(BASE).unwrap();
        let (set, unknown) = sys.resolve_labels("goal,missing");
        assert_eq!(set.count_ones(), 1);
        assert_eq!(unknown, vec!["missing".to_string()]);
    }

    #[test]
    fn flattened_arrays() {
        let sys = build(
            "system:s\nprocess:P\nint:3:0:9:1:t\nclock:2:c\nlocation:P:l0{initial: , invariant: c[0]<=5}\n",
        )
        .unwrap();
        assert_eq!(sys.initial_intval(), &[1, 1, 1]);
        assert_eq!(sys.clock_count(), 2);
        assert_eq!(sys.clock_names(), &["0", "c[0]", "c[1]"]);
    }
}
