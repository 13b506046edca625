//! End-to-end scenarios over the full pipeline: parse, build, run the
//! covering reachability algorithm, check outcomes, stats and output
//! stability.

use std::fmt::Write as _;
use std::sync::Arc;

use zonecheck::covreach::{self, CovReachConfig, Outcome, Stats};
use zonecheck::graph::Graph;
use zonecheck::options::{CoverSpec, ModelSpec, SearchOrder};
use zonecheck::parse::parse_system;
use zonecheck::report::Reporter;
use zonecheck::store::Gc;
use zonecheck::system::{BuildError, System};
use zonecheck::zg::{CheckError, ZoneGraph};

fn covreach_run(
    input: &str,
    model: &str,
    cover: &str,
    labels: &str,
    order: SearchOrder,
) -> Result<(Outcome, Stats, Graph, ZoneGraph), CheckError> {
    let decl = parse_system(input).expect("scenario input parses");
    let mut reporter = Reporter::quiet();
    let sys = Arc::new(System::build(&decl, &mut reporter).expect("scenario input builds"));
    let spec: ModelSpec = model.parse().unwrap();
    let cover: CoverSpec = cover.parse().unwrap();
    let mut zg = ZoneGraph::new(sys, spec.semantics, spec.extrapolation, true, &mut reporter);
    let gc = Gc::start();
    let config = CovReachConfig {
        labels: labels.to_string(),
        search_order: order,
        cover,
        ..CovReachConfig::default()
    };
    let (outcome, stats, graph) = covreach::run(&mut zg, &config, &gc, &mut reporter)?;
    Ok((outcome, stats, graph, zg))
}

fn dot_of(graph: &Graph, zg: &ZoneGraph) -> String {
    let mut out = String::new();
    graph.dot_output(zg, "test", &mut out);
    out
}

// Scenario: a single unconstrained clock and no accepting label in the
// system. Any label query answers false after storing just the initial
// state.
#[test]
fn single_clock_no_bound() {
    let input = "\
system:s
clock:1:x
process:P
location:P:l0{initial:}
";
    let (outcome, stats, _, _) = covreach_run(
        input,
        "zg:elapsed:extraLU+l",
        "inclusion",
        "foo",
        SearchOrder::Bfs,
    )
    .unwrap();
    assert_eq!(outcome, Outcome::NotReachable);
    assert_eq!(stats.stored_nodes, 1);
}

// Scenario: guarded one-shot edge under an invariant.
#[test]
fn guarded_one_shot() {
    let input = "\
system:oneshot
event:a
process:P
clock:1:x
location:P:l0{initial: , invariant: x<=5}
location:P:l1{labels: at_l1}
edge:P:l0:l1:a{provided: x<3}
";
    for model in ["zg:elapsed:extraLU+l", "zg:standard:extraMg", "zg:elapsed:NOextra"] {
        for cover in ["inclusion", "alu_l", "am_g"] {
            let (outcome, stats, _, _) =
                covreach_run(input, model, cover, "at_l1", SearchOrder::Bfs).unwrap();
            assert_eq!(outcome, Outcome::Reachable, "{model} {cover}");
            assert_eq!(stats.stored_nodes, 2, "{model} {cover}");
        }
    }
}

// Scenario: a guard on a weakly synchronized event is a load-time error.
#[test]
fn weak_sync_guard_rejected_at_load() {
    let input = "\
system:weak
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
    let decl = parse_system(input).unwrap();
    let err = System::build(&decl, &mut Reporter::quiet()).unwrap_err();
    assert!(matches!(err, BuildError::WeakSyncGuard { .. }));
    assert!(err.to_string().contains("weakly synchronized event has a guard"));
}

// Five philosophers, forks as processes synchronizing on take/put events.
// The joint state where everyone holds their left fork carries all five
// `d<i>` labels at once.
fn philosophers_model() -> String {
    let n = 5;
    let mut m = String::new();
    let _ = writeln!(m, "system:philo");
    for i in 0..n {
        let _ = writeln!(m, "event:t{i}");
        let _ = writeln!(m, "event:p{i}");
    }
    for i in 0..n {
        let right = (i + 1) % n;
        let _ = writeln!(m, "process:P{i}");
        let _ = writeln!(m, "location:P{i}:thinking{{initial:}}");
        let _ = writeln!(m, "location:P{i}:hungry{{labels: d{i}}}");
        let _ = writeln!(m, "location:P{i}:eating");
        let _ = writeln!(m, "location:P{i}:dropping");
        let _ = writeln!(m, "edge:P{i}:thinking:hungry:t{i}");
        let _ = writeln!(m, "edge:P{i}:hungry:eating:t{right}");
        let _ = writeln!(m, "edge:P{i}:eating:dropping:p{i}");
        let _ = writeln!(m, "edge:P{i}:dropping:thinking:p{right}");
    }
    for i in 0..n {
        let left_owner = i;
        let right_owner = (i + n - 1) % n;
        let _ = writeln!(m, "process:F{i}");
        let _ = writeln!(m, "location:F{i}:free{{initial:}}");
        let _ = writeln!(m, "location:F{i}:busy");
        let _ = writeln!(m, "edge:F{i}:free:busy:t{i}");
        let _ = writeln!(m, "edge:F{i}:busy:free:p{i}");
        let _ = writeln!(m, "sync:P{left_owner}@t{i}:F{i}@t{i}");
        let _ = writeln!(m, "sync:P{right_owner}@t{i}:F{i}@t{i}");
        let _ = writeln!(m, "sync:P{left_owner}@p{i}:F{i}@p{i}");
        let _ = writeln!(m, "sync:P{right_owner}@p{i}:F{i}@p{i}");
    }
    m
}

// Scenario: the philosophers deadlock is reachable and the sorted DOT
// output is stable across runs.
#[test]
fn philosophers_deadlock_reachable_with_stable_dot() {
    let model = philosophers_model();
    let labels = "d0,d1,d2,d3,d4";
    let (outcome, _, graph, zg) = covreach_run(
        &model,
        "zg:elapsed:extraLU+l",
        "alu_l",
        labels,
        SearchOrder::Bfs,
    )
    .unwrap();
    assert_eq!(outcome, Outcome::Reachable);
    let first = dot_of(&graph, &zg);
    let (outcome2, _, graph2, zg2) = covreach_run(
        &model,
        "zg:elapsed:extraLU+l",
        "alu_l",
        labels,
        SearchOrder::Bfs,
    )
    .unwrap();
    assert_eq!(outcome2, Outcome::Reachable);
    let second = dot_of(&graph2, &zg2);
    assert!(!first.is_empty());
    assert_eq!(first, second, "DOT output must be byte-identical across runs");
}

// Fischer's protocol with three processes and its standard timing argument.
fn fischer_model(n: usize) -> String {
    let mut m = String::new();
    let _ = writeln!(m, "system:fischer");
    let _ = writeln!(m, "int:1:0:{n}:0:id");
    for i in 1..=n {
        let _ = writeln!(m, "event:e{i}");
        let _ = writeln!(m, "process:P{i}");
        let _ = writeln!(m, "clock:1:x{i}");
        let _ = writeln!(m, "location:P{i}:idle{{initial:}}");
        let _ = writeln!(m, "location:P{i}:req{{invariant: x{i}<=2}}");
        let _ = writeln!(m, "location:P{i}:wait");
        let _ = writeln!(m, "location:P{i}:cs{{labels: cs{i}}}");
        let _ = writeln!(m, "edge:P{i}:idle:req:e{i}{{provided: id==0 , do: x{i}=0}}");
        let _ = writeln!(m, "edge:P{i}:req:wait:e{i}{{provided: x{i}<=2 , do: id={i}; x{i}=0}}");
        let _ = writeln!(m, "edge:P{i}:wait:cs:e{i}{{provided: x{i}>2 && id=={i}}}");
        let _ = writeln!(m, "edge:P{i}:wait:idle:e{i}{{provided: id==0}}");
        let _ = writeln!(m, "edge:P{i}:cs:idle:e{i}{{do: id=0}}");
    }
    m
}

// Scenario: mutual exclusion holds for Fischer with N=3 and the stored-node
// count is reproducible (the recorded oracle is the first run).
#[test]
fn fischer_three_mutual_exclusion() {
    let model = fischer_model(3);
    // Two processes in the critical section at once would carry both labels.
    let (outcome, stats, _, _) = covreach_run(
        &model,
        "zg:elapsed:extraLU+l",
        "alu_l",
        "cs1,cs2",
        SearchOrder::Bfs,
    )
    .unwrap();
    assert_eq!(outcome, Outcome::NotReachable);
    assert!(stats.stored_nodes > 3, "the protocol has more than a handful of zones");
    let (outcome2, stats2, _, _) = covreach_run(
        &model,
        "zg:elapsed:extraLU+l",
        "alu_l",
        "cs1,cs2",
        SearchOrder::Bfs,
    )
    .unwrap();
    assert_eq!(outcome2, Outcome::NotReachable);
    assert_eq!(stats.stored_nodes, stats2.stored_nodes);
    assert_eq!(stats.visited_transitions, stats2.visited_transitions);
    assert_eq!(stats.covered_states, stats2.covered_states);
}

// Scenario: constants near the representation limit either run through or
// fail with a clean overflow error, never an undefined state.
#[test]
fn overflow_guard_is_clean() {
    let input = "\
system:overflow
event:a
process:P
clock:1:x
location:P:l0{initial:}
location:P:l1
edge:P:l0:l1:a{provided: x<=2100000000 , do: x=x+2100000000}
";
    match covreach_run(input, "zg:standard:NOextra", "inclusion", "nope", SearchOrder::Bfs) {
        Ok((outcome, _, _, _)) => assert_eq!(outcome, Outcome::NotReachable),
        Err(CheckError::Db(_)) => {}
    }
}

// Search order changes the exploration, not the verdict.
#[test]
fn bfs_and_dfs_agree_on_the_verdict() {
    let model = fischer_model(2);
    for (labels, expected) in [("cs1,cs2", Outcome::NotReachable), ("cs1", Outcome::Reachable)] {
        for order in [SearchOrder::Bfs, SearchOrder::Dfs] {
            let (outcome, _, _, _) =
                covreach_run(&model, "zg:elapsed:extraLU+l", "alu_l", labels, order).unwrap();
            assert_eq!(outcome, expected, "labels={labels}");
        }
    }
}
