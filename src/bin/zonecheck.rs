//! `zonecheck` command line
//!
//! Two sub-commands over the same model pipeline:
//!
//! - `explore`: enumerate the symbolic state space and print it;
//! - `covreach`: run the covering reachability algorithm and print the
//!   stats contract (`REACHABLE`, `STORED_NODES`, ...), plus an optional
//!   certificate graph.
//!
//! Exit code 0 on success (including `REACHABLE false`), non-zero on usage,
//! parse or configuration errors. Diagnostics go to stderr with `ERROR, ` /
//! `WARNING, ` prefixes and totals at exit.

use std::fs;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};

use zonecheck::covreach::{self, CovReachConfig, CoveringPolicy, Outcome};
use zonecheck::explore;
use zonecheck::options::{Certificate, CoverSpec, ModelSpec, SearchOrder};
use zonecheck::parse::parse_system;
use zonecheck::report::Reporter;
use zonecheck::store::Gc;
use zonecheck::system::System;
use zonecheck::zg::ZoneGraph;

#[derive(Parser)]
#[command(name = "zonecheck")]
#[command(about = "Reachability analysis of timed-automata networks over zone graphs")]
struct Cli {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Enumerate the symbolic state space and print it
    Explore(ExploreArgs),
    /// Run the covering reachability algorithm
    Covreach(CovreachArgs),
}

#[derive(Args)]
struct CommonArgs {
    /// Model: zg:SEMANTICS:EXTRAPOLATION (e.g. zg:elapsed:extraLU+l)
    #[arg(short = 'a', long = "model", default_value = "zg:elapsed:extraLU+l")]
    model: String,

    /// Search order: bfs or dfs
    #[arg(short = 's', long = "search-order", default_value = "bfs")]
    search_order: String,

    /// Write graph output to this file instead of stdout
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,

    /// Capacity hint for the node and edge arenas
    #[arg(long = "block-size", default_value_t = 10_000)]
    block_size: usize,

    /// Capacity hint for the hash tables
    #[arg(long = "table-size", default_value_t = 65_536)]
    table_size: usize,

    /// Input file; standard input when absent
    file: Option<PathBuf>,
}

#[derive(Args)]
struct ExploreArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Output format: dot or raw
    #[arg(short = 'f', long = "format", default_value = "raw")]
    format: String,
}

#[derive(Args)]
struct CovreachArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Comma-separated accepting labels
    #[arg(short = 'l', long = "labels", default_value = "")]
    labels: String,

    /// Cover relation: inclusion, alu_g, alu_l, am_g, am_l
    #[arg(short = 'c', long = "cover", default_value = "inclusion")]
    cover: String,

    /// Certificate: graph, symbolic, concrete or none
    #[arg(short = 'C', long = "certificate", default_value = "none")]
    certificate: String,

    /// Only cover new states against never-expanded nodes
    #[arg(long = "covering-leaf-nodes")]
    leaf_covering: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut reporter = Reporter::new();
    let result = match cli.command {
        Cmd::Explore(args) => run_explore(args, &mut reporter),
        Cmd::Covreach(args) => run_covreach(args, &mut reporter),
    };
    let code = match result {
        Ok(()) => 0,
        Err(e) => {
            reporter.error(e);
            1
        }
    };
    reporter.summary();
    std::process::exit(code);
}

fn read_input(file: &Option<PathBuf>) -> anyhow::Result<String> {
    match file {
        Some(path) => fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("cannot read {}: {e}", path.display())),
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            Ok(buf)
        }
    }
}

fn build_zone_graph(
    common: &CommonArgs,
    reporter: &mut Reporter,
) -> anyhow::Result<(ZoneGraph, SearchOrder)> {
    let model: ModelSpec = common.model.parse()?;
    let search_order: SearchOrder = common.search_order.parse()?;
    let input = read_input(&common.file)?;
    let decl = parse_system(&input)?;
    let system = Arc::new(System::build(&decl, reporter)?);
    let zg = ZoneGraph::new(system, model.semantics, model.extrapolation, true, reporter);
    Ok((zg, search_order))
}

fn write_output(output: &Option<PathBuf>, text: &str) -> anyhow::Result<()> {
    match output {
        Some(path) => fs::write(path, text)
            .map_err(|e| anyhow::anyhow!("cannot write {}: {e}", path.display())),
        None => {
            print!("{text}");
            Ok(())
        }
    }
}

fn run_explore(args: ExploreArgs, reporter: &mut Reporter) -> anyhow::Result<()> {
    let (mut zg, search_order) = build_zone_graph(&args.common, reporter)?;
    let gc = Gc::start();
    let (stats, mut graph) = explore::run(&mut zg, search_order, &gc)?;
    let name = zg.system().name.clone();
    let mut text = String::new();
    match args.format.as_str() {
        "dot" => graph.dot_output(&zg, &name, &mut text),
        "raw" => graph.raw_output(&zg, &mut text),
        other => anyhow::bail!("unknown format `{other}` (expected dot|raw)"),
    }
    write_output(&args.common.output, &text)?;
    tracing::info!(
        states = stats.visited_states,
        transitions = stats.visited_transitions,
        "exploration done"
    );
    graph.clear();
    Ok(())
}

fn run_covreach(args: CovreachArgs, reporter: &mut Reporter) -> anyhow::Result<()> {
    let cover: CoverSpec = args.cover.parse()?;
    let certificate: Certificate = args.certificate.parse()?;
    let (mut zg, search_order) = build_zone_graph(&args.common, reporter)?;
    let config = CovReachConfig {
        labels: args.labels.clone(),
        search_order,
        cover,
        policy: if args.leaf_covering { CoveringPolicy::Leaf } else { CoveringPolicy::Full },
        block_size: args.common.block_size,
        table_size: args.common.table_size,
    };
    let gc = Gc::start();
    let (outcome, stats, mut graph) = covreach::run(&mut zg, &config, &gc, reporter)?;

    println!("REACHABLE {}", if outcome == Outcome::Reachable { "true" } else { "false" });
    println!("STORED_NODES {}", stats.stored_nodes);
    println!("VISITED_TRANSITIONS {}", stats.visited_transitions);
    println!("COVERED_STATES {}", stats.covered_states);
    println!("RUNNING_TIME_SECONDS {:.2}", stats.running_time.as_secs_f64());

    match certificate {
        Certificate::None => {}
        Certificate::Graph => {
            let name = zg.system().name.clone();
            let mut text = String::new();
            graph.dot_output(&zg, &name, &mut text);
            write_output(&args.common.output, &text)?;
        }
        Certificate::Symbolic => {
            let mut text = String::new();
            graph.raw_output(&zg, &mut text);
            write_output(&args.common.output, &text)?;
        }
    }
    graph.clear();
    Ok(())
}
