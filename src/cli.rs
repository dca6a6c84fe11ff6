use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::brute_force::BruteForceOpt;
use crate::config::SearchConfig;
use crate::display::{
    partition_table, print_error, print_section, print_success, solution_table,
    tree_info_table, verify_table,
};
use crate::error::{CertError, CertResult};
use crate::event::format_event;
use crate::event_tree::{EventTree, TreeIo};
use crate::logging;
use crate::objective::EvaluatorSet;
use crate::optimizer::{AnyOptimizer, Optimizer, SearchMode, StopMode};
use crate::symmetry::ReducedOutcomes;
use crate::tree_opt::TreeOpt;
use crate::tree_splitter::TreeSplitter;

#[derive(Parser)]
#[command(
    name = "infcert",
    version = "1.0.0",
    about = "Search inflation events for infeasibility certificates."
)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Also write the log to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, ValueEnum)]
enum StopArg {
    Sat,
    Opt,
}

impl StopArg {
    fn as_str(&self) -> &'static str {
        match self {
            StopArg::Sat => "sat",
            StopArg::Opt => "opt",
        }
    }
}

#[derive(Clone, ValueEnum)]
enum SearchArg {
    #[value(name = "brute_force")]
    BruteForce,
    #[value(name = "tree_search")]
    TreeSearch,
    Auto,
}

impl SearchArg {
    fn mode(&self) -> SearchMode {
        match self {
            SearchArg::BruteForce => SearchMode::BruteForce,
            SearchArg::TreeSearch => SearchMode::TreeSearch,
            SearchArg::Auto => SearchMode::Auto,
        }
    }
}

#[derive(Clone, ValueEnum)]
enum SymtreeArg {
    Read,
    Write,
    None,
}

impl SymtreeArg {
    fn io(&self) -> TreeIo {
        match self {
            SymtreeArg::Read => TreeIo::Read,
            SymtreeArg::Write => TreeIo::Write,
            SymtreeArg::None => TreeIo::None,
        }
    }
}

#[derive(Args, Clone)]
struct NetworkArgs {
    /// Number of parties in the inflated network
    #[arg(short, long, default_value = "4")]
    parties: usize,
    /// Outcomes per party
    #[arg(short, long, default_value = "2")]
    outcomes: u8,
    /// Use the outcome-relabelling symmetry (first party fixed to 0)
    #[arg(long)]
    relabel: bool,
    /// Worker threads (defaults to the config or all cores)
    #[arg(short, long)]
    threads: Option<usize>,
    /// JSON search configuration
    #[arg(long)]
    config: Option<PathBuf>,
    /// Read or write the symmetrized event tree
    #[arg(long)]
    symtree: Option<SymtreeArg>,
    /// File used by --symtree
    #[arg(long)]
    symtree_path: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the size of the symmetrized event tree
    Info {
        #[command(flatten)]
        network: NetworkArgs,
    },
    /// Show how the tree is split between workers
    Split {
        #[command(flatten)]
        network: NetworkArgs,
        /// Number of groups (defaults to the thread count)
        #[arg(short, long)]
        splits: Option<usize>,
    },
    /// Minimize an objective over the event tree
    Optimize {
        #[command(flatten)]
        network: NetworkArgs,
        /// Stop at the first certificate or prove the optimum
        #[arg(long, default_value = "opt")]
        stop: StopArg,
        /// Certificate threshold for --stop sat
        #[arg(long, default_value = "0")]
        threshold: f64,
        /// Optimizer to use
        #[arg(long)]
        search: Option<SearchArg>,
        /// Seed for a random pairwise objective (default: sum of outcomes)
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Cross-check tree search against brute force on random objectives
    Verify {
        #[command(flatten)]
        network: NetworkArgs,
        /// First seed
        #[arg(long, default_value = "0")]
        seed: u64,
        /// Number of random objectives
        #[arg(short = 'n', long, default_value = "10")]
        trials: u64,
    },
}

pub fn run() {
    let cli = Cli::parse();
    dispatch(cli);
}

pub fn run_with_args(args: Vec<String>) {
    let cli = Cli::parse_from(args);
    dispatch(cli);
}

fn dispatch(cli: Cli) {
    if let Err(e) = logging::init(cli.verbose, cli.log_file.as_deref()) {
        print_error(&e.to_string());
    }
    let result = match cli.command {
        Commands::Info { network } => cmd_info(&network),
        Commands::Split { network, splits } => cmd_split(&network, splits),
        Commands::Optimize {
            network,
            stop,
            threshold,
            search,
            seed,
        } => cmd_optimize(&network, stop, threshold, search, seed),
        Commands::Verify {
            network,
            seed,
            trials,
        } => cmd_verify(&network, seed, trials),
    };
    if let Err(e) = result {
        print_error(&e.to_string());
        std::process::exit(1);
    }
}

fn load_config(network: &NetworkArgs) -> CertResult<SearchConfig> {
    let mut config = match &network.config {
        Some(path) => SearchConfig::load(path)?,
        None => SearchConfig::default(),
    };
    if let Some(threads) = network.threads {
        config.n_threads = threads;
    }
    if let Some(symtree) = &network.symtree {
        config.symtree_io = symtree.io();
    }
    if network.symtree_path.is_some() {
        config.symtree_path = network.symtree_path.clone();
    }
    config.validate()?;
    Ok(config)
}

fn build_group(network: &NetworkArgs) -> CertResult<ReducedOutcomes> {
    if network.relabel {
        ReducedOutcomes::relabelled(network.parties, network.outcomes)
    } else {
        ReducedOutcomes::full(network.parties, network.outcomes)
    }
}

fn build_tree(config: &SearchConfig, group: &ReducedOutcomes) -> CertResult<EventTree> {
    EventTree::load_or_build(
        config.symtree_io,
        config.symtree_path.as_deref(),
        group,
        config.eager_depth,
        config.cache_depth,
    )
}

fn cmd_info(network: &NetworkArgs) -> CertResult<()> {
    let config = load_config(network)?;
    let group = build_group(network)?;
    let tree = build_tree(&config, &group)?;
    print_section("Event tree", &tree_info_table(&tree.info()?));
    Ok(())
}

fn cmd_split(network: &NetworkArgs, splits: Option<usize>) -> CertResult<()> {
    let config = load_config(network)?;
    let group = build_group(network)?;
    let tree = build_tree(&config, &group)?;
    let n_splits = splits.unwrap_or(config.n_threads);
    let partition = TreeSplitter::new(&tree, n_splits)
        .with_quality_factor(config.quality_factor)
        .split()?;
    print_section(
        &format!("Partition into {} groups", partition.len()),
        &partition_table(&partition),
    );
    Ok(())
}

fn cmd_optimize(
    network: &NetworkArgs,
    stop: StopArg,
    threshold: f64,
    search: Option<SearchArg>,
    seed: Option<u64>,
) -> CertResult<()> {
    let mut config = load_config(network)?;
    if let Some(search) = &search {
        config.search_mode = search.mode();
    }
    let group = build_group(network)?;
    let tree = build_tree(&config, &group)?;

    let objective = match seed {
        Some(seed) => {
            if network.relabel {
                log::warn!("random objectives are not relabelling invariant, the reduced tree may miss the optimum");
            }
            let mut rng = StdRng::seed_from_u64(seed);
            let pairs = EvaluatorSet::ring_pairs(network.parties);
            EvaluatorSet::random(network.parties, network.outcomes, &pairs, &mut rng)?
        }
        None => EvaluatorSet::sum_of_outcomes(network.parties, network.outcomes)?,
    }
    .with_bounds(config.store_bounds);

    let stop_mode = match stop {
        StopArg::Sat => StopMode::Sat { threshold },
        StopArg::Opt => StopMode::Opt,
    };
    log::info!("optimizing in {} mode", stop.as_str());

    let mut optimizer = AnyOptimizer::from_config(&config, &tree, &group)?;
    let solution = optimizer.solve(&objective, stop_mode)?;
    print_section(
        "Solution",
        &solution_table(&solution, Some(tree.get_n_leaves()?)),
    );
    if solution.is_certificate() {
        print_success(&format!(
            "Certificate found at {}",
            format_event(solution.event())
        ));
    }
    Ok(())
}

fn cmd_verify(network: &NetworkArgs, seed: u64, trials: u64) -> CertResult<()> {
    let config = load_config(network)?;
    // Random objectives are not symmetric, so only the full tree is comparable.
    let group = ReducedOutcomes::full(network.parties, network.outcomes)?;
    let tree = EventTree::from_symmetry(&group, config.eager_depth, config.cache_depth)?;
    let pairs = EvaluatorSet::ring_pairs(network.parties);

    let mut brute = BruteForceOpt::from_tree(&tree)?;
    let mut search = TreeOpt::new(&tree, &group, config.n_threads)?
        .with_quality_factor(config.quality_factor)
        .with_bounds(config.store_bounds);

    let mut rows = Vec::new();
    for s in seed..seed + trials {
        let mut rng = StdRng::seed_from_u64(s);
        let objective =
            EvaluatorSet::random(network.parties, network.outcomes, &pairs, &mut rng)?;
        let expected = brute.optimize(&objective, StopMode::Opt)?;
        let found = search.optimize(&objective, StopMode::Opt)?;
        let ok = (expected.score - found.score).abs() <= 1e-9 && expected.event == found.event;
        rows.push((s, expected.score, found.score, ok));
    }

    print_section("Verification", &verify_table(&rows));
    let failures = rows.iter().filter(|r| !r.3).count();
    if failures > 0 {
        return Err(CertError::InvalidValue(format!(
            "{} of {} objectives disagree",
            failures, trials
        )));
    }
    print_success(&format!("All {} objectives agree", trials));
    Ok(())
}
