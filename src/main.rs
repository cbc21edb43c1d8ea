mod assign;
mod config;
mod console;
mod converge;
mod error;
mod extract;
mod naming;
mod prune;
mod scheduler;
mod similarity;
mod store;

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::thread;

use assign::{Assigner, Preview};
use config::Config;
use console::Console;
use converge::{Convergence, ConvergenceReport};
use error::{Result, SortError};
use extract::RtfExtractor;
use prune::{ensure_converged, Pruner};
use scheduler::{PassReport, Scheduler};
use store::{ClusterStore, HoldingKind};

/// recluster - Regroup recovered rich-text files into one folder per source document
#[derive(Parser)]
#[command(name = "recluster")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true, default_value = ".recluster.toml")]
    config: PathBuf,

    /// Quiet mode - suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Directory holding the recovered files
    #[arg(long, global = true)]
    source: Option<PathBuf>,

    /// Directory the clusters are written under
    #[arg(long, global = true)]
    sorted: Option<PathBuf>,

    /// Worker threads (default: available cores minus one)
    #[arg(short, long, global = true)]
    workers: Option<usize>,
}

#[derive(Subcommand)]
enum Commands {
    /// Sort, prune and raise the threshold until nothing changes
    Run {
        /// First sort threshold (percent)
        #[arg(long)]
        start: Option<u32>,

        /// Threshold increment between steps
        #[arg(long)]
        step: Option<u32>,

        /// Last sort threshold and the threshold pruning runs at
        #[arg(long)]
        ceiling: Option<u32>,

        /// Output the summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Assign the input files to clusters at one threshold, without pruning
    Sort {
        /// Similarity threshold (0 to 100)
        #[arg(short, long, default_value = "70")]
        threshold: f64,

        /// Show where each file would go without moving anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Delete near-duplicates inside every cluster and return the rest
    Prune {
        /// Similarity at or above which a member is deleted (0 to 100)
        #[arg(short, long, default_value = "95")]
        threshold: f64,
    },

    /// Verify that every cluster holds exactly one file
    Check,

    /// Move every sorted and held file back to the input directory
    Unsort,

    /// Poll the input directory and sort whatever shows up
    Watch,

    /// Show pool, cluster and holding area counts
    Stats {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    let result = match load_config(&cli) {
        Ok(config) => match cli.command {
            Commands::Run { json, .. } => cmd_run(&config, json),
            Commands::Sort { threshold, dry_run } => cmd_sort(&config, threshold, dry_run),
            Commands::Prune { threshold } => cmd_prune(&config, threshold),
            Commands::Check => cmd_check(&config),
            Commands::Unsort => cmd_unsort(&config),
            Commands::Watch => cmd_watch(&config),
            Commands::Stats { json } => cmd_stats(&config, json),
        },
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        Console::default().error(e);
        std::process::exit(1);
    }
}

/// Defaults, then the config file, then command-line flags.
fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::load(&cli.config)?;

    if let Some(source) = &cli.source {
        config.source_dir = source.clone();
    }
    if let Some(sorted) = &cli.sorted {
        config.sorted_dir = sorted.clone();
    }
    if let Some(workers) = cli.workers {
        config.workers = workers;
    }
    if cli.quiet {
        config.quiet = true;
    }
    if let Commands::Run { start, step, ceiling, .. } = &cli.command {
        if let Some(start) = start {
            config.start_threshold = *start;
        }
        if let Some(step) = step {
            config.threshold_step = *step;
        }
        if let Some(ceiling) = ceiling {
            config.prune_ceiling = *ceiling;
        }
    }

    config.validate()?;
    Ok(config)
}

fn check_threshold(threshold: f64) -> Result<f64> {
    if (0.0..=100.0).contains(&threshold) {
        Ok(threshold)
    } else {
        Err(SortError::Config(format!(
            "threshold {} is outside 0 to 100",
            threshold
        )))
    }
}

/// One full convergence over whatever the input pool holds right now.
fn converge(store: &ClusterStore, config: &Config, console: Console) -> Result<ConvergenceReport> {
    let extractor = RtfExtractor;
    let assigner = Assigner::new(store, &extractor, config, console);
    let pruner = Pruner::new(store, &extractor, config, console);
    let scheduler = Scheduler::new(config, console)?;

    console.heading(format!(
        "Sorting {} with {} workers",
        store.source_dir().display(),
        scheduler.workers()
    ));

    Convergence::new(
        store,
        &assigner,
        &pruner,
        &scheduler,
        config.threshold_schedule(),
        f64::from(config.prune_ceiling),
        console,
    )
    .run()
}

fn cmd_run(config: &Config, json: bool) -> Result<()> {
    let console = Console::new(config.quiet || json);
    let store = ClusterStore::open(config, console)?;
    let report = converge(&store, config, console)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    if console.is_quiet() {
        return Ok(());
    }

    println!();
    println!("{}", "Run Summary".green().bold());
    println!();
    println!("  Clusters:          {}", report.clusters.to_string().cyan());
    println!("  Files sorted:      {}", report.assignment.attempted.to_string().cyan());
    println!("  Duplicates pruned: {}", report.pruning.pruned.to_string().cyan());
    println!(
        "  Unreadable:        {}",
        (report.assignment.unreadable + report.pruning.unreadable).to_string().cyan()
    );
    println!("  Unsaveable:        {}", report.assignment.unsaveable.to_string().cyan());
    println!("  Unsorted:          {}", report.leftovers.to_string().cyan());
    println!(
        "  Left in place:     {}",
        (report.assignment.failed + report.pruning.failed).to_string().cyan()
    );
    println!();
    for step in &report.steps {
        println!(
            "  {:>5}%  {} round(s), {} left",
            step.threshold,
            step.rounds,
            step.remaining.to_string().dimmed()
        );
    }
    Ok(())
}

fn cmd_sort(config: &Config, threshold: f64, dry_run: bool) -> Result<()> {
    let threshold = check_threshold(threshold)?;
    let console = Console::new(config.quiet);
    let store = ClusterStore::open(config, console)?;
    let extractor = RtfExtractor;
    let assigner = Assigner::new(&store, &extractor, config, console);

    if dry_run {
        return preview_sort(&store, &assigner, threshold, console);
    }
    let scheduler = Scheduler::new(config, console)?;

    let mut total = PassReport::default();
    loop {
        let before = store.pool_count()?;
        if before == 0 {
            break;
        }
        total += scheduler.run_pass(&assigner, threshold)?;
        let after = store.pool_count()?;
        if after >= before {
            console.danger(format!("{} files could not be sorted.", after));
            break;
        }
    }

    console.rule();
    console.heading(format!(
        "{} joined, {} new clusters, {} unreadable, {} unsaveable",
        total.joined, total.created, total.unreadable, total.unsaveable
    ));
    Ok(())
}

/// Report each pooled file's best match against the clusters as they are now.
/// Files are not compared with each other since none of them move.
fn preview_sort(
    store: &ClusterStore,
    assigner: &Assigner<'_>,
    threshold: f64,
    console: Console,
) -> Result<()> {
    let files = store.pool_files()?;
    console.heading(format!("Dry run: {} files at {}%", files.len(), threshold));

    let (mut joins, mut creates, mut unreadable) = (0, 0, 0);
    for file in &files {
        match assigner.preview(file, threshold) {
            Ok(Preview::Join { .. }) => joins += 1,
            Ok(Preview::Create { .. }) => creates += 1,
            Ok(Preview::Unreadable) => unreadable += 1,
            Err(e) => console.error(format!("{}: {}", file.display(), e)),
        }
    }

    console.rule();
    console.heading(format!(
        "{} would join, {} would start a cluster, {} unreadable. Nothing was moved.",
        joins, creates, unreadable
    ));
    Ok(())
}

fn cmd_prune(config: &Config, threshold: f64) -> Result<()> {
    let threshold = check_threshold(threshold)?;
    let console = Console::new(config.quiet);
    let store = ClusterStore::open(config, console)?;
    let extractor = RtfExtractor;
    let pruner = Pruner::new(&store, &extractor, config, console);

    let report = pruner.prune_all(threshold)?;
    console.rule();
    console.heading(format!(
        "{} deleted, {} returned, {} unreadable, {} empty clusters removed",
        report.pruned, report.returned, report.unreadable, report.removed_clusters
    ));
    ensure_converged(&store, console)
}

fn cmd_check(config: &Config) -> Result<()> {
    let console = Console::new(config.quiet);
    let store = ClusterStore::open(config, console)?;
    ensure_converged(&store, console)?;
    console.heading(format!(
        "All {} clusters hold exactly one file.",
        store.list_clusters()?.len()
    ));
    Ok(())
}

fn cmd_unsort(config: &Config) -> Result<()> {
    let console = Console::new(config.quiet);
    let store = ClusterStore::open(config, console)?;
    let moved = store.unsort_all(console)?;
    console.heading(format!(
        "{} files returned to {}",
        moved,
        store.source_dir().display()
    ));
    Ok(())
}

fn cmd_watch(config: &Config) -> Result<()> {
    let console = Console::new(config.quiet);
    let store = ClusterStore::open(config, console)?;
    console.heading(format!(
        "Watching {} every {}s",
        store.source_dir().display(),
        config.poll_interval_secs
    ));

    loop {
        if store.pool_count()? > 0 {
            // A failed run is reported and the next poll tries again.
            if let Err(e) = converge(&store, config, console) {
                console.error(e);
            }
        }
        thread::sleep(config.poll_interval());
    }
}

fn cmd_stats(config: &Config, json: bool) -> Result<()> {
    let store = ClusterStore::open(config, Console::new(true))?;
    let stats = store.stats()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("{}", "Sort Statistics".green().bold());
    println!();
    println!("  Input files:       {}", stats.pool.to_string().cyan());
    println!("  Clusters:          {}", stats.clusters.to_string().cyan());
    println!("  Clustered files:   {}", stats.clustered_documents.to_string().cyan());
    for kind in HoldingKind::ALL {
        if let Some(count) = stats.holdings.get(&kind) {
            println!("  {:<18} {}", format!("{}:", kind), count.to_string().cyan());
        }
    }

    if !stats.multi_member_clusters.is_empty() {
        println!();
        println!(
            "{}",
            format!("{} clusters with more than one file", stats.multi_member_clusters.len())
                .yellow()
                .bold()
        );
        for name in &stats.multi_member_clusters {
            println!("  {}", name.dimmed());
        }
    }
    Ok(())
}
