//! kgfit CLI - train and evaluate knowledge graph embeddings.
//!
//! # Usage
//!
//! ```bash
//! # Train, evaluate and write every artifact under the dump directory
//! kgfit train config/wn18-distmult.json
//!
//! # Same run with another seed and output directory, no progress bar
//! kgfit train config/wn18-distmult.json --seed 7 --output runs/ --quiet
//!
//! # Compare analytic gradients with finite differences
//! kgfit check-gradients config/wn18-distmult.json --samples 20
//!
//! # Count entities, relations and triples of a file
//! kgfit stats data/wn18/train.txt
//! ```

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use kgfit::gradcheck::{check_gradients, max_relative_error, DEFAULT_EPSILON, DEFAULT_TOLERANCE};
use kgfit::run::{prepare, run_with_observer};
use kgfit::triples::NewTokenPolicy;
use kgfit::{Config, TripleStore, Vocabulary};
use rand::Rng;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "kgfit")]
#[command(about = "Knowledge graph embedding trainer", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train a model and evaluate it on the test split
    Train {
        /// Run configuration (JSON)
        config: PathBuf,

        /// Override the configured seed
        #[arg(long)]
        seed: Option<u64>,

        /// Override the dump directory
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Hide the progress bar
        #[arg(short, long)]
        quiet: bool,

        /// Print the run summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Compare analytic gradients with central finite differences
    CheckGradients {
        /// Run configuration (JSON)
        config: PathBuf,

        /// Number of random training triples to check
        #[arg(long, default_value = "10")]
        samples: usize,

        /// Finite difference step
        #[arg(long, default_value_t = DEFAULT_EPSILON)]
        epsilon: f64,

        /// Largest accepted relative error
        #[arg(long, default_value_t = DEFAULT_TOLERANCE)]
        tolerance: f64,
    },

    /// Show entity, relation and triple counts of a triple file
    Stats {
        /// Whitespace separated triple file
        input: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Train {
            config,
            seed,
            output,
            quiet,
            json,
        } => cmd_train(&config, seed, output, quiet, json),
        Commands::CheckGradients {
            config,
            samples,
            epsilon,
            tolerance,
        } => cmd_check_gradients(&config, samples, epsilon, tolerance),
        Commands::Stats { input } => cmd_stats(&input),
    }
}

fn load_config(path: &Path) -> Result<Config> {
    Config::from_file(path).with_context(|| format!("Failed to load config {}", path.display()))
}

fn cmd_train(
    path: &Path,
    seed: Option<u64>,
    output: Option<PathBuf>,
    quiet: bool,
    json: bool,
) -> Result<()> {
    let mut config = load_config(path)?;
    if let Some(seed) = seed {
        config.seed = seed;
    }
    if let Some(output) = output {
        config.serialization.dump_directory = output;
    }

    let pb = if quiet {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new(config.optimizer.max_epochs as u64);
        pb.set_style(
            ProgressStyle::with_template("{bar:40} {pos}/{len} epochs {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        pb
    };

    let start = Instant::now();
    let summary = run_with_observer(&config, |stats| {
        pb.inc(1);
        match stats.mrr {
            Some(mrr) => pb.set_message(format!("loss {:.4} mrr {:.4}", stats.loss, mrr)),
            None => pb.set_message(format!("loss {:.4}", stats.loss)),
        }
    })
    .with_context(|| format!("Run of {} failed", path.display()))?;
    pb.finish_and_clear();

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    let both = &summary.report.overall.both;
    println!("Run {}", summary.dump_name);
    println!("==========================");
    println!("Location:       {}", summary.location.display());
    println!("Epochs:         {}", summary.training.epochs_run);
    println!("Stopped early:  {}", summary.training.stopped_early);
    println!("Test triples:   {}", summary.report.num_triples);
    println!("Raw:            {}", both.raw.summary());
    println!("Filtered:       {}", both.filtered.summary());
    println!("Elapsed:        {:.2?}", start.elapsed());
    Ok(())
}

fn cmd_check_gradients(path: &Path, samples: usize, epsilon: f64, tolerance: f64) -> Result<()> {
    let config = load_config(path)?;
    let (data, mut model, mut rng) = prepare(&config)?;
    if data.train.is_empty() {
        bail!("{} has no training triples", path.display());
    }

    info!(model = %model.dump_name(), samples, epsilon, "checking gradients");
    let mut worst = 0.0f64;
    let mut failures = 0usize;
    for _ in 0..samples {
        let index = rng.random_range(0..data.train.len());
        let Some(&triple) = data.train.get(index) else {
            continue;
        };
        let report = check_gradients(model.as_mut(), &triple, epsilon);
        for d in report.iter().filter(|d| d.exceeds(tolerance)) {
            failures += 1;
            println!(
                "{} [{}][{}]: analytic {:.6e} numeric {:.6e} (relative error {:.3e})",
                d.family, d.id, d.coordinate, d.analytic, d.numeric, d.relative_error
            );
        }
        worst = worst.max(max_relative_error(&report));
    }

    println!("Max relative error: {:.3e}", worst);
    if failures > 0 {
        bail!("{failures} coordinates exceed tolerance {tolerance:e}");
    }
    println!("All gradients within tolerance {:e}", tolerance);
    Ok(())
}

fn cmd_stats(input: &Path) -> Result<()> {
    let mut vocabulary = Vocabulary::new();
    let store = TripleStore::load(input, &mut vocabulary, NewTokenPolicy::Assign, None)
        .with_context(|| format!("Failed to read {}", input.display()))?;

    println!("Triple File Statistics");
    println!("==========================");
    println!("Entities:       {}", vocabulary.num_entities());
    println!("Relations:      {}", vocabulary.num_relations());
    println!("Triples:        {}", store.len());
    Ok(())
}
