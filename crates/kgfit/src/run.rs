//! End-to-end run: load, build, train, evaluate, write artifacts.
//!
//! A run directory ends up holding:
//!
//! ```text
//! <location>/
//!   config.json
//!   entityMappings.csv, relationMappings.csv
//!   parameters/<family>            (ensembles: models/<member>/parameters/..)
//!   stats.csv
//!   metrics.csv, metrics-by-relation.csv
//! ```

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use tracing::info;

use crate::config::{Config, SerializationConfig};
use crate::error::Result;
use crate::evaluation::{EvaluationReport, RankEvaluator};
use crate::io::{self, CONFIG_FILE};
use crate::loss::{build_loss, BatchShape};
use crate::models::{build_model, ModelContext, ScoringModel};
use crate::sampling::build_sampler;
use crate::training::{EpochStats, TrainingLoop, TrainingOutcome};
use crate::triples::Dataset;

/// What a finished run produced.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    /// Directory holding every artifact of the run.
    pub location: PathBuf,
    /// Model name used for the directory.
    pub dump_name: String,
    /// Entity count.
    pub num_entities: usize,
    /// Relation count.
    pub num_relations: usize,
    /// Training statistics.
    pub training: TrainingOutcome,
    /// Final evaluation on the test (or validation) split.
    pub report: EvaluationReport,
}

/// Resolve the run directory for a model called `dump_name`.
///
/// `auto` becomes `<dumpName>-<unix millis>`; any other value is taken as a
/// path relative to the dump directory.
pub fn dump_location(config: &SerializationConfig, dump_name: &str) -> PathBuf {
    if config.dump_location.eq_ignore_ascii_case("auto") {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_millis());
        config.dump_directory.join(format!("{dump_name}-{millis}"))
    } else {
        config.dump_directory.join(&config.dump_location)
    }
}

/// Run `config` to completion.
pub fn run(config: &Config) -> Result<RunSummary> {
    run_with_observer(config, |_| {})
}

/// Like [`run`], calling `observer` after every training epoch.
pub fn run_with_observer(
    config: &Config,
    observer: impl FnMut(&EpochStats),
) -> Result<RunSummary> {
    config.validate()?;
    let optimizer = &config.optimizer;
    let shape = BatchShape {
        batch_size: optimizer.batch_size,
        number_of_negatives: optimizer.sampling.number_of_negatives,
    };
    let mut loss = build_loss(&optimizer.kind, shape, config.model.hyper_parameters.margin)?;
    let sampler = build_sampler(&optimizer.sampling)?;

    let (mut data, mut model, mut rng) = prepare(config)?;
    if optimizer.train_on_validation {
        data.train.extend(&data.valid);
        info!(triples = data.train.len(), "appended validation triples to training set");
    }

    let dump_name = model.dump_name();
    let location = dump_location(&config.serialization, &dump_name);
    std::fs::create_dir_all(&location)?;
    info!(
        model = %dump_name,
        entities = data.num_entities(),
        relations = data.num_relations(),
        location = %location.display(),
        "model built"
    );

    io::dump_config(location.join(CONFIG_FILE), config)?;
    if config.data.dump_mappings {
        data.vocabulary.dump_mappings(&location)?;
    }

    let lookup = [&data.train, &data.valid, &data.test];
    let training = TrainingLoop::new(optimizer, &data.train)
        .with_validation(&data.valid, &lookup)
        .with_location(&location)
        .with_observer(observer)
        .run(model.as_mut(), loss.as_mut(), sampler.as_ref(), &mut rng)?;

    let (name, target) = if optimizer.test_on_validation {
        ("validation", &data.valid)
    } else {
        ("test", &data.test)
    };
    info!(split = name, triples = target.len(), "evaluation started");
    let report = RankEvaluator::new(&lookup).evaluate(model.as_ref(), target);
    report.write_csv(&location, &data.vocabulary)?;
    info!("{}", report.summary());

    Ok(RunSummary {
        location,
        dump_name,
        num_entities: data.num_entities(),
        num_relations: data.num_relations(),
        training,
        report,
    })
}

/// Load the data of `config` and build its model from the seeded RNG.
///
/// Returns the RNG so training continues the same random stream.
pub fn prepare(config: &Config) -> Result<(Dataset, Box<dyn ScoringModel>, StdRng)> {
    config.validate()?;
    let data = Dataset::load(&config.data)?;
    let mut rng = StdRng::seed_from_u64(config.seed);
    let model = {
        let mut ctx = ModelContext {
            num_entities: data.num_entities(),
            num_relations: data.num_relations(),
            update: &config.update,
            initializer: &config.initializer,
            rng: &mut rng,
        };
        build_model(&config.model, &mut ctx)?
    };
    Ok((data, model, rng))
}
